//! tokenward - terminal client for a token-auth REST API.
//!
//! Logs in, shows the current profile and session status, and logs out.
//! Credentials persist between runs in the OS keychain or an encrypted file.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tokenward_core::auth::AuthState;
use tokenward_core::config::StoreBackend;
use tokenward_core::storage::{EncryptedFileStore, KeyringStore};
use tokenward_core::{ApiClient, Config, Navigator, Persistence};

// ============================================================================
// Constants
// ============================================================================

/// Passphrase for the encrypted file backend
const PASSPHRASE_ENV: &str = "TOKENWARD_STORE_PASSPHRASE";

const USAGE: &str = "\
Usage: tokenward <command>

Commands:
  login [email]   Log in and save the session
  register        Create an account and log in
  whoami          Show the profile of the logged in user
  status          Show session state and access credential lifetime
  logout          Forget the saved session";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // RUST_LOG controls the level (e.g. RUST_LOG=tokenward_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Terminal stand-in for a login screen. A redirect prints a one-line
/// notice; the next command starts logged out.
#[derive(Default)]
struct ConsoleNavigator {
    at_login: AtomicBool,
}

impl Navigator for ConsoleNavigator {
    fn redirect_to_login(&self) {
        self.at_login.store(true, Ordering::SeqCst);
        eprintln!("Session expired. Run `tokenward login` to sign in again.");
    }

    fn current_path_is_login(&self) -> bool {
        self.at_login.load(Ordering::SeqCst)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let mut config = Config::load().context("Failed to load config")?;
    let navigator = Arc::new(ConsoleNavigator::default());
    let client = ApiClient::from_config(&config, open_store(&config)?, navigator)?;
    info!(command, base_url = %config.api_base_url(), "tokenward starting");

    match command {
        "login" => login(&client, &mut config, args.get(1).cloned()).await,
        "register" => register(&client, &mut config).await,
        "whoami" => whoami(&client).await,
        "status" => {
            status(&client);
            Ok(())
        }
        "logout" => {
            client.logout();
            println!("Logged out.");
            Ok(())
        }
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn Persistence>> {
    let store: Arc<dyn Persistence> = match config.store_backend {
        StoreBackend::Keyring => Arc::new(KeyringStore::new()),
        StoreBackend::File => {
            let passphrase = std::env::var(PASSPHRASE_ENV)
                .with_context(|| format!("{} must be set for the file store", PASSPHRASE_ENV))?;
            Arc::new(EncryptedFileStore::open(
                EncryptedFileStore::default_path(config)?,
                &passphrase,
            )?)
        }
    };
    Ok(store)
}

async fn login(client: &ApiClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password(format!("Password for {}: ", email))?;

    let profile = client
        .login(&email, &password)
        .await
        .context("Login failed")?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {}.", profile.display_name());
    Ok(())
}

async fn register(client: &ApiClient, config: &mut Config) -> Result<()> {
    let email = prompt("Email: ")?;
    let name = prompt("Name: ")?;
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let profile = client
        .register(&email, &name, &password, &confirm)
        .await
        .context("Registration failed")?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }

    println!("Welcome, {}.", profile.display_name());
    Ok(())
}

async fn whoami(client: &ApiClient) -> Result<()> {
    if client.session().refresh_credential().is_none() {
        bail!("Not logged in. Run `tokenward login` first.");
    }

    let profile = client.fetch_profile().await?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

fn status(client: &ApiClient) {
    let session = client.session();
    let state = match session.auth_state() {
        AuthState::Anonymous => "logged out",
        AuthState::Authenticated => "logged in",
        AuthState::Refreshing => "renewing",
        AuthState::Expired => "expired",
    };
    println!("Session: {}", state);

    if let Some(access) = session.access_credential() {
        let remaining = access.time_remaining();
        if remaining.num_seconds() <= 0 {
            println!("Access credential: expired (renewed on next request)");
        } else {
            println!(
                "Access credential: {}m {}s left",
                remaining.num_minutes(),
                remaining.num_seconds() % 60
            );
        }
    }
    if let Some(subject) = session
        .access_credential()
        .and_then(|c| c.claims())
        .and_then(|claims| claims.subject_id())
    {
        println!("Subject: {}", subject);
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("{} is required", label.trim_end_matches(": "));
    }
    Ok(value)
}
