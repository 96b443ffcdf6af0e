//! Shared fixtures: unsigned tokens and a scripted in-process server.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::json;

use tokenward_core::api::{ApiRequest, ApiResponse, Transport, TransportError};
use tokenward_core::auth::{Credential, DEFAULT_EXCHANGE_PATH};
use tokenward_core::navigation::PathNavigator;
use tokenward_core::storage::{MemoryStore, ACCESS_CREDENTIAL_KEY, REFRESH_CREDENTIAL_KEY};
use tokenward_core::{ApiClient, SessionStore};

pub fn token_expiring_in(secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = json!({
        "exp": Utc::now().timestamp() + secs,
        "user_id": "c1",
        "token_type": "access",
        // Keeps tokens with equal exp distinct
        "jti": next_jti(),
    });
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    format!("{}.{}.sig", header, body)
}

pub fn expired_token() -> String {
    token_expiring_in(-60)
}

pub fn valid_token() -> String {
    token_expiring_in(3600)
}

fn next_jti() -> usize {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// What the credential exchange endpoint does when called
#[derive(Debug, Clone)]
pub enum Exchange {
    Issue {
        access: String,
        refresh: Option<String>,
    },
    /// Issues a credential the resource endpoints will not accept
    IssueUnaccepted(String),
    Reject(u16),
    Garbage,
    /// Never answers within any reasonable timeout
    Hang,
}

/// Resource server plus exchange endpoint. Resource requests succeed only
/// with a bearer credential in the accepted set.
pub struct FakeServer {
    accepted: Mutex<HashSet<String>>,
    exchange: Mutex<Exchange>,
    exchange_delay: Duration,
    exchange_calls: AtomicUsize,
    received: Mutex<Vec<ApiRequest>>,
}

impl FakeServer {
    pub fn new(exchange: Exchange) -> Self {
        Self {
            accepted: Mutex::new(HashSet::new()),
            exchange: Mutex::new(exchange),
            exchange_delay: Duration::from_millis(50),
            exchange_calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn accept(&self, credential: &str) {
        self.accepted.lock().unwrap().insert(credential.to_string());
    }

    pub fn revoke(&self, credential: &str) {
        self.accepted.lock().unwrap().remove(credential);
    }

    pub fn set_exchange(&self, exchange: Exchange) {
        *self.exchange.lock().unwrap() = exchange;
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    /// Resource requests in arrival order (exchange calls excluded)
    pub fn received(&self) -> Vec<ApiRequest> {
        self.received.lock().unwrap().clone()
    }

    async fn handle_exchange(&self, request: &ApiRequest) -> ApiResponse {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        assert!(request.authorization().is_none(), "exchange must not carry a bearer header");

        let behavior = self.exchange.lock().unwrap().clone();
        tokio::time::sleep(self.exchange_delay).await;

        match behavior {
            Exchange::Issue { access, refresh } => {
                self.accept(&access);
                let body = match refresh {
                    Some(refresh) => json!({ "access": access, "refresh": refresh }),
                    None => json!({ "access": access }),
                };
                ApiResponse::new(StatusCode::OK, body.to_string())
            }
            Exchange::IssueUnaccepted(access) => {
                ApiResponse::new(StatusCode::OK, json!({ "access": access }).to_string())
            }
            Exchange::Reject(status) => ApiResponse::new(
                StatusCode::from_u16(status).unwrap(),
                r#"{"detail":"Token is invalid or expired"}"#,
            ),
            Exchange::Garbage => ApiResponse::new(StatusCode::OK, "<html>oops</html>"),
            Exchange::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        if request.path == DEFAULT_EXCHANGE_PATH {
            return Ok(self.handle_exchange(request).await);
        }

        self.received.lock().unwrap().push(request.clone());
        let accepted = request
            .authorization()
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|c| self.accepted.lock().unwrap().contains(c))
            .unwrap_or(false);

        if accepted {
            Ok(ApiResponse::new(
                StatusCode::OK,
                json!({ "path": request.path }).to_string(),
            ))
        } else {
            Ok(ApiResponse::new(
                StatusCode::UNAUTHORIZED,
                r#"{"detail":"Given token not valid for any token type"}"#,
            ))
        }
    }
}

pub struct Harness {
    pub server: Arc<FakeServer>,
    pub persistence: Arc<MemoryStore>,
    pub navigator: Arc<PathNavigator>,
    pub session: Arc<SessionStore>,
    pub client: ApiClient,
}

/// Client with a session restored from the given persisted credentials
pub fn harness(access: Option<&str>, refresh: Option<&str>, exchange: Exchange) -> Harness {
    let mut entries = Vec::new();
    if let Some(access) = access {
        entries.push((ACCESS_CREDENTIAL_KEY, access));
    }
    if let Some(refresh) = refresh {
        entries.push((REFRESH_CREDENTIAL_KEY, refresh));
    }

    let server = Arc::new(FakeServer::new(exchange));
    let persistence = Arc::new(MemoryStore::with_entries(entries));
    let navigator = Arc::new(PathNavigator::new("/products"));
    let session = Arc::new(SessionStore::restored(persistence.clone()));
    let client = ApiClient::new(server.clone(), session.clone(), navigator.clone());

    Harness {
        server,
        persistence,
        navigator,
        session,
        client,
    }
}

pub fn credential(token: &str) -> Option<Credential> {
    Some(Credential::from(token))
}
