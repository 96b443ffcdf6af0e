//! API client for the token-auth REST API.
//!
//! This module provides the `ApiClient` struct, which wires the session
//! store, refresh coordinator and authenticated transport together and
//! exposes JSON helpers plus the login, registration and profile endpoints.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info, warn};

use super::authenticated::AuthenticatedTransport;
use super::error::ApiError;
use super::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use crate::auth::{
    Credential, RefreshCoordinator, RefreshOptions, SessionStore, SessionTerminator,
};
use crate::config::Config;
use crate::models::{
    LoginRequest, LoginResponse, ProfileUpdate, RegisterRequest, RegisterResponse, UserProfile,
};
use crate::navigation::Navigator;
use crate::storage::Persistence;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login/";
const REGISTER_PATH: &str = "/auth/register/";
const PROFILE_PATH: &str = "/auth/profile/";
const PROFILE_UPDATE_PATH: &str = "/auth/profile/update/";

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Clone is cheap: every component is shared behind an `Arc`.
#[derive(Clone)]
pub struct ApiClient {
    raw: Arc<dyn Transport>,
    transport: AuthenticatedTransport,
    session: Arc<SessionStore>,
}

impl ApiClient {
    /// `raw` is the unauthenticated transport; renewal and login go through it
    pub fn new(
        raw: Arc<dyn Transport>,
        session: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self::with_options(raw, session, navigator, RefreshOptions::default())
    }

    pub fn with_options(
        raw: Arc<dyn Transport>,
        session: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
        options: RefreshOptions,
    ) -> Self {
        let terminator = SessionTerminator::new(Arc::clone(&session), navigator);
        let refresher = RefreshCoordinator::with_options(
            Arc::clone(&session),
            Arc::clone(&raw),
            terminator,
            options,
        );
        let transport =
            AuthenticatedTransport::new(Arc::clone(&raw), Arc::clone(&session), refresher);

        Self {
            raw,
            transport,
            session,
        }
    }

    /// HTTP transport from `config`, session restored from `persistence`
    pub fn from_config(
        config: &Config,
        persistence: Arc<dyn Persistence>,
        navigator: Arc<dyn Navigator>,
    ) -> anyhow::Result<Self> {
        let raw: Arc<dyn Transport> = Arc::new(HttpTransport::from_config(config)?);
        let session = Arc::new(SessionStore::restored(persistence));
        Ok(Self::new(raw, session, navigator))
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn transport(&self) -> &AuthenticatedTransport {
        &self.transport
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        self.transport.refresher()
    }

    // ===== Session Lifecycle =====

    /// Log in with email and password, storing credentials and profile
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ApiError> {
        let request = ApiRequest::post(LOGIN_PATH)
            .with_json(&LoginRequest { email, password })
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        let response = Self::check_response(self.raw.send(&request).await?)?;
        let login: LoginResponse = Self::decode(&response)?;

        self.start_session(login.access, login.refresh, login.user.clone());
        info!("Login successful");
        Ok(login.user)
    }

    /// Register a new account; the server logs it in immediately
    pub async fn register(
        &self,
        email: &str,
        name: &str,
        password: &str,
        password_confirm: &str,
    ) -> Result<UserProfile, ApiError> {
        let request = ApiRequest::post(REGISTER_PATH)
            .with_json(&RegisterRequest {
                email,
                name,
                password,
                password_confirm,
            })
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        let response = Self::check_response(self.raw.send(&request).await?)?;
        let registered: RegisterResponse = Self::decode(&response)?;

        self.start_session(
            registered.tokens.access,
            registered.tokens.refresh,
            registered.user.clone(),
        );
        info!("Registration successful");
        Ok(registered.user)
    }

    /// End the session locally. No redirect, no expired notice.
    pub fn logout(&self) {
        if let Err(e) = self.session.clear() {
            warn!(error = %e, "Session cleared in memory only");
        }
        info!("Logged out");
    }

    fn start_session(&self, access: String, refresh: String, user: UserProfile) {
        if let Err(e) = self
            .session
            .set_credentials(Credential::from(access), Credential::from(refresh))
        {
            warn!(error = %e, "Failed to save session");
        }
        self.session.set_profile(user);
    }

    // ===== Profile =====

    pub async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
        let profile: UserProfile = self.get(PROFILE_PATH).await?;
        self.session.set_profile(profile.clone());
        Ok(profile)
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ApiError> {
        let profile: UserProfile = self.patch(PROFILE_UPDATE_PATH, update).await?;
        self.session.set_profile(profile.clone());
        Ok(profile)
    }

    // ===== JSON Helpers =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::post(path)
            .with_json(body)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        self.execute(request).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::patch(path)
            .with_json(body)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        self.execute(request).await
    }

    /// Send through the authenticated transport, backing off on 429
    async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.transport.send(&request).await?;

            if response.status.as_u16() != 429 {
                let response = Self::check_response(response)?;
                return Self::decode(&response);
            }

            // Rate limited
            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(path = %request.path, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2; // Exponential backoff
        }
    }

    /// Check if response is successful, returning an error with body if not.
    fn check_response(response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    fn decode<T: DeserializeOwned>(response: &ApiResponse) -> Result<T, ApiError> {
        response.json().map_err(|e| {
            error!(error = %e, "Failed to parse JSON response");
            ApiError::InvalidResponse(e.to_string())
        })
    }
}
