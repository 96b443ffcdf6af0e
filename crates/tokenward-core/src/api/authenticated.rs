//! Bearer-credential wrapper around a [`Transport`].
//!
//! Outbound, the current access credential is attached as-is; expiry is not
//! checked before sending. Inbound, a 401 on a first attempt triggers one
//! renewal through the [`RefreshCoordinator`] and one resend with the new
//! credential. While a renewal is outstanding, each rejected request waits
//! on it holding its own copy of the original request.

use std::sync::Arc;

use tracing::{debug, warn};

use super::error::ApiError;
use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::auth::{Credential, RefreshCoordinator, SessionStore};

/// Which send of a request this is. A request is renewed-and-resent at most
/// once; any later rejection is delivered to the caller unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attempt(u32);

impl Attempt {
    pub const FIRST: Attempt = Attempt(0);

    pub fn number(self) -> u32 {
        self.0
    }

    pub fn is_retry(self) -> bool {
        self.0 > 0
    }

    pub fn next(self) -> Attempt {
        Attempt(self.0.saturating_add(1))
    }
}

#[derive(Clone)]
pub struct AuthenticatedTransport {
    inner: Arc<dyn Transport>,
    session: Arc<SessionStore>,
    refresher: RefreshCoordinator,
}

impl AuthenticatedTransport {
    pub fn new(
        inner: Arc<dyn Transport>,
        session: Arc<SessionStore>,
        refresher: RefreshCoordinator,
    ) -> Self {
        Self {
            inner,
            session,
            refresher,
        }
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Send `request`, renewing the session and resending once on rejection.
    ///
    /// Non-401 responses, including errors, are returned as `Ok`. Fails with
    /// [`ApiError::SessionExpired`] when renewal was impossible; the session
    /// has been terminated by then.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.send_attempt(request, Attempt::FIRST).await
    }

    pub async fn send_attempt(
        &self,
        request: &ApiRequest,
        attempt: Attempt,
    ) -> Result<ApiResponse, ApiError> {
        let mut attempt = attempt;
        let mut credential = self.session.access_credential();

        loop {
            let outbound = match credential {
                Some(ref credential) => request.authorized(credential)?,
                None => request.clone(),
            };

            let response = self.inner.send(&outbound).await?;
            if !response.is_auth_rejection() {
                return Ok(response);
            }
            if attempt.is_retry() {
                debug!(path = %request.path, attempt = attempt.number(), "Rejected again, delivering");
                return Ok(response);
            }

            debug!(path = %request.path, "Credential rejected, renewing");
            credential = Some(self.renew(credential.as_ref()).await?);
            attempt = attempt.next();
        }
    }

    async fn renew(&self, rejected: Option<&Credential>) -> Result<Credential, ApiError> {
        self.refresher.renew_rejected(rejected).await.map_err(|e| {
            warn!(error = %e, "Session could not be renewed");
            ApiError::SessionExpired
        })
    }
}
