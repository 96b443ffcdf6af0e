//! Single-flight renewal of the access credential.
//!
//! At most one credential exchange is outstanding per coordinator. The
//! exchange runs as its own tokio task; callers await a `Shared` handle to
//! it, so dropping one waiter never cancels the exchange for the others.
//! The slot is cleared once the exchange settles, after the session store
//! has been updated.
//!
//! An exchange belongs to the refresh credential it sent. Callers join it
//! only while the session still holds that credential, and its outcome is
//! applied only to that session: a logout or a new login while it is
//! outstanding is never undone or terminated by it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::credential::Credential;
use super::session::SessionStore;
use super::terminate::SessionTerminator;
use crate::api::transport::{ApiRequest, Transport};
use crate::models::{RefreshRequest, RefreshResponse};

/// Credential exchange endpoint, relative to the API base URL
pub const DEFAULT_EXCHANGE_PATH: &str = "/auth/token/refresh/";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No valid refresh credential")]
    NoValidRefreshCredential,

    #[error("Credential exchange failed: {0}")]
    RefreshNetworkFailure(String),

    #[error("Credential exchange rejected with status {status}")]
    ExchangeRejected { status: u16 },

    #[error("Malformed credential exchange response: {0}")]
    MalformedExchangeResponse(String),

    #[error("Session changed while the credential exchange was outstanding")]
    SessionReplaced,
}

#[derive(Debug, Clone)]
pub struct RefreshOptions {
    pub exchange_path: String,
    /// Upper bound on one exchange, on top of the transport's own timeout
    pub timeout: Option<Duration>,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            exchange_path: DEFAULT_EXCHANGE_PATH.to_string(),
            timeout: None,
        }
    }
}

type SharedRenewal = Shared<BoxFuture<'static, Result<Credential, RefreshError>>>;

enum Pending {
    Fresh(Credential),
    Renewal(SharedRenewal),
}

/// The outstanding exchange and the refresh credential it sent
struct InFlight {
    generation: u64,
    refresh: Credential,
    renewal: SharedRenewal,
}

struct Inner {
    session: Arc<SessionStore>,
    transport: Arc<dyn Transport>,
    terminator: SessionTerminator,
    options: RefreshOptions,
    in_flight: Mutex<Option<InFlight>>,
    generations: AtomicU64,
}

/// Clone is cheap; clones share the same in-flight slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// `transport` must be the unauthenticated transport
    pub fn new(
        session: Arc<SessionStore>,
        transport: Arc<dyn Transport>,
        terminator: SessionTerminator,
    ) -> Self {
        Self::with_options(session, transport, terminator, RefreshOptions::default())
    }

    pub fn with_options(
        session: Arc<SessionStore>,
        transport: Arc<dyn Transport>,
        terminator: SessionTerminator,
        options: RefreshOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                transport,
                terminator,
                options,
                in_flight: Mutex::new(None),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Return an unexpired access credential, renewing it if needed.
    pub async fn ensure_fresh_access_credential(&self) -> Result<Credential, RefreshError> {
        self.renew_rejected(None).await
    }

    /// Like [`ensure_fresh_access_credential`](Self::ensure_fresh_access_credential),
    /// but `rejected` is never handed back even if its `exp` lies in the future:
    /// the server has already refused it.
    pub async fn renew_rejected(
        &self,
        rejected: Option<&Credential>,
    ) -> Result<Credential, RefreshError> {
        match self.join_or_start(rejected) {
            Ok(Pending::Fresh(credential)) => Ok(credential),
            Ok(Pending::Renewal(renewal)) => renewal.await,
            Err(e) => {
                warn!(error = %e, "Cannot renew session");
                self.inner.terminator.terminate();
                Err(e)
            }
        }
    }

    /// True while an exchange is outstanding
    pub fn is_refreshing(&self) -> bool {
        self.inner.slot().is_some()
    }

    fn join_or_start(&self, rejected: Option<&Credential>) -> Result<Pending, RefreshError> {
        if let Some(credential) = self.inner.usable_access(rejected) {
            return Ok(Pending::Fresh(credential));
        }

        let mut slot = self.inner.slot();
        let current = self.inner.session.refresh_credential();
        match slot.as_ref() {
            Some(in_flight) if current.as_ref() == Some(&in_flight.refresh) => {
                debug!("Joining in-flight renewal");
                return Ok(Pending::Renewal(in_flight.renewal.clone()));
            }
            Some(_) => debug!("In-flight renewal belongs to a previous session"),
            None => {}
        }

        // A renewal may have settled between the first check and the lock
        if let Some(credential) = self.inner.usable_access(rejected) {
            return Ok(Pending::Fresh(credential));
        }

        let refresh = match current {
            Some(refresh) if !refresh.is_expired() => refresh,
            _ => return Err(RefreshError::NoValidRefreshCredential),
        };

        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let renewal = Inner::spawn_renewal(Arc::clone(&self.inner), generation, refresh.clone());
        *slot = Some(InFlight {
            generation,
            refresh,
            renewal: renewal.clone(),
        });
        Ok(Pending::Renewal(renewal))
    }
}

/// Clears the in-flight slot when the renewal task ends, however it ends,
/// unless a newer renewal has taken the slot over.
struct InFlightGuard {
    inner: Arc<Inner>,
    generation: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut slot = self.inner.slot();
        if slot.as_ref().map(|f| f.generation) == Some(self.generation) {
            slot.take();
            drop(slot);
            self.inner.session.set_refreshing(false);
        }
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn usable_access(&self, rejected: Option<&Credential>) -> Option<Credential> {
        self.session
            .access_credential()
            .filter(|access| !access.is_expired() && Some(access) != rejected)
    }

    /// Caller holds the slot lock, so the task's guard cannot clear the slot
    /// before it has been filled.
    fn spawn_renewal(inner: Arc<Inner>, generation: u64, refresh: Credential) -> SharedRenewal {
        inner.session.set_refreshing(true);
        info!(generation, "Renewing access credential");

        let handle = tokio::spawn(async move {
            let guard = InFlightGuard {
                inner: Arc::clone(&inner),
                generation,
            };
            let result = inner.exchange(&refresh).await;
            match result {
                Ok(_) => info!("Access credential renewed"),
                Err(RefreshError::SessionReplaced) => {
                    info!("Renewal outcome discarded, session changed meanwhile")
                }
                Err(ref e) => {
                    warn!(error = %e, "Credential renewal failed");
                    inner.terminator.terminate_if_current(&refresh);
                }
            }
            drop(guard);
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(RefreshError::RefreshNetworkFailure(format!(
                    "renewal task ended abnormally: {}",
                    e
                )))
            })
        }
        .boxed()
        .shared()
    }

    async fn exchange(&self, refresh: &Credential) -> Result<Credential, RefreshError> {
        let request = ApiRequest::post(&self.options.exchange_path)
            .with_json(&RefreshRequest {
                refresh: refresh.as_str(),
            })
            .map_err(|e| RefreshError::RefreshNetworkFailure(e.to_string()))?;

        let send = self.transport.send(&request);
        let response = match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, send).await.map_err(|_| {
                RefreshError::RefreshNetworkFailure("credential exchange timed out".to_string())
            })?,
            None => send.await,
        }
        .map_err(|e| RefreshError::RefreshNetworkFailure(e.to_string()))?;

        if !response.is_success() {
            return Err(RefreshError::ExchangeRejected {
                status: response.status.as_u16(),
            });
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| RefreshError::MalformedExchangeResponse(e.to_string()))?;
        if body.access.is_empty() {
            return Err(RefreshError::MalformedExchangeResponse(
                "empty access credential".to_string(),
            ));
        }

        let access = Credential::from(body.access);
        let rotated = body.refresh.filter(|r| !r.is_empty()).map(Credential::from);
        debug!(rotated = rotated.is_some(), "Credential exchange succeeded");

        match self.session.apply_renewal_if(refresh, access.clone(), rotated) {
            Ok(true) => Ok(access),
            Ok(false) => Err(RefreshError::SessionReplaced),
            Err(e) => {
                warn!(error = %e, "Renewed credential not persisted");
                Ok(access)
            }
        }
    }
}
