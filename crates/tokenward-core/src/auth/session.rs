use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::credential::Credential;
use crate::models::UserProfile;
use crate::storage::{Persistence, ACCESS_CREDENTIAL_KEY, REFRESH_CREDENTIAL_KEY};

#[derive(Error, Debug)]
pub enum SessionError {
    /// The in-memory mutation took effect; only durability failed.
    #[error("Session persistence unavailable for {key}: {source}")]
    PersistenceUnavailable {
        key: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthState {
    Anonymous,
    Authenticated,
    /// A renewal is outstanding; the previous access credential is still held
    Refreshing,
    /// Terminated after renewal became impossible
    Expired,
}

/// Point-in-time copy of the session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub access: Option<Credential>,
    pub refresh: Option<Credential>,
    pub profile: Option<UserProfile>,
    pub state: AuthState,
}

#[derive(Debug)]
struct SessionData {
    access: Option<Credential>,
    refresh: Option<Credential>,
    profile: Option<UserProfile>,
    state: AuthState,
    expired_notice: bool,
}

impl SessionData {
    fn empty(state: AuthState) -> Self {
        Self {
            access: None,
            refresh: None,
            profile: None,
            state,
            expired_notice: false,
        }
    }
}

/// Holds the current credentials and user profile.
///
/// Every mutation applies all field changes under one write lock and never
/// awaits, so readers only ever see a consistent session. Persistence is
/// written after the in-memory change; a failed write is returned as
/// [`SessionError::PersistenceUnavailable`] but the mutation stands.
pub struct SessionStore {
    persistence: Arc<dyn Persistence>,
    data: RwLock<SessionData>,
}

impl SessionStore {
    /// Create an empty, anonymous session backed by `persistence`
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            data: RwLock::new(SessionData::empty(AuthState::Anonymous)),
        }
    }

    /// Create a session and restore persisted credentials into it.
    /// A failing backend is logged and leaves the session anonymous.
    pub fn restored(persistence: Arc<dyn Persistence>) -> Self {
        let store = Self::new(persistence);
        if let Err(e) = store.restore() {
            warn!(error = %e, "Failed to restore session");
        }
        store
    }

    /// Load persisted credentials. Expiry is not checked here.
    pub fn restore(&self) -> Result<(), SessionError> {
        let access = self.load(ACCESS_CREDENTIAL_KEY)?;
        let refresh = self.load(REFRESH_CREDENTIAL_KEY)?;

        let mut data = self.write();
        data.state = if access.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Anonymous
        };
        debug!(
            has_access = access.is_some(),
            has_refresh = refresh.is_some(),
            "Session restored"
        );
        data.access = access;
        data.refresh = refresh;
        data.profile = None;
        data.expired_notice = false;
        Ok(())
    }

    /// Replace both credentials, as after login
    pub fn set_credentials(
        &self,
        access: Credential,
        refresh: Credential,
    ) -> Result<(), SessionError> {
        {
            let mut data = self.write();
            data.access = Some(access.clone());
            data.refresh = Some(refresh.clone());
            data.state = AuthState::Authenticated;
            data.expired_notice = false;
        }
        info!("Session credentials set");

        let first = self.persist(ACCESS_CREDENTIAL_KEY, Some(access.as_str()));
        let second = self.persist(REFRESH_CREDENTIAL_KEY, Some(refresh.as_str()));
        first.and(second)
    }

    /// Replace only the access credential; the refresh credential is retained
    pub fn set_access_credential(&self, access: Credential) -> Result<(), SessionError> {
        {
            let mut data = self.write();
            data.access = Some(access.clone());
            data.state = AuthState::Authenticated;
        }
        self.persist(ACCESS_CREDENTIAL_KEY, Some(access.as_str()))
    }

    /// Apply a completed renewal of `exchanged`: new access credential, and
    /// the rotated refresh credential if the server sent one. The profile is
    /// kept.
    ///
    /// Returns `Ok(false)` without touching anything when the session no
    /// longer holds `exchanged` (logged out or replaced meanwhile). An error
    /// means the in-memory change was applied but not persisted.
    pub fn apply_renewal_if(
        &self,
        exchanged: &Credential,
        access: Credential,
        refresh: Option<Credential>,
    ) -> Result<bool, SessionError> {
        {
            let mut data = self.write();
            if data.refresh.as_ref() != Some(exchanged) {
                return Ok(false);
            }
            data.access = Some(access.clone());
            if let Some(ref refresh) = refresh {
                data.refresh = Some(refresh.clone());
            }
            data.state = AuthState::Authenticated;
        }

        let first = self.persist(ACCESS_CREDENTIAL_KEY, Some(access.as_str()));
        let persisted = match refresh {
            Some(refresh) => first.and(self.persist(REFRESH_CREDENTIAL_KEY, Some(refresh.as_str()))),
            None => first,
        };
        persisted.map(|()| true)
    }

    /// Only stored while a session is live; ignored otherwise
    pub fn set_profile(&self, profile: UserProfile) {
        let mut data = self.write();
        if data.access.is_some() {
            data.profile = Some(profile);
        } else {
            debug!("Ignoring profile for unauthenticated session");
        }
    }

    pub fn clear_profile(&self) {
        self.write().profile = None;
    }

    /// Update the points balance on the stored profile, if any
    pub fn update_points(&self, points: i64) {
        if let Some(profile) = self.write().profile.as_mut() {
            profile.points = points;
        }
    }

    /// Wipe everything, memory and persistence. Idempotent.
    pub fn clear(&self) -> Result<(), SessionError> {
        self.wipe(AuthState::Anonymous, false)
    }

    /// Like [`clear`](Self::clear), but leaves the session `Expired` and
    /// raises the one-shot expired notice.
    pub fn expire(&self) -> Result<(), SessionError> {
        self.wipe(AuthState::Expired, true)
    }

    /// Mark a renewal as outstanding (or finished without an outcome)
    pub(crate) fn set_refreshing(&self, refreshing: bool) {
        let mut data = self.write();
        match (refreshing, data.state) {
            (true, AuthState::Authenticated) => data.state = AuthState::Refreshing,
            (false, AuthState::Refreshing) => {
                data.state = if data.access.is_some() {
                    AuthState::Authenticated
                } else {
                    AuthState::Anonymous
                };
            }
            _ => {}
        }
    }

    pub fn access_credential(&self) -> Option<Credential> {
        self.read().access.clone()
    }

    pub fn refresh_credential(&self) -> Option<Credential> {
        self.read().refresh.clone()
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.read().profile.clone()
    }

    pub fn auth_state(&self) -> AuthState {
        self.read().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().access.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let data = self.read();
        SessionSnapshot {
            access: data.access.clone(),
            refresh: data.refresh.clone(),
            profile: data.profile.clone(),
            state: data.state,
        }
    }

    /// Returns true once after the session has expired, for a UI notice
    pub fn take_expired_notice(&self) -> bool {
        std::mem::take(&mut self.write().expired_notice)
    }

    /// [`expire`](Self::expire), but only while the session still holds
    /// `refresh`. Returns `Ok(false)` when it holds another one or none.
    /// An error means the session was expired in memory only.
    pub fn expire_if(&self, refresh: &Credential) -> Result<bool, SessionError> {
        {
            let mut data = self.write();
            if data.refresh.as_ref() != Some(refresh) {
                return Ok(false);
            }
            *data = SessionData::empty(AuthState::Expired);
            data.expired_notice = true;
        }
        self.remove_persisted().map(|()| true)
    }

    fn wipe(&self, state: AuthState, expired_notice: bool) -> Result<(), SessionError> {
        {
            let mut data = self.write();
            *data = SessionData::empty(state);
            data.expired_notice = expired_notice;
        }
        self.remove_persisted()
    }

    fn remove_persisted(&self) -> Result<(), SessionError> {
        let first = self.persist(ACCESS_CREDENTIAL_KEY, None);
        let second = self.persist(REFRESH_CREDENTIAL_KEY, None);
        first.and(second)
    }

    fn load(&self, key: &'static str) -> Result<Option<Credential>, SessionError> {
        self.persistence
            .get(key)
            .map(|value| value.filter(|v| !v.is_empty()).map(Credential::from))
            .map_err(|source| SessionError::PersistenceUnavailable { key, source })
    }

    fn persist(&self, key: &'static str, value: Option<&str>) -> Result<(), SessionError> {
        let result = match value {
            Some(value) => self.persistence.set(key, value),
            None => self.persistence.remove(key),
        };
        result.map_err(|source| {
            warn!(key, error = %source, "Failed to persist session entry");
            SessionError::PersistenceUnavailable { key, source }
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}
