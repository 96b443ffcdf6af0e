//! Authentication module for managing client sessions and credentials.
//!
//! This module provides:
//! - `credential`: stateless claim decoding and expiry checks
//! - `SessionStore`: current credentials, profile and auth state, persisted
//! - `RefreshCoordinator`: single-flight exchange of the refresh credential
//! - `SessionTerminator`: wipe-and-redirect when renewal is impossible

pub mod credential;
pub mod refresh;
pub mod session;
pub mod terminate;

pub use credential::{Claims, Credential, CredentialError};
pub use refresh::{RefreshCoordinator, RefreshError, RefreshOptions, DEFAULT_EXCHANGE_PATH};
pub use session::{AuthState, SessionError, SessionSnapshot, SessionStore};
pub use terminate::SessionTerminator;
