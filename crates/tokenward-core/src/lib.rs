//! Client-side session management for token-based authentication.
//!
//! Holds short-lived access credentials and longer-lived refresh
//! credentials, attaches them to outbound requests, and renews the session
//! transparently when the server rejects a credential. Concurrent rejections
//! share a single renewal call.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod navigation;
pub mod storage;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, AuthenticatedTransport, Transport};
pub use auth::{AuthState, Credential, RefreshCoordinator, RefreshError, SessionStore};
pub use config::Config;
pub use navigation::Navigator;
pub use storage::Persistence;
