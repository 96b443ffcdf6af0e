//! REST API client module.
//!
//! This module provides the request transport contract, the authenticated
//! wrapper that attaches bearer credentials and renews them on rejection,
//! and the `ApiClient` for the auth and profile endpoints.

pub mod authenticated;
pub mod client;
pub mod error;
pub mod transport;

pub use authenticated::{Attempt, AuthenticatedTransport};
pub use client::ApiClient;
pub use error::ApiError;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport, TransportError};
