//! Data models for the token-auth REST API.
//!
//! Wire types use `serde` derives; field names follow the server's JSON.

pub mod user;

pub use user::{
    LoginRequest, LoginResponse, ProfileUpdate, RefreshRequest, RefreshResponse,
    RegisterRequest, RegisterResponse, TokenPair, UserProfile, UserRole,
};
