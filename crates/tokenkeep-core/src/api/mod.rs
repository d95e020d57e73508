//! HTTP layer for the authenticated API.
//!
//! `ApiClient` is the request pipeline every application call goes through:
//! it attaches the bearer token and replays once after a renewal. `AuthApi`
//! talks to the `/auth/*` endpoints directly.

pub mod auth;
pub mod client;
pub mod error;

pub use auth::AuthApi;
pub use client::{ApiClient, ApiRequest};
pub use error::{ApiError, Result};
