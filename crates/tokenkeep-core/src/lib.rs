//! Client-side session management for a token-authenticated HTTP API.
//!
//! A short-lived access token is kept in memory and a longer-lived refresh
//! token in durable storage. Requests go through [`ApiClient`], which renews
//! the access token on a 401 and replays the request once. Renewals are
//! single-flight: however many requests discover the expiry at the same time,
//! one `/auth/refresh` call is made and its outcome is shared by all of them.
//!
//! ```no_run
//! use tokenkeep_core::{LoginCredentials, MemoryStorage, SessionController};
//! use std::sync::Arc;
//!
//! # async fn run() -> tokenkeep_core::Result<()> {
//! let session = SessionController::builder("http://localhost:5000/api")
//!     .storage(Arc::new(MemoryStorage::new()))
//!     .build()?;
//!
//! if session.restore_session().await.is_none() {
//!     session.login(&LoginCredentials::new("alice", "secret")).await?;
//! }
//! let notes: serde_json::Value = session.client().get_json("/notes").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, ApiRequest, AuthApi, Result};
pub use auth::{
    CredentialStore, FileStorage, KeyringStorage, MemoryStorage, RefreshCoordinator,
    RefreshStorage, Session, SessionController, SessionEvent, SessionEvents, TokenRenewer,
};
pub use config::{Config, StorageBackend};
pub use models::{AuthResponse, LoginCredentials, TokenPair, User};
