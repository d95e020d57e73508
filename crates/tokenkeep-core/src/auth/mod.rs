//! Session management: credentials, single-flight renewal, login/logout.
//!
//! This module provides:
//! - `CredentialStore`: in-memory access token plus a durable refresh token
//! - `RefreshCoordinator`: at most one renewal in flight, shared by all callers
//! - `SessionController`: login, logout and startup session restoration
//! - `SessionEvents`: lifecycle notifications, including forced termination

pub mod coordinator;
pub mod credentials;
pub mod events;
pub mod session;
pub mod storage;

pub use coordinator::{RefreshCoordinator, TokenRenewer};
pub use credentials::CredentialStore;
pub use events::{SessionEvent, SessionEvents};
pub use session::{Session, SessionController, SessionControllerBuilder};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, RefreshStorage, REFRESH_TOKEN_KEY};
