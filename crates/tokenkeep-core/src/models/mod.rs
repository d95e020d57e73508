//! Data models for the authentication service.
//!
//! - `User`: identity record returned by login and `/user/profile`
//! - `LoginCredentials`: username/password pair submitted to `/auth/login`
//! - `AuthResponse`, `TokenPair`: token payloads from login and renewal

pub mod user;

pub use user::{AuthResponse, LoginCredentials, TokenPair, User};
