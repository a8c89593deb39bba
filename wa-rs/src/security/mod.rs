//! Credential handling: password hashing and user registration/login.

pub mod auth;

pub use auth::Authenticator;
