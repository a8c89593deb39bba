//! wa-rs: multi-tenant gateway for browser-backed WhatsApp automation
//! sessions.
//!
//! Exposes one long-lived automation session per tenant "session" through an
//! HTTP API with per-user authentication, session-ownership isolation and
//! metered usage quotas.
//!
//! # Features
//!
//! - **JWT identity**: stateless bearer-token authentication
//! - **Ownership isolation**: a session record is reachable only by its
//!   owning user; non-owners cannot even learn that it exists
//! - **Quotas**: per-user concurrent session ceiling and a monthly API-call
//!   ceiling with automatic calendar-month rollover
//! - **Audit**: every charged call appends to an append-only usage log
//!
//! The messaging protocol itself, browser lifecycle and pairing flows live
//! behind the [`pool`] boundary and are not implemented here.
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Error taxonomy and HTTP mapping
//! - [`db`]: SQLite store (users, sessions, usage log)
//! - [`security`]: Password hashing, registration and login
//! - [`api`]: Token service, guards, handlers and the HTTP server
//! - [`pool`]: Adapter over the external automation client pool

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod pool;
pub mod security;

// Re-export commonly used types
pub use config::Config;
pub use error::{ApiError, Result};
