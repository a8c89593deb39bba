//! REST API module: token service, middleware guards, route handlers and
//! the server itself.

pub mod auth;
pub mod guards;
pub mod handlers;
pub mod server;
pub mod users;

pub use server::ApiServer;
