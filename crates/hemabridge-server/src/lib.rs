//! HemaBridge HTTP server.
//!
//! Builds the axum [`Router`](axum::Router) over an [`AppState`] of service
//! handles. The binary in `main.rs` wires configuration, logging and the
//! listener; tests drive [`router`] directly.

#![allow(clippy::unused_async)] // axum handlers are async even when they never await

pub mod dashboard;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use extract::CurrentUser;
pub use routes::router;
pub use state::AppState;
