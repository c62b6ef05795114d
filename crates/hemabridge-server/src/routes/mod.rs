//! REST routes.
//!
//! | Method | Path | Caller |
//! |--------|------|--------|
//! | POST | `/register`, `/login` | anyone |
//! | POST | `/analyze`, `/analyze-batch` | any role |
//! | GET | `/reports` | any role (own analyses) |
//! | GET | `/patient/{id}/history`, `/patient/{id}/report` | doctor or the patient |
//! | POST | `/patient/{id}/add-note` | doctor |
//! | GET | `/patients` | doctor |
//! | GET | `/doctors` | any role |
//! | POST | `/chat`, GET `/chat/history` | any role |
//! | POST | `/appointment` | patient |
//! | GET | `/appointments` | any role |
//! | PUT | `/appointment/{id}/status` | assigned doctor |
//! | GET | `/`, `/health` | anyone |

mod accounts;
mod analysis;
mod appointments;
mod chat;
mod patients;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};

use crate::dashboard;
use crate::state::AppState;

/// Builds the application router.
///
/// `upload_limit` caps every request body, multipart uploads included.
pub fn router(state: AppState, upload_limit: usize) -> Router {
    Router::new()
        .route("/", get(dashboard::index))
        .route("/health", get(dashboard::health))
        .route("/register", post(accounts::register))
        .route("/login", post(accounts::login))
        .route("/doctors", get(accounts::doctors))
        .route("/analyze", post(analysis::analyze))
        .route("/analyze-batch", post(analysis::analyze_batch))
        .route("/reports", get(analysis::reports))
        .route("/patients", get(patients::list))
        .route("/patient/{id}/history", get(patients::history))
        .route("/patient/{id}/report", get(patients::report))
        .route("/patient/{id}/add-note", post(patients::add_note))
        .route("/chat", post(chat::chat))
        .route("/chat/history", get(chat::history))
        .route("/appointment", post(appointments::book))
        .route("/appointments", get(appointments::list))
        .route("/appointment/{id}/status", put(appointments::update_status))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}
