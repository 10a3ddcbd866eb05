pub mod health;

use axum::routing::post;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Submission routes, mounted both at the root and under `/api/v1`.
///
/// ```text
/// POST /reconstruct      submit a reconstruction job
/// ```
pub fn submission_routes() -> Router<AppState> {
    Router::new().route("/reconstruct", post(handlers::reconstruct::submit))
}
