//! HTTP routes

pub mod cors;
pub mod health;
pub mod upload;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router
///
/// Upload routes are mounted under the configured base path, or at the root
/// when it is empty.
pub fn create_router(state: AppState) -> Router {
    let base_path = state.config().server.base_path.clone();

    let app = Router::new().merge(health::router());
    let app = if base_path.is_empty() {
        app.merge(upload::router())
    } else {
        app.nest(&base_path, upload::router())
    };

    cors::apply(app.layer(TraceLayer::new_for_http())).with_state(state)
}
