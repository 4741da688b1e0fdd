use axum::{routing::get, Router};
use tower_http::catch_panic::CatchPanicLayer;

use crate::api::handlers;
use crate::api::state::AppState;
use crate::store::FunctionStore;

/// Only the liveness probe is an axum route. Every other path is resolved by the engine's
/// own route table, which is data loaded at startup.
pub fn create_router<S: FunctionStore + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/_health", get(handlers::health_check))
        .fallback(handlers::dispatch::<S>)
        // A panicking transform becomes a 500 for that request only
        .layer(CatchPanicLayer::new())
}
