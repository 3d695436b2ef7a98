//! HTTP surface over the lifecycle manager and syncers.
//!
//! Authentication itself happens upstream (gateway/middleware); this layer
//! consumes the forwarded identity headers and enforces scoping.

pub mod identity;
pub mod sessions;
pub mod settings;

use axum::Router;
use axum::routing::get;

use crate::store::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(sessions::router())
        .merge(settings::router())
}
