//! V2 Protocol Engine (spec.md §4.7): the local half of the registry,
//! serving the Docker/OCI Registry HTTP API V2 surface directly out of
//! the Content Store.

pub mod handlers;
pub mod manifest;
pub mod path;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use crate::AppState;

/// All `/v2` routes funnel through a single wildcard handler: the path
/// parser in [`path`], not axum's router, owns the N-segment repository
/// name grammar.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v2/", get(handlers::dispatch))
        .route(
            "/v2/{*rest}",
            get(handlers::dispatch)
                .head(handlers::dispatch)
                .put(handlers::dispatch)
                .post(handlers::dispatch)
                .patch(handlers::dispatch)
                .delete(handlers::dispatch),
        )
}
