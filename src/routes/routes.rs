//! Defines routes for name generation and bucket operations.
//!
//! ## Structure
//! - **Probes** (mounted at root)
//!   - `GET  /healthz` — liveness
//!   - `GET  /readyz`  — readiness, checks both SQLite pools
//!
//! - **Generator endpoints**
//!   - `POST /api/v1/generate` — one random `adjective-noun` name
//!   - `GET  /api/v1/stats`    — corpus counts for an optional length filter
//!
//! - **Bucket endpoints**
//!   - `POST  /api/v1/buckets`              — create and fill a bucket
//!   - `GET   /api/v1/buckets`              — list active (or `?archived=true`) buckets
//!   - `GET   /api/v1/buckets/{id}`         — bucket details with remaining values
//!   - `PATCH /api/v1/buckets/{id}`         — update the description
//!   - `POST  /api/v1/buckets/{id}/pop`     — emit the next value
//!   - `POST  /api/v1/buckets/{id}/archive` — make the bucket read-only
//!   - `POST  /api/v1/buckets/{id}/recover` — undo an archive

use crate::{
    handlers::{
        bucket_handlers::{
            archive_bucket, create_bucket, get_bucket, list_buckets, pop_bucket, recover_bucket,
            update_bucket,
        },
        generate_handlers::{generate, stats},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for the whole API.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api/v1", api_routes())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generate))
        .route("/stats", get(stats))
        .route("/buckets", get(list_buckets).post(create_bucket))
        .route("/buckets/{id}", get(get_bucket).patch(update_bucket))
        .route("/buckets/{id}/pop", post(pop_bucket))
        .route("/buckets/{id}/archive", post(archive_bucket))
        .route("/buckets/{id}/recover", post(recover_bucket))
}
