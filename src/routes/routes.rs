//! Defines routes for the legacy datastream API.
//!
//! ## Structure
//! - **Object-level datastream endpoints** (`/v3/objects/{pid}/datastreams`)
//!   - `GET    `: list datastreams
//!   - `POST   ?delete=..`: batch delete-then-add (multipart/form-data)
//!   - `DELETE ?dsid=..`: delete a set of datastreams
//!   - `GET    /__content__?dsid=..`: bundled contents (multipart/mixed)
//!
//! - **Datastream endpoints** (`/v3/objects/{pid}/datastreams/{dsid}`)
//!   - `POST   ?checksum=..`: create with optional checksum
//!   - `PUT    `: replace content
//!   - `GET    `: profile
//!   - `DELETE `: delete
//!   - `GET    /content`: content with conditional-request support
//!   - `GET    /versions`: version history
//!
//! - `GET|POST /v3/search`, `GET /v3/describe`, `GET /healthz`, `GET /readyz`

use crate::handlers::{
    AppState,
    datastream_handlers::{
        add_datastream, delete_datastream, delete_datastreams, get_datastream,
        get_datastream_content, get_datastream_history, get_datastreams,
        get_datastreams_contents, modify_datastream, modify_datastreams,
    },
    health_handlers::{healthz, readyz},
    repository_handlers::describe,
    search_handlers::{search, search_submit},
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Largest multipart batch accepted in one request.
const MAX_BATCH_BYTES: usize = 512 * 1024 * 1024;

/// Build and return the router for every endpoint.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/v3/describe", get(describe))
        .route("/v3/search", get(search).post(search_submit))
        // Object-level datastream routes
        .route(
            "/v3/objects/{pid}/datastreams",
            get(get_datastreams)
                .post(modify_datastreams)
                .delete(delete_datastreams)
                .layer(DefaultBodyLimit::max(MAX_BATCH_BYTES)),
        )
        .route(
            "/v3/objects/{pid}/datastreams/__content__",
            get(get_datastreams_contents),
        )
        // Datastream-level routes
        .route(
            "/v3/objects/{pid}/datastreams/{dsid}",
            get(get_datastream)
                .post(add_datastream)
                .put(modify_datastream)
                .delete(delete_datastream),
        )
        .route(
            "/v3/objects/{pid}/datastreams/{dsid}/content",
            get(get_datastream_content),
        )
        .route(
            "/v3/objects/{pid}/datastreams/{dsid}/versions",
            get(get_datastream_history),
        )
}
