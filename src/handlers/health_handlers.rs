//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata database and the
//!   content store

use super::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::SqlitePool;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn passed() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// `GET /healthz`
///
/// Liveness probe. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// HTTP 200 when the database answers `SELECT 1` and a probe file can be
/// written, read back and removed under the content root; 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let repository = &state.service.gateway;

    let mut checks = BTreeMap::new();
    checks.insert("sqlite", check_database(&repository.db).await);
    checks.insert("content_store", check_content_store(&repository.base_path).await);

    let ready = checks.values().all(|c| c.ok);
    let (status, label) = if ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    };
    (
        status,
        Json(ReadyResponse {
            status: label,
            checks,
        }),
    )
}

async fn check_database(db: &SqlitePool) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db).await {
        Ok(1) => CheckStatus::passed(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    }
}

async fn check_content_store(root: &Path) -> CheckStatus {
    let probe = root.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&probe, b"readyz").await {
        return CheckStatus::failed(format!("could not write probe file: {}", e));
    }
    let status = match fs::read(&probe).await {
        Ok(bytes) if bytes == b"readyz" => CheckStatus::passed(),
        Ok(_) => CheckStatus::failed("probe file content mismatch"),
        Err(e) => CheckStatus::failed(format!("could not read probe file: {}", e)),
    };
    if let Err(e) = fs::remove_file(&probe).await {
        tracing::warn!("could not remove probe file {}: {}", probe.display(), e);
    }
    status
}
