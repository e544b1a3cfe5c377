//! Repository description.

use super::AppState;
use crate::errors::AppError;
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeRepository {
    #[serde(rename = "repositoryBaseURL")]
    pub repository_base_url: String,
    #[serde(rename = "sampleOAIURL")]
    pub sample_oai_url: String,
    pub repository_size: u64,
    pub number_of_objects: u64,
}

/// `GET /v3/describe`: base URL, object count and total content size.
pub async fn describe(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DescribeRepository>, AppError> {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let base = format!("http://{host}/");
    let stats = state.service.describe().await?;

    Ok(Json(DescribeRepository {
        sample_oai_url: format!("{base}v3/objects/123/oai_dc"),
        repository_base_url: base,
        repository_size: stats.content_size,
        number_of_objects: stats.object_count,
    }))
}
