//! Field search over object metadata.
//!
//! - GET  /v3/search?terms=..&offset=..&maxResults=..
//! - POST /v3/search  (urlencoded form with the same fields)

use super::AppState;
use crate::{errors::AppError, models::search::SearchResult};
use axum::{
    Form, Json,
    extract::{Query, State},
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub terms: Option<String>,
    #[serde(alias = "offSet")]
    pub offset: Option<usize>,
    #[serde(rename = "maxResults")]
    pub max_results: Option<usize>,
}

async fn run_search(state: &AppState, params: SearchParams) -> Result<Json<SearchResult>, AppError> {
    let terms = params.terms.unwrap_or_default();
    let offset = params.offset.unwrap_or(0);
    let page_size = params.max_results.unwrap_or(state.default_page_size);
    Ok(Json(state.service.search(&terms, offset, page_size).await?))
}

/// `GET /v3/search`
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResult>, AppError> {
    run_search(&state, params).await
}

/// `POST /v3/search`
pub async fn search_submit(
    State(state): State<AppState>,
    Form(params): Form<SearchParams>,
) -> Result<Json<SearchResult>, AppError> {
    run_search(&state, params).await
}
