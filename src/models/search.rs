//! Search result pages.

use serde::Serialize;

/// One matching object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct SearchRow {
    pub pid: String,
    pub path: String,
}

/// A window over the full match set, plus the size of that set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub terms: String,
    pub offset: usize,
    pub page_size: usize,
    pub total_matches: u64,
    pub rows: Vec<SearchRow>,
}
