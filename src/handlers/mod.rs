//! HTTP handlers and the state they share.

pub mod datastream_handlers;
pub mod health_handlers;
pub mod repository_handlers;
pub mod search_handlers;

use crate::{repository::SqliteRepository, services::datastream_service::DatastreamService};

pub type AppService = DatastreamService<SqliteRepository>;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: AppService,

    /// Page size for searches that do not name one.
    pub default_page_size: usize,
}
