//! The repository gateway: the only channel to storage.
//!
//! Every call takes an explicit session. The caller opens it, threads it
//! through each component, and either commits it or drops it; dropping an
//! uncommitted session discards its work.

pub mod sqlite;

use crate::models::{
    datastream::DatastreamRecord,
    digest::{ContentDigest, DigestError},
    search::SearchRow,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::io;
use thiserror::Error;

pub use sqlite::SqliteRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("datastream `{dsid}` not found on object `{pid}`")]
    DatastreamNotFound { pid: String, dsid: String },
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    InvalidChecksum {
        expected: ContentDigest,
        actual: ContentDigest,
    },
    #[error(transparent)]
    Digest(#[from] DigestError),
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ObjectNotFound(_) | Self::DatastreamNotFound { .. }
        )
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Streamed request body handed to the gateway for ingest.
pub type ContentStream = BoxStream<'static, io::Result<Bytes>>;

/// Wrap an in-memory buffer as a single-chunk content stream.
pub fn content_from_bytes(content: Bytes) -> ContentStream {
    stream::once(async move { Ok(content) }).boxed()
}

/// Identity of an object, as far as this service needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHandle {
    pub pid: String,
}

/// Result of a parameterized query: the size of the whole match set and a
/// lazy stream over its rows in the store's natural order.
pub struct QueryMatches<'a> {
    pub total: u64,
    pub rows: BoxStream<'a, RepositoryResult<SearchRow>>,
}

/// Repository-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryStats {
    pub object_count: u64,
    pub content_size: u64,
}

#[async_trait]
pub trait RepositoryGateway: Send + Sync + 'static {
    type Session: Send;

    /// Open a new, unshared session.
    async fn begin(&self) -> RepositoryResult<Self::Session>;

    async fn get_object(
        &self,
        session: &mut Self::Session,
        pid: &str,
    ) -> RepositoryResult<ObjectHandle>;

    async fn get_datastream(
        &self,
        session: &mut Self::Session,
        pid: &str,
        dsid: &str,
    ) -> RepositoryResult<DatastreamRecord>;

    /// Store `content` as the current content of `pid/dsid`, verifying it
    /// against `expected` when given. A mismatch leaves the session
    /// untouched and fails with `InvalidChecksum`.
    async fn create_or_replace_datastream(
        &self,
        session: &mut Self::Session,
        pid: &str,
        dsid: &str,
        mime_type: &str,
        content: ContentStream,
        expected: Option<&ContentDigest>,
    ) -> RepositoryResult<DatastreamRecord>;

    /// Remove `pid/dsid`. Absent datastreams are a no-op.
    async fn delete_datastream(
        &self,
        session: &mut Self::Session,
        pid: &str,
        dsid: &str,
    ) -> RepositoryResult<()>;

    async fn list_datastreams(
        &self,
        session: &mut Self::Session,
        pid: &str,
    ) -> RepositoryResult<Vec<DatastreamRecord>>;

    async fn list_datastream_ids(
        &self,
        session: &mut Self::Session,
        pid: &str,
    ) -> RepositoryResult<Vec<String>> {
        Ok(self
            .list_datastreams(session, pid)
            .await?
            .into_iter()
            .map(|ds| ds.dsid)
            .collect())
    }

    /// Run `template` with `parameter` bound to its single placeholder.
    async fn execute_query<'a>(
        &'a self,
        session: &'a mut Self::Session,
        template: &'a str,
        parameter: &'a str,
    ) -> RepositoryResult<QueryMatches<'a>>;

    async fn stats(&self, session: &mut Self::Session) -> RepositoryResult<RepositoryStats>;

    async fn commit(&self, session: Self::Session) -> RepositoryResult<()>;
}
