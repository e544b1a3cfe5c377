//! src/services/datastream_service.rs
//!
//! DatastreamService: the operations exposed to the HTTP layer. Each call
//! opens its own repository session, runs exactly one component against it,
//! and commits (mutations) or drops (reads) the session before returning.

use super::{
    batch::{BatchError, BatchMutationCoordinator, BatchOutcome},
    bundle::BundleAssembler,
    conditional::{self, Decision, Preconditions, Validators},
    search::{SearchError, SearchExecutor},
};
use crate::{
    models::{
        bundle::MultiPartBundle,
        datastream::{
            DatastreamHistory, DatastreamProfile, DatastreamRecord, DatastreamUpload,
            ObjectDatastreams,
        },
        digest::{ContentDigest, DigestAlgorithm, DigestError},
        search::SearchResult,
    },
    repository::{ContentStream, RepositoryGateway, RepositoryResult, RepositoryStats},
};
use std::sync::Arc;
use tokio::fs::File;
use tracing::{debug, trace};

/// Result of a conditional content fetch.
#[derive(Debug)]
pub enum ContentRetrieval {
    Serve {
        validators: Validators,
        mime_type: String,
        size: u64,
        content: File,
    },
    NotModified(Validators),
    PreconditionFailed(Validators),
}

pub struct DatastreamService<G: RepositoryGateway> {
    pub gateway: Arc<G>,

    /// Algorithm assumed for bare checksum values supplied by clients.
    pub default_algorithm: DigestAlgorithm,
}

impl<G: RepositoryGateway> Clone for DatastreamService<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            default_algorithm: self.default_algorithm,
        }
    }
}

impl<G: RepositoryGateway> DatastreamService<G> {
    pub fn new(gateway: Arc<G>, default_algorithm: DigestAlgorithm) -> Self {
        Self {
            gateway,
            default_algorithm,
        }
    }

    /// Resolve the client's checksum precondition. A `checksum` value wins
    /// over an RFC 3230 `Digest` header.
    pub fn expected_digest(
        &self,
        checksum: Option<&str>,
        digest_header: Option<&str>,
    ) -> Result<Option<ContentDigest>, DigestError> {
        match (checksum.filter(|c| !c.trim().is_empty()), digest_header) {
            (Some(checksum), _) => {
                ContentDigest::from_checksum(checksum, self.default_algorithm).map(Some)
            }
            (None, Some(header)) => ContentDigest::from_digest_header(header).map(Some),
            (None, None) => Ok(None),
        }
    }

    /// `{dsid, mimeType}` of every datastream on `pid`, ordered by dsid.
    pub async fn list_datastreams(&self, pid: &str) -> RepositoryResult<ObjectDatastreams> {
        let mut session = self.gateway.begin().await?;
        let mut datastreams: Vec<_> = self
            .gateway
            .list_datastreams(&mut session, pid)
            .await?
            .iter()
            .map(DatastreamRecord::element)
            .collect();
        datastreams.sort();
        Ok(ObjectDatastreams {
            pid: pid.to_string(),
            datastreams,
        })
    }

    pub async fn modify_datastreams(
        &self,
        pid: &str,
        deletions: &[String],
        additions: Vec<DatastreamUpload>,
    ) -> Result<BatchOutcome, BatchError> {
        let session = self.gateway.begin().await?;
        BatchMutationCoordinator::new(self.gateway.as_ref())
            .apply(session, pid, deletions, additions)
            .await
    }

    pub async fn delete_datastreams(
        &self,
        pid: &str,
        dsids: &[String],
    ) -> Result<BatchOutcome, BatchError> {
        self.modify_datastreams(pid, dsids, Vec::new()).await
    }

    /// Bundle the named datastreams, or every datastream of `pid` when none
    /// are named.
    pub async fn get_datastreams_contents(
        &self,
        pid: &str,
        dsids: Vec<String>,
    ) -> RepositoryResult<MultiPartBundle> {
        let mut session = self.gateway.begin().await?;
        let dsids = if dsids.is_empty() {
            self.gateway.list_datastream_ids(&mut session, pid).await?
        } else {
            dsids
        };
        BundleAssembler::new(self.gateway.as_ref())
            .assemble(&mut session, pid, &dsids)
            .await
    }

    /// Create or replace one datastream, verifying `expected` when given.
    pub async fn put_datastream(
        &self,
        pid: &str,
        dsid: &str,
        mime_type: &str,
        content: ContentStream,
        expected: Option<ContentDigest>,
    ) -> RepositoryResult<DatastreamRecord> {
        debug!("addDatastream {}/{}", pid, dsid);
        let mut session = self.gateway.begin().await?;
        let record = self
            .gateway
            .create_or_replace_datastream(
                &mut session,
                pid,
                dsid,
                mime_type,
                content,
                expected.as_ref(),
            )
            .await?;
        self.gateway.commit(session).await?;
        Ok(record)
    }

    pub async fn get_datastream_profile(
        &self,
        pid: &str,
        dsid: &str,
    ) -> RepositoryResult<DatastreamProfile> {
        trace!("Executing getDatastream() with dsId: {}", dsid);
        let mut session = self.gateway.begin().await?;
        let ds = self.gateway.get_datastream(&mut session, pid, dsid).await?;
        Ok(ds.profile())
    }

    /// Fetch content subject to the client's validators. A missing
    /// datastream fails before any comparison.
    pub async fn get_datastream_content(
        &self,
        pid: &str,
        dsid: &str,
        preconditions: &Preconditions,
    ) -> RepositoryResult<ContentRetrieval> {
        let mut session = self.gateway.begin().await?;
        let ds = self.gateway.get_datastream(&mut session, pid, dsid).await?;
        let validators = Validators {
            etag: ds.content_digest.as_ref().map(ContentDigest::to_string),
            last_modified: ds.last_modified_date,
        };

        Ok(match conditional::evaluate(&validators, preconditions) {
            Decision::NotModified => ContentRetrieval::NotModified(validators),
            Decision::PreconditionFailed => ContentRetrieval::PreconditionFailed(validators),
            Decision::Serve => ContentRetrieval::Serve {
                content: ds.content.open().await?,
                mime_type: ds.mime_type,
                size: ds.size,
                validators,
            },
        })
    }

    pub async fn get_datastream_history(
        &self,
        pid: &str,
        dsid: &str,
    ) -> RepositoryResult<DatastreamHistory> {
        let mut session = self.gateway.begin().await?;
        let ds = self.gateway.get_datastream(&mut session, pid, dsid).await?;
        Ok(DatastreamHistory::current_only(&ds))
    }

    pub async fn delete_datastream(&self, pid: &str, dsid: &str) -> RepositoryResult<()> {
        let mut session = self.gateway.begin().await?;
        self.gateway.delete_datastream(&mut session, pid, dsid).await?;
        self.gateway.commit(session).await
    }

    pub async fn search(
        &self,
        terms: &str,
        offset: usize,
        page_size: usize,
    ) -> Result<SearchResult, SearchError> {
        let mut session = self.gateway.begin().await.map_err(SearchError::Query)?;
        SearchExecutor::new(self.gateway.as_ref())
            .search(&mut session, terms, offset, page_size)
            .await
    }

    pub async fn describe(&self) -> RepositoryResult<RepositoryStats> {
        let mut session = self.gateway.begin().await?;
        self.gateway.stats(&mut session).await
    }
}
