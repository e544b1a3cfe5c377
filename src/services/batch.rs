//! Atomic batch mutation of an object's datastreams.
//!
//! Deletions run first, then additions, each in the order given, all inside
//! one session. The session is committed once after every operation has
//! succeeded; the first failure drops it uncommitted.

use crate::{
    models::{datastream::DatastreamUpload, digest::ContentDigest},
    repository::{RepositoryError, RepositoryGateway, content_from_bytes},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOperation {
    Delete,
    Add,
}

impl std::fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete => f.write_str("delete"),
            Self::Add => f.write_str("add"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("checksum mismatch for datastream `{dsid}`: expected {expected}, computed {actual}")]
    InvalidChecksum {
        dsid: String,
        expected: ContentDigest,
        actual: ContentDigest,
    },
    #[error("{operation} of datastream `{dsid}` failed; batch not committed: {source}")]
    PartialFailure {
        dsid: String,
        operation: BatchOperation,
        #[source]
        source: RepositoryError,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Summary of a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub pid: String,
    pub deleted: Vec<String>,
    pub added: Vec<String>,
}

pub struct BatchMutationCoordinator<'g, G: RepositoryGateway> {
    gateway: &'g G,
}

impl<'g, G: RepositoryGateway> BatchMutationCoordinator<'g, G> {
    pub fn new(gateway: &'g G) -> Self {
        Self { gateway }
    }

    /// Apply `deletions` then `additions` to `pid` and commit `session`.
    ///
    /// A dsid present in both is observably replaced.
    pub async fn apply(
        &self,
        mut session: G::Session,
        pid: &str,
        deletions: &[String],
        additions: Vec<DatastreamUpload>,
    ) -> Result<BatchOutcome, BatchError> {
        for dsid in deletions {
            debug!("Purging datastream: {}/{}", pid, dsid);
            self.gateway
                .delete_datastream(&mut session, pid, dsid)
                .await
                .map_err(|source| BatchError::PartialFailure {
                    dsid: dsid.clone(),
                    operation: BatchOperation::Delete,
                    source,
                })?;
        }

        let mut added = Vec::with_capacity(additions.len());
        for upload in additions {
            debug!("Adding datastream: {}/{}", pid, upload.dsid);
            let result = self
                .gateway
                .create_or_replace_datastream(
                    &mut session,
                    pid,
                    &upload.dsid,
                    &upload.mime_type,
                    content_from_bytes(upload.content),
                    upload.expected_digest.as_ref(),
                )
                .await;
            match result {
                Ok(_) => added.push(upload.dsid),
                Err(RepositoryError::InvalidChecksum { expected, actual }) => {
                    return Err(BatchError::InvalidChecksum {
                        dsid: upload.dsid,
                        expected,
                        actual,
                    });
                }
                Err(source) => {
                    return Err(BatchError::PartialFailure {
                        dsid: upload.dsid,
                        operation: BatchOperation::Add,
                        source,
                    });
                }
            }
        }

        self.gateway.commit(session).await?;
        Ok(BatchOutcome {
            pid: pid.to_string(),
            deleted: deletions.to_vec(),
            added,
        })
    }
}
