//! Best-effort assembly of several datastreams into one bundle.

use crate::{
    models::bundle::{BundleEntry, BundlePart, MultiPartBundle},
    repository::{RepositoryGateway, RepositoryResult},
};
use tracing::debug;

pub struct BundleAssembler<'g, G: RepositoryGateway> {
    gateway: &'g G,
}

impl<'g, G: RepositoryGateway> BundleAssembler<'g, G> {
    pub fn new(gateway: &'g G) -> Self {
        Self { gateway }
    }

    /// Fetch one datastream, mapping "not found" to a skipped entry.
    pub async fn fetch_entry(
        &self,
        session: &mut G::Session,
        pid: &str,
        dsid: &str,
    ) -> RepositoryResult<BundleEntry> {
        match self.gateway.get_datastream(session, pid, dsid).await {
            Ok(ds) => {
                let content = ds.content.read_all().await?;
                Ok(BundleEntry::Found(BundlePart {
                    dsid: ds.dsid,
                    mime_type: ds.mime_type,
                    content,
                }))
            }
            Err(err) if err.is_not_found() => {
                debug!("skipping missing datastream {}/{}", pid, dsid);
                Ok(BundleEntry::Skipped(dsid.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Bundle `dsids` in request order. The caller expands an empty request
    /// to the object's full datastream list beforehand.
    pub async fn assemble(
        &self,
        session: &mut G::Session,
        pid: &str,
        dsids: &[String],
    ) -> RepositoryResult<MultiPartBundle> {
        let mut entries = Vec::with_capacity(dsids.len());
        for dsid in dsids {
            entries.push(self.fetch_entry(session, pid, dsid).await?);
        }
        Ok(MultiPartBundle::from_entries(entries))
    }
}
