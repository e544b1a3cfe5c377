//! Datastream records and the read-only views derived from them.

use super::digest::ContentDigest;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{io, path::PathBuf};
use tokio::fs::{self, File};

/// Lifecycle state of a datastream. Only active datastreams exist here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatastreamState {
    #[serde(rename = "A")]
    Active,
}

/// Where a datastream's bytes live. Content is read once per fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHandle {
    pub path: PathBuf,
}

impl ContentHandle {
    pub async fn open(&self) -> io::Result<File> {
        File::open(&self.path).await
    }

    pub async fn read_all(&self) -> io::Result<Bytes> {
        fs::read(&self.path).await.map(Bytes::from)
    }
}

/// One datastream's metadata plus a handle to its current content.
#[derive(Debug, Clone)]
pub struct DatastreamRecord {
    pub pid: String,
    pub dsid: String,
    pub mime_type: String,
    pub size: u64,
    pub created_date: DateTime<Utc>,
    pub last_modified_date: DateTime<Utc>,
    pub content_digest: Option<ContentDigest>,
    pub state: DatastreamState,
    pub content: ContentHandle,
}

impl DatastreamRecord {
    pub fn profile(&self) -> DatastreamProfile {
        DatastreamProfile::from(self)
    }

    pub fn element(&self) -> DatastreamElement {
        DatastreamElement {
            dsid: self.dsid.clone(),
            label: self.dsid.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// Entry in an object's datastream listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DatastreamElement {
    pub dsid: String,
    pub label: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectDatastreams {
    pub pid: String,
    pub datastreams: Vec<DatastreamElement>,
}

/// Read-only profile, recomputed from the record on every read.
#[derive(Debug, Clone, Serialize)]
pub struct DatastreamProfile {
    pub pid: String,
    #[serde(rename = "dsID")]
    pub dsid: String,
    #[serde(rename = "dsMIME")]
    pub mime_type: String,
    #[serde(rename = "dsSize")]
    pub size: u64,
    #[serde(rename = "dsCreateDate")]
    pub created_date: DateTime<Utc>,
    #[serde(rename = "dsState")]
    pub state: DatastreamState,
    #[serde(rename = "dsChecksumType", skip_serializing_if = "Option::is_none")]
    pub checksum_type: Option<String>,
    #[serde(rename = "dsChecksum", skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ContentDigest>,
}

impl From<&DatastreamRecord> for DatastreamProfile {
    fn from(ds: &DatastreamRecord) -> Self {
        Self {
            pid: ds.pid.clone(),
            dsid: ds.dsid.clone(),
            mime_type: ds.mime_type.clone(),
            size: ds.size,
            created_date: ds.created_date,
            state: ds.state,
            checksum_type: ds
                .content_digest
                .as_ref()
                .map(|d| d.algorithm().to_string()),
            checksum: ds.content_digest.clone(),
        }
    }
}

/// Version history of a datastream. Holds only the current version until a
/// versioning model exists.
#[derive(Debug, Clone, Serialize)]
pub struct DatastreamHistory {
    pub pid: String,
    #[serde(rename = "dsID")]
    pub dsid: String,
    pub versions: Vec<DatastreamProfile>,
}

impl DatastreamHistory {
    pub fn current_only(record: &DatastreamRecord) -> Self {
        Self {
            pid: record.pid.clone(),
            dsid: record.dsid.clone(),
            versions: vec![record.profile()],
        }
    }
}

/// Content supplied for one datastream of a batch.
#[derive(Debug, Clone)]
pub struct DatastreamUpload {
    pub dsid: String,
    pub mime_type: String,
    pub content: Bytes,
    pub expected_digest: Option<ContentDigest>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::digest::DigestAlgorithm;

    fn record(digest: Option<ContentDigest>) -> DatastreamRecord {
        let now = Utc::now();
        DatastreamRecord {
            pid: "obj1".into(),
            dsid: "DC".into(),
            mime_type: "text/xml".into(),
            size: 5,
            created_date: now,
            last_modified_date: now,
            content_digest: digest,
            state: DatastreamState::Active,
            content: ContentHandle {
                path: PathBuf::from("/nonexistent"),
            },
        }
    }

    #[test]
    fn profile_carries_checksum_fields() {
        let digest = ContentDigest::compute(DigestAlgorithm::Sha1, b"hello");
        let profile = record(Some(digest.clone())).profile();
        assert_eq!(profile.checksum_type.as_deref(), Some("sha1"));
        assert_eq!(profile.checksum, Some(digest));

        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["dsState"], "A");
        assert_eq!(
            json["dsChecksum"],
            "urn:sha1:aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[test]
    fn profile_without_digest_omits_checksum() {
        let json = serde_json::to_value(record(None).profile()).unwrap();
        assert!(json.get("dsChecksum").is_none());
        assert!(json.get("dsChecksumType").is_none());
    }

    #[test]
    fn history_has_single_current_entry() {
        let history = DatastreamHistory::current_only(&record(None));
        assert_eq!(history.versions.len(), 1);
        assert_eq!(history.versions[0].dsid, "DC");
    }
}
