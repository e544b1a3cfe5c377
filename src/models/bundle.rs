//! Multi-datastream bundles returned as a single `multipart/mixed` payload.

use bytes::{BufMut, Bytes, BytesMut};

/// Content of one datastream inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePart {
    pub dsid: String,
    pub mime_type: String,
    pub content: Bytes,
}

/// Outcome of fetching a single requested datastream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleEntry {
    Found(BundlePart),
    Skipped(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiPartBundle {
    pub parts: Vec<BundlePart>,
}

impl MultiPartBundle {
    /// Keep found parts in request order, dropping skipped entries.
    pub fn from_entries(entries: impl IntoIterator<Item = BundleEntry>) -> Self {
        let parts = entries
            .into_iter()
            .filter_map(|entry| match entry {
                BundleEntry::Found(part) => Some(part),
                BundleEntry::Skipped(_) => None,
            })
            .collect();
        Self { parts }
    }

    pub fn content_type(boundary: &str) -> String {
        format!("multipart/mixed; boundary={boundary}")
    }

    /// Serialize as a `multipart/mixed` body delimited by `boundary`.
    pub fn encode(&self, boundary: &str) -> Bytes {
        let capacity = self
            .parts
            .iter()
            .map(|p| p.content.len() + p.mime_type.len() + p.dsid.len() + boundary.len() + 64)
            .sum::<usize>()
            + boundary.len()
            + 8;
        let mut buf = BytesMut::with_capacity(capacity);
        for part in &self.parts {
            buf.put_slice(format!("--{boundary}\r\n").as_bytes());
            buf.put_slice(format!("Content-Type: {}\r\n", part.mime_type).as_bytes());
            buf.put_slice(format!("Content-ID: <{}>\r\n\r\n", part.dsid).as_bytes());
            buf.put_slice(&part.content);
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(format!("--{boundary}--\r\n").as_bytes());
        buf.freeze()
    }
}
