//! Conditional-request evaluation for datastream content.
//!
//! Validators are the content digest (as a strong entity tag) and the
//! last-modified timestamp truncated to whole seconds, since HTTP dates carry
//! no sub-second precision. Header parsing and tag comparison come from the
//! typed `headers` crate; this module only fixes the order of evaluation.

use axum::http::HeaderMap;
use axum_extra::headers::{
    ETag, HeaderMapExt, IfMatch, IfModifiedSince, IfNoneMatch, IfUnmodifiedSince, LastModified,
};
use chrono::{DateTime, SubsecRound, Utc};
use std::time::SystemTime;

/// Cache directive sent with every content response: clients may keep the
/// entity but must revalidate before reuse.
pub const CACHE_CONTROL: &str = "max-age=0, must-revalidate";

/// Current validators of a stored datastream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validators {
    /// Entity tag value (the digest identifier), unquoted.
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl Validators {
    /// The digest as a strong entity tag, if it forms a valid one.
    pub fn entity_tag(&self) -> Option<ETag> {
        self.etag
            .as_ref()
            .and_then(|tag| format!("\"{tag}\"").parse().ok())
    }

    /// Last-modified as compared against client dates.
    pub fn last_modified_time(&self) -> SystemTime {
        SystemTime::from(self.last_modified.trunc_subsecs(0))
    }

    pub fn last_modified_header(&self) -> LastModified {
        LastModified::from(self.last_modified_time())
    }
}

/// Client-supplied validators.
#[derive(Debug, Clone, Default)]
pub struct Preconditions {
    pub if_match: Option<IfMatch>,
    pub if_unmodified_since: Option<IfUnmodifiedSince>,
    pub if_none_match: Option<IfNoneMatch>,
    pub if_modified_since: Option<IfModifiedSince>,
}

impl Preconditions {
    /// Collect conditional headers. Unparseable values are ignored, as
    /// HTTP requires.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            if_match: headers.typed_get(),
            if_unmodified_since: headers.typed_get(),
            if_none_match: headers.typed_get(),
            if_modified_since: headers.typed_get(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.if_match.is_none()
            && self.if_unmodified_since.is_none()
            && self.if_none_match.is_none()
            && self.if_modified_since.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Serve,
    NotModified,
    PreconditionFailed,
}

/// Decide whether to send the entity, answer "not modified", or reject a
/// failed precondition. Deterministic for fixed inputs.
pub fn evaluate(current: &Validators, request: &Preconditions) -> Decision {
    if request.is_empty() {
        return Decision::Serve;
    }

    let etag = current.entity_tag();
    let last_modified = current.last_modified_time();

    if let Some(condition) = &request.if_match {
        if !etag
            .as_ref()
            .is_some_and(|tag| condition.precondition_passes(tag))
        {
            return Decision::PreconditionFailed;
        }
    } else if let Some(since) = &request.if_unmodified_since {
        if !since.precondition_passes(last_modified) {
            return Decision::PreconditionFailed;
        }
    }

    if let Some(condition) = &request.if_none_match {
        return match &etag {
            Some(tag) if !condition.precondition_passes(tag) => Decision::NotModified,
            _ => Decision::Serve,
        };
    }

    match &request.if_modified_since {
        Some(since) if !since.is_modified(last_modified) => Decision::NotModified,
        _ => Decision::Serve,
    }
}
