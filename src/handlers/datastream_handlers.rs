//! HTTP handlers for datastream operations under `/v3/objects/{pid}/datastreams`.
//! Streams single-datastream bodies in and out; batch and bundle payloads are
//! multipart. Storage concerns are delegated to `DatastreamService`.

use super::AppState;
use crate::{
    errors::AppError,
    models::{
        bundle::MultiPartBundle,
        datastream::{DatastreamHistory, DatastreamProfile, DatastreamUpload, ObjectDatastreams},
        digest::ContentDigest,
    },
    services::{
        conditional::{CACHE_CONTROL, Preconditions, Validators},
        datastream_service::ContentRetrieval,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use axum_extra::headers::HeaderMapExt;
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;
use tracing::debug;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Per-part checksum header accepted on batch uploads.
pub const CHECKSUM_HEADER: &str = "x-checksum";

/// RFC 3230 instance digest accepted on single-datastream ingest.
const DIGEST_HEADER: &str = "digest";

/// Query params accepted by single-datastream ingest.
#[derive(Debug, Deserialize)]
pub struct AddDatastreamQuery {
    pub checksum: Option<String>,
}

/// Values of every `name=` pair in a repeated-key query string.
fn query_values(params: &[(String, String)], name: &str) -> Vec<String> {
    params
        .iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
        .collect()
}

/// Text of an optional checksum-bearing header. A value that is present but
/// not visible ASCII is rejected rather than treated as absent.
fn checksum_header<'h>(headers: &'h HeaderMap, name: &str) -> Result<Option<&'h str>, AppError> {
    headers
        .get(name)
        .map(|value| {
            value.to_str().map_err(|_| {
                AppError::bad_request(format!("`{name}` header is not a valid checksum"))
            })
        })
        .transpose()
}

fn request_content_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.into())
}

fn created(location: &str, etag: Option<&ContentDigest>) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::CREATED;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(location) {
        headers.insert(header::LOCATION, value);
    }
    if let Some(digest) = etag {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", digest)) {
            headers.insert(header::ETAG, value);
        }
    }
    response
}

/// `GET /v3/objects/{pid}/datastreams`: list datastreams with mime types.
pub async fn get_datastreams(
    State(state): State<AppState>,
    Path(pid): Path<String>,
) -> Result<Json<ObjectDatastreams>, AppError> {
    Ok(Json(state.service.list_datastreams(&pid).await?))
}

/// `POST /v3/objects/{pid}/datastreams?delete=..`: delete the named
/// datastreams, then add one datastream per multipart part (named by the
/// part's form name), as one unit of work.
pub async fn modify_datastreams(
    State(state): State<AppState>,
    Path(pid): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    uri: Uri,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let deletions = query_values(&params, "delete");

    let mut additions = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        let dsid = field
            .name()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::bad_request("multipart part is missing a name"))?
            .to_string();
        let mime_type = field.content_type().unwrap_or(DEFAULT_MIME_TYPE).to_string();
        let expected_digest = checksum_header(field.headers(), CHECKSUM_HEADER)?
            .map(|v| ContentDigest::from_checksum(v, state.service.default_algorithm))
            .transpose()?;
        let content = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(err.to_string()))?;
        additions.push(DatastreamUpload {
            dsid,
            mime_type,
            content,
            expected_digest,
        });
    }

    let outcome = state
        .service
        .modify_datastreams(&pid, &deletions, additions)
        .await?;
    debug!(
        "batch on {} deleted {:?}, added {:?}",
        outcome.pid, outcome.deleted, outcome.added
    );
    Ok(created(&uri.to_string(), None))
}

/// `DELETE /v3/objects/{pid}/datastreams?dsid=..`: purge a set of datastreams.
pub async fn delete_datastreams(
    State(state): State<AppState>,
    Path(pid): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<StatusCode, AppError> {
    let dsids = query_values(&params, "dsid");
    state.service.delete_datastreams(&pid, &dsids).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v3/objects/{pid}/datastreams/__content__?dsid=..`: bundle the
/// named datastreams (all of them when none are named) as `multipart/mixed`.
pub async fn get_datastreams_contents(
    State(state): State<AppState>,
    Path(pid): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let dsids = query_values(&params, "dsid");
    let bundle = state.service.get_datastreams_contents(&pid, dsids).await?;

    let boundary = uuid::Uuid::new_v4().simple().to_string();
    let mut response = Response::new(Body::from(bundle.encode(&boundary)));
    let content_type = HeaderValue::from_str(&MultiPartBundle::content_type(&boundary))
        .map_err(|err| AppError::internal(err.to_string()))?;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    Ok(response)
}

/// `POST /v3/objects/{pid}/datastreams/{dsid}?checksum=..`: create a
/// datastream, optionally verified against a client checksum.
pub async fn add_datastream(
    State(state): State<AppState>,
    Path((pid, dsid)): Path<(String, String)>,
    Query(query): Query<AddDatastreamQuery>,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let digest_header = checksum_header(&headers, DIGEST_HEADER)?;
    let expected = state
        .service
        .expected_digest(query.checksum.as_deref(), digest_header)?;
    let mime_type = request_content_type(&headers);

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)))
        .boxed();

    let record = state
        .service
        .put_datastream(&pid, &dsid, &mime_type, stream, expected)
        .await?;
    Ok(created(uri.path(), record.content_digest.as_ref()))
}

/// `PUT /v3/objects/{pid}/datastreams/{dsid}`: replace a datastream's content.
pub async fn modify_datastream(
    State(state): State<AppState>,
    Path((pid, dsid)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let mime_type = request_content_type(&headers);
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)))
        .boxed();

    let record = state
        .service
        .put_datastream(&pid, &dsid, &mime_type, stream, None)
        .await?;
    Ok(created(&uri.to_string(), record.content_digest.as_ref()))
}

/// `GET /v3/objects/{pid}/datastreams/{dsid}`: datastream profile.
pub async fn get_datastream(
    State(state): State<AppState>,
    Path((pid, dsid)): Path<(String, String)>,
) -> Result<Json<DatastreamProfile>, AppError> {
    Ok(Json(state.service.get_datastream_profile(&pid, &dsid).await?))
}

/// `GET /v3/objects/{pid}/datastreams/{dsid}/content`: content with
/// ETag/Last-Modified revalidation.
pub async fn get_datastream_content(
    State(state): State<AppState>,
    Path((pid, dsid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let preconditions = Preconditions::from_headers(&headers);
    let retrieval = state
        .service
        .get_datastream_content(&pid, &dsid, &preconditions)
        .await?;

    let mut response = match &retrieval {
        ContentRetrieval::Serve { .. } => Response::new(Body::empty()),
        ContentRetrieval::NotModified(_) => StatusCode::NOT_MODIFIED.into_response(),
        ContentRetrieval::PreconditionFailed(_) => {
            StatusCode::PRECONDITION_FAILED.into_response()
        }
    };

    let validators = match retrieval {
        ContentRetrieval::Serve {
            validators,
            mime_type,
            size,
            content,
        } => {
            *response.body_mut() = Body::from_stream(ReaderStream::new(content));
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_str(&mime_type)
                    .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIME_TYPE)),
            );
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            validators
        }
        ContentRetrieval::NotModified(validators)
        | ContentRetrieval::PreconditionFailed(validators) => validators,
    };
    set_validator_headers(response.headers_mut(), &validators);
    Ok(response)
}

fn set_validator_headers(headers: &mut HeaderMap, validators: &Validators) {
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(CACHE_CONTROL),
    );
    if let Some(etag) = validators.entity_tag() {
        headers.typed_insert(etag);
    }
    headers.typed_insert(validators.last_modified_header());
}

/// `GET /v3/objects/{pid}/datastreams/{dsid}/versions`: version history
/// (current version only).
pub async fn get_datastream_history(
    State(state): State<AppState>,
    Path((pid, dsid)): Path<(String, String)>,
) -> Result<Json<DatastreamHistory>, AppError> {
    Ok(Json(
        state.service.get_datastream_history(&pid, &dsid).await?,
    ))
}

/// `DELETE /v3/objects/{pid}/datastreams/{dsid}`: purge one datastream.
pub async fn delete_datastream(
    State(state): State<AppState>,
    Path((pid, dsid)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state.service.delete_datastream(&pid, &dsid).await?;
    Ok(StatusCode::NO_CONTENT)
}
