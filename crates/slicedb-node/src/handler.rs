//! HTTP surface of the node
//!
//! Control endpoints (invitation, spec propose/approve/sync) require a
//! signed envelope; the signature covers the target ID, the request
//! URI, and the body, so a request cannot be replayed against another
//! node or path. Blob and status endpoints are unsigned.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use slicedb_common::{digest, recover_id, Error, Key, Result, MAX_DATA_LEN};
use slicedb_storage::blobio;
use tokio_stream::wrappers::ReceiverStream;
use tracing::error;

use crate::node::Node;
use crate::types::{InviteRequest, InviteResponse, PutBlobResponse};

/// Header carrying the hex-encoded signature envelope
pub const SIGNATURE_HEADER: &str = "x-slicedb-signature";
/// Header naming the node a control request is addressed to
pub const TARGET_ID_HEADER: &str = "x-slicedb-target-id";

/// Error wrapper translating [`Error`] into HTTP responses
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.0.to_string()).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Router exposing the node surface under `/node/`
pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/node/invitation", post(handle_invite))
        .route("/node/specs", post(handle_propose_spec))
        .route("/node/specs/{revision}", post(handle_spec_action))
        .route("/node/status", get(handle_get_status))
        .route("/node/status/sync", get(handle_get_sync_status))
        .route("/node/blobs/{key}", get(handle_get_blob))
        .route(
            "/node/blobs",
            post(handle_put_blob).get(handle_get_blob_slice),
        )
        .with_state(node)
}

/// Verify a signed control request, returning the recovered signer ID.
///
/// `expected_signer` is the recorded cluster ID; when empty (not yet
/// invited) any valid signer is accepted.
fn verify_signed(
    node: &Node,
    headers: &HeaderMap,
    uri: &Uri,
    body: &[u8],
    expected_signer: &str,
) -> Result<String> {
    let target_id = headers
        .get(TARGET_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !target_id.is_empty() && target_id != node.id() {
        return Err(Error::NotTarget);
    }

    let sig_hex = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let sig = hex::decode(sig_hex).map_err(|_| Error::BadSignature)?;

    let request_uri = uri
        .path_and_query()
        .map_or_else(|| uri.path(), |pq| pq.as_str());
    let mut vdata = format!("{target_id}\n{request_uri}\n").into_bytes();
    vdata.extend_from_slice(body);

    let signer = recover_id(&digest(&vdata), &sig)?;
    if !expected_signer.is_empty() && signer != expected_signer {
        return Err(Error::NotMaster);
    }
    Ok(signer)
}

async fn handle_invite(
    State(node): State<Arc<Node>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<InviteResponse>> {
    let signer = verify_signed(&node, &headers, &uri, &body, "")?;
    let request: InviteRequest = serde_json::from_slice(&body)
        .map_err(|err| Error::InvalidRequest(err.to_string()))?;

    node.invite(&signer, request.init_spec.as_ref())?;
    Ok(Json(InviteResponse {
        node_id: node.id().to_string(),
    }))
}

async fn handle_propose_spec(
    State(node): State<Arc<Node>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    verify_signed(&node, &headers, &uri, &body, &node.cluster_id())?;
    let spec = serde_json::from_slice(&body)
        .map_err(|err| Error::InvalidRequest(err.to_string()))?;

    node.propose_spec(&spec)?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct ActionParams {
    action: String,
}

async fn handle_spec_action(
    State(node): State<Arc<Node>>,
    Path(revision): Path<u64>,
    Query(params): Query<ActionParams>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    verify_signed(&node, &headers, &uri, &body, &node.cluster_id())?;

    match params.action.as_str() {
        "approve" => node.approve_spec(revision)?,
        "sync" => node.request_sync(revision)?,
        other => return Err(Error::InvalidRequest(format!("unknown action {other}")).into()),
    }
    Ok(StatusCode::OK)
}

async fn handle_get_status(State(node): State<Arc<Node>>) -> ApiResult<Response> {
    Ok(Json(node.get_status()?).into_response())
}

#[derive(Deserialize)]
struct SyncStatusParams {
    revision: u64,
}

async fn handle_get_sync_status(
    State(node): State<Arc<Node>>,
    Query(params): Query<SyncStatusParams>,
) -> ApiResult<Response> {
    Ok(Json(node.get_sync_status(params.revision)?).into_response())
}

async fn handle_get_blob(
    State(node): State<Arc<Node>>,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    let key = Key::parse_hex(&key)?;
    match blobio::get_blob(node.store().as_ref(), key)? {
        Some(blob) => Ok(octet_stream(blob.data().to_vec())),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn handle_put_blob(
    State(node): State<Arc<Node>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<PutBlobResponse>> {
    check_blob_len(&headers, body.len())?;

    let blob = slicedb_common::Blob::new(body);
    blobio::put_blob(node.store().as_ref(), &blob)?;
    Ok(Json(PutBlobResponse { key: blob.key() }))
}

#[derive(Deserialize)]
struct SlicePrefixParams {
    prefix: String,
}

async fn handle_get_blob_slice(
    State(node): State<Arc<Node>>,
    Query(params): Query<SlicePrefixParams>,
) -> ApiResult<Response> {
    let range = blobio::blob_range(&params.prefix)?;

    let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Bytes>>(16);
    let store = node.store().clone();
    tokio::task::spawn_blocking(move || {
        for item in blobio::BlobIter::new(store.as_ref(), range) {
            match item {
                Ok(blob) => {
                    if tx.blocking_send(Ok(blobio::encode_frame(&blob))).is_err() {
                        return; // receiver gone
                    }
                }
                Err(err) => {
                    // end the stream without the sentinel; the reader
                    // sees a truncated stream and fails the pull
                    error!("iterate blob slice: {err}");
                    return;
                }
            }
        }
        let _ = tx.blocking_send(Ok(blobio::end_frame()));
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    )
        .into_response())
}

/// Enforce the blob size bound; unknown content length is rejected
fn check_blob_len(headers: &HeaderMap, actual: usize) -> Result<()> {
    let declared: usize = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(Error::UnknownLength)?;
    if declared > MAX_DATA_LEN || actual > MAX_DATA_LEN {
        return Err(Error::BlobTooLarge(declared.max(actual)));
    }
    Ok(())
}

fn octet_stream(data: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response()
}
