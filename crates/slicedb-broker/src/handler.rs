//! HTTP surface of the broker

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use slicedb_common::{Blob, Error, Key, MAX_DATA_LEN};
use slicedb_node::{ApiError, PutBlobResponse};

use crate::broker::Broker;

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Router exposing the client surface at the root prefix
pub fn router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/blobs/{key}", get(handle_get))
        .route("/blobs", post(handle_put))
        .with_state(broker)
}

async fn handle_get(
    State(broker): State<Arc<Broker>>,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    let key = Key::parse_hex(&key)?;
    match broker.get_blob(key).await? {
        Some(blob) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            blob.data().to_vec(),
        )
            .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn handle_put(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<PutBlobResponse>> {
    let declared: usize = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(Error::UnknownLength)?;
    if declared > MAX_DATA_LEN || body.len() > MAX_DATA_LEN {
        return Err(Error::BlobTooLarge(declared.max(body.len())).into());
    }

    let blob = Blob::new(body);
    let key = blob.key();
    broker.put_blob(blob).await?;
    Ok(Json(PutBlobResponse { key }))
}
