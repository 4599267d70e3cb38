//! HTTP client for the node surface
//!
//! Used by the broker for data-plane fan-out, by peers for slice
//! pulls, and by the master for signed control requests. One pooled
//! reqwest client is shared per process.

use std::sync::Arc;

use futures::TryStreamExt;
use slicedb_common::{digest, Blob, Error, Identity, Key, Result};
use slicedb_spec::Spec;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::handler::{SIGNATURE_HEADER, TARGET_ID_HEADER};
use crate::types::{
    InviteRequest, InviteResponse, PutBlobResponse, StatusResponse, SyncStatusResponse,
};

/// Client for the `/node/` HTTP surface
#[derive(Clone, Default)]
pub struct NodeRpc {
    client: reqwest::Client,
    identity: Option<Arc<Identity>>,
    target_id: String,
}

impl NodeRpc {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign subsequent requests as `identity`, addressed to `target_id`
    #[must_use]
    pub fn with_identity(mut self, identity: Arc<Identity>, target_id: impl Into<String>) -> Self {
        self.identity = Some(identity);
        self.target_id = target_id.into();
        self
    }

    fn url(addr: &str, uri: &str) -> String {
        format!("http://{addr}{uri}")
    }

    /// Build a request, signing `target-id \n uri \n body` when an
    /// identity is attached
    fn request(
        &self,
        method: reqwest::Method,
        addr: &str,
        uri: &str,
        body: Vec<u8>,
    ) -> Result<reqwest::RequestBuilder> {
        let mut req = self.client.request(method, Self::url(addr, uri));
        if let Some(identity) = &self.identity {
            let mut vdata = format!("{}\n{uri}\n", self.target_id).into_bytes();
            vdata.extend_from_slice(&body);
            let sig = identity.sign(&digest(&vdata))?;
            req = req
                .header(SIGNATURE_HEADER, hex::encode(sig))
                .header(TARGET_ID_HEADER, &self.target_id);
        }
        Ok(req.body(body))
    }

    async fn expect_success(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(Error::Rpc(format!("{status}: {text}")))
    }

    /// Invite the node at `addr` into the signer's cluster
    pub async fn invite(&self, addr: &str, init_spec: Option<&Spec>) -> Result<String> {
        let body = serde_json::to_vec(&InviteRequest {
            init_spec: init_spec.cloned(),
        })?;
        let resp = self
            .request(reqwest::Method::POST, addr, "/node/invitation", body)?
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|err| Error::Rpc(err.to_string()))?;
        let resp = Self::expect_success(resp).await?;
        let body: InviteResponse = resp.json().await.map_err(|err| Error::Rpc(err.to_string()))?;
        Ok(body.node_id)
    }

    /// Query node status
    pub async fn get_status(&self, addr: &str) -> Result<StatusResponse> {
        let resp = self
            .request(reqwest::Method::GET, addr, "/node/status", Vec::new())?
            .send()
            .await
            .map_err(|err| Error::Rpc(err.to_string()))?;
        let resp = Self::expect_success(resp).await?;
        resp.json().await.map_err(|err| Error::Rpc(err.to_string()))
    }

    /// Query slice sync progress against `revision`
    pub async fn get_sync_status(&self, addr: &str, revision: u64) -> Result<SyncStatusResponse> {
        let uri = format!("/node/status/sync?revision={revision}");
        let resp = self
            .request(reqwest::Method::GET, addr, &uri, Vec::new())?
            .send()
            .await
            .map_err(|err| Error::Rpc(err.to_string()))?;
        let resp = Self::expect_success(resp).await?;
        resp.json().await.map_err(|err| Error::Rpc(err.to_string()))
    }

    /// Fetch one blob; `None` when the node does not have it
    pub async fn get_blob(&self, addr: &str, key: Key) -> Result<Option<Blob>> {
        let uri = format!("/node/blobs/{}", key.to_hex());
        let resp = self
            .request(reqwest::Method::GET, addr, &uri, Vec::new())?
            .send()
            .await
            .map_err(|err| Error::Rpc(err.to_string()))?;
        let resp = Self::expect_success(resp).await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let data = resp.bytes().await.map_err(|err| Error::Rpc(err.to_string()))?;
        let blob = Blob::new(data);
        if blob.key() != key {
            return Err(Error::KeyMismatch);
        }
        Ok(Some(blob))
    }

    /// Store one blob on the node
    pub async fn put_blob(&self, addr: &str, blob: &Blob) -> Result<()> {
        let resp = self
            .request(
                reqwest::Method::POST,
                addr,
                "/node/blobs",
                blob.data().to_vec(),
            )?
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .send()
            .await
            .map_err(|err| Error::Rpc(err.to_string()))?;
        let resp = Self::expect_success(resp).await?;
        let body: PutBlobResponse = resp.json().await.map_err(|err| Error::Rpc(err.to_string()))?;
        if body.key != blob.key() {
            return Err(Error::KeyMismatch);
        }
        Ok(())
    }

    /// Open a framed blob stream for a slice prefix
    pub async fn get_blob_slice(
        &self,
        addr: &str,
        prefix: &str,
    ) -> Result<impl AsyncRead + Unpin> {
        let uri = format!("/node/blobs?prefix={prefix}");
        let resp = self
            .request(reqwest::Method::GET, addr, &uri, Vec::new())?
            .send()
            .await
            .map_err(|err| Error::Rpc(err.to_string()))?;
        let resp = Self::expect_success(resp).await?;
        let stream = resp.bytes_stream().map_err(std::io::Error::other);
        Ok(StreamReader::new(Box::pin(stream)))
    }

    /// Push a spec to the node
    pub async fn propose_spec(&self, addr: &str, spec: &Spec) -> Result<()> {
        let body = serde_json::to_vec(spec)?;
        let resp = self
            .request(reqwest::Method::POST, addr, "/node/specs", body)?
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|err| Error::Rpc(err.to_string()))?;
        Self::expect_success(resp).await.map(|_| ())
    }

    async fn perform_spec_action(&self, addr: &str, revision: u64, action: &str) -> Result<()> {
        let uri = format!("/node/specs/{revision}?action={action}");
        let resp = self
            .request(reqwest::Method::POST, addr, &uri, Vec::new())?
            .send()
            .await
            .map_err(|err| Error::Rpc(err.to_string()))?;
        Self::expect_success(resp).await.map(|_| ())
    }

    /// Approve a synced revision on the node
    pub async fn approve_spec(&self, addr: &str, revision: u64) -> Result<()> {
        self.perform_spec_action(addr, revision, "approve").await
    }

    /// Trigger a background sync towards `revision` on the node
    pub async fn sync_to_spec(&self, addr: &str, revision: u64) -> Result<()> {
        self.perform_spec_action(addr, revision, "sync").await
    }
}
