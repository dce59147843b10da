//! Resumable chunked-transfer protocol client.
//!
//! Three phases against the remote transfer endpoint, mirroring multipart
//! object-store semantics: initiate (allocate a transfer handle), upload
//! chunk (bytes + MD5 checksum + index), complete (assemble the final
//! object). The endpoint itself is a trait so the scheduler can be driven
//! against a fake in tests; the production implementation speaks HTTP via
//! reqwest.

use crate::errors::TransferError;
use crate::models::job::SyncJob;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, multipart};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

const INITIATE_TIMEOUT: Duration = Duration::from_secs(30);
const CHUNK_TIMEOUT: Duration = Duration::from_secs(120);
const COMPLETE_TIMEOUT: Duration = Duration::from_secs(60);

/// The remote transfer endpoint consumed by the engine.
///
/// Implementations must reject a checksum mismatch with an error
/// distinguishable from a network failure.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync + 'static {
    /// Allocate a transfer handle for a new upload.
    async fn initiate(
        &self,
        slide_id: &str,
        file_size: i64,
        chunk_count: u32,
        metadata: &HashMap<String, String>,
    ) -> Result<String, TransferError>;

    /// Upload one chunk, tagged with its index and MD5 hex digest.
    async fn upload_chunk(
        &self,
        transfer_id: &str,
        index: u32,
        chunk: Bytes,
        checksum: &str,
    ) -> Result<(), TransferError>;

    /// Assemble the final object from its uploaded chunks.
    async fn complete(&self, transfer_id: &str, slide_id: &str) -> Result<(), TransferError>;
}

#[async_trait]
impl<T: RemoteEndpoint> RemoteEndpoint for std::sync::Arc<T> {
    async fn initiate(
        &self,
        slide_id: &str,
        file_size: i64,
        chunk_count: u32,
        metadata: &HashMap<String, String>,
    ) -> Result<String, TransferError> {
        (**self)
            .initiate(slide_id, file_size, chunk_count, metadata)
            .await
    }

    async fn upload_chunk(
        &self,
        transfer_id: &str,
        index: u32,
        chunk: Bytes,
        checksum: &str,
    ) -> Result<(), TransferError> {
        (**self)
            .upload_chunk(transfer_id, index, chunk, checksum)
            .await
    }

    async fn complete(&self, transfer_id: &str, slide_id: &str) -> Result<(), TransferError> {
        (**self).complete(transfer_id, slide_id).await
    }
}

/// HTTP implementation of the remote transfer endpoint.
pub struct HttpRemoteEndpoint {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct InitiateResponse {
    upload_id: String,
}

impl HttpRemoteEndpoint {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map a non-success HTTP response onto the fault taxonomy. 5xx, 408 and 429
/// are server hiccups (network-class, transient); other 4xx are rejections
/// of the request itself, except a checksum-mismatch body on a chunk upload.
async fn classify_response(
    resp: reqwest::Response,
    chunk_index: Option<u32>,
) -> Result<reqwest::Response, TransferError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        return Err(TransferError::Network(format!("{}: {}", status, body)));
    }

    if let Some(index) = chunk_index {
        let lowered = body.to_ascii_lowercase();
        if lowered.contains("checksum") || lowered.contains("hash mismatch") {
            return Err(TransferError::ChecksumRejected { index });
        }
    }

    Err(TransferError::Rejected(format!("{}: {}", status, body)))
}

#[async_trait]
impl RemoteEndpoint for HttpRemoteEndpoint {
    async fn initiate(
        &self,
        slide_id: &str,
        file_size: i64,
        chunk_count: u32,
        metadata: &HashMap<String, String>,
    ) -> Result<String, TransferError> {
        let resp = self
            .client
            .post(self.url("/sync/initiate"))
            .timeout(INITIATE_TIMEOUT)
            .json(&json!({
                "slide_id": slide_id,
                "file_size": file_size,
                "chunks_total": chunk_count,
                "metadata": metadata,
            }))
            .send()
            .await
            .map_err(|err| TransferError::Network(err.to_string()))?;

        let resp = classify_response(resp, None).await?;
        let body: InitiateResponse = resp
            .json()
            .await
            .map_err(|err| TransferError::Rejected(format!("invalid initiate response: {}", err)))?;

        Ok(body.upload_id)
    }

    async fn upload_chunk(
        &self,
        transfer_id: &str,
        index: u32,
        chunk: Bytes,
        checksum: &str,
    ) -> Result<(), TransferError> {
        let form = multipart::Form::new()
            .text("upload_id", transfer_id.to_string())
            .text("chunk_index", index.to_string())
            .text("chunk_hash", checksum.to_string())
            .part("chunk", multipart::Part::bytes(chunk.to_vec()).file_name("chunk"));

        let resp = self
            .client
            .post(self.url("/sync/upload-chunk"))
            .timeout(CHUNK_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(|err| TransferError::Network(err.to_string()))?;

        classify_response(resp, Some(index)).await?;
        Ok(())
    }

    async fn complete(&self, transfer_id: &str, slide_id: &str) -> Result<(), TransferError> {
        let resp = self
            .client
            .post(self.url("/sync/complete"))
            .timeout(COMPLETE_TIMEOUT)
            .json(&json!({
                "upload_id": transfer_id,
                "slide_id": slide_id,
            }))
            .send()
            .await
            .map_err(|err| TransferError::Network(err.to_string()))?;

        classify_response(resp, None).await?;
        Ok(())
    }
}

/// Drives the three-phase protocol for one job: reads chunks from the
/// source file, computes checksums, and talks to the remote endpoint.
pub struct TransferClient<R> {
    remote: R,
}

impl<R: RemoteEndpoint> TransferClient<R> {
    pub fn new(remote: R) -> Self {
        Self { remote }
    }

    /// Run initiate unless the job already carries a transfer handle.
    /// Returns the newly allocated handle, or `None` when initiate was
    /// skipped — calling this twice never yields two live handles.
    pub async fn ensure_initiated(&self, job: &SyncJob) -> Result<Option<String>, TransferError> {
        if job.remote_transfer_id.is_some() {
            return Ok(None);
        }

        let transfer_id = self
            .remote
            .initiate(&job.slide_id, job.file_size, job.chunk_count, &job.metadata)
            .await?;
        debug!(job_id = %job.job_id, %transfer_id, "transfer initiated");
        Ok(Some(transfer_id))
    }

    /// Read, checksum and upload one chunk. A checksum rejection gets one
    /// immediate local retry (fresh read) before the fault is escalated.
    pub async fn send_chunk(&self, job: &SyncJob, index: u32) -> Result<(), TransferError> {
        let transfer_id = job
            .remote_transfer_id
            .as_deref()
            .ok_or_else(|| TransferError::Rejected("job has no transfer handle".into()))?;

        match self.upload_once(job, transfer_id, index).await {
            Err(TransferError::ChecksumRejected { .. }) => {
                warn!(job_id = %job.job_id, index, "chunk checksum rejected, retrying once");
                self.upload_once(job, transfer_id, index).await
            }
            other => other,
        }
    }

    async fn upload_once(
        &self,
        job: &SyncJob,
        transfer_id: &str,
        index: u32,
    ) -> Result<(), TransferError> {
        let chunk = self.read_chunk(job, index).await?;
        let checksum = format!("{:x}", md5::compute(&chunk));
        self.remote
            .upload_chunk(transfer_id, index, chunk, &checksum)
            .await
    }

    /// Finalize the remote object. Called only once every chunk has been
    /// persisted as done; chunks are never re-sent for a failed complete.
    pub async fn finalize(&self, job: &SyncJob) -> Result<(), TransferError> {
        let transfer_id = job
            .remote_transfer_id
            .as_deref()
            .ok_or_else(|| TransferError::Rejected("job has no transfer handle".into()))?;

        self.remote.complete(transfer_id, &job.slide_id).await
    }

    /// Read exactly `chunk_size` bytes (or the shorter final tail) at
    /// `index * chunk_size` from the source file.
    async fn read_chunk(&self, job: &SyncJob, index: u32) -> Result<Bytes, TransferError> {
        let offset = job.chunk_offset(index);
        let len = job.chunk_len(index);

        let mut file = File::open(&job.source_path).await?;
        file.seek(SeekFrom::Start(offset as u64)).await?;

        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}
