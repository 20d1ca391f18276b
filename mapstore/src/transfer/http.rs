//! HTTP transport with Range-request resume.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{FetchRequest, Transfer, TransferError, TransferProgress};

/// Default timeout for establishing a connection.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// HTTP file transport. Resumes partial downloads with a `Range` header when
/// the request asks for it and the destination already holds bytes.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl Default for HttpTransfer {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransfer {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    async fn run(
        client: Client,
        request: FetchRequest,
        progress: mpsc::UnboundedSender<TransferProgress>,
        cancel: CancellationToken,
    ) -> Result<u64, TransferError> {
        let start_byte = if request.resume {
            match tokio::fs::metadata(&request.dest).await {
                Ok(meta) => meta.len(),
                Err(_) => 0,
            }
        } else {
            0
        };

        let mut builder = client.get(&request.url);
        if start_byte > 0 {
            builder = builder.header("Range", format!("bytes={}-", start_byte));
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_connect() || err.is_timeout() {
                TransferError::NoConnection(err.to_string())
            } else {
                TransferError::ServerError {
                    status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                }
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TransferError::FileNotFound);
        }
        if !status.is_success() {
            return Err(TransferError::ServerError {
                status: status.as_u16(),
            });
        }

        // A 200 means the server ignored the Range header; start over.
        let (resumed, start_byte) = if start_byte > 0 && status == StatusCode::PARTIAL_CONTENT {
            (true, start_byte)
        } else {
            (false, 0)
        };
        let total = start_byte + response.content_length().unwrap_or(0);

        if let Some(parent) = request.dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| TransferError::Io {
                    path: parent.to_path_buf(),
                    source: err,
                })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(resumed)
            .truncate(!resumed)
            .write(true)
            .open(&request.dest)
            .await
            .map_err(|err| TransferError::Io {
                path: request.dest.clone(),
                source: err,
            })?;
        let mut writer = BufWriter::new(file);

        debug!(
            url = %request.url,
            start_byte,
            total,
            "Streaming download"
        );

        let mut downloaded = start_byte;
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|err| TransferError::NoConnection(err.to_string()))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|err| TransferError::Io {
                    path: request.dest.clone(),
                    source: err,
                })?;
            downloaded += chunk.len() as u64;
            let _ = progress.send(TransferProgress {
                bytes_downloaded: downloaded,
                bytes_total: total,
            });
        }

        writer.flush().await.map_err(|err| TransferError::Io {
            path: request.dest.clone(),
            source: err,
        })?;

        Ok(downloaded)
    }
}

impl Transfer for HttpTransfer {
    fn fetch(
        &self,
        request: FetchRequest,
        progress: mpsc::UnboundedSender<TransferProgress>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<u64, TransferError>> {
        let client = self.client.clone();
        Box::pin(Self::run(client, request, progress, cancel))
    }
}
