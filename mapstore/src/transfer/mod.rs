//! Remote file transfer abstraction.
//!
//! The storage engine never talks to the network directly. It hands a
//! [`FetchRequest`] to a [`Transfer`] implementation and receives progress
//! over a channel plus a terminal result. The trait is object-safe so tests
//! can substitute an in-memory fake for the HTTP transport.

use std::path::PathBuf;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod http;

pub use http::HttpTransfer;

/// A single file to fetch from the mirror.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Where the payload lands. Partial content may already be present here
    /// when `resume` is set.
    pub dest: PathBuf,
    pub resume: bool,
}

/// Bytes moved so far for one in-flight fetch. `bytes_total` is zero when
/// the server did not report a length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_downloaded: u64,
    pub bytes_total: u64,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("no connection: {0}")]
    NoConnection(String),

    #[error("server returned status {status}")]
    ServerError { status: u16 },

    #[error("remote file not found")]
    FileNotFound,

    #[error("i/o error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transfer cancelled")]
    Cancelled,
}

/// Asynchronous file transport.
pub trait Transfer: Send + Sync {
    /// Fetch `request.url` into `request.dest`, emitting progress as chunks
    /// arrive. Implementations check `cancel` between chunks and resolve to
    /// [`TransferError::Cancelled`] promptly when it fires. Resolves to the
    /// final on-disk size on success.
    fn fetch(
        &self,
        request: FetchRequest,
        progress: mpsc::UnboundedSender<TransferProgress>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<u64, TransferError>>;
}
