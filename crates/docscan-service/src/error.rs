//! Error types for the service crate.

use thiserror::Error;

/// Failure to hand a request to the worker or to get its answer back.
///
/// Processing failures are not reported here: they arrive as
/// [`ScanResponse::Failure`](docscan_pipeline::ScanResponse::Failure).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The worker thread could not be started.
    #[error("failed to start scan worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker has shut down and accepts no more requests.
    #[error("scan worker has shut down")]
    WorkerGone,

    /// Another request with the same correlation id is still in flight.
    #[error("a scan with id {0:?} is already in flight")]
    DuplicateId(String),

    /// The worker dropped the request without answering.
    #[error("scan {0:?} ended without a response")]
    ResponseDropped(String),
}

/// Record or remote store failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A user id is required for this operation.
    #[error("user id required")]
    MissingUser,

    /// The backend cannot serve requests.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// No record with this id belongs to the user.
    #[error("record {0:?} not found")]
    NotFound(String),
}

/// PDF page rasterization failure.
#[derive(Debug, Error)]
pub enum RasterizeError {
    /// The rasterizer could not render the page.
    #[error("failed to render PDF page: {0}")]
    Render(String),

    /// The rendered page has no pixels.
    #[error("rendered PDF page is empty")]
    EmptyPage,
}
