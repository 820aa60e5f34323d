//! docscan-service: native host for the scan pipeline.
//!
//! - [`ScanWorker`] runs [`docscan_pipeline::handle_request`] on a
//!   dedicated thread and routes each response back to the caller that
//!   submitted the matching correlation id.
//! - [`store`] holds scan records per user, degrading from a primary to
//!   a fallback backend.
//! - [`collaborators`] names the remote persistence and PDF boundaries.

pub mod collaborators;
pub mod error;
pub mod store;
pub mod worker;

pub use collaborators::{
    ObjectKeys, PDF_RENDER_SCALE, PageRasterizer, PersistRequest, RemoteStore, ScanDocument,
    StoredScan, load_pdf_page, object_keys, persist_scan,
};
pub use error::{DispatchError, RasterizeError, StoreError};
pub use store::{MemoryRecordStore, RecordStore, ScanFiles, ScanMeta, ScanRecord, TieredRecordStore};
pub use worker::{PendingScan, ScanWorker, WorkerConfig};
