//! Per-user scan records.
//!
//! [`RecordStore`] is the boundary to whatever keeps scans on the device.
//! [`TieredRecordStore`] prefers a primary backend and, after its first
//! failure, serves every later call from a fallback for the rest of its
//! lifetime.
//!
//! All methods are synchronous. In an async context, wrap calls in
//! `tokio::task::spawn_blocking`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use docscan_pipeline::ProcessingMode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;

/// Filename used when neither the caller nor the upload names one.
pub const DEFAULT_FILENAME: &str = "scan";

/// Status recorded when the caller gives none.
pub const DEFAULT_STATUS: &str = "ok";

/// One stored scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    /// Record id, unique per store.
    pub id: String,
    /// Owner of the record.
    pub user_id: String,
    /// Display name of the scan.
    pub filename: String,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "ts")]
    pub timestamp_ms: u64,
    /// Free-form processing status.
    pub status: String,
    /// Post-filter the scan was processed with.
    pub mode: ProcessingMode,
    /// Whether the page was detected and rectified.
    pub auto_crop: bool,
    /// Encoded upload, if kept.
    pub original: Option<Vec<u8>>,
    /// Encoded result, if kept.
    pub processed: Option<Vec<u8>>,
}

/// Caller-supplied metadata for a new record. Missing fields get defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanMeta {
    /// Record id; a uuid v4 when absent.
    pub id: Option<String>,
    /// Display name; falls back to the upload name, then `scan`.
    pub filename: Option<String>,
    /// Creation time; now when absent.
    pub timestamp_ms: Option<u64>,
    /// Status; `ok` when absent.
    pub status: Option<String>,
    /// Post-filter used.
    pub mode: ProcessingMode,
    /// Whether the page was cropped.
    pub auto_crop: bool,
}

/// Payloads stored with a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFiles {
    /// Upload filename, used when the metadata names none.
    pub original_name: Option<String>,
    /// Encoded upload.
    pub original: Option<Vec<u8>>,
    /// Encoded result.
    pub processed: Option<Vec<u8>>,
}

impl ScanRecord {
    /// Build a record, filling in an id, filename, timestamp and status
    /// where `meta` leaves them out.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingUser`] if `user_id` is empty.
    pub fn from_meta(user_id: &str, meta: ScanMeta, files: ScanFiles) -> Result<Self, StoreError> {
        if user_id.is_empty() {
            return Err(StoreError::MissingUser);
        }
        Ok(Self {
            id: meta.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id: user_id.to_owned(),
            filename: meta
                .filename
                .or(files.original_name)
                .unwrap_or_else(|| DEFAULT_FILENAME.to_owned()),
            timestamp_ms: meta.timestamp_ms.unwrap_or_else(now_ms),
            status: meta.status.unwrap_or_else(|| DEFAULT_STATUS.to_owned()),
            mode: meta.mode,
            auto_crop: meta.auto_crop,
            original: files.original,
            processed: files.processed,
        })
    }
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Storage for scan records, partitioned by user.
pub trait RecordStore {
    /// Insert or replace a record and return its id.
    ///
    /// # Errors
    ///
    /// [`StoreError::MissingUser`] for an empty user id, or a backend error.
    fn save(&self, user_id: &str, meta: ScanMeta, files: ScanFiles) -> Result<String, StoreError>;

    /// The user's records, newest first. Empty for an empty user id.
    ///
    /// # Errors
    ///
    /// Backend errors only.
    fn list(&self, user_id: &str) -> Result<Vec<ScanRecord>, StoreError>;

    /// One of the user's records.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no record with `id` belongs to the user.
    fn get(&self, user_id: &str, id: &str) -> Result<ScanRecord, StoreError>;

    /// Delete a record if it belongs to the user. Returns whether the
    /// request was accepted; deleting a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Backend errors only.
    fn remove(&self, user_id: &str, id: &str) -> Result<bool, StoreError>;

    /// Delete all of the user's records.
    ///
    /// # Errors
    ///
    /// Backend errors only.
    fn clear(&self, user_id: &str) -> Result<(), StoreError>;
}

/// Newest first; equal timestamps by id.
fn sort_newest_first(records: &mut [ScanRecord]) {
    records.sort_by(|a, b| {
        b.timestamp_ms
            .cmp(&a.timestamp_ms)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// In-process record store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, ScanRecord>>,
}

impl MemoryRecordStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, ScanRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordStore for MemoryRecordStore {
    fn save(&self, user_id: &str, meta: ScanMeta, files: ScanFiles) -> Result<String, StoreError> {
        let record = ScanRecord::from_meta(user_id, meta, files)?;
        let id = record.id.clone();
        self.records().insert(id.clone(), record);
        Ok(id)
    }

    fn list(&self, user_id: &str) -> Result<Vec<ScanRecord>, StoreError> {
        if user_id.is_empty() {
            return Ok(Vec::new());
        }
        let mut out: Vec<ScanRecord> = self
            .records()
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        sort_newest_first(&mut out);
        Ok(out)
    }

    fn get(&self, user_id: &str, id: &str) -> Result<ScanRecord, StoreError> {
        self.records()
            .get(id)
            .filter(|r| r.user_id == user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))
    }

    fn remove(&self, user_id: &str, id: &str) -> Result<bool, StoreError> {
        if user_id.is_empty() || id.is_empty() {
            return Ok(false);
        }
        let mut records = self.records();
        if records.get(id).is_some_and(|r| r.user_id == user_id) {
            records.remove(id);
        }
        Ok(true)
    }

    fn clear(&self, user_id: &str) -> Result<(), StoreError> {
        if !user_id.is_empty() {
            self.records().retain(|_, r| r.user_id != user_id);
        }
        Ok(())
    }
}

/// A primary store backed by a fallback.
///
/// The first primary failure switches every later call to the fallback;
/// the primary is never retried.
#[derive(Debug)]
pub struct TieredRecordStore<P, F> {
    primary: P,
    fallback: F,
    primary_ok: AtomicBool,
}

impl<P: RecordStore, F: RecordStore> TieredRecordStore<P, F> {
    /// Route to `primary` until it first reports [`StoreError::Unavailable`].
    pub const fn new(primary: P, fallback: F) -> Self {
        Self {
            primary,
            fallback,
            primary_ok: AtomicBool::new(true),
        }
    }

    /// Whether calls are being served by the fallback.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.primary_ok.load(Ordering::Acquire)
    }

    /// Run `op` on the primary while it is healthy, otherwise (or once it
    /// fails) on the fallback.
    fn route<T>(
        &self,
        op: &str,
        call: impl Fn(&dyn RecordStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if !self.is_degraded() {
            match call(&self.primary) {
                Err(StoreError::Unavailable(reason)) => {
                    warn!(op, %reason, "primary record store failed, switching to fallback");
                    self.primary_ok.store(false, Ordering::Release);
                }
                other => return other,
            }
        }
        debug!(op, "using fallback record store");
        call(&self.fallback)
    }
}

impl<P: RecordStore, F: RecordStore> RecordStore for TieredRecordStore<P, F> {
    fn save(&self, user_id: &str, meta: ScanMeta, files: ScanFiles) -> Result<String, StoreError> {
        if user_id.is_empty() {
            return Err(StoreError::MissingUser);
        }
        self.route("save", |store| {
            store.save(user_id, meta.clone(), files.clone())
        })
    }

    fn list(&self, user_id: &str) -> Result<Vec<ScanRecord>, StoreError> {
        if user_id.is_empty() {
            return Ok(Vec::new());
        }
        self.route("list", |store| store.list(user_id))
    }

    fn get(&self, user_id: &str, id: &str) -> Result<ScanRecord, StoreError> {
        self.route("get", |store| store.get(user_id, id))
    }

    fn remove(&self, user_id: &str, id: &str) -> Result<bool, StoreError> {
        if user_id.is_empty() || id.is_empty() {
            return Ok(false);
        }
        self.route("remove", |store| store.remove(user_id, id))
    }

    fn clear(&self, user_id: &str) -> Result<(), StoreError> {
        if user_id.is_empty() {
            return Ok(());
        }
        self.route("clear", |store| store.clear(user_id))
    }
}
