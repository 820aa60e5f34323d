//! Boundaries to the services around the scanner: remote persistence
//! and PDF page rendering. Implementations live with the host.

use docscan_pipeline::raster::scale_to_max;
use docscan_pipeline::{ProcessingMode, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{RasterizeError, StoreError};

/// Scale at which the first page of a PDF is rendered.
pub const PDF_RENDER_SCALE: f32 = 1.5;

/// Extension used for uploads whose name has none.
const FALLBACK_EXTENSION: &str = "bin";

/// Object and metadata storage with download URLs.
pub trait RemoteStore {
    /// Upload `bytes` under `key` and return a download URL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the upload fails.
    fn upload(&self, key: &str, bytes: &[u8]) -> Result<String, StoreError>;

    /// Insert a metadata document and return its id. The store stamps
    /// the creation time itself.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the insert fails.
    fn insert_document(&self, document: &ScanDocument) -> Result<String, StoreError>;
}

/// Metadata document describing an uploaded scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanDocument {
    /// Owner of the scan.
    pub uid: String,
    /// Display name of the scan.
    pub filename: String,
    /// Empty when no original was uploaded.
    pub original_url: String,
    /// Download URL of the processed PNG.
    pub processed_url: String,
    /// Processing status.
    pub status: String,
    /// Post-filter the scan was processed with.
    pub mode: ProcessingMode,
    /// Whether the page was detected and rectified.
    pub auto_crop: bool,
}

/// What to upload for one scan.
#[derive(Debug, Clone, Copy)]
pub struct PersistRequest<'a> {
    /// Owner of the scan; must not be empty.
    pub uid: &'a str,
    /// Name and bytes of the original upload, if it should be kept.
    pub original: Option<(&'a str, &'a [u8])>,
    /// Encoded PNG of the processed scan.
    pub processed: &'a [u8],
    /// Base of the object keys and the document's filename; `scan` when absent.
    pub base_name: Option<&'a str>,
    /// Status written to the document.
    pub status: &'a str,
    /// Post-filter the scan was processed with.
    pub mode: ProcessingMode,
    /// Whether the page was detected and rectified.
    pub auto_crop: bool,
}

impl<'a> PersistRequest<'a> {
    /// A request with status `"done"` and auto-crop on.
    #[must_use]
    pub const fn new(uid: &'a str, processed: &'a [u8]) -> Self {
        Self {
            uid,
            original: None,
            processed,
            base_name: None,
            status: "done",
            mode: ProcessingMode::Identity,
            auto_crop: true,
        }
    }
}

/// Where a persisted scan ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredScan {
    /// Id of the metadata document.
    pub id: String,
    /// Download URL of the original; empty when none was uploaded.
    pub original_url: String,
    /// Download URL of the processed PNG.
    pub processed_url: String,
}

/// Object keys for one scan's original and processed images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKeys {
    /// Key of the original upload.
    pub original: String,
    /// Key of the processed PNG.
    pub processed: String,
}

/// Build the object keys for a scan uploaded at `timestamp_ms`.
///
/// Whitespace runs in the base name become a single `_`. The original
/// keeps its upload's extension, or `bin` if it has none.
#[must_use]
pub fn object_keys(
    uid: &str,
    timestamp_ms: u64,
    base_name: Option<&str>,
    original_name: Option<&str>,
) -> ObjectKeys {
    let safe_base = safe_base_name(base_name.unwrap_or("scan"));
    let ext = original_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .unwrap_or(FALLBACK_EXTENSION);
    let prefix = format!("users/{uid}/scans/{timestamp_ms}_{safe_base}");
    ObjectKeys {
        original: format!("{prefix}.{ext}"),
        processed: format!("{prefix}_processed.png"),
    }
}

fn safe_base_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_space = false;
    for c in name.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Upload a scan's images and record its metadata.
///
/// # Errors
///
/// Returns [`StoreError::MissingUser`] for an empty uid, or the first
/// error from `remote`.
#[instrument(skip(remote, request), fields(uid = request.uid))]
pub fn persist_scan(
    remote: &impl RemoteStore,
    request: &PersistRequest<'_>,
    timestamp_ms: u64,
) -> Result<StoredScan, StoreError> {
    if request.uid.is_empty() {
        return Err(StoreError::MissingUser);
    }
    let keys = object_keys(
        request.uid,
        timestamp_ms,
        request.base_name,
        request.original.map(|(name, _)| name),
    );

    let original_url = match request.original {
        Some((_, bytes)) => remote.upload(&keys.original, bytes)?,
        None => String::new(),
    };
    let processed_url = remote.upload(&keys.processed, request.processed)?;

    let id = remote.insert_document(&ScanDocument {
        uid: request.uid.to_owned(),
        filename: request.base_name.unwrap_or("scan").to_owned(),
        original_url: original_url.clone(),
        processed_url: processed_url.clone(),
        status: request.status.to_owned(),
        mode: request.mode,
        auto_crop: request.auto_crop,
    })?;
    debug!(%id, "scan persisted");
    Ok(StoredScan {
        id,
        original_url,
        processed_url,
    })
}

/// Renders PDF pages to rasters.
pub trait PageRasterizer {
    /// Render the first page of `pdf` at `scale`.
    ///
    /// # Errors
    ///
    /// Returns [`RasterizeError::Render`] if the document cannot be read.
    fn first_page(&self, pdf: &[u8], scale: f32) -> Result<RgbaImage, RasterizeError>;
}

/// Render the first page at [`PDF_RENDER_SCALE`] and bound its longest
/// side by `max_dim`, ready for the scan pipeline.
///
/// # Errors
///
/// Returns the rasterizer's error, or [`RasterizeError::EmptyPage`] if
/// the page has no pixels.
pub fn load_pdf_page(
    rasterizer: &impl PageRasterizer,
    pdf: &[u8],
    max_dim: u32,
) -> Result<RgbaImage, RasterizeError> {
    let page = rasterizer.first_page(pdf, PDF_RENDER_SCALE)?;
    if page.width() == 0 || page.height() == 0 {
        return Err(RasterizeError::EmptyPage);
    }
    Ok(scale_to_max(page, max_dim))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        uploads: RefCell<Vec<(String, usize)>>,
        documents: RefCell<Vec<ScanDocument>>,
        fail_uploads: bool,
    }

    impl RemoteStore for Recorder {
        fn upload(&self, key: &str, bytes: &[u8]) -> Result<String, StoreError> {
            if self.fail_uploads {
                return Err(StoreError::Unavailable("network".to_owned()));
            }
            self.uploads.borrow_mut().push((key.to_owned(), bytes.len()));
            Ok(format!("https://files.example/{key}"))
        }

        fn insert_document(&self, document: &ScanDocument) -> Result<String, StoreError> {
            self.documents.borrow_mut().push(document.clone());
            Ok(format!("doc-{}", self.documents.borrow().len()))
        }
    }

    struct Pages {
        width: u32,
        height: u32,
        scale: RefCell<Option<f32>>,
    }

    impl PageRasterizer for Pages {
        fn first_page(&self, _pdf: &[u8], scale: f32) -> Result<RgbaImage, RasterizeError> {
            *self.scale.borrow_mut() = Some(scale);
            Ok(RgbaImage::new(self.width, self.height))
        }
    }

    #[test]
    fn keys_follow_user_prefix_and_sanitize_spaces() {
        let keys = object_keys("u1", 1700, Some("my  tax\treturn"), Some("photo.final.JPG"));
        assert_eq!(keys.original, "users/u1/scans/1700_my_tax_return.JPG");
        assert_eq!(keys.processed, "users/u1/scans/1700_my_tax_return_processed.png");
    }

    #[test]
    fn keys_default_base_and_extension() {
        let keys = object_keys("u1", 5, None, Some("noext"));
        assert_eq!(keys.original, "users/u1/scans/5_scan.bin");
        assert_eq!(keys.processed, "users/u1/scans/5_scan_processed.png");
        assert_eq!(object_keys("u1", 5, None, None).original, "users/u1/scans/5_scan.bin");
    }

    #[test]
    fn persist_uploads_both_images_then_metadata() {
        let remote = Recorder::default();
        let request = PersistRequest {
            original: Some(("page one.png", &[1_u8, 2, 3][..])),
            base_name: Some("page one"),
            mode: ProcessingMode::AdaptiveBinary,
            ..PersistRequest::new("u7", &[9; 10])
        };
        let stored = persist_scan(&remote, &request, 42).unwrap();

        assert_eq!(stored.id, "doc-1");
        assert_eq!(
            stored.processed_url,
            "https://files.example/users/u7/scans/42_page_one_processed.png"
        );
        let uploads = remote.uploads.borrow();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0], ("users/u7/scans/42_page_one.png".to_owned(), 3));

        let doc = &remote.documents.borrow()[0];
        assert_eq!(doc.filename, "page one");
        assert_eq!(doc.status, "done");
        assert!(doc.auto_crop);
        assert_eq!(doc.mode, ProcessingMode::AdaptiveBinary);
    }

    #[test]
    fn persist_without_original_leaves_url_empty() {
        let remote = Recorder::default();
        let stored = persist_scan(&remote, &PersistRequest::new("u7", &[0; 4]), 1).unwrap();
        assert!(stored.original_url.is_empty());
        assert_eq!(remote.uploads.borrow().len(), 1);
    }

    #[test]
    fn persist_requires_uid_and_propagates_failures() {
        let remote = Recorder::default();
        let err = persist_scan(&remote, &PersistRequest::new("", &[0]), 1).unwrap_err();
        assert_eq!(err, StoreError::MissingUser);

        let broken = Recorder {
            fail_uploads: true,
            ..Recorder::default()
        };
        let err = persist_scan(&broken, &PersistRequest::new("u1", &[0]), 1).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(broken.documents.borrow().is_empty());
    }

    #[test]
    fn pdf_pages_render_at_fixed_scale_and_are_bounded() {
        let pages = Pages {
            width: 1275,
            height: 3300,
            scale: RefCell::new(None),
        };
        let image = load_pdf_page(&pages, b"%PDF", 1600).unwrap();
        let scale = pages.scale.borrow().unwrap();
        assert!((scale - PDF_RENDER_SCALE).abs() < f32::EPSILON);
        assert_eq!(image.height(), 1600);
        assert!(image.width() < 1600);
    }

    #[test]
    fn empty_pdf_page_is_an_error() {
        let pages = Pages {
            width: 0,
            height: 0,
            scale: RefCell::new(None),
        };
        assert!(matches!(
            load_pdf_page(&pages, b"%PDF", 1600),
            Err(RasterizeError::EmptyPage)
        ));
    }
}
