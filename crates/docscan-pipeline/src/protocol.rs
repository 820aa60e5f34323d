//! Request/response messages exchanged with a scan worker.
//!
//! The caller posts a [`ScanRequest`] carrying a correlation id and an
//! RGBA buffer; the worker answers with a [`ScanResponse`] echoing the
//! same id. Field names follow the browser wire format (`doCrop`).
//!
//! Pixel buffers move through [`handle_request`] without being copied:
//! the request buffer becomes the pipeline's source raster and the
//! output raster's storage becomes the response buffer.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::ensure_ready;
use crate::raster::from_parts;
use crate::types::{PipelineError, PipelineResult, ProcessingMode, RgbaImage, ScanOptions};

/// One scan job.
///
/// Every field except `id` is optional on the wire so that malformed
/// requests can still be answered with a failure carrying their id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Caller-chosen correlation id, echoed back unchanged.
    #[serde(default)]
    pub id: String,
    /// Image width in pixels.
    #[serde(default)]
    pub width: Option<u32>,
    /// Image height in pixels.
    #[serde(default)]
    pub height: Option<u32>,
    /// Row-major RGBA bytes, `width * height * 4` long.
    #[serde(default)]
    pub buffer: Option<Vec<u8>>,
    /// Post-filter wire name. Missing means `"original"`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Whether to detect and rectify the page.
    #[serde(default, rename = "doCrop")]
    pub do_crop: bool,
}

impl ScanRequest {
    /// Build a well-formed request from an owned raster.
    #[must_use]
    pub fn new(id: impl Into<String>, image: RgbaImage, mode: ProcessingMode, do_crop: bool) -> Self {
        let (width, height) = image.dimensions();
        Self {
            id: id.into(),
            width: Some(width),
            height: Some(height),
            buffer: Some(image.into_raw()),
            mode: Some(mode.as_str().to_owned()),
            do_crop,
        }
    }

    /// Validate the payload and turn it into pipeline inputs.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidDimensions`] for a missing or zero
    /// width or height, [`PipelineError::EmptyInput`] for a missing or
    /// empty buffer, [`PipelineError::BufferSizeMismatch`] when the
    /// buffer length disagrees with the dimensions, and
    /// [`PipelineError::InvalidMode`] for an unknown mode name.
    pub fn into_parts(self) -> Result<(String, RgbaImage, ScanOptions), PipelineError> {
        let width = self.width.unwrap_or(0);
        let height = self.height.unwrap_or(0);
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidDimensions { width, height });
        }
        let buffer = self.buffer.unwrap_or_default();
        let image = from_parts(width, height, buffer)?;
        let mode = match self.mode.as_deref() {
            None => ProcessingMode::default(),
            Some(name) => name.parse()?,
        };
        Ok((self.id, image, ScanOptions::new(mode, self.do_crop)))
    }
}

/// Worker reply. Serialized untagged: a success carries the image, a
/// failure carries only the id and a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScanResponse {
    /// The scan finished.
    Success {
        /// Correlation id from the request.
        id: String,
        /// Output width in pixels.
        width: u32,
        /// Output height in pixels.
        height: u32,
        /// Output RGBA bytes.
        buffer: Vec<u8>,
        /// `true` when no page was found and the full frame was kept.
        fallback: bool,
    },
    /// The request was malformed or processing failed.
    Failure {
        /// Correlation id from the request.
        id: String,
        /// Human-readable error message.
        error: String,
    },
}

impl ScanResponse {
    /// A failure reply for `id`.
    #[must_use]
    pub fn failure(id: impl Into<String>, error: impl ToString) -> Self {
        Self::Failure {
            id: id.into(),
            error: error.to_string(),
        }
    }

    /// The correlation id this response answers.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Success { id, .. } | Self::Failure { id, .. } => id,
        }
    }

    /// Whether this is a failure reply.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

/// Serve one request: validate, run the pipeline, and build the reply.
///
/// Never fails; every error becomes a [`ScanResponse::Failure`] with the
/// request's id.
#[must_use]
pub fn handle_request(request: ScanRequest) -> ScanResponse {
    ensure_ready();
    let id = request.id.clone();
    let (id, image, options) = match request.into_parts() {
        Ok(parts) => parts,
        Err(err) => {
            warn!(%id, error = %err, "rejected scan request");
            return ScanResponse::failure(id, err);
        }
    };

    respond(id, crate::process(image, &options))
}

/// Fold a pipeline outcome into the reply for `id`.
fn respond(id: String, outcome: Result<PipelineResult, PipelineError>) -> ScanResponse {
    match outcome {
        Ok(result) => {
            debug!(%id, fallback = result.used_fallback, "scan finished");
            let (width, height) = result.image.dimensions();
            ScanResponse::Success {
                id,
                width,
                height,
                buffer: result.image.into_raw(),
                fallback: result.used_fallback,
            }
        }
        Err(err) => {
            debug!(%id, kind = ?err.kind(), "replying with failure");
            ScanResponse::failure(id, err)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_dimensions_fail_with_id() {
        let request = ScanRequest {
            id: "req-1".to_owned(),
            buffer: Some(vec![0; 16]),
            ..ScanRequest::default()
        };
        let response = handle_request(request);
        assert!(response.is_failure());
        assert_eq!(response.id(), "req-1");
    }

    #[test]
    fn zero_width_is_rejected() {
        let request = ScanRequest {
            id: "z".to_owned(),
            width: Some(0),
            height: Some(4),
            buffer: Some(vec![0; 16]),
            ..ScanRequest::default()
        };
        assert!(handle_request(request).is_failure());
    }

    #[test]
    fn empty_buffer_is_rejected() {
        let request = ScanRequest {
            id: "e".to_owned(),
            width: Some(2),
            height: Some(2),
            buffer: Some(Vec::new()),
            ..ScanRequest::default()
        };
        let ScanResponse::Failure { error, .. } = handle_request(request) else {
            unreachable!("empty buffer must fail");
        };
        assert_eq!(error, PipelineError::EmptyInput.to_string());
    }

    #[test]
    fn short_buffer_is_rejected() {
        let request = ScanRequest {
            id: "s".to_owned(),
            width: Some(2),
            height: Some(2),
            buffer: Some(vec![0; 12]),
            ..ScanRequest::default()
        };
        assert!(handle_request(request).is_failure());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut request = ScanRequest::new("m", RgbaImage::new(2, 2), ProcessingMode::Identity, false);
        request.mode = Some("sepia".to_owned());
        let response = handle_request(request);
        let ScanResponse::Failure { error, .. } = response else {
            unreachable!("unknown mode must fail");
        };
        assert!(error.contains("sepia"));
    }

    #[test]
    fn missing_mode_means_original() {
        let img = RgbaImage::from_pixel(3, 3, image::Rgba([10, 20, 30, 40]));
        let mut request = ScanRequest::new("o", img.clone(), ProcessingMode::Grayscale, false);
        request.mode = None;
        let ScanResponse::Success { buffer, fallback, .. } = handle_request(request) else {
            unreachable!("valid request must succeed");
        };
        assert!(!fallback);
        assert_eq!(buffer, img.into_raw());
    }

    #[test]
    fn gray_blank_frame_reports_fallback() {
        let img = RgbaImage::from_pixel(100, 100, image::Rgba([0, 0, 0, 255]));
        let response = handle_request(ScanRequest::new("g", img, ProcessingMode::Grayscale, true));
        let ScanResponse::Success {
            id,
            width,
            height,
            buffer,
            fallback,
        } = response
        else {
            unreachable!("valid request must succeed");
        };
        assert_eq!(id, "g");
        assert_eq!((width, height), (100, 100));
        assert!(fallback);
        assert!(buffer.chunks_exact(4).all(|p| p == [0, 0, 0, 255]));
    }

    #[test]
    fn wire_format_uses_camel_case_crop_flag() {
        let json = r#"{"id":"w","width":1,"height":1,"buffer":[1,2,3,4],"mode":"bw","doCrop":true}"#;
        let request: ScanRequest = serde_json::from_str(json).unwrap();
        assert!(request.do_crop);
        assert_eq!(request.mode.as_deref(), Some("bw"));

        let failure = serde_json::to_value(ScanResponse::failure("w", "boom")).unwrap();
        assert_eq!(failure, serde_json::json!({"id": "w", "error": "boom"}));
    }

    #[test]
    fn processing_failure_echoes_id() {
        use crate::types::{ErrorKind, OrderedQuad, Point};

        let p = Point::new(2.0, 2.0);
        let err = PipelineError::DegenerateTransform(OrderedQuad {
            tl: p,
            tr: Point::new(4.0, 2.0),
            br: Point::new(6.0, 2.0),
            bl: p,
        });
        assert_eq!(err.kind(), ErrorKind::Processing);

        match respond("r-9".to_owned(), Err(err)) {
            ScanResponse::Failure { id, error } => {
                assert_eq!(id, "r-9");
                assert!(error.contains("degenerate"), "{error}");
            }
            ScanResponse::Success { .. } => unreachable!("expected a failure reply"),
        }
    }

    #[test]
    fn collinear_corners_fail_rectification_as_processing_error() {
        use crate::types::{ErrorKind, OrderedQuad, Point};

        let quad = OrderedQuad {
            tl: Point::new(1.0, 1.0),
            tr: Point::new(5.0, 1.0),
            br: Point::new(9.0, 1.0),
            bl: Point::new(1.0, 6.0),
        };
        let outcome = crate::rectify::rectify(RgbaImage::new(12, 12), &quad).map(|image| {
            PipelineResult {
                image,
                used_fallback: false,
                quad: Some(quad),
            }
        });
        let kind = outcome.as_ref().err().map(PipelineError::kind);
        assert_eq!(kind, Some(ErrorKind::Processing));

        let response = respond("scan-7".to_owned(), outcome);
        assert!(response.is_failure());
        assert_eq!(response.id(), "scan-7");
    }
}
