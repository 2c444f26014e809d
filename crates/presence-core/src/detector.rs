//! RetinaFace face detector via ONNX Runtime.
//!
//! Implements prior-box decoding for the RetinaFace detector: two square
//! anchors per cell over strides {8, 16, 32}, variance-scaled offsets,
//! five-point landmark regression, and NMS post-processing.

use crate::frame::RgbFrame;
use crate::types::FaceBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const RETINAFACE_INPUT_SIZE: usize = 640;
/// Training-set channel means, BGR order. Subtracted without scaling.
const RETINAFACE_MEAN_BGR: [f32; 3] = [104.0, 117.0, 123.0];
const RETINAFACE_CONFIDENCE_THRESHOLD: f32 = 0.5;
const RETINAFACE_NMS_THRESHOLD: f32 = 0.4;
const RETINAFACE_STRIDES: [usize; 3] = [8, 16, 32];
/// Square anchor sizes per stride, in input pixels.
const RETINAFACE_MIN_SIZES: [[usize; 2]; 3] = [[16, 32], [64, 128], [256, 512]];
/// Variances applied to center offsets and log-size offsets.
const VARIANCE_CENTER: f32 = 0.1;
const VARIANCE_SIZE: f32 = 0.2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — install with presence-models")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// A prior (anchor) box in normalized [0, 1] coordinates.
#[derive(Clone, Copy)]
struct Prior {
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
}

/// Output tensor indices: (loc, conf, landms).
type OutputIndices = (usize, usize, usize);

/// RetinaFace-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
    priors: Vec<Prior>,
    confidence_threshold: f32,
    /// Output indices (loc, conf, landms), discovered by name at load time
    /// with a positional fallback.
    output_indices: OutputIndices,
}

impl FaceDetector {
    /// Load the RetinaFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded RetinaFace model"
        );

        if output_names.len() < 3 {
            return Err(DetectorError::InferenceFailed(format!(
                "RetinaFace model requires 3 outputs (loc/conf/landms), got {}",
                output_names.len()
            )));
        }

        let output_indices = discover_output_indices(&output_names);
        tracing::debug!(?output_indices, "RetinaFace output tensor mapping");

        Ok(Self {
            session,
            input_size: RETINAFACE_INPUT_SIZE,
            priors: generate_priors(RETINAFACE_INPUT_SIZE),
            confidence_threshold: RETINAFACE_CONFIDENCE_THRESHOLD,
            output_indices,
        })
    }

    /// Override the detection confidence threshold.
    pub fn set_confidence_threshold(&mut self, threshold: f32) {
        self.confidence_threshold = threshold;
    }

    /// Detect faces in an RGB frame, returning boxes sorted by confidence.
    pub fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<FaceBox>, DetectorError> {
        let (input, letterbox) = self.preprocess(frame);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (loc_idx, conf_idx, landms_idx) = self.output_indices;

        let (_, loc) = outputs[loc_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("loc: {e}")))?;
        let (_, conf) = outputs[conf_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("conf: {e}")))?;
        let (_, landms) = outputs[landms_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("landms: {e}")))?;

        let detections = decode_detections(
            loc,
            conf,
            landms,
            &self.priors,
            self.input_size,
            &letterbox,
            self.confidence_threshold,
        );

        let mut result = nms(detections, RETINAFACE_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }

    /// Preprocess an RGB frame into a mean-subtracted BGR NCHW tensor with
    /// letterbox padding.
    ///
    /// Resizes with bilinear interpolation; padding uses the channel means
    /// so padded area contributes zeros after subtraction.
    fn preprocess(&self, frame: &RgbFrame) -> (Array4<f32>, LetterboxInfo) {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let size = self.input_size;

        let scale_w = size as f32 / width as f32;
        let scale_h = size as f32 / height as f32;
        let scale = scale_w.min(scale_h);

        let new_w = (width as f32 * scale).round() as usize;
        let new_h = (height as f32 * scale).round() as usize;
        let pad_x = (size - new_w) as f32 / 2.0;
        let pad_y = (size - new_h) as f32 / 2.0;

        let letterbox = LetterboxInfo { scale, pad_x, pad_y };

        // Bilinear resize, interleaved RGB.
        let inv_scale = 1.0 / scale;
        let mut resized = vec![0u8; new_w * new_h * 3];
        for y in 0..new_h {
            let src_y = (y as f32 + 0.5) * inv_scale - 0.5;
            let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
            let y1 = (y0 + 1).min(height - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

            for x in 0..new_w {
                let src_x = (x as f32 + 0.5) * inv_scale - 0.5;
                let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
                let x1 = (x0 + 1).min(width - 1);
                let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

                for c in 0..3 {
                    let tl = frame.data[(y0 * width + x0) * 3 + c] as f32;
                    let tr = frame.data[(y0 * width + x1) * 3 + c] as f32;
                    let bl = frame.data[(y1 * width + x0) * 3 + c] as f32;
                    let br = frame.data[(y1 * width + x1) * 3 + c] as f32;

                    let val = tl * (1.0 - fx) * (1.0 - fy)
                        + tr * fx * (1.0 - fy)
                        + bl * (1.0 - fx) * fy
                        + br * fx * fy;

                    resized[(y * new_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        let pad_x_start = pad_x.floor() as usize;
        let pad_y_start = pad_y.floor() as usize;

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                let inside = y >= pad_y_start
                    && y < pad_y_start + new_h
                    && x >= pad_x_start
                    && x < pad_x_start + new_w;

                // Tensor channel order is BGR; frame data is RGB.
                for (bgr_c, rgb_c) in [(0usize, 2usize), (1, 1), (2, 0)] {
                    let pixel = if inside {
                        resized[((y - pad_y_start) * new_w + (x - pad_x_start)) * 3 + rgb_c] as f32
                    } else {
                        RETINAFACE_MEAN_BGR[bgr_c] // pad value subtracts to 0.0
                    };
                    tensor[[0, bgr_c, y, x]] = pixel - RETINAFACE_MEAN_BGR[bgr_c];
                }
            }
        }

        (tensor, letterbox)
    }
}

/// Discover the (loc, conf, landms) output ordering by name.
///
/// Exports name these tensors "loc"/"conf"/"landms" or use generic numeric
/// names; falls back to the standard positional order [loc, conf, landms].
fn discover_output_indices(names: &[String]) -> OutputIndices {
    let find = |needle: &str| {
        names
            .iter()
            .position(|n| n.to_ascii_lowercase().contains(needle))
    };

    match (find("loc"), find("conf"), find("landm")) {
        (Some(l), Some(c), Some(k)) => {
            tracing::info!("RetinaFace: using name-based output tensor mapping");
            (l, c, k)
        }
        _ => {
            tracing::info!(
                ?names,
                "RetinaFace: output names not recognized, using positional mapping [loc, conf, landms]"
            );
            (0, 1, 2)
        }
    }
}

/// Generate the prior boxes for a square input, in normalized coordinates.
///
/// Layout matches the model's flattened output: per stride, row-major over
/// cells, then the two anchor sizes per cell.
fn generate_priors(input_size: usize) -> Vec<Prior> {
    let mut priors = Vec::new();

    for (stride_pos, &stride) in RETINAFACE_STRIDES.iter().enumerate() {
        let grid = input_size.div_ceil(stride);
        for cy in 0..grid {
            for cx in 0..grid {
                for &min_size in &RETINAFACE_MIN_SIZES[stride_pos] {
                    priors.push(Prior {
                        cx: (cx as f32 + 0.5) * stride as f32 / input_size as f32,
                        cy: (cy as f32 + 0.5) * stride as f32 / input_size as f32,
                        w: min_size as f32 / input_size as f32,
                        h: min_size as f32 / input_size as f32,
                    });
                }
            }
        }
    }

    priors
}

/// Decode raw model outputs into face boxes in original-frame coordinates.
fn decode_detections(
    loc: &[f32],
    conf: &[f32],
    landms: &[f32],
    priors: &[Prior],
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<FaceBox> {
    let mut detections = Vec::new();
    let size = input_size as f32;

    for (idx, prior) in priors.iter().enumerate() {
        // conf holds [background, face] pairs, already softmaxed.
        let score = conf.get(idx * 2 + 1).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let loc_off = idx * 4;
        if loc_off + 3 >= loc.len() {
            continue;
        }

        // Variance-scaled center/size decoding.
        let cx = prior.cx + loc[loc_off] * VARIANCE_CENTER * prior.w;
        let cy = prior.cy + loc[loc_off + 1] * VARIANCE_CENTER * prior.h;
        let w = prior.w * (loc[loc_off + 2] * VARIANCE_SIZE).exp();
        let h = prior.h * (loc[loc_off + 3] * VARIANCE_SIZE).exp();

        // Normalized → letterboxed pixels → original frame pixels.
        let to_frame = |nx: f32, ny: f32| -> (f32, f32) {
            (
                (nx * size - letterbox.pad_x) / letterbox.scale,
                (ny * size - letterbox.pad_y) / letterbox.scale,
            )
        };

        let (x1, y1) = to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = to_frame(cx + w / 2.0, cy + h / 2.0);

        let landms_off = idx * 10;
        let landmarks = if landms_off + 9 < landms.len() {
            let mut lms = [(0.0f32, 0.0f32); 5];
            for (i, lm) in lms.iter_mut().enumerate() {
                let nx = prior.cx + landms[landms_off + i * 2] * VARIANCE_CENTER * prior.w;
                let ny = prior.cy + landms[landms_off + i * 2 + 1] * VARIANCE_CENTER * prior.h;
                *lm = to_frame(nx, ny);
            }
            Some(lms)
        } else {
            None
        };

        detections.push(FaceBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection-over-Union between two face boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = a.width * a.height;
    let area_b = b.width * b.height;
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    fn identity_letterbox() -> LetterboxInfo {
        LetterboxInfo {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        }
    }

    #[test]
    fn test_prior_count() {
        // 640/8=80, 640/16=40, 640/32=20 cells per side, 2 anchors each.
        let priors = generate_priors(640);
        assert_eq!(priors.len(), (80 * 80 + 40 * 40 + 20 * 20) * 2);
    }

    #[test]
    fn test_first_prior_position() {
        let priors = generate_priors(640);
        // First cell of stride 8, smallest anchor.
        let p = priors[0];
        assert!((p.cx - 0.5 * 8.0 / 640.0).abs() < 1e-6);
        assert!((p.cy - 0.5 * 8.0 / 640.0).abs() < 1e-6);
        assert!((p.w - 16.0 / 640.0).abs() < 1e-6);
        // Second anchor of the same cell.
        assert!((priors[1].w - 32.0 / 640.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_zero_offsets_returns_prior() {
        // With zero loc offsets the decoded box is exactly the prior.
        let priors = vec![Prior {
            cx: 0.5,
            cy: 0.5,
            w: 0.1,
            h: 0.1,
        }];
        let loc = vec![0.0; 4];
        let conf = vec![0.1, 0.9];
        let landms = vec![0.0; 10];

        let dets = decode_detections(
            &loc,
            &conf,
            &landms,
            &priors,
            640,
            &identity_letterbox(),
            0.5,
        );
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - (0.5 - 0.05) * 640.0).abs() < 1e-3);
        assert!((d.width - 0.1 * 640.0).abs() < 1e-3);
        // All five decoded landmarks collapse onto the prior center.
        let lms = d.landmarks.unwrap();
        for (lx, ly) in lms {
            assert!((lx - 320.0).abs() < 1e-3);
            assert!((ly - 320.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_decode_size_variance() {
        // A log-size offset of 1.0 scales the prior by exp(0.2).
        let priors = vec![Prior {
            cx: 0.5,
            cy: 0.5,
            w: 0.1,
            h: 0.1,
        }];
        let loc = vec![0.0, 0.0, 1.0, 1.0];
        let conf = vec![0.0, 1.0];
        let landms = vec![0.0; 10];

        let dets = decode_detections(
            &loc,
            &conf,
            &landms,
            &priors,
            640,
            &identity_letterbox(),
            0.5,
        );
        let expected_w = 0.1 * (VARIANCE_SIZE).exp() * 640.0;
        assert!((dets[0].width - expected_w).abs() < 1e-2);
    }

    #[test]
    fn test_decode_below_threshold_skipped() {
        let priors = vec![Prior {
            cx: 0.5,
            cy: 0.5,
            w: 0.1,
            h: 0.1,
        }];
        let loc = vec![0.0; 4];
        let conf = vec![0.7, 0.3];
        let landms = vec![0.0; 10];

        let dets = decode_detections(
            &loc,
            &conf,
            &landms,
            &priors,
            640,
            &identity_letterbox(),
            0.5,
        );
        assert!(dets.is_empty());
    }

    #[test]
    fn test_iou_identical() {
        let a = make_box(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_box(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_box(0.0, 0.0, 100.0, 100.0, 0.9),
            make_box(5.0, 5.0, 100.0, 100.0, 0.8),
            make_box(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let width = 320.0f32;
        let height = 240.0f32;
        let scale = (640.0 / width).min(640.0 / height);
        let new_w = (width * scale).round();
        let new_h = (height * scale).round();
        let letterbox = LetterboxInfo {
            scale,
            pad_x: (640.0 - new_w) / 2.0,
            pad_y: (640.0 - new_h) / 2.0,
        };

        let orig_x = 100.0f32;
        let orig_y = 50.0f32;
        let boxed_x = orig_x * scale + letterbox.pad_x;
        let boxed_y = orig_y * scale + letterbox.pad_y;

        let recovered_x = (boxed_x - letterbox.pad_x) / letterbox.scale;
        let recovered_y = (boxed_y - letterbox.pad_y) / letterbox.scale;

        assert!((recovered_x - orig_x).abs() < 0.1);
        assert!((recovered_y - orig_y).abs() < 0.1);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = ["landms", "conf", "loc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(discover_output_indices(&names), (2, 1, 0));
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = ["586", "585", "584"].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_output_indices(&names), (0, 1, 2));
    }
}
