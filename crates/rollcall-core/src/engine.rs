//! ONNX-backed face engine: SCRFD detection and ArcFace descriptors.
//!
//! The models are consumed as opaque capabilities; this module only does
//! tensor plumbing. Descriptor extraction works from the detected box crop
//! resized to the ArcFace input size, without landmark alignment.

use crate::types::{crop_region, Descriptor, FaceRegion};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DET_INPUT_SIZE: usize = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DET_NMS_THRESHOLD: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;

const DESC_INPUT_SIZE: usize = 112;
const DESC_MEAN: f32 = 127.5;
const DESC_STD: f32 = 127.5; // ArcFace normalization is symmetric, unlike SCRFD
const DESC_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// The external face capability, as the flows consume it.
///
/// `detect` returns zero or more face regions for a grayscale frame;
/// `describe` returns one descriptor per region, order-aligned with the
/// regions passed in. Tests substitute a fake implementation.
pub trait FaceEngine {
    fn detect(&mut self, frame: &[u8], width: u32, height: u32) -> Result<Vec<FaceRegion>, EngineError>;

    fn describe(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        regions: &[FaceRegion],
    ) -> Result<Vec<Descriptor>, EngineError>;
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD + ArcFace engine running on ONNX Runtime.
pub struct OnnxEngine {
    detector: Session,
    recognizer: Session,
    /// Per-stride (score, bbox) output indices for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl OnnxEngine {
    /// Load both ONNX models. Fails fast if either file is missing or the
    /// detector does not expose the expected output tensors.
    pub fn load(detector_path: &str, recognizer_path: &str) -> Result<Self, EngineError> {
        let detector = load_session(detector_path)?;
        let recognizer = load_session(recognizer_path)?;

        let output_names: Vec<String> = detector
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if output_names.len() < 6 {
            return Err(EngineError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        tracing::info!(
            detector = detector_path,
            recognizer = recognizer_path,
            "face engine loaded"
        );

        Ok(Self { detector, recognizer, stride_indices })
    }
}

/// Discover detector output ordering by name.
///
/// SCRFD exports may name tensors "score_8"/"bbox_16"/... or use generic
/// numeric names, and named exports are not guaranteed to keep the standard
/// order. When every stride has named score and bbox tensors, map them by
/// name; otherwise fall back to the standard positional ordering:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = DET_STRIDES
        .iter()
        .all(|&stride| find("score", stride).is_some() && find("bbox", stride).is_some());

    if named {
        tracing::info!("SCRFD: using name-based output tensor mapping");
        std::array::from_fn(|i| {
            let stride = DET_STRIDES[i];
            (find("score", stride).unwrap(), find("bbox", stride).unwrap())
        })
    } else {
        tracing::info!(
            ?names,
            "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
        );
        [(0, 3), (1, 4), (2, 5)]
    }
}

fn load_session(model_path: &str) -> Result<Session, EngineError> {
    if !Path::new(model_path).exists() {
        return Err(EngineError::ModelNotFound(model_path.to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;

    tracing::debug!(
        path = model_path,
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );

    Ok(session)
}

impl FaceEngine for OnnxEngine {
    /// Detect faces in a grayscale frame, sorted by confidence.
    fn detect(&mut self, frame: &[u8], width: u32, height: u32) -> Result<Vec<FaceRegion>, EngineError> {
        let (input, letterbox) = letterbox_tensor(frame, width as usize, height as usize);

        let outputs = self
            .detector
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();

        // Landmark tensors (if present) are ignored.
        for (pos, &stride) in DET_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                DET_CONFIDENCE_THRESHOLD,
            ));
        }

        let mut result = nms(detections, DET_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }

    /// Extract one descriptor per region, order-aligned with `regions`.
    fn describe(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        regions: &[FaceRegion],
    ) -> Result<Vec<Descriptor>, EngineError> {
        let mut descriptors = Vec::with_capacity(regions.len());

        for region in regions {
            let (crop, crop_w, crop_h) = crop_region(frame, width, height, region);
            if crop.is_empty() {
                return Err(EngineError::InferenceFailed(
                    "face region lies outside the frame".into(),
                ));
            }

            let resized = resize_bilinear(
                &crop,
                crop_w as usize,
                crop_h as usize,
                DESC_INPUT_SIZE,
                DESC_INPUT_SIZE,
            );
            let input = gray_to_tensor(&resized, DESC_INPUT_SIZE, DESC_MEAN, DESC_STD);

            let outputs = self
                .recognizer
                .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

            let (_, raw) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::InferenceFailed(format!("descriptor extraction: {e}")))?;

            if raw.len() != DESC_DIM {
                return Err(EngineError::InferenceFailed(format!(
                    "expected {DESC_DIM}-dim descriptor, got {}",
                    raw.len()
                )));
            }

            descriptors.push(Descriptor { values: l2_normalize(raw) });
        }

        Ok(descriptors)
    }
}

/// L2-normalize a raw descriptor. A zero vector is returned unchanged.
fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

/// Resize a grayscale image with bilinear interpolation.
fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    let mut dst = vec![0u8; dst_w * dst_h];
    for y in 0..dst_h {
        let src_y = (y as f32 + 0.5) * y_ratio - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, src_h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..dst_w {
            let src_x = (x as f32 + 0.5) * x_ratio - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, src_w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let top = src[y0 * src_w + x0] as f32 * (1.0 - fx) + src[y0 * src_w + x1] as f32 * fx;
            let bot = src[y1 * src_w + x0] as f32 * (1.0 - fx) + src[y1 * src_w + x1] as f32 * fx;
            let val = top * (1.0 - fy) + bot * fy;

            dst[y * dst_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    dst
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Letterbox geometry for fitting a frame into the square detector input:
/// (resized width, resized height, de-mapping info).
fn compute_letterbox(width: usize, height: usize) -> (usize, usize, Letterbox) {
    let scale_w = DET_INPUT_SIZE as f32 / width as f32;
    let scale_h = DET_INPUT_SIZE as f32 / height as f32;
    let scale = scale_w.min(scale_h);

    let new_w = (width as f32 * scale).round() as usize;
    let new_h = (height as f32 * scale).round() as usize;
    let pad_x = ((DET_INPUT_SIZE - new_w) / 2) as f32;
    let pad_y = ((DET_INPUT_SIZE - new_h) / 2) as f32;

    (new_w, new_h, Letterbox { scale, pad_x, pad_y })
}

/// Build the detector input tensor: resize preserving aspect ratio, center in
/// the square input, and normalize. The zero-filled padding corresponds to
/// DET_MEAN after normalization.
fn letterbox_tensor(frame: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
    let (new_w, new_h, letterbox) = compute_letterbox(width, height);
    let resized = resize_bilinear(frame, width, height, new_w, new_h);

    let pad_x = letterbox.pad_x as usize;
    let pad_y = letterbox.pad_y as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, DET_INPUT_SIZE, DET_INPUT_SIZE));
    for y in 0..new_h {
        for x in 0..new_w {
            let normalized = (resized[y * new_w + x] as f32 - DET_MEAN) / DET_STD;
            tensor[[0, 0, y + pad_y, x + pad_x]] = normalized;
            tensor[[0, 1, y + pad_y, x + pad_x]] = normalized;
            tensor[[0, 2, y + pad_y, x + pad_x]] = normalized;
        }
    }

    (tensor, letterbox)
}

/// Build a NCHW float tensor from a square grayscale image, replicating the
/// single channel into all three model channels.
fn gray_to_tensor(gray: &[u8], size: usize, mean: f32, std: f32) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..size {
        for x in 0..size {
            let pixel = gray.get(y * size + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - mean) / std;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }
    tensor
}

/// Decode anchor-free SCRFD outputs for one stride, mapping boxes back from
/// the letterboxed model input to original frame coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceRegion> {
    let grid = DET_INPUT_SIZE / stride;
    let num_anchors = grid * grid * DET_ANCHORS_PER_CELL;

    let mut regions = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / DET_ANCHORS_PER_CELL;
        let anchor_cx = ((cell % grid) * stride) as f32;
        let anchor_cy = ((cell / grid) * stride) as f32;

        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = anchor_cx - bboxes[off] * stride as f32;
        let y1 = anchor_cy - bboxes[off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[off + 3] * stride as f32;

        let orig_x1 = (x1 - letterbox.pad_x) / letterbox.scale;
        let orig_y1 = (y1 - letterbox.pad_y) / letterbox.scale;
        let orig_x2 = (x2 - letterbox.pad_x) / letterbox.scale;
        let orig_y2 = (y2 - letterbox.pad_y) / letterbox.scale;

        regions.push(FaceRegion {
            x: orig_x1,
            y: orig_y1,
            width: orig_x2 - orig_x1,
            height: orig_y2 - orig_y1,
            confidence: score,
        });
    }

    regions
}

/// Non-maximum suppression over detected regions.
fn nms(mut regions: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    regions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceRegion> = Vec::new();
    for candidate in regions {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-union of two regions.
fn iou(a: &FaceRegion, b: &FaceRegion) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceRegion {
        FaceRegion { x, y, width: w, height: h, confidence: conf }
    }

    #[test]
    fn test_iou_identical() {
        let a = region(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = region(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = region(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = region(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = region(5.0, 0.0, 10.0, 10.0, 1.0);
        // intersection 50, union 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlap() {
        let regions = vec![
            region(0.0, 0.0, 100.0, 100.0, 0.9),
            region(5.0, 5.0, 100.0, 100.0, 0.8),
            region(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let kept = nms(regions, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_disjoint() {
        let regions = vec![
            region(0.0, 0.0, 10.0, 10.0, 0.9),
            region(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        assert_eq!(nms(regions, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let src = vec![128u8; 50 * 40];
        let dst = resize_bilinear(&src, 50, 40, 112, 112);
        assert_eq!(dst.len(), 112 * 112);
        assert!(dst.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_resize_single_pixel() {
        let dst = resize_bilinear(&[200], 1, 1, 4, 4);
        assert!(dst.iter().all(|&p| p == 200));
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_decode_stride_below_threshold() {
        let grid = DET_INPUT_SIZE / 32;
        let anchors = grid * grid * DET_ANCHORS_PER_CELL;
        let scores = vec![0.1f32; anchors];
        let bboxes = vec![1.0f32; anchors * 4];
        let letterbox = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        assert!(decode_stride(&scores, &bboxes, 32, &letterbox, 0.5).is_empty());
    }

    #[test]
    fn test_decode_stride_maps_to_frame_coordinates() {
        let stride = 32;
        let grid = DET_INPUT_SIZE / stride;
        let anchors = grid * grid * DET_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];

        // One confident anchor at cell (2, 1): center = (64, 32) in model space,
        // offsets of one stride in every direction.
        let idx = (grid + 2) * DET_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        // Frame is half the model resolution in both axes, no padding
        let letterbox = Letterbox { scale: 2.0, pad_x: 0.0, pad_y: 0.0 };
        let regions = decode_stride(&scores, &bboxes, stride, &letterbox, 0.5);
        assert_eq!(regions.len(), 1);
        let r = &regions[0];
        assert!((r.x - 16.0).abs() < 1e-4);
        assert!((r.y - 0.0).abs() < 1e-4);
        assert!((r.width - 32.0).abs() < 1e-4);
        assert!((r.height - 32.0).abs() < 1e-4);
        assert!((r.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_compute_letterbox_wide_frame() {
        // 320x240 fits at scale 2.0 -> 640x480 with 80px vertical padding
        let (new_w, new_h, letterbox) = compute_letterbox(320, 240);
        assert_eq!((new_w, new_h), (640, 480));
        assert!((letterbox.scale - 2.0).abs() < 1e-6);
        assert!((letterbox.pad_x - 0.0).abs() < 1e-6);
        assert!((letterbox.pad_y - 80.0).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let (_, _, letterbox) = compute_letterbox(320, 240);

        let orig_x = 100.0f32;
        let orig_y = 50.0f32;
        let boxed_x = orig_x * letterbox.scale + letterbox.pad_x;
        let boxed_y = orig_y * letterbox.scale + letterbox.pad_y;

        let recovered_x = (boxed_x - letterbox.pad_x) / letterbox.scale;
        let recovered_y = (boxed_y - letterbox.pad_y) / letterbox.scale;

        assert!((recovered_x - orig_x).abs() < 0.1, "x: {recovered_x} vs {orig_x}");
        assert!((recovered_y - orig_y).abs() < 0.1, "y: {recovered_y} vs {orig_y}");
    }

    #[test]
    fn test_letterbox_tensor_pads_with_mean() {
        // Uniform mid-gray 320x240 frame: content pixels normalize close to
        // zero, padding rows are exactly zero.
        let frame = vec![128u8; 320 * 240];
        let (tensor, letterbox) = letterbox_tensor(&frame, 320, 240);

        let pad_y = letterbox.pad_y as usize;
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 0, pad_y - 1, DET_INPUT_SIZE / 2]], 0.0);
        let content = tensor[[0, 0, pad_y + 10, DET_INPUT_SIZE / 2]];
        assert!((content - (128.0 - DET_MEAN) / DET_STD).abs() < 1e-6);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8",  "bbox_16",  "bbox_32",
            "kps_8",   "kps_16",   "kps_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        // Named but in non-standard order
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(2, 0), (5, 3), (8, 6)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        // Generic numeric names — should fall back to positional
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3), (1, 4), (2, 5)]);
    }
}
