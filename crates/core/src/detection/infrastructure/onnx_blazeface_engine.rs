//! BlazeFace detection engine using ONNX Runtime via `ort`.
//!
//! Two model variants are supported: the short-range model (128×128 input,
//! tuned for selfie distance) and the full-range model (192×192 input).
use std::path::{Path, PathBuf};

use crate::detection::domain::detection_engine::{
    DetectionEngine, EngineError, EngineOptions, ModelKind,
};
use crate::detection::domain::detection_result::DetectionResult;
use crate::shared::frame::Frame;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.3;

/// Values per anchor in the regressor output (box + 6 keypoints).
const REGRESSOR_STRIDE: usize = 16;

/// Maps a model variant to its ONNX file, resolving or downloading as needed.
pub type ModelLocator = Box<dyn Fn(ModelKind) -> Result<PathBuf, String> + Send>;

/// Input geometry and anchor grid of one BlazeFace variant.
#[derive(Clone, Copy, Debug, PartialEq)]
struct ModelLayout {
    input_size: u32,
    /// `(stride, anchors_per_cell)` for each feature map.
    strides: &'static [(usize, usize)],
}

impl ModelLayout {
    fn for_kind(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Fast => Self {
                input_size: 128,
                strides: &[(8, 2), (16, 6)],
            },
            ModelKind::Accurate => Self {
                input_size: 192,
                strides: &[(4, 1)],
            },
        }
    }

    fn num_anchors(&self) -> usize {
        self.strides
            .iter()
            .map(|&(stride, n)| {
                let grid = self.input_size as usize / stride;
                grid * grid * n
            })
            .sum()
    }
}

struct LoadedModel {
    kind: ModelKind,
    session: ort::session::Session,
    layout: ModelLayout,
    anchors: Vec<[f32; 2]>,
}

/// Face-presence engine backed by a BlazeFace ONNX session.
///
/// The session is created in [`configure`](DetectionEngine::configure) and
/// rebuilt only when the model variant changes.
pub struct OnnxBlazefaceEngine {
    locate: ModelLocator,
    model: Option<LoadedModel>,
    min_confidence: f64,
}

impl OnnxBlazefaceEngine {
    pub fn new(locate: ModelLocator) -> Self {
        Self {
            locate,
            model: None,
            min_confidence: EngineOptions::default().min_confidence,
        }
    }

    fn load(&self, kind: ModelKind) -> Result<LoadedModel, EngineError> {
        let path = (self.locate)(kind).map_err(EngineError::EngineUnavailable)?;
        log::info!("Loading {kind} BlazeFace model from {}", path.display());
        let session = build_session(&path).map_err(|e| {
            EngineError::EngineUnavailable(format!("{}: {e}", path.display()))
        })?;
        let layout = ModelLayout::for_kind(kind);
        Ok(LoadedModel {
            kind,
            session,
            layout,
            anchors: generate_anchors(&layout),
        })
    }
}

impl DetectionEngine for OnnxBlazefaceEngine {
    fn configure(&mut self, options: &EngineOptions) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&options.min_confidence) {
            return Err(EngineError::InvalidOptions(format!(
                "min confidence must be within [0, 1], got {}",
                options.min_confidence
            )));
        }
        self.min_confidence = options.min_confidence;

        let reload = self.model.as_ref().map_or(true, |m| m.kind != options.model);
        if reload {
            self.model = Some(self.load(options.model)?);
        }
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult, Box<dyn std::error::Error>> {
        let model = self.model.as_mut().ok_or("detection engine not configured")?;
        if frame.is_empty() || frame.channels() != 3 {
            return Ok(DetectionResult::empty());
        }

        let input_tensor = preprocess(frame, model.layout.input_size);
        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = model.session.run(ort::inputs![input_value])?;

        // regressors: [1, N, 16], classificators: [1, N, 1]
        if outputs.len() < 2 {
            return Err(
                format!("BlazeFace model expected 2 outputs, got {}", outputs.len()).into(),
            );
        }
        let regressors = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let reg_data = regressors.as_slice().ok_or("Cannot get regressor slice")?;
        let score_data = scores.as_slice().ok_or("Cannot get score slice")?;

        let mut dets = decode(
            reg_data,
            score_data,
            &model.anchors,
            model.layout.input_size,
            self.min_confidence,
        );
        let faces = nms(&mut dets, NMS_IOU_THRESH);
        Ok(DetectionResult::from_confidences(faces.iter().map(|d| d.score)))
    }
}

fn build_session(path: &Path) -> Result<ort::session::Session, Box<dyn std::error::Error>> {
    let session = ort::session::Session::builder()?
        .with_execution_providers(preferred_execution_providers())?
        .commit_from_file(path)?;
    Ok(session)
}

/// Platform accelerator when available; ort falls back to CPU otherwise.
fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

/// Resize frame to `size × size` and normalize to [0,1] NCHW float32.
fn preprocess(frame: &Frame, size: u32) -> ndarray::Array4<f32> {
    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let s = size as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, s, s));
    for y in 0..s {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / s as f64) as usize).min(src_h - 1);
        for x in 0..s {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / s as f64) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, y, x]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }
    tensor
}

fn generate_anchors(layout: &ModelLayout) -> Vec<[f32; 2]> {
    let mut anchors = Vec::with_capacity(layout.num_anchors());
    for &(stride, per_cell) in layout.strides {
        let grid = layout.input_size as usize / stride;
        for y in 0..grid {
            for x in 0..grid {
                let cx = (x as f32 + 0.5) / grid as f32;
                let cy = (y as f32 + 0.5) / grid as f32;
                for _ in 0..per_cell {
                    anchors.push([cx, cy]);
                }
            }
        }
    }
    anchors
}

/// Candidate box in normalized [0,1] coordinates.
#[derive(Clone, Debug)]
struct RawDet {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    score: f64,
}

fn decode(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[[f32; 2]],
    input_size: u32,
    min_confidence: f64,
) -> Vec<RawDet> {
    let scale = input_size as f32;
    let mut dets = Vec::new();

    for (i, (&raw_score, anchor)) in scores.iter().zip(anchors).enumerate() {
        let score = sigmoid(raw_score.clamp(-100.0, 100.0)) as f64;
        if score < min_confidence {
            continue;
        }
        let off = i * REGRESSOR_STRIDE;
        let Some(reg) = regressors.get(off..off + 4) else {
            break;
        };

        let cx = anchor[0] + reg[0] / scale;
        let cy = anchor[1] + reg[1] / scale;
        let w = reg[2] / scale;
        let h = reg[3] / scale;
        dets.push(RawDet {
            x1: (cx - w / 2.0).max(0.0) as f64,
            y1: (cy - h / 2.0).max(0.0) as f64,
            x2: (cx + w / 2.0).min(1.0) as f64,
            y2: (cy + h / 2.0).min(1.0) as f64,
            score,
        });
    }
    dets
}

fn nms(dets: &mut [RawDet], iou_thresh: f64) -> Vec<RawDet> {
    dets.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDet> = Vec::new();
    for det in dets.iter() {
        if keep.iter().all(|k| bbox_iou(k, det) <= iou_thresh) {
            keep.push(det.clone());
        }
    }
    keep
}

fn bbox_iou(a: &RawDet, b: &RawDet) -> f64 {
    let inter = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0)
        * (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    inter / (area_a + area_b - inter)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn det(x1: f64, y1: f64, x2: f64, y2: f64, score: f64) -> RawDet {
        RawDet {
            x1,
            y1,
            x2,
            y2,
            score,
        }
    }

    #[rstest]
    #[case::short_range(ModelKind::Fast, 896)]
    #[case::full_range(ModelKind::Accurate, 2304)]
    fn test_anchor_count_per_variant(#[case] kind: ModelKind, #[case] expected: usize) {
        let layout = ModelLayout::for_kind(kind);
        assert_eq!(layout.num_anchors(), expected);
        assert_eq!(generate_anchors(&layout).len(), expected);
    }

    #[test]
    fn test_anchors_in_unit_range() {
        for kind in [ModelKind::Fast, ModelKind::Accurate] {
            for a in generate_anchors(&ModelLayout::for_kind(kind)) {
                assert!(a[0] > 0.0 && a[0] < 1.0);
                assert!(a[1] > 0.0 && a[1] < 1.0);
            }
        }
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let frame = Frame::new(vec![255u8; 300 * 400 * 3], 300, 400, 3, 0);
        let tensor = preprocess(&frame, 192);
        assert_eq!(tensor.shape(), &[1, 3, 192, 192]);
        assert_relative_eq!(tensor[[0, 2, 100, 100]], 1.0);
    }

    #[test]
    fn test_decode_filters_by_min_confidence() {
        let anchors = vec![[0.5, 0.5], [0.25, 0.25], [0.75, 0.75]];
        // Logits: ~0.88, ~0.5, ~0.12
        let scores = vec![2.0, 0.0, -2.0];
        let mut regressors = vec![0.0f32; 3 * REGRESSOR_STRIDE];
        for i in 0..3 {
            regressors[i * REGRESSOR_STRIDE + 2] = 32.0;
            regressors[i * REGRESSOR_STRIDE + 3] = 32.0;
        }

        let dets = decode(&regressors, &scores, &anchors, 128, 0.6);
        assert_eq!(dets.len(), 1);
        assert_relative_eq!(dets[0].score, sigmoid(2.0) as f64, epsilon = 1e-6);
        assert_relative_eq!(dets[0].x1, 0.375, epsilon = 1e-6);
        assert_relative_eq!(dets[0].x2, 0.625, epsilon = 1e-6);
    }

    #[test]
    fn test_decode_clamps_to_unit_square() {
        let anchors = vec![[0.05, 0.95]];
        let mut regressors = vec![0.0f32; REGRESSOR_STRIDE];
        regressors[2] = 64.0;
        regressors[3] = 64.0;
        let dets = decode(&regressors, &[5.0], &anchors, 128, 0.5);
        assert_eq!(dets[0].x1, 0.0);
        assert_eq!(dets[0].y2, 1.0);
    }

    #[test]
    fn test_decode_stops_on_short_regressor_output() {
        let anchors = vec![[0.5, 0.5], [0.5, 0.5]];
        let regressors = vec![0.0f32; REGRESSOR_STRIDE + 2];
        let dets = decode(&regressors, &[5.0, 5.0], &anchors, 128, 0.5);
        assert_eq!(dets.len(), 1);
    }

    #[test]
    fn test_nms_suppresses_overlap_and_keeps_separate() {
        let mut dets = vec![
            det(0.0, 0.0, 0.4, 0.4, 0.7),
            det(0.02, 0.02, 0.42, 0.42, 0.9),
            det(0.6, 0.6, 0.9, 0.9, 0.65),
        ];
        let kept = nms(&mut dets, NMS_IOU_THRESH);
        assert_eq!(kept.len(), 2);
        assert_relative_eq!(kept[0].score, 0.9);
        assert_relative_eq!(kept[1].score, 0.65);
    }

    #[test]
    fn test_result_reports_best_of_kept_faces() {
        let mut dets = vec![det(0.0, 0.0, 0.3, 0.3, 0.7), det(0.5, 0.5, 0.9, 0.9, 0.95)];
        let faces = nms(&mut dets, NMS_IOU_THRESH);
        let result = DetectionResult::from_confidences(faces.iter().map(|d| d.score));
        assert_eq!(result, DetectionResult::with_faces(2, 0.95));
    }

    #[test]
    fn test_sigmoid() {
        assert_relative_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(10.0) > 0.999);
        assert!(sigmoid(-10.0) < 0.001);
    }

    #[test]
    fn test_detect_before_configure_is_error() {
        let mut engine = OnnxBlazefaceEngine::new(Box::new(|_| Err("unused".to_string())));
        let frame = Frame::new(vec![0u8; 12], 2, 2, 3, 0);
        assert!(engine.detect(&frame).is_err());
    }

    #[test]
    fn test_configure_reports_missing_model_as_unavailable() {
        let mut engine =
            OnnxBlazefaceEngine::new(Box::new(|kind| Err(format!("no {kind} model"))));
        let err = engine.configure(&EngineOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::EngineUnavailable(ref m) if m == "no fast model"));
    }

    #[test]
    fn test_configure_rejects_out_of_range_confidence() {
        let mut engine = OnnxBlazefaceEngine::new(Box::new(|_| Err("unused".to_string())));
        let err = engine
            .configure(&EngineOptions {
                model: ModelKind::Fast,
                min_confidence: 1.5,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOptions(_)));
    }
}
