use std::sync::Arc;

use image::imageops::FilterType;
use serde::Serialize;
use tracing::{debug, warn};

use crate::detect::DetectionStage;
use crate::engine::InferenceEngine;
use crate::error::{Result, VisionError};
use crate::frame::{Frame, Orientation, PixelRect};
use crate::labels::LabelTable;
use crate::recognize::RecognitionStage;
use crate::suppress::{self, OverlapSuppressor};
use crate::{Annotation, Candidate, FrameLatency, NormalizedBox, VisionConfig};

/// Result of one fusion pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionReport {
    pub annotations: Vec<Annotation>,
    pub latency: FrameLatency,
    /// Boxes are relative to the frame after this orientation was made upright.
    pub orientation: Orientation,
}

impl FusionReport {
    pub fn empty(orientation: Orientation) -> Self {
        Self { annotations: Vec::new(), latency: FrameLatency::default(), orientation }
    }
}

/// A finished pass together with the frame it consumed, back in sensor
/// orientation.
#[derive(Debug)]
pub struct FusionPass {
    pub report: FusionReport,
    pub frame: Frame,
}

/// Detect, suppress, crop and recognise over a single frame.
///
/// Holds no per-pass state; `fuse` may run concurrently on distinct frames.
/// Each engine is behind its own lock.
pub struct FusionEngine {
    detection: DetectionStage,
    recognition: RecognitionStage,
    suppressor: OverlapSuppressor,
    labels: Arc<LabelTable>,
    conf_threshold: f32,
    crop_padding_px: u32,
    max_frame_pixels: u64,
}

impl FusionEngine {
    pub fn new(
        cfg: &VisionConfig,
        detector: Box<dyn InferenceEngine>,
        recognizer: Box<dyn InferenceEngine>,
        labels: Arc<LabelTable>,
    ) -> Self {
        Self {
            detection: DetectionStage::new(cfg, detector),
            recognition: RecognitionStage::new(cfg, labels.len(), recognizer),
            suppressor: OverlapSuppressor::new(cfg.overlap_threshold_px),
            labels,
            conf_threshold: cfg.conf_threshold,
            crop_padding_px: cfg.crop_padding_px,
            max_frame_pixels: cfg.max_frame_pixels,
        }
    }

    pub fn labels(&self) -> &Arc<LabelTable> {
        &self.labels
    }

    /// Still images from storage are already upright.
    pub fn fuse_still(&self, frame: Frame) -> Result<FusionPass> {
        self.fuse(frame, Orientation::Landscape)
    }

    /// Run one pass. Invalid frames produce an empty report instead of an
    /// error; inference failures are returned.
    pub fn fuse(&self, frame: Frame, orientation: Orientation) -> Result<FusionPass> {
        if frame.is_empty() || frame.pixel_count() > self.max_frame_pixels {
            warn!("fusion: dropping frame {}x{}", frame.width(), frame.height());
            return Ok(FusionPass { report: FusionReport::empty(orientation), frame });
        }

        let upright = frame.into_upright(orientation);
        let report = match self.run_pass(&upright) {
            Ok((annotations, latency)) => FusionReport { annotations, latency, orientation },
            Err(e @ VisionError::InvalidFrame { .. }) => {
                warn!("fusion: {}", e);
                FusionReport::empty(orientation)
            }
            Err(e) => return Err(e),
        };

        Ok(FusionPass { report, frame: upright.into_sensor(orientation) })
    }

    fn run_pass(&self, upright: &Frame) -> Result<(Vec<Annotation>, FrameLatency)> {
        let size = self.detection.input_size();
        // the detector samples the frame nearest-neighbour inside the codec
        let detection = self.detection.detect(upright)?;
        if detection.candidates.is_empty() {
            return Ok((Vec::new(), FrameLatency { detection_ms: detection.latency_ms, recognition_ms_total: 0 }));
        }

        // crops are cut from an area-filtered copy in detector space, so
        // boxes map 1:1 onto its pixels
        let working = upright.resized(size, size, FilterType::Triangle);

        let mut latency = FrameLatency { detection_ms: detection.latency_ms, recognition_ms_total: 0 };
        let mut accepted: Vec<Candidate> = Vec::new();
        let mut annotations = Vec::new();

        for cand in &detection.candidates {
            if cand.score <= self.conf_threshold {
                continue;
            }
            if !self.suppressor.accepted(cand, &accepted, size, size) {
                debug!("fusion: suppressed candidate score={:.3}", cand.score);
                continue;
            }
            let crop = match working.crop(self.crop_rect(&cand.bbox, size)) {
                Ok(crop) => crop,
                Err(e @ VisionError::Geometry { .. }) => {
                    debug!("fusion: skipped candidate score={:.3}: {}", cand.score, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let recognition = self.recognition.recognize(&crop)?;
            latency.recognition_ms_total += recognition.latency_ms;
            annotations.push(Annotation { detection_score: cand.score, bbox: cand.bbox, recognition });
            accepted.push(*cand);
        }

        debug!(
            "fusion: {} candidates, {} annotations, {} ms",
            detection.candidates.len(),
            annotations.len(),
            latency.total_ms()
        );
        Ok((annotations, latency))
    }

    /// Padded pixel rectangle for a box on a `size x size` frame, clamped to
    /// the frame. May be empty when the box lies outside.
    pub fn crop_rect(&self, bbox: &NormalizedBox, size: u32) -> PixelRect {
        let [left, top, right, bottom] = suppress::corners(bbox, size, size);
        let pad = self.crop_padding_px as f32;
        PixelRect {
            x0: (left - pad).floor() as i64,
            y0: (top - pad).floor() as i64,
            x1: (right + pad).ceil() as i64,
            y1: (bottom + pad).ceil() as i64,
        }
        .clamp_to(size, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::recognize::arg_max;
    use crate::testing::{detection_tensor, patterned_frame, small_config, uniform_frame, ScriptedEngine};
    use std::sync::atomic::Ordering;

    const PROBS: [f32; 4] = [0.05, 0.8, 0.1, 0.05];

    fn labels() -> Arc<LabelTable> {
        Arc::new(LabelTable::parse("stop\nyield\nno entry\npriority road\n").unwrap())
    }

    fn engine(cfg: &VisionConfig, rows: &[(usize, f32, [f32; 4])]) -> FusionEngine {
        FusionEngine::new(
            cfg,
            Box::new(ScriptedEngine::fixed(detection_tensor(cfg, rows))),
            Box::new(ScriptedEngine::fixed(PROBS.to_vec())),
            labels(),
        )
    }

    #[test]
    fn single_confident_row_yields_one_annotation() {
        let cfg = VisionConfig::default();
        let fusion = engine(&cfg, &[(1234, 0.9, [0.5, 0.5, 0.2, 0.2])]);
        let pass = fusion.fuse_still(uniform_frame(320, 240)).unwrap();
        assert_eq!(pass.report.annotations.len(), 1);
        let a = pass.report.annotations[0];
        assert_eq!(a.detection_score, 0.9);
        assert_eq!(a.bbox, NormalizedBox { center_x: 0.5, center_y: 0.5, width: 0.2, height: 0.2 });
        assert_eq!(a.recognition.class_index, 1);
    }

    #[test]
    fn detector_input_is_nearest_sampled_frame() {
        let cfg = small_config();
        for orientation in [Orientation::Landscape, Orientation::Portrait] {
            let detector = ScriptedEngine::fixed(detection_tensor(&cfg, &[(0, 0.9, [0.5, 0.5, 0.2, 0.2])]));
            let seen = detector.last_input();
            let fusion =
                FusionEngine::new(&cfg, Box::new(detector), Box::new(ScriptedEngine::fixed(PROBS.to_vec())), labels());
            let frame = patterned_frame(200, 150);
            let pass = fusion.fuse(frame.clone(), orientation).unwrap();
            assert_eq!(pass.report.annotations.len(), 1);

            let expected = codec::encode(&frame.into_upright(orientation), cfg.detection_input, cfg.precision).unwrap();
            assert_eq!(seen.lock().unwrap().as_ref(), Some(&expected));
        }
    }

    #[test]
    fn annotations_meet_threshold_and_arg_max() {
        let cfg = small_config();
        let fusion = engine(
            &cfg,
            &[
                (0, 0.5, [0.2, 0.2, 0.2, 0.2]),
                (1, 0.75, [0.7, 0.7, 0.2, 0.2]),
                (2, 0.6, [0.2, 0.8, 0.2, 0.2]),
            ],
        );
        let pass = fusion.fuse_still(uniform_frame(64, 64)).unwrap();
        assert_eq!(pass.report.annotations.len(), 2);
        let (best, p) = arg_max(&PROBS).unwrap();
        for a in &pass.report.annotations {
            assert!(a.detection_score > 0.5);
            assert_eq!(a.recognition.class_index, best);
            assert_eq!(a.recognition.class_confidence, p);
        }
    }

    #[test]
    fn overlapping_lower_score_is_suppressed() {
        let cfg = VisionConfig::default();
        let fusion = engine(
            &cfg,
            &[(10, 0.8, [0.52, 0.52, 0.2, 0.2]), (20, 0.9, [0.5, 0.5, 0.2, 0.2]), (30, 0.7, [0.1, 0.1, 0.1, 0.1])],
        );
        let pass = fusion.fuse_still(uniform_frame(128, 128)).unwrap();
        let scores: Vec<f32> = pass.report.annotations.iter().map(|a| a.detection_score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn off_frame_candidate_is_skipped() {
        let cfg = small_config();
        let recognizer = ScriptedEngine::fixed(PROBS.to_vec());
        let calls = recognizer.calls();
        let fusion = FusionEngine::new(
            &cfg,
            Box::new(ScriptedEngine::fixed(detection_tensor(
                &cfg,
                &[(4, 0.95, [1.8, 1.8, 0.1, 0.1]), (5, 0.7, [0.3, 0.3, 0.2, 0.2])],
            ))),
            Box::new(recognizer),
            labels(),
        );
        let pass = fusion.fuse_still(uniform_frame(64, 64)).unwrap();
        assert_eq!(pass.report.annotations.len(), 1);
        assert_eq!(pass.report.annotations[0].detection_score, 0.7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn crop_rect_pads_and_clamps() {
        let cfg = VisionConfig::default();
        let fusion = engine(&cfg, &[]);
        let rect = fusion.crop_rect(&NormalizedBox { center_x: 0.5, center_y: 0.5, width: 0.25, height: 0.125 }, 640);
        assert_eq!(rect, PixelRect { x0: 230, y0: 270, x1: 410, y1: 370 });
        let edge = fusion.crop_rect(&NormalizedBox { center_x: 0.0, center_y: 1.0, width: 0.1, height: 0.1 }, 640);
        assert_eq!(edge, PixelRect { x0: 0, y0: 598, x1: 42, y1: 640 });
    }

    #[test]
    fn fusion_is_deterministic() {
        let cfg = small_config();
        let rows = [(3, 0.91, [0.3, 0.4, 0.2, 0.3]), (7, 0.66, [0.75, 0.7, 0.2, 0.2])];
        let fusion = FusionEngine::new(
            &cfg,
            Box::new(ScriptedEngine::fixed(detection_tensor(&cfg, &rows))),
            Box::new(ScriptedEngine::sequence(vec![vec![0.1, 0.2, 0.6, 0.1], vec![0.7, 0.1, 0.1, 0.1]])),
            labels(),
        );
        let frame = patterned_frame(96, 72);
        let a = fusion.fuse_still(frame.clone()).unwrap().report.annotations;
        let b = fusion.fuse_still(frame).unwrap().report.annotations;
        let strip = |v: &[Annotation]| -> Vec<(f32, NormalizedBox, usize, f32)> {
            v.iter()
                .map(|a| (a.detection_score, a.bbox, a.recognition.class_index, a.recognition.class_confidence))
                .collect()
        };
        assert_eq!(strip(&a), strip(&b));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn latency_is_detection_plus_recognitions() {
        let cfg = small_config();
        let fusion = FusionEngine::new(
            &cfg,
            Box::new(
                ScriptedEngine::fixed(detection_tensor(
                    &cfg,
                    &[(0, 0.9, [0.25, 0.25, 0.2, 0.2]), (1, 0.8, [0.75, 0.75, 0.2, 0.2])],
                ))
                .with_delay(std::time::Duration::from_millis(5)),
            ),
            Box::new(ScriptedEngine::fixed(PROBS.to_vec()).with_delay(std::time::Duration::from_millis(3))),
            labels(),
        );
        let report = fusion.fuse_still(uniform_frame(64, 64)).unwrap().report;
        assert_eq!(report.annotations.len(), 2);
        let sum: u64 = report.annotations.iter().map(|a| a.recognition.latency_ms).sum();
        assert_eq!(report.latency.recognition_ms_total, sum);
        assert_eq!(report.latency.total_ms(), report.latency.detection_ms + sum);
        assert!(report.latency.detection_ms >= 5);
    }

    #[test]
    fn no_candidates_means_detection_latency_only() {
        let cfg = small_config();
        let fusion = engine(&cfg, &[]);
        let report = fusion.fuse_still(uniform_frame(64, 64)).unwrap().report;
        assert!(report.annotations.is_empty());
        assert_eq!(report.latency.recognition_ms_total, 0);
        assert_eq!(report.latency.total_ms(), report.latency.detection_ms);
    }

    #[test]
    fn empty_frame_yields_empty_report() {
        let cfg = small_config();
        let fusion = engine(&cfg, &[(0, 0.9, [0.5, 0.5, 0.2, 0.2])]);
        let pass = fusion.fuse_still(Frame::from_rgba(0, 0, Vec::new()).unwrap()).unwrap();
        assert_eq!(pass.report, FusionReport::empty(Orientation::Landscape));
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let cfg = VisionConfig { max_frame_pixels: 100, ..small_config() };
        let fusion = engine(&cfg, &[(0, 0.9, [0.5, 0.5, 0.2, 0.2])]);
        let pass = fusion.fuse_still(uniform_frame(20, 20)).unwrap();
        assert!(pass.report.annotations.is_empty());
        assert_eq!(pass.report.latency.total_ms(), 0);
    }

    #[test]
    fn detector_failure_propagates() {
        let cfg = small_config();
        let fusion = FusionEngine::new(
            &cfg,
            Box::new(ScriptedEngine::failing("out of memory")),
            Box::new(ScriptedEngine::fixed(PROBS.to_vec())),
            labels(),
        );
        assert!(matches!(fusion.fuse_still(uniform_frame(64, 64)), Err(VisionError::Inference { .. })));
    }

    #[test]
    fn portrait_pass_returns_frame_in_sensor_orientation() {
        let cfg = small_config();
        let fusion = engine(&cfg, &[(0, 0.9, [0.5, 0.5, 0.3, 0.3])]);
        let frame = patterned_frame(80, 48);
        let pass = fusion.fuse(frame.clone(), Orientation::Portrait).unwrap();
        assert_eq!(pass.frame, frame);
        assert_eq!(pass.report.orientation, Orientation::Portrait);
        assert_eq!(pass.report.annotations.len(), 1);
    }
}
