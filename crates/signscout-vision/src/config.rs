use anyhow::Result;
use serde::Deserialize;

use crate::codec::Precision;
use crate::topk::{TieBreak, MIN_ROW_STRIDE};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub detection_model: String,
    pub recognition_model: String,
    pub labels_path: String,

    /// Square input resolution of the detector. Crops are cut from a frame
    /// resized to this size, so boxes and crops share one pixel space.
    pub detection_input: u32,
    pub recognition_input: u32,

    /// Detector output rows and values per row (`cx, cy, w, h, score, ...`).
    pub detection_rows: usize,
    pub detection_stride: usize,

    pub max_candidates: usize,
    pub conf_threshold: f32,
    pub overlap_threshold_px: f32,
    pub crop_padding_px: u32,
    pub tie_break: TieBreak,
    pub precision: Precision,

    pub detection_threads: i32,
    pub recognition_threads: i32,

    /// Frames with more pixels are rejected before any work is done.
    pub max_frame_pixels: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            detection_model: "models/yolov5n.tflite".into(),
            recognition_model: "models/nlcnn_model_99_64.tflite".into(),
            labels_path: "models/labelmap.txt".into(),
            detection_input: 640,
            recognition_input: 48,
            detection_rows: 25_200,
            detection_stride: 6,
            max_candidates: 10,
            conf_threshold: 0.5,
            overlap_threshold_px: 10.0,
            crop_padding_px: 10,
            tie_break: TieBreak::RowIndex,
            precision: Precision::Float32,
            detection_threads: 2,
            recognition_threads: 1,
            max_frame_pixels: 4096 * 4096,
        }
    }
}

impl VisionConfig {
    pub fn detection_output_shape(&self) -> [usize; 3] {
        [1, self.detection_rows, self.detection_stride]
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.detection_input > 0, "vision.detection_input must be > 0");
        anyhow::ensure!(self.recognition_input > 0, "vision.recognition_input must be > 0");
        anyhow::ensure!(self.detection_rows > 0, "vision.detection_rows must be > 0");
        anyhow::ensure!(
            self.detection_stride >= MIN_ROW_STRIDE,
            "vision.detection_stride must be >= {} (cx, cy, w, h, score)",
            MIN_ROW_STRIDE
        );
        anyhow::ensure!(self.max_candidates > 0, "vision.max_candidates must be > 0");
        anyhow::ensure!(
            self.conf_threshold > 0.0 && self.conf_threshold < 1.0,
            "vision.conf_threshold out of range (0, 1)"
        );
        anyhow::ensure!(self.overlap_threshold_px >= 0.0, "vision.overlap_threshold_px must be >= 0");
        anyhow::ensure!(self.detection_threads >= 1, "vision.detection_threads must be >= 1");
        anyhow::ensure!(self.recognition_threads >= 1, "vision.recognition_threads must be >= 1");
        anyhow::ensure!(self.max_frame_pixels > 0, "vision.max_frame_pixels must be > 0");
        Ok(())
    }
}
