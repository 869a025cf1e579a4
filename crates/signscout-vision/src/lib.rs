pub mod codec;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod export;
pub mod frame;
pub mod fusion;
pub mod labels;
pub mod overlay;
pub mod recognize;
pub mod scheduler;
pub mod suppress;
#[cfg(feature = "vision-tflite")]
pub mod tflite;
pub mod topk;

#[cfg(test)]
mod testing;

use serde::{Deserialize, Serialize};

pub use config::VisionConfig;
pub use engine::{InferenceEngine, Tensor};
pub use error::VisionError;
pub use frame::{Frame, Orientation};
pub use fusion::{FusionEngine, FusionPass, FusionReport};
pub use labels::LabelTable;
pub use scheduler::FrameScheduler;

/// Box in the detector's input space, every field in 0..1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
}

/// Detector row that passed the confidence threshold, not yet recognised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub score: f32,
    pub bbox: NormalizedBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub class_index: usize,
    pub class_confidence: f32,
    pub latency_ms: u64,
}

/// One fused detection + recognition ready for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub detection_score: f32,
    pub bbox: NormalizedBox,
    pub recognition: RecognitionResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLatency {
    pub detection_ms: u64,
    pub recognition_ms_total: u64,
}

impl FrameLatency {
    pub fn total_ms(&self) -> u64 {
        self.detection_ms + self.recognition_ms_total
    }
}
