use std::sync::Mutex;
use std::time::Instant;

use crate::codec::{self, Precision};
use crate::engine::{InferenceEngine, Tensor};
use crate::error::{Result, Stage, VisionError};
use crate::frame::Frame;
use crate::{RecognitionResult, VisionConfig};

pub struct RecognitionStage {
    engine: Mutex<Box<dyn InferenceEngine>>,
    input_size: u32,
    num_classes: usize,
    precision: Precision,
}

impl RecognitionStage {
    pub fn new(cfg: &VisionConfig, num_classes: usize, engine: Box<dyn InferenceEngine>) -> Self {
        Self {
            engine: Mutex::new(engine),
            input_size: cfg.recognition_input,
            num_classes,
            precision: cfg.precision,
        }
    }

    pub fn recognize(&self, crop: &Frame) -> Result<RecognitionResult> {
        crop.ensure_not_empty()?;
        let input = codec::encode(crop, self.input_size, self.precision)?;
        let mut outputs = [Tensor::zeros_f32(&[1, self.num_classes])];

        let latency_ms = {
            let mut engine = self
                .engine
                .lock()
                .map_err(|_| VisionError::inference(Stage::Recognition, "engine lock poisoned"))?;
            let started = Instant::now();
            engine
                .run(&input, &mut outputs)
                .map_err(|e| VisionError::inference(Stage::Recognition, format!("{:#}", e)))?;
            started.elapsed().as_millis() as u64
        };

        let [out] = &outputs;
        let probs = out
            .as_f32()
            .ok_or_else(|| VisionError::inference(Stage::Recognition, "output tensor is not f32"))?;
        let (class_index, class_confidence) = arg_max(probs)
            .ok_or_else(|| VisionError::inference(Stage::Recognition, "no usable class probability"))?;

        Ok(RecognitionResult { class_index, class_confidence, latency_ms })
    }
}

/// Index and value of the largest element. Ties keep the first index; NaN
/// entries are never chosen. `None` when no element is a number.
pub fn arg_max(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best
}
