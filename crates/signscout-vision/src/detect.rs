use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

use crate::codec::{self, Precision};
use crate::engine::{InferenceEngine, Tensor};
use crate::error::{Result, Stage, VisionError};
use crate::frame::Frame;
use crate::topk::{self, TieBreak};
use crate::{Candidate, VisionConfig};

/// Output of one detector invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub candidates: Vec<Candidate>,
    pub latency_ms: u64,
}

pub struct DetectionStage {
    engine: Mutex<Box<dyn InferenceEngine>>,
    input_size: u32,
    output_shape: [usize; 3],
    k: usize,
    threshold: f32,
    tie_break: TieBreak,
    precision: Precision,
}

impl DetectionStage {
    pub fn new(cfg: &VisionConfig, engine: Box<dyn InferenceEngine>) -> Self {
        Self {
            engine: Mutex::new(engine),
            input_size: cfg.detection_input,
            output_shape: cfg.detection_output_shape(),
            k: cfg.max_candidates,
            threshold: cfg.conf_threshold,
            tie_break: cfg.tie_break,
            precision: cfg.precision,
        }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn detect(&self, frame: &Frame) -> Result<Detection> {
        let input = codec::encode(frame, self.input_size, self.precision)?;
        let mut outputs = [Tensor::zeros_f32(&self.output_shape)];

        let latency_ms = {
            let mut engine = self
                .engine
                .lock()
                .map_err(|_| VisionError::inference(Stage::Detection, "engine lock poisoned"))?;
            let started = Instant::now();
            engine
                .run(&input, &mut outputs)
                .map_err(|e| VisionError::inference(Stage::Detection, format!("{:#}", e)))?;
            started.elapsed().as_millis() as u64
        };

        let [_, rows, stride] = self.output_shape;
        let [out] = &outputs;
        let raw = out
            .as_f32()
            .ok_or_else(|| VisionError::inference(Stage::Detection, "output tensor is not f32"))?;
        if raw.len() != rows * stride {
            return Err(VisionError::inference(
                Stage::Detection,
                format!("output has {} values, expected {}x{}", raw.len(), rows, stride),
            ));
        }

        let candidates = topk::select(raw, stride, self.k, self.threshold, self.tie_break);
        debug!("detect: {} candidates in {} ms", candidates.len(), latency_ms);
        Ok(Detection { candidates, latency_ms })
    }
}
