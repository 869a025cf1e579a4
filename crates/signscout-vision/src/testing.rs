//! Deterministic engines and fixtures shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::engine::{InferenceEngine, Tensor};
use crate::frame::Frame;
use crate::VisionConfig;

/// Engine that copies scripted values into its first output.
pub(crate) struct ScriptedEngine {
    outputs: Vec<Vec<f32>>,
    failure: Option<String>,
    fail_from: Option<usize>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    last_input: Arc<Mutex<Option<Tensor>>>,
}

impl ScriptedEngine {
    pub fn fixed(output: Vec<f32>) -> Self {
        Self::sequence(vec![output])
    }

    /// Call `n` returns `outputs[n % outputs.len()]`.
    pub fn sequence(outputs: Vec<Vec<f32>>) -> Self {
        Self {
            outputs,
            failure: None,
            fail_from: None,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            last_input: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self { failure: Some(msg.to_string()), ..Self::sequence(Vec::new()) }
    }

    /// Calls numbered `n` and later fail.
    pub fn failing_from(mut self, n: usize) -> Self {
        self.fail_from = Some(n);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// The input tensor of the most recent call.
    pub fn last_input(&self) -> Arc<Mutex<Option<Tensor>>> {
        self.last_input.clone()
    }
}

impl InferenceEngine for ScriptedEngine {
    fn run(&mut self, input: &Tensor, outputs: &mut [Tensor]) -> Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = Some(input.clone());
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        if let Some(msg) = &self.failure {
            anyhow::bail!("{}", msg);
        }
        if self.fail_from.is_some_and(|from| n >= from) {
            anyhow::bail!("scripted failure on call {}", n);
        }
        let values = &self.outputs[n % self.outputs.len()];
        let out = outputs
            .first_mut()
            .and_then(Tensor::as_f32_mut)
            .context("scripted engine needs one f32 output")?;
        anyhow::ensure!(out.len() == values.len(), "scripted output has {} values, tensor wants {}", values.len(), out.len());
        out.copy_from_slice(values);
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Small detector geometry so tests stay fast; thresholds match defaults.
pub(crate) fn small_config() -> VisionConfig {
    VisionConfig {
        detection_input: 64,
        recognition_input: 8,
        detection_rows: 32,
        ..VisionConfig::default()
    }
}

/// Detector output with the given `(row, score, [cx, cy, w, h])` entries and
/// every other row zeroed.
pub(crate) fn detection_tensor(cfg: &VisionConfig, rows: &[(usize, f32, [f32; 4])]) -> Vec<f32> {
    let stride = cfg.detection_stride;
    let mut out = vec![0.0; cfg.detection_rows * stride];
    for &(row, score, bbox) in rows {
        let base = row * stride;
        out[base..base + 4].copy_from_slice(&bbox);
        out[base + 4] = score;
    }
    out
}

pub(crate) fn uniform_frame(width: u32, height: u32) -> Frame {
    let data = [90u8, 120, 200, 255].iter().copied().cycle().take((width * height * 4) as usize).collect();
    Frame::from_rgba(width, height, data).expect("fixture dimensions")
}

/// Frame whose pixels depend on position, so rotations are observable.
pub(crate) fn patterned_frame(width: u32, height: u32) -> Frame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8, 255]);
        }
    }
    Frame::from_rgba(width, height, data).expect("fixture dimensions")
}
