use std::fmt;

/// Which model a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detection,
    Recognition,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Detection => f.write_str("detection"),
            Stage::Recognition => f.write_str("recognition"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum VisionError {
    #[error("invalid frame {width}x{height}: {reason}")]
    InvalidFrame {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    #[error("{stage} inference failed: {reason}")]
    Inference { stage: Stage, reason: String },

    /// Crop rectangle collapsed after padding and clamping. Recovered inside
    /// the fusion pass by skipping the candidate.
    #[error("degenerate crop [{x0}, {y0}, {x1}, {y1}]")]
    Geometry { x0: i64, y0: i64, x1: i64, y1: i64 },

    #[error("label table: {0}")]
    Labels(String),
}

impl VisionError {
    pub(crate) fn inference(stage: Stage, err: impl fmt::Display) -> Self {
        VisionError::Inference {
            stage,
            reason: err.to_string(),
        }
    }
}

pub type Result<T, E = VisionError> = std::result::Result<T, E>;
