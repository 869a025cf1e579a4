//! Frame to model-input conversion.
//!
//! Pixels are sampled nearest-neighbour to a square `target x target` grid,
//! alpha is dropped, and values are written in NHWC order with R, G, B per
//! pixel. Float models get `value / 255`; quantized models get raw bytes.

use image::imageops::FilterType;
use serde::Deserialize;

use crate::engine::Tensor;
use crate::error::{Result, VisionError};
use crate::frame::Frame;

const RGB_CHANNELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Float32,
    Quantized,
}

/// Shape of an encoded input: `[1, target, target, 3]`.
pub fn input_shape(target: u32) -> [usize; 4] {
    [1, target as usize, target as usize, RGB_CHANNELS]
}

pub fn encode(frame: &Frame, target: u32, precision: Precision) -> Result<Tensor> {
    if frame.is_empty() || target == 0 {
        return Err(VisionError::InvalidFrame {
            width: frame.width(),
            height: frame.height(),
            reason: "cannot encode empty frame",
        });
    }

    let scaled = if frame.width() == target && frame.height() == target {
        frame.clone()
    } else {
        frame.resized(target, target, FilterType::Nearest)
    };

    let shape = input_shape(target);
    let n = target as usize * target as usize * RGB_CHANNELS;
    let pixels = scaled.as_rgba().pixels();

    let tensor = match precision {
        Precision::Float32 => {
            let mut out = Vec::with_capacity(n);
            for p in pixels {
                out.push(p[0] as f32 / 255.0);
                out.push(p[1] as f32 / 255.0);
                out.push(p[2] as f32 / 255.0);
            }
            Tensor::f32(&shape, out)
        }
        Precision::Quantized => {
            let mut out = Vec::with_capacity(n);
            for p in pixels {
                out.extend_from_slice(&p.0[..RGB_CHANNELS]);
            }
            Tensor::u8(&shape, out)
        }
    };

    tensor.map_err(|_| VisionError::InvalidFrame {
        width: frame.width(),
        height: frame.height(),
        reason: "encoded length mismatch",
    })
}
