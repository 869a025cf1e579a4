use image::{imageops, imageops::FilterType, DynamicImage, RgbaImage};

use crate::error::{Result, VisionError};

/// How the sensor's frames relate to the upright scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Frames are already upright.
    #[default]
    Landscape,
    /// Sensor is mounted sideways; frames need a 90° clockwise turn before
    /// inference and the inverse turn afterwards.
    Portrait,
}

/// One RGBA camera or still-image sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pixels: RgbaImage,
}

impl Frame {
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let pixels = RgbaImage::from_raw(width, height, data).ok_or(VisionError::InvalidFrame {
            width,
            height,
            reason: "buffer length does not match dimensions",
        })?;
        Ok(Self { pixels })
    }

    pub fn from_image(img: DynamicImage) -> Self {
        Self { pixels: img.to_rgba8() }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn pixel_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn as_rgba_mut(&mut self) -> &mut RgbaImage {
        &mut self.pixels
    }

    pub fn into_rgba(self) -> RgbaImage {
        self.pixels
    }

    pub fn ensure_not_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(VisionError::InvalidFrame {
                width: self.width(),
                height: self.height(),
                reason: "zero dimension",
            });
        }
        Ok(())
    }

    /// Turn into upright orientation. Portrait frames rotate 90° clockwise.
    pub fn into_upright(self, orientation: Orientation) -> Self {
        match orientation {
            Orientation::Landscape => self,
            Orientation::Portrait => Self {
                pixels: imageops::rotate90(&self.pixels),
            },
        }
    }

    /// Exact inverse of [`Frame::into_upright`].
    pub fn into_sensor(self, orientation: Orientation) -> Self {
        match orientation {
            Orientation::Landscape => self,
            Orientation::Portrait => Self {
                pixels: imageops::rotate270(&self.pixels),
            },
        }
    }

    pub fn resized(&self, width: u32, height: u32, filter: FilterType) -> Self {
        Self {
            pixels: imageops::resize(&self.pixels, width, height, filter),
        }
    }

    /// Copy of the pixel rectangle `[x0, x1) x [y0, y1)`. The rectangle must
    /// already be clamped to the frame.
    pub fn crop(&self, rect: PixelRect) -> Result<Self> {
        if rect.width() <= 0 || rect.height() <= 0 {
            return Err(VisionError::Geometry {
                x0: rect.x0,
                y0: rect.y0,
                x1: rect.x1,
                y1: rect.y1,
            });
        }
        let view = imageops::crop_imm(
            &self.pixels,
            rect.x0 as u32,
            rect.y0 as u32,
            rect.width() as u32,
            rect.height() as u32,
        );
        Ok(Self {
            pixels: view.to_image(),
        })
    }
}

/// Integer pixel rectangle, half-open on the right and bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl PixelRect {
    pub fn width(&self) -> i64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i64 {
        self.y1 - self.y0
    }

    pub fn clamp_to(self, width: u32, height: u32) -> Self {
        let (w, h) = (width as i64, height as i64);
        Self {
            x0: self.x0.clamp(0, w),
            y0: self.y0.clamp(0, h),
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
        }
    }
}
