use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::export;
use crate::frame::Frame;
use crate::fusion::FusionReport;
use crate::labels::LabelTable;
use crate::{suppress, Annotation, NormalizedBox};

const FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

#[derive(Debug, Clone, Copy)]
pub struct OverlayStyle {
    pub color: Rgba<u8>,
    pub thickness: u32,
    pub text_color: Rgba<u8>,
    /// Label height in pixels; `None` draws boxes only.
    pub text_scale: Option<f32>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: Rgba([250, 153, 28, 255]),
            thickness: 2,
            text_color: Rgba([28, 118, 143, 255]),
            text_scale: Some(16.0),
        }
    }
}

/// Draws boxes with class name and confidence onto frames.
pub struct Overlay {
    style: OverlayStyle,
    font: FontArc,
}

impl Overlay {
    pub fn new(style: OverlayStyle) -> Result<Self> {
        let font = FontArc::try_from_slice(FONT).context("load overlay font")?;
        Ok(Self { style, font })
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Draw every annotation of `report` onto `frame`.
    ///
    /// Boxes are positioned on the upright frame, so portrait frames are
    /// turned upright, drawn on, and turned back. The returned frame has the
    /// input's dimensions and orientation.
    pub fn draw(&self, frame: Frame, report: &FusionReport, labels: &LabelTable) -> Frame {
        if report.annotations.is_empty() || frame.is_empty() {
            return frame;
        }

        let mut upright = frame.into_upright(report.orientation);
        let (w, h) = (upright.width(), upright.height());
        let canvas = upright.as_rgba_mut();

        for a in &report.annotations {
            let Some(bounds) = pixel_bounds(&a.bbox, w, h) else { continue };
            self.draw_box(canvas, bounds);
            if let Some(scale) = self.style.text_scale {
                self.draw_label(canvas, bounds, a, labels, scale);
            }
        }

        upright.into_sensor(report.orientation)
    }

    fn draw_box(&self, canvas: &mut RgbaImage, [x0, y0, x1, y1]: [i32; 4]) {
        for i in 0..self.style.thickness.min(i32::MAX as u32) as i32 {
            let (rw, rh) = (x1 - x0 - 2 * i, y1 - y0 - 2 * i);
            if rw < 1 || rh < 1 {
                break;
            }
            let rect = Rect::at(x0 + i, y0 + i).of_size(rw as u32, rh as u32);
            draw_hollow_rect_mut(canvas, rect, self.style.color);
        }
    }

    /// Class name on one line and `(xx.xx%)` below it, both above the box.
    fn draw_label(
        &self,
        canvas: &mut RgbaImage,
        [x0, y0, _, _]: [i32; 4],
        a: &Annotation,
        labels: &LabelTable,
        scale: f32,
    ) {
        let line = scale.ceil() as i32 + 2;
        let px = PxScale::from(scale);
        let name = labels.display_name(a.recognition.class_index);
        draw_text_mut(canvas, self.style.text_color, x0, (y0 - 2 * line).max(0), px, &self.font, &name);
        let pct = export::confidence_text(a);
        draw_text_mut(canvas, self.style.text_color, x0, (y0 - line).max(0), px, &self.font, &pct);
    }
}

/// Box corners rounded and clamped to a `width x height` canvas as
/// `[x0, y0, x1, y1]`, half-open. `None` when nothing of the box is visible.
fn pixel_bounds(bbox: &NormalizedBox, width: u32, height: u32) -> Option<[i32; 4]> {
    let [left, top, right, bottom] = suppress::corners(bbox, width, height);
    let clamp = |v: f32, max: u32| if v.is_nan() { 0 } else { v.round().clamp(0.0, max as f32) as i32 };
    let (x0, y0) = (clamp(left, width), clamp(top, height));
    let (x1, y1) = (clamp(right, width), clamp(bottom, height));
    (x1 > x0 && y1 > y0).then_some([x0, y0, x1, y1])
}
