use crate::{Candidate, NormalizedBox};

/// Pixel-extent overlap test standing in for non-max suppression.
///
/// A candidate is a duplicate of an accepted box only when the intersection is
/// wider than `min_overlap_px` AND taller than `min_overlap_px`. Neighbouring
/// signs that merely touch or share a thin strip are both kept.
#[derive(Debug, Clone, Copy)]
pub struct OverlapSuppressor {
    pub min_overlap_px: f32,
}

impl Default for OverlapSuppressor {
    fn default() -> Self {
        Self { min_overlap_px: 10.0 }
    }
}

impl OverlapSuppressor {
    pub fn new(min_overlap_px: f32) -> Self {
        Self { min_overlap_px }
    }

    pub fn accepted(&self, candidate: &Candidate, already_accepted: &[Candidate], frame_width: u32, frame_height: u32) -> bool {
        let a = corners(&candidate.bbox, frame_width, frame_height);
        !already_accepted.iter().any(|k| {
            let b = corners(&k.bbox, frame_width, frame_height);
            let (iw, ih) = intersection(a, b);
            iw > self.min_overlap_px && ih > self.min_overlap_px
        })
    }
}

/// `[left, top, right, bottom]` in pixels.
pub(crate) fn corners(b: &NormalizedBox, frame_width: u32, frame_height: u32) -> [f32; 4] {
    let (w, h) = (frame_width as f32, frame_height as f32);
    let (cx, cy) = (b.center_x * w, b.center_y * h);
    let (hw, hh) = (b.width * w / 2.0, b.height * h / 2.0);
    [cx - hw, cy - hh, cx + hw, cy + hh]
}

fn intersection(a: [f32; 4], b: [f32; 4]) -> (f32, f32) {
    let left = a[0].max(b[0]);
    let top = a[1].max(b[1]);
    let right = a[2].min(b[2]);
    let bottom = a[3].min(b[3]);
    ((right - left).max(0.0), (bottom - top).max(0.0))
}
