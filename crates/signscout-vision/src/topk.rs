use serde::Deserialize;

use crate::{Candidate, NormalizedBox};

/// Column layout of one detection row: `cx, cy, w, h, score, ...`.
pub const SCORE_COLUMN: usize = 4;
pub const MIN_ROW_STRIDE: usize = SCORE_COLUMN + 1;

/// How a row already chosen in an earlier pass is excluded from later passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Exclude by row index. Rows with identical scores are all selectable.
    #[default]
    RowIndex,
    /// Exclude every row whose score equals an already selected score.
    /// A second detection with a bit-identical score is never returned.
    ScoreValue,
}

/// Pick up to `k` rows with `score >= threshold` in descending score order.
///
/// Each pass is one linear scan keeping the first strictly greater score, so
/// among equal scores the lowest row index is returned first. No sort of the
/// full tensor takes place. A trailing partial row is ignored.
pub fn select(rows: &[f32], stride: usize, k: usize, threshold: f32, tie_break: TieBreak) -> Vec<Candidate> {
    if stride < MIN_ROW_STRIDE {
        return Vec::new();
    }
    let n = rows.len() / stride;
    let mut taken = vec![false; n];
    let mut out: Vec<Candidate> = Vec::with_capacity(k);

    for _ in 0..k {
        let mut best: Option<(usize, f32)> = None;
        for (i, row) in rows.chunks_exact(stride).enumerate() {
            let score = row[SCORE_COLUMN];
            if score.is_nan() || score < threshold {
                continue;
            }
            let excluded = match tie_break {
                TieBreak::RowIndex => taken[i],
                TieBreak::ScoreValue => out.iter().any(|c| c.score == score),
            };
            if excluded {
                continue;
            }
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }

        let Some((i, score)) = best else { break };
        taken[i] = true;
        let row = &rows[i * stride..(i + 1) * stride];
        out.push(Candidate {
            score,
            bbox: NormalizedBox {
                center_x: row[0],
                center_y: row[1],
                width: row[2],
                height: row[3],
            },
        });
    }
    out
}
