//! Human-readable result lines for list views and text export.

use crate::fusion::FusionReport;
use crate::labels::LabelTable;
use crate::Annotation;

/// `"(<pct>%)"` with two decimals.
pub fn confidence_text(a: &Annotation) -> String {
    format!("({:.2}%)", a.recognition.class_confidence * 100.0)
}

/// `"<class> (<pct>%)"`.
pub fn annotation_line(a: &Annotation, labels: &LabelTable) -> String {
    format!("{} {}", labels.display_name(a.recognition.class_index), confidence_text(a))
}

/// Full listing for a still image: a count header, one line per sign in
/// annotation order, and a trailing total latency line.
pub fn result_lines(report: &FusionReport, labels: &LabelTable) -> Vec<String> {
    let mut lines = Vec::with_capacity(report.annotations.len() + 2);
    lines.push(format!("Number of detected signs: {}", report.annotations.len()));
    lines.extend(report.annotations.iter().map(|a| annotation_line(a, labels)));
    lines.push(format!("Total latency: {} ms", report.latency.total_ms()));
    lines
}

/// Compact summary for a live preview: sign count, pass latency and the
/// preview's measured frame rate.
pub fn live_summary(report: &FusionReport, fps: f32) -> Vec<String> {
    vec![
        format!("{} signs", report.annotations.len()),
        format!("{} ms", report.latency.total_ms()),
        format!("FPS: {:.2}", fps),
    ]
}
