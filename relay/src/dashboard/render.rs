//! renderer adapter
//!
//! `Frame::build` is the whole pipeline from a sorted buffer to drawable
//! traces: viewport slice, gap segmentation, visible window. Targets only map
//! a finished frame onto a chart library payload; they never touch buffers,
//! and drawing the same frame twice yields the same payload.

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::buffer::Point;
use super::segment::{segment, Trace, TraceStyle};
use super::viewport::{Viewport, VisibleWindow};
use crate::domain::{Metric, TimestampMs};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub metric: Metric,
    pub traces: Vec<Trace>,
    /// none when there is nothing to show
    pub window: Option<VisibleWindow>,
}

impl Frame {
    /// `points` must be ascending by time
    pub fn build(metric: Metric, points: &[Point], viewport: &Viewport, gap_ms: TimestampMs) -> Self {
        let traces = segment(viewport.visible(points), gap_ms);
        let window = viewport.window(points);
        Self { metric, traces, window }
    }

    pub fn point_count(&self) -> usize {
        self.traces
            .iter()
            .filter(|t| t.style == TraceStyle::Solid)
            .map(|t| t.points.len())
            .sum()
    }

    pub fn is_blank(&self) -> bool {
        self.point_count() == 0
    }
}

pub trait RenderTarget {
    fn draw(&mut self, frame: &Frame);
}

// ==============================================================================
// plotly
// ==============================================================================

fn iso(t: TimestampMs) -> String {
    DateTime::from_timestamp_millis(t)
        .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

fn trace_json(metric: Metric, trace: &Trace) -> Value {
    let xs: Vec<String> = trace.points.iter().map(|p| iso(p.t)).collect();
    let ys: Vec<f64> = trace.points.iter().map(|p| p.v).collect();
    let mut out = json!({
        "x": xs,
        "y": ys,
        "type": "scattergl",
        "mode": "lines",
        "line": {
            "color": metric.color(),
            "width": 2,
            "dash": match trace.style {
                TraceStyle::Solid => "solid",
                TraceStyle::Dotted => "dot",
            },
        },
    });
    if trace.is_connector() {
        out["hoverinfo"] = json!("skip");
    }
    out
}

/// `Plotly.react(div, data, layout)` arguments for a frame
pub fn plotly_figure(frame: &Frame) -> Value {
    let data: Vec<Value> = frame.traces.iter().map(|t| trace_json(frame.metric, t)).collect();

    let mut xaxis = json!({ "type": "date", "gridcolor": "#0f3a45" });
    let mut yaxis = json!({ "gridcolor": "#0f3a45", "autorange": true });
    if let Some(w) = frame.window {
        xaxis["range"] = json!([iso(w.start), iso(w.end)]);
        yaxis = json!({ "gridcolor": "#0f3a45", "range": [w.y_min, w.y_max] });
    }

    json!({
        "data": data,
        "layout": {
            "title": { "text": format!("{} ({})", frame.metric.key(), frame.metric.unit()) },
            "plot_bgcolor": "#071923",
            "paper_bgcolor": "#071923",
            "font": { "color": "#eaf6f8" },
            "xaxis": xaxis,
            "yaxis": yaxis,
            "showlegend": false,
        },
    })
}

/// keeps the last figure per chart, optionally mirrored to `<dir>/<metric>.json`
#[derive(Debug, Default)]
pub struct PlotlyTarget {
    figures: BTreeMap<Metric, Value>,
    out_dir: Option<PathBuf>,
    draws: u64,
}

impl PlotlyTarget {
    pub fn new(out_dir: Option<PathBuf>) -> Self {
        Self { figures: BTreeMap::new(), out_dir, draws: 0 }
    }

    pub fn figure(&self, metric: Metric) -> Option<&Value> {
        self.figures.get(&metric)
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl RenderTarget for PlotlyTarget {
    fn draw(&mut self, frame: &Frame) {
        let figure = plotly_figure(frame);
        if let Some(dir) = &self.out_dir {
            let path = dir.join(format!("{}.json", frame.metric.key()));
            if let Err(e) = std::fs::write(&path, figure.to_string()) {
                tracing::warn!("[RENDER] could not write {}: {}", path.display(), e);
            }
        }
        self.figures.insert(frame.metric, figure);
        self.draws += 1;
    }
}
