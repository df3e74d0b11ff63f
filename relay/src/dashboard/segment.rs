//! gap-aware segmentation
//!
//! Splits a time-sorted series into solid runs wherever two consecutive
//! samples are more than `gap_ms` apart, and bridges each split with a
//! two-point dotted connector so data gaps stay visible on the chart.

use serde::Serialize;

use super::buffer::Point;
use crate::domain::TimestampMs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStyle {
    Solid,
    Dotted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub points: Vec<Point>,
    pub style: TraceStyle,
}

impl Trace {
    fn solid(points: Vec<Point>) -> Self {
        Self { points, style: TraceStyle::Solid }
    }

    fn connector(from: Point, to: Point) -> Self {
        Self { points: vec![from, to], style: TraceStyle::Dotted }
    }

    pub fn is_connector(&self) -> bool {
        self.style == TraceStyle::Dotted
    }
}

/// `points` must be ascending by time. Output alternates
/// solid, dotted, solid, ... and always ends with a solid trace; an empty
/// input gives a single empty solid trace.
pub fn segment(points: &[Point], gap_ms: TimestampMs) -> Vec<Trace> {
    let Some((&first, rest)) = points.split_first() else {
        return vec![Trace::solid(Vec::new())];
    };

    let mut traces = Vec::new();
    let mut current = vec![first];
    let mut prev = first;

    for &p in rest {
        if p.t - prev.t > gap_ms {
            traces.push(Trace::solid(std::mem::take(&mut current)));
            traces.push(Trace::connector(prev, p));
        }
        current.push(p);
        prev = p;
    }
    traces.push(Trace::solid(current));
    traces
}

/// number of gaps bridged in a segmented series
pub fn gap_count(traces: &[Trace]) -> usize {
    traces.iter().filter(|t| t.is_connector()).count()
}
