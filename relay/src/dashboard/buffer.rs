//! per-metric series buffers
//!
//! A `SeriesBuffer` is a bounded ring of `(t, v)` points. Live pushes append
//! at the tail and evict from the head once `max_points` is exceeded;
//! historical loads replace or merge whole windows. Readers always get
//! points sorted by time, whatever order they arrived in.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::domain::{Metric, SensorReading, TimestampMs};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub t: TimestampMs,
    pub v: f64,
}

impl Point {
    pub fn new(t: TimestampMs, v: f64) -> Self {
        Self { t, v }
    }
}

#[derive(Debug, Clone)]
pub struct SeriesBuffer {
    points: VecDeque<Point>,
    max_points: usize,
    /// false once an append arrived older than the tail
    sorted: bool,
}

impl SeriesBuffer {
    pub fn new(max_points: usize) -> Self {
        let max_points = max_points.max(1);
        Self {
            points: VecDeque::with_capacity(max_points.min(4096)),
            max_points,
            sorted: true,
        }
    }

    /// no eviction; sized by whatever window is installed
    pub fn unbounded() -> Self {
        Self { points: VecDeque::new(), max_points: usize::MAX, sorted: true }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.sorted = true;
    }

    /// O(1) for in-order points: push to the tail, evict from the head when
    /// over capacity. a timestamp already held keeps its value; returns
    /// false in that case
    pub fn append(&mut self, t: TimestampMs, v: f64) -> bool {
        if self.holds(t) {
            return false;
        }
        if self.points.back().is_some_and(|last| t < last.t) {
            self.sorted = false;
        }
        self.points.push_back(Point::new(t, v));
        while self.points.len() > self.max_points {
            self.points.pop_front();
        }
        true
    }

    fn holds(&self, t: TimestampMs) -> bool {
        match self.points.back() {
            None => false,
            Some(last) if self.sorted && t > last.t => false,
            Some(last) if t == last.t => true,
            _ if self.sorted => self.points.binary_search_by_key(&t, |p| p.t).is_ok(),
            _ => self.points.iter().any(|p| p.t == t),
        }
    }

    /// replace the contents with `points`, keeping the newest `max_points`
    pub fn replace_range<I>(&mut self, points: I)
    where
        I: IntoIterator<Item = Point>,
    {
        let by_time: BTreeMap<TimestampMs, f64> = points.into_iter().map(|p| (p.t, p.v)).collect();
        self.install(by_time);
    }

    /// merge a historical window into what is already buffered; a timestamp
    /// already present keeps its buffered value. returns how many points
    /// were new
    pub fn merge<I>(&mut self, points: I) -> usize
    where
        I: IntoIterator<Item = Point>,
    {
        let mut by_time: BTreeMap<TimestampMs, f64> =
            self.points.iter().map(|p| (p.t, p.v)).collect();
        let before = by_time.len();
        for p in points {
            by_time.entry(p.t).or_insert(p.v);
        }
        let added = by_time.len() - before;
        self.install(by_time);
        added
    }

    fn install(&mut self, by_time: BTreeMap<TimestampMs, f64>) {
        let skip = by_time.len().saturating_sub(self.max_points);
        self.points = by_time
            .into_iter()
            .skip(skip)
            .map(|(t, v)| Point::new(t, v))
            .collect();
        self.sorted = true;
    }

    /// every buffered point, ascending by time
    pub fn sorted_points(&self) -> Vec<Point> {
        let mut out: Vec<Point> = self.points.iter().copied().collect();
        if !self.sorted {
            out.sort_by_key(|p| p.t);
        }
        out
    }

    /// points with `start <= t <= end`, ascending
    pub fn window(&self, start: TimestampMs, end: TimestampMs) -> Vec<Point> {
        self.sorted_points()
            .into_iter()
            .filter(|p| p.t >= start && p.t <= end)
            .collect()
    }

    /// newest `n` points by time, ascending
    pub fn tail(&self, n: usize) -> Vec<Point> {
        let mut all = self.sorted_points();
        let from = all.len().saturating_sub(n);
        all.split_off(from)
    }

    pub fn newest(&self) -> Option<Point> {
        if self.sorted {
            self.points.back().copied()
        } else {
            self.points.iter().copied().max_by_key(|p| p.t)
        }
    }
}

/// one buffer per metric
#[derive(Debug, Clone)]
pub struct MetricBuffers {
    /// indexed by `Metric::index`
    buffers: Vec<SeriesBuffer>,
}

impl MetricBuffers {
    pub fn new(max_points: usize) -> Self {
        Self {
            buffers: Metric::ALL.iter().map(|_| SeriesBuffer::new(max_points)).collect(),
        }
    }

    pub fn get(&self, metric: Metric) -> &SeriesBuffer {
        &self.buffers[metric.index()]
    }

    pub fn get_mut(&mut self, metric: Metric) -> &mut SeriesBuffer {
        &mut self.buffers[metric.index()]
    }

    /// append every metric the reading carries; returns the metrics that
    /// gained a point
    pub fn ingest(&mut self, reading: &SensorReading) -> Vec<Metric> {
        let t = reading.timestamp_ms();
        let mut touched = Vec::new();
        for metric in Metric::ALL {
            if let Some(v) = reading.value(metric) {
                if self.get_mut(metric).append(t, v) {
                    touched.push(metric);
                }
            }
        }
        touched
    }

    /// merge a batch of readings (seed or historical load) into every metric
    pub fn merge_readings(&mut self, readings: &[SensorReading]) {
        for metric in Metric::ALL {
            let points = points_for(metric, readings);
            if !points.is_empty() {
                self.get_mut(metric).merge(points);
            }
        }
    }
}

/// project one metric out of a batch of readings, skipping nulls
pub fn points_for(metric: Metric, readings: &[SensorReading]) -> Vec<Point> {
    readings
        .iter()
        .filter_map(|r| r.value(metric).map(|v| Point::new(r.timestamp_ms(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(points: &[Point]) -> Vec<TimestampMs> {
        points.iter().map(|p| p.t).collect()
    }

    #[test]
    fn test_append_evicts_oldest() {
        let mut buf = SeriesBuffer::new(3);
        for t in 0..5 {
            buf.append(t, t as f64);
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(times(&buf.sorted_points()), vec![2, 3, 4]);
    }

    #[test]
    fn test_out_of_order_appends_are_sorted_on_read() {
        let mut buf = SeriesBuffer::new(10);
        buf.append(30, 3.0);
        buf.append(10, 1.0);
        buf.append(20, 2.0);
        assert_eq!(times(&buf.sorted_points()), vec![10, 20, 30]);
        assert_eq!(buf.newest(), Some(Point::new(30, 3.0)));
        assert_eq!(times(&buf.tail(2)), vec![20, 30]);
    }

    #[test]
    fn test_append_skips_timestamps_already_held() {
        let mut buf = SeriesBuffer::new(10);
        assert!(buf.append(10, 1.0));
        assert!(buf.append(20, 2.0));
        assert!(!buf.append(20, 99.0));
        assert!(!buf.append(10, 99.0));
        assert!(buf.append(15, 1.5));
        // unsorted now, still found
        assert!(!buf.append(15, 99.0));
        assert_eq!(
            buf.sorted_points(),
            vec![Point::new(10, 1.0), Point::new(15, 1.5), Point::new(20, 2.0)]
        );
    }

    #[test]
    fn test_replace_range_keeps_newest() {
        let mut buf = SeriesBuffer::new(2);
        buf.append(1, 1.0);
        buf.replace_range(vec![Point::new(9, 9.0), Point::new(5, 5.0), Point::new(7, 7.0)]);
        assert_eq!(times(&buf.sorted_points()), vec![7, 9]);
    }

    #[test]
    fn test_merge_deduplicates_by_timestamp() {
        let mut buf = SeriesBuffer::new(10);
        buf.append(100, 1.0);
        buf.append(200, 2.0);

        // a rest window that overlaps a pushed point
        let added = buf.merge(vec![Point::new(50, 0.5), Point::new(200, 99.0)]);
        assert_eq!(added, 1);
        assert_eq!(
            buf.sorted_points(),
            vec![Point::new(50, 0.5), Point::new(100, 1.0), Point::new(200, 2.0)]
        );
    }

    #[test]
    fn test_window_is_inclusive() {
        let mut buf = SeriesBuffer::new(10);
        for t in [0, 10, 20, 30] {
            buf.append(t, 0.0);
        }
        assert_eq!(times(&buf.window(10, 20)), vec![10, 20]);
        assert!(buf.window(40, 50).is_empty());
    }

    #[test]
    fn test_metric_buffers_skip_nulls() {
        let mut buffers = MetricBuffers::new(10);
        let reading = SensorReading::at_millis(1_000)
            .with(Metric::Humidity, 40.0)
            .with(Metric::Ph, 6.1);

        let touched = buffers.ingest(&reading);
        assert_eq!(touched, vec![Metric::Humidity, Metric::Ph]);
        assert_eq!(buffers.get(Metric::Humidity).len(), 1);
        assert!(buffers.get(Metric::Temperature).is_empty());
    }
}
