//! ==============================================================================
//! viewport.rs - live / historical view state per chart
//! ==============================================================================
//!
//! ```text
//!        zoom / pan / slider                 "latest"
//!     Live ───────────────────► Historical ───────────► Live
//!      ▲  tracks newest points   pinned window [start, end]
//!      └── trailing window (last n points) optional
//! ```
//!
//! rules:
//!     - any navigation freezes auto-tracking
//!     - y autorange is computed from the points inside the visible x window
//!       only, never from the whole buffer
//!     - every navigation bumps a generation; async range loads tagged with
//!       an older generation are stale and get dropped
//!
//! ==============================================================================

use serde::Serialize;
use std::time::{Duration, Instant};

use super::buffer::Point;
use crate::domain::TimestampMs;

const DAY_MS: TimestampMs = 24 * 60 * 60 * 1000;

/// extra range fetched on each side of a zoom window
const FETCH_PAD_FRACTION: f64 = 0.15;
const FETCH_PAD_MAX_MS: TimestampMs = 7 * DAY_MS;

const Y_PAD_FRACTION: f64 = 0.06;
const Y_FLAT_PAD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VisibleWindow {
    pub start: TimestampMs,
    pub end: TimestampMs,
    pub y_min: f64,
    pub y_max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Historical { start: TimestampMs, end: TimestampMs },
}

#[derive(Debug, Clone)]
pub struct Viewport {
    mode: Mode,
    /// live mode shows only the newest n points when set
    trailing: Option<usize>,
    generation: u64,
}

impl Viewport {
    pub fn new(trailing: Option<usize>) -> Self {
        Self { mode: Mode::Live, trailing, generation: 0 }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        self.mode == Mode::Live
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn trailing(&self) -> Option<usize> {
        self.trailing
    }

    /// pin the view to `[start, end]`; returns the new generation
    pub fn navigate(&mut self, start: TimestampMs, end: TimestampMs) -> u64 {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        self.mode = Mode::Historical { start, end };
        self.bump()
    }

    /// back to auto-tracking, optionally with a new trailing window
    pub fn go_live(&mut self, trailing: Option<usize>) -> u64 {
        self.mode = Mode::Live;
        if trailing.is_some() {
            self.trailing = trailing;
        }
        self.bump()
    }

    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// slice of `points` (ascending) the chart should draw
    pub fn visible<'a>(&self, points: &'a [Point]) -> &'a [Point] {
        match self.mode {
            Mode::Live => match self.trailing {
                Some(n) if n > 0 => &points[points.len().saturating_sub(n)..],
                _ => points,
            },
            Mode::Historical { start, end } => {
                let lo = points.partition_point(|p| p.t < start);
                let hi = points.partition_point(|p| p.t <= end).max(lo);
                &points[lo..hi]
            }
        }
    }

    /// x range and y autorange for what `visible` returns
    pub fn window(&self, points: &[Point]) -> Option<VisibleWindow> {
        let (start, end) = match self.mode {
            Mode::Historical { start, end } => (start, end),
            Mode::Live => {
                let shown = self.visible(points);
                (shown.first()?.t, shown.last()?.t)
            }
        };
        let (y_min, y_max) = y_autorange(points, start, end).unwrap_or((0.0, 1.0));
        Some(VisibleWindow { start, end, y_min, y_max })
    }
}

/// y bounds from the points with `start <= t <= end`, padded.
/// `None` when nothing finite falls in the window
pub fn y_autorange(points: &[Point], start: TimestampMs, end: TimestampMs) -> Option<(f64, f64)> {
    let (lo, hi) = points
        .iter()
        .filter(|p| p.t >= start && p.t <= end && p.v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, p| match acc {
            None => Some((p.v, p.v)),
            Some((lo, hi)) => Some((lo.min(p.v), hi.max(p.v))),
        })?;

    let span = hi - lo;
    let pad = if span > 0.0 { span * Y_PAD_FRACTION } else { Y_FLAT_PAD };
    Some((lo - pad, hi + pad))
}

/// widen a zoom window before fetching so small pans do not hit the relay
pub fn fetch_padding(start: TimestampMs, end: TimestampMs) -> (TimestampMs, TimestampMs) {
    let span = end.saturating_sub(start).max(0);
    let pad = ((span as f64 * FETCH_PAD_FRACTION) as TimestampMs).min(FETCH_PAD_MAX_MS);
    (start.saturating_sub(pad).max(0), end.saturating_add(pad))
}

// ==============================================================================
// debounce
// ==============================================================================
// rapid relayout events collapse into the last one once the interval has
// passed without a newer event.

#[derive(Debug)]
pub struct Debouncer<T> {
    interval: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> Debouncer<T> {
    pub fn new(interval: Duration) -> Self {
        Self { interval, pending: None }
    }

    /// replace whatever is pending and restart the interval
    pub fn push(&mut self, now: Instant, item: T) {
        self.pending = Some((now + self.interval, item));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(at, _)| *at)
    }

    pub fn take_ready(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((at, _)) if *at <= now => self.pending.take().map(|(_, item)| item),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(raw: &[(TimestampMs, f64)]) -> Vec<Point> {
        raw.iter().map(|&(t, v)| Point::new(t, v)).collect()
    }

    #[test]
    fn test_zoom_autorange_uses_only_visible_points() {
        let points = pts(&[(0, 1000.0), (10, 2.0), (20, 4.0), (30, -500.0)]);
        let (lo, hi) = y_autorange(&points, 10, 20).unwrap();
        assert!(lo < 2.0 && lo > 1.0);
        assert!(hi > 4.0 && hi < 5.0);

        let mut vp = Viewport::new(None);
        vp.navigate(10, 20);
        let w = vp.window(&points).unwrap();
        assert_eq!((w.start, w.end), (10, 20));
        assert_eq!((w.y_min, w.y_max), (lo, hi));
    }

    #[test]
    fn test_flat_series_gets_absolute_pad() {
        let points = pts(&[(0, 6.8), (1, 6.8)]);
        assert_eq!(y_autorange(&points, 0, 1), Some((5.8, 7.8)));
        assert_eq!(y_autorange(&points, 5, 9), None);
    }

    #[test]
    fn test_navigation_bumps_generation() {
        let mut vp = Viewport::new(Some(15));
        assert!(vp.is_live());

        let g1 = vp.navigate(100, 50);
        assert_eq!(vp.mode(), Mode::Historical { start: 50, end: 100 });
        let g2 = vp.navigate(60, 70);
        assert!(!vp.is_current(g1));
        assert!(vp.is_current(g2));

        vp.go_live(None);
        assert!(vp.is_live());
        assert_eq!(vp.trailing(), Some(15));
        assert!(!vp.is_current(g2));
    }

    #[test]
    fn test_live_trailing_window() {
        let points = pts(&[(0, 0.0), (1, 1.0), (2, 2.0), (3, 3.0)]);
        let vp = Viewport::new(Some(2));
        assert_eq!(vp.visible(&points), &points[2..]);
        let w = vp.window(&points).unwrap();
        assert_eq!((w.start, w.end), (2, 3));

        assert!(Viewport::new(None).window(&[]).is_none());
    }

    #[test]
    fn test_fetch_padding() {
        assert_eq!(fetch_padding(1000, 2000), (850, 2150));
        // capped at a week, clamped at the epoch
        let (s, e) = fetch_padding(0, 100 * DAY_MS);
        assert_eq!(s, 0);
        assert_eq!(e, 107 * DAY_MS);

        // bounds typed in by hand can be anything
        assert_eq!(fetch_padding(0, TimestampMs::MAX), (0, TimestampMs::MAX));
        assert_eq!(fetch_padding(TimestampMs::MIN, 0).0, 0);
    }

    #[test]
    fn test_debouncer_keeps_last_event() {
        let start = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(40));
        d.push(start, 1);
        d.push(start + Duration::from_millis(10), 2);

        assert_eq!(d.take_ready(start + Duration::from_millis(45)), None);
        assert_eq!(d.take_ready(start + Duration::from_millis(50)), Some(2));
        assert_eq!(d.take_ready(start + Duration::from_millis(100)), None);
    }
}
