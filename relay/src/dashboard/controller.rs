//! ==============================================================================
//! controller.rs - dashboard controller and per-chart contexts
//! ==============================================================================
//!
//! purpose:
//!     owns every piece of client state: the live buffers, one ChartContext
//!     per metric, the last gps fix and the freshness clock. nothing here is
//!     async; the driver feeds it events and executes the commands it returns.
//!
//! ```text
//!     push event ──► on_push ──► live buffers ──► redraw live charts
//!     interaction ─► dispatch ─► viewport ──────► redraw + FetchRange
//!     fetch result ► apply_range (generation checked) ► redraw
//! ```
//!
//! historical charts draw from their own window buffer, so live pushes land
//! in the live buffers without moving a chart the user has navigated away.
//!
//! ==============================================================================

use crate::config::DashboardConfig;
use crate::domain::{GeoPoint, Metric, PushEvent, SensorReading, TimestampMs};

use super::buffer::{points_for, MetricBuffers, SeriesBuffer};
use super::render::Frame;
use super::viewport::{fetch_padding, Mode, Viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Zoom { start: TimestampMs, end: TimestampMs },
    Pan { start: TimestampMs, end: TimestampMs },
    Slider { start: TimestampMs, end: TimestampMs },
    ShowLatest,
    ShowLastN(usize),
}

impl Interaction {
    /// interactions that move the x window and should be debounced
    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            Interaction::Zoom { .. } | Interaction::Pan { .. } | Interaction::Slider { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Redraw(Metric),
    FetchRange {
        metric: Metric,
        start: TimestampMs,
        end: TimestampMs,
        generation: u64,
    },
}

#[derive(Debug, Clone)]
pub struct ChartContext {
    metric: Metric,
    viewport: Viewport,
    /// every point of the pinned historical window, uncapped
    history: SeriesBuffer,
    frame: Frame,
}

impl ChartContext {
    fn new(metric: Metric, trailing: Option<usize>) -> Self {
        let viewport = Viewport::new(trailing);
        let frame = Frame::build(metric, &[], &viewport, 0);
        Self { metric, viewport, history: SeriesBuffer::unbounded(), frame }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

pub struct Dashboard {
    live: MetricBuffers,
    /// indexed by `Metric::index`
    charts: Vec<ChartContext>,
    gap_ms: TimestampMs,
    freshness_timeout_ms: TimestampMs,
    last_message: Option<TimestampMs>,
    position: Option<GeoPoint>,
}

impl Dashboard {
    pub fn new(config: &DashboardConfig) -> Self {
        let trailing = Some(config.trailing_points).filter(|n| *n > 0);
        Self {
            live: MetricBuffers::new(config.max_points),
            charts: Metric::ALL
                .iter()
                .map(|&m| ChartContext::new(m, trailing))
                .collect(),
            gap_ms: config.gap_ms,
            freshness_timeout_ms: config.freshness_timeout_ms,
            last_message: None,
            position: None,
        }
    }

    pub fn chart(&self, metric: Metric) -> &ChartContext {
        &self.charts[metric.index()]
    }

    pub fn frame(&self, metric: Metric) -> &Frame {
        &self.chart(metric).frame
    }

    pub fn live_buffer(&self, metric: Metric) -> &SeriesBuffer {
        self.live.get(metric)
    }

    pub fn position(&self) -> Option<GeoPoint> {
        self.position
    }

    /// true while the last push arrived within the freshness timeout
    pub fn is_fresh(&self, now: TimestampMs) -> bool {
        self.last_message
            .is_some_and(|last| now - last <= self.freshness_timeout_ms)
    }

    fn rebuild(&mut self, metric: Metric) {
        let gap_ms = self.gap_ms;
        let chart = &mut self.charts[metric.index()];
        let points = match chart.viewport.mode() {
            Mode::Live => self.live.get(metric).sorted_points(),
            Mode::Historical { .. } => chart.history.sorted_points(),
        };
        chart.frame = Frame::build(metric, &points, &chart.viewport, gap_ms);
    }

    fn rebuild_live_charts(&mut self, metrics: &[Metric]) -> Vec<Metric> {
        let live: Vec<Metric> = metrics
            .iter()
            .copied()
            .filter(|m| self.chart(*m).viewport.is_live())
            .collect();
        for &m in &live {
            self.rebuild(m);
        }
        live
    }

    /// initial window or any bulk load into the live buffers
    pub fn seed(&mut self, readings: &[SensorReading]) -> Vec<Metric> {
        self.live.merge_readings(readings);
        self.rebuild_live_charts(&Metric::ALL)
    }

    /// seed a single chart from a per-metric range load
    pub fn seed_metric(&mut self, metric: Metric, readings: &[SensorReading]) -> Vec<Metric> {
        self.live.get_mut(metric).merge(points_for(metric, readings));
        self.rebuild_live_charts(&[metric])
    }

    /// returns the charts that need redrawing
    pub fn on_push(&mut self, event: PushEvent, now: TimestampMs) -> Vec<Metric> {
        self.last_message = Some(now);
        match event {
            PushEvent::Historico(readings) => {
                if let Some(fix) = readings.iter().rev().find_map(SensorReading::position) {
                    self.position = Some(fix);
                }
                self.seed(&readings)
            }
            PushEvent::NuevoDato(reading) => {
                if let Some(fix) = reading.position() {
                    self.position = Some(fix);
                }
                let touched = self.live.ingest(&reading);
                self.rebuild_live_charts(&touched)
            }
        }
    }

    pub fn dispatch(&mut self, metric: Metric, interaction: Interaction) -> Vec<Command> {
        match interaction {
            Interaction::Zoom { start, end }
            | Interaction::Pan { start, end }
            | Interaction::Slider { start, end } => self.navigate(metric, start, end),
            Interaction::ShowLatest => self.show_live(metric, None),
            Interaction::ShowLastN(n) => self.show_live(metric, Some(n)),
        }
    }

    fn navigate(&mut self, metric: Metric, start: TimestampMs, end: TimestampMs) -> Vec<Command> {
        let chart = &mut self.charts[metric.index()];
        let generation = chart.viewport.navigate(start, end);
        let (fetch_start, fetch_end) = match chart.viewport.mode() {
            Mode::Historical { start, end } => fetch_padding(start, end),
            Mode::Live => (start, end),
        };

        // draw what is already buffered right away, the fetch fills the rest
        let known = self.live.get(metric).window(fetch_start, fetch_end);
        chart.history.replace_range(known);
        self.rebuild(metric);

        vec![
            Command::Redraw(metric),
            Command::FetchRange { metric, start: fetch_start, end: fetch_end, generation },
        ]
    }

    fn show_live(&mut self, metric: Metric, trailing: Option<usize>) -> Vec<Command> {
        let chart = &mut self.charts[metric.index()];
        chart.viewport.go_live(trailing);
        chart.history.clear();
        self.rebuild(metric);
        vec![Command::Redraw(metric)]
    }

    /// install a fetched window; false when the chart has moved on since
    pub fn apply_range(&mut self, metric: Metric, generation: u64, readings: &[SensorReading]) -> bool {
        let chart = &mut self.charts[metric.index()];
        if chart.viewport.is_live() || !chart.viewport.is_current(generation) {
            tracing::debug!(%metric, generation, "[DASHBOARD] dropping stale range");
            return false;
        }
        chart.history.merge(points_for(metric, readings));
        self.rebuild(metric);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DashboardConfig {
        DashboardConfig {
            max_points: 100,
            gap_ms: 1000,
            trailing_points: 0,
            freshness_timeout_ms: 5000,
            ..Default::default()
        }
    }

    fn temp(t: TimestampMs, v: f64) -> SensorReading {
        SensorReading::at_millis(t).with(Metric::Temperature, v)
    }

    #[test]
    fn test_live_push_redraws_only_touched_charts() {
        let mut dash = Dashboard::new(&config());
        let redrawn = dash.on_push(PushEvent::NuevoDato(temp(0, 20.0)), 0);
        assert_eq!(redrawn, vec![Metric::Temperature]);
        assert_eq!(dash.frame(Metric::Temperature).point_count(), 1);
        assert!(dash.frame(Metric::Humidity).is_blank());
    }

    #[test]
    fn test_push_while_historical_does_not_move_the_chart() {
        let mut dash = Dashboard::new(&config());
        dash.seed(&[temp(0, 1.0), temp(100, 2.0), temp(200, 3.0)]);

        dash.dispatch(Metric::Temperature, Interaction::Zoom { start: 0, end: 150 });
        let pinned = dash.frame(Metric::Temperature).clone();
        assert_eq!(pinned.point_count(), 2);

        let redrawn = dash.on_push(PushEvent::NuevoDato(temp(120, 50.0)), 300);
        assert!(redrawn.is_empty());
        assert_eq!(dash.live_buffer(Metric::Temperature).len(), 4);
        assert_eq!(dash.frame(Metric::Temperature), &pinned);

        dash.dispatch(Metric::Temperature, Interaction::ShowLatest);
        assert_eq!(dash.frame(Metric::Temperature).point_count(), 4);
    }

    #[test]
    fn test_zoom_recomputes_y_from_window_only() {
        let mut dash = Dashboard::new(&config());
        dash.seed(&[temp(0, -100.0), temp(10, 5.0), temp(20, 6.0), temp(30, 900.0)]);

        dash.dispatch(Metric::Temperature, Interaction::Zoom { start: 10, end: 20 });
        let window = dash.frame(Metric::Temperature).window.unwrap();
        assert!(window.y_min > 4.0 && window.y_min < 5.0);
        assert!(window.y_max > 6.0 && window.y_max < 7.0);
    }

    #[test]
    fn test_stale_range_results_are_dropped() {
        let mut dash = Dashboard::new(&config());
        let first = dash.dispatch(Metric::Ph, Interaction::Pan { start: 0, end: 1000 });
        let Command::FetchRange { generation: g1, .. } = first[1] else {
            panic!("expected a fetch");
        };
        let second = dash.dispatch(Metric::Ph, Interaction::Zoom { start: 0, end: 500 });
        let Command::FetchRange { generation: g2, start, end, .. } = second[1] else {
            panic!("expected a fetch");
        };
        assert_eq!((start, end), (0, 575));

        let data = [SensorReading::at_millis(100).with(Metric::Ph, 6.0)];
        assert!(!dash.apply_range(Metric::Ph, g1, &data));
        assert!(dash.frame(Metric::Ph).is_blank());
        assert!(dash.apply_range(Metric::Ph, g2, &data));
        assert_eq!(dash.frame(Metric::Ph).point_count(), 1);

        dash.dispatch(Metric::Ph, Interaction::ShowLatest);
        assert!(!dash.apply_range(Metric::Ph, g2, &data));
    }

    #[test]
    fn test_historical_window_keeps_every_point() {
        let mut dash = Dashboard::new(&config());
        let Command::FetchRange { generation, .. } =
            dash.dispatch(Metric::Temperature, Interaction::Zoom { start: 0, end: 299 })[1]
        else {
            panic!("expected a fetch");
        };

        // three times the live capacity
        let readings: Vec<_> = (0..300).map(|t| temp(t, t as f64)).collect();
        assert!(dash.apply_range(Metric::Temperature, generation, &readings));

        let frame = dash.frame(Metric::Temperature);
        assert_eq!(frame.point_count(), 300);
        assert_eq!(frame.traces[0].points.first().map(|p| p.t), Some(0));
        let window = frame.window.unwrap();
        assert!(window.y_min < 0.0 && window.y_max > 299.0);
        assert_eq!(dash.live_buffer(Metric::Temperature).len(), 0);
    }

    #[test]
    fn test_seed_and_push_of_the_same_reading_count_once() {
        let mut dash = Dashboard::new(&config());
        dash.on_push(PushEvent::Historico(vec![temp(10, 1.0)]), 0);

        let redrawn = dash.on_push(PushEvent::NuevoDato(temp(10, 1.0)), 1);
        assert!(redrawn.is_empty());
        assert_eq!(dash.live_buffer(Metric::Temperature).len(), 1);
        assert_eq!(dash.frame(Metric::Temperature).point_count(), 1);
    }

    #[test]
    fn test_extreme_zoom_bounds_do_not_overflow() {
        let mut dash = Dashboard::new(&config());
        let commands = dash.dispatch(Metric::Ph, Interaction::Zoom { start: 0, end: TimestampMs::MAX });
        assert!(matches!(
            commands[1],
            Command::FetchRange { start: 0, end, .. } if end == TimestampMs::MAX
        ));

        let commands = dash.dispatch(Metric::Ph, Interaction::Pan { start: TimestampMs::MIN, end: 0 });
        assert!(matches!(commands[1], Command::FetchRange { start: 0, .. }));
    }

    #[test]
    fn test_show_last_n() {
        let mut dash = Dashboard::new(&config());
        let readings: Vec<_> = (0..10).map(|i| temp(i * 10, i as f64)).collect();
        dash.seed(&readings);
        assert_eq!(dash.frame(Metric::Temperature).point_count(), 10);

        dash.dispatch(Metric::Temperature, Interaction::ShowLastN(3));
        assert_eq!(dash.frame(Metric::Temperature).point_count(), 3);
        assert_eq!(dash.frame(Metric::Temperature).window.unwrap().start, 70);
    }

    #[test]
    fn test_gps_and_freshness() {
        let mut dash = Dashboard::new(&config());
        assert!(!dash.is_fresh(0));

        let mut half = temp(0, 1.0);
        half.latitud = Some(4.6);
        dash.on_push(PushEvent::NuevoDato(half), 1000);
        assert!(dash.position().is_none());
        assert_eq!(dash.frame(Metric::Temperature).point_count(), 1);

        let mut full = temp(10, 1.0);
        full.latitud = Some(4.6);
        full.longitud = Some(-74.0);
        dash.on_push(PushEvent::NuevoDato(full), 2000);
        assert_eq!(dash.position(), Some(GeoPoint { lat: 4.6, lon: -74.0 }));

        assert!(dash.is_fresh(7000));
        assert!(!dash.is_fresh(7001));
    }

    #[test]
    fn test_historico_and_rest_overlap_is_deduplicated() {
        let mut dash = Dashboard::new(&config());
        dash.on_push(PushEvent::Historico(vec![temp(0, 1.0), temp(10, 2.0)]), 0);
        dash.seed_metric(Metric::Temperature, &[temp(10, 2.0), temp(20, 3.0)]);
        assert_eq!(dash.live_buffer(Metric::Temperature).len(), 3);
    }
}
