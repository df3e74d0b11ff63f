//! ==============================================================================
//! driver.rs - async event loop around the dashboard controller
//! ==============================================================================
//!
//! purpose:
//!     one task owns the Dashboard and the render target. it multiplexes:
//!
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐
//!     │ push feed    │   │ interactions │   │ range loads (spawned)│
//!     └──────┬───────┘   └──────┬───────┘   └──────────┬───────────┘
//!            │                  │ debounced             │
//!            └──────────────────┼───────────────────────┘
//!                               ▼
//!                     tokio::select! loop ──► Dashboard ──► RenderTarget
//!
//!     range loads run on their own tasks and report back over a channel,
//!     so a slow relay never blocks pushes or redraws.
//! ```
//!
//! shutdown:
//!     the loop ends when the interaction channel closes. pending debounced
//!     navigation is applied first.
//!
//! ==============================================================================

use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::client::RangeClient;
use super::controller::{Command, Dashboard, Interaction};
use super::render::RenderTarget;
use super::viewport::Debouncer;
use crate::config::DashboardConfig;
use crate::domain::{Metric, PushEvent, SensorReading, TimestampMs};

const DAY_MS: TimestampMs = 24 * 60 * 60 * 1000;

/// completion of a spawned range load
#[derive(Debug)]
enum Loaded {
    Initial { metric: Metric, readings: Vec<SensorReading> },
    Range { metric: Metric, generation: u64, readings: Vec<SensorReading> },
}

fn now_ms() -> TimestampMs {
    Utc::now().timestamp_millis()
}

pub struct DashboardDriver<T: RenderTarget> {
    dashboard: Dashboard,
    client: RangeClient,
    target: T,
    debounce: Vec<Debouncer<Interaction>>,
    initial_days: i64,
    freshness_check: Duration,
}

impl<T: RenderTarget> DashboardDriver<T> {
    pub fn new(config: &DashboardConfig, client: RangeClient, target: T) -> Self {
        let interval = Duration::from_millis(config.zoom_debounce_ms);
        Self {
            dashboard: Dashboard::new(config),
            client,
            target,
            debounce: Metric::ALL.iter().map(|_| Debouncer::new(interval)).collect(),
            initial_days: config.initial_days,
            freshness_check: Duration::from_millis(config.freshness_timeout_ms.max(1) as u64),
        }
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn into_parts(self) -> (Dashboard, T) {
        (self.dashboard, self.target)
    }

    fn draw(&mut self, metrics: &[Metric]) {
        for &m in metrics {
            self.target.draw(self.dashboard.frame(m));
        }
    }

    fn execute(&mut self, commands: Vec<Command>, loaded: &mpsc::UnboundedSender<Loaded>) {
        for command in commands {
            match command {
                Command::Redraw(metric) => self.draw(&[metric]),
                Command::FetchRange { metric, start, end, generation } => {
                    let client = self.client.clone();
                    let tx = loaded.clone();
                    tokio::spawn(async move {
                        let readings = client.load_range_blocked(metric, start, end).await;
                        let _ = tx.send(Loaded::Range { metric, generation, readings });
                    });
                }
            }
        }
    }

    /// last `initial_days` per metric, block by block
    fn start_initial_load(&self, loaded: &mpsc::UnboundedSender<Loaded>) {
        let end = now_ms() + 1;
        let start = (end - self.initial_days * DAY_MS).max(0);
        for &metric in Metric::ALL.iter() {
            let client = self.client.clone();
            let tx = loaded.clone();
            tokio::spawn(async move {
                let readings = client.load_range_blocked(metric, start, end).await;
                let _ = tx.send(Loaded::Initial { metric, readings });
            });
        }
    }

    fn on_interaction(
        &mut self,
        metric: Metric,
        interaction: Interaction,
        loaded: &mpsc::UnboundedSender<Loaded>,
    ) {
        if interaction.is_navigation() {
            self.debounce[metric.index()].push(Instant::now(), interaction);
        } else {
            // an explicit "latest" also cancels a pending zoom
            self.debounce[metric.index()].cancel();
            let commands = self.dashboard.dispatch(metric, interaction);
            self.execute(commands, loaded);
        }
    }

    fn flush_debounced(&mut self, now: Instant, loaded: &mpsc::UnboundedSender<Loaded>) {
        for &metric in Metric::ALL.iter() {
            if let Some(interaction) = self.debounce[metric.index()].take_ready(now) {
                let commands = self.dashboard.dispatch(metric, interaction);
                self.execute(commands, loaded);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.debounce.iter().filter_map(Debouncer::deadline).min()
    }

    fn on_loaded(&mut self, result: Loaded) {
        match result {
            Loaded::Initial { metric, readings } => {
                tracing::debug!(%metric, count = readings.len(), "[DASHBOARD] initial window loaded");
                let redraw = self.dashboard.seed_metric(metric, &readings);
                self.draw(&redraw);
            }
            Loaded::Range { metric, generation, readings } => {
                if self.dashboard.apply_range(metric, generation, &readings) {
                    self.draw(&[metric]);
                }
            }
        }
    }

    /// drive the dashboard until `interactions` closes
    pub async fn run(
        mut self,
        mut push: mpsc::Receiver<PushEvent>,
        mut interactions: mpsc::Receiver<(Metric, Interaction)>,
    ) -> Self {
        let (loaded_tx, mut loaded_rx) = mpsc::unbounded_channel();
        self.start_initial_load(&loaded_tx);

        let mut push_open = true;
        let mut freshness = tokio::time::interval(self.freshness_check);
        let mut was_fresh = false;

        loop {
            let wake = self
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                biased;

                event = push.recv(), if push_open => match event {
                    Some(event) => {
                        let redraw = self.dashboard.on_push(event, now_ms());
                        self.draw(&redraw);
                    }
                    None => {
                        tracing::info!("[DASHBOARD] push feed closed");
                        push_open = false;
                    }
                },

                Some(result) = loaded_rx.recv() => self.on_loaded(result),

                input = interactions.recv() => match input {
                    Some((metric, interaction)) => self.on_interaction(metric, interaction, &loaded_tx),
                    None => {
                        let far = Instant::now() + Duration::from_secs(3600);
                        self.flush_debounced(far, &loaded_tx);
                        break;
                    }
                },

                _ = tokio::time::sleep_until(wake.into()) => {
                    self.flush_debounced(Instant::now(), &loaded_tx);
                }

                _ = freshness.tick() => {
                    let fresh = self.dashboard.is_fresh(now_ms());
                    if was_fresh && !fresh {
                        tracing::warn!("[DASHBOARD] no data received within {:?}", self.freshness_check);
                    }
                    was_fresh = fresh;
                }
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::render::Frame;

    #[derive(Default)]
    struct Recorder {
        frames: Vec<Frame>,
    }

    impl RenderTarget for Recorder {
        fn draw(&mut self, frame: &Frame) {
            self.frames.push(frame.clone());
        }
    }

    fn offline_client(config: &DashboardConfig) -> RangeClient {
        RangeClient::new("http://127.0.0.1:9", config).unwrap()
    }

    #[tokio::test]
    async fn test_pushes_and_zoom_reach_the_target() {
        let config = DashboardConfig {
            request_timeout_ms: 200,
            zoom_debounce_ms: 5,
            trailing_points: 0,
            ..Default::default()
        };
        let driver = DashboardDriver::new(&config, offline_client(&config), Recorder::default());

        let (push_tx, push_rx) = mpsc::channel(8);
        let (ui_tx, ui_rx) = mpsc::channel(8);

        push_tx
            .send(PushEvent::NuevoDato(SensorReading::at_millis(1_000).with(Metric::Ph, 6.5)))
            .await
            .unwrap();
        push_tx
            .send(PushEvent::NuevoDato(SensorReading::at_millis(2_000).with(Metric::Ph, 6.7)))
            .await
            .unwrap();
        drop(push_tx);

        let handle = tokio::spawn(driver.run(push_rx, ui_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        ui_tx
            .send((Metric::Ph, Interaction::Zoom { start: 0, end: 1_500 }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(ui_tx);

        let driver = handle.await.unwrap();
        let (dashboard, recorder) = driver.into_parts();

        assert_eq!(dashboard.live_buffer(Metric::Ph).len(), 2);
        assert!(!dashboard.chart(Metric::Ph).viewport().is_live());
        assert_eq!(dashboard.frame(Metric::Ph).point_count(), 1);
        assert!(recorder.frames.iter().any(|f| f.metric == Metric::Ph && f.point_count() == 2));
        assert!(recorder.frames.iter().any(|f| f.metric == Metric::Ph && f.point_count() == 1));
    }

    #[tokio::test]
    async fn test_pending_zoom_is_applied_on_shutdown() {
        let config = DashboardConfig {
            request_timeout_ms: 200,
            zoom_debounce_ms: 60_000,
            ..Default::default()
        };
        let driver = DashboardDriver::new(&config, offline_client(&config), Recorder::default());
        let (_push_tx, push_rx) = mpsc::channel(1);
        let (ui_tx, ui_rx) = mpsc::channel(1);

        ui_tx
            .send((Metric::Battery, Interaction::Slider { start: 10, end: 20 }))
            .await
            .unwrap();
        drop(ui_tx);

        let driver = driver.run(push_rx, ui_rx).await;
        assert!(!driver.dashboard().chart(Metric::Battery).viewport().is_live());
    }
}
