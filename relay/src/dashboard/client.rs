//! ==============================================================================
//! client.rs - rest range client for the dashboard core
//! ==============================================================================
//!
//! purpose:
//!     fetches latest / all / chunk / range windows from the relay.
//!
//! failure model:
//!     a transport error, a timeout or a non-2xx answer is logged and
//!     reported as an empty list. empty means "no data available now",
//!     never "no data ever", so failed ranges are not cached.
//!
//! caching:
//!     successful windows are kept in a bounded lru keyed by
//!     (metric, start, end). a window whose end lies past the fetch time can
//!     still gain records, so it is always fetched fresh.
//!
//! lazy loading:
//!     long ranges are walked in `block_ms` blocks with a short sleep in
//!     between so the runtime keeps servicing push events and redraws.
//!
//! ==============================================================================

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::DashboardConfig;
use crate::domain::{Metric, SensorReading, TimestampMs};

type RangeKey = (Metric, TimestampMs, TimestampMs);

struct RangeCache {
    entries: LruCache<RangeKey, Vec<SensorReading>>,
}

impl RangeCache {
    fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: LruCache::new(capacity) }
    }

    fn get(&mut self, key: &RangeKey) -> Option<Vec<SensorReading>> {
        self.entries.get(key).cloned()
    }

    /// returns false when the window is still open at `fetched_at`
    fn insert(&mut self, key: RangeKey, readings: Vec<SensorReading>, fetched_at: TimestampMs) -> bool {
        let (_, _, end) = key;
        if end > fetched_at {
            return false;
        }
        self.entries.put(key, readings);
        true
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Clone)]
pub struct RangeClient {
    http: reqwest::Client,
    base_url: String,
    block_ms: TimestampMs,
    block_yield: Duration,
    cache: Arc<Mutex<RangeCache>>,
}

fn iso(t: TimestampMs) -> String {
    DateTime::from_timestamp_millis(t)
        .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

fn sort_ascending(mut readings: Vec<SensorReading>) -> Vec<SensorReading> {
    readings.sort_by_key(|r| r.fecha);
    readings
}

impl RangeClient {
    pub fn new(base_url: &str, config: &DashboardConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            block_ms: config.block_ms.max(1),
            block_yield: Duration::from_millis(config.block_yield_ms),
            cache: Arc::new(Mutex::new(RangeCache::new(config.range_cache_windows))),
        })
    }

    async fn fetch(&self, path: &str, query: &[(&str, String)]) -> reqwest::Result<Vec<SensorReading>> {
        let url = format!("{}{}", self.base_url, path);
        let readings = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<SensorReading>>()
            .await?;
        Ok(sort_ascending(readings))
    }

    async fn fetch_or_empty(&self, path: &str, query: &[(&str, String)]) -> Vec<SensorReading> {
        match self.fetch(path, query).await {
            Ok(readings) => readings,
            Err(e) => {
                tracing::warn!("[CLIENT] {} failed: {}", path, e);
                Vec::new()
            }
        }
    }

    pub async fn latest(&self) -> Vec<SensorReading> {
        self.fetch_or_empty("/api/data/latest", &[]).await
    }

    /// the whole (server-bounded) collection, ascending
    pub async fn all(&self) -> Vec<SensorReading> {
        self.fetch_or_empty("/api/data/all", &[]).await
    }

    pub async fn chunk(&self, skip: usize, limit: usize) -> Vec<SensorReading> {
        let query = [("skip", skip.to_string()), ("limit", limit.to_string())];
        self.fetch_or_empty("/api/data/chunk", &query).await
    }

    /// readings with `start <= fecha < end` carrying `metric`; cached per window
    pub async fn range(&self, metric: Metric, start: TimestampMs, end: TimestampMs) -> Vec<SensorReading> {
        let key = (metric, start, end);
        if let Some(hit) = self.cache.lock().await.get(&key) {
            return hit;
        }

        let query = [
            ("var", metric.key().to_string()),
            ("start", iso(start)),
            ("end", iso(end)),
        ];
        let fetched_at = Utc::now().timestamp_millis();
        match self.fetch("/api/data/range", &query).await {
            Ok(readings) => {
                self.cache.lock().await.insert(key, readings.clone(), fetched_at);
                readings
            }
            Err(e) => {
                tracing::warn!("[CLIENT] range {} [{}, {}) failed: {}", metric, iso(start), iso(end), e);
                Vec::new()
            }
        }
    }

    /// walk `[start, end)` in `block_ms` blocks, yielding between blocks.
    /// the walk stops one block past the clock; nothing is stored beyond it
    pub async fn load_range_blocked(
        &self,
        metric: Metric,
        start: TimestampMs,
        end: TimestampMs,
    ) -> Vec<SensorReading> {
        let end = end.min(Utc::now().timestamp_millis().saturating_add(self.block_ms));
        let mut out = Vec::new();
        let mut block_start = start;
        while block_start < end {
            let block_end = block_start.saturating_add(self.block_ms).min(end);
            out.extend(self.range(metric, block_start, block_end).await);
            block_start = block_end;
            if block_start < end {
                tokio::time::sleep(self.block_yield).await;
            }
        }
        out
    }

    /// page through the whole collection with skip/limit
    pub async fn load_all_chunked(&self, chunk_size: usize) -> Vec<SensorReading> {
        let chunk_size = chunk_size.max(1);
        let mut out = Vec::new();
        loop {
            let page = self.chunk(out.len(), chunk_size).await;
            let short = page.len() < chunk_size;
            out.extend(page);
            if short {
                break;
            }
            tokio::time::sleep(self.block_yield).await;
        }
        out
    }

    pub async fn cached_windows(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: TimestampMs = 24 * 60 * 60 * 1000;

    #[tokio::test]
    async fn test_unreachable_relay_yields_empty_lists() {
        let config = DashboardConfig { request_timeout_ms: 500, ..Default::default() };
        // port 9 (discard) on loopback refuses connections
        let client = RangeClient::new("http://127.0.0.1:9/", &config).unwrap();

        assert!(client.latest().await.is_empty());
        assert!(client.chunk(0, 10).await.is_empty());
        assert!(client.range(Metric::Ph, 0, 1000).await.is_empty());
        // failures are not cached
        assert_eq!(client.cached_windows().await, 0);
    }

    #[tokio::test]
    async fn test_unbounded_window_stops_near_now() {
        let config = DashboardConfig {
            request_timeout_ms: 200,
            block_ms: 1000 * DAY_MS,
            block_yield_ms: 0,
            ..Default::default()
        };
        let client = RangeClient::new("http://127.0.0.1:9/", &config).unwrap();
        // a handful of blocks up to the clock, not billions up to i64::MAX
        let walk = client.load_range_blocked(Metric::Ph, 0, TimestampMs::MAX);
        let loaded = tokio::time::timeout(Duration::from_secs(30), walk).await;
        assert_eq!(loaded.map(|r| r.len()).ok(), Some(0));
    }

    fn window(metric: Metric, start: TimestampMs, end: TimestampMs) -> (RangeKey, Vec<SensorReading>) {
        let readings = vec![SensorReading::at_millis(start).with(metric, 1.0)];
        ((metric, start, end), readings)
    }

    #[test]
    fn test_range_cache_evicts_least_recently_used() {
        let mut cache = RangeCache::new(2);
        let (a, ra) = window(Metric::Ph, 0, 10);
        let (b, rb) = window(Metric::Ph, 10, 20);
        let (c, rc) = window(Metric::Ph, 20, 30);

        assert!(cache.insert(a, ra.clone(), 1_000));
        assert!(cache.insert(b, rb, 1_000));
        assert_eq!(cache.get(&a), Some(ra));
        assert!(cache.insert(c, rc, 1_000));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn test_open_windows_are_not_cached() {
        let mut cache = RangeCache::new(8);
        let (closed, rc) = window(Metric::Humidity, 0, 1_000);
        let (open, ro) = window(Metric::Humidity, 500, 1_001);

        assert!(cache.insert(closed, rc, 1_000));
        assert!(!cache.insert(open, ro, 1_000));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&open).is_none());
    }

    #[test]
    fn test_iso_bounds_have_millisecond_precision() {
        assert_eq!(iso(1_500), "1970-01-01T00:00:01.500Z");
    }
}
