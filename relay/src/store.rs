//! ==============================================================================
//! store.rs - reading store seam
//! ==============================================================================
//!
//! purpose:
//!     the relay persists every decoded reading and the rest api answers
//!     bounded historical queries from the same collection. both talk to
//!     the store through `ReadingStore` so the backend is a config choice.
//!
//! ordering contract:
//!     - latest / chunk / range return readings ascending by `fecha`
//!     - all returns readings descending by `fecha` (newest first)
//!     - readings sharing a timestamp keep insertion order
//!
//! backends:
//!     - MemoryStore: sorted vec, used by tests and `store.url = "memory"`
//!     - SqliteStore: sqlx/sqlite, see sqlite.rs
//!
//! ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::{Metric, SensorReading};
use crate::error::StoreError;
use crate::sqlite::SqliteStore;

#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn insert(&self, reading: &SensorReading) -> Result<(), StoreError>;

    /// newest `n` readings, ascending
    async fn latest(&self, n: usize) -> Result<Vec<SensorReading>, StoreError>;

    /// newest first, at most `limit` readings
    async fn all(&self, limit: usize) -> Result<Vec<SensorReading>, StoreError>;

    /// ascending page starting at the `skip`th oldest reading
    async fn chunk(&self, skip: usize, limit: usize) -> Result<Vec<SensorReading>, StoreError>;

    /// ascending readings with `start <= fecha < end`; with `metric` set only
    /// readings carrying a value for it
    async fn range(
        &self,
        metric: Option<Metric>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>, StoreError>;
}

/// pick a backend from `store.url`
pub async fn open_store(url: &str) -> Result<Arc<dyn ReadingStore>, StoreError> {
    if url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    if url.starts_with("sqlite:") {
        return Ok(Arc::new(SqliteStore::connect(url).await?));
    }
    Err(StoreError::UnsupportedUrl(url.to_string()))
}

// ==============================================================================
// in-memory backend
// ==============================================================================

#[derive(Default)]
pub struct MemoryStore {
    readings: RwLock<Vec<SensorReading>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn insert(&self, reading: &SensorReading) -> Result<(), StoreError> {
        let mut readings = self.readings.write().await;
        // after every reading with the same or an earlier timestamp
        let at = readings.partition_point(|r| r.fecha <= reading.fecha);
        readings.insert(at, reading.clone());
        Ok(())
    }

    async fn latest(&self, n: usize) -> Result<Vec<SensorReading>, StoreError> {
        let readings = self.readings.read().await;
        let from = readings.len().saturating_sub(n);
        Ok(readings[from..].to_vec())
    }

    async fn all(&self, limit: usize) -> Result<Vec<SensorReading>, StoreError> {
        let readings = self.readings.read().await;
        Ok(readings.iter().rev().take(limit).cloned().collect())
    }

    async fn chunk(&self, skip: usize, limit: usize) -> Result<Vec<SensorReading>, StoreError> {
        let readings = self.readings.read().await;
        Ok(readings.iter().skip(skip).take(limit).cloned().collect())
    }

    async fn range(
        &self,
        metric: Option<Metric>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>, StoreError> {
        let readings = self.readings.read().await;
        let lo = readings.partition_point(|r| r.fecha < start);
        let hi = readings.partition_point(|r| r.fecha < end).max(lo);
        Ok(readings[lo..hi]
            .iter()
            .filter(|r| metric.map_or(true, |m| r.value(m).is_some()))
            .cloned()
            .collect())
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn reading(ts: i64, temperatura: Option<f64>) -> SensorReading {
        let mut r = SensorReading::at_millis(ts);
        r.temperatura = temperatura;
        r.humedad = Some(ts as f64);
        r
    }

    fn ts(r: &[SensorReading]) -> Vec<i64> {
        r.iter().map(|r| r.timestamp_ms()).collect()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    /// shared contract checks, run against every backend
    pub(crate) async fn exercise_store(store: &dyn ReadingStore) {
        for t in [3000, 1000, 2000, 5000, 4000] {
            let temp = if t == 4000 { None } else { Some(t as f64 / 100.0) };
            store.insert(&reading(t, temp)).await.unwrap();
        }

        assert_eq!(ts(&store.latest(3).await.unwrap()), vec![3000, 4000, 5000]);
        assert_eq!(ts(&store.latest(50).await.unwrap()).len(), 5);
        assert_eq!(ts(&store.all(10).await.unwrap()), vec![5000, 4000, 3000, 2000, 1000]);
        assert_eq!(ts(&store.all(2).await.unwrap()), vec![5000, 4000]);
        assert_eq!(ts(&store.chunk(1, 2).await.unwrap()), vec![2000, 3000]);
        assert!(store.chunk(10, 2).await.unwrap().is_empty());
        // counts past i64::MAX must not wrap around to the first page
        assert!(store.chunk(usize::MAX, 2).await.unwrap().is_empty());
        assert_eq!(ts(&store.chunk(3, usize::MAX).await.unwrap()), vec![4000, 5000]);
        assert_eq!(store.latest(usize::MAX).await.unwrap().len(), 5);

        // half-open window
        let window = store.range(None, at(2000), at(5000)).await.unwrap();
        assert_eq!(ts(&window), vec![2000, 3000, 4000]);

        let temps = store.range(Some(Metric::Temperature), at(2000), at(5000)).await.unwrap();
        assert_eq!(ts(&temps), vec![2000, 3000]);
        assert_eq!(temps[0].temperatura, Some(20.0));

        // same request twice, same answer
        let again = store.range(None, at(2000), at(5000)).await.unwrap();
        assert_eq!(window, again);

        assert!(store.range(None, at(5000), at(1000)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        let store = MemoryStore::new();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_memory_store_keeps_duplicate_timestamps() {
        let store = MemoryStore::new();
        store.insert(&reading(1000, Some(1.0))).await.unwrap();
        store.insert(&reading(1000, Some(2.0))).await.unwrap();

        let all = store.chunk(0, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].temperatura, Some(1.0));
        assert_eq!(all[1].temperatura, Some(2.0));
    }

    #[tokio::test]
    async fn test_open_store_rejects_unknown_scheme() {
        assert!(matches!(
            open_store("mongodb://localhost").await,
            Err(StoreError::UnsupportedUrl(_))
        ));
        assert!(open_store("memory").await.is_ok());
    }
}
