use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::domain::{Metric, SensorReading};
use crate::error::StoreError;
use crate::store::ReadingStore;

const COLUMNS: &str = "fecha, humedad, temperatura, conductividad, ph, nitrogeno, fosforo, \
                       potasio, bateria, corriente, latitud, longitud";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        // every connection to :memory: is its own database
        let max_connections = if url.contains(":memory:") { 1 } else { 8 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fecha INTEGER NOT NULL,
                humedad REAL,
                temperatura REAL,
                conductividad REAL,
                ph REAL,
                nitrogeno REAL,
                fosforo REAL,
                potasio REAL,
                bateria REAL,
                corriente REAL,
                latitud REAL,
                longitud REAL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_readings_fecha ON readings(fecha, id)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }
}

fn from_row(row: &SqliteRow) -> Result<SensorReading, StoreError> {
    let ms: i64 = row.try_get("fecha")?;
    let fecha = DateTime::from_timestamp_millis(ms).ok_or(StoreError::Timestamp(ms))?;

    let mut reading = SensorReading::at(fecha);
    for metric in Metric::ALL {
        reading.set(metric, row.try_get(metric.key())?);
    }
    reading.latitud = row.try_get("latitud")?;
    reading.longitud = row.try_get("longitud")?;
    Ok(reading)
}

/// sqlite binds are i64; a negative LIMIT/OFFSET would mean "unbounded"
fn sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn from_rows(rows: Vec<SqliteRow>) -> Result<Vec<SensorReading>, StoreError> {
    rows.iter().map(from_row).collect()
}

#[async_trait]
impl ReadingStore for SqliteStore {
    async fn insert(&self, reading: &SensorReading) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO readings ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let mut query = sqlx::query(&sql).bind(reading.timestamp_ms());
        for metric in Metric::ALL {
            query = query.bind(reading.value(metric));
        }
        query
            .bind(reading.latitud)
            .bind(reading.longitud)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn latest(&self, n: usize) -> Result<Vec<SensorReading>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM readings ORDER BY fecha DESC, id DESC LIMIT ?");
        let rows = sqlx::query(&sql).bind(sql_count(n)).fetch_all(&self.pool).await?;
        let mut readings = from_rows(rows)?;
        readings.reverse();
        Ok(readings)
    }

    async fn all(&self, limit: usize) -> Result<Vec<SensorReading>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM readings ORDER BY fecha DESC, id DESC LIMIT ?");
        let rows = sqlx::query(&sql).bind(sql_count(limit)).fetch_all(&self.pool).await?;
        from_rows(rows)
    }

    async fn chunk(&self, skip: usize, limit: usize) -> Result<Vec<SensorReading>, StoreError> {
        let sql =
            format!("SELECT {COLUMNS} FROM readings ORDER BY fecha ASC, id ASC LIMIT ? OFFSET ?");
        let rows = sqlx::query(&sql)
            .bind(sql_count(limit))
            .bind(sql_count(skip))
            .fetch_all(&self.pool)
            .await?;
        from_rows(rows)
    }

    async fn range(
        &self,
        metric: Option<Metric>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>, StoreError> {
        // metric keys come from a closed enum, never from the request
        let filter = metric
            .map(|m| format!(" AND {} IS NOT NULL", m.key()))
            .unwrap_or_default();
        let sql = format!(
            "SELECT {COLUMNS} FROM readings WHERE fecha >= ? AND fecha < ?{filter} \
             ORDER BY fecha ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(start.timestamp_millis())
            .bind(end.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        from_rows(rows)
    }
}
