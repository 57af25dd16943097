//! Best-effort log of served simulations.
//!
//! Writing a record never affects the prediction response: the handler
//! spawns [`record_detached`] and drops the returned handle. Failures come
//! back as [`SinkOutcome::Failed`] and are only logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::request::PredictRequest;
use crate::types::PredictionResult;

/// Source label stored when the caller sends none.
pub const DEFAULT_SOURCE_LABEL: &str = "api";

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRecord {
    pub timestamp: NaiveDateTime,
    pub distance_km: f64,
    pub day_of_week: i64,
    pub hour_of_day: i64,
    pub user_name: Option<String>,
    pub source_label: String,
    pub predicted_duration_min: f64,
    pub predicted_fare_usd: f64,
}

impl SimulationRecord {
    pub fn new(req: &PredictRequest, out: &PredictionResult) -> Self {
        Self {
            timestamp: Utc::now().naive_utc(),
            distance_km: req.query.distance_km,
            day_of_week: req.query.day_of_week,
            hour_of_day: req.query.hour_of_day,
            user_name: req.user_name.clone(),
            source_label: req
                .source
                .clone()
                .unwrap_or_else(|| DEFAULT_SOURCE_LABEL.to_string()),
            predicted_duration_min: out.predicted_duration_min,
            predicted_fare_usd: out.predicted_fare_usd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum SinkOutcome {
    Written,
    Failed(String),
}

#[async_trait]
pub trait SimulationSink: Send + Sync {
    async fn record(&self, rec: &SimulationRecord) -> SinkOutcome;
}

/// Spawns the write so the caller never waits on it.
pub fn record_detached(
    sink: Arc<dyn SimulationSink>,
    rec: SimulationRecord,
) -> tokio::task::JoinHandle<SinkOutcome> {
    tokio::spawn(async move {
        let outcome = sink.record(&rec).await;
        if let SinkOutcome::Failed(ref e) = outcome {
            tracing::warn!(error = %e, "failed to store simulation; response already sent");
        }
        outcome
    })
}

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS simulations (
        id SERIAL PRIMARY KEY,
        timestamp TIMESTAMP WITHOUT TIME ZONE DEFAULT (NOW() AT TIME ZONE 'UTC'),
        distance_km DOUBLE PRECISION,
        day_of_week INTEGER,
        hour_of_day INTEGER,
        user_name TEXT,
        source_label TEXT,
        predicted_duration_min DOUBLE PRECISION,
        predicted_fare_usd DOUBLE PRECISION
    )";

const INSERT: &str = "
    INSERT INTO simulations
        (timestamp, distance_km, day_of_week, hour_of_day, user_name, source_label,
         predicted_duration_min, predicted_fare_usd)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

/// Postgres-backed sink writing to the `simulations` table.
pub struct PgSimulationLog {
    pool: PgPool,
}

impl PgSimulationLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects with a small bounded pool and makes sure the table exists.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await?;
        let log = Self::new(pool);
        log.ensure_table().await?;
        Ok(log)
    }

    pub async fn ensure_table(&self) -> anyhow::Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        tracing::info!("table `simulations` checked/created");
        Ok(())
    }
}

// the table stores these as INTEGER
fn integer_column(name: &str, v: i64) -> Result<i32, String> {
    i32::try_from(v).map_err(|_| format!("{name} {v} does not fit an INTEGER column"))
}

#[async_trait]
impl SimulationSink for PgSimulationLog {
    async fn record(&self, rec: &SimulationRecord) -> SinkOutcome {
        let (day, hour) = match (
            integer_column("day_of_week", rec.day_of_week),
            integer_column("hour_of_day", rec.hour_of_day),
        ) {
            (Ok(day), Ok(hour)) => (day, hour),
            (Err(e), _) | (_, Err(e)) => return SinkOutcome::Failed(e),
        };
        let res = sqlx::query(INSERT)
            .bind(rec.timestamp)
            .bind(rec.distance_km)
            .bind(day)
            .bind(hour)
            .bind(rec.user_name.as_deref())
            .bind(&rec.source_label)
            .bind(rec.predicted_duration_min)
            .bind(rec.predicted_fare_usd)
            .execute(&self.pool)
            .await;
        match res {
            Ok(_) => SinkOutcome::Written,
            Err(e) => SinkOutcome::Failed(e.to_string()),
        }
    }
}
