//! Nearest-match prediction over the reference snapshot.
//!
//! Every row is scored with a weighted sum of absolute attribute differences
//! and the targets of the lowest-scoring row are returned as-is. The
//! distance weight is large so that fractions of a kilometre outweigh unit
//! steps in the integer attributes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::{DatasetHandle, ReferenceDataset};
use crate::types::{PredictionResult, Query, ReferenceRow};

pub const DEFAULT_WEIGHT_DISTANCE: f64 = 10.0;
pub const DEFAULT_WEIGHT_HOUR: f64 = 1.0;
/// Heavier hour weight used by the rush-hour tuned deployments.
pub const RUSH_HOUR_WEIGHT_HOUR: f64 = 3.0;
pub const DEFAULT_WEIGHT_DAY: f64 = 1.0;
pub const DEFAULT_WEIGHT_PASSENGERS: f64 = 1.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PredictError {
    #[error("reference data is not loaded on the server: {0}")]
    DatasetUnavailable(String),
    #[error("no reference trip matches the requested parameters")]
    NoMatch,
}

/// Per-attribute coefficients of the weighted distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub distance: f64,
    pub hour: f64,
    pub day: f64,
    pub passengers: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            distance: DEFAULT_WEIGHT_DISTANCE,
            hour: DEFAULT_WEIGHT_HOUR,
            day: DEFAULT_WEIGHT_DAY,
            passengers: DEFAULT_WEIGHT_PASSENGERS,
        }
    }
}

impl Weights {
    pub fn with_hour(mut self, hour: f64) -> Self {
        self.hour = hour;
        self
    }

    /// Weighted distance between a reference row and a query.
    pub fn distance(&self, row: &ReferenceRow, q: &Query) -> f64 {
        let diff_distance = (row.distance_km - q.distance_km).abs();
        let diff_hour = row.hour_of_day.abs_diff(q.hour_of_day) as f64;
        let diff_day = row.day_of_week.abs_diff(q.day_of_week) as f64;
        let diff_passengers = row.passenger_count.abs_diff(q.passenger_count) as f64;

        diff_distance * self.distance
            + diff_hour * self.hour
            + diff_day * self.day
            + diff_passengers * self.passengers
    }
}

/// How a query is matched against the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Closest row under [`Weights`].
    #[default]
    Nearest,
    /// First row with identical distance, hour and day.
    Exact,
}

impl std::str::FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" | "knn" => Ok(Self::Nearest),
            "exact" | "lookup" => Ok(Self::Exact),
            other => Err(format!("unknown match mode `{other}` (expected nearest|exact)")),
        }
    }
}

/// Winning row of a scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub index: usize,
    pub score: f64,
}

/// Scans `rows` in storage order and returns the row with the strictly
/// smallest weighted distance. Ties keep the earlier row. NaN scores never
/// win.
pub fn find_nearest(rows: &[ReferenceRow], q: &Query, w: &Weights) -> Option<Match> {
    let mut best: Option<Match> = None;
    for (index, row) in rows.iter().enumerate() {
        let score = w.distance(row, q);
        match best {
            Some(b) if !(score < b.score) => {}
            _ if score.is_nan() => {}
            _ => best = Some(Match { index, score }),
        }
    }
    best
}

/// First row whose distance, hour and day equal the query's.
pub fn find_exact(rows: &[ReferenceRow], q: &Query) -> Option<Match> {
    rows.iter()
        .position(|r| {
            r.distance_km == q.distance_km
                && r.hour_of_day == q.hour_of_day
                && r.day_of_week == q.day_of_week
        })
        .map(|index| Match { index, score: 0.0 })
}

/// Stateless predictor; holds only its configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Predictor {
    pub weights: Weights,
    pub mode: MatchMode,
}

impl Predictor {
    pub fn new(weights: Weights, mode: MatchMode) -> Self {
        Self { weights, mode }
    }

    pub fn find(&self, ds: &ReferenceDataset, q: &Query) -> Option<Match> {
        match self.mode {
            MatchMode::Nearest => find_nearest(ds.rows(), q, &self.weights),
            MatchMode::Exact => find_exact(ds.rows(), q),
        }
    }

    pub fn predict(&self, handle: &DatasetHandle, q: &Query) -> Result<PredictionResult, PredictError> {
        self.predict_match(handle, q).map(|(out, _)| out)
    }

    /// Like [`Predictor::predict`], also reporting which row won.
    pub fn predict_match(
        &self,
        handle: &DatasetHandle,
        q: &Query,
    ) -> Result<(PredictionResult, Match), PredictError> {
        let ds = match handle {
            DatasetHandle::Loaded(ds) => ds,
            DatasetHandle::Unavailable(reason) => {
                return Err(PredictError::DatasetUnavailable(reason.to_string()))
            }
        };
        let hit = self.find(ds, q).ok_or(PredictError::NoMatch)?;
        Ok((PredictionResult::from(&ds.rows()[hit.index]), hit))
    }
}
