//! Ride duration and fare prediction by nearest match against a snapshot of
//! historical trips.

pub mod config;
pub mod dataset;
pub mod error;
pub mod predictor;
pub mod request;
pub mod server;
pub mod sink;
pub mod types;

pub use dataset::{DatasetHandle, ReferenceDataset};
pub use predictor::{MatchMode, PredictError, Predictor, Weights};
pub use types::{PredictionResult, Query, ReferenceRow};
