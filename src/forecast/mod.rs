// src/forecast/mod.rs

//! Platform forecasting and selection.
//!
//! - [`score`] defines the running statistics compared between backends.
//! - [`history`] accumulates them from completed jobs.
//! - [`model`] turns history into a per-backend forecast.
//! - [`selector`] applies pinning and picks the best forecast.

pub mod history;
pub mod model;
pub mod score;
pub mod selector;

pub use history::ProfileHistory;
pub use model::{BackendCoefficients, ForecastInput, ForecastRequest};
pub use score::{Aggregate, ExecutionScore, ScoreComparator, TimeEnergyCost};
pub use selector::{PlatformSelector, Selection};
