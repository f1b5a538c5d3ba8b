//! # nimbus-core
//!
//! Shared vocabulary for the nimbus crates: the error type, the traits the
//! likelihood engine is generic over, and the survey/observation data types.
//!
//! ## Architecture
//!
//! Numerical code (`nimbus-prob`) and the likelihood engine
//! (`nimbus-inference`) only talk to light-curve models, distance densities
//! and null-event models through the traits defined here, never through
//! concrete implementations.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error type and `Result` alias.
pub mod error;
/// Pluggable model traits.
pub mod traits;
/// Survey, observation and integration-domain types.
pub mod types;

pub use error::{Error, Result};
pub use traits::{DistanceDensity, LightCurveModel, NullEventModel};
pub use types::{
    ExtinctionCoefficients, Filter, IntegrationBounds, MagnitudeBounds, MagnitudeLimit,
    MagnitudeLimitSeries, Observation, SurveyField,
};

/// Crate version, shared by the CLI `version` subcommand.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
