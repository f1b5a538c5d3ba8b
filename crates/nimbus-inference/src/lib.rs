//! # nimbus-inference
//!
//! Single-field kilonova likelihoods from survey magnitude limits.
//!
//! This crate provides:
//! - the logistic detection efficiency against a magnitude limit
//! - distance marginalization and per-uncertainty normalization factors
//! - the null-event density
//! - magnitude-limit series construction with extinction correction
//! - the joint likelihood of one field and its parallel batch evaluation
//! - append-only output sinks

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Parallel evaluation over posterior samples.
pub mod batch;
/// Logistic detection efficiency.
pub mod detection;
/// Built-in light-curve models.
pub mod lightcurve;
/// Joint field likelihood.
pub mod likelihood;
/// Distance marginalization and normalization.
pub mod marginal;
/// Null-event densities.
pub mod null_event;
/// Observation log to magnitude-limit series.
pub mod observations;
/// Output destinations.
pub mod sink;

pub use batch::{
    BatchConfig, BatchResult, FailurePolicy, SampleFailure, SampleOutcome, evaluate_batch,
    evaluate_sample,
};
pub use detection::DetectionEfficiency;
pub use lightcurve::{FnLightCurve, LightCurveKind, LinearLightCurve};
pub use likelihood::{
    EpochTerm, FieldLikelihood, FieldLikelihoodBuilder, JointLikelihood, LikelihoodConfig,
    MixingPolicy, SkyLocalization,
};
pub use marginal::{DistanceMarginalizer, NormalizationTable};
pub use null_event::UniformNullEvent;
pub use observations::{BandMode, ExtinctionCorrector, TimeWindow, build_series};
pub use sink::{AppendFileSink, LikelihoodSink};
