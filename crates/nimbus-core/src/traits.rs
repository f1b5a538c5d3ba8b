//! Core traits for nimbus
//!
//! The likelihood engine is written against these traits only. Concrete
//! light-curve models, distance densities and null-event densities live in
//! the downstream crates (or in user code) and are bound per field at run
//! time.

use crate::Result;

/// Light-curve model for a single filter.
///
/// `predict` maps a parameter vector and the time since the reference start
/// (days) to a magnitude at the reference absolute scale. Implementations
/// must be pure: the batch evaluator calls them concurrently.
pub trait LightCurveModel: Send + Sync {
    /// Predicted absolute magnitude at time `t` (days since the reference start).
    fn predict(&self, params: &[f64], t: f64) -> Result<f64>;

    /// Number of parameters the model expects.
    fn n_parameters(&self) -> usize;

    /// Short model name (e.g. "linear").
    fn name(&self) -> &str;
}

/// Probability density over luminosity distance (Mpc).
pub trait DistanceDensity: Send + Sync {
    /// Density at distance `d`. Zero outside the support.
    fn pdf(&self, d: f64) -> f64;

    /// Closed support `(d_min, d_max)` the density is normalized on.
    fn support(&self) -> (f64, f64);

    /// Distances where the density has sharp structure (peaks, knots).
    ///
    /// Quadrature starts its partition at these points so narrow features
    /// are not stepped over.
    fn breakpoints(&self) -> Vec<f64> {
        Vec::new()
    }
}

/// Density of magnitude limits under the null-event hypothesis.
pub trait NullEventModel: Send + Sync {
    /// Density of observing limit `mlim` when no model-specific source is present.
    fn pdf(&self, mlim: f64) -> f64;
}
