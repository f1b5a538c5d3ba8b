//! Built-in light-curve models.
//!
//! Models predict an absolute magnitude from a parameter vector and the time
//! since the reference start of the observation window (days).

use std::fmt;

use nimbus_core::traits::LightCurveModel;
use nimbus_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Linear decline `M(t) = M0 + alpha * t`.
///
/// Parameters: `[M0, alpha]` (magnitude, magnitudes per day).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinearLightCurve;

impl LightCurveModel for LinearLightCurve {
    fn predict(&self, params: &[f64], t: f64) -> Result<f64> {
        match params {
            [m0, alpha] => Ok(m0 + alpha * t),
            _ => Err(Error::Validation(format!(
                "linear light curve expects 2 parameters [M0, alpha], got {}",
                params.len()
            ))),
        }
    }

    fn n_parameters(&self) -> usize {
        2
    }

    fn name(&self) -> &str {
        "linear"
    }
}

type PredictFn = dyn Fn(&[f64], f64) -> f64 + Send + Sync;

/// Adapter turning a closure into a [`LightCurveModel`].
pub struct FnLightCurve {
    name: String,
    n_parameters: usize,
    f: Box<PredictFn>,
}

impl FnLightCurve {
    /// Wrap `f`; calls with a parameter vector of another length are rejected.
    pub fn new(
        name: impl Into<String>,
        n_parameters: usize,
        f: impl Fn(&[f64], f64) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), n_parameters, f: Box::new(f) }
    }
}

impl fmt::Debug for FnLightCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnLightCurve")
            .field("name", &self.name)
            .field("n_parameters", &self.n_parameters)
            .finish_non_exhaustive()
    }
}

impl LightCurveModel for FnLightCurve {
    fn predict(&self, params: &[f64], t: f64) -> Result<f64> {
        if params.len() != self.n_parameters {
            return Err(Error::Validation(format!(
                "light curve '{}' expects {} parameters, got {}",
                self.name,
                self.n_parameters,
                params.len()
            )));
        }
        Ok((self.f)(params, t))
    }

    fn n_parameters(&self) -> usize {
        self.n_parameters
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Named built-in model, as selected in a run configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightCurveKind {
    /// [`LinearLightCurve`]
    #[default]
    Linear,
}

impl LightCurveKind {
    /// Instantiate the model.
    pub fn build(self) -> Box<dyn LightCurveModel> {
        match self {
            LightCurveKind::Linear => Box::new(LinearLightCurve),
        }
    }
}
