//! Smooth detection efficiency against a magnitude limit.
//!
//! A source of absolute magnitude `M` at distance `d` has apparent magnitude
//! `m = M + mu(d)`. Against a limit `m_lim` with uncertainty `sigma` the
//! probability of a non-detection is
//!
//! `P_undetected = expit((m - m_lim) / sigma)`
//!
//! so a deeper uncertainty widens the transition instead of producing a hard
//! cut at the limit.

use nimbus_core::{Error, Result};
use nimbus_prob::math::{distance_modulus, limiting_distance, sigmoid};
use serde::{Deserialize, Serialize};

/// Uncertainty substituted for an epoch without a measured spread.
pub const DEFAULT_SIGMA: f64 = 0.1;

/// Smallest uncertainty used in the logistic scale.
pub const MIN_SIGMA: f64 = 1e-3;

/// Logistic detection-efficiency model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionEfficiency {
    /// Replacement for a zero or non-finite uncertainty.
    pub default_sigma: f64,
    /// Lower clamp for positive uncertainties.
    pub min_sigma: f64,
}

impl Default for DetectionEfficiency {
    fn default() -> Self {
        Self { default_sigma: DEFAULT_SIGMA, min_sigma: MIN_SIGMA }
    }
}

impl DetectionEfficiency {
    /// Check that both sigma settings are finite and positive.
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [("default_sigma", self.default_sigma), ("min_sigma", self.min_sigma)] {
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::Validation(format!("{name} must be finite and > 0, got {v}")));
            }
        }
        Ok(())
    }

    /// Uncertainty actually used as the logistic scale.
    ///
    /// Idempotent: the default is clamped like a measured uncertainty.
    #[inline]
    pub fn effective_sigma(&self, sigma: f64) -> f64 {
        let sigma = if sigma.is_finite() && sigma > 0.0 { sigma } else { self.default_sigma };
        sigma.max(self.min_sigma)
    }

    #[inline]
    fn scaled_excess(&self, abs_mag: f64, d: f64, sigma: f64, mlim: f64) -> Result<f64> {
        if !d.is_finite() || d <= 0.0 {
            return Err(Error::Computation(format!("distance must be finite and > 0, got {d}")));
        }
        if !abs_mag.is_finite() || !mlim.is_finite() {
            return Err(Error::Computation(format!(
                "non-finite magnitude (M = {abs_mag}, m_lim = {mlim})"
            )));
        }
        Ok((abs_mag + distance_modulus(d) - mlim) / self.effective_sigma(sigma))
    }

    /// Probability that a source at `d` (Mpc) with absolute magnitude
    /// `abs_mag` is fainter than the limit `mlim`.
    pub fn non_detection_probability(
        &self,
        abs_mag: f64,
        d: f64,
        sigma: f64,
        mlim: f64,
    ) -> Result<f64> {
        Ok(sigmoid(self.scaled_excess(abs_mag, d, sigma, mlim)?))
    }

    /// Probability that the source would have been detected.
    pub fn detection_probability(
        &self,
        abs_mag: f64,
        d: f64,
        sigma: f64,
        mlim: f64,
    ) -> Result<f64> {
        Ok(sigmoid(-self.scaled_excess(abs_mag, d, sigma, mlim)?))
    }

    /// Distances bracketing the logistic transition: the limiting distance and
    /// the distances where the apparent magnitude is `3 sigma` off the limit.
    pub fn transition_distances(&self, abs_mag: f64, sigma: f64, mlim: f64) -> [f64; 3] {
        let s = 3.0 * self.effective_sigma(sigma);
        [
            limiting_distance(mlim - s, abs_mag),
            limiting_distance(mlim, abs_mag),
            limiting_distance(mlim + s, abs_mag),
        ]
    }
}
