//! Distance densities for a survey field.
//!
//! Gravitational-wave sky maps describe the distance posterior of each pixel
//! with a three-parameter ansatz `(distmu, distsigma, distnorm)`:
//!
//! `p(d | pixel) = distnorm * d^2 * N(d; distmu, distsigma)`
//!
//! A field covers several pixels; its distance density is the probability
//! weighted mixture of the pixel ansätze, renormalized on the bounded distance
//! support used by the likelihood integrals. A tabulated density is provided
//! for maps that are already reduced to a distance grid.

use nimbus_core::traits::DistanceDensity;
use nimbus_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::quadrature::{QuadratureConfig, integrate_with_breakpoints};

/// Natural log of `sqrt(2π)`.
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Upper limit on breakpoints handed to the quadrature.
const MAX_BREAKPOINTS: usize = 256;

/// Per-pixel distance ansatz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceAnsatz {
    /// Location parameter (Mpc).
    pub distmu: f64,
    /// Scale parameter (Mpc).
    pub distsigma: f64,
    /// Normalization of the `d^2`-weighted Gaussian.
    pub distnorm: f64,
}

impl DistanceAnsatz {
    /// Validated ansatz.
    pub fn new(distmu: f64, distsigma: f64, distnorm: f64) -> Result<Self> {
        if !distmu.is_finite() || !distsigma.is_finite() || distsigma <= 0.0 {
            return Err(Error::Validation(format!(
                "distance ansatz needs finite distmu and distsigma > 0, got ({distmu}, {distsigma})"
            )));
        }
        if !distnorm.is_finite() || distnorm <= 0.0 {
            return Err(Error::Validation(format!(
                "distance ansatz needs finite distnorm > 0, got {distnorm}"
            )));
        }
        Ok(Self { distmu, distsigma, distnorm })
    }

    /// Unnormalized-on-support density at `d` (normalized on `(0, inf)` by `distnorm`).
    pub fn pdf(&self, d: f64) -> f64 {
        if !(d > 0.0) {
            return 0.0;
        }
        let z = (d - self.distmu) / self.distsigma;
        let log_gauss = -0.5 * z * z - self.distsigma.ln() - LN_SQRT_2PI;
        self.distnorm * d * d * log_gauss.exp()
    }

    fn features(&self) -> impl Iterator<Item = f64> + '_ {
        (-3..=3).map(move |k| self.distmu + f64::from(k) * self.distsigma)
    }
}

fn validate_support(support: (f64, f64)) -> Result<()> {
    let (lo, hi) = support;
    if !lo.is_finite() || !hi.is_finite() || lo <= 0.0 || lo >= hi {
        return Err(Error::Validation(format!(
            "distance support must satisfy 0 < d_min < d_max < inf, got [{lo}, {hi}]"
        )));
    }
    Ok(())
}

fn thin(mut points: Vec<f64>, support: (f64, f64)) -> Vec<f64> {
    points.retain(|p| p.is_finite() && *p > support.0 && *p < support.1);
    points.sort_by(f64::total_cmp);
    points.dedup();
    if points.len() > MAX_BREAKPOINTS {
        let step = points.len().div_ceil(MAX_BREAKPOINTS);
        points = points.into_iter().step_by(step).collect();
    }
    points
}

/// Probability-weighted mixture of pixel ansätze on a bounded support.
#[derive(Debug, Clone)]
pub struct PixelMixtureDistance {
    components: Vec<(f64, DistanceAnsatz)>,
    support: (f64, f64),
    inv_norm: f64,
    breakpoints: Vec<f64>,
}

impl PixelMixtureDistance {
    /// Build the field density from `(pixel probability, ansatz)` pairs.
    ///
    /// Pixels with zero probability are dropped. The mixture is renormalized
    /// numerically on `support`.
    pub fn new(
        pixels: &[(f64, DistanceAnsatz)],
        support: (f64, f64),
        config: &QuadratureConfig,
    ) -> Result<Self> {
        validate_support(support)?;
        if let Some((p, _)) = pixels.iter().find(|(p, _)| !p.is_finite() || *p < 0.0) {
            return Err(Error::Validation(format!(
                "pixel probability must be finite and >= 0, got {p}"
            )));
        }
        let total: f64 = pixels.iter().map(|(p, _)| p).sum();
        if !(total > 0.0) {
            return Err(Error::Validation("field pixels carry no probability".into()));
        }
        let components: Vec<(f64, DistanceAnsatz)> =
            pixels.iter().filter(|(p, _)| *p > 0.0).map(|&(p, a)| (p / total, a)).collect();

        let breakpoints =
            thin(components.iter().flat_map(|(_, a)| a.features()).collect(), support);

        let mut density = Self { components, support, inv_norm: 1.0, breakpoints };
        let norm = integrate_with_breakpoints(
            |d| Ok(density.raw_pdf(d)),
            support.0,
            support.1,
            &density.breakpoints,
            config,
        )?
        .value;
        if !(norm > 0.0) || !norm.is_finite() {
            return Err(Error::Computation(format!(
                "distance density has no mass on [{}, {}] (integral {norm})",
                support.0, support.1
            )));
        }
        log::debug!(
            "distance mixture: {} pixels, mass on support before renormalization {norm:.6}",
            density.components.len()
        );
        density.inv_norm = 1.0 / norm;
        Ok(density)
    }

    /// Single-pixel density.
    pub fn single(
        ansatz: DistanceAnsatz,
        support: (f64, f64),
        config: &QuadratureConfig,
    ) -> Result<Self> {
        Self::new(&[(1.0, ansatz)], support, config)
    }

    fn raw_pdf(&self, d: f64) -> f64 {
        self.components.iter().map(|(w, a)| w * a.pdf(d)).sum()
    }
}

impl DistanceDensity for PixelMixtureDistance {
    fn pdf(&self, d: f64) -> f64 {
        if d < self.support.0 || d > self.support.1 {
            return 0.0;
        }
        self.inv_norm * self.raw_pdf(d)
    }

    fn support(&self) -> (f64, f64) {
        self.support
    }

    fn breakpoints(&self) -> Vec<f64> {
        self.breakpoints.clone()
    }
}

/// Piecewise-linear density on a distance grid.
#[derive(Debug, Clone)]
pub struct TabulatedDistance {
    distance: Vec<f64>,
    density: Vec<f64>,
}

impl TabulatedDistance {
    /// Build from a strictly increasing positive grid; the density is rescaled
    /// so its trapezoidal integral (exact for linear interpolation) is 1.
    pub fn new(distance: Vec<f64>, density: Vec<f64>) -> Result<Self> {
        if distance.len() != density.len() {
            return Err(Error::Validation(format!(
                "distance grid has {} points but density has {}",
                distance.len(),
                density.len()
            )));
        }
        if distance.len() < 2 {
            return Err(Error::Validation("tabulated density needs at least 2 points".into()));
        }
        validate_support((distance[0], distance[distance.len() - 1]))?;
        if distance.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::Validation("distance grid must be strictly increasing".into()));
        }
        if density.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(Error::Validation("tabulated density must be finite and >= 0".into()));
        }

        let mass: f64 = distance
            .windows(2)
            .zip(density.windows(2))
            .map(|(d, p)| 0.5 * (p[0] + p[1]) * (d[1] - d[0]))
            .sum();
        if !(mass > 0.0) {
            return Err(Error::Validation("tabulated density has zero mass".into()));
        }
        let density = density.into_iter().map(|p| p / mass).collect();
        Ok(Self { distance, density })
    }
}

impl DistanceDensity for TabulatedDistance {
    fn pdf(&self, d: f64) -> f64 {
        let n = self.distance.len();
        if !(d >= self.distance[0] && d <= self.distance[n - 1]) {
            return 0.0;
        }
        // First knot strictly greater than d, clamped so [j-1, j] is a valid cell.
        let j = self.distance.partition_point(|&x| x <= d).clamp(1, n - 1);
        let (x0, x1) = (self.distance[j - 1], self.distance[j]);
        let (y0, y1) = (self.density[j - 1], self.density[j]);
        y0 + (y1 - y0) * (d - x0) / (x1 - x0)
    }

    fn support(&self) -> (f64, f64) {
        (self.distance[0], self.distance[self.distance.len() - 1])
    }

    fn breakpoints(&self) -> Vec<f64> {
        thin(self.distance.clone(), self.support())
    }
}

/// Integral of `density` over its support.
pub fn total_probability(density: &dyn DistanceDensity, config: &QuadratureConfig) -> Result<f64> {
    let (lo, hi) = density.support();
    let bp = density.breakpoints();
    Ok(integrate_with_breakpoints(|d| Ok(density.pdf(d)), lo, hi, &bp, config)?.value)
}
