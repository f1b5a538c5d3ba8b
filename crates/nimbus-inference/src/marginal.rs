//! Distance marginalization of the detection efficiency.
//!
//! Two quantities are computed by adaptive quadrature:
//!
//! - the marginal non-detection probability of a limit `m_lim` for a source
//!   of absolute magnitude `M`,
//!   `I(M, m_lim, sigma) = ∫ P_undetected(M, d, sigma, m_lim) p(d) dd`;
//! - the normalization factor of an uncertainty `sigma`,
//!   `N(sigma) = ∫_{m_low}^{m_high} I(M_ref, m, sigma) dm`,
//!   which turns `I` into a density over the limit comparable to the
//!   null-event density.
//!
//! The distance integral runs over the density's support, which never
//! touches `d = 0`.

use std::collections::BTreeMap;
use std::sync::Arc;

use nimbus_core::traits::DistanceDensity;
use nimbus_core::{Error, MagnitudeBounds, MagnitudeLimit, Result};
use nimbus_prob::quadrature::{QuadratureConfig, integrate, integrate_with_breakpoints};

use crate::detection::DetectionEfficiency;

/// Reference absolute magnitude the normalization factors are computed at.
pub const DEFAULT_REFERENCE_ABS_MAG: f64 = -10.0;

/// Normalization factors keyed by effective uncertainty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizationTable {
    factors: BTreeMap<u64, f64>,
}

impl NormalizationTable {
    /// Factor for an effective uncertainty, if it was computed.
    pub fn get(&self, sigma_eff: f64) -> Option<f64> {
        self.factors.get(&sigma_eff.to_bits()).copied()
    }

    /// Number of distinct uncertainties.
    pub fn len(&self) -> usize {
        self.factors.len()
    }

    /// Whether no factor has been computed.
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// `(sigma_eff, factor)` pairs in increasing sigma.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.factors.iter().map(|(&k, &v)| (f64::from_bits(k), v))
    }
}

/// Nested integrator over distance and limiting magnitude.
#[derive(Clone)]
pub struct DistanceMarginalizer {
    density: Arc<dyn DistanceDensity>,
    density_breakpoints: Vec<f64>,
    efficiency: DetectionEfficiency,
    outer: QuadratureConfig,
}

impl std::fmt::Debug for DistanceMarginalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistanceMarginalizer")
            .field("support", &self.density.support())
            .field("efficiency", &self.efficiency)
            .field("outer", &self.outer)
            .finish()
    }
}

impl DistanceMarginalizer {
    /// Marginalizer over `density`; `outer` controls the magnitude integral
    /// of the normalization factors.
    pub fn new(
        density: Arc<dyn DistanceDensity>,
        efficiency: DetectionEfficiency,
        outer: QuadratureConfig,
    ) -> Result<Self> {
        efficiency.validate()?;
        outer.validate()?;
        let (lo, hi) = density.support();
        if !lo.is_finite() || !hi.is_finite() || lo <= 0.0 || lo >= hi {
            return Err(Error::Validation(format!(
                "distance support must satisfy 0 < d_min < d_max < inf, got [{lo}, {hi}]"
            )));
        }
        let density_breakpoints = density.breakpoints();
        Ok(Self { density, density_breakpoints, efficiency, outer })
    }

    /// Detection-efficiency model in use.
    pub fn efficiency(&self) -> &DetectionEfficiency {
        &self.efficiency
    }

    /// Distance density in use.
    pub fn density(&self) -> &dyn DistanceDensity {
        self.density.as_ref()
    }

    /// `∫ P_undetected(abs_mag, d, sigma, mlim) p(d) dd` over the density support.
    pub fn marginal_non_detection(
        &self,
        abs_mag: f64,
        mlim: f64,
        sigma: f64,
        inner: &QuadratureConfig,
    ) -> Result<f64> {
        let (lo, hi) = self.density.support();
        let mut breakpoints = self.density_breakpoints.clone();
        breakpoints.extend(self.efficiency.transition_distances(abs_mag, sigma, mlim));

        let density = self.density.as_ref();
        let efficiency = &self.efficiency;
        let integral = integrate_with_breakpoints(
            |d| Ok(efficiency.non_detection_probability(abs_mag, d, sigma, mlim)? * density.pdf(d)),
            lo,
            hi,
            &breakpoints,
            inner,
        )?;
        Ok(integral.value)
    }

    /// Normalization factor `N(sigma)` over the limiting-magnitude range `bounds`.
    pub fn normalization_factor(
        &self,
        sigma: f64,
        bounds: MagnitudeBounds,
        reference_abs_mag: f64,
        inner: &QuadratureConfig,
    ) -> Result<f64> {
        if !reference_abs_mag.is_finite() {
            return Err(Error::Validation(format!(
                "reference absolute magnitude must be finite, got {reference_abs_mag}"
            )));
        }
        let integral = integrate(
            |m| self.marginal_non_detection(reference_abs_mag, m, sigma, inner),
            bounds.low(),
            bounds.high(),
            &self.outer,
        )
        .map_err(|e| e.context(format!("normalization for sigma = {sigma}")))?;

        let factor = integral.value;
        if !factor.is_finite() || factor <= 0.0 {
            return Err(Error::Computation(format!(
                "normalization factor for sigma = {sigma} is {factor}; the distance density \
                 has no support where the limit range is informative"
            )));
        }
        Ok(factor)
    }

    /// Normalization factors for every distinct effective uncertainty in `sigmas`.
    pub fn normalization_table(
        &self,
        sigmas: impl IntoIterator<Item = f64>,
        bounds: MagnitudeBounds,
        reference_abs_mag: f64,
        inner: &QuadratureConfig,
    ) -> Result<NormalizationTable> {
        let mut factors = BTreeMap::new();
        for sigma in sigmas {
            let sigma_eff = self.efficiency.effective_sigma(sigma);
            let key = sigma_eff.to_bits();
            if factors.contains_key(&key) {
                continue;
            }
            let factor = self.normalization_factor(sigma_eff, bounds, reference_abs_mag, inner)?;
            log::debug!("normalization factor sigma={sigma_eff}: {factor:.8}");
            factors.insert(key, factor);
        }
        Ok(NormalizationTable { factors })
    }

    /// In-field probability density of observing `limit` for a source of
    /// absolute magnitude `abs_mag`: `I(abs_mag, m_lim, sigma) / N(sigma)`.
    pub fn marginal_probability(
        &self,
        abs_mag: f64,
        limit: &MagnitudeLimit,
        table: &NormalizationTable,
        inner: &QuadratureConfig,
    ) -> Result<f64> {
        let sigma_eff = self.efficiency.effective_sigma(limit.sigma);
        let norm = table.get(sigma_eff).ok_or_else(|| {
            Error::Validation(format!("no normalization factor for sigma = {sigma_eff}"))
        })?;
        Ok(self.marginal_non_detection(abs_mag, limit.mlim, limit.sigma, inner)? / norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nimbus_prob::distance::{DistanceAnsatz, PixelMixtureDistance};
    use proptest::prelude::*;

    fn density(mu: f64, sigma: f64) -> Arc<dyn DistanceDensity> {
        let a = DistanceAnsatz::new(mu, sigma, 1.0 / (mu * mu + sigma * sigma)).unwrap();
        let cfg = QuadratureConfig::default();
        Arc::new(PixelMixtureDistance::single(a, (1.0, 2000.0), &cfg).unwrap())
    }

    fn marginalizer(mu: f64, sigma: f64) -> DistanceMarginalizer {
        let outer = QuadratureConfig { epsabs: 1e-8, epsrel: 1e-7, ..Default::default() };
        let efficiency = DetectionEfficiency::default();
        DistanceMarginalizer::new(density(mu, sigma), efficiency, outer).unwrap()
    }

    fn bounds() -> MagnitudeBounds {
        MagnitudeBounds::new(15.0, 23.0).unwrap()
    }

    #[test]
    fn test_faint_source_is_never_detected() {
        let m = marginalizer(160.0, 30.0);
        // M = 0 is fainter than any 20 mag limit at >= 1 Mpc.
        let p = m.marginal_non_detection(0.0, 20.0, 0.2, &QuadratureConfig::default()).unwrap();
        assert_relative_eq!(p, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bright_source_is_always_detected() {
        let m = marginalizer(40.0, 5.0);
        // Apparent magnitude ~15 against a 20 mag limit.
        let abs_mag = 15.0 - nimbus_prob::math::distance_modulus(40.0);
        let p = m.marginal_non_detection(abs_mag, 20.0, 0.2, &QuadratureConfig::default()).unwrap();
        assert!(p < 1e-6, "p = {p}");
    }

    #[test]
    fn test_sharp_limit_matches_density_cdf() {
        // With a tiny uncertainty, I(M, m_lim) is the density mass beyond the
        // limiting distance.
        let m = marginalizer(100.0, 20.0);
        let inner = QuadratureConfig::default();
        let p = m.marginal_non_detection(-16.0, 19.0, 1e-3, &inner).unwrap();
        let tail = integrate(|d| Ok(m.density().pdf(d)), 100.0, 2000.0, &inner).unwrap().value;
        assert_relative_eq!(p, tail, epsilon = 1e-3);
    }

    #[test]
    fn test_normalization_table_deduplicates() {
        let m = marginalizer(160.0, 40.0);
        let inner = QuadratureConfig::default();
        let table = m
            .normalization_table(
                [0.2, 0.0, 0.2, 0.1, 1e-9],
                bounds(),
                DEFAULT_REFERENCE_ABS_MAG,
                &inner,
            )
            .unwrap();
        // 0.0 maps onto the 0.1 default; 1e-9 clamps to MIN_SIGMA.
        assert_eq!(table.len(), 3);
        assert!(table.get(0.1).is_some());
        assert!(table.get(0.2).is_some());
        assert!(table.get(0.3).is_none());
    }

    #[test]
    fn test_table_matches_scale_of_zero_sigma_epochs() {
        let efficiency = DetectionEfficiency { default_sigma: 1e-4, min_sigma: 0.5 };
        let outer = QuadratureConfig { epsabs: 1e-8, epsrel: 1e-7, ..Default::default() };
        let m = DistanceMarginalizer::new(density(160.0, 40.0), efficiency, outer).unwrap();
        let inner = QuadratureConfig::default();

        let table =
            m.normalization_table([0.0], bounds(), DEFAULT_REFERENCE_ABS_MAG, &inner).unwrap();
        let (key, stored) = table.iter().next().unwrap();
        assert_eq!(key, 0.5);
        let direct =
            m.normalization_factor(0.0, bounds(), DEFAULT_REFERENCE_ABS_MAG, &inner).unwrap();
        assert_eq!(stored.to_bits(), direct.to_bits());

        let limit = MagnitudeLimit { time: 0.0, mlim: 20.0, sigma: 0.0 };
        let p = m.marginal_probability(-16.0, &limit, &table, &inner).unwrap();
        let expected = m.marginal_non_detection(-16.0, 20.0, 0.5, &inner).unwrap() / direct;
        assert_relative_eq!(p, expected, max_relative = 1e-12);
    }

    #[test]
    fn test_normalization_bounded_by_range_width() {
        let m = marginalizer(160.0, 40.0);
        let inner = QuadratureConfig::default();
        let n = m.normalization_factor(0.2, bounds(), DEFAULT_REFERENCE_ABS_MAG, &inner).unwrap();
        assert!(n > 0.0 && n <= bounds().width(), "n = {n}");
    }

    #[test]
    fn test_missing_sigma_in_table_is_error() {
        let m = marginalizer(160.0, 40.0);
        let inner = QuadratureConfig::default();
        let limit = MagnitudeLimit { time: 0.0, mlim: 20.0, sigma: 0.5 };
        let err = m.marginal_probability(-16.0, &limit, &NormalizationTable::default(), &inner);
        assert!(err.is_err());
    }

    #[test]
    fn test_deterministic() {
        let m = marginalizer(120.0, 30.0);
        let inner = QuadratureConfig::default();
        let a = m.marginal_non_detection(-15.3, 20.4, 0.17, &inner).unwrap();
        let b = m.marginal_non_detection(-15.3, 20.4, 0.17, &inner).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn prop_normalization_positive_and_finite(sigma in 0.01f64..1.0) {
            let m = marginalizer(160.0, 40.0);
            let inner = QuadratureConfig::default();
            let n = m
                .normalization_factor(sigma, bounds(), DEFAULT_REFERENCE_ABS_MAG, &inner)
                .unwrap();
            prop_assert!(n.is_finite() && n > 0.0);
        }
    }
}
