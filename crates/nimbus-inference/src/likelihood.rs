//! Single-field joint likelihood of a magnitude-limit history.
//!
//! For a parameter vector `theta`, every epoch of every filter contributes the
//! in-field density `p_in` (light-curve prediction marginalized over distance
//! and normalized) and the null-event density `p_null` of its limit. The
//! field probability `P_f` mixes the two hypotheses; epochs are independent,
//! so their factors multiply. A filter without epochs contributes nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use nimbus_core::traits::{DistanceDensity, LightCurveModel, NullEventModel};
use nimbus_core::{
    Error, Filter, IntegrationBounds, MagnitudeLimit, MagnitudeLimitSeries, Result,
};
use nimbus_prob::math::ln_nonneg;
use nimbus_prob::quadrature::QuadratureConfig;
use serde::{Deserialize, Serialize};

use crate::detection::DetectionEfficiency;
use crate::marginal::{DEFAULT_REFERENCE_ABS_MAG, DistanceMarginalizer, NormalizationTable};
use crate::null_event::UniformNullEvent;

/// How the in-field and null-event hypotheses are mixed by `P_f`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixingPolicy {
    /// `Π_e [P_f p_in(e) + (1 - P_f) p_null(e)]`
    #[default]
    PerEpoch,
    /// `P_f Π_e p_in(e) + (1 - P_f) Π_e p_null(e)`
    Joint,
}

/// Field probability and distance density of one survey field.
#[derive(Clone)]
pub struct SkyLocalization {
    field_probability: f64,
    distance: Arc<dyn DistanceDensity>,
}

impl SkyLocalization {
    /// `field_probability` must lie in `[0, 1]`.
    pub fn new(field_probability: f64, distance: Arc<dyn DistanceDensity>) -> Result<Self> {
        if !(0.0..=1.0).contains(&field_probability) {
            return Err(Error::Validation(format!(
                "field probability must be in [0, 1], got {field_probability}"
            )));
        }
        Ok(Self { field_probability, distance })
    }

    /// P_f
    pub fn field_probability(&self) -> f64 {
        self.field_probability
    }

    /// Distance density of the field.
    pub fn distance(&self) -> &Arc<dyn DistanceDensity> {
        &self.distance
    }
}

impl std::fmt::Debug for SkyLocalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkyLocalization")
            .field("field_probability", &self.field_probability)
            .field("support", &self.distance.support())
            .finish()
    }
}

/// Numerical settings of a field likelihood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LikelihoodConfig {
    /// In-field normalization and null-event ranges.
    pub bounds: IntegrationBounds,
    /// Absolute magnitude of the normalization integral.
    pub reference_abs_mag: f64,
    /// Hypothesis mixing.
    pub mixing: MixingPolicy,
    /// Detection-efficiency sigma handling.
    pub efficiency: DetectionEfficiency,
    /// Distance integral.
    pub inner: QuadratureConfig,
    /// Magnitude integral of the normalization factors.
    pub outer: QuadratureConfig,
}

impl LikelihoodConfig {
    /// Default tolerances of the magnitude integral.
    pub fn default_outer() -> QuadratureConfig {
        QuadratureConfig { epsabs: 1e-8, epsrel: 1e-7, max_subdivisions: 100, ..Default::default() }
    }
}

impl Default for LikelihoodConfig {
    fn default() -> Self {
        Self {
            bounds: IntegrationBounds::default(),
            reference_abs_mag: DEFAULT_REFERENCE_ABS_MAG,
            mixing: MixingPolicy::default(),
            efficiency: DetectionEfficiency::default(),
            inner: QuadratureConfig::default(),
            outer: Self::default_outer(),
        }
    }
}

/// Likelihood of one parameter vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointLikelihood {
    /// Unnormalized likelihood.
    pub value: f64,
    /// `ln(value)`, accumulated per factor so it stays finite when `value` underflows.
    pub ln_value: f64,
    /// Number of epochs that contributed.
    pub n_epochs: usize,
}

impl JointLikelihood {
    fn neutral() -> Self {
        Self { value: 1.0, ln_value: 0.0, n_epochs: 0 }
    }
}

#[derive(Clone)]
struct Band {
    series: MagnitudeLimitSeries,
    model: Option<Arc<dyn LightCurveModel>>,
}

/// Builder for [`FieldLikelihood`].
pub struct FieldLikelihoodBuilder {
    localization: SkyLocalization,
    reference_time: f64,
    series: Vec<MagnitudeLimitSeries>,
    models: BTreeMap<Filter, Arc<dyn LightCurveModel>>,
    default_model: Option<Arc<dyn LightCurveModel>>,
    null_event: Option<Arc<dyn NullEventModel>>,
    config: LikelihoodConfig,
}

impl FieldLikelihoodBuilder {
    /// Start a field likelihood; `reference_time` is the julian date light
    /// curves are evaluated from.
    pub fn new(localization: SkyLocalization, reference_time: f64) -> Self {
        Self {
            localization,
            reference_time,
            series: Vec::new(),
            models: BTreeMap::new(),
            default_model: None,
            null_event: None,
            config: LikelihoodConfig::default(),
        }
    }

    /// Add the series of one filter.
    pub fn with_series(mut self, series: MagnitudeLimitSeries) -> Self {
        self.series.push(series);
        self
    }

    /// Add several series.
    pub fn with_all_series(
        mut self,
        series: impl IntoIterator<Item = MagnitudeLimitSeries>,
    ) -> Self {
        self.series.extend(series);
        self
    }

    /// Bind the light-curve model of `filter`.
    pub fn with_light_curve(mut self, filter: Filter, model: Arc<dyn LightCurveModel>) -> Self {
        self.models.insert(filter, model);
        self
    }

    /// Model for every filter without an explicit binding.
    pub fn with_default_light_curve(mut self, model: Arc<dyn LightCurveModel>) -> Self {
        self.default_model = Some(model);
        self
    }

    /// Replace the uniform null-event density.
    pub fn with_null_event(mut self, model: Arc<dyn NullEventModel>) -> Self {
        self.null_event = Some(model);
        self
    }

    /// Numerical settings.
    pub fn with_config(mut self, config: LikelihoodConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate inputs and precompute the normalization factors.
    pub fn build(self) -> Result<FieldLikelihood> {
        let Self {
            localization,
            reference_time,
            series,
            mut models,
            default_model,
            null_event,
            config,
        } = self;

        if !reference_time.is_finite() {
            return Err(Error::Validation(format!(
                "reference time must be finite, got {reference_time}"
            )));
        }
        if !config.reference_abs_mag.is_finite() {
            return Err(Error::Validation(format!(
                "reference absolute magnitude must be finite, got {}",
                config.reference_abs_mag
            )));
        }
        config.inner.validate()?;

        let mut bands: Vec<Band> = Vec::with_capacity(series.len());
        let mut n_parameters: Option<usize> = None;
        for s in series {
            let filter = s.filter();
            if bands.iter().any(|b| b.series.filter() == filter) {
                return Err(Error::Validation(format!("duplicate series for filter {filter}")));
            }
            let model = models.remove(&filter).or_else(|| default_model.clone());
            if !s.is_empty() {
                let Some(m) = &model else {
                    return Err(Error::Validation(format!(
                        "filter {filter} has {} epochs but no light-curve model",
                        s.len()
                    )));
                };
                match n_parameters {
                    Some(n) if n != m.n_parameters() => {
                        return Err(Error::Validation(format!(
                            "light-curve models disagree on the parameter count \
                             ({n} vs {} for filter {filter})",
                            m.n_parameters()
                        )));
                    }
                    _ => n_parameters = Some(m.n_parameters()),
                }
            }
            bands.push(Band { series: s, model });
        }

        let marginalizer = DistanceMarginalizer::new(
            localization.distance.clone(),
            config.efficiency,
            config.outer,
        )?;

        let n_epochs: usize = bands.iter().map(|b| b.series.len()).sum();
        let norms = if localization.field_probability > 0.0 && n_epochs > 0 {
            let sigmas = bands.iter().flat_map(|b| b.series.limits().iter().map(|l| l.sigma));
            marginalizer.normalization_table(
                sigmas.collect::<Vec<_>>(),
                config.bounds.astrophysical,
                config.reference_abs_mag,
                &config.inner,
            )?
        } else {
            NormalizationTable::default()
        };
        log::debug!(
            "field likelihood: {} filters, {n_epochs} epochs, {} normalization factors, P_f = {}",
            bands.len(),
            norms.len(),
            localization.field_probability
        );

        let null_event = null_event
            .unwrap_or_else(|| Arc::new(UniformNullEvent::new(config.bounds.terrestrial)));

        Ok(FieldLikelihood {
            bands,
            reference_time,
            field_probability: localization.field_probability,
            marginalizer,
            norms,
            null_event,
            n_parameters,
            config,
        })
    }
}

/// Joint likelihood of one field's magnitude-limit history.
///
/// All state is read-only after construction; evaluation can run on many
/// threads at once.
#[derive(Clone)]
pub struct FieldLikelihood {
    bands: Vec<Band>,
    reference_time: f64,
    field_probability: f64,
    marginalizer: DistanceMarginalizer,
    norms: NormalizationTable,
    null_event: Arc<dyn NullEventModel>,
    n_parameters: Option<usize>,
    config: LikelihoodConfig,
}

#[inline]
fn mix(p_f: f64, p_in: f64, p_null: f64) -> f64 {
    if p_f == 0.0 {
        p_null
    } else if p_f == 1.0 {
        p_in
    } else {
        p_f * p_in + (1.0 - p_f) * p_null
    }
}

#[inline]
fn log_mix(p_f: f64, ln_in: f64, ln_null: f64) -> f64 {
    if p_f == 0.0 {
        return ln_null;
    }
    if p_f == 1.0 {
        return ln_in;
    }
    let a = p_f.ln() + ln_in;
    let b = (1.0 - p_f).ln() + ln_null;
    let m = a.max(b);
    if m == f64::NEG_INFINITY {
        return m;
    }
    m + ((a - m).exp() + (b - m).exp()).ln()
}

impl FieldLikelihood {
    /// Field probability P_f.
    pub fn field_probability(&self) -> f64 {
        self.field_probability
    }

    /// Julian date light curves are evaluated from.
    pub fn reference_time(&self) -> f64 {
        self.reference_time
    }

    /// Series in the order they were added.
    pub fn series(&self) -> impl Iterator<Item = &MagnitudeLimitSeries> + '_ {
        self.bands.iter().map(|b| &b.series)
    }

    /// Total number of epochs over all filters.
    pub fn n_epochs(&self) -> usize {
        self.bands.iter().map(|b| b.series.len()).sum()
    }

    /// Parameter count expected by the bound models (`None` without epochs).
    pub fn n_parameters(&self) -> Option<usize> {
        self.n_parameters
    }

    /// Precomputed normalization factors.
    pub fn normalization(&self) -> &NormalizationTable {
        &self.norms
    }

    /// Numerical settings.
    pub fn config(&self) -> &LikelihoodConfig {
        &self.config
    }

    /// Distance marginalizer of the field.
    pub fn marginalizer(&self) -> &DistanceMarginalizer {
        &self.marginalizer
    }

    /// Check the dimension and finiteness of a parameter vector.
    pub fn validate_parameters(&self, theta: &[f64]) -> Result<()> {
        match self.n_parameters {
            Some(n) if theta.len() != n => {
                return Err(Error::Validation(format!(
                    "parameter vector has length {}, models expect {n}",
                    theta.len()
                )));
            }
            _ => {}
        }
        if let Some(i) = theta.iter().position(|v| !v.is_finite()) {
            return Err(Error::Validation(format!("parameter {i} is not finite ({})", theta[i])));
        }
        Ok(())
    }

    fn epochs(&self) -> impl Iterator<Item = (&Band, &MagnitudeLimit)> + '_ {
        self.bands.iter().flat_map(|b| b.series.limits().iter().map(move |l| (b, l)))
    }

    fn in_field(
        &self,
        band: &Band,
        limit: &MagnitudeLimit,
        theta: &[f64],
        inner: &QuadratureConfig,
    ) -> Result<f64> {
        let filter = band.series.filter();
        let ctx = || format!("filter {filter}, epoch {}", limit.time);
        let Some(model) = &band.model else {
            return Err(Error::Validation(format!("{}: no light-curve model", ctx())));
        };
        let abs_mag = model
            .predict(theta, limit.time - self.reference_time)
            .map_err(|e| e.context(ctx()))?;
        if !abs_mag.is_finite() {
            return Err(Error::Computation(format!(
                "{}: light curve '{}' predicted {abs_mag}",
                ctx(),
                model.name()
            )));
        }
        self.marginalizer
            .marginal_probability(abs_mag, limit, &self.norms, inner)
            .map_err(|e| e.context(ctx()))
    }

    fn null(&self, band: &Band, limit: &MagnitudeLimit) -> Result<f64> {
        let p = self.null_event.pdf(limit.mlim);
        if !p.is_finite() || p < 0.0 {
            return Err(Error::Computation(format!(
                "filter {}, epoch {}: null-event density is {p}",
                band.series.filter(),
                limit.time
            )));
        }
        Ok(p)
    }

    /// In-field and null-event densities of every epoch, in series order.
    pub fn epoch_terms(&self, theta: &[f64]) -> Result<Vec<EpochTerm>> {
        self.validate_parameters(theta)?;
        self.epochs()
            .map(|(band, limit)| {
                Ok(EpochTerm {
                    filter: band.series.filter(),
                    time: limit.time,
                    in_field: self.in_field(band, limit, theta, &self.config.inner)?,
                    null_event: self.null(band, limit)?,
                })
            })
            .collect()
    }

    /// Likelihood of `theta` with the configured quadrature.
    pub fn evaluate(&self, theta: &[f64]) -> Result<JointLikelihood> {
        self.evaluate_with(theta, &self.config.inner)
    }

    /// Likelihood of `theta` with an explicit distance-integral configuration.
    pub fn evaluate_with(
        &self,
        theta: &[f64],
        inner: &QuadratureConfig,
    ) -> Result<JointLikelihood> {
        self.validate_parameters(theta)?;
        let n_epochs = self.n_epochs();
        if n_epochs == 0 {
            return Ok(JointLikelihood::neutral());
        }

        let p_f = self.field_probability;
        // Hypotheses with zero weight are not evaluated at all.
        let need_in = p_f > 0.0;
        let need_null = p_f < 1.0;

        match self.config.mixing {
            MixingPolicy::PerEpoch => {
                let mut value = 1.0;
                let mut ln_value = 0.0;
                for (band, limit) in self.epochs() {
                    let p_in =
                        if need_in { self.in_field(band, limit, theta, inner)? } else { 0.0 };
                    let p_null = if need_null { self.null(band, limit)? } else { 0.0 };
                    let p = mix(p_f, p_in, p_null);
                    value *= p;
                    ln_value += ln_nonneg(p);
                }
                Ok(JointLikelihood { value, ln_value, n_epochs })
            }
            MixingPolicy::Joint => {
                let (mut prod_in, mut ln_in) = (1.0, 0.0);
                let (mut prod_null, mut ln_null) = (1.0, 0.0);
                for (band, limit) in self.epochs() {
                    if need_in {
                        let p = self.in_field(band, limit, theta, inner)?;
                        prod_in *= p;
                        ln_in += ln_nonneg(p);
                    }
                    if need_null {
                        let p = self.null(band, limit)?;
                        prod_null *= p;
                        ln_null += ln_nonneg(p);
                    }
                }
                Ok(JointLikelihood {
                    value: mix(p_f, prod_in, prod_null),
                    ln_value: log_mix(p_f, ln_in, ln_null),
                    n_epochs,
                })
            }
        }
    }
}

/// Densities of one epoch under both hypotheses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochTerm {
    /// Filter of the epoch.
    pub filter: Filter,
    /// Julian date.
    pub time: f64,
    /// Normalized in-field density `p_in`.
    pub in_field: f64,
    /// Null-event density `p_null`.
    pub null_event: f64,
}
