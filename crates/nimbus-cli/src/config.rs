//! Run configuration (`--config`), YAML or JSON.
//!
//! Every key is optional. Unknown keys are rejected so that a misspelled
//! setting does not silently fall back to its default.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use nimbus_core::{Filter, IntegrationBounds, LightCurveModel, MagnitudeBounds};
use nimbus_inference::marginal::DEFAULT_REFERENCE_ABS_MAG;
use nimbus_inference::{
    BatchConfig, DetectionEfficiency, FailurePolicy, LightCurveKind, LikelihoodConfig, MixingPolicy,
};
use nimbus_prob::QuadratureConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoundsConfig {
    pub astrophysical: MagnitudeBounds,
    pub terrestrial: MagnitudeBounds,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        let IntegrationBounds { astrophysical, terrestrial } = IntegrationBounds::default();
        Self { astrophysical, terrestrial }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuadratureSection {
    pub inner: QuadratureConfig,
    pub outer: QuadratureConfig,
}

impl Default for QuadratureSection {
    fn default() -> Self {
        Self { inner: QuadratureConfig::default(), outer: LikelihoodConfig::default_outer() }
    }
}

/// Light-curve model per filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LightCurveSection {
    /// Model for filters not listed in `filters`.
    pub default: LightCurveKind,
    pub filters: BTreeMap<Filter, LightCurveKind>,
}

impl LightCurveSection {
    pub fn model_for(&self, filter: Filter) -> Box<dyn LightCurveModel> {
        self.filters.get(&filter).copied().unwrap_or(self.default).build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Fields with a larger E(B-V) are not analyzed.
    pub extinction_threshold: f64,
    pub bounds: BoundsConfig,
    /// Distance support (Mpc) of pixel-mixture densities.
    pub distance_bounds: (f64, f64),
    pub reference_abs_mag: f64,
    pub mixing: MixingPolicy,
    pub efficiency: DetectionEfficiency,
    pub failure_policy: FailurePolicy,
    pub max_retries: u32,
    /// Worker threads (0 = all cores).
    pub threads: usize,
    pub quadrature: QuadratureSection,
    pub light_curve: LightCurveSection,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            extinction_threshold: 2.0,
            bounds: BoundsConfig::default(),
            distance_bounds: (1.0, 2000.0),
            reference_abs_mag: DEFAULT_REFERENCE_ABS_MAG,
            mixing: MixingPolicy::default(),
            efficiency: DetectionEfficiency::default(),
            failure_policy: FailurePolicy::default(),
            max_retries: 2,
            threads: 0,
            quadrature: QuadratureSection::default(),
            light_curve: LightCurveSection::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.extinction_threshold.is_finite() {
            anyhow::bail!("extinction_threshold must be finite, got {}", self.extinction_threshold);
        }
        let (lo, hi) = self.distance_bounds;
        if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo < hi) {
            anyhow::bail!("distance_bounds must satisfy 0 < low < high, got [{lo}, {hi}]");
        }
        self.efficiency.validate()?;
        self.quadrature.inner.validate().context("quadrature.inner")?;
        self.quadrature.outer.validate().context("quadrature.outer")?;
        Ok(())
    }

    pub fn likelihood_config(&self) -> LikelihoodConfig {
        LikelihoodConfig {
            bounds: IntegrationBounds {
                astrophysical: self.bounds.astrophysical,
                terrestrial: self.bounds.terrestrial,
            },
            reference_abs_mag: self.reference_abs_mag,
            mixing: self.mixing,
            efficiency: self.efficiency,
            inner: self.quadrature.inner,
            outer: self.quadrature.outer,
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            threads: self.threads,
            failure_policy: self.failure_policy,
            max_retries: self.max_retries,
        }
    }
}

pub fn read_run_config(path: &Path) -> Result<RunConfig> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read config {}", path.display()))?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: RunConfig = if ext == "json" {
        serde_json::from_slice(&bytes)
            .with_context(|| format!("invalid JSON config {}", path.display()))?
    } else {
        serde_yaml_ng::from_slice(&bytes)
            .with_context(|| format!("invalid YAML config {}", path.display()))?
    };
    cfg.validate()?;
    Ok(cfg)
}
