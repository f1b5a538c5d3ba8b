//! Field-reduced localization file (JSON).
//!
//! ```json
//! {"field_probability": 0.012,
//!  "distance": {"kind": "pixels",
//!               "pixels": [{"prob": 1e-4, "distmu": 155.0,
//!                           "distsigma": 45.0, "distnorm": 3.9e-5}]}}
//! ```
//!
//! or, with a precomputed density, `"distance": {"kind": "tabulated",
//! "distance": [...], "density": [...]}`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use nimbus_core::DistanceDensity;
use nimbus_inference::SkyLocalization;
use nimbus_prob::{DistanceAnsatz, PixelMixtureDistance, QuadratureConfig, TabulatedDistance};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PixelSpec {
    pub prob: f64,
    pub distmu: f64,
    pub distsigma: f64,
    pub distnorm: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistanceSpec {
    Pixels { pixels: Vec<PixelSpec> },
    Tabulated { distance: Vec<f64>, density: Vec<f64> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalizationFile {
    pub field_probability: f64,
    pub distance: DistanceSpec,
}

impl LocalizationFile {
    /// Build the field localization; pixel mixtures are normalized on `distance_bounds`.
    pub fn into_localization(
        self,
        distance_bounds: (f64, f64),
        quadrature: &QuadratureConfig,
    ) -> Result<SkyLocalization> {
        let density: Arc<dyn DistanceDensity> = match self.distance {
            DistanceSpec::Pixels { pixels } => {
                let components = pixels
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        DistanceAnsatz::new(p.distmu, p.distsigma, p.distnorm)
                            .map(|a| (p.prob, a))
                            .with_context(|| format!("pixel {i}"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Arc::new(PixelMixtureDistance::new(&components, distance_bounds, quadrature)?)
            }
            DistanceSpec::Tabulated { distance, density } => {
                Arc::new(TabulatedDistance::new(distance, density)?)
            }
        };
        Ok(SkyLocalization::new(self.field_probability, density)?)
    }
}

pub fn read_localization(
    path: &Path,
    distance_bounds: (f64, f64),
    quadrature: &QuadratureConfig,
) -> Result<SkyLocalization> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read skymap file {}", path.display()))?;
    let file: LocalizationFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("invalid skymap file {}", path.display()))?;
    file.into_localization(distance_bounds, quadrature)
        .with_context(|| format!("skymap file {}", path.display()))
}
