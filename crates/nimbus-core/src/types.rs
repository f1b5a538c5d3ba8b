//! Common data types for nimbus

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Survey photometric filter.
///
/// The set is closed: survey ids other than 1, 2, 3 are rejected rather than
/// mapped to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// g band (survey id 1)
    G,
    /// r band (survey id 2)
    R,
    /// i band (survey id 3)
    I,
}

impl Filter {
    /// All recognized filters, in survey-id order.
    pub const ALL: [Filter; 3] = [Filter::G, Filter::R, Filter::I];

    /// Map a survey filter id to a filter.
    pub fn from_id(id: i64) -> Result<Self> {
        match id {
            1 => Ok(Filter::G),
            2 => Ok(Filter::R),
            3 => Ok(Filter::I),
            other => Err(Error::UnknownFilter(other)),
        }
    }

    /// Survey filter id.
    pub fn id(self) -> i64 {
        match self {
            Filter::G => 1,
            Filter::R => 2,
            Filter::I => 3,
        }
    }

    /// Single-letter band name.
    pub fn name(self) -> &'static str {
        match self {
            Filter::G => "g",
            Filter::R => "r",
            Filter::I => "i",
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the survey observation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Survey field id.
    pub field: i64,
    /// Julian date of the exposure.
    pub jd: f64,
    /// Survey filter id (see [`Filter::from_id`]).
    pub fid: i64,
    /// Processing status; only `1` marks a valid limit.
    pub status: i64,
    /// Limiting magnitude of the science image.
    pub scimaglim: f64,
}

impl Observation {
    /// Whether the row carries a usable magnitude limit.
    pub fn is_valid(&self) -> bool {
        self.status == 1 && self.scimaglim.is_finite()
    }
}

/// Per-filter foreground extinction A_f (magnitudes).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtinctionCoefficients {
    /// A_g
    pub g: f64,
    /// A_r
    pub r: f64,
    /// A_i
    pub i: f64,
}

impl ExtinctionCoefficients {
    /// Extinction in `filter`.
    pub fn for_filter(&self, filter: Filter) -> f64 {
        match filter {
            Filter::G => self.g,
            Filter::R => self.r,
            Filter::I => self.i,
        }
    }
}

/// One survey field record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyField {
    /// Survey field id.
    #[serde(rename = "field_ID")]
    pub field_id: i64,
    /// Foreground reddening E(B-V).
    pub ebv: f64,
    /// g-band extinction.
    #[serde(rename = "A_g")]
    pub a_g: f64,
    /// r-band extinction.
    #[serde(rename = "A_r")]
    pub a_r: f64,
    /// i-band extinction.
    #[serde(rename = "A_i")]
    pub a_i: f64,
    /// Reference sky-map pixel of the field.
    pub ipix: i64,
}

impl SurveyField {
    /// Extinction coefficients of this field.
    pub fn extinction(&self) -> ExtinctionCoefficients {
        ExtinctionCoefficients { g: self.a_g, r: self.a_r, i: self.a_i }
    }

    /// Fail if the field's E(B-V) exceeds `threshold`.
    pub fn ensure_analyzable(&self, threshold: f64) -> Result<()> {
        if !self.ebv.is_finite() || self.ebv > threshold {
            return Err(Error::ExtinctionTooHigh { field: self.field_id, ebv: self.ebv, threshold });
        }
        Ok(())
    }
}

/// Extinction-corrected limiting magnitude at one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagnitudeLimit {
    /// Epoch (julian date).
    pub time: f64,
    /// Corrected limiting magnitude.
    pub mlim: f64,
    /// Uncertainty of the limit (magnitudes, >= 0).
    pub sigma: f64,
}

/// Time-ordered magnitude limits of one filter at one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagnitudeLimitSeries {
    filter: Filter,
    limits: Vec<MagnitudeLimit>,
}

impl MagnitudeLimitSeries {
    /// Build a series; epochs must be finite and strictly increasing.
    pub fn new(filter: Filter, limits: Vec<MagnitudeLimit>) -> Result<Self> {
        for (i, l) in limits.iter().enumerate() {
            if !l.time.is_finite() || !l.mlim.is_finite() {
                return Err(Error::Validation(format!(
                    "filter {filter}: non-finite epoch or limit at position {i}"
                )));
            }
            if l.sigma.is_nan() || l.sigma < 0.0 {
                return Err(Error::Validation(format!(
                    "filter {filter}: negative or NaN uncertainty at epoch {}",
                    l.time
                )));
            }
        }
        if limits.windows(2).any(|w| w[1].time <= w[0].time) {
            return Err(Error::Validation(format!(
                "filter {filter}: epochs must be strictly increasing"
            )));
        }
        Ok(Self { filter, limits })
    }

    /// Series with no epochs (filter unused in the window).
    pub fn empty(filter: Filter) -> Self {
        Self { filter, limits: Vec::new() }
    }

    /// Filter of this series.
    pub fn filter(&self) -> Filter {
        self.filter
    }

    /// Limits in epoch order.
    pub fn limits(&self) -> &[MagnitudeLimit] {
        &self.limits
    }

    /// Number of epochs.
    pub fn len(&self) -> usize {
        self.limits.len()
    }

    /// Whether the filter has no epochs.
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

/// Closed magnitude interval `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(f64, f64)", into = "(f64, f64)")]
pub struct MagnitudeBounds {
    low: f64,
    high: f64,
}

impl MagnitudeBounds {
    /// Validated bounds: both finite and `low < high`.
    pub fn new(low: f64, high: f64) -> Result<Self> {
        if !low.is_finite() || !high.is_finite() || low >= high {
            return Err(Error::Validation(format!(
                "magnitude bounds must be finite with low < high, got [{low}, {high}]"
            )));
        }
        Ok(Self { low, high })
    }

    /// Lower bound.
    pub fn low(&self) -> f64 {
        self.low
    }

    /// Upper bound.
    pub fn high(&self) -> f64 {
        self.high
    }

    /// `high - low`
    pub fn width(&self) -> f64 {
        self.high - self.low
    }
}

impl TryFrom<(f64, f64)> for MagnitudeBounds {
    type Error = Error;

    fn try_from((low, high): (f64, f64)) -> Result<Self> {
        Self::new(low, high)
    }
}

impl From<MagnitudeBounds> for (f64, f64) {
    fn from(b: MagnitudeBounds) -> Self {
        (b.low, b.high)
    }
}

/// The two absolute-magnitude ranges of an analysis.
///
/// `astrophysical` normalizes the in-field hypothesis; `terrestrial` is the
/// support of the null-event density.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegrationBounds {
    /// (m_low_a, m_high_a)
    pub astrophysical: MagnitudeBounds,
    /// (m_low_t, m_high_t)
    pub terrestrial: MagnitudeBounds,
}

impl Default for IntegrationBounds {
    fn default() -> Self {
        let range = MagnitudeBounds { low: 15.0, high: 23.0 };
        Self { astrophysical: range, terrestrial: range }
    }
}
