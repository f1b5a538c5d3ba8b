//! Magnitude-limit series from the raw observation log.
//!
//! Per epoch the limit is the median `scimaglim` of the valid rows and its
//! uncertainty the population standard deviation of the same rows, corrected
//! for foreground extinction in the epoch's filter.

use std::collections::BTreeSet;

use nimbus_core::{
    Error, ExtinctionCoefficients, Filter, MagnitudeLimit, MagnitudeLimitSeries, Observation,
    Result, SurveyField,
};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};

/// Subtracts the per-filter extinction from a magnitude limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtinctionCorrector {
    coefficients: ExtinctionCoefficients,
}

impl ExtinctionCorrector {
    /// Corrector with explicit coefficients.
    pub fn new(coefficients: ExtinctionCoefficients) -> Self {
        Self { coefficients }
    }

    /// Corrector for a survey field.
    pub fn for_field(field: &SurveyField) -> Self {
        Self::new(field.extinction())
    }

    /// Corrected limit for survey filter id `fid`. Unknown ids are an error.
    pub fn correct(&self, fid: i64, mlim: f64) -> Result<f64> {
        let filter = Filter::from_id(fid)?;
        Ok(mlim - self.coefficients.for_filter(filter))
    }
}

/// Closed julian-date interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    start: f64,
    end: f64,
}

impl TimeWindow {
    /// Validated window: finite and `start <= end`.
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() || start > end {
            return Err(Error::Validation(format!(
                "time window must be finite with start <= end, got [{start}, {end}]"
            )));
        }
        Ok(Self { start, end })
    }

    /// Window start; the reference time of the light curves.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// Window end.
    pub fn end(&self) -> f64 {
        self.end
    }

    /// Whether `jd` lies inside the window.
    pub fn contains(&self, jd: f64) -> bool {
        jd >= self.start && jd <= self.end
    }
}

/// Which filters are analyzed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandMode {
    /// One series per filter observed at the field.
    #[default]
    Multi,
    /// A single g series built from every valid epoch of the field.
    Single,
}

/// Valid rows grouped by julian date, ascending.
fn group_epochs<'a>(
    rows: impl Iterator<Item = &'a Observation>,
) -> Vec<(f64, Vec<&'a Observation>)> {
    let mut rows: Vec<&Observation> = rows.collect();
    rows.sort_by(|a, b| a.jd.total_cmp(&b.jd));

    let mut epochs: Vec<(f64, Vec<&Observation>)> = Vec::new();
    for row in rows {
        match epochs.last_mut() {
            Some((jd, group)) if *jd == row.jd => group.push(row),
            _ => epochs.push((row.jd, vec![row])),
        }
    }
    epochs
}

fn epoch_limit(
    jd: f64,
    rows: &[&Observation],
    fid: i64,
    corrector: &ExtinctionCorrector,
) -> Result<MagnitudeLimit> {
    let values: Vec<f64> = rows.iter().map(|r| r.scimaglim).collect();
    let sigma = values.iter().population_std_dev();
    let median = Data::new(values).median();
    Ok(MagnitudeLimit { time: jd, mlim: corrector.correct(fid, median)?, sigma })
}

/// Build the per-filter magnitude-limit series of `field` inside `window`.
///
/// In [`BandMode::Multi`] the filters are the distinct filter ids of all field
/// rows in the window (any status); a filter without valid rows yields an
/// empty series. In [`BandMode::Single`] the only series is g, with every valid
/// epoch of the field, corrected in the smallest filter id observed at that
/// epoch.
pub fn build_series(
    observations: &[Observation],
    field: i64,
    window: TimeWindow,
    mode: BandMode,
    corrector: &ExtinctionCorrector,
) -> Result<Vec<MagnitudeLimitSeries>> {
    let in_field =
        move || observations.iter().filter(move |o| o.field == field && window.contains(o.jd));

    match mode {
        BandMode::Multi => {
            let fids: BTreeSet<i64> = in_field().map(|o| o.fid).collect();
            let mut series = Vec::with_capacity(fids.len());
            for fid in fids {
                let filter = Filter::from_id(fid)?;
                let limits = group_epochs(in_field().filter(|o| o.fid == fid && o.is_valid()))
                    .into_iter()
                    .map(|(jd, rows)| epoch_limit(jd, &rows, fid, corrector))
                    .collect::<Result<Vec<_>>>()?;
                series.push(MagnitudeLimitSeries::new(filter, limits)?);
            }
            Ok(series)
        }
        BandMode::Single => {
            let limits = group_epochs(in_field().filter(|o| o.is_valid()))
                .into_iter()
                .map(|(jd, rows)| {
                    // Groups are never empty.
                    let fid = rows.iter().map(|r| r.fid).min().unwrap_or(Filter::G.id());
                    epoch_limit(jd, &rows, fid, corrector)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(vec![MagnitudeLimitSeries::new(Filter::G, limits)?])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn obs(field: i64, jd: f64, fid: i64, status: i64, scimaglim: f64) -> Observation {
        Observation { field, jd, fid, status, scimaglim }
    }

    fn corrector() -> ExtinctionCorrector {
        ExtinctionCorrector::new(ExtinctionCoefficients { g: 0.3, r: 0.2, i: 0.1 })
    }

    fn log() -> Vec<Observation> {
        vec![
            obs(7, 10.0, 1, 1, 20.0),
            obs(7, 10.0, 1, 1, 20.4),
            obs(7, 10.0, 1, 1, 20.2),
            obs(7, 11.0, 1, 1, 20.5),
            obs(7, 10.5, 2, 1, 19.8),
            obs(7, 10.7, 2, 0, 19.0),
            obs(7, 10.9, 3, 0, 18.0),
            // other field and out-of-window rows
            obs(8, 10.0, 1, 1, 25.0),
            obs(7, 20.0, 1, 1, 25.0),
        ]
    }

    #[test]
    fn test_corrector_rejects_unknown_filter() {
        assert_relative_eq!(corrector().correct(2, 20.0).unwrap(), 19.8);
        assert!(matches!(corrector().correct(4, 20.0), Err(Error::UnknownFilter(4))));
    }

    #[test]
    fn test_multi_band_series() {
        let window = TimeWindow::new(9.0, 12.0).unwrap();
        let series = build_series(&log(), 7, window, BandMode::Multi, &corrector()).unwrap();
        assert_eq!(series.len(), 3);

        let g = &series[0];
        assert_eq!(g.filter(), Filter::G);
        assert_eq!(g.len(), 2);
        assert_relative_eq!(g.limits()[0].mlim, 20.2 - 0.3, epsilon = 1e-12);
        // population std of {20.0, 20.2, 20.4}
        assert_relative_eq!(g.limits()[0].sigma, (0.08f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_eq!(g.limits()[1].sigma, 0.0);

        // Invalid rows are dropped, the filter stays with its valid epochs.
        assert_eq!(series[1].filter(), Filter::R);
        assert_eq!(series[1].len(), 1);

        // Filter used only with invalid rows: empty series, not zero-filled.
        assert_eq!(series[2].filter(), Filter::I);
        assert!(series[2].is_empty());
    }

    #[test]
    fn test_single_band_series() {
        let window = TimeWindow::new(9.0, 12.0).unwrap();
        let series = build_series(&log(), 7, window, BandMode::Single, &corrector()).unwrap();
        assert_eq!(series.len(), 1);
        let g = &series[0];
        assert_eq!(g.filter(), Filter::G);
        let times: Vec<f64> = g.limits().iter().map(|l| l.time).collect();
        assert_eq!(times, vec![10.0, 10.5, 11.0]);
        // r-only epoch corrected with A_r
        assert_relative_eq!(g.limits()[1].mlim, 19.8 - 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_unknown_filter_in_window_is_error() {
        let mut rows = log();
        rows.push(obs(7, 10.2, 9, 1, 20.0));
        let window = TimeWindow::new(9.0, 12.0).unwrap();
        let err = build_series(&rows, 7, window, BandMode::Multi, &corrector()).unwrap_err();
        assert!(matches!(err, Error::UnknownFilter(9)));
    }

    #[test]
    fn test_no_rows_gives_no_series() {
        let window = TimeWindow::new(100.0, 200.0).unwrap();
        let multi = build_series(&log(), 7, window, BandMode::Multi, &corrector()).unwrap();
        assert!(multi.is_empty());
        let single = build_series(&log(), 7, window, BandMode::Single, &corrector()).unwrap();
        assert!(single[0].is_empty());
    }

    #[test]
    fn test_window_validation() {
        assert!(TimeWindow::new(2.0, 1.0).is_err());
        assert!(TimeWindow::new(f64::NAN, 1.0).is_err());
        let w = TimeWindow::new(1.0, 2.0).unwrap();
        assert!(w.contains(1.0) && w.contains(2.0) && !w.contains(2.5));
    }
}
