//! Batch evaluation of a field likelihood over posterior samples.
//!
//! Samples are evaluated independently in parallel (rayon); each worker
//! returns an `(index, outcome)` pair and the pairs are gathered by index, so
//! the result order never depends on completion order.

use nimbus_core::{Error, Result};
use nimbus_prob::quadrature::QuadratureConfig;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::likelihood::{FieldLikelihood, JointLikelihood};

/// What a numerical failure of one sample does to the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the whole batch.
    Abort,
    /// Mark the sample as failed and continue.
    #[default]
    Skip,
}

impl std::str::FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(Error::Validation(format!(
                "unknown failure policy '{other}' (expected 'abort' or 'skip')"
            ))),
        }
    }
}

/// Batch execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads (`0` = rayon global pool).
    pub threads: usize,
    /// Handling of per-sample failures.
    pub failure_policy: FailurePolicy,
    /// Retries after a quadrature non-convergence, each doubling the budget.
    pub max_retries: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { threads: 0, failure_policy: FailurePolicy::Skip, max_retries: 2 }
    }
}

/// Result of one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// Likelihood was computed.
    Value(JointLikelihood),
    /// Evaluation failed; the reason is kept for reporting.
    Failed(String),
}

impl SampleOutcome {
    /// Linear likelihood, if computed.
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(l) => Some(l.value),
            Self::Failed(_) => None,
        }
    }
}

/// A failed sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFailure {
    /// Position of the sample in the input.
    pub index: usize,
    /// Error message.
    pub reason: String,
}

/// Outcomes of a batch, in input order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchResult {
    outcomes: Vec<SampleOutcome>,
}

impl BatchResult {
    /// Wrap outcomes that are already in input order.
    pub fn new(outcomes: Vec<SampleOutcome>) -> Self {
        Self { outcomes }
    }

    /// Outcomes in input order.
    pub fn outcomes(&self) -> &[SampleOutcome] {
        &self.outcomes
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Linear likelihoods in input order (`None` for failed samples).
    pub fn values(&self) -> Vec<Option<f64>> {
        self.outcomes.iter().map(SampleOutcome::value).collect()
    }

    /// Failed samples in input order.
    pub fn failures(&self) -> Vec<SampleFailure> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, o)| match o {
                SampleOutcome::Failed(reason) => {
                    Some(SampleFailure { index, reason: reason.clone() })
                }
                SampleOutcome::Value(_) => None,
            })
            .collect()
    }
}

/// Place index-tagged results at their index.
///
/// Every index in `0..n` must occur exactly once.
pub fn gather<T>(pairs: Vec<(usize, T)>, n: usize) -> Result<Vec<T>> {
    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(n).collect();
    for (i, v) in pairs {
        let slot = slots
            .get_mut(i)
            .ok_or_else(|| Error::Validation(format!("result index {i} out of range (n = {n})")))?;
        if slot.replace(v).is_some() {
            return Err(Error::Validation(format!("duplicate result for index {i}")));
        }
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| Error::Validation(format!("missing result for index {i}"))))
        .collect()
}

/// Run `attempt` with `base`, retrying with an escalated budget while it
/// fails to converge.
pub fn retry_on_convergence<T>(
    base: &QuadratureConfig,
    max_retries: u32,
    mut attempt: impl FnMut(&QuadratureConfig) -> Result<T>,
) -> Result<T> {
    let mut level = 0;
    loop {
        let cfg = base.escalated(level);
        match attempt(&cfg) {
            Err(e) if e.is_convergence() && level < max_retries => {
                level += 1;
                log::warn!(
                    "quadrature did not converge ({e}); retrying with max_subdivisions = {}",
                    base.escalated(level).max_subdivisions
                );
            }
            other => return other,
        }
    }
}

/// Likelihood of one sample with the retry policy of `config`.
pub fn evaluate_sample(
    likelihood: &FieldLikelihood,
    theta: &[f64],
    config: &BatchConfig,
) -> Result<JointLikelihood> {
    retry_on_convergence(&likelihood.config().inner, config.max_retries, |inner| {
        likelihood.evaluate_with(theta, inner)
    })
}

fn check_dimensions(likelihood: &FieldLikelihood, samples: &[Vec<f64>]) -> Result<()> {
    let Some(first) = samples.first() else {
        return Ok(());
    };
    let n = likelihood.n_parameters().unwrap_or(first.len());
    if let Some((i, s)) = samples.iter().enumerate().find(|(_, s)| s.len() != n) {
        return Err(Error::Validation(format!(
            "sample {i} has {} parameters, expected {n}",
            s.len()
        )));
    }
    Ok(())
}

/// Evaluate `likelihood` for every sample, in input order.
///
/// Dimension mismatches fail before any evaluation. Numerical failures
/// follow `config.failure_policy`; with [`FailurePolicy::Abort`] the error of
/// the lowest failing index is returned.
pub fn evaluate_batch(
    likelihood: &FieldLikelihood,
    samples: &[Vec<f64>],
    config: &BatchConfig,
) -> Result<BatchResult> {
    check_dimensions(likelihood, samples)?;
    let n = samples.len();

    let run = || -> Vec<(usize, Result<JointLikelihood>)> {
        (0..n)
            .into_par_iter()
            .map(|i| {
                let out = evaluate_sample(likelihood, &samples[i], config)
                    .map_err(|e| e.context(format!("sample {i}")));
                (i, out)
            })
            .collect()
    };

    let pairs = if config.threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .map_err(|e| Error::Computation(format!("failed to create thread pool: {e}")))?;
        pool.install(run)
    } else {
        run()
    };

    let results = gather(pairs, n)?;
    let mut outcomes = Vec::with_capacity(n);
    for (i, r) in results.into_iter().enumerate() {
        match r {
            Ok(l) => outcomes.push(SampleOutcome::Value(l)),
            Err(e) => match config.failure_policy {
                FailurePolicy::Abort => return Err(e),
                FailurePolicy::Skip => {
                    log::warn!("skipping sample {i}: {e}");
                    outcomes.push(SampleOutcome::Failed(e.to_string()));
                }
            },
        }
    }
    Ok(BatchResult::new(outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lightcurve::{FnLightCurve, LinearLightCurve};
    use crate::likelihood::{FieldLikelihoodBuilder, LikelihoodConfig, SkyLocalization};
    use nimbus_core::traits::DistanceDensity;
    use nimbus_core::{Filter, MagnitudeLimit, MagnitudeLimitSeries};
    use nimbus_prob::distance::{DistanceAnsatz, PixelMixtureDistance, TabulatedDistance};
    use nimbus_prob::quadrature::QuadratureOrder;
    use rand::SeedableRng;
    use rand::seq::SliceRandom;
    use std::sync::Arc;

    const T0: f64 = 2458598.5;

    fn likelihood() -> FieldLikelihood {
        let distnorm = 1.0 / (150.0f64.powi(2) + 40.0f64.powi(2));
        let a = DistanceAnsatz::new(150.0, 40.0, distnorm).unwrap();
        let cfg = QuadratureConfig::default();
        let density: Arc<dyn DistanceDensity> =
            Arc::new(PixelMixtureDistance::single(a, (1.0, 2000.0), &cfg).unwrap());
        let g = MagnitudeLimitSeries::new(
            Filter::G,
            vec![
                MagnitudeLimit { time: T0 + 0.5, mlim: 20.0, sigma: 0.2 },
                MagnitudeLimit { time: T0 + 1.5, mlim: 20.4, sigma: 0.1 },
            ],
        )
        .unwrap();
        FieldLikelihoodBuilder::new(SkyLocalization::new(0.6, density).unwrap(), T0)
            .with_series(g)
            .with_default_light_curve(Arc::new(LinearLightCurve))
            .build()
            .unwrap()
    }

    fn samples() -> Vec<Vec<f64>> {
        (0..12).map(|i| vec![-18.0 + 0.5 * i as f64, 0.1 * (i % 3) as f64]).collect()
    }

    #[test]
    fn test_gather_is_order_independent() {
        let n = 50;
        let ordered: Vec<(usize, f64)> = (0..n).map(|i| (i, i as f64 * 0.5)).collect();
        let mut shuffled = ordered.clone();
        shuffled.shuffle(&mut rand::rngs::StdRng::seed_from_u64(7));
        assert_ne!(shuffled, ordered);
        assert_eq!(gather(shuffled, n).unwrap(), gather(ordered, n).unwrap());
    }

    #[test]
    fn test_gather_rejects_bad_indices() {
        assert!(gather(vec![(0, 1.0), (0, 2.0)], 2).is_err());
        assert!(gather(vec![(0, 1.0)], 2).is_err());
        assert!(gather(vec![(0, 1.0), (2, 2.0)], 2).is_err());
    }

    #[test]
    fn test_batch_matches_sequential_evaluation() {
        let lik = likelihood();
        let samples = samples();
        let config = BatchConfig { threads: 3, ..Default::default() };
        let batch = evaluate_batch(&lik, &samples, &config).unwrap();
        assert_eq!(batch.len(), samples.len());
        for (outcome, theta) in batch.outcomes().iter().zip(&samples) {
            let expected = lik.evaluate(theta).unwrap().value;
            assert_eq!(outcome.value().unwrap().to_bits(), expected.to_bits());
        }
    }

    #[test]
    fn test_thread_count_does_not_change_results() {
        let lik = likelihood();
        let samples = samples();
        let threads = |n| BatchConfig { threads: n, ..Default::default() };
        let a = evaluate_batch(&lik, &samples, &threads(1)).unwrap();
        let b = evaluate_batch(&lik, &samples, &threads(4)).unwrap();
        let c = evaluate_batch(&lik, &samples, &BatchConfig::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_dimension_mismatch_fails_before_evaluation() {
        let lik = likelihood();
        let samples = vec![vec![-16.0, 0.1], vec![-16.0]];
        assert!(evaluate_batch(&lik, &samples, &BatchConfig::default()).is_err());
    }

    #[test]
    fn test_failure_policy() {
        let density: Arc<dyn DistanceDensity> = Arc::new(
            PixelMixtureDistance::single(
                DistanceAnsatz::new(100.0, 20.0, 1e-4).unwrap(),
                (1.0, 2000.0),
                &QuadratureConfig::default(),
            )
            .unwrap(),
        );
        let limit = MagnitudeLimit { time: T0 + 1.0, mlim: 20.0, sigma: 0.2 };
        let g = MagnitudeLimitSeries::new(Filter::G, vec![limit]).unwrap();
        // Non-finite prediction for a negative first parameter.
        let model =
            FnLightCurve::new("guarded", 1, |p, _| if p[0] < 0.0 { f64::NAN } else { -16.0 });
        let lik = FieldLikelihoodBuilder::new(SkyLocalization::new(0.5, density).unwrap(), T0)
            .with_series(g)
            .with_light_curve(Filter::G, Arc::new(model))
            .build()
            .unwrap();
        let samples = vec![vec![1.0], vec![-1.0], vec![2.0]];

        let skip = evaluate_batch(&lik, &samples, &BatchConfig::default()).unwrap();
        assert_eq!(skip.len(), 3);
        assert!(skip.values()[0].is_some());
        assert!(skip.values()[1].is_none());
        let failures = skip.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
        assert!(failures[0].reason.contains("sample 1"));

        let abort = BatchConfig { failure_policy: FailurePolicy::Abort, ..Default::default() };
        assert!(evaluate_batch(&lik, &samples, &abort).is_err());
    }

    #[test]
    fn test_retry_escalates_budget() {
        let base = QuadratureConfig { max_subdivisions: 10, ..Default::default() };
        let mut seen = Vec::new();
        let out = retry_on_convergence(&base, 3, |cfg| {
            seen.push(cfg.max_subdivisions);
            if cfg.max_subdivisions < 40 {
                Err(Error::Convergence("budget".into()))
            } else {
                Ok(cfg.max_subdivisions)
            }
        })
        .unwrap();
        assert_eq!(out, 40);
        assert_eq!(seen, vec![10, 20, 40]);
    }

    #[test]
    fn test_retry_gives_up() {
        let base = QuadratureConfig::default();
        let mut calls = 0;
        let out: Result<()> = retry_on_convergence(&base, 2, |_| {
            calls += 1;
            Err(Error::Convergence("budget".into()))
        });
        assert!(out.unwrap_err().is_convergence());
        assert_eq!(calls, 3);

        // Other errors are not retried.
        let mut calls = 0;
        let out: Result<()> = retry_on_convergence(&base, 2, |_| {
            calls += 1;
            Err(Error::Computation("nan".into()))
        });
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }

    /// Field whose normalization is exact on the first pass while the
    /// in-field integral of a sharp transition needs many bisections.
    fn tight_budget_likelihood() -> FieldLikelihood {
        let density: Arc<dyn DistanceDensity> = Arc::new(
            TabulatedDistance::new(vec![100.0, 150.0, 200.0], vec![1.0, 2.0, 1.0]).unwrap(),
        );
        let g = MagnitudeLimitSeries::new(
            Filter::G,
            vec![MagnitudeLimit { time: T0 + 1.0, mlim: 19.5, sigma: 0.05 }],
        )
        .unwrap();
        let inner = QuadratureConfig {
            epsabs: 0.0,
            epsrel: 1e-12,
            max_subdivisions: 1,
            order: QuadratureOrder::N8,
        };
        FieldLikelihoodBuilder::new(SkyLocalization::new(0.5, density).unwrap(), T0)
            .with_series(g)
            .with_default_light_curve(Arc::new(LinearLightCurve))
            .with_config(LikelihoodConfig { inner, ..Default::default() })
            .build()
            .unwrap()
    }

    #[test]
    fn test_non_convergence_recovers_with_escalated_budget() {
        let lik = tight_budget_likelihood();
        // Limiting distance ~126 Mpc, inside the density support.
        let theta = [-16.0, 0.0];
        assert!(lik.evaluate(&theta).unwrap_err().is_convergence());

        let config = BatchConfig { max_retries: 10, ..Default::default() };
        let retried = evaluate_sample(&lik, &theta, &config).unwrap();
        let relaxed = lik.evaluate_with(&theta, &QuadratureConfig::default()).unwrap();
        assert!(retried.value.is_finite() && retried.value > 0.0);
        assert!((retried.value - relaxed.value).abs() <= 1e-7 * relaxed.value);

        let batch = evaluate_batch(&lik, &[theta.to_vec(), theta.to_vec()], &config).unwrap();
        assert!(batch.failures().is_empty());
        assert_eq!(batch.values(), vec![Some(retried.value); 2]);
    }

    #[test]
    fn test_non_convergence_without_retries_is_reported() {
        let lik = tight_budget_likelihood();
        let config = BatchConfig { max_retries: 0, ..Default::default() };
        let batch = evaluate_batch(&lik, &[vec![-16.0, 0.0]], &config).unwrap();
        assert!(matches!(batch.outcomes()[0], SampleOutcome::Failed(_)));
        let failures = batch.failures();
        assert_eq!(failures.len(), 1);
        let reason = &failures[0].reason;
        assert!(reason.contains("did not converge"), "{reason}");
        assert!(reason.contains("sample 0"), "{reason}");
        assert!(reason.contains("filter g"), "{reason}");
        assert!(reason.contains(&format!("epoch {}", T0 + 1.0)), "{reason}");

        let abort = BatchConfig { failure_policy: FailurePolicy::Abort, ..config };
        let err = evaluate_batch(&lik, &[vec![-16.0, 0.0]], &abort).unwrap_err();
        assert!(err.is_convergence());
    }

    #[test]
    fn test_failure_policy_parses() {
        assert_eq!("abort".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert_eq!("skip".parse::<FailurePolicy>().unwrap(), FailurePolicy::Skip);
        assert!("retry".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_empty_batch() {
        let out = evaluate_batch(&likelihood(), &[], &BatchConfig::default()).unwrap();
        assert!(out.is_empty());
    }
}
