//! Adaptive Gauss-Legendre quadrature on bounded 1-D intervals.
//!
//! Each segment is integrated with an N-point Gauss-Legendre rule, once over
//! the whole segment and once over its two halves; the difference is the
//! segment's error estimate. The segment with the largest error is bisected
//! until the global error meets the tolerance or the subdivision budget runs
//! out, in which case [`Error::Convergence`] is returned.
//!
//! Integrands are fallible (`FnMut(f64) -> Result<f64>`) so that a nested
//! integral failing inside an outer integrand propagates instead of being
//! replaced by a number.

use std::sync::OnceLock;

use nimbus_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Gauss-Legendre order (number of nodes per segment).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuadratureOrder {
    /// 8 nodes per segment.
    N8,
    /// 16 nodes per segment.
    N16,
    /// 32 nodes per segment (default).
    #[default]
    N32,
    /// 64 nodes per segment.
    N64,
}

impl QuadratureOrder {
    fn n(self) -> usize {
        match self {
            Self::N8 => 8,
            Self::N16 => 16,
            Self::N32 => 32,
            Self::N64 => 64,
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::N8 => 0,
            Self::N16 => 1,
            Self::N32 => 2,
            Self::N64 => 3,
        }
    }
}

/// Tolerances and budget for [`integrate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadratureConfig {
    /// Absolute error target.
    pub epsabs: f64,
    /// Relative error target.
    pub epsrel: f64,
    /// Maximum number of bisections.
    pub max_subdivisions: usize,
    /// Rule applied on each segment.
    pub order: QuadratureOrder,
}

impl Default for QuadratureConfig {
    fn default() -> Self {
        Self { epsabs: 1e-10, epsrel: 1e-8, max_subdivisions: 200, order: QuadratureOrder::N32 }
    }
}

impl QuadratureConfig {
    /// Check that the tolerances are usable.
    pub fn validate(&self) -> Result<()> {
        let ok = |x: f64| x.is_finite() && x >= 0.0;
        if !ok(self.epsabs) || !ok(self.epsrel) {
            return Err(Error::Validation(format!(
                "quadrature tolerances must be finite and >= 0 (epsabs={}, epsrel={})",
                self.epsabs, self.epsrel
            )));
        }
        if self.epsabs == 0.0 && self.epsrel == 0.0 {
            return Err(Error::Validation("epsabs and epsrel cannot both be zero".into()));
        }
        if self.max_subdivisions == 0 {
            return Err(Error::Validation("max_subdivisions must be >= 1".into()));
        }
        Ok(())
    }

    /// Same tolerances with the subdivision budget multiplied by `2^level`.
    pub fn escalated(&self, level: u32) -> Self {
        let factor = 1usize.checked_shl(level).unwrap_or(usize::MAX);
        Self { max_subdivisions: self.max_subdivisions.saturating_mul(factor), ..*self }
    }
}

/// Result of an adaptive integration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Integral {
    /// Integral estimate.
    pub value: f64,
    /// Estimated absolute error.
    pub abs_error: f64,
    /// Number of integrand evaluations.
    pub n_evaluations: usize,
    /// Number of bisections performed.
    pub n_subdivisions: usize,
}

/// Compute Gauss-Legendre nodes and weights on `[-1, 1]` for the given order.
///
/// Uses Newton iteration to find roots of the Legendre polynomial P_n(x),
/// then computes weights from the derivative P'_n at each root.
/// Exploits symmetry: only computes half the roots.
fn gauss_legendre_nodes_weights(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0f64; n];
    let mut weights = vec![0.0f64; n];

    if n == 0 {
        return (nodes, weights);
    }
    if n == 1 {
        weights[0] = 2.0;
        return (nodes, weights);
    }

    let nf = n as f64;
    let legendre = |x: f64| {
        // (P_n(x), P_{n-1}(x)) via the three-term recurrence.
        let mut p0 = 1.0f64;
        let mut p1 = x;
        for j in 2..=n {
            let jf = j as f64;
            let p2 = ((2.0 * jf - 1.0) * x * p1 - (jf - 1.0) * p0) / jf;
            p0 = p1;
            p1 = p2;
        }
        (p1, p0)
    };

    for i in 0..n.div_ceil(2) {
        // Chebyshev initial guess.
        let mut x = ((std::f64::consts::PI * (i as f64 + 0.75)) / (nf + 0.5)).cos();
        for _ in 0..100 {
            let (pn, pn1) = legendre(x);
            let dp = nf * (x * pn - pn1) / (x * x - 1.0);
            let dx = pn / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }

        let (pn, pn1) = legendre(x);
        let dp = nf * (x * pn - pn1) / (x * x - 1.0);
        let w = 2.0 / ((1.0 - x * x) * dp * dp);

        nodes[i] = -x;
        nodes[n - 1 - i] = x;
        weights[i] = w;
        weights[n - 1 - i] = w;
    }

    (nodes, weights)
}

type Rule = (Vec<f64>, Vec<f64>);

fn reference_rule(order: QuadratureOrder) -> &'static Rule {
    static RULES: [OnceLock<Rule>; 4] =
        [OnceLock::new(), OnceLock::new(), OnceLock::new(), OnceLock::new()];
    RULES[order.slot()].get_or_init(|| gauss_legendre_nodes_weights(order.n()))
}

struct Segment {
    a: f64,
    b: f64,
    /// Rule over the whole segment.
    coarse: f64,
    /// Rule over `[a, mid]`.
    left: f64,
    /// Rule over `[mid, b]`.
    right: f64,
}

impl Segment {
    fn value(&self) -> f64 {
        self.left + self.right
    }

    fn error(&self) -> f64 {
        (self.coarse - self.value()).abs()
    }
}

struct Integrator<'r, F> {
    f: F,
    rule: &'r Rule,
    n_evaluations: usize,
}

impl<F: FnMut(f64) -> Result<f64>> Integrator<'_, F> {
    fn apply(&mut self, a: f64, b: f64) -> Result<f64> {
        let (nodes, weights) = self.rule;
        let half_len = 0.5 * (b - a);
        let mid = 0.5 * (a + b);
        let mut acc = 0.0;
        for (&x, &w) in nodes.iter().zip(weights) {
            let t = mid + half_len * x;
            let y = (self.f)(t)?;
            if !y.is_finite() {
                return Err(Error::Computation(format!("integrand is {y} at x = {t}")));
            }
            acc += w * y;
        }
        self.n_evaluations += nodes.len();
        Ok(acc * half_len)
    }

    fn segment(&mut self, a: f64, b: f64, coarse: f64) -> Result<Segment> {
        let m = 0.5 * (a + b);
        let left = self.apply(a, m)?;
        let right = self.apply(m, b)?;
        Ok(Segment { a, b, coarse, left, right })
    }
}

/// Integrate `f` over `[a, b]`.
pub fn integrate<F>(f: F, a: f64, b: f64, config: &QuadratureConfig) -> Result<Integral>
where
    F: FnMut(f64) -> Result<f64>,
{
    integrate_with_breakpoints(f, a, b, &[], config)
}

/// Integrate `f` over `[a, b]`, starting from segments split at `breakpoints`.
///
/// Breakpoints outside `(a, b)` or non-finite are ignored. Placing them at
/// known sharp features (a density peak, a logistic transition) lets the
/// adaptive loop start from a good partition.
pub fn integrate_with_breakpoints<F>(
    f: F,
    a: f64,
    b: f64,
    breakpoints: &[f64],
    config: &QuadratureConfig,
) -> Result<Integral>
where
    F: FnMut(f64) -> Result<f64>,
{
    config.validate()?;
    if !a.is_finite() || !b.is_finite() {
        return Err(Error::Validation(format!("integration bounds must be finite, got [{a}, {b}]")));
    }
    if a > b {
        return Err(Error::Validation(format!("integration bounds reversed: [{a}, {b}]")));
    }
    if a == b {
        return Ok(Integral { value: 0.0, abs_error: 0.0, n_evaluations: 0, n_subdivisions: 0 });
    }

    let mut edges: Vec<f64> = Vec::with_capacity(breakpoints.len() + 2);
    edges.push(a);
    edges.extend(breakpoints.iter().copied().filter(|p| p.is_finite() && *p > a && *p < b));
    edges.push(b);
    edges.sort_by(f64::total_cmp);
    edges.dedup();

    let mut integrator = Integrator { f, rule: reference_rule(config.order), n_evaluations: 0 };
    let mut segments: Vec<Segment> = Vec::with_capacity(edges.len() + config.max_subdivisions);
    for w in edges.windows(2) {
        let coarse = integrator.apply(w[0], w[1])?;
        segments.push(integrator.segment(w[0], w[1], coarse)?);
    }

    let mut n_subdivisions = 0usize;
    loop {
        let value: f64 = segments.iter().map(Segment::value).sum();
        let abs_error: f64 = segments.iter().map(Segment::error).sum();
        let tolerance = config.epsabs.max(config.epsrel * value.abs());
        if abs_error <= tolerance {
            return Ok(Integral {
                value,
                abs_error,
                n_evaluations: integrator.n_evaluations,
                n_subdivisions,
            });
        }
        if n_subdivisions >= config.max_subdivisions {
            return Err(Error::Convergence(format!(
                "[{a}, {b}] after {n_subdivisions} subdivisions: estimate {value:e}, \
                 error {abs_error:e} > tolerance {tolerance:e}"
            )));
        }

        let worst = segments
            .iter()
            .enumerate()
            .max_by(|(_, x), (_, y)| x.error().total_cmp(&y.error()))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let seg = segments.swap_remove(worst);
        let m = 0.5 * (seg.a + seg.b);
        if !(m > seg.a && m < seg.b) {
            return Err(Error::Convergence(format!(
                "segment [{}, {}] cannot be bisected further (error {:e})",
                seg.a,
                seg.b,
                seg.error()
            )));
        }
        segments.push(integrator.segment(seg.a, m, seg.left)?);
        segments.push(integrator.segment(m, seg.b, seg.right)?);
        n_subdivisions += 1;
    }
}
