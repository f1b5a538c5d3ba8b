//! Small numerically-stable math utilities used across the likelihood code.

/// Stable sigmoid (`expit`): `1 / (1 + exp(-x))`.
///
/// Branchless core: single `exp(-|x|)`, then `cmov` for the sign flip.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let abs_x = x.abs();
    let e = (-abs_x).exp();
    let recip = 1.0 / (1.0 + e);
    // x >= 0: sigmoid = 1/(1+exp(-x)) = recip
    // x <  0: sigmoid = exp(x)/(1+exp(x)) = e/(1+e) = e*recip
    if x >= 0.0 { recip } else { e * recip }
}

/// Distance modulus `5 log10(d / 10 pc)` for a luminosity distance in Mpc.
#[inline]
pub fn distance_modulus(d_mpc: f64) -> f64 {
    5.0 * d_mpc.log10() + 25.0
}

/// Distance (Mpc) at which a source of absolute magnitude `abs_mag` appears
/// at apparent magnitude `mlim`. Inverse of [`distance_modulus`].
#[inline]
pub fn limiting_distance(mlim: f64, abs_mag: f64) -> f64 {
    10f64.powf((mlim - abs_mag - 25.0) / 5.0)
}

/// `ln(x)` for `x >= 0`, mapping `0` to `-inf`.
#[inline]
pub fn ln_nonneg(x: f64) -> f64 {
    if x > 0.0 { x.ln() } else { f64::NEG_INFINITY }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sigmoid_bounds_and_symmetry() {
        let xs: [f64; 7] = [-50.0, -10.0, -1.0, 0.0, 1.0, 10.0, 50.0];
        for x in xs {
            let s = sigmoid(x);
            assert!((0.0..=1.0).contains(&s), "sigmoid({})={}", x, s);
            let t = sigmoid(-x);
            assert!((s + t - 1.0).abs() < 1e-15, "sigmoid symmetry failed at {}", x);
        }
    }

    #[test]
    fn test_sigmoid_matches_naive_moderate_values() {
        for x in [-5.0f64, -0.3, 0.0, 0.3, 5.0] {
            assert_relative_eq!(sigmoid(x), 1.0 / (1.0 + (-x).exp()), epsilon = 1e-15);
        }
    }

    #[test]
    fn test_sigmoid_is_finite_extremes() {
        for x in [-1e6f64, -800.0, 800.0, 1e6] {
            let s = sigmoid(x);
            assert!(s.is_finite(), "x={} produced {}", x, s);
        }
        assert_eq!(sigmoid(1e6), 1.0);
        assert_eq!(sigmoid(-1e6), 0.0);
    }

    #[test]
    fn test_distance_modulus_reference_points() {
        // 10 pc = 1e-5 Mpc has modulus 0.
        assert_relative_eq!(distance_modulus(1e-5), 0.0, epsilon = 1e-12);
        assert_relative_eq!(distance_modulus(100.0), 35.0, epsilon = 1e-12);
    }

    #[test]
    fn test_limiting_distance_inverts_modulus() {
        for d in [0.5, 40.0, 160.0, 1500.0] {
            let m = -16.0 + distance_modulus(d);
            assert_relative_eq!(limiting_distance(m, -16.0), d, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_ln_nonneg() {
        assert_eq!(ln_nonneg(0.0), f64::NEG_INFINITY);
        assert_relative_eq!(ln_nonneg(std::f64::consts::E), 1.0, epsilon = 1e-15);
    }
}
