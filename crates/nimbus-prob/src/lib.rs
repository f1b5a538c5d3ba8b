//! Probability building blocks for nimbus.
//!
//! This crate hosts the numerical machinery the likelihood engine is built on:
//! - small numeric helpers (stable sigmoid, distance modulus)
//! - adaptive Gauss-Legendre quadrature with error control
//! - distance densities derived from a localization map

pub mod distance;
pub mod math;
pub mod quadrature;

pub use distance::{DistanceAnsatz, PixelMixtureDistance, TabulatedDistance};
pub use quadrature::{Integral, QuadratureConfig, QuadratureOrder, integrate};
