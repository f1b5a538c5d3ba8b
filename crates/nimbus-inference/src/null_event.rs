//! Null-event densities of the magnitude limit.

use nimbus_core::traits::NullEventModel;
use nimbus_core::MagnitudeBounds;

/// Uniform density over the terrestrial magnitude range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformNullEvent {
    bounds: MagnitudeBounds,
}

impl UniformNullEvent {
    /// Uniform density on `bounds`.
    pub fn new(bounds: MagnitudeBounds) -> Self {
        Self { bounds }
    }

    /// Support of the density.
    pub fn bounds(&self) -> MagnitudeBounds {
        self.bounds
    }
}

impl NullEventModel for UniformNullEvent {
    fn pdf(&self, _mlim: f64) -> f64 {
        1.0 / self.bounds.width()
    }
}
