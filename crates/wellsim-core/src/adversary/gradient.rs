//! Smooth spatial gradient across the plate.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Adversary, AdversaryArgs, AdversaryInfo, scale_target};
use crate::error::Result;
use crate::key::MeasurementKey;
use crate::seed::{Generator, keyed_normal};
use crate::well::{PlateBatch, PlateGeometry, WellLocation};

pub(super) static INFO: AdversaryInfo = AdversaryInfo {
    name: "SpatialGradient",
    description: "Linear multiplicative ramp along rows, columns, or the main diagonal",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientAxis {
    /// Varies from the top row to the bottom row.
    Row,
    /// Varies from the left column to the right column.
    #[default]
    Column,
    /// Varies from the top-left corner to the bottom-right corner.
    Diagonal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    target: String,
    #[serde(default = "default_magnitude")]
    magnitude: f64,
    #[serde(default)]
    axis: GradientAxis,
    #[serde(default)]
    jitter: f64,
}

fn default_magnitude() -> f64 {
    0.1
}

/// Multiplies the target by `1 + strength·magnitude·(pos − ½)`, where `pos`
/// runs from 0 to 1 along the axis, then by `1 + jitter·z` per well.
#[derive(Debug, Clone)]
pub struct SpatialGradient {
    target: MeasurementKey,
    magnitude: f64,
    axis: GradientAxis,
    jitter: f64,
}

impl SpatialGradient {
    pub fn new(target: MeasurementKey, magnitude: f64, axis: GradientAxis, jitter: f64) -> Self {
        Self {
            target,
            magnitude,
            axis,
            jitter,
        }
    }

    pub(super) fn build(args: &AdversaryArgs<'_>) -> Result<Box<dyn Adversary>> {
        let p: Params = args.parse()?;
        if !p.magnitude.is_finite() {
            return Err(args.invalid("magnitude must be finite"));
        }
        if !(p.jitter >= 0.0) {
            return Err(args.invalid("jitter must be non-negative"));
        }
        let target = args.resolve_key(&p.target)?;
        Ok(Box::new(Self::new(target, p.magnitude, p.axis, p.jitter)))
    }

    /// Position along the axis in `[0, 1]`.
    fn position(&self, loc: &WellLocation, geometry: PlateGeometry) -> f64 {
        let frac = |i: usize, n: usize| if n > 1 { i as f64 / (n - 1) as f64 } else { 0.5 };
        let r = frac(loc.row(), geometry.rows);
        let c = frac(loc.col(), geometry.cols);
        match self.axis {
            GradientAxis::Row => r,
            GradientAxis::Column => c,
            GradientAxis::Diagonal => (r + c) / 2.0,
        }
    }
}

impl Adversary for SpatialGradient {
    fn info(&self) -> &AdversaryInfo {
        &INFO
    }

    fn target(&self) -> &MeasurementKey {
        &self.target
    }

    fn apply(&self, batch: &PlateBatch, rng: &mut Generator, strength: f64) -> PlateBatch {
        let geometry = batch.geometry();
        // Jitter is keyed by well, so it does not depend on batch order.
        let salt: u64 = rng.random();
        scale_target(batch, &self.target, |well| {
            let ramp = 1.0 + strength * self.magnitude * (self.position(&well.location, geometry) - 0.5);
            let noise = if self.jitter > 0.0 {
                1.0 + self.jitter * keyed_normal(salt, &["gradient_jitter", well.location.id()])
            } else {
                1.0
            };
            ramp * noise
        })
    }
}
