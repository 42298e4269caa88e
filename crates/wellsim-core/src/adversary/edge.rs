//! Edge and corner shifts.

use rand::Rng;
use serde::Deserialize;

use super::{Adversary, AdversaryArgs, AdversaryInfo, scale_target};
use crate::error::Result;
use crate::key::MeasurementKey;
use crate::seed::{Generator, keyed_normal};
use crate::well::PlateBatch;

pub(super) static INFO: AdversaryInfo = AdversaryInfo {
    name: "EdgeEffect",
    description: "Fractional shift on outer-ring wells, amplified on the four corners",
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    target: String,
    #[serde(default = "default_edge_shift")]
    edge_shift: f64,
    #[serde(default = "default_corner_boost")]
    corner_boost: f64,
    #[serde(default = "default_jitter")]
    jitter: f64,
}

fn default_edge_shift() -> f64 {
    -0.05
}

fn default_corner_boost() -> f64 {
    1.5
}

fn default_jitter() -> f64 {
    0.01
}

/// Edge wells are scaled by `1 + strength·edge_shift`, corners by
/// `1 + strength·edge_shift·corner_boost`, interior wells are untouched.
/// Affected wells also get zero-mean multiplicative jitter.
#[derive(Debug, Clone)]
pub struct EdgeEffect {
    target: MeasurementKey,
    edge_shift: f64,
    corner_boost: f64,
    jitter: f64,
}

impl EdgeEffect {
    pub fn new(target: MeasurementKey, edge_shift: f64, corner_boost: f64, jitter: f64) -> Self {
        Self {
            target,
            edge_shift,
            corner_boost,
            jitter,
        }
    }

    pub(super) fn build(args: &AdversaryArgs<'_>) -> Result<Box<dyn Adversary>> {
        let p: Params = args.parse()?;
        if !(p.edge_shift.is_finite() && p.corner_boost.is_finite()) {
            return Err(args.invalid("edge_shift and corner_boost must be finite"));
        }
        if !(p.jitter >= 0.0) {
            return Err(args.invalid("jitter must be non-negative"));
        }
        let target = args.resolve_key(&p.target)?;
        Ok(Box::new(Self::new(target, p.edge_shift, p.corner_boost, p.jitter)))
    }
}

impl Adversary for EdgeEffect {
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
            let loc = &well.location;
            let shift = if loc.is_corner(geometry) {
                self.edge_shift * self.corner_boost
            } else if loc.is_edge(geometry) {
                self.edge_shift
            } else {
                return 1.0;
            };
            let noise = if self.jitter > 0.0 {
                1.0 + self.jitter * keyed_normal(salt, &["edge_jitter", well.location.id()])
            } else {
                1.0
            };
            (1.0 + strength * shift) * noise
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::make_generator;
    use crate::well::{MORPHOLOGY, PlateGeometry, WellLocation, morphology_readouts};

    #[test]
    fn test_exact_multipliers_without_jitter() {
        let batch = PlateBatch::uniform("P", PlateGeometry::WELLS_96, &morphology_readouts(100.0));
        let key = MeasurementKey::new(MORPHOLOGY, "mito");
        let out = EdgeEffect::new(key.clone(), -0.05, 1.5, 0.0).apply(&batch, &mut make_generator(0), 1.0);
        let at = |id: &str| out.get(&WellLocation::parse(id).unwrap()).unwrap().value(&key).unwrap();
        assert!((at("A1") - 92.5).abs() < 1e-9);
        assert!((at("H12") - 92.5).abs() < 1e-9);
        assert!((at("A6") - 95.0).abs() < 1e-9);
        assert!((at("E1") - 95.0).abs() < 1e-9);
        assert_eq!(at("D6"), 100.0);
    }

    #[test]
    fn test_interior_never_touched_with_jitter() {
        let batch = PlateBatch::uniform("P", PlateGeometry::WELLS_384, &morphology_readouts(50.0));
        let key = MeasurementKey::new(MORPHOLOGY, "er");
        let out = EdgeEffect::new(key.clone(), 0.1, 2.0, 0.05).apply(&batch, &mut make_generator(8), 1.0);
        for w in out.iter() {
            if !w.location.is_edge(PlateGeometry::WELLS_384) {
                assert_eq!(w.value(&key), Some(50.0));
            }
        }
    }
}
