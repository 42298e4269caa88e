//! Treatment-aligned shifts.
//!
//! Every well in the same treatment group gets the same random shift, so the
//! artifact is confounded with the biological variable. Useful for checking
//! whether an analysis can tell batch-aligned bias from real signal.

use serde::{Deserialize, Serialize};

use rand::Rng;

use super::{Adversary, AdversaryArgs, AdversaryInfo, scale_target};
use crate::error::Result;
use crate::key::MeasurementKey;
use crate::seed::{Generator, keyed_normal};
use crate::well::{PlateBatch, Treatment};

pub(super) static INFO: AdversaryInfo = AdversaryInfo {
    name: "GroupShift",
    description: "Per-treatment-group random multiplicative shift",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Compound,
    CompoundDose,
}

impl GroupBy {
    pub fn group_key(self, treatment: &Treatment) -> String {
        match self {
            Self::Compound => treatment.compound.clone(),
            Self::CompoundDose => format!("{}@{}", treatment.compound, treatment.dose),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    target: String,
    #[serde(default = "default_magnitude")]
    magnitude: f64,
    #[serde(default)]
    group_by: GroupBy,
}

fn default_magnitude() -> f64 {
    0.1
}

/// Scales the target by `1 + strength·magnitude·z_group`, with `z_group` a
/// standard normal keyed by the group and a salt drawn from the step's
/// generator.
#[derive(Debug, Clone)]
pub struct GroupShift {
    target: MeasurementKey,
    magnitude: f64,
    group_by: GroupBy,
}

impl GroupShift {
    pub fn new(target: MeasurementKey, magnitude: f64, group_by: GroupBy) -> Self {
        Self {
            target,
            magnitude,
            group_by,
        }
    }

    pub(super) fn build(args: &AdversaryArgs<'_>) -> Result<Box<dyn Adversary>> {
        let p: Params = args.parse()?;
        if !(p.magnitude >= 0.0 && p.magnitude.is_finite()) {
            return Err(args.invalid("magnitude must be a non-negative number"));
        }
        let target = args.resolve_key(&p.target)?;
        Ok(Box::new(Self::new(target, p.magnitude, p.group_by)))
    }
}

impl Adversary for GroupShift {
    fn info(&self) -> &AdversaryInfo {
        &INFO
    }

    fn target(&self) -> &MeasurementKey {
        &self.target
    }

    fn apply(&self, batch: &PlateBatch, rng: &mut Generator, strength: f64) -> PlateBatch {
        // Shift depends on the group key only, never on visit order.
        let salt: u64 = rng.random();
        scale_target(batch, &self.target, |well| {
            let group = self.group_by.group_key(&well.treatment);
            1.0 + strength * self.magnitude * keyed_normal(salt, &["group_shift", &group])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::make_generator;
    use crate::well::{MORPHOLOGY, PlateGeometry, WellMeasurement, morphology_readouts};

    fn dosed_plate() -> PlateBatch {
        let wells = PlateGeometry::WELLS_96
            .locations()
            .map(|loc| {
                let treatment = match loc.col() % 3 {
                    0 => Treatment::vehicle(),
                    1 => Treatment::new("tunicamycin", if loc.row() < 4 { 1.0 } else { 10.0 }),
                    _ => Treatment::new("nocodazole", 0.5),
                };
                WellMeasurement::new(loc, treatment, morphology_readouts(100.0))
            })
            .collect();
        PlateBatch::new("P", wells).unwrap()
    }

    #[test]
    fn test_same_group_same_value() {
        let batch = dosed_plate();
        let key = MeasurementKey::new(MORPHOLOGY, "nucleus");
        let out = GroupShift::new(key.clone(), 0.2, GroupBy::Compound).apply(&batch, &mut make_generator(4), 1.0);
        let mut by_group = std::collections::BTreeMap::new();
        for w in out.iter() {
            let v = w.value(&key).unwrap();
            let prev = by_group.entry(w.treatment.compound.clone()).or_insert(v);
            assert_eq!(*prev, v);
        }
        assert_eq!(by_group.len(), 3);
        let distinct: std::collections::BTreeSet<u64> = by_group.values().map(|v| v.to_bits()).collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_compound_dose_splits_groups() {
        let batch = dosed_plate();
        let key = MeasurementKey::new(MORPHOLOGY, "nucleus");
        let out = GroupShift::new(key.clone(), 0.2, GroupBy::CompoundDose)
            .apply(&batch, &mut make_generator(4), 1.0);
        let tun: std::collections::BTreeSet<u64> = out
            .iter()
            .filter(|w| w.treatment.compound == "tunicamycin")
            .map(|w| w.value(&key).unwrap().to_bits())
            .collect();
        assert_eq!(tun.len(), 2);
    }

    #[test]
    fn test_group_key_format() {
        let t = Treatment::new("X", 2.5);
        assert_eq!(GroupBy::Compound.group_key(&t), "X");
        assert_eq!(GroupBy::CompoundDose.group_key(&t), "X@2.5");
    }
}
