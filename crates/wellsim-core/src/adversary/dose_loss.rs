//! Dose-correlated signal loss.

use serde::Deserialize;

use super::{Adversary, AdversaryArgs, AdversaryInfo, scale_target};
use crate::error::Result;
use crate::key::MeasurementKey;
use crate::seed::Generator;
use crate::well::PlateBatch;

pub(super) static INFO: AdversaryInfo = AdversaryInfo {
    name: "DoseLoss",
    description: "Multiplicative loss growing with ln(dose) above a threshold, capped",
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    target: String,
    #[serde(default = "default_threshold")]
    threshold_dose: f64,
    #[serde(default = "default_slope")]
    slope: f64,
    #[serde(default = "default_max_loss")]
    max_loss: f64,
}

fn default_threshold() -> f64 {
    1.0
}

fn default_slope() -> f64 {
    0.1
}

fn default_max_loss() -> f64 {
    0.5
}

/// Wells dosed above `threshold_dose` lose
/// `min(max_loss, strength·slope·ln(dose / threshold_dose))` of the target.
#[derive(Debug, Clone)]
pub struct DoseLoss {
    target: MeasurementKey,
    threshold_dose: f64,
    slope: f64,
    max_loss: f64,
}

impl DoseLoss {
    pub fn new(target: MeasurementKey, threshold_dose: f64, slope: f64, max_loss: f64) -> Self {
        Self {
            target,
            threshold_dose,
            slope,
            max_loss,
        }
    }

    pub(super) fn build(args: &AdversaryArgs<'_>) -> Result<Box<dyn Adversary>> {
        let p: Params = args.parse()?;
        if !(p.threshold_dose > 0.0) {
            return Err(args.invalid(format!("threshold_dose must be positive, got {}", p.threshold_dose)));
        }
        if !(p.slope >= 0.0) {
            return Err(args.invalid("slope must be non-negative"));
        }
        if !(0.0..=1.0).contains(&p.max_loss) {
            return Err(args.invalid(format!("max_loss must be in [0, 1], got {}", p.max_loss)));
        }
        let target = args.resolve_key(&p.target)?;
        Ok(Box::new(Self::new(target, p.threshold_dose, p.slope, p.max_loss)))
    }

    /// Fractional loss at `dose`.
    pub fn loss(&self, dose: f64, strength: f64) -> f64 {
        if !(dose > self.threshold_dose) {
            return 0.0;
        }
        (strength * self.slope * (dose / self.threshold_dose).ln()).clamp(0.0, self.max_loss)
    }
}

impl Adversary for DoseLoss {
    fn info(&self) -> &AdversaryInfo {
        &INFO
    }

    fn target(&self) -> &MeasurementKey {
        &self.target
    }

    fn apply(&self, batch: &PlateBatch, _rng: &mut Generator, strength: f64) -> PlateBatch {
        scale_target(batch, &self.target, |well| 1.0 - self.loss(well.treatment.dose, strength))
    }
}
