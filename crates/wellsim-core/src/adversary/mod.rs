//! Composable technical-artifact transforms over whole plates.
//!
//! An [`Adversary`] rewrites exactly one measurement channel of a
//! [`PlateBatch`] and nothing else. Kinds are looked up by name in an
//! [`AdversaryRegistry`]; the built-in kinds are:
//!
//! | Kind | Effect |
//! |---|---|
//! | `SpatialGradient` | smooth ramp along rows, columns, or the diagonal |
//! | `EdgeEffect` | separate multipliers for edge and corner wells |
//! | `GroupShift` | per-treatment-group random shift (confounded with biology) |
//! | `DoseLoss` | monotone loss in `ln(dose)` above a threshold, capped |
//!
//! [`apply_adversaries`] folds a configured list over a batch. Each step gets
//! its own generator from [`derive_seed`], and the batch contract (same
//! wells, same treatments, only the target channel touched) is checked after
//! every step.

pub mod dose_loss;
pub mod edge;
pub mod gradient;
pub mod group_shift;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::MeasurementKey;
use crate::seed::{Generator, derive_seed, make_generator};
use crate::well::{PlateBatch, WellMeasurement};

pub use dose_loss::DoseLoss;
pub use edge::EdgeEffect;
pub use gradient::{GradientAxis, SpatialGradient};
pub use group_shift::{GroupBy, GroupShift};

/// Static description of an adversary kind.
#[derive(Debug, Clone)]
pub struct AdversaryInfo {
    /// Registry name (e.g. `"EdgeEffect"`).
    pub name: &'static str,
    /// One-line human-readable description.
    pub description: &'static str,
}

/// A structured artifact applied to one channel of a plate.
///
/// Implementations must return a batch with the same wells in the same order
/// and may only change the value at [`Adversary::target`]. All randomness
/// must come from `rng`.
pub trait Adversary: Send + Sync {
    fn info(&self) -> &AdversaryInfo;

    fn target(&self) -> &MeasurementKey;

    /// Apply the artifact scaled by the global `strength`.
    fn apply(&self, batch: &PlateBatch, rng: &mut Generator, strength: f64) -> PlateBatch;

    fn name(&self) -> &'static str {
        self.info().name
    }
}

/// One configured adversary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdversarySpec {
    /// Registry name.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub seed_offset: i64,
}

impl AdversarySpec {
    pub fn new(kind: impl Into<String>, params: serde_json::Value) -> Self {
        let params = match params {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            kind: kind.into(),
            params,
            seed_offset: 0,
        }
    }

    pub fn with_seed_offset(mut self, offset: i64) -> Self {
        self.seed_offset = offset;
        self
    }
}

/// Ordered adversary list for one plate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdversarialPlateConfig {
    pub enabled: bool,
    pub adversaries: Vec<AdversarySpec>,
    /// Global multiplier passed to every adversary.
    pub strength: f64,
}

impl Default for AdversarialPlateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            adversaries: Vec::new(),
            strength: 1.0,
        }
    }
}

impl AdversarialPlateConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Inputs available to an adversary constructor.
pub struct AdversaryArgs<'a> {
    kind: &'a str,
    params: &'a serde_json::Map<String, serde_json::Value>,
    batch: &'a PlateBatch,
}

impl<'a> AdversaryArgs<'a> {
    pub fn kind(&self) -> &str {
        self.kind
    }

    pub fn params(&self) -> &serde_json::Map<String, serde_json::Value> {
        self.params
    }

    /// Decode the parameter object into a typed struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(serde_json::Value::Object(self.params.clone()))
            .map_err(|e| self.invalid(e.to_string()))
    }

    /// Resolve a channel address against the batch being transformed.
    pub fn resolve_key(&self, address: &str) -> Result<MeasurementKey> {
        MeasurementKey::resolve(address, self.batch)
    }

    pub fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::AdversaryParams {
            kind: self.kind.to_string(),
            reason: reason.into(),
        }
    }
}

/// Builds an adversary from its arguments.
pub type Constructor = Arc<dyn Fn(&AdversaryArgs<'_>) -> Result<Box<dyn Adversary>> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    description: &'static str,
    constructor: Constructor,
}

/// Name → constructor lookup, seeded with the built-in kinds.
#[derive(Clone)]
pub struct AdversaryRegistry {
    entries: BTreeMap<String, Entry>,
}

impl Default for AdversaryRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for AdversaryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdversaryRegistry")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdversaryRegistry {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(gradient::INFO.name, gradient::INFO.description, SpatialGradient::build);
        registry.register(edge::INFO.name, edge::INFO.description, EdgeEffect::build);
        registry.register(group_shift::INFO.name, group_shift::INFO.description, GroupShift::build);
        registry.register(dose_loss::INFO.name, dose_loss::INFO.description, DoseLoss::build);
        registry
    }

    /// Add or replace a kind.
    pub fn register<F>(&mut self, name: impl Into<String>, description: &'static str, constructor: F)
    where
        F: Fn(&AdversaryArgs<'_>) -> Result<Box<dyn Adversary>> + Send + Sync + 'static,
    {
        let name = name.into();
        log::debug!("registering adversary kind {name}");
        self.entries.insert(
            name,
            Entry {
                description,
                constructor: Arc::new(constructor),
            },
        );
    }

    /// Registered kind names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// `(name, description)` for every registered kind.
    pub fn describe(&self) -> Vec<(String, &'static str)> {
        self.entries
            .iter()
            .map(|(name, e)| (name.clone(), e.description))
            .collect()
    }

    /// Construct the adversary for `spec`, resolving its target against
    /// `batch`.
    pub fn build(&self, spec: &AdversarySpec, batch: &PlateBatch) -> Result<Box<dyn Adversary>> {
        let entry = self
            .entries
            .get(&spec.kind)
            .ok_or_else(|| Error::UnknownAdversary {
                name: spec.kind.clone(),
                valid: self.names(),
            })?;
        let args = AdversaryArgs {
            kind: &spec.kind,
            params: &spec.params,
            batch,
        };
        (entry.constructor)(&args)
    }

    /// Fold `config`'s adversaries over `batch` in order.
    ///
    /// Returns the input unchanged when the config is absent or disabled,
    /// lists no adversaries, or the batch is empty.
    pub fn apply(
        &self,
        batch: &PlateBatch,
        config: Option<&AdversarialPlateConfig>,
        base_seed: u64,
        plate_id: &str,
    ) -> Result<PlateBatch> {
        let Some(config) = config.filter(|c| c.enabled && !c.adversaries.is_empty()) else {
            return Ok(batch.clone());
        };
        if batch.is_empty() {
            return Ok(batch.clone());
        }
        let mut current = batch.clone();
        for (index, spec) in config.adversaries.iter().enumerate() {
            let adversary = self.build(spec, &current)?;
            let seed = derive_seed(base_seed, plate_id, index, spec.seed_offset);
            let mut rng = make_generator(seed);
            log::debug!(
                "plate {plate_id}: step {index} {} on {} (seed {seed}, strength {})",
                adversary.name(),
                adversary.target(),
                config.strength
            );
            let next = adversary.apply(&current, &mut rng, config.strength);
            check_contract(adversary.as_ref(), &current, &next)?;
            current = next;
        }
        Ok(current)
    }
}

/// [`AdversaryRegistry::apply`] with the built-in kinds.
pub fn apply_adversaries(
    batch: &PlateBatch,
    config: Option<&AdversarialPlateConfig>,
    base_seed: u64,
    plate_id: &str,
) -> Result<PlateBatch> {
    AdversaryRegistry::with_builtins().apply(batch, config, base_seed, plate_id)
}

/// Verify that `after` differs from `before` only at the adversary's target.
fn check_contract(adversary: &dyn Adversary, before: &PlateBatch, after: &PlateBatch) -> Result<()> {
    let violation = |detail: String| {
        log::error!("adversary {} broke the batch contract: {detail}", adversary.name());
        Err(Error::InvariantViolation {
            adversary: adversary.name().to_string(),
            detail,
        })
    };
    if before.len() != after.len() {
        return violation(format!("well count changed from {} to {}", before.len(), after.len()));
    }
    if before.plate_id() != after.plate_id() {
        return violation(format!("plate id changed to `{}`", after.plate_id()));
    }
    if before.geometry() != after.geometry() {
        return violation(format!(
            "plate geometry changed from {} to {}",
            before.geometry(),
            after.geometry()
        ));
    }
    let target = adversary.target();
    for (old, new) in before.iter().zip(after.iter()) {
        let well = old.location.id();
        if old.location != new.location {
            return violation(format!("well {well} moved to {}", new.location));
        }
        if old.treatment != new.treatment {
            return violation(format!("treatment of well {well} changed"));
        }
        if old.metadata != new.metadata {
            return violation(format!("metadata of well {well} changed"));
        }
        if let Some(key) = changed_channel(old, new, target) {
            return violation(format!("well {well} channel {key} changed outside target {target}"));
        }
    }
    Ok(())
}

/// First channel other than `target` whose presence or bits differ.
fn changed_channel(old: &WellMeasurement, new: &WellMeasurement, target: &MeasurementKey) -> Option<String> {
    let same_shape = old.readouts.len() == new.readouts.len()
        && old
            .readouts
            .iter()
            .all(|(cat, chans)| new.readouts.get(cat).is_some_and(|n| n.len() == chans.len()));
    if !same_shape {
        return Some("<shape>".to_string());
    }
    for key in old.keys() {
        if &key == target {
            if new.value(&key).is_none() {
                return Some(key.to_string());
            }
            continue;
        }
        match (old.value(&key), new.value(&key)) {
            (Some(a), Some(b)) if a.to_bits() == b.to_bits() => {}
            _ => return Some(key.to_string()),
        }
    }
    None
}

/// Copy of `batch` with the target channel of each well multiplied by
/// `factor(well)`, floored at zero. Wells without the channel pass through.
pub(crate) fn scale_target(
    batch: &PlateBatch,
    target: &MeasurementKey,
    mut factor: impl FnMut(&WellMeasurement) -> f64,
) -> PlateBatch {
    batch.map_wells(|well| match well.value(target) {
        Some(v) => well.with_value(target, (v * factor(well)).max(0.0)),
        None => well.clone(),
    })
}
