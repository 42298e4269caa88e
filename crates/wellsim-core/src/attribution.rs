//! Counterfactual variance attribution.
//!
//! The same frozen biology is measured under five configurations derived
//! from one base profile:
//!
//! | Name | Layers on |
//! |---|---|
//! | `bio` | none |
//! | `geo` | geometry |
//! | `noise` | noise |
//! | `path` | pathology |
//! | `obs` | whatever the base profile enables |
//!
//! Per well and channel, `delta_X = X − bio` and
//! `resid = obs − (geo + noise + path)` in delta terms. The residual carries
//! every non-additive interaction between layers. Fractions are `Var_X /
//! Var_total` and are never renormalised, so covariance between layers shows
//! up as `frac_sum != 1`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::error::{Error, Result};
use crate::key::MeasurementKey;
use crate::realism::{MeasurementProcedure, RealismConfig};
use crate::well::{PlateBatch, WellLocation};

/// One of the five measurement configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Bio,
    Geo,
    Noise,
    Path,
    Obs,
}

impl Layer {
    pub const ALL: [Self; 5] = [Self::Bio, Self::Geo, Self::Noise, Self::Path, Self::Obs];

    pub fn name(self) -> &'static str {
        match self {
            Self::Bio => "bio",
            Self::Geo => "geo",
            Self::Noise => "noise",
            Self::Path => "path",
            Self::Obs => "obs",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The five fully specified configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionConfigs {
    pub bio: RealismConfig,
    pub geo: RealismConfig,
    pub noise: RealismConfig,
    pub path: RealismConfig,
    pub obs: RealismConfig,
}

impl AttributionConfigs {
    /// Derive the five configs from `base`. Each single-layer config keeps
    /// only that layer, switched as in `base`, so a layer the profile leaves
    /// off measures the same as `bio`. `obs` is `base` unchanged.
    pub fn from_base(base: &RealismConfig) -> Self {
        Self {
            bio: base.with_layers(false, false, false),
            geo: base.with_layers(base.geometry.enabled, false, false),
            noise: base.with_layers(false, base.noise.enabled, false),
            path: base.with_layers(false, false, base.pathology.enabled),
            obs: base.clone(),
        }
    }

    pub fn get(&self, layer: Layer) -> &RealismConfig {
        match layer {
            Layer::Bio => &self.bio,
            Layer::Geo => &self.geo,
            Layer::Noise => &self.noise,
            Layer::Path => &self.path,
            Layer::Obs => &self.obs,
        }
    }
}

/// Deltas for one well and channel. `bio` is the raw biological value; the
/// other fields are differences from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellDelta {
    pub well: WellLocation,
    pub key: MeasurementKey,
    pub bio: f64,
    pub geo: f64,
    pub noise: f64,
    pub path: f64,
    pub obs: f64,
    pub resid: f64,
}

/// Row-per-(well, channel) delta table in batch order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeltaTable {
    pub rows: Vec<WellDelta>,
}

impl DeltaTable {
    pub fn keys(&self) -> Vec<MeasurementKey> {
        let mut keys: Vec<MeasurementKey> = self.rows.iter().map(|r| r.key.clone()).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Rows for one channel, in batch order.
    pub fn for_key(&self, key: &MeasurementKey) -> Vec<&WellDelta> {
        self.rows.iter().filter(|r| &r.key == key).collect()
    }
}

/// Per-channel variance decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBudget {
    pub n_wells: usize,
    pub var_total: f64,
    pub var_geo: f64,
    pub var_noise: f64,
    pub var_path: f64,
    pub var_resid: f64,
    pub frac_geo: f64,
    pub frac_noise: f64,
    pub frac_path: f64,
    pub frac_resid: f64,
    /// Sum of the four fractions; differs from 1 when layers covary.
    pub frac_sum: f64,
}

/// Budget for every channel, keyed by `category.channel`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VarianceBudget {
    pub channels: BTreeMap<MeasurementKey, ChannelBudget>,
}

impl VarianceBudget {
    pub fn get(&self, key: &MeasurementKey) -> Option<&ChannelBudget> {
        self.channels.get(key)
    }
}

/// Per-well, per-channel deltas of each configuration against `bio`.
///
/// Every batch must hold the same wells in the same order with the same
/// channels; anything else is an [`Error::ShapeMismatch`].
pub fn compute_deltas(
    bio: &PlateBatch,
    geo: &PlateBatch,
    noise: &PlateBatch,
    path: &PlateBatch,
    obs: &PlateBatch,
) -> Result<DeltaTable> {
    let others = [(Layer::Geo, geo), (Layer::Noise, noise), (Layer::Path, path), (Layer::Obs, obs)];
    for (layer, batch) in &others {
        if batch.len() != bio.len() {
            return Err(Error::ShapeMismatch {
                detail: format!("`{layer}` batch has {} wells, `bio` has {}", batch.len(), bio.len()),
            });
        }
    }
    let mut rows = Vec::new();
    for (i, b) in bio.iter().enumerate() {
        let wells = others.map(|(layer, batch)| (layer, &batch.wells()[i]));
        for (layer, w) in &wells {
            if w.location != b.location {
                return Err(Error::ShapeMismatch {
                    detail: format!("`{layer}` well {i} is {}, `bio` has {}", w.location, b.location),
                });
            }
        }
        for key in b.keys() {
            let Some(base) = b.value(&key) else { continue };
            let mut delta = [0.0f64; 4];
            for (slot, (layer, w)) in delta.iter_mut().zip(&wells) {
                let v = w.value(&key).ok_or_else(|| Error::ShapeMismatch {
                    detail: format!("`{layer}` well {} lacks channel {key}", w.location),
                })?;
                *slot = v - base;
            }
            let [geo, noise, path, obs] = delta;
            rows.push(WellDelta {
                well: b.location.clone(),
                key,
                bio: base,
                geo,
                noise,
                path,
                obs,
                resid: obs - (geo + noise + path),
            });
        }
    }
    Ok(DeltaTable { rows })
}

fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().population_variance()
}

/// Population variance of each delta series per channel.
pub fn compute_variance_budget(deltas: &DeltaTable) -> VarianceBudget {
    let mut channels = BTreeMap::new();
    for key in deltas.keys() {
        let rows = deltas.for_key(&key);
        let n_wells = rows.len();
        let series = |f: fn(&WellDelta) -> f64| -> Vec<f64> { rows.iter().map(|r| f(r)).collect() };
        let var_total = population_variance(&series(|r| r.obs));
        let var_geo = population_variance(&series(|r| r.geo));
        let var_noise = population_variance(&series(|r| r.noise));
        let var_path = population_variance(&series(|r| r.path));
        let var_resid = population_variance(&series(|r| r.resid));
        let frac = |v: f64| if var_total > 0.0 { v / var_total } else { 0.0 };
        let (frac_geo, frac_noise, frac_path, frac_resid) =
            (frac(var_geo), frac(var_noise), frac(var_path), frac(var_resid));
        if var_total == 0.0 {
            log::debug!("channel {key}: zero observed variance, fractions reported as 0");
        }
        channels.insert(
            key,
            ChannelBudget {
                n_wells,
                var_total,
                var_geo,
                var_noise,
                var_path,
                var_resid,
                frac_geo,
                frac_noise,
                frac_path,
                frac_resid,
                frac_sum: frac_geo + frac_noise + frac_path + frac_resid,
            },
        );
    }
    VarianceBudget { channels }
}

/// Everything one attribution run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionReport {
    pub configs: AttributionConfigs,
    pub deltas: DeltaTable,
    pub budget: VarianceBudget,
}

/// Runs the five counterfactual measurements through a procedure.
pub struct VarianceAttribution<'a> {
    procedure: &'a dyn MeasurementProcedure,
}

impl<'a> VarianceAttribution<'a> {
    pub fn new(procedure: &'a dyn MeasurementProcedure) -> Self {
        Self { procedure }
    }

    /// Measure the five configurations derived from `base`, then compute
    /// deltas and the budget.
    pub fn run(&self, bio: &PlateBatch, base: &RealismConfig) -> Result<AttributionReport> {
        let configs = AttributionConfigs::from_base(base);
        let mut measured = BTreeMap::new();
        for layer in Layer::ALL {
            measured.insert(layer, self.procedure.measure(bio, configs.get(layer))?);
        }
        let get = |layer: Layer| -> Result<&PlateBatch> {
            measured.get(&layer).ok_or_else(|| Error::ShapeMismatch {
                detail: format!("missing `{layer}` measurement"),
            })
        };
        let deltas = compute_deltas(
            get(Layer::Bio)?,
            get(Layer::Geo)?,
            get(Layer::Noise)?,
            get(Layer::Path)?,
            get(Layer::Obs)?,
        )?;
        let budget = compute_variance_budget(&deltas);
        log::info!(
            "attribution on plate {}: {} wells, {} channels",
            bio.plate_id(),
            bio.len(),
            budget.channels.len()
        );
        Ok(AttributionReport {
            configs,
            deltas,
            budget,
        })
    }
}
