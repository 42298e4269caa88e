//! Realism profiles and the layered measurement procedure.
//!
//! A [`RealismConfig`] bundles three independently switchable artifact
//! layers:
//!
//! - **geometry**: edge-ring loss, radial gradient, per-row/column bias
//! - **noise**: heteroscedastic lognormal noise, inflated on edge wells
//! - **pathology**: categorical failures (channel dropout, focus miss, noise spike)
//!
//! [`RealismMeasurement`] draws every random quantity from a keyed stream
//! that does not depend on which layers are on. Measuring the same biology
//! under two configs therefore differs only by the layers that differ, which
//! is what the counterfactual variance attribution relies on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::MeasurementKey;
use crate::noise::{GradientDirection, GradientKind, SpatialParams, gradient_factor};
use crate::seed::{keyed_normal, keyed_uniform};
use crate::well::{PlateBatch, PlateGeometry, WellMeasurement};

/// Position-dependent effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryLayer {
    pub enabled: bool,
    pub edge_reduction: f64,
    pub gradient_strength: f64,
    /// Lognormal CV shared by every well in a row (and separately a column).
    pub row_col_cv: f64,
}

impl Default for GeometryLayer {
    fn default() -> Self {
        Self {
            enabled: true,
            edge_reduction: 0.12,
            gradient_strength: 0.05,
            row_col_cv: 0.02,
        }
    }
}

/// Per-well, per-channel measurement noise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseLayer {
    pub enabled: bool,
    pub base_cv: f64,
    /// Relative CV increase on outer-ring wells.
    pub edge_noise_inflation: f64,
}

impl Default for NoiseLayer {
    fn default() -> Self {
        Self {
            enabled: true,
            base_cv: 0.08,
            edge_noise_inflation: 0.5,
        }
    }
}

/// Categorical well pathologies. Rates are per-well probabilities and are
/// checked in the order dropout, focus miss, noise spike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathologyLayer {
    pub enabled: bool,
    pub dropout_rate: f64,
    pub focus_miss_rate: f64,
    pub noise_spike_rate: f64,
    /// Fraction of signal lost on every channel of a focus-missed well.
    pub focus_miss_loss: f64,
    /// Multiplier on the spiked channel.
    pub noise_spike_scale: f64,
}

impl Default for PathologyLayer {
    fn default() -> Self {
        Self {
            enabled: true,
            dropout_rate: 0.01,
            focus_miss_rate: 0.02,
            noise_spike_rate: 0.01,
            focus_miss_loss: 0.3,
            noise_spike_scale: 2.5,
        }
    }
}

/// Full artifact configuration for one measurement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RealismConfig {
    pub geometry: GeometryLayer,
    pub noise: NoiseLayer,
    pub pathology: PathologyLayer,
}

impl RealismConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Copy with each layer switched on or off; magnitudes are kept.
    pub fn with_layers(&self, geometry: bool, noise: bool, pathology: bool) -> Self {
        let mut next = self.clone();
        next.geometry.enabled = geometry;
        next.noise.enabled = noise;
        next.pathology.enabled = pathology;
        next
    }

    pub fn validate(&self) -> Result<()> {
        let g = &self.geometry;
        if !(0.0..=1.0).contains(&g.edge_reduction) {
            return Err(Error::config("geometry.edge_reduction", "must be in [0, 1]"));
        }
        if !(g.row_col_cv >= 0.0) || !(self.noise.base_cv >= 0.0) {
            return Err(Error::config("cv", "coefficients of variation must be non-negative"));
        }
        if !(self.noise.edge_noise_inflation >= 0.0) {
            return Err(Error::config("noise.edge_noise_inflation", "must be non-negative"));
        }
        let p = &self.pathology;
        for (field, rate) in [
            ("pathology.dropout_rate", p.dropout_rate),
            ("pathology.focus_miss_rate", p.focus_miss_rate),
            ("pathology.noise_spike_rate", p.noise_spike_rate),
            ("pathology.focus_miss_loss", p.focus_miss_loss),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::config(field, format!("must be in [0, 1], got {rate}")));
            }
        }
        if p.dropout_rate + p.focus_miss_rate + p.noise_spike_rate > 1.0 {
            return Err(Error::config("pathology", "rates sum to more than 1"));
        }
        Ok(())
    }
}

/// Named presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealismProfile {
    Clean,
    #[default]
    Realistic,
    Hostile,
}

impl RealismProfile {
    pub const ALL: [Self; 3] = [Self::Clean, Self::Realistic, Self::Hostile];

    pub fn name(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Realistic => "realistic",
            Self::Hostile => "hostile",
        }
    }

    pub fn config(self) -> RealismConfig {
        match self {
            Self::Clean => RealismConfig {
                geometry: GeometryLayer {
                    enabled: false,
                    edge_reduction: 0.02,
                    gradient_strength: 0.0,
                    row_col_cv: 0.0,
                },
                noise: NoiseLayer {
                    enabled: true,
                    base_cv: 0.03,
                    edge_noise_inflation: 0.0,
                },
                pathology: PathologyLayer {
                    enabled: false,
                    ..PathologyLayer::default()
                },
            },
            Self::Realistic => RealismConfig::default(),
            Self::Hostile => RealismConfig {
                geometry: GeometryLayer {
                    enabled: true,
                    edge_reduction: 0.25,
                    gradient_strength: 0.15,
                    row_col_cv: 0.05,
                },
                noise: NoiseLayer {
                    enabled: true,
                    base_cv: 0.15,
                    edge_noise_inflation: 1.0,
                },
                pathology: PathologyLayer {
                    enabled: true,
                    dropout_rate: 0.05,
                    focus_miss_rate: 0.08,
                    noise_spike_rate: 0.05,
                    focus_miss_loss: 0.4,
                    noise_spike_scale: 3.0,
                },
            },
        }
    }
}

impl fmt::Display for RealismProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RealismProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::config(
                    "profile",
                    format!(
                        "unknown realism profile `{s}` (valid: {})",
                        Self::ALL.map(Self::name).join(", ")
                    ),
                )
            })
    }
}

/// A categorical failure drawn for one well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pathology {
    Dropout,
    FocusMiss,
    NoiseSpike,
}

impl Pathology {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dropout => "dropout",
            Self::FocusMiss => "focus_miss",
            Self::NoiseSpike => "noise_spike",
        }
    }
}

/// Measures a frozen biological state under a realism configuration.
pub trait MeasurementProcedure: Send + Sync {
    fn measure(&self, bio: &PlateBatch, config: &RealismConfig) -> Result<PlateBatch>;
}

/// Default procedure: geometry × noise × pathology, all keyed on `seed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealismMeasurement {
    pub seed: u64,
}

impl RealismMeasurement {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn geometry_factor(&self, well: &WellMeasurement, plate: &str, geometry: PlateGeometry, g: &GeometryLayer) -> f64 {
        let loc = &well.location;
        let spatial = SpatialParams {
            edge_reduction: g.edge_reduction,
            gradient_strength: g.gradient_strength,
            gradient_kind: GradientKind::Radial,
            gradient_direction: GradientDirection::Positive,
            row_cv: g.row_col_cv,
            col_cv: g.row_col_cv,
        };
        let edge = if loc.is_edge(geometry) {
            1.0 - g.edge_reduction
        } else {
            1.0
        };
        let zr = keyed_normal(self.seed, &[plate, "realism_row", &loc.row().to_string()]);
        let zc = keyed_normal(self.seed, &[plate, "realism_col", &loc.col().to_string()]);
        edge * gradient_factor(loc, geometry, &spatial) * (g.row_col_cv * (zr + zc)).exp()
    }

    /// Pathology for `well` plus the channel it hits, if channel-specific.
    pub fn pathology(&self, well: &WellMeasurement, plate: &str, p: &PathologyLayer) -> Option<(Pathology, Option<MeasurementKey>)> {
        let id = well.location.id();
        let u = keyed_uniform(self.seed, &[plate, id, "pathology"]);
        let kind = if u < p.dropout_rate {
            Pathology::Dropout
        } else if u < p.dropout_rate + p.focus_miss_rate {
            Pathology::FocusMiss
        } else if u < p.dropout_rate + p.focus_miss_rate + p.noise_spike_rate {
            Pathology::NoiseSpike
        } else {
            return None;
        };
        if kind == Pathology::FocusMiss {
            return Some((kind, None));
        }
        let keys: Vec<MeasurementKey> = well.keys().collect();
        if keys.is_empty() {
            return Some((kind, None));
        }
        let pick = keyed_uniform(self.seed, &[plate, id, "pathology_channel"]);
        let idx = ((pick * keys.len() as f64) as usize).min(keys.len() - 1);
        Some((kind, Some(keys[idx].clone())))
    }
}

impl MeasurementProcedure for RealismMeasurement {
    fn measure(&self, bio: &PlateBatch, config: &RealismConfig) -> Result<PlateBatch> {
        config.validate()?;
        let plate = bio.plate_id();
        let geometry = bio.geometry();
        Ok(bio.map_wells(|well| {
            let loc = &well.location;
            let geo = if config.geometry.enabled {
                self.geometry_factor(well, plate, geometry, &config.geometry)
            } else {
                1.0
            };
            let cv = config.noise.base_cv
                * if loc.is_edge(geometry) {
                    1.0 + config.noise.edge_noise_inflation
                } else {
                    1.0
                };
            let pathology = if config.pathology.enabled {
                self.pathology(well, plate, &config.pathology)
            } else {
                None
            };

            let mut next = well.clone();
            for (category, channels) in next.readouts.iter_mut() {
                for (channel, value) in channels.iter_mut() {
                    let noise = if config.noise.enabled {
                        let key = format!("{category}.{channel}");
                        (cv * keyed_normal(self.seed, &[plate, loc.id(), &key, "realism_noise"])).exp()
                    } else {
                        1.0
                    };
                    let path = match &pathology {
                        Some((Pathology::FocusMiss, _)) => 1.0 - config.pathology.focus_miss_loss,
                        Some((kind, Some(hit))) if hit.category() == category && hit.channel() == channel => {
                            match kind {
                                Pathology::Dropout => 0.0,
                                _ => config.pathology.noise_spike_scale,
                            }
                        }
                        _ => 1.0,
                    };
                    *value = (*value * geo * noise * path).max(0.0);
                }
            }
            match pathology {
                Some((kind, _)) => next.with_metadata("pathology_type", kind.name()),
                None => next,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::well::{MORPHOLOGY, WellLocation, morphology_readouts};

    fn plate() -> PlateBatch {
        PlateBatch::uniform("P1", PlateGeometry::WELLS_96, &morphology_readouts(100.0))
    }

    #[test]
    fn test_profile_from_str() {
        assert_eq!("hostile".parse::<RealismProfile>().unwrap(), RealismProfile::Hostile);
        assert_eq!(" Clean ".parse::<RealismProfile>().unwrap(), RealismProfile::Clean);
        let err = "brutal".parse::<RealismProfile>().unwrap_err();
        assert!(err.to_string().contains("clean, realistic, hostile"));
    }

    #[test]
    fn test_presets_validate() {
        for p in RealismProfile::ALL {
            p.config().validate().unwrap();
        }
    }

    #[test]
    fn test_all_layers_off_is_identity() {
        let bio = plate();
        let off = RealismProfile::Hostile.config().with_layers(false, false, false);
        let out = RealismMeasurement::new(3).measure(&bio, &off).unwrap();
        assert_eq!(out, bio);
    }

    #[test]
    fn test_geometry_only_is_position_dependent() {
        let bio = plate();
        let cfg = RealismConfig::default().with_layers(true, false, false);
        let out = RealismMeasurement::new(3).measure(&bio, &cfg).unwrap();
        let a1 = out.get(&WellLocation::parse("A1").unwrap()).unwrap();
        // Every channel of a well gets the same geometry factor.
        let values: Vec<f64> = a1.readouts[MORPHOLOGY].values().copied().collect();
        assert!(values.windows(2).all(|w| w[0] == w[1]));
        assert!(values[0] < 100.0);
    }

    #[test]
    fn test_draws_do_not_depend_on_other_layers() {
        let bio = plate();
        let m = RealismMeasurement::new(21);
        let base = RealismProfile::Hostile.config();
        let geo = m.measure(&bio, &base.with_layers(true, false, false)).unwrap();
        let noise = m.measure(&bio, &base.with_layers(false, true, false)).unwrap();
        let both = m.measure(&bio, &base.with_layers(true, true, false)).unwrap();
        for ((g, n), b) in geo.iter().zip(noise.iter()).zip(both.iter()) {
            for key in g.keys() {
                let expected = g.value(&key).unwrap() * n.value(&key).unwrap() / 100.0;
                assert!((b.value(&key).unwrap() - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_hostile_pathologies_are_tagged() {
        let bio = PlateBatch::uniform("P1", PlateGeometry::WELLS_384, &morphology_readouts(100.0));
        let cfg = RealismProfile::Hostile.config().with_layers(false, false, true);
        let out = RealismMeasurement::new(5).measure(&bio, &cfg).unwrap();
        let tagged: Vec<&WellMeasurement> = out.iter().filter(|w| w.metadata.contains_key("pathology_type")).collect();
        // 18% expected over 384 wells.
        assert!(tagged.len() > 30 && tagged.len() < 110, "{}", tagged.len());
        for w in tagged {
            match w.metadata["pathology_type"].as_str().unwrap() {
                "dropout" => assert!(w.readouts[MORPHOLOGY].values().any(|v| *v == 0.0)),
                "focus_miss" => assert!(w.readouts[MORPHOLOGY].values().all(|v| (*v - 60.0).abs() < 1e-9)),
                "noise_spike" => assert!(w.readouts[MORPHOLOGY].values().any(|v| (*v - 300.0).abs() < 1e-9)),
                other => panic!("unexpected pathology {other}"),
            }
        }
    }
}
