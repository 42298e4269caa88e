//! Time-dependent instrument drift per measurement modality.
//!
//! Each modality's gain is composed in log space from three terms:
//!
//! ```text
//! log g(t) = ln(aging(t)) + cycle(t) + σ_m · (α·z_shared(t) + √(1−α²)·z_m(t))
//! gain(t)  = exp(B · tanh(log g(t) / B))
//! ```
//!
//! - `aging`: saturating exponential decay toward a floor.
//! - `cycle`: sinusoidal thermal term with a per-modality random phase.
//! - wander: knot values sampled once at construction and interpolated; the
//!   shared stream is the same curve for every modality, which is what
//!   correlates them.
//!
//! The tanh soft clamp keeps gain inside `[e^-B, e^B]` for any input.
//! Noise inflation is a separate one-sided curve (never below 1).
//!
//! A [`DriftModel`] is immutable after construction and every query is a pure
//! function of `(t, modality)`, so one instance can be shared across threads
//! or rebuilt from the same seed with identical results.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::seed::{keyed_generator, standard_normal};
use crate::spline::{Interpolation, KnotCurve};
use crate::well::WellMeasurement;

/// Instrument time of the `index`-th of `total` reads spread evenly over
/// `run_hours` from `start`.
pub fn read_time(start: f64, run_hours: f64, index: usize, total: usize) -> f64 {
    if total == 0 {
        return start;
    }
    start + run_hours * index as f64 / total as f64
}

pub const IMAGING: &str = "imaging";
pub const PLATE_READER: &str = "plate_reader";

/// Per-modality drift constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModalityDrift {
    /// Aging decay rate per hour.
    pub aging_rate: f64,
    /// Asymptotic aging gain in `(0, 1]`.
    pub aging_floor: f64,
    /// Thermal-cycle amplitude in log-gain units.
    pub cycle_amplitude: f64,
    pub cycle_period_hours: f64,
    /// Wander standard deviation in log-gain units.
    pub wander_sigma: f64,
    /// Noise-inflation increase reached at the end of the horizon.
    pub noise_trend: f64,
    pub noise_wander_sigma: f64,
}

impl Default for ModalityDrift {
    fn default() -> Self {
        Self {
            aging_rate: 0.02,
            aging_floor: 0.92,
            cycle_amplitude: 0.015,
            cycle_period_hours: 24.0,
            wander_sigma: 0.02,
            noise_trend: 0.2,
            noise_wander_sigma: 0.05,
        }
    }
}

/// Drift construction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub horizon_hours: f64,
    /// Evenly spaced knots spanning `[0, horizon_hours]`.
    pub n_knots: usize,
    /// Weight of the shared wander stream.
    pub shared_alpha: f64,
    pub interpolation: Interpolation,
    /// `B` in the soft clamp; gain stays in `[e^-B, e^B]`.
    pub gain_log_bound: f64,
    /// Upper bound (exclusive) of noise inflation.
    pub max_noise_inflation: f64,
    pub modalities: BTreeMap<String, ModalityDrift>,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            horizon_hours: 72.0,
            n_knots: 13,
            shared_alpha: 0.6,
            interpolation: Interpolation::CubicSpline,
            gain_log_bound: 0.2,
            max_noise_inflation: 1.5,
            modalities: BTreeMap::from([
                (IMAGING.to_string(), ModalityDrift::default()),
                (
                    PLATE_READER.to_string(),
                    ModalityDrift {
                        aging_rate: 0.01,
                        aging_floor: 0.95,
                        cycle_amplitude: 0.01,
                        cycle_period_hours: 12.0,
                        wander_sigma: 0.015,
                        noise_trend: 0.1,
                        noise_wander_sigma: 0.04,
                    },
                ),
            ]),
        }
    }
}

impl DriftConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.horizon_hours > 0.0) {
            return Err(Error::config("horizon_hours", "must be positive"));
        }
        if self.n_knots < 2 {
            return Err(Error::config("n_knots", format!("need at least 2, got {}", self.n_knots)));
        }
        if !(0.0..=1.0).contains(&self.shared_alpha) {
            return Err(Error::config(
                "shared_alpha",
                format!("must be in [0, 1], got {}", self.shared_alpha),
            ));
        }
        if !(self.gain_log_bound > 0.0) {
            return Err(Error::config("gain_log_bound", "must be positive"));
        }
        if !(self.max_noise_inflation >= 1.0) {
            return Err(Error::config("max_noise_inflation", "must be at least 1"));
        }
        if self.modalities.is_empty() {
            return Err(Error::config("modalities", "at least one modality is required"));
        }
        for (name, m) in &self.modalities {
            let field = |f: &str| format!("modalities.{name}.{f}");
            if !(m.aging_floor > 0.0 && m.aging_floor <= 1.0) {
                return Err(Error::config(field("aging_floor"), "must be in (0, 1]"));
            }
            if !(m.cycle_period_hours > 0.0) {
                return Err(Error::config(field("cycle_period_hours"), "must be positive"));
            }
            for (f, v) in [
                ("aging_rate", m.aging_rate),
                ("wander_sigma", m.wander_sigma),
                ("noise_wander_sigma", m.noise_wander_sigma),
            ] {
                if !(v >= 0.0) {
                    return Err(Error::config(field(f), "must be non-negative"));
                }
            }
        }
        Ok(())
    }
}

/// Every intermediate term of a drift query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftComponents {
    pub t: f64,
    /// Multiplicative aging factor.
    pub aging: f64,
    /// Log-space cycle term.
    pub cycle: f64,
    /// Shared wander stream in z units; identical across modalities.
    pub wander_shared: f64,
    /// Modality wander stream in z units.
    pub wander_modality: f64,
    /// `α·shared + √(1−α²)·modality`, still in z units.
    pub wander_mixed: f64,
    pub log_gain: f64,
    pub raw_gain: f64,
    pub gain: f64,
    pub noise_trend: f64,
    pub noise_wander: f64,
    pub noise_inflation: f64,
}

#[derive(Debug, Clone)]
struct ModalityState {
    params: ModalityDrift,
    phase: f64,
    wander: KnotCurve,
    noise_wander: KnotCurve,
}

/// Sampled drift state; see the module docs.
#[derive(Debug, Clone)]
pub struct DriftModel {
    seed: u64,
    config: DriftConfig,
    shared: KnotCurve,
    modalities: BTreeMap<String, ModalityState>,
}

impl DriftModel {
    /// Sample knot values and phases from `seed`. Each stream has its own
    /// keyed generator, so adding a modality never changes another one.
    pub fn new(seed: u64, config: DriftConfig) -> Result<Self> {
        config.validate()?;
        let knots = |parts: &[&str]| {
            let mut rng = keyed_generator(seed, parts);
            let values = (0..config.n_knots).map(|_| standard_normal(&mut rng)).collect();
            KnotCurve::new(0.0, config.horizon_hours, values, config.interpolation)
        };
        let shared = knots(&["drift", "shared", "wander"]);
        let modalities = config
            .modalities
            .iter()
            .map(|(name, params)| {
                let phase = keyed_generator(seed, &["drift", name, "phase"]).random::<f64>() * 2.0 * PI;
                let state = ModalityState {
                    params: params.clone(),
                    phase,
                    wander: knots(&["drift", name, "wander"]),
                    noise_wander: knots(&["drift", name, "noise"]),
                };
                (name.clone(), state)
            })
            .collect();
        log::debug!(
            "drift model ready: seed={seed} horizon={}h knots={} modalities={:?}",
            config.horizon_hours,
            config.n_knots,
            config.modalities.keys().collect::<Vec<_>>()
        );
        Ok(Self {
            seed,
            config,
            shared,
            modalities,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    pub fn modalities(&self) -> impl Iterator<Item = &str> {
        self.modalities.keys().map(String::as_str)
    }

    /// `(lower, upper)` gain bounds.
    pub fn gain_bounds(&self) -> (f64, f64) {
        let b = self.config.gain_log_bound;
        ((-b).exp(), b.exp())
    }

    pub fn gain(&self, t: f64, modality: &str) -> Result<f64> {
        Ok(self.debug_components(t, modality)?.gain)
    }

    pub fn noise_inflation(&self, t: f64, modality: &str) -> Result<f64> {
        Ok(self.debug_components(t, modality)?.noise_inflation)
    }

    /// Noise inflation for each of `total` reads spread evenly over
    /// `run_hours`, the first at instrument time `start`.
    pub fn plate_inflation(&self, start: f64, run_hours: f64, total: usize, modality: &str) -> Result<Vec<f64>> {
        (0..total)
            .map(|i| self.noise_inflation(read_time(start, run_hours, i, total), modality))
            .collect()
    }

    /// Full decomposition at time `t` (hours, clamped to the horizon).
    pub fn debug_components(&self, t: f64, modality: &str) -> Result<DriftComponents> {
        let state = self.modalities.get(modality).ok_or_else(|| {
            Error::config(
                "modality",
                format!(
                    "unknown modality `{modality}` (valid: {})",
                    self.modalities.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            )
        })?;
        let horizon = self.config.horizon_hours;
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, horizon) };
        let p = &state.params;

        let aging = p.aging_floor + (1.0 - p.aging_floor) * (-p.aging_rate * t).exp();
        let cycle = p.cycle_amplitude * (2.0 * PI * t / p.cycle_period_hours + state.phase).sin();
        let alpha = self.config.shared_alpha;
        let wander_shared = self.shared.eval(t);
        let wander_modality = state.wander.eval(t);
        let wander_mixed = alpha * wander_shared + (1.0 - alpha * alpha).sqrt() * wander_modality;

        let log_gain = aging.ln() + cycle + p.wander_sigma * wander_mixed;
        let bound = self.config.gain_log_bound;
        let gain = (bound * (log_gain / bound).tanh()).exp();

        let noise_trend = p.noise_trend * t / horizon;
        let noise_wander = p.noise_wander_sigma * state.noise_wander.eval(t);
        let headroom = self.config.max_noise_inflation - 1.0;
        let excess = (noise_trend + noise_wander).max(0.0);
        let noise_inflation = if headroom > 0.0 {
            1.0 + headroom * (excess / headroom).tanh()
        } else {
            1.0
        };

        Ok(DriftComponents {
            t,
            aging,
            cycle,
            wander_shared,
            wander_modality,
            wander_mixed,
            log_gain,
            raw_gain: log_gain.exp(),
            gain,
            noise_trend,
            noise_wander,
            noise_inflation,
        })
    }

    /// Scale every channel of `category` by the gain at `t` and record the
    /// gain and noise inflation in metadata.
    pub fn apply_to_well(
        &self,
        well: &WellMeasurement,
        t: f64,
        modality: &str,
        category: &str,
    ) -> Result<WellMeasurement> {
        let c = self.debug_components(t, modality)?;
        Ok(well
            .map_category(category, |_, v| v * c.gain)
            .with_metadata("drift_gain", c.gain)
            .with_metadata("noise_inflation", c.noise_inflation))
    }
}
