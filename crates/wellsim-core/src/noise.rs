//! Correlated, spatially and temporally structured measurement noise.
//!
//! [`CorrelatedNoiseGenerator`] turns an idealized per-channel signal into an
//! observed one:
//!
//! ```text
//! observed[ch] = max(0, ideal[ch] · noise[ch] · spatial · row_col · drift)
//! ```
//!
//! - `noise`: lognormal multipliers correlated across channels through the
//!   Cholesky factor of the channel correlation matrix.
//! - `spatial`: edge ring reduction times a smooth gradient; no randomness.
//! - `row_col`: one lognormal bias per (plate, row) and per (plate, column).
//! - `drift`: acquisition-order drift with periodic recalibration.
//!
//! Every draw comes from a generator keyed on (seed, plate, well, tag) via
//! [`crate::seed`], so output is identical regardless of call order or how
//! wells are split across workers.

use std::collections::{BTreeMap, HashSet};
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::linalg::{asymmetry, cholesky, lower_mul};
use crate::seed::{keyed_generator, keyed_normal, keyed_uniform, standard_normal};
use crate::well::{
    MORPHOLOGY, MORPHOLOGY_CHANNELS, PlateBatch, PlateGeometry, WellLocation, WellMeasurement,
};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Default 5×5 morphology correlation, ordered as [`MORPHOLOGY_CHANNELS`].
pub const MORPHOLOGY_CORRELATION: [[f64; 5]; 5] = [
    [1.00, 0.50, 0.30, 0.40, 0.45],
    [0.50, 1.00, 0.25, 0.35, 0.40],
    [0.30, 0.25, 1.00, 0.20, 0.35],
    [0.40, 0.35, 0.20, 1.00, 0.30],
    [0.45, 0.40, 0.35, 0.30, 1.00],
];

/// Shape of the smooth plate gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientKind {
    /// Distance from plate centre.
    #[default]
    Radial,
    /// Along columns.
    LeftRight,
    /// Along rows.
    TopBottom,
}

/// Sign of the gradient. For radial gradients `Positive` dims the rim; for
/// axial gradients it brightens the far (right/bottom) side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientDirection {
    #[default]
    Positive,
    Negative,
}

impl GradientDirection {
    fn sign(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => -1.0,
        }
    }
}

/// Position-dependent effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialParams {
    /// Fractional signal loss on the outer ring (evaporation).
    pub edge_reduction: f64,
    /// Peak fractional deviation of the gradient.
    pub gradient_strength: f64,
    pub gradient_kind: GradientKind,
    pub gradient_direction: GradientDirection,
    /// Lognormal CV of the per-row bias.
    pub row_cv: f64,
    /// Lognormal CV of the per-column bias.
    pub col_cv: f64,
}

impl Default for SpatialParams {
    fn default() -> Self {
        Self {
            edge_reduction: 0.12,
            gradient_strength: 0.05,
            gradient_kind: GradientKind::Radial,
            gradient_direction: GradientDirection::Positive,
            row_cv: 0.02,
            col_cv: 0.02,
        }
    }
}

/// Acquisition-drift waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftWaveform {
    /// `1 + rate·t`
    #[default]
    Linear,
    /// `1 + amplitude·sin(2πt / period)`
    Sinusoidal,
    /// Bucketed accumulation of keyed normal increments.
    RandomWalk,
}

/// Most random-walk buckets summed for one well.
pub const MAX_WALK_STEPS: u64 = 10_000;

/// Batch drift over the acquisition run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchDriftParams {
    /// Fractional drift per hour (linear slope, walk step scale).
    pub rate: f64,
    pub waveform: DriftWaveform,
    /// Hours between recalibrations; `0` disables resets.
    pub recalibration_interval_hours: f64,
    /// Thermal-cycle amplitude for the sinusoidal waveform.
    pub cycle_amplitude: f64,
    pub cycle_period_hours: f64,
    /// Random-walk bucket rate. The walk stops accumulating after
    /// [`MAX_WALK_STEPS`] buckets and holds its value from there.
    pub walk_steps_per_hour: f64,
    /// Hard multiplicative clamp.
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for BatchDriftParams {
    fn default() -> Self {
        Self {
            rate: 0.005,
            waveform: DriftWaveform::Linear,
            recalibration_interval_hours: 8.0,
            cycle_amplitude: 0.03,
            cycle_period_hours: 6.0,
            walk_steps_per_hour: 4.0,
            min_factor: 0.8,
            max_factor: 1.2,
        }
    }
}

/// A named failure mode with its signal multiplier range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMode {
    pub name: String,
    /// Relative weight; weights are normalised over all modes.
    pub probability: f64,
    pub multiplier_min: f64,
    pub multiplier_max: f64,
}

impl FailureMode {
    pub fn new(name: &str, probability: f64, multiplier_min: f64, multiplier_max: f64) -> Self {
        Self {
            name: name.to_string(),
            probability,
            multiplier_min,
            multiplier_max,
        }
    }
}

/// Well failure rates and clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureParams {
    pub base_rate: f64,
    /// Probability boost from an orthogonally adjacent failed well.
    pub cluster_probability: f64,
    /// Geometric decay of the boost per extra unit of Manhattan distance.
    pub cluster_decay: f64,
    pub modes: Vec<FailureMode>,
}

impl Default for FailureParams {
    fn default() -> Self {
        Self {
            base_rate: 0.01,
            cluster_probability: 0.25,
            cluster_decay: 0.5,
            modes: vec![
                FailureMode::new("bubble", 0.35, 0.0, 0.1),
                FailureMode::new("pipetting_error", 0.30, 0.3, 0.7),
                FailureMode::new("focus_failure", 0.20, 0.4, 0.8),
                FailureMode::new("contamination", 0.15, 5.0, 20.0),
            ],
        }
    }
}

/// Full noise configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParameters {
    /// Readout category the generator acts on.
    pub category: String,
    /// Channel names, in correlation-matrix order.
    pub channels: Vec<String>,
    /// Symmetric positive-definite channel correlation matrix.
    pub correlation: Vec<Vec<f64>>,
    pub baseline_cv: f64,
    /// Stressed CV = `baseline_cv · stress_cv_multiplier`.
    pub stress_cv_multiplier: f64,
    pub spatial: SpatialParams,
    pub batch_drift: BatchDriftParams,
    pub failure: FailureParams,
}

impl Default for NoiseParameters {
    fn default() -> Self {
        Self {
            category: MORPHOLOGY.to_string(),
            channels: MORPHOLOGY_CHANNELS.iter().map(|c| c.to_string()).collect(),
            correlation: MORPHOLOGY_CORRELATION.iter().map(|r| r.to_vec()).collect(),
            baseline_cv: 0.08,
            stress_cv_multiplier: 2.0,
            spatial: SpatialParams::default(),
            batch_drift: BatchDriftParams::default(),
            failure: FailureParams::default(),
        }
    }
}

impl NoiseParameters {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    fn validate(&self) -> Result<()> {
        let k = self.channels.len();
        if k == 0 {
            return Err(Error::config("channels", "at least one channel is required"));
        }
        if self.correlation.len() != k {
            return Err(Error::InvalidCorrelation {
                reason: format!(
                    "matrix has {} rows but {} channels are configured",
                    self.correlation.len(),
                    k
                ),
            });
        }
        let skew = asymmetry(&self.correlation).ok_or_else(|| Error::InvalidCorrelation {
            reason: "matrix is not square".to_string(),
        })?;
        if skew > 1e-9 {
            return Err(Error::InvalidCorrelation {
                reason: format!("matrix is not symmetric (max |a_ij - a_ji| = {skew:.3e})"),
            });
        }
        for (i, row) in self.correlation.iter().enumerate() {
            if (row[i] - 1.0).abs() > 1e-9 {
                return Err(Error::InvalidCorrelation {
                    reason: format!("diagonal entry for `{}` is {} (expected 1)", self.channels[i], row[i]),
                });
            }
            if let Some(v) = row.iter().find(|v| !(-1.0..=1.0).contains(*v)) {
                return Err(Error::InvalidCorrelation {
                    reason: format!("entry {v} in row `{}` is outside [-1, 1]", self.channels[i]),
                });
            }
        }
        for (field, value) in [
            ("baseline_cv", self.baseline_cv),
            ("stress_cv_multiplier", self.stress_cv_multiplier),
            ("spatial.row_cv", self.spatial.row_cv),
            ("spatial.col_cv", self.spatial.col_cv),
            ("failure.base_rate", self.failure.base_rate),
            ("failure.cluster_probability", self.failure.cluster_probability),
            ("failure.cluster_decay", self.failure.cluster_decay),
        ] {
            if !(value >= 0.0) {
                return Err(Error::config(field, format!("must be non-negative, got {value}")));
            }
        }
        if !(0.0..1.0).contains(&self.spatial.edge_reduction) {
            return Err(Error::config(
                "spatial.edge_reduction",
                format!("must be in [0, 1), got {}", self.spatial.edge_reduction),
            ));
        }
        let d = &self.batch_drift;
        if !(d.min_factor > 0.0 && d.min_factor <= 1.0 && d.max_factor >= 1.0) {
            return Err(Error::config(
                "batch_drift",
                format!("clamp [{}, {}] must bracket 1 and stay positive", d.min_factor, d.max_factor),
            ));
        }
        if d.waveform == DriftWaveform::Sinusoidal && !(d.cycle_period_hours > 0.0) {
            return Err(Error::config("batch_drift.cycle_period_hours", "must be positive"));
        }
        if d.waveform == DriftWaveform::RandomWalk && !(d.walk_steps_per_hour > 0.0) {
            return Err(Error::config("batch_drift.walk_steps_per_hour", "must be positive"));
        }
        if d.waveform == DriftWaveform::RandomWalk
            && d.recalibration_interval_hours > 0.0
            && d.recalibration_interval_hours * d.walk_steps_per_hour > MAX_WALK_STEPS as f64
        {
            return Err(Error::config(
                "batch_drift.walk_steps_per_hour",
                format!(
                    "{} steps/h over a {} h recalibration interval exceeds {MAX_WALK_STEPS} walk steps",
                    d.walk_steps_per_hour, d.recalibration_interval_hours
                ),
            ));
        }
        let mut total_weight = 0.0;
        for mode in &self.failure.modes {
            if !(mode.probability >= 0.0) {
                return Err(Error::config(
                    format!("failure.modes.{}.probability", mode.name),
                    "must be non-negative",
                ));
            }
            if !(mode.multiplier_min >= 0.0 && mode.multiplier_min <= mode.multiplier_max) {
                return Err(Error::config(
                    format!("failure.modes.{}", mode.name),
                    format!(
                        "multiplier range [{}, {}] must be non-negative and ordered",
                        mode.multiplier_min, mode.multiplier_max
                    ),
                ));
            }
            total_weight += mode.probability;
        }
        if !self.failure.modes.is_empty() && !(total_weight > 0.0) {
            return Err(Error::config("failure.modes", "mode probabilities sum to zero"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Where and when a well is read. Drift is skipped when `well_index` is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub plate_id: String,
    pub geometry: PlateGeometry,
    pub well_index: Option<usize>,
    pub total_wells: usize,
    pub run_duration_hours: f64,
    /// Multiplier on the noise CV, e.g. instrument aging from
    /// [`crate::drift::DriftModel::noise_inflation`].
    #[serde(default = "unit_inflation")]
    pub noise_inflation: f64,
}

fn unit_inflation() -> f64 {
    1.0
}

impl RunMeta {
    /// Context without acquisition-order drift.
    pub fn new(plate_id: impl Into<String>, geometry: PlateGeometry) -> Self {
        Self {
            plate_id: plate_id.into(),
            geometry,
            well_index: None,
            total_wells: geometry.well_count(),
            run_duration_hours: 0.0,
            noise_inflation: 1.0,
        }
    }

    /// Same context with the noise CV scaled by `factor`.
    pub fn with_noise_inflation(mut self, factor: f64) -> Self {
        self.noise_inflation = factor;
        self
    }

    /// Same context at acquisition position `well_index` of `total_wells`.
    pub fn at(&self, well_index: usize, total_wells: usize, run_duration_hours: f64) -> Self {
        Self {
            well_index: Some(well_index),
            total_wells,
            run_duration_hours,
            ..self.clone()
        }
    }
}

/// Outcome of a well-failure draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureCheck {
    pub failed: bool,
    pub mode: Option<String>,
    pub signal_multiplier: f64,
}

impl FailureCheck {
    fn healthy() -> Self {
        Self {
            failed: false,
            mode: None,
            signal_multiplier: 1.0,
        }
    }
}

/// Deterministic noise generator; see the module docs.
#[derive(Debug, Clone)]
pub struct CorrelatedNoiseGenerator {
    seed: u64,
    params: NoiseParameters,
    cholesky: Vec<Vec<f64>>,
}

impl CorrelatedNoiseGenerator {
    /// Validate `params` and factor the correlation matrix. Fails on any
    /// matrix that is not symmetric positive-definite; there is no fallback.
    pub fn new(seed: u64, params: NoiseParameters) -> Result<Self> {
        params.validate()?;
        let cholesky = cholesky(&params.correlation).map_err(|pivot| Error::NotPositiveDefinite {
            reason: format!(
                "non-positive pivot at channel `{}` (index {pivot})",
                params.channels[pivot]
            ),
        })?;
        log::debug!(
            "noise generator ready: seed={seed} channels={} baseline_cv={}",
            params.channels.len(),
            params.baseline_cv
        );
        Ok(Self {
            seed,
            params,
            cholesky,
        })
    }

    pub fn params(&self) -> &NoiseParameters {
        &self.params
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// CV after linear interpolation between baseline and stressed CV.
    pub fn effective_cv(&self, stress_level: f64) -> f64 {
        let base = self.params.baseline_cv;
        let stressed = base * self.params.stress_cv_multiplier;
        base + (stressed - base) * stress_level.clamp(0.0, 1.0)
    }

    /// Channel-correlated multiplicative noise `exp(z·cv)` with `z = L·ε`.
    pub fn correlated_noise(&self, plate_id: &str, well_id: &str, cv: f64) -> BTreeMap<String, f64> {
        let mut rng = keyed_generator(self.seed, &[plate_id, well_id, "correlated_noise"]);
        let eps: Vec<f64> = (0..self.params.channels.len())
            .map(|_| standard_normal(&mut rng))
            .collect();
        let z = lower_mul(&self.cholesky, &eps);
        self.params
            .channels
            .iter()
            .zip(z)
            .map(|(ch, zi)| (ch.clone(), (zi * cv).exp()))
            .collect()
    }

    /// Edge-ring reduction times gradient for `well_id`.
    pub fn spatial_effect(&self, well_id: &str, geometry: PlateGeometry) -> Result<f64> {
        let loc = WellLocation::parse(well_id)?;
        Ok(self.spatial_factor(&loc, geometry))
    }

    fn spatial_factor(&self, loc: &WellLocation, geometry: PlateGeometry) -> f64 {
        let sp = &self.params.spatial;
        let edge = if loc.is_edge(geometry) {
            1.0 - sp.edge_reduction
        } else {
            1.0
        };
        edge * gradient_factor(loc, geometry, sp)
    }

    /// Shared per-row times per-column lognormal bias.
    pub fn row_column_effect(&self, well_id: &str, plate_id: &str) -> Result<f64> {
        let loc = WellLocation::parse(well_id)?;
        Ok(self.row_column_factor(&loc, plate_id))
    }

    fn row_column_factor(&self, loc: &WellLocation, plate_id: &str) -> f64 {
        let sp = &self.params.spatial;
        let row = loc.row().to_string();
        let col = loc.col().to_string();
        let zr = keyed_normal(self.seed, &[plate_id, "row", &row]);
        let zc = keyed_normal(self.seed, &[plate_id, "col", &col]);
        (zr * sp.row_cv).exp() * (zc * sp.col_cv).exp()
    }

    /// Acquisition-order drift for the `well_index`-th read of `total_wells`.
    pub fn batch_drift(
        &self,
        plate_id: &str,
        well_index: usize,
        total_wells: usize,
        run_duration_hours: f64,
    ) -> f64 {
        let p = &self.params.batch_drift;
        let elapsed = if total_wells == 0 {
            0.0
        } else {
            well_index as f64 / total_wells as f64 * run_duration_hours.max(0.0)
        };
        let (epoch, t) = if p.recalibration_interval_hours > 0.0 {
            let epoch = (elapsed / p.recalibration_interval_hours).floor();
            (epoch as u64, elapsed - epoch * p.recalibration_interval_hours)
        } else {
            (0, elapsed)
        };
        let factor = match p.waveform {
            DriftWaveform::Linear => 1.0 + p.rate * t,
            DriftWaveform::Sinusoidal => {
                1.0 + p.cycle_amplitude * (2.0 * PI * t / p.cycle_period_hours).sin()
            }
            DriftWaveform::RandomWalk => {
                let buckets = ((t * p.walk_steps_per_hour).floor() as u64).min(MAX_WALK_STEPS);
                let step = p.rate / p.walk_steps_per_hour.sqrt();
                let epoch = epoch.to_string();
                let walk: f64 = (0..=buckets)
                    .map(|k| keyed_normal(self.seed, &[plate_id, "drift_walk", &epoch, &k.to_string()]))
                    .sum();
                1.0 + step * walk
            }
        };
        factor.clamp(p.min_factor, p.max_factor)
    }

    /// Failure draw for `well_id`, boosted by already-failed neighbours.
    pub fn check_well_failure(
        &self,
        well_id: &str,
        plate_id: &str,
        already_failed: &HashSet<WellLocation>,
    ) -> Result<FailureCheck> {
        let loc = WellLocation::parse(well_id)?;
        Ok(self.failure_for(&loc, plate_id, already_failed))
    }

    /// Failure probability for `loc` given the failed set.
    pub fn failure_probability(&self, loc: &WellLocation, already_failed: &HashSet<WellLocation>) -> f64 {
        let f = &self.params.failure;
        let boost = already_failed
            .iter()
            .filter(|other| *other != loc && other.chebyshev(loc) == 1)
            .map(|other| {
                let extra = other.manhattan(loc).saturating_sub(1) as i32;
                f.cluster_probability * f.cluster_decay.powi(extra)
            })
            .fold(0.0f64, f64::max);
        (f.base_rate + boost).min(1.0)
    }

    fn failure_for(
        &self,
        loc: &WellLocation,
        plate_id: &str,
        already_failed: &HashSet<WellLocation>,
    ) -> FailureCheck {
        let f = &self.params.failure;
        let p = self.failure_probability(loc, already_failed);
        let well = loc.id();
        if f.modes.is_empty() || keyed_uniform(self.seed, &[plate_id, well, "failure"]) >= p {
            return FailureCheck::healthy();
        }
        let total: f64 = f.modes.iter().map(|m| m.probability).sum();
        let mut pick = keyed_uniform(self.seed, &[plate_id, well, "failure_mode"]) * total;
        let mut chosen = &f.modes[f.modes.len() - 1];
        for mode in &f.modes {
            if pick < mode.probability {
                chosen = mode;
                break;
            }
            pick -= mode.probability;
        }
        let u = keyed_uniform(self.seed, &[plate_id, well, "failure_magnitude"]);
        FailureCheck {
            failed: true,
            mode: Some(chosen.name.clone()),
            signal_multiplier: chosen.multiplier_min
                + (chosen.multiplier_max - chosen.multiplier_min) * u,
        }
    }

    /// Apply noise, spatial, row/column and drift factors to one well.
    ///
    /// The noise CV is the stress-interpolated CV times `run.noise_inflation`.
    /// Channels of the configured category that are not in the correlation
    /// matrix receive every factor except the correlated noise.
    pub fn apply_all(&self, well: &WellMeasurement, stress_level: f64, run: &RunMeta) -> WellMeasurement {
        let cv = self.effective_cv(stress_level) * run.noise_inflation.max(0.0);
        let noise = self.correlated_noise(&run.plate_id, well.location.id(), cv);
        let shared = self.spatial_factor(&well.location, run.geometry)
            * self.row_column_factor(&well.location, &run.plate_id)
            * run
                .well_index
                .map(|i| self.batch_drift(&run.plate_id, i, run.total_wells, run.run_duration_hours))
                .unwrap_or(1.0);
        well.map_category(&self.params.category, |ch, v| {
            (v * noise.get(ch).copied().unwrap_or(1.0) * shared).max(0.0)
        })
    }

    /// Apply [`Self::apply_all`] to every well in acquisition (batch) order,
    /// then run clustered failure checks against the wells failed so far.
    ///
    /// Failed wells get their channels scaled by the mode multiplier and a
    /// `failure_mode` metadata entry.
    pub fn apply_plate(
        &self,
        batch: &PlateBatch,
        stress: impl Fn(&WellMeasurement) -> f64,
        run_duration_hours: f64,
    ) -> PlateBatch {
        self.apply_plate_inflated(batch, stress, |_| 1.0, run_duration_hours)
    }

    /// [`Self::apply_plate`] with a per-well CV multiplier indexed by
    /// acquisition position.
    pub fn apply_plate_inflated(
        &self,
        batch: &PlateBatch,
        stress: impl Fn(&WellMeasurement) -> f64,
        inflation: impl Fn(usize) -> f64,
        run_duration_hours: f64,
    ) -> PlateBatch {
        let geometry = batch.geometry();
        let base = RunMeta::new(batch.plate_id(), geometry);
        let total = batch.len();
        let mut failed: HashSet<WellLocation> = HashSet::new();
        let wells = batch
            .iter()
            .enumerate()
            .map(|(i, well)| {
                let run = base
                    .at(i, total, run_duration_hours)
                    .with_noise_inflation(inflation(i));
                let noisy = self.apply_all(well, stress(well), &run);
                let check = self.failure_for(&well.location, batch.plate_id(), &failed);
                if !check.failed {
                    return noisy;
                }
                failed.insert(well.location.clone());
                let mode = check.mode.unwrap_or_default();
                noisy
                    .map_category(&self.params.category, |_, v| v * check.signal_multiplier)
                    .with_metadata("failure_mode", mode)
            })
            .collect();
        if !failed.is_empty() {
            log::debug!("plate {}: {} of {} wells failed", batch.plate_id(), failed.len(), total);
        }
        batch.with_wells(wells)
    }
}

/// Smooth gradient multiplier, never negative.
pub(crate) fn gradient_factor(loc: &WellLocation, geometry: PlateGeometry, sp: &SpatialParams) -> f64 {
    if sp.gradient_strength == 0.0 {
        return 1.0;
    }
    let unit = |i: usize, n: usize| if n > 1 { i as f64 / (n - 1) as f64 } else { 0.5 };
    let sign = sp.gradient_direction.sign();
    let g = match sp.gradient_kind {
        GradientKind::LeftRight => 1.0 + sign * sp.gradient_strength * (unit(loc.col(), geometry.cols) - 0.5),
        GradientKind::TopBottom => 1.0 + sign * sp.gradient_strength * (unit(loc.row(), geometry.rows) - 0.5),
        GradientKind::Radial => {
            let dy = unit(loc.row(), geometry.rows) - 0.5;
            let dx = unit(loc.col(), geometry.cols) - 0.5;
            let d = (dx * dx + dy * dy).sqrt() / 0.5f64.hypot(0.5);
            1.0 - sign * sp.gradient_strength * d
        }
    };
    g.max(0.0)
}
