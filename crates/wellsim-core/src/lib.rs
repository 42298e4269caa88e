//! # wellsim-core
//!
//! **Turn an idealized plate into a realistic one, then explain where the
//! variance came from.**
//!
//! `wellsim-core` injects deterministic technical artifacts into simulated
//! microtiter-plate measurements and decomposes the result back into
//! attributable sources.
//!
//! ## Quick Start
//!
//! ```no_run
//! use wellsim_core::{
//!     CorrelatedNoiseGenerator, NoiseParameters, PlateBatch, PlateGeometry,
//!     RealismMeasurement, RealismProfile, VarianceAttribution, morphology_readouts,
//! };
//!
//! let bio = PlateBatch::uniform("plate-1", PlateGeometry::WELLS_96, &morphology_readouts(100.0));
//!
//! // Correlated, spatially structured noise
//! let generator = CorrelatedNoiseGenerator::new(42, NoiseParameters::default()).unwrap();
//! let observed = generator.apply_plate(&bio, |_| 0.0, 4.0);
//! assert_eq!(observed.len(), 96);
//!
//! // Where does the variance come from?
//! let procedure = RealismMeasurement::new(42);
//! let report = VarianceAttribution::new(&procedure)
//!     .run(&bio, &RealismProfile::Realistic.config())
//!     .unwrap();
//! for (channel, b) in &report.budget.channels {
//!     println!("{channel}: geo {:.2} noise {:.2} path {:.2}", b.frac_geo, b.frac_noise, b.frac_path);
//! }
//! ```
//!
//! ## Architecture
//!
//! Idealized batch → noise / drift / adversaries → observed batch → QC → export
//!
//! - [`noise`]: correlated lognormal noise, spatial and row/column bias,
//!   acquisition drift, clustered well failures.
//! - [`drift`]: bounded per-modality instrument gain and noise inflation over time.
//! - [`adversary`]: named single-channel artifacts applied under a checked
//!   batch contract.
//! - [`attribution`]: five counterfactual measurements through a
//!   [`MeasurementProcedure`] and the resulting variance budget.
//!
//! Every random draw is keyed by a stable hash (see [`seed`]), so results do
//! not depend on call order, thread count, or process.

pub mod adversary;
pub mod attribution;
pub mod drift;
pub mod error;
pub mod export;
pub mod key;
pub mod linalg;
pub mod noise;
pub mod qc;
pub mod realism;
pub mod seed;
pub mod spline;
pub mod well;

pub use adversary::{
    Adversary, AdversarialPlateConfig, AdversaryInfo, AdversaryRegistry, AdversarySpec,
    apply_adversaries,
};
pub use attribution::{
    AttributionConfigs, AttributionReport, ChannelBudget, DeltaTable, Layer, VarianceAttribution,
    VarianceBudget, WellDelta, compute_deltas, compute_variance_budget,
};
pub use drift::{DriftComponents, DriftConfig, DriftModel, ModalityDrift};
pub use error::{Error, Result};
pub use key::MeasurementKey;
pub use noise::{CorrelatedNoiseGenerator, FailureCheck, NoiseParameters, RunMeta};
pub use realism::{MeasurementProcedure, RealismConfig, RealismMeasurement, RealismProfile};
pub use seed::{HASH_SCHEME, derive_seed, make_generator};
pub use spline::Interpolation;
pub use well::{
    MORPHOLOGY, MORPHOLOGY_CHANNELS, PlateBatch, PlateGeometry, Treatment, WellLocation,
    WellMeasurement, morphology_readouts,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
