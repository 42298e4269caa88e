//! Integration tests for wellsim-core.
//!
//! These tests cover the full measurement pipeline:
//! idealized plate → noise / drift / adversaries → QC → attribution → export.

use std::sync::Arc;

use serde_json::json;
use statrs::statistics::Statistics;

use wellsim_core::adversary::EdgeEffect;
use wellsim_core::drift::{IMAGING, PLATE_READER};
use wellsim_core::noise::MORPHOLOGY_CORRELATION;
use wellsim_core::{
    Adversary, AdversarialPlateConfig, AdversaryRegistry, AdversarySpec, CorrelatedNoiseGenerator,
    DriftConfig, DriftModel, Layer, MORPHOLOGY, MORPHOLOGY_CHANNELS, MeasurementKey,
    NoiseParameters, PlateBatch, PlateGeometry, RealismMeasurement, RealismProfile, RunMeta,
    Treatment, VarianceAttribution, WellLocation, WellMeasurement, apply_adversaries,
    morphology_readouts,
};

fn uniform_96(value: f64) -> PlateBatch {
    PlateBatch::uniform("plate-1", PlateGeometry::WELLS_96, &morphology_readouts(value))
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().mean()
}

#[test]
fn corner_and_center_wells_match_edge_reduction() {
    let mut params = NoiseParameters::default();
    params.spatial.edge_reduction = 0.12;
    params.spatial.gradient_strength = 0.0;
    let a1 = WellMeasurement::new(
        WellLocation::parse("A1").unwrap(),
        Treatment::vehicle(),
        morphology_readouts(100.0),
    );
    let d6 = WellMeasurement::new(
        WellLocation::parse("D6").unwrap(),
        Treatment::vehicle(),
        morphology_readouts(100.0),
    );
    let run = RunMeta::new("plate-1", PlateGeometry::WELLS_96);
    let key = MeasurementKey::new(MORPHOLOGY, "nucleus");

    let (mut corner, mut center) = (Vec::new(), Vec::new());
    for seed in 0..5000u64 {
        let generator = CorrelatedNoiseGenerator::new(seed, params.clone()).unwrap();
        corner.push(generator.apply_all(&a1, 0.0, &run).value(&key).unwrap());
        center.push(generator.apply_all(&d6, 0.0, &run).value(&key).unwrap());
    }
    let (m_corner, m_center) = (mean(&corner), mean(&center));
    assert!((m_corner - 88.0).abs() / 88.0 < 0.02, "A1 mean {m_corner}");
    assert!((m_center - 100.0).abs() / 100.0 < 0.02, "D6 mean {m_center}");
}

#[test]
fn edge_effect_scenario_averages() {
    let batch = uniform_96(100.0);
    let geometry = PlateGeometry::WELLS_96;
    let spec = AdversarySpec::new(
        "EdgeEffect",
        json!({"target": "morphology.nucleus", "edge_shift": -0.05, "corner_boost": 1.5}),
    );
    let config = AdversarialPlateConfig {
        enabled: true,
        adversaries: vec![spec],
        strength: 1.0,
    };
    let key = MeasurementKey::new(MORPHOLOGY, "nucleus");

    let (mut corners, mut edges) = (Vec::new(), Vec::new());
    for trial in 0..1000u64 {
        let out = apply_adversaries(&batch, Some(&config), trial, "plate-1").unwrap();
        for w in out.iter() {
            let v = w.value(&key).unwrap();
            if w.location.is_corner(geometry) {
                corners.push(v);
            } else if w.location.is_edge(geometry) {
                edges.push(v);
            } else {
                assert_eq!(v, 100.0, "interior well {} changed", w.location);
            }
        }
    }
    let (m_corner, m_edge) = (mean(&corners), mean(&edges));
    assert!((m_corner - 92.5).abs() < 0.1, "corner mean {m_corner}");
    assert!((m_edge - 95.0).abs() < 0.1, "edge mean {m_edge}");
}

#[test]
fn correlated_noise_reproduces_configured_matrix() {
    let cv = 0.1;
    let generator = CorrelatedNoiseGenerator::new(7, NoiseParameters::default()).unwrap();
    let n = 8000;
    let mut z: Vec<Vec<f64>> = vec![Vec::with_capacity(n); MORPHOLOGY_CHANNELS.len()];
    for i in 0..n {
        let noise = generator.correlated_noise(&format!("plate-{i}"), "C4", cv);
        for (j, ch) in MORPHOLOGY_CHANNELS.iter().enumerate() {
            z[j].push(noise[*ch].ln() / cv);
        }
    }
    let mut worst = 0.0f64;
    for i in 0..z.len() {
        for j in 0..z.len() {
            let r = z[i].iter().covariance(z[j].iter())
                / (z[i].iter().std_dev() * z[j].iter().std_dev());
            worst = worst.max((r - MORPHOLOGY_CORRELATION[i][j]).abs());
        }
    }
    assert!(worst < 0.05, "max correlation deviation {worst}");
}

#[test]
fn noise_is_order_independent() {
    let generator = CorrelatedNoiseGenerator::new(99, NoiseParameters::default()).unwrap();
    let batch = uniform_96(100.0);
    let run = RunMeta::new("plate-1", PlateGeometry::WELLS_96);
    let forward: Vec<WellMeasurement> = batch.iter().map(|w| generator.apply_all(w, 0.3, &run)).collect();
    let mut backward: Vec<WellMeasurement> =
        batch.iter().rev().map(|w| generator.apply_all(w, 0.3, &run)).collect();
    backward.reverse();
    assert_eq!(forward, backward);

    // Split across workers.
    let generator = Arc::new(generator);
    let chunks: Vec<Vec<WellMeasurement>> = std::thread::scope(|s| {
        let handles: Vec<_> = batch
            .wells()
            .chunks(17)
            .map(|chunk| {
                let generator = Arc::clone(&generator);
                let run = run.clone();
                s.spawn(move || chunk.iter().map(|w| generator.apply_all(w, 0.3, &run)).collect::<Vec<_>>())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(chunks.concat(), forward);
}

#[test]
fn jittered_adversaries_are_order_independent() {
    let batch = uniform_96(100.0);
    let mut wells = batch.wells().to_vec();
    wells.reverse();
    let reversed = PlateBatch::new(batch.plate_id(), wells).unwrap();
    let key = MeasurementKey::new(MORPHOLOGY, "er");

    for kind in ["EdgeEffect", "SpatialGradient"] {
        let config = AdversarialPlateConfig {
            enabled: true,
            adversaries: vec![AdversarySpec::new(kind, json!({"target": "morphology.er", "jitter": 0.05}))],
            strength: 1.0,
        };
        let forward = apply_adversaries(&batch, Some(&config), 7, "plate-1").unwrap();
        let backward = apply_adversaries(&reversed, Some(&config), 7, "plate-1").unwrap();
        for w in forward.iter() {
            let other = backward.get(&w.location).unwrap();
            assert_eq!(
                w.value(&key).map(f64::to_bits),
                other.value(&key).map(f64::to_bits),
                "{kind} at {}",
                w.location
            );
        }
    }
}

#[test]
fn drift_noise_inflation_widens_observed_spread() {
    let mut noise = NoiseParameters::default();
    noise.spatial.edge_reduction = 0.0;
    noise.spatial.gradient_strength = 0.0;
    noise.spatial.row_cv = 0.0;
    noise.spatial.col_cv = 0.0;
    noise.failure.base_rate = 0.0;
    let generator = CorrelatedNoiseGenerator::new(31, noise).unwrap();

    let mut config = DriftConfig::default();
    let imaging = config.modalities.get_mut(IMAGING).unwrap();
    imaging.noise_trend = 2.0;
    imaging.noise_wander_sigma = 0.0;
    let model = DriftModel::new(31, config).unwrap();

    let bio = PlateBatch::uniform("plate-1", PlateGeometry::WELLS_384, &morphology_readouts(100.0));
    let inflation = model.plate_inflation(72.0, 0.0, bio.len(), IMAGING).unwrap();
    assert!(inflation.iter().all(|&f| f > 1.4 && f < 1.5), "{:?}", &inflation[..3]);

    let key = MeasurementKey::new(MORPHOLOGY, "er");
    let log_sd = |batch: &PlateBatch| {
        let xs: Vec<f64> = batch.iter().map(|w| w.value(&key).unwrap().ln()).collect();
        xs.iter().std_dev()
    };
    let fresh = log_sd(&generator.apply_plate(&bio, |_| 0.0, 0.0));
    let aged = log_sd(&generator.apply_plate_inflated(&bio, |_| 0.0, |i| inflation[i], 0.0));
    let ratio = aged / fresh;
    assert!((ratio - inflation[0]).abs() < 0.02, "spread ratio {ratio}");
}

#[test]
fn drift_is_bounded_and_shares_wander() {
    for seed in [0u64, 1, 2, 1234, 987_654_321] {
        let model = DriftModel::new(seed, DriftConfig::default()).unwrap();
        let (lo, hi) = model.gain_bounds();
        for i in 0..=288 {
            let t = i as f64 * 0.25;
            let a = model.debug_components(t, IMAGING).unwrap();
            let b = model.debug_components(t, PLATE_READER).unwrap();
            for c in [&a, &b] {
                assert!(c.gain >= lo && c.gain <= hi, "seed {seed} t {t} gain {}", c.gain);
                assert!(c.noise_inflation >= 1.0);
            }
            assert_eq!(a.wander_shared.to_bits(), b.wander_shared.to_bits());
        }
    }
}

#[test]
fn drift_model_shared_across_threads() {
    let model = Arc::new(DriftModel::new(77, DriftConfig::default()).unwrap());
    let sequential: Vec<f64> = (0..72).map(|h| model.gain(h as f64, IMAGING).unwrap()).collect();
    let parallel: Vec<f64> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..72)
            .map(|h| {
                let model = Arc::clone(&model);
                s.spawn(move || model.gain(h as f64, IMAGING).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(sequential, parallel);
    let rebuilt = DriftModel::new(77, DriftConfig::default()).unwrap();
    assert_eq!(rebuilt.gain(33.0, IMAGING).unwrap(), model.gain(33.0, IMAGING).unwrap());
}

#[test]
fn disabled_adversaries_are_identity() {
    let batch = uniform_96(42.0);
    let config = AdversarialPlateConfig {
        enabled: false,
        adversaries: vec![AdversarySpec::new("DoseLoss", json!({"target": "morphology.er"}))],
        strength: 3.0,
    };
    assert_eq!(apply_adversaries(&batch, Some(&config), 5, "plate-1").unwrap(), batch);
    assert_eq!(apply_adversaries(&batch, None, 5, "plate-1").unwrap(), batch);
}

#[test]
fn adversaries_only_touch_their_target() {
    let wells: Vec<WellMeasurement> = PlateGeometry::WELLS_96
        .locations()
        .map(|loc| {
            let dose = [0.0, 0.1, 1.0, 10.0][loc.col() % 4];
            let compound = if loc.row() % 2 == 0 { "cpd-a" } else { "cpd-b" };
            WellMeasurement::new(loc, Treatment::new(compound, dose), morphology_readouts(100.0))
        })
        .collect();
    let batch = PlateBatch::new("plate-1", wells).unwrap();
    let targets = [
        ("SpatialGradient", json!({"target": "morphology.er", "axis": "row", "jitter": 0.05})),
        ("EdgeEffect", json!({"target": "morphology.mito"})),
        ("GroupShift", json!({"target": "morphology.nucleus", "group_by": "compound_dose"})),
        ("DoseLoss", json!({"target": "morphology.actin", "threshold_dose": 0.5})),
    ];
    for (kind, params) in targets {
        let target = MeasurementKey::parse(params["target"].as_str().unwrap()).unwrap();
        let config = AdversarialPlateConfig {
            enabled: true,
            adversaries: vec![AdversarySpec::new(kind, params)],
            strength: 2.0,
        };
        let out = apply_adversaries(&batch, Some(&config), 3, "plate-1").unwrap();
        assert_eq!(out.len(), batch.len());
        let mut changed = 0;
        for (before, after) in batch.iter().zip(out.iter()) {
            assert_eq!(before.location, after.location);
            assert_eq!(before.treatment, after.treatment);
            for key in before.keys() {
                if key == target {
                    changed += usize::from(before.value(&key) != after.value(&key));
                } else {
                    assert_eq!(before.value(&key), after.value(&key), "{kind} touched {key}");
                }
            }
        }
        assert!(changed > 0, "{kind} changed nothing");
    }
}

#[test]
fn custom_adversary_registration() {
    let mut registry = AdversaryRegistry::with_builtins();
    registry.register("HalfEdge", "EdgeEffect with a fixed -50% shift", |args| {
        let target = args.resolve_key(args.params()["target"].as_str().unwrap_or_default())?;
        Ok(Box::new(EdgeEffect::new(target, -0.5, 1.0, 0.0)) as Box<dyn Adversary>)
    });
    assert!(registry.names().contains(&"HalfEdge".to_string()));
    let config = AdversarialPlateConfig {
        enabled: true,
        adversaries: vec![AdversarySpec::new("HalfEdge", json!({"target": "rna"}))],
        strength: 1.0,
    };
    let out = registry.apply(&uniform_96(100.0), Some(&config), 0, "plate-1").unwrap();
    let key = MeasurementKey::new(MORPHOLOGY, "rna");
    assert_eq!(out.wells()[0].value(&key), Some(50.0));
}

#[test]
fn geometry_only_budget_is_all_geometry() {
    let bio = uniform_96(100.0);
    let base = RealismProfile::Realistic.config().with_layers(true, false, false);
    let procedure = RealismMeasurement::new(2024);
    let report = VarianceAttribution::new(&procedure).run(&bio, &base).unwrap();
    assert_eq!(report.budget.channels.len(), 5);
    for (key, b) in &report.budget.channels {
        assert!(b.var_total > 0.0, "{key}");
        assert!((b.frac_geo - 1.0).abs() < 1e-9, "{key} frac_geo {}", b.frac_geo);
        assert!(b.frac_noise.abs() < 1e-9);
        assert!(b.frac_path.abs() < 1e-9);
        assert!(b.frac_resid.abs() < 1e-9);
    }
    assert_eq!(report.configs.get(Layer::Obs), &base);
}

#[test]
fn hostile_budget_reports_interaction() {
    let bio = uniform_96(100.0);
    let procedure = RealismMeasurement::new(31);
    let report = VarianceAttribution::new(&procedure)
        .run(&bio, &RealismProfile::Hostile.config())
        .unwrap();
    for b in report.budget.channels.values() {
        assert!(b.var_resid > 0.0);
        let sum = b.frac_geo + b.frac_noise + b.frac_path + b.frac_resid;
        assert!((sum - b.frac_sum).abs() < 1e-12);
    }
}

#[test]
fn full_pipeline_exports_tables() {
    let bio = uniform_96(100.0);
    let generator = CorrelatedNoiseGenerator::new(5, NoiseParameters::default()).unwrap();
    let noisy = generator.apply_plate(&bio, |_| 0.2, 6.0);

    let drift = DriftModel::new(5, DriftConfig::default()).unwrap();
    let drifted = PlateBatch::new(
        noisy.plate_id(),
        noisy
            .iter()
            .enumerate()
            .map(|(i, w)| drift.apply_to_well(w, i as f64 * 0.1, IMAGING, MORPHOLOGY))
            .collect::<wellsim_core::Result<Vec<_>>>()
            .unwrap(),
    )
    .unwrap();

    let config = AdversarialPlateConfig::from_json(
        r#"{"adversaries": [{"type": "SpatialGradient", "params": {"target": "morphology.er"}}]}"#,
    )
    .unwrap();
    let attacked = apply_adversaries(&drifted, Some(&config), 5, "plate-1").unwrap();
    let flagged = wellsim_core::qc::annotate(&attacked, MORPHOLOGY, 0.001).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("measurements.csv");
    wellsim_core::export::write_measurements(wellsim_core::export::create(&path).unwrap(), &flagged).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 97);
    assert!(text.lines().next().unwrap().ends_with("edge_distance,is_outlier,pathology_type,failure_mode"));
    assert!(flagged.iter().all(|w| w.metadata.contains_key("drift_gain")));
}
