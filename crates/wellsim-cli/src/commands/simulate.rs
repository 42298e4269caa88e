use wellsim_core::{
    AdversarialPlateConfig, CorrelatedNoiseGenerator, DriftConfig, DriftModel, MORPHOLOGY,
    NoiseParameters, PlateBatch, Result, apply_adversaries, drift::read_time, export, qc,
};

use super::{idealized_plate, open_output, read_text};

pub struct SimulateCommandConfig<'a> {
    pub plate_size: &'a str,
    pub plate_id: &'a str,
    pub seed: u64,
    pub value: f64,
    pub stress: f64,
    pub run_hours: f64,
    pub noise_config: Option<&'a str>,
    pub drift_modality: Option<&'a str>,
    pub drift_start: f64,
    pub drift_config: Option<&'a str>,
    pub adversaries: Option<&'a str>,
    pub qc_alpha: f64,
    pub output_path: Option<&'a str>,
}

pub fn run(cfg: SimulateCommandConfig<'_>) -> Result<()> {
    let batch = simulate(&cfg)?;
    export::write_measurements(open_output(cfg.output_path)?, &batch)?;
    if let Some(path) = cfg.output_path {
        log::info!("wrote {} wells to {path}", batch.len());
    }
    Ok(())
}

/// The observed, QC-annotated plate.
fn simulate(cfg: &SimulateCommandConfig<'_>) -> Result<PlateBatch> {
    let bio = idealized_plate(cfg.plate_id, cfg.plate_size, cfg.value)?;

    let params = match cfg.noise_config {
        Some(path) => NoiseParameters::from_json(&read_text(path)?)?,
        None => NoiseParameters::default(),
    };
    let generator = CorrelatedNoiseGenerator::new(cfg.seed, params)?;
    let stress = cfg.stress;

    let drift = match cfg.drift_modality {
        Some(modality) => {
            let config = match cfg.drift_config {
                Some(path) => DriftConfig::from_json(&read_text(path)?)?,
                None => DriftConfig::default(),
            };
            Some((DriftModel::new(cfg.seed, config)?, modality))
        }
        None => None,
    };

    let total = bio.len();
    let inflation = match &drift {
        Some((model, modality)) => model.plate_inflation(cfg.drift_start, cfg.run_hours, total, modality)?,
        None => vec![1.0; total],
    };
    let mut batch = generator.apply_plate_inflated(
        &bio,
        |_| stress,
        |i| inflation.get(i).copied().unwrap_or(1.0),
        cfg.run_hours,
    );

    if let Some((model, modality)) = &drift {
        let wells = batch
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let t = read_time(cfg.drift_start, cfg.run_hours, i, total);
                model.apply_to_well(w, t, modality, MORPHOLOGY)
            })
            .collect::<Result<Vec<_>>>()?;
        batch = PlateBatch::new(batch.plate_id(), wells)?;
    }

    if let Some(path) = cfg.adversaries {
        let config = AdversarialPlateConfig::from_json(&read_text(path)?)?;
        batch = apply_adversaries(&batch, Some(&config), cfg.seed, cfg.plate_id)?;
    }

    qc::annotate(&batch, MORPHOLOGY, cfg.qc_alpha)
}
