use wellsim_core::{DriftConfig, DriftModel, Error, Result};

use super::read_text;

pub fn run(seed: u64, modality: &str, step: f64, config_path: Option<&str>, components: bool) -> Result<()> {
    if !(step > 0.0) {
        return Err(Error::InvalidConfig {
            field: "step".to_string(),
            reason: format!("must be positive, got {step}"),
        });
    }
    let config = match config_path {
        Some(path) => DriftConfig::from_json(&read_text(path)?)?,
        None => DriftConfig::default(),
    };
    let horizon = config.horizon_hours;
    let model = DriftModel::new(seed, config)?;
    let (lo, hi) = model.gain_bounds();
    println!("Drift for {modality} (seed {seed}, gain bounds [{lo:.4}, {hi:.4}])\n");

    if components {
        println!(
            "{:>8} {:>8} {:>9} {:>9} {:>9} {:>9} {:>8} {:>8}",
            "t_h", "aging", "cycle", "w_shared", "w_modal", "log_gain", "gain", "noise"
        );
    } else {
        println!("{:>8} {:>8} {:>8}", "t_h", "gain", "noise");
    }

    let steps = (horizon / step).floor() as usize;
    for i in 0..=steps {
        let t = (i as f64 * step).min(horizon);
        let c = model.debug_components(t, modality)?;
        if components {
            println!(
                "{:>8.2} {:>8.4} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>8.4} {:>8.4}",
                c.t, c.aging, c.cycle, c.wander_shared, c.wander_modality, c.log_gain, c.gain, c.noise_inflation
            );
        } else {
            println!("{:>8.2} {:>8.4} {:>8.4}", c.t, c.gain, c.noise_inflation);
        }
    }
    Ok(())
}
