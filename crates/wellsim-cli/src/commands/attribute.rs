use wellsim_core::{RealismConfig, RealismMeasurement, RealismProfile, Result, VarianceAttribution, export};

use super::{idealized_plate, open_output, read_text};

pub struct AttributeCommandConfig<'a> {
    pub profile: &'a str,
    pub config_path: Option<&'a str>,
    pub plate_size: &'a str,
    pub seed: u64,
    pub value: f64,
    pub format: &'a str,
    pub deltas_path: Option<&'a str>,
    pub budget_csv_path: Option<&'a str>,
}

pub fn run(cfg: AttributeCommandConfig<'_>) -> Result<()> {
    let base = match cfg.config_path {
        Some(path) => RealismConfig::from_json(&read_text(path)?)?,
        None => cfg.profile.parse::<RealismProfile>()?.config(),
    };
    let bio = idealized_plate("plate-1", cfg.plate_size, cfg.value)?;
    let procedure = RealismMeasurement::new(cfg.seed);
    let report = VarianceAttribution::new(&procedure).run(&bio, &base)?;

    match cfg.format {
        "json" => println!("{}", serde_json::to_string_pretty(&report.budget)?),
        _ => {
            let label = cfg.config_path.unwrap_or(cfg.profile);
            println!("Variance budget ({label}, {} wells, seed {})\n", bio.len(), cfg.seed);
            print!("{}", export::budget_markdown(&report.budget));
        }
    }

    if let Some(path) = cfg.deltas_path {
        export::write_deltas(open_output(Some(path))?, &report.deltas)?;
        eprintln!("Deltas written to {path}");
    }
    if let Some(path) = cfg.budget_csv_path {
        export::write_budget(open_output(Some(path))?, &report.budget)?;
        eprintln!("Budget written to {path}");
    }
    Ok(())
}
