pub mod adversaries;
pub mod attribute;
pub mod drift;
pub mod simulate;

use std::io::Write;

use wellsim_core::{Error, PlateBatch, PlateGeometry, Result, morphology_readouts};

/// Uniform idealized plate for a `--plate-size` value.
pub fn idealized_plate(plate_id: &str, plate_size: &str, value: f64) -> Result<PlateBatch> {
    let geometry = plate_size
        .parse::<usize>()
        .ok()
        .and_then(PlateGeometry::from_well_count)
        .ok_or_else(|| Error::InvalidConfig {
            field: "plate_size".to_string(),
            reason: format!("unsupported plate size `{plate_size}` (valid: 96, 384)"),
        })?;
    Ok(PlateBatch::uniform(plate_id, geometry, &morphology_readouts(value)))
}

pub fn read_text(path: &str) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

/// File at `path`, or stdout.
pub fn open_output(path: Option<&str>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(p) => Box::new(wellsim_core::export::create(p)?),
        None => Box::new(std::io::stdout().lock()),
    })
}
