//! Output tables.
//!
//! - measurements: one row per well (location, treatment, every channel, QC flags)
//! - deltas: one row per well per channel per component (`bio|geo|noise|path|obs|resid`)
//! - budget: one row per channel with the [`ChannelBudget`] fields
//!
//! Writers take any `io::Write`; [`create`] opens a buffered file.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::attribution::{ChannelBudget, DeltaTable, VarianceBudget};
use crate::error::Result;
use crate::well::{PlateBatch, WellMeasurement};

/// Metadata fields promoted to measurement-table columns.
pub const QC_COLUMNS: [&str; 4] = ["edge_distance", "is_outlier", "pathology_type", "failure_mode"];

pub const DELTA_HEADER: &str = "well,channel,component,value";

pub const BUDGET_HEADER: &str = "channel,n_wells,var_total,var_geo,var_noise,var_path,var_resid,\
                                 frac_geo,frac_noise,frac_path,frac_resid,frac_sum";

/// Buffered writer over a newly created file.
pub fn create(path: impl AsRef<Path>) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Quote a field when it contains a separator, quote, or newline.
fn field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

fn metadata_cell(well: &WellMeasurement, name: &str) -> String {
    match well.metadata.get(name) {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => field(s),
        Some(other) => field(&other.to_string()),
    }
}

/// Write the per-well measurement table.
pub fn write_measurements<W: Write>(mut out: W, batch: &PlateBatch) -> Result<()> {
    let keys: Vec<_> = batch.keys().into_iter().collect();
    let mut header = String::from("plate,well,row,col,compound,dose");
    for key in &keys {
        header.push(',');
        header.push_str(&field(&key.to_string()));
    }
    for col in QC_COLUMNS {
        header.push(',');
        header.push_str(col);
    }
    writeln!(out, "{header}")?;

    for well in batch {
        let mut line = format!(
            "{},{},{},{},{},{}",
            field(batch.plate_id()),
            well.location,
            well.location.row(),
            well.location.col(),
            field(&well.treatment.compound),
            well.treatment.dose
        );
        for key in &keys {
            line.push(',');
            if let Some(v) = well.value(key) {
                let _ = write!(line, "{v}");
            }
        }
        for col in QC_COLUMNS {
            line.push(',');
            line.push_str(&metadata_cell(well, col));
        }
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

/// Write the long-format deltas table.
pub fn write_deltas<W: Write>(mut out: W, deltas: &DeltaTable) -> Result<()> {
    writeln!(out, "{DELTA_HEADER}")?;
    for r in &deltas.rows {
        let channel = field(&r.key.to_string());
        for (component, value) in [
            ("bio", r.bio),
            ("geo", r.geo),
            ("noise", r.noise),
            ("path", r.path),
            ("obs", r.obs),
            ("resid", r.resid),
        ] {
            writeln!(out, "{},{channel},{component},{value}", r.well)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Write the per-channel budget table.
pub fn write_budget<W: Write>(mut out: W, budget: &VarianceBudget) -> Result<()> {
    writeln!(out, "{BUDGET_HEADER}")?;
    for (key, b) in &budget.channels {
        let ChannelBudget {
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
            frac_sum,
        } = b;
        writeln!(
            out,
            "{},{n_wells},{var_total},{var_geo},{var_noise},{var_path},{var_resid},\
             {frac_geo},{frac_noise},{frac_path},{frac_resid},{frac_sum}",
            field(&key.to_string())
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Markdown table of variance fractions per channel.
pub fn budget_markdown(budget: &VarianceBudget) -> String {
    let pct = |f: f64| format!("{:.1}%", f * 100.0);
    let mut md = String::new();
    md.push_str("| channel | geo | noise | path | resid | sum | var_total |\n");
    md.push_str("|---|---:|---:|---:|---:|---:|---:|\n");
    for (key, b) in &budget.channels {
        let _ = writeln!(
            md,
            "| {key} | {} | {} | {} | {} | {} | {:.4} |",
            pct(b.frac_geo),
            pct(b.frac_noise),
            pct(b.frac_path),
            pct(b.frac_resid),
            pct(b.frac_sum),
            b.var_total
        );
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::VarianceAttribution;
    use crate::realism::{RealismMeasurement, RealismProfile};
    use crate::well::{PlateGeometry, morphology_readouts};

    fn plate() -> PlateBatch {
        PlateBatch::uniform("P1", PlateGeometry::WELLS_96, &morphology_readouts(100.0))
    }

    #[test]
    fn test_field_quoting() {
        assert_eq!(field("plain"), "plain");
        assert_eq!(field("a,b"), "\"a,b\"");
        assert_eq!(field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_measurement_table_shape() {
        let batch = plate().map_wells(|w| w.clone().with_metadata("pathology_type", "dropout"));
        let mut buf = Vec::new();
        write_measurements(&mut buf, &batch).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 97);
        assert_eq!(
            lines[0],
            "plate,well,row,col,compound,dose,morphology.actin,morphology.er,morphology.mito,\
             morphology.nucleus,morphology.rna,edge_distance,is_outlier,pathology_type,failure_mode"
        );
        assert_eq!(lines[1], "P1,A1,0,0,DMSO,0,100,100,100,100,100,,,dropout,");
    }

    #[test]
    fn test_deltas_and_budget_files() {
        let m = RealismMeasurement::new(4);
        let report = VarianceAttribution::new(&m)
            .run(&plate(), &RealismProfile::Realistic.config())
            .unwrap();
        let tmp = tempfile::tempdir().unwrap();

        let deltas_path = tmp.path().join("deltas.csv");
        write_deltas(create(&deltas_path).unwrap(), &report.deltas).unwrap();
        let deltas = std::fs::read_to_string(&deltas_path).unwrap();
        assert_eq!(deltas.lines().count(), 1 + 96 * 5 * 6);
        assert!(deltas.lines().nth(1).unwrap().starts_with("A1,morphology.actin,bio,100"));

        let budget_path = tmp.path().join("budget.csv");
        write_budget(create(&budget_path).unwrap(), &report.budget).unwrap();
        let budget = std::fs::read_to_string(&budget_path).unwrap();
        let lines: Vec<&str> = budget.lines().collect();
        assert_eq!(lines[0], BUDGET_HEADER);
        assert_eq!(lines.len(), 6);
        assert!(lines[1].starts_with("morphology.actin,96,"));
    }

    #[test]
    fn test_budget_markdown() {
        let m = RealismMeasurement::new(4);
        let report = VarianceAttribution::new(&m)
            .run(&plate(), &RealismProfile::Hostile.config())
            .unwrap();
        let md = budget_markdown(&report.budget);
        assert!(md.starts_with("| channel | geo |"));
        assert_eq!(md.lines().count(), 2 + 5);
        assert!(md.contains("| morphology.nucleus |"));
    }
}
