//! CLI for wellsim: simulate realistic plate reads and attribute their variance.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wellsim")]
#[command(about = "wellsim: realistic plate measurements and where their variance comes from")]
#[command(version = wellsim_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate one observed plate from a uniform idealized plate and write
    /// the measurement table as CSV
    Simulate {
        /// Plate size: 96 or 384 wells
        #[arg(long, default_value = "96", value_parser = ["96", "384"])]
        plate_size: String,

        #[arg(long, default_value = "plate-1")]
        plate_id: String,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Idealized value of every morphology channel
        #[arg(long, default_value = "100.0")]
        value: f64,

        /// Stress level in [0, 1] applied to every well
        #[arg(long, default_value = "0.0")]
        stress: f64,

        /// Acquisition time for the whole plate, in hours
        #[arg(long, default_value = "4.0")]
        run_hours: f64,

        /// NoiseParameters JSON (defaults when omitted)
        #[arg(long)]
        noise_config: Option<String>,

        /// Apply instrument drift for this modality (e.g. imaging, plate_reader)
        #[arg(long)]
        drift: Option<String>,

        /// Hours since instrument start at the first well
        #[arg(long, default_value = "0.0")]
        drift_start: f64,

        /// DriftConfig JSON for --drift (defaults when omitted)
        #[arg(long, requires = "drift")]
        drift_config: Option<String>,

        /// AdversarialPlateConfig JSON
        #[arg(long)]
        adversaries: Option<String>,

        /// Per-well false-positive rate of the outlier flag
        #[arg(long, default_value = "0.001")]
        qc_alpha: f64,

        /// Output CSV path (stdout when omitted)
        #[arg(long)]
        output: Option<String>,
    },

    /// Run the five-configuration variance attribution and print the budget
    Attribute {
        /// Realism profile: clean, realistic, hostile
        #[arg(long, default_value = "realistic")]
        profile: String,

        /// RealismConfig JSON; overrides --profile
        #[arg(long)]
        config: Option<String>,

        #[arg(long, default_value = "96", value_parser = ["96", "384"])]
        plate_size: String,

        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(long, default_value = "100.0")]
        value: f64,

        /// Output format
        #[arg(long, default_value = "markdown", value_parser = ["markdown", "json"])]
        format: String,

        /// Also write the long-format deltas table here
        #[arg(long)]
        deltas: Option<String>,

        /// Also write the budget table as CSV here
        #[arg(long)]
        budget_csv: Option<String>,
    },

    /// Print instrument gain and noise inflation over the drift horizon
    Drift {
        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(long, default_value = "imaging")]
        modality: String,

        /// Time step in hours
        #[arg(long, default_value = "6.0")]
        step: f64,

        /// DriftConfig JSON (defaults when omitted)
        #[arg(long)]
        config: Option<String>,

        /// Show every intermediate term
        #[arg(long)]
        components: bool,
    },

    /// List registered adversary kinds
    Adversaries,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            plate_size,
            plate_id,
            seed,
            value,
            stress,
            run_hours,
            noise_config,
            drift,
            drift_start,
            drift_config,
            adversaries,
            qc_alpha,
            output,
        } => commands::simulate::run(commands::simulate::SimulateCommandConfig {
            plate_size: &plate_size,
            plate_id: &plate_id,
            seed,
            value,
            stress,
            run_hours,
            noise_config: noise_config.as_deref(),
            drift_modality: drift.as_deref(),
            drift_start,
            drift_config: drift_config.as_deref(),
            adversaries: adversaries.as_deref(),
            qc_alpha,
            output_path: output.as_deref(),
        }),
        Commands::Attribute {
            profile,
            config,
            plate_size,
            seed,
            value,
            format,
            deltas,
            budget_csv,
        } => commands::attribute::run(commands::attribute::AttributeCommandConfig {
            profile: &profile,
            config_path: config.as_deref(),
            plate_size: &plate_size,
            seed,
            value,
            format: &format,
            deltas_path: deltas.as_deref(),
            budget_csv_path: budget_csv.as_deref(),
        }),
        Commands::Drift {
            seed,
            modality,
            step,
            config,
            components,
        } => commands::drift::run(seed, &modality, step, config.as_deref(), components),
        Commands::Adversaries => commands::adversaries::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
