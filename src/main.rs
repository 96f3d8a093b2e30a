use std::path::PathBuf;

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::error;

use plastifit::{
    calibration::Calibration, config::Config, cost::CostEvaluator, error::CalibrationError,
};

#[derive(Parser, Debug)]
#[command(name = "plastifit")]
#[command(version)]
#[command(about = "Calibrates crystal plasticity parameters against DIC and tensile data")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Minimize the cost from the initial guess
    Calibrate {
        /// JSON configuration of the run
        config: PathBuf,
    },
    /// Score the initial guess once
    Evaluate {
        /// JSON configuration of the run
        config: PathBuf,
    },
    /// Write displacement error maps of an existing simulation output
    ErrorMap {
        /// JSON configuration of the run
        config: PathBuf,
        /// Folder written by the simulator
        results: PathBuf,
        /// Where the .vtu maps are written
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

fn init_log(level: &str) {
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run(command: &Commands) -> Result<(), CalibrationError> {
    match command {
        Commands::Calibrate { config } => {
            let calibration = Calibration::new(Config::load(config)?)?;
            let result = calibration.run()?;
            print!("{result}");
        }
        Commands::Evaluate { config } => {
            let calibration = Calibration::new(Config::load(config)?)?;
            let config = calibration.config();
            let cost = calibration.evaluate(&config.bounds.normalize(&config.initial_guess))?;
            println!("weighted cost {cost:.6e}");
        }
        Commands::ErrorMap {
            config,
            results,
            output,
        } => {
            let evaluator = CostEvaluator::new(&Config::load(config)?)?;
            for path in evaluator.write_error_maps(results, output)? {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

fn main() {
    init_log("info");

    let args = Args::parse();
    if let Err(err) = run(&args.command) {
        error!("{err}");
        std::process::exit(1)
    }
}
