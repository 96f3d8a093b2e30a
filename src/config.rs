use std::path::{Path, PathBuf};

use json::JsonValue;
use log::info;

use crate::{datatypes::Bounds, error::CalibrationError, loader};

/// How the DIC measurements are laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DicLayout {
    /// One table per time step, `<dic_data><k>.csv`
    PerStep,
    /// One table with `x y (ux uy C)*n_steps` columns
    Combined,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    /// Finite-difference step in the normalized space
    pub eps: f64,
    pub max_iters: u64,
    pub tol_grad: f64,
    pub tol_cost: f64,
    /// Number of correction pairs kept by L-BFGS
    pub memory: usize,
    pub verbose: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            eps: 1e-8,
            max_iters: 100,
            tol_grad: 1e-5,
            tol_cost: 1e-9,
            memory: 7,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub command: String,
    pub batch_file: Option<String>,
    pub batch_command: String,
    pub work_dir: PathBuf,
    pub prm_template: PathBuf,
    pub latent_hardening_template: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentalConfig {
    pub dic_data: String,
    pub dic_layout: DicLayout,
    pub time_steps: Vec<usize>,
    pub tensile_curve: PathBuf,
    pub tensile_direction: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostConfig {
    pub penalty: f64,
    pub weight_on_tensile_curve: f64,
    pub weight_by_correlation: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugConfig {
    pub fake_simulations: bool,
    pub fake_deletions: bool,
}

/// Settings of a calibration run. Built once at start-up and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub parameter_names: Vec<String>,
    pub initial_guess: Vec<f64>,
    pub bounds: Bounds,
    pub optimizer: OptimizerConfig,
    pub workers: usize,
    pub simulator: SimulatorConfig,
    pub experimental: ExperimentalConfig,
    pub cost: CostConfig,
    pub log_file: PathBuf,
    pub debug: DebugConfig,
}

fn missing(field: &str) -> CalibrationError {
    CalibrationError::Config(format!("Config file missing {field} field"))
}

fn required_str(value: &JsonValue, field: &str) -> Result<String, CalibrationError> {
    match value.as_str() {
        Some(s) => Ok(s.to_owned()),
        None if value.is_null() => Err(missing(field)),
        None => Err(CalibrationError::Config(format!(
            "Field {field} must be a string"
        ))),
    }
}

fn optional_f64(value: &JsonValue, field: &str, default: f64) -> Result<f64, CalibrationError> {
    if value.is_null() {
        return Ok(default);
    }
    value
        .as_f64()
        .ok_or_else(|| CalibrationError::Config(format!("Field {field} must be a number")))
}

fn optional_bool(value: &JsonValue, field: &str, default: bool) -> Result<bool, CalibrationError> {
    if value.is_null() {
        return Ok(default);
    }
    value
        .as_bool()
        .ok_or_else(|| CalibrationError::Config(format!("Field {field} must be a boolean")))
}

fn f64_list(value: &JsonValue, field: &str) -> Result<Vec<f64>, CalibrationError> {
    if value.is_null() {
        return Err(missing(field));
    }
    if !value.is_array() {
        return Err(CalibrationError::Config(format!(
            "Field {field} must be a list of numbers"
        )));
    }
    value
        .members()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                CalibrationError::Config(format!("Non-number value {v} in {field}"))
            })
        })
        .collect()
}

/// Parses the initial guess, an ordered object mapping parameter names to
/// starting values
fn parse_initial_guess(input_json: &JsonValue) -> Result<(Vec<String>, Vec<f64>), CalibrationError> {
    let guess = &input_json["initial_guess"];
    if !guess.is_object() {
        return Err(missing("initial_guess"));
    }

    let mut names = Vec::new();
    let mut values = Vec::new();
    for (name, value) in guess.entries() {
        let value = value.as_f64().ok_or_else(|| {
            CalibrationError::Config(format!("Bad value for initial guess of {name}"))
        })?;
        names.push(name.to_owned());
        values.push(value);
    }

    if names.is_empty() {
        return Err(CalibrationError::Config(
            "Initial guess must hold at least one parameter".to_owned(),
        ));
    }

    Ok((names, values))
}

fn parse_bounds(input_json: &JsonValue, n_params: usize) -> Result<Bounds, CalibrationError> {
    let lower = f64_list(&input_json["bounds"]["lower"], "bounds.lower")?;
    let upper = f64_list(&input_json["bounds"]["upper"], "bounds.upper")?;

    let error_msg = |which: &str, n: usize| {
        CalibrationError::Config(format!(
            "The size of the {which} bounds ({n}) must be the same as the number of values in initial guess ({n_params})"
        ))
    };
    if lower.len() != n_params {
        return Err(error_msg("lower", lower.len()));
    }
    if upper.len() != n_params {
        return Err(error_msg("upper", upper.len()));
    }

    Bounds::new(lower, upper)
}

fn parse_optimizer(value: &JsonValue) -> Result<OptimizerConfig, CalibrationError> {
    let defaults = OptimizerConfig::default();
    let optimizer = OptimizerConfig {
        eps: optional_f64(&value["eps"], "optimizer.eps", defaults.eps)?,
        max_iters: match &value["max_iters"] {
            v if v.is_null() => defaults.max_iters,
            v => v.as_u64().ok_or_else(|| {
                CalibrationError::Config("Field optimizer.max_iters must be a positive integer".to_owned())
            })?,
        },
        tol_grad: optional_f64(&value["tol_grad"], "optimizer.tol_grad", defaults.tol_grad)?,
        tol_cost: optional_f64(&value["tol_cost"], "optimizer.tol_cost", defaults.tol_cost)?,
        memory: match &value["memory"] {
            v if v.is_null() => defaults.memory,
            v => v.as_usize().ok_or_else(|| {
                CalibrationError::Config("Field optimizer.memory must be a positive integer".to_owned())
            })?,
        },
        verbose: optional_bool(&value["verbose"], "optimizer.verbose", defaults.verbose)?,
    };

    if !(optimizer.eps > 0.0) {
        return Err(CalibrationError::Config(
            "Field optimizer.eps must be strictly positive".to_owned(),
        ));
    }
    if optimizer.memory == 0 {
        return Err(CalibrationError::Config(
            "Field optimizer.memory must be strictly positive".to_owned(),
        ));
    }

    Ok(optimizer)
}

fn parse_simulator(input_json: &JsonValue) -> Result<SimulatorConfig, CalibrationError> {
    let simulator = &input_json["simulator"];
    let templates = &input_json["templates"];

    Ok(SimulatorConfig {
        command: required_str(&simulator["command"], "simulator.command")?,
        batch_file: match &simulator["batch_file"] {
            v if v.is_null() => None,
            v => Some(required_str(v, "simulator.batch_file")?),
        },
        batch_command: match &simulator["batch_command"] {
            v if v.is_null() => "sbatch --wait".to_owned(),
            v => required_str(v, "simulator.batch_command")?,
        },
        work_dir: match &simulator["work_dir"] {
            v if v.is_null() => PathBuf::from("."),
            v => PathBuf::from(required_str(v, "simulator.work_dir")?),
        },
        prm_template: PathBuf::from(required_str(&templates["prm_file"], "templates.prm_file")?),
        latent_hardening_template: match &templates["latent_hardening"] {
            v if v.is_null() => None,
            v => Some(PathBuf::from(required_str(v, "templates.latent_hardening")?)),
        },
    })
}

fn parse_experimental(
    input_json: &JsonValue,
    prm_template: &Path,
) -> Result<ExperimentalConfig, CalibrationError> {
    let experimental = &input_json["experimental"];

    let dic_layout = match experimental["dic_layout"].as_str() {
        None | Some("per_step") => DicLayout::PerStep,
        Some("combined") => DicLayout::Combined,
        Some(other) => {
            return Err(CalibrationError::Config(format!(
                "Unknown dic_layout '{other}'. Expected per_step or combined"
            )))
        }
    };

    let time_steps = if experimental["time_steps"].is_null() {
        let steps = loader::time_steps_from_prm(prm_template)?;
        info!("read time steps {:?} from {}", steps, prm_template.display());
        steps
    } else {
        experimental["time_steps"]
            .members()
            .map(|v| {
                v.as_usize().ok_or_else(|| {
                    CalibrationError::Config(format!("Bad time step {v} in experimental.time_steps"))
                })
            })
            .collect::<Result<Vec<usize>, CalibrationError>>()?
    };
    if time_steps.is_empty() {
        return Err(CalibrationError::Config(
            "At least one time step must be compared with DIC".to_owned(),
        ));
    }

    let tensile_direction = match &experimental["tensile_direction"] {
        v if v.is_null() => "x".to_owned(),
        v => required_str(v, "experimental.tensile_direction")?.to_lowercase(),
    };
    if !["x", "y", "z"].contains(&tensile_direction.as_str()) {
        return Err(CalibrationError::Config(format!(
            "Tensile direction must be x, y or z, got '{tensile_direction}'"
        )));
    }

    Ok(ExperimentalConfig {
        dic_data: required_str(&experimental["dic_data"], "experimental.dic_data")?,
        dic_layout,
        time_steps,
        tensile_curve: PathBuf::from(required_str(
            &experimental["tensile_curve"],
            "experimental.tensile_curve",
        )?),
        tensile_direction,
    })
}

fn parse_cost(value: &JsonValue) -> Result<CostConfig, CalibrationError> {
    if value["penalty"].is_null() {
        return Err(missing("cost.penalty"));
    }
    let cost = CostConfig {
        penalty: optional_f64(&value["penalty"], "cost.penalty", 0.0)?,
        weight_on_tensile_curve: optional_f64(
            &value["weight_on_tensile_curve"],
            "cost.weight_on_tensile_curve",
            0.5,
        )?,
        weight_by_correlation: optional_bool(
            &value["weight_by_correlation"],
            "cost.weight_by_correlation",
            false,
        )?,
    };

    if !cost.penalty.is_finite() {
        return Err(CalibrationError::Config(
            "Penalty value must be finite".to_owned(),
        ));
    }
    if !(0.0..=1.0).contains(&cost.weight_on_tensile_curve) {
        return Err(CalibrationError::Config(format!(
            "Weight on tensile curve must lie in [0, 1], got {}",
            cost.weight_on_tensile_curve
        )));
    }

    Ok(cost)
}

impl Config {
    /// Parses and validates a configuration document
    ///
    /// # Arguments
    /// * `input_json` - The configuration as a JsonValue object
    pub fn from_json(input_json: &JsonValue) -> Result<Config, CalibrationError> {
        let (parameter_names, initial_guess) = parse_initial_guess(input_json)?;
        let bounds = parse_bounds(input_json, initial_guess.len())?;

        for (i, name) in parameter_names.iter().enumerate() {
            if initial_guess[i] < bounds.lower[i] || initial_guess[i] > bounds.upper[i] {
                return Err(CalibrationError::Config(format!(
                    "Initial guess of {name} ({}) lies outside its bounds [{}, {}]",
                    initial_guess[i], bounds.lower[i], bounds.upper[i]
                )));
            }
        }

        let workers = match &input_json["parallel"]["workers"] {
            v if v.is_null() => 1,
            v => match v.as_usize() {
                Some(n) if n >= 1 => n,
                _ => {
                    return Err(CalibrationError::Config(
                        "Field parallel.workers must be a positive integer".to_owned(),
                    ))
                }
            },
        };

        let simulator = parse_simulator(input_json)?;
        let experimental = parse_experimental(input_json, &simulator.prm_template)?;

        let debug = DebugConfig {
            fake_simulations: optional_bool(
                &input_json["debug"]["fake_simulations"],
                "debug.fake_simulations",
                false,
            )?,
            fake_deletions: optional_bool(
                &input_json["debug"]["fake_deletions"],
                "debug.fake_deletions",
                false,
            )?,
        };

        Ok(Config {
            parameter_names,
            initial_guess,
            bounds,
            optimizer: parse_optimizer(&input_json["optimizer"])?,
            workers,
            simulator,
            experimental,
            cost: parse_cost(&input_json["cost"])?,
            log_file: PathBuf::from(required_str(&input_json["log_file"], "log_file")?),
            debug,
        })
    }

    /// Parses a configuration from JSON text
    pub fn from_json_str(text: &str) -> Result<Config, CalibrationError> {
        match json::parse(text) {
            Ok(input_json) => Config::from_json(&input_json),
            Err(err) => Err(CalibrationError::Config(format!(
                "Error in config file json: {err}"
            ))),
        }
    }

    /// Loads the configuration file of a run
    ///
    /// # Arguments
    /// * `config_file` - The path to the JSON configuration file
    pub fn load(config_file: &Path) -> Result<Config, CalibrationError> {
        let file_string = match std::fs::read_to_string(config_file) {
            Ok(f) => f,
            Err(_err) => {
                return Err(CalibrationError::Config(format!(
                    "Unable to open config file {}",
                    config_file.display()
                )))
            }
        };

        let config = Config::from_json_str(&file_string)?;
        info!(
            "loaded {} parameters from {}",
            config.parameter_names.len(),
            config_file.display()
        );
        Ok(config)
    }

    /// Tolerance used to match a candidate against previous evaluations, in
    /// normalized units. A tenth of the finite-difference step, so gradient
    /// probes are never mistaken for the point they perturb.
    pub fn cache_tolerance(&self) -> f64 {
        self.optimizer.eps / 10.0
    }
}
