use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::{
    config::{DebugConfig, SimulatorConfig},
    error::CalibrationError,
};

/// Files generated for one simulation
#[derive(Debug, Clone, PartialEq)]
pub struct InputDeck {
    pub name: String,
    pub prm_file: PathBuf,
    pub latent_hardening_file: Option<PathBuf>,
    /// Folder the simulator writes its output into
    pub result_folder: PathBuf,
}

impl InputDeck {
    /// Everything to remove once the simulation has been scored
    pub fn artifacts(&self) -> Vec<&Path> {
        let mut artifacts = vec![self.prm_file.as_path()];
        if let Some(lh) = &self.latent_hardening_file {
            artifacts.push(lh.as_path());
        }
        artifacts.push(self.result_folder.as_path());
        artifacts
    }
}

/// Replaces `$name` and `${name}` placeholders with their values. `$$` is a
/// literal dollar sign.
///
/// # Arguments
/// * `template` - The template text
/// * `values` - Value of every known placeholder
/// * `origin` - Name of the template, for error messages
pub fn substitute(
    template: &str,
    values: &HashMap<String, String>,
    origin: &str,
) -> Result<String, CalibrationError> {
    let is_ident_start = |c: char| c == '_' || c.is_ascii_alphabetic();
    let is_ident = |c: char| c == '_' || c.is_ascii_alphanumeric();

    let lookup = |key: &str| match values.get(key) {
        Some(v) => Ok(v.as_str()),
        None => Err(CalibrationError::Simulator(format!(
            "Key {key} in {origin} is undefined"
        ))),
    };

    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        output.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(stripped) = after.strip_prefix('$') {
            output.push('$');
            rest = stripped;
        } else if let Some(braced) = after.strip_prefix('{') {
            let end = match braced.find('}') {
                Some(end) if end > 0 && braced[..end].chars().all(is_ident) => end,
                _ => {
                    return Err(CalibrationError::Simulator(format!(
                        "Invalid placeholder in {origin}"
                    )))
                }
            };
            output.push_str(lookup(&braced[..end])?);
            rest = &braced[end + 1..];
        } else if after.starts_with(is_ident_start) {
            let end = after.find(|c: char| !is_ident(c)).unwrap_or(after.len());
            output.push_str(lookup(&after[..end])?);
            rest = &after[end..];
        } else {
            return Err(CalibrationError::Simulator(format!(
                "Invalid placeholder in {origin}"
            )));
        }
    }
    output.push_str(rest);

    Ok(output)
}

fn read_template(path: &Path) -> Result<String, CalibrationError> {
    match std::fs::read_to_string(path) {
        Ok(t) => Ok(t),
        Err(err) => Err(CalibrationError::Simulator(format!(
            "Unable to read template {}: {err}",
            path.display()
        ))),
    }
}

/// Writes simulator input decks from the prm and latent hardening templates
#[derive(Debug, Clone)]
pub struct InputGenerator {
    work_dir: PathBuf,
    prm_origin: String,
    prm_template: String,
    latent_hardening_template: Option<(String, String)>,
}

impl InputGenerator {
    pub fn new(config: &SimulatorConfig) -> Result<InputGenerator, CalibrationError> {
        let latent_hardening_template = match &config.latent_hardening_template {
            Some(path) => Some((path.display().to_string(), read_template(path)?)),
            None => None,
        };

        Ok(InputGenerator {
            work_dir: config.work_dir.clone(),
            prm_origin: config.prm_template.display().to_string(),
            prm_template: read_template(&config.prm_template)?,
            latent_hardening_template,
        })
    }

    /// Name of the simulation of a parameter set: the values joined by `_`
    pub fn run_name(raw: &[f64]) -> String {
        raw.iter()
            .map(|v| format!("{v:?}"))
            .collect::<Vec<String>>()
            .join("_")
    }

    /// Writes the input deck of one parameter set into the working directory
    ///
    /// # Arguments
    /// * `names` - Parameter names, the placeholders of the templates
    /// * `raw` - Parameter values in physical units
    ///
    /// # Returns
    /// The paths of the generated files and of the expected result folder
    pub fn generate(&self, names: &[String], raw: &[f64]) -> Result<InputDeck, CalibrationError> {
        let name = InputGenerator::run_name(raw);
        let lh_name = format!("LHratios_{name}.txt");

        let mut values: HashMap<String, String> = std::iter::zip(names, raw)
            .map(|(n, v)| (n.clone(), format!("{v:?}")))
            .collect();
        values.insert("results".to_owned(), name.clone());
        values.insert("LH_name".to_owned(), lh_name.clone());

        let write = |path: &Path, text: String| match std::fs::write(path, text) {
            Ok(()) => Ok(()),
            Err(err) => Err(CalibrationError::Simulator(format!(
                "Failed to write {}: {err}",
                path.display()
            ))),
        };

        let prm_file = self.work_dir.join(format!("{name}.prm"));
        write(
            &prm_file,
            substitute(&self.prm_template, &values, &self.prm_origin)?,
        )?;

        let latent_hardening_file = match &self.latent_hardening_template {
            Some((origin, template)) => {
                let path = self.work_dir.join(&lh_name);
                write(&path, substitute(template, &values, origin)?)?;
                Some(path)
            }
            None => None,
        };

        debug!("generated input deck {}", prm_file.display());

        Ok(InputDeck {
            result_folder: self.work_dir.join(&name),
            name,
            prm_file,
            latent_hardening_file,
        })
    }
}

/// Runs one simulation to completion. Failures of the simulation itself are
/// detected afterwards from the missing output files.
pub trait Simulator: Send + Sync {
    fn run(&self, deck: &InputDeck) -> Result<(), CalibrationError>;
}

/// Runs the simulator as a child process, directly or through a batch
/// scheduler, and waits for it to exit
#[derive(Debug, Clone)]
pub struct CommandSimulator {
    program: Vec<String>,
    work_dir: PathBuf,
    dry_run: bool,
}

impl CommandSimulator {
    pub fn new(config: &SimulatorConfig, debug: &DebugConfig) -> CommandSimulator {
        let program = match &config.batch_file {
            Some(batch_file) => config
                .batch_command
                .split_whitespace()
                .map(|s| s.to_owned())
                .chain(std::iter::once(batch_file.clone()))
                .collect(),
            None => config
                .command
                .split_whitespace()
                .map(|s| s.to_owned())
                .collect(),
        };

        CommandSimulator {
            program,
            work_dir: config.work_dir.clone(),
            dry_run: debug.fake_simulations,
        }
    }

    /// The command line run for an input deck
    pub fn command_line(&self, deck: &InputDeck) -> Vec<String> {
        let prm = match deck.prm_file.strip_prefix(&self.work_dir) {
            Ok(relative) => relative.display().to_string(),
            Err(_) => deck.prm_file.display().to_string(),
        };
        let mut line = self.program.clone();
        line.push(prm);
        line
    }
}

impl Simulator for CommandSimulator {
    fn run(&self, deck: &InputDeck) -> Result<(), CalibrationError> {
        let line = self.command_line(deck);
        if self.dry_run {
            info!("{}", line.join(" "));
            return Ok(());
        }

        let (program, args) = match line.split_first() {
            Some(split) => split,
            None => {
                return Err(CalibrationError::Simulator(
                    "Simulator command is empty".to_owned(),
                ))
            }
        };

        info!("running {}", line.join(" "));
        let status = match std::process::Command::new(program)
            .args(args)
            .current_dir(&self.work_dir)
            .status()
        {
            Ok(status) => status,
            Err(err) => {
                return Err(CalibrationError::Simulator(format!(
                    "Failed to launch {program}: {err}"
                )))
            }
        };

        if !status.success() {
            warn!("simulation {} exited with {status}", deck.name);
        }

        Ok(())
    }
}

/// Deletes a generated file or folder; only logs it when `dry_run` is set.
/// Missing paths are ignored and failures are only reported.
pub fn remove_data(path: &Path, dry_run: bool) {
    if dry_run {
        info!("delete {}", path.display());
        return;
    }

    let removed = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else if path.exists() {
        std::fs::remove_file(path)
    } else {
        return;
    };

    if let Err(err) = removed {
        warn!("failed to delete {}: {err}", path.display());
    }
}
