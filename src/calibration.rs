use std::fmt;

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        CostFunction, Error, Executor, Gradient, State, KV,
    },
    solver::{linesearch::MoreThuenteLineSearch, quasinewton::LBFGS},
};
use argmin_math::ArgminL2Norm;
use argmin_observer_slog::SlogLogger;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    config::Config,
    cost::CostEvaluator,
    datatypes::EvaluationRecord,
    error::CalibrationError,
    evaluation_log::EvaluationLog,
    simulator::{self, CommandSimulator, InputDeck, InputGenerator, Simulator},
};

/// Outcome of a calibration, in physical units
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    pub parameter_names: Vec<String>,
    pub parameters: Vec<f64>,
    pub cost: f64,
    /// Gradient of the cost with respect to the raw parameters
    pub gradient: Vec<f64>,
    pub iterations: u64,
}

impl fmt::Display for CalibrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "best cost {:.6e} after {} iterations",
            self.cost, self.iterations
        )?;
        for (i, name) in self.parameter_names.iter().enumerate() {
            writeln!(
                f,
                "  {name} = {} (gradient {:.3e})",
                self.parameters[i], self.gradient[i]
            )?;
        }
        Ok(())
    }
}

/// Evaluates candidate parameter sets: looks them up in the evaluation log
/// and otherwise runs and scores a new simulation
pub struct Calibration {
    config: Config,
    evaluator: CostEvaluator,
    generator: InputGenerator,
    simulator: Box<dyn Simulator>,
    log: EvaluationLog,
}

impl Calibration {
    /// Prepares a calibration that launches the configured simulator command
    pub fn new(config: Config) -> Result<Calibration, CalibrationError> {
        let simulator = CommandSimulator::new(&config.simulator, &config.debug);
        Calibration::with_simulator(config, Box::new(simulator))
    }

    /// Prepares a calibration around any simulator
    ///
    /// # Arguments
    /// * `config` - Settings of the run
    /// * `simulator` - Runs one input deck to completion
    pub fn with_simulator(
        config: Config,
        simulator: Box<dyn Simulator>,
    ) -> Result<Calibration, CalibrationError> {
        let evaluator = CostEvaluator::new(&config)?;
        let generator = InputGenerator::new(&config.simulator)?;
        let log = EvaluationLog::new(&config.log_file, &config.parameter_names);

        Ok(Calibration {
            config,
            evaluator,
            generator,
            simulator,
            log,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log(&self) -> &EvaluationLog {
        &self.log
    }

    /// Weighted cost of a normalized parameter set
    ///
    /// A previous evaluation within the cache tolerance is returned as is.
    /// Otherwise the simulation is generated, run and scored, its artifacts
    /// are removed and the costs are appended to the log.
    ///
    /// # Arguments
    /// * `normalized` - The candidate, each coordinate in [0, 1]
    ///
    /// # Returns
    /// The raw weighted cost, which may be non-finite
    pub fn evaluate(&self, normalized: &[f64]) -> Result<f64, CalibrationError> {
        let bounds = &self.config.bounds;
        if let Some(record) = self
            .log
            .find(normalized, bounds, self.config.cache_tolerance())?
        {
            debug!("found {:?} in {}", record.raw, self.log.path().display());
            return Ok(record.costs.weighted_cost);
        }

        let raw = bounds.denormalize(normalized);
        let deck = self.generator.generate(&self.config.parameter_names, &raw)?;
        if let Err(err) = self.simulator.run(&deck) {
            self.remove_artifacts(&deck);
            return Err(err);
        }

        let costs = self.evaluator.compute_weighted_cost(&deck.result_folder);
        self.remove_artifacts(&deck);

        info!(
            "{}: kinematic {:.4e}, static {:.4e}, weighted {:.4e}",
            deck.name, costs.kinematic_cost, costs.static_cost, costs.weighted_cost
        );
        self.log.append(&EvaluationRecord { raw, costs })?;

        Ok(costs.weighted_cost)
    }

    fn remove_artifacts(&self, deck: &InputDeck) {
        for artifact in deck.artifacts() {
            simulator::remove_data(artifact, self.config.debug.fake_deletions);
        }
    }

    /// Cost handed to the minimizer, with non-finite values replaced by the
    /// penalty
    fn objective(&self, normalized: &[f64]) -> Result<f64, CalibrationError> {
        let chi = self.evaluate(normalized)?;
        if chi.is_finite() {
            Ok(chi)
        } else {
            warn!(
                "non-finite cost {chi} at {:?}, using the penalty",
                self.config.bounds.denormalize(normalized)
            );
            Ok(self.config.cost.penalty)
        }
    }

    /// Minimizes the weighted cost from the initial guess with L-BFGS
    pub fn run(&self) -> Result<CalibrationResult, CalibrationError> {
        let optimizer = &self.config.optimizer;

        let pool = if self.config.workers > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()
            {
                Ok(pool) => Some(pool),
                Err(err) => {
                    return Err(CalibrationError::Optimizer(format!(
                        "Unable to start {} workers: {err}",
                        self.config.workers
                    )))
                }
            }
        } else {
            None
        };

        let problem = CalibrationProblem {
            calibration: self,
            eps: optimizer.eps,
            pool: pool.as_ref(),
        };

        let linesearch = MoreThuenteLineSearch::new();
        let solver = match LBFGS::new(linesearch, optimizer.memory)
            .with_tolerance_grad(optimizer.tol_grad)
            .and_then(|s| s.with_tolerance_cost(optimizer.tol_cost))
        {
            Ok(s) => s,
            Err(err) => {
                return Err(CalibrationError::Optimizer(format!(
                    "Invalid L-BFGS settings: {err}"
                )))
            }
        };

        let initial_guess = self.config.bounds.normalize(&self.config.initial_guess);
        info!(
            "starting L-BFGS from {:?} with {} worker(s)",
            self.config.initial_guess, self.config.workers
        );

        let mut executor = Executor::new(problem, solver).configure(|state| {
            state
                .param(initial_guess)
                .max_iters(optimizer.max_iters)
        });
        executor = if optimizer.verbose {
            executor.add_observer(SlogLogger::term(), ObserverMode::Always)
        } else {
            executor.add_observer(
                CalibrationObserverBar::new(optimizer.max_iters),
                ObserverMode::Always,
            )
        };

        let res = match executor.run() {
            Ok(r) => r,
            Err(err) => {
                return Err(CalibrationError::Optimizer(format!("L-BFGS error: {err}")))
            }
        };

        let best = match res.state().get_best_param() {
            Some(p) => clamp_unit(p),
            None => {
                return Err(CalibrationError::Optimizer(
                    "L-BFGS could not produce best parameter".to_owned(),
                ))
            }
        };
        let cost = res.state().get_best_cost();
        let iterations = res.state().get_iter();

        let problem = CalibrationProblem {
            calibration: self,
            eps: optimizer.eps,
            pool: pool.as_ref(),
        };
        let gradient = problem.normalized_gradient(&best)?;
        info!(
            "final gradient norm {:.3e} in normalized units",
            gradient.l2_norm()
        );
        let gradient = std::iter::zip(gradient, self.config.bounds.span())
            .map(|(g, span)| g / span)
            .collect();

        Ok(CalibrationResult {
            parameter_names: self.config.parameter_names.clone(),
            parameters: self.config.bounds.denormalize(&best),
            cost,
            gradient,
            iterations,
        })
    }
}

fn clamp_unit(p: &[f64]) -> Vec<f64> {
    p.iter().map(|x| x.clamp(0.0, 1.0)).collect()
}

/// The calibration seen by argmin, over the normalized hypercube
struct CalibrationProblem<'a> {
    calibration: &'a Calibration,
    eps: f64,
    pool: Option<&'a rayon::ThreadPool>,
}

impl CalibrationProblem<'_> {
    /// Forward-difference gradient, stepping backwards at the upper bound.
    /// The probes run concurrently when a worker pool is available.
    fn normalized_gradient(&self, x: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        let f0 = self.calibration.objective(x)?;

        let probes: Vec<(Vec<f64>, f64)> = (0..x.len())
            .map(|i| {
                let h = if x[i] + self.eps > 1.0 {
                    -self.eps
                } else {
                    self.eps
                };
                let mut probe = x.to_vec();
                probe[i] += h;
                (probe, h)
            })
            .collect();

        let values: Result<Vec<f64>, CalibrationError> = match self.pool {
            Some(pool) => pool.install(|| {
                probes
                    .par_iter()
                    .map(|(probe, _)| self.calibration.objective(probe))
                    .collect()
            }),
            None => probes
                .iter()
                .map(|(probe, _)| self.calibration.objective(probe))
                .collect(),
        };

        Ok(std::iter::zip(values?, &probes)
            .map(|(f, (_, h))| (f - f0) / h)
            .collect())
    }
}

impl CostFunction for CalibrationProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.calibration.objective(&clamp_unit(param))?)
    }
}

impl Gradient for CalibrationProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, Error> {
        Ok(self.normalized_gradient(&clamp_unit(param))?)
    }
}

/// Observer bar for argmin solver
struct CalibrationObserverBar {
    bar: ProgressBar,
}

impl CalibrationObserverBar {
    fn new(max_iters: u64) -> CalibrationObserverBar {
        let bar = ProgressBar::new(max_iters);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}") {
            bar.set_style(style);
        }
        CalibrationObserverBar { bar }
    }
}

impl<I> Observe<I> for CalibrationObserverBar
where
    I: State<Float = f64>,
{
    fn observe_init(&mut self, _name: &str, _state: &I, _kv: &KV) -> Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        self.bar.set_position(state.get_iter());
        self.bar
            .set_message(format!("best cost {:.4e}", state.get_best_cost()));
        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> Result<(), Error> {
        self.bar.finish();
        Ok(())
    }
}
