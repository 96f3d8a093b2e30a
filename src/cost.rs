use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{info, warn};
use nalgebra::{DMatrix, DVector, Point2};

use crate::{
    config::{Config, CostConfig, DicLayout},
    datatypes::CostTriple,
    error::CalibrationError,
    loader::{self, DicStep},
    post_processor,
    projector::Projection,
};

/// Normalized displacement residual
///
/// `sum(w |u_meas - u_sim|^2) / sum(w |u_meas|^2)`, where `w = 1 / weights`
/// when weights are given and 1 otherwise. Only the first two components of
/// `u_sim` are used. An all-zero measured field yields NaN or infinity.
///
/// # Arguments
/// * `u_sim` - p x n simulated displacements, n >= 2
/// * `u_meas` - p x 2 measured displacements
/// * `weights` - Optional reliability of each measurement
pub fn kinematic_cost(
    u_sim: &DMatrix<f64>,
    u_meas: &DMatrix<f64>,
    weights: Option<&DVector<f64>>,
) -> f64 {
    let mut residual = 0.0;
    let mut energy = 0.0;

    for i in 0..u_meas.nrows() {
        let w = match weights {
            Some(c) => 1.0 / c[i],
            None => 1.0,
        };
        let dx = u_meas[(i, 0)] - u_sim[(i, 0)];
        let dy = u_meas[(i, 1)] - u_sim[(i, 1)];
        residual += w * (dx * dx + dy * dy);
        energy += w * (u_meas[(i, 0)].powi(2) + u_meas[(i, 1)].powi(2));
    }

    residual / energy
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`, clamped to the edge
/// values outside `[xp[0], xp[last]]`. `xp` must be increasing.
///
/// Returns NaN when `x` is NaN or the table is empty.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 || x.is_nan() {
        return f64::NAN;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }

    let upper = xp[..n].partition_point(|v| *v <= x);
    let lower = upper - 1;
    let t = (x - xp[lower]) / (xp[upper] - xp[lower]);
    fp[lower] + t * (fp[upper] - fp[lower])
}

/// Normalized residual between a simulated tensile curve and the
/// experimental one, resampled at the simulated strains
///
/// # Arguments
/// * `strain_exp` - Experimental strains, increasing
/// * `stress_exp` - Experimental stresses
/// * `strain_sim` - Simulated strains
/// * `stress_sim` - Simulated stresses
pub fn static_cost(strain_exp: &[f64], stress_exp: &[f64], strain_sim: &[f64], stress_sim: &[f64]) -> f64 {
    let mut residual = 0.0;
    let mut energy = 0.0;
    for (eps, sigma) in std::iter::zip(strain_sim, stress_sim) {
        let sigma_exp = interp(*eps, strain_exp, stress_exp);
        residual += (sigma - sigma_exp).powi(2);
        energy += sigma_exp.powi(2);
    }
    residual / energy
}

/// Weighted mixture of the static and kinematic costs
pub fn weighted_cost(chi_static: f64, chi_kinematic: f64, w_static: f64) -> f64 {
    w_static * chi_static + (1.0 - w_static) * chi_kinematic
}

/// Projection kept from the previous time step, reused while the mesh and
/// the measurement points do not change
struct CachedProjection {
    nodes: Vec<Point2<f64>>,
    step: usize,
    projection: Projection,
}

/// Scores simulation results against the experimental data of a run
pub struct CostEvaluator {
    dic: Vec<DicStep>,
    time_steps: Vec<usize>,
    tensile_curve: Option<(Vec<f64>, Vec<f64>)>,
    tensile_direction: String,
    cost: CostConfig,
    last_projection: Mutex<Option<CachedProjection>>,
}

impl CostEvaluator {
    /// Loads and checks the experimental data of a run
    ///
    /// A DIC table inconsistent with the number of time steps is fatal. A
    /// missing tensile curve is not: the static cost is then replaced by
    /// the penalty for every evaluation.
    pub fn new(config: &Config) -> Result<CostEvaluator, CalibrationError> {
        let experimental = &config.experimental;
        let n_steps = experimental.time_steps.len();

        let dic = match experimental.dic_layout {
            DicLayout::PerStep => loader::load_dic_per_step(&experimental.dic_data, n_steps)?,
            DicLayout::Combined => {
                loader::load_dic_combined(Path::new(&experimental.dic_data), n_steps)?
            }
        };

        if config.cost.weight_by_correlation && dic.iter().any(|s| s.correlation.is_none()) {
            return Err(CalibrationError::Data(
                "Weighting by correlation coefficients requires a correlation column in every DIC table".to_owned(),
            ));
        }

        let tensile_curve = match loader::load_table(&experimental.tensile_curve) {
            Ok(table) if table.ncols() >= 2 => {
                info!(
                    "loaded tensile curve with {} points from {}",
                    table.nrows(),
                    experimental.tensile_curve.display()
                );
                Some((
                    table.column(0).iter().copied().collect(),
                    table.column(1).iter().copied().collect(),
                ))
            }
            Ok(_) => {
                warn!(
                    "tensile curve {} needs strain and stress columns; static cost will be the penalty",
                    experimental.tensile_curve.display()
                );
                None
            }
            Err(err) => {
                warn!("{err}; static cost will be the penalty");
                None
            }
        };

        Ok(CostEvaluator::from_parts(
            dic,
            experimental.time_steps.clone(),
            tensile_curve,
            &experimental.tensile_direction,
            config.cost,
        ))
    }

    /// Builds an evaluator from already loaded data
    pub fn from_parts(
        dic: Vec<DicStep>,
        time_steps: Vec<usize>,
        tensile_curve: Option<(Vec<f64>, Vec<f64>)>,
        tensile_direction: &str,
        cost: CostConfig,
    ) -> CostEvaluator {
        CostEvaluator {
            dic,
            time_steps,
            tensile_curve,
            tensile_direction: tensile_direction.to_owned(),
            cost,
            last_projection: Mutex::new(None),
        }
    }

    fn projected_displacement(
        &self,
        step: usize,
        nodes: Vec<Point2<f64>>,
        field: &DMatrix<f64>,
    ) -> Result<(DMatrix<f64>, Vec<bool>), CalibrationError> {
        let reused = {
            let guard = match self.last_projection.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            match guard.as_ref() {
                Some(cached)
                    if cached.nodes == nodes
                        && self.dic[cached.step].points == self.dic[step].points =>
                {
                    Some(cached.projection.clone())
                }
                _ => None,
            }
        };

        let projection = match reused {
            Some(p) => p,
            None => {
                let projection = Projection::new(&nodes, &self.dic[step].points);
                info!(
                    "{} of {} DIC points lie inside the mesh",
                    projection.n_inside(),
                    projection.n_queries()
                );
                let mut guard = match self.last_projection.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *guard = Some(CachedProjection {
                    nodes,
                    step,
                    projection: projection.clone(),
                });
                projection
            }
        };

        Ok((projection.apply(field)?, projection.inside))
    }

    /// Kinematic cost of one time step, None if its output is unavailable
    fn step_cost(&self, result_folder: &Path, step: usize) -> Option<f64> {
        let descriptor = loader::descriptor_path(result_folder, self.time_steps[step]);
        let (nodes, u_sim) = match loader::load_partitioned_field(&descriptor) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                warn!(
                    "{} not found, the simulation seems to have failed",
                    descriptor.display()
                );
                return None;
            }
            Err(err) => {
                warn!("{err}");
                return None;
            }
        };
        if u_sim.ncols() < 2 {
            warn!(
                "{} holds a field with {} components, 2 are needed",
                descriptor.display(),
                u_sim.ncols()
            );
            return None;
        }

        let (projected, inside) = match self.projected_displacement(step, nodes, &u_sim) {
            Ok(p) => p,
            Err(err) => {
                warn!("{err}");
                return None;
            }
        };

        // Only DIC locations inside the mesh are compared
        let rows: Vec<usize> = (0..inside.len()).filter(|i| inside[*i]).collect();
        let dic = &self.dic[step];
        let u_sim = projected.select_rows(rows.iter());
        let u_meas = dic.displacement.select_rows(rows.iter());
        let weights = match (&dic.correlation, self.cost.weight_by_correlation) {
            (Some(c), true) => Some(c.select_rows(rows.iter())),
            _ => None,
        };

        Some(kinematic_cost(&u_sim, &u_meas, weights.as_ref()))
    }

    /// Kinematic cost of a simulation, averaged over the compared time steps
    ///
    /// If the output of any step is missing, the penalty is returned as is.
    ///
    /// # Arguments
    /// * `result_folder` - The folder written by the simulator
    pub fn compute_kine_cost(&self, result_folder: &Path) -> f64 {
        let mut chi_u = 0.0;
        let mut n_steps = self.time_steps.len();

        for step in 0..self.time_steps.len() {
            match self.step_cost(result_folder, step) {
                Some(chi) => chi_u += chi,
                None => {
                    chi_u = self.cost.penalty;
                    n_steps = 1;
                    break;
                }
            }
        }

        chi_u / n_steps as f64
    }

    /// Static cost of a simulation, the penalty if either tensile curve is
    /// unavailable
    pub fn compute_stat_cost(&self, result_folder: &Path) -> f64 {
        let (strain_exp, stress_exp) = match &self.tensile_curve {
            Some(curve) => curve,
            None => return self.cost.penalty,
        };

        match loader::load_stress_strain(result_folder, &self.tensile_direction) {
            Ok(Some((strain_sim, stress_sim))) => {
                static_cost(strain_exp, stress_exp, &strain_sim, &stress_sim)
            }
            Ok(None) => {
                warn!(
                    "no {} in {}, the simulation seems to have failed",
                    loader::STRESS_STRAIN_FILE,
                    result_folder.display()
                );
                self.cost.penalty
            }
            Err(err) => {
                warn!("{err}");
                self.cost.penalty
            }
        }
    }

    /// Writes a displacement error map for every compared time step of a
    /// simulation
    ///
    /// # Arguments
    /// * `result_folder` - The folder written by the simulator
    /// * `output_dir` - Where the `.vtu` maps are written
    ///
    /// # Returns
    /// The paths of the written maps, one per time step
    pub fn write_error_maps(
        &self,
        result_folder: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, CalibrationError> {
        let mut written = Vec::new();
        for (step, time_step) in self.time_steps.iter().enumerate() {
            let descriptor = loader::descriptor_path(result_folder, *time_step);
            let (nodes, u_sim) = match loader::load_partitioned_field(&descriptor)? {
                Some(loaded) => loaded,
                None => {
                    return Err(CalibrationError::Mesh(format!(
                        "{} not found",
                        descriptor.display()
                    )))
                }
            };

            let path = post_processor::error_map_path(output_dir, step + 1);
            post_processor::write_displacement_error(&path, &nodes, &u_sim, &self.dic[step])?;
            written.push(path);
        }
        Ok(written)
    }

    /// Computes both costs of a simulation and their weighted mixture
    pub fn compute_weighted_cost(&self, result_folder: &Path) -> CostTriple {
        let kinematic_cost = self.compute_kine_cost(result_folder);
        let static_cost = self.compute_stat_cost(result_folder);

        CostTriple {
            kinematic_cost,
            static_cost,
            weighted_cost: weighted_cost(
                static_cost,
                kinematic_cost,
                self.cost.weight_on_tensile_curve,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn displacements() -> DMatrix<f64> {
        DMatrix::from_row_slice(4, 2, &[0.1, -0.2, 0.3, 0.0, -0.5, 0.25, 0.05, 0.4])
    }

    fn cost_config() -> CostConfig {
        CostConfig {
            penalty: 5.0,
            weight_on_tensile_curve: 0.5,
            weight_by_correlation: false,
        }
    }

    #[test]
    fn test_kinematic_cost_zero_on_match() {
        let u = displacements();
        assert_eq!(kinematic_cost(&u, &u, None), 0.0);
        let c = DVector::from_vec(vec![0.2, 0.5, 1.0, 0.9]);
        assert_eq!(kinematic_cost(&u, &u, Some(&c)), 0.0);
    }

    #[test]
    fn test_kinematic_cost_is_scale_invariant() {
        let u_meas = displacements();
        let u_sim = displacements().map(|v| v * 0.9 + 0.01);
        let c = DVector::from_vec(vec![0.2, 0.5, 1.0, 0.9]);

        let reference = kinematic_cost(&u_sim, &u_meas, Some(&c));
        for scale in [1e-3, -2.0, 150.0] {
            let scaled = kinematic_cost(&(&u_sim * scale), &(&u_meas * scale), Some(&c));
            assert_relative_eq!(scaled, reference, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_kinematic_cost_uses_inverse_weights() {
        let u_meas = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 0.0]);
        let u_sim = DMatrix::from_row_slice(2, 3, &[0.0, 0.0, 7.0, 1.0, 0.0, 7.0]);
        let c = DVector::from_vec(vec![0.5, 2.0]);

        // w = (2, 0.5): residual 2, energy 2.5
        assert_relative_eq!(kinematic_cost(&u_sim, &u_meas, Some(&c)), 0.8);
        assert_relative_eq!(kinematic_cost(&u_sim, &u_meas, None), 0.5);
    }

    #[test]
    fn test_kinematic_cost_zero_field_is_not_finite() {
        let zeros = DMatrix::zeros(3, 2);
        assert!(!kinematic_cost(&zeros, &zeros, None).is_finite());
    }

    #[test]
    fn test_interp_clamps_outside_domain() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [0.0, 10.0, 15.0];
        assert_eq!(interp(-1.0, &xp, &fp), 0.0);
        assert_eq!(interp(5.0, &xp, &fp), 15.0);
        assert_relative_eq!(interp(0.5, &xp, &fp), 5.0);
        assert_relative_eq!(interp(1.5, &xp, &fp), 12.5);
        assert_eq!(interp(1.0, &xp, &fp), 10.0);
    }

    #[test]
    fn test_interp_nan_abscissa() {
        assert!(interp(f64::NAN, &[0.0, 1.0], &[0.0, 1.0]).is_nan());
        assert!(interp(0.5, &[], &[]).is_nan());
    }

    #[test]
    fn test_static_cost_zero_on_curve() {
        let strain = [0.0, 0.01, 0.05, 0.1];
        let stress = [0.0, 200.0, 260.0, 300.0];
        let strain_sim = [0.005, 0.03, 0.1];
        let stress_sim: Vec<f64> = strain_sim.iter().map(|e| interp(*e, &strain, &stress)).collect();

        assert_relative_eq!(static_cost(&strain, &stress, &strain_sim, &stress_sim), 0.0);
    }

    #[test]
    fn test_static_cost_value() {
        let strain = [0.0, 1.0];
        let stress = [0.0, 100.0];
        // sigma_exp = (50, 100), residual 10^2 + 0, energy 50^2 + 100^2
        let chi = static_cost(&strain, &stress, &[0.5, 2.0], &[60.0, 100.0]);
        assert_relative_eq!(chi, 100.0 / 12500.0);
    }

    #[test]
    fn test_weighted_cost_limits() {
        assert_eq!(weighted_cost(3.0, 7.0, 0.0), 7.0);
        assert_eq!(weighted_cost(3.0, 7.0, 1.0), 3.0);
        assert_eq!(weighted_cost(3.0, 7.0, 0.25), 6.0);
    }

    #[test]
    fn test_missing_output_collapses_to_penalty() {
        let dic = DicStep {
            points: vec![Point2::new(0.5, 0.5)],
            displacement: DMatrix::from_row_slice(1, 2, &[0.1, 0.1]),
            correlation: None,
        };
        let evaluator = CostEvaluator::from_parts(
            vec![dic.clone(), dic.clone(), dic],
            vec![999, 1999, 2999],
            Some((vec![0.0, 1.0], vec![0.0, 1.0])),
            "x",
            cost_config(),
        );
        let result_folder = std::env::temp_dir().join("plastifit-cost-no-such-folder");

        assert_eq!(evaluator.compute_kine_cost(&result_folder), 5.0);
        assert_eq!(evaluator.compute_stat_cost(&result_folder), 5.0);
        let triple = evaluator.compute_weighted_cost(&result_folder);
        assert_eq!(triple.weighted_cost, 5.0);
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("plastifit-cost-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn unit_square() -> Vec<Point2<f64>> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(0.0, 1.0),
            Point2::new(1.0, 1.0),
        ]
    }

    /// Writes the output of one time step, with `u(x, y) = (a x, b y, 0)`
    /// on the unit square
    fn write_step(folder: &Path, step: usize, a: f64, b: f64) {
        let nodes = unit_square();
        let coords: Vec<String> = nodes.iter().map(|p| format!("{} {} 0", p.x, p.y)).collect();
        let values: Vec<String> = nodes
            .iter()
            .map(|p| format!("{} {} 0", a * p.x, b * p.y))
            .collect();
        let piece = format!("piece-{step}.vtu");
        std::fs::write(
            folder.join(&piece),
            format!(
                r#"<?xml version="1.0"?>
<VTKFile type="UnstructuredGrid" version="0.1">
  <UnstructuredGrid>
    <Piece NumberOfPoints="4" NumberOfCells="0">
      <PointData>
        <DataArray type="Float64" Name="displacement" NumberOfComponents="3" format="ascii">{}</DataArray>
      </PointData>
      <Points>
        <DataArray type="Float64" NumberOfComponents="3" format="ascii">{}</DataArray>
      </Points>
    </Piece>
  </UnstructuredGrid>
</VTKFile>"#,
                values.join(" "),
                coords.join(" ")
            ),
        )
        .unwrap();
        std::fs::write(
            loader::descriptor_path(folder, step),
            format!(
                r#"<?xml version="1.0"?>
<VTKFile type="PUnstructuredGrid" version="0.1">
  <PUnstructuredGrid GhostLevel="0">
    <Piece Source="{piece}"/>
  </PUnstructuredGrid>
</VTKFile>"#
            ),
        )
        .unwrap();
    }

    /// DIC measurement of `u(x, y) = (0.1 x, 0.2 y)`
    fn measured_step() -> DicStep {
        let points = vec![Point2::new(0.25, 0.25), Point2::new(0.75, 0.5)];
        let displacement = DMatrix::from_fn(2, 2, |i, j| {
            if j == 0 {
                0.1 * points[i].x
            } else {
                0.2 * points[i].y
            }
        });
        DicStep {
            points,
            displacement,
            correlation: None,
        }
    }

    #[test]
    fn test_kinematic_cost_is_averaged_over_steps() {
        let folder = scratch_dir("two-steps");
        write_step(&folder, 1, 0.1, 0.2);
        write_step(&folder, 2, 0.2, 0.2);
        let evaluator = CostEvaluator::from_parts(
            vec![measured_step(), measured_step()],
            vec![1, 2],
            None,
            "x",
            cost_config(),
        );

        // Step 1 matches; step 2 has a residual (0.1 x, 0) against an
        // energy of (0.1 x)^2 + (0.2 y)^2, i.e. 6.25e-3 / 1.875e-2
        let DicStep {
            points,
            displacement: u_meas,
            ..
        } = measured_step();
        let u_step2 = DMatrix::from_fn(2, 2, |i, j| 0.2 * points[i][j]);
        let chi_step2 = kinematic_cost(&u_step2, &u_meas, None);
        assert_relative_eq!(chi_step2, 1.0 / 3.0, epsilon = 1e-12);

        let chi = evaluator.compute_kine_cost(&folder);
        assert_relative_eq!(chi, (0.0 + chi_step2) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_one_missing_step_gives_exactly_the_penalty() {
        let folder = scratch_dir("partial");
        write_step(&folder, 1, 0.2, 0.2);
        let evaluator = CostEvaluator::from_parts(
            vec![measured_step(), measured_step()],
            vec![1, 2],
            None,
            "x",
            cost_config(),
        );

        // Neither the mean with step 1 nor the sum: the penalty as is
        assert_eq!(evaluator.compute_kine_cost(&folder), 5.0);
    }

    #[test]
    fn test_non_finite_stress_strain_row_gives_penalty() {
        let folder = scratch_dir("nan-row");
        std::fs::write(
            folder.join(loader::STRESS_STRAIN_FILE),
            "Exx\tTxx\n0.0\t0.0\nnan\tnan\n",
        )
        .unwrap();
        let evaluator = CostEvaluator::from_parts(
            Vec::new(),
            Vec::new(),
            Some((vec![0.0, 1.0], vec![0.0, 1.0])),
            "x",
            cost_config(),
        );

        assert_eq!(evaluator.compute_stat_cost(&folder), 5.0);
    }

    #[test]
    fn test_error_maps_are_written_per_step() {
        let folder = scratch_dir("error-maps");
        write_step(&folder, 1, 0.1, 0.2);
        write_step(&folder, 2, 0.2, 0.2);
        let evaluator = CostEvaluator::from_parts(
            vec![measured_step(), measured_step()],
            vec![1, 2],
            None,
            "x",
            cost_config(),
        );

        let written = evaluator.write_error_maps(&folder, &folder).unwrap();

        assert_eq!(
            written,
            vec![
                folder.join("Displacement_error_1.vtu"),
                folder.join("Displacement_error_2.vtu")
            ]
        );
        assert!(written.iter().all(|p| p.exists()));

        std::fs::remove_file(loader::descriptor_path(&folder, 2)).unwrap();
        assert!(matches!(
            evaluator.write_error_maps(&folder, &folder),
            Err(CalibrationError::Mesh(_))
        ));
    }

    #[test]
    fn test_missing_tensile_curve_gives_penalty() {
        let evaluator =
            CostEvaluator::from_parts(Vec::new(), Vec::new(), None, "x", cost_config());
        assert_eq!(evaluator.compute_stat_cost(Path::new(".")), 5.0);
    }
}
