use std::path::{Path, PathBuf};

use log::info;
use nalgebra::{DMatrix, DVector, Point2};

use crate::error::CalibrationError;

/// Only nodes lying on this plane are compared against surface measurements
pub const REFERENCE_PLANE_Z: f64 = 0.0;

/// Name of the tensile curve table written by the simulator in each result
/// folder
pub const STRESS_STRAIN_FILE: &str = "stressstrain.txt";

/// Displacement measurements at one time step
#[derive(Debug, Clone)]
pub struct DicStep {
    pub points: Vec<Point2<f64>>,
    /// p x 2 measured displacements
    pub displacement: DMatrix<f64>,
    /// Correlation coefficient of each measurement, if provided
    pub correlation: Option<DVector<f64>>,
}

/// Path of the field-output descriptor of a given simulation step
pub fn descriptor_path(result_folder: &Path, step: usize) -> PathBuf {
    result_folder.join(format!("solution-{:04}.pvtu", step))
}

fn open_xml(path: &Path) -> Result<String, CalibrationError> {
    match std::fs::read_to_string(path) {
        Ok(c) => Ok(c),
        Err(err) => Err(CalibrationError::Mesh(format!(
            "Unable to open {}: {err}",
            path.display()
        ))),
    }
}

fn parse_floats(text: &str, path: &Path) -> Result<Vec<f64>, CalibrationError> {
    text.split_whitespace()
        .map(|v| {
            v.parse::<f64>().map_err(|_| {
                CalibrationError::Mesh(format!(
                    "Non-float value '{v}' in data array of {}",
                    path.display()
                ))
            })
        })
        .collect()
}

/// Reads the values of an ascii `DataArray` element
///
/// # Returns
/// The flat list of values and the number of components per tuple
fn read_data_array(
    array: roxmltree::Node,
    path: &Path,
) -> Result<(Vec<f64>, usize), CalibrationError> {
    let format = array.attribute("format").unwrap_or("ascii");
    if format != "ascii" {
        return Err(CalibrationError::Mesh(format!(
            "Data array in {} uses unsupported format '{format}'. Only ascii is supported",
            path.display()
        )));
    }

    let n_components: usize = match array.attribute("NumberOfComponents") {
        Some(n) => n.parse().map_err(|_| {
            CalibrationError::Mesh(format!(
                "Bad NumberOfComponents '{n}' in {}",
                path.display()
            ))
        })?,
        None => 1,
    };
    if n_components == 0 {
        return Err(CalibrationError::Mesh(format!(
            "Data array with zero components in {}",
            path.display()
        )));
    }

    let values = parse_floats(array.text().unwrap_or(""), path)?;
    if values.len() % n_components != 0 {
        return Err(CalibrationError::Mesh(format!(
            "Data array in {} has {} values, not a multiple of {n_components} components",
            path.display(),
            values.len()
        )));
    }

    Ok((values, n_components))
}

/// Reads one partition of an unstructured grid
///
/// # Arguments
/// * `piece_file` - The path to the .vtu file
///
/// # Returns
/// A tuple with the point coordinates (3 per point), the first point-data
/// array and its number of components, in that order.
fn read_piece(piece_file: &Path) -> Result<(Vec<f64>, Vec<f64>, usize), CalibrationError> {
    let contents = open_xml(piece_file)?;
    let doc = match roxmltree::Document::parse(&contents) {
        Ok(d) => d,
        Err(err) => {
            return Err(CalibrationError::Mesh(format!(
                "Malformed xml in {}: {err}",
                piece_file.display()
            )))
        }
    };

    let points_array = doc
        .descendants()
        .find(|n| n.tag_name().name() == "Points")
        .and_then(|n| n.children().find(|c| c.tag_name().name() == "DataArray"))
        .ok_or_else(|| {
            CalibrationError::Mesh(format!("No Points array in {}", piece_file.display()))
        })?;
    let field_array = doc
        .descendants()
        .find(|n| n.tag_name().name() == "PointData")
        .and_then(|n| n.children().find(|c| c.tag_name().name() == "DataArray"))
        .ok_or_else(|| {
            CalibrationError::Mesh(format!("No PointData array in {}", piece_file.display()))
        })?;

    let (points, point_dim) = read_data_array(points_array, piece_file)?;
    if point_dim != 3 {
        return Err(CalibrationError::Mesh(format!(
            "Points of {} have {point_dim} components instead of 3",
            piece_file.display()
        )));
    }
    let (field, n_components) = read_data_array(field_array, piece_file)?;
    if field.len() / n_components != points.len() / 3 {
        return Err(CalibrationError::Mesh(format!(
            "{} has {} points but {} field values",
            piece_file.display(),
            points.len() / 3,
            field.len() / n_components
        )));
    }

    Ok((points, field, n_components))
}

/// Reads node coordinates and the nodal field from a partitioned
/// unstructured grid (.pvtu)
///
/// Only nodes lying on the reference plane are kept. Nodes shared by
/// several partitions are returned once, with the field value of their
/// first occurrence. Nodes come out sorted by coordinates.
///
/// # Arguments
/// * `descriptor` - The path to the .pvtu file
///
/// # Returns
/// None if the descriptor does not exist (the simulation most likely
/// failed), otherwise a tuple with the node coordinates and the m x n field.
pub fn load_partitioned_field(
    descriptor: &Path,
) -> Result<Option<(Vec<Point2<f64>>, DMatrix<f64>)>, CalibrationError> {
    if !descriptor.exists() {
        return Ok(None);
    }

    let contents = open_xml(descriptor)?;
    let doc = match roxmltree::Document::parse(&contents) {
        Ok(d) => d,
        Err(err) => {
            return Err(CalibrationError::Mesh(format!(
                "Malformed xml in {}: {err}",
                descriptor.display()
            )))
        }
    };

    let folder = descriptor.parent().unwrap_or(Path::new(""));
    let pieces: Vec<&str> = doc
        .descendants()
        .filter(|n| n.tag_name().name() == "Piece")
        .filter_map(|n| n.attribute("Source"))
        .collect();
    if pieces.is_empty() {
        return Err(CalibrationError::Mesh(format!(
            "No Piece referenced in {}",
            descriptor.display()
        )));
    }

    let mut samples: Vec<(Point2<f64>, Vec<f64>)> = Vec::new();
    let mut n_components: Option<usize> = None;

    for source in pieces {
        let (points, field, dim) = read_piece(&folder.join(source))?;
        match n_components {
            None => n_components = Some(dim),
            Some(n) if n != dim => {
                return Err(CalibrationError::Mesh(format!(
                    "Piece {source} has {dim} field components, previous pieces had {n}"
                )))
            }
            _ => {}
        }

        for (coords, values) in std::iter::zip(points.chunks(3), field.chunks(dim)) {
            if coords[2] == REFERENCE_PLANE_Z {
                samples.push((Point2::new(coords[0], coords[1]), values.to_vec()));
            }
        }
    }

    // Stable sort keeps the first occurrence of shared nodes in front
    samples.sort_by(|a, b| a.0.x.total_cmp(&b.0.x).then(a.0.y.total_cmp(&b.0.y)));
    samples.dedup_by(|a, b| a.0 == b.0);

    let n_components = n_components.unwrap_or(1);
    let nodes: Vec<Point2<f64>> = samples.iter().map(|s| s.0).collect();
    let field = DMatrix::from_fn(samples.len(), n_components, |i, j| samples[i].1[j]);

    info!(
        "loaded {} surface nodes from {}",
        nodes.len(),
        descriptor.display()
    );

    Ok(Some((nodes, field)))
}

/// Parses a whitespace- or comma-delimited numeric table
///
/// Empty lines and lines starting with `#` are skipped, as is a leading
/// non-numeric header line.
///
/// # Arguments
/// * `table_file` - The path to the table
///
/// # Returns
/// A matrix with one row per line of the file
pub fn load_table(table_file: &Path) -> Result<DMatrix<f64>, CalibrationError> {
    let contents = match std::fs::read_to_string(table_file) {
        Ok(c) => c,
        Err(err) => {
            return Err(CalibrationError::Data(format!(
                "Unable to open table {}: {err}",
                table_file.display()
            )))
        }
    };

    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parsed: Result<Vec<f64>, _> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|v| !v.is_empty())
            .map(|v| v.parse::<f64>())
            .collect();

        match parsed {
            Ok(row) => {
                if let Some(first) = rows.first() {
                    if first.len() != row.len() {
                        return Err(CalibrationError::Data(format!(
                            "Line {} of {} has {} columns, expected {}",
                            line_no + 1,
                            table_file.display(),
                            row.len(),
                            first.len()
                        )));
                    }
                }
                rows.push(row);
            }
            Err(_) if rows.is_empty() => continue, // header
            Err(_) => {
                return Err(CalibrationError::Data(format!(
                    "Non-float value on line {} of {}",
                    line_no + 1,
                    table_file.display()
                )))
            }
        }
    }

    let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
    Ok(DMatrix::from_fn(rows.len(), n_cols, |i, j| rows[i][j]))
}

fn dic_step_from_columns(
    table: &DMatrix<f64>,
    displacement_col: usize,
    correlation_col: Option<usize>,
) -> DicStep {
    DicStep {
        points: table
            .row_iter()
            .map(|r| Point2::new(r[0], r[1]))
            .collect(),
        displacement: table.columns(displacement_col, 2).into_owned(),
        correlation: correlation_col.map(|c| table.column(c).into_owned()),
    }
}

/// Reads one DIC table per time step, named `<prefix><k>.csv` with k
/// starting at 1. Columns are x, y, ux, uy and optionally the correlation
/// coefficient.
pub fn load_dic_per_step(prefix: &str, n_steps: usize) -> Result<Vec<DicStep>, CalibrationError> {
    let mut steps = Vec::with_capacity(n_steps);
    for k in 1..=n_steps {
        let path = PathBuf::from(format!("{prefix}{k}.csv"));
        let table = load_table(&path)?;
        if table.ncols() < 4 {
            return Err(CalibrationError::Data(format!(
                "{} has {} columns, expected at least 4 (x, y, ux, uy)",
                path.display(),
                table.ncols()
            )));
        }
        let correlation_col = if table.ncols() > 4 { Some(4) } else { None };
        steps.push(dic_step_from_columns(&table, 2, correlation_col));
    }

    info!("loaded DIC data for {} time steps", steps.len());
    Ok(steps)
}

/// Reads a single DIC table holding every time step. Columns are x, y, then
/// ux, uy and the correlation coefficient of each step.
pub fn load_dic_combined(path: &Path, n_steps: usize) -> Result<Vec<DicStep>, CalibrationError> {
    let table = load_table(path)?;
    let expected = 2 + 3 * n_steps;
    if table.ncols() != expected {
        return Err(CalibrationError::Data(format!(
            "The number of time steps ({n_steps}) is inconsistent with the number of columns in {} ({}, instead of {expected})",
            path.display(),
            table.ncols()
        )));
    }

    let steps: Vec<DicStep> = (0..n_steps)
        .map(|step| dic_step_from_columns(&table, 3 * step + 2, Some(3 * step + 4)))
        .collect();

    info!("loaded DIC data for {} time steps", steps.len());
    Ok(steps)
}

/// Reads the simulated tensile curve from a result folder
///
/// # Arguments
/// * `result_folder` - The folder written by the simulator
/// * `direction` - Tensile direction, `x`, `y` or `z`
///
/// # Returns
/// None if the table does not exist, otherwise the engineering elongation
/// and the stress, in that order.
pub fn load_stress_strain(
    result_folder: &Path,
    direction: &str,
) -> Result<Option<(Vec<f64>, Vec<f64>)>, CalibrationError> {
    let path = result_folder.join(STRESS_STRAIN_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(err) => {
            return Err(CalibrationError::Data(format!(
                "Unable to open {}: {err}",
                path.display()
            )))
        }
    };

    let strain_key = format!("E{direction}{direction}");
    let stress_key = format!("T{direction}{direction}");

    let mut lines = contents.lines().filter(|l| !l.trim().is_empty());
    let headers: Vec<&str> = match lines.next() {
        Some(h) => h.split_whitespace().collect(),
        None => return Ok(Some((Vec::new(), Vec::new()))),
    };
    let strain_idx = headers.iter().position(|h| *h == strain_key);
    let stress_idx = headers.iter().position(|h| *h == stress_key);
    let (strain_idx, stress_idx) = match (strain_idx, stress_idx) {
        (Some(e), Some(t)) => (e, t),
        _ => {
            return Err(CalibrationError::Data(format!(
                "{} is missing column {strain_key} and/or {stress_key}",
                path.display()
            )))
        }
    };

    let mut elongation: Vec<f64> = Vec::new();
    let mut stress: Vec<f64> = Vec::new();
    for line in lines {
        let values: Vec<&str> = line.split_whitespace().collect();
        let parse = |idx: usize| -> Result<f64, CalibrationError> {
            values
                .get(idx)
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| {
                    CalibrationError::Data(format!("Bad line '{line}' in {}", path.display()))
                })
        };
        let green_lagrange = parse(strain_idx)?;
        let elongation_value = (1.0 + 2.0 * green_lagrange).sqrt() - 1.0;
        let stress_value = parse(stress_idx)?;
        // Green-Lagrange strain below -1/2 has no real elongation
        if !elongation_value.is_finite() || !stress_value.is_finite() {
            return Err(CalibrationError::Data(format!(
                "Non-finite strain or stress on line '{line}' of {}",
                path.display()
            )));
        }
        elongation.push(elongation_value);
        stress.push(stress_value);
    }

    Ok(Some((elongation, stress)))
}

/// Derives the output time steps from a simulator parameter file, using its
/// `set Time increments` and `set Tabular Time Output Table` entries
pub fn time_steps_from_prm(prm_file: &Path) -> Result<Vec<usize>, CalibrationError> {
    let contents = match std::fs::read_to_string(prm_file) {
        Ok(c) => c,
        Err(err) => {
            return Err(CalibrationError::Config(format!(
                "Unable to open parameter file {}: {err}",
                prm_file.display()
            )))
        }
    };

    let mut time_increment: Option<f64> = None;
    let mut output_table: Option<Vec<f64>> = None;

    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => continue,
        };
        let bad_value = || {
            CalibrationError::Config(format!(
                "Bad value '{value}' for '{key}' in {}",
                prm_file.display()
            ))
        };

        if key == "set Time increments" {
            time_increment = Some(value.parse().map_err(|_| bad_value())?);
        } else if key == "set Tabular Time Output Table" {
            let times: Result<Vec<f64>, _> =
                value.split(',').map(|t| t.trim().parse::<f64>()).collect();
            output_table = Some(times.map_err(|_| bad_value())?);
        }
    }

    match (time_increment, output_table) {
        (Some(dt), Some(times)) if dt > 0.0 => Ok(times
            .iter()
            .map(|t| ((t / dt).round() as i64 - 1).max(0) as usize)
            .collect()),
        _ => Err(CalibrationError::Config(format!(
            "{} must define 'set Time increments' and 'set Tabular Time Output Table'",
            prm_file.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("plastifit-loader-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_vtu(path: &Path, points: &[[f64; 3]], field: &[[f64; 3]]) {
        let coords: Vec<String> = points
            .iter()
            .map(|p| format!("{} {} {}", p[0], p[1], p[2]))
            .collect();
        let values: Vec<String> = field
            .iter()
            .map(|u| format!("{} {} {}", u[0], u[1], u[2]))
            .collect();
        let xml = format!(
            r#"<?xml version="1.0"?>
<VTKFile type="UnstructuredGrid" version="0.1">
  <UnstructuredGrid>
    <Piece NumberOfPoints="{n}" NumberOfCells="0">
      <PointData Vectors="displacement">
        <DataArray type="Float64" Name="displacement" NumberOfComponents="3" format="ascii">{values}</DataArray>
        <DataArray type="Float64" Name="other" format="ascii">{zeros}</DataArray>
      </PointData>
      <Points>
        <DataArray type="Float64" NumberOfComponents="3" format="ascii">{coords}</DataArray>
      </Points>
    </Piece>
  </UnstructuredGrid>
</VTKFile>"#,
            n = points.len(),
            values = values.join("\n"),
            zeros = vec!["0"; points.len()].join(" "),
            coords = coords.join("\n"),
        );
        std::fs::write(path, xml).unwrap();
    }

    fn write_pvtu(path: &Path, sources: &[&str]) {
        let pieces: Vec<String> = sources
            .iter()
            .map(|s| format!(r#"    <Piece Source="{s}"/>"#))
            .collect();
        let xml = format!(
            r#"<?xml version="1.0"?>
<VTKFile type="PUnstructuredGrid" version="0.1">
  <PUnstructuredGrid GhostLevel="0">
    <PPointData Vectors="displacement">
      <PDataArray type="Float64" Name="displacement" NumberOfComponents="3" format="ascii"/>
    </PPointData>
    <PPoints>
      <PDataArray type="Float64" NumberOfComponents="3"/>
    </PPoints>
{}
  </PUnstructuredGrid>
</VTKFile>"#,
            pieces.join("\n")
        );
        std::fs::write(path, xml).unwrap();
    }

    #[test]
    fn test_missing_descriptor_returns_none() {
        let dir = scratch_dir("missing");
        assert!(load_partitioned_field(&dir.join("solution-0001.pvtu"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_partitions_are_merged_and_deduplicated() {
        let dir = scratch_dir("merge");
        write_vtu(
            &dir.join("p0.vtu"),
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            &[[0.1, 0.2, 0.0], [1.1, 1.2, 0.0], [9.0, 9.0, 9.0]],
        );
        write_vtu(
            &dir.join("p1.vtu"),
            &[[1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.5, 0.5, -1.0]],
            &[[1.1, 1.2, 0.0], [2.1, 2.2, 0.0], [8.0, 8.0, 8.0]],
        );
        let descriptor = descriptor_path(&dir, 999);
        write_pvtu(&descriptor, &["p0.vtu", "p1.vtu"]);

        let (nodes, field) = load_partitioned_field(&descriptor).unwrap().unwrap();

        assert_eq!(nodes.len(), 3);
        assert_eq!(field.nrows(), 3);
        assert_eq!(field.ncols(), 3);
        for (node, row) in std::iter::zip(&nodes, field.row_iter()) {
            assert_relative_eq!(row[0], node.x + node.y + 0.1, epsilon = 1e-12);
            assert_relative_eq!(row[1], node.x + node.y + 0.2, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_binary_piece_is_rejected() {
        let dir = scratch_dir("binary");
        std::fs::write(
            dir.join("p0.vtu"),
            r#"<VTKFile><UnstructuredGrid><Piece>
            <PointData><DataArray NumberOfComponents="3" format="binary">AAAA</DataArray></PointData>
            <Points><DataArray NumberOfComponents="3" format="binary">AAAA</DataArray></Points>
            </Piece></UnstructuredGrid></VTKFile>"#,
        )
        .unwrap();
        let descriptor = dir.join("solution-0000.pvtu");
        write_pvtu(&descriptor, &["p0.vtu"]);

        assert!(matches!(
            load_partitioned_field(&descriptor),
            Err(CalibrationError::Mesh(_))
        ));
    }

    #[test]
    fn test_load_table_skips_header_and_comments() {
        let dir = scratch_dir("table");
        let path = dir.join("curve.csv");
        std::fs::write(&path, "strain,stress\n# comment\n0.0, 0.0\n0.01 100\n\n0.02,150\n").unwrap();

        let table = load_table(&path).unwrap();

        assert_eq!(table.shape(), (3, 2));
        assert_relative_eq!(table[(2, 1)], 150.0);
    }

    #[test]
    fn test_load_table_rejects_ragged_rows() {
        let dir = scratch_dir("ragged");
        let path = dir.join("ragged.csv");
        std::fs::write(&path, "1 2 3\n4 5\n").unwrap();
        assert!(matches!(load_table(&path), Err(CalibrationError::Data(_))));
    }

    #[test]
    fn test_combined_dic_column_count_is_checked() {
        let dir = scratch_dir("combined");
        let path = dir.join("dic.csv");
        std::fs::write(&path, "0 0 1 2 0.5 3 4 0.6\n1 0 1 2 0.5 3 4 0.6\n").unwrap();

        let steps = load_dic_combined(&path, 2).unwrap();
        assert_eq!(steps.len(), 2);
        assert_relative_eq!(steps[1].displacement[(0, 0)], 3.0);
        assert_relative_eq!(steps[1].correlation.as_ref().unwrap()[1], 0.6);

        assert!(matches!(
            load_dic_combined(&path, 3),
            Err(CalibrationError::Data(_))
        ));
    }

    #[test]
    fn test_dic_per_step() {
        let dir = scratch_dir("perstep");
        let prefix = dir.join("DIC_").to_string_lossy().to_string();
        std::fs::write(format!("{prefix}1.csv"), "0 0 0.1 0.2\n1 0 0.3 0.4\n").unwrap();
        std::fs::write(format!("{prefix}2.csv"), "0 0 0.1 0.2 0.9\n").unwrap();

        let steps = load_dic_per_step(&prefix, 2).unwrap();

        assert_eq!(steps[0].points.len(), 2);
        assert!(steps[0].correlation.is_none());
        assert!(steps[1].correlation.is_some());
        assert!(load_dic_per_step(&prefix, 3).is_err());
    }

    #[test]
    fn test_stress_strain_elongation() {
        let dir = scratch_dir("stressstrain");
        std::fs::write(
            dir.join(STRESS_STRAIN_FILE),
            "Exx\tEyy\tTxx\n0.0\t0.0\t0.0\n0.105\t-0.01\t250.0\n",
        )
        .unwrap();

        let (elongation, stress) = load_stress_strain(&dir, "x").unwrap().unwrap();

        assert_relative_eq!(elongation[1], 0.1, epsilon = 1e-12);
        assert_relative_eq!(stress[1], 250.0);
        assert!(load_stress_strain(&dir, "y").is_err());
        assert!(load_stress_strain(&dir.join("nope"), "x").unwrap().is_none());
    }

    #[test]
    fn test_stress_strain_any_whitespace() {
        let dir = scratch_dir("stressstrain-spaces");
        std::fs::write(
            dir.join(STRESS_STRAIN_FILE),
            "Exx   Txx\n0.0  0.0\n 0.105    250.0\n",
        )
        .unwrap();

        let (elongation, stress) = load_stress_strain(&dir, "x").unwrap().unwrap();

        assert_eq!(elongation.len(), 2);
        assert_relative_eq!(elongation[1], 0.1, epsilon = 1e-12);
        assert_relative_eq!(stress[1], 250.0);
    }

    #[test]
    fn test_stress_strain_rejects_non_finite_rows() {
        let dir = scratch_dir("stressstrain-nan");
        std::fs::write(dir.join(STRESS_STRAIN_FILE), "Exx\tTxx\n0.0\t0.0\nnan\tnan\n").unwrap();
        assert!(matches!(
            load_stress_strain(&dir, "x"),
            Err(CalibrationError::Data(_))
        ));

        // no real elongation below -1/2
        std::fs::write(dir.join(STRESS_STRAIN_FILE), "Exx\tTxx\n-0.6\t10.0\n").unwrap();
        assert!(matches!(
            load_stress_strain(&dir, "x"),
            Err(CalibrationError::Data(_))
        ));
    }

    #[test]
    fn test_time_steps_from_prm() {
        let dir = scratch_dir("prm");
        let path = dir.join("input.prm");
        std::fs::write(
            &path,
            "set Time increments = 0.001 # dt\nset Tabular Time Output Table = 1, 2, 3\n",
        )
        .unwrap();

        assert_eq!(time_steps_from_prm(&path).unwrap(), vec![999, 1999, 2999]);
    }
}
