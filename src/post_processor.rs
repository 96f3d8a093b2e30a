use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;
use nalgebra::{DMatrix, Point2};

use crate::{
    error::CalibrationError, loader::DicStep, projector::Projection, triangulation::Triangulation,
};

/// VTK cell type of a linear triangle
const VTK_TRIANGLE: u8 = 5;

/// Path of the displacement error map of a DIC step (counted from 1)
pub fn error_map_path(output_dir: &Path, dic_step: usize) -> PathBuf {
    output_dir.join(format!("Displacement_error_{dic_step}.vtu"))
}

fn data_array(name: &str, n_components: usize, values: &[f64]) -> String {
    let text: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!(
        "        <DataArray type=\"Float64\" Name=\"{name}\" NumberOfComponents=\"{n_components}\" format=\"ascii\">{}</DataArray>\n",
        text.join(" ")
    )
}

/// Flattens the first two columns of `field` into 3-component tuples with a
/// zero out-of-plane value
fn in_plane(field: &DMatrix<f64>) -> Vec<f64> {
    (0..field.nrows())
        .flat_map(|i| [field[(i, 0)], field[(i, 1)], 0.0])
        .collect()
}

/// Writes the simulated and measured displacements of one time step to a
/// .vtu file, for inspection in a VTK viewer
///
/// The measurements are interpolated onto the surface nodes, so nodes
/// outside the DIC region carry NaN. The surface is triangulated from the
/// nodes themselves.
///
/// # Arguments
/// * `path` - The .vtu file to write
/// * `nodes` - The m surface nodes of the simulation
/// * `u_sim` - m x n simulated displacements, n >= 2
/// * `dic` - The measurements of the same time step
pub fn write_displacement_error(
    path: &Path,
    nodes: &[Point2<f64>],
    u_sim: &DMatrix<f64>,
    dic: &DicStep,
) -> Result<(), CalibrationError> {
    if u_sim.nrows() != nodes.len() || u_sim.ncols() < 2 {
        return Err(CalibrationError::Mesh(format!(
            "Displacement of size {}x{} does not fit {} surface nodes",
            u_sim.nrows(),
            u_sim.ncols(),
            nodes.len()
        )));
    }

    // Measurements go from the DIC points onto the nodes
    let projection = Projection::new(&dic.points, nodes);
    let u_dic = projection.apply(&dic.displacement)?;
    let error: DMatrix<f64> = u_sim.columns(0, 2).into_owned() - u_dic.columns(0, 2);

    let mut point_data = String::new();
    point_data.push_str(&data_array("U (FEM)", 3, &in_plane(u_sim)));
    point_data.push_str(&data_array("U (DIC)", 3, &in_plane(&u_dic)));
    point_data.push_str(&data_array("Displacement error", 3, &in_plane(&error)));
    if let Some(correlation) = &dic.correlation {
        let projected = projection.apply_scalar(correlation.as_slice())?;
        point_data.push_str(&data_array(
            "Correlation coefficient",
            1,
            projected.as_slice(),
        ));
    }

    let triangulation = Triangulation::new(nodes);
    let triangles = triangulation.triangles();
    let coords: Vec<f64> = nodes.iter().flat_map(|p| [p.x, p.y, 0.0]).collect();
    let connectivity: Vec<String> = triangles
        .iter()
        .flat_map(|t| t.vertices)
        .map(|v| v.to_string())
        .collect();
    let offsets: Vec<String> = (1..=triangles.len()).map(|k| (3 * k).to_string()).collect();
    let types: Vec<String> = vec![VTK_TRIANGLE.to_string(); triangles.len()];

    let coords_text: Vec<String> = coords.iter().map(|v| v.to_string()).collect();
    let xml = format!(
        r#"<?xml version="1.0"?>
<VTKFile type="UnstructuredGrid" version="0.1" byte_order="LittleEndian">
  <UnstructuredGrid>
    <Piece NumberOfPoints="{n_points}" NumberOfCells="{n_cells}">
      <PointData Vectors="U (FEM)">
{point_data}      </PointData>
      <Points>
        <DataArray type="Float64" NumberOfComponents="3" format="ascii">{coords}</DataArray>
      </Points>
      <Cells>
        <DataArray type="Int64" Name="connectivity" format="ascii">{connectivity}</DataArray>
        <DataArray type="Int64" Name="offsets" format="ascii">{offsets}</DataArray>
        <DataArray type="UInt8" Name="types" format="ascii">{types}</DataArray>
      </Cells>
    </Piece>
  </UnstructuredGrid>
</VTKFile>
"#,
        n_points = nodes.len(),
        n_cells = triangles.len(),
        coords = coords_text.join(" "),
        connectivity = connectivity.join(" "),
        offsets = offsets.join(" "),
        types = types.join(" "),
    );

    let mut file = match std::fs::File::create(path) {
        Ok(f) => f,
        Err(err) => {
            return Err(CalibrationError::Mesh(format!(
                "Failed to create {}: {err}",
                path.display()
            )))
        }
    };
    if let Err(err) = file.write_all(xml.as_bytes()) {
        return Err(CalibrationError::Mesh(format!(
            "Failed to write {}: {err}",
            path.display()
        )));
    }

    info!(
        "wrote displacement error of {} nodes to {}",
        nodes.len(),
        path.display()
    );

    Ok(())
}
