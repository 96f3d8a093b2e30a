use log::debug;
use nalgebra::{DMatrix, DVector, Point2};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::{
    error::CalibrationError,
    triangulation::{Location, Triangulation},
};

/// Piecewise-linear interpolation operator from mesh nodes onto query points.
///
/// The operator only depends on the geometry, so it can be built once and
/// applied to several fields defined on the same nodes (e.g. successive
/// time steps).
#[derive(Debug, Clone)]
pub struct Projection {
    /// p x m matrix with the barycentric weights of each query point on the
    /// three vertices of its parent triangle
    pub matrix: CsrMatrix<f64>,
    /// Whether each query point lies inside the mesh
    pub inside: Vec<bool>,
    /// Number of query points that could only be attributed to a flat
    /// triangle. They are reported as outside.
    pub degenerate: usize,
}

impl Projection {
    /// Triangulates `nodes` and assembles the interpolation matrix.
    ///
    /// # Arguments
    /// * `nodes` - Coordinates of the m mesh nodes
    /// * `query_points` - Coordinates of the p points where the field is
    ///     requested
    pub fn new(nodes: &[Point2<f64>], query_points: &[Point2<f64>]) -> Projection {
        Projection::from_triangulation(&Triangulation::new(nodes), query_points)
    }

    /// Assembles the interpolation matrix over an existing triangulation
    pub fn from_triangulation(
        triangulation: &Triangulation,
        query_points: &[Point2<f64>],
    ) -> Projection {
        let mut coo = CooMatrix::new(query_points.len(), triangulation.points().len());
        let mut inside = vec![false; query_points.len()];
        let mut degenerate: usize = 0;

        for (i, p) in query_points.iter().enumerate() {
            match triangulation.locate(p) {
                Location::Inside { triangle, weights } => {
                    let vertices = triangulation.triangles()[triangle].vertices;
                    for (node, weight) in std::iter::zip(vertices, weights) {
                        coo.push(i, node, weight);
                    }
                    inside[i] = true;
                }
                Location::Degenerate { triangle } => {
                    debug!(
                        "query point ({}, {}) only falls in flat triangle {:?}",
                        p.x,
                        p.y,
                        triangulation.triangles()[triangle].vertices
                    );
                    degenerate += 1;
                }
                Location::Outside => {}
            }
        }

        if degenerate > 0 {
            debug!("{degenerate} query points fell in degenerate triangles");
        }

        Projection {
            matrix: CsrMatrix::from(&coo),
            inside,
            degenerate,
        }
    }

    pub fn n_queries(&self) -> usize {
        self.inside.len()
    }

    pub fn n_inside(&self) -> usize {
        self.inside.iter().filter(|i| **i).count()
    }

    /// Interpolates a nodal field onto the query points
    ///
    /// # Arguments
    /// * `field` - m x n matrix, one row per mesh node
    ///
    /// # Returns
    /// A p x n matrix. Rows of points outside the mesh are filled with NaN.
    pub fn apply(&self, field: &DMatrix<f64>) -> Result<DMatrix<f64>, CalibrationError> {
        if field.nrows() != self.matrix.ncols() {
            return Err(CalibrationError::Mesh(format!(
                "Field has {} rows but the mesh has {} nodes",
                field.nrows(),
                self.matrix.ncols()
            )));
        }

        let mut projected: DMatrix<f64> = &self.matrix * field;
        for (i, inside) in self.inside.iter().enumerate() {
            if !inside {
                projected.row_mut(i).fill(f64::NAN);
            }
        }

        Ok(projected)
    }

    /// Interpolates a nodal scalar field onto the query points
    pub fn apply_scalar(&self, values: &[f64]) -> Result<DVector<f64>, CalibrationError> {
        let field = DMatrix::from_column_slice(values.len(), 1, values);
        Ok(self.apply(&field)?.column(0).into_owned())
    }
}

/// Projects a vector field known at the mesh nodes onto arbitrary points
///
/// # Arguments
/// * `nodes` - Coordinates of the m mesh nodes
/// * `field` - m x n matrix of nodal values
/// * `query_points` - Coordinates of the p requested points
///
/// # Returns
/// A tuple with the p x n projected field (NaN outside the mesh) and the
/// mask of points lying inside the mesh, in that order.
pub fn project(
    nodes: &[Point2<f64>],
    field: &DMatrix<f64>,
    query_points: &[Point2<f64>],
) -> Result<(DMatrix<f64>, Vec<bool>), CalibrationError> {
    let projection = Projection::new(nodes, query_points);
    let projected = projection.apply(field)?;
    Ok((projected, projection.inside))
}

/// Scalar counterpart of [`project`]
pub fn project_scalar(
    nodes: &[Point2<f64>],
    values: &[f64],
    query_points: &[Point2<f64>],
) -> Result<(DVector<f64>, Vec<bool>), CalibrationError> {
    let projection = Projection::new(nodes, query_points);
    let projected = projection.apply_scalar(values)?;
    Ok((projected, projection.inside))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> Vec<Point2<f64>> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(0.0, 1.0),
            Point2::new(1.0, 1.0),
        ]
    }

    fn coordinates_as_field(nodes: &[Point2<f64>]) -> DMatrix<f64> {
        DMatrix::from_fn(nodes.len(), 2, |i, j| nodes[i][j])
    }

    fn mesh_nodes() -> Vec<Point2<f64>> {
        let mut nodes = Vec::new();
        for i in 0..6 {
            for j in 0..4 {
                nodes.push(Point2::new(
                    i as f64 * 0.8 + 0.05 * (j as f64 * 1.7).sin(),
                    j as f64 * 1.1 + 0.04 * (i as f64 * 2.3).cos(),
                ));
            }
        }
        nodes
    }

    #[test]
    fn test_unit_square_identity_field() {
        let nodes = unit_square();
        let field = coordinates_as_field(&nodes);
        let query = [Point2::new(0.5, 0.5), Point2::new(2.0, 2.0)];

        let (projected, inside) = project(&nodes, &field, &query).unwrap();

        assert_eq!(inside, vec![true, false]);
        assert_relative_eq!(projected[(0, 0)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(projected[(0, 1)], 0.5, epsilon = 1e-12);
        assert!(projected[(1, 0)].is_nan());
        assert!(projected[(1, 1)].is_nan());
    }

    #[test]
    fn test_exact_at_nodes() {
        let nodes = mesh_nodes();
        let field = DMatrix::from_fn(nodes.len(), 3, |i, j| (i * 3 + j) as f64 * 0.37 - 4.0);

        let (projected, inside) = project(&nodes, &field, &nodes).unwrap();

        assert!(inside.iter().all(|i| *i));
        for i in 0..nodes.len() {
            for j in 0..3 {
                assert_relative_eq!(projected[(i, j)], field[(i, j)], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_affine_field_is_reproduced() {
        let nodes = mesh_nodes();
        let affine = |p: &Point2<f64>| 2.0 * p.x - 0.5 * p.y + 3.0;
        let values: Vec<f64> = nodes.iter().map(affine).collect();
        let query = [
            Point2::new(1.3, 1.7),
            Point2::new(3.1, 0.6),
            Point2::new(2.2, 2.9),
        ];

        let (projected, inside) = project_scalar(&nodes, &values, &query).unwrap();

        for (i, p) in query.iter().enumerate() {
            assert!(inside[i]);
            assert_relative_eq!(projected[i], affine(p), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_outside_points_are_nan() {
        let nodes = mesh_nodes();
        let field = coordinates_as_field(&nodes);
        let query = [
            Point2::new(-1.0, 0.5),
            Point2::new(10.0, 10.0),
            Point2::new(2.0, -3.0),
        ];

        let (projected, inside) = project(&nodes, &field, &query).unwrap();

        assert!(inside.iter().all(|i| !*i));
        assert!(projected.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_interpolation_rows_sum_to_one() {
        let nodes = mesh_nodes();
        let query: Vec<Point2<f64>> = (0..20)
            .map(|k| Point2::new(0.2 + 0.19 * k as f64, 0.3 + 0.13 * k as f64))
            .collect();

        let projection = Projection::new(&nodes, &query);

        for (i, row) in projection.matrix.row_iter().enumerate() {
            if projection.inside[i] {
                assert_eq!(row.nnz(), 3);
                assert_relative_eq!(row.values().iter().sum::<f64>(), 1.0, epsilon = 1e-12);
            } else {
                assert_eq!(row.nnz(), 0);
            }
        }
    }

    #[test]
    fn test_single_query_point() {
        let nodes = unit_square();
        let values = [0.0, 1.0, 2.0, 3.0];

        let (projected, inside) = project_scalar(&nodes, &values, &[Point2::new(0.25, 0.25)]).unwrap();

        assert_eq!(projected.len(), 1);
        assert_eq!(inside, vec![true]);
        // f = x + 2y on the lower-left triangle
        assert_relative_eq!(projected[0], 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_same_geometry_reused_for_several_fields() {
        let nodes = mesh_nodes();
        let query = [Point2::new(1.0, 1.0), Point2::new(-2.0, 0.0)];
        let projection = Projection::new(&nodes, &query);

        for scale in [1.0, -2.0, 10.0] {
            let field = coordinates_as_field(&nodes) * scale;
            let projected = projection.apply(&field).unwrap();
            assert_relative_eq!(projected[(0, 0)], scale, epsilon = 1e-9);
            assert!(projected[(1, 1)].is_nan());
        }
    }

    #[test]
    fn test_flat_triangle_counts_as_degenerate() {
        let nodes = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(0.0, 1.0),
        ];
        let triangulation = Triangulation::from_triangles(&nodes, vec![[0, 1, 2], [0, 1, 3]]);
        let query = [Point2::new(1.5, 0.0), Point2::new(0.25, 0.25)];

        let projection = Projection::from_triangulation(&triangulation, &query);

        assert_eq!(projection.degenerate, 1);
        assert_eq!(projection.inside, vec![false, true]);
        let projected = projection.apply_scalar(&[0.0, 1.0, 2.0, 3.0]).unwrap();
        assert!(projected[0].is_nan());
        // f = x + 3y on the second triangle
        assert_relative_eq!(projected[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mismatched_field_is_rejected() {
        let nodes = unit_square();
        let field = DMatrix::zeros(3, 2);
        assert!(matches!(
            project(&nodes, &field, &nodes),
            Err(CalibrationError::Mesh(_))
        ));
    }
}
