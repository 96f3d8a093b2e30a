use nalgebra::{Matrix4, Point2, Quaternion, SymmetricEigen, UnitQuaternion, Vector3, Vector4};

use crate::{error::CalibrationError, projector::Projection};

/// Proper rotations of the cubic point group (m-3m), 24 operators
pub fn cubic_symmetry() -> Vec<UnitQuaternion<f64>> {
    let half_pi = std::f64::consts::FRAC_PI_2;
    let mut ops = vec![UnitQuaternion::identity()];

    // 4-fold axes
    for axis in [Vector3::x_axis(), Vector3::y_axis(), Vector3::z_axis()] {
        for k in 1..4 {
            ops.push(UnitQuaternion::from_axis_angle(&axis, k as f64 * half_pi));
        }
    }

    // 3-fold axes along the body diagonals
    for (sy, sz) in [(1.0, 1.0), (-1.0, 1.0), (1.0, -1.0), (-1.0, -1.0)] {
        let axis = nalgebra::Unit::new_normalize(Vector3::new(1.0, sy, sz));
        for k in 1..3 {
            ops.push(UnitQuaternion::from_axis_angle(
                &axis,
                k as f64 * 2.0 * std::f64::consts::FRAC_PI_3,
            ));
        }
    }

    // 2-fold axes along the face diagonals
    for v in [
        Vector3::new(1.0, 1.0, 0.0),
        Vector3::new(1.0, -1.0, 0.0),
        Vector3::new(1.0, 0.0, 1.0),
        Vector3::new(1.0, 0.0, -1.0),
        Vector3::new(0.0, 1.0, 1.0),
        Vector3::new(0.0, 1.0, -1.0),
    ] {
        ops.push(UnitQuaternion::from_axis_angle(
            &nalgebra::Unit::new_normalize(v),
            std::f64::consts::PI,
        ));
    }

    ops
}

/// Converts a Rodrigues vector `axis * tan(angle / 2)` into a quaternion
pub fn from_rodrigues(r: &Vector3<f64>) -> UnitQuaternion<f64> {
    let magnitude = r.norm();
    if magnitude == 0.0 {
        return UnitQuaternion::identity();
    }
    let angle = 2.0 * magnitude.atan();
    UnitQuaternion::from_scaled_axis(r / magnitude * angle)
}

/// Symmetry-equivalent of `q` closest to `reference`, on the same
/// hemisphere of the quaternion sphere.
fn closest_equivalent(
    q: &UnitQuaternion<f64>,
    reference: &UnitQuaternion<f64>,
    symmetry: &[UnitQuaternion<f64>],
) -> Vector4<f64> {
    let mut best = q.coords;
    let mut best_dot = reference.coords.dot(&best);
    for s in symmetry {
        let candidate = (q * s).coords;
        let dot = reference.coords.dot(&candidate);
        if dot.abs() > best_dot.abs() {
            best = candidate;
            best_dot = dot;
        }
    }

    if best_dot < 0.0 {
        -best
    } else {
        best
    }
}

/// Weighted mean of orientations, defined as the dominant eigenvector of the
/// second-moment matrix `sum(w q q^T)` once every orientation has been
/// reduced to the symmetry-equivalent closest to the most weighted one.
///
/// # Arguments
/// * `orientations` - The orientations to average
/// * `weights` - Non-negative weights; negative values are clipped to zero
/// * `symmetry` - Symmetry operators of the crystal, applied on the right
///
/// # Returns
/// The mean orientation, or None if there is nothing to average
pub fn mean_orientation(
    orientations: &[UnitQuaternion<f64>],
    weights: &[f64],
    symmetry: &[UnitQuaternion<f64>],
) -> Option<UnitQuaternion<f64>> {
    let (reference_idx, _) = weights
        .iter()
        .enumerate()
        .filter(|(i, w)| *i < orientations.len() && w.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    let reference = orientations[reference_idx];

    let mut moment: Matrix4<f64> = Matrix4::zeros();
    for (q, w) in std::iter::zip(orientations, weights) {
        let w = w.max(0.0);
        if w == 0.0 {
            continue;
        }
        let v = closest_equivalent(q, &reference, symmetry);
        moment += v * v.transpose() * w;
    }

    if moment.iter().all(|m| *m == 0.0) {
        return None;
    }

    let eigen = SymmetricEigen::new(moment);
    let dominant = eigen.eigenvectors.column(eigen.eigenvalues.imax()).into_owned();
    Some(UnitQuaternion::from_quaternion(Quaternion::from(dominant)))
}

/// Projects an orientation field known at the mesh nodes onto arbitrary
/// points
///
/// # Arguments
/// * `nodes` - Coordinates of the m mesh nodes
/// * `orientations` - Orientation at each node
/// * `symmetry` - Symmetry operators of the crystal
/// * `query_points` - Coordinates of the requested points
///
/// # Returns
/// A tuple with the projected orientations (None outside the mesh) and the
/// mask of points lying inside the mesh, in that order.
pub fn project_orientation(
    nodes: &[Point2<f64>],
    orientations: &[UnitQuaternion<f64>],
    symmetry: &[UnitQuaternion<f64>],
    query_points: &[Point2<f64>],
) -> Result<(Vec<Option<UnitQuaternion<f64>>>, Vec<bool>), CalibrationError> {
    if orientations.len() != nodes.len() {
        return Err(CalibrationError::Mesh(format!(
            "Got {} orientations for {} nodes",
            orientations.len(),
            nodes.len()
        )));
    }

    let projection = Projection::new(nodes, query_points);

    let projected = projection
        .matrix
        .row_iter()
        .zip(&projection.inside)
        .map(|(row, inside)| {
            if !inside {
                return None;
            }
            let neighbours: Vec<UnitQuaternion<f64>> =
                row.col_indices().iter().map(|n| orientations[*n]).collect();
            mean_orientation(&neighbours, row.values(), symmetry)
        })
        .collect();

    Ok((projected, projection.inside))
}

/// Smallest rotation angle (radians) between two orientations, over every
/// symmetry-equivalent pair
pub fn misorientation_angle(
    a: &UnitQuaternion<f64>,
    b: &UnitQuaternion<f64>,
    symmetry: &[UnitQuaternion<f64>],
) -> f64 {
    let delta = a.inverse() * b;
    symmetry
        .iter()
        .map(|s| (delta * s).angle())
        .fold(delta.angle(), f64::min)
}
