use log::debug;
use nalgebra::{Matrix2, Point2, Vector2};

/// Barycentric coordinates smaller than this (in magnitude) are treated as
/// lying on the triangle edge.
pub const INSIDE_TOLERANCE: f64 = 1e-12;

/// Relative determinant threshold under which a triangle is considered flat
pub const DEGENERATE_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub vertices: [usize; 3],
}

/// Result of a point location query
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Location {
    /// The point lies in `triangle`, with barycentric `weights` matching the
    /// order of the triangle vertices
    Inside { triangle: usize, weights: [f64; 3] },
    /// The point is outside every triangle
    Outside,
    /// The point could only be attributed to a flat triangle
    Degenerate { triangle: usize },
}

/// Uniform grid of triangle indices, used to avoid scanning every triangle
/// for each query point
#[derive(Debug)]
struct BucketGrid {
    origin: Point2<f64>,
    cell_size: Vector2<f64>,
    n_cols: usize,
    n_rows: usize,
    cells: Vec<Vec<usize>>,
}

impl BucketGrid {
    fn new(points: &[Point2<f64>], triangles: &[Triangle]) -> BucketGrid {
        let (min, max) = bounding_box(points);
        let n_side = (triangles.len() as f64).sqrt().ceil().max(1.0) as usize;
        let extent = max - min;
        let cell_size = Vector2::new(
            (extent.x / n_side as f64).max(f64::MIN_POSITIVE),
            (extent.y / n_side as f64).max(f64::MIN_POSITIVE),
        );

        let mut grid = BucketGrid {
            origin: min,
            cell_size,
            n_cols: n_side,
            n_rows: n_side,
            cells: vec![Vec::new(); n_side * n_side],
        };

        for (t, triangle) in triangles.iter().enumerate() {
            let corners = triangle.vertices.map(|v| points[v]);
            let (tri_min, tri_max) = bounding_box(&corners);
            let (c0, r0) = grid.cell_of(&tri_min);
            let (c1, r1) = grid.cell_of(&tri_max);
            for row in r0..=r1 {
                for col in c0..=c1 {
                    grid.cells[row * grid.n_cols + col].push(t);
                }
            }
        }

        grid
    }

    fn cell_of(&self, p: &Point2<f64>) -> (usize, usize) {
        let rel = p - self.origin;
        let col = (rel.x / self.cell_size.x).floor().max(0.0) as usize;
        let row = (rel.y / self.cell_size.y).floor().max(0.0) as usize;
        (col.min(self.n_cols - 1), row.min(self.n_rows - 1))
    }

    /// Triangles whose bounding box may contain `p`
    fn candidates(&self, p: &Point2<f64>) -> &[usize] {
        let (col, row) = self.cell_of(p);
        &self.cells[row * self.n_cols + col]
    }
}

/// A 2D Delaunay triangulation of a point cloud
#[derive(Debug)]
pub struct Triangulation {
    points: Vec<Point2<f64>>,
    triangles: Vec<Triangle>,
    bbox: (Point2<f64>, Point2<f64>),
    grid: Option<BucketGrid>,
}

impl Triangulation {
    /// Delaunay triangulation of `points`.
    ///
    /// Vertex indices of the resulting triangles refer to `points`. Points
    /// that duplicate an earlier coordinate are left out, and fewer than
    /// three points or a collinear cloud give no triangle at all.
    ///
    /// # Arguments
    /// * `points` - The node coordinates
    pub fn new(points: &[Point2<f64>]) -> Triangulation {
        let coords: Vec<delaunator::Point> = points
            .iter()
            .map(|p| delaunator::Point { x: p.x, y: p.y })
            .collect();
        let delaunay = delaunator::triangulate(&coords);

        let triangles: Vec<[usize; 3]> = delaunay
            .triangles
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();
        debug!(
            "triangulated {} nodes into {} triangles",
            points.len(),
            triangles.len()
        );

        Triangulation::from_triangles(points, triangles)
    }

    /// Wraps an existing triangulation of `points` for point location
    pub fn from_triangles(points: &[Point2<f64>], triangles: Vec<[usize; 3]>) -> Triangulation {
        let triangles: Vec<Triangle> = triangles
            .into_iter()
            .map(|vertices| Triangle { vertices })
            .collect();
        let grid = if triangles.is_empty() {
            None
        } else {
            Some(BucketGrid::new(points, &triangles))
        };

        Triangulation {
            points: points.to_vec(),
            triangles,
            bbox: bounding_box(points),
            grid,
        }
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    /// Finds the triangle containing `p` and its barycentric coordinates.
    ///
    /// # Arguments
    /// * `p` - The query point
    ///
    /// # Returns
    /// The location of the point. Points on an edge shared by two triangles
    /// are attributed to the first triangle found.
    pub fn locate(&self, p: &Point2<f64>) -> Location {
        let grid = match &self.grid {
            Some(g) => g,
            None => return Location::Outside,
        };

        let (min, max) = self.bbox;
        if p.x < min.x || p.x > max.x || p.y < min.y || p.y > max.y {
            return Location::Outside;
        }

        let mut degenerate: Option<usize> = None;
        for &t in grid.candidates(p) {
            let [a, b, c] = self.triangles[t].vertices.map(|v| self.points[v]);
            match barycentric(&a, &b, &c, p) {
                Some(weights) => {
                    if weights.iter().all(|w| *w >= -INSIDE_TOLERANCE) {
                        return Location::Inside {
                            triangle: t,
                            weights,
                        };
                    }
                }
                None => {
                    let (tri_min, tri_max) = bounding_box(&[a, b, c]);
                    if p.x >= tri_min.x && p.x <= tri_max.x && p.y >= tri_min.y && p.y <= tri_max.y
                    {
                        degenerate = Some(t);
                    }
                }
            }
        }

        match degenerate {
            Some(triangle) => Location::Degenerate { triangle },
            None => Location::Outside,
        }
    }
}

fn bounding_box(points: &[Point2<f64>]) -> (Point2<f64>, Point2<f64>) {
    let mut min = Point2::new(f64::INFINITY, f64::INFINITY);
    let mut max = Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in points {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    (min, max)
}

/// Computes the barycentric coordinates of `p` in triangle `abc` by solving
/// `p = a + s(b - a) + t(c - a)`.
///
/// # Returns
/// `[1 - s - t, s, t]`, or None if the triangle is flat
pub fn barycentric(
    a: &Point2<f64>,
    b: &Point2<f64>,
    c: &Point2<f64>,
    p: &Point2<f64>,
) -> Option<[f64; 3]> {
    let v1 = b - a;
    let v2 = c - a;
    let mat = Matrix2::from_columns(&[v1, v2]);

    let scale = v1.norm() * v2.norm();
    if !(mat.determinant().abs() > DEGENERATE_TOLERANCE * scale) {
        return None;
    }

    let st = mat.try_inverse()? * (p - a);
    Some([1.0 - st.x - st.y, st.x, st.y])
}
