use crate::error::{EquilibriaError, EquilibriaResult};
use ndarray::{Array1, Array2};

/// Regular finite-difference grid in (R, Z)
///
/// The grid is immutable; a new `Grid` must be built to change its geometry.
/// 2-D arrays over the grid have shape `(n_z, n_r)` and are indexed `[i_z, i_r]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    r_min: f64,
    r_max: f64,
    z_min: f64,
    z_max: f64,
    n_r: usize,
    n_z: usize,
    r: Array1<f64>,
    z: Array1<f64>,
    mesh_r: Array2<f64>,
    mesh_z: Array2<f64>,
    d_r: f64,
    d_z: f64,
}

impl Grid {
    /// Create a new grid
    ///
    /// # Arguments
    /// * `r_min`, `r_max` - radial extent, metre; `r_min` must be positive because the
    ///   Grad-Shafranov operator carries a 1/R metric
    /// * `z_min`, `z_max` - vertical extent, metre
    /// * `n_r`, `n_z` - number of nodes in each direction, at least 3
    ///
    /// # Errors
    /// `EquilibriaError::InvalidGrid` for a degenerate grid
    pub fn new(r_min: f64, r_max: f64, z_min: f64, z_max: f64, n_r: usize, n_z: usize) -> EquilibriaResult<Self> {
        if !(r_min > 0.0) {
            return Err(EquilibriaError::InvalidGrid(format!("r_min = {r_min} must be positive")));
        }
        if !(r_max > r_min) {
            return Err(EquilibriaError::InvalidGrid(format!("r_max = {r_max} must exceed r_min = {r_min}")));
        }
        if !(z_max > z_min) {
            return Err(EquilibriaError::InvalidGrid(format!("z_max = {z_max} must exceed z_min = {z_min}")));
        }
        if n_r < 3 || n_z < 3 {
            return Err(EquilibriaError::InvalidGrid(format!("need at least 3x3 nodes, got n_r = {n_r}, n_z = {n_z}")));
        }

        let r: Array1<f64> = Array1::linspace(r_min, r_max, n_r);
        let z: Array1<f64> = Array1::linspace(z_min, z_max, n_z);
        let d_r: f64 = (r_max - r_min) / ((n_r - 1) as f64);
        let d_z: f64 = (z_max - z_min) / ((n_z - 1) as f64);

        let mut mesh_r: Array2<f64> = Array2::zeros((n_z, n_r));
        let mut mesh_z: Array2<f64> = Array2::zeros((n_z, n_r));
        for i_z in 0..n_z {
            for i_r in 0..n_r {
                mesh_r[[i_z, i_r]] = r[i_r];
                mesh_z[[i_z, i_r]] = z[i_z];
            }
        }

        return Ok(Grid {
            r_min,
            r_max,
            z_min,
            z_max,
            n_r,
            n_z,
            r,
            z,
            mesh_r,
            mesh_z,
            d_r,
            d_z,
        });
    }

    pub fn r_min(&self) -> f64 {
        return self.r_min;
    }

    pub fn r_max(&self) -> f64 {
        return self.r_max;
    }

    pub fn z_min(&self) -> f64 {
        return self.z_min;
    }

    pub fn z_max(&self) -> f64 {
        return self.z_max;
    }

    pub fn n_r(&self) -> usize {
        return self.n_r;
    }

    pub fn n_z(&self) -> usize {
        return self.n_z;
    }

    /// Total number of nodes
    pub fn n_nodes(&self) -> usize {
        return self.n_r * self.n_z;
    }

    pub fn r(&self) -> &Array1<f64> {
        return &self.r;
    }

    pub fn z(&self) -> &Array1<f64> {
        return &self.z;
    }

    /// R at every node, shape = (n_z, n_r)
    pub fn mesh_r(&self) -> &Array2<f64> {
        return &self.mesh_r;
    }

    /// Z at every node, shape = (n_z, n_r)
    pub fn mesh_z(&self) -> &Array2<f64> {
        return &self.mesh_z;
    }

    pub fn d_r(&self) -> f64 {
        return self.d_r;
    }

    pub fn d_z(&self) -> f64 {
        return self.d_z;
    }

    /// Area of one cell, metre^2
    pub fn d_area(&self) -> f64 {
        return self.d_r * self.d_z;
    }

    /// Geometric centre of the grid, (R, Z)
    pub fn centre(&self) -> (f64, f64) {
        return (0.5 * (self.r_min + self.r_max), 0.5 * (self.z_min + self.z_max));
    }

    /// Flattened node index, row-major over (i_z, i_r)
    pub fn flat_index(&self, i_z: usize, i_r: usize) -> usize {
        return i_z * self.n_r + i_r;
    }

    /// Returns true if (R, Z) lies inside the grid rectangle, edges included
    pub fn point_inside(&self, r: f64, z: f64) -> bool {
        return r >= self.r_min && r <= self.r_max && z >= self.z_min && z <= self.z_max;
    }

    /// Distance from (R, Z) to the nearest grid edge; negative outside
    pub fn distance_to_edge(&self, r: f64, z: f64) -> f64 {
        let distances: [f64; 4] = [r - self.r_min, self.r_max - r, z - self.z_min, self.z_max - z];
        return distances.iter().cloned().fold(f64::INFINITY, f64::min);
    }

    /// Nodes on the grid edge, walked anticlockwise starting from (r_min, z_min)
    ///
    /// # Returns
    /// * `Vec<(i_z, i_r)>` - each edge node appears exactly once
    pub fn edge_nodes(&self) -> Vec<(usize, usize)> {
        let n_r: usize = self.n_r;
        let n_z: usize = self.n_z;
        let mut nodes: Vec<(usize, usize)> = Vec::with_capacity(2 * (n_r + n_z) - 4);

        // Bottom, left to right
        for i_r in 0..n_r {
            nodes.push((0, i_r));
        }
        // Right side, bottom to top
        for i_z in 1..n_z {
            nodes.push((i_z, n_r - 1));
        }
        // Top, right to left
        for i_r in (0..n_r - 1).rev() {
            nodes.push((n_z - 1, i_r));
        }
        // Left side, top to bottom
        for i_z in (1..n_z - 1).rev() {
            nodes.push((i_z, 0));
        }

        return nodes;
    }

    /// Returns true if the node is on the grid edge
    pub fn is_edge_node(&self, i_z: usize, i_r: usize) -> bool {
        return i_z == 0 || i_r == 0 || i_z == self.n_z - 1 || i_r == self.n_r - 1;
    }

    /// Index of the node nearest to (R, Z), clamped to the grid
    pub fn nearest_node(&self, r: f64, z: f64) -> (usize, usize) {
        let i_r: f64 = ((r - self.r_min) / self.d_r).round();
        let i_z: f64 = ((z - self.z_min) / self.d_z).round();
        let i_r: usize = i_r.clamp(0.0, (self.n_r - 1) as f64) as usize;
        let i_z: usize = i_z.clamp(0.0, (self.n_z - 1) as f64) as usize;
        return (i_z, i_r);
    }

    /// Lower-left node of the cell containing (R, Z), clamped so that the cell is inside the grid
    pub fn cell_index(&self, r: f64, z: f64) -> (usize, usize) {
        let i_r: f64 = ((r - self.r_min) / self.d_r).floor();
        let i_z: f64 = ((z - self.z_min) / self.d_z).floor();
        let i_r: usize = i_r.clamp(0.0, (self.n_r - 2) as f64) as usize;
        let i_z: usize = i_z.clamp(0.0, (self.n_z - 2) as f64) as usize;
        return (i_z, i_r);
    }
}

#[test]
fn test_grid_coordinates() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    let grid: Grid = Grid::new(3.0, 13.0, -10.0, 10.0, 65, 65).expect("test_grid_coordinates: grid");

    assert_abs_diff_eq!(grid.d_r(), 10.0 / 64.0, epsilon = 1e-14);
    assert_abs_diff_eq!(grid.d_z(), 20.0 / 64.0, epsilon = 1e-14);
    assert_abs_diff_eq!(grid.r()[64], 13.0, epsilon = 1e-12);
    assert_abs_diff_eq!(grid.mesh_z()[[64, 0]], 10.0, epsilon = 1e-12);
    assert_abs_diff_eq!(grid.mesh_r()[[0, 64]], 13.0, epsilon = 1e-12);

    let edge: Vec<(usize, usize)> = grid.edge_nodes();
    assert_eq!(edge.len(), 2 * (65 + 65) - 4);
    for (i_z, i_r) in edge.iter() {
        assert!(grid.is_edge_node(*i_z, *i_r));
    }

    assert_eq!(grid.nearest_node(8.0, 0.0), (32, 32));
    assert_eq!(grid.cell_index(13.0, 10.0), (63, 63));
}

#[test]
fn test_grid_rejects_degenerate() {
    assert!(Grid::new(0.0, 1.0, -1.0, 1.0, 10, 10).is_err());
    assert!(Grid::new(2.0, 1.0, -1.0, 1.0, 10, 10).is_err());
    assert!(Grid::new(1.0, 2.0, 1.0, 1.0, 10, 10).is_err());
    assert!(Grid::new(1.0, 2.0, -1.0, 1.0, 2, 10).is_err());
}
