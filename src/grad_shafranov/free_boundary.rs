use crate::greens::greens_psi;
use crate::grid::Grid;
use log::debug;
use ndarray::{Array1, Array2};

/// Free-boundary condition for the plasma flux
///
/// The plasma flux on the grid edge is the Green's-function integral of the toroidal current
/// over the whole grid. The (n_edge, n_nodes) kernel depends only on the grid, so it is built once.
#[derive(Debug)]
pub struct FreeBoundaryKernel {
    edge: Vec<(usize, usize)>,
    greens: Array2<f64>,
    d_area: f64,
}

impl FreeBoundaryKernel {
    pub fn new(grid: &Grid) -> Self {
        let edge: Vec<(usize, usize)> = grid.edge_nodes();
        let edge_r: Array1<f64> = edge.iter().map(|&(_, i_r)| grid.r()[i_r]).collect();
        let edge_z: Array1<f64> = edge.iter().map(|&(i_z, _)| grid.z()[i_z]).collect();

        // Every node is a rectangular current element of one cell
        let node_r: Array1<f64> = grid.mesh_r().iter().cloned().collect();
        let node_z: Array1<f64> = grid.mesh_z().iter().cloned().collect();
        let n_nodes: usize = grid.n_nodes();
        let half_width_r: Array1<f64> = Array1::from_elem(n_nodes, 0.5 * grid.d_r());
        let half_width_z: Array1<f64> = Array1::from_elem(n_nodes, 0.5 * grid.d_z());

        let greens: Array2<f64> = greens_psi(&edge_r, &edge_z, &node_r, &node_z, &half_width_r, &half_width_z);
        debug!("FreeBoundaryKernel::new: {} edge nodes x {} current elements", edge.len(), n_nodes);

        return FreeBoundaryKernel {
            edge,
            greens,
            d_area: grid.d_area(),
        };
    }

    /// Plasma flux at the edge nodes, in the order of `Grid::edge_nodes`
    pub fn boundary_psi(&self, jtor: &Array2<f64>) -> Array1<f64> {
        let currents: Array1<f64> = jtor.iter().map(|&j| j * self.d_area).collect();
        return self.greens.dot(&currents);
    }

    /// Write the free-boundary flux into the edge nodes of a right-hand side
    pub fn apply(&self, rhs: &mut Array2<f64>, jtor: &Array2<f64>) {
        let psi_edge: Array1<f64> = self.boundary_psi(jtor);
        for (i_edge, &(i_z, i_r)) in self.edge.iter().enumerate() {
            rhs[[i_z, i_r]] = psi_edge[i_edge];
        }
    }
}

#[test]
fn test_free_boundary_solution_matches_greens_integral() {
    // A compact current blob solved with the free-boundary condition must reproduce, away from the blob,
    // the flux given directly by summing Green's functions over the blob

    // Lazy loading of packages which are not used anywhere else in the code
    use super::GsSolver;
    use approx::assert_relative_eq;
    const MU_0: f64 = physical_constants::VACUUM_MAG_PERMEABILITY;

    let grid: Grid = Grid::new(3.0, 13.0, -10.0, 10.0, 65, 65).expect("test_free_boundary: grid");
    let (r_c, z_c): (f64, f64) = (8.0, 0.5);
    let width: f64 = 0.8;
    let jtor: Array2<f64> = grid
        .mesh_r()
        .iter()
        .zip(grid.mesh_z().iter())
        .map(|(&r, &z)| 1e6 * (-((r - r_c).powi(2) + (z - z_c).powi(2)) / (width * width)).exp())
        .collect::<Array1<f64>>()
        .into_shape_with_order((65, 65))
        .expect("test_free_boundary: jtor shape");

    let kernel: FreeBoundaryKernel = FreeBoundaryKernel::new(&grid);
    let mut rhs: Array2<f64> = -MU_0 * grid.mesh_r() * &jtor;
    kernel.apply(&mut rhs, &jtor);

    let solver: GsSolver = GsSolver::new(&grid).expect("test_free_boundary: factorisation");
    let psi: Array2<f64> = solver.solve(&rhs).expect("test_free_boundary: solve");

    // Direct Green's sum at a few interior points well away from the blob
    let samples: [(usize, usize); 3] = [(32, 10), (50, 40), (15, 55)];
    for &(i_z, i_r) in samples.iter() {
        let r: Array1<f64> = Array1::from(vec![grid.r()[i_r]]);
        let z: Array1<f64> = Array1::from(vec![grid.z()[i_z]]);
        let node_r: Array1<f64> = grid.mesh_r().iter().cloned().collect();
        let node_z: Array1<f64> = grid.mesh_z().iter().cloned().collect();
        let half_width: Array1<f64> = Array1::zeros(grid.n_nodes());
        let greens: Array2<f64> = greens_psi(&r, &z, &node_r, &node_z, &half_width, &half_width);
        let currents: Array1<f64> = jtor.iter().map(|&j| j * grid.d_area()).collect();
        let psi_direct: f64 = greens.dot(&currents)[0];

        assert_relative_eq!(psi[[i_z, i_r]], psi_direct, max_relative = 2e-2);
    }
}
