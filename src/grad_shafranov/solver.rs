use super::operator::gs_operator;
use crate::error::{EquilibriaError, EquilibriaResult};
use crate::grid::Grid;
extern crate blas_src;
use lapack::*;
use log::debug;
use ndarray::Array2;

/// Direct solver for the discretised Grad-Shafranov operator
///
/// The operator is LU-factorised once, in LAPACK band storage, when the solver is built.
/// Every `solve` afterwards is a pair of banded triangular solves, so the factorisation is
/// shared read-only (typically behind an `Arc`) by every solve on the same grid.
#[derive(Debug)]
pub struct GsSolver {
    n_r: usize,
    n_z: usize,
    kl: usize,
    ku: usize,
    ldab: usize,
    ab: Vec<f64>,
    ipiv: Vec<i32>,
}

impl GsSolver {
    /// Assemble and factorise the operator for `grid`
    ///
    /// # Errors
    /// `EquilibriaError::SingularOperator` if LAPACK reports a zero pivot
    pub fn new(grid: &Grid) -> EquilibriaResult<Self> {
        let n_r: usize = grid.n_r();
        let n_z: usize = grid.n_z();
        let n: usize = n_r * n_z;

        // Band storage, see LAPACK dgbtrf: AB(kl + ku + 1 + i - j, j) = A(i, j), 1-based, column-major
        let kl: usize = n_r;
        let ku: usize = n_r;
        let ldab: usize = 2 * kl + ku + 1;
        let mut ab: Vec<f64> = vec![0.0; ldab * n];

        let (vals, rows, cols): (Vec<f64>, Vec<usize>, Vec<usize>) = gs_operator(grid);
        for k in 0..vals.len() {
            let i: usize = rows[k];
            let j: usize = cols[k];
            ab[(kl + ku + i - j) + j * ldab] += vals[k];
        }

        let mut ipiv: Vec<i32> = vec![0; n];
        let mut info: i32 = 0;
        unsafe {
            dgbtrf(
                n as i32,    // `m` number of rows
                n as i32,    // `n` number of columns
                kl as i32,   // `kl` number of sub-diagonals
                ku as i32,   // `ku` number of super-diagonals
                &mut ab,     // `ab` band storage, overwritten with the LU factors
                ldab as i32, // `ldab` leading dimension of `ab`
                &mut ipiv,   // `ipiv` pivot indices
                &mut info,   // `info`
            );
        }
        if info != 0 {
            return Err(EquilibriaError::SingularOperator { info });
        }
        debug!("GsSolver::new: factorised {n} x {n} banded operator (kl = ku = {kl})");

        return Ok(GsSolver {
            n_r,
            n_z,
            kl,
            ku,
            ldab,
            ab,
            ipiv,
        });
    }

    /// Solve Δ*ψ = rhs
    ///
    /// # Arguments
    /// * `rhs` - shape = (n_z, n_r); interior nodes hold -μ0 R j_tor, edge nodes hold the Dirichlet flux values
    ///
    /// # Returns
    /// * `ψ`, shape = (n_z, n_r)
    pub fn solve(&self, rhs: &Array2<f64>) -> EquilibriaResult<Array2<f64>> {
        if rhs.dim() != (self.n_z, self.n_r) {
            return Err(EquilibriaError::ArrayLength {
                what: "GsSolver::solve rhs".to_string(),
                expected: self.n_z * self.n_r,
                found: rhs.len(),
            });
        }
        let n: usize = self.n_z * self.n_r;

        // Logical iteration order of a (n_z, n_r) array is the flattened node order
        let mut b: Vec<f64> = rhs.iter().cloned().collect();
        let mut info: i32 = 0;
        unsafe {
            dgbtrs(
                b'N',             // `trans` no transpose
                n as i32,         // `n` order of the matrix
                self.kl as i32,   // `kl`
                self.ku as i32,   // `ku`
                1,                // `nrhs`
                &self.ab,         // `ab` LU factors from dgbtrf
                self.ldab as i32, // `ldab`
                &self.ipiv,       // `ipiv`
                &mut b,           // `b` overwritten with the solution
                n as i32,         // `ldb`
                &mut info,        // `info`
            );
        }
        if info != 0 {
            return Err(EquilibriaError::LinearSolve(format!("GsSolver::solve: dgbtrs info = {info}")));
        }

        let psi: Array2<f64> = Array2::from_shape_vec((self.n_z, self.n_r), b).expect("GsSolver::solve: solution has the grid shape");
        return Ok(psi);
    }

    pub fn n_r(&self) -> usize {
        return self.n_r;
    }

    pub fn n_z(&self) -> usize {
        return self.n_z;
    }
}

#[test]
fn test_solver_recovers_manufactured_solution() {
    // ψ = R² Z² is reproduced exactly by the second order stencil, so the direct solve must return it
    // to round-off when given Δ*ψ = 2 R² inside and ψ on the edge

    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    let grid: Grid = Grid::new(1.0, 4.0, -2.0, 2.0, 33, 41).expect("test_solver: grid");
    let psi_exact: Array2<f64> = grid.mesh_r().mapv(|r| r * r) * grid.mesh_z().mapv(|z| z * z);

    let mut rhs: Array2<f64> = grid.mesh_r().mapv(|r| 2.0 * r * r);
    for (i_z, i_r) in grid.edge_nodes() {
        rhs[[i_z, i_r]] = psi_exact[[i_z, i_r]];
    }

    let solver: GsSolver = GsSolver::new(&grid).expect("test_solver: factorisation");
    let psi: Array2<f64> = solver.solve(&rhs).expect("test_solver: solve");

    assert_abs_diff_eq!(psi, psi_exact, epsilon = 1e-8);
}

#[test]
fn test_solver_is_deterministic() {
    let grid: Grid = Grid::new(2.0, 6.0, -3.0, 3.0, 17, 17).expect("test_solver_is_deterministic: grid");
    let solver: GsSolver = GsSolver::new(&grid).expect("test_solver_is_deterministic: factorisation");
    let rhs: Array2<f64> = grid.mesh_r().mapv(|r| -r) * grid.mesh_z().mapv(|z| (-z * z).exp());

    let psi_1: Array2<f64> = solver.solve(&rhs).expect("solve 1");
    let psi_2: Array2<f64> = solver.solve(&rhs).expect("solve 2");
    assert_eq!(psi_1, psi_2);
}
