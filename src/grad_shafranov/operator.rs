use crate::grid::Grid;
use ndarray::Array2;

/// Grad-Shafranov Δ* elliptic operator assembled to second order accuracy (Jardin eq. 4.54)
///
/// Δ*ψ = R ∂/∂R (1/R ∂ψ/∂R) + ∂²ψ/∂Z²
///
/// Rows and columns use the flattened node index `i_z * n_r + i_r`, so radial neighbours are ±1
/// and vertical neighbours ±n_r; the matrix is banded with `kl = ku = n_r`.
///
/// Values corresponding to boundary nodes are unity, because this is how Dirichlet boundary conditions are implemented.
///
/// # Returns
/// * triplets `(vals, rows, cols)`, with no particular sorting order
///
/// # References
///   \[1\] S. Jardin, *Computational Methods in Plasma Physics*, 1st ed. USA: CRC Press, Inc., 2010.
pub fn gs_operator(grid: &Grid) -> (Vec<f64>, Vec<usize>, Vec<usize>) {
    let n_r: usize = grid.n_r();
    let n_z: usize = grid.n_z();
    let d_r: f64 = grid.d_r();
    let d_z: f64 = grid.d_z();

    let inv_d_r2: f64 = 1.0 / (d_r * d_r);
    let inv_d_z2: f64 = 1.0 / (d_z * d_z);

    let n_interior: usize = (n_r - 2) * (n_z - 2);
    let n_entries: usize = 5 * n_interior + (n_r * n_z - n_interior);
    let mut rows: Vec<usize> = Vec::with_capacity(n_entries);
    let mut cols: Vec<usize> = Vec::with_capacity(n_entries);
    let mut vals: Vec<f64> = Vec::with_capacity(n_entries);

    for i_z in 0..n_z {
        for i_r in 0..n_r {
            let row: usize = grid.flat_index(i_z, i_r);

            if grid.is_edge_node(i_z, i_r) {
                rows.push(row);
                cols.push(row);
                vals.push(1.0);
                continue;
            }

            let r: f64 = grid.r()[i_r];
            let inv_r_plus: f64 = 1.0 / (r + d_r / 2.0); // R_{i + 1/2}
            let inv_r_minus: f64 = 1.0 / (r - d_r / 2.0); // R_{i - 1/2}
            let x: f64 = r * inv_d_r2;

            rows.extend([row; 5].iter());
            cols.extend([row - n_r, row - 1, row, row + 1, row + n_r].iter());
            vals.extend(
                [
                    inv_d_z2,
                    x * inv_r_minus,
                    -2.0 * inv_d_z2 - x * inv_r_minus - x * inv_r_plus,
                    x * inv_r_plus,
                    inv_d_z2,
                ]
                .iter(),
            );
        }
    }

    return (vals, rows, cols);
}

/// Apply the discretised Δ* operator to a flux map without assembling a matrix
///
/// Edge nodes are returned unchanged, matching the identity rows of `gs_operator`.
pub fn apply_gs_operator(grid: &Grid, psi: &Array2<f64>) -> Array2<f64> {
    let n_r: usize = grid.n_r();
    let n_z: usize = grid.n_z();
    let d_r: f64 = grid.d_r();
    let inv_d_r2: f64 = 1.0 / (d_r * d_r);
    let inv_d_z2: f64 = 1.0 / (grid.d_z() * grid.d_z());

    let mut result: Array2<f64> = psi.clone();
    for i_z in 1..n_z - 1 {
        for i_r in 1..n_r - 1 {
            let r: f64 = grid.r()[i_r];
            let x: f64 = r * inv_d_r2;
            let inv_r_plus: f64 = 1.0 / (r + d_r / 2.0);
            let inv_r_minus: f64 = 1.0 / (r - d_r / 2.0);
            result[[i_z, i_r]] = inv_d_z2 * (psi[[i_z - 1, i_r]] + psi[[i_z + 1, i_r]])
                + x * inv_r_minus * psi[[i_z, i_r - 1]]
                + x * inv_r_plus * psi[[i_z, i_r + 1]]
                - (2.0 * inv_d_z2 + x * inv_r_minus + x * inv_r_plus) * psi[[i_z, i_r]];
        }
    }
    return result;
}

#[test]
fn test_operator_structure() {
    let grid: Grid = Grid::new(1.0, 2.0, -1.0, 1.0, 7, 9).expect("test_operator_structure: grid");
    let (vals, rows, cols): (Vec<f64>, Vec<usize>, Vec<usize>) = gs_operator(&grid);

    let n_interior: usize = 5 * 7;
    assert_eq!(vals.len(), 5 * n_interior + (63 - n_interior));

    // 5-point stencil: every entry lies within the band kl = ku = n_r, and off-diagonal
    // couplings come in structurally symmetric pairs between interior nodes
    for k in 0..vals.len() {
        let distance: usize = rows[k].abs_diff(cols[k]);
        assert!(distance == 0 || distance == 1 || distance == 7);
    }

    // Row sums vanish for interior rows: a constant flux has no Δ*
    let mut row_sums: Vec<f64> = vec![0.0; 63];
    for k in 0..vals.len() {
        row_sums[rows[k]] += vals[k];
    }
    for i_z in 1..8 {
        for i_r in 1..6 {
            assert!(row_sums[grid.flat_index(i_z, i_r)].abs() < 1e-9);
        }
    }
}

#[test]
fn test_operator_exact_on_polynomials() {
    // The second order stencil is exact for ψ = R² Z², where Δ*ψ = 2 R²

    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;

    let grid: Grid = Grid::new(0.5, 3.0, -2.0, 2.0, 17, 21).expect("test_operator_exact_on_polynomials: grid");
    let psi: Array2<f64> = grid.mesh_r().mapv(|r| r * r) * grid.mesh_z().mapv(|z| z * z);
    let delta_star_psi: Array2<f64> = apply_gs_operator(&grid, &psi);

    for i_z in 1..20 {
        for i_r in 1..16 {
            let r: f64 = grid.r()[i_r];
            assert_relative_eq!(delta_star_psi[[i_z, i_r]], 2.0 * r * r, max_relative = 1e-9);
        }
    }
}
