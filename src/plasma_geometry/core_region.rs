use super::critical_points::{CriticalPoint, CriticalPoints};
use super::interpolation::interpolate_map;
use crate::error::{EquilibriaError, EquilibriaResult};
use crate::grid::Grid;
use crate::limiter::Limiter;
use log::debug;
use ndarray::{Array1, Array2};
use std::collections::VecDeque;

/// The confined plasma: axis and boundary flux, and the mask of nodes inside the boundary
#[derive(Clone, Debug)]
pub struct CoreRegion {
    pub psi_axis: f64,
    pub psi_boundary: f64,
    /// 1.0 inside the plasma, 0.0 outside; f64 to make multiplication easier, shape = (n_z, n_r)
    pub mask: Array2<f64>,
    /// true when the boundary is set by an X-point, false when limited
    pub diverted: bool,
    /// (R, Z) of the X-point, limiter point or grid-edge node which sets the boundary
    pub bounding_point: (f64, f64),
}

impl CoreRegion {
    /// Normalised flux map, 0 on axis and 1 on the boundary
    pub fn psi_norm(&self, psi: &Array2<f64>) -> Array2<f64> {
        let psi_axis: f64 = self.psi_axis;
        let denominator: f64 = self.psi_boundary - self.psi_axis;
        return psi.mapv(|value| (value - psi_axis) / denominator);
    }
}

/// Find the plasma boundary and core mask
///
/// The boundary flux is set by whichever X-point or limiter point is reached first
/// moving out from the axis in flux. With neither, the innermost grid-edge value is used.
///
/// # Errors
/// * `EquilibriaError::NoOPoint` if there is no magnetic axis
/// * `EquilibriaError::NoFluxSurface` if no flux value encloses the axis
pub fn find_core_region(grid: &Grid, psi: &Array2<f64>, critical_points: &CriticalPoints, limiter: Option<&Limiter>) -> EquilibriaResult<CoreRegion> {
    let o_point: CriticalPoint = critical_points.primary_o_point().ok_or(EquilibriaError::NoOPoint)?;
    let psi_axis: f64 = o_point.psi;

    // Flux increases or decreases away from the axis; `depth` is positive moving outwards
    let edge_nodes: Vec<(usize, usize)> = grid.edge_nodes();
    let edge_mean: f64 = edge_nodes.iter().map(|&(i_z, i_r)| psi[[i_z, i_r]]).sum::<f64>() / (edge_nodes.len() as f64);
    let sign: f64 = if psi_axis >= edge_mean { 1.0 } else { -1.0 };
    let depth = |value: f64| sign * (psi_axis - value);

    // Candidate (flux, location, diverted) triples for the boundary
    let mut candidates: Vec<(f64, (f64, f64), bool)> = Vec::new();
    for x_point in critical_points.x_points().iter() {
        candidates.push((x_point.psi, (x_point.r, x_point.z), true));
    }
    if let Some(limiter) = limiter {
        let psi_limiter: Array1<f64> = interpolate_map(grid, psi, &limiter.x(), &limiter.z())?;
        for (i_point, &value) in psi_limiter.iter().enumerate() {
            if value.is_finite() {
                candidates.push((value, (limiter.x()[i_point], limiter.z()[i_point]), false));
            }
        }
    }
    if candidates.iter().all(|candidate| depth(candidate.0) <= 0.0) {
        for &(i_z, i_r) in edge_nodes.iter() {
            candidates.push((psi[[i_z, i_r]], (grid.r()[i_r], grid.z()[i_z]), false));
        }
    }
    let bounding: Option<(f64, (f64, f64), bool)> = candidates
        .into_iter()
        .filter(|candidate| depth(candidate.0) > 0.0)
        .min_by(|a, b| depth(a.0).total_cmp(&depth(b.0)));
    let (psi_boundary, bounding_point, diverted): (f64, (f64, f64), bool) = bounding.ok_or(EquilibriaError::NoFluxSurface(1.0))?;

    let mask: Array2<f64> = flood_fill_mask(grid, psi, psi_axis, psi_boundary, &o_point, critical_points.x_points(), limiter);
    debug!(
        "find_core_region: psi_axis = {psi_axis:.6e}, psi_boundary = {psi_boundary:.6e}, diverted = {diverted}, n_mask = {}",
        mask.sum()
    );

    return Ok(CoreRegion {
        psi_axis,
        psi_boundary,
        mask,
        diverted,
        bounding_point,
    });
}

/// Flood fill from the magnetic axis over the nodes inside the plasma boundary
///
/// A node is visited when:
/// * its normalised flux is below 1
/// * it lies inside the limiter, when one is given
/// * it lies on the axis side of every X-point, the half-plane through the X-point normal to the X-point to axis line
pub fn flood_fill_mask(
    grid: &Grid,
    psi: &Array2<f64>,
    psi_axis: f64,
    psi_boundary: f64,
    o_point: &CriticalPoint,
    x_points: &[CriticalPoint],
    limiter: Option<&Limiter>,
) -> Array2<f64> {
    let n_r: usize = grid.n_r();
    let n_z: usize = grid.n_z();
    let mut mask: Array2<f64> = Array2::zeros((n_z, n_r));

    let allowed = |i_z: usize, i_r: usize| -> bool {
        let r: f64 = grid.r()[i_r];
        let z: f64 = grid.z()[i_z];
        let psi_n: f64 = (psi[[i_z, i_r]] - psi_axis) / (psi_boundary - psi_axis);
        if !(psi_n < 1.0) {
            return false;
        }
        if let Some(limiter) = limiter {
            if !limiter.contains(r, z) {
                return false;
            }
        }
        for x_point in x_points.iter() {
            let dot: f64 = (r - x_point.r) * (o_point.r - x_point.r) + (z - x_point.z) * (o_point.z - x_point.z);
            if dot < 0.0 {
                return false;
            }
        }
        return true;
    };

    let (i_z_start, i_r_start): (usize, usize) = grid.nearest_node(o_point.r, o_point.z);
    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    queue.push_back((i_z_start, i_r_start));
    mask[[i_z_start, i_r_start]] = 1.0;

    // Directions: right, up, left, down
    let directions: [(isize, isize); 4] = [(0, 1), (1, 0), (0, -1), (-1, 0)];
    while let Some((i_z, i_r)) = queue.pop_front() {
        for &(d_i_z, d_i_r) in directions.iter() {
            let new_i_z: isize = i_z as isize + d_i_z;
            let new_i_r: isize = i_r as isize + d_i_r;
            if new_i_z < 0 || new_i_r < 0 || new_i_z >= n_z as isize || new_i_r >= n_r as isize {
                continue;
            }
            let (new_i_z, new_i_r): (usize, usize) = (new_i_z as usize, new_i_r as usize);
            if mask[[new_i_z, new_i_r]] > 0.0 || grid.is_edge_node(new_i_z, new_i_r) {
                continue;
            }
            if allowed(new_i_z, new_i_r) {
                mask[[new_i_z, new_i_r]] = 1.0;
                queue.push_back((new_i_z, new_i_r));
            }
        }
    }

    return mask;
}

#[test]
fn test_core_region_limited_by_grid_edge() {
    // Lazy loading of packages which are not used anywhere else in the code
    use super::critical_points::find_critical_points;
    use approx::assert_abs_diff_eq;

    let grid: Grid = Grid::new(1.0, 3.0, -1.0, 1.0, 41, 41).expect("test_core_region: grid");
    let psi: Array2<f64> = (grid.mesh_r().mapv(|r| -(r - 2.0).powi(2)) + grid.mesh_z().mapv(|z| -(z * z))).mapv(|x| (x / 0.3).exp());
    let critical_points: CriticalPoints = find_critical_points(&grid, &psi, None, None);
    let core: CoreRegion = find_core_region(&grid, &psi, &critical_points, None).expect("test_core_region: core region");

    assert!(!core.diverted);
    assert_abs_diff_eq!(core.psi_axis, 1.0, epsilon = 1e-3);
    // Innermost edge value is at the middle of each side, one metre from the axis
    assert_abs_diff_eq!(core.psi_boundary, (-1.0_f64 / 0.3).exp(), epsilon = 1e-12);

    let psi_n: Array2<f64> = core.psi_norm(&psi);
    assert_eq!(core.mask[[20, 20]], 1.0);
    assert_eq!(core.mask[[0, 20]], 0.0);
    for ((i_z, i_r), &inside) in core.mask.indexed_iter() {
        if inside > 0.0 {
            assert!(psi_n[[i_z, i_r]] < 1.0);
        }
    }
}

#[test]
fn test_core_region_diverted_and_limited() {
    // Lazy loading of packages which are not used anywhere else in the code
    use super::critical_points::find_critical_points;
    use approx::assert_abs_diff_eq;

    // Axis at (5, 0) with ψ = 1; X-points at (5, ±1) with ψ = 0
    let grid: Grid = Grid::new(3.0, 7.0, -2.0, 2.0, 41, 41).expect("test_core_region_diverted: grid");
    let psi: Array2<f64> = grid.mesh_r().mapv(|r| -(r - 5.0).powi(2)) + grid.mesh_z().mapv(|z| (z * z - 1.0).powi(2));
    let critical_points: CriticalPoints = find_critical_points(&grid, &psi, None, None);

    let core: CoreRegion = find_core_region(&grid, &psi, &critical_points, None).expect("test_core_region_diverted: core region");
    assert!(core.diverted);
    assert_abs_diff_eq!(core.psi_boundary, 0.0, epsilon = 1e-2);
    // Beyond the X-points the flux rises again, but the half-plane test keeps the fill out
    assert_eq!(core.mask[[20, 20]], 1.0);
    assert_eq!(core.mask[[35, 20]], 0.0);
    assert_eq!(core.mask[[5, 20]], 0.0);

    // A limiter touching the plasma inside the separatrix takes over
    let limiter: Limiter = Limiter::new(&Array1::from(vec![4.8, 5.2, 5.2, 4.8]), &Array1::from(vec![-0.5, -0.5, 0.5, 0.5])).expect("limiter");
    let core: CoreRegion = find_core_region(&grid, &psi, &critical_points, Some(&limiter)).expect("test_core_region_diverted: limited");
    assert!(!core.diverted);
    assert!(core.psi_boundary > 0.1);
    assert_eq!(core.mask[[20, 30]], 0.0);
}
