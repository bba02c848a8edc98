use super::bicubic_interpolator::{BicubicInterpolator, BicubicStationaryPoint, BicubicValueAndDerivatives};
use super::hessian::{StationaryKind, classify_stationary_point};
use crate::constants::PSI_NORM_TOL;
use crate::grid::Grid;
use crate::limiter::Limiter;
use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A stationary point of the flux
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CriticalPoint {
    pub r: f64,
    pub z: f64,
    pub psi: f64,
}

impl CriticalPoint {
    pub fn distance_to(&self, r: f64, z: f64) -> f64 {
        return (self.r - r).hypot(self.z - z);
    }
}

/// O-points and X-points of one flux map
///
/// * `o_points` are sorted by distance to the presumed magnetic axis, so `o_points[0]` is the axis
/// * `x_points` are sorted by distance to the axis; `x_points_by_flux` gives them in order of |ψ_x - ψ_axis|
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CriticalPoints {
    o_points: Vec<CriticalPoint>,
    x_points: Vec<CriticalPoint>,
}

impl CriticalPoints {
    pub fn new(o_points: Vec<CriticalPoint>, x_points: Vec<CriticalPoint>) -> Self {
        return CriticalPoints { o_points, x_points };
    }

    pub fn o_points(&self) -> &[CriticalPoint] {
        return &self.o_points;
    }

    pub fn x_points(&self) -> &[CriticalPoint] {
        return &self.x_points;
    }

    pub fn primary_o_point(&self) -> Option<CriticalPoint> {
        return self.o_points.first().copied();
    }

    pub fn primary_x_point(&self) -> Option<CriticalPoint> {
        return self.x_points.first().copied();
    }

    /// X-points ordered by |ψ_x - ψ_axis|, so the first is the one reached first moving out from the axis in flux
    pub fn x_points_by_flux(&self) -> Vec<CriticalPoint> {
        let mut x_points: Vec<CriticalPoint> = self.x_points.clone();
        if let Some(axis) = self.o_points.first() {
            let psi_axis: f64 = axis.psi;
            x_points.sort_by(|a, b| (a.psi - psi_axis).abs().total_cmp(&(b.psi - psi_axis).abs()));
        }
        return x_points;
    }

    /// The two X-points innermost in flux are at nearly the same flux: |ψ_x1 - ψ_x2| < PSI_NORM_TOL * |ψ_O - ψ_x1|
    pub fn is_double_null(&self) -> bool {
        let x_points: Vec<CriticalPoint> = self.x_points_by_flux();
        let (o_point, x_1, x_2): (&CriticalPoint, &CriticalPoint, &CriticalPoint) = match (self.o_points.first(), x_points.first(), x_points.get(1)) {
            (Some(o_point), Some(x_1), Some(x_2)) => (o_point, x_1, x_2),
            _ => return false,
        };
        return (x_1.psi - x_2.psi).abs() < PSI_NORM_TOL * (o_point.psi - x_1.psi).abs();
    }
}

/// First derivatives and mixed second derivative of a flux map
#[derive(Clone, Debug)]
pub struct PsiGradients {
    pub d_psi_d_r: Array2<f64>,
    pub d_psi_d_z: Array2<f64>,
    pub d2_psi_d_r_d_z: Array2<f64>,
}

/// Finite-difference derivative along one axis: central inside, one-sided at the ends
fn gradient_along(f: &Array2<f64>, axis: usize, spacing: f64) -> Array2<f64> {
    let (n_z, n_r): (usize, usize) = f.dim();
    let n: usize = if axis == 0 { n_z } else { n_r };
    let at = |i_along: usize, i_across: usize| -> f64 {
        if axis == 0 {
            return f[[i_along, i_across]];
        }
        return f[[i_across, i_along]];
    };

    let mut gradient: Array2<f64> = Array2::zeros((n_z, n_r));
    let n_across: usize = if axis == 0 { n_r } else { n_z };
    for i_across in 0..n_across {
        for i_along in 0..n {
            let value: f64 = if i_along == 0 {
                (at(1, i_across) - at(0, i_across)) / spacing
            } else if i_along == n - 1 {
                (at(n - 1, i_across) - at(n - 2, i_across)) / spacing
            } else {
                (at(i_along + 1, i_across) - at(i_along - 1, i_across)) / (2.0 * spacing)
            };
            if axis == 0 {
                gradient[[i_along, i_across]] = value;
            } else {
                gradient[[i_across, i_along]] = value;
            }
        }
    }
    return gradient;
}

/// Finite-difference derivatives of `psi`, shape = (n_z, n_r)
pub fn psi_gradients(grid: &Grid, psi: &Array2<f64>) -> PsiGradients {
    let d_psi_d_r: Array2<f64> = gradient_along(psi, 1, grid.d_r());
    let d_psi_d_z: Array2<f64> = gradient_along(psi, 0, grid.d_z());
    let d2_psi_d_r_d_z: Array2<f64> = gradient_along(&d_psi_d_r, 0, grid.d_z());
    return PsiGradients {
        d_psi_d_r,
        d_psi_d_z,
        d2_psi_d_r_d_z,
    };
}

/// Second derivatives of `psi` along R and Z, shape = (n_z, n_r)
pub fn psi_curvatures(grid: &Grid, psi: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    let gradients: PsiGradients = psi_gradients(grid, psi);
    let d2_psi_d_r2: Array2<f64> = gradient_along(&gradients.d_psi_d_r, 1, grid.d_r());
    let d2_psi_d_z2: Array2<f64> = gradient_along(&gradients.d_psi_d_z, 0, grid.d_z());
    return (d2_psi_d_r2, d2_psi_d_z2);
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    point: CriticalPoint,
    kind: StationaryKind,
    refined: bool,
}

fn changes_sign(values: [f64; 4]) -> bool {
    let min: f64 = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max: f64 = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    return min <= 0.0 && max >= 0.0;
}

/// Refine the stationary point inside the cell with lower-left node (i_z, i_r)
fn refine_in_cell(grid: &Grid, psi: &Array2<f64>, gradients: &PsiGradients, i_z: usize, i_r: usize) -> Candidate {
    let d_r: f64 = grid.d_r();
    let d_z: f64 = grid.d_z();

    // Corner arrays indexed [i_x, i_y] = [along R, along Z]
    let corner = |map: &Array2<f64>| -> Array2<f64> {
        let mut values: Array2<f64> = Array2::zeros((2, 2));
        for i_x in 0..2 {
            for i_y in 0..2 {
                values[(i_x, i_y)] = map[[i_z + i_y, i_r + i_x]];
            }
        }
        return values;
    };
    let f: Array2<f64> = corner(psi);
    let interpolator: BicubicInterpolator = BicubicInterpolator::new(
        d_r,
        d_z,
        &f,
        &corner(&gradients.d_psi_d_r),
        &corner(&gradients.d_psi_d_z),
        &corner(&gradients.d2_psi_d_r_d_z),
    );

    let psi_scale: f64 = f.iter().fold(f64::MIN_POSITIVE, |acc, value| acc.max(value.abs()));
    let stationary: Option<BicubicStationaryPoint> = interpolator.find_stationary_point(0.5, 0.5, 1e-10 * psi_scale, 50);

    let (x, y, derivatives, refined): (f64, f64, BicubicValueAndDerivatives, bool) = match stationary {
        Some(stationary) => (stationary.x, stationary.y, stationary.derivatives, true),
        None => {
            // Fall back on the corner with the smallest gradient
            let mut best: (f64, f64, BicubicValueAndDerivatives) = (0.0, 0.0, interpolator.value_and_derivatives(0.0, 0.0));
            for &(x, y) in [(1.0, 0.0), (0.0, 1.0), (1.0, 1.0)].iter() {
                let trial: BicubicValueAndDerivatives = interpolator.value_and_derivatives(x, y);
                if trial.d_f_d_x.hypot(trial.d_f_d_y) < best.2.d_f_d_x.hypot(best.2.d_f_d_y) {
                    best = (x, y, trial);
                }
            }
            (best.0, best.1, best.2, false)
        }
    };

    let kind: StationaryKind = classify_stationary_point(
        derivatives.d2_f_d_x2 / (d_r * d_r),
        derivatives.d2_f_d_y2 / (d_z * d_z),
        derivatives.d2_f_d_x_d_y / (d_r * d_z),
    );

    return Candidate {
        point: CriticalPoint {
            r: grid.r()[i_r] + x * d_r,
            z: grid.z()[i_z] + y * d_z,
            psi: derivatives.f,
        },
        kind,
        refined,
    };
}

/// Find the O-points and X-points of a flux map
///
/// Cells where both ∂ψ/∂R and ∂ψ/∂Z change sign across the four corners are candidates. Cells touching the
/// grid edge are skipped. Each candidate is refined with Newton's method on a bicubic patch, classified with
/// the Hessian and de-duplicated.
///
/// # Arguments
/// * `grid` - the grid `psi` lives on
/// * `psi` - flux map, shape = (n_z, n_r)
/// * `limiter` - when given, points outside the limiter polygon are discarded
/// * `presumed_axis` - (R, Z) used to order the O-points; the grid centre when `None`
///
/// X-points are ordered by distance to the magnetic axis, or to `presumed_axis` when there is no O-point.
pub fn find_critical_points(grid: &Grid, psi: &Array2<f64>, limiter: Option<&Limiter>, presumed_axis: Option<(f64, f64)>) -> CriticalPoints {
    let n_r: usize = grid.n_r();
    let n_z: usize = grid.n_z();
    let gradients: PsiGradients = psi_gradients(grid, psi);
    let merge_distance: f64 = grid.d_r().hypot(grid.d_z());

    let mut candidates: Vec<Candidate> = Vec::new();
    for i_z in 1..n_z.saturating_sub(2) {
        for i_r in 1..n_r.saturating_sub(2) {
            let corners: [(usize, usize); 4] = [(i_z, i_r), (i_z + 1, i_r), (i_z, i_r + 1), (i_z + 1, i_r + 1)];
            let d_r_corners: [f64; 4] = corners.map(|(j_z, j_r)| gradients.d_psi_d_r[[j_z, j_r]]);
            let d_z_corners: [f64; 4] = corners.map(|(j_z, j_r)| gradients.d_psi_d_z[[j_z, j_r]]);
            if !changes_sign(d_r_corners) || !changes_sign(d_z_corners) {
                continue;
            }

            let candidate: Candidate = refine_in_cell(grid, psi, &gradients, i_z, i_r);
            if candidate.kind == StationaryKind::Degenerate {
                continue;
            }

            // De-duplicate, preferring Newton-refined locations
            let duplicate: Option<usize> = candidates
                .iter()
                .position(|existing| existing.kind == candidate.kind && existing.point.distance_to(candidate.point.r, candidate.point.z) < merge_distance);
            match duplicate {
                Some(i_existing) => {
                    if candidate.refined && !candidates[i_existing].refined {
                        candidates[i_existing] = candidate;
                    }
                }
                None => candidates.push(candidate),
            }
        }
    }

    if let Some(limiter) = limiter {
        candidates.retain(|candidate| limiter.contains(candidate.point.r, candidate.point.z));
    }

    let (axis_r, axis_z): (f64, f64) = presumed_axis.unwrap_or_else(|| grid.centre());
    let mut o_points: Vec<CriticalPoint> = candidates
        .iter()
        .filter(|candidate| candidate.kind == StationaryKind::OPoint)
        .map(|candidate| candidate.point)
        .collect();
    o_points.sort_by(|a, b| a.distance_to(axis_r, axis_z).total_cmp(&b.distance_to(axis_r, axis_z)));

    let mut x_points: Vec<CriticalPoint> = candidates
        .iter()
        .filter(|candidate| candidate.kind == StationaryKind::XPoint)
        .map(|candidate| candidate.point)
        .collect();
    let (centre_r, centre_z): (f64, f64) = o_points.first().map_or((axis_r, axis_z), |axis| (axis.r, axis.z));
    x_points.sort_by(|a, b| a.distance_to(centre_r, centre_z).total_cmp(&b.distance_to(centre_r, centre_z)));

    debug!("find_critical_points: {} O-points, {} X-points", o_points.len(), x_points.len());
    return CriticalPoints { o_points, x_points };
}

#[test]
fn test_single_o_point_at_gaussian_peak() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    let grid: Grid = Grid::new(1.0, 3.0, -1.0, 1.0, 41, 41).expect("test_single_o_point: grid");
    let (r_c, z_c): (f64, f64) = (2.03, 0.12);
    let psi: Array2<f64> = (grid.mesh_r().mapv(|r| -(r - r_c).powi(2)) + grid.mesh_z().mapv(|z| -(z - z_c).powi(2))).mapv(|x| (x / 0.2).exp());

    let critical_points: CriticalPoints = find_critical_points(&grid, &psi, None, None);
    assert_eq!(critical_points.o_points().len(), 1);
    assert_eq!(critical_points.x_points().len(), 0);

    let o_point: CriticalPoint = critical_points.primary_o_point().expect("test_single_o_point: O-point");
    assert_abs_diff_eq!(o_point.r, r_c, epsilon = 0.1 * grid.d_r());
    assert_abs_diff_eq!(o_point.z, z_c, epsilon = 0.1 * grid.d_z());
    assert_abs_diff_eq!(o_point.psi, 1.0, epsilon = 1e-3);
}

#[test]
fn test_x_point_of_saddle() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    let grid: Grid = Grid::new(3.0, 7.0, -2.0, 2.0, 33, 33).expect("test_x_point_of_saddle: grid");
    let psi: Array2<f64> = grid.mesh_r().mapv(|r| (r - 5.04).powi(2)) - grid.mesh_z().mapv(|z| (z - 0.3).powi(2));

    let critical_points: CriticalPoints = find_critical_points(&grid, &psi, None, None);
    assert_eq!(critical_points.o_points().len(), 0);
    assert_eq!(critical_points.x_points().len(), 1);
    let x_point: CriticalPoint = critical_points.x_points()[0];
    assert_abs_diff_eq!(x_point.r, 5.04, epsilon = 1e-6);
    assert_abs_diff_eq!(x_point.z, 0.3, epsilon = 1e-6);
}

#[test]
fn test_double_null_and_limiter_filter() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    // ψ = -(R - 5)^2 + (Z^2 - 1)^2 has a maximum at (5, 0) and saddles at (5, ±1) with equal flux
    let grid: Grid = Grid::new(3.0, 7.0, -2.0, 2.0, 41, 41).expect("test_double_null: grid");
    let psi: Array2<f64> = grid.mesh_r().mapv(|r| -(r - 5.0).powi(2)) + grid.mesh_z().mapv(|z| (z * z - 1.0).powi(2));

    let critical_points: CriticalPoints = find_critical_points(&grid, &psi, None, None);
    assert_eq!(critical_points.o_points().len(), 1);
    assert_eq!(critical_points.x_points().len(), 2);
    assert!(critical_points.is_double_null());
    for x_point in critical_points.x_points() {
        assert_abs_diff_eq!(x_point.z.abs(), 1.0, epsilon = 0.05);
        assert_abs_diff_eq!(x_point.r, 5.0, epsilon = 1e-6);
    }

    // A limiter that excludes the upper X-point
    let limiter: Limiter = Limiter::new(&Array1::from(vec![4.0, 6.0, 6.0, 4.0]), &Array1::from(vec![-1.5, -1.5, 0.5, 0.5])).expect("test_double_null: limiter");
    let critical_points: CriticalPoints = find_critical_points(&grid, &psi, Some(&limiter), None);
    assert_eq!(critical_points.x_points().len(), 1);
    assert!(critical_points.x_points()[0].z < 0.0);
    assert!(!critical_points.is_double_null());
}

#[test]
fn test_x_points_ordered_by_distance_from_axis() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    // Saddles at Z = 0.6 (near, deep: ψ = -0.54) and Z = -1.2 (far, shallow: ψ = -0.3456)
    let grid: Grid = Grid::new(3.0, 7.0, -2.0, 1.5, 41, 36).expect("test_x_points_ordered: grid");
    let shape = |z: f64| -> f64 {
        let k: f64 = if z > 0.0 { 10.0 } else { 1.0 };
        return k * (0.25 * z.powi(4) + 0.2 * z.powi(3) - 0.36 * z * z);
    };
    let psi: Array2<f64> = grid.mesh_r().mapv(|r| -(r - 5.0).powi(2)) + grid.mesh_z().mapv(shape);

    let critical_points: CriticalPoints = find_critical_points(&grid, &psi, None, None);
    assert_eq!(critical_points.o_points().len(), 1);
    assert_eq!(critical_points.x_points().len(), 2);
    assert_abs_diff_eq!(critical_points.x_points()[0].z, 0.6, epsilon = 0.05);
    assert_abs_diff_eq!(critical_points.x_points()[1].z, -1.2, epsilon = 0.05);
    assert_abs_diff_eq!(critical_points.primary_x_point().expect("X-point").z, 0.6, epsilon = 0.05);

    // In flux the far X-point comes first, and the two are well apart
    let by_flux: Vec<CriticalPoint> = critical_points.x_points_by_flux();
    assert_abs_diff_eq!(by_flux[0].z, -1.2, epsilon = 0.05);
    assert!(!critical_points.is_double_null());

    // The plasma boundary is set by the X-point reached first in flux, not the nearest one
    let core: super::core_region::CoreRegion = super::core_region::find_core_region(&grid, &psi, &critical_points, None).expect("test_x_points_ordered: core");
    assert!(core.diverted);
    assert_abs_diff_eq!(core.bounding_point.1, -1.2, epsilon = 0.05);
    assert_abs_diff_eq!(core.psi_boundary, -0.3456, epsilon = 1e-2);
}
