use super::critical_points::{CriticalPoint, CriticalPoints};
use crate::constants::PSI_NORM_TOL;
use crate::error::{EquilibriaError, EquilibriaResult};
use crate::grid::Grid;
use contour::ContourBuilder;
use geo::{Area, Centroid, Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use ndarray::{Array1, Array2};

const PI: f64 = std::f64::consts::PI;

/// Normalised flux of the last closed flux surface, kept just inside the separatrix
pub const LCFS_PSI_NORM: f64 = 1.0 - 1e-3;

/// An ordered (R, Z) path; closed surfaces repeat the first point at the end
#[derive(Clone, Debug, PartialEq)]
pub struct FluxSurface {
    r: Array1<f64>,
    z: Array1<f64>,
}

/// Shape parameters of a closed flux surface
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FluxSurfaceGeometry {
    /// Geometric major radius, metre
    pub r_0: f64,
    /// Minor radius, metre
    pub minor_radius: f64,
    pub aspect_ratio: f64,
    pub kappa: f64,
    pub kappa_upper: f64,
    pub kappa_lower: f64,
    pub delta: f64,
    pub delta_upper: f64,
    pub delta_lower: f64,
    /// Poloidal cross-section, metre^2
    pub area: f64,
    /// metre^3
    pub volume: f64,
}

impl FluxSurface {
    pub fn new(r: Array1<f64>, z: Array1<f64>) -> Self {
        return FluxSurface { r, z };
    }

    pub fn r(&self) -> &Array1<f64> {
        return &self.r;
    }

    pub fn z(&self) -> &Array1<f64> {
        return &self.z;
    }

    pub fn n_points(&self) -> usize {
        return self.r.len();
    }

    pub fn polygon(&self) -> Polygon {
        let coordinates: Vec<Coord<f64>> = self.r.iter().zip(self.z.iter()).map(|(&x, &y)| Coord { x, y }).collect();
        return Polygon::new(LineString::from(coordinates), vec![]);
    }

    pub fn area(&self) -> f64 {
        return self.polygon().unsigned_area();
    }

    /// Volume of revolution, Pappus' theorem with the area centroid
    pub fn volume(&self) -> f64 {
        let polygon: Polygon = self.polygon();
        let centroid_r: f64 = polygon.centroid().map(|point| point.x()).unwrap_or(f64::NAN);
        return 2.0 * PI * centroid_r * polygon.unsigned_area();
    }

    /// Outboard crossing of the horizontal line Z = `z_axis`, to the right of `r_axis`
    pub fn outboard_midplane(&self, r_axis: f64, z_axis: f64) -> Option<(f64, f64)> {
        let mut crossing: Option<(f64, f64)> = None;
        for i_point in 0..self.n_points().saturating_sub(1) {
            let (r_1, z_1): (f64, f64) = (self.r[i_point], self.z[i_point]);
            let (r_2, z_2): (f64, f64) = (self.r[i_point + 1], self.z[i_point + 1]);
            if (z_1 - z_axis) * (z_2 - z_axis) > 0.0 || z_1 == z_2 {
                continue;
            }
            let r_cross: f64 = r_1 + (z_axis - z_1) * (r_2 - r_1) / (z_2 - z_1);
            if r_cross > r_axis && crossing.is_none_or(|(r_best, _)| r_cross > r_best) {
                crossing = Some((r_cross, z_axis));
            }
        }
        return crossing;
    }

    /// Shape parameters
    ///
    /// Upper and lower elongation are measured from the height of the inboard and outboard extremes,
    /// triangularities from the geometric major radius.
    pub fn geometry(&self) -> FluxSurfaceGeometry {
        let fold_extreme = |values: &Array1<f64>, better: fn(f64, f64) -> bool| -> usize {
            let mut i_best: usize = 0;
            for (i_point, &value) in values.iter().enumerate() {
                if better(value, values[i_best]) {
                    i_best = i_point;
                }
            }
            return i_best;
        };
        let i_r_max: usize = fold_extreme(&self.r, |a, b| a > b);
        let i_r_min: usize = fold_extreme(&self.r, |a, b| a < b);
        let i_z_max: usize = fold_extreme(&self.z, |a, b| a > b);
        let i_z_min: usize = fold_extreme(&self.z, |a, b| a < b);

        let r_max: f64 = self.r[i_r_max];
        let r_min: f64 = self.r[i_r_min];
        let z_max: f64 = self.z[i_z_max];
        let z_min: f64 = self.z[i_z_min];

        let r_0: f64 = 0.5 * (r_max + r_min);
        let minor_radius: f64 = 0.5 * (r_max - r_min);
        let z_mid: f64 = 0.5 * (self.z[i_r_max] + self.z[i_r_min]);

        let kappa_upper: f64 = (z_max - z_mid) / minor_radius;
        let kappa_lower: f64 = (z_mid - z_min) / minor_radius;
        let delta_upper: f64 = (r_0 - self.r[i_z_max]) / minor_radius;
        let delta_lower: f64 = (r_0 - self.r[i_z_min]) / minor_radius;

        return FluxSurfaceGeometry {
            r_0,
            minor_radius,
            aspect_ratio: r_0 / minor_radius,
            kappa: (z_max - z_min) / (2.0 * minor_radius),
            kappa_upper,
            kappa_lower,
            delta: 0.5 * (delta_upper + delta_lower),
            delta_upper,
            delta_lower,
            area: self.area(),
            volume: self.volume(),
        };
    }
}

/// Move a requested normalised flux off the axis and the boundary
///
/// Surfaces exactly at ψ_N = 0 (a point) or ψ_N = 1 (through an X-point) cannot be traced,
/// so the value is clamped to [PSI_NORM_TOL, 1 - PSI_NORM_TOL].
///
/// # Errors
/// `EquilibriaError::PsiNormOutOfRange` outside [0, 1]
pub fn nudge_psi_norm(psi_n: f64) -> EquilibriaResult<f64> {
    if !(0.0..=1.0).contains(&psi_n) {
        return Err(EquilibriaError::PsiNormOutOfRange(psi_n));
    }
    return Ok(psi_n.clamp(PSI_NORM_TOL, 1.0 - PSI_NORM_TOL));
}

/// ψ_N with the private flux beyond each X-point folded above 1
///
/// Nodes on the far side of the half-plane through an X-point, normal to the X-point to axis line, take
/// 1 + |ψ_N - 1|. Regions below ψ_N = 1 then cannot leak past an X-point, while ψ_N = 1 itself is unchanged.
fn fold_private_flux(grid: &Grid, psi_norm: &Array2<f64>, o_point: &CriticalPoint, x_points: &[CriticalPoint]) -> Array2<f64> {
    let mut folded: Array2<f64> = psi_norm.clone();
    for ((i_z, i_r), value) in folded.indexed_iter_mut() {
        let r: f64 = grid.r()[i_r];
        let z: f64 = grid.z()[i_z];
        let beyond: bool = x_points
            .iter()
            .any(|x_point| (r - x_point.r) * (o_point.r - x_point.r) + (z - x_point.z) * (o_point.z - x_point.z) < 0.0);
        if beyond {
            *value = 1.0 + (*value - 1.0).abs();
        }
    }
    return folded;
}

/// Regions with ψ_N <= `psi_n_level`
fn psi_norm_regions(grid: &Grid, psi_norm: &Array2<f64>, psi_n_level: f64) -> EquilibriaResult<MultiPolygon> {
    let d_r: f64 = grid.d_r();
    let d_z: f64 = grid.d_z();
    let contour_grid: ContourBuilder = ContourBuilder::new(grid.n_r(), grid.n_z(), true) // x dim., y dim., smoothing
        .x_step(d_r)
        .y_step(d_z)
        .x_origin(grid.r_min() - d_r / 2.0)
        .y_origin(grid.z_min() - d_z / 2.0);

    // The builder returns regions above the threshold, so contour -ψ_N
    let values: Vec<f64> = psi_norm.iter().map(|&value| if value.is_finite() { -value } else { -1e10 }).collect();
    let contours: Vec<contour::Contour> = contour_grid
        .contours(&values, &[-psi_n_level])
        .map_err(|_| EquilibriaError::NoFluxSurface(psi_n_level))?;
    let regions: MultiPolygon = contours.into_iter().next().ok_or(EquilibriaError::NoFluxSurface(psi_n_level))?.geometry().clone();
    return Ok(regions);
}

/// Trace the closed flux surface at `psi_n_level` around the magnetic axis
///
/// The surface is the outline of the region ψ_N <= `psi_n_level` containing the axis, kept on the axis side of every X-point.
///
/// # Errors
/// * `EquilibriaError::NoOPoint` without a magnetic axis
/// * `EquilibriaError::NoFluxSurface` if no contour at this level encloses the axis
pub fn find_flux_surface(grid: &Grid, psi_norm: &Array2<f64>, psi_n_level: f64, critical_points: &CriticalPoints) -> EquilibriaResult<FluxSurface> {
    let o_point: CriticalPoint = critical_points.primary_o_point().ok_or(EquilibriaError::NoOPoint)?;
    let folded: Array2<f64> = fold_private_flux(grid, psi_norm, &o_point, critical_points.x_points());
    let regions: MultiPolygon = psi_norm_regions(grid, &folded, psi_n_level)?;
    let axis: Point = Point::new(o_point.r, o_point.z);
    for polygon in regions.iter() {
        if polygon.contains(&axis) {
            let r: Array1<f64> = polygon.exterior().coords().map(|coord| coord.x).collect();
            let z: Array1<f64> = polygon.exterior().coords().map(|coord| coord.y).collect();
            return Ok(FluxSurface::new(r, z));
        }
    }
    return Err(EquilibriaError::NoFluxSurface(psi_n_level));
}

/// Trace the separatrix, the ψ_N = 1 surface through the X-point(s)
///
/// * single null, or limited: one closed loop
/// * double null: the loop is split at the two X-points innermost in flux into the inboard half followed by the outboard half
pub fn find_separatrix(grid: &Grid, psi_norm: &Array2<f64>, critical_points: &CriticalPoints) -> EquilibriaResult<Vec<FluxSurface>> {
    // Just outside ψ_N = 1, so the loop runs through the X-points instead of pinching off before them
    let loop_surface: FluxSurface = find_flux_surface(grid, psi_norm, 1.0 + 1e-3, critical_points)?;
    let x_points: Vec<CriticalPoint> = critical_points.x_points_by_flux();
    if !critical_points.is_double_null() || x_points.len() < 2 {
        return Ok(vec![loop_surface]);
    }

    // Points nearest the two X-points; drop the repeated closing point before splitting
    let n_open: usize = loop_surface.n_points() - 1;
    let nearest = |x_point: &CriticalPoint| -> usize {
        let mut i_best: usize = 0;
        for i_point in 0..n_open {
            if x_point.distance_to(loop_surface.r()[i_point], loop_surface.z()[i_point])
                < x_point.distance_to(loop_surface.r()[i_best], loop_surface.z()[i_best])
            {
                i_best = i_point;
            }
        }
        return i_best;
    };
    let i_start: usize = nearest(&x_points[0]);
    let i_end: usize = nearest(&x_points[1]);

    let arc = |from: usize, to: usize| -> FluxSurface {
        let mut indices: Vec<usize> = Vec::new();
        let mut i_point: usize = from;
        loop {
            indices.push(i_point);
            if i_point == to {
                break;
            }
            i_point = (i_point + 1) % n_open;
        }
        let r: Array1<f64> = indices.iter().map(|&i| loop_surface.r()[i]).collect();
        let z: Array1<f64> = indices.iter().map(|&i| loop_surface.z()[i]).collect();
        return FluxSurface::new(r, z);
    };
    let half_1: FluxSurface = arc(i_start, i_end);
    let half_2: FluxSurface = arc(i_end, i_start);

    let mean_r = |surface: &FluxSurface| surface.r().mean().unwrap_or(f64::NAN);
    if mean_r(&half_1) <= mean_r(&half_2) {
        return Ok(vec![half_1, half_2]);
    }
    return Ok(vec![half_2, half_1]);
}

#[cfg(test)]
fn elliptic_psi_norm(grid: &Grid, r_c: f64, a: f64, kappa: f64) -> Array2<f64> {
    return grid.mesh_r().mapv(|r| ((r - r_c) / a).powi(2)) + grid.mesh_z().mapv(|z| (z / (kappa * a)).powi(2));
}

#[test]
fn test_flux_surface_geometry_of_ellipse() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;

    let grid: Grid = Grid::new(3.0, 7.0, -3.0, 3.0, 129, 193).expect("test_flux_surface_geometry: grid");
    let psi_norm: Array2<f64> = elliptic_psi_norm(&grid, 5.0, 1.0, 1.5);
    let axis: CriticalPoints = CriticalPoints::new(vec![CriticalPoint { r: 5.0, z: 0.0, psi: 0.0 }], Vec::new());

    // ψ_N = 0.25 is the ellipse with semi-axes 0.5 and 0.75
    let surface: FluxSurface = find_flux_surface(&grid, &psi_norm, 0.25, &axis).expect("test_flux_surface_geometry: surface");
    let geometry: FluxSurfaceGeometry = surface.geometry();
    assert_relative_eq!(geometry.r_0, 5.0, max_relative = 1e-3);
    assert_relative_eq!(geometry.minor_radius, 0.5, max_relative = 1e-2);
    assert_relative_eq!(geometry.kappa, 1.5, max_relative = 2e-2);
    assert!(geometry.delta.abs() < 0.1);
    assert_relative_eq!(geometry.area, PI * 0.5 * 0.75, max_relative = 1e-2);
    assert_relative_eq!(geometry.volume, 2.0 * PI * 5.0 * PI * 0.5 * 0.75, max_relative = 1e-2);

    let (r_mid, _z_mid): (f64, f64) = surface.outboard_midplane(5.0, 0.0).expect("test_flux_surface_geometry: midplane");
    assert_relative_eq!(r_mid, 5.5, max_relative = 1e-3);
}

#[test]
fn test_psi_norm_nudge_is_continuous() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;

    assert!(nudge_psi_norm(-0.1).is_err());
    assert!(nudge_psi_norm(1.1).is_err());
    assert_eq!(nudge_psi_norm(0.0).expect("0"), PSI_NORM_TOL);
    assert_eq!(nudge_psi_norm(1.0).expect("1"), 1.0 - PSI_NORM_TOL);

    let grid: Grid = Grid::new(3.0, 7.0, -3.0, 3.0, 65, 97).expect("test_psi_norm_nudge: grid");
    let psi_norm: Array2<f64> = elliptic_psi_norm(&grid, 5.0, 1.5, 1.3);
    let axis: CriticalPoints = CriticalPoints::new(vec![CriticalPoint { r: 5.0, z: 0.0, psi: 0.0 }], Vec::new());

    let minor_radius_at = |psi_n: f64| -> f64 {
        let level: f64 = nudge_psi_norm(psi_n).expect("nudge");
        return find_flux_surface(&grid, &psi_norm, level, &axis).expect("surface").geometry().minor_radius;
    };
    assert_eq!(minor_radius_at(1.0), minor_radius_at(1.0 - PSI_NORM_TOL));

    // Minor radius grows smoothly as sqrt(ψ_N)
    let mut previous: f64 = 0.0;
    for &psi_n in [0.1, 0.3, 0.5, 0.7, 0.9].iter() {
        let minor_radius: f64 = minor_radius_at(psi_n);
        assert!(minor_radius > previous);
        assert_relative_eq!(minor_radius, 1.5 * psi_n.sqrt(), max_relative = 2e-2);
        previous = minor_radius;
    }
}

#[cfg(test)]
fn max_psi_norm_error(surface: &FluxSurface, psi_n_at: impl Fn(f64, f64) -> f64) -> f64 {
    return surface
        .r()
        .iter()
        .zip(surface.z().iter())
        .fold(0.0_f64, |acc, (&r, &z)| acc.max((psi_n_at(r, z) - 1.0).abs()));
}

#[test]
fn test_single_null_separatrix_stays_on_psi_norm_one() {
    // Lazy loading of packages which are not used anywhere else in the code
    use super::core_region::{CoreRegion, find_core_region};
    use super::critical_points::find_critical_points;

    // Axis at (5, 0) with ψ = 0, X-point at (5, -1) with ψ = -1/3; below the X-point the private flux falls away to the grid edge
    let psi_at = |r: f64, z: f64| -> f64 { -(r - 5.0).powi(2) - z * z - 2.0 / 3.0 * z.powi(3) };
    let grid: Grid = Grid::new(3.0, 7.0, -3.0, 2.0, 81, 101).expect("test_single_null_separatrix: grid");
    let psi: Array2<f64> = Array2::from_shape_fn((grid.n_z(), grid.n_r()), |(i_z, i_r)| psi_at(grid.r()[i_r], grid.z()[i_z]));
    let critical_points: CriticalPoints = find_critical_points(&grid, &psi, None, None);
    assert_eq!(critical_points.x_points().len(), 1);
    assert!(!critical_points.is_double_null());
    let core: CoreRegion = find_core_region(&grid, &psi, &critical_points, None).expect("test_single_null_separatrix: core");
    let psi_norm: Array2<f64> = core.psi_norm(&psi);

    let separatrix: Vec<FluxSurface> = find_separatrix(&grid, &psi_norm, &critical_points).expect("test_single_null_separatrix: separatrix");
    assert_eq!(separatrix.len(), 1);
    let psi_n_at = |r: f64, z: f64| (psi_at(r, z) - core.psi_axis) / (core.psi_boundary - core.psi_axis);
    let error: f64 = max_psi_norm_error(&separatrix[0], psi_n_at);
    assert!(error < 1e-2, "separatrix strays to |ψ_N - 1| = {error:.3e}");

    // Closed through the X-point, never reaching the bottom of the grid
    let x_point: CriticalPoint = critical_points.x_points()[0];
    let z_min: f64 = separatrix[0].z().iter().cloned().fold(f64::INFINITY, f64::min);
    assert!((z_min - x_point.z).abs() < 2.0 * grid.d_z());
    assert!(separatrix[0].r().iter().zip(separatrix[0].z().iter()).any(|(&r, &z)| x_point.distance_to(r, z) < 2.0 * grid.d_r()));
}

#[test]
fn test_double_null_separatrix_halves() {
    // Lazy loading of packages which are not used anywhere else in the code
    use super::core_region::{CoreRegion, find_core_region};
    use super::critical_points::find_critical_points;

    // Axis at (5, 0) with ψ = 1, X-points at (5, ±1) with ψ = 0; beyond them ψ rises again towards the grid edge
    let psi_at = |r: f64, z: f64| -> f64 { -(r - 5.0).powi(2) + (z * z - 1.0).powi(2) };
    let grid: Grid = Grid::new(3.0, 7.0, -2.0, 2.0, 81, 81).expect("test_double_null_separatrix: grid");
    let psi: Array2<f64> = Array2::from_shape_fn((grid.n_z(), grid.n_r()), |(i_z, i_r)| psi_at(grid.r()[i_r], grid.z()[i_z]));
    let critical_points: CriticalPoints = find_critical_points(&grid, &psi, None, None);
    assert!(critical_points.is_double_null());
    let core: CoreRegion = find_core_region(&grid, &psi, &critical_points, None).expect("test_double_null_separatrix: core");
    let psi_norm: Array2<f64> = core.psi_norm(&psi);

    let halves: Vec<FluxSurface> = find_separatrix(&grid, &psi_norm, &critical_points).expect("separatrix");
    assert_eq!(halves.len(), 2);
    assert!(halves[0].r().mean().expect("mean") < 5.0);
    assert!(halves[1].r().mean().expect("mean") > 5.0);

    let psi_n_at = |r: f64, z: f64| (psi_at(r, z) - core.psi_axis) / (core.psi_boundary - core.psi_axis);
    for half in halves.iter() {
        let error: f64 = max_psi_norm_error(half, psi_n_at);
        assert!(error < 1e-2, "separatrix half strays to |ψ_N - 1| = {error:.3e}");
        assert!(half.z().iter().all(|z| z.abs() < 1.0 + 2.0 * grid.d_z()));
    }

    // Without the upper X-point the same map is a single loop
    let lower_only: CriticalPoints = CriticalPoints::new(critical_points.o_points().to_vec(), critical_points.x_points().iter().filter(|x_point| x_point.z < 0.0).cloned().collect());
    let single: Vec<FluxSurface> = find_separatrix(&grid, &psi_norm, &lower_only).expect("separatrix");
    assert_eq!(single.len(), 1);
}
