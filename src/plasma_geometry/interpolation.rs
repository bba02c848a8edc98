use crate::error::{EquilibriaError, EquilibriaResult};
use crate::grid::Grid;
use ndarray::{Array1, Array2};
use ndarray_interp::interp2d::Interp2D;

/// Bilinear interpolation of a map over the grid at arbitrary points
///
/// # Arguments
/// * `map` - shape = (n_z, n_r)
/// * `r`, `z` - query points, metre
///
/// # Returns
/// * values at the points; `NaN` for points outside the grid
///
/// # Errors
/// * `EquilibriaError::ArrayLength` if `map` is not (n_z, n_r) or `r` and `z` differ in length
/// * `EquilibriaError::InvalidGrid` if the interpolator cannot be built on the grid axes
pub fn interpolate_map(grid: &Grid, map: &Array2<f64>, r: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
    if map.dim() != (grid.n_z(), grid.n_r()) {
        return Err(EquilibriaError::ArrayLength {
            what: "interpolate_map: map".to_string(),
            expected: grid.n_z() * grid.n_r(),
            found: map.len(),
        });
    }
    if r.len() != z.len() {
        return Err(EquilibriaError::ArrayLength {
            what: "interpolate_map: z".to_string(),
            expected: r.len(),
            found: z.len(),
        });
    }
    let interpolator = Interp2D::builder(map.clone())
        .x(grid.z().clone())
        .y(grid.r().clone())
        .build()
        .map_err(|error| EquilibriaError::InvalidGrid(format!("interpolate_map: {error}")))?;

    let values: Array1<f64> = r
        .iter()
        .zip(z.iter())
        .map(|(&r_point, &z_point)| {
            if !grid.point_inside(r_point, z_point) {
                return f64::NAN;
            }
            return interpolator.interp_scalar(z_point, r_point).unwrap_or(f64::NAN);
        })
        .collect();
    return Ok(values);
}

/// Single-point version of `interpolate_map`; `None` outside the grid
pub fn interpolate_map_at(grid: &Grid, map: &Array2<f64>, r: f64, z: f64) -> EquilibriaResult<Option<f64>> {
    let value: f64 = interpolate_map(grid, map, &Array1::from(vec![r]), &Array1::from(vec![z]))?[0];
    if value.is_nan() {
        return Ok(None);
    }
    return Ok(Some(value));
}

#[test]
fn test_interpolate_map() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    let grid: Grid = Grid::new(1.0, 2.0, -1.0, 1.0, 11, 21).expect("test_interpolate_map: grid");
    // Bilinear interpolation is exact for a + b R + c Z + d R Z
    let map: Array2<f64> = grid.mesh_r().mapv(|r| 1.0 + 2.0 * r) + grid.mesh_z().mapv(|z| -0.5 * z) + grid.mesh_r() * grid.mesh_z();

    let value: f64 = interpolate_map_at(&grid, &map, 1.234, 0.321).expect("test_interpolate_map: map").expect("test_interpolate_map: inside");
    assert_abs_diff_eq!(value, 1.0 + 2.0 * 1.234 - 0.5 * 0.321 + 1.234 * 0.321, epsilon = 1e-12);
    assert!(interpolate_map_at(&grid, &map, 2.5, 0.0).expect("test_interpolate_map: map").is_none());
}

#[test]
fn test_interpolate_map_rejects_wrong_shape() {
    let grid: Grid = Grid::new(1.0, 2.0, -1.0, 1.0, 11, 21).expect("test_interpolate_map_rejects: grid");
    // (n_r, n_z) instead of (n_z, n_r)
    let transposed: Array2<f64> = Array2::zeros((grid.n_r(), grid.n_z()));
    let result: EquilibriaResult<Array1<f64>> = interpolate_map(&grid, &transposed, &Array1::from(vec![1.5]), &Array1::from(vec![0.0]));
    assert!(matches!(result, Err(EquilibriaError::ArrayLength { .. })));

    let map: Array2<f64> = Array2::zeros((grid.n_z(), grid.n_r()));
    let result: EquilibriaResult<Array1<f64>> = interpolate_map(&grid, &map, &Array1::from(vec![1.5, 1.6]), &Array1::from(vec![0.0]));
    assert!(matches!(result, Err(EquilibriaError::ArrayLength { expected: 2, found: 1, .. })));
}
