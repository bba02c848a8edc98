use crate::error::{EquilibriaError, EquilibriaResult};
use geo::{Coord, IsConvex, LineString, Polygon};
use ndarray::Array1;

/// Map between a convex region in (x, z) and the unit square
///
/// For (l_0, l_1) in [0, 1]^2:
/// * z = z_min + l_1 (z_max - z_min)
/// * x = x_lo(z) + l_0 (x_hi(z) - x_lo(z)), where x_lo and x_hi are the region edges at height z
///
/// Every point of the unit square maps inside the region, so a bounded optimiser cannot leave it.
#[derive(Clone, Debug)]
pub struct RegionInterpolator {
    x: Vec<f64>,
    z: Vec<f64>,
    z_min: f64,
    z_max: f64,
}

impl RegionInterpolator {
    /// # Errors
    /// `EquilibriaError::InvalidRegion` if the polygon has fewer than three points, no height, or is not convex
    pub fn new(x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Self> {
        if x.len() != z.len() || x.len() < 3 {
            return Err(EquilibriaError::InvalidRegion(format!("need at least three (x, z) pairs, got {} x and {} z", x.len(), z.len())));
        }

        let coords: Vec<Coord<f64>> = x.iter().zip(z.iter()).map(|(&x, &z)| Coord { x, y: z }).collect();
        let polygon: Polygon<f64> = Polygon::new(LineString::from(coords), vec![]);
        if !polygon.exterior().is_convex() {
            return Err(EquilibriaError::InvalidRegion("region is not convex".to_string()));
        }

        let z_min: f64 = z.iter().cloned().fold(f64::INFINITY, f64::min);
        let z_max: f64 = z.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !(z_max > z_min) {
            return Err(EquilibriaError::InvalidRegion("region has no vertical extent".to_string()));
        }

        return Ok(RegionInterpolator {
            x: x.to_vec(),
            z: z.to_vec(),
            z_min,
            z_max,
        });
    }

    /// Horizontal extent of the region at height `z`
    fn x_range(&self, z: f64) -> (f64, f64) {
        let z: f64 = z.clamp(self.z_min, self.z_max);
        let n_points: usize = self.x.len();
        let mut x_lo: f64 = f64::INFINITY;
        let mut x_hi: f64 = f64::NEG_INFINITY;
        for i_point in 0..n_points {
            let (x_1, z_1): (f64, f64) = (self.x[i_point], self.z[i_point]);
            let (x_2, z_2): (f64, f64) = (self.x[(i_point + 1) % n_points], self.z[(i_point + 1) % n_points]);
            if (z - z_1) * (z - z_2) > 0.0 {
                continue;
            }
            if z_1 == z_2 {
                x_lo = x_lo.min(x_1.min(x_2));
                x_hi = x_hi.max(x_1.max(x_2));
            } else {
                let x_cross: f64 = x_1 + (z - z_1) / (z_2 - z_1) * (x_2 - x_1);
                x_lo = x_lo.min(x_cross);
                x_hi = x_hi.max(x_cross);
            }
        }
        return (x_lo, x_hi);
    }

    /// (l_0, l_1) -> (x, z)
    pub fn to_xz(&self, l_0: f64, l_1: f64) -> (f64, f64) {
        let z: f64 = self.z_min + l_1.clamp(0.0, 1.0) * (self.z_max - self.z_min);
        let (x_lo, x_hi): (f64, f64) = self.x_range(z);
        let x: f64 = x_lo + l_0.clamp(0.0, 1.0) * (x_hi - x_lo);
        return (x, z);
    }

    /// (x, z) -> (l_0, l_1); points outside the region are clamped to its edge
    pub fn to_l(&self, x: f64, z: f64) -> (f64, f64) {
        let l_1: f64 = ((z - self.z_min) / (self.z_max - self.z_min)).clamp(0.0, 1.0);
        let z_clamped: f64 = self.z_min + l_1 * (self.z_max - self.z_min);
        let (x_lo, x_hi): (f64, f64) = self.x_range(z_clamped);
        let l_0: f64 = if x_hi > x_lo { ((x - x_lo) / (x_hi - x_lo)).clamp(0.0, 1.0) } else { 0.5 };
        return (l_0, l_1);
    }
}

/// Position parameterisation for a set of named coils, one convex region per coil
///
/// The mapped vector is [l_0 of every coil..., l_1 of every coil...], in coil order.
#[derive(Clone, Debug)]
pub struct PositionMapper {
    names: Vec<String>,
    interpolators: Vec<RegionInterpolator>,
}

impl PositionMapper {
    pub fn new(regions: Vec<(String, RegionInterpolator)>) -> Self {
        let (names, interpolators): (Vec<String>, Vec<RegionInterpolator>) = regions.into_iter().unzip();
        return PositionMapper { names, interpolators };
    }

    /// Names of the coils whose positions are mapped
    pub fn names(&self) -> &[String] {
        return &self.names;
    }

    /// Length of the mapped vector
    pub fn dimension(&self) -> usize {
        return 2 * self.names.len();
    }

    /// Coil positions to the mapped vector
    pub fn to_l(&self, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
        let n_coils: usize = self.names.len();
        if x.len() != n_coils || z.len() != n_coils {
            return Err(EquilibriaError::ArrayLength {
                what: "PositionMapper::to_l".to_string(),
                expected: n_coils,
                found: x.len().min(z.len()),
            });
        }
        let mut mapped: Array1<f64> = Array1::zeros(2 * n_coils);
        for (i_coil, interpolator) in self.interpolators.iter().enumerate() {
            let (l_0, l_1): (f64, f64) = interpolator.to_l(x[i_coil], z[i_coil]);
            mapped[i_coil] = l_0;
            mapped[n_coils + i_coil] = l_1;
        }
        return Ok(mapped);
    }

    /// Mapped vector to coil positions, (x, z)
    pub fn to_xz(&self, mapped: &Array1<f64>) -> EquilibriaResult<(Array1<f64>, Array1<f64>)> {
        let n_coils: usize = self.names.len();
        if mapped.len() != 2 * n_coils {
            return Err(EquilibriaError::ArrayLength {
                what: "PositionMapper::to_xz".to_string(),
                expected: 2 * n_coils,
                found: mapped.len(),
            });
        }
        let mut x: Array1<f64> = Array1::zeros(n_coils);
        let mut z: Array1<f64> = Array1::zeros(n_coils);
        for (i_coil, interpolator) in self.interpolators.iter().enumerate() {
            let (x_coil, z_coil): (f64, f64) = interpolator.to_xz(mapped[i_coil], mapped[n_coils + i_coil]);
            x[i_coil] = x_coil;
            z[i_coil] = z_coil;
        }
        return Ok((x, z));
    }
}

#[test]
fn test_region_interpolator_maps_inside() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    // A trapezoid, wider at the bottom
    let x: Array1<f64> = Array1::from(vec![10.0, 14.0, 13.0, 11.0]);
    let z: Array1<f64> = Array1::from(vec![-2.0, -2.0, 2.0, 2.0]);
    let region: RegionInterpolator = RegionInterpolator::new(&x, &z).expect("region");

    assert_eq!(region.to_xz(0.0, 0.0), (10.0, -2.0));
    assert_eq!(region.to_xz(1.0, 1.0), (13.0, 2.0));
    let (x_mid, z_mid): (f64, f64) = region.to_xz(0.5, 0.5);
    assert_abs_diff_eq!(x_mid, 12.0, epsilon = 1e-12);
    assert_abs_diff_eq!(z_mid, 0.0, epsilon = 1e-12);

    // Inverse at an interior point
    let (l_0, l_1): (f64, f64) = region.to_l(12.5, 1.0);
    let (x_back, z_back): (f64, f64) = region.to_xz(l_0, l_1);
    assert_abs_diff_eq!(x_back, 12.5, epsilon = 1e-12);
    assert_abs_diff_eq!(z_back, 1.0, epsilon = 1e-12);

    // An L-shape is rejected
    let x: Array1<f64> = Array1::from(vec![0.0, 2.0, 2.0, 1.0, 1.0, 0.0]);
    let z: Array1<f64> = Array1::from(vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
    assert!(matches!(RegionInterpolator::new(&(x + 1.0), &z), Err(EquilibriaError::InvalidRegion(_))));
}

#[test]
fn test_position_mapper_layout() {
    let square: RegionInterpolator =
        RegionInterpolator::new(&Array1::from(vec![4.0, 6.0, 6.0, 4.0]), &Array1::from(vec![7.0, 7.0, 9.0, 9.0])).expect("region");
    let mapper: PositionMapper = PositionMapper::new(vec![("PF_1".to_string(), square.clone()), ("PF_2".to_string(), square)]);
    assert_eq!(mapper.dimension(), 4);

    let mapped: Array1<f64> = mapper.to_l(&Array1::from(vec![4.5, 5.5]), &Array1::from(vec![8.0, 7.5])).expect("to_l");
    assert_eq!(mapped, Array1::from(vec![0.25, 0.75, 0.5, 0.25]));
    let (x, z): (Array1<f64>, Array1<f64>) = mapper.to_xz(&mapped).expect("to_xz");
    assert_eq!(x, Array1::from(vec![4.5, 5.5]));
    assert_eq!(z, Array1::from(vec![8.0, 7.5]));
    assert!(mapper.to_xz(&Array1::zeros(3)).is_err());
}
