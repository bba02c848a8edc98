use super::shape_functions::{DoublePowerShape, ShapeFunction};
use super::{Profile, masked_psi_norm};
use crate::error::{EquilibriaError, EquilibriaResult};
use crate::grid::Grid;
use crate::plasma_geometry::CoreRegion;
use ndarray::{Array1, Array2};

// Global constants
const MU_0: f64 = physical_constants::VACUUM_MAG_PERMEABILITY;
const PI: f64 = std::f64::consts::PI;

/// Current density constrained by poloidal beta and plasma current
///
/// j_tor = L (β_0 R / R_0 + (1 - β_0) R_0 / R) shape(ψ_N)
///
/// L and β_0 are chosen on every `jtor` call so that the plasma carries `i_p` and has poloidal beta `beta_p`.
/// This follows the FreeGS `ConstrainBetapIp` profile.
#[derive(Clone, Debug)]
pub struct BetaIpProfile {
    beta_p: f64,
    i_p: f64,
    r_0: f64,
    b_0: f64,
    shape: Box<dyn ShapeFunction>,
    scale: f64,
    beta_0: f64,
    psi_axis: f64,
    psi_boundary: f64,
}

impl BetaIpProfile {
    /// # Arguments
    /// * `beta_p` - poloidal beta, dimensionless
    /// * `i_p` - plasma current, ampere
    /// * `r_0` - major radius, metre
    /// * `b_0` - vacuum toroidal field at `r_0`, tesla
    /// * `shape` - current shape; `DoublePowerShape::default()` when `None`
    pub fn new(beta_p: f64, i_p: f64, r_0: f64, b_0: f64, shape: Option<Box<dyn ShapeFunction>>) -> Self {
        return BetaIpProfile {
            beta_p,
            i_p,
            r_0,
            b_0,
            shape: shape.unwrap_or_else(|| Box::new(DoublePowerShape::default())),
            scale: 0.0,
            beta_0: 0.0,
            psi_axis: 1.0,
            psi_boundary: 0.0,
        };
    }

    pub fn beta_p(&self) -> f64 {
        return self.beta_p;
    }

    /// (L, β_0) from the last `jtor` evaluation
    pub fn scale_factors(&self) -> (f64, f64) {
        return (self.scale, self.beta_0);
    }
}

impl Profile for BetaIpProfile {
    fn jtor(&mut self, grid: &Grid, psi: &Array2<f64>, core: &CoreRegion) -> EquilibriaResult<Array2<f64>> {
        let d_area: f64 = grid.d_area();
        let r_0: f64 = self.r_0;
        let mesh_r: &Array2<f64> = grid.mesh_r();

        let psi_n: Array2<f64> = masked_psi_norm(psi, core);
        let psi_n_flat: Array1<f64> = psi_n.iter().cloned().collect();
        let shape: Array2<f64> = self
            .shape
            .shape_value(&psi_n_flat)
            .into_shape_with_order(psi_n.raw_dim())
            .expect("BetaIpProfile::jtor: shape has the grid shape")
            * &core.mask;
        let shape_integral: Array2<f64> = self
            .shape
            .shape_integral(&psi_n_flat)
            .into_shape_with_order(psi_n.raw_dim())
            .expect("BetaIpProfile::jtor: shape integral has the grid shape")
            * &core.mask;

        // Pressure integral over the plasma cross-section, without the L β_0 / R_0 factor
        let pressure_integral: f64 = (core.psi_axis - core.psi_boundary) * shape_integral.sum() * d_area;
        let i_outer: f64 = (&shape * mesh_r).sum() * d_area / r_0;
        let i_inner: f64 = (&shape / mesh_r).sum() * d_area * r_0;
        if pressure_integral == 0.0 || i_inner == 0.0 {
            return Err(EquilibriaError::ProfileDegenerate(format!(
                "BetaIpProfile: no current-carrying plasma (pressure integral = {pressure_integral:.3e})"
            )));
        }

        // β_p = (8 π / μ_0) ∫ p dA / I_p^2 with p = (L β_0 / R_0) (ψ_a - ψ_b) ∫ shape
        let l_beta_0: f64 = self.beta_p * MU_0 * self.i_p.powi(2) * r_0 / (8.0 * PI * pressure_integral);
        let scale: f64 = self.i_p / i_inner - l_beta_0 * (i_outer / i_inner - 1.0);
        let beta_0: f64 = l_beta_0 / scale;

        self.scale = scale;
        self.beta_0 = beta_0;
        self.psi_axis = core.psi_axis;
        self.psi_boundary = core.psi_boundary;

        let jtor: Array2<f64> = scale * (beta_0 * mesh_r / r_0 + (1.0 - beta_0) * r_0 / mesh_r) * &shape;
        return Ok(jtor);
    }

    fn pprime(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        return self.scale * self.beta_0 / self.r_0 * self.shape.shape_value(psi_n);
    }

    fn ffprime(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        return MU_0 * self.scale * (1.0 - self.beta_0) * self.r_0 * self.shape.shape_value(psi_n);
    }

    fn flux_normalisation(&self) -> (f64, f64) {
        return (self.psi_axis, self.psi_boundary);
    }

    fn pressure(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        let factor: f64 = self.scale * self.beta_0 / self.r_0 * (self.psi_axis - self.psi_boundary);
        return factor * self.shape.shape_integral(psi_n);
    }

    fn fpol(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        let fvac: f64 = self.fvac();
        let factor: f64 = 2.0 * MU_0 * self.scale * (1.0 - self.beta_0) * self.r_0 * (self.psi_axis - self.psi_boundary);
        return self.shape.shape_integral(psi_n).mapv(|integral| (fvac * fvac + factor * integral).max(0.0).sqrt() * fvac.signum());
    }

    fn r_0(&self) -> f64 {
        return self.r_0;
    }

    fn b_0(&self) -> f64 {
        return self.b_0;
    }

    fn i_p(&self) -> f64 {
        return self.i_p;
    }

    fn shape(&self) -> Option<&dyn ShapeFunction> {
        return Some(self.shape.as_ref());
    }

    fn shape_mut(&mut self) -> Option<&mut dyn ShapeFunction> {
        return Some(self.shape.as_mut());
    }

    fn clone_box(&self) -> Box<dyn Profile> {
        return Box::new(self.clone());
    }
}

#[cfg(test)]
pub(crate) fn gaussian_core(grid: &Grid) -> (Array2<f64>, CoreRegion) {
    use crate::plasma_geometry::{CriticalPoints, find_core_region, find_critical_points};

    let (r_c, z_c): (f64, f64) = grid.centre();
    let psi: Array2<f64> = (grid.mesh_r().mapv(|r| -(r - r_c).powi(2)) + grid.mesh_z().mapv(|z| -(z - z_c).powi(2))).mapv(|x| (x / 0.5).exp());
    let critical_points: CriticalPoints = find_critical_points(grid, &psi, None, None);
    let core: CoreRegion = find_core_region(grid, &psi, &critical_points, None).expect("gaussian_core: core region");
    return (psi, core);
}

#[test]
fn test_beta_ip_profile_normalisation() {
    // The current density integrates to I_p and the pressure integral reproduces β_p

    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;

    let grid: Grid = Grid::new(4.0, 8.0, -2.0, 2.0, 65, 65).expect("test_beta_ip_profile: grid");
    let (psi, core): (Array2<f64>, CoreRegion) = gaussian_core(&grid);

    let i_p: f64 = 2e6;
    let beta_p: f64 = 0.4;
    let mut profile: BetaIpProfile = BetaIpProfile::new(beta_p, i_p, 6.0, 3.0, None);
    let jtor: Array2<f64> = profile.jtor(&grid, &psi, &core).expect("test_beta_ip_profile: jtor");
    assert_relative_eq!(jtor.sum() * grid.d_area(), i_p, max_relative = 1e-10);
    assert!(jtor.iter().all(|&j| j >= 0.0));

    // Pressure map integrated over the plasma
    let psi_n: Array2<f64> = masked_psi_norm(&psi, &core);
    let pressure: Array1<f64> = profile.pressure(&psi_n.iter().cloned().collect());
    let pressure_integral: f64 = pressure.iter().zip(core.mask.iter()).map(|(&p, &inside)| p * inside).sum::<f64>() * grid.d_area();
    assert_relative_eq!(8.0 * PI * pressure_integral / (MU_0 * i_p * i_p), beta_p, max_relative = 1e-10);

    // Vacuum field at the boundary, paramagnetic or diamagnetic inside
    let fpol: Array1<f64> = profile.fpol(&Array1::from(vec![1.0]));
    assert_relative_eq!(fpol[0], 18.0, max_relative = 1e-12);
}

#[test]
fn test_beta_ip_profile_pressure_matches_generic_integral() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;
    use super::PolynomialShape;

    let grid: Grid = Grid::new(4.0, 8.0, -2.0, 2.0, 33, 33).expect("test_beta_ip_profile_pressure: grid");
    let (psi, core): (Array2<f64>, CoreRegion) = gaussian_core(&grid);
    let shape: Box<dyn ShapeFunction> = Box::new(PolynomialShape::new(Array1::from(vec![1.0, 0.5])));
    let mut profile: BetaIpProfile = BetaIpProfile::new(0.6, 1e6, 6.0, 2.0, Some(shape));
    profile.jtor(&grid, &psi, &core).expect("test_beta_ip_profile_pressure: jtor");

    // The analytic override must agree with integrating p' numerically
    let psi_n: Array1<f64> = Array1::from(vec![0.0, 0.25, 0.5, 0.9]);
    let analytic: Array1<f64> = profile.pressure(&psi_n);
    let (psi_axis, psi_boundary): (f64, f64) = profile.flux_normalisation();
    for (i_psi, &x) in psi_n.iter().enumerate() {
        let numeric: f64 = (psi_axis - psi_boundary) * super::integrate_to_edge(|t| profile.pprime(&Array1::from(vec![t]))[0], x);
        assert_relative_eq!(analytic[i_psi], numeric, max_relative = 1e-8);
    }
}
