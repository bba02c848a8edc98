use super::shape_functions::{N_TABLE, tabulated_integral_to_edge};
use super::{Profile, masked_psi_norm};
use crate::error::{EquilibriaError, EquilibriaResult};
use crate::grid::Grid;
use crate::plasma_geometry::CoreRegion;
use ndarray::{Array1, Array2};
use ndarray_interp::interp1d::Interp1D;

// Global constants
const MU_0: f64 = physical_constants::VACUUM_MAG_PERMEABILITY;

/// Profile from tabulated p' and FF' on a uniform normalised flux grid
///
/// j_tor = scale (R p'(ψ_N) + FF'(ψ_N) / (μ_0 R))
///
/// When `i_p` is given, `scale` is set on every `jtor` call so that the plasma carries `i_p`,
/// and the returned p' and FF' include it. Without `i_p` the data are used as they are.
#[derive(Clone, Debug)]
pub struct CustomProfile {
    psi_n: Array1<f64>,
    pprime_data: Array1<f64>,
    ffprime_data: Array1<f64>,
    i_p: Option<f64>,
    r_0: f64,
    b_0: f64,
    scale: f64,
    psi_axis: f64,
    psi_boundary: f64,
}

impl CustomProfile {
    /// # Arguments
    /// * `pprime` - dp/dψ at `linspace(0, 1, n)`, Pa / (V.s/rad)
    /// * `ffprime` - F dF/dψ at the same points, T^2 m^2 / (V.s/rad)
    /// * `i_p` - plasma current to rescale to, ampere
    /// * `r_0`, `b_0` - vacuum R B_T reference, metre and tesla
    ///
    /// # Errors
    /// `EquilibriaError::ArrayLength` if the arrays differ in length or have fewer than two points
    pub fn new(pprime: Array1<f64>, ffprime: Array1<f64>, i_p: Option<f64>, r_0: f64, b_0: f64) -> EquilibriaResult<Self> {
        let n_psi_n: usize = pprime.len();
        if n_psi_n < 2 {
            return Err(EquilibriaError::ArrayLength {
                what: "CustomProfile: pprime".to_string(),
                expected: 2,
                found: n_psi_n,
            });
        }
        if ffprime.len() != n_psi_n {
            return Err(EquilibriaError::ArrayLength {
                what: "CustomProfile: ffprime".to_string(),
                expected: n_psi_n,
                found: ffprime.len(),
            });
        }

        return Ok(CustomProfile {
            psi_n: Array1::linspace(0.0, 1.0, n_psi_n),
            pprime_data: pprime,
            ffprime_data: ffprime,
            i_p,
            r_0,
            b_0,
            scale: 1.0,
            psi_axis: 1.0,
            psi_boundary: 0.0,
        });
    }

    /// Current rescaling factor from the last `jtor` evaluation
    pub fn scale(&self) -> f64 {
        return self.scale;
    }

    fn interpolate(&self, data: &Array1<f64>, psi_n: &Array1<f64>) -> Array1<f64> {
        let psi_n_clamped: Array1<f64> = psi_n.mapv(|x| x.clamp(0.0, 1.0));
        let values: Array1<f64> = Interp1D::builder(data.to_owned())
            .x(self.psi_n.clone())
            .build()
            .expect("CustomProfile::interpolate: Can't make Interp1D")
            .interp_array(&psi_n_clamped)
            .expect("CustomProfile::interpolate: Can't do interpolation");
        return values;
    }
}

impl Profile for CustomProfile {
    fn jtor(&mut self, grid: &Grid, psi: &Array2<f64>, core: &CoreRegion) -> EquilibriaResult<Array2<f64>> {
        let mesh_r: &Array2<f64> = grid.mesh_r();
        let psi_n: Array2<f64> = masked_psi_norm(psi, core);
        let psi_n_flat: Array1<f64> = psi_n.iter().cloned().collect();

        let pprime: Array2<f64> = self
            .interpolate(&self.pprime_data, &psi_n_flat)
            .into_shape_with_order(psi_n.raw_dim())
            .expect("CustomProfile::jtor: pprime has the grid shape");
        let ffprime: Array2<f64> = self
            .interpolate(&self.ffprime_data, &psi_n_flat)
            .into_shape_with_order(psi_n.raw_dim())
            .expect("CustomProfile::jtor: ffprime has the grid shape");

        let jtor_raw: Array2<f64> = (mesh_r * &pprime + &ffprime / (MU_0 * mesh_r)) * &core.mask;

        self.scale = match self.i_p {
            Some(i_p) => {
                let i_p_raw: f64 = jtor_raw.sum() * grid.d_area();
                if i_p_raw == 0.0 {
                    return Err(EquilibriaError::ProfileDegenerate("CustomProfile: zero current before rescaling".to_string()));
                }
                i_p / i_p_raw
            }
            None => 1.0,
        };
        self.psi_axis = core.psi_axis;
        self.psi_boundary = core.psi_boundary;

        return Ok(self.scale * jtor_raw);
    }

    fn pprime(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        return self.scale * self.interpolate(&self.pprime_data, psi_n);
    }

    fn ffprime(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        return self.scale * self.interpolate(&self.ffprime_data, psi_n);
    }

    fn flux_normalisation(&self) -> (f64, f64) {
        return (self.psi_axis, self.psi_boundary);
    }

    fn pressure(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        let abscissa: Array1<f64> = Array1::linspace(0.0, 1.0, N_TABLE + 1);
        return (self.psi_axis - self.psi_boundary) * tabulated_integral_to_edge(&self.pprime(&abscissa), psi_n);
    }

    fn fpol(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        let abscissa: Array1<f64> = Array1::linspace(0.0, 1.0, N_TABLE + 1);
        let fvac: f64 = self.fvac();
        let integral: Array1<f64> = tabulated_integral_to_edge(&self.ffprime(&abscissa), psi_n);
        let factor: f64 = 2.0 * (self.psi_axis - self.psi_boundary);
        return integral.mapv(|value| (fvac * fvac + factor * value).max(0.0).sqrt() * fvac.signum());
    }

    fn r_0(&self) -> f64 {
        return self.r_0;
    }

    fn b_0(&self) -> f64 {
        return self.b_0;
    }

    fn i_p(&self) -> f64 {
        return self.i_p.unwrap_or(f64::NAN);
    }

    fn clone_box(&self) -> Box<dyn Profile> {
        return Box::new(self.clone());
    }
}

#[test]
fn test_custom_profile_rescales_to_ip() {
    // Lazy loading of packages which are not used anywhere else in the code
    use super::beta_ip_profile::gaussian_core;
    use approx::assert_relative_eq;

    let grid: Grid = Grid::new(4.0, 8.0, -2.0, 2.0, 33, 33).expect("test_custom_profile: grid");
    let (psi, core): (Array2<f64>, CoreRegion) = gaussian_core(&grid);

    let pprime: Array1<f64> = Array1::linspace(1e4, 0.0, 11);
    let ffprime: Array1<f64> = Array1::linspace(-0.1, 0.0, 11);
    let mut profile: CustomProfile = CustomProfile::new(pprime.clone(), ffprime, Some(1.5e6), 6.0, 3.0).expect("test_custom_profile: profile");
    let jtor: Array2<f64> = profile.jtor(&grid, &psi, &core).expect("test_custom_profile: jtor");
    assert_relative_eq!(jtor.sum() * grid.d_area(), 1.5e6, max_relative = 1e-10);

    // Data points are reproduced, up to the rescaling
    let at_data: Array1<f64> = profile.pprime(&Array1::from(vec![0.0, 0.5]));
    assert_relative_eq!(at_data[0], profile.scale() * pprime[0], max_relative = 1e-12);
    assert_relative_eq!(at_data[1], profile.scale() * pprime[5], max_relative = 1e-12);

    // Linear p': p(ψ_N) = Δψ scale p'_0 (1 - ψ_N)^2 / 2
    let (psi_axis, psi_boundary): (f64, f64) = profile.flux_normalisation();
    let pressure: Array1<f64> = profile.pressure(&Array1::from(vec![0.0, 0.4]));
    let expected: f64 = (psi_axis - psi_boundary) * profile.scale() * 1e4 * 0.5;
    assert_relative_eq!(pressure[0], expected, max_relative = 1e-6);
    assert_relative_eq!(pressure[1], expected * 0.36, max_relative = 1e-6);
}

#[test]
fn test_custom_profile_rejects_mismatched_data() {
    let result: EquilibriaResult<CustomProfile> = CustomProfile::new(Array1::zeros(5), Array1::zeros(4), None, 6.0, 3.0);
    assert!(matches!(result, Err(EquilibriaError::ArrayLength { .. })));
    assert!(CustomProfile::new(Array1::zeros(1), Array1::zeros(1), None, 6.0, 3.0).is_err());
}
