// Load modules
mod beta_ip_profile;
mod custom_profile;
mod li;
mod shape_functions;

// Expose functions to public
pub use beta_ip_profile::BetaIpProfile;
pub use custom_profile::CustomProfile;
pub use li::{LiOptimisationResult, LiSettings, optimise_li};
pub use shape_functions::{DoublePowerShape, PolynomialShape, ShapeFunction, integrate_to_edge};

use crate::error::EquilibriaResult;
use crate::grid::Grid;
use crate::plasma_geometry::CoreRegion;
use ndarray::{Array1, Array2};
use std::fmt::Debug;

/// Plasma current and pressure model over normalised flux
///
/// `jtor` both evaluates the current density and fixes the profile's normalisation (its scale factors and
/// the axis and boundary flux), which the 1-D profile functions then use.
/// All flux derivatives are per unit ψ, with ψ in V.s/rad.
pub trait Profile: Debug + Send + Sync {
    /// Toroidal current density over the grid, A/m^2, zero outside the core mask
    fn jtor(&mut self, grid: &Grid, psi: &Array2<f64>, core: &CoreRegion) -> EquilibriaResult<Array2<f64>>;

    /// dp/dψ
    fn pprime(&self, psi_n: &Array1<f64>) -> Array1<f64>;

    /// F dF/dψ
    fn ffprime(&self, psi_n: &Array1<f64>) -> Array1<f64>;

    /// (ψ_axis, ψ_boundary) from the last `jtor` evaluation
    fn flux_normalisation(&self) -> (f64, f64);

    /// Plasma pressure, pascal
    fn pressure(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        let (psi_axis, psi_boundary): (f64, f64) = self.flux_normalisation();
        return psi_n.mapv(|x| (psi_axis - psi_boundary) * integrate_to_edge(|t| self.pprime(&Array1::from(vec![t]))[0], x));
    }

    /// Poloidal current function F = R B_T, from F^2 = (R_0 B_0)^2 + 2 ∫ FF' dψ
    fn fpol(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        let (psi_axis, psi_boundary): (f64, f64) = self.flux_normalisation();
        let fvac: f64 = self.fvac();
        return psi_n.mapv(|x| {
            let f_squared: f64 = fvac * fvac + 2.0 * (psi_axis - psi_boundary) * integrate_to_edge(|t| self.ffprime(&Array1::from(vec![t]))[0], x);
            f_squared.max(0.0).sqrt() * fvac.signum()
        });
    }

    fn r_0(&self) -> f64;
    fn b_0(&self) -> f64;

    /// Vacuum R B_T
    fn fvac(&self) -> f64 {
        return self.r_0() * self.b_0();
    }

    /// Target plasma current, ampere
    fn i_p(&self) -> f64;

    /// The adjustable current shape, for profiles that have one
    fn shape(&self) -> Option<&dyn ShapeFunction> {
        return None;
    }

    fn shape_mut(&mut self) -> Option<&mut dyn ShapeFunction> {
        return None;
    }

    fn clone_box(&self) -> Box<dyn Profile>;
}

impl Clone for Box<dyn Profile> {
    fn clone(&self) -> Self {
        return self.clone_box();
    }
}

/// Normalised flux inside the core, clamped to [0, 1]; 1 outside so that every shape vanishes there
pub(crate) fn masked_psi_norm(psi: &Array2<f64>, core: &CoreRegion) -> Array2<f64> {
    let mut psi_n: Array2<f64> = core.psi_norm(psi).mapv(|value| value.clamp(0.0, 1.0));
    ndarray::Zip::from(&mut psi_n).and(&core.mask).for_each(|value, &inside| {
        if inside == 0.0 {
            *value = 1.0;
        }
    });
    return psi_n;
}
