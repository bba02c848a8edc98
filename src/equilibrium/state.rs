use crate::coils::{CoilSelection, CoilSet};
use crate::error::EquilibriaResult;
use crate::grid::Grid;
use crate::limiter::Limiter;
use ndarray::Array1;

/// A magnetic configuration whose coil set can be optimised
///
/// Implemented by `Equilibrium` and `Breakdown`. The "plasma" terms cover everything that is not a coil of the
/// coil set: the plasma current and the vertical controller for an equilibrium, nothing for a breakdown.
pub trait MagneticState {
    fn grid(&self) -> &Grid;

    fn coilset(&self) -> &CoilSet;

    fn coilset_mut(&mut self) -> &mut CoilSet;

    fn limiter(&self) -> Option<&Limiter>;

    /// Flux per radian at the points from everything except the coil set
    fn plasma_psi_at(&self, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>>;

    /// BR at the points from everything except the coil set
    fn plasma_bx_at(&self, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>>;

    /// BZ at the points from everything except the coil set
    fn plasma_bz_at(&self, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>>;

    /// Total flux per radian at the points
    fn psi_at(&self, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
        return Ok(self.plasma_psi_at(x, z)? + self.coilset().psi(x, z, CoilSelection::All));
    }

    /// Total BR at the points
    fn bx_at(&self, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
        return Ok(self.plasma_bx_at(x, z)? + self.coilset().field(x, z, CoilSelection::All).0);
    }

    /// Total BZ at the points
    fn bz_at(&self, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
        return Ok(self.plasma_bz_at(x, z)? + self.coilset().field(x, z, CoilSelection::All).1);
    }

    /// Poloidal field magnitude at the points
    fn bp_at(&self, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
        let bx: Array1<f64> = self.bx_at(x, z)?;
        let bz: Array1<f64> = self.bz_at(x, z)?;
        return Ok(ndarray::Zip::from(&bx).and(&bz).map_collect(|&bx, &bz| bx.hypot(bz)));
    }
}
