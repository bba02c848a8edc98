use crate::coils::{Coil, CoilSelection, CoilSet, CoilType};
use crate::error::EquilibriaResult;
use crate::grid::Grid;
use log::debug;
use ndarray::{Array1, Array2};

/// Half-width of the virtual coils, metre
const VIRTUAL_COIL_HALF_WIDTH: f64 = 0.1;

/// Numerical vertical position controller: two virtual coils above and below the grid
///
/// The coils sit at ((R_min + R_max) / 2, ±(Z_max + 2)). After each solve their currents are incremented by
/// I_i = -g_z BR_coilset / BR_i, evaluated at the plasma's effective current centre, which cancels the radial
/// field that pushes the plasma vertically.
#[derive(Clone, Debug)]
pub struct VirtualController {
    coils: CoilSet,
    gain: f64,
}

impl VirtualController {
    pub fn new(grid: &Grid, gain: f64) -> EquilibriaResult<Self> {
        let x_c: f64 = 0.5 * (grid.r_min() + grid.r_max());
        let z_c: f64 = grid.z_max() + 2.0;
        let coils: Vec<Coil> = vec![
            Coil::new(x_c, z_c, VIRTUAL_COIL_HALF_WIDTH, VIRTUAL_COIL_HALF_WIDTH)?
                .with_name("V1")
                .with_ctype(CoilType::Virtual)
                .with_current(1.0),
            Coil::new(x_c, -z_c, VIRTUAL_COIL_HALF_WIDTH, VIRTUAL_COIL_HALF_WIDTH)?
                .with_name("V2")
                .with_ctype(CoilType::Virtual)
                .with_current(1.0),
        ];
        return Ok(VirtualController {
            coils: CoilSet::new(coils)?,
            gain,
        });
    }

    pub fn coils(&self) -> &CoilSet {
        return &self.coils;
    }

    pub fn gain(&self) -> f64 {
        return self.gain;
    }

    /// Current increments cancelling the coil set's radial field at the effective centre
    pub fn feedback_currents(&self, coilset: &CoilSet, centre: (f64, f64)) -> Array1<f64> {
        let x: Array1<f64> = Array1::from(vec![centre.0]);
        let z: Array1<f64> = Array1::from(vec![centre.1]);
        let bx_coilset: f64 = coilset.field(&x, &z, CoilSelection::All).0[0];
        let bx_virtual: Array2<f64> = self.coils.field_response(&x, &z, CoilSelection::All).0;
        return bx_virtual.row(0).mapv(|bx_per_amp| -self.gain * bx_coilset / bx_per_amp);
    }

    /// Apply one feedback step
    pub fn stabilise(&mut self, coilset: &CoilSet, centre: (f64, f64)) -> EquilibriaResult<()> {
        let d_currents: Array1<f64> = self.feedback_currents(coilset, centre);
        debug!("VirtualController::stabilise: dI = [{:.3e}, {:.3e}] A at R = {:.3}, Z = {:.3}", d_currents[0], d_currents[1], centre.0, centre.1);
        for (i_coil, name) in self.coils.names().iter().enumerate() {
            let current: f64 = self.coils.coils()[i_coil].current() + d_currents[i_coil];
            self.coils.set_current(name, current)?;
        }
        return Ok(());
    }

    pub fn psi(&self, x: &Array1<f64>, z: &Array1<f64>) -> Array1<f64> {
        return self.coils.psi(x, z, CoilSelection::All);
    }

    pub fn field(&self, x: &Array1<f64>, z: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        return self.coils.field(x, z, CoilSelection::All);
    }

    /// Controller flux over the grid, shape = (n_z, n_r)
    pub fn psi_map(&self, grid: &Grid) -> Array2<f64> {
        let x: Array1<f64> = grid.mesh_r().iter().cloned().collect();
        let z: Array1<f64> = grid.mesh_z().iter().cloned().collect();
        return self
            .psi(&x, &z)
            .into_shape_with_order((grid.n_z(), grid.n_r()))
            .expect("VirtualController::psi_map: one value per grid node");
    }

    /// Generation stamp of the virtual coil currents
    pub fn generation(&self) -> u64 {
        return self.coils.generation();
    }
}

#[test]
fn test_virtual_controller_cancels_radial_field() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    let grid: Grid = Grid::new(3.0, 13.0, -10.0, 10.0, 17, 17).expect("grid");
    // An off-midplane coil gives a radial field at the centre
    let coilset: CoilSet = CoilSet::new(vec![Coil::new(8.0, 14.0, 0.5, 0.5).expect("coil").with_current(5e6)]).expect("coilset");
    let mut controller: VirtualController = VirtualController::new(&grid, 1.0).expect("controller");
    let centre: (f64, f64) = (8.0, 0.0);

    let x: Array1<f64> = Array1::from(vec![centre.0]);
    let z: Array1<f64> = Array1::from(vec![centre.1]);
    let bx_before: f64 = coilset.field(&x, &z, CoilSelection::All).0[0];
    assert!(bx_before.abs() > 0.0);

    // With unit gain each virtual coil alone would cancel the radial field; together they cancel it twice over
    let d_currents: Array1<f64> = controller.feedback_currents(&coilset, centre);
    let bx_virtual: Array2<f64> = controller.coils().field_response(&x, &z, CoilSelection::All).0;
    assert_abs_diff_eq!(bx_virtual[[0, 0]] * d_currents[0], -bx_before, epsilon = 1e-9 * bx_before.abs());

    controller.stabilise(&coilset, centre).expect("stabilise");
    assert_abs_diff_eq!(controller.coils().coils()[0].current(), 1.0 + d_currents[0], epsilon = 1e-6);
    assert_eq!(controller.psi_map(&grid).dim(), (17, 17));
}
