use super::analysis::{CoilSummary, analyse_coils};
use super::state::MagneticState;
use crate::cache::LazyCache;
use crate::coils::{CoilSelection, CoilSet};
use crate::error::{EquilibriaError, EquilibriaResult};
use crate::grid::Grid;
use crate::limiter::Limiter;
use log::debug;
use ndarray::{Array1, Array2};
use std::sync::Arc;

/// Vacuum field configuration before the plasma forms
///
/// There is no plasma current, so every field comes from the coil set. The breakdown point is where the
/// plasma is expected to initiate; unless set explicitly it is the weakest-field node inside the limiter
/// (or inside the grid, without a limiter).
#[derive(Clone, Debug)]
pub struct Breakdown {
    grid: Grid,
    coilset: CoilSet,
    limiter: Option<Limiter>,
    breakdown_point: Option<(f64, f64)>,
    // Per-ampere responses of every grid node, shape = (n_nodes, n_coils)
    coil_psi_table: LazyCache<u64, Array2<f64>>,
    coil_field_tables: LazyCache<u64, (Array2<f64>, Array2<f64>)>,
}

impl Breakdown {
    pub fn new(grid: Grid, coilset: CoilSet, limiter: Option<Limiter>) -> EquilibriaResult<Self> {
        return Ok(Breakdown {
            grid,
            coilset,
            limiter,
            breakdown_point: None,
            coil_psi_table: LazyCache::new(),
            coil_field_tables: LazyCache::new(),
        });
    }

    fn grid_nodes(&self) -> (Array1<f64>, Array1<f64>) {
        let x: Array1<f64> = self.grid.mesh_r().iter().cloned().collect();
        let z: Array1<f64> = self.grid.mesh_z().iter().cloned().collect();
        return (x, z);
    }

    fn to_map(&self, values: Array1<f64>) -> Array2<f64> {
        return values
            .into_shape_with_order((self.grid.n_z(), self.grid.n_r()))
            .expect("Breakdown::to_map: one value per grid node");
    }

    /// Coil flux over the grid, shape = (n_z, n_r)
    pub fn psi(&self) -> Array2<f64> {
        let table: Arc<Array2<f64>> = self.coil_psi_table.get_or_compute(self.coilset.geometry_generation(), || {
            let (x, z): (Array1<f64>, Array1<f64>) = self.grid_nodes();
            self.coilset.psi_response(&x, &z, CoilSelection::All)
        });
        return self.to_map(table.dot(&self.coilset.get_currents()));
    }

    /// Poloidal field magnitude over the grid, tesla
    pub fn bp(&self) -> Array2<f64> {
        let tables: Arc<(Array2<f64>, Array2<f64>)> = self.coil_field_tables.get_or_compute(self.coilset.geometry_generation(), || {
            let (x, z): (Array1<f64>, Array1<f64>) = self.grid_nodes();
            self.coilset.field_response(&x, &z, CoilSelection::All)
        });
        let currents: Array1<f64> = self.coilset.get_currents();
        let bx: Array1<f64> = tables.0.dot(&currents);
        let bz: Array1<f64> = tables.1.dot(&currents);
        return self.to_map(ndarray::Zip::from(&bx).and(&bz).map_collect(|&bx, &bz| bx.hypot(bz)));
    }

    /// Fix the breakdown point
    ///
    /// # Errors
    /// `EquilibriaError::InvalidRegion` if the point is outside the grid
    pub fn set_breakdown_point(&mut self, x: f64, z: f64) -> EquilibriaResult<()> {
        if !self.grid.point_inside(x, z) {
            return Err(EquilibriaError::InvalidRegion(format!("breakdown point ({x}, {z}) is outside the grid")));
        }
        self.breakdown_point = Some((x, z));
        return Ok(());
    }

    /// The breakdown point: the one set, or the weakest-field interior node
    pub fn breakdown_point(&self) -> (f64, f64) {
        if let Some(point) = self.breakdown_point {
            return point;
        }
        let bp: Array2<f64> = self.bp();
        let mut best: ((f64, f64), f64) = (self.grid.centre(), f64::INFINITY);
        for ((i_z, i_r), &value) in bp.indexed_iter() {
            if self.grid.is_edge_node(i_z, i_r) {
                continue;
            }
            let r: f64 = self.grid.r()[i_r];
            let z: f64 = self.grid.z()[i_z];
            if let Some(limiter) = &self.limiter {
                if !limiter.contains(r, z) {
                    continue;
                }
            }
            if value < best.1 {
                best = ((r, z), value);
            }
        }
        debug!("Breakdown::breakdown_point: |Bp| = {:.3e} T at R = {:.3}, Z = {:.3}", best.1, best.0.0, best.0.1);
        return best.0;
    }

    /// Flux per radian at the breakdown point
    pub fn breakdown_psi(&self) -> EquilibriaResult<f64> {
        let (x, z): (f64, f64) = self.breakdown_point();
        return Ok(self.psi_at(&Array1::from(vec![x]), &Array1::from(vec![z]))?[0]);
    }

    /// Current, force and peak field of every coil
    pub fn analyse_coils(&self) -> EquilibriaResult<Vec<CoilSummary>> {
        return analyse_coils(self);
    }
}

impl MagneticState for Breakdown {
    fn grid(&self) -> &Grid {
        return &self.grid;
    }

    fn coilset(&self) -> &CoilSet {
        return &self.coilset;
    }

    fn coilset_mut(&mut self) -> &mut CoilSet {
        return &mut self.coilset;
    }

    fn limiter(&self) -> Option<&Limiter> {
        return self.limiter.as_ref();
    }

    fn plasma_psi_at(&self, x: &Array1<f64>, _z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
        return Ok(Array1::zeros(x.len()));
    }

    fn plasma_bx_at(&self, x: &Array1<f64>, _z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
        return Ok(Array1::zeros(x.len()));
    }

    fn plasma_bz_at(&self, x: &Array1<f64>, _z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
        return Ok(Array1::zeros(x.len()));
    }
}

#[test]
fn test_breakdown_point_at_field_null() {
    // Lazy loading of packages which are not used anywhere else in the code
    use crate::coils::Coil;
    use approx::assert_abs_diff_eq;

    // Equal currents above and below give a radial-field null on the midplane
    let grid: Grid = Grid::new(2.0, 10.0, -4.0, 4.0, 33, 33).expect("grid");
    let coilset: CoilSet = CoilSet::new(vec![
        Coil::new(6.0, 6.0, 0.5, 0.5).expect("coil").with_name("PF_U").with_current(2e6),
        Coil::new(6.0, -6.0, 0.5, 0.5).expect("coil").with_name("PF_L").with_current(2e6),
    ])
    .expect("coilset");
    let mut breakdown: Breakdown = Breakdown::new(grid, coilset, None).expect("breakdown");

    let (x_bd, z_bd): (f64, f64) = breakdown.breakdown_point();
    assert_abs_diff_eq!(z_bd, 0.0, epsilon = 1e-9);
    assert!(x_bd > 2.0 && x_bd < 10.0);

    let x: Array1<f64> = Array1::from(vec![x_bd]);
    let z: Array1<f64> = Array1::from(vec![z_bd]);
    assert_abs_diff_eq!(breakdown.breakdown_psi().expect("breakdown psi"), breakdown.psi_at(&x, &z).expect("psi")[0], epsilon = 1e-12);
    assert_eq!(breakdown.plasma_psi_at(&x, &z).expect("plasma psi")[0], 0.0);

    breakdown.set_breakdown_point(4.0, 1.0).expect("breakdown point");
    assert_eq!(breakdown.breakdown_point(), (4.0, 1.0));
    assert!(breakdown.set_breakdown_point(12.0, 0.0).is_err());
}
