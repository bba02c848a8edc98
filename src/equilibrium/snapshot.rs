use super::controller::VirtualController;
use super::equilibrium::GridOperators;
use super::settings::EquilibriumSettings;
use crate::coils::CoilSet;
use crate::grid::Grid;
use crate::limiter::Limiter;
use crate::plasma_geometry::CriticalPoints;
use crate::profiles::Profile;
use ndarray::Array2;
use std::sync::Arc;

/// Immutable record of an equilibrium at one point of a calculation
///
/// Shares the grid operators with the equilibrium it was taken from; everything else is copied, so later changes
/// to the equilibrium do not show up here. `Equilibrium::from_snapshot` turns it back into a working equilibrium.
#[derive(Clone, Debug)]
pub struct Snapshot {
    label: String,
    grid: Grid,
    coilset: CoilSet,
    psi: Array2<f64>,
    psi_plasma: Array2<f64>,
    jtor: Array2<f64>,
    i_p: f64,
    critical_points: CriticalPoints,
    profile: Box<dyn Profile>,
    limiter: Option<Limiter>,
    settings: EquilibriumSettings,
    controller: Option<VirtualController>,
    operators: Arc<GridOperators>,
}

impl Snapshot {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        label: &str,
        grid: Grid,
        coilset: CoilSet,
        psi: Array2<f64>,
        psi_plasma: Array2<f64>,
        jtor: Array2<f64>,
        i_p: f64,
        critical_points: CriticalPoints,
        profile: Box<dyn Profile>,
        limiter: Option<Limiter>,
        settings: EquilibriumSettings,
        controller: Option<VirtualController>,
        operators: Arc<GridOperators>,
    ) -> Self {
        return Snapshot {
            label: label.to_string(),
            grid,
            coilset,
            psi,
            psi_plasma,
            jtor,
            i_p,
            critical_points,
            profile,
            limiter,
            settings,
            controller,
            operators,
        };
    }

    pub fn label(&self) -> &str {
        return &self.label;
    }

    pub fn grid(&self) -> &Grid {
        return &self.grid;
    }

    pub fn coilset(&self) -> &CoilSet {
        return &self.coilset;
    }

    /// Total flux, shape = (n_z, n_r)
    pub fn psi(&self) -> &Array2<f64> {
        return &self.psi;
    }

    pub fn psi_plasma(&self) -> &Array2<f64> {
        return &self.psi_plasma;
    }

    pub fn jtor(&self) -> &Array2<f64> {
        return &self.jtor;
    }

    pub fn i_p(&self) -> f64 {
        return self.i_p;
    }

    pub fn critical_points(&self) -> &CriticalPoints {
        return &self.critical_points;
    }

    pub fn profile(&self) -> &dyn Profile {
        return self.profile.as_ref();
    }

    pub fn limiter(&self) -> Option<&Limiter> {
        return self.limiter.as_ref();
    }

    pub fn settings(&self) -> &EquilibriumSettings {
        return &self.settings;
    }

    pub fn controller(&self) -> Option<&VirtualController> {
        return self.controller.as_ref();
    }

    pub(crate) fn operators(&self) -> Arc<GridOperators> {
        return Arc::clone(&self.operators);
    }
}

#[test]
fn test_snapshot_is_independent_of_later_changes() {
    use super::equilibrium::Equilibrium;
    use super::state::MagneticState;
    use crate::coils::Coil;
    use crate::profiles::CustomProfile;
    use ndarray::Array1;

    let grid: Grid = Grid::new(4.0, 12.0, -6.0, 6.0, 17, 17).expect("grid");
    let coilset: CoilSet = CoilSet::new(vec![Coil::new(14.0, 0.0, 0.5, 0.5).expect("coil").with_name("PF").with_current(-1e6)]).expect("coilset");
    let profile: CustomProfile = CustomProfile::new(Array1::from(vec![1e4, 0.0]), Array1::from(vec![-0.1, 0.0]), Some(5e6), 8.0, 5.0).expect("profile");
    let mut equilibrium: Equilibrium = Equilibrium::new(grid, coilset, Box::new(profile), None, EquilibriumSettings::default()).expect("equilibrium");
    equilibrium.solve(None, None).expect("solve");

    let snapshot: Snapshot = equilibrium.snapshot("first");
    equilibrium.coilset_mut().set_current("PF", -2e6).expect("set current");
    equilibrium.solve(None, None).expect("solve");

    assert_eq!(snapshot.label(), "first");
    assert_eq!(snapshot.coilset().coils()[0].current(), -1e6);
    let restored: Equilibrium = Equilibrium::from_snapshot(&snapshot);
    assert!(restored.psi().abs_diff_eq(snapshot.psi(), 1e-9));
    assert!(Arc::ptr_eq(&restored.operators(), &equilibrium.operators()));
}
