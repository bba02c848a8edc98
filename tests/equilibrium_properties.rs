// tests/equilibrium_properties.rs
//
// Properties of solved equilibria that hold for any machine.
// Run with: cargo test --test equilibrium_properties

mod common;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use equilibria_rs::equilibrium::{Boundary, EqdskRecord, Equilibrium, EquilibriumSettings, MagneticState, VerticalControl};
use equilibria_rs::plasma_geometry::{CriticalPoint, CriticalPoints, FluxSurface, FluxSurfaceGeometry, nudge_psi_norm};
use equilibria_rs::{Coil, CoilSet, CustomProfile, EquilibriaError, Grid};
use ndarray::{Array1, Array2};
use std::path::PathBuf;
use std::sync::Arc;

fn max_abs(map: &Array2<f64>) -> f64 {
    return map.iter().fold(0.0_f64, |acc, value| acc.max(value.abs()));
}

#[test]
fn test_free_boundary_solution_is_up_down_symmetric_with_vertical_control() {
    common::init_logging();
    let mut equilibrium: Equilibrium = common::symmetric_equilibrium(Boundary::Free, VerticalControl::Virtual);
    for _ in 0..4 {
        equilibrium.solve(None, None).expect("solve");
    }

    let psi: Array2<f64> = equilibrium.psi();
    let n_z: usize = psi.nrows();
    let tolerance: f64 = 1e-6 * max_abs(&psi);
    for i_z in 0..n_z {
        for i_r in 0..psi.ncols() {
            assert_abs_diff_eq!(psi[[i_z, i_r]], psi[[n_z - 1 - i_z, i_r]], epsilon = tolerance);
        }
    }

    let critical_points: Arc<CriticalPoints> = equilibrium.get_ox_points(false);
    let o_point: CriticalPoint = critical_points.primary_o_point().expect("O-point");
    assert!(o_point.z.abs() < 0.5 * equilibrium.grid().d_z());
}

#[test]
fn test_repeated_solve_from_the_same_flux_is_idempotent() {
    common::init_logging();
    let mut equilibrium: Equilibrium = common::symmetric_equilibrium(Boundary::Free, VerticalControl::None);
    equilibrium.solve(None, None).expect("first solve");
    let psi_0: Array2<f64> = equilibrium.psi();

    equilibrium.solve(None, Some(&psi_0)).expect("second solve");
    let psi_plasma_1: Array2<f64> = equilibrium.psi_plasma().clone();
    let jtor_1: Array2<f64> = equilibrium.jtor().clone();

    equilibrium.solve(None, Some(&psi_0)).expect("third solve");
    let tolerance: f64 = 1e-12 * max_abs(&psi_plasma_1);
    assert!((equilibrium.psi_plasma() - &psi_plasma_1).iter().all(|delta| delta.abs() <= tolerance));
    assert!((equilibrium.jtor() - &jtor_1).iter().all(|delta| delta.abs() <= 1e-12 * max_abs(&jtor_1)));
}

#[test]
fn test_single_o_point_at_the_current_peak() {
    common::init_logging();
    // Large aspect ratio, so the flux peak sits on the current peak
    let grid: Grid = Grid::new(40.0, 48.0, -4.0, 4.0, 33, 33).expect("grid");
    let (r_c, z_c, width): (f64, f64, f64) = (44.0, 0.0, 1.0);
    let jtor: Array2<f64> = Array2::from_shape_fn((grid.n_z(), grid.n_r()), |(i_z, i_r)| {
        if grid.is_edge_node(i_z, i_r) {
            return 0.0;
        }
        let distance_squared: f64 = (grid.r()[i_r] - r_c).powi(2) + (grid.z()[i_z] - z_c).powi(2);
        return 1e6 * (-distance_squared / (width * width)).exp();
    });

    let coilset: CoilSet = CoilSet::new(vec![Coil::new(60.0, 0.0, 0.5, 0.5).expect("coil").with_name("PF_FAR")]).expect("coilset");
    let pprime: Array1<f64> = Array1::linspace(1e4, 0.0, 11);
    let ffprime: Array1<f64> = Array1::zeros(11);
    let profile: CustomProfile = CustomProfile::new(pprime, ffprime, None, 44.0, 5.0).expect("profile");
    let settings: EquilibriumSettings = EquilibriumSettings {
        boundary: Boundary::Fixed,
        ..EquilibriumSettings::default()
    };
    let mut equilibrium: Equilibrium = Equilibrium::new(grid, coilset, Box::new(profile), None, settings).expect("equilibrium");
    equilibrium.solve(Some(jtor), None).expect("solve");

    let critical_points: Arc<CriticalPoints> = equilibrium.get_ox_points(true);
    assert_eq!(critical_points.o_points().len(), 1);
    let o_point: CriticalPoint = critical_points.primary_o_point().expect("O-point");
    let grid: &Grid = equilibrium.grid();
    assert!((o_point.r - r_c).abs() <= grid.d_r());
    assert!((o_point.z - z_c).abs() <= grid.d_z());
}

#[test]
fn test_flux_surfaces_at_the_ends_are_nudged_and_grow_continuously() {
    common::init_logging();
    let mut equilibrium: Equilibrium = common::symmetric_equilibrium(Boundary::Free, VerticalControl::None);
    for _ in 0..3 {
        equilibrium.solve(None, None).expect("solve");
    }

    let inner_level: f64 = nudge_psi_norm(0.0).expect("nudge");
    let outer_level: f64 = nudge_psi_norm(1.0).expect("nudge");
    assert!(inner_level > 0.0 && outer_level < 1.0);
    assert!(matches!(equilibrium.get_flux_surface(1.2), Err(EquilibriaError::PsiNormOutOfRange(_))));

    let boundary: FluxSurface = equilibrium.get_flux_surface(1.0).expect("surface at 1");
    let nudged: FluxSurface = equilibrium.get_flux_surface(outer_level).expect("nudged surface");
    assert_eq!(boundary, nudged);

    let mut minor_radius_previous: f64 = 0.0;
    for i_level in 1..10 {
        let psi_n: f64 = 0.1 * i_level as f64;
        let geometry: FluxSurfaceGeometry = equilibrium.analyse_flux_surface(psi_n).expect("flux surface");
        assert!(geometry.minor_radius > minor_radius_previous, "minor radius must grow with ψ_N, at {psi_n}");
        assert!(geometry.minor_radius - minor_radius_previous < 1.5, "minor radius jumps at ψ_N = {psi_n}");
        minor_radius_previous = geometry.minor_radius;
    }
}

#[test]
fn test_record_round_trip_restores_flux_and_current() {
    common::init_logging();
    let mut equilibrium: Equilibrium = common::symmetric_equilibrium(Boundary::Free, VerticalControl::None);
    for _ in 0..3 {
        equilibrium.solve(None, None).expect("solve");
    }

    let path: PathBuf = std::env::temp_dir().join(format!("equilibria_rs_record_{}.json", std::process::id()));
    let record: EqdskRecord = equilibrium.to_record("round_trip").expect("record");
    record.save(&path).expect("save");
    let json: String = std::fs::read_to_string(&path).expect("read back");
    assert!(json.contains("\"Ic\""));

    let loaded: EqdskRecord = EqdskRecord::load(&path).expect("load");
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded.nx, equilibrium.grid().n_r());
    assert_eq!(loaded.psi.len(), loaded.nx);
    assert!(loaded.qpsi.iter().all(|value| value.is_none()));

    let restored: Equilibrium = Equilibrium::from_record(&loaded, EquilibriumSettings::default()).expect("from record");
    let psi_tolerance: f64 = 1e-9 * max_abs(&equilibrium.psi());
    assert!((restored.psi() - equilibrium.psi()).iter().all(|delta| delta.abs() <= psi_tolerance));
    assert!((restored.psi_plasma() - equilibrium.psi_plasma()).iter().all(|delta| delta.abs() <= psi_tolerance));

    let jtor_tolerance: f64 = 1e-5 * max_abs(equilibrium.jtor());
    let grid: &Grid = equilibrium.grid();
    for i_z in 1..grid.n_z() - 1 {
        for i_r in 1..grid.n_r() - 1 {
            assert_abs_diff_eq!(restored.jtor()[[i_z, i_r]], equilibrium.jtor()[[i_z, i_r]], epsilon = jtor_tolerance);
        }
    }
    assert_relative_eq!(restored.i_p(), equilibrium.i_p(), max_relative = 1e-4);
}

#[test]
fn test_record_with_inconsistent_sizes_is_rejected() {
    common::init_logging();
    let mut equilibrium: Equilibrium = common::symmetric_equilibrium(Boundary::Free, VerticalControl::None);
    equilibrium.solve(None, None).expect("solve");
    let mut record: EqdskRecord = equilibrium.to_record("broken").expect("record");
    record.i_c.pop();

    let result = Equilibrium::from_record(&record, EquilibriumSettings::default());
    assert!(matches!(result, Err(EquilibriaError::ArrayLength { .. })));
}
