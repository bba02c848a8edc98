// tests/optimisation_properties.rs
//
// Coil current and position optimisation on a vacuum (breakdown) configuration.
// Run with: cargo test --test optimisation_properties

mod common;

use approx::assert_abs_diff_eq;
use equilibria_rs::equilibrium::{Breakdown, MagneticState};
use equilibria_rs::optimisation::{
    BoundedCurrentCOP, CoilsetOptimisationProblem, CoilsetOptimiserResult, CoilsetPositionCOP, MagneticConstraint, MagneticConstraintSet, OptimiserConditions, PositionMapper,
    PsiConstraint, RegionInterpolator, UnconstrainedCurrentCOP,
};
use equilibria_rs::{Coil, CoilSelection, CoilSet, EquilibriaError, Grid};
use ndarray::{Array1, Array2, array};
use ndarray_linalg::Solve;

fn vacuum_breakdown() -> Breakdown {
    let grid: Grid = Grid::new(4.0, 12.0, -6.0, 6.0, 17, 17).expect("grid");
    return Breakdown::new(grid, common::symmetric_coilset(), None).expect("breakdown");
}

fn psi_targets(target_value: f64) -> (Array1<f64>, Array1<f64>, MagneticConstraintSet) {
    let x: Array1<f64> = array![6.0, 8.0, 10.0, 8.0, 7.0, 9.0];
    let z: Array1<f64> = array![0.0, 3.0, 0.0, -3.0, 1.5, -1.5];
    let constraint: PsiConstraint = PsiConstraint::new(x.clone(), z.clone(), target_value).expect("constraint");
    let constraints: Vec<Box<dyn MagneticConstraint>> = vec![Box::new(constraint)];
    return (x, z, MagneticConstraintSet::new(constraints));
}

#[test]
fn test_unconstrained_current_increment_matches_closed_form() {
    common::init_logging();
    let mut breakdown: Breakdown = vacuum_breakdown();
    let (x, z, targets): (Array1<f64>, Array1<f64>, MagneticConstraintSet) = psi_targets(20.0);
    let gamma: f64 = 1e-8;

    // (A^T A + γ² I) ΔI = A^T (ψ_target - ψ_now)
    let a_mat: Array2<f64> = breakdown.coilset().control_psi(&x, &z);
    let b_vec: Array1<f64> = Array1::from_elem(x.len(), 20.0) - breakdown.psi_at(&x, &z).expect("psi");
    let normal: Array2<f64> = a_mat.t().dot(&a_mat) + gamma * gamma * Array2::<f64>::eye(a_mat.ncols());
    let increment: Array1<f64> = normal.solve(&a_mat.t().dot(&b_vec)).expect("normal equations");
    let expected: Array1<f64> = breakdown.coilset().get_control_currents() + &increment;

    let mut problem: UnconstrainedCurrentCOP = UnconstrainedCurrentCOP::new(targets, gamma);
    let result: CoilsetOptimiserResult = problem.optimise(&mut breakdown, true).expect("optimise");
    assert!(result.converged);

    let currents: Array1<f64> = breakdown.coilset().get_control_currents();
    let scale: f64 = expected.iter().fold(1.0_f64, |acc, value| acc.max(value.abs()));
    for (current, expected_current) in currents.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*current, *expected_current, epsilon = 1e-6 * scale);
    }
}

#[test]
fn test_bounded_currents_stay_inside_their_limits() {
    common::init_logging();
    let mut breakdown: Breakdown = vacuum_breakdown();
    // Far more flux than the limits allow
    let (_x, _z, targets): (Array1<f64>, Array1<f64>, MagneticConstraintSet) = psi_targets(500.0);
    let max_current: f64 = 2e6;

    let mut problem: BoundedCurrentCOP = BoundedCurrentCOP::new(
        breakdown.coilset(),
        targets,
        1e-8,
        Some(array![max_current]),
        OptimiserConditions::default(),
        Vec::new(),
    )
    .expect("problem");
    problem.optimise(&mut breakdown, true).expect("optimise");

    let currents: Array1<f64> = breakdown.coilset().get_control_currents();
    assert!(currents.iter().all(|current| current.abs() <= max_current * (1.0 + 1e-9)));
    // The demand pushes at least one coil to its limit
    assert!(currents.iter().any(|current| current.abs() > 0.9 * max_current));
}

#[test]
fn test_bounded_problem_rejects_mismatched_limits() {
    let breakdown: Breakdown = vacuum_breakdown();
    let (_x, _z, targets): (Array1<f64>, Array1<f64>, MagneticConstraintSet) = psi_targets(20.0);
    let result: Result<BoundedCurrentCOP, EquilibriaError> = BoundedCurrentCOP::new(breakdown.coilset(), targets, 1e-8, Some(array![1e6, 1e6]), OptimiserConditions::default(), Vec::new());
    assert!(matches!(result, Err(EquilibriaError::CurrentBoundsLength { n_bounds: 2, n_control: 6 })));
}

#[test]
fn test_coil_positions_stay_inside_their_regions() {
    common::init_logging();
    let mut breakdown: Breakdown = vacuum_breakdown();
    let (x, z, targets): (Array1<f64>, Array1<f64>, MagneticConstraintSet) = psi_targets(20.0);

    let region: RegionInterpolator = RegionInterpolator::new(&array![13.0, 15.0, 15.0, 13.0], &array![2.0, 2.0, 4.0, 4.0]).expect("region");
    let mapper: PositionMapper = PositionMapper::new(vec![("PF_U2".to_string(), region)]);
    let conditions: OptimiserConditions = OptimiserConditions {
        max_evaluations: 150,
        ..OptimiserConditions::default()
    };
    let mut problem: CoilsetPositionCOP = CoilsetPositionCOP::new(breakdown.coilset(), targets, mapper, 1e-8, Some(array![1e7]), conditions, Vec::new()).expect("problem");

    let residual_before: f64 = (breakdown.psi_at(&x, &z).expect("psi") - 20.0).mapv(|value| value * value).sum();
    let result: CoilsetOptimiserResult = problem.optimise(&mut breakdown, false).expect("optimise");
    let residual_after: f64 = (breakdown.psi_at(&x, &z).expect("psi") - 20.0).mapv(|value| value * value).sum();
    assert!(residual_after < residual_before);

    let coilset: &CoilSet = breakdown.coilset();
    let moved: &Coil = coilset.coil("PF_U2").expect("coil");
    assert!(moved.x() >= 13.0 - 1e-9 && moved.x() <= 15.0 + 1e-9);
    assert!(moved.z() >= 2.0 - 1e-9 && moved.z() <= 4.0 + 1e-9);
    // The result carries the coil set it left behind
    assert_eq!(result.coilset.coil("PF_U2").expect("coil").x(), moved.x());

    // Only PF_U2 may move
    let untouched: &Coil = coilset.coil("PF_L2").expect("coil");
    assert_eq!((untouched.x(), untouched.z()), (14.0, -3.0));
    assert!(coilset.psi(&x, &z, CoilSelection::All).iter().all(|value| value.is_finite()));
}
