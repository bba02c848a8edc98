use super::algorithms::ConstraintFunction;
use super::constraints::{ResponseMode, background_field};
use crate::coils::{Coil, CoilSelection, CoilSet, CoilType};
use crate::constants::CURRENT_SCALE;
use crate::equilibrium::MagneticState;
use crate::error::EquilibriaResult;
use ndarray::{Array1, Array2};
use std::fmt::Debug;

// Global constants
const PI: f64 = std::f64::consts::PI;

/// An engineering constraint on the control currents that depends on the present state
///
/// `prepare` captures the state-dependent response matrices; afterwards the constraint is a pure
/// function of the scaled control currents, in mega-amperes.
pub trait CoilConstraint: ConstraintFunction + Debug + Send + Sync {
    /// Rebuild the background terms, and the control response unless `fixed_coils` and already built
    fn prepare(&mut self, state: &dyn MagneticState, fixed_coils: bool) -> EquilibriaResult<()>;

    fn as_constraint_function(&self) -> &dyn ConstraintFunction;

    fn clone_box(&self) -> Box<dyn CoilConstraint>;
}

impl Clone for Box<dyn CoilConstraint> {
    fn clone(&self) -> Self {
        return self.clone_box();
    }
}

/// Peak poloidal field on each control coil below its limit
///
/// c_i = |B(x_i - dx_i, z_i)| - B_max,i, tesla. Coils without a field limit are not constrained.
#[derive(Clone, Debug)]
pub struct CoilFieldConstraints {
    /// Indices among the control coils that have a finite field limit
    constrained: Vec<usize>,
    b_max: Array1<f64>,
    ax_mat: Option<Array2<f64>>,
    az_mat: Option<Array2<f64>>,
    bxp_vec: Array1<f64>,
    bzp_vec: Array1<f64>,
}

impl CoilFieldConstraints {
    pub fn new(coilset: &CoilSet) -> Self {
        let b_max_all: Array1<f64> = coilset.get_max_fields();
        let constrained: Vec<usize> = (0..b_max_all.len()).filter(|&i_coil| b_max_all[i_coil].is_finite()).collect();
        let b_max: Array1<f64> = constrained.iter().map(|&i_coil| b_max_all[i_coil]).collect();
        let n_constrained: usize = constrained.len();
        return CoilFieldConstraints {
            constrained,
            b_max,
            ax_mat: None,
            az_mat: None,
            bxp_vec: Array1::zeros(n_constrained),
            bzp_vec: Array1::zeros(n_constrained),
        };
    }

    fn peak_field_points(&self, coilset: &CoilSet) -> (Array1<f64>, Array1<f64>) {
        let control_coils: Vec<&Coil> = coilset.coils().iter().filter(|coil| coil.control()).collect();
        let x: Array1<f64> = self.constrained.iter().map(|&i_coil| control_coils[i_coil].peak_field_location().0).collect();
        let z: Array1<f64> = self.constrained.iter().map(|&i_coil| control_coils[i_coil].peak_field_location().1).collect();
        return (x, z);
    }
}

impl ConstraintFunction for CoilFieldConstraints {
    fn n_constraints(&self) -> usize {
        return self.constrained.len();
    }

    fn evaluate(&self, x: &Array1<f64>) -> (Array1<f64>, Array2<f64>) {
        let n_constraints: usize = self.constrained.len();
        let (ax_mat, az_mat): (&Array2<f64>, &Array2<f64>) = match (&self.ax_mat, &self.az_mat) {
            (Some(ax_mat), Some(az_mat)) => (ax_mat, az_mat),
            _ => return (Array1::zeros(n_constraints), Array2::zeros((n_constraints, x.len()))),
        };

        let currents: Array1<f64> = x * CURRENT_SCALE;
        let bx: Array1<f64> = ax_mat.dot(&currents) + &self.bxp_vec;
        let bz: Array1<f64> = az_mat.dot(&currents) + &self.bzp_vec;
        let b: Array1<f64> = ndarray::Zip::from(&bx).and(&bz).map_collect(|&bx, &bz| bx.hypot(bz));

        let mut jacobian: Array2<f64> = Array2::zeros((n_constraints, x.len()));
        for i_constraint in 0..n_constraints {
            if b[i_constraint] > 0.0 {
                let row: Array1<f64> = (bx[i_constraint] * &ax_mat.row(i_constraint) + bz[i_constraint] * &az_mat.row(i_constraint)) * (CURRENT_SCALE / b[i_constraint]);
                jacobian.row_mut(i_constraint).assign(&row);
            }
        }
        return (b - &self.b_max, jacobian);
    }
}

impl CoilConstraint for CoilFieldConstraints {
    fn prepare(&mut self, state: &dyn MagneticState, fixed_coils: bool) -> EquilibriaResult<()> {
        let (x, z): (Array1<f64>, Array1<f64>) = self.peak_field_points(state.coilset());
        if !fixed_coils || self.ax_mat.is_none() {
            let (ax_mat, az_mat): (Array2<f64>, Array2<f64>) = state.coilset().field_response(&x, &z, CoilSelection::Control);
            self.ax_mat = Some(ax_mat);
            self.az_mat = Some(az_mat);
        }
        let (bxp_vec, bzp_vec): (Array1<f64>, Array1<f64>) = background_field(state, ResponseMode::Current, &x, &z)?;
        self.bxp_vec = bxp_vec;
        self.bzp_vec = bzp_vec;
        return Ok(());
    }

    fn as_constraint_function(&self) -> &dyn ConstraintFunction {
        return self;
    }

    fn clone_box(&self) -> Box<dyn CoilConstraint> {
        return Box::new(self.clone());
    }
}

/// Vertical force limits on the PF coils and the CS stack, mega-newton
///
/// Forces are quadratic in the control currents, F_i = I_i (Σ_j a_ij I_j + b_i), with a_ij the force on coil i
/// per ampere in coils i and j, and b_i the force per ampere from the background field.
///
/// Constraint rows:
/// * each PF coil: F_z^2 - PF_Fz_max^2
/// * the CS stack: (Σ F_z)^2 - CS_Fz_sum_max^2
/// * each gap in the CS stack: (Σ F_z above) - (Σ F_z below) - CS_Fz_sep_max
#[derive(Clone, Debug)]
pub struct CoilForceConstraints {
    pf_fz_max: f64,
    cs_fz_sum_max: f64,
    cs_fz_sep_max: f64,
    /// Indices among the control coils
    i_pf: Vec<usize>,
    i_cs: Vec<usize>,
    /// Vertical force response, shape = (n_control, n_control)
    a_mat: Option<Array2<f64>>,
    b_vec: Array1<f64>,
}

impl CoilForceConstraints {
    pub fn new(coilset: &CoilSet, pf_fz_max: f64, cs_fz_sum_max: f64, cs_fz_sep_max: f64) -> Self {
        let control_coils: Vec<&Coil> = coilset.coils().iter().filter(|coil| coil.control()).collect();
        let i_pf: Vec<usize> = (0..control_coils.len()).filter(|&i_coil| control_coils[i_coil].ctype() == CoilType::PF).collect();
        let i_cs: Vec<usize> = (0..control_coils.len()).filter(|&i_coil| control_coils[i_coil].ctype() == CoilType::CS).collect();
        return CoilForceConstraints {
            pf_fz_max,
            cs_fz_sum_max,
            cs_fz_sep_max,
            i_pf,
            i_cs,
            a_mat: None,
            b_vec: Array1::zeros(control_coils.len()),
        };
    }

    /// Vertical forces on the control coils, mega-newton, and their Jacobian with respect to the scaled currents
    fn vertical_forces(&self, a_mat: &Array2<f64>, x: &Array1<f64>) -> (Array1<f64>, Array2<f64>) {
        let n_control: usize = x.len();
        let currents: Array1<f64> = x * CURRENT_SCALE;
        let field_term: Array1<f64> = a_mat.dot(&currents) + &self.b_vec;
        let forces: Array1<f64> = &currents * &field_term / CURRENT_SCALE;

        // dF_i/dx_k = δ_ik (Σ_j a_ij I_j + b_i) + I_i a_ik, in MN per MA
        let mut jacobian: Array2<f64> = Array2::zeros((n_control, n_control));
        for i_coil in 0..n_control {
            for k_coil in 0..n_control {
                jacobian[[i_coil, k_coil]] = currents[i_coil] * a_mat[[i_coil, k_coil]];
            }
            jacobian[[i_coil, i_coil]] += field_term[i_coil];
        }
        return (forces, jacobian);
    }
}

impl ConstraintFunction for CoilForceConstraints {
    fn n_constraints(&self) -> usize {
        return self.i_pf.len() + self.i_cs.len();
    }

    fn evaluate(&self, x: &Array1<f64>) -> (Array1<f64>, Array2<f64>) {
        let n_constraints: usize = self.n_constraints();
        let mut values: Array1<f64> = Array1::zeros(n_constraints);
        let mut jacobian: Array2<f64> = Array2::zeros((n_constraints, x.len()));
        let a_mat: &Array2<f64> = match &self.a_mat {
            Some(a_mat) => a_mat,
            None => return (values, jacobian),
        };
        let (forces, d_forces): (Array1<f64>, Array2<f64>) = self.vertical_forces(a_mat, x);

        let n_pf: usize = self.i_pf.len();
        for (i_row, &i_coil) in self.i_pf.iter().enumerate() {
            values[i_row] = forces[i_coil].powi(2) - self.pf_fz_max.powi(2);
            jacobian.row_mut(i_row).assign(&(2.0 * forces[i_coil] * &d_forces.row(i_coil)));
        }

        if !self.i_cs.is_empty() {
            let cs_sum: f64 = self.i_cs.iter().map(|&i_coil| forces[i_coil]).sum();
            let d_cs_sum: Array1<f64> = self.i_cs.iter().fold(Array1::zeros(x.len()), |acc: Array1<f64>, &i_coil| acc + d_forces.row(i_coil));
            values[n_pf] = cs_sum.powi(2) - self.cs_fz_sum_max.powi(2);
            jacobian.row_mut(n_pf).assign(&(2.0 * cs_sum * &d_cs_sum));

            // Separation force at each gap in the stack
            let n_cs: usize = self.i_cs.len();
            for i_gap in 0..n_cs - 1 {
                let mut f_separation: f64 = 0.0;
                let mut d_separation: Array1<f64> = Array1::zeros(x.len());
                for (i_stack, &i_coil) in self.i_cs.iter().enumerate() {
                    let sign: f64 = if i_stack <= i_gap { 1.0 } else { -1.0 };
                    f_separation += sign * forces[i_coil];
                    d_separation = d_separation + sign * &d_forces.row(i_coil);
                }
                values[n_pf + 1 + i_gap] = f_separation - self.cs_fz_sep_max;
                jacobian.row_mut(n_pf + 1 + i_gap).assign(&d_separation);
            }
        }
        return (values, jacobian);
    }
}

impl CoilConstraint for CoilForceConstraints {
    fn prepare(&mut self, state: &dyn MagneticState, fixed_coils: bool) -> EquilibriaResult<()> {
        let coilset: &CoilSet = state.coilset();
        let control_coils: Vec<&Coil> = coilset.coils().iter().filter(|coil| coil.control()).collect();
        let x: Array1<f64> = control_coils.iter().map(|coil| coil.x()).collect();
        let z: Array1<f64> = control_coils.iter().map(|coil| coil.z()).collect();

        if !fixed_coils || self.a_mat.is_none() {
            // F_z = -2π R I B_R
            let ax_mat: Array2<f64> = coilset.control_bx(&x, &z);
            let two_pi_r: Array1<f64> = &x * (2.0 * PI);
            let a_mat: Array2<f64> = -(ax_mat * &two_pi_r.view().insert_axis(ndarray::Axis(1)));
            self.a_mat = Some(a_mat);
        }
        let (bx_background, _bz_background): (Array1<f64>, Array1<f64>) = background_field(state, ResponseMode::Current, &x, &z)?;
        self.b_vec = -2.0 * PI * &x * &bx_background;
        return Ok(());
    }

    fn as_constraint_function(&self) -> &dyn ConstraintFunction {
        return self;
    }

    fn clone_box(&self) -> Box<dyn CoilConstraint> {
        return Box::new(self.clone());
    }
}

#[cfg(test)]
fn check_jacobian(constraint: &dyn ConstraintFunction, x: &Array1<f64>) {
    use super::algorithms::finite_difference_jacobian;
    use approx::assert_abs_diff_eq;

    let (_values, analytic): (Array1<f64>, Array2<f64>) = constraint.evaluate(x);
    let numeric: Array2<f64> = finite_difference_jacobian(|trial| Ok(constraint.evaluate(trial).0), x, 1e-5).expect("finite differences");
    let scale: f64 = analytic.iter().fold(1.0_f64, |acc, value| acc.max(value.abs()));
    assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-5 * scale);
}

#[test]
fn test_coil_force_constraint_jacobian() {
    // Lazy loading of packages which are not used anywhere else in the code
    use crate::equilibrium::Breakdown;
    use crate::grid::Grid;

    let coils: Vec<Coil> = vec![
        Coil::new(5.0, 7.0, 0.4, 0.4).expect("coil").with_current(3e6),
        Coil::new(14.0, 0.0, 0.5, 0.5).expect("coil").with_current(-2e6),
        Coil::new(2.0, 2.0, 0.3, 1.0).expect("coil").with_ctype(CoilType::CS).with_current(1e6),
        Coil::new(2.0, -0.1, 0.3, 1.0).expect("coil").with_ctype(CoilType::CS).with_current(-1e6),
        Coil::new(2.0, -2.2, 0.3, 1.0).expect("coil").with_ctype(CoilType::CS).with_current(2e6),
    ];
    let coilset: CoilSet = CoilSet::new(coils).expect("coilset");
    let grid: Grid = Grid::new(3.0, 13.0, -8.0, 8.0, 17, 17).expect("grid");
    let breakdown: Breakdown = Breakdown::new(grid, coilset, None).expect("breakdown");

    let mut constraint: CoilForceConstraints = CoilForceConstraints::new(breakdown.coilset(), 100.0, 300.0, 250.0);
    constraint.prepare(&breakdown, false).expect("prepare");
    assert_eq!(constraint.n_constraints(), 2 + 3);

    let x: Array1<f64> = breakdown.coilset().get_control_currents() / CURRENT_SCALE;
    check_jacobian(&constraint, &x);

    // At the present currents the quadratic force model reproduces the direct Lorentz force
    let forces: Array2<f64> = breakdown.coilset().get_coil_forces(&Array1::zeros(5), &Array1::zeros(5)).expect("forces");
    let (values, _jacobian): (Array1<f64>, Array2<f64>) = constraint.evaluate(&x);
    let fz_pf_0: f64 = forces[[0, 1]] / CURRENT_SCALE;
    approx::assert_relative_eq!(values[0], fz_pf_0.powi(2) - 100.0_f64.powi(2), max_relative = 1e-9);
}

#[test]
fn test_coil_field_constraint_jacobian() {
    // Lazy loading of packages which are not used anywhere else in the code
    use crate::equilibrium::Breakdown;
    use crate::grid::Grid;

    let coils: Vec<Coil> = vec![
        Coil::new(5.0, 7.0, 0.4, 0.4).expect("coil").with_current(3e6).with_b_max(11.5),
        Coil::new(14.0, 0.0, 0.5, 0.5).expect("coil").with_current(-2e6).with_b_max(11.5),
        Coil::new(14.0, 5.0, 0.5, 0.5).expect("coil").with_current(1e6),
    ];
    let coilset: CoilSet = CoilSet::new(coils).expect("coilset");
    let grid: Grid = Grid::new(3.0, 13.0, -8.0, 8.0, 17, 17).expect("grid");
    let breakdown: Breakdown = Breakdown::new(grid, coilset, None).expect("breakdown");

    let mut constraint: CoilFieldConstraints = CoilFieldConstraints::new(breakdown.coilset());
    constraint.prepare(&breakdown, false).expect("prepare");
    assert_eq!(constraint.n_constraints(), 2);

    let x: Array1<f64> = breakdown.coilset().get_control_currents() / CURRENT_SCALE;
    check_jacobian(&constraint, &x);
}
