use super::algorithms::{ConstraintFunction, Evaluation, OptimiserConditions, OptimiserResult, augmented_lagrangian_bounded, nelder_mead_bounded};
use super::coil_constraints::CoilConstraint;
use super::constraints::{MagneticConstraintSet, ResponseMode};
use super::objectives::{regularised_lsq_fom, regularised_lsq_objective, tikhonov};
use super::position_mapper::PositionMapper;
use crate::coils::{Coil, CoilSet};
use crate::constants::CURRENT_SCALE;
use crate::equilibrium::MagneticState;
use crate::error::{EquilibriaError, EquilibriaResult};
use log::{debug, warn};
use ndarray::{Array1, Array2, concatenate, s, Axis};

/// Weight on the squared constraint violation added to the derivative-free position objectives
const POSITION_PENALTY_WEIGHT: f64 = 1e3;

/// Result of a coil set optimisation
#[derive(Clone, Debug)]
pub struct CoilsetOptimiserResult {
    /// The coil set after optimisation
    pub coilset: CoilSet,
    /// Optimal variable vector, currents in mega-amperes
    pub x: Array1<f64>,
    pub f_x: f64,
    pub n_evals: usize,
    pub converged: bool,
}

impl CoilsetOptimiserResult {
    fn from_optimiser_result(coilset: &CoilSet, result: OptimiserResult) -> Self {
        return CoilsetOptimiserResult {
            coilset: coilset.clone(),
            x: result.x,
            f_x: result.f_x,
            n_evals: result.n_evals,
            converged: result.converged,
        };
    }
}

/// A problem that chooses coil set currents, and possibly positions, for a magnetic state
///
/// The state's coil set is mutated in place and left at the optimum.
pub trait CoilsetOptimisationProblem {
    /// # Arguments
    /// * `fixed_coils` - the coil geometry is unchanged since the last call, so response matrices can be reused
    fn optimise(&mut self, state: &mut dyn MagneticState, fixed_coils: bool) -> EquilibriaResult<CoilsetOptimiserResult>;

    fn targets(&self) -> &MagneticConstraintSet;

    fn targets_mut(&mut self) -> &mut MagneticConstraintSet;
}

/// Symmetric bounds on the scaled control currents
///
/// The limit on each coil is the smaller of `max_currents` and, for size-fixed coils, the current allowed by
/// the coil's current density limit. `max_currents` may have length one, applying to every control coil.
///
/// # Returns
/// * `(lower, upper)` - mega-amperes
///
/// # Errors
/// `EquilibriaError::CurrentBoundsLength` if `max_currents` has the wrong length
pub fn get_current_bounds(coilset: &CoilSet, max_currents: Option<&Array1<f64>>, scale: f64) -> EquilibriaResult<(Array1<f64>, Array1<f64>)> {
    let n_control: usize = coilset.n_control();
    let input_limits: Array1<f64> = match max_currents {
        None => Array1::from_elem(n_control, f64::INFINITY),
        Some(limits) if limits.len() == 1 => Array1::from_elem(n_control, limits[0] / scale),
        Some(limits) if limits.len() == n_control => limits / scale,
        Some(limits) => {
            return Err(EquilibriaError::CurrentBoundsLength {
                n_bounds: limits.len(),
                n_control,
            });
        }
    };

    let control_coils: Vec<&Coil> = coilset.coils().iter().filter(|coil| coil.control()).collect();
    let coil_limits: Array1<f64> = control_coils
        .iter()
        .map(|coil| if coil.size_fixed() { coil.get_max_current() / scale } else { f64::INFINITY })
        .collect();

    let limits: Array1<f64> = ndarray::Zip::from(&input_limits).and(&coil_limits).map_collect(|&a, &b| a.min(b).abs());
    return Ok((-&limits, limits));
}

fn clip(x: &Array1<f64>, lower: &Array1<f64>, upper: &Array1<f64>) -> Array1<f64> {
    return ndarray::Zip::from(x).and(lower).and(upper).map_collect(|&value, &low, &high| value.clamp(low, high));
}

/// Squared violation of a set of constraints at `x`
fn constraint_penalty(constraints: &[Box<dyn CoilConstraint>], x: &Array1<f64>) -> f64 {
    let mut penalty: f64 = 0.0;
    for constraint in constraints.iter() {
        let (values, _jacobian): (Array1<f64>, Array2<f64>) = constraint.evaluate(x);
        penalty += values.iter().map(|&value| value.max(0.0).powi(2)).sum::<f64>();
    }
    return penalty;
}

/// Control current increments from Tikhonov-regularised least squares, without bounds
///
/// The targets are built in current-increment mode, and the closed-form solution is added to the present
/// control currents.
#[derive(Clone, Debug)]
pub struct UnconstrainedCurrentCOP {
    targets: MagneticConstraintSet,
    gamma: f64,
}

impl UnconstrainedCurrentCOP {
    pub fn new(targets: MagneticConstraintSet, gamma: f64) -> Self {
        return UnconstrainedCurrentCOP { targets, gamma };
    }
}

impl CoilsetOptimisationProblem for UnconstrainedCurrentCOP {
    fn optimise(&mut self, state: &mut dyn MagneticState, fixed_coils: bool) -> EquilibriaResult<CoilsetOptimiserResult> {
        self.targets.update(&*state, ResponseMode::CurrentIncrement, fixed_coils)?;
        let (_weights, a_mat, b_vec): (Array1<f64>, Array2<f64>, Array1<f64>) = self.targets.get_weighted_arrays()?;

        let current_adjustment: Array1<f64> = tikhonov(&a_mat, &b_vec, self.gamma)?;
        let (f_x, _residual): (f64, Array1<f64>) = regularised_lsq_fom(&current_adjustment, &a_mat, &b_vec, self.gamma);
        state.coilset_mut().adjust_control_currents(&current_adjustment)?;
        debug!("UnconstrainedCurrentCOP: max |dI| = {:.3e} A", current_adjustment.iter().fold(0.0_f64, |acc, value| acc.max(value.abs())));

        return Ok(CoilsetOptimiserResult {
            coilset: state.coilset().clone(),
            x: state.coilset().get_control_currents() / CURRENT_SCALE,
            f_x,
            n_evals: 1,
            converged: true,
        });
    }

    fn targets(&self) -> &MagneticConstraintSet {
        return &self.targets;
    }

    fn targets_mut(&mut self) -> &mut MagneticConstraintSet {
        return &mut self.targets;
    }
}

/// Control currents from regularised least squares inside current bounds, with optional coil constraints
///
/// Works on absolute currents in mega-amperes. The start point is the present currents clipped to the bounds.
#[derive(Clone, Debug)]
pub struct BoundedCurrentCOP {
    targets: MagneticConstraintSet,
    gamma: f64,
    max_currents: Option<Array1<f64>>,
    conditions: OptimiserConditions,
    constraints: Vec<Box<dyn CoilConstraint>>,
}

impl BoundedCurrentCOP {
    /// # Errors
    /// `EquilibriaError::CurrentBoundsLength` if `max_currents` does not match the control coils
    pub fn new(
        coilset: &CoilSet,
        targets: MagneticConstraintSet,
        gamma: f64,
        max_currents: Option<Array1<f64>>,
        conditions: OptimiserConditions,
        constraints: Vec<Box<dyn CoilConstraint>>,
    ) -> EquilibriaResult<Self> {
        // Fail early on inconsistent bounds
        get_current_bounds(coilset, max_currents.as_ref(), CURRENT_SCALE)?;
        return Ok(BoundedCurrentCOP {
            targets,
            gamma,
            max_currents,
            conditions,
            constraints,
        });
    }
}

impl CoilsetOptimisationProblem for BoundedCurrentCOP {
    fn optimise(&mut self, state: &mut dyn MagneticState, fixed_coils: bool) -> EquilibriaResult<CoilsetOptimiserResult> {
        self.targets.update(&*state, ResponseMode::Current, fixed_coils)?;
        let (_weights, a_mat, b_vec): (Array1<f64>, Array2<f64>, Array1<f64>) = self.targets.get_weighted_arrays()?;
        for constraint in self.constraints.iter_mut() {
            constraint.prepare(&*state, fixed_coils)?;
        }

        let (lower, upper): (Array1<f64>, Array1<f64>) = get_current_bounds(state.coilset(), self.max_currents.as_ref(), CURRENT_SCALE)?;
        let x0: Array1<f64> = clip(&(state.coilset().get_control_currents() / CURRENT_SCALE), &lower, &upper);

        let gamma: f64 = self.gamma;
        let objective = |vector: &Array1<f64>| -> EquilibriaResult<(f64, Array1<f64>)> {
            return Ok(regularised_lsq_objective(vector, CURRENT_SCALE, &a_mat, &b_vec, gamma));
        };
        let constraint_functions: Vec<&dyn ConstraintFunction> = self.constraints.iter().map(|constraint| constraint.as_constraint_function()).collect();
        let result: OptimiserResult = augmented_lagrangian_bounded(objective, &constraint_functions, &x0, &lower, &upper, &self.conditions)?;
        if !result.converged {
            warn!("BoundedCurrentCOP: optimiser did not converge after {} evaluations, f = {:.6e}", result.n_evals, result.f_x);
        }

        state.coilset_mut().set_control_currents(&(&result.x * CURRENT_SCALE))?;
        return Ok(CoilsetOptimiserResult::from_optimiser_result(state.coilset(), result));
    }

    fn targets(&self) -> &MagneticConstraintSet {
        return &self.targets;
    }

    fn targets_mut(&mut self) -> &mut MagneticConstraintSet {
        return &mut self.targets;
    }
}

/// Place the mapped coils at the positions encoded in `mapped`
fn set_mapped_positions(state: &mut dyn MagneticState, mapper: &PositionMapper, mapped: &Array1<f64>) -> EquilibriaResult<()> {
    let (x, z): (Array1<f64>, Array1<f64>) = mapper.to_xz(mapped)?;
    for (i_coil, name) in mapper.names().iter().enumerate() {
        state.coilset_mut().set_position(name, x[i_coil], z[i_coil])?;
    }
    return Ok(());
}

fn mapped_positions(state: &dyn MagneticState, mapper: &PositionMapper) -> EquilibriaResult<Array1<f64>> {
    let mut x: Array1<f64> = Array1::zeros(mapper.names().len());
    let mut z: Array1<f64> = Array1::zeros(mapper.names().len());
    for (i_coil, name) in mapper.names().iter().enumerate() {
        let coil: &Coil = state.coilset().coil(name)?;
        x[i_coil] = coil.x();
        z[i_coil] = coil.z();
    }
    return mapper.to_l(&x, &z);
}

/// Coil positions and currents optimised together as one flat vector
///
/// The vector is [mapped positions..., scaled control currents...]. Positions are mapped into their regions,
/// so the unit box bounds keep every coil inside its region. The search is derivative-free; coil constraints
/// are added to the objective as a squared-violation penalty.
#[derive(Clone, Debug)]
pub struct CoilsetPositionCOP {
    targets: MagneticConstraintSet,
    position_mapper: PositionMapper,
    gamma: f64,
    max_currents: Option<Array1<f64>>,
    conditions: OptimiserConditions,
    constraints: Vec<Box<dyn CoilConstraint>>,
    initial_step: f64,
}

impl CoilsetPositionCOP {
    pub fn new(
        coilset: &CoilSet,
        targets: MagneticConstraintSet,
        position_mapper: PositionMapper,
        gamma: f64,
        max_currents: Option<Array1<f64>>,
        conditions: OptimiserConditions,
        constraints: Vec<Box<dyn CoilConstraint>>,
    ) -> EquilibriaResult<Self> {
        get_current_bounds(coilset, max_currents.as_ref(), CURRENT_SCALE)?;
        for name in position_mapper.names() {
            coilset.coil(name)?;
        }
        return Ok(CoilsetPositionCOP {
            targets,
            position_mapper,
            gamma,
            max_currents,
            conditions,
            constraints,
            initial_step: 0.05,
        });
    }

    /// Size of the initial simplex, relative to each variable's bounds
    pub fn with_initial_step(mut self, initial_step: f64) -> Self {
        self.initial_step = initial_step;
        return self;
    }
}

impl CoilsetOptimisationProblem for CoilsetPositionCOP {
    fn optimise(&mut self, state: &mut dyn MagneticState, _fixed_coils: bool) -> EquilibriaResult<CoilsetOptimiserResult> {
        let n_positions: usize = self.position_mapper.dimension();
        let (current_lower, current_upper): (Array1<f64>, Array1<f64>) = get_current_bounds(state.coilset(), self.max_currents.as_ref(), CURRENT_SCALE)?;
        let initial_currents: Array1<f64> = clip(&(state.coilset().get_control_currents() / CURRENT_SCALE), &current_lower, &current_upper);
        let initial_positions: Array1<f64> = mapped_positions(&*state, &self.position_mapper)?;

        let x0: Array1<f64> = concatenate![Axis(0), initial_positions, initial_currents];
        let lower: Array1<f64> = concatenate![Axis(0), Array1::zeros(n_positions), current_lower];
        let upper: Array1<f64> = concatenate![Axis(0), Array1::ones(n_positions), current_upper];

        let targets: &mut MagneticConstraintSet = &mut self.targets;
        let constraints: &mut Vec<Box<dyn CoilConstraint>> = &mut self.constraints;
        let mapper: &PositionMapper = &self.position_mapper;
        let gamma: f64 = self.gamma;
        let objective = |vector: &Array1<f64>| -> EquilibriaResult<Evaluation> {
            let mapped: Array1<f64> = vector.slice(s![..n_positions]).to_owned();
            let currents: Array1<f64> = vector.slice(s![n_positions..]).to_owned();
            set_mapped_positions(state, mapper, &mapped)?;
            state.coilset_mut().set_control_currents(&(&currents * CURRENT_SCALE))?;

            targets.update(&*state, ResponseMode::Current, false)?;
            let (_weights, a_mat, b_vec): (Array1<f64>, Array2<f64>, Array1<f64>) = targets.get_weighted_arrays()?;
            let (fom, _residual): (f64, Array1<f64>) = regularised_lsq_fom(&(&currents * CURRENT_SCALE), &a_mat, &b_vec, gamma);

            for constraint in constraints.iter_mut() {
                constraint.prepare(&*state, false)?;
            }
            let penalty: f64 = constraint_penalty(constraints.as_slice(), &currents);
            return Ok(Evaluation::Continue(fom + POSITION_PENALTY_WEIGHT * penalty));
        };
        let result: OptimiserResult = nelder_mead_bounded(objective, &x0, &lower, &upper, self.initial_step, &self.conditions)?;
        if !result.converged {
            warn!("CoilsetPositionCOP: optimiser did not converge after {} evaluations, f = {:.6e}", result.n_evals, result.f_x);
        }

        // Leave the coil set at the optimum
        set_mapped_positions(state, &self.position_mapper, &result.x.slice(s![..n_positions]).to_owned())?;
        state.coilset_mut().set_control_currents(&(&result.x.slice(s![n_positions..]) * CURRENT_SCALE))?;
        return Ok(CoilsetOptimiserResult::from_optimiser_result(state.coilset(), result));
    }

    fn targets(&self) -> &MagneticConstraintSet {
        return &self.targets;
    }

    fn targets_mut(&mut self) -> &mut MagneticConstraintSet {
        return &mut self.targets;
    }
}

/// Coil positions optimised with a current sub-problem solved at every trial position
///
/// The outer search works on mapped positions only. Each evaluation moves the coils, resets the control
/// currents to their values at the start of `optimise`, runs the owned inner problem, and returns its
/// figure of merit.
#[derive(Clone, Debug)]
pub struct NestedCoilsetPositionCOP<P: CoilsetOptimisationProblem> {
    sub_problem: P,
    position_mapper: PositionMapper,
    conditions: OptimiserConditions,
    initial_step: f64,
}

impl<P: CoilsetOptimisationProblem> NestedCoilsetPositionCOP<P> {
    pub fn new(sub_problem: P, position_mapper: PositionMapper, conditions: OptimiserConditions) -> Self {
        return NestedCoilsetPositionCOP {
            sub_problem,
            position_mapper,
            conditions,
            initial_step: 0.05,
        };
    }

    pub fn with_initial_step(mut self, initial_step: f64) -> Self {
        self.initial_step = initial_step;
        return self;
    }

    pub fn sub_problem(&self) -> &P {
        return &self.sub_problem;
    }
}

impl<P: CoilsetOptimisationProblem> CoilsetOptimisationProblem for NestedCoilsetPositionCOP<P> {
    fn optimise(&mut self, state: &mut dyn MagneticState, _fixed_coils: bool) -> EquilibriaResult<CoilsetOptimiserResult> {
        let n_positions: usize = self.position_mapper.dimension();
        let initial_currents: Array1<f64> = state.coilset().get_control_currents();
        let x0: Array1<f64> = mapped_positions(&*state, &self.position_mapper)?;

        let sub_problem: &mut P = &mut self.sub_problem;
        let mapper: &PositionMapper = &self.position_mapper;
        let mut n_sub_evals: usize = 0;
        let objective = |mapped: &Array1<f64>| -> EquilibriaResult<Evaluation> {
            set_mapped_positions(state, mapper, mapped)?;
            state.coilset_mut().set_control_currents(&initial_currents)?;
            let sub_result: CoilsetOptimiserResult = sub_problem.optimise(state, false)?;
            n_sub_evals += sub_result.n_evals;
            return Ok(Evaluation::Continue(sub_result.f_x));
        };
        let result: OptimiserResult = nelder_mead_bounded(objective, &x0, &Array1::zeros(n_positions), &Array1::ones(n_positions), self.initial_step, &self.conditions)?;
        debug!("NestedCoilsetPositionCOP: {} outer and {n_sub_evals} inner evaluations", result.n_evals);
        if !result.converged {
            warn!("NestedCoilsetPositionCOP: optimiser did not converge after {} evaluations, f = {:.6e}", result.n_evals, result.f_x);
        }

        // Re-run the sub-problem at the optimal positions so the coil set holds its currents
        set_mapped_positions(state, &self.position_mapper, &result.x)?;
        state.coilset_mut().set_control_currents(&initial_currents)?;
        let final_result: CoilsetOptimiserResult = self.sub_problem.optimise(state, false)?;

        return Ok(CoilsetOptimiserResult {
            coilset: final_result.coilset,
            x: result.x,
            f_x: final_result.f_x,
            n_evals: result.n_evals,
            converged: result.converged,
        });
    }

    fn targets(&self) -> &MagneticConstraintSet {
        return self.sub_problem.targets();
    }

    fn targets_mut(&mut self) -> &mut MagneticConstraintSet {
        return self.sub_problem.targets_mut();
    }
}
