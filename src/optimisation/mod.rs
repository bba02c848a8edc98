// Load modules
mod algorithms;
mod coil_constraints;
mod constraints;
mod objectives;
mod position_mapper;
mod problems;

// Expose functions to public
pub use algorithms::{ConstraintFunction, Evaluation, OptimiserConditions, OptimiserResult, augmented_lagrangian_bounded, finite_difference_jacobian, nelder_mead_bounded};
pub use coil_constraints::{CoilConstraint, CoilFieldConstraints, CoilForceConstraints};
pub use constraints::{
    AutoConstraints, FieldNullConstraint, IsofluxConstraint, MagneticConstraint, MagneticConstraintSet, PsiBoundaryConstraint, PsiConstraint, ResponseMode,
    background_field, background_psi, resample_closed_loop,
};
pub use objectives::{regularised_lsq_fom, regularised_lsq_objective, tikhonov};
pub use position_mapper::{PositionMapper, RegionInterpolator};
pub use problems::{
    BoundedCurrentCOP, CoilsetOptimisationProblem, CoilsetOptimiserResult, CoilsetPositionCOP, NestedCoilsetPositionCOP, UnconstrainedCurrentCOP, get_current_bounds,
};
