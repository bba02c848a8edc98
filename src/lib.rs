//! Free-boundary Grad-Shafranov equilibrium engine for tokamak coil set design
//!
//! An `Equilibrium` owns a grid, a coil set, a plasma profile and the plasma flux. `PicardIterator` alternates
//! coil set optimisation (`optimisation`) with Grad-Shafranov solves until the flux stops changing.

// Load modules
pub mod cache;
pub mod coils;
pub mod constants;
pub mod equilibrium;
pub mod error;
pub mod grad_shafranov;
pub mod greens;
pub mod grid;
pub mod limiter;
pub mod optimisation;
pub mod picard;
pub mod plasma_geometry;
pub mod profiles;

// Expose functions to public
pub use coils::{Coil, CoilSelection, CoilSet, CoilType};
pub use equilibrium::{
    Boundary, Breakdown, CoilSummary, EqdskRecord, Equilibrium, EquilibriumSettings, MagneticState, PlasmaSummary, Snapshot, VerticalControl, VirtualController,
};
pub use error::{EquilibriaError, EquilibriaResult};
pub use grid::Grid;
pub use limiter::Limiter;
pub use picard::{ConvergenceCriterion, DudsonConvergence, LiConvergence, PicardIterator, PicardResult, PicardSettings};
pub use profiles::{BetaIpProfile, CustomProfile, DoublePowerShape, PolynomialShape, Profile, ShapeFunction};
