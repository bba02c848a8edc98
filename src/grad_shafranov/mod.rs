// Load modules
mod free_boundary;
mod operator;
mod solver;

// Expose functions to public
pub use free_boundary::FreeBoundaryKernel;
pub use operator::{apply_gs_operator, gs_operator};
pub use solver::GsSolver;
