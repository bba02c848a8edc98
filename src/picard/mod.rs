// Load modules
mod convergence;
mod iterator;

// Expose functions to public
pub use convergence::{ConvergenceCriterion, DudsonConvergence, LiConvergence};
pub use iterator::{PicardIterator, PicardResult, PicardSettings};
