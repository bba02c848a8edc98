// Load modules
mod coil;
mod coilset;

// Expose functions to public
pub use coil::{Coil, CoilFilaments, CoilType};
pub use coilset::{CoilSelection, CoilSet};
