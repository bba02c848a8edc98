// Load modules
mod analysis;
mod breakdown;
mod controller;
mod equilibrium;
mod record;
mod settings;
mod snapshot;
mod state;

// Expose functions to public
pub use analysis::{CoilSummary, PlasmaSummary, analyse_coils};
pub use breakdown::Breakdown;
pub use controller::VirtualController;
pub use equilibrium::{Equilibrium, GridOperators, initial_psi};
pub use record::EqdskRecord;
pub use settings::{Boundary, EquilibriumSettings, VerticalControl};
pub use snapshot::Snapshot;
pub use state::MagneticState;
