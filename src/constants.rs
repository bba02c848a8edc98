/// Normalised flux offset used when a flux surface is requested exactly at the axis or the boundary,
/// and the relative flux window that classifies two X-points as a double null
pub const PSI_NORM_TOL: f64 = 1e-2;

/// Relative tolerance on the internal inductance target, below which the li optimiser stops
pub const LI_REL_TOL: f64 = 1e-2;

/// Currents are optimised in mega-amperes
pub const CURRENT_SCALE: f64 = 1e6;

/// Lower limit on a coil half-width when sizing from current density, metre
pub const COIL_MIN_HALF_WIDTH: f64 = 1e-3;
