// Load modules
mod bicubic_interpolator;
mod core_region;
mod critical_points;
mod flux_surface;
pub mod hessian;
mod interpolation;

// Expose functions to public
pub use bicubic_interpolator::{BicubicInterpolator, BicubicStationaryPoint, BicubicValueAndDerivatives};
pub use core_region::{CoreRegion, find_core_region, flood_fill_mask};
pub use critical_points::{CriticalPoint, CriticalPoints, PsiGradients, find_critical_points, psi_curvatures, psi_gradients};
pub use flux_surface::{FluxSurface, FluxSurfaceGeometry, LCFS_PSI_NORM, find_flux_surface, find_separatrix, nudge_psi_norm};
pub use hessian::{StationaryKind, classify_stationary_point};
pub use interpolation::{interpolate_map, interpolate_map_at};
