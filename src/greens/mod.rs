// Load modules
mod greens_magnetic_field;
mod greens_psi;

// Expose functions to public
pub use greens_magnetic_field::{greens_magnetic_field, greens_magnetic_field_filament};
pub use greens_psi::{greens_psi, greens_psi_filament, self_inductance};

/// Smallest regularisation radius, relative to the source radius, so a true filament stays finite
const MIN_RELATIVE_RADIUS: f64 = 1e-6;

/// Project a sensor that sits inside a source's current radius onto that radius
///
/// A sensor exactly on the source is moved outwards in R. Sensors outside the radius are unchanged,
/// so the Green's functions stay continuous across it.
///
/// # Arguments
/// * `r`, `z` - sensor location, metre
/// * `r_prime`, `z_prime` - source location, metre
/// * `radius` - current radius of the source, metre
///
/// # Returns
/// * `(r, z)` - location to evaluate the Green's function at
pub fn regularised_location(r: f64, z: f64, r_prime: f64, z_prime: f64, radius: f64) -> (f64, f64) {
    let radius: f64 = radius.max(MIN_RELATIVE_RADIUS * r_prime.abs());
    let delta_r: f64 = r - r_prime;
    let delta_z: f64 = z - z_prime;
    let distance: f64 = delta_r.hypot(delta_z);

    if distance >= radius {
        return (r, z);
    }
    if distance == 0.0 {
        return (r_prime + radius, z_prime);
    }
    let scale: f64 = radius / distance;
    return (r_prime + delta_r * scale, z_prime + delta_z * scale);
}
