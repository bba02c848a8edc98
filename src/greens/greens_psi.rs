use super::regularised_location;
use core::f64;
use ndarray::{Array1, Array2, s};
use physical_constants;
use rayon::prelude::*;
use spec_math::cephes64::ellpe; // complete elliptic integral of the second kind
use spec_math::cephes64::ellpk; // complete elliptic integral of the first kind

// Global constants
const MU_0: f64 = physical_constants::VACUUM_MAG_PERMEABILITY;
const PI: f64 = std::f64::consts::PI;

/// Poloidal flux per radian at (r, z) from a unit current filament at (r_prime, z_prime)
///
/// The expression is invariant under the exchange of (r, z) with (r_prime, z_prime).
/// Callers are responsible for keeping the two points apart (see `regularised_location`).
pub fn greens_psi_filament(r: f64, z: f64, r_prime: f64, z_prime: f64) -> f64 {
    if r <= 0.0 || r_prime <= 0.0 {
        return 0.0;
    }
    let rr: f64 = r * r_prime;
    let k_sq: f64 = 4.0 * rr / ((r + r_prime).powi(2) + (z - z_prime).powi(2));
    let k: f64 = k_sq.sqrt();
    let elliptic_integral_e: f64 = ellpe(k_sq);
    let elliptic_integral_k: f64 = ellpk(1.0 - k_sq); // very annoying how this is defined

    return MU_0 / (2.0 * PI) * rr.sqrt() * ((2.0 - k_sq) * elliptic_integral_k - 2.0 * elliptic_integral_e) / k;
}

/// Calculates the flux Green's table between "sensors" and "current sources"
///
/// Equations taken from:
/// J.-M. Moret et. al., "Tokamak equilibrium reconstruction code LIUQE and its real time implementation" Fusion Eng. Des., 2015
///
/// The flux is per radian, psi = G * current, with G = M / (2 * pi) where M is the mutual inductance.
///
/// A sensor closer to a source than the source's current radius (`0.5 * hypot(d_r_prime, d_z_prime)`)
/// is projected radially onto that radius, so the table stays finite and continuous at coil centres.
///
/// # Arguments
/// * `r` - sensor R, metre
/// * `z` - sensor Z, metre
/// * `r_prime` - source R, metre
/// * `z_prime` - source Z, metre
/// * `d_r_prime` - source half-width in R, metre, same length as `r_prime`
/// * `d_z_prime` - source half-height in Z, metre, same length as `r_prime`
///
/// # Returns
/// * `Array2<f64>` - shape = (n_sensors, n_sources), weber / (radian * ampere)
///
/// # Examples
///
/// ```
/// use equilibria_rs::greens::greens_psi;
/// use ndarray::{Array1, Array2};
///
/// let r: Array1<f64> = Array1::from(vec![1.0, 2.0]);
/// let z: Array1<f64> = Array1::from(vec![0.0, 0.5]);
/// let r_prime: Array1<f64> = Array1::from(vec![3.0]);
/// let z_prime: Array1<f64> = Array1::from(vec![1.0]);
/// let half_width: Array1<f64> = Array1::from(vec![0.1]);
///
/// let g: Array2<f64> = greens_psi(&r, &z, &r_prime, &z_prime, &half_width, &half_width);
/// assert_eq!(g.dim(), (2, 1));
/// ```
pub fn greens_psi(
    r: &Array1<f64>,
    z: &Array1<f64>,
    r_prime: &Array1<f64>,
    z_prime: &Array1<f64>,
    d_r_prime: &Array1<f64>,
    d_z_prime: &Array1<f64>,
) -> Array2<f64> {
    let n_sensor: usize = r.len();
    let n_source: usize = r_prime.len();

    // Parallelise over the sources; every column is independent
    let columns: Vec<Array1<f64>> = (0..n_source)
        .into_par_iter()
        .map(|i_source: usize| {
            let radius: f64 = 0.5 * d_r_prime[i_source].hypot(d_z_prime[i_source]);
            let mut column: Array1<f64> = Array1::zeros(n_sensor);
            for i_sensor in 0..n_sensor {
                let (r_sensor, z_sensor): (f64, f64) = regularised_location(r[i_sensor], z[i_sensor], r_prime[i_source], z_prime[i_source], radius);
                column[i_sensor] = greens_psi_filament(r_sensor, z_sensor, r_prime[i_source], z_prime[i_source]);
            }
            return column;
        })
        .collect();

    let mut greens_array: Array2<f64> = Array2::from_elem((n_sensor, n_source), f64::NAN);
    for i_source in 0..n_source {
        greens_array.slice_mut(s![.., i_source]).assign(&columns[i_source]);
    }

    return greens_array;
}

/// Self inductance of a rectangular-section loop
///
/// # Arguments
/// * `r` - major radius of the loop, metre
/// * `d_r` - full width, metre
/// * `d_z` - full height, metre
///
/// # Returns
/// * self inductance, henry
pub fn self_inductance(r: f64, d_r: f64, d_z: f64) -> f64 {
    let a_z: f64 = d_z / (8.0 * r);
    let a_r: f64 = d_r / (8.0 * r);
    return MU_0 * r * ((1.0 + 2.0 * a_z.powi(2) + 2.0 / 3.0 * a_r.powi(2)) * (8.0 * r / (d_r + d_z)).ln() - 0.5 + 0.5 * a_z.powi(2));
}

#[test]
fn test_greens_psi_helmholtz() {
    // Test the poloidal flux using a Helmholtz coil, which has an analytic solution

    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;
    use ndarray::Axis;

    // Current sources
    // The radius of PF coil is "d", so that I'm consistent with Helmholtz notation / equations
    let current: f64 = 2.3456789;
    let d: f64 = 1.23456789;
    let r_prime: Array1<f64> = Array1::from(vec![d, d]);
    let z_prime: Array1<f64> = Array1::from(vec![-d / 2.0, d / 2.0]);
    let half_width: Array1<f64> = Array1::zeros(2);

    // Sensors
    let r_sensor: f64 = 0.12345;
    let r: Array1<f64> = Array1::from(vec![r_sensor]);
    let z: Array1<f64> = Array1::from(vec![0.00]);

    let g: Array2<f64> = greens_psi(&r, &z, &r_prime, &z_prime, &half_width, &half_width);
    let psi_numerical: f64 = (g.sum_axis(Axis(1)) * current)[0];

    fn psi_analytic_integrand(d: f64, r: f64) -> f64 {
        let integrand_value: f64 = (-2.0 * r - 5.0 * d) / (5.0 * d.powi(2) + 4.0 * d * r + 4.0 * r.powi(2)).sqrt()
            + (2.0 * r - 5.0 * d) / (5.0 * d.powi(2) - 4.0 * d * r + 4.0 * r.powi(2)).sqrt();

        return integrand_value;
    }

    // Analytic total flux, divided by 2 * pi for flux per radian
    let psi_total_analytic: f64 = 2.0 * PI * MU_0 * (d / 4.0) * current * (psi_analytic_integrand(d, r_sensor) - psi_analytic_integrand(d, 0.0));
    let psi_analytic: f64 = psi_total_analytic / (2.0 * PI);

    assert_abs_diff_eq!(psi_numerical, psi_analytic, epsilon = 1e-11);
}

#[test]
fn test_greens_psi_regularised_at_coil_centre() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;

    let r_prime: Array1<f64> = Array1::from(vec![5.0]);
    let z_prime: Array1<f64> = Array1::from(vec![1.0]);
    let d_r_prime: Array1<f64> = Array1::from(vec![0.3]);
    let d_z_prime: Array1<f64> = Array1::from(vec![0.4]);
    let radius: f64 = 0.5 * 0.3_f64.hypot(0.4);

    // Exactly on the centre, just inside and just outside the current radius
    let r: Array1<f64> = Array1::from(vec![5.0, 5.0 + 0.999 * radius, 5.0 + 1.001 * radius]);
    let z: Array1<f64> = Array1::from(vec![1.0, 1.0, 1.0]);
    let g: Array2<f64> = greens_psi(&r, &z, &r_prime, &z_prime, &d_r_prime, &d_z_prime);

    for i_sensor in 0..3 {
        assert!(g[[i_sensor, 0]].is_finite());
    }
    assert_relative_eq!(g[[0, 0]], g[[1, 0]], max_relative = 1e-12);
    assert_relative_eq!(g[[1, 0]], g[[2, 0]], max_relative = 1e-2);
}

#[test]
fn test_greens_psi_reciprocity() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;

    let g_forward: f64 = greens_psi_filament(2.0, 0.3, 4.5, -1.2);
    let g_backward: f64 = greens_psi_filament(4.5, -1.2, 2.0, 0.3);
    assert_relative_eq!(g_forward, g_backward, max_relative = 1e-13);
}
