use super::regularised_location;
use ndarray::{Array1, Array2, s};
use physical_constants;
use rayon::prelude::*;
use spec_math::cephes64::ellpe; // complete elliptic integral of the second kind
use spec_math::cephes64::ellpk; // complete elliptic integral of the first kind

// Global constants
const PI: f64 = std::f64::consts::PI;
const MU_0: f64 = physical_constants::VACUUM_MAG_PERMEABILITY;

/// Smallest sensor radius used for the field; on the axis BR vanishes and BZ is finite
const R_AXIS_FLOOR: f64 = 1e-8;

/// BR and BZ at (r, z) from a unit current filament at (r_prime, z_prime)
///
/// IMPORTANT: this is NOT symmetric in (r, z) and (r_prime, z_prime)
pub fn greens_magnetic_field_filament(r: f64, z: f64, r_prime: f64, z_prime: f64) -> (f64, f64) {
    if r_prime <= 0.0 {
        return (0.0, 0.0);
    }
    let r: f64 = r.max(R_AXIS_FLOOR);

    let h: f64 = z - z_prime;
    let h_sq: f64 = h.powi(2);
    let u_sq: f64 = (r + r_prime).powi(2) + h_sq;
    let u: f64 = u_sq.sqrt();
    let rr: f64 = r * r_prime;
    let d_sq: f64 = (r_prime - r).powi(2) + h_sq;
    let k_sq: f64 = 4.0 * rr / u_sq;
    let v_sq: f64 = r_prime.powi(2) + r.powi(2) + h_sq;
    let w_sq: f64 = r_prime.powi(2) - r.powi(2) - h_sq;

    // elliptic integral
    let elliptic_integral_e: f64 = ellpe(k_sq);
    let elliptic_integral_k: f64 = ellpk(1.0 - k_sq); // very annoying how this is defined

    let g_br: f64 = MU_0 * h / (2.0 * PI * r * u) * (v_sq * elliptic_integral_e / d_sq - elliptic_integral_k);
    let g_bz: f64 = MU_0 / (2.0 * PI * u) * (w_sq * elliptic_integral_e / d_sq + elliptic_integral_k);

    return (g_br, g_bz);
}

/// Calculates the Green's table for BR and BZ fields
///
/// Equations taken from:
/// J.-M. Moret et. al., "Tokamak equilibrium reconstruction code LIUQE and its real time implementation" Fusion Eng. Des., 2015
///
/// br = g_br * current;        br = - 1 / r * d_psi_d_z
/// bz = g_bz * current;        bz = 1 / r * d_psi_d_r
///
/// Sensors inside a source's current radius are projected onto it, as for `greens_psi`.
///
/// # Arguments
/// * `r` - the location where we want to calculate the field
/// * `z` - the location where we want to calculate the field
/// * `r_prime` - the current sources
/// * `z_prime` - the current sources
/// * `d_r_prime` - source half-widths
/// * `d_z_prime` - source half-heights
///
/// # Returns
/// * `g_br[n_rz, n_rz_prime]` where br = g_br * current
/// * `g_bz[n_rz, n_rz_prime]` where bz = g_bz * current
pub fn greens_magnetic_field(
    r: &Array1<f64>,
    z: &Array1<f64>,
    r_prime: &Array1<f64>,
    z_prime: &Array1<f64>,
    d_r_prime: &Array1<f64>,
    d_z_prime: &Array1<f64>,
) -> (Array2<f64>, Array2<f64>) {
    let n_rz: usize = r.len();
    let n_rz_prime: usize = r_prime.len();

    let rows: Vec<(Array1<f64>, Array1<f64>)> = (0..n_rz)
        .into_par_iter()
        .map(|i_rz: usize| {
            let mut g_br_here: Array1<f64> = Array1::zeros(n_rz_prime);
            let mut g_bz_here: Array1<f64> = Array1::zeros(n_rz_prime);
            for i_rz_prime in 0..n_rz_prime {
                let radius: f64 = 0.5 * d_r_prime[i_rz_prime].hypot(d_z_prime[i_rz_prime]);
                let (r_sensor, z_sensor): (f64, f64) = regularised_location(r[i_rz], z[i_rz], r_prime[i_rz_prime], z_prime[i_rz_prime], radius);
                let (g_br, g_bz): (f64, f64) = greens_magnetic_field_filament(r_sensor, z_sensor, r_prime[i_rz_prime], z_prime[i_rz_prime]);
                g_br_here[i_rz_prime] = g_br;
                g_bz_here[i_rz_prime] = g_bz;
            }
            return (g_br_here, g_bz_here);
        })
        .collect();

    let mut g_br: Array2<f64> = Array2::zeros((n_rz, n_rz_prime));
    let mut g_bz: Array2<f64> = Array2::zeros((n_rz, n_rz_prime));
    for (i_rz, (g_br_here, g_bz_here)) in rows.iter().enumerate() {
        g_br.slice_mut(s![i_rz, ..]).assign(g_br_here);
        g_bz.slice_mut(s![i_rz, ..]).assign(g_bz_here);
    }
    return (g_br, g_bz);
}

#[test]
fn test_greens_magnetic_field() {
    // Test the magnetic field using a Helmholtz coil, which has an analytic solution

    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;
    use ndarray::Axis;

    // Current sources
    // The radius of PF coil is "d", so that I'm consistent with Helmholtz notation / equations
    let d: f64 = 1.23456789;
    let r_prime: Array1<f64> = Array1::from(vec![d, d]);
    let z_prime: Array1<f64> = Array1::from(vec![-d / 2.0, d / 2.0]);
    let half_width: Array1<f64> = Array1::zeros(2);

    // The first test is for the centre of the Helmholtz coil Bz(R=0, Z=0)
    let r: Array1<f64> = Array1::from(vec![1.0e-8]); // make it small to avoid the singularity which prevents br from being calculated
    let z: Array1<f64> = Array1::from(vec![0.00]);

    let (g_br, g_bz): (Array2<f64>, Array2<f64>) = greens_magnetic_field(&r, &z, &r_prime, &z_prime, &half_width, &half_width);
    let current: f64 = 2.3456789;
    let br_numerical: Array1<f64> = g_br.sum_axis(Axis(1)) * current; // summing over the PF coils
    let bz_numerical: Array1<f64> = g_bz.sum_axis(Axis(1)) * current; // summing over the PF coils

    // Analytic values (at the centre of the coil)
    let bz_analytic: f64 = (4.0_f64 / 5.0_f64).powi(3).sqrt() * MU_0 * current / d;

    assert_abs_diff_eq!(br_numerical[0], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(bz_numerical[0], bz_analytic, epsilon = 1e-6);

    // Second test is for the mid-plane Bz(R=r_sensor, Z=0); with r_sensor != 0
    let r_sensor: f64 = 0.5678;
    let r: Array1<f64> = Array1::from(vec![r_sensor]);
    let z: Array1<f64> = Array1::from(vec![0.00]);

    let (g_br, g_bz): (Array2<f64>, Array2<f64>) = greens_magnetic_field(&r, &z, &r_prime, &z_prime, &half_width, &half_width);
    let br_numerical: Array1<f64> = g_br.sum_axis(Axis(1)) * current;
    let bz_numerical: Array1<f64> = g_bz.sum_axis(Axis(1)) * current;

    let bz_analytic: f64 = MU_0
        * (d.powi(2) / 2.0)
        * current
        * (((r_sensor + d / 2.0).powi(2) + d.powi(2)).powf(-3.0 / 2.0) + ((r_sensor - d / 2.0).powi(2) + d.powi(2)).powf(-3.0 / 2.0));

    assert_abs_diff_eq!(br_numerical[0], 0.0, epsilon = 1e-7);
    assert_abs_diff_eq!(bz_numerical[0], bz_analytic, epsilon = 1e-7);
}

#[test]
fn test_field_is_derivative_of_flux() {
    // B_R = -(1/R) d(psi)/dZ and B_Z = (1/R) d(psi)/dR for flux per radian

    // Lazy loading of packages which are not used anywhere else in the code
    use crate::greens::greens_psi_filament;
    use approx::assert_relative_eq;

    let (r, z, r_prime, z_prime): (f64, f64, f64, f64) = (3.2, 0.7, 5.1, -0.4);
    let step: f64 = 1e-5;

    let d_psi_d_r: f64 = (greens_psi_filament(r + step, z, r_prime, z_prime) - greens_psi_filament(r - step, z, r_prime, z_prime)) / (2.0 * step);
    let d_psi_d_z: f64 = (greens_psi_filament(r, z + step, r_prime, z_prime) - greens_psi_filament(r, z - step, r_prime, z_prime)) / (2.0 * step);

    let (g_br, g_bz): (f64, f64) = greens_magnetic_field_filament(r, z, r_prime, z_prime);
    assert_relative_eq!(g_br, -d_psi_d_z / r, max_relative = 1e-6);
    assert_relative_eq!(g_bz, d_psi_d_r / r, max_relative = 1e-6);
}
