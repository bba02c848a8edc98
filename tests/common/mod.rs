// tests/common/mod.rs
//
// Shared machines and helpers for the integration tests.

#![allow(dead_code)]

use equilibria_rs::equilibrium::{Boundary, Equilibrium, EquilibriumSettings, VerticalControl};
use equilibria_rs::{BetaIpProfile, Coil, CoilSet, CoilType, DoublePowerShape, Grid};
use ndarray::Array1;

const PI: f64 = std::f64::consts::PI;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Three mirrored pairs of PF coils around a 4-12 m by -6-6 m grid
pub fn symmetric_coilset() -> CoilSet {
    let mut coils: Vec<Coil> = Vec::new();
    for (i_pair, (x, z, current)) in [(5.0, 7.5, -4e6), (11.0, 7.5, -6e6), (14.0, 3.0, -8e6)].iter().enumerate() {
        coils.push(Coil::new(*x, *z, 0.4, 0.4).expect("coil").with_name(&format!("PF_U{i_pair}")).with_current(*current));
        coils.push(Coil::new(*x, -*z, 0.4, 0.4).expect("coil").with_name(&format!("PF_L{i_pair}")).with_current(*current));
    }
    return CoilSet::new(coils).expect("coilset");
}

/// 8 MA plasma in the symmetric coil set
pub fn symmetric_equilibrium(boundary: Boundary, vertical_control: VerticalControl) -> Equilibrium {
    let grid: Grid = Grid::new(4.0, 12.0, -6.0, 6.0, 33, 33).expect("grid");
    let profile: BetaIpProfile = BetaIpProfile::new(0.5, 8e6, 8.0, 5.0, Some(Box::new(DoublePowerShape::new(2.0, 1.5))));
    let settings: EquilibriumSettings = EquilibriumSettings {
        boundary,
        vertical_control,
        ..EquilibriumSettings::default()
    };
    return Equilibrium::new(grid, symmetric_coilset(), Box::new(profile), None, settings).expect("equilibrium");
}

/// Six PF coils and five CS modules of a large single-null machine, with current density and field limits
pub fn single_null_coilset() -> CoilSet {
    let x: [f64; 11] = [5.4, 14.0, 17.75, 17.75, 14.0, 7.0, 2.77, 2.77, 2.77, 2.77, 2.77];
    let z: [f64; 11] = [9.26, 7.9, 2.5, -2.5, -7.9, -10.5, 7.07, 4.08, -0.4, -4.88, -7.86];
    let dx: [f64; 11] = [0.6, 0.7, 0.5, 0.5, 0.7, 1.0, 0.4, 0.4, 0.4, 0.4, 0.4];
    let dz: [f64; 11] = [0.6, 0.7, 0.5, 0.5, 0.7, 1.0, 1.495, 1.495, 2.985, 1.495, 1.495];

    let mut coils: Vec<Coil> = Vec::with_capacity(x.len());
    for i_coil in 0..x.len() {
        let (ctype, number): (CoilType, usize) = if i_coil < 6 { (CoilType::PF, i_coil + 1) } else { (CoilType::CS, i_coil - 5) };
        coils.push(
            Coil::new(x[i_coil], z[i_coil], dx[i_coil], dz[i_coil])
                .expect("coil")
                .with_ctype(ctype)
                .with_name(&format!("{ctype}_{number}")),
        );
    }
    let mut coilset: CoilSet = CoilSet::new(coils).expect("coilset");
    coilset.assign_coil_materials(CoilType::CS, Some(16.5e6), Some(12.5));
    coilset.assign_coil_materials(CoilType::PF, Some(12.5e6), Some(11.0));
    coilset.fix_sizes();
    return coilset;
}

/// Closed single-null plasma boundary with the X-point at the lowest point
///
/// Upper half: R = R0 + a cos(θ + δ_u sin θ), Z = κ_u a sin θ. The lower half is two straight legs from the
/// midplane extremes to the X-point at (R0 - δ_l a, -κ_l a).
pub fn single_null_boundary(n_points: usize) -> (Array1<f64>, Array1<f64>) {
    let (r_0, a): (f64, f64) = (8.938, 2.883);
    let (kappa_upper, delta_upper): (f64, f64) = (1.6, 0.33);
    let (kappa_lower, delta_lower): (f64, f64) = (1.85, 0.5);

    let mut x: Vec<f64> = Vec::with_capacity(n_points);
    let mut z: Vec<f64> = Vec::with_capacity(n_points);
    for i_point in 0..n_points {
        let theta: f64 = 2.0 * PI * (i_point as f64) / (n_points as f64);
        if theta <= PI {
            x.push(r_0 + a * (theta + delta_upper * theta.sin()).cos());
            z.push(kappa_upper * a * theta.sin());
        } else {
            let s: f64 = (-theta.sin()).sqrt();
            let side: f64 = (theta - 1.5 * PI).signum();
            let x_point_r: f64 = r_0 - delta_lower * a;
            x.push(x_point_r + side * (1.0 - s) * (a + side * delta_lower * a));
            z.push(-kappa_lower * a * s);
        }
    }
    return (Array1::from(x), Array1::from(z));
}

/// (R, Z) of the X-point of `single_null_boundary`
pub fn single_null_x_point() -> (f64, f64) {
    return (8.938 - 0.5 * 2.883, -1.85 * 2.883);
}
