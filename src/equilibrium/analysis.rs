use super::state::MagneticState;
use crate::error::EquilibriaResult;
use crate::plasma_geometry::FluxSurfaceGeometry;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Global parameters of a solved equilibrium
#[derive(Clone, Debug)]
pub struct PlasmaSummary {
    /// Plasma current, ampere
    pub i_p: f64,
    /// Normalised internal inductance, li(3)
    pub li: f64,
    /// Safety factor on axis
    pub q_0: f64,
    /// Poloidal beta
    pub beta_p: f64,
    pub r_axis: f64,
    pub z_axis: f64,
    pub psi_axis: f64,
    pub psi_boundary: f64,
    /// (R_axis - R_geometric, Z_axis - Z_geometric) of the last closed flux surface, metre
    pub shafranov_shift: (f64, f64),
    /// Shape of the last closed flux surface
    pub geometry: FluxSurfaceGeometry,
    pub diverted: bool,
    pub double_null: bool,
}

/// Current, force and peak field of one coil
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoilSummary {
    pub name: String,
    pub x: f64,
    pub z: f64,
    pub dx: f64,
    pub dz: f64,
    /// ampere
    pub current: f64,
    /// Radial force, newton
    pub f_x: f64,
    /// Vertical force, newton
    pub f_z: f64,
    /// Field at the inner edge of the coil, tesla
    pub b_peak: f64,
    pub b_max: Option<f64>,
}

/// Currents, forces and peak fields of every coil of a state's coil set
pub fn analyse_coils(state: &dyn MagneticState) -> EquilibriaResult<Vec<CoilSummary>> {
    let coilset = state.coilset();
    let x: Array1<f64> = coilset.coils().iter().map(|coil| coil.x()).collect();
    let z: Array1<f64> = coilset.coils().iter().map(|coil| coil.z()).collect();
    let external_bx: Array1<f64> = state.plasma_bx_at(&x, &z)?;
    let external_bz: Array1<f64> = state.plasma_bz_at(&x, &z)?;
    let forces: Array2<f64> = coilset.get_coil_forces(&external_bx, &external_bz)?;

    let x_peak: Array1<f64> = coilset.coils().iter().map(|coil| coil.peak_field_location().0).collect();
    let z_peak: Array1<f64> = coilset.coils().iter().map(|coil| coil.peak_field_location().1).collect();
    let b_peak: Array1<f64> = state.bp_at(&x_peak, &z_peak)?;

    let summaries: Vec<CoilSummary> = coilset
        .coils()
        .iter()
        .enumerate()
        .map(|(i_coil, coil)| CoilSummary {
            name: coil.name().to_string(),
            x: coil.x(),
            z: coil.z(),
            dx: coil.dx(),
            dz: coil.dz(),
            current: coil.current(),
            f_x: forces[[i_coil, 0]],
            f_z: forces[[i_coil, 1]],
            b_peak: b_peak[i_coil],
            b_max: coil.b_max(),
        })
        .collect();
    return Ok(summaries);
}
