use crate::constants::COIL_MIN_HALF_WIDTH;
use crate::error::{EquilibriaError, EquilibriaResult};
use crate::greens::{greens_magnetic_field, greens_psi};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a coil in the machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoilType {
    /// Poloidal field coil
    PF,
    /// Central solenoid module
    CS,
    /// Single-coil surrogate for the plasma current
    Plasma,
    /// Virtual coil used by a vertical position controller
    Virtual,
}

impl fmt::Display for CoilType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &str = match self {
            CoilType::PF => "PF",
            CoilType::CS => "CS",
            CoilType::Plasma => "PLASMA",
            CoilType::Virtual => "VIRTUAL",
        };
        return write!(f, "{name}");
    }
}

/// Rectangular sub-division of a coil cross-section
///
/// Every filament carries `weight` of the coil current.
#[derive(Clone, Debug)]
pub struct CoilFilaments {
    pub x: Array1<f64>,
    pub z: Array1<f64>,
    pub dx: Array1<f64>,
    pub dz: Array1<f64>,
    pub weight: Array1<f64>,
}

/// Axisymmetric coil of rectangular cross-section
///
/// `dx` and `dz` are half-widths. Currents are in ampere (total ampere-turns).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coil {
    name: String,
    ctype: CoilType,
    x: f64,
    z: f64,
    dx: f64,
    dz: f64,
    current: f64,
    j_max: Option<f64>,
    b_max: Option<f64>,
    control: bool,
    size_fixed: bool,
    discretisation: Option<f64>,
}

impl Coil {
    /// Create a controllable PF coil with a fixed size
    ///
    /// # Arguments
    /// * `x`, `z` - centre, metre
    /// * `dx`, `dz` - half-widths, metre, both strictly positive
    ///
    /// # Errors
    /// `EquilibriaError::CoilSize` if either half-width is not positive
    pub fn new(x: f64, z: f64, dx: f64, dz: f64) -> EquilibriaResult<Self> {
        if !(dx > 0.0) || !(dz > 0.0) {
            return Err(EquilibriaError::CoilSize {
                name: String::new(),
                reason: format!("half-widths must be positive, got dx = {dx}, dz = {dz}"),
            });
        }
        if !(x > 0.0) {
            return Err(EquilibriaError::CoilSize {
                name: String::new(),
                reason: format!("coil centre must be at positive R, got x = {x}"),
            });
        }
        return Ok(Coil {
            name: String::new(),
            ctype: CoilType::PF,
            x,
            z,
            dx,
            dz,
            current: 0.0,
            j_max: None,
            b_max: None,
            control: true,
            size_fixed: true,
            discretisation: None,
        });
    }

    /// Create a coil sized from its current and current-density limit
    ///
    /// If neither half-width is given the coil is square with half-width `0.5 * sqrt(|I| / j_max)`
    /// and its size follows later current changes (see `resize_to_current`).
    ///
    /// # Errors
    /// * `EquilibriaError::CoilSize` if exactly one of `dx`, `dz` is given
    /// * `EquilibriaError::CoilSize` if no size is given and `j_max` is not positive
    pub fn sized_by_current(x: f64, z: f64, current: f64, j_max: f64, dx: Option<f64>, dz: Option<f64>) -> EquilibriaResult<Self> {
        let mut coil: Coil = match (dx, dz) {
            (Some(dx), Some(dz)) => Coil::new(x, z, dx, dz)?,
            (None, None) => {
                if !(j_max > 0.0) {
                    return Err(EquilibriaError::CoilSize {
                        name: String::new(),
                        reason: format!("cannot size a coil from j_max = {j_max}"),
                    });
                }
                let half_width: f64 = (0.5 * (current.abs() / j_max).sqrt()).max(COIL_MIN_HALF_WIDTH);
                let mut coil: Coil = Coil::new(x, z, half_width, half_width)?;
                coil.size_fixed = false;
                coil
            }
            _ => {
                return Err(EquilibriaError::CoilSize {
                    name: String::new(),
                    reason: "must specify either dx and dz or neither".to_string(),
                });
            }
        };
        coil.current = current;
        coil.j_max = Some(j_max);
        return Ok(coil);
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        return self;
    }

    pub fn with_ctype(mut self, ctype: CoilType) -> Self {
        self.ctype = ctype;
        return self;
    }

    pub fn with_current(mut self, current: f64) -> Self {
        self.current = current;
        return self;
    }

    pub fn with_j_max(mut self, j_max: f64) -> Self {
        self.j_max = Some(j_max);
        return self;
    }

    pub fn with_b_max(mut self, b_max: f64) -> Self {
        self.b_max = Some(b_max);
        return self;
    }

    pub fn with_control(mut self, control: bool) -> Self {
        self.control = control;
        return self;
    }

    /// Sub-divide the cross-section into rectangles no larger than `d_coil` (full width), metre
    pub fn with_discretisation(mut self, d_coil: f64) -> Self {
        self.discretisation = if d_coil > 0.0 { Some(d_coil) } else { None };
        return self;
    }

    pub fn name(&self) -> &str {
        return &self.name;
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn ctype(&self) -> CoilType {
        return self.ctype;
    }

    pub fn x(&self) -> f64 {
        return self.x;
    }

    pub fn z(&self) -> f64 {
        return self.z;
    }

    pub fn dx(&self) -> f64 {
        return self.dx;
    }

    pub fn dz(&self) -> f64 {
        return self.dz;
    }

    pub fn current(&self) -> f64 {
        return self.current;
    }

    pub fn j_max(&self) -> Option<f64> {
        return self.j_max;
    }

    pub fn b_max(&self) -> Option<f64> {
        return self.b_max;
    }

    pub fn control(&self) -> bool {
        return self.control;
    }

    pub fn size_fixed(&self) -> bool {
        return self.size_fixed;
    }

    pub fn discretisation(&self) -> Option<f64> {
        return self.discretisation;
    }

    pub(crate) fn set_current(&mut self, current: f64) {
        self.current = current;
    }

    pub(crate) fn set_position(&mut self, x: f64, z: f64) {
        self.x = x;
        self.z = z;
    }

    pub(crate) fn set_size(&mut self, dx: f64, dz: f64) {
        self.dx = dx.max(COIL_MIN_HALF_WIDTH);
        self.dz = dz.max(COIL_MIN_HALF_WIDTH);
    }

    pub(crate) fn set_control(&mut self, control: bool) {
        self.control = control;
    }

    pub(crate) fn fix_size(&mut self) {
        self.size_fixed = true;
    }

    pub(crate) fn set_discretisation(&mut self, d_coil: Option<f64>) {
        self.discretisation = d_coil;
    }

    pub(crate) fn set_material(&mut self, j_max: Option<f64>, b_max: Option<f64>) {
        self.j_max = j_max;
        self.b_max = b_max;
    }

    /// Resize a coil that is not size-fixed so that it carries its current at `j_max`
    ///
    /// # Returns
    /// * `true` if the size changed
    pub(crate) fn resize_to_current(&mut self) -> bool {
        if self.size_fixed {
            return false;
        }
        let Some(j_max) = self.j_max else {
            return false;
        };
        let half_width: f64 = (0.5 * (self.current.abs() / j_max).sqrt()).max(COIL_MIN_HALF_WIDTH);
        if half_width == self.dx && half_width == self.dz {
            return false;
        }
        self.dx = half_width;
        self.dz = half_width;
        return true;
    }

    /// Cross-sectional area, metre^2
    pub fn area(&self) -> f64 {
        return 4.0 * self.dx * self.dz;
    }

    /// Maximum current allowed by the current-density limit; unlimited without `j_max`
    pub fn get_max_current(&self) -> f64 {
        return match self.j_max {
            Some(j_max) => (j_max * self.area()).abs(),
            None => f64::INFINITY,
        };
    }

    /// Point where the peak field on the coil is checked: the inner edge at the coil mid-height
    pub fn peak_field_location(&self) -> (f64, f64) {
        return (self.x - self.dx, self.z);
    }

    /// Rectangular sub-division of the cross-section
    pub fn filaments(&self) -> CoilFilaments {
        let (n_x, n_z): (usize, usize) = match self.discretisation {
            Some(d_coil) => (
                ((2.0 * self.dx / d_coil).ceil() as usize).max(1),
                ((2.0 * self.dz / d_coil).ceil() as usize).max(1),
            ),
            None => (1, 1),
        };
        let n_filaments: usize = n_x * n_z;
        let sub_dx: f64 = self.dx / (n_x as f64);
        let sub_dz: f64 = self.dz / (n_z as f64);

        let mut x: Array1<f64> = Array1::zeros(n_filaments);
        let mut z: Array1<f64> = Array1::zeros(n_filaments);
        for i_z in 0..n_z {
            for i_x in 0..n_x {
                let i_filament: usize = i_z * n_x + i_x;
                x[i_filament] = self.x - self.dx + sub_dx * ((2 * i_x + 1) as f64);
                z[i_filament] = self.z - self.dz + sub_dz * ((2 * i_z + 1) as f64);
            }
        }

        return CoilFilaments {
            x,
            z,
            dx: Array1::from_elem(n_filaments, sub_dx),
            dz: Array1::from_elem(n_filaments, sub_dz),
            weight: Array1::from_elem(n_filaments, 1.0 / (n_filaments as f64)),
        };
    }

    /// Flux per radian at the points per ampere of coil current
    pub fn psi_response(&self, x: &Array1<f64>, z: &Array1<f64>) -> Array1<f64> {
        let filaments: CoilFilaments = self.filaments();
        let g: Array2<f64> = greens_psi(x, z, &filaments.x, &filaments.z, &filaments.dx, &filaments.dz);
        return g.dot(&filaments.weight);
    }

    /// (BR, BZ) at the points per ampere of coil current
    pub fn field_response(&self, x: &Array1<f64>, z: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        let filaments: CoilFilaments = self.filaments();
        let (g_br, g_bz): (Array2<f64>, Array2<f64>) = greens_magnetic_field(x, z, &filaments.x, &filaments.z, &filaments.dx, &filaments.dz);
        return (g_br.dot(&filaments.weight), g_bz.dot(&filaments.weight));
    }

    /// Flux per radian at the points from this coil's present current
    pub fn psi(&self, x: &Array1<f64>, z: &Array1<f64>) -> Array1<f64> {
        return self.psi_response(x, z) * self.current;
    }

    /// Magnetic field (BR, BZ) at the points from this coil's present current
    pub fn field(&self, x: &Array1<f64>, z: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        let (g_br, g_bz): (Array1<f64>, Array1<f64>) = self.field_response(x, z);
        return (g_br * self.current, g_bz * self.current);
    }

    /// Corners of the cross-section, anticlockwise from the lower inner corner
    pub fn corners(&self) -> (Array1<f64>, Array1<f64>) {
        let x: Array1<f64> = Array1::from(vec![self.x - self.dx, self.x + self.dx, self.x + self.dx, self.x - self.dx]);
        let z: Array1<f64> = Array1::from(vec![self.z - self.dz, self.z - self.dz, self.z + self.dz, self.z + self.dz]);
        return (x, z);
    }
}

/// Sum the filament columns of a Green's table into one column per coil
pub(crate) fn collapse_filaments(g_filaments: &Array2<f64>, owner: &[usize], weight: &Array1<f64>, n_coils: usize) -> Array2<f64> {
    let n_points: usize = g_filaments.len_of(Axis(0));
    let mut g: Array2<f64> = Array2::zeros((n_points, n_coils));
    for (i_filament, &i_coil) in owner.iter().enumerate() {
        let column = g_filaments.column(i_filament);
        let mut target = g.column_mut(i_coil);
        target.scaled_add(weight[i_filament], &column);
    }
    return g;
}

#[test]
fn test_coil_sizing() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    let coil: Coil = Coil::sized_by_current(4.0, 1.0, 16e6, 16e6, None, None).expect("test_coil_sizing: sized coil");
    assert_abs_diff_eq!(coil.dx(), 0.5, epsilon = 1e-14);
    assert_abs_diff_eq!(coil.dz(), 0.5, epsilon = 1e-14);
    assert_abs_diff_eq!(coil.get_max_current(), 16e6, epsilon = 1e-6);
    assert!(!coil.size_fixed());

    // Only one dimension is an error
    assert!(Coil::sized_by_current(4.0, 1.0, 16e6, 16e6, Some(0.3), None).is_err());

    // Unlimited current without a current density limit
    let coil: Coil = Coil::new(4.0, 1.0, 0.3, 0.3).expect("test_coil_sizing: coil");
    assert!(coil.get_max_current().is_infinite());
}

#[test]
fn test_coil_discretisation_preserves_far_field() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;

    let coil: Coil = Coil::new(6.0, 2.0, 0.4, 0.6).expect("test_coil_discretisation: coil").with_current(1e6);
    let meshed: Coil = coil.clone().with_discretisation(0.2);

    let filaments: CoilFilaments = meshed.filaments();
    assert_eq!(filaments.x.len(), 4 * 6);
    assert_relative_eq!(filaments.weight.sum(), 1.0, max_relative = 1e-14);
    assert_relative_eq!(filaments.x.mean().unwrap_or(f64::NAN), 6.0, max_relative = 1e-12);

    // Far from the coil the sub-divided and single-filament fluxes agree closely
    let x: Array1<f64> = Array1::from(vec![12.0]);
    let z: Array1<f64> = Array1::from(vec![-5.0]);
    let psi_single: f64 = coil.psi(&x, &z)[0];
    let psi_meshed: f64 = meshed.psi(&x, &z)[0];
    assert_relative_eq!(psi_single, psi_meshed, max_relative = 1e-3);
}
