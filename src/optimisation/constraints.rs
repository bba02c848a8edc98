use crate::coils::{CoilSelection, CoilSet};
use crate::equilibrium::MagneticState;
use crate::error::{EquilibriaError, EquilibriaResult};
use log::debug;
use ndarray::{Array1, Array2, Axis, concatenate, s};
use std::fmt::Debug;

/// What the optimised current vector represents
///
/// * `Current` - absolute control currents; the background holds everything except the control coils
/// * `CurrentIncrement` - changes to the present control currents; the background is the whole present field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseMode {
    Current,
    CurrentIncrement,
}

/// Flux at the points from everything the control currents do not represent
pub fn background_psi(state: &dyn MagneticState, mode: ResponseMode, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
    return match mode {
        ResponseMode::Current => Ok(state.plasma_psi_at(x, z)? + state.coilset().psi(x, z, CoilSelection::Fixed)),
        ResponseMode::CurrentIncrement => state.psi_at(x, z),
    };
}

/// (BR, BZ) at the points from everything the control currents do not represent
pub fn background_field(state: &dyn MagneticState, mode: ResponseMode, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<(Array1<f64>, Array1<f64>)> {
    return match mode {
        ResponseMode::Current => {
            let (fixed_bx, fixed_bz): (Array1<f64>, Array1<f64>) = state.coilset().field(x, z, CoilSelection::Fixed);
            Ok((state.plasma_bx_at(x, z)? + fixed_bx, state.plasma_bz_at(x, z)? + fixed_bz))
        }
        ResponseMode::CurrentIncrement => Ok((state.bx_at(x, z)?, state.bz_at(x, z)?)),
    };
}

/// A linear magnetic target, A I = target - background
pub trait MagneticConstraint: Debug + Send + Sync {
    /// Number of rows this constraint adds to the system
    fn n_rows(&self) -> usize;

    /// Response of the constrained quantity to unit control currents, shape = (n_rows, n_control)
    fn control_response(&self, coilset: &CoilSet) -> Array2<f64>;

    /// Constrained quantity from the background
    fn background(&self, state: &dyn MagneticState, mode: ResponseMode) -> EquilibriaResult<Array1<f64>>;

    /// Desired value of the constrained quantity
    fn target(&self, state: &dyn MagneticState, mode: ResponseMode) -> EquilibriaResult<Array1<f64>>;

    fn weights(&self) -> Array1<f64>;

    fn clone_box(&self) -> Box<dyn MagneticConstraint>;
}

impl Clone for Box<dyn MagneticConstraint> {
    fn clone(&self) -> Self {
        return self.clone_box();
    }
}

fn check_points(what: &str, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<()> {
    if x.len() != z.len() {
        return Err(EquilibriaError::ArrayLength {
            what: format!("{what}: z"),
            expected: x.len(),
            found: z.len(),
        });
    }
    return Ok(());
}

/// Equal flux at every point and at a reference point
///
/// The target is the background flux at the reference, so the rows read
/// (ψ_control(x_i) - ψ_control(ref)) I = ψ_bg(ref) - ψ_bg(x_i).
#[derive(Clone, Debug)]
pub struct IsofluxConstraint {
    x: Array1<f64>,
    z: Array1<f64>,
    ref_x: f64,
    ref_z: f64,
    weight: f64,
}

impl IsofluxConstraint {
    pub fn new(x: Array1<f64>, z: Array1<f64>, ref_x: f64, ref_z: f64) -> EquilibriaResult<Self> {
        check_points("IsofluxConstraint", &x, &z)?;
        return Ok(IsofluxConstraint { x, z, ref_x, ref_z, weight: 1.0 });
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        return self;
    }

    pub fn reference(&self) -> (f64, f64) {
        return (self.ref_x, self.ref_z);
    }
}

impl MagneticConstraint for IsofluxConstraint {
    fn n_rows(&self) -> usize {
        return self.x.len();
    }

    fn control_response(&self, coilset: &CoilSet) -> Array2<f64> {
        let c_psi: Array2<f64> = coilset.control_psi(&self.x, &self.z);
        let c_psi_ref: Array2<f64> = coilset.control_psi(&Array1::from(vec![self.ref_x]), &Array1::from(vec![self.ref_z]));
        return c_psi - &c_psi_ref.row(0);
    }

    fn background(&self, state: &dyn MagneticState, mode: ResponseMode) -> EquilibriaResult<Array1<f64>> {
        return background_psi(state, mode, &self.x, &self.z);
    }

    fn target(&self, state: &dyn MagneticState, mode: ResponseMode) -> EquilibriaResult<Array1<f64>> {
        let psi_ref: f64 = background_psi(state, mode, &Array1::from(vec![self.ref_x]), &Array1::from(vec![self.ref_z]))?[0];
        return Ok(Array1::from_elem(self.x.len(), psi_ref));
    }

    fn weights(&self) -> Array1<f64> {
        return Array1::from_elem(self.x.len(), self.weight);
    }

    fn clone_box(&self) -> Box<dyn MagneticConstraint> {
        return Box::new(self.clone());
    }
}

/// Fixed flux value at a set of points
#[derive(Clone, Debug)]
pub struct PsiConstraint {
    x: Array1<f64>,
    z: Array1<f64>,
    target_value: f64,
    weight: f64,
}

impl PsiConstraint {
    pub fn new(x: Array1<f64>, z: Array1<f64>, target_value: f64) -> EquilibriaResult<Self> {
        check_points("PsiConstraint", &x, &z)?;
        return Ok(PsiConstraint { x, z, target_value, weight: 1.0 });
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        return self;
    }
}

impl MagneticConstraint for PsiConstraint {
    fn n_rows(&self) -> usize {
        return self.x.len();
    }

    fn control_response(&self, coilset: &CoilSet) -> Array2<f64> {
        return coilset.control_psi(&self.x, &self.z);
    }

    fn background(&self, state: &dyn MagneticState, mode: ResponseMode) -> EquilibriaResult<Array1<f64>> {
        return background_psi(state, mode, &self.x, &self.z);
    }

    fn target(&self, _state: &dyn MagneticState, _mode: ResponseMode) -> EquilibriaResult<Array1<f64>> {
        return Ok(Array1::from_elem(self.x.len(), self.target_value));
    }

    fn weights(&self) -> Array1<f64> {
        return Array1::from_elem(self.x.len(), self.weight);
    }

    fn clone_box(&self) -> Box<dyn MagneticConstraint> {
        return Box::new(self.clone());
    }
}

/// Boundary flux value along a plasma boundary
///
/// Same rows as `PsiConstraint`; kept separate so the boundary value can be updated on its own.
#[derive(Clone, Debug)]
pub struct PsiBoundaryConstraint {
    x: Array1<f64>,
    z: Array1<f64>,
    psi_boundary: f64,
    weight: f64,
}

impl PsiBoundaryConstraint {
    pub fn new(x: Array1<f64>, z: Array1<f64>, psi_boundary: f64) -> EquilibriaResult<Self> {
        check_points("PsiBoundaryConstraint", &x, &z)?;
        return Ok(PsiBoundaryConstraint { x, z, psi_boundary, weight: 1.0 });
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        return self;
    }

    pub fn psi_boundary(&self) -> f64 {
        return self.psi_boundary;
    }

    pub fn set_psi_boundary(&mut self, psi_boundary: f64) {
        self.psi_boundary = psi_boundary;
    }
}

impl MagneticConstraint for PsiBoundaryConstraint {
    fn n_rows(&self) -> usize {
        return self.x.len();
    }

    fn control_response(&self, coilset: &CoilSet) -> Array2<f64> {
        return coilset.control_psi(&self.x, &self.z);
    }

    fn background(&self, state: &dyn MagneticState, mode: ResponseMode) -> EquilibriaResult<Array1<f64>> {
        return background_psi(state, mode, &self.x, &self.z);
    }

    fn target(&self, _state: &dyn MagneticState, _mode: ResponseMode) -> EquilibriaResult<Array1<f64>> {
        return Ok(Array1::from_elem(self.x.len(), self.psi_boundary));
    }

    fn weights(&self) -> Array1<f64> {
        return Array1::from_elem(self.x.len(), self.weight);
    }

    fn clone_box(&self) -> Box<dyn MagneticConstraint> {
        return Box::new(self.clone());
    }
}

/// Zero poloidal field at a point, typically a target X-point
///
/// Two rows: BR and BZ.
#[derive(Clone, Debug)]
pub struct FieldNullConstraint {
    x: f64,
    z: f64,
    weight: f64,
}

impl FieldNullConstraint {
    pub fn new(x: f64, z: f64) -> Self {
        return FieldNullConstraint { x, z, weight: 1.0 };
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        return self;
    }

    pub fn location(&self) -> (f64, f64) {
        return (self.x, self.z);
    }
}

impl MagneticConstraint for FieldNullConstraint {
    fn n_rows(&self) -> usize {
        return 2;
    }

    fn control_response(&self, coilset: &CoilSet) -> Array2<f64> {
        let x: Array1<f64> = Array1::from(vec![self.x]);
        let z: Array1<f64> = Array1::from(vec![self.z]);
        let (c_bx, c_bz): (Array2<f64>, Array2<f64>) = coilset.field_response(&x, &z, CoilSelection::Control);
        return concatenate![Axis(0), c_bx, c_bz];
    }

    fn background(&self, state: &dyn MagneticState, mode: ResponseMode) -> EquilibriaResult<Array1<f64>> {
        let (bx, bz): (Array1<f64>, Array1<f64>) = background_field(state, mode, &Array1::from(vec![self.x]), &Array1::from(vec![self.z]))?;
        return Ok(Array1::from(vec![bx[0], bz[0]]));
    }

    fn target(&self, _state: &dyn MagneticState, _mode: ResponseMode) -> EquilibriaResult<Array1<f64>> {
        return Ok(Array1::zeros(2));
    }

    fn weights(&self) -> Array1<f64> {
        return Array1::from_elem(2, self.weight);
    }

    fn clone_box(&self) -> Box<dyn MagneticConstraint> {
        return Box::new(self.clone());
    }
}

/// A set of magnetic constraints assembled into one linear system
///
/// A I = b, with b = target - background. `update` rebuilds the system for the present state;
/// with `fixed_coils` the control matrix from the previous update is reused.
#[derive(Clone, Debug)]
pub struct MagneticConstraintSet {
    constraints: Vec<Box<dyn MagneticConstraint>>,
    a_mat: Option<Array2<f64>>,
    target: Array1<f64>,
    background: Array1<f64>,
    weights: Array1<f64>,
}

impl MagneticConstraintSet {
    pub fn new(constraints: Vec<Box<dyn MagneticConstraint>>) -> Self {
        return MagneticConstraintSet {
            constraints,
            a_mat: None,
            target: Array1::zeros(0),
            background: Array1::zeros(0),
            weights: Array1::zeros(0),
        };
    }

    /// Number of rows in the assembled system
    pub fn len(&self) -> usize {
        return self.constraints.iter().map(|constraint| constraint.n_rows()).sum();
    }

    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    pub fn constraints(&self) -> &[Box<dyn MagneticConstraint>] {
        return &self.constraints;
    }

    pub fn constraints_mut(&mut self) -> &mut Vec<Box<dyn MagneticConstraint>> {
        self.a_mat = None;
        return &mut self.constraints;
    }

    /// Rebuild the system for the present state
    pub fn update(&mut self, state: &dyn MagneticState, mode: ResponseMode, fixed_coils: bool) -> EquilibriaResult<()> {
        let n_rows: usize = self.len();
        let n_control: usize = state.coilset().n_control();
        let stale: bool = match &self.a_mat {
            Some(a_mat) => a_mat.nrows() != n_rows || a_mat.ncols() != n_control,
            None => true,
        };

        if !fixed_coils || stale {
            let mut a_mat: Array2<f64> = Array2::zeros((n_rows, n_control));
            let mut i_row: usize = 0;
            for constraint in self.constraints.iter() {
                let n: usize = constraint.n_rows();
                a_mat.slice_mut(s![i_row..i_row + n, ..]).assign(&constraint.control_response(state.coilset()));
                i_row += n;
            }
            self.a_mat = Some(a_mat);
        }

        let mut target: Array1<f64> = Array1::zeros(n_rows);
        let mut background: Array1<f64> = Array1::zeros(n_rows);
        let mut weights: Array1<f64> = Array1::zeros(n_rows);
        let mut i_row: usize = 0;
        for constraint in self.constraints.iter() {
            let n: usize = constraint.n_rows();
            target.slice_mut(s![i_row..i_row + n]).assign(&constraint.target(state, mode)?);
            background.slice_mut(s![i_row..i_row + n]).assign(&constraint.background(state, mode)?);
            weights.slice_mut(s![i_row..i_row + n]).assign(&constraint.weights());
            i_row += n;
        }
        self.target = target;
        self.background = background;
        self.weights = weights;
        debug!("MagneticConstraintSet::update: {n_rows} rows, {n_control} control coils, mode = {mode:?}");
        return Ok(());
    }

    /// b = target - background
    pub fn b(&self) -> Array1<f64> {
        return &self.target - &self.background;
    }

    /// (w, w A, w b) with the diagonal weights applied row by row
    ///
    /// # Errors
    /// `EquilibriaError::ArrayLength` if `update` has not been called
    pub fn get_weighted_arrays(&self) -> EquilibriaResult<(Array1<f64>, Array2<f64>, Array1<f64>)> {
        let a_mat: &Array2<f64> = match &self.a_mat {
            Some(a_mat) => a_mat,
            None => {
                return Err(EquilibriaError::ArrayLength {
                    what: "MagneticConstraintSet: control matrix (update not called)".to_string(),
                    expected: self.len(),
                    found: 0,
                });
            }
        };
        let weighted_a: Array2<f64> = a_mat * &self.weights.view().insert_axis(Axis(1));
        let weighted_b: Array1<f64> = &self.weights * &self.b();
        return Ok((self.weights.clone(), weighted_a, weighted_b));
    }
}

/// Constraints reconstructed from a target plasma boundary
///
/// * Single null when |z_min| and z_max differ by more than 5 %: one field null at the lower or upper extreme
/// * Otherwise a field null at both extremes
/// * The boundary is resampled to `n_points` and constrained by isoflux (reference at the point nearest the
///   origin), or by a boundary flux value when `psi_boundary` is given
pub struct AutoConstraints;

impl AutoConstraints {
    pub fn build(x: &Array1<f64>, z: &Array1<f64>, psi_boundary: Option<f64>, n_points: usize) -> EquilibriaResult<MagneticConstraintSet> {
        check_points("AutoConstraints", x, z)?;
        if x.len() < 3 {
            return Err(EquilibriaError::ArrayLength {
                what: "AutoConstraints: boundary points".to_string(),
                expected: 3,
                found: x.len(),
            });
        }

        let i_z_max: usize = argmax(z);
        let i_z_min: usize = argmax(&(-z));
        let (z_max, z_min): (f64, f64) = (z[i_z_max], z[i_z_min]);

        let mut constraints: Vec<Box<dyn MagneticConstraint>> = Vec::new();
        let single_null: bool = abs_rel_difference(z_min.abs(), z_max) > 0.05;
        if single_null {
            if z_min.abs() > z_max {
                constraints.push(Box::new(FieldNullConstraint::new(x[i_z_min], z_min)));
            } else {
                constraints.push(Box::new(FieldNullConstraint::new(x[i_z_max], z_max)));
            }
        } else {
            constraints.push(Box::new(FieldNullConstraint::new(x[i_z_min], z_min)));
            constraints.push(Box::new(FieldNullConstraint::new(x[i_z_max], z_max)));
        }

        let (x_boundary, z_boundary): (Array1<f64>, Array1<f64>) = resample_closed_loop(x, z, n_points);
        match psi_boundary {
            Some(psi_boundary) => {
                constraints.push(Box::new(PsiBoundaryConstraint::new(x_boundary, z_boundary, psi_boundary)?));
            }
            None => {
                let i_inner: usize = argmax(&(-(&x_boundary * &x_boundary + &z_boundary * &z_boundary)));
                let (ref_x, ref_z): (f64, f64) = (x_boundary[i_inner], z_boundary[i_inner]);
                constraints.push(Box::new(IsofluxConstraint::new(x_boundary, z_boundary, ref_x, ref_z)?));
            }
        }
        return Ok(MagneticConstraintSet::new(constraints));
    }
}

fn argmax(values: &Array1<f64>) -> usize {
    let mut i_max: usize = 0;
    for (i_value, &value) in values.iter().enumerate() {
        if value > values[i_max] {
            i_max = i_value;
        }
    }
    return i_max;
}

fn abs_rel_difference(a: f64, b: f64) -> f64 {
    return ((a - b) / b).abs();
}

/// Resample a closed loop to `n_points` equally spaced in arc length
///
/// The loop is closed internally if the last point does not repeat the first; the output does not repeat it.
pub fn resample_closed_loop(x: &Array1<f64>, z: &Array1<f64>, n_points: usize) -> (Array1<f64>, Array1<f64>) {
    let n_input: usize = x.len();
    let mut x_closed: Vec<f64> = x.to_vec();
    let mut z_closed: Vec<f64> = z.to_vec();
    if (x[0] - x[n_input - 1]).hypot(z[0] - z[n_input - 1]) > 0.0 {
        x_closed.push(x[0]);
        z_closed.push(z[0]);
    }

    let mut arc_length: Vec<f64> = vec![0.0];
    for i_point in 1..x_closed.len() {
        let segment: f64 = (x_closed[i_point] - x_closed[i_point - 1]).hypot(z_closed[i_point] - z_closed[i_point - 1]);
        arc_length.push(arc_length[i_point - 1] + segment);
    }
    let total: f64 = arc_length[arc_length.len() - 1];

    let mut x_resampled: Array1<f64> = Array1::zeros(n_points);
    let mut z_resampled: Array1<f64> = Array1::zeros(n_points);
    let mut i_segment: usize = 1;
    for i_point in 0..n_points {
        let length: f64 = total * (i_point as f64) / (n_points as f64);
        while i_segment < arc_length.len() - 1 && arc_length[i_segment] < length {
            i_segment += 1;
        }
        let segment: f64 = arc_length[i_segment] - arc_length[i_segment - 1];
        let fraction: f64 = if segment > 0.0 { (length - arc_length[i_segment - 1]) / segment } else { 0.0 };
        x_resampled[i_point] = x_closed[i_segment - 1] + fraction * (x_closed[i_segment] - x_closed[i_segment - 1]);
        z_resampled[i_point] = z_closed[i_segment - 1] + fraction * (z_closed[i_segment] - z_closed[i_segment - 1]);
    }
    return (x_resampled, z_resampled);
}

#[test]
fn test_resample_closed_loop() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    // Unit square, perimeter 4: 8 points land on the corners and edge midpoints
    let x: Array1<f64> = Array1::from(vec![0.0, 1.0, 1.0, 0.0]);
    let z: Array1<f64> = Array1::from(vec![0.0, 0.0, 1.0, 1.0]);
    let (x_new, z_new): (Array1<f64>, Array1<f64>) = resample_closed_loop(&x, &z, 8);
    assert_abs_diff_eq!(x_new, Array1::from(vec![0.0, 0.5, 1.0, 1.0, 1.0, 0.5, 0.0, 0.0]), epsilon = 1e-12);
    assert_abs_diff_eq!(z_new, Array1::from(vec![0.0, 0.0, 0.0, 0.5, 1.0, 1.0, 1.0, 0.5]), epsilon = 1e-12);
}

#[test]
fn test_auto_constraints_single_and_double_null() {
    let n_boundary: usize = 100;
    let theta: Array1<f64> = Array1::linspace(0.0, 2.0 * std::f64::consts::PI, n_boundary + 1).slice(s![..n_boundary]).to_owned();

    // Up-down symmetric boundary: double null, two field nulls plus isoflux
    let x: Array1<f64> = theta.mapv(|t| 9.0 + 3.0 * t.cos());
    let z: Array1<f64> = theta.mapv(|t| 5.0 * t.sin());
    let constraints: MagneticConstraintSet = AutoConstraints::build(&x, &z, None, 40).expect("auto constraints");
    assert_eq!(constraints.constraints().len(), 3);
    assert_eq!(constraints.len(), 2 + 2 + 40);

    // Lower single null with a boundary flux value
    let z_lower: Array1<f64> = theta.mapv(|t| if t.sin() < 0.0 { 6.0 * t.sin() } else { 4.0 * t.sin() });
    let constraints: MagneticConstraintSet = AutoConstraints::build(&x, &z_lower, Some(10.0), 40).expect("auto constraints");
    assert_eq!(constraints.constraints().len(), 2);
    assert_eq!(constraints.len(), 2 + 40);
}
