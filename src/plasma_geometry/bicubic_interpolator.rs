use ndarray::{Array1, Array2, s};

/// Bicubic patch over one grid cell
/// https://en.wikipedia.org/wiki/Bicubic_interpolation
///
/// The patch is `P(x, y) = [1, x, x^2, x^3] * a * [1, y, y^2, y^3].T` with `x, y` normalised to (0.0, 1.0)
/// across the cell. Here `x` runs along R and `y` along Z.
#[derive(Clone, Debug)]
pub struct BicubicInterpolator {
    a_matrix: Array2<f64>,
}

/// Value and derivatives of the patch, in normalised cell coordinates
#[derive(Clone, Copy, Debug)]
pub struct BicubicValueAndDerivatives {
    pub f: f64,
    pub d_f_d_x: f64,
    pub d_f_d_y: f64,
    pub d2_f_d_x2: f64,
    pub d2_f_d_x_d_y: f64,
    pub d2_f_d_y2: f64,
}

/// Location where the gradient of the patch vanishes
#[derive(Clone, Copy, Debug)]
pub struct BicubicStationaryPoint {
    pub x: f64,
    pub y: f64,
    pub derivatives: BicubicValueAndDerivatives,
    pub n_iter: usize,
}

impl BicubicInterpolator {
    /// Build the patch from corner values
    ///
    /// # Arguments
    /// * `delta_x`, `delta_y` - cell size, used to normalise the derivatives
    /// * `f` - function values at the four corners
    /// * `d_f_d_x`, `d_f_d_y` - first derivatives at the four corners, in physical units
    /// * `d2_f_d_x_d_y` - mixed derivative at the four corners, in physical units
    ///
    /// All corner arrays are indexed `[i_x, i_y]`: `f[(0, 1)]` is the left, upper corner.
    pub fn new(delta_x: f64, delta_y: f64, f: &Array2<f64>, d_f_d_x: &Array2<f64>, d_f_d_y: &Array2<f64>, d2_f_d_x_d_y: &Array2<f64>) -> Self {
        let coeff_matrix_1: Array2<f64> =
            Array2::from_shape_vec((4, 4), vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, -3.0, 3.0, -2.0, -1.0, 2.0, -2.0, 1.0, 1.0])
                .expect("BicubicInterpolator::new: coeff_matrix_1 is 4x4");
        let coeff_matrix_2: Array2<f64> =
            Array2::from_shape_vec((4, 4), vec![1.0, 0.0, -3.0, 2.0, 0.0, 0.0, 3.0, -2.0, 0.0, 1.0, -2.0, 1.0, 0.0, 0.0, -1.0, 1.0])
                .expect("BicubicInterpolator::new: coeff_matrix_2 is 4x4");

        let mut function_matrix: Array2<f64> = Array2::zeros((4, 4));
        function_matrix.slice_mut(s![0..2, 0..2]).assign(f);
        function_matrix.slice_mut(s![2..4, 0..2]).assign(&(d_f_d_x * delta_x));
        function_matrix.slice_mut(s![0..2, 2..4]).assign(&(d_f_d_y * delta_y));
        function_matrix.slice_mut(s![2..4, 2..4]).assign(&(d2_f_d_x_d_y * (delta_x * delta_y)));

        let a_matrix: Array2<f64> = coeff_matrix_1.dot(&function_matrix).dot(&coeff_matrix_2);
        return BicubicInterpolator { a_matrix };
    }

    pub fn interpolate(&self, x: f64, y: f64) -> f64 {
        let u: Array1<f64> = Array1::from(vec![1.0, x, x * x, x * x * x]);
        let v: Array1<f64> = Array1::from(vec![1.0, y, y * y, y * y * y]);
        return u.dot(&self.a_matrix).dot(&v);
    }

    pub fn value_and_derivatives(&self, x: f64, y: f64) -> BicubicValueAndDerivatives {
        let u: Array1<f64> = Array1::from(vec![1.0, x, x * x, x * x * x]);
        let d_u_d_x: Array1<f64> = Array1::from(vec![0.0, 1.0, 2.0 * x, 3.0 * x * x]);
        let d2_u_d_x2: Array1<f64> = Array1::from(vec![0.0, 0.0, 2.0, 6.0 * x]);

        let v: Array1<f64> = Array1::from(vec![1.0, y, y * y, y * y * y]);
        let d_v_d_y: Array1<f64> = Array1::from(vec![0.0, 1.0, 2.0 * y, 3.0 * y * y]);
        let d2_v_d_y2: Array1<f64> = Array1::from(vec![0.0, 0.0, 2.0, 6.0 * y]);

        let a_v: Array1<f64> = self.a_matrix.dot(&v);
        let a_d_v_d_y: Array1<f64> = self.a_matrix.dot(&d_v_d_y);
        let a_d2_v_d_y2: Array1<f64> = self.a_matrix.dot(&d2_v_d_y2);

        return BicubicValueAndDerivatives {
            f: u.dot(&a_v),
            d_f_d_x: d_u_d_x.dot(&a_v),
            d_f_d_y: u.dot(&a_d_v_d_y),
            d2_f_d_x2: d2_u_d_x2.dot(&a_v),
            d2_f_d_x_d_y: d_u_d_x.dot(&a_d_v_d_y),
            d2_f_d_y2: u.dot(&a_d2_v_d_y2),
        };
    }

    /// Newton iteration for a zero of the gradient, kept inside the cell
    ///
    /// Each step is halved until it stays inside the unit square and at least halves the gradient norm.
    ///
    /// # Returns
    /// * `None` if the Hessian becomes singular, no acceptable step exists, or `max_iter` is reached
    pub fn find_stationary_point(&self, x_start: f64, y_start: f64, tol: f64, max_iter: usize) -> Option<BicubicStationaryPoint> {
        // Round-off may land a step a hair outside a cell edge
        let in_bounds = |value: f64| (-1e-9..=1.0 + 1e-9).contains(&value);
        let (mut x, mut y): (f64, f64) = if in_bounds(x_start) && in_bounds(y_start) { (x_start, y_start) } else { (0.5, 0.5) };

        let mut current: BicubicValueAndDerivatives = self.value_and_derivatives(x, y);
        let mut grad_norm: f64 = current.d_f_d_x.hypot(current.d_f_d_y);

        for n_iter in 0..max_iter {
            if grad_norm <= tol {
                return Some(BicubicStationaryPoint {
                    x,
                    y,
                    derivatives: current,
                    n_iter,
                });
            }

            // Solve Hessian * [dx, dy]^T = -grad
            let det: f64 = current.d2_f_d_x2 * current.d2_f_d_y2 - current.d2_f_d_x_d_y.powi(2);
            if det.abs() < 1e-14 {
                return None;
            }
            let step_x: f64 = (-current.d_f_d_x * current.d2_f_d_y2 + current.d_f_d_y * current.d2_f_d_x_d_y) / det;
            let step_y: f64 = (current.d_f_d_x * current.d2_f_d_x_d_y - current.d_f_d_y * current.d2_f_d_x2) / det;

            let mut alpha: f64 = 1.0;
            let mut accepted: bool = false;
            for _backtrack in 0..20 {
                let x_new: f64 = x + alpha * step_x;
                let y_new: f64 = y + alpha * step_y;
                if in_bounds(x_new) && in_bounds(y_new) {
                    let (x_new, y_new): (f64, f64) = (x_new.clamp(0.0, 1.0), y_new.clamp(0.0, 1.0));
                    let trial: BicubicValueAndDerivatives = self.value_and_derivatives(x_new, y_new);
                    let trial_norm: f64 = trial.d_f_d_x.hypot(trial.d_f_d_y);
                    if trial_norm < 0.5 * grad_norm {
                        x = x_new;
                        y = y_new;
                        current = trial;
                        grad_norm = trial_norm;
                        accepted = true;
                        break;
                    }
                }
                alpha *= 0.5;
            }
            if !accepted {
                return None;
            }
        }
        return None;
    }
}

#[test]
fn test_bicubic_interpolation() {
    // The patch is exact for polynomials up to cubic in each direction

    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    let calculate_f = |x: f64, y: f64| -(x - 0.3).powi(2) - 2.0 * (y - 0.6).powi(2) + 0.5 * x * y;
    let calculate_d_f_d_x = |x: f64, y: f64| -2.0 * (x - 0.3) + 0.5 * y;
    let calculate_d_f_d_y = |x: f64, y: f64| -4.0 * (y - 0.6) + 0.5 * x;

    let mut f: Array2<f64> = Array2::zeros((2, 2));
    let mut d_f_d_x: Array2<f64> = Array2::zeros((2, 2));
    let mut d_f_d_y: Array2<f64> = Array2::zeros((2, 2));
    let d2_f_d_x_d_y: Array2<f64> = Array2::from_elem((2, 2), 0.5);
    for i_x in 0..2 {
        for i_y in 0..2 {
            let (x, y): (f64, f64) = (i_x as f64, i_y as f64);
            f[(i_x, i_y)] = calculate_f(x, y);
            d_f_d_x[(i_x, i_y)] = calculate_d_f_d_x(x, y);
            d_f_d_y[(i_x, i_y)] = calculate_d_f_d_y(x, y);
        }
    }

    let interpolator: BicubicInterpolator = BicubicInterpolator::new(1.0, 1.0, &f, &d_f_d_x, &d_f_d_y, &d2_f_d_x_d_y);
    for &x in [0.05, 0.4, 0.9].iter() {
        for &y in [0.1, 0.5, 0.95].iter() {
            assert_abs_diff_eq!(interpolator.interpolate(x, y), calculate_f(x, y), epsilon = 1e-12);
        }
    }

    // Stationary point of the quadratic: solve the 2x2 linear system analytically
    // -2(x - 0.3) + 0.5 y = 0, -4(y - 0.6) + 0.5 x = 0
    let y_exact: f64 = (2.4 + 0.15) / (4.0 - 0.125);
    let x_exact: f64 = 0.3 + 0.25 * y_exact;
    let stationary: BicubicStationaryPoint = interpolator.find_stationary_point(0.5, 0.5, 1e-10, 50).expect("test_bicubic_interpolation: Newton");
    assert_abs_diff_eq!(stationary.x, x_exact, epsilon = 1e-8);
    assert_abs_diff_eq!(stationary.y, y_exact, epsilon = 1e-8);
    assert!(stationary.derivatives.d2_f_d_x2 < 0.0);
}
