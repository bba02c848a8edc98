use ndarray::Array1;
use std::fmt::Debug;

/// Number of Simpson intervals used when a shape has no analytic integral
const N_SIMPSON: usize = 200;

/// Number of intervals in tabulated integrals
pub(crate) const N_TABLE: usize = 2000;

/// Dimensionless current-density shape over normalised flux, ψ_N in [0, 1]
///
/// Shapes are parameterised by a small coefficient vector, which the internal inductance
/// optimiser adjusts within `coefficient_bounds`.
pub trait ShapeFunction: Debug + Send + Sync {
    fn shape_value(&self, psi_n: &Array1<f64>) -> Array1<f64>;

    /// ∫ shape dψ_N from `psi_n` to the boundary, ψ_N = 1
    fn shape_integral(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        return psi_n.mapv(|x| integrate_to_edge(|t| self.shape_value(&Array1::from(vec![t]))[0], x));
    }

    fn shape_coefficients(&self) -> Array1<f64>;
    fn set_shape_coefficients(&mut self, coefficients: &Array1<f64>);

    /// (lower, upper) bound applied to every coefficient during li optimisation
    fn coefficient_bounds(&self) -> (f64, f64);

    fn shape_n_dof(&self) -> usize {
        return self.shape_coefficients().len();
    }

    fn clone_box(&self) -> Box<dyn ShapeFunction>;
}

impl Clone for Box<dyn ShapeFunction> {
    fn clone(&self) -> Self {
        return self.clone_box();
    }
}

/// Composite Simpson integral of `f` from `x` to 1
pub fn integrate_to_edge<F>(f: F, x: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    let x: f64 = x.clamp(0.0, 1.0);
    let width: f64 = 1.0 - x;
    if width <= 0.0 {
        return 0.0;
    }
    let step: f64 = width / (N_SIMPSON as f64);
    let mut sum: f64 = f(x) + f(1.0);
    for i_step in 1..N_SIMPSON {
        let weight: f64 = if i_step % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * f(x + step * (i_step as f64));
    }
    return sum * step / 3.0;
}

/// ∫ f dψ_N from each `psi_n` to 1, with f sampled on `linspace(0, 1, values.len())`
///
/// Cumulative trapezoid from the boundary inwards, then linear interpolation.
pub(crate) fn tabulated_integral_to_edge(values: &Array1<f64>, psi_n: &Array1<f64>) -> Array1<f64> {
    let n_intervals: usize = values.len() - 1;
    let step: f64 = 1.0 / (n_intervals as f64);
    let mut table: Array1<f64> = Array1::zeros(n_intervals + 1);
    for i_table in (0..n_intervals).rev() {
        table[i_table] = table[i_table + 1] + 0.5 * step * (values[i_table] + values[i_table + 1]);
    }

    return psi_n.mapv(|x| {
        let position: f64 = x.clamp(0.0, 1.0) * (n_intervals as f64);
        let i_lower: usize = (position.floor() as usize).min(n_intervals - 1);
        let fraction: f64 = position - (i_lower as f64);
        table[i_lower] * (1.0 - fraction) + table[i_lower + 1] * fraction
    });
}

/// (1 - ψ_N^n_1)^n_2
#[derive(Clone, Debug, PartialEq)]
pub struct DoublePowerShape {
    pub n_1: f64,
    pub n_2: f64,
}

impl DoublePowerShape {
    pub fn new(n_1: f64, n_2: f64) -> Self {
        return DoublePowerShape { n_1, n_2 };
    }
}

impl Default for DoublePowerShape {
    fn default() -> Self {
        return DoublePowerShape::new(1.0, 0.8);
    }
}

impl ShapeFunction for DoublePowerShape {
    fn shape_value(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        let (n_1, n_2): (f64, f64) = (self.n_1, self.n_2);
        return psi_n.mapv(|x| (1.0 - x.clamp(0.0, 1.0).powf(n_1)).max(0.0).powf(n_2));
    }

    /// Tabulated once per call, since it is evaluated at every grid node
    fn shape_integral(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        let abscissa: Array1<f64> = Array1::linspace(0.0, 1.0, N_TABLE + 1);
        return tabulated_integral_to_edge(&self.shape_value(&abscissa), psi_n);
    }

    fn shape_coefficients(&self) -> Array1<f64> {
        return Array1::from(vec![self.n_1, self.n_2]);
    }

    fn set_shape_coefficients(&mut self, coefficients: &Array1<f64>) {
        // Exponents must stay positive for the shape to vanish at the boundary
        self.n_1 = coefficients[0].max(1e-3);
        self.n_2 = coefficients[1].max(1e-3);
    }

    fn coefficient_bounds(&self) -> (f64, f64) {
        return (0.1, 4.0);
    }

    fn clone_box(&self) -> Box<dyn ShapeFunction> {
        return Box::new(self.clone());
    }
}

/// Σ c_i (1 - ψ_N) ψ_N^i, zero at the boundary for any coefficients
#[derive(Clone, Debug, PartialEq)]
pub struct PolynomialShape {
    pub coefficients: Array1<f64>,
}

impl PolynomialShape {
    pub fn new(coefficients: Array1<f64>) -> Self {
        return PolynomialShape { coefficients };
    }

    fn value_single_dof(psi_n: &Array1<f64>, i_dof: usize) -> Array1<f64> {
        return psi_n.mapv(|x| (1.0 - x) * x.powi(i_dof as i32));
    }

    /// ∫ (1 - t) t^i dt from ψ_N to 1
    fn integral_single_dof(psi_n: &Array1<f64>, i_dof: usize) -> Array1<f64> {
        let p_1: f64 = (i_dof + 1) as f64;
        let p_2: f64 = (i_dof + 2) as f64;
        let antiderivative = |x: f64| x.powf(p_1) / p_1 - x.powf(p_2) / p_2;
        let at_edge: f64 = antiderivative(1.0);
        return psi_n.mapv(|x| at_edge - antiderivative(x));
    }
}

impl ShapeFunction for PolynomialShape {
    fn shape_value(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        let mut value: Array1<f64> = Array1::zeros(psi_n.len());
        for (i_dof, &coefficient) in self.coefficients.iter().enumerate() {
            value = value + coefficient * PolynomialShape::value_single_dof(psi_n, i_dof);
        }
        return value;
    }

    fn shape_integral(&self, psi_n: &Array1<f64>) -> Array1<f64> {
        let mut integral: Array1<f64> = Array1::zeros(psi_n.len());
        for (i_dof, &coefficient) in self.coefficients.iter().enumerate() {
            integral = integral + coefficient * PolynomialShape::integral_single_dof(psi_n, i_dof);
        }
        return integral;
    }

    fn shape_coefficients(&self) -> Array1<f64> {
        return self.coefficients.clone();
    }

    fn set_shape_coefficients(&mut self, coefficients: &Array1<f64>) {
        self.coefficients = coefficients.clone();
    }

    fn coefficient_bounds(&self) -> (f64, f64) {
        return (-1.0, 2.0);
    }

    fn clone_box(&self) -> Box<dyn ShapeFunction> {
        return Box::new(self.clone());
    }
}

#[test]
fn test_polynomial_shape_integral_matches_simpson() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    let shape: PolynomialShape = PolynomialShape::new(Array1::from(vec![1.0, -0.4, 0.7]));
    let psi_n: Array1<f64> = Array1::linspace(0.0, 1.0, 11);
    let analytic: Array1<f64> = shape.shape_integral(&psi_n);
    for (i_psi, &x) in psi_n.iter().enumerate() {
        let numeric: f64 = integrate_to_edge(|t| shape.shape_value(&Array1::from(vec![t]))[0], x);
        assert_abs_diff_eq!(analytic[i_psi], numeric, epsilon = 1e-10);
    }
    assert_abs_diff_eq!(analytic[10], 0.0, epsilon = 1e-14);
    assert_abs_diff_eq!(shape.shape_value(&psi_n)[10], 0.0, epsilon = 1e-14);
}

#[test]
fn test_double_power_shape() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    // n_1 = 1, n_2 = 1: shape = 1 - x, integral to the edge = (1 - x)^2 / 2
    let mut shape: DoublePowerShape = DoublePowerShape::new(1.0, 1.0);
    let psi_n: Array1<f64> = Array1::from(vec![0.0, 0.3, 1.0]);
    assert_abs_diff_eq!(shape.shape_value(&psi_n)[1], 0.7, epsilon = 1e-14);
    assert_abs_diff_eq!(shape.shape_integral(&psi_n)[0], 0.5, epsilon = 1e-10);
    assert_abs_diff_eq!(shape.shape_integral(&psi_n)[1], 0.245, epsilon = 1e-10);

    // The tabulated integral agrees with direct quadrature for a non-polynomial shape
    let mut shape: DoublePowerShape = DoublePowerShape::new(2.0, 0.8);
    let x: f64 = 0.37;
    let direct: f64 = integrate_to_edge(|t| (1.0 - t * t).powf(0.8), x);
    assert_abs_diff_eq!(shape.shape_integral(&Array1::from(vec![x]))[0], direct, epsilon = 1e-5);

    shape.set_shape_coefficients(&Array1::from(vec![2.0, -1.0]));
    assert_eq!(shape.n_1, 2.0);
    assert!(shape.n_2 > 0.0);
}
