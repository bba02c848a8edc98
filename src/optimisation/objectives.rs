use crate::error::{EquilibriaError, EquilibriaResult};
use ndarray::{Array1, Array2};
use ndarray_linalg::Solve;

/// Tikhonov-regularised least squares, x = argmin ||A x - b||^2 + γ^2 ||x||^2
///
/// Solved in closed form from the normal equations (AᵀA + γ² I) x = Aᵀb.
///
/// # Arguments
/// * `a_mat` - response matrix, shape = (n_targets, n_variables)
/// * `b_vec` - target vector, length n_targets
/// * `gamma` - regularisation parameter
pub fn tikhonov(a_mat: &Array2<f64>, b_vec: &Array1<f64>, gamma: f64) -> EquilibriaResult<Array1<f64>> {
    check_shapes(a_mat, b_vec)?;
    let n_variables: usize = a_mat.ncols();
    let a_t: Array2<f64> = a_mat.t().to_owned();
    let normal_matrix: Array2<f64> = a_t.dot(a_mat) + gamma * gamma * Array2::<f64>::eye(n_variables);
    let rhs: Array1<f64> = a_t.dot(b_vec);

    let solution: Array1<f64> = normal_matrix
        .solve_into(rhs)
        .map_err(|error| EquilibriaError::LinearSolve(format!("tikhonov: {error}")))?;
    return Ok(solution);
}

/// Figure of merit of the regularised least-squares problem
///
/// fom = ||A x - b||^2 / n_targets + γ^2 ||x||^2
///
/// # Returns
/// * `(fom, residual)` - the residual is A x - b
pub fn regularised_lsq_fom(x: &Array1<f64>, a_mat: &Array2<f64>, b_vec: &Array1<f64>, gamma: f64) -> (f64, Array1<f64>) {
    let n_targets: f64 = b_vec.len().max(1) as f64;
    let residual: Array1<f64> = a_mat.dot(x) - b_vec;
    let fom: f64 = residual.dot(&residual) / n_targets + gamma * gamma * x.dot(x);
    return (fom, residual);
}

/// Regularised least-squares objective and gradient in scaled variables
///
/// The optimiser works on `vector = x / scale`; the gradient is taken with respect to `vector`.
///
/// # Returns
/// * `(fom, gradient)`
pub fn regularised_lsq_objective(vector: &Array1<f64>, scale: f64, a_mat: &Array2<f64>, b_vec: &Array1<f64>, gamma: f64) -> (f64, Array1<f64>) {
    let x: Array1<f64> = vector * scale;
    let n_targets: f64 = b_vec.len().max(1) as f64;
    let (fom, residual): (f64, Array1<f64>) = regularised_lsq_fom(&x, a_mat, b_vec, gamma);

    // d(fom)/dx = 2 Aᵀ(A x - b) / n + 2 γ^2 x
    let gradient: Array1<f64> = (2.0 / n_targets * a_mat.t().dot(&residual) + 2.0 * gamma * gamma * &x) * scale;
    return (fom, gradient);
}

fn check_shapes(a_mat: &Array2<f64>, b_vec: &Array1<f64>) -> EquilibriaResult<()> {
    if a_mat.nrows() != b_vec.len() {
        return Err(EquilibriaError::ArrayLength {
            what: "target vector".to_string(),
            expected: a_mat.nrows(),
            found: b_vec.len(),
        });
    }
    return Ok(());
}

#[test]
fn test_tikhonov_matches_least_squares() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;
    use rand::Rng;

    let mut rng = rand::rng();
    let n_targets: usize = 12;
    let n_variables: usize = 4;
    let a_mat: Array2<f64> = Array2::from_shape_fn((n_targets, n_variables), |_| rng.random_range(-1.0..1.0));
    let x_true: Array1<f64> = Array1::from(vec![1.0, -2.0, 0.5, 3.0]);
    let b_vec: Array1<f64> = a_mat.dot(&x_true);

    // Consistent system and no regularisation: the exact solution is recovered
    let x: Array1<f64> = tikhonov(&a_mat, &b_vec, 0.0).expect("tikhonov");
    assert_abs_diff_eq!(x, x_true, epsilon = 1e-9);

    // With regularisation the normal equations hold
    let gamma: f64 = 0.3;
    let x: Array1<f64> = tikhonov(&a_mat, &b_vec, gamma).expect("tikhonov");
    let lhs: Array1<f64> = a_mat.t().dot(&a_mat).dot(&x) + gamma * gamma * &x;
    assert_abs_diff_eq!(lhs, a_mat.t().dot(&b_vec), epsilon = 1e-9);
    assert!(x.dot(&x) < x_true.dot(&x_true));

    assert!(tikhonov(&a_mat, &Array1::zeros(3), gamma).is_err());
}

#[test]
fn test_regularised_lsq_gradient() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;

    let a_mat: Array2<f64> = Array2::from_shape_vec((3, 2), vec![1.0, 2.0, -1.0, 0.5, 3.0, 1.0]).expect("a_mat");
    let b_vec: Array1<f64> = Array1::from(vec![1e6, -2e6, 0.5e6]);
    let scale: f64 = 1e6;
    let gamma: f64 = 1e-3;
    let vector: Array1<f64> = Array1::from(vec![0.4, -0.7]);

    let (fom, gradient): (f64, Array1<f64>) = regularised_lsq_objective(&vector, scale, &a_mat, &b_vec, gamma);
    assert_relative_eq!(fom, regularised_lsq_fom(&(&vector * scale), &a_mat, &b_vec, gamma).0, max_relative = 1e-14);

    let step: f64 = 1e-6;
    for i_variable in 0..2 {
        let mut plus: Array1<f64> = vector.clone();
        let mut minus: Array1<f64> = vector.clone();
        plus[i_variable] += step;
        minus[i_variable] -= step;
        let numeric: f64 = (regularised_lsq_objective(&plus, scale, &a_mat, &b_vec, gamma).0
            - regularised_lsq_objective(&minus, scale, &a_mat, &b_vec, gamma).0)
            / (2.0 * step);
        assert_relative_eq!(gradient[i_variable], numeric, max_relative = 1e-6);
    }
}
