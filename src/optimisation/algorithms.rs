use crate::error::{EquilibriaError, EquilibriaResult};
use log::{debug, warn};
use ndarray::{Array1, Array2, Zip};
use serde::{Deserialize, Serialize};

/// Outcome of one objective evaluation
///
/// `Converged` tells the optimiser that the caller's own tolerance is met, and the search stops
/// at this point without further evaluations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Evaluation {
    Continue(f64),
    Converged(f64),
}

impl Evaluation {
    pub fn value(&self) -> f64 {
        return match *self {
            Evaluation::Continue(value) => value,
            Evaluation::Converged(value) => value,
        };
    }
}

/// Stopping conditions shared by the optimisers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimiserConditions {
    pub max_evaluations: usize,
    /// Relative change in the objective below which the search stops
    pub ftol_rel: f64,
    /// Relative change in the variables below which the search stops
    pub xtol_rel: f64,
    /// Allowed violation of each inequality constraint, c(x) <= tolerance
    pub constraint_tolerance: f64,
}

impl Default for OptimiserConditions {
    fn default() -> Self {
        return OptimiserConditions {
            max_evaluations: 200,
            ftol_rel: 1e-6,
            xtol_rel: 1e-6,
            constraint_tolerance: 1e-6,
        };
    }
}

/// Result of a general optimiser run
#[derive(Clone, Debug)]
pub struct OptimiserResult {
    pub x: Array1<f64>,
    pub f_x: f64,
    pub n_evals: usize,
    pub converged: bool,
}

/// Inequality constraints c(x) <= 0 with their Jacobian
pub trait ConstraintFunction {
    fn n_constraints(&self) -> usize;

    /// Constraint values and Jacobian, shape = (n_constraints, n_variables)
    fn evaluate(&self, x: &Array1<f64>) -> (Array1<f64>, Array2<f64>);
}

fn project(x: &Array1<f64>, lower: &Array1<f64>, upper: &Array1<f64>) -> Array1<f64> {
    let mut projected: Array1<f64> = x.clone();
    Zip::from(&mut projected).and(lower).and(upper).for_each(|value, &low, &high| {
        *value = value.clamp(low, high);
    });
    return projected;
}

fn check_bounds(x0: &Array1<f64>, lower: &Array1<f64>, upper: &Array1<f64>) -> EquilibriaResult<()> {
    for (what, array) in [("lower bounds", lower), ("upper bounds", upper)] {
        if array.len() != x0.len() {
            return Err(EquilibriaError::ArrayLength {
                what: what.to_string(),
                expected: x0.len(),
                found: array.len(),
            });
        }
    }
    return Ok(());
}

/// Central finite-difference Jacobian of a vector function
///
/// # Returns
/// * `Array2<f64>` - shape = (n_outputs, n_variables)
pub fn finite_difference_jacobian<F>(mut function: F, x: &Array1<f64>, step: f64) -> EquilibriaResult<Array2<f64>>
where
    F: FnMut(&Array1<f64>) -> EquilibriaResult<Array1<f64>>,
{
    let n_variables: usize = x.len();
    let mut trial: Array1<f64> = x.clone();
    let mut columns: Vec<Array1<f64>> = Vec::with_capacity(n_variables);
    for i_variable in 0..n_variables {
        let original: f64 = trial[i_variable];

        trial[i_variable] = original + step;
        let plus: Array1<f64> = function(&trial)?;

        trial[i_variable] = original - step;
        let minus: Array1<f64> = function(&trial)?;

        trial[i_variable] = original;
        columns.push((plus - minus) / (2.0 * step));
    }

    let n_outputs: usize = columns.first().map(|column| column.len()).unwrap_or(0);
    let mut jacobian: Array2<f64> = Array2::zeros((n_outputs, n_variables));
    for (i_variable, column) in columns.iter().enumerate() {
        jacobian.column_mut(i_variable).assign(column);
    }
    return Ok(jacobian);
}

/// Nelder-Mead simplex search inside box bounds
///
/// Trial vertices are projected onto the box. The objective may return `Evaluation::Converged`
/// to end the search early; that vertex is then returned as the optimum.
///
/// # Arguments
/// * `objective` - evaluated at each trial point
/// * `x0` - starting point
/// * `lower`, `upper` - box bounds, same length as `x0`
/// * `initial_step` - size of the initial simplex, relative to the box width
pub fn nelder_mead_bounded<F>(
    mut objective: F,
    x0: &Array1<f64>,
    lower: &Array1<f64>,
    upper: &Array1<f64>,
    initial_step: f64,
    conditions: &OptimiserConditions,
) -> EquilibriaResult<OptimiserResult>
where
    F: FnMut(&Array1<f64>) -> EquilibriaResult<Evaluation>,
{
    check_bounds(x0, lower, upper)?;
    let n_variables: usize = x0.len();
    let mut n_evals: usize = 0;

    // Standard coefficients: reflection, expansion, contraction, shrink
    let (alpha, gamma, rho, sigma): (f64, f64, f64, f64) = (1.0, 2.0, 0.5, 0.5);

    // Initial simplex
    let start: Array1<f64> = project(x0, lower, upper);
    let mut vertices: Vec<Array1<f64>> = vec![start.clone()];
    for i_variable in 0..n_variables {
        let mut vertex: Array1<f64> = start.clone();
        let width: f64 = upper[i_variable] - lower[i_variable];
        let step: f64 = if width.is_finite() { initial_step * width } else { initial_step * start[i_variable].abs().max(1.0) };
        vertex[i_variable] += step;
        if vertex[i_variable] > upper[i_variable] {
            vertex[i_variable] = start[i_variable] - step;
        }
        vertices.push(project(&vertex, lower, upper));
    }

    let mut values: Vec<f64> = Vec::with_capacity(n_variables + 1);
    for vertex in vertices.iter() {
        n_evals += 1;
        match objective(vertex)? {
            Evaluation::Converged(value) => {
                return Ok(OptimiserResult {
                    x: vertex.clone(),
                    f_x: value,
                    n_evals,
                    converged: true,
                });
            }
            Evaluation::Continue(value) => values.push(value),
        }
    }

    loop {
        // Order the simplex, best first
        let mut order: Vec<usize> = (0..=n_variables).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        vertices = order.iter().map(|&i_vertex| vertices[i_vertex].clone()).collect();
        values = order.iter().map(|&i_vertex| values[i_vertex]).collect();

        let f_best: f64 = values[0];
        let f_worst: f64 = values[n_variables];
        let x_spread: f64 = vertices
            .iter()
            .skip(1)
            .map(|vertex| (vertex - &vertices[0]).mapv(f64::abs).fold(0.0, |acc: f64, &value| acc.max(value)))
            .fold(0.0, f64::max);
        let x_scale: f64 = vertices[0].mapv(f64::abs).fold(0.0, |acc: f64, &value| acc.max(value)).max(1e-12);
        if (f_worst - f_best).abs() <= conditions.ftol_rel * f_best.abs().max(1e-300) || x_spread <= conditions.xtol_rel * x_scale {
            return Ok(OptimiserResult {
                x: vertices[0].clone(),
                f_x: f_best,
                n_evals,
                converged: true,
            });
        }
        if n_evals >= conditions.max_evaluations {
            debug!("nelder_mead_bounded: evaluation cap {} reached, f = {f_best:.6e}", conditions.max_evaluations);
            return Ok(OptimiserResult {
                x: vertices[0].clone(),
                f_x: f_best,
                n_evals,
                converged: false,
            });
        }

        let centroid: Array1<f64> = vertices.iter().take(n_variables).fold(Array1::zeros(n_variables), |acc, vertex| acc + vertex) / (n_variables as f64);
        let worst: Array1<f64> = vertices[n_variables].clone();

        // Evaluate one trial point, stopping the search on the sentinel
        let mut evaluate = |point: &Array1<f64>| -> EquilibriaResult<Result<f64, OptimiserResult>> {
            n_evals += 1;
            return Ok(match objective(point)? {
                Evaluation::Converged(value) => Err(OptimiserResult {
                    x: point.clone(),
                    f_x: value,
                    n_evals,
                    converged: true,
                }),
                Evaluation::Continue(value) => Ok(value),
            });
        };

        let reflected: Array1<f64> = project(&(&centroid + &((&centroid - &worst) * alpha)), lower, upper);
        let f_reflected: f64 = match evaluate(&reflected)? {
            Ok(value) => value,
            Err(result) => return Ok(result),
        };

        if f_reflected < values[0] {
            let expanded: Array1<f64> = project(&(&centroid + &((&reflected - &centroid) * gamma)), lower, upper);
            let f_expanded: f64 = match evaluate(&expanded)? {
                Ok(value) => value,
                Err(result) => return Ok(result),
            };
            if f_expanded < f_reflected {
                vertices[n_variables] = expanded;
                values[n_variables] = f_expanded;
            } else {
                vertices[n_variables] = reflected;
                values[n_variables] = f_reflected;
            }
            continue;
        }

        if f_reflected < values[n_variables - usize::from(n_variables > 0)] {
            vertices[n_variables] = reflected;
            values[n_variables] = f_reflected;
            continue;
        }

        // Contraction, outside or inside
        let (contracted, threshold): (Array1<f64>, f64) = if f_reflected < f_worst {
            (project(&(&centroid + &((&reflected - &centroid) * rho)), lower, upper), f_reflected)
        } else {
            (project(&(&centroid + &((&worst - &centroid) * rho)), lower, upper), f_worst)
        };
        let f_contracted: f64 = match evaluate(&contracted)? {
            Ok(value) => value,
            Err(result) => return Ok(result),
        };
        if f_contracted < threshold {
            vertices[n_variables] = contracted;
            values[n_variables] = f_contracted;
            continue;
        }

        // Shrink towards the best vertex
        for i_vertex in 1..=n_variables {
            let shrunk: Array1<f64> = project(&(&vertices[0] + &((&vertices[i_vertex] - &vertices[0]) * sigma)), lower, upper);
            let f_shrunk: f64 = match evaluate(&shrunk)? {
                Ok(value) => value,
                Err(result) => return Ok(result),
            };
            vertices[i_vertex] = shrunk;
            values[i_vertex] = f_shrunk;
        }
    }
}

/// Projected-gradient minimisation of a smooth objective inside box bounds, with inequality constraints
/// handled by an augmented Lagrangian
///
/// The inner problem is minimised with Barzilai-Borwein steps and an Armijo backtracking line search on the
/// projected path. After each inner solve the multipliers are updated, and the penalty grows when the
/// constraint violation does not fall fast enough.
///
/// # Arguments
/// * `objective` - returns the value and gradient at a point
/// * `constraints` - inequality constraints c(x) <= 0
///
/// # Returns
/// * `converged` is false when the evaluation cap is reached, or the constraints remain violated
pub fn augmented_lagrangian_bounded<F>(
    mut objective: F,
    constraints: &[&dyn ConstraintFunction],
    x0: &Array1<f64>,
    lower: &Array1<f64>,
    upper: &Array1<f64>,
    conditions: &OptimiserConditions,
) -> EquilibriaResult<OptimiserResult>
where
    F: FnMut(&Array1<f64>) -> EquilibriaResult<(f64, Array1<f64>)>,
{
    check_bounds(x0, lower, upper)?;
    let n_variables: usize = x0.len();
    let n_constraints: usize = constraints.iter().map(|constraint| constraint.n_constraints()).sum();

    let evaluate_constraints = |x: &Array1<f64>| -> (Array1<f64>, Array2<f64>) {
        let mut values: Array1<f64> = Array1::zeros(n_constraints);
        let mut jacobian: Array2<f64> = Array2::zeros((n_constraints, n_variables));
        let mut i_start: usize = 0;
        for constraint in constraints.iter() {
            let n: usize = constraint.n_constraints();
            let (c, dc): (Array1<f64>, Array2<f64>) = constraint.evaluate(x);
            values.slice_mut(ndarray::s![i_start..i_start + n]).assign(&c);
            jacobian.slice_mut(ndarray::s![i_start..i_start + n, ..]).assign(&dc);
            i_start += n;
        }
        return (values, jacobian);
    };

    let mut x: Array1<f64> = project(x0, lower, upper);
    let mut multipliers: Array1<f64> = Array1::zeros(n_constraints);
    let mut penalty: f64 = 10.0;
    let mut n_evals: usize = 0;
    let mut previous_violation: f64 = f64::INFINITY;
    let mut f_x: f64 = f64::NAN;

    let max_outer: usize = 20;
    for _i_outer in 0..max_outer {
        // Augmented Lagrangian value and gradient
        let mut lagrangian = |x: &Array1<f64>, n_evals: &mut usize| -> EquilibriaResult<(f64, Array1<f64>, f64)> {
            *n_evals += 1;
            let (f, mut gradient): (f64, Array1<f64>) = objective(x)?;
            let mut value: f64 = f;
            if n_constraints > 0 {
                let (c, dc): (Array1<f64>, Array2<f64>) = evaluate_constraints(x);
                let shifted: Array1<f64> = (&multipliers + &(penalty * &c)).mapv(|value| value.max(0.0));
                value += (shifted.mapv(|value| value * value).sum() - multipliers.mapv(|value| value * value).sum()) / (2.0 * penalty);
                gradient = gradient + dc.t().dot(&shifted);
            }
            return Ok((value, gradient, f));
        };

        // Inner projected-gradient solve
        let (mut value, mut gradient, mut f_inner): (f64, Array1<f64>, f64) = lagrangian(&x, &mut n_evals)?;
        let mut step: f64 = 1.0 / gradient.mapv(f64::abs).fold(0.0, |acc: f64, &g| acc.max(g)).max(1e-12);
        let mut inner_converged: bool = false;
        while n_evals < conditions.max_evaluations {
            let mut alpha: f64 = step;
            let mut accepted: Option<(Array1<f64>, f64, Array1<f64>, f64)> = None;
            for _backtrack in 0..30 {
                let trial: Array1<f64> = project(&(&x - &(alpha * &gradient)), lower, upper);
                let (trial_value, trial_gradient, trial_f): (f64, Array1<f64>, f64) = lagrangian(&trial, &mut n_evals)?;
                if trial_value <= value + 1e-4 * gradient.dot(&(&trial - &x)) {
                    accepted = Some((trial, trial_value, trial_gradient, trial_f));
                    break;
                }
                alpha *= 0.5;
            }
            let Some((x_new, value_new, gradient_new, f_new)) = accepted else {
                inner_converged = true;
                break;
            };

            let s: Array1<f64> = &x_new - &x;
            let y: Array1<f64> = &gradient_new - &gradient;
            let x_change: f64 = s.mapv(f64::abs).fold(0.0, |acc: f64, &value| acc.max(value));
            let x_scale: f64 = x_new.mapv(f64::abs).fold(0.0, |acc: f64, &value| acc.max(value)).max(1.0);
            let f_change: f64 = (value - value_new).abs();

            x = x_new;
            value = value_new;
            gradient = gradient_new;
            f_inner = f_new;

            // Barzilai-Borwein step for the next iteration
            let s_dot_y: f64 = s.dot(&y);
            step = if s_dot_y > 0.0 { s.dot(&s) / s_dot_y } else { alpha * 2.0 };

            if x_change <= conditions.xtol_rel * x_scale || f_change <= conditions.ftol_rel * value.abs().max(1e-300) {
                inner_converged = true;
                break;
            }
        }
        f_x = f_inner;

        if n_constraints == 0 {
            let converged: bool = inner_converged;
            if !converged {
                warn!("augmented_lagrangian_bounded: evaluation cap {} reached", conditions.max_evaluations);
            }
            return Ok(OptimiserResult { x, f_x, n_evals, converged });
        }

        let (c, _dc): (Array1<f64>, Array2<f64>) = evaluate_constraints(&x);
        let violation: f64 = c.fold(0.0, |acc: f64, &value| acc.max(value));
        multipliers = (&multipliers + &(penalty * &c)).mapv(|value| value.max(0.0));
        debug!("augmented_lagrangian_bounded: f = {f_x:.6e}, max violation = {violation:.3e}, penalty = {penalty:.1e}");

        if violation <= conditions.constraint_tolerance && inner_converged {
            return Ok(OptimiserResult {
                x,
                f_x,
                n_evals,
                converged: true,
            });
        }
        if n_evals >= conditions.max_evaluations {
            break;
        }
        if violation > 0.25 * previous_violation {
            penalty *= 10.0;
        }
        previous_violation = violation;
    }

    warn!("augmented_lagrangian_bounded: constraints not satisfied within {} evaluations", conditions.max_evaluations);
    return Ok(OptimiserResult {
        x,
        f_x,
        n_evals,
        converged: false,
    });
}

#[test]
fn test_nelder_mead_rosenbrock_in_box() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    let rosenbrock = |x: &Array1<f64>| -> EquilibriaResult<Evaluation> {
        let value: f64 = (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        return Ok(Evaluation::Continue(value));
    };
    let conditions: OptimiserConditions = OptimiserConditions {
        max_evaluations: 2000,
        ftol_rel: 1e-14,
        xtol_rel: 1e-10,
        constraint_tolerance: 1e-6,
    };
    let lower: Array1<f64> = Array1::from(vec![-2.0, -2.0]);
    let upper: Array1<f64> = Array1::from(vec![2.0, 2.0]);
    let result: OptimiserResult = nelder_mead_bounded(rosenbrock, &Array1::from(vec![-1.2, 1.0]), &lower, &upper, 0.05, &conditions).expect("nelder_mead");
    assert!(result.converged);
    assert_abs_diff_eq!(result.x[0], 1.0, epsilon = 1e-3);
    assert_abs_diff_eq!(result.x[1], 1.0, epsilon = 2e-3);

    // The box excludes the unconstrained minimum, so the optimum sits on the bound
    let upper: Array1<f64> = Array1::from(vec![0.5, 2.0]);
    let result: OptimiserResult = nelder_mead_bounded(rosenbrock, &Array1::from(vec![-1.2, 1.0]), &lower, &upper, 0.05, &conditions).expect("nelder_mead");
    assert_abs_diff_eq!(result.x[0], 0.5, epsilon = 1e-3);
}

#[test]
fn test_nelder_mead_stops_on_sentinel() {
    let mut n_calls: usize = 0;
    let objective = |x: &Array1<f64>| -> EquilibriaResult<Evaluation> {
        n_calls += 1;
        let value: f64 = (x[0] - 3.0).powi(2);
        if value < 0.25 {
            return Ok(Evaluation::Converged(value));
        }
        return Ok(Evaluation::Continue(value));
    };
    let result: OptimiserResult = nelder_mead_bounded(
        objective,
        &Array1::from(vec![0.0]),
        &Array1::from(vec![-10.0]),
        &Array1::from(vec![10.0]),
        0.1,
        &OptimiserConditions::default(),
    )
    .expect("nelder_mead");
    assert!(result.converged);
    assert!(result.f_x < 0.25);
    assert_eq!(result.n_evals, n_calls);
}

#[cfg(test)]
struct SumBelow {
    limit: f64,
}

#[cfg(test)]
impl ConstraintFunction for SumBelow {
    fn n_constraints(&self) -> usize {
        return 1;
    }

    fn evaluate(&self, x: &Array1<f64>) -> (Array1<f64>, Array2<f64>) {
        return (Array1::from(vec![x.sum() - self.limit]), Array2::ones((1, x.len())));
    }
}

#[test]
fn test_augmented_lagrangian_quadratic_with_constraint() {
    // min (x0 - 2)^2 + (x1 - 2)^2 subject to x0 + x1 <= 2 and x1 <= 0.8: optimum (1.2, 0.8)

    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    let objective = |x: &Array1<f64>| -> EquilibriaResult<(f64, Array1<f64>)> {
        let residual: Array1<f64> = x - 2.0;
        return Ok((residual.dot(&residual), 2.0 * residual));
    };
    let constraint: SumBelow = SumBelow { limit: 2.0 };
    let conditions: OptimiserConditions = OptimiserConditions {
        max_evaluations: 5000,
        ftol_rel: 1e-12,
        xtol_rel: 1e-12,
        constraint_tolerance: 1e-6,
    };
    let result: OptimiserResult = augmented_lagrangian_bounded(
        objective,
        &[&constraint],
        &Array1::zeros(2),
        &Array1::from(vec![-5.0, -5.0]),
        &Array1::from(vec![5.0, 0.8]),
        &conditions,
    )
    .expect("augmented_lagrangian_bounded");
    assert!(result.converged);
    assert_abs_diff_eq!(result.x[0], 1.2, epsilon = 1e-4);
    assert_abs_diff_eq!(result.x[1], 0.8, epsilon = 1e-6);
}

#[test]
fn test_finite_difference_jacobian() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_abs_diff_eq;

    let function = |x: &Array1<f64>| -> EquilibriaResult<Array1<f64>> { Ok(Array1::from(vec![x[0] * x[1], x[0].powi(3)])) };
    let jacobian: Array2<f64> = finite_difference_jacobian(function, &Array1::from(vec![2.0, 3.0]), 1e-5).expect("jacobian");
    assert_abs_diff_eq!(jacobian[[0, 0]], 3.0, epsilon = 1e-8);
    assert_abs_diff_eq!(jacobian[[0, 1]], 2.0, epsilon = 1e-8);
    assert_abs_diff_eq!(jacobian[[1, 0]], 12.0, epsilon = 1e-6);
    assert_abs_diff_eq!(jacobian[[1, 1]], 0.0, epsilon = 1e-12);
}
