use crate::equilibrium::Equilibrium;
use crate::error::EquilibriaResult;
use ndarray::Array2;

/// Convergence test of the Picard iteration
pub trait ConvergenceCriterion {
    /// Metric comparing the total flux before and after one iteration; smaller is better
    fn metric(&mut self, psi_old: &Array2<f64>, psi_new: &Array2<f64>, equilibrium: &Equilibrium) -> EquilibriaResult<f64>;

    fn tolerance(&self) -> f64;

    fn is_converged(&self, metric: f64) -> bool {
        return metric < self.tolerance();
    }
}

/// Largest flux change relative to the flux range, max|Δψ| / (max ψ - min ψ)
#[derive(Clone, Debug, PartialEq)]
pub struct DudsonConvergence {
    tolerance: f64,
}

impl DudsonConvergence {
    pub fn new(tolerance: f64) -> Self {
        return DudsonConvergence { tolerance };
    }
}

impl Default for DudsonConvergence {
    fn default() -> Self {
        return DudsonConvergence::new(1e-2);
    }
}

impl ConvergenceCriterion for DudsonConvergence {
    fn metric(&mut self, psi_old: &Array2<f64>, psi_new: &Array2<f64>, _equilibrium: &Equilibrium) -> EquilibriaResult<f64> {
        let max_change: f64 = ndarray::Zip::from(psi_old)
            .and(psi_new)
            .fold(0.0_f64, |acc, &old, &new| acc.max((new - old).abs()));
        let psi_max: f64 = psi_new.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let psi_min: f64 = psi_new.iter().cloned().fold(f64::INFINITY, f64::min);
        let range: f64 = psi_max - psi_min;
        if range == 0.0 {
            return Ok(if max_change == 0.0 { 0.0 } else { f64::INFINITY });
        }
        return Ok(max_change / range);
    }

    fn tolerance(&self) -> f64 {
        return self.tolerance;
    }
}

/// Relative change of the internal inductance between iterations
///
/// The first call has nothing to compare with and returns infinity.
#[derive(Clone, Debug, PartialEq)]
pub struct LiConvergence {
    tolerance: f64,
    li_previous: Option<f64>,
}

impl LiConvergence {
    pub fn new(tolerance: f64) -> Self {
        return LiConvergence { tolerance, li_previous: None };
    }
}

impl Default for LiConvergence {
    fn default() -> Self {
        return LiConvergence::new(1e-3);
    }
}

impl ConvergenceCriterion for LiConvergence {
    fn metric(&mut self, _psi_old: &Array2<f64>, _psi_new: &Array2<f64>, equilibrium: &Equilibrium) -> EquilibriaResult<f64> {
        let li: f64 = equilibrium.calc_li()?;
        let metric: f64 = match self.li_previous {
            Some(li_previous) => ((li - li_previous) / li).abs(),
            None => f64::INFINITY,
        };
        self.li_previous = Some(li);
        return Ok(metric);
    }

    fn tolerance(&self) -> f64 {
        return self.tolerance;
    }
}
