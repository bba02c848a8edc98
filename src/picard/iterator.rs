use super::convergence::ConvergenceCriterion;
use crate::equilibrium::{Equilibrium, Snapshot};
use crate::error::{EquilibriaError, EquilibriaResult};
use crate::optimisation::{CoilsetOptimisationProblem, CoilsetOptimiserResult, MagneticConstraintSet};
use log::{info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Settings of the Picard iteration, loadable from JSON
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PicardSettings {
    /// Weight of the previous plasma flux in the blended flux, in [0, 1); 0 disables relaxation
    pub relaxation: f64,
    pub max_iterations: usize,
    /// Coil positions and sizes do not change during the iteration
    pub fixed_coils: bool,
    /// Wall-clock limit, seconds
    pub max_wall_time: Option<f64>,
}

impl Default for PicardSettings {
    fn default() -> Self {
        return PicardSettings {
            relaxation: 0.0,
            max_iterations: 30,
            fixed_coils: true,
            max_wall_time: None,
        };
    }
}

/// Outcome of a Picard iteration
///
/// Not converging is not an error: `converged` is false and `best` holds the state with the smallest metric.
#[derive(Clone, Debug)]
pub struct PicardResult {
    pub converged: bool,
    pub iterations: usize,
    pub metric_history: Vec<f64>,
    /// The converged state, or the best state seen
    pub best: Snapshot,
}

type TargetUpdate = Box<dyn FnMut(&Equilibrium, &mut MagneticConstraintSet) -> EquilibriaResult<()>>;

/// Outer loop alternating coil optimisation and Grad-Shafranov solves
///
/// Each iteration:
/// 1. re-derives the targets from the present equilibrium, if a target update is set
/// 2. optimises the coil currents (and positions, for position problems)
/// 3. solves the plasma; with an li target the current shape is adjusted too
/// 4. blends the new plasma flux with the previous one
/// 5. evaluates the convergence metric
pub struct PicardIterator<P: CoilsetOptimisationProblem, C: ConvergenceCriterion> {
    problem: P,
    convergence: C,
    settings: PicardSettings,
    target_update: Option<TargetUpdate>,
}

impl<P: CoilsetOptimisationProblem, C: ConvergenceCriterion> PicardIterator<P, C> {
    /// # Errors
    /// `EquilibriaError::InvalidSettings` if the relaxation is outside [0, 1) or the iteration cap is zero
    pub fn new(problem: P, convergence: C, settings: PicardSettings) -> EquilibriaResult<Self> {
        if !(0.0..1.0).contains(&settings.relaxation) {
            return Err(EquilibriaError::InvalidSettings(format!("relaxation {} is outside [0, 1)", settings.relaxation)));
        }
        if settings.max_iterations == 0 {
            return Err(EquilibriaError::InvalidSettings("max_iterations must be at least 1".to_string()));
        }
        return Ok(PicardIterator {
            problem,
            convergence,
            settings,
            target_update: None,
        });
    }

    /// Re-derive the optimisation targets from the equilibrium at the start of every iteration
    pub fn with_target_update<F>(mut self, target_update: F) -> Self
    where
        F: FnMut(&Equilibrium, &mut MagneticConstraintSet) -> EquilibriaResult<()> + 'static,
    {
        self.target_update = Some(Box::new(target_update));
        return self;
    }

    pub fn problem(&self) -> &P {
        return &self.problem;
    }

    pub fn settings(&self) -> &PicardSettings {
        return &self.settings;
    }

    /// Iterate until the metric drops below the criterion's tolerance or the iteration or time cap is hit
    ///
    /// # Errors
    /// Equilibrium errors of a solve (for example `EquilibriaError::NoOPoint`) and optimiser errors end the
    /// iteration immediately; the caller decides whether to fall back to an earlier state.
    pub fn run(&mut self, equilibrium: &mut Equilibrium) -> EquilibriaResult<PicardResult> {
        let timing_start: Instant = Instant::now();
        let relaxation: f64 = self.settings.relaxation;
        let use_li: bool = equilibrium.settings().li_target.is_some();

        let mut metric_history: Vec<f64> = Vec::with_capacity(self.settings.max_iterations);
        let mut best: Option<(f64, Snapshot)> = None;
        let mut converged: bool = false;
        let mut n_iterations: usize = 0;

        'iteration_loop: for i_iter in 0..self.settings.max_iterations {
            n_iterations = i_iter + 1;
            let psi_old: Array2<f64> = equilibrium.psi();
            let psi_plasma_old: Array2<f64> = equilibrium.psi_plasma().clone();

            if let Some(target_update) = self.target_update.as_mut() {
                target_update(&*equilibrium, self.problem.targets_mut())?;
            }

            let coil_result: CoilsetOptimiserResult = self.problem.optimise(&mut *equilibrium, self.settings.fixed_coils)?;
            if !coil_result.converged {
                warn!("PicardIterator::run: coil optimisation did not converge at iteration {} (f = {:.3e})", i_iter, coil_result.f_x);
            }

            if use_li {
                equilibrium.solve_li(None)?;
            } else {
                equilibrium.solve(None, None)?;
            }

            // The seed flux is arbitrary, so the first solve is taken as it is
            if relaxation > 0.0 && i_iter > 0 {
                let psi_plasma_relaxed: Array2<f64> = (1.0 - relaxation) * equilibrium.psi_plasma() + relaxation * &psi_plasma_old;
                equilibrium.set_plasma_psi(psi_plasma_relaxed)?;
            }

            let psi_new: Array2<f64> = equilibrium.psi();
            let metric: f64 = self.convergence.metric(&psi_old, &psi_new, &*equilibrium)?;
            metric_history.push(metric);
            info!("Picard iteration {}: metric = {:.3e}, Ip = {:.4e} A", i_iter, metric, equilibrium.i_p());

            if self.convergence.is_converged(metric) {
                converged = true;
                best = Some((metric, equilibrium.snapshot(equilibrium.label())));
                break 'iteration_loop;
            }
            let is_best: bool = match &best {
                Some((best_metric, _)) => metric < *best_metric,
                None => true,
            };
            if is_best {
                best = Some((metric, equilibrium.snapshot(equilibrium.label())));
            }

            if let Some(max_wall_time) = self.settings.max_wall_time {
                if timing_start.elapsed().as_secs_f64() > max_wall_time {
                    warn!("PicardIterator::run: wall-clock limit of {:.1} s reached after {} iterations", max_wall_time, n_iterations);
                    break 'iteration_loop;
                }
            }
        }

        let duration: Duration = timing_start.elapsed();
        if converged {
            info!("PicardIterator::run: converged in {} iterations, {:?}", n_iterations, duration);
        } else {
            warn!("PicardIterator::run: not converged after {} iterations, {:?}", n_iterations, duration);
        }

        let best: Snapshot = match best {
            Some((_, snapshot)) => snapshot,
            None => equilibrium.snapshot(equilibrium.label()),
        };
        return Ok(PicardResult {
            converged,
            iterations: n_iterations,
            metric_history,
            best,
        });
    }
}

#[test]
fn test_picard_settings_are_validated() {
    use super::convergence::DudsonConvergence;
    use crate::optimisation::UnconstrainedCurrentCOP;

    let problem: UnconstrainedCurrentCOP = UnconstrainedCurrentCOP::new(MagneticConstraintSet::new(Vec::new()), 1e-7);
    let settings: PicardSettings = PicardSettings {
        relaxation: 1.0,
        ..PicardSettings::default()
    };
    let result = PicardIterator::new(problem, DudsonConvergence::default(), settings);
    assert!(matches!(result, Err(EquilibriaError::InvalidSettings(_))));

    let settings: PicardSettings = serde_json::from_str(r#"{"relaxation": 0.2, "max_wall_time": 60.0}"#).expect("settings");
    assert_eq!(settings.relaxation, 0.2);
    assert_eq!(settings.max_iterations, 30);
    assert_eq!(settings.max_wall_time, Some(60.0));
}
