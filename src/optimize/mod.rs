//! Damped Gauss-Newton (Levenberg-Marquardt) minimisation of a fallible residual.

mod jacobian;

pub use jacobian::{numerical_jacobian, smallest_singular_value};

use nalgebra::{DMatrix, DVector};

use crate::error::ChainResult;
use crate::kinematics::SolverConfig;

/// Below this sum of squares the residual is treated as exactly zero.
const VANISHING_COST: f64 = 1e-30;

/// Why the minimisation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    ResidualVanished,
    /// Accepted step shorter than `xtol` relative to the parameters.
    SmallStep,
    /// Relative cost reduction below `ftol`.
    SmallReduction,
    /// Gradient infinity norm at most `gtol`.
    SmallGradient,
    MaxIterations,
    /// No damping up to `max_damping` produced a descent step.
    DampingOverflow,
}

impl Termination {
    pub fn is_success(self) -> bool {
        !matches!(self, Termination::MaxIterations | Termination::DampingOverflow)
    }
}

#[derive(Debug, Clone)]
pub struct LmReport {
    pub parameters: DVector<f64>,
    pub residual: DVector<f64>,
    /// Sum of squared residual entries at `parameters`.
    pub cost: f64,
    pub iterations: usize,
    pub termination: Termination,
}

#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    config: SolverConfig,
}

impl LevenbergMarquardt {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Minimise `|residual(x)|²` starting from `x0`.
    ///
    /// The jacobian is re-estimated by central differences at every accepted
    /// point. Errors from `residual` abort the minimisation.
    pub fn minimize<F>(&self, x0: DVector<f64>, mut residual: F) -> ChainResult<LmReport>
    where
        F: FnMut(&DVector<f64>) -> ChainResult<DVector<f64>>,
    {
        let config = &self.config;
        let n = x0.len();
        let mut x = x0;
        let mut r = residual(&x)?;
        let mut cost = r.norm_squared();
        let mut lambda = config.initial_damping;

        let report = |x, r, cost, iterations, termination| LmReport {
            parameters: x,
            residual: r,
            cost,
            iterations,
            termination,
        };

        for iteration in 0..config.max_iterations {
            if cost <= VANISHING_COST {
                return Ok(report(x, r, cost, iteration, Termination::ResidualVanished));
            }
            let jacobian = numerical_jacobian(&mut residual, &x, config.finite_difference_step)?;
            let gradient = jacobian.transpose() * &r;
            if gradient.amax() <= config.gtol {
                return Ok(report(x, r, cost, iteration, Termination::SmallGradient));
            }
            let normal = jacobian.transpose() * &jacobian;

            loop {
                let damped = &normal + DMatrix::<f64>::identity(n, n) * lambda;
                let step = match damped.cholesky() {
                    Some(cholesky) => -cholesky.solve(&gradient),
                    None => DVector::zeros(n),
                };
                let small_step = step.norm() <= config.xtol * (x.norm() + config.xtol);
                let candidate = &x + &step;
                let candidate_r = residual(&candidate)?;
                let candidate_cost = candidate_r.norm_squared();

                if candidate_cost < cost {
                    let reduction = cost - candidate_cost;
                    let previous_cost = cost;
                    x = candidate;
                    r = candidate_r;
                    cost = candidate_cost;
                    lambda *= config.damping_decrease;
                    if small_step {
                        return Ok(report(x, r, cost, iteration + 1, Termination::SmallStep));
                    }
                    if reduction <= config.ftol * previous_cost {
                        return Ok(report(x, r, cost, iteration + 1, Termination::SmallReduction));
                    }
                    break;
                }

                // rejected
                if small_step {
                    return Ok(report(x, r, cost, iteration + 1, Termination::SmallStep));
                }
                lambda *= config.damping_increase;
                if lambda > config.max_damping {
                    return Ok(report(x, r, cost, iteration + 1, Termination::DampingOverflow));
                }
            }
        }
        let iterations = config.max_iterations;
        Ok(report(x, r, cost, iterations, Termination::MaxIterations))
    }
}
