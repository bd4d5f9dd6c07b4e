use nalgebra::{DVector, Matrix4};

use super::{FkSolver, KinematicSolver, SolverState};
use crate::error::{ChainError, ChainResult};
use crate::joint::JointId;
use crate::mechanism::Mechanism;
use crate::optimize::{numerical_jacobian, smallest_singular_value, LevenbergMarquardt};

/// Tuning of the least-squares solvers.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// A solve converges only when its loss ends below this.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Central-difference epsilon for the jacobian.
    pub finite_difference_step: f64,
    pub initial_damping: f64,
    pub damping_increase: f64,
    pub damping_decrease: f64,
    pub max_damping: f64,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// Closed chains warn when their smallest singular value drops below this.
    pub singularity_threshold: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-4,
            max_iterations: 200,
            finite_difference_step: 1e-4,
            initial_damping: 1e-3,
            damping_increase: 10.,
            damping_decrease: 0.1,
            max_damping: 1e12,
            ftol: 1.49012e-8,
            xtol: 1.49012e-8,
            gtol: 0.,
            singularity_threshold: 1e-3,
        }
    }
}

/// What the least-squares residual measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residual {
    /// Sum of every joint's pose error against its effector target.
    Effector,
    /// Deviation of `ground` from its reference pose after propagation.
    LoopClosure { ground: JointId },
}

impl Residual {
    /// Residual matrix of the current poses. The bottom row is not a constraint.
    fn matrix(self, mechanism: &Mechanism, order: &[JointId]) -> Matrix4<f64> {
        match self {
            Residual::Effector => order.iter().map(|id| mechanism.joint_loss(*id)).sum(),
            Residual::LoopClosure { ground } => {
                let ground = mechanism.joint(ground);
                ground.world().to_homogeneous() - ground.reference().to_homogeneous()
            }
        }
    }
}

/// Top three rows of a residual matrix, row major.
fn flatten(matrix: &Matrix4<f64>) -> DVector<f64> {
    DVector::from_fn(12, |k, _| matrix[(k / 4, k % 4)])
}

impl FkSolver {
    /// Apply `params`, propagate, and measure `residual`.
    pub(crate) fn evaluate(
        &mut self,
        residual: Residual,
        params: &DVector<f64>,
    ) -> ChainResult<DVector<f64>> {
        self.apply_parameters(params)?;
        self.propagate()?;
        Ok(flatten(&residual.matrix(&self.mechanism, &self.order)))
    }
}

/// Drives every effector joint toward its target by optimising the free
/// parameters of all non-root joints at once.
///
/// Each solve warm-starts from the last accepted parameter vector. A solve that
/// does not converge leaves the previous vector applied.
#[derive(Debug, Clone)]
pub struct IkSolver {
    fk: FkSolver,
    config: SolverConfig,
    residual: Residual,
    previous: DVector<f64>,
    loss: f64,
    converged: bool,
}

impl IkSolver {
    pub fn new(mechanism: Mechanism, config: SolverConfig) -> Self {
        Self::with_residual(mechanism, config, Residual::Effector)
    }

    pub fn with_residual(mechanism: Mechanism, config: SolverConfig, residual: Residual) -> Self {
        Self {
            fk: FkSolver::new(mechanism),
            config,
            residual,
            previous: DVector::zeros(0),
            loss: 0.,
            converged: true,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SolverConfig {
        &mut self.config
    }

    pub fn residual(&self) -> Residual {
        self.residual
    }

    pub(crate) fn set_residual(&mut self, residual: Residual) {
        self.residual = residual;
    }

    pub(crate) fn fk_mut(&mut self) -> &mut FkSolver {
        &mut self.fk
    }

    /// Warm start of the next solve: the last accepted parameter vector.
    pub fn previous_parameters(&self) -> &DVector<f64> {
        &self.previous
    }

    pub fn gather_parameters(&self) -> DVector<f64> {
        self.fk.gather_parameters()
    }

    pub fn parameter_count(&self) -> usize {
        self.fk.parameter_count()
    }

    /// Loss of the parameters currently applied.
    pub fn loss(&self) -> f64 {
        self.loss
    }

    /// Snapshot the joints' current parameters as warm start and measure them.
    pub(crate) fn init_parameters(&mut self) -> ChainResult<()> {
        self.previous = self.fk.gather_parameters();
        let residual = self.fk.evaluate(self.residual, &self.previous)?;
        self.loss = residual.norm_squared();
        self.converged = true;
        Ok(())
    }

    /// Smallest singular value of the residual jacobian at `params`.
    ///
    /// The joints are put back on the warm-start parameters afterwards.
    pub fn singularity_at(&mut self, params: &DVector<f64>) -> ChainResult<f64> {
        self.fk.ensure_initialized()?;
        let expected = self.parameter_count();
        if params.len() != expected {
            return Err(ChainError::ParameterSizeMismatch {
                expected,
                actual: params.len(),
            });
        }
        let kind = self.residual;
        let step = self.config.finite_difference_step;
        let fk = &mut self.fk;
        let mut residual = |x: &DVector<f64>| fk.evaluate(kind, x);
        let jacobian = numerical_jacobian(&mut residual, params, step)?;
        self.fk.evaluate(kind, &self.previous)?;
        smallest_singular_value(&jacobian)
    }

    fn warn_out_of_bounds(&self) {
        let mechanism = &self.fk.mechanism;
        for id in &self.fk.order {
            if !mechanism.is_within_bounds(*id) {
                let joint = mechanism.joint(*id).name();
                tracing::warn!(joint, "joint parameter outside bounds");
            }
        }
    }
}

impl KinematicSolver for IkSolver {
    fn add_joints(&mut self, joints: &[JointId]) {
        self.fk.add_joints(joints);
    }

    fn init(&mut self) -> ChainResult<()> {
        self.fk.init()?;
        for id in &self.fk.order {
            self.fk.mechanism.check_target(*id)?;
        }
        self.init_parameters()
    }

    fn solve(&mut self) -> ChainResult<f64> {
        self.fk.ensure_initialized()?;
        let expected = self.parameter_count();
        if self.previous.len() != expected {
            return Err(ChainError::ParameterSizeMismatch {
                expected,
                actual: self.previous.len(),
            });
        }

        let kind = self.residual;
        let tolerance = self.config.tolerance;
        let accepted = if expected == 0 {
            None
        } else {
            let lm = LevenbergMarquardt::new(self.config.clone());
            let fk = &mut self.fk;
            let report = lm.minimize(self.previous.clone(), |x| fk.evaluate(kind, x))?;
            let converged = report.termination.is_success() && report.cost < tolerance;
            tracing::info!(
                termination = ?report.termination,
                iterations = report.iterations,
                loss = report.cost,
                converged,
                "ik solve finished"
            );
            if converged {
                Some(report.parameters)
            } else {
                tracing::error!(
                    loss = report.cost,
                    "ik solve did not converge, falling back to previous parameters"
                );
                None
            }
        };

        let converged = accepted.is_some() || expected == 0;
        if let Some(params) = accepted {
            self.previous = params;
        }
        // write back once, propagate with the applied parameters
        let residual = self.fk.evaluate(kind, &self.previous)?;
        self.loss = residual.norm_squared();
        self.converged = converged && self.loss < tolerance;
        self.warn_out_of_bounds();
        self.fk.mark_solved();
        Ok(self.loss)
    }

    fn converged(&self) -> bool {
        self.converged
    }

    fn state(&self) -> SolverState {
        self.fk.state()
    }

    fn roots(&self) -> &[JointId] {
        self.fk.roots()
    }

    fn order(&self) -> &[JointId] {
        self.fk.order()
    }

    fn mechanism(&self) -> &Mechanism {
        self.fk.mechanism()
    }

    fn mechanism_mut(&mut self) -> &mut Mechanism {
        self.fk.mechanism_mut()
    }
}
