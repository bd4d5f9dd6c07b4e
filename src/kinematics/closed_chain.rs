use nalgebra::{DVector, UnitQuaternion, Vector3};

use super::{IkSolver, KinematicSolver, Residual, SolverConfig, SolverState};
use crate::error::{ChainError, ChainResult};
use crate::joint::JointId;
use crate::mechanism::Mechanism;

/// Solves a single kinematic loop.
///
/// The loop is closed through one explicit root that also has a parent: that
/// root is the driven joint, its parent the ground. After propagation the
/// ground has to land back on its reference pose.
#[derive(Debug, Clone)]
pub struct ClosedChainSolver {
    ik: IkSolver,
    drive_rate: f64,
    singularity: f64,
    driven: Option<JointId>,
}

impl ClosedChainSolver {
    pub fn new(mechanism: Mechanism, config: SolverConfig) -> Self {
        Self {
            ik: IkSolver::new(mechanism, config),
            drive_rate: 1.,
            singularity: f64::NAN,
            driven: None,
        }
    }

    /// Angular rate, about the driven joint's local Z, applied by [`KinematicSolver::drive`].
    pub fn with_drive_rate(mut self, drive_rate: f64) -> Self {
        self.drive_rate = drive_rate;
        self
    }

    pub fn drive_rate(&self) -> f64 {
        self.drive_rate
    }

    pub fn driven(&self) -> Option<JointId> {
        self.driven
    }

    pub fn ground(&self) -> Option<JointId> {
        match self.ik.residual() {
            Residual::LoopClosure { ground } => Some(ground),
            Residual::Effector => None,
        }
    }

    /// Smallest singular value at the last solve; NaN before the first one.
    pub fn singularity(&self) -> f64 {
        self.singularity
    }

    pub fn loss(&self) -> f64 {
        self.ik.loss()
    }

    pub fn previous_parameters(&self) -> &DVector<f64> {
        self.ik.previous_parameters()
    }

    pub fn parameter_count(&self) -> usize {
        self.ik.parameter_count()
    }

    pub fn calc_singularity(&mut self, params: &DVector<f64>) -> ChainResult<f64> {
        self.ik.singularity_at(params)
    }

    fn find_loop(&self) -> ChainResult<(JointId, JointId)> {
        let mechanism = self.ik.mechanism();
        let closing: Vec<(JointId, JointId)> = self
            .ik
            .roots()
            .iter()
            .filter_map(|root| mechanism.parent(*root).map(|ground| (*root, ground)))
            .collect();
        let (driven, ground) = match closing.as_slice() {
            [] => return Err(ChainError::MissingLoopClosure),
            [single] => *single,
            _ => {
                return Err(ChainError::AmbiguousLoopClosure {
                    count: closing.len(),
                })
            }
        };
        if !self.ik.order().contains(&ground) {
            return Err(ChainError::Unreachable {
                joint: mechanism.joint(ground).name().to_owned(),
            });
        }
        Ok((driven, ground))
    }
}

impl KinematicSolver for ClosedChainSolver {
    fn add_joints(&mut self, joints: &[JointId]) {
        self.ik.add_joints(joints);
        self.driven = None;
    }

    fn init(&mut self) -> ChainResult<()> {
        self.ik.fk_mut().init()?;
        let (driven, ground) = self.find_loop()?;
        self.ik.set_residual(Residual::LoopClosure { ground });
        if self.ik.parameter_count() == 0 {
            return Err(ChainError::EmptyParameterVector);
        }
        self.driven = Some(driven);
        tracing::debug!(
            driven = self.ik.mechanism().joint(driven).name(),
            ground = self.ik.mechanism().joint(ground).name(),
            "closed loop"
        );
        self.ik.init_parameters()
    }

    fn solve(&mut self) -> ChainResult<f64> {
        let loss = self.ik.solve()?;
        let params = self.ik.previous_parameters().clone();
        self.singularity = self.ik.singularity_at(&params)?;
        if self.singularity < self.ik.config().singularity_threshold {
            tracing::warn!(singularity = self.singularity, "mechanism near a singular pose");
        } else {
            tracing::debug!(singularity = self.singularity, "singularity");
        }
        Ok(loss)
    }

    fn converged(&self) -> bool {
        self.ik.converged()
    }

    /// Turn `root` about its own Z by `drive_rate * dt`. Unknown joints are skipped.
    fn drive(&mut self, root: JointId, dt: f64) {
        if self.ik.mechanism().get(root).is_none() {
            tracing::warn!(joint = %root, "drive of unknown joint ignored");
            return;
        }
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.drive_rate * dt);
        self.ik.mechanism_mut().joint_mut(root).rotate_local(&rotation);
    }

    fn state(&self) -> SolverState {
        self.ik.state()
    }

    fn roots(&self) -> &[JointId] {
        self.ik.roots()
    }

    fn order(&self) -> &[JointId] {
        self.ik.order()
    }

    fn mechanism(&self) -> &Mechanism {
        self.ik.mechanism()
    }

    fn mechanism_mut(&mut self) -> &mut Mechanism {
        self.ik.mechanism_mut()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::joint::{Dof, Joint};
    use approx::assert_relative_eq;
    use nalgebra::Isometry3;

    /// Planar loop `a -> b -> c -> d -> a`, `a` the driven root and `d` the ground.
    fn planar_loop(points: [(f64, f64); 4]) -> (Mechanism, [JointId; 4]) {
        let mut mechanism = Mechanism::new();
        let [a, b, c, d] = points.map(|(x, y)| Isometry3::translation(x, y, 0.));
        let a = mechanism.add(Joint::ik("a", Dof::Z, Dof::NONE, a).root());
        let b = mechanism.add(Joint::ik("b", Dof::Z, Dof::NONE, b));
        let c = mechanism.add(Joint::ik("c", Dof::Z, Dof::NONE, c));
        let d = mechanism.add(Joint::ik("d", Dof::Z, Dof::NONE, d));
        mechanism.add_child(a, b).unwrap();
        mechanism.add_child(b, c).unwrap();
        mechanism.add_child(c, d).unwrap();
        mechanism.add_child(d, a).unwrap();
        (mechanism, [a, b, c, d])
    }

    fn four_bar() -> (Mechanism, [JointId; 4]) {
        planar_loop([(0., 0.), (0., 1.), (2., 1.5), (2., 0.)])
    }

    #[test]
    fn test_loop_detection() {
        let (mechanism, [a, b, c, d]) = four_bar();
        let mut solver = ClosedChainSolver::new(mechanism, SolverConfig::default());
        solver.init().unwrap();
        assert_eq!(solver.driven(), Some(a));
        assert_eq!(solver.ground(), Some(d));
        assert_eq!(solver.roots(), &[a]);
        assert_eq!(solver.order(), &[a, b, c, d]);
        assert_eq!(solver.parameter_count(), 3);
        assert_relative_eq!(solver.loss(), 0.);
    }

    #[test]
    fn test_degenerate_loop_converges() {
        let (mechanism, [a, _, _, d]) = planar_loop([(0., 0.); 4]);
        let mut solver = ClosedChainSolver::new(mechanism, SolverConfig::default());
        solver.init().unwrap();
        assert!(solver.solve().unwrap() < 1e-4);
        assert!(solver.converged());

        solver.drive(a, 0.3);
        let loss = solver.solve().unwrap();
        assert!(solver.converged());
        assert!(loss < 1e-4, "loss {loss}");
        let ground = solver.mechanism().joint(d);
        assert_relative_eq!(ground.world(), ground.reference(), epsilon = 1e-2);
        let turned: f64 = solver.previous_parameters().iter().sum();
        assert_relative_eq!(turned, -0.3, epsilon = 1e-2);
    }

    #[test]
    fn test_four_bar_follows_crank() {
        let (mechanism, [a, b, c, d]) = four_bar();
        let mut solver =
            ClosedChainSolver::new(mechanism, SolverConfig::default()).with_drive_rate(2.);
        solver.init().unwrap();
        let coupler = 4.25f64.sqrt();
        for _ in 0..5 {
            solver.drive(a, 0.05);
            let loss = solver.solve().unwrap();
            assert!(solver.converged(), "loss {loss}");
        }

        let mechanism = solver.mechanism();
        let crank = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.5);
        let position = |id| mechanism.joint(id).world().translation.vector;
        assert_relative_eq!(position(b), crank * Vector3::y(), epsilon = 1e-9);
        assert_relative_eq!((position(c) - position(b)).norm(), coupler, epsilon = 1e-9);
        assert_relative_eq!((position(c) - position(d)).norm(), 1.5, epsilon = 1e-2);
        assert_relative_eq!(position(d), Vector3::new(2., 0., 0.), epsilon = 1e-2);
        assert!(solver.singularity() > 1e-3);
    }

    #[test]
    fn test_singularity() {
        let (mechanism, _) = planar_loop([(0., 0.), (1., 0.), (2., 0.), (3., 0.)]);
        let mut solver = ClosedChainSolver::new(mechanism, SolverConfig::default());
        solver.init().unwrap();
        let zero = DVector::zeros(3);
        assert_relative_eq!(solver.calc_singularity(&zero).unwrap(), 0., epsilon = 1e-6);

        let (mechanism, _) = planar_loop([(0., 0.), (1., 0.), (2., 1.), (3., 0.)]);
        let mut solver = ClosedChainSolver::new(mechanism, SolverConfig::default());
        solver.init().unwrap();
        assert!(solver.calc_singularity(&zero).unwrap() > 0.1);

        let long = DVector::zeros(4);
        assert!(matches!(
            solver.calc_singularity(&long),
            Err(ChainError::ParameterSizeMismatch { expected: 3, actual: 4 })
        ));
    }

    #[test]
    fn test_singularity_restores_pose() {
        let (mechanism, [_, b, c, d]) = four_bar();
        let mut solver = ClosedChainSolver::new(mechanism, SolverConfig::default());
        solver.init().unwrap();
        let before: Vec<_> = [b, c, d].map(|id| *solver.mechanism().joint(id).world()).to_vec();
        solver
            .calc_singularity(&DVector::from_vec(vec![0.3, -0.2, 0.1]))
            .unwrap();
        let after: Vec<_> = [b, c, d].map(|id| *solver.mechanism().joint(id).world()).to_vec();
        assert_eq!(before, after);
    }

    #[test]
    fn test_open_chain_rejected() {
        let mut mechanism = Mechanism::new();
        let a = mechanism.add(Joint::rigid("a", Isometry3::identity()));
        let b = mechanism.add(Joint::ik("b", Dof::Z, Dof::NONE, Isometry3::identity()));
        mechanism.add_child(a, b).unwrap();
        let mut solver = ClosedChainSolver::new(mechanism, SolverConfig::default());
        assert!(matches!(solver.init(), Err(ChainError::MissingLoopClosure)));
    }

    #[test]
    fn test_two_closures_rejected() {
        let (mut mechanism, _) = four_bar();
        let e = mechanism.add(Joint::ik("e", Dof::Z, Dof::NONE, Isometry3::identity()).root());
        let f = mechanism.add(Joint::ik("f", Dof::Z, Dof::NONE, Isometry3::identity()));
        mechanism.add_child(e, f).unwrap();
        mechanism.add_child(f, e).unwrap();
        let mut solver = ClosedChainSolver::new(mechanism, SolverConfig::default());
        assert!(matches!(
            solver.init(),
            Err(ChainError::AmbiguousLoopClosure { count: 2 })
        ));
    }

    #[test]
    fn test_rigid_loop_has_no_parameters() {
        let mut mechanism = Mechanism::new();
        let a = mechanism.add(Joint::rigid("a", Isometry3::identity()).root());
        let b = mechanism.add(Joint::rigid("b", Isometry3::translation(1., 0., 0.)));
        mechanism.add_child(a, b).unwrap();
        mechanism.add_child(b, a).unwrap();
        let mut solver = ClosedChainSolver::new(mechanism, SolverConfig::default());
        assert!(matches!(solver.init(), Err(ChainError::EmptyParameterVector)));
    }

    #[test]
    fn test_drive_unknown_joint_is_ignored() {
        let (mechanism, [a, ..]) = four_bar();
        let mut solver = ClosedChainSolver::new(mechanism, SolverConfig::default());
        solver.init().unwrap();
        let before = *solver.mechanism().joint(a).world();
        solver.drive(JointId(50), 0.1);
        assert_eq!(solver.mechanism().joint(a).world(), &before);
        solver.drive(a, 0.1);
        let turned = solver.mechanism().joint(a).world().rotation.angle();
        assert_relative_eq!(turned, 0.1, epsilon = 1e-12);
    }
}
