//! Tick-driven orchestration of a solver and the collaborators that display its joints.

use std::collections::BTreeMap;

use nalgebra::{Isometry3, Point3};

use crate::error::ChainResult;
use crate::joint::{Joint, JointId};
use crate::kinematics::{KinematicSolver, SolverState};

/// Receives a joint's world pose after every successful tick.
pub trait PoseSink {
    fn apply_pose(&mut self, pose: &Isometry3<f64>);
}

impl<F: FnMut(&Isometry3<f64>)> PoseSink for F {
    fn apply_pose(&mut self, pose: &Isometry3<f64>) {
        self(pose)
    }
}

pub struct JointBinding {
    pub joint: JointId,
    pub sink: Box<dyn PoseSink>,
}

/// Per-tick actuation of a root joint, given the scaled time step.
pub type DriveHook = Box<dyn FnMut(&mut Joint, f64)>;

/// Poses recorded by [`Controller::simulate_trajectory`], one entry per frame.
#[derive(Debug, Clone, Default)]
pub struct SimulatedMotion {
    pub trajectory: Vec<Point3<f64>>,
    pub joint_poses: BTreeMap<JointId, Vec<Isometry3<f64>>>,
}

pub struct Controller<S> {
    solver: S,
    bindings: Vec<JointBinding>,
    drive_hook: Option<DriveHook>,
    paused: bool,
    speed: f64,
}

impl<S: KinematicSolver> Controller<S> {
    /// Starts paused at unit speed.
    pub fn new(solver: S) -> Self {
        Self {
            solver,
            bindings: vec![],
            drive_hook: None,
            paused: true,
            speed: 1.,
        }
    }

    /// Register `joint` with the solver and forward its solved world pose to `sink`.
    pub fn bind(&mut self, joint: JointId, sink: impl PoseSink + 'static) {
        self.solver.add_joints(&[joint]);
        self.bindings.push(JointBinding {
            joint,
            sink: Box::new(sink),
        });
    }

    /// Replace the solver's own drive with `hook`.
    pub fn set_drive_hook(&mut self, hook: impl FnMut(&mut Joint, f64) + 'static) {
        self.drive_hook = Some(Box::new(hook));
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn run(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn init(&mut self) -> ChainResult<()> {
        self.solver.init()
    }

    /// Drive every root, solve, and publish the poses.
    ///
    /// A solve that misses its tolerance is logged and the sinks keep their last pose.
    pub fn tick(&mut self, dt: f64) -> ChainResult<()> {
        if self.paused {
            return Ok(());
        }
        let dt = dt * self.speed;
        let roots = self.solver.roots().to_vec();
        for root in roots {
            match self.drive_hook.as_mut() {
                Some(hook) => hook(self.solver.mechanism_mut().joint_mut(root), dt),
                None => self.solver.drive(root, dt),
            }
        }
        tracing::debug!(dt, "tick");

        let loss = self.solver.solve()?;
        if !self.solver.converged() {
            tracing::error!(loss, "solve failed, keeping last published poses");
            return Ok(());
        }
        let mechanism = self.solver.mechanism();
        for binding in &mut self.bindings {
            binding.sink.apply_pose(mechanism.joint(binding.joint).world());
        }
        Ok(())
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut S {
        &mut self.solver
    }

    pub fn bindings(&self) -> &[JointBinding] {
        &self.bindings
    }
}

impl<S: KinematicSolver + Clone> Controller<S> {
    /// Run `frames` ticks on a copy of the solver, driving every root with `drive`.
    ///
    /// The live mechanism and the sinks are left untouched.
    pub fn simulate_trajectory(
        &self,
        effector: JointId,
        frames: usize,
        mut drive: impl FnMut(&mut Joint),
    ) -> ChainResult<SimulatedMotion> {
        let mut solver = self.solver.clone();
        solver.mechanism().check(effector)?;
        if solver.state() < SolverState::Initialized {
            solver.init()?;
        }
        let order = solver.order().to_vec();
        let roots = solver.roots().to_vec();

        let mut motion = SimulatedMotion {
            trajectory: Vec::with_capacity(frames),
            joint_poses: order
                .iter()
                .map(|id| (*id, Vec::with_capacity(frames)))
                .collect(),
        };
        for _ in 0..frames {
            for root in &roots {
                drive(solver.mechanism_mut().joint_mut(*root));
            }
            solver.solve()?;
            let mechanism = solver.mechanism();
            motion
                .trajectory
                .push(Point3::from(mechanism.joint(effector).world().translation.vector));
            for (id, poses) in motion.joint_poses.iter_mut() {
                poses.push(*mechanism.joint(*id).world());
            }
        }
        tracing::debug!(frames, "simulated trajectory");
        Ok(motion)
    }
}
