//! # kinechain models and solves jointed rigid-body chains.
//! forward kinematics, inverse kinematics and closed loops, on one joint arena

#![deny(unsafe_code)]

mod controller;
mod error;
mod joint;
mod kinematics;
mod mechanism;
mod optimize;

pub use controller::{Controller, DriveHook, JointBinding, PoseSink, SimulatedMotion};
pub use error::{ChainError, ChainResult};
pub use joint::{
    Bounds, Dof, EffectorTarget, IkJoint, Joint, JointId, JointKind, JointParameter,
    SpatialKind,
};
pub use kinematics::{
    ClosedChainSolver, FkSolver, IkSolver, KinematicSolver, Residual, SolverConfig, SolverState,
};
pub use mechanism::Mechanism;
pub use optimize::{
    numerical_jacobian, smallest_singular_value, LevenbergMarquardt, LmReport, Termination,
};
