//! Error types for assembling and solving kinematic chains.

use thiserror::Error;

/// Errors raised while building a mechanism or running a solver.
///
/// Everything here is a configuration error: the assembly or the calling code
/// is wrong. A solve that merely fails to converge is not an error, see
/// [`KinematicSolver::converged`](crate::KinematicSolver::converged).
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("joint index {0} does not exist in this mechanism")]
    UnknownJoint(usize),

    #[error("joint '{child}' already has parent '{parent}'")]
    AlreadyParented { child: String, parent: String },

    #[error("joint '{0}' cannot be its own parent")]
    SelfParent(String),

    #[error("joint '{joint}' is not reachable from any root")]
    Unreachable { joint: String },

    #[error("no root joint among the registered joints")]
    NoRoot,

    #[error("parameter vector exhausted: needed {needed}, {available} left")]
    ParameterUnderflow { needed: usize, available: usize },

    #[error("parameter vector size mismatch: expected {expected}, got {actual}")]
    ParameterSizeMismatch { expected: usize, actual: usize },

    #[error("cannot propagate pose into root joint '{joint}'")]
    RootPropagation { joint: String },

    #[error("solver used before init()")]
    NotInitialized,

    #[error("closed chain has no driven root with a ground parent")]
    MissingLoopClosure,

    #[error("closed chain has {count} driven roots, expected exactly one")]
    AmbiguousLoopClosure { count: usize },

    #[error("closed chain has no free parameters")]
    EmptyParameterVector,

    #[error("SVD of the residual jacobian failed")]
    SvdFailed,

    #[error(transparent)]
    Urdf(#[from] urdf_rs::UrdfError),

    #[error("joint '{joint}' axis is not a positive coordinate axis")]
    UnsupportedAxis { joint: String },

    #[error("joint '{joint}' has an unsupported type")]
    UnsupportedJointType { joint: String },

    #[error("urdf has no root link")]
    NoRootLink,

    #[error("urdf link '{link}' is the child of more than one joint")]
    DuplicateLink { link: String },

    #[error("urdf link '{link}' is not connected to the root link")]
    DisconnectedLink { link: String },
}

pub type ChainResult<T> = Result<T, ChainError>;
