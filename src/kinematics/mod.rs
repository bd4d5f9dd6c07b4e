mod closed_chain;
mod inverse;

pub use closed_chain::ClosedChainSolver;
pub use inverse::{IkSolver, Residual, SolverConfig};

use std::collections::{BTreeSet, HashSet};

use nalgebra::DVector;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Bfs, VisitMap};

use crate::error::{ChainError, ChainResult};
use crate::joint::JointId;
use crate::mechanism::Mechanism;

/// Lifecycle of a solver: joints registered, traversal sorted, locals derived, solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SolverState {
    Unsorted,
    Sorted,
    Initialized,
    Solved,
}

/// Common surface of the forward, inverse and closed-chain solvers.
pub trait KinematicSolver {
    /// Register the joints to solve. Resets the solver to [`SolverState::Unsorted`].
    fn add_joints(&mut self, joints: &[JointId]);

    fn init(&mut self) -> ChainResult<()>;

    /// Run one solve and return the loss of the parameters left applied.
    fn solve(&mut self) -> ChainResult<f64>;

    /// Whether the last solve met its tolerance.
    fn converged(&self) -> bool {
        true
    }

    /// Advance a root joint by one tick of `dt`.
    fn drive(&mut self, _root: JointId, _dt: f64) {}

    fn state(&self) -> SolverState;

    fn roots(&self) -> &[JointId];

    /// Traversal order fixed by `init`.
    fn order(&self) -> &[JointId];

    fn mechanism(&self) -> &Mechanism;

    fn mechanism_mut(&mut self) -> &mut Mechanism;
}

/// Propagates world poses from the roots down, without optimising anything.
#[derive(Debug, Clone)]
pub struct FkSolver {
    mechanism: Mechanism,
    registered: Vec<JointId>,
    order: Vec<JointId>,
    roots: Vec<JointId>,
    state: SolverState,
}

impl FkSolver {
    pub fn new(mechanism: Mechanism) -> Self {
        Self {
            mechanism,
            registered: vec![],
            order: vec![],
            roots: vec![],
            state: SolverState::Unsorted,
        }
    }

    /// Breadth-first order over the registered joints, seeded with every root.
    ///
    /// With nothing registered every joint of the mechanism takes part.
    fn sort_joints(&mut self) -> ChainResult<()> {
        let registered: BTreeSet<usize> = if self.registered.is_empty() {
            self.mechanism.ids().map(JointId::index).collect()
        } else {
            for id in &self.registered {
                self.mechanism.check(*id)?;
            }
            self.registered.iter().map(|id| id.index()).collect()
        };

        let mut graph = DiGraphMap::<usize, ()>::new();
        for index in &registered {
            graph.add_node(*index);
        }
        for index in &registered {
            for child in self.mechanism.children(JointId(*index)) {
                if registered.contains(&child.index()) {
                    graph.add_edge(*index, child.index(), ());
                }
            }
        }

        let roots: Vec<usize> = registered
            .iter()
            .copied()
            .filter(|index| self.mechanism.is_root(JointId(*index)))
            .collect();
        let Some(&first) = roots.first() else {
            return Err(ChainError::NoRoot);
        };
        let mut bfs = Bfs::new(&graph, first);
        for root in &roots[1..] {
            bfs.discovered.visit(*root);
            bfs.stack.push_back(*root);
        }
        let order: Vec<usize> = BfsIter { graph: &graph, bfs }.collect();

        if order.len() < registered.len() {
            let reached: HashSet<usize> = order.iter().copied().collect();
            let lost = registered
                .iter()
                .find(|index| !reached.contains(index))
                .copied()
                .unwrap_or_default();
            return Err(ChainError::Unreachable {
                joint: self.mechanism.joint(JointId(lost)).name().to_owned(),
            });
        }

        self.roots = roots.into_iter().map(JointId).collect();
        self.order = order.into_iter().map(JointId).collect();
        self.state = SolverState::Sorted;
        tracing::debug!(order = ?self.order, roots = ?self.roots, "sorted joints");
        Ok(())
    }

    pub(crate) fn ensure_initialized(&self) -> ChainResult<()> {
        if self.state < SolverState::Initialized {
            return Err(ChainError::NotInitialized);
        }
        Ok(())
    }

    pub(crate) fn mark_solved(&mut self) {
        self.state = SolverState::Solved;
    }

    /// Recompute the world pose of every non-root joint, in traversal order.
    pub fn propagate(&mut self) -> ChainResult<()> {
        for id in &self.order {
            if !self.mechanism.is_root(*id) {
                self.mechanism.compute_global(*id)?;
            }
        }
        Ok(())
    }

    /// Length of the aggregate parameter vector.
    pub fn parameter_count(&self) -> usize {
        self.order
            .iter()
            .map(|id| self.mechanism.parameter_count(*id))
            .sum()
    }

    /// Concatenate every joint's free scalars in traversal order.
    pub fn gather_parameters(&self) -> DVector<f64> {
        let mut params = Vec::with_capacity(self.parameter_count());
        for id in &self.order {
            self.mechanism.read_parameter(*id, &mut params);
        }
        DVector::from_vec(params)
    }

    /// Hand `params` out to every joint in traversal order; all of it must be consumed.
    pub fn apply_parameters(&mut self, params: &DVector<f64>) -> ChainResult<()> {
        let mut cursor = params.as_slice();
        for id in &self.order {
            self.mechanism.apply_parameter(*id, &mut cursor)?;
        }
        if !cursor.is_empty() {
            return Err(ChainError::ParameterSizeMismatch {
                expected: params.len() - cursor.len(),
                actual: params.len(),
            });
        }
        Ok(())
    }
}

impl KinematicSolver for FkSolver {
    fn add_joints(&mut self, joints: &[JointId]) {
        for id in joints {
            if !self.registered.contains(id) {
                self.registered.push(*id);
            }
        }
        self.state = SolverState::Unsorted;
    }

    fn init(&mut self) -> ChainResult<()> {
        self.sort_joints()?;
        for id in &self.order {
            self.mechanism.compute_local_from_reference(*id);
        }
        self.state = SolverState::Initialized;
        Ok(())
    }

    fn solve(&mut self) -> ChainResult<f64> {
        self.ensure_initialized()?;
        self.propagate()?;
        self.state = SolverState::Solved;
        Ok(0.)
    }

    fn state(&self) -> SolverState {
        self.state
    }

    fn roots(&self) -> &[JointId] {
        &self.roots
    }

    fn order(&self) -> &[JointId] {
        &self.order
    }

    fn mechanism(&self) -> &Mechanism {
        &self.mechanism
    }

    fn mechanism_mut(&mut self) -> &mut Mechanism {
        &mut self.mechanism
    }
}

struct BfsIter<'a> {
    graph: &'a DiGraphMap<usize, ()>,
    bfs: Bfs<usize, HashSet<usize>>,
}

impl<'a> Iterator for BfsIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        self.bfs.next(self.graph)
    }
}
