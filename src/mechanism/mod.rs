mod urdf;

use nalgebra::Matrix4;

use crate::error::{ChainError, ChainResult};
use crate::joint::{Joint, JointId};

/// Arena owning every joint of an assembly.
///
/// Joints are addressed by [`JointId`]; parent and child links are indices, fixed
/// once by [`add_child`](Mechanism::add_child).
#[derive(Debug, Clone, Default)]
pub struct Mechanism {
    joints: Vec<Joint>,
    pub name: String,
}

impl Mechanism {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, joint: Joint) -> JointId {
        self.joints.push(joint);
        JointId(self.joints.len() - 1)
    }

    /// Link `child` under `parent`. A joint's parent can never be replaced.
    pub fn add_child(&mut self, parent: JointId, child: JointId) -> ChainResult<()> {
        self.check(parent)?;
        self.check(child)?;
        if parent == child {
            return Err(ChainError::SelfParent(self.joints[child.0].name().to_owned()));
        }
        if let Some(existing) = self.joints[child.0].parent {
            return Err(ChainError::AlreadyParented {
                child: self.joints[child.0].name().to_owned(),
                parent: self.joints[existing.0].name().to_owned(),
            });
        }
        self.joints[child.0].parent = Some(parent);
        self.joints[parent.0].children.push(child);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = JointId> {
        (0..self.joints.len()).map(JointId)
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn joint(&self, id: JointId) -> &Joint {
        &self.joints[id.0]
    }

    pub fn joint_mut(&mut self, id: JointId) -> &mut Joint {
        &mut self.joints[id.0]
    }

    pub fn get(&self, id: JointId) -> Option<&Joint> {
        self.joints.get(id.0)
    }

    pub fn find(&self, name: &str) -> Option<JointId> {
        self.joints
            .iter()
            .position(|joint| joint.name() == name)
            .map(JointId)
    }

    pub fn check(&self, id: JointId) -> ChainResult<()> {
        if id.0 < self.joints.len() {
            Ok(())
        } else {
            Err(ChainError::UnknownJoint(id.0))
        }
    }

    pub fn is_root(&self, id: JointId) -> bool {
        self.joints[id.0].is_root()
    }

    pub fn parent(&self, id: JointId) -> Option<JointId> {
        self.joints[id.0].parent
    }

    pub fn children(&self, id: JointId) -> &[JointId] {
        &self.joints[id.0].children
    }

    /// Joints without children.
    pub fn leaves(&self) -> Vec<JointId> {
        self.ids()
            .filter(|id| self.children(*id).is_empty())
            .collect()
    }

    /// `local = parent.reference⁻¹ * reference`; identity for roots.
    pub fn compute_local_from_reference(&mut self, id: JointId) {
        let joint = &self.joints[id.0];
        let local = match joint.parent {
            Some(parent) if !joint.is_root() => {
                self.joints[parent.0].reference().inverse() * joint.reference()
            }
            _ => nalgebra::Isometry3::identity(),
        };
        self.joints[id.0].local = local;
    }

    /// `world = parent.world * local * drive`.
    pub fn compute_global(&mut self, id: JointId) -> ChainResult<()> {
        let joint = &self.joints[id.0];
        let parent = match joint.parent {
            Some(parent) if !joint.is_root() => parent,
            _ => {
                return Err(ChainError::RootPropagation {
                    joint: joint.name().to_owned(),
                })
            }
        };
        let world = self.joints[parent.0].world * joint.local * joint.drive;
        self.joints[id.0].world = world;
        Ok(())
    }

    /// Pose error of one joint against its effector target; zero for rigid joints.
    pub fn joint_loss(&self, id: JointId) -> Matrix4<f64> {
        let joint = &self.joints[id.0];
        match joint.as_ik() {
            Some(ik) => {
                let followed = ik
                    .target()
                    .follow
                    .and_then(|other| self.get(other))
                    .map(Joint::world);
                ik.loss(joint.world(), followed)
            }
            None => Matrix4::zeros(),
        }
    }

    /// A followed target has to name a joint of this mechanism.
    pub fn check_target(&self, id: JointId) -> ChainResult<()> {
        match self.joints[id.0].as_ik().and_then(|ik| ik.target().follow) {
            Some(followed) => self.check(followed),
            None => Ok(()),
        }
    }

    pub fn parameter_count(&self, id: JointId) -> usize {
        self.joints[id.0].parameter_count()
    }

    pub fn apply_parameter(&mut self, id: JointId, params: &mut &[f64]) -> ChainResult<()> {
        self.joints[id.0].apply_parameter(params)
    }

    pub fn read_parameter(&self, id: JointId, out: &mut Vec<f64>) {
        self.joints[id.0].read_parameter(out)
    }

    /// Rigid joints have nothing to violate.
    pub fn is_within_bounds(&self, id: JointId) -> bool {
        self.joints[id.0]
            .as_ik()
            .map_or(true, |ik| ik.is_within_bounds())
    }
}
