use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use approx::relative_eq;
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use urdf_rs::{read_file, read_from_string, JointType};

use super::Mechanism;
use crate::error::{ChainError, ChainResult};
use crate::joint::{Dof, Joint};

impl Mechanism {
    /// Assemble a mechanism from a URDF file, one joint per link.
    pub fn from_urdf(path: impl AsRef<Path>) -> ChainResult<Mechanism> {
        let robot = read_file(path)?;
        parse_robot(robot)
    }

    pub fn from_urdf_str(xml: &str) -> ChainResult<Mechanism> {
        let robot = read_from_string(xml)?;
        parse_robot(robot)
    }
}

fn parse_robot(robot: urdf_rs::Robot) -> ChainResult<Mechanism> {
    // child link name -> joint driving it, each link driven at most once
    let mut joint_of: HashMap<&str, &urdf_rs::Joint> = HashMap::new();
    for joint in &robot.joints {
        let link = joint.child.link.as_str();
        if joint_of.insert(link, joint).is_some() {
            return Err(ChainError::DuplicateLink {
                link: link.to_owned(),
            });
        }
    }

    let root = robot
        .links
        .iter()
        .find(|link| !joint_of.contains_key(link.name.as_str()))
        .ok_or(ChainError::NoRootLink)?;

    // breadth first from the root link, accumulating zero poses
    let mut mechanism = Mechanism {
        joints: vec![],
        name: robot.name.clone(),
    };
    let root_id = mechanism.add(Joint::rigid(root.name.clone(), Isometry3::identity()).root());
    let mut visited = HashSet::from([root.name.as_str()]);
    let mut queue = VecDeque::from([(root.name.as_str(), root_id)]);
    while let Some((parent_name, parent_id)) = queue.pop_front() {
        for joint in robot.joints.iter().filter(|j| j.parent.link == parent_name) {
            let link = joint.child.link.as_str();
            if !visited.insert(link) {
                return Err(ChainError::DuplicateLink {
                    link: link.to_owned(),
                });
            }
            let reference =
                *mechanism.joint(parent_id).reference() * origin_to_isometry(&joint.origin);
            let child = mechanism.add(link_joint(joint, reference)?);
            mechanism.add_child(parent_id, child)?;
            queue.push_back((link, child));
        }
    }
    if let Some(lost) = robot
        .links
        .iter()
        .find(|link| !visited.contains(link.name.as_str()))
    {
        return Err(ChainError::DisconnectedLink {
            link: lost.name.clone(),
        });
    }
    tracing::debug!(
        robot = %robot.name,
        joints = mechanism.len(),
        "assembled mechanism from urdf"
    );
    Ok(mechanism)
}

fn link_joint(joint: &urdf_rs::Joint, reference: Isometry3<f64>) -> ChainResult<Joint> {
    let name = joint.child.link.clone();
    let (rotation_dof, translation_dof, bounded) = match joint.joint_type {
        JointType::Revolute => (axis_dof(joint)?, Dof::NONE, true),
        JointType::Continuous => (axis_dof(joint)?, Dof::NONE, false),
        JointType::Prismatic => (Dof::NONE, axis_dof(joint)?, true),
        JointType::Fixed => (Dof::NONE, Dof::NONE, false),
        JointType::Floating => (Dof::XYZ, Dof::XYZ, false),
        _ => {
            return Err(ChainError::UnsupportedJointType {
                joint: joint.name.clone(),
            })
        }
    };
    let mut link = Joint::ik(name, rotation_dof, translation_dof, reference);
    let limit = &joint.limit;
    let free_axis = rotation_dof.axes().chain(translation_dof.axes()).next();
    let bounded = bounded && limit.lower < limit.upper;
    if let (true, Some(axis), Some(ik)) = (bounded, free_axis, link.as_ik_mut()) {
        let mut lower = Vector3::repeat(f64::MIN);
        let mut upper = Vector3::repeat(f64::MAX);
        lower[axis] = limit.lower;
        upper[axis] = limit.upper;
        if rotation_dof == Dof::NONE {
            ik.set_translation_bounds(lower, upper);
        } else {
            ik.set_rotation_bounds(lower, upper);
        }
    }
    Ok(link)
}

/// Only positive coordinate axes map onto a DOF mask.
fn axis_dof(joint: &urdf_rs::Joint) -> ChainResult<Dof> {
    let xyz = joint.axis.xyz.0;
    let norm = (xyz[0].powi(2) + xyz[1].powi(2) + xyz[2].powi(2)).sqrt();
    (0..3)
        .find(|i| norm > 0. && relative_eq!(xyz[*i] / norm, 1., epsilon = 1e-9))
        .map(Dof::axis)
        .ok_or_else(|| ChainError::UnsupportedAxis {
            joint: joint.name.clone(),
        })
}

fn origin_to_isometry(origin: &urdf_rs::Pose) -> Isometry3<f64> {
    let rpy = origin.rpy.0;
    let xyz = origin.xyz.0;
    Isometry3::from_parts(
        Translation3::new(xyz[0], xyz[1], xyz[2]),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
    )
}
