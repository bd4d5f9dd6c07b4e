use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

use crate::error::{ChainError, ChainResult};

/// Free axes of a rotation or a translation, one bit per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dof(u8);

impl Dof {
    pub const NONE: Dof = Dof(0b000);
    pub const X: Dof = Dof(0b001);
    pub const Y: Dof = Dof(0b010);
    pub const Z: Dof = Dof(0b100);
    pub const XY: Dof = Dof(0b011);
    pub const XZ: Dof = Dof(0b101);
    pub const YZ: Dof = Dof(0b110);
    pub const XYZ: Dof = Dof(0b111);

    /// All eight masks, `NONE` first.
    pub const ALL: [Dof; 8] = [
        Dof::NONE,
        Dof::X,
        Dof::Y,
        Dof::Z,
        Dof::XY,
        Dof::XZ,
        Dof::YZ,
        Dof::XYZ,
    ];

    /// Mask with only `axis` (0 = x, 1 = y, 2 = z) free.
    pub fn axis(axis: usize) -> Dof {
        debug_assert!(axis < 3);
        Dof(1 << axis)
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_free(self, axis: usize) -> bool {
        self.0 & (1 << axis) != 0
    }

    /// Free axis indices in ascending order.
    pub fn axes(self) -> impl Iterator<Item = usize> {
        (0..3).filter(move |axis| self.is_free(*axis))
    }
}

/// The driven sub-pose of a joint, packed into as many scalars as it has free axes.
///
/// Packing order is rotation then translation, each by ascending axis.
#[derive(Debug, Clone, PartialEq)]
pub struct JointParameter {
    rotation_dof: Dof,
    translation_dof: Dof,
    // euler angles, composed as Rz * Ry * Rx
    rotation: Vector3<f64>,
    translation: Vector3<f64>,
}

impl JointParameter {
    pub fn new(rotation_dof: Dof, translation_dof: Dof) -> Self {
        Self {
            rotation_dof,
            translation_dof,
            rotation: Vector3::zeros(),
            translation: Vector3::zeros(),
        }
    }

    pub fn rotation_dof(&self) -> Dof {
        self.rotation_dof
    }

    pub fn translation_dof(&self) -> Dof {
        self.translation_dof
    }

    pub fn parameter_count(&self) -> usize {
        self.rotation_dof.count() + self.translation_dof.count()
    }

    pub fn rotation_euler(&self) -> Vector3<f64> {
        self.rotation
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    /// Consume this parameter's scalars from the front of `params`.
    ///
    /// On success `params` is advanced past exactly [`parameter_count`](Self::parameter_count)
    /// values. On underflow nothing is consumed.
    pub fn apply(&mut self, params: &mut &[f64]) -> ChainResult<()> {
        let needed = self.parameter_count();
        if params.len() < needed {
            return Err(ChainError::ParameterUnderflow {
                needed,
                available: params.len(),
            });
        }
        let (head, rest) = params.split_at(needed);
        let mut values = head.iter().copied();
        for axis in self.rotation_dof.axes() {
            self.rotation[axis] = values.next().unwrap_or_default();
        }
        for axis in self.translation_dof.axes() {
            self.translation[axis] = values.next().unwrap_or_default();
        }
        *params = rest;
        Ok(())
    }

    /// Append this parameter's scalars to `out`, in the layout [`apply`](Self::apply) reads.
    pub fn write_into(&self, out: &mut Vec<f64>) {
        out.extend(self.rotation_dof.axes().map(|axis| self.rotation[axis]));
        out.extend(self.translation_dof.axes().map(|axis| self.translation[axis]));
    }

    pub fn read(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.parameter_count());
        self.write_into(&mut out);
        out
    }

    /// `Translation * Rotation` of the current values.
    pub fn pose(&self) -> Isometry3<f64> {
        let rotation =
            UnitQuaternion::from_euler_angles(self.rotation.x, self.rotation.y, self.rotation.z);
        let translation = Translation3::from(self.translation);
        Isometry3::from_parts(translation, rotation)
    }
}
