mod parameter;

pub use parameter::{Dof, JointParameter};

use nalgebra::{Isometry3, Matrix4, Translation3, UnitQuaternion, Vector3};

use crate::error::ChainResult;

/// Stable index of a joint inside its [`Mechanism`](crate::Mechanism).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JointId(pub(crate) usize);

impl JointId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for JointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A rigid-body pose node of a kinematic tree.
///
/// `world = parent.world * local * drive`, where `local` is derived once from
/// the reference poses and `drive` is the per-solve override.
#[derive(Debug, Clone)]
pub struct Joint {
    name: String,
    reference: Isometry3<f64>,
    pub(crate) local: Isometry3<f64>,
    pub(crate) world: Isometry3<f64>,
    pub(crate) drive: Isometry3<f64>,
    explicit_root: bool,
    pub(crate) parent: Option<JointId>,
    pub(crate) children: Vec<JointId>,
    kind: JointKind,
}

/// Lower-pair joint presets. Every preset extends along +x with its axis on +z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatialKind {
    /// R: turns about z.
    Revolute,
    /// P: slides along x.
    Prismatic,
    /// C: turns about and slides along x.
    Cylindrical,
    /// U: turns about x and z.
    Universal,
    /// S: turns freely.
    Spherical,
}

impl SpatialKind {
    /// `(rotation, translation)` masks of the preset.
    pub fn dof(self) -> (Dof, Dof) {
        match self {
            SpatialKind::Revolute => (Dof::Z, Dof::NONE),
            SpatialKind::Prismatic => (Dof::NONE, Dof::X),
            SpatialKind::Cylindrical => (Dof::X, Dof::X),
            SpatialKind::Universal => (Dof::XZ, Dof::NONE),
            SpatialKind::Spherical => (Dof::XYZ, Dof::NONE),
        }
    }
}

/// What a joint contributes to a solve.
#[derive(Debug, Clone)]
pub enum JointKind {
    /// Follows its parent, never optimised.
    Rigid,
    Ik(IkJoint),
}

impl Joint {
    pub fn rigid(name: impl Into<String>, reference: Isometry3<f64>) -> Self {
        Self::with_kind(name.into(), reference, JointKind::Rigid)
    }

    pub fn ik(
        name: impl Into<String>,
        rotation_dof: Dof,
        translation_dof: Dof,
        reference: Isometry3<f64>,
    ) -> Self {
        Self::with_kind(
            name.into(),
            reference,
            JointKind::Ik(IkJoint::new(rotation_dof, translation_dof)),
        )
    }

    pub fn spatial(name: impl Into<String>, kind: SpatialKind, reference: Isometry3<f64>) -> Self {
        let (rotation_dof, translation_dof) = kind.dof();
        Self::ik(name, rotation_dof, translation_dof, reference)
    }

    pub fn revolute(name: impl Into<String>, reference: Isometry3<f64>) -> Self {
        Self::spatial(name, SpatialKind::Revolute, reference)
    }

    pub fn prismatic(name: impl Into<String>, reference: Isometry3<f64>) -> Self {
        Self::spatial(name, SpatialKind::Prismatic, reference)
    }

    pub fn cylindrical(name: impl Into<String>, reference: Isometry3<f64>) -> Self {
        Self::spatial(name, SpatialKind::Cylindrical, reference)
    }

    pub fn universal(name: impl Into<String>, reference: Isometry3<f64>) -> Self {
        Self::spatial(name, SpatialKind::Universal, reference)
    }

    pub fn spherical(name: impl Into<String>, reference: Isometry3<f64>) -> Self {
        Self::spatial(name, SpatialKind::Spherical, reference)
    }

    fn with_kind(name: String, reference: Isometry3<f64>, kind: JointKind) -> Self {
        Self {
            name,
            reference,
            local: Isometry3::identity(),
            world: reference,
            drive: Isometry3::identity(),
            explicit_root: false,
            parent: None,
            children: vec![],
            kind,
        }
    }

    /// Mark as root. A root is never an optimisation variable, so an IK root
    /// loses its degrees of freedom.
    pub fn root(mut self) -> Self {
        self.set_root(true);
        self
    }

    pub fn set_root(&mut self, root: bool) {
        self.explicit_root = root;
        if root {
            if let JointKind::Ik(ik) = &mut self.kind {
                ik.set_dof(Dof::NONE, Dof::NONE);
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none() || self.explicit_root
    }

    pub fn parent(&self) -> Option<JointId> {
        self.parent
    }

    pub fn children(&self) -> &[JointId] {
        &self.children
    }

    pub fn reference(&self) -> &Isometry3<f64> {
        &self.reference
    }

    pub fn local(&self) -> &Isometry3<f64> {
        &self.local
    }

    pub fn world(&self) -> &Isometry3<f64> {
        &self.world
    }

    pub fn drive(&self) -> &Isometry3<f64> {
        &self.drive
    }

    /// Overwrite the world pose. Meant for roots, which no solver propagates into.
    pub fn set_world(&mut self, world: Isometry3<f64>) {
        self.world = world;
    }

    pub fn set_drive(&mut self, drive: Isometry3<f64>) {
        self.drive = drive;
    }

    /// Move the world pose along a world-space offset.
    pub fn translate_world(&mut self, offset: &Vector3<f64>) {
        self.world.append_translation_mut(&Translation3::from(*offset));
    }

    /// Rotate the world pose about its own frame.
    pub fn rotate_local(&mut self, rotation: &UnitQuaternion<f64>) {
        self.world.rotation *= *rotation;
    }

    pub fn kind(&self) -> &JointKind {
        &self.kind
    }

    pub fn as_ik(&self) -> Option<&IkJoint> {
        match &self.kind {
            JointKind::Ik(ik) => Some(ik),
            JointKind::Rigid => None,
        }
    }

    pub fn as_ik_mut(&mut self) -> Option<&mut IkJoint> {
        match &mut self.kind {
            JointKind::Ik(ik) => Some(ik),
            JointKind::Rigid => None,
        }
    }

    /// Free scalars this joint owns in the aggregate vector; roots own none.
    pub fn parameter_count(&self) -> usize {
        match &self.kind {
            JointKind::Ik(ik) if !self.is_root() => ik.parameter.parameter_count(),
            _ => 0,
        }
    }

    /// Drain this joint's scalars from `params` and store the resulting sub-pose as drive pose.
    pub fn apply_parameter(&mut self, params: &mut &[f64]) -> ChainResult<()> {
        if self.parameter_count() == 0 {
            return Ok(());
        }
        if let JointKind::Ik(ik) = &mut self.kind {
            ik.parameter.apply(params)?;
            self.drive = ik.parameter.pose();
        }
        Ok(())
    }

    pub fn read_parameter(&self, out: &mut Vec<f64>) {
        if self.parameter_count() == 0 {
            return;
        }
        if let JointKind::Ik(ik) = &self.kind {
            ik.parameter.write_into(out);
        }
    }

    pub fn set_target_original_position(&mut self) {
        let position = self.reference.translation.vector;
        if let Some(ik) = self.as_ik_mut() {
            ik.set_target_position(position, Vector3::repeat(1.));
        }
    }

    pub fn set_target_original_rotation(&mut self) {
        let rotation = self.reference.rotation;
        if let Some(ik) = self.as_ik_mut() {
            ik.set_target_rotation(rotation, Vector3::repeat(1.));
        }
    }

    pub fn set_target_original_pose(&mut self) {
        self.set_target_original_position();
        self.set_target_original_rotation();
    }

    pub fn set_target_current_position(&mut self) {
        let position = self.world.translation.vector;
        if let Some(ik) = self.as_ik_mut() {
            ik.set_target_position(position, Vector3::repeat(1.));
        }
    }

    pub fn set_target_current_rotation(&mut self) {
        let rotation = self.world.rotation;
        if let Some(ik) = self.as_ik_mut() {
            ik.set_target_rotation(rotation, Vector3::repeat(1.));
        }
    }

    pub fn set_target_current_pose(&mut self) {
        self.set_target_current_position();
        self.set_target_current_rotation();
    }
}

/// Desired pose of an effector joint. Position and rotation toggle independently.
#[derive(Debug, Clone)]
pub struct EffectorTarget {
    pub position_enabled: bool,
    pub position: Vector3<f64>,
    pub rotation_enabled: bool,
    pub rotation: UnitQuaternion<f64>,
    /// Track this joint's live world pose instead of the stored values.
    pub follow: Option<JointId>,
}

impl Default for EffectorTarget {
    fn default() -> Self {
        Self {
            position_enabled: false,
            position: Vector3::zeros(),
            rotation_enabled: false,
            rotation: UnitQuaternion::identity(),
            follow: None,
        }
    }
}

impl EffectorTarget {
    pub fn enabled(&self) -> bool {
        self.position_enabled || self.rotation_enabled
    }

    /// Homogeneous matrix of the enabled parts, identity elsewhere.
    /// `followed` is the world pose of the tracked joint, if any.
    pub fn matrix(&self, followed: Option<&Isometry3<f64>>) -> Matrix4<f64> {
        let (position, rotation) = match followed {
            Some(pose) => (pose.translation.vector, pose.rotation),
            None => (self.position, self.rotation),
        };
        let mut target = Isometry3::identity();
        if self.rotation_enabled {
            target.rotation = rotation;
        }
        if self.position_enabled {
            target.translation = Translation3::from(position);
        }
        target.to_homogeneous()
    }
}

/// Per-axis `[min, max]` ranges for a joint's free scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub rotation: [Vector3<f64>; 2],
    pub translation: [Vector3<f64>; 2],
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            rotation: [Vector3::repeat(f64::MIN), Vector3::repeat(f64::MAX)],
            translation: [Vector3::repeat(f64::MIN), Vector3::repeat(f64::MAX)],
        }
    }
}

/// Optimisation data of a joint: free parameters, effector target, weights and bounds.
#[derive(Debug, Clone)]
pub struct IkJoint {
    parameter: JointParameter,
    target: EffectorTarget,
    rotation_stiffness: Vector3<f64>,
    location_stiffness: Vector3<f64>,
    bounds: Bounds,
}

impl IkJoint {
    pub fn new(rotation_dof: Dof, translation_dof: Dof) -> Self {
        Self {
            parameter: JointParameter::new(rotation_dof, translation_dof),
            target: EffectorTarget::default(),
            rotation_stiffness: Vector3::repeat(1.),
            location_stiffness: Vector3::repeat(1.),
            bounds: Bounds::default(),
        }
    }

    pub fn parameter(&self) -> &JointParameter {
        &self.parameter
    }

    /// Replace the degrees of freedom. Current parameter values are reset.
    pub fn set_dof(&mut self, rotation_dof: Dof, translation_dof: Dof) {
        self.parameter = JointParameter::new(rotation_dof, translation_dof);
    }

    pub fn rotation_euler(&self) -> Vector3<f64> {
        self.parameter.rotation_euler()
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.parameter.translation()
    }

    pub fn target(&self) -> &EffectorTarget {
        &self.target
    }

    pub fn target_enabled(&self) -> bool {
        self.target.enabled()
    }

    pub fn set_target_position(&mut self, position: Vector3<f64>, stiffness: Vector3<f64>) {
        self.target.position_enabled = true;
        self.target.position = position;
        self.location_stiffness = stiffness;
    }

    pub fn set_target_rotation(&mut self, rotation: UnitQuaternion<f64>, stiffness: Vector3<f64>) {
        self.target.rotation_enabled = true;
        self.target.rotation = rotation;
        self.rotation_stiffness = stiffness;
    }

    pub fn set_target_pose(&mut self, pose: &Isometry3<f64>) {
        self.target.position_enabled = true;
        self.target.rotation_enabled = true;
        self.target.position = pose.translation.vector;
        self.target.rotation = pose.rotation;
    }

    /// Track `joint`'s world pose. Which parts are matched is still governed by
    /// the position / rotation flags; both are enabled when neither is.
    pub fn set_target_joint(&mut self, joint: JointId) {
        self.target.follow = Some(joint);
        if !self.target.enabled() {
            self.target.position_enabled = true;
            self.target.rotation_enabled = true;
        }
    }

    pub fn clear_target(&mut self) {
        self.target = EffectorTarget::default();
    }

    pub fn set_rotation_bounds(&mut self, min: Vector3<f64>, max: Vector3<f64>) {
        self.bounds.rotation = [min, max];
    }

    pub fn set_translation_bounds(&mut self, min: Vector3<f64>, max: Vector3<f64>) {
        self.bounds.translation = [min, max];
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Whether every free scalar lies inside its range. Advisory only, solvers never clamp.
    pub fn is_within_bounds(&self) -> bool {
        let rotation = self.parameter.rotation_euler();
        let translation = self.parameter.translation();
        let [rot_min, rot_max] = &self.bounds.rotation;
        let [trans_min, trans_max] = &self.bounds.translation;
        self.parameter
            .rotation_dof()
            .axes()
            .all(|i| rotation[i] >= rot_min[i] && rotation[i] <= rot_max[i])
            && self
                .parameter
                .translation_dof()
                .axes()
                .all(|i| translation[i] >= trans_min[i] && translation[i] <= trans_max[i])
    }

    /// `world - target` with disabled parts zeroed and rows scaled by stiffness.
    /// The bottom row carries no constraint and is left for the caller to drop.
    pub fn loss(&self, world: &Isometry3<f64>, followed: Option<&Isometry3<f64>>) -> Matrix4<f64> {
        if !self.target.enabled() {
            return Matrix4::zeros();
        }
        let mut loss = world.to_homogeneous() - self.target.matrix(followed);
        for row in 0..3 {
            if self.target.position_enabled {
                loss[(row, 3)] *= self.location_stiffness[row];
            } else {
                loss[(row, 3)] = 0.;
            }
            for col in 0..3 {
                if self.target.rotation_enabled {
                    loss[(row, col)] *= self.rotation_stiffness[row];
                } else {
                    loss[(row, col)] = 0.;
                }
            }
        }
        loss
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn at(x: f64, y: f64, z: f64) -> Isometry3<f64> {
        Isometry3::translation(x, y, z)
    }

    #[test]
    fn test_root_flag() {
        let joint = Joint::rigid("a", at(0., 0., 0.));
        assert!(joint.is_root());

        let mut joint = Joint::ik("b", Dof::XYZ, Dof::X, at(1., 0., 0.));
        joint.parent = Some(JointId(0));
        assert!(!joint.is_root());
        assert_eq!(joint.parameter_count(), 4);

        let joint = joint.root();
        assert!(joint.is_root());
        assert_eq!(joint.parameter_count(), 0);
        assert_eq!(joint.as_ik().unwrap().parameter().parameter_count(), 0);
    }

    #[test]
    fn test_world_starts_at_reference() {
        let joint = Joint::rigid("a", at(1., 2., 3.));
        assert_eq!(joint.world(), joint.reference());
        assert_eq!(joint.drive(), &Isometry3::identity());
    }

    #[test]
    fn test_apply_parameter_sets_drive() {
        let mut joint = Joint::ik("b", Dof::NONE, Dof::Y, at(0., 0., 0.));
        joint.parent = Some(JointId(0));
        let mut cursor: &[f64] = &[2.5, 7.];
        joint.apply_parameter(&mut cursor).unwrap();
        assert_eq!(cursor, &[7.]);
        assert_relative_eq!(joint.drive().translation.vector, Vector3::new(0., 2.5, 0.));

        let mut out = vec![];
        joint.read_parameter(&mut out);
        assert_eq!(out, vec![2.5]);
    }

    #[test]
    fn test_rigid_joint_has_no_parameters() {
        let mut joint = Joint::rigid("r", at(0., 0., 0.));
        joint.parent = Some(JointId(0));
        let mut cursor: &[f64] = &[1.];
        joint.apply_parameter(&mut cursor).unwrap();
        assert_eq!(cursor.len(), 1);
        assert_eq!(joint.drive(), &Isometry3::identity());
    }

    #[test]
    fn test_loss_without_target_is_zero() {
        let ik = IkJoint::new(Dof::Z, Dof::NONE);
        assert_eq!(ik.loss(&at(1., 2., 3.), None), Matrix4::zeros());
    }

    #[test]
    fn test_loss_masks_disabled_parts() {
        let mut ik = IkJoint::new(Dof::Z, Dof::NONE);
        ik.set_target_position(Vector3::new(1., 0., 0.), Vector3::repeat(1.));
        let world = Isometry3::new(Vector3::new(3., 2., 1.), Vector3::new(0., 0., 0.7));
        let loss = ik.loss(&world, None);
        assert_relative_eq!(loss[(0, 3)], 2.);
        assert_relative_eq!(loss[(1, 3)], 2.);
        assert_relative_eq!(loss[(2, 3)], 1.);
        for row in 0..3 {
            for col in 0..3 {
                assert_eq!(loss[(row, col)], 0.);
            }
        }

        let mut ik = IkJoint::new(Dof::Z, Dof::NONE);
        ik.set_target_rotation(UnitQuaternion::identity(), Vector3::repeat(1.));
        let loss = ik.loss(&world, None);
        for row in 0..3 {
            assert_eq!(loss[(row, 3)], 0.);
        }
        assert_relative_eq!(loss[(0, 1)], -(0.7f64).sin());
    }

    #[test]
    fn test_loss_scaled_by_stiffness() {
        let mut ik = IkJoint::new(Dof::NONE, Dof::X);
        ik.set_target_position(Vector3::zeros(), Vector3::new(2., 0., 1.));
        let loss = ik.loss(&at(1., 1., 1.), None);
        assert_relative_eq!(loss[(0, 3)], 2.);
        assert_relative_eq!(loss[(1, 3)], 0.);
        assert_relative_eq!(loss[(2, 3)], 1.);
    }

    #[test]
    fn test_loss_follows_joint() {
        let mut ik = IkJoint::new(Dof::NONE, Dof::X);
        ik.set_target_joint(JointId(3));
        assert!(ik.target_enabled());
        let world = at(1., 0., 0.);
        let loss = ik.loss(&world, Some(&world));
        assert_relative_eq!(loss, Matrix4::zeros());
    }

    #[test]
    fn test_bounds_check_only_free_axes() {
        let mut ik = IkJoint::new(Dof::Z, Dof::X);
        ik.set_rotation_bounds(Vector3::repeat(-1.), Vector3::repeat(1.));
        ik.set_translation_bounds(Vector3::repeat(0.5), Vector3::repeat(2.));
        // y and z translation stay at 0, outside [0.5, 2], but are not free
        let mut cursor: &[f64] = &[0.5, 1.];
        ik.parameter.apply(&mut cursor).unwrap();
        assert!(ik.is_within_bounds());

        let mut cursor: &[f64] = &[1.5, 1.];
        ik.parameter.apply(&mut cursor).unwrap();
        assert!(!ik.is_within_bounds());
    }

    #[test]
    fn test_drive_primitives() {
        let mut joint = Joint::rigid("a", at(1., 0., 0.));
        joint.rotate_local(&UnitQuaternion::from_euler_angles(0., 0., 0.5));
        joint.translate_world(&Vector3::new(0., 1., 0.));
        assert_relative_eq!(joint.world().translation.vector, Vector3::new(1., 1., 0.));
        assert_relative_eq!(joint.world().rotation.angle(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_spatial_presets() {
        let presets = [
            (Joint::revolute("r", at(0., 0., 0.)), Dof::Z, Dof::NONE),
            (Joint::prismatic("p", at(0., 0., 0.)), Dof::NONE, Dof::X),
            (Joint::cylindrical("c", at(0., 0., 0.)), Dof::X, Dof::X),
            (Joint::universal("u", at(0., 0., 0.)), Dof::XZ, Dof::NONE),
            (Joint::spherical("s", at(0., 0., 0.)), Dof::XYZ, Dof::NONE),
        ];
        let counts = [1, 1, 2, 2, 3];
        for ((mut joint, rotation, translation), count) in presets.into_iter().zip(counts) {
            let parameter = joint.as_ik().unwrap().parameter();
            assert_eq!(parameter.rotation_dof(), rotation);
            assert_eq!(parameter.translation_dof(), translation);
            joint.parent = Some(JointId(0));
            assert_eq!(joint.parameter_count(), count);
        }

        let universal = Joint::spatial("u", SpatialKind::Universal, at(1., 2., 3.));
        assert_eq!(universal.reference(), &at(1., 2., 3.));
        assert_eq!(universal.as_ik().unwrap().parameter().parameter_count(), 2);
    }
}
