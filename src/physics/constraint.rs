//! 约束
//!
//! 两种约束，都按位置修正 + 旋转修正的顺序迭代求解：
//! - JointConstraint: 连接父子两个刚体，使两者在同一点（子骨骼位置）重合，并施加轴向角度限制
//! - PinConstraint: 把单个刚体上的一点拉向世界空间目标（效应器或求解根）

use glam::{Quat, Vec3};

use super::rigid_body::RigidBody;

/// 逆质量总和低于此值时跳过修正
const MIN_TOTAL_INV_MASS: f32 = 1e-12;
/// 强度低于此值的钉住约束视为关闭
const MIN_PIN_ALPHA: f32 = 1e-6;

/// 同时可变借用两个不同刚体
fn pair_mut(bodies: &mut [RigidBody], a: usize, b: usize) -> (&mut RigidBody, &mut RigidBody) {
    assert_ne!(a, b, "joint constraint connects a body to itself");
    if a < b {
        let (lo, hi) = bodies.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = bodies.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

/// 约束
#[derive(Clone, Debug)]
pub enum Constraint {
    Joint(JointConstraint),
    Pin(PinConstraint),
}

impl Constraint {
    /// 执行一次迭代
    pub fn solve(&self, bodies: &mut [RigidBody], move_sub_roots: bool) {
        match self {
            Constraint::Joint(joint) => joint.solve(bodies, move_sub_roots),
            Constraint::Pin(pin) => pin.solve(bodies),
        }
    }

    /// 消除残余拉伸（仅关节约束）
    pub fn remove_stretch(&self, bodies: &mut [RigidBody]) {
        if let Constraint::Joint(joint) = self {
            joint.remove_stretch(bodies);
        }
    }

    pub fn as_pin_mut(&mut self) -> Option<&mut PinConstraint> {
        match self {
            Constraint::Pin(pin) => Some(pin),
            Constraint::Joint(_) => None,
        }
    }

    pub fn as_joint(&self) -> Option<&JointConstraint> {
        match self {
            Constraint::Joint(joint) => Some(joint),
            Constraint::Pin(_) => None,
        }
    }
}

// ============================================================================
// 关节约束
// ============================================================================

/// 父子刚体之间的关节
#[derive(Clone, Debug)]
pub struct JointConstraint {
    /// 父刚体
    pub a: usize,
    /// 子刚体
    pub b: usize,
    /// 关节点在 A 坐标系中的位置
    pin_point_local_a: Vec3,
    /// 关节点在 B 坐标系中的位置
    pin_point_local_b: Vec3,
    /// 子刚体初始旋转下的三个参考轴
    x_orig: Vec3,
    y_orig: Vec3,
    z_orig: Vec3,
}

impl JointConstraint {
    /// 以子骨骼当前位置为关节点创建关节
    pub fn new(bodies: &[RigidBody], a: usize, b: usize) -> Self {
        let body_a = &bodies[a];
        let body_b = &bodies[b];
        let pin_point = body_b.bone_position();

        Self {
            a,
            b,
            pin_point_local_a: body_a.rotation.inverse() * (pin_point - body_a.position),
            pin_point_local_b: body_b.rotation.inverse() * (pin_point - body_b.position),
            x_orig: body_b.rotation_orig * Vec3::X,
            y_orig: body_b.rotation_orig * Vec3::Y,
            z_orig: body_b.rotation_orig * Vec3::Z,
        }
    }

    /// 两个关节点的世界偏移，以及从 A 关节点指向 B 关节点的向量
    fn correction(&self, a: &RigidBody, b: &RigidBody) -> (Vec3, Vec3, Vec3) {
        let offset_a = a.rotation * self.pin_point_local_a;
        let offset_b = b.rotation * self.pin_point_local_b;
        let corr = (b.position + offset_b) - (a.position + offset_a);
        (corr, offset_a, offset_b)
    }

    /// 两个关节点之间的距离
    pub fn separation(&self, bodies: &[RigidBody]) -> f32 {
        self.correction(&bodies[self.a], &bodies[self.b]).0.length()
    }

    pub fn solve(&self, bodies: &mut [RigidBody], move_sub_roots: bool) {
        let (a, b) = pair_mut(bodies, self.a, self.b);

        // 旋转
        let (corr, offset_a, offset_b) = self.correction(a, b);
        a.apply_push_to_rotate_body(corr, offset_a);
        b.apply_push_to_rotate_body(-corr, offset_b);

        self.update_joint_limits(a, b);

        // 平移：按逆质量分配，不能平移的刚体不分担
        let (corr, _, _) = self.correction(a, b);
        let movable = |body: &RigidBody| {
            if body.is_pinned() || (body.is_sub_root && !move_sub_roots) {
                0.0
            } else {
                body.inv_mass
            }
        };
        let inv_a = movable(a);
        let inv_b = movable(b);
        let total = inv_a + inv_b;
        if total <= MIN_TOTAL_INV_MASS {
            return;
        }
        a.apply_push_to_position(corr * (inv_a / total));
        b.apply_push_to_position(-corr * (inv_b / total));
    }

    /// 平移子刚体，使两个关节点完全重合
    pub fn remove_stretch(&self, bodies: &mut [RigidBody]) {
        let (a, b) = pair_mut(bodies, self.a, self.b);
        let (corr, _, _) = self.correction(a, b);
        b.position -= corr;
    }

    // ========================================
    // 角度限制
    // ========================================

    /// 按子刚体的设置施加轴向限制
    fn update_joint_limits(&self, a: &mut RigidBody, b: &mut RigidBody) {
        let settings = b.settings;
        if settings.all_free() {
            return;
        }

        if settings.all_locked() {
            b.rotation = (a.rotation * a.rotation_orig.inverse() * b.rotation_orig).normalize();
            return;
        }

        for (axis_index, limit) in [settings.x, settings.y, settings.z].into_iter().enumerate() {
            let Some((min, max)) = limit.range() else {
                continue;
            };

            // 两个刚体相对初始姿态的旋转，作用到子刚体初始参考轴上
            let rel_a = a.rotation * a.rotation_orig.inverse();
            let rel_b = b.rotation * b.rotation_orig.inverse();
            let (axis, reference, current) = match axis_index {
                0 => {
                    let axis = rel_a * self.x_orig;
                    (axis, rel_a * self.z_orig, rel_b * self.z_orig)
                }
                1 => {
                    let axis = rel_a * self.y_orig;
                    (axis, rel_a * self.z_orig, rel_b * self.z_orig)
                }
                _ => {
                    let axis = rel_a * self.z_orig;
                    (axis, rel_a * self.y_orig, rel_b * self.y_orig)
                }
            };

            let current = (current - axis * current.dot(axis)).normalize_or_zero();
            if current.length_squared() < 1e-8 {
                continue;
            }

            let angle = signed_angle_deg(reference, current, axis);
            if (min..=max).contains(&angle) {
                continue;
            }
            let target = angle.clamp(min, max);
            let corr = Quat::from_axis_angle(axis, (target - angle).to_radians());
            apply_rotation_correction(a, b, corr);
        }
    }
}

/// `from` 到 `to` 的带符号夹角（角度制），符号由 `axis` 决定
fn signed_angle_deg(from: Vec3, to: Vec3, axis: Vec3) -> f32 {
    let mut angle = from.dot(to).clamp(-1.0, 1.0).acos();
    if from.cross(to).dot(axis) < 0.0 {
        angle = -angle;
    }
    angle.to_degrees()
}

/// 按逆质量把旋转修正分给两个刚体（A 反向，B 正向）
fn apply_rotation_correction(a: &mut RigidBody, b: &mut RigidBody, corr: Quat) {
    let total = a.inv_mass + b.inv_mass;
    if total <= MIN_TOTAL_INV_MASS {
        return;
    }
    let weight_a = a.inv_mass / total;
    let weight_b = b.inv_mass / total;
    a.rotation = (Quat::IDENTITY.slerp(corr.inverse(), weight_a) * a.rotation).normalize();
    b.rotation = (Quat::IDENTITY.slerp(corr, weight_b) * b.rotation).normalize();
}

// ============================================================================
// 钉住约束
// ============================================================================

/// 把刚体上的一点拉向目标
#[derive(Clone, Debug)]
pub struct PinConstraint {
    /// 被钉住的刚体
    pub body: usize,
    /// 钉住点在刚体坐标系中的位置
    pin_point_local: Vec3,
    /// 世界空间目标
    pub goal: Vec3,
    /// 强度 [0, 1]
    pub alpha: f32,
    pub enabled: bool,
}

impl PinConstraint {
    /// 以 `point` 的当前世界位置作为钉住点创建
    pub fn new(bodies: &[RigidBody], body: usize, point: Vec3) -> Self {
        let target = &bodies[body];
        Self {
            body,
            pin_point_local: target.rotation.inverse() * (point - target.position),
            goal: point,
            alpha: 1.0,
            enabled: true,
        }
    }

    pub fn solve(&self, bodies: &mut [RigidBody]) {
        if !self.enabled || self.alpha <= MIN_PIN_ALPHA {
            return;
        }
        let body = &mut bodies[self.body];

        let offset = body.rotation * self.pin_point_local;
        let corr = self.goal - (body.position + offset);
        body.apply_push_to_rotate_body(corr * self.alpha, offset);

        // 钉住约束直接移动刚体，不受"被钉住"标志限制
        let offset = body.rotation * self.pin_point_local;
        let corr = self.goal - (body.position + offset);
        body.position += corr * self.alpha;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::rigid_body::AxisLimit;

    /// 两个首尾相连的刚体：A 覆盖 (0,0)-(0,100)，B 覆盖 (0,100)-(0,200)
    fn two_bodies() -> Vec<RigidBody> {
        let mut a = RigidBody::new(0);
        a.position = Vec3::new(0.0, 50.0, 0.0);
        a.bone_local_position = Vec3::new(0.0, -50.0, 0.0);
        a.length = 100.0;
        a.inv_mass = 1.0 / (100.0 * 100.5);

        let mut b = RigidBody::new(1);
        b.position = Vec3::new(0.0, 150.0, 0.0);
        b.bone_local_position = Vec3::new(0.0, -50.0, 0.0);
        b.length = 100.0;
        b.inv_mass = a.inv_mass;
        vec![a, b]
    }

    #[test]
    fn test_pair_mut_either_order() {
        let mut bodies = two_bodies();
        let (b, a) = pair_mut(&mut bodies, 1, 0);
        assert_eq!(b.bone, 1);
        assert_eq!(a.bone, 0);
    }

    #[test]
    fn test_joint_pin_point_is_child_bone() {
        let bodies = two_bodies();
        let joint = JointConstraint::new(&bodies, 0, 1);
        assert!(joint.separation(&bodies) < 1e-5);
        assert!((joint.pin_point_local_a - Vec3::new(0.0, 50.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_joint_pulls_bodies_together() {
        let mut bodies = two_bodies();
        let joint = JointConstraint::new(&bodies, 0, 1);
        bodies[1].position += Vec3::new(20.0, 10.0, 0.0);

        let before = joint.separation(&bodies);
        for _ in 0..20 {
            joint.solve(&mut bodies, true);
        }
        assert!(joint.separation(&bodies) < before * 0.01);
    }

    #[test]
    fn test_pinned_body_takes_no_translation() {
        let mut bodies = two_bodies();
        let joint = JointConstraint::new(&bodies, 0, 1);
        bodies[0].root_pinned = true;
        bodies[1].position += Vec3::new(0.0, 10.0, 0.0);

        joint.solve(&mut bodies, true);
        assert_eq!(bodies[0].position, Vec3::new(0.0, 50.0, 0.0));
        assert!(joint.separation(&bodies) < 1e-3);
    }

    #[test]
    fn test_sub_root_frozen_without_move_sub_roots() {
        let mut bodies = two_bodies();
        let joint = JointConstraint::new(&bodies, 0, 1);
        bodies[0].is_sub_root = true;
        bodies[1].position += Vec3::new(0.0, 10.0, 0.0);

        joint.solve(&mut bodies, false);
        assert_eq!(bodies[0].position, Vec3::new(0.0, 50.0, 0.0));

        joint.solve(&mut bodies, true);
        assert_ne!(bodies[0].position, Vec3::new(0.0, 50.0, 0.0));
    }

    #[test]
    fn test_remove_stretch_closes_gap() {
        let mut bodies = two_bodies();
        let joint = JointConstraint::new(&bodies, 0, 1);
        bodies[1].position += Vec3::new(3.0, 40.0, -2.0);

        Constraint::Joint(joint.clone()).remove_stretch(&mut bodies);
        assert!(joint.separation(&bodies) < 1e-4);
        assert_eq!(bodies[0].position, Vec3::new(0.0, 50.0, 0.0));
    }

    #[test]
    fn test_locked_joint_follows_parent() {
        let mut bodies = two_bodies();
        let joint = JointConstraint::new(&bodies, 0, 1);
        bodies[1].settings.x = AxisLimit::LOCKED;
        bodies[1].settings.y = AxisLimit::LOCKED;
        bodies[1].settings.z = AxisLimit::LOCKED;

        bodies[0].rotation = Quat::from_rotation_z(0.4);
        bodies[1].rotation = Quat::from_rotation_x(1.2);
        joint.update_joint_limits_for_test(&mut bodies);
        assert!(bodies[1].rotation.dot(bodies[0].rotation).abs() > 0.9999);
    }

    #[test]
    fn test_limited_axis_clamps_bend() {
        let mut bodies = two_bodies();
        let joint = JointConstraint::new(&bodies, 0, 1);
        bodies[1].settings.z = AxisLimit::limited(-30.0, 30.0);

        // 子刚体绕 Z 弯曲 60 度
        bodies[1].rotation = Quat::from_rotation_z(60f32.to_radians());
        joint.update_joint_limits_for_test(&mut bodies);

        let relative = bodies[0].rotation.inverse() * bodies[1].rotation;
        let (axis, angle) = relative.to_axis_angle();
        assert!((angle.to_degrees() - 30.0).abs() < 0.05);
        assert!(axis.z > 0.99);
    }

    #[test]
    fn test_pin_moves_point_to_goal() {
        let mut bodies = two_bodies();
        let pin = PinConstraint::new(&bodies, 1, Vec3::new(0.0, 200.0, 0.0));
        let goal = Vec3::new(30.0, 180.0, 0.0);
        let pin = PinConstraint { goal, ..pin };

        // 被效应器挂载也能移动
        bodies[1].attached_effector = Some(0);
        pin.solve(&mut bodies);
        let point = bodies[1].position + bodies[1].rotation * pin.pin_point_local;
        assert!((point - goal).length() < 1e-3);

        let disabled = PinConstraint { enabled: false, goal: Vec3::ZERO, ..pin.clone() };
        let before = bodies[1].position;
        disabled.solve(&mut bodies);
        assert_eq!(bodies[1].position, before);
    }

    impl JointConstraint {
        fn update_joint_limits_for_test(&self, bodies: &mut [RigidBody]) {
            let (a, b) = pair_mut(bodies, self.a, self.b);
            self.update_joint_limits(a, b);
        }
    }
}
