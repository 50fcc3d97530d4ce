//! 效应器
//!
//! 效应器把某根骨骼拉向目标变换。每个效应器持有其钉住约束在约束数组中的索引，
//! 该索引只在初始化与 reset 之间有效。

use glam::{Quat, Vec3};

use super::config::SolverConfig;
use super::rigid_body::RigidBody;
use crate::skeleton::BoneSet;

/// 效应器
#[derive(Clone, Debug)]
pub struct Effector {
    /// 目标骨骼索引
    pub bone: usize,

    // ========== 输入 ==========
    /// 设置目标时骨骼的位置
    position_orig: Vec3,
    /// 设置目标时骨骼的旋转
    rotation_orig: Quat,
    goal_position: Vec3,
    goal_rotation: Quat,
    /// 变换混合系数（0 = 原姿态，1 = 目标）
    transform_alpha: f32,
    /// 钉住约束强度
    strength_alpha: f32,

    // ========== 混合结果 ==========
    position: Vec3,
    rotation: Quat,

    // ========== 初始化时链接 ==========
    pub(crate) pin: Option<usize>,
    /// 最近的祖先子根刚体
    pub(crate) sub_root_body: Option<usize>,
    /// 初始化时到子根刚体的距离
    pub(crate) distance_to_sub_root_orig: f32,
}

impl Effector {
    /// 新效应器的目标等于骨骼当前变换，两个系数都为 1
    pub fn new(bone: usize, position: Vec3, rotation: Quat) -> Self {
        Self {
            bone,
            position_orig: position,
            rotation_orig: rotation,
            goal_position: position,
            goal_rotation: rotation,
            transform_alpha: 1.0,
            strength_alpha: 1.0,
            position,
            rotation,
            pin: None,
            sub_root_body: None,
            distance_to_sub_root_orig: 0.0,
        }
    }

    /// 设置目标；`current` 为骨骼此刻的变换，作为混合起点
    pub fn set_goal(
        &mut self,
        current: (Vec3, Quat),
        position: Vec3,
        rotation: Quat,
        transform_alpha: f32,
        strength_alpha: f32,
    ) {
        (self.position_orig, self.rotation_orig) = current;
        self.goal_position = position;
        self.goal_rotation = rotation;
        self.transform_alpha = transform_alpha;
        self.strength_alpha = strength_alpha;
    }

    /// 由原姿态与目标计算混合变换
    pub fn update_from_inputs(&mut self) {
        let t = self.transform_alpha.clamp(0.0, 1.0);
        if t <= 0.0 {
            self.position = self.position_orig;
            self.rotation = self.rotation_orig;
        } else if t >= 1.0 {
            self.position = self.goal_position;
            self.rotation = self.goal_rotation;
        } else {
            self.position = self.position_orig.lerp(self.goal_position, t);
            self.rotation = self.rotation_orig.slerp(self.goal_rotation, t);
        }
    }

    /// 混合后的位置
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// 混合后的旋转
    #[inline]
    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    #[inline]
    pub fn goal_position(&self) -> Vec3 {
        self.goal_position
    }

    #[inline]
    pub fn goal_rotation(&self) -> Quat {
        self.goal_rotation
    }

    #[inline]
    pub fn strength_alpha(&self) -> f32 {
        self.strength_alpha.clamp(0.0, 1.0)
    }

    /// 钉住约束索引（初始化后有效）
    #[inline]
    pub fn pin(&self) -> Option<usize> {
        self.pin
    }

    /// 记录最近的祖先子根及原始距离
    ///
    /// 从效应器骨骼的父骨骼开始向上，只经过被求解的骨骼。
    pub(crate) fn link_sub_root(&mut self, bones: &BoneSet, bodies: &[RigidBody]) {
        self.sub_root_body = None;
        self.distance_to_sub_root_orig = 0.0;

        let mut next = bones.parent_of(self.bone);
        while let Some(i) = next {
            let bone = &bones[i];
            if !bone.is_solved() {
                break;
            }
            if bone.is_sub_root() {
                if let Some(body) = bone.body_id() {
                    self.sub_root_body = Some(body);
                    self.distance_to_sub_root_orig =
                        (bodies[body].position - bones[self.bone].position).length();
                }
                break;
            }
            next = bone.parent_id();
        }
    }

    /// 压缩比例（0..1），未被压缩或低于阈值时为 None
    pub fn squash_percent(&self, sub_root_position: Vec3, config: &SolverConfig) -> Option<f32> {
        let dist_orig = self.distance_to_sub_root_orig;
        if dist_orig <= f32::EPSILON {
            return None;
        }
        let dist = (sub_root_position - self.position).length();
        if dist >= dist_orig {
            return None;
        }

        let scaled = dist_orig * config.squash_threshold_scale;
        if scaled <= f32::EPSILON {
            return None;
        }
        let percent = (dist_orig - dist).min(scaled) / scaled;
        (percent >= config.squash_min_percent).then_some(percent)
    }

    /// 肢体被压缩时，把祖先刚体向偏好角混合
    pub(crate) fn squash_sub_roots(
        &self,
        bones: &BoneSet,
        bodies: &mut [RigidBody],
        effectors: &[Effector],
        config: &SolverConfig,
    ) {
        let Some(sub_root) = self.sub_root_body else {
            return;
        };

        let sub_body = &bodies[sub_root];
        let sub_root_position = match sub_body.attached_effector() {
            Some(e) => effectors[e].position,
            None => sub_body.position,
        };
        let sub_root_bone = sub_body.bone;

        let Some(percent) = self.squash_percent(sub_root_position, config) else {
            return;
        };

        let mut next = bones.parent_of(self.bone);
        while let Some(i) = next {
            let bone = &bones[i];
            if !bone.is_solved() {
                break;
            }
            if let Some(body) = bone.body_id() {
                bodies[body].blend_to_preferred_angles(percent);
            }
            if i == sub_root_bone {
                break;
            }
            next = bone.parent_id();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effector_at(position: Vec3) -> Effector {
        Effector::new(0, position, Quat::IDENTITY)
    }

    #[test]
    fn test_new_effector_holds_current_pose() {
        let mut e = effector_at(Vec3::new(1.0, 2.0, 3.0));
        e.update_from_inputs();
        assert_eq!(e.position(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(e.rotation(), Quat::IDENTITY);
        assert_eq!(e.strength_alpha(), 1.0);
    }

    #[test]
    fn test_blend_endpoints_are_exact() {
        let start = (Vec3::new(0.0, 200.0, 0.0), Quat::IDENTITY);
        let goal_rot = Quat::from_rotation_x(1.0);
        let mut e = effector_at(start.0);

        e.set_goal(start, Vec3::new(0.0, 150.0, 0.0), goal_rot, 0.0, 1.0);
        e.update_from_inputs();
        assert_eq!(e.position(), start.0);
        assert_eq!(e.rotation(), start.1);

        e.set_goal(start, Vec3::new(0.0, 150.0, 0.0), goal_rot, 1.0, 1.0);
        assert_eq!(e.goal_position(), Vec3::new(0.0, 150.0, 0.0));
        assert_eq!(e.goal_rotation(), goal_rot);
        e.update_from_inputs();
        assert_eq!(e.position(), Vec3::new(0.0, 150.0, 0.0));
        assert_eq!(e.rotation(), goal_rot);

        // 超出范围的系数被截断
        e.set_goal(start, Vec3::new(0.0, 150.0, 0.0), goal_rot, 3.0, 1.0);
        e.update_from_inputs();
        assert_eq!(e.position(), Vec3::new(0.0, 150.0, 0.0));
    }

    #[test]
    fn test_blend_halfway() {
        let start = (Vec3::ZERO, Quat::IDENTITY);
        let mut e = effector_at(Vec3::ZERO);
        e.set_goal(start, Vec3::new(10.0, 0.0, 0.0), Quat::from_rotation_z(1.0), 0.5, 1.0);
        e.update_from_inputs();
        assert!((e.position() - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-5);
        assert!(e.rotation().dot(Quat::from_rotation_z(0.5)).abs() > 0.9999);
    }

    #[test]
    fn test_squash_percent_policy() {
        let config = SolverConfig::default();
        let mut e = effector_at(Vec3::new(0.0, 100.0, 0.0));
        e.distance_to_sub_root_orig = 100.0;

        // 未压缩
        assert_eq!(e.squash_percent(Vec3::ZERO, &config), None);

        // 压缩 15，阈值 30 -> 50%
        e.position = Vec3::new(0.0, 85.0, 0.0);
        let pct = e.squash_percent(Vec3::ZERO, &config).unwrap();
        assert!((pct - 0.5).abs() < 1e-5);

        // 超过阈值时截断为 100%
        e.position = Vec3::new(0.0, 10.0, 0.0);
        let pct = e.squash_percent(Vec3::ZERO, &config).unwrap();
        assert!((pct - 1.0).abs() < 1e-6);

        // 低于 1% 不生效
        e.position = Vec3::new(0.0, 99.9, 0.0);
        assert_eq!(e.squash_percent(Vec3::ZERO, &config), None);

        // 没有原始距离
        e.distance_to_sub_root_orig = 0.0;
        assert_eq!(e.squash_percent(Vec3::ZERO, &config), None);
    }
}
