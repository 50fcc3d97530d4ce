//! 求解刚体
//!
//! 每个被求解且承载子骨骼的骨骼对应一个刚体。刚体位于骨骼与其被求解子骨骼的质心，
//! 所有偏移都保存在刚体自身的旋转坐标系中。

use glam::{EulerRot, Quat, Vec3};

use super::config::{SolverConfig, SolverSettings};
use crate::skeleton::BoneSet;

// ============================================================================
// 关节设置
// ============================================================================

/// 单轴限制类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LimitType {
    #[default]
    Free,
    Limited,
    Locked,
}

/// 单轴角度限制（角度制）
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AxisLimit {
    pub kind: LimitType,
    /// 下限，范围 [-180, 0]
    pub min: f32,
    /// 上限，范围 [0, 180]
    pub max: f32,
}

impl AxisLimit {
    pub const FREE: Self = Self { kind: LimitType::Free, min: 0.0, max: 0.0 };
    pub const LOCKED: Self = Self { kind: LimitType::Locked, min: 0.0, max: 0.0 };

    pub fn limited(min: f32, max: f32) -> Self {
        Self { kind: LimitType::Limited, min, max }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.kind == LimitType::Free
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.kind == LimitType::Locked
    }

    /// 实际生效的角度区间；锁定轴为 [0, 0]，自由轴为 None
    pub fn range(&self) -> Option<(f32, f32)> {
        match self.kind {
            LimitType::Free => None,
            LimitType::Locked => Some((0.0, 0.0)),
            LimitType::Limited => {
                let min = self.min.clamp(-180.0, 0.0);
                let max = self.max.clamp(0.0, 180.0);
                Some((min, max))
            }
        }
    }
}

/// 每个刚体的关节设置（通过骨骼索引访问）
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoneSettings {
    /// 旋转刚度 [0, 1]，1 表示不可被约束旋转
    pub rotation_stiffness: f32,
    /// 位置刚度 [0, 1]，1 表示不可被约束平移
    pub position_stiffness: f32,

    pub x: AxisLimit,
    pub y: AxisLimit,
    pub z: AxisLimit,

    /// 偏好角（角度制，绕本地 X/Y/Z，按 XYZ 顺序合成）
    /// 肢体被压缩时按压缩比例混合到该旋转
    pub preferred_angles: Option<Vec3>,
}

impl BoneSettings {
    #[inline]
    pub fn rotation_stiffness(&self) -> f32 {
        self.rotation_stiffness.clamp(0.0, 1.0)
    }

    #[inline]
    pub fn position_stiffness(&self) -> f32 {
        self.position_stiffness.clamp(0.0, 1.0)
    }

    pub fn all_free(&self) -> bool {
        self.x.is_free() && self.y.is_free() && self.z.is_free()
    }

    pub fn all_locked(&self) -> bool {
        self.x.is_locked() && self.y.is_locked() && self.z.is_locked()
    }

    /// 偏好角对应的旋转
    pub fn preferred_rotation(&self) -> Option<Quat> {
        self.preferred_angles.map(|a| {
            Quat::from_euler(
                EulerRot::XYZ,
                a.x.to_radians(),
                a.y.to_radians(),
                a.z.to_radians(),
            )
        })
    }
}

// ============================================================================
// 刚体
// ============================================================================

/// 求解刚体
#[derive(Clone, Debug)]
pub struct RigidBody {
    /// 所属骨骼索引
    pub bone: usize,
    /// 关节设置
    pub settings: BoneSettings,

    /// 质心位置
    pub position: Vec3,
    /// 当前旋转
    pub rotation: Quat,
    /// 初始化时的旋转（关节限制的参考）
    pub rotation_orig: Quat,
    /// 骨骼相对质心的偏移（刚体坐标系）
    pub bone_local_position: Vec3,
    /// 每个被求解子骨骼相对质心的偏移（刚体坐标系）
    pub child_local_positions: Vec<Vec3>,

    /// 逆质量（每帧由长度和设置重新计算）
    pub inv_mass: f32,
    /// 到所有被求解子骨骼的距离之和，作为质量近似
    pub length: f32,

    /// 挂载的效应器（该刚体被效应器钉住，约束不能平移它）
    pub(crate) attached_effector: Option<usize>,
    /// 被启用的根钉住
    pub(crate) root_pinned: bool,
    pub(crate) is_sub_root: bool,
    num_bones_to_root: usize,
}

impl RigidBody {
    pub fn new(bone: usize) -> Self {
        Self {
            bone,
            settings: BoneSettings::default(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            rotation_orig: Quat::IDENTITY,
            bone_local_position: Vec3::ZERO,
            child_local_positions: Vec::new(),
            inv_mass: 0.0,
            length: 0.0,
            attached_effector: None,
            root_pinned: false,
            is_sub_root: false,
            num_bones_to_root: 0,
        }
    }

    /// 由骨骼及其被求解子骨骼的当前姿态初始化
    pub fn initialize(&mut self, bones: &BoneSet) {
        let bone = &bones[self.bone];

        let mut centroid = bone.position;
        self.length = 0.0;
        for &child in bone.children() {
            centroid += bones[child].position;
            self.length += (bone.position - bones[child].position).length();
        }
        centroid /= bone.children().len() as f32 + 1.0;

        self.position = centroid;
        self.rotation = bone.rotation;
        self.rotation_orig = bone.rotation;

        let inv = self.rotation.inverse();
        self.bone_local_position = inv * (bone.position - centroid);
        self.child_local_positions = bone
            .children()
            .iter()
            .map(|&child| inv * (bones[child].position - centroid))
            .collect();

        self.is_sub_root = bone.is_sub_root();
        self.num_bones_to_root = bones.num_bones_to_root(self.bone);
        self.attached_effector = None;
        self.root_pinned = false;
    }

    /// 从输入姿态刷新（每次求解开始时调用）
    pub fn update_from_inputs(
        &mut self,
        bones: &BoneSet,
        settings: &SolverSettings,
        config: &SolverConfig,
    ) {
        let bone = &bones[self.bone];
        self.position = bone.position - bone.rotation * self.bone_local_position;
        self.rotation = bone.rotation;
        self.inv_mass = config.inverse_mass(self.length, settings.mass_multiplier);
    }

    /// 到求解根的骨骼数（用于排序）
    #[inline]
    pub fn num_bones_to_root(&self) -> usize {
        self.num_bones_to_root
    }

    #[inline]
    pub fn attached_effector(&self) -> Option<usize> {
        self.attached_effector
    }

    /// 被效应器或根钉住时，约束不能平移该刚体
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.attached_effector.is_some() || self.root_pinned
    }

    /// 骨骼当前世界位置
    #[inline]
    pub fn bone_position(&self) -> Vec3 {
        self.position + self.rotation * self.bone_local_position
    }

    // ========================================
    // 修正原语
    // ========================================

    /// 在偏移点施加推力，转换为旋转增量
    ///
    /// omega = inv_mass * (1 - rotation_stiffness) * (offset x push)
    /// q' = normalize(q + 0.5 * [omega, 0] * q)
    pub fn apply_push_to_rotate_body(&mut self, push: Vec3, offset: Vec3) {
        let omega = self.inv_mass * (1.0 - self.settings.rotation_stiffness()) * offset.cross(push);
        if omega.length_squared() < 1e-16 {
            return;
        }
        let spin = Quat::from_xyzw(omega.x, omega.y, omega.z, 0.0) * self.rotation;
        self.rotation = (self.rotation + spin * 0.5).normalize();
    }

    /// 平移推力（被钉住时无效）
    pub fn apply_push_to_position(&mut self, push: Vec3) {
        if self.is_pinned() {
            return;
        }
        self.position += push * (1.0 - self.settings.position_stiffness());
    }

    /// 向偏好角混合 `percent`（0..1）
    pub fn blend_to_preferred_angles(&mut self, percent: f32) {
        let Some(preferred) = self.settings.preferred_rotation() else {
            return;
        };
        let partial = Quat::IDENTITY.slerp(preferred, percent.clamp(0.0, 1.0));
        self.rotation = (self.rotation * partial).normalize();
    }
}
