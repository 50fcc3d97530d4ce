//! 骨骼系统
//!
//! 核心设计思想：
//! - BoneLink: 单个骨骼节点，父子关系用索引表示
//! - BoneSet: 扁平骨骼数组 + 一次性拓扑推导（求解根、求解集、子根）

mod bone_link;
mod bone_set;

pub use bone_link::{BoneFlags, BoneLink, PARENT_NONE, PARENT_UNSET};
pub use bone_set::BoneSet;

use glam::{Mat4, Quat, Vec3};

// ============================================================================
// 公共类型定义
// ============================================================================

/// 骨骼变换数据（世界空间，无缩放）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneTransform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl BoneTransform {
    #[inline]
    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self { translation, rotation }
    }

    /// 转换为 4x4 矩阵
    #[inline]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }

    /// 从矩阵分解（缩放被丢弃）
    #[inline]
    pub fn from_matrix(m: Mat4) -> Self {
        let (_scale, rotation, translation) = m.to_scale_rotation_translation();
        Self { translation, rotation }
    }
}
