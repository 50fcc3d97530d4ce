//! 骨骼节点
//!
//! BoneLink 是骨骼系统的核心单元，代表骨骼层次中的一个节点。
//! 父子关系、刚体归属全部使用索引表示，由 BoneSet / PbikSolver 持有的数组解析。

use bitflags::bitflags;
use glam::{Quat, Vec3};

/// 父索引：整个骨架的根
pub const PARENT_NONE: i32 = -1;
/// 父索引：尚未注册
pub const PARENT_UNSET: i32 = -2;

// ============================================================================
// 骨骼标志
// ============================================================================

bitflags! {
    /// 骨骼标志位
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BoneFlags: u32 {
        /// 求解根（整个求解器有且仅有一个）
        const SOLVER_ROOT = 1 << 0;
        /// 位于某个效应器到求解根的路径上
        const SOLVED = 1 << 1;
        /// 分叉点：求解根，或拥有多个被求解子骨骼
        const SUB_ROOT = 1 << 2;
    }
}

// ============================================================================
// 骨骼节点
// ============================================================================

/// 骨骼节点
///
/// 设计原则：
/// - 静态数据：名称、父索引、求解根标志（注册后不变）
/// - 拓扑数据：parent / children / body，由 `BoneSet::init_topology` 推导
/// - 动态数据：世界空间位置/旋转，以及每次求解开始时采样的本地偏移
#[derive(Clone, Debug)]
pub struct BoneLink {
    // ========================================
    // 静态数据
    // ========================================

    /// 骨骼名称
    pub name: String,

    /// 父骨骼索引 (-1 表示骨架根, -2 表示未设置)
    pub parent_index: i32,

    /// 骨骼标志
    pub flags: BoneFlags,

    // ========================================
    // 动态数据
    // ========================================

    /// 世界位置
    pub position: Vec3,

    /// 世界旋转
    pub rotation: Quat,

    /// 相对父骨骼的位置（求解开始时采样）
    pub local_position_orig: Vec3,

    /// 相对父骨骼的旋转（求解开始时采样）
    pub local_rotation_orig: Quat,

    // ========================================
    // 拓扑数据（初始化前为空）
    // ========================================

    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
    pub(crate) body: Option<usize>,
    pub(crate) depth: usize,
}

impl BoneLink {
    /// 创建新骨骼
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_index: PARENT_UNSET,
            flags: BoneFlags::empty(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            local_position_orig: Vec3::ZERO,
            local_rotation_orig: Quat::IDENTITY,
            parent: None,
            children: Vec::new(),
            body: None,
            depth: 0,
        }
    }

    /// 使用完整参数创建骨骼
    pub fn with_pose(
        name: impl Into<String>,
        parent_index: i32,
        position: Vec3,
        rotation: Quat,
        is_solver_root: bool,
    ) -> Self {
        let mut bone = Self::new(name);
        bone.parent_index = parent_index;
        bone.position = position;
        bone.rotation = rotation;
        bone.flags.set(BoneFlags::SOLVER_ROOT, is_solver_root);
        bone
    }

    // ========================================
    // 访问器
    // ========================================

    /// 父骨骼索引（初始化后有效）
    #[inline]
    pub fn parent_id(&self) -> Option<usize> {
        self.parent
    }

    /// 被求解的子骨骼索引（初始化后有效）
    #[inline]
    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// 对应刚体索引，仅被求解且承载刚体的骨骼才有
    #[inline]
    pub fn body_id(&self) -> Option<usize> {
        self.body
    }

    /// 按名称查找被求解的子骨骼
    ///
    /// 子骨骼列表只保存索引，`bones` 为完整骨骼数组。
    pub fn has_child(&self, name: &str, bones: &[BoneLink]) -> bool {
        self.children
            .iter()
            .filter_map(|&c| bones.get(c))
            .any(|child| child.name == name)
    }

    // ========================================
    // 标志检查方法
    // ========================================

    #[inline]
    pub fn is_solver_root(&self) -> bool {
        self.flags.contains(BoneFlags::SOLVER_ROOT)
    }

    #[inline]
    pub fn is_solved(&self) -> bool {
        self.flags.contains(BoneFlags::SOLVED)
    }

    #[inline]
    pub fn is_sub_root(&self) -> bool {
        self.flags.contains(BoneFlags::SUB_ROOT)
    }

    /// 清除所有由拓扑推导得到的状态
    pub(crate) fn clear_topology(&mut self) {
        self.flags.remove(BoneFlags::SOLVED | BoneFlags::SUB_ROOT);
        self.parent = None;
        self.children.clear();
        self.body = None;
        self.depth = 0;
    }
}

impl Default for BoneLink {
    fn default() -> Self {
        Self::new(String::new())
    }
}
