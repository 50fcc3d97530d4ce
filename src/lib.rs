//! PBIK 引擎 - 基于位置的全身 IK 求解器
//!
//! 模块划分：
//! - skeleton: 骨骼层次（BoneLink / BoneSet），负责拓扑初始化与非求解骨骼的传播
//! - physics: 刚体、效应器、约束以及求解器本体（PbikSolver）
//!
//! 典型用法（每帧）：
//! 1. `set_bone_transform` 写入当前动画姿态
//! 2. `set_effector_goal` 设置效应器目标
//! 3. `solve` 迭代求解
//! 4. `bone_global_transform` 读回结果

pub mod physics;
pub mod skeleton;

pub use physics::{
    AxisLimit, BoneSettings, Constraint, DebugLine, Effector, JointConstraint, LimitType,
    PbikSolver, PinConstraint, RigidBody, SolverConfig, SolverSettings,
};
pub use skeleton::{BoneFlags, BoneLink, BoneSet, BoneTransform};

use thiserror::Error;

/// 求解器配置错误
///
/// 只会在初始化阶段产生；运行期的数值退化一律静默跳过。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PbikError {
    #[error("no bones added to solver")]
    NoBones,

    #[error("no effectors added to solver")]
    NoEffectors,

    #[error("solver root bone not set")]
    MissingSolverRoot,

    #[error("{count} bones were marked as solver root, expected exactly 1")]
    MultipleSolverRoots { count: usize },

    #[error("bone '{bone}' has invalid parent index {parent_index}")]
    InvalidParentIndex { bone: String, parent_index: i32 },

    #[error("effector bone '{bone}' is not on or below the solver root")]
    EffectorNotBelowRoot { bone: String },

    #[error("unknown bone '{name}'")]
    UnknownBone { name: String },
}

pub type Result<T> = std::result::Result<T, PbikError>;
