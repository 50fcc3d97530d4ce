//! 求解器物理层
//!
//! 流程：PbikSolver::initialize（建立刚体与约束）→ 每帧 solve [采样输入 → 迭代约束 → 写回骨骼]

mod config;
mod constraint;
mod debug;
mod effector;
mod pbik_solver;
mod rigid_body;

pub use config::{SolverConfig, SolverSettings};
pub use constraint::{Constraint, JointConstraint, PinConstraint};
pub use debug::DebugLine;
pub use effector::Effector;
pub use pbik_solver::PbikSolver;
pub use rigid_body::{AxisLimit, BoneSettings, LimitType, RigidBody};
