//! 调试绘制数据（只读）

use glam::Vec3;

use super::rigid_body::RigidBody;

/// 世界空间线段
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DebugLine {
    pub start: Vec3,
    pub end: Vec3,
}

/// 单子骨骼刚体：骨骼锚点 -> 子骨骼锚点
pub(crate) fn body_lines(bodies: &[RigidBody]) -> Vec<DebugLine> {
    bodies
        .iter()
        .filter_map(|body| match body.child_local_positions.as_slice() {
            [child] => Some(DebugLine {
                start: body.position + body.rotation * body.bone_local_position,
                end: body.position + body.rotation * *child,
            }),
            _ => None,
        })
        .collect()
}
