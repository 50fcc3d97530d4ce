//! 基于位置的全身 IK 求解器
//!
//! 流程：add_bone / add_effector → initialize（惰性）→ 每帧 [set_bone_transform → set_effector_goal → solve]
//!
//! 骨骼、刚体、效应器、约束都存放在各自的数组中，互相之间只保存索引。
//! reset 之后所有外部持有的索引失效。

use glam::{Quat, Vec3};

use super::config::{SolverConfig, SolverSettings};
use super::constraint::{Constraint, JointConstraint, PinConstraint};
use super::debug::{self, DebugLine};
use super::effector::Effector;
use super::rigid_body::{BoneSettings, RigidBody};
use crate::skeleton::{BoneLink, BoneSet, BoneTransform};
use crate::{PbikError, Result};

/// 全身 IK 求解器
pub struct PbikSolver {
    config: SolverConfig,
    bones: BoneSet,
    /// 按到求解根的距离升序排列（根在前）
    bodies: Vec<RigidBody>,
    effectors: Vec<Effector>,
    /// 顺序：效应器钉住约束 → 根钉住约束 → 关节（根到叶）
    constraints: Vec<Constraint>,
    /// 根钉住约束索引（求解根已被效应器钉住时为 None）
    root_pin: Option<usize>,
    /// 效应器写回顺序（按骨骼层级深度）
    effector_write_order: Vec<usize>,
    ready: bool,
}

impl Default for PbikSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PbikSolver {
    pub fn new() -> Self {
        Self::with_config(SolverConfig::default())
    }

    pub fn with_config(config: SolverConfig) -> Self {
        Self {
            config,
            bones: BoneSet::new(),
            bodies: Vec::new(),
            effectors: Vec::new(),
            constraints: Vec::new(),
            root_pin: None,
            effector_write_order: Vec::new(),
            ready: false,
        }
    }

    // ========================================
    // 构建
    // ========================================

    /// 注册骨骼，返回骨骼索引
    ///
    /// `parent_index` 为 -1 表示骨架根。初始化之后再添加会使求解器回到未就绪状态。
    pub fn add_bone(
        &mut self,
        name: impl Into<String>,
        parent_index: i32,
        position: Vec3,
        rotation: Quat,
        is_solver_root: bool,
    ) -> usize {
        self.ready = false;
        self.bones
            .add_bone(BoneLink::with_pose(name, parent_index, position, rotation, is_solver_root))
    }

    /// 在指定名称的骨骼上添加效应器，找不到骨骼时返回 None 且不修改效应器列表
    pub fn add_effector(&mut self, bone_name: &str) -> Option<usize> {
        match self.try_add_effector(bone_name) {
            Ok(index) => Some(index),
            Err(e) => {
                log::warn!("[PBIK] 添加效应器失败: {}", e);
                None
            }
        }
    }

    pub fn try_add_effector(&mut self, bone_name: &str) -> Result<usize> {
        let bone = self
            .bones
            .find_by_name(bone_name)
            .ok_or_else(|| PbikError::UnknownBone { name: bone_name.to_string() })?;

        let link = &self.bones[bone];
        self.effectors.push(Effector::new(bone, link.position, link.rotation));
        self.ready = false;
        Ok(self.effectors.len() - 1)
    }

    /// 初始化（幂等），失败时记录警告并返回 false
    pub fn initialize(&mut self) -> bool {
        match self.try_initialize() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[PBIK] 初始化失败: {}", e);
                false
            }
        }
    }

    /// 初始化：骨骼拓扑 → 刚体 → 效应器链接 → 约束
    pub fn try_initialize(&mut self) -> Result<()> {
        if self.ready {
            return Ok(());
        }

        let result = self.build();
        if result.is_err() {
            self.clear_solver_state();
            return result;
        }

        self.ready = true;
        log::info!(
            "[PBIK] 初始化完成: {} 骨骼, {} 刚体, {} 效应器, {} 约束",
            self.bones.len(),
            self.bodies.len(),
            self.effectors.len(),
            self.constraints.len()
        );
        Ok(())
    }

    fn build(&mut self) -> Result<()> {
        let effector_bones: Vec<usize> = self.effectors.iter().map(|e| e.bone).collect();
        self.bones.init_topology(&effector_bones)?;
        self.init_bodies()?;

        for effector in &mut self.effectors {
            effector.link_sub_root(&self.bones, &self.bodies);
        }

        self.init_constraints()?;

        let mut order: Vec<usize> = (0..self.effectors.len()).collect();
        order.sort_by_key(|&e| self.bones[self.effectors[e].bone].depth);
        self.effector_write_order = order;
        Ok(())
    }

    /// 从每个效应器向上建立刚体（去重），按到根的距离排序后回写到骨骼
    fn init_bodies(&mut self) -> Result<()> {
        let root = self.bones.solver_root().ok_or(PbikError::MissingSolverRoot)?;

        // 重新初始化时保留宿主已经设置的关节参数
        let previous: Vec<(usize, BoneSettings)> =
            self.bodies.iter().map(|b| (b.bone, b.settings)).collect();
        self.bodies.clear();

        let mut body_bones: Vec<usize> = Vec::new();
        for effector in &self.effectors {
            let mut bone = effector.bone;
            loop {
                let body_bone = self.bones.body_bone_for(bone).ok_or_else(|| {
                    PbikError::EffectorNotBelowRoot { bone: self.bones[effector.bone].name.clone() }
                })?;
                if !body_bones.contains(&body_bone) {
                    body_bones.push(body_bone);
                }
                if body_bone == root {
                    break;
                }
                bone = body_bone;
            }
        }

        for bone in body_bones {
            let mut body = RigidBody::new(bone);
            body.initialize(&self.bones);
            if let Some((_, settings)) = previous.iter().find(|(b, _)| *b == bone) {
                body.settings = *settings;
            }
            self.bodies.push(body);
        }

        // 稳定排序：根在前
        self.bodies.sort_by_key(|b| b.num_bones_to_root());
        for (index, body) in self.bodies.iter().enumerate() {
            self.bones[body.bone].body = Some(index);
        }

        log::debug!("[PBIK] 刚体: {}", self.bodies.len());
        Ok(())
    }

    fn init_constraints(&mut self) -> Result<()> {
        let root = self.bones.solver_root().ok_or(PbikError::MissingSolverRoot)?;
        self.constraints.clear();
        self.root_pin = None;

        // 效应器钉住约束
        for (index, effector) in self.effectors.iter_mut().enumerate() {
            let body = self
                .bones
                .body_bone_for(effector.bone)
                .and_then(|b| self.bones[b].body_id())
                .ok_or_else(|| PbikError::EffectorNotBelowRoot {
                    bone: self.bones[effector.bone].name.clone(),
                })?;

            let point = self.bones[effector.bone].position;
            self.constraints
                .push(Constraint::Pin(PinConstraint::new(&self.bodies, body, point)));
            effector.pin = Some(self.constraints.len() - 1);
            self.bodies[body].attached_effector = Some(index);
        }

        // 根钉住约束（根刚体未被效应器钉住时）
        if let Some(root_body) = self.bones[root].body_id() {
            if self.bodies[root_body].attached_effector().is_none() {
                let point = self.bones[root].position;
                self.constraints
                    .push(Constraint::Pin(PinConstraint::new(&self.bodies, root_body, point)));
                self.root_pin = Some(self.constraints.len() - 1);
            }
        }

        // 关节：父刚体 → 子刚体，根到叶
        for child in 0..self.bodies.len() {
            let bone = self.bodies[child].bone;
            if bone == root {
                continue;
            }
            let Some(parent_body) = self.bones.parent_of(bone).and_then(|p| self.bones[p].body_id())
            else {
                continue;
            };
            self.constraints
                .push(Constraint::Joint(JointConstraint::new(&self.bodies, parent_body, child)));
        }
        Ok(())
    }

    /// 清空求解数据并回到未初始化状态
    pub fn reset(&mut self) {
        self.bones.clear();
        self.effectors.clear();
        self.clear_solver_state();
        log::debug!("[PBIK] 求解器已重置");
    }

    fn clear_solver_state(&mut self) {
        self.bodies.clear();
        self.constraints.clear();
        self.root_pin = None;
        self.effector_write_order.clear();
        self.ready = false;
    }

    #[inline]
    pub fn is_ready_to_simulate(&self) -> bool {
        self.ready
    }

    // ========================================
    // 每帧输入
    // ========================================

    /// 写入骨骼当前（动画）变换
    pub fn set_bone_transform(&mut self, index: usize, transform: BoneTransform) {
        assert!(
            index < self.bones.len(),
            "bone index {} out of range ({} bones)",
            index,
            self.bones.len()
        );
        let bone = &mut self.bones[index];
        bone.position = transform.translation;
        bone.rotation = transform.rotation;
    }

    /// 设置效应器目标；以骨骼此刻的变换作为混合起点
    pub fn set_effector_goal(
        &mut self,
        index: usize,
        position: Vec3,
        rotation: Quat,
        transform_alpha: f32,
        strength_alpha: f32,
    ) {
        assert!(
            index < self.effectors.len(),
            "effector index {} out of range ({} effectors)",
            index,
            self.effectors.len()
        );
        let effector = &mut self.effectors[index];
        let bone = &self.bones[effector.bone];
        effector.set_goal(
            (bone.position, bone.rotation),
            position,
            rotation,
            transform_alpha,
            strength_alpha,
        );
    }

    /// 获取骨骼关节设置（仅承载刚体的被求解骨骼有）
    pub fn bone_settings_mut(&mut self, index: usize) -> Option<&mut BoneSettings> {
        if !self.ready {
            log::warn!("[PBIK] 求解器未初始化，无法获取骨骼设置");
            return None;
        }
        let Some(bone) = self.bones.get(index) else {
            log::warn!("[PBIK] 骨骼索引 {} 越界", index);
            return None;
        };
        let Some(body) = bone.body_id() else {
            log::warn!("[PBIK] 骨骼 '{}' 没有对应刚体，无法设置", bone.name);
            return None;
        };
        Some(&mut self.bodies[body].settings)
    }

    // ========================================
    // 求解
    // ========================================

    /// 求解一帧；未就绪时先尝试初始化，失败则不修改任何骨骼
    pub fn solve(&mut self, settings: &SolverSettings) {
        if !self.initialize() {
            return;
        }

        self.update_from_inputs(settings);
        self.squash_sub_roots();

        self.solve_constraints(settings.iterations, true);
        if !settings.allow_stretch {
            self.remove_stretch();
            self.squash_sub_roots();
            self.solve_constraints(settings.iterations, false);
            self.remove_stretch();
        }

        self.write_back();
    }

    /// 采样输入：本地偏移、刚体、根钉住、效应器
    fn update_from_inputs(&mut self, settings: &SolverSettings) {
        self.bones.update_local_transforms();

        for body in &mut self.bodies {
            body.update_from_inputs(&self.bones, settings, &self.config);
        }

        if let Some(index) = self.root_pin {
            let root_position = self
                .bones
                .solver_root()
                .map(|r| self.bones[r].position)
                .unwrap_or(Vec3::ZERO);
            if let Some(pin) = self.constraints[index].as_pin_mut() {
                pin.enabled = settings.pin_root;
                pin.goal = root_position;
                let body = pin.body;
                self.bodies[body].root_pinned = settings.pin_root;
            }
        }

        for effector in &mut self.effectors {
            effector.update_from_inputs();
            let Some(index) = effector.pin else {
                continue;
            };
            let Some(pin) = self.constraints[index].as_pin_mut() else {
                continue;
            };
            pin.goal = effector.position();
            pin.alpha = effector.strength_alpha();
        }
    }

    fn squash_sub_roots(&mut self) {
        for effector in &self.effectors {
            effector.squash_sub_roots(&self.bones, &mut self.bodies, &self.effectors, &self.config);
        }
    }

    fn solve_constraints(&mut self, iterations: u32, move_sub_roots: bool) {
        for _ in 0..iterations {
            for constraint in &self.constraints {
                constraint.solve(&mut self.bodies, move_sub_roots);
            }
        }
    }

    /// 根到叶消除关节拉伸
    fn remove_stretch(&mut self) {
        for constraint in &self.constraints {
            constraint.remove_stretch(&mut self.bodies);
        }
    }

    /// 结果写回：刚体骨骼 → 效应器骨骼 → 未求解骨骼
    fn write_back(&mut self) {
        for body in &self.bodies {
            let bone = &mut self.bones[body.bone];
            bone.position = body.bone_position();
            bone.rotation = body.rotation;
        }

        let root = self.bones.solver_root();
        for &index in &self.effector_write_order {
            let effector = &self.effectors[index];
            if Some(effector.bone) == root {
                continue;
            }
            let Some(position) = self.bones.position_from_parent(effector.bone) else {
                continue;
            };
            let bone = &mut self.bones[effector.bone];
            bone.position = position;
            bone.rotation = effector.rotation();
        }

        self.bones.propagate_unsolved();
    }

    // ========================================
    // 查询
    // ========================================

    /// 骨骼当前世界变换
    pub fn bone_global_transform(&self, index: usize) -> BoneTransform {
        assert!(
            index < self.bones.len(),
            "bone index {} out of range ({} bones)",
            index,
            self.bones.len()
        );
        let bone = &self.bones[index];
        BoneTransform::new(bone.position, bone.rotation)
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones.find_by_name(name)
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn effector_count(&self) -> usize {
        self.effectors.len()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    pub fn bones(&self) -> &BoneSet {
        &self.bones
    }

    pub fn bodies(&self) -> &[RigidBody] {
        &self.bodies
    }

    pub fn effector(&self, index: usize) -> Option<&Effector> {
        self.effectors.get(index)
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// 调试线段（单子骨骼刚体）
    pub fn debug_lines(&self) -> Vec<DebugLine> {
        debug::body_lines(&self.bodies)
    }
}
