//! 骨骼集合 - 扁平数组 + 拓扑推导
//!
//! 骨骼以注册顺序存放，父子关系使用索引。
//! `init_topology` 一次性推导：求解根、父索引、求解集、子骨骼列表、子根标志、层级顺序。

use std::ops::{Index, IndexMut};

use glam::{Quat, Vec3};

use super::bone_link::{BoneFlags, BoneLink, PARENT_NONE};
use crate::{PbikError, Result};

/// 骨骼集合
#[derive(Clone, Debug, Default)]
pub struct BoneSet {
    bones: Vec<BoneLink>,
    /// 求解根索引（初始化后有效）
    solver_root: Option<usize>,
    /// 按层级深度排序的骨骼索引（父骨骼总在子骨骼之前）
    hierarchy_order: Vec<usize>,
}

impl BoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册骨骼，返回其索引
    pub fn add_bone(&mut self, bone: BoneLink) -> usize {
        self.bones.push(bone);
        self.bones.len() - 1
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&BoneLink> {
        self.bones.get(index)
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut BoneLink> {
        self.bones.get_mut(index)
    }

    #[inline]
    pub fn bones(&self) -> &[BoneLink] {
        &self.bones
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BoneLink> {
        self.bones.iter()
    }

    /// 按名称查找骨骼（返回第一个匹配）
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    #[inline]
    pub fn solver_root(&self) -> Option<usize> {
        self.solver_root
    }

    #[inline]
    pub fn hierarchy_order(&self) -> &[usize] {
        &self.hierarchy_order
    }

    /// 父骨骼索引（初始化后有效）
    #[inline]
    pub fn parent_of(&self, index: usize) -> Option<usize> {
        self.bones.get(index).and_then(|b| b.parent)
    }

    /// 清空所有骨骼
    pub fn clear(&mut self) {
        self.bones.clear();
        self.solver_root = None;
        self.hierarchy_order.clear();
    }

    // ========================================
    // 拓扑初始化
    // ========================================

    /// 推导骨骼拓扑
    ///
    /// 每次调用都会从头重建，因此重复调用结果一致。
    /// 失败时拓扑状态不完整，调用方不得将其视为可求解。
    pub fn init_topology(&mut self, effector_bones: &[usize]) -> Result<()> {
        if self.bones.is_empty() {
            return Err(PbikError::NoBones);
        }
        if effector_bones.is_empty() {
            return Err(PbikError::NoEffectors);
        }

        self.solver_root = None;
        self.hierarchy_order.clear();
        for bone in &mut self.bones {
            bone.clear_topology();
        }

        // 第一步：唯一的求解根
        let roots: Vec<usize> = self
            .bones
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_solver_root())
            .map(|(i, _)| i)
            .collect();
        let root = match roots.as_slice() {
            [] => return Err(PbikError::MissingSolverRoot),
            [root] => *root,
            _ => return Err(PbikError::MultipleSolverRoots { count: roots.len() }),
        };

        // 第二步：父索引
        let count = self.bones.len();
        for i in 0..count {
            let parent_index = self.bones[i].parent_index;
            if parent_index == PARENT_NONE {
                continue;
            }
            let in_range = parent_index >= 0 && (parent_index as usize) < count;
            if !in_range || parent_index as usize == i {
                return Err(PbikError::InvalidParentIndex {
                    bone: self.bones[i].name.clone(),
                    parent_index,
                });
            }
            self.bones[i].parent = Some(parent_index as usize);
        }

        // 第三步：层级深度（同时检测父子环）
        for i in 0..count {
            let mut depth = 0;
            let mut next = self.bones[i].parent;
            while let Some(p) = next {
                depth += 1;
                if depth > count {
                    return Err(PbikError::InvalidParentIndex {
                        bone: self.bones[i].name.clone(),
                        parent_index: self.bones[i].parent_index,
                    });
                }
                next = self.bones[p].parent;
            }
            self.bones[i].depth = depth;
        }
        self.hierarchy_order = (0..count).collect();
        self.hierarchy_order.sort_by_key(|&i| self.bones[i].depth);

        // 第四步：从每个效应器向上走到求解根，标记求解集
        for &effector_bone in effector_bones {
            let mut next = Some(effector_bone);
            loop {
                let Some(i) = next else {
                    return Err(PbikError::EffectorNotBelowRoot {
                        bone: self.bones[effector_bone].name.clone(),
                    });
                };
                self.bones[i].flags.insert(BoneFlags::SOLVED);
                if i == root {
                    break;
                }
                next = self.bones[i].parent;
            }
        }

        // 第五步：子骨骼列表（仅被求解的父子对）
        for i in 0..count {
            if !self.bones[i].is_solved() || i == root {
                continue;
            }
            if let Some(p) = self.bones[i].parent {
                self.bones[p].children.push(i);
            }
        }

        // 第六步：子根标志
        for (i, bone) in self.bones.iter_mut().enumerate() {
            let is_sub_root = i == root || (bone.is_solved() && bone.children.len() > 1);
            bone.flags.set(BoneFlags::SUB_ROOT, is_sub_root);
        }

        self.solver_root = Some(root);

        log::debug!(
            "[PBIK] 骨骼拓扑: 求解根='{}', {} 求解骨骼, {} 子根",
            self.bones[root].name,
            self.bones.iter().filter(|b| b.is_solved()).count(),
            self.bones.iter().filter(|b| b.is_sub_root()).count(),
        );

        Ok(())
    }

    /// 骨骼到求解根之间的骨骼数（根自身为 0）
    pub fn num_bones_to_root(&self, index: usize) -> usize {
        let mut count = 0;
        let mut next = Some(index);
        while let Some(i) = next {
            if Some(i) == self.solver_root {
                break;
            }
            count += 1;
            next = self.bones[i].parent;
        }
        count
    }

    /// 承载该骨骼运动的刚体所属骨骼：求解根为自身，否则为父骨骼
    pub fn body_bone_for(&self, index: usize) -> Option<usize> {
        let bone = self.bones.get(index)?;
        if bone.is_solver_root() {
            Some(index)
        } else {
            bone.parent
        }
    }

    // ========================================
    // 每帧变换
    // ========================================

    /// 重新采样每个骨骼相对父骨骼的本地偏移
    ///
    /// 上游动画可能修改了父骨骼，所以每次求解都要重新计算。
    pub fn update_local_transforms(&mut self) {
        for i in 0..self.bones.len() {
            let Some(p) = self.bones[i].parent else {
                continue;
            };
            let (parent_pos, parent_rot) = (self.bones[p].position, self.bones[p].rotation);
            let inv = parent_rot.inverse();
            let bone = &mut self.bones[i];
            bone.local_position_orig = inv * (bone.position - parent_pos);
            bone.local_rotation_orig = inv * bone.rotation;
        }
    }

    /// 由父骨骼当前变换 + 本地偏移推导位置
    pub fn position_from_parent(&self, index: usize) -> Option<Vec3> {
        let bone = self.bones.get(index)?;
        let parent = &self.bones[bone.parent?];
        Some(parent.position + parent.rotation * bone.local_position_orig)
    }

    /// 由父骨骼当前变换 + 本地旋转推导旋转
    pub fn rotation_from_parent(&self, index: usize) -> Option<Quat> {
        let bone = self.bones.get(index)?;
        let parent = &self.bones[bone.parent?];
        Some(parent.rotation * bone.local_rotation_orig)
    }

    /// 将结果传播到未被求解的骨骼（按层级顺序，父骨骼先于子骨骼）
    pub fn propagate_unsolved(&mut self) {
        for k in 0..self.hierarchy_order.len() {
            let i = self.hierarchy_order[k];
            if self.bones[i].is_solved() {
                continue;
            }
            let (Some(position), Some(rotation)) =
                (self.position_from_parent(i), self.rotation_from_parent(i))
            else {
                continue;
            };
            self.bones[i].position = position;
            self.bones[i].rotation = rotation;
        }
    }
}

impl Index<usize> for BoneSet {
    type Output = BoneLink;

    fn index(&self, index: usize) -> &BoneLink {
        &self.bones[index]
    }
}

impl IndexMut<usize> for BoneSet {
    fn index_mut(&mut self, index: usize) -> &mut BoneLink {
        &mut self.bones[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bone(name: &str, parent: i32, pos: Vec3, root: bool) -> BoneLink {
        BoneLink::with_pose(name, parent, pos, Quat::IDENTITY, root)
    }

    /// pelvis -> spine -> {l_hand -> l_finger, r_hand, head}
    fn upper_body() -> BoneSet {
        let mut set = BoneSet::new();
        set.add_bone(bone("pelvis", -1, Vec3::ZERO, true));
        set.add_bone(bone("spine", 0, Vec3::new(0.0, 100.0, 0.0), false));
        set.add_bone(bone("l_hand", 1, Vec3::new(-50.0, 150.0, 0.0), false));
        set.add_bone(bone("l_finger", 2, Vec3::new(-60.0, 160.0, 0.0), false));
        set.add_bone(bone("r_hand", 1, Vec3::new(50.0, 150.0, 0.0), false));
        set.add_bone(bone("head", 1, Vec3::new(0.0, 130.0, 0.0), false));
        set
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        let mut empty = BoneSet::new();
        assert_eq!(empty.init_topology(&[0]), Err(PbikError::NoBones));

        let mut set = upper_body();
        assert_eq!(set.init_topology(&[]), Err(PbikError::NoEffectors));

        let mut two_roots = upper_body();
        two_roots[1].flags.insert(BoneFlags::SOLVER_ROOT);
        assert_eq!(
            two_roots.init_topology(&[2]),
            Err(PbikError::MultipleSolverRoots { count: 2 })
        );

        let mut no_root = upper_body();
        no_root[0].flags.remove(BoneFlags::SOLVER_ROOT);
        assert_eq!(no_root.init_topology(&[2]), Err(PbikError::MissingSolverRoot));

        let mut bad_parent = upper_body();
        bad_parent[3].parent_index = 42;
        assert!(matches!(
            bad_parent.init_topology(&[2]),
            Err(PbikError::InvalidParentIndex { parent_index: 42, .. })
        ));

        let mut unset_parent = upper_body();
        unset_parent[5].parent_index = crate::skeleton::PARENT_UNSET;
        assert!(matches!(
            unset_parent.init_topology(&[2]),
            Err(PbikError::InvalidParentIndex { .. })
        ));
    }

    #[test]
    fn test_rejects_parent_cycle() {
        let mut set = BoneSet::new();
        set.add_bone(bone("root", -1, Vec3::ZERO, true));
        set.add_bone(bone("a", 2, Vec3::X, false));
        set.add_bone(bone("b", 1, Vec3::Y, false));
        assert!(matches!(
            set.init_topology(&[2]),
            Err(PbikError::InvalidParentIndex { .. })
        ));
    }

    #[test]
    fn test_effector_above_solver_root_is_rejected() {
        let mut set = upper_body();
        set[0].flags.remove(BoneFlags::SOLVER_ROOT);
        set[1].flags.insert(BoneFlags::SOLVER_ROOT);
        // pelvis 在 spine 之上，走不到求解根
        assert_eq!(
            set.init_topology(&[0]),
            Err(PbikError::EffectorNotBelowRoot { bone: "pelvis".into() })
        );
    }

    #[test]
    fn test_solved_set_and_sub_roots() {
        let mut set = upper_body();
        set.init_topology(&[2, 4]).unwrap();

        assert_eq!(set.solver_root(), Some(0));
        let solved: Vec<&str> = set
            .iter()
            .filter(|b| b.is_solved())
            .map(|b| b.name.as_str())
            .collect();
        assert_eq!(solved, ["pelvis", "spine", "l_hand", "r_hand"]);

        // 只记录被求解的子骨骼
        assert_eq!(set[1].children(), &[2, 4]);
        assert!(set[2].children().is_empty());
        assert!(set[1].has_child("r_hand", set.bones()));
        assert!(!set[1].has_child("head", set.bones()));

        assert!(set[0].is_sub_root());
        assert!(set[1].is_sub_root());
        assert!(!set[2].is_sub_root());
        assert!(!set[5].is_sub_root());
    }

    #[test]
    fn test_reinitialize_is_stable() {
        let mut set = upper_body();
        set.init_topology(&[2, 4]).unwrap();
        set.init_topology(&[2, 4]).unwrap();
        assert_eq!(set[1].children(), &[2, 4]);
        assert_eq!(set[0].children(), &[1]);
    }

    #[test]
    fn test_distance_to_root_and_body_bone() {
        let mut set = upper_body();
        set.init_topology(&[3]).unwrap();

        assert_eq!(set.num_bones_to_root(0), 0);
        assert_eq!(set.num_bones_to_root(1), 1);
        assert_eq!(set.num_bones_to_root(3), 3);

        assert_eq!(set.body_bone_for(0), Some(0));
        assert_eq!(set.body_bone_for(3), Some(2));
    }

    #[test]
    fn test_hierarchy_order_puts_parents_first() {
        let mut set = BoneSet::new();
        set.add_bone(bone("tip", 2, Vec3::new(0.0, 2.0, 0.0), false));
        set.add_bone(bone("root", -1, Vec3::ZERO, true));
        set.add_bone(bone("mid", 1, Vec3::new(0.0, 1.0, 0.0), false));
        set.init_topology(&[0]).unwrap();
        assert_eq!(set.hierarchy_order(), &[1, 2, 0]);
    }

    #[test]
    fn test_propagate_unsolved_follows_parent() {
        let mut set = upper_body();
        set.init_topology(&[2]).unwrap();
        set.update_local_transforms();

        // 旋转 spine 90 度，head 与 r_hand 未被求解，应跟随
        set[1].rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        set.propagate_unsolved();

        let head = set[5].position;
        assert!((head - Vec3::new(-30.0, 100.0, 0.0)).length() < 1e-3);
        assert!(set[5].rotation.dot(set[1].rotation).abs() > 0.9999);

        let r_hand = set[4].position;
        assert!((r_hand - Vec3::new(-50.0, 150.0, 0.0)).length() < 1e-3);

        // 被求解的骨骼不受影响
        assert_eq!(set[2].position, Vec3::new(-50.0, 150.0, 0.0));
    }
}
