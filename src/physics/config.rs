//! PBIK 求解配置
//!
//! - SolverSettings: 每次 `solve` 传入，可逐帧修改
//! - SolverConfig: 每个求解器实例一份的常量（单位制、挤压阈值等），构造时传入

/// 每帧求解参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    /// 约束迭代次数，默认 20
    /// 禁止拉伸时会再追加同样次数的第二轮迭代
    pub iterations: u32,

    /// 质量系数，默认 1.0（负数按 0 处理）
    /// 增大后刚体更"重"，旋转修正更小
    pub mass_multiplier: f32,

    /// 是否允许关节拉伸，默认 false
    pub allow_stretch: bool,

    /// 是否把求解根钉在输入动画位置，默认 false
    pub pin_root: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            iterations: 20,
            mass_multiplier: 1.0,
            allow_stretch: false,
            pin_root: false,
        }
    }
}

/// 求解器实例常量（扁平化，不嵌套）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    // ========== 质量 ==========
    /// 单位制缩放，默认 100.0（厘米）；以米为单位的世界用 1.0
    pub unit_scale: f32,
    /// 质量下限，避免逆质量爆炸，默认 0.5
    pub mass_floor: f32,

    // ========== 挤压 / 偏好角 ==========
    /// 达到完全偏好角所需的压缩量（占原始距离的比例），默认 0.3
    pub squash_threshold_scale: f32,
    /// 压缩比例低于此值时不应用偏好角，默认 0.01
    pub squash_min_percent: f32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            unit_scale: 100.0,
            mass_floor: 0.5,
            squash_threshold_scale: 0.3,
            squash_min_percent: 0.01,
        }
    }
}

impl SolverConfig {
    /// 以米为单位的世界
    pub fn meters() -> Self {
        Self {
            unit_scale: 1.0,
            ..Self::default()
        }
    }

    /// 由刚体长度计算逆质量
    ///
    /// inv_mass = 1 / (length * (mass_multiplier * unit_scale + mass_floor))
    /// 长度为 0 的刚体视为无限重。
    pub fn inverse_mass(&self, length: f32, mass_multiplier: f32) -> f32 {
        let denom = length * (mass_multiplier.max(0.0) * self.unit_scale + self.mass_floor);
        if denom <= f32::EPSILON {
            0.0
        } else {
            1.0 / denom
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_mass_formula() {
        let config = SolverConfig::default();
        let inv = config.inverse_mass(100.0, 1.0);
        assert!((inv - 1.0 / (100.0 * 100.5)).abs() < 1e-9);

        // 负质量系数按 0 处理，只剩下限
        let floor_only = config.inverse_mass(100.0, -3.0);
        assert!((floor_only - 1.0 / 50.0).abs() < 1e-6);

        assert_eq!(config.inverse_mass(0.0, 1.0), 0.0);
    }

    #[test]
    fn test_meter_units_make_bodies_lighter() {
        let cm = SolverConfig::default().inverse_mass(1.0, 1.0);
        let m = SolverConfig::meters().inverse_mass(1.0, 1.0);
        assert!(m > cm);
        assert!((m - 1.0 / 1.5).abs() < 1e-6);
    }
}
