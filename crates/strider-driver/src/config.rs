//! 控制核心配置
//!
//! 以 TOML 加载，所有字段都有默认值。默认关节集合为 28 自由度的
//! 人形机器人（躯干、颈部、双腿、双臂）。
//!
//! ```toml
//! command_rate_hz = 100.0
//! watchdog_periods = 20
//!
//! [tolerance]
//! enabled = true
//! position = 0.1
//!
//! [[joints]]
//! name = "l_leg_kny"
//! effort_limit = 400.0
//! integral_limit = 0.5
//! gains = { kp = 300.0, kd = 12.0 }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use strider_protocol::{JointGains, JointSet};
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 单个关节的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointConfig {
    pub name: String,
    /// 输出力矩限幅（绝对值）
    pub effort_limit: f64,
    /// 积分饱和限幅（指令可逐关节覆盖）
    #[serde(default = "default_integral_limit")]
    pub integral_limit: f64,
    /// 初始增益，直到第一条指令更新为止
    #[serde(default)]
    pub gains: JointGains,
}

fn default_integral_limit() -> f64 {
    0.5
}

impl JointConfig {
    pub fn new(name: impl Into<String>, effort_limit: f64, gains: JointGains) -> Self {
        Self {
            name: name.into(),
            effort_limit,
            integral_limit: default_integral_limit(),
            gains,
        }
    }
}

/// 目标容差检查
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    pub enabled: bool,
    /// 位置误差容差（rad）
    pub position: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            position: 0.1,
        }
    }
}

/// 控制核心配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub joints: Vec<JointConfig>,
    /// 期望的指令频率（Hz）
    pub command_rate_hz: f64,
    /// 看门狗阈值 = `watchdog_periods` 个指令周期
    pub watchdog_periods: u32,
    /// 显式的过期阈值（毫秒），优先于 `watchdog_periods`
    pub staleness_threshold_ms: Option<u64>,
    /// 指令年龄环形缓冲区容量
    pub age_capacity: usize,
    /// 控制器统计的发布间隔（毫秒）
    pub statistics_interval_ms: u64,
    /// 标称 tick 周期（微秒）
    pub nominal_period_us: u64,
    pub tolerance: ToleranceConfig,
    /// 模式切换历史的保留条数
    pub transition_history: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            joints: humanoid_joints(),
            command_rate_hz: 100.0,
            watchdog_periods: 20,
            staleness_threshold_ms: None,
            age_capacity: 1000,
            statistics_interval_ms: 100,
            nominal_period_us: 1_000,
            tolerance: ToleranceConfig::default(),
            transition_history: 64,
        }
    }
}

impl ControlConfig {
    /// 使用指定关节、其余默认
    pub fn with_joints(joints: Vec<JointConfig>) -> Self {
        Self {
            joints,
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ControlConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // 空集合与重复名称
        self.joint_set()?;

        for joint in &self.joints {
            if !(joint.effort_limit.is_finite() && joint.effort_limit > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "joint '{}': effort_limit must be positive, got {}",
                    joint.name, joint.effort_limit
                )));
            }
            if !(joint.integral_limit.is_finite() && joint.integral_limit >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "joint '{}': integral_limit must be non-negative, got {}",
                    joint.name, joint.integral_limit
                )));
            }
            if !joint.gains.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "joint '{}': gains must be finite",
                    joint.name
                )));
            }
        }

        if !(self.command_rate_hz.is_finite() && self.command_rate_hz > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "command_rate_hz must be positive, got {}",
                self.command_rate_hz
            )));
        }
        if self.watchdog_periods == 0 {
            return Err(ConfigError::Invalid("watchdog_periods must be > 0".into()));
        }
        if self.staleness_threshold_ms == Some(0) {
            return Err(ConfigError::Invalid("staleness_threshold_ms must be > 0".into()));
        }
        if self.age_capacity == 0 {
            return Err(ConfigError::Invalid("age_capacity must be > 0".into()));
        }
        if self.nominal_period_us == 0 {
            return Err(ConfigError::Invalid("nominal_period_us must be > 0".into()));
        }
        if self.transition_history == 0 {
            return Err(ConfigError::Invalid("transition_history must be > 0".into()));
        }
        if !(self.tolerance.position.is_finite() && self.tolerance.position > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tolerance.position must be positive, got {}",
                self.tolerance.position
            )));
        }
        Ok(())
    }

    pub fn joint_set(&self) -> Result<JointSet, ConfigError> {
        JointSet::new(self.joints.iter().map(|j| j.name.clone()))
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// 看门狗阈值（微秒）
    pub fn staleness_threshold_us(&self) -> u64 {
        match self.staleness_threshold_ms {
            Some(ms) => ms.saturating_mul(1_000),
            None => {
                let period_us = 1e6 / self.command_rate_hz;
                (period_us * f64::from(self.watchdog_periods)).round() as u64
            },
        }
    }

    pub fn statistics_interval_us(&self) -> u64 {
        self.statistics_interval_ms.saturating_mul(1_000)
    }
}

/// 默认的 28 关节人形机器人
pub fn humanoid_joints() -> Vec<JointConfig> {
    let torso = JointGains::pd(200.0, 8.0);
    let neck = JointGains::pd(20.0, 1.0);
    let leg = JointGains::pd(300.0, 12.0);
    let arm = JointGains::pd(120.0, 4.0);

    let mut joints = vec![
        JointConfig::new("back_lbz", 120.0, torso),
        JointConfig::new("back_mby", 200.0, torso),
        JointConfig::new("back_ubx", 200.0, torso),
        JointConfig::new("neck_ay", 30.0, neck),
    ];
    for side in ["l", "r"] {
        for (suffix, limit) in [
            ("uhz", 110.0),
            ("mhx", 180.0),
            ("lhy", 260.0),
            ("kny", 400.0),
            ("uay", 220.0),
            ("lax", 90.0),
        ] {
            joints.push(JointConfig::new(format!("{side}_leg_{suffix}"), limit, leg));
        }
    }
    for side in ["l", "r"] {
        for (suffix, limit) in [
            ("usy", 210.0),
            ("shx", 170.0),
            ("ely", 110.0),
            ("elx", 110.0),
            ("uwy", 60.0),
            ("mwx", 60.0),
        ] {
            joints.push(JointConfig::new(format!("{side}_arm_{suffix}"), limit, arm));
        }
    }
    joints
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ControlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.joints.len(), 28);
        assert_eq!(config.staleness_threshold_us(), 200_000);
        assert!(config.tolerance.enabled);
        assert_eq!(config.joint_set().unwrap().id("r_arm_mwx").map(|j| j.0), Some(27));
    }

    #[test]
    fn test_explicit_staleness_threshold() {
        let config = ControlConfig {
            staleness_threshold_ms: Some(50),
            ..ControlConfig::default()
        };
        assert_eq!(config.staleness_threshold_us(), 50_000);
    }

    #[test]
    fn test_from_toml_str() {
        let text = r#"
            command_rate_hz = 50.0
            watchdog_periods = 5

            [tolerance]
            enabled = false

            [[joints]]
            name = "hip"
            effort_limit = 10.0
            gains = { kp = 5.0, kd = 0.5 }

            [[joints]]
            name = "knee"
            effort_limit = 12.0
            integral_limit = 1.5
        "#;
        let config = ControlConfig::from_toml_str(text).unwrap();
        assert_eq!(config.joints.len(), 2);
        assert_eq!(config.joints[0].gains.kp, 5.0);
        assert_eq!(config.joints[0].integral_limit, 0.5);
        assert_eq!(config.joints[1].integral_limit, 1.5);
        assert!(!config.tolerance.enabled);
        assert_eq!(config.tolerance.position, 0.1);
        assert_eq!(config.staleness_threshold_us(), 100_000);
        assert_eq!(config.age_capacity, 1000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ControlConfig::default();
        config.joints[0].effort_limit = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ControlConfig::default();
        config.joints[1].name = config.joints[0].name.clone();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = ControlConfig::with_joints(Vec::new());
        assert!(config.validate().is_err());

        let config = ControlConfig {
            age_capacity: 0,
            ..ControlConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        let err = ControlConfig::from_toml_str("command_rate_hz = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "age_capacity = 16").unwrap();
        let config = ControlConfig::load(file.path()).unwrap();
        assert_eq!(config.age_capacity, 16);
        assert_eq!(config.joints.len(), 28);

        let err = ControlConfig::load("/nonexistent/strider.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
