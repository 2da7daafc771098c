//! 入站指令消息
//!
//! 两种形态：
//!
//! - [`FullBodyCommand`]：每个已知关节一个值，按关节索引排列
//! - [`NamedJointCommand`]：`names` 加并行数组，只覆盖列出的关节
//!
//! 两者都在边界处通过 `validate()` 转换为 [`JointCommand`]，
//! 格式错误的消息整体拒绝，未知关节名按字段丢弃。

use crate::ProtocolError;
use crate::command::{GainsUpdate, JointCommand, JointSetpoint};
use crate::joint::JointSet;
use crate::mode::BehaviorMode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 逐关节并行数组
///
/// 除整机指令的 `position` 外，每个数组要么为空（不更新该项），
/// 要么与关节数等长。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JointArrays {
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
    pub effort: Vec<f64>,
    pub kp: Vec<f64>,
    pub ki: Vec<f64>,
    pub kd: Vec<f64>,
    pub velocity_ff: Vec<f64>,
    pub effort_ff: Vec<f64>,
    pub i_clamp: Vec<f64>,
}

impl JointArrays {
    fn fields(&self) -> [(&'static str, &[f64]); 9] {
        [
            ("position", self.position.as_slice()),
            ("velocity", self.velocity.as_slice()),
            ("effort", self.effort.as_slice()),
            ("kp", self.kp.as_slice()),
            ("ki", self.ki.as_slice()),
            ("kd", self.kd.as_slice()),
            ("velocity_ff", self.velocity_ff.as_slice()),
            ("effort_ff", self.effort_ff.as_slice()),
            ("i_clamp", self.i_clamp.as_slice()),
        ]
    }

    /// 检查长度与数值有限性
    fn check(&self, expected: usize) -> Result<(), ProtocolError> {
        for (field, values) in self.fields() {
            if !values.is_empty() && values.len() != expected {
                return Err(ProtocolError::ArrayLengthMismatch {
                    field,
                    expected,
                    actual: values.len(),
                });
            }
            if let Some(index) = values.iter().position(|v| !v.is_finite()) {
                return Err(ProtocolError::NonFiniteValue { field, index });
            }
        }
        Ok(())
    }

    /// 第 `i` 个关节的期望值（调用前必须已通过 `check`）
    fn setpoint(&self, i: usize) -> JointSetpoint {
        JointSetpoint {
            position: self.position.get(i).copied(),
            velocity: self.velocity.get(i).copied(),
            effort: self.effort.get(i).copied(),
            gains: GainsUpdate {
                kp: self.kp.get(i).copied(),
                ki: self.ki.get(i).copied(),
                kd: self.kd.get(i).copied(),
                velocity_ff: self.velocity_ff.get(i).copied(),
                effort_ff: self.effort_ff.get(i).copied(),
            },
            i_clamp: self.i_clamp.get(i).copied(),
        }
    }
}

/// 整机指令
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FullBodyCommand {
    pub sequence: u64,
    pub timestamp_us: u64,
    /// 可选的模式请求令牌
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(flatten)]
    pub arrays: JointArrays,
}

/// 按名称的稀疏指令
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NamedJointCommand {
    pub sequence: u64,
    pub timestamp_us: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub names: Vec<String>,
    #[serde(flatten)]
    pub arrays: JointArrays,
}

/// 入站消息（JSON 中以 `"kind"` 字段区分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandMessage {
    FullBody(FullBodyCommand),
    Named(NamedJointCommand),
}

/// 校验结果
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub command: JointCommand,
    /// 被丢弃的未知关节名
    pub unknown_joints: Vec<String>,
    /// 未识别、已忽略的模式令牌
    pub ignored_mode: Option<String>,
}

fn parse_mode(token: Option<&str>) -> (Option<BehaviorMode>, Option<String>) {
    match token {
        None => (None, None),
        Some(t) => match t.parse::<BehaviorMode>() {
            Ok(mode) => (Some(mode), None),
            Err(_) => (None, Some(t.to_string())),
        },
    }
}

fn base_command(
    sequence: u64,
    timestamp_us: u64,
    mode: Option<BehaviorMode>,
) -> JointCommand {
    let cmd = JointCommand::new(sequence, timestamp_us);
    match mode {
        Some(m) => cmd.with_mode(m),
        None => cmd,
    }
}

impl FullBodyCommand {
    /// 校验并转换
    ///
    /// # 错误
    ///
    /// - `position` 长度 ≠ 关节数：`JointCountMismatch`
    /// - 其它非空数组长度 ≠ 关节数：`ArrayLengthMismatch`
    /// - 任意值非有限：`NonFiniteValue`
    pub fn validate(&self, joints: &JointSet) -> Result<Validated, ProtocolError> {
        let expected = joints.len();
        if self.arrays.position.len() != expected {
            return Err(ProtocolError::JointCountMismatch {
                expected,
                actual: self.arrays.position.len(),
            });
        }
        self.arrays.check(expected)?;

        let (mode, ignored_mode) = parse_mode(self.mode.as_deref());
        let mut command = base_command(self.sequence, self.timestamp_us, mode);
        for (id, _) in joints.iter() {
            command.push_setpoint(id, self.arrays.setpoint(id.index()));
        }

        Ok(Validated {
            command,
            unknown_joints: Vec::new(),
            ignored_mode,
        })
    }
}

impl NamedJointCommand {
    /// 校验并转换
    ///
    /// # 错误
    ///
    /// - 非空数组长度 ≠ `names` 长度：`ArrayLengthMismatch`
    /// - `names` 中有重复：`DuplicateJoint`
    /// - 任意值非有限：`NonFiniteValue`
    ///
    /// 未知关节名不会导致拒绝，只丢弃对应字段并在结果中列出。
    pub fn validate(&self, joints: &JointSet) -> Result<Validated, ProtocolError> {
        self.arrays.check(self.names.len())?;

        let mut seen = HashSet::with_capacity(self.names.len());
        for name in &self.names {
            if !seen.insert(name.as_str()) {
                return Err(ProtocolError::DuplicateJoint(name.clone()));
            }
        }

        let (mode, ignored_mode) = parse_mode(self.mode.as_deref());
        let mut command = base_command(self.sequence, self.timestamp_us, mode);
        let mut unknown_joints = Vec::new();
        for (i, name) in self.names.iter().enumerate() {
            match joints.id(name) {
                Some(id) => command.push_setpoint(id, self.arrays.setpoint(i)),
                None => unknown_joints.push(name.clone()),
            }
        }

        Ok(Validated {
            command,
            unknown_joints,
            ignored_mode,
        })
    }
}

impl CommandMessage {
    pub fn sequence(&self) -> u64 {
        match self {
            CommandMessage::FullBody(c) => c.sequence,
            CommandMessage::Named(c) => c.sequence,
        }
    }

    pub fn validate(&self, joints: &JointSet) -> Result<Validated, ProtocolError> {
        match self {
            CommandMessage::FullBody(c) => c.validate(joints),
            CommandMessage::Named(c) => c.validate(joints),
        }
    }
}

impl From<FullBodyCommand> for CommandMessage {
    fn from(c: FullBodyCommand) -> Self {
        CommandMessage::FullBody(c)
    }
}

impl From<NamedJointCommand> for CommandMessage {
    fn from(c: NamedJointCommand) -> Self {
        CommandMessage::Named(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joint::JointId;

    fn joints() -> JointSet {
        JointSet::new(["hip", "knee", "ankle"]).unwrap()
    }

    #[test]
    fn test_full_body_valid() {
        let msg = FullBodyCommand {
            sequence: 1,
            timestamp_us: 10,
            mode: Some("stand".into()),
            arrays: JointArrays {
                position: vec![0.1, 0.2, 0.3],
                kp: vec![100.0, 100.0, 100.0],
                ..JointArrays::default()
            },
        };
        let v = msg.validate(&joints()).unwrap();
        assert_eq!(v.command.setpoints().len(), 3);
        assert_eq!(v.command.requested_mode(), Some(BehaviorMode::Stand));
        let knee = v.command.setpoint(JointId(1)).unwrap();
        assert_eq!(knee.position, Some(0.2));
        assert_eq!(knee.gains.kp, Some(100.0));
        assert_eq!(knee.gains.kd, None);
        assert_eq!(knee.velocity, None);
    }

    #[test]
    fn test_full_body_wrong_joint_count() {
        let msg = FullBodyCommand {
            arrays: JointArrays {
                position: vec![0.1, 0.2],
                ..JointArrays::default()
            },
            ..FullBodyCommand::default()
        };
        assert_eq!(
            msg.validate(&joints()),
            Err(ProtocolError::JointCountMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_full_body_gain_length_mismatch() {
        let msg = FullBodyCommand {
            arrays: JointArrays {
                position: vec![0.0; 3],
                kd: vec![1.0; 4],
                ..JointArrays::default()
            },
            ..FullBodyCommand::default()
        };
        assert!(matches!(
            msg.validate(&joints()),
            Err(ProtocolError::ArrayLengthMismatch { field: "kd", .. })
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        let msg = FullBodyCommand {
            arrays: JointArrays {
                position: vec![0.0, f64::NAN, 0.0],
                ..JointArrays::default()
            },
            ..FullBodyCommand::default()
        };
        assert_eq!(
            msg.validate(&joints()),
            Err(ProtocolError::NonFiniteValue {
                field: "position",
                index: 1
            })
        );
    }

    #[test]
    fn test_named_unknown_joint_dropped_per_field() {
        let msg = NamedJointCommand {
            sequence: 2,
            names: vec!["knee".into(), "elbow".into()],
            arrays: JointArrays {
                position: vec![0.5, 0.7],
                ..JointArrays::default()
            },
            ..NamedJointCommand::default()
        };
        let v = msg.validate(&joints()).unwrap();
        assert_eq!(v.unknown_joints, vec!["elbow".to_string()]);
        assert_eq!(v.command.setpoints().len(), 1);
        assert_eq!(
            v.command.setpoint(JointId(1)).and_then(|s| s.position),
            Some(0.5)
        );
    }

    #[test]
    fn test_named_length_mismatch() {
        let msg = NamedJointCommand {
            names: vec!["hip".into(), "knee".into()],
            arrays: JointArrays {
                position: vec![0.5],
                ..JointArrays::default()
            },
            ..NamedJointCommand::default()
        };
        assert_eq!(
            msg.validate(&joints()),
            Err(ProtocolError::ArrayLengthMismatch {
                field: "position",
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_named_duplicate_rejected() {
        let msg = NamedJointCommand {
            names: vec!["hip".into(), "hip".into()],
            ..NamedJointCommand::default()
        };
        assert_eq!(
            msg.validate(&joints()),
            Err(ProtocolError::DuplicateJoint("hip".into()))
        );
    }

    #[test]
    fn test_unknown_mode_token_ignored() {
        let msg = NamedJointCommand {
            mode: Some("sprint".into()),
            ..NamedJointCommand::default()
        };
        let v = msg.validate(&joints()).unwrap();
        assert_eq!(v.command.requested_mode(), None);
        assert_eq!(v.ignored_mode.as_deref(), Some("sprint"));
    }

    #[test]
    fn test_json_tagged_message() {
        let json = r#"{"kind":"named","sequence":5,"timestamp_us":42,
                       "names":["ankle"],"position":[0.25],"kp":[50.0]}"#;
        let msg: CommandMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.sequence(), 5);
        let v = msg.validate(&joints()).unwrap();
        let ankle = v.command.setpoint(JointId(2)).unwrap();
        assert_eq!(ankle.position, Some(0.25));
        assert_eq!(ankle.gains.kp, Some(50.0));
    }
}
