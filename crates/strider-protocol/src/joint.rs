//! 关节集合
//!
//! 关节在配置时被分配一个稳定的扁平索引，控制核心内部所有
//! 逐关节状态都按该索引存储。

use crate::ProtocolError;
use std::collections::HashMap;
use std::fmt;

/// 关节索引（在 [`JointSet`] 中的位置）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JointId(pub usize);

impl JointId {
    /// 索引值
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 有序、无重复的关节名称集合
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointSet {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl JointSet {
    /// 从名称列表构造
    ///
    /// # 错误
    ///
    /// - 列表为空：`ProtocolError::EmptyJointSet`
    /// - 名称重复：`ProtocolError::DuplicateJoint`
    pub fn new<I, S>(names: I) -> Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(ProtocolError::EmptyJointSet);
        }

        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(ProtocolError::DuplicateJoint(name.clone()));
            }
        }

        Ok(Self { names, index })
    }

    /// 按名称查找关节
    pub fn id(&self, name: &str) -> Option<JointId> {
        self.index.get(name).copied().map(JointId)
    }

    /// 关节名称（索引越界时返回 `"?"`）
    pub fn name(&self, id: JointId) -> &str {
        self.names.get(id.0).map(String::as_str).unwrap_or("?")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, id: JointId) -> bool {
        id.0 < self.names.len()
    }

    /// 按索引顺序遍历 `(JointId, name)`
    pub fn iter(&self) -> impl Iterator<Item = (JointId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (JointId(i), n.as_str()))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_set_lookup() {
        let set = JointSet::new(["hip", "knee", "ankle"]).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.id("knee"), Some(JointId(1)));
        assert_eq!(set.id("elbow"), None);
        assert_eq!(set.name(JointId(2)), "ankle");
        assert_eq!(set.name(JointId(9)), "?");
        assert!(set.contains(JointId(0)));
        assert!(!set.contains(JointId(3)));
    }

    #[test]
    fn test_joint_set_rejects_empty_and_duplicates() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(JointSet::new(empty), Err(ProtocolError::EmptyJointSet));
        assert_eq!(
            JointSet::new(["a", "b", "a"]),
            Err(ProtocolError::DuplicateJoint("a".to_string()))
        );
    }

    #[test]
    fn test_joint_set_iter_order() {
        let set = JointSet::new(["x", "y"]).unwrap();
        let collected: Vec<_> = set.iter().map(|(id, n)| (id.0, n.to_string())).collect();
        assert_eq!(collected, vec![(0, "x".to_string()), (1, "y".to_string())]);
    }
}
