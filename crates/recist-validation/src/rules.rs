//! RECIST 1.1 规则常量与病灶分组键

use serde::{Deserialize, Serialize};
use std::fmt;

/// 靶病灶类型键
pub const TARGET_KEY_GROUP: &[&str] = &["Target", "Target_CR", "Target_UN", "Target_NM"];

/// 新病灶类型键
pub const NEW_LESION_KEY_GROUP: &[&str] = &["New_Lesion", "New_Lesion_UN", "New_Lesion_PD"];

/// 非靶病灶类型键，同时包含新病灶键
pub const NON_TARGET_KEY_GROUP: &[&str] = &[
    "Non_Target",
    "Non_Target_CR",
    "Non_Target_PD",
    "Non_Target_UN",
    "New_Lesion",
    "New_Lesion_UN",
    "New_Lesion_PD",
];

/// 太小无法测量的靶病灶
pub const TARGET_NM: &str = "Target_NM";

/// 参与校验的病灶分组
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum GroupName {
    Target,
    NewLesion,
    NonTarget,
}

impl GroupName {
    pub const ALL: [GroupName; 3] = [GroupName::Target, GroupName::NewLesion, GroupName::NonTarget];

    /// 该分组对应的病灶类型键
    pub fn key_group(&self) -> &'static [&'static str] {
        match self {
            GroupName::Target => TARGET_KEY_GROUP,
            GroupName::NewLesion => NEW_LESION_KEY_GROUP,
            GroupName::NonTarget => NON_TARGET_KEY_GROUP,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupName::Target => "target",
            GroupName::NewLesion => "newLesion",
            GroupName::NonTarget => "nonTarget",
        }
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可配置的RECIST阈值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecistRules {
    /// 淋巴结短径阈值 (mm)
    pub lymph_node_short_axis_mm: f64,
    /// 非淋巴结长径阈值 (mm)
    pub long_axis_mm: f64,
    /// 靶病灶最大序号
    pub max_target_lesions: u32,
    /// 同一器官最多靶病灶数
    pub max_target_lesions_per_organ: usize,
    /// Target_NM 病灶计入SOD的名义值 (mm)
    pub target_nm_nominal_mm: f64,
}

impl Default for RecistRules {
    fn default() -> Self {
        Self {
            lymph_node_short_axis_mm: 15.0,
            long_axis_mm: 10.0,
            max_target_lesions: 5,
            max_target_lesions_per_organ: 2,
            target_nm_nominal_mm: 5.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lesion_keys_are_subset_of_non_target() {
        for key in NEW_LESION_KEY_GROUP {
            assert!(NON_TARGET_KEY_GROUP.contains(key));
        }
    }

    #[test]
    fn test_group_name_serde() {
        let json = serde_json::to_string(&GroupName::NewLesion).unwrap();
        assert_eq!(json, "\"newLesion\"");
        assert_eq!(GroupName::NonTarget.to_string(), "nonTarget");
    }
}
