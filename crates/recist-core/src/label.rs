//! 病灶标签编码
//!
//! 标注存储每个测量只保存一个字符串，病灶信息以 `{序号}|{病灶类型}|{器官}` 的形式编码其中，
//! 用于写入DICOM结构化报告并在回填时还原。

use crate::error::{RecistError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// 标签字段分隔符
pub const LABEL_SEPARATOR: char = '|';

/// 缺失字段的占位符
pub const LABEL_PLACEHOLDER: &str = "NA";

/// 解析后的病灶标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LesionLabel {
    pub lesion_index: String,
    pub lesion: String,
    pub organ: String,
}

impl LesionLabel {
    /// 由结构化字段创建标签
    pub fn new(lesion_index: u32, lesion: impl Into<String>, organ: impl Into<String>) -> Self {
        Self {
            lesion_index: lesion_index.to_string(),
            lesion: non_empty_or_placeholder(lesion.into()),
            organ: non_empty_or_placeholder(organ.into()),
        }
    }

    /// 解析复合标签字符串
    ///
    /// 至少需要一个分隔符；缺失的尾部字段以占位符补齐，多余字段被忽略。
    pub fn parse(label: &str) -> Result<Self> {
        if !label.contains(LABEL_SEPARATOR) {
            debug!("Label without separator: {:?}", label);
            return Err(RecistError::InvalidLabel(format!(
                "标签缺少分隔符 '{}': {}",
                LABEL_SEPARATOR, label
            )));
        }

        let mut fields = label.split(LABEL_SEPARATOR).map(|f| f.trim().to_string());
        let lesion_index = non_empty_or_placeholder(fields.next().unwrap_or_default());
        let lesion = non_empty_or_placeholder(fields.next().unwrap_or_default());
        let organ = non_empty_or_placeholder(fields.next().unwrap_or_default());

        Ok(Self {
            lesion_index,
            lesion,
            organ,
        })
    }

    /// 病灶序号，无法解析为整数时返回 None
    pub fn index(&self) -> Option<u32> {
        self.lesion_index.parse().ok()
    }

    /// 病灶类型键
    pub fn lesion_key(&self) -> Option<&str> {
        Some(self.lesion.as_str()).filter(|key| *key != LABEL_PLACEHOLDER)
    }

    /// 器官键
    pub fn organ_key(&self) -> Option<&str> {
        Some(self.organ.as_str()).filter(|key| *key != LABEL_PLACEHOLDER)
    }

    /// 编码为规范的三字段字符串
    pub fn encode(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.lesion_index,
            self.lesion,
            self.organ,
            sep = LABEL_SEPARATOR
        )
    }
}

impl FromStr for LesionLabel {
    type Err = RecistError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for LesionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn non_empty_or_placeholder(value: String) -> String {
    if value.is_empty() {
        LABEL_PLACEHOLDER.to_string()
    } else {
        value
    }
}
