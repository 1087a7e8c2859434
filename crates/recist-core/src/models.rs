//! 核心数据模型定义

use crate::label::LesionLabel;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 淋巴结器官键，测量时取短径
pub const LYMPH_NODE: &str = "Lymph_Node";

/// 基线访视的周期编号
pub const BASELINE_CYCLE: &str = "00";

/// 标注工具
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ToolName {
    Bidirectional,
    Length,
    ArrowAnnotate,
    RectangleROI,
    #[serde(other)]
    Unknown,
}

/// 带显示名称的取值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabeledValue<T> {
    pub value: T,
    #[serde(default)]
    pub label: String,
}

impl<T> LabeledValue<T> {
    pub fn new(value: T, label: impl Into<String>) -> Self {
        Self {
            value,
            label: label.into(),
        }
    }
}

/// 测量的结构化病灶信息
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementLabelInfo {
    #[serde(default)]
    pub lesion_index: Option<LabeledValue<u32>>,
    #[serde(default)]
    pub lesion: Option<LabeledValue<String>>,
    #[serde(default)]
    pub organ: Option<LabeledValue<String>>,
    #[serde(default)]
    pub organ_location: Option<LabeledValue<String>>,
    #[serde(default)]
    pub organ_lateral: Option<LabeledValue<String>>,
    #[serde(default)]
    pub organ_description: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub cavitation: bool,
}

impl MeasurementLabelInfo {
    /// 渲染为持久化使用的复合标签
    pub fn to_label(&self) -> LesionLabel {
        LesionLabel::new(
            self.lesion_index.as_ref().map(|v| v.value).unwrap_or(0),
            self.lesion.as_ref().map(|v| v.value.clone()).unwrap_or_default(),
            self.organ.as_ref().map(|v| v.value.clone()).unwrap_or_default(),
        )
    }
}

/// 单个标注实例的几何统计 (毫米)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AnnotationStats {
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
}

/// 一次病灶标注测量
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub uid: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub measurement_label_info: Option<MeasurementLabelInfo>,
    pub tool_name: ToolName,
    /// 以标注实例ID为键的几何数据
    #[serde(default)]
    pub data: BTreeMap<String, AnnotationStats>,
    #[serde(rename = "referenceStudyUID", default)]
    pub reference_study_uid: String,
    #[serde(rename = "referenceSeriesUID", default)]
    pub reference_series_uid: String,
    #[serde(rename = "SOPInstanceUID", default)]
    pub sop_instance_uid: String,
    /// 所在序列的成像模态 (CT, MR ...)
    #[serde(default)]
    pub modality: Option<String>,
}

impl Measurement {
    /// 解析复合标签，格式错误时返回 None
    pub fn parsed_label(&self) -> Option<LesionLabel> {
        LesionLabel::parse(&self.label).ok()
    }

    /// 病灶序号：优先取结构化信息，其次取标签第一字段
    pub fn lesion_index(&self) -> Option<u32> {
        self.measurement_label_info
            .as_ref()
            .and_then(|info| info.lesion_index.as_ref())
            .map(|v| v.value)
            .or_else(|| self.parsed_label().and_then(|label| label.index()))
    }

    /// 病灶类型键
    pub fn lesion_key(&self) -> Option<String> {
        self.measurement_label_info
            .as_ref()
            .and_then(|info| info.lesion.as_ref())
            .map(|v| v.value.clone())
            .filter(|value| !value.is_empty())
            .or_else(|| {
                self.parsed_label()
                    .and_then(|label| label.lesion_key().map(str::to_string))
            })
    }

    /// 器官键
    pub fn organ(&self) -> Option<String> {
        self.measurement_label_info
            .as_ref()
            .and_then(|info| info.organ.as_ref())
            .map(|v| v.value.clone())
            .filter(|value| !value.is_empty())
            .or_else(|| {
                self.parsed_label()
                    .and_then(|label| label.organ_key().map(str::to_string))
            })
    }

    pub fn organ_location(&self) -> Option<&str> {
        self.measurement_label_info
            .as_ref()
            .and_then(|info| info.organ_location.as_ref())
            .map(|v| v.value.as_str())
            .filter(|value| !value.is_empty())
    }

    pub fn organ_lateral(&self) -> Option<&str> {
        self.measurement_label_info
            .as_ref()
            .and_then(|info| info.organ_lateral.as_ref())
            .map(|v| v.value.as_str())
            .filter(|value| !value.is_empty())
    }

    pub fn is_cavitation(&self) -> bool {
        self.measurement_label_info
            .as_ref()
            .map(|info| info.cavitation)
            .unwrap_or(false)
    }

    pub fn is_lymph_node(&self) -> bool {
        self.organ().as_deref() == Some(LYMPH_NODE)
    }

    /// 主标注实例的几何数据
    ///
    /// `data` 按标注ID排序，取ID最小的实例，与查看器中的插入顺序无关。
    pub fn primary_stats(&self) -> Option<&AnnotationStats> {
        self.data.values().next()
    }
}

/// 一份影像报告
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    #[serde(default)]
    pub measurements: Vec<Measurement>,
    #[serde(rename = "SOD", default)]
    pub sod: Option<f64>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub username: Option<String>,
}

/// 一次访视
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Timepoint {
    pub study_instance_uid: String,
    /// 试验访视周期编号，基线为 "00"
    #[serde(default)]
    pub trial_time_point_id: String,
    #[serde(default)]
    pub study_date: Option<NaiveDate>,
    #[serde(default)]
    pub reports: Vec<Report>,
    #[serde(default)]
    pub is_baseline: bool,
    #[serde(default)]
    pub is_compared: bool,
}

impl Timepoint {
    pub fn is_baseline_visit(&self) -> bool {
        self.is_baseline || self.trial_time_point_id == BASELINE_CYCLE
    }

    pub fn first_report(&self) -> Option<&Report> {
        self.reports.first()
    }

    /// 第一份报告的SOD
    pub fn report_sod(&self) -> Option<f64> {
        self.first_report().and_then(|report| report.sod)
    }
}

/// 当前或对照报告的摘要
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportInfo {
    pub report_id: String,
    #[serde(default)]
    pub study_instance_uid: Option<String>,
    #[serde(rename = "SOD", default)]
    pub sod: Option<f64>,
    #[serde(default)]
    pub response: Option<String>,
}

impl ReportInfo {
    pub fn from_report(report: &Report, study_instance_uid: Option<&str>) -> Self {
        Self {
            report_id: report.id.clone(),
            study_instance_uid: study_instance_uid.map(str::to_string),
            sod: report.sod,
            response: report.response.clone(),
        }
    }
}

/// 阅片任务信息
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_id: String,
    #[serde(default)]
    pub trial_id: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
}

/// 当前用户
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWER_JSON: &str = r#"{
        "uid": "m-1",
        "label": "2|Target|Liver",
        "measurementLabelInfo": {
            "lesionIndex": {"value": 2, "label": "2"},
            "lesion": {"value": "Target", "label": "靶病灶"},
            "organ": {"value": "Liver", "label": "肝脏"},
            "cavitation": true
        },
        "toolName": "Bidirectional",
        "data": {"imageId:1": {"length": 23.46, "width": 10.1}},
        "referenceStudyUID": "1.2.3",
        "referenceSeriesUID": "1.2.3.4",
        "SOPInstanceUID": "1.2.3.4.5"
    }"#;

    #[test]
    fn test_deserialize_viewer_measurement() {
        let m: Measurement = serde_json::from_str(VIEWER_JSON).unwrap();
        assert_eq!(m.tool_name, ToolName::Bidirectional);
        assert_eq!(m.lesion_index(), Some(2));
        assert_eq!(m.lesion_key().as_deref(), Some("Target"));
        assert_eq!(m.organ().as_deref(), Some("Liver"));
        assert!(m.is_cavitation());
        assert_eq!(m.sop_instance_uid, "1.2.3.4.5");
        assert_eq!(m.primary_stats().and_then(|s| s.length), Some(23.46));
    }

    #[test]
    fn test_primary_stats_uses_smallest_annotation_id() {
        let m: Measurement = serde_json::from_str(
            r#"{
                "uid": "m-2",
                "label": "1|Target|Liver",
                "toolName": "Length",
                "data": {
                    "imageId:9": {"length": 40.0},
                    "imageId:1": {"length": 12.5}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(m.data.len(), 2);
        assert_eq!(m.primary_stats().and_then(|s| s.length), Some(12.5));
    }

    #[test]
    fn test_label_fallback_without_info() {
        let m: Measurement = serde_json::from_str(
            r#"{"uid": "m-2", "label": "7|Non_Target|Lymph_Node", "toolName": "ArrowAnnotate"}"#,
        )
        .unwrap();
        assert_eq!(m.lesion_index(), Some(7));
        assert_eq!(m.lesion_key().as_deref(), Some("Non_Target"));
        assert!(m.is_lymph_node());
        assert!(m.primary_stats().is_none());
    }

    #[test]
    fn test_unknown_tool_name() {
        let m: Measurement =
            serde_json::from_str(r#"{"uid": "m-3", "label": "", "toolName": "CircleROI"}"#).unwrap();
        assert_eq!(m.tool_name, ToolName::Unknown);
        assert_eq!(m.lesion_index(), None);
        assert_eq!(m.organ(), None);
    }

    #[test]
    fn test_label_info_to_label() {
        let info = MeasurementLabelInfo {
            lesion_index: Some(LabeledValue::new(3, "3")),
            lesion: Some(LabeledValue::new("New_Lesion".to_string(), "新病灶")),
            ..Default::default()
        };
        assert_eq!(info.to_label().encode(), "3|New_Lesion|NA");
    }

    #[test]
    fn test_baseline_timepoint() {
        let tp = Timepoint {
            study_instance_uid: "1.2".to_string(),
            trial_time_point_id: "00".to_string(),
            ..Default::default()
        };
        assert!(tp.is_baseline_visit());
        assert_eq!(tp.report_sod(), None);
    }
}
