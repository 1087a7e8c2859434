//! RECIST 1.1 规则校验
//!
//! 对本期各分组测量 (可选地结合上期测量) 执行规则检查，产出分组级警告和逐测量的标记。
//! 规则违例只作为警告累积，不会返回错误；输入测量保持不变。

use crate::classifier::ClassifiedMeasurements;
use crate::rules::{GroupName, RecistRules};
use recist_core::{Measurement, ToolName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const PROTOCOL: &str = "RECIST";
const VERSION: &str = "1.1";

/// 单个测量的校验结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementValidation {
    /// 所属分组，上期测量为 None
    pub group: Option<GroupName>,
    pub messages: Vec<String>,
    pub label_info_missing: bool,
    pub invalid_lesion_index: bool,
    pub lesion_split: bool,
    pub cavitation: bool,
    pub organ_info_missing: bool,
    pub normal_lesion_flag: bool,
    pub invalid_tool: bool,
    pub index_exceeded: bool,
    pub same_organ_exceeded: bool,
    pub missing_follow_up_measurement: bool,
    pub last_measurement_not_same_organ_or_side: bool,
    pub modality_mismatch: bool,
    pub no_last_measurement: bool,
    pub new_lesion_at_baseline: bool,
}

/// 分组级校验信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationInfo {
    pub protocol: String,
    pub version: String,
    pub target_group_warning_messages: Vec<String>,
    pub non_target_group_warning_messages: Vec<String>,
    pub new_lesion_group_warning_messages: Vec<String>,
}

impl ValidationInfo {
    fn new(protocol: &str, version: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            version: version.to_string(),
            target_group_warning_messages: Vec::new(),
            non_target_group_warning_messages: Vec::new(),
            new_lesion_group_warning_messages: Vec::new(),
        }
    }

    /// 获取分组警告
    pub fn group_messages(&self, group: GroupName) -> &[String] {
        match group {
            GroupName::Target => &self.target_group_warning_messages,
            GroupName::NewLesion => &self.new_lesion_group_warning_messages,
            GroupName::NonTarget => &self.non_target_group_warning_messages,
        }
    }

    fn group_messages_mut(&mut self, group: GroupName) -> &mut Vec<String> {
        match group {
            GroupName::Target => &mut self.target_group_warning_messages,
            GroupName::NewLesion => &mut self.new_lesion_group_warning_messages,
            GroupName::NonTarget => &mut self.non_target_group_warning_messages,
        }
    }
}

/// 完整校验报告
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub info: ValidationInfo,
    /// 以测量uid为键的逐测量结果
    pub measurements: BTreeMap<String, MeasurementValidation>,
}

impl ValidationReport {
    pub fn new(protocol: &str, version: &str) -> Self {
        Self {
            info: ValidationInfo::new(protocol, version),
            measurements: BTreeMap::new(),
        }
    }

    /// 获取指定测量的结果
    pub fn measurement(&self, uid: &str) -> Option<&MeasurementValidation> {
        self.measurements.get(uid)
    }

    /// 是否存在任何警告
    pub fn has_warnings(&self) -> bool {
        self.warning_count() > 0
    }

    /// 分组警告与逐测量消息的总数
    pub fn warning_count(&self) -> usize {
        let group_count: usize = GroupName::ALL
            .iter()
            .map(|group| self.info.group_messages(*group).len())
            .sum();
        let measurement_count: usize = self.measurements.values().map(|m| m.messages.len()).sum();
        group_count + measurement_count
    }

    /// 获取校验摘要
    pub fn summary(&self) -> String {
        if self.has_warnings() {
            format!(
                "{} {} 校验完成：{} 条提示",
                self.info.protocol,
                self.info.version,
                self.warning_count()
            )
        } else {
            format!("{} {} 校验完全通过", self.info.protocol, self.info.version)
        }
    }

    fn add_group_message(&mut self, group: GroupName, message: String) {
        let messages = self.info.group_messages_mut(group);
        if !messages.contains(&message) {
            messages.push(message);
        }
    }

    fn entry(&mut self, measurement: &Measurement) -> &mut MeasurementValidation {
        self.measurements.entry(measurement.uid.clone()).or_default()
    }

    /// 标记测量并追加消息
    fn flag<F>(&mut self, measurement: &Measurement, message: String, set: F)
    where
        F: FnOnce(&mut MeasurementValidation),
    {
        let entry = self.entry(measurement);
        set(entry);
        if !entry.messages.contains(&message) {
            entry.messages.push(message);
        }
    }
}

/// 疗效评价标准校验器接口
pub trait ProtocolValidator {
    /// 标准名称
    fn protocol(&self) -> &str;

    /// 标准版本
    fn version(&self) -> &str;

    /// 执行校验并返回报告
    fn validate(&mut self) -> &ValidationReport;
}

/// 单个分组的测量索引
#[derive(Debug, Default)]
struct GroupState<'a> {
    measurements: Vec<&'a Measurement>,
    /// 上期测量，None 表示未提供上期数据
    last_measurements: Option<Vec<&'a Measurement>>,
    by_index: BTreeMap<u32, Vec<&'a Measurement>>,
    by_organ: BTreeMap<String, Vec<&'a Measurement>>,
}

impl<'a> GroupState<'a> {
    fn set_measurements(&mut self, measurements: &[&'a Measurement]) {
        self.measurements = measurements.to_vec();
        self.by_index.clear();
        self.by_organ.clear();

        for measurement in &self.measurements {
            if let Some(index) = measurement.lesion_index() {
                self.by_index.entry(index).or_default().push(*measurement);
            }
            if let Some(organ) = measurement.organ() {
                self.by_organ.entry(organ).or_default().push(*measurement);
            }
        }
    }

    /// 上期中同序号的第一个测量
    fn first_last_measurement(&self, index: u32) -> Option<&'a Measurement> {
        self.last_measurements
            .as_ref()?
            .iter()
            .find(|m| m.lesion_index() == Some(index))
            .copied()
    }
}

/// RECIST 1.1 校验器
///
/// 每次编辑报告时新建一个实例，设置本期 (及上期) 分组测量后调用 [`RecistV11Validator::validate`]。
#[derive(Debug)]
pub struct RecistV11Validator<'a> {
    rules: RecistRules,
    is_baseline: bool,
    groups: BTreeMap<GroupName, GroupState<'a>>,
    report: ValidationReport,
}

impl<'a> RecistV11Validator<'a> {
    /// 创建使用默认阈值的校验器
    pub fn new() -> Self {
        Self::with_rules(RecistRules::default())
    }

    /// 创建使用指定阈值的校验器
    pub fn with_rules(rules: RecistRules) -> Self {
        let groups = GroupName::ALL
            .iter()
            .map(|group| (*group, GroupState::default()))
            .collect();

        Self {
            rules,
            is_baseline: false,
            groups,
            report: ValidationReport::new(PROTOCOL, VERSION),
        }
    }

    pub fn set_baseline(&mut self, is_baseline: bool) {
        self.is_baseline = is_baseline;
    }

    pub fn is_baseline(&self) -> bool {
        self.is_baseline
    }

    /// 设置本期某分组的测量
    pub fn set_measurements(&mut self, group: GroupName, measurements: &[&'a Measurement]) {
        self.group_mut(group).set_measurements(measurements);
    }

    /// 设置上期某分组的测量
    pub fn set_last_measurements(&mut self, group: GroupName, measurements: &[&'a Measurement]) {
        self.group_mut(group).last_measurements = Some(measurements.to_vec());
    }

    pub fn set_target_measurements(&mut self, measurements: &[&'a Measurement]) {
        self.set_measurements(GroupName::Target, measurements);
    }

    pub fn set_new_lesion_measurements(&mut self, measurements: &[&'a Measurement]) {
        self.set_measurements(GroupName::NewLesion, measurements);
    }

    pub fn set_non_target_measurements(&mut self, measurements: &[&'a Measurement]) {
        self.set_measurements(GroupName::NonTarget, measurements);
    }

    pub fn set_last_target_measurements(&mut self, measurements: &[&'a Measurement]) {
        self.set_last_measurements(GroupName::Target, measurements);
    }

    pub fn set_last_new_lesion_measurements(&mut self, measurements: &[&'a Measurement]) {
        self.set_last_measurements(GroupName::NewLesion, measurements);
    }

    pub fn set_last_non_target_measurements(&mut self, measurements: &[&'a Measurement]) {
        self.set_last_measurements(GroupName::NonTarget, measurements);
    }

    /// 一次设置本期三个分组
    pub fn set_classified(&mut self, classified: &ClassifiedMeasurements<'a>) {
        for group in GroupName::ALL {
            self.set_measurements(group, classified.group(group));
        }
    }

    /// 一次设置上期三个分组
    pub fn set_last_classified(&mut self, classified: &ClassifiedMeasurements<'a>) {
        for group in GroupName::ALL {
            self.set_last_measurements(group, classified.group(group));
        }
    }

    /// 获取最近一次校验的报告
    pub fn validation_info(&self) -> &ValidationInfo {
        &self.report.info
    }

    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn into_report(self) -> ValidationReport {
        self.report
    }

    fn group_mut(&mut self, group: GroupName) -> &mut GroupState<'a> {
        self.groups.entry(group).or_default()
    }

    /// 执行全部检查
    pub fn run(&mut self) -> &ValidationReport {
        let mut report = ValidationReport::new(PROTOCOL, VERSION);

        info!(
            "Validating measurements (baseline: {}): target={}, newLesion={}, nonTarget={}",
            self.is_baseline,
            self.group_len(GroupName::Target),
            self.group_len(GroupName::NewLesion),
            self.group_len(GroupName::NonTarget)
        );

        for (group, state) in &self.groups {
            for measurement in &state.measurements {
                report.entry(measurement).group = Some(*group);
            }

            self.check_label_info(*group, state, &mut report);
            self.check_index_continuity(*group, state, &mut report);
            self.check_lesion_split(*group, state, &mut report);
            self.check_cavitation(state, &mut report);
            self.check_organ_info(*group, state, &mut report);
            self.check_measurable_lesions(*group, state, &mut report);

            if !self.is_baseline {
                self.check_last_measurements(*group, state, &mut report);
            }
        }

        if let Some(state) = self.groups.get(&GroupName::Target) {
            self.check_target_index_cap(state, &mut report);
            self.check_same_organ_targets(state, &mut report);
        }

        if let Some(state) = self.groups.get(&GroupName::NewLesion) {
            self.check_baseline_new_lesions(state, &mut report);
        }

        info!("Validation finished: {}", report.summary());
        self.report = report;
        &self.report
    }

    fn group_len(&self, group: GroupName) -> usize {
        self.groups.get(&group).map(|s| s.measurements.len()).unwrap_or(0)
    }

    /// 结构化病灶信息缺失
    fn check_label_info(
        &self,
        _group: GroupName,
        state: &GroupState<'_>,
        report: &mut ValidationReport,
    ) {
        for measurement in &state.measurements {
            if measurement.measurement_label_info.is_none() {
                warn!(
                    "Measurement {} has no measurementLabelInfo, falling back to label '{}'",
                    measurement.uid, measurement.label
                );
                report.flag(measurement, "缺少病灶标注信息".to_string(), |v| {
                    v.label_info_missing = true
                });
            }
        }
    }

    /// 序号必须从1开始且连续
    fn check_index_continuity(
        &self,
        group: GroupName,
        state: &GroupState<'_>,
        report: &mut ValidationReport,
    ) {
        for measurement in &state.measurements {
            if measurement.lesion_index().is_none() {
                report.flag(measurement, "病灶序号无效".to_string(), |v| {
                    v.invalid_lesion_index = true
                });
                report.add_group_message(group, "存在无效的病灶序号".to_string());
            }
        }

        let indices: Vec<u32> = state.by_index.keys().copied().collect();
        let Some(first) = indices.first() else {
            return;
        };

        if *first != 1 {
            debug!("{} indices start at {}", group, first);
            report.add_group_message(group, "序号从1开始".to_string());
        }

        if indices.windows(2).any(|pair| pair[1] != pair[0] + 1) {
            debug!("{} indices are not continuous: {:?}", group, indices);
            report.add_group_message(group, "序号不连续".to_string());
        }
    }

    /// 同一序号只能对应一个病灶
    fn check_lesion_split(
        &self,
        group: GroupName,
        state: &GroupState<'_>,
        report: &mut ValidationReport,
    ) {
        for (index, measurements) in &state.by_index {
            if measurements.len() < 2 {
                continue;
            }

            for measurement in measurements {
                report.flag(measurement, format!("序号{}对应多个测量，存在病灶分裂", index), |v| {
                    v.lesion_split = true
                });
            }
            report.add_group_message(group, format!("序号{}存在病灶分裂", index));
        }
    }

    /// 空洞仅作提示
    fn check_cavitation(&self, state: &GroupState<'_>, report: &mut ValidationReport) {
        for measurement in &state.measurements {
            if measurement.is_cavitation() {
                report.flag(measurement, "病灶存在空洞".to_string(), |v| v.cavitation = true);
            }
        }
    }

    fn check_organ_info(
        &self,
        group: GroupName,
        state: &GroupState<'_>,
        report: &mut ValidationReport,
    ) {
        for measurement in &state.measurements {
            if measurement.organ().is_none() {
                report.flag(measurement, "未填写器官信息".to_string(), |v| {
                    v.organ_info_missing = true
                });
                report.add_group_message(group, "存在未填写器官信息的病灶".to_string());
            }
        }
    }

    /// 可测量病灶阈值，以及基线靶病灶必须双向测量
    fn check_measurable_lesions(
        &self,
        group: GroupName,
        state: &GroupState<'_>,
        report: &mut ValidationReport,
    ) {
        let baseline_target = self.is_baseline && group == GroupName::Target;

        for measurement in &state.measurements {
            if measurement.tool_name != ToolName::Bidirectional {
                if baseline_target {
                    report.flag(measurement, "基线靶病灶需使用双向测量".to_string(), |v| {
                        v.invalid_tool = true
                    });
                    report.add_group_message(group, "基线靶病灶必须使用双向测量工具".to_string());
                }
                continue;
            }

            let Some(stats) = measurement.primary_stats() else {
                continue;
            };

            let message = if measurement.is_lymph_node() {
                match stats.width {
                    Some(width) if width < self.rules.lymph_node_short_axis_mm => Some(format!(
                        "淋巴结短径小于{}mm，为正常病灶",
                        self.rules.lymph_node_short_axis_mm
                    )),
                    _ => None,
                }
            } else {
                match stats.length {
                    Some(length) if length < self.rules.long_axis_mm => Some(format!(
                        "长径小于{}mm，为正常病灶",
                        self.rules.long_axis_mm
                    )),
                    _ => None,
                }
            };

            if let Some(message) = message {
                report.flag(measurement, message, |v| v.normal_lesion_flag = true);
                if baseline_target {
                    report.add_group_message(group, "基线靶病灶必须为可测量病灶".to_string());
                }
            }
        }
    }

    /// 与上期测量对比，同序号有多个上期测量时取第一个
    fn check_last_measurements(
        &self,
        group: GroupName,
        state: &GroupState<'_>,
        report: &mut ValidationReport,
    ) {
        let Some(last_measurements) = &state.last_measurements else {
            return;
        };

        for last in last_measurements {
            let Some(index) = last.lesion_index() else {
                continue;
            };
            if !state.by_index.contains_key(&index) {
                report.flag(last, "缺少本期对应测量".to_string(), |v| {
                    v.missing_follow_up_measurement = true
                });
                report.add_group_message(group, format!("序号{}缺少本期对应测量", index));
            }
        }

        for measurement in &state.measurements {
            let Some(index) = measurement.lesion_index() else {
                continue;
            };

            let Some(last) = state.first_last_measurement(index) else {
                if group == GroupName::NewLesion {
                    report.flag(measurement, "首次发现新病灶".to_string(), |v| {
                        v.no_last_measurement = true
                    });
                } else {
                    report.flag(measurement, "上期不存在该序号的病灶".to_string(), |v| {
                        v.no_last_measurement = true
                    });
                    report.add_group_message(group, format!("序号{}在上期不存在", index));
                }
                continue;
            };

            let same_site = measurement.organ() == last.organ()
                && measurement.organ_location() == last.organ_location()
                && measurement.organ_lateral() == last.organ_lateral();
            if !same_site {
                report.flag(measurement, "与上期测量的器官或部位不一致".to_string(), |v| {
                    v.last_measurement_not_same_organ_or_side = true
                });
                report.add_group_message(group, format!("序号{}与上期器官或部位不一致", index));
            }

            if let (Some(current), Some(previous)) = (&measurement.modality, &last.modality) {
                if current != previous {
                    report.flag(measurement, "与上期检查模态不一致".to_string(), |v| {
                        v.modality_mismatch = true
                    });
                    report.add_group_message(group, format!("序号{}与上期检查模态不一致", index));
                }
            }
        }
    }

    /// 靶病灶序号上限
    fn check_target_index_cap(&self, state: &GroupState<'_>, report: &mut ValidationReport) {
        let max = self.rules.max_target_lesions;

        for measurement in &state.measurements {
            match measurement.lesion_index() {
                Some(index) if index > max => {
                    report.flag(measurement, format!("靶病灶序号不能超过{}", max), |v| {
                        v.index_exceeded = true
                    });
                    report.add_group_message(
                        GroupName::Target,
                        format!("靶病灶总数不能超过{}个", max),
                    );
                }
                _ => {}
            }
        }
    }

    /// 同一器官靶病灶上限
    fn check_same_organ_targets(&self, state: &GroupState<'_>, report: &mut ValidationReport) {
        let max = self.rules.max_target_lesions_per_organ;

        for (organ, measurements) in &state.by_organ {
            let mut indices: Vec<u32> =
                measurements.iter().filter_map(|m| m.lesion_index()).collect();
            indices.sort_unstable();
            indices.dedup();

            if indices.len() <= max {
                continue;
            }

            debug!("Organ {} has {} target lesions: {:?}", organ, indices.len(), indices);
            for measurement in measurements {
                let message = format!("同一器官({})靶病灶不能超过{}个", organ, max);
                report.flag(measurement, message, |v| v.same_organ_exceeded = true);
            }
            report.add_group_message(GroupName::Target, format!("靶病灶不能超过{}个", max));
        }
    }

    /// 基线不能出现新病灶
    fn check_baseline_new_lesions(&self, state: &GroupState<'_>, report: &mut ValidationReport) {
        if !self.is_baseline || state.measurements.is_empty() {
            return;
        }

        for measurement in &state.measurements {
            report.flag(measurement, "基线不能出现新病灶".to_string(), |v| {
                v.new_lesion_at_baseline = true
            });
        }
        report.add_group_message(GroupName::NewLesion, "基线不能出现新病灶!".to_string());
    }
}

impl Default for RecistV11Validator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolValidator for RecistV11Validator<'_> {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn validate(&mut self) -> &ValidationReport {
        self.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use crate::test_support::{bidirectional, measurement};

    fn validate_targets(targets: &[Measurement], is_baseline: bool) -> ValidationReport {
        let refs: Vec<&Measurement> = targets.iter().collect();
        let mut validator = RecistV11Validator::new();
        validator.set_baseline(is_baseline);
        validator.set_target_measurements(&refs);
        validator.validate().clone()
    }

    #[test]
    fn test_index_must_start_at_one() {
        let targets = vec![
            bidirectional("a", 2, "Target", "Liver", 20.0, 12.0),
            bidirectional("b", 3, "Target", "Lung", 20.0, 12.0),
        ];
        let report = validate_targets(&targets, false);
        assert!(report.info.target_group_warning_messages.contains(&"序号从1开始".to_string()));
        assert!(!report.info.target_group_warning_messages.contains(&"序号不连续".to_string()));
    }

    #[test]
    fn test_index_gap() {
        let targets = vec![
            bidirectional("a", 1, "Target", "Liver", 20.0, 12.0),
            bidirectional("b", 3, "Target", "Lung", 20.0, 12.0),
        ];
        let report = validate_targets(&targets, false);
        assert_eq!(report.info.target_group_warning_messages, vec!["序号不连续".to_string()]);
    }

    #[test]
    fn test_lesion_split() {
        let targets = vec![
            bidirectional("a", 1, "Target", "Liver", 20.0, 12.0),
            bidirectional("b", 1, "Target", "Liver", 18.0, 11.0),
            bidirectional("c", 2, "Target", "Lung", 18.0, 11.0),
        ];
        let report = validate_targets(&targets, false);
        assert!(report.measurement("a").unwrap().lesion_split);
        assert!(report.measurement("b").unwrap().lesion_split);
        assert!(!report.measurement("c").unwrap().lesion_split);
        assert!(report.info.target_group_warning_messages.contains(&"序号1存在病灶分裂".to_string()));
    }

    #[test]
    fn test_cavitation_is_informational() {
        let mut m = bidirectional("a", 1, "Target", "Lung", 20.0, 12.0);
        if let Some(info) = m.measurement_label_info.as_mut() {
            info.cavitation = true;
        }
        let report = validate_targets(&[m], false);
        let result = report.measurement("a").unwrap();
        assert!(result.cavitation);
        assert!(report.info.target_group_warning_messages.is_empty());
    }

    #[test]
    fn test_organ_missing() {
        let targets = vec![bidirectional("a", 1, "Target", "", 20.0, 12.0)];
        let report = validate_targets(&targets, false);
        assert!(report.measurement("a").unwrap().organ_info_missing);
        assert!(report
            .info
            .target_group_warning_messages
            .contains(&"存在未填写器官信息的病灶".to_string()));
    }

    #[test]
    fn test_lymph_node_short_axis() {
        let targets = vec![
            bidirectional("small", 1, "Target", "Lymph_Node", 25.0, 14.9),
            bidirectional("large", 2, "Target", "Lymph_Node", 25.0, 15.0),
            bidirectional("liver", 3, "Target", "Liver", 9.5, 30.0),
        ];
        let report = validate_targets(&targets, false);
        assert!(report.measurement("small").unwrap().normal_lesion_flag);
        assert!(!report.measurement("large").unwrap().normal_lesion_flag);
        assert!(report.measurement("liver").unwrap().normal_lesion_flag);
        assert!(!report
            .info
            .target_group_warning_messages
            .contains(&"基线靶病灶必须为可测量病灶".to_string()));

        let report = validate_targets(&targets, true);
        assert!(report
            .info
            .target_group_warning_messages
            .contains(&"基线靶病灶必须为可测量病灶".to_string()));
    }

    #[test]
    fn test_baseline_target_requires_bidirectional() {
        let targets = vec![
            bidirectional("a", 1, "Target", "Liver", 20.0, 12.0),
            measurement("b", 2, "Target", "Lung"),
        ];
        let report = validate_targets(&targets, true);
        assert!(report.measurement("b").unwrap().invalid_tool);
        assert!(!report.measurement("a").unwrap().invalid_tool);
        assert!(report
            .info
            .target_group_warning_messages
            .contains(&"基线靶病灶必须使用双向测量工具".to_string()));

        let report = validate_targets(&targets, false);
        assert!(!report.measurement("b").unwrap().invalid_tool);
    }

    #[test]
    fn test_target_cap_boundary() {
        let mut targets: Vec<Measurement> = (1..=5)
            .map(|i| bidirectional(&format!("t{}", i), i, "Target", &format!("Organ{}", i), 20.0, 12.0))
            .collect();
        let report = validate_targets(&targets, false);
        assert!(report.info.target_group_warning_messages.is_empty());

        targets.push(bidirectional("t6", 6, "Target", "Organ6", 20.0, 12.0));
        let report = validate_targets(&targets, false);
        assert!(report.measurement("t6").unwrap().index_exceeded);
        assert!(!report.measurement("t5").unwrap().index_exceeded);
        assert!(report
            .info
            .target_group_warning_messages
            .contains(&"靶病灶总数不能超过5个".to_string()));
    }

    #[test]
    fn test_same_organ_cap_boundary() {
        let mut targets = vec![
            bidirectional("a", 1, "Target", "Liver", 20.0, 12.0),
            bidirectional("b", 2, "Target", "Liver", 20.0, 12.0),
        ];
        let report = validate_targets(&targets, false);
        assert!(report.info.target_group_warning_messages.is_empty());

        targets.push(bidirectional("c", 3, "Target", "Liver", 20.0, 12.0));
        let report = validate_targets(&targets, false);
        assert!(report
            .info
            .target_group_warning_messages
            .contains(&"靶病灶不能超过2个".to_string()));
        for uid in ["a", "b", "c"] {
            assert!(report.measurement(uid).unwrap().same_organ_exceeded);
        }
    }

    #[test]
    fn test_baseline_new_lesion_prohibition() {
        let input = vec![
            bidirectional("t1", 1, "Target", "Liver", 20.0, 12.0),
            measurement("n1", 1, "New_Lesion", "Bone"),
        ];
        let classified = classify(&input);

        let mut validator = RecistV11Validator::new();
        validator.set_baseline(true);
        validator.set_classified(&classified);
        let report = validator.validate();
        assert!(report
            .info
            .new_lesion_group_warning_messages
            .contains(&"基线不能出现新病灶!".to_string()));

        let mut validator = RecistV11Validator::new();
        validator.set_baseline(false);
        validator.set_classified(&classified);
        let report = validator.validate();
        assert!(!report
            .info
            .new_lesion_group_warning_messages
            .contains(&"基线不能出现新病灶!".to_string()));
    }

    #[test]
    fn test_longitudinal_comparison() {
        let last = vec![
            bidirectional("p1", 1, "Target", "Liver", 20.0, 12.0),
            bidirectional("p2", 2, "Target", "Lung", 20.0, 12.0),
            measurement("pn1", 1, "New_Lesion", "Bone"),
        ];
        let mut moved = bidirectional("c1", 1, "Target", "Kidney", 18.0, 11.0);
        moved.modality = Some("MR".to_string());
        let current = vec![
            moved,
            bidirectional("c3", 3, "Target", "Lung", 15.0, 10.0),
            measurement("cn1", 1, "New_Lesion", "Bone"),
            measurement("cn2", 2, "New_Lesion", "Brain"),
        ];

        let last_classified = classify(&last);
        let current_classified = classify(&current);

        let mut validator = RecistV11Validator::new();
        validator.set_classified(&current_classified);
        validator.set_last_classified(&last_classified);
        let report = validator.validate().clone();

        let target_messages = &report.info.target_group_warning_messages;
        assert!(target_messages.contains(&"序号2缺少本期对应测量".to_string()));
        assert!(target_messages.contains(&"序号3在上期不存在".to_string()));
        assert!(target_messages.contains(&"序号1与上期器官或部位不一致".to_string()));
        assert!(target_messages.contains(&"序号1与上期检查模态不一致".to_string()));

        assert!(report.measurement("p2").unwrap().missing_follow_up_measurement);
        let c1 = report.measurement("c1").unwrap();
        assert!(c1.last_measurement_not_same_organ_or_side);
        assert!(c1.modality_mismatch);

        let cn2 = report.measurement("cn2").unwrap();
        assert!(cn2.no_last_measurement);
        assert!(cn2.messages.contains(&"首次发现新病灶".to_string()));
        assert!(!report
            .info
            .new_lesion_group_warning_messages
            .iter()
            .any(|m| m.contains("上期不存在")));
        assert!(!report.measurement("cn1").unwrap().no_last_measurement);
    }

    #[test]
    fn test_longitudinal_skipped_at_baseline() {
        let last = vec![bidirectional("p1", 1, "Target", "Liver", 20.0, 12.0)];
        let current = vec![bidirectional("c2", 1, "Target", "Lung", 20.0, 12.0)];
        let last_refs: Vec<&Measurement> = last.iter().collect();
        let current_refs: Vec<&Measurement> = current.iter().collect();

        let mut validator = RecistV11Validator::new();
        validator.set_baseline(true);
        validator.set_target_measurements(&current_refs);
        validator.set_last_target_measurements(&last_refs);
        let report = validator.validate();
        assert!(report.measurement("p1").is_none());
        assert!(!report.measurement("c2").unwrap().last_measurement_not_same_organ_or_side);
    }

    #[test]
    fn test_first_last_match_wins_on_split() {
        let last = vec![
            bidirectional("p1a", 1, "Target", "Liver", 20.0, 12.0),
            bidirectional("p1b", 1, "Target", "Lung", 20.0, 12.0),
        ];
        let current = vec![bidirectional("c1", 1, "Target", "Liver", 20.0, 12.0)];
        let last_refs: Vec<&Measurement> = last.iter().collect();
        let current_refs: Vec<&Measurement> = current.iter().collect();

        let mut validator = RecistV11Validator::new();
        validator.set_target_measurements(&current_refs);
        validator.set_last_target_measurements(&last_refs);
        let report = validator.validate();
        assert!(!report.measurement("c1").unwrap().last_measurement_not_same_organ_or_side);
    }

    #[test]
    fn test_missing_label_info_degrades() {
        let mut m = bidirectional("a", 1, "Target", "Liver", 20.0, 12.0);
        m.measurement_label_info = None;
        let report = validate_targets(&[m], false);
        let result = report.measurement("a").unwrap();
        assert!(result.label_info_missing);
        assert!(!result.organ_info_missing);
    }

    #[test]
    fn test_validate_is_idempotent() {
        let input = vec![
            bidirectional("a", 1, "Target", "Liver", 8.0, 5.0),
            bidirectional("b", 3, "Target", "Liver", 20.0, 12.0),
            measurement("n", 1, "New_Lesion", "Bone"),
        ];
        let classified = classify(&input);

        let mut validator = RecistV11Validator::new();
        validator.set_baseline(true);
        validator.set_classified(&classified);
        let first = validator.validate().clone();
        let second = validator.validate().clone();
        assert_eq!(first, second);
        assert!(first.has_warnings());
        assert_eq!(first.info.protocol, "RECIST");
        assert_eq!(first.info.version, "1.1");
    }

    #[test]
    fn test_clean_report() {
        let report = validate_targets(&[bidirectional("a", 1, "Target", "Liver", 20.0, 12.0)], true);
        assert!(!report.has_warnings());
        assert_eq!(report.summary(), "RECIST 1.1 校验完全通过");
    }
}
