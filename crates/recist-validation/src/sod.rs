//! 径线总和 (SOD) 计算

use crate::rules::{RecistRules, TARGET_NM};
use recist_core::{Measurement, ToolName};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 单个靶病灶对SOD的贡献 (mm)
pub fn sod_contribution(measurement: &Measurement, rules: &RecistRules) -> f64 {
    if measurement.lesion_key().as_deref() == Some(TARGET_NM) {
        return rules.target_nm_nominal_mm;
    }

    let Some(stats) = measurement.primary_stats() else {
        return 0.0;
    };

    let value = match measurement.tool_name {
        ToolName::Bidirectional if measurement.is_lymph_node() => stats.width,
        ToolName::Bidirectional | ToolName::Length => stats.length,
        _ => None,
    };

    value.unwrap_or(0.0)
}

/// 计算靶病灶SOD，保留一位小数
pub fn compute_sod(targets: &[&Measurement], rules: &RecistRules) -> f64 {
    let total: f64 = targets.iter().map(|m| sod_contribution(m, rules)).sum();
    let sod = round_one_decimal(total);
    debug!("Computed SOD {} from {} target measurements", sod, targets.len());
    sod
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// 以一位小数格式化SOD
pub fn format_sod(value: f64) -> String {
    format!("{:.1}", round_one_decimal(value))
}

/// 自动计算值与用户填写值
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SodSummary {
    pub auto_calculated: f64,
    pub user_supplied: Option<f64>,
}

impl SodSummary {
    pub fn new(auto_calculated: f64) -> Self {
        Self {
            auto_calculated,
            user_supplied: None,
        }
    }

    pub fn with_user_value(mut self, value: Option<f64>) -> Self {
        self.user_supplied = value;
        self
    }

    /// 报告中使用的SOD
    pub fn effective(&self) -> f64 {
        self.user_supplied.unwrap_or(self.auto_calculated)
    }

    /// 用户填写值与自动计算值是否不同 (按一位小数比较)
    pub fn differs_from_auto(&self) -> bool {
        match self.user_supplied {
            Some(user) => format_sod(user) != format_sod(self.auto_calculated),
            None => false,
        }
    }
}
