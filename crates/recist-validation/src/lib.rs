//! # RECIST验证模块
//!
//! 提供病灶测量的分组、RECIST 1.1 规则校验和径线总和(SOD)计算：
//! - 测量分组：按病灶类型把测量划分为靶病灶、非靶病灶、新病灶和其他
//! - 规则校验：检查序号连续性、病灶分裂、器官信息、可测量性以及与上期的一致性
//! - SOD计算：按工具和器官选择长径或短径求和

pub mod classifier;
pub mod rules;
pub mod sod;
pub mod validator;

// 重新导出主要类型
pub use classifier::{classify, classify_key, ClassifiedMeasurements};
pub use rules::{GroupName, RecistRules};
pub use sod::{compute_sod, format_sod, SodSummary};
pub use validator::{
    MeasurementValidation, ProtocolValidator, RecistV11Validator, ValidationInfo,
    ValidationReport,
};

#[cfg(test)]
pub(crate) mod test_support;
