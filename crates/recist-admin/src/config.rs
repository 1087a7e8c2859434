//! 配置管理
//!
//! 按 "默认值 < 配置文件 < 环境变量" 的顺序合并配置，
//! 环境变量使用 `RECIST` 前缀和 `__` 分隔符，例如 `RECIST__VALIDATION__LONG_AXIS_MM=12`。

use crate::logging::LogFormat;
use anyhow::{Context, Result};
use ::config::{Config, Environment, File};
use recist_tracking::{
    MeasurementService, PromptService, ReportService, TrackingConfig, TrackingEngine,
};
use recist_validation::RecistRules;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "RECIST";

/// 环境变量层级分隔符
pub const ENV_SEPARATOR: &str = "__";

/// 完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecistConfig {
    /// RECIST 阈值
    pub validation: RecistRules,
    /// 追踪状态机配置
    pub tracking: TrackingConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或 EnvFilter 指令，如 "info,recist_validation=debug"
    pub level: String,
    /// 日志格式
    pub format: LogFormat,
    /// 是否输出模块路径
    pub with_target: bool,
}

impl RecistConfig {
    /// 按配置的阈值和追踪模式创建追踪引擎
    pub fn tracking_engine(
        &self,
        prompts: Arc<dyn PromptService>,
        measurements: Arc<dyn MeasurementService>,
        reports: Arc<dyn ReportService>,
    ) -> TrackingEngine {
        TrackingEngine::new(prompts, measurements, reports)
            .with_config(self.tracking.clone())
            .with_rules(self.validation.clone())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Full,
            with_target: true,
        }
    }
}

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<RecistConfig>>,
    /// 配置文件路径，None 时只使用默认值和环境变量
    config_path: Option<String>,
    /// 配置验证器
    validator: ConfigValidator,
}

impl ConfigManager {
    /// 加载并验证配置
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        Self::with_config(config, config_path)
    }

    /// 使用已有配置创建管理器
    pub fn with_config(config: RecistConfig, config_path: Option<&str>) -> Result<Self> {
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.map(str::to_string),
            validator,
        })
    }

    /// 从文件和环境变量加载配置
    pub fn load_config(config_path: Option<&str>) -> Result<RecistConfig> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration sources")?;

        let config: RecistConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded successfully from: {}", path),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 获取配置
    pub async fn get_config(&self) -> RecistConfig {
        let config = self.config.read().await;
        config.clone()
    }

    /// 更新配置，有配置文件时同时写回文件
    pub async fn update_config(&self, new_config: RecistConfig) -> Result<()> {
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        if let Some(path) = &self.config_path {
            self.save_config(path).await?;
        }

        info!("Configuration updated successfully");
        Ok(())
    }

    /// 保存配置到文件
    pub async fn save_config(&self, path: &str) -> Result<()> {
        let config = self.config.read().await;
        let config_str =
            toml::to_string_pretty(&*config).context("Failed to serialize configuration")?;

        tokio::fs::write(path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", path);
        Ok(())
    }

    /// 按点分路径读取配置值，如 "validation.max_target_lesions"
    pub async fn get_value<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let config = self.config.read().await;
        let config_json =
            serde_json::to_value(&*config).context("Failed to serialize config to JSON")?;

        let mut current = &config_json;
        for part in path.split('.') {
            current = current
                .as_object()
                .and_then(|map| map.get(part))
                .ok_or_else(|| anyhow::anyhow!("Configuration path not found: {}", path))?;
        }

        debug!("Configuration value read: {}", path);
        serde_json::from_value(current.clone())
            .context("Failed to deserialize configuration value")
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&RecistConfig) -> Result<()>,
    /// 错误消息
    error_message: &'static str,
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "validation.lymph_node_short_axis_mm",
                validator: |config| {
                    if config.validation.lymph_node_short_axis_mm > 0.0 {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("Lymph node threshold must be positive"))
                    }
                },
                error_message: "Invalid lymph node short axis threshold",
            },
            ValidationRule {
                field_path: "validation.long_axis_mm",
                validator: |config| {
                    if config.validation.long_axis_mm > 0.0 {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("Long axis threshold must be positive"))
                    }
                },
                error_message: "Invalid long axis threshold",
            },
            ValidationRule {
                field_path: "validation.max_target_lesions",
                validator: |config| {
                    if config.validation.max_target_lesions == 0 {
                        Err(anyhow::anyhow!("Max target lesions cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid max target lesions",
            },
            ValidationRule {
                field_path: "validation.max_target_lesions_per_organ",
                validator: |config| {
                    let per_organ = config.validation.max_target_lesions_per_organ;
                    if per_organ == 0 || per_organ > config.validation.max_target_lesions as usize {
                        Err(anyhow::anyhow!(
                            "Per-organ limit {} must be between 1 and {}",
                            per_organ,
                            config.validation.max_target_lesions
                        ))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid max target lesions per organ",
            },
            ValidationRule {
                field_path: "validation.target_nm_nominal_mm",
                validator: |config| {
                    if config.validation.target_nm_nominal_mm < 0.0 {
                        Err(anyhow::anyhow!("Nominal value cannot be negative"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid Target_NM nominal value",
            },
            ValidationRule {
                field_path: "logging.level",
                validator: |config| {
                    tracing_subscriber::EnvFilter::try_new(&config.logging.level)
                        .map(|_| ())
                        .map_err(|e| anyhow::anyhow!("{}", e))
                },
                error_message: "Invalid log level",
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &RecistConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("{}: {}", rule.error_message, e));
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}
