//! 错误定义模块

use thiserror::Error;

/// 病灶追踪系统统一错误类型
#[derive(Error, Debug)]
pub enum RecistError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据完整性错误: {0}")]
    DataIntegrity(String),

    #[error("标签格式错误: {0}")]
    InvalidLabel(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("外部服务错误: {0}")]
    Service(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("未处理的事件: 状态 {state} 不接受 {event}")]
    UnhandledEvent { state: String, event: String },

    #[error("状态机已终止")]
    MachineStopped,
}

/// 病灶追踪系统统一结果类型
pub type Result<T> = std::result::Result<T, RecistError>;
