//! # RECIST Core
//!
//! 病灶追踪系统的核心模块，提供测量数据模型、标签编码和统一错误定义。

pub mod error;
pub mod label;
pub mod models;

pub use error::{RecistError, Result};
pub use label::{LesionLabel, LABEL_PLACEHOLDER};
pub use models::*;
