//! # 病灶追踪模块
//!
//! 管理阅片会话中"哪些检查/序列正在被追踪测量"的完整生命周期，包括：
//! - 追踪状态机：声明式状态转换表、守卫条件和上下文动作
//! - 外部协作者接口：提示对话框、测量存储、报告获取
//! - 访视选择：从访视列表中确定基线、上期、最低SOD和对照访视
//! - 追踪引擎：串行处理事件、调用异步服务，并结合校验和SOD生成报告草稿

pub mod context;
pub mod engine;
pub mod services;
pub mod state_machine;
pub mod timepoint;

// 重新导出主要类型
pub use context::TrackingContext;
pub use engine::{
    build_report_draft, MeasurementCounts, ReportDraft, TrackingConfig, TrackingEngine,
};
pub use services::{
    InMemoryMeasurementService, InMemoryReportService, InvokedService, MeasurementService,
    PromptService, ReportService, ScriptedPromptService,
};
pub use state_machine::{
    Action, Effect, EventKind, Guard, PromptResult, TrackingEvent, TrackingState,
    TrackingStateMachine, Transition, UserResponse,
};
pub use timepoint::TimepointSelection;
