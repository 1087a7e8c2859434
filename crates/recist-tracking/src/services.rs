//! 外部协作者接口及内存实现

use crate::context::TrackingContext;
use crate::state_machine::{PromptResult, TrackingEvent, UserResponse};
use async_trait::async_trait;
use recist_core::{Measurement, RecistError, Report, Result, TaskInfo, Timepoint};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// 进入调用状态时触发的服务
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum InvokedService {
    PromptBeginTracking,
    PromptTrackNewStudy,
    PromptTrackNewSeries,
    PromptSaveReport,
    PromptHydrateStructuredReport,
    HydrateStructuredReport,
    UpdateBackendReport,
}

/// 用户提示对话框
#[async_trait]
pub trait PromptService: Send + Sync {
    async fn prompt_begin_tracking(
        &self,
        context: &TrackingContext,
        event: &TrackingEvent,
    ) -> Result<PromptResult>;

    async fn prompt_track_new_series(
        &self,
        context: &TrackingContext,
        event: &TrackingEvent,
    ) -> Result<PromptResult>;

    async fn prompt_track_new_study(
        &self,
        context: &TrackingContext,
        event: &TrackingEvent,
    ) -> Result<PromptResult>;

    /// 确认并提交报告，成功时返回 CreateReport
    async fn prompt_save_report(
        &self,
        context: &TrackingContext,
        event: &TrackingEvent,
    ) -> Result<PromptResult>;

    async fn prompt_hydrate_structured_report(
        &self,
        context: &TrackingContext,
        event: &TrackingEvent,
    ) -> Result<PromptResult>;
}

/// 查看器中的测量存储
#[async_trait]
pub trait MeasurementService: Send + Sync {
    async fn get_measurements(&self) -> Result<Vec<Measurement>>;

    /// 加载可编辑测量
    async fn add_raw_measurement(&self, measurement: Measurement) -> Result<()>;

    /// 加载对照访视的只读测量
    async fn add_readonly_measurement(&self, measurement: Measurement) -> Result<()>;

    async fn remove_measurement(&self, uid: &str) -> Result<()>;

    async fn jump_to_measurement(&self, viewport_id: Option<&str>, uid: &str) -> Result<()>;
}

/// 报告后端
#[async_trait]
pub trait ReportService: Send + Sync {
    /// 按后端顺序返回任务的全部访视
    async fn fetch_timepoints(&self, task: &TaskInfo) -> Result<Vec<Timepoint>>;

    /// 读取结构化报告序列中保存的测量
    async fn fetch_structured_report(
        &self,
        study_instance_uid: &str,
        series_instance_uid: &str,
    ) -> Result<Report>;
}

/// 内存测量存储
#[derive(Debug, Default)]
pub struct InMemoryMeasurementService {
    measurements: RwLock<Vec<Measurement>>,
    readonly: RwLock<Vec<Measurement>>,
    jumps: RwLock<Vec<String>>,
}

impl InMemoryMeasurementService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn readonly_measurements(&self) -> Vec<Measurement> {
        self.readonly.read().await.clone()
    }

    /// 按时间顺序记录的跳转目标
    pub async fn jumps(&self) -> Vec<String> {
        self.jumps.read().await.clone()
    }
}

#[async_trait]
impl MeasurementService for InMemoryMeasurementService {
    async fn get_measurements(&self) -> Result<Vec<Measurement>> {
        Ok(self.measurements.read().await.clone())
    }

    async fn add_raw_measurement(&self, measurement: Measurement) -> Result<()> {
        let mut measurements = self.measurements.write().await;
        measurements.retain(|m| m.uid != measurement.uid);
        measurements.push(measurement);
        Ok(())
    }

    async fn add_readonly_measurement(&self, measurement: Measurement) -> Result<()> {
        let mut readonly = self.readonly.write().await;
        readonly.retain(|m| m.uid != measurement.uid);
        readonly.push(measurement);
        Ok(())
    }

    async fn remove_measurement(&self, uid: &str) -> Result<()> {
        let mut measurements = self.measurements.write().await;
        let before = measurements.len();
        measurements.retain(|m| m.uid != uid);
        if measurements.len() == before {
            return Err(RecistError::NotFound(format!("测量 {}", uid)));
        }
        Ok(())
    }

    async fn jump_to_measurement(&self, viewport_id: Option<&str>, uid: &str) -> Result<()> {
        debug!("Jump to measurement {} in viewport {:?}", uid, viewport_id);
        self.jumps.write().await.push(uid.to_string());
        Ok(())
    }
}

/// 按顺序返回预置结果的提示服务，用于无界面运行和测试
#[derive(Debug, Default)]
pub struct ScriptedPromptService {
    responses: Mutex<VecDeque<std::result::Result<PromptResult, String>>>,
}

impl ScriptedPromptService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_response(&self, response: UserResponse) {
        self.push_result(PromptResult::response(response)).await;
    }

    pub async fn push_result(&self, result: PromptResult) {
        self.responses.lock().await.push_back(Ok(result));
    }

    /// 下一次调用返回错误
    pub async fn push_error(&self, message: impl Into<String>) {
        self.responses.lock().await.push_back(Err(message.into()));
    }

    pub async fn remaining(&self) -> usize {
        self.responses.lock().await.len()
    }

    async fn next(&self, prompt: &str) -> Result<PromptResult> {
        info!("Prompt requested: {}", prompt);
        match self.responses.lock().await.pop_front() {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(RecistError::Service(message)),
            None => Err(RecistError::Service(format!("{} 没有预置的用户响应", prompt))),
        }
    }
}

#[async_trait]
impl PromptService for ScriptedPromptService {
    async fn prompt_begin_tracking(
        &self,
        _: &TrackingContext,
        _: &TrackingEvent,
    ) -> Result<PromptResult> {
        self.next("promptBeginTracking").await
    }

    async fn prompt_track_new_series(
        &self,
        _: &TrackingContext,
        _: &TrackingEvent,
    ) -> Result<PromptResult> {
        self.next("promptTrackNewSeries").await
    }

    async fn prompt_track_new_study(
        &self,
        _: &TrackingContext,
        _: &TrackingEvent,
    ) -> Result<PromptResult> {
        self.next("promptTrackNewStudy").await
    }

    async fn prompt_save_report(
        &self,
        _: &TrackingContext,
        _: &TrackingEvent,
    ) -> Result<PromptResult> {
        self.next("promptSaveReport").await
    }

    async fn prompt_hydrate_structured_report(
        &self,
        _: &TrackingContext,
        _: &TrackingEvent,
    ) -> Result<PromptResult> {
        self.next("promptHydrateStructuredReport").await
    }
}

/// 内存报告后端
#[derive(Debug, Default)]
pub struct InMemoryReportService {
    timepoints: Vec<Timepoint>,
    structured_reports: HashMap<(String, String), Report>,
}

impl InMemoryReportService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timepoints(mut self, timepoints: Vec<Timepoint>) -> Self {
        self.timepoints = timepoints;
        self
    }

    pub fn with_structured_report(
        mut self,
        study_instance_uid: impl Into<String>,
        series_instance_uid: impl Into<String>,
        report: Report,
    ) -> Self {
        self.structured_reports
            .insert((study_instance_uid.into(), series_instance_uid.into()), report);
        self
    }
}

#[async_trait]
impl ReportService for InMemoryReportService {
    async fn fetch_timepoints(&self, task: &TaskInfo) -> Result<Vec<Timepoint>> {
        debug!("Fetching {} timepoints for task {}", self.timepoints.len(), task.task_id);
        Ok(self.timepoints.clone())
    }

    async fn fetch_structured_report(
        &self,
        study_instance_uid: &str,
        series_instance_uid: &str,
    ) -> Result<Report> {
        self.structured_reports
            .get(&(study_instance_uid.to_string(), series_instance_uid.to_string()))
            .cloned()
            .ok_or_else(|| {
                RecistError::NotFound(format!(
                    "结构化报告 {}/{}",
                    study_instance_uid, series_instance_uid
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recist_core::ToolName;

    fn measurement(uid: &str) -> Measurement {
        Measurement {
            uid: uid.to_string(),
            label: "1|Target|Liver".to_string(),
            measurement_label_info: None,
            tool_name: ToolName::Length,
            data: Default::default(),
            reference_study_uid: "s1".to_string(),
            reference_series_uid: "se1".to_string(),
            sop_instance_uid: String::new(),
            modality: None,
        }
    }

    #[tokio::test]
    async fn test_in_memory_measurements() {
        let service = InMemoryMeasurementService::new();
        service.add_raw_measurement(measurement("a")).await.unwrap();
        service.add_raw_measurement(measurement("a")).await.unwrap();
        service.add_readonly_measurement(measurement("b")).await.unwrap();

        assert_eq!(service.get_measurements().await.unwrap().len(), 1);
        assert_eq!(service.readonly_measurements().await.len(), 1);

        service.remove_measurement("a").await.unwrap();
        assert!(service.remove_measurement("a").await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_prompts_in_order() {
        let service = ScriptedPromptService::new();
        service.push_response(UserResponse::SetStudyAndSeries).await;
        service.push_error("dialog closed").await;

        let context = TrackingContext::new();
        let event = TrackingEvent::SaveReport;

        let first = service.prompt_begin_tracking(&context, &event).await.unwrap();
        assert_eq!(first.user_response, Some(UserResponse::SetStudyAndSeries));
        assert!(service.prompt_save_report(&context, &event).await.is_err());
        assert!(service.prompt_save_report(&context, &event).await.is_err());
        assert_eq!(service.remaining().await, 0);
    }

    #[tokio::test]
    async fn test_missing_structured_report() {
        let service = InMemoryReportService::new().with_structured_report("s1", "sr1", Report::default());
        assert!(service.fetch_structured_report("s1", "sr1").await.is_ok());
        assert!(matches!(
            service.fetch_structured_report("s1", "sr2").await,
            Err(RecistError::NotFound(_))
        ));
    }
}
