//! 追踪引擎
//!
//! 串行处理事件的状态机运行时。进入提示/回填状态时调用对应的外部服务，
//! 服务结果以 Done 或 Error 事件送回状态机，因此同一时刻只有一个调用在进行。

use crate::{
    context::TrackingContext,
    services::{InvokedService, MeasurementService, PromptService, ReportService},
    state_machine::{
        Effect, PromptResult, TrackingEvent, TrackingState, TrackingStateMachine, UserResponse,
    },
    timepoint::TimepointSelection,
};
use recist_core::{Measurement, RecistError, ReportInfo, Result, Timepoint};
use recist_validation::{
    classify, compute_sod, ClassifiedMeasurements, GroupName, RecistRules, RecistV11Validator,
    SodSummary, ValidationReport,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 运行时配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackingConfig {
    /// 当前状态不接受的事件返回错误，而不是静默忽略
    pub strict: bool,
}

/// 各分组的测量数量
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementCounts {
    pub target: usize,
    pub new_lesion: usize,
    pub non_target: usize,
    pub other: usize,
}

impl From<&ClassifiedMeasurements<'_>> for MeasurementCounts {
    fn from(classified: &ClassifiedMeasurements<'_>) -> Self {
        Self {
            target: classified.group(GroupName::Target).len(),
            new_lesion: classified.group(GroupName::NewLesion).len(),
            non_target: classified.group(GroupName::NonTarget).len(),
            other: classified.other.len(),
        }
    }
}

/// 创建报告前的校验与SOD结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportDraft {
    pub validation: ValidationReport,
    pub sod: SodSummary,
    pub counts: MeasurementCounts,
}

/// 对一组测量执行分组、校验和SOD计算
///
/// `last_measurements` 为 None 时跳过与上期的对照检查。
pub fn build_report_draft(
    measurements: &[Measurement],
    last_measurements: Option<&[Measurement]>,
    is_baseline: bool,
    rules: &RecistRules,
    user_sod: Option<f64>,
) -> ReportDraft {
    let classified = classify(measurements);
    let last_classified = last_measurements.map(classify);

    let mut validator = RecistV11Validator::with_rules(rules.clone());
    validator.set_baseline(is_baseline);
    validator.set_classified(&classified);
    if let Some(last) = &last_classified {
        validator.set_last_classified(last);
    }
    validator.run();

    let sod = SodSummary::new(compute_sod(classified.group(GroupName::Target), rules))
        .with_user_value(user_sod);

    ReportDraft {
        validation: validator.into_report(),
        sod,
        counts: MeasurementCounts::from(&classified),
    }
}

/// 追踪引擎
pub struct TrackingEngine {
    machine: TrackingStateMachine,
    state: TrackingState,
    context: TrackingContext,
    prompts: Arc<dyn PromptService>,
    measurements: Arc<dyn MeasurementService>,
    reports: Arc<dyn ReportService>,
    config: TrackingConfig,
    rules: RecistRules,
}

impl TrackingEngine {
    /// 创建处于空闲状态的引擎
    pub fn new(
        prompts: Arc<dyn PromptService>,
        measurements: Arc<dyn MeasurementService>,
        reports: Arc<dyn ReportService>,
    ) -> Self {
        Self {
            machine: TrackingStateMachine::new(),
            state: TrackingState::Idle,
            context: TrackingContext::new(),
            prompts,
            measurements,
            reports,
            config: TrackingConfig::default(),
            rules: RecistRules::default(),
        }
    }

    pub fn with_config(mut self, config: TrackingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_rules(mut self, rules: RecistRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn context(&self) -> &TrackingContext {
        &self.context
    }

    /// 发送事件，返回事件及其触发的服务调用全部处理完后的状态
    pub async fn send(&mut self, event: TrackingEvent) -> Result<TrackingState> {
        let mut pending = Some(event);

        while let Some(event) = pending.take() {
            if self.state.is_final() {
                return Err(RecistError::MachineStopped);
            }

            let kind = event.kind();
            if !self.machine.can_handle(self.state, kind) {
                if self.config.strict {
                    return Err(RecistError::UnhandledEvent {
                        state: self.state.to_string(),
                        event: format!("{:?}", kind),
                    });
                }
                debug!("Event {:?} ignored in state {}", kind, self.state);
                break;
            }

            let Some(transition) = self
                .machine
                .select(self.state, &self.context, &event)
                .cloned()
            else {
                debug!("No enabled transition for {:?} in state {}", kind, self.state);
                break;
            };

            let from = self.state;
            let (next, effects) = self
                .machine
                .apply(from, &transition, &mut self.context, &event);
            self.state = next;
            if next != from {
                info!("Tracking state {} -> {} on {:?}", from, next, kind);
            }

            for effect in effects {
                let compared = matches!(effect, Effect::HydrateComparedTimepoint(_));
                if let Err(e) = self.run_effect(effect).await {
                    warn!("Tracking side effect failed: {}", e);
                    if compared {
                        // 对照访视未载入成功，重发同一访视时再次载入
                        self.context.compared_timepoint = None;
                        self.context.compared_report_info = None;
                    }
                }
            }

            if transition.target.is_none() {
                continue;
            }

            if let Some(service) = next.invoked_service() {
                pending = Some(match self.invoke(service, &event).await {
                    Ok(mut result) => {
                        result.fill_from(&event);
                        TrackingEvent::Done(result)
                    }
                    Err(e) => {
                        warn!("{:?} failed, returning to idle: {}", service, e);
                        TrackingEvent::Error(e.to_string())
                    }
                });
            }
        }

        Ok(self.state)
    }

    /// 获取任务访视并更新会话的本期、基线、上期、最低SOD和对照访视
    pub async fn load_timepoints(&mut self, current_study_uid: &str) -> Result<TimepointSelection> {
        let task = self
            .context
            .task_info
            .clone()
            .ok_or_else(|| RecistError::DataIntegrity("未设置阅片任务信息".to_string()))?;

        let timepoints = self.reports.fetch_timepoints(&task).await?;
        let selection = TimepointSelection::select(&timepoints, current_study_uid);

        let updates: [(Option<&Timepoint>, fn(Timepoint) -> TrackingEvent); 5] = [
            (selection.current.as_ref(), TrackingEvent::UpdateCurrentTimepoint),
            (selection.baseline.as_ref(), TrackingEvent::UpdateBaselineTimepoint),
            (selection.last.as_ref(), TrackingEvent::UpdateLastTimepoint),
            (selection.lowest_sod.as_ref(), TrackingEvent::UpdateLowestSodTimepoint),
            (selection.compared.as_ref(), TrackingEvent::UpdateComparedTimepoint),
        ];
        for (timepoint, event) in updates {
            if let Some(timepoint) = timepoint {
                self.send(event(timepoint.clone())).await?;
            }
        }

        Ok(selection)
    }

    /// 校验当前测量并计算SOD，用于创建报告前的确认
    pub async fn validate_current(&self, user_sod: Option<f64>) -> Result<ReportDraft> {
        let measurements = self.measurements.get_measurements().await?;
        let is_baseline = self.context.is_baseline();

        let last_measurements = if is_baseline {
            None
        } else {
            self.context
                .compared_timepoint
                .as_ref()
                .and_then(Timepoint::first_report)
                .map(|report| report.measurements.as_slice())
        };

        let draft = build_report_draft(
            &measurements,
            last_measurements,
            is_baseline,
            &self.rules,
            user_sod,
        );
        info!("{} (SOD {:.1})", draft.validation.summary(), draft.sod.auto_calculated);
        Ok(draft)
    }

    async fn invoke(
        &self,
        service: InvokedService,
        event: &TrackingEvent,
    ) -> Result<PromptResult> {
        debug!("Invoking {:?}", service);
        let context = &self.context;
        match service {
            InvokedService::PromptBeginTracking => {
                self.prompts.prompt_begin_tracking(context, event).await
            }
            InvokedService::PromptTrackNewStudy => {
                self.prompts.prompt_track_new_study(context, event).await
            }
            InvokedService::PromptTrackNewSeries => {
                self.prompts.prompt_track_new_series(context, event).await
            }
            InvokedService::PromptSaveReport => {
                self.prompts.prompt_save_report(context, event).await
            }
            InvokedService::PromptHydrateStructuredReport => {
                let mut result = self
                    .prompts
                    .prompt_hydrate_structured_report(context, event)
                    .await?;
                if result.user_response == Some(UserResponse::HydrateReport) {
                    self.hydrate_structured_report(event, &mut result).await?;
                }
                Ok(result)
            }
            InvokedService::HydrateStructuredReport => {
                let mut result = PromptResult::default();
                self.hydrate_structured_report(event, &mut result).await?;
                Ok(result)
            }
            InvokedService::UpdateBackendReport => self.load_backend_report(event).await,
        }
    }

    /// 把结构化报告中的测量载入为可编辑测量
    async fn hydrate_structured_report(
        &self,
        event: &TrackingEvent,
        result: &mut PromptResult,
    ) -> Result<()> {
        let (Some(study), Some(series)) = (event.study_instance_uid(), event.series_instance_uid())
        else {
            return Err(RecistError::DataIntegrity("回填事件缺少检查或序列UID".to_string()));
        };

        let report = self.reports.fetch_structured_report(study, series).await?;
        let series_instance_uids = referenced_series(&report.measurements).ok_or_else(|| {
            RecistError::DataIntegrity(format!("结构化报告 {} 没有可追踪的测量", series))
        })?;
        info!(
            "Hydrating {} measurements from structured report {}",
            report.measurements.len(),
            series
        );

        self.add_raw_measurements(report.measurements).await?;
        result.study_instance_uid = Some(study.to_string());
        result.series_instance_uids = series_instance_uids;
        Ok(())
    }

    async fn load_backend_report(&self, event: &TrackingEvent) -> Result<PromptResult> {
        let TrackingEvent::UpdateBackendReport { study_instance_uid, report } = event else {
            return Err(RecistError::DataIntegrity("后端报告事件缺少报告数据".to_string()));
        };

        let series_instance_uids = referenced_series(&report.measurements).ok_or_else(|| {
            RecistError::DataIntegrity(format!("后端报告 {} 没有可追踪的测量", report.id))
        })?;
        info!("Loading backend report {} for study {}", report.id, study_instance_uid);
        self.add_raw_measurements(report.measurements.clone()).await?;

        Ok(PromptResult {
            study_instance_uid: Some(study_instance_uid.clone()),
            series_instance_uids,
            report_info: Some(ReportInfo::from_report(report, Some(study_instance_uid))),
            ..Default::default()
        })
    }

    async fn add_raw_measurements(&self, measurements: Vec<Measurement>) -> Result<()> {
        for measurement in measurements {
            self.measurements.add_raw_measurement(measurement).await?;
        }
        Ok(())
    }

    async fn run_effect(&self, effect: Effect) -> Result<()> {
        match effect {
            Effect::JumpToFirstMeasurement => {
                let measurements = self.measurements.get_measurements().await?;
                let first = measurements
                    .iter()
                    .find(|m| self.context.is_tracking_series(&m.reference_series_uid))
                    .or_else(|| measurements.first());
                if let Some(first) = first {
                    self.measurements
                        .jump_to_measurement(self.context.active_viewport_id.as_deref(), &first.uid)
                        .await?;
                }
            }
            Effect::DiscardMeasurementsOutside {
                study_instance_uid,
                series_instance_uids,
            } => {
                let measurements = self.measurements.get_measurements().await?;
                for m in measurements.iter().filter(|m| {
                    m.reference_study_uid != study_instance_uid
                        || !series_instance_uids.contains(&m.reference_series_uid)
                }) {
                    debug!("Discarding measurement {} outside tracked series", m.uid);
                    self.measurements.remove_measurement(&m.uid).await?;
                }
            }
            Effect::HydrateComparedTimepoint(timepoint) => {
                let Some(report) = timepoint.first_report() else {
                    debug!("Compared timepoint {} has no report", timepoint.study_instance_uid);
                    return Ok(());
                };
                info!(
                    "Loading {} read-only measurements from compared timepoint {}",
                    report.measurements.len(),
                    timepoint.trial_time_point_id
                );
                for measurement in &report.measurements {
                    self.measurements.add_readonly_measurement(measurement.clone()).await?;
                }
                if let Some(first) = report.measurements.first() {
                    self.measurements
                        .jump_to_measurement(self.context.active_viewport_id.as_deref(), &first.uid)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// 测量引用的序列，按出现顺序去重；没有任何序列时返回 None
fn referenced_series(measurements: &[Measurement]) -> Option<Vec<String>> {
    let mut series_instance_uids: Vec<String> = Vec::new();
    for measurement in measurements {
        let series = &measurement.reference_series_uid;
        if !series.is_empty() && !series_instance_uids.contains(series) {
            series_instance_uids.push(series.clone());
        }
    }
    (!series_instance_uids.is_empty()).then_some(series_instance_uids)
}
