//! 测量追踪状态机
//!
//! 以 (状态, 事件) 为键的声明式转换表。每个键对应一组按顺序匹配的候选转换，
//! 第一个守卫通过的转换生效：先执行动作修改上下文，再进入目标状态。

use crate::context::TrackingContext;
use crate::services::InvokedService;
use recist_core::{RecistError, Report, ReportInfo, TaskInfo, Timepoint, UserInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// 追踪状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum TrackingState {
    Off,
    Idle,
    PromptBeginTracking,
    Tracking,
    PromptTrackNewStudy,
    PromptTrackNewSeries,
    PromptSaveReport,
    PromptHydrateStructuredReport,
    HydrateStructuredReport,
    UpdateBackendReport,
}

impl TrackingState {
    /// 进入该状态时调用的异步服务
    pub fn invoked_service(&self) -> Option<InvokedService> {
        match self {
            TrackingState::PromptBeginTracking => Some(InvokedService::PromptBeginTracking),
            TrackingState::PromptTrackNewStudy => Some(InvokedService::PromptTrackNewStudy),
            TrackingState::PromptTrackNewSeries => Some(InvokedService::PromptTrackNewSeries),
            TrackingState::PromptSaveReport => Some(InvokedService::PromptSaveReport),
            TrackingState::PromptHydrateStructuredReport => {
                Some(InvokedService::PromptHydrateStructuredReport)
            }
            TrackingState::HydrateStructuredReport => Some(InvokedService::HydrateStructuredReport),
            TrackingState::UpdateBackendReport => Some(InvokedService::UpdateBackendReport),
            TrackingState::Off | TrackingState::Idle | TrackingState::Tracking => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TrackingState::Off)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingState::Off => "off",
            TrackingState::Idle => "idle",
            TrackingState::PromptBeginTracking => "promptBeginTracking",
            TrackingState::Tracking => "tracking",
            TrackingState::PromptTrackNewStudy => "promptTrackNewStudy",
            TrackingState::PromptTrackNewSeries => "promptTrackNewSeries",
            TrackingState::PromptSaveReport => "promptSaveReport",
            TrackingState::PromptHydrateStructuredReport => "promptHydrateStructuredReport",
            TrackingState::HydrateStructuredReport => "hydrateStructuredReport",
            TrackingState::UpdateBackendReport => "updateBackendReport",
        }
    }
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 提示对话框的用户选择
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "i32", into = "i32")]
pub enum UserResponse {
    NoNever = -1,
    Cancel = 0,
    CreateReport = 1,
    AddSeries = 2,
    SetStudyAndSeries = 3,
    NoNotForSeries = 4,
    HydrateReport = 5,
}

impl TryFrom<i32> for UserResponse {
    type Error = RecistError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(UserResponse::NoNever),
            0 => Ok(UserResponse::Cancel),
            1 => Ok(UserResponse::CreateReport),
            2 => Ok(UserResponse::AddSeries),
            3 => Ok(UserResponse::SetStudyAndSeries),
            4 => Ok(UserResponse::NoNotForSeries),
            5 => Ok(UserResponse::HydrateReport),
            other => Err(RecistError::DataIntegrity(format!("未知的用户响应码: {}", other))),
        }
    }
}

impl From<UserResponse> for i32 {
    fn from(response: UserResponse) -> Self {
        response as i32
    }
}

/// 异步服务的完成结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    #[serde(default)]
    pub user_response: Option<UserResponse>,
    #[serde(rename = "StudyInstanceUID", default)]
    pub study_instance_uid: Option<String>,
    #[serde(rename = "SeriesInstanceUID", default)]
    pub series_instance_uid: Option<String>,
    #[serde(rename = "SeriesInstanceUIDs", default)]
    pub series_instance_uids: Vec<String>,
    #[serde(default)]
    pub report_info: Option<ReportInfo>,
}

impl PromptResult {
    pub fn response(user_response: UserResponse) -> Self {
        Self {
            user_response: Some(user_response),
            ..Default::default()
        }
    }

    /// 用触发事件中的检查/序列补齐缺失字段
    pub fn fill_from(&mut self, event: &TrackingEvent) {
        if self.study_instance_uid.is_none() {
            self.study_instance_uid = event.study_instance_uid().map(str::to_string);
        }
        if self.series_instance_uid.is_none() {
            self.series_instance_uid = event.series_instance_uid().map(str::to_string);
        }
    }
}

/// 状态机事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingEvent {
    TrackSeries {
        #[serde(rename = "StudyInstanceUID")]
        study_instance_uid: String,
        #[serde(rename = "SeriesInstanceUID")]
        series_instance_uid: String,
    },
    UntrackSeries {
        #[serde(rename = "SeriesInstanceUID")]
        series_instance_uid: String,
    },
    SetTrackedSeries {
        #[serde(rename = "StudyInstanceUID")]
        study_instance_uid: String,
        #[serde(rename = "SeriesInstanceUIDs")]
        series_instance_uids: Vec<String>,
    },
    /// 已追踪序列上新增或修改了测量
    SetDirty {
        #[serde(rename = "StudyInstanceUID")]
        study_instance_uid: String,
        #[serde(rename = "SeriesInstanceUID")]
        series_instance_uid: String,
    },
    SaveReport,
    PromptHydrateSr {
        #[serde(rename = "StudyInstanceUID")]
        study_instance_uid: String,
        #[serde(rename = "SeriesInstanceUID")]
        series_instance_uid: String,
    },
    HydrateSr {
        #[serde(rename = "StudyInstanceUID")]
        study_instance_uid: String,
        #[serde(rename = "SeriesInstanceUID")]
        series_instance_uid: String,
    },
    UpdateBackendReport {
        #[serde(rename = "StudyInstanceUID")]
        study_instance_uid: String,
        report: Report,
    },
    UpdateCurrentTimepoint(Timepoint),
    UpdateComparedTimepoint(Timepoint),
    UpdateBaselineTimepoint(Timepoint),
    UpdateLastTimepoint(Timepoint),
    UpdateLowestSodTimepoint(Timepoint),
    UpdateTaskInfo(TaskInfo),
    UpdateCurrentUser(UserInfo),
    UpdateCurrentReportInfo(ReportInfo),
    UpdateComparedReportInfo(ReportInfo),
    UpdateActiveViewportId(String),
    /// 调用的服务成功完成
    Done(PromptResult),
    /// 调用的服务失败
    Error(String),
}

impl TrackingEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TrackingEvent::TrackSeries { .. } => EventKind::TrackSeries,
            TrackingEvent::UntrackSeries { .. } => EventKind::UntrackSeries,
            TrackingEvent::SetTrackedSeries { .. } => EventKind::SetTrackedSeries,
            TrackingEvent::SetDirty { .. } => EventKind::SetDirty,
            TrackingEvent::SaveReport => EventKind::SaveReport,
            TrackingEvent::PromptHydrateSr { .. } => EventKind::PromptHydrateSr,
            TrackingEvent::HydrateSr { .. } => EventKind::HydrateSr,
            TrackingEvent::UpdateBackendReport { .. } => EventKind::UpdateBackendReport,
            TrackingEvent::UpdateCurrentTimepoint(_) => EventKind::UpdateCurrentTimepoint,
            TrackingEvent::UpdateComparedTimepoint(_) => EventKind::UpdateComparedTimepoint,
            TrackingEvent::UpdateBaselineTimepoint(_) => EventKind::UpdateBaselineTimepoint,
            TrackingEvent::UpdateLastTimepoint(_) => EventKind::UpdateLastTimepoint,
            TrackingEvent::UpdateLowestSodTimepoint(_) => EventKind::UpdateLowestSodTimepoint,
            TrackingEvent::UpdateTaskInfo(_) => EventKind::UpdateTaskInfo,
            TrackingEvent::UpdateCurrentUser(_) => EventKind::UpdateCurrentUser,
            TrackingEvent::UpdateCurrentReportInfo(_) => EventKind::UpdateCurrentReportInfo,
            TrackingEvent::UpdateComparedReportInfo(_) => EventKind::UpdateComparedReportInfo,
            TrackingEvent::UpdateActiveViewportId(_) => EventKind::UpdateActiveViewportId,
            TrackingEvent::Done(_) => EventKind::Done,
            TrackingEvent::Error(_) => EventKind::Error,
        }
    }

    /// 事件携带的检查UID
    pub fn study_instance_uid(&self) -> Option<&str> {
        match self {
            TrackingEvent::TrackSeries { study_instance_uid, .. }
            | TrackingEvent::SetTrackedSeries { study_instance_uid, .. }
            | TrackingEvent::SetDirty { study_instance_uid, .. }
            | TrackingEvent::PromptHydrateSr { study_instance_uid, .. }
            | TrackingEvent::HydrateSr { study_instance_uid, .. }
            | TrackingEvent::UpdateBackendReport { study_instance_uid, .. } => {
                Some(study_instance_uid.as_str())
            }
            TrackingEvent::Done(result) => result.study_instance_uid.as_deref(),
            _ => None,
        }
    }

    /// 事件携带的单个序列UID
    pub fn series_instance_uid(&self) -> Option<&str> {
        match self {
            TrackingEvent::TrackSeries { series_instance_uid, .. }
            | TrackingEvent::UntrackSeries { series_instance_uid }
            | TrackingEvent::SetDirty { series_instance_uid, .. }
            | TrackingEvent::PromptHydrateSr { series_instance_uid, .. }
            | TrackingEvent::HydrateSr { series_instance_uid, .. } => {
                Some(series_instance_uid.as_str())
            }
            TrackingEvent::Done(result) => result.series_instance_uid.as_deref(),
            _ => None,
        }
    }

    /// 事件携带的序列UID列表
    pub fn series_instance_uids(&self) -> Vec<String> {
        match self {
            TrackingEvent::SetTrackedSeries { series_instance_uids, .. } => {
                series_instance_uids.clone()
            }
            TrackingEvent::Done(result) if !result.series_instance_uids.is_empty() => {
                result.series_instance_uids.clone()
            }
            other => other
                .series_instance_uid()
                .map(|series| vec![series.to_string()])
                .unwrap_or_default(),
        }
    }

    fn prompt_result(&self) -> Option<&PromptResult> {
        match self {
            TrackingEvent::Done(result) => Some(result),
            _ => None,
        }
    }
}

/// 用于转换表查找的事件类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TrackSeries,
    UntrackSeries,
    SetTrackedSeries,
    SetDirty,
    SaveReport,
    PromptHydrateSr,
    HydrateSr,
    UpdateBackendReport,
    UpdateCurrentTimepoint,
    UpdateComparedTimepoint,
    UpdateBaselineTimepoint,
    UpdateLastTimepoint,
    UpdateLowestSodTimepoint,
    UpdateTaskInfo,
    UpdateCurrentUser,
    UpdateCurrentReportInfo,
    UpdateComparedReportInfo,
    UpdateActiveViewportId,
    Done,
    Error,
}

impl EventKind {
    /// 只修改上下文、不改变状态的事件
    pub const CONTEXT_UPDATES: [EventKind; 10] = [
        EventKind::UpdateCurrentTimepoint,
        EventKind::UpdateComparedTimepoint,
        EventKind::UpdateBaselineTimepoint,
        EventKind::UpdateLastTimepoint,
        EventKind::UpdateLowestSodTimepoint,
        EventKind::UpdateTaskInfo,
        EventKind::UpdateCurrentUser,
        EventKind::UpdateCurrentReportInfo,
        EventKind::UpdateComparedReportInfo,
        EventKind::UpdateActiveViewportId,
    ];
}

/// 守卫条件，事件数据缺失时一律判定为不通过
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// 序列所属检查与当前追踪的检查不同
    IsNewStudy,
    /// 序列既未被忽略也未被追踪
    IsNewSeries,
    /// 移除该序列后仍有追踪序列
    HasRemainingTrackedSeries,
    /// 测量所在序列已被追踪
    IsTrackedSeries,
    HasNotIgnoredSrSeriesForHydration,
    Response(UserResponse),
}

impl Guard {
    pub fn evaluate(&self, context: &TrackingContext, event: &TrackingEvent) -> bool {
        match self {
            Guard::IsNewStudy => match (event.study_instance_uid(), event.series_instance_uid()) {
                (Some(study), Some(series)) => {
                    !context.is_ignored_series(series) && !context.is_tracked_study(study)
                }
                _ => false,
            },
            Guard::IsNewSeries => match event.series_instance_uid() {
                Some(series) => {
                    !context.is_ignored_series(series) && !context.is_tracking_series(series)
                }
                None => false,
            },
            Guard::HasRemainingTrackedSeries => match event.series_instance_uid() {
                Some(series) => {
                    context.tracked_series.len() > 1 || !context.is_tracking_series(series)
                }
                None => false,
            },
            Guard::IsTrackedSeries => {
                match (event.study_instance_uid(), event.series_instance_uid()) {
                    (Some(study), Some(series)) => {
                        context.is_tracked_study(study) && context.is_tracking_series(series)
                    }
                    _ => false,
                }
            }
            Guard::HasNotIgnoredSrSeriesForHydration => match event.series_instance_uid() {
                Some(series) => !context
                    .ignored_sr_series_for_hydration
                    .iter()
                    .any(|s| s == series),
                None => false,
            },
            Guard::Response(expected) => event
                .prompt_result()
                .and_then(|result| result.user_response)
                .map(|response| response == *expected)
                .unwrap_or(false),
        }
    }
}

/// 动作执行后需要外部协作者完成的副作用
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// 视图跳转到追踪序列中的第一个测量
    JumpToFirstMeasurement,
    /// 移除不属于指定检查/序列的测量
    DiscardMeasurementsOutside {
        study_instance_uid: String,
        series_instance_uids: Vec<String>,
    },
    /// 以只读方式加载对照访视第一份报告的测量并跳转
    HydrateComparedTimepoint(Timepoint),
}

/// 上下文动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// 空闲状态的进入动作
    ClearContext,
    SetTrackedStudyAndSeries,
    SetTrackedStudyAndMultipleSeries,
    AddTrackedSeries,
    RemoveTrackedSeries,
    IgnoreSeries,
    IgnoreHydrationForSrSeries,
    DiscardExternalMeasurements,
    SetDirty,
    SetClean,
    MarkReportSaved,
    JumpToFirstMeasurement,
    SetCurrentReportInfo,
    /// 把 UPDATE_* 事件的数据写入对应上下文字段
    AssignEventData,
    UpdateComparedTimepoint,
}

impl Action {
    pub fn apply(&self, context: &mut TrackingContext, event: &TrackingEvent) -> Option<Effect> {
        match self {
            Action::ClearContext => context.clear(),
            Action::SetTrackedStudyAndSeries => {
                let (Some(study), Some(series)) =
                    (event.study_instance_uid(), event.series_instance_uid())
                else {
                    debug!("SetTrackedStudyAndSeries skipped: event carries no study/series");
                    return None;
                };
                context.remember_previous();
                context.tracked_study = Some(study.to_string());
                context.tracked_series = vec![series.to_string()];
                context.ignored_series.clear();
            }
            Action::SetTrackedStudyAndMultipleSeries => {
                let series_list = event.series_instance_uids();
                context.remember_previous();
                if let Some(study) = event.study_instance_uid() {
                    context.tracked_study = Some(study.to_string());
                }
                for series in series_list {
                    if !context.is_tracking_series(&series) {
                        context.tracked_series.push(series);
                    }
                }
                context.ignored_series.clear();
            }
            Action::AddTrackedSeries => {
                if let Some(series) = event.series_instance_uid() {
                    if !context.is_tracking_series(series) {
                        context.prev_tracked_series = context.tracked_series.clone();
                        context.tracked_series.push(series.to_string());
                    }
                }
            }
            Action::RemoveTrackedSeries => {
                if let Some(series) = event.series_instance_uid() {
                    context.prev_tracked_series = context.tracked_series.clone();
                    context.tracked_series.retain(|s| s != series);
                }
            }
            Action::IgnoreSeries => {
                if let Some(series) = event.series_instance_uid() {
                    if !context.is_ignored_series(series) {
                        context.prev_ignored_series = context.ignored_series.clone();
                        context.ignored_series.push(series.to_string());
                    }
                }
            }
            Action::IgnoreHydrationForSrSeries => {
                if let Some(series) = event.series_instance_uid() {
                    if !context.ignored_sr_series_for_hydration.iter().any(|s| s == series) {
                        context.ignored_sr_series_for_hydration.push(series.to_string());
                    }
                }
            }
            Action::DiscardExternalMeasurements => {
                let study = event.study_instance_uid()?;
                return Some(Effect::DiscardMeasurementsOutside {
                    study_instance_uid: study.to_string(),
                    series_instance_uids: event.series_instance_uids(),
                });
            }
            Action::SetDirty => context.is_dirty = true,
            Action::SetClean => context.is_dirty = false,
            Action::MarkReportSaved => context.success_save_report = true,
            Action::JumpToFirstMeasurement => return Some(Effect::JumpToFirstMeasurement),
            Action::SetCurrentReportInfo => {
                if let Some(info) = event.prompt_result().and_then(|r| r.report_info.clone()) {
                    context.current_report_info = Some(info);
                }
            }
            Action::AssignEventData => assign_event_data(context, event),
            Action::UpdateComparedTimepoint => {
                let TrackingEvent::UpdateComparedTimepoint(timepoint) = event else {
                    return None;
                };
                let unchanged = context
                    .compared_timepoint
                    .as_ref()
                    .map(|current| current.study_instance_uid == timepoint.study_instance_uid)
                    .unwrap_or(false);
                if unchanged {
                    debug!(
                        "Compared timepoint {} unchanged, skipping hydration",
                        timepoint.study_instance_uid
                    );
                    return None;
                }

                context.compared_timepoint = Some(timepoint.clone());
                let study = Some(timepoint.study_instance_uid.as_str());
                context.compared_report_info = timepoint
                    .first_report()
                    .map(|report| ReportInfo::from_report(report, study));
                return Some(Effect::HydrateComparedTimepoint(timepoint.clone()));
            }
        }
        None
    }
}

fn assign_event_data(context: &mut TrackingContext, event: &TrackingEvent) {
    use TrackingEvent::*;

    match event {
        UpdateCurrentTimepoint(tp) => context.current_timepoint = Some(tp.clone()),
        UpdateBaselineTimepoint(tp) => context.baseline_timepoint = Some(tp.clone()),
        UpdateLastTimepoint(tp) => context.last_timepoint = Some(tp.clone()),
        UpdateLowestSodTimepoint(tp) => context.lowest_sod_timepoint = Some(tp.clone()),
        UpdateTaskInfo(task) => context.task_info = Some(task.clone()),
        UpdateCurrentUser(user) => context.current_user = Some(user.clone()),
        UpdateCurrentReportInfo(info) => context.current_report_info = Some(info.clone()),
        UpdateComparedReportInfo(info) => context.compared_report_info = Some(info.clone()),
        UpdateActiveViewportId(id) => context.active_viewport_id = Some(id.clone()),
        other => debug!("AssignEventData ignored for {:?}", other.kind()),
    }
}

/// 一条候选转换
#[derive(Debug, Clone)]
pub struct Transition {
    pub guard: Option<Guard>,
    /// None 表示内部转换：保持当前状态且不执行进入动作
    pub target: Option<TrackingState>,
    pub actions: Vec<Action>,
}

impl Transition {
    fn to(target: TrackingState) -> Self {
        Self {
            guard: None,
            target: Some(target),
            actions: Vec::new(),
        }
    }

    fn internal() -> Self {
        Self {
            guard: None,
            target: None,
            actions: Vec::new(),
        }
    }

    fn when(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    fn with(mut self, actions: &[Action]) -> Self {
        self.actions = actions.to_vec();
        self
    }

    pub fn is_enabled(&self, context: &TrackingContext, event: &TrackingEvent) -> bool {
        self.guard
            .map(|guard| guard.evaluate(context, event))
            .unwrap_or(true)
    }
}

/// 测量追踪状态机
#[derive(Debug)]
pub struct TrackingStateMachine {
    transitions: HashMap<(TrackingState, EventKind), Vec<Transition>>,
}

impl TrackingStateMachine {
    /// 创建状态机并定义转换规则
    pub fn new() -> Self {
        use Action::*;
        use TrackingState::*;

        let mut transitions: HashMap<(TrackingState, EventKind), Vec<Transition>> = HashMap::new();

        // 空闲
        transitions.insert(
            (Idle, EventKind::TrackSeries),
            vec![Transition::to(PromptBeginTracking)],
        );
        transitions.insert(
            (Idle, EventKind::SetTrackedSeries),
            vec![Transition::to(Tracking).with(&[SetTrackedStudyAndMultipleSeries, SetClean])],
        );
        transitions.insert(
            (Idle, EventKind::PromptHydrateSr),
            vec![Transition::to(PromptHydrateStructuredReport)
                .when(Guard::HasNotIgnoredSrSeriesForHydration)],
        );
        transitions.insert(
            (Idle, EventKind::HydrateSr),
            vec![Transition::to(HydrateStructuredReport)],
        );
        transitions.insert(
            (Idle, EventKind::UpdateBackendReport),
            vec![Transition::to(UpdateBackendReport)],
        );

        // 开始追踪提示
        transitions.insert(
            (PromptBeginTracking, EventKind::Done),
            vec![
                Transition::to(Tracking)
                    .when(Guard::Response(UserResponse::SetStudyAndSeries))
                    .with(&[SetTrackedStudyAndSeries, SetDirty]),
                Transition::to(Off).when(Guard::Response(UserResponse::NoNever)),
                Transition::to(Idle),
            ],
        );

        // 追踪中
        transitions.insert(
            (Tracking, EventKind::TrackSeries),
            vec![
                Transition::to(PromptTrackNewStudy).when(Guard::IsNewStudy),
                Transition::to(PromptTrackNewSeries).when(Guard::IsNewSeries),
            ],
        );
        transitions.insert(
            (Tracking, EventKind::UntrackSeries),
            vec![
                Transition::to(Tracking)
                    .when(Guard::HasRemainingTrackedSeries)
                    .with(&[RemoveTrackedSeries, SetDirty]),
                Transition::to(Idle),
            ],
        );
        transitions.insert(
            (Tracking, EventKind::SetTrackedSeries),
            vec![Transition::to(Tracking).with(&[SetTrackedStudyAndMultipleSeries])],
        );
        transitions.insert(
            (Tracking, EventKind::SetDirty),
            vec![
                Transition::to(Tracking).when(Guard::IsTrackedSeries).with(&[SetDirty]),
                Transition::internal(),
            ],
        );
        transitions.insert(
            (Tracking, EventKind::SaveReport),
            vec![Transition::to(PromptSaveReport)],
        );

        // 追踪新序列提示
        transitions.insert(
            (PromptTrackNewSeries, EventKind::Done),
            vec![
                Transition::to(Tracking)
                    .when(Guard::Response(UserResponse::AddSeries))
                    .with(&[AddTrackedSeries, SetDirty]),
                Transition::to(Tracking)
                    .when(Guard::Response(UserResponse::SetStudyAndSeries))
                    .with(&[DiscardExternalMeasurements, SetTrackedStudyAndSeries, SetDirty]),
                Transition::to(PromptSaveReport).when(Guard::Response(UserResponse::CreateReport)),
                Transition::to(Tracking)
                    .when(Guard::Response(UserResponse::NoNotForSeries))
                    .with(&[IgnoreSeries]),
                Transition::to(Tracking),
            ],
        );

        // 追踪新检查提示
        transitions.insert(
            (PromptTrackNewStudy, EventKind::Done),
            vec![
                Transition::to(Tracking)
                    .when(Guard::Response(UserResponse::SetStudyAndSeries))
                    .with(&[DiscardExternalMeasurements, SetTrackedStudyAndSeries, SetDirty]),
                Transition::to(Tracking)
                    .when(Guard::Response(UserResponse::NoNotForSeries))
                    .with(&[IgnoreSeries]),
                Transition::to(PromptSaveReport).when(Guard::Response(UserResponse::CreateReport)),
                Transition::to(Tracking),
            ],
        );

        // 保存报告提示
        transitions.insert(
            (PromptSaveReport, EventKind::Done),
            vec![
                Transition::to(Tracking)
                    .when(Guard::Response(UserResponse::CreateReport))
                    .with(&[MarkReportSaved]),
                Transition::to(Tracking),
            ],
        );

        // 结构化报告回填
        transitions.insert(
            (PromptHydrateStructuredReport, EventKind::Done),
            vec![
                Transition::to(Tracking)
                    .when(Guard::Response(UserResponse::HydrateReport))
                    .with(&[SetTrackedStudyAndMultipleSeries, JumpToFirstMeasurement, SetClean]),
                Transition::to(Idle).with(&[IgnoreHydrationForSrSeries]),
            ],
        );
        transitions.insert(
            (HydrateStructuredReport, EventKind::Done),
            vec![Transition::to(Tracking).with(&[
                SetTrackedStudyAndMultipleSeries,
                JumpToFirstMeasurement,
                SetClean,
            ])],
        );

        // 后端报告加载
        transitions.insert(
            (UpdateBackendReport, EventKind::Done),
            vec![Transition::to(Tracking).with(&[
                SetCurrentReportInfo,
                SetTrackedStudyAndMultipleSeries,
                JumpToFirstMeasurement,
            ])],
        );

        // 任何调用失败都回到空闲
        for state in Self::get_all_states() {
            if state.invoked_service().is_some() {
                transitions.insert((state, EventKind::Error), vec![Transition::to(Idle)]);
            }
        }

        // 上下文更新在空闲和追踪中都可接受
        for state in [Idle, Tracking] {
            for kind in EventKind::CONTEXT_UPDATES {
                let action = if kind == EventKind::UpdateComparedTimepoint {
                    UpdateComparedTimepoint
                } else {
                    AssignEventData
                };
                transitions.insert((state, kind), vec![Transition::internal().with(&[action])]);
            }
        }

        Self { transitions }
    }

    /// 检查 (状态, 事件) 是否在转换表中
    pub fn can_handle(&self, state: TrackingState, kind: EventKind) -> bool {
        self.transitions.contains_key(&(state, kind))
    }

    /// 获取候选转换，表中不存在时返回 None
    pub fn candidates(&self, state: TrackingState, kind: EventKind) -> Option<&[Transition]> {
        self.transitions.get(&(state, kind)).map(Vec::as_slice)
    }

    /// 选择第一个守卫通过的转换
    pub fn select(
        &self,
        state: TrackingState,
        context: &TrackingContext,
        event: &TrackingEvent,
    ) -> Option<&Transition> {
        self.candidates(state, event.kind())?
            .iter()
            .find(|transition| transition.is_enabled(context, event))
    }

    /// 执行转换：先执行动作，再进入目标状态
    pub fn apply(
        &self,
        from: TrackingState,
        transition: &Transition,
        context: &mut TrackingContext,
        event: &TrackingEvent,
    ) -> (TrackingState, Vec<Effect>) {
        let mut effects: Vec<Effect> = transition
            .actions
            .iter()
            .filter_map(|action| action.apply(context, event))
            .collect();

        let next = transition.target.unwrap_or(from);
        if transition.target == Some(TrackingState::Idle) {
            if let Some(effect) = Action::ClearContext.apply(context, event) {
                effects.push(effect);
            }
        }

        (next, effects)
    }

    /// 获取所有可能的状态
    pub fn get_all_states() -> Vec<TrackingState> {
        vec![
            TrackingState::Off,
            TrackingState::Idle,
            TrackingState::PromptBeginTracking,
            TrackingState::Tracking,
            TrackingState::PromptTrackNewStudy,
            TrackingState::PromptTrackNewSeries,
            TrackingState::PromptSaveReport,
            TrackingState::PromptHydrateStructuredReport,
            TrackingState::HydrateStructuredReport,
            TrackingState::UpdateBackendReport,
        ]
    }

    /// 获取状态可接受的所有事件
    pub fn get_possible_events(&self, state: TrackingState) -> Vec<EventKind> {
        self.transitions
            .keys()
            .filter(|(from, _)| *from == state)
            .map(|(_, kind)| *kind)
            .collect()
    }
}

impl Default for TrackingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_series(study: &str, series: &str) -> TrackingEvent {
        TrackingEvent::TrackSeries {
            study_instance_uid: study.to_string(),
            series_instance_uid: series.to_string(),
        }
    }

    fn tracking_context(study: &str, series: &[&str]) -> TrackingContext {
        let mut context = TrackingContext::new();
        context.tracked_study = Some(study.to_string());
        context.tracked_series = series.iter().map(|s| s.to_string()).collect();
        context
    }

    fn step(
        sm: &TrackingStateMachine,
        state: TrackingState,
        context: &mut TrackingContext,
        event: TrackingEvent,
    ) -> (TrackingState, Vec<Effect>) {
        let transition = sm.select(state, context, &event).cloned().unwrap();
        sm.apply(state, &transition, context, &event)
    }

    #[test]
    fn test_valid_transitions() {
        let sm = TrackingStateMachine::new();

        assert!(sm.can_handle(TrackingState::Idle, EventKind::TrackSeries));
        assert!(sm.can_handle(TrackingState::Tracking, EventKind::SaveReport));
        assert!(sm.can_handle(TrackingState::PromptSaveReport, EventKind::Error));
        assert!(sm.can_handle(TrackingState::Tracking, EventKind::UpdateTaskInfo));
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = TrackingStateMachine::new();

        assert!(!sm.can_handle(TrackingState::Off, EventKind::TrackSeries));
        assert!(!sm.can_handle(TrackingState::Idle, EventKind::SaveReport));
        assert!(!sm.can_handle(TrackingState::Idle, EventKind::Done));
        assert!(!sm.can_handle(TrackingState::Tracking, EventKind::Error));
        assert!(sm.get_possible_events(TrackingState::Off).is_empty());
    }

    #[test]
    fn test_begin_tracking_responses() {
        let sm = TrackingStateMachine::new();
        let mut context = TrackingContext::new();

        let (state, _) = step(&sm, TrackingState::Idle, &mut context, track_series("s1", "se1"));
        assert_eq!(state, TrackingState::PromptBeginTracking);

        let mut result = PromptResult::response(UserResponse::SetStudyAndSeries);
        result.fill_from(&track_series("s1", "se1"));
        let (state, _) = step(&sm, state, &mut context, TrackingEvent::Done(result));
        assert_eq!(state, TrackingState::Tracking);
        assert!(context.is_tracked_study("s1"));
        assert_eq!(context.tracked_series, vec!["se1".to_string()]);
        assert!(context.is_dirty);

        let mut context = TrackingContext::new();
        let (state, _) = step(
            &sm,
            TrackingState::PromptBeginTracking,
            &mut context,
            TrackingEvent::Done(PromptResult::response(UserResponse::NoNever)),
        );
        assert_eq!(state, TrackingState::Off);
        assert!(state.is_final());

        let (state, _) = step(
            &sm,
            TrackingState::PromptBeginTracking,
            &mut context,
            TrackingEvent::Done(PromptResult::response(UserResponse::Cancel)),
        );
        assert_eq!(state, TrackingState::Idle);
    }

    #[test]
    fn test_track_series_guards() {
        let sm = TrackingStateMachine::new();
        let context = tracking_context("s1", &["se1"]);

        let new_study = sm.select(TrackingState::Tracking, &context, &track_series("s2", "se9"));
        assert_eq!(new_study.unwrap().target, Some(TrackingState::PromptTrackNewStudy));

        let new_series = sm.select(TrackingState::Tracking, &context, &track_series("s1", "se2"));
        assert_eq!(new_series.unwrap().target, Some(TrackingState::PromptTrackNewSeries));

        let same_series = sm.select(TrackingState::Tracking, &context, &track_series("s1", "se1"));
        assert!(same_series.is_none());

        let mut ignored = context.clone();
        ignored.ignored_series.push("se2".to_string());
        assert!(sm.select(TrackingState::Tracking, &ignored, &track_series("s1", "se2")).is_none());
    }

    #[test]
    fn test_untrack_series() {
        let sm = TrackingStateMachine::new();
        let mut context = tracking_context("s1", &["se1", "se2"]);
        context.is_dirty = false;

        let untrack = |series: &str| TrackingEvent::UntrackSeries {
            series_instance_uid: series.to_string(),
        };

        let (state, _) = step(&sm, TrackingState::Tracking, &mut context, untrack("se1"));
        assert_eq!(state, TrackingState::Tracking);
        assert_eq!(context.tracked_series, vec!["se2".to_string()]);
        assert!(context.is_dirty);

        let (state, _) = step(&sm, TrackingState::Tracking, &mut context, untrack("se2"));
        assert_eq!(state, TrackingState::Idle);
        assert!(context.tracked_series.is_empty());
        assert!(context.tracked_study.is_none());
        assert!(!context.is_dirty);
    }

    #[test]
    fn test_set_dirty_on_tracked_series() {
        let sm = TrackingStateMachine::new();
        let mut context = tracking_context("s1", &["se1"]);

        let event = TrackingEvent::SetDirty {
            study_instance_uid: "s1".to_string(),
            series_instance_uid: "se1".to_string(),
        };
        let (state, _) = step(&sm, TrackingState::Tracking, &mut context, event);
        assert_eq!(state, TrackingState::Tracking);
        assert!(context.is_dirty);

        let mut context = tracking_context("s1", &["se1"]);
        let event = TrackingEvent::SetDirty {
            study_instance_uid: "s1".to_string(),
            series_instance_uid: "other".to_string(),
        };
        let (_, _) = step(&sm, TrackingState::Tracking, &mut context, event);
        assert!(!context.is_dirty);
    }

    #[test]
    fn test_new_study_switch_discards_measurements() {
        let sm = TrackingStateMachine::new();
        let mut context = tracking_context("s1", &["se1"]);

        let mut result = PromptResult::response(UserResponse::SetStudyAndSeries);
        result.fill_from(&track_series("s2", "se9"));
        let (state, effects) = step(
            &sm,
            TrackingState::PromptTrackNewStudy,
            &mut context,
            TrackingEvent::Done(result),
        );

        assert_eq!(state, TrackingState::Tracking);
        assert_eq!(context.prev_tracked_study.as_deref(), Some("s1"));
        assert!(context.is_tracked_study("s2"));
        assert_eq!(
            effects,
            vec![Effect::DiscardMeasurementsOutside {
                study_instance_uid: "s2".to_string(),
                series_instance_uids: vec!["se9".to_string()],
            }]
        );
    }

    #[test]
    fn test_save_report_outcomes() {
        let sm = TrackingStateMachine::new();
        let mut context = tracking_context("s1", &["se1"]);

        let (state, _) = step(
            &sm,
            TrackingState::PromptSaveReport,
            &mut context,
            TrackingEvent::Done(PromptResult::response(UserResponse::Cancel)),
        );
        assert_eq!(state, TrackingState::Tracking);
        assert!(!context.success_save_report);

        let (state, _) = step(
            &sm,
            TrackingState::PromptSaveReport,
            &mut context,
            TrackingEvent::Done(PromptResult::response(UserResponse::CreateReport)),
        );
        assert_eq!(state, TrackingState::Tracking);
        assert!(context.success_save_report);
    }

    #[test]
    fn test_guards_tolerate_missing_data() {
        let context = tracking_context("s1", &["se1"]);
        let event = TrackingEvent::Done(PromptResult::default());

        for guard in [
            Guard::IsNewStudy,
            Guard::IsNewSeries,
            Guard::HasRemainingTrackedSeries,
            Guard::IsTrackedSeries,
            Guard::HasNotIgnoredSrSeriesForHydration,
            Guard::Response(UserResponse::Cancel),
        ] {
            assert!(!guard.evaluate(&context, &event));
            assert!(!guard.evaluate(&context, &TrackingEvent::SaveReport));
        }
    }

    #[test]
    fn test_compared_timepoint_idempotent() {
        let sm = TrackingStateMachine::new();
        let mut context = TrackingContext::new();
        let timepoint = Timepoint {
            study_instance_uid: "prior".to_string(),
            trial_time_point_id: "01".to_string(),
            ..Default::default()
        };

        let (state, effects) = step(
            &sm,
            TrackingState::Idle,
            &mut context,
            TrackingEvent::UpdateComparedTimepoint(timepoint.clone()),
        );
        assert_eq!(state, TrackingState::Idle);
        assert_eq!(effects, vec![Effect::HydrateComparedTimepoint(timepoint.clone())]);

        let (_, effects) = step(
            &sm,
            TrackingState::Idle,
            &mut context,
            TrackingEvent::UpdateComparedTimepoint(timepoint),
        );
        assert!(effects.is_empty());
    }

    #[test]
    fn test_user_response_codes() {
        assert_eq!(i32::from(UserResponse::NoNever), -1);
        assert_eq!(UserResponse::try_from(5).unwrap(), UserResponse::HydrateReport);
        assert!(UserResponse::try_from(9).is_err());

        let result: PromptResult =
            serde_json::from_str(r#"{"userResponse": 3, "StudyInstanceUID": "s1"}"#).unwrap();
        assert_eq!(result.user_response, Some(UserResponse::SetStudyAndSeries));
        assert_eq!(result.study_instance_uid.as_deref(), Some("s1"));
    }

    #[test]
    fn test_event_wire_format() {
        let event: TrackingEvent = serde_json::from_str(
            r#"{"type": "TRACK_SERIES", "data": {"StudyInstanceUID": "s1", "SeriesInstanceUID": "se1"}}"#,
        )
        .unwrap();
        assert_eq!(event, track_series("s1", "se1"));

        let event: TrackingEvent = serde_json::from_str(r#"{"type": "SAVE_REPORT"}"#).unwrap();
        assert_eq!(event.kind(), EventKind::SaveReport);
    }
}
