//! 追踪上下文

use recist_core::{ReportInfo, TaskInfo, Timepoint, UserInfo};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 状态机上下文，仅由状态机动作修改
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingContext {
    pub session_id: Uuid,
    pub active_viewport_id: Option<String>,

    pub tracked_study: Option<String>,
    pub tracked_series: Vec<String>,
    pub ignored_series: Vec<String>,
    pub prev_tracked_study: Option<String>,
    pub prev_tracked_series: Vec<String>,
    pub prev_ignored_series: Vec<String>,
    /// 已拒绝回填的结构化报告序列，不随 clear 重置
    pub ignored_sr_series_for_hydration: Vec<String>,

    /// 存在未保存的测量修改
    pub is_dirty: bool,
    pub success_save_report: bool,

    pub task_info: Option<TaskInfo>,
    pub current_user: Option<UserInfo>,
    pub current_timepoint: Option<Timepoint>,
    pub baseline_timepoint: Option<Timepoint>,
    pub last_timepoint: Option<Timepoint>,
    pub lowest_sod_timepoint: Option<Timepoint>,
    pub compared_timepoint: Option<Timepoint>,
    pub current_report_info: Option<ReportInfo>,
    pub compared_report_info: Option<ReportInfo>,
}

impl TrackingContext {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            active_viewport_id: None,
            tracked_study: None,
            tracked_series: Vec::new(),
            ignored_series: Vec::new(),
            prev_tracked_study: None,
            prev_tracked_series: Vec::new(),
            prev_ignored_series: Vec::new(),
            ignored_sr_series_for_hydration: Vec::new(),
            is_dirty: false,
            success_save_report: false,
            task_info: None,
            current_user: None,
            current_timepoint: None,
            baseline_timepoint: None,
            last_timepoint: None,
            lowest_sod_timepoint: None,
            compared_timepoint: None,
            current_report_info: None,
            compared_report_info: None,
        }
    }

    /// 回到空闲状态时重置追踪字段
    ///
    /// 会话元数据 (任务、用户、访视、报告) 由宿主提供，保留不变。
    pub fn clear(&mut self) {
        self.tracked_study = None;
        self.tracked_series.clear();
        self.ignored_series.clear();
        self.prev_tracked_study = None;
        self.prev_tracked_series.clear();
        self.prev_ignored_series.clear();
        self.is_dirty = false;
        self.success_save_report = false;
    }

    pub fn is_tracking_series(&self, series_instance_uid: &str) -> bool {
        self.tracked_series.iter().any(|s| s == series_instance_uid)
    }

    pub fn is_ignored_series(&self, series_instance_uid: &str) -> bool {
        self.ignored_series.iter().any(|s| s == series_instance_uid)
    }

    pub fn is_tracked_study(&self, study_instance_uid: &str) -> bool {
        self.tracked_study.as_deref() == Some(study_instance_uid)
    }

    /// 当前访视是否为基线
    pub fn is_baseline(&self) -> bool {
        self.current_timepoint
            .as_ref()
            .map(Timepoint::is_baseline_visit)
            .unwrap_or(false)
    }

    pub(crate) fn remember_previous(&mut self) {
        self.prev_tracked_study = self.tracked_study.clone();
        self.prev_tracked_series = self.tracked_series.clone();
        self.prev_ignored_series = self.ignored_series.clone();
    }
}

impl Default for TrackingContext {
    fn default() -> Self {
        Self::new()
    }
}
