//! 访视选择

use recist_core::Timepoint;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 会话使用的关键访视
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimepointSelection {
    pub current: Option<Timepoint>,
    pub baseline: Option<Timepoint>,
    /// 紧邻本期之前的访视
    pub last: Option<Timepoint>,
    /// 本期之前报告SOD最小的访视
    pub lowest_sod: Option<Timepoint>,
    pub compared: Option<Timepoint>,
}

impl TimepointSelection {
    /// 从后端顺序的访视列表中选出基线、上期、最低SOD和对照访视
    ///
    /// 找不到本期访视时，全部访视都视为既往访视。
    pub fn select(timepoints: &[Timepoint], current_study_uid: &str) -> Self {
        let current_position = timepoints
            .iter()
            .position(|tp| tp.study_instance_uid == current_study_uid);
        let priors = match current_position {
            Some(position) => &timepoints[..position],
            None => timepoints,
        };

        let baseline = timepoints.iter().find(|tp| tp.is_baseline_visit()).cloned();
        let last = priors.last().cloned();

        let mut lowest_sod: Option<&Timepoint> = None;
        for tp in priors {
            let Some(sod) = tp.report_sod() else { continue };
            let lower = lowest_sod
                .and_then(Timepoint::report_sod)
                .map(|current_min| sod < current_min)
                .unwrap_or(true);
            if lower {
                lowest_sod = Some(tp);
            }
        }

        debug!(
            "Selected timepoints for {}: {} prior visits, baseline={:?}, last={:?}",
            current_study_uid,
            priors.len(),
            baseline.as_ref().map(|tp| tp.trial_time_point_id.as_str()),
            last.as_ref().map(|tp| tp.trial_time_point_id.as_str())
        );

        Self {
            current: current_position.map(|position| timepoints[position].clone()),
            baseline,
            compared: last.clone(),
            last,
            lowest_sod: lowest_sod.cloned(),
        }
    }
}
