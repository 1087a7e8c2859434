//! 测量分组
//!
//! 按病灶类型键把测量划分为靶病灶、新病灶、非靶病灶和其他四组，组内按病灶序号排序。

use crate::rules::GroupName;
use recist_core::Measurement;
use tracing::debug;

/// 分组结果，借用调用方的测量
#[derive(Debug, Clone, Default)]
pub struct ClassifiedMeasurements<'a> {
    pub target: Vec<&'a Measurement>,
    pub new_lesion: Vec<&'a Measurement>,
    pub non_target: Vec<&'a Measurement>,
    pub other: Vec<&'a Measurement>,
}

impl<'a> ClassifiedMeasurements<'a> {
    /// 获取指定分组
    pub fn group(&self, name: GroupName) -> &[&'a Measurement] {
        match name {
            GroupName::Target => &self.target,
            GroupName::NewLesion => &self.new_lesion,
            GroupName::NonTarget => &self.non_target,
        }
    }

    /// 四组测量总数
    pub fn len(&self) -> usize {
        self.target.len() + self.new_lesion.len() + self.non_target.len() + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 根据病灶类型键确定分组，未知键返回 None
///
/// 新病灶键同时出现在非靶病灶键中，必须先于非靶病灶判断。
pub fn classify_key(key: Option<&str>) -> Option<GroupName> {
    let key = key?;
    [GroupName::Target, GroupName::NewLesion, GroupName::NonTarget]
        .into_iter()
        .find(|group| group.key_group().contains(&key))
}

/// 对测量进行分组
pub fn classify(measurements: &[Measurement]) -> ClassifiedMeasurements<'_> {
    let mut classified = ClassifiedMeasurements::default();

    for measurement in measurements {
        let key = measurement.lesion_key();
        match classify_key(key.as_deref()) {
            Some(GroupName::Target) => classified.target.push(measurement),
            Some(GroupName::NewLesion) => classified.new_lesion.push(measurement),
            Some(GroupName::NonTarget) => classified.non_target.push(measurement),
            None => {
                debug!(
                    "Measurement {} with lesion key {:?} classified as other",
                    measurement.uid, key
                );
                classified.other.push(measurement);
            }
        }
    }

    for group in [
        &mut classified.target,
        &mut classified.new_lesion,
        &mut classified.non_target,
        &mut classified.other,
    ] {
        // 稳定排序，序号无效的测量排在最后
        group.sort_by_key(|m| m.lesion_index().unwrap_or(u32::MAX));
    }

    classified
}
