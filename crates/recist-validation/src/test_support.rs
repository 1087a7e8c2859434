//! 测试用测量构造器

use recist_core::{AnnotationStats, LabeledValue, Measurement, MeasurementLabelInfo, ToolName};
use std::collections::BTreeMap;

pub fn measurement(uid: &str, index: u32, lesion: &str, organ: &str) -> Measurement {
    let info = MeasurementLabelInfo {
        lesion_index: Some(LabeledValue::new(index, index.to_string())),
        lesion: Some(LabeledValue::new(lesion.to_string(), lesion)),
        organ: Some(LabeledValue::new(organ.to_string(), organ)).filter(|_| !organ.is_empty()),
        ..Default::default()
    };

    Measurement {
        uid: uid.to_string(),
        label: format!("{}|{}|{}", index, lesion, organ),
        measurement_label_info: Some(info),
        tool_name: ToolName::Length,
        data: BTreeMap::new(),
        reference_study_uid: "1.2.840.1".to_string(),
        reference_series_uid: "1.2.840.1.1".to_string(),
        sop_instance_uid: format!("1.2.840.1.1.{}", index),
        modality: Some("CT".to_string()),
    }
}

pub fn bidirectional(
    uid: &str,
    index: u32,
    lesion: &str,
    organ: &str,
    length: f64,
    width: f64,
) -> Measurement {
    let mut m = measurement(uid, index, lesion, organ);
    m.tool_name = ToolName::Bidirectional;
    m.data.insert(
        format!("annotation-{}", uid),
        AnnotationStats {
            length: Some(length),
            width: Some(width),
        },
    );
    m
}
