//! 病灶追踪演示程序
//!
//! 模拟一次随访阅片：加载访视、开始追踪、添加测量、校验并保存报告

use recist_core::{AnnotationStats, Measurement, Report, TaskInfo, Timepoint, ToolName};
use recist_tracking::{
    InMemoryMeasurementService, InMemoryReportService, MeasurementService, ScriptedPromptService,
    TrackingEngine, TrackingEvent, UserResponse,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const STUDY_BASELINE: &str = "1.2.840.10008.1";
const STUDY_FOLLOW_UP: &str = "1.2.840.10008.2";
const SERIES_FOLLOW_UP: &str = "1.2.840.10008.2.1";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    let prompts = Arc::new(ScriptedPromptService::new());
    let measurements = Arc::new(InMemoryMeasurementService::new());
    let reports = Arc::new(InMemoryReportService::new().with_timepoints(sample_timepoints()));
    let mut engine = TrackingEngine::new(prompts.clone(), measurements.clone(), reports);

    println!("🚀 RECIST 病灶追踪演示\n");

    // 1. 加载访视
    engine
        .send(TrackingEvent::UpdateTaskInfo(TaskInfo {
            task_id: "task-001".to_string(),
            trial_id: Some("TRIAL-01".to_string()),
            subject_id: Some("SUBJ-007".to_string()),
        }))
        .await?;
    let selection = engine.load_timepoints(STUDY_FOLLOW_UP).await?;
    println!(
        "✅ 访视加载完成 (基线: {:?}, 对照: {:?})",
        selection.baseline.map(|tp| tp.trial_time_point_id),
        selection.compared.map(|tp| tp.trial_time_point_id)
    );
    println!("   对照访视只读测量: {}", measurements.readonly_measurements().await.len());

    // 2. 开始追踪随访序列
    prompts.push_response(UserResponse::SetStudyAndSeries).await;
    let state = engine
        .send(TrackingEvent::TrackSeries {
            study_instance_uid: STUDY_FOLLOW_UP.to_string(),
            series_instance_uid: SERIES_FOLLOW_UP.to_string(),
        })
        .await?;
    println!("✅ 当前状态: {} (未保存修改: {})", state, engine.context().is_dirty);

    // 3. 添加本期测量
    measurements
        .add_raw_measurement(lesion("c1", "1|Target|Liver", STUDY_FOLLOW_UP, SERIES_FOLLOW_UP, 18.2, 9.0))
        .await?;
    measurements
        .add_raw_measurement(lesion("c2", "2|Target|Lymph_Node", STUDY_FOLLOW_UP, SERIES_FOLLOW_UP, 21.0, 12.4))
        .await?;
    measurements
        .add_raw_measurement(lesion("c3", "3|New_Lesion|Bone", STUDY_FOLLOW_UP, SERIES_FOLLOW_UP, 7.0, 5.0))
        .await?;

    // 4. 校验并计算SOD
    let draft = engine.validate_current(None).await?;
    println!("\n📊 {}", draft.validation.summary());
    println!(
        "   靶病灶: {}, 非靶病灶: {}, 新病灶: {}",
        draft.counts.target, draft.counts.non_target, draft.counts.new_lesion
    );
    println!("   SOD: {:.1} mm", draft.sod.auto_calculated);
    for (uid, result) in &draft.validation.measurements {
        for message in &result.messages {
            println!("   ⚠️  {}: {}", uid, message);
        }
    }

    // 5. 保存报告
    prompts.push_response(UserResponse::CreateReport).await;
    let state = engine.send(TrackingEvent::SaveReport).await?;
    println!(
        "\n✅ 报告已保存: {} (状态: {})",
        engine.context().success_save_report,
        state
    );

    Ok(())
}

fn lesion(uid: &str, label: &str, study: &str, series: &str, length: f64, width: f64) -> Measurement {
    let mut data = BTreeMap::new();
    data.insert(
        format!("imageId:{}", uid),
        AnnotationStats {
            length: Some(length),
            width: Some(width),
        },
    );

    Measurement {
        uid: uid.to_string(),
        label: label.to_string(),
        measurement_label_info: None,
        tool_name: ToolName::Bidirectional,
        data,
        reference_study_uid: study.to_string(),
        reference_series_uid: series.to_string(),
        sop_instance_uid: format!("{}.{}", series, uid),
        modality: Some("CT".to_string()),
    }
}

fn sample_timepoints() -> Vec<Timepoint> {
    let baseline_report = Report {
        id: "report-00".to_string(),
        measurements: vec![
            lesion("b1", "1|Target|Liver", STUDY_BASELINE, "1.2.840.10008.1.1", 24.0, 12.0),
            lesion("b2", "2|Target|Lymph_Node", STUDY_BASELINE, "1.2.840.10008.1.1", 25.0, 16.5),
        ],
        sod: Some(40.5),
        ..Default::default()
    };

    vec![
        Timepoint {
            study_instance_uid: STUDY_BASELINE.to_string(),
            trial_time_point_id: "00".to_string(),
            reports: vec![baseline_report],
            ..Default::default()
        },
        Timepoint {
            study_instance_uid: STUDY_FOLLOW_UP.to_string(),
            trial_time_point_id: "01".to_string(),
            ..Default::default()
        },
    ]
}
