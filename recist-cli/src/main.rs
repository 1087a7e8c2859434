//! RECIST 校验命令行工具
//!
//! 读取一次访视的测量JSON，输出分组统计、校验报告和SOD。

use anyhow::{Context, Result};
use clap::Parser;
use recist_admin::{init_logging, ConfigManager};
use recist_core::Measurement;
use recist_tracking::{build_report_draft, ReportDraft};
use recist_validation::format_sod;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "recist-cli")]
#[command(about = "RECIST 1.1 病灶测量校验与SOD计算")]
struct Args {
    /// 访视测量JSON文件
    #[arg(short, long)]
    input: String,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    /// 用户填写的SOD (mm)
    #[arg(long)]
    user_sod: Option<f64>,

    /// 格式化输出JSON
    #[arg(long)]
    pretty: bool,
}

/// 输入：本期测量及可选的上期测量
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisitInput {
    #[serde(default)]
    is_baseline: bool,
    measurements: Vec<Measurement>,
    #[serde(default)]
    last_measurements: Option<Vec<Measurement>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VisitOutput {
    summary: String,
    sod_display: String,
    #[serde(flatten)]
    draft: ReportDraft,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::new(args.config.as_deref())?;
    let mut config = manager.get_config().await;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    // 初始化日志
    init_logging(&config.logging)?;

    info!("读取访视测量: {}", args.input);
    let content = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read input file: {}", args.input))?;
    let visit: VisitInput = serde_json::from_str(&content).context("Failed to parse visit JSON")?;

    if visit.is_baseline && visit.last_measurements.is_some() {
        warn!("基线访视不与上期对照，忽略 lastMeasurements");
    }
    let last_measurements = visit
        .last_measurements
        .as_deref()
        .filter(|_| !visit.is_baseline);

    let draft = build_report_draft(
        &visit.measurements,
        last_measurements,
        visit.is_baseline,
        &config.validation,
        args.user_sod,
    );

    if draft.sod.differs_from_auto() {
        warn!(
            "用户填写的SOD {} 与自动计算值 {} 不一致",
            format_sod(draft.sod.effective()),
            format_sod(draft.sod.auto_calculated)
        );
    }

    let output = VisitOutput {
        summary: draft.validation.summary(),
        sod_display: format_sod(draft.sod.auto_calculated),
        draft,
    };
    info!("{}", output.summary);

    let json = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", json);

    Ok(())
}
