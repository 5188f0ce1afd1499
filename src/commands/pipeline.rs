// 处理命令
//
// 处理流程在 spawn_blocking 中运行，前台负责输出进度；Ctrl-C 设置取消标志，
// 当前文件处理完后停止。

use crate::audio::engine::{select_engine, AudioEngine};
use crate::cli::{AssemblyArgs, ClassifyArgs, ConcatArgs, MatchArgs, RunArgs, TransformArgs};
use crate::config::{AppConfig, AssemblyConfig, MatchConfig};
use crate::database::Workbook;
use crate::error::{AppError, AppResult};
use crate::models::StageSummary;
use crate::pipeline::progress::Progress;
use crate::pipeline::{self, ClassifyOutcome, PipelineEvent, PipelineRequest, PipelineSummary};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// 命令行参数覆盖配置中的匹配区间
pub fn match_config(base: &MatchConfig, args: &MatchArgs) -> MatchConfig {
    MatchConfig {
        key_range: args.key_range.unwrap_or(base.key_range),
        bpm_range: args.bpm_range.unwrap_or(base.bpm_range),
    }
}

/// 命令行参数覆盖配置中的拼接选项
pub fn assembly_config(base: &AssemblyConfig, args: &AssemblyArgs) -> AppResult<AssemblyConfig> {
    let mut config = base.clone();
    if let Some(gap) = args.gap {
        if !gap.is_finite() {
            return Err(AppError::InvalidArgument(format!("静音间隙无效: {}", gap)));
        }
        config.gap_seconds = gap;
    }
    if let Some(format) = &args.format {
        config.output_format = format.trim_start_matches('.').to_lowercase();
    }
    if let Some(bitrate) = &args.bitrate {
        config.bitrate = bitrate.clone();
    }
    Ok(config)
}

/// Ctrl-C 时设置取消标志
fn install_cancel_handler() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[CLI] 收到中断信号，当前文件处理完后停止");
            flag.store(true, Ordering::SeqCst);
        }
    });
    cancel
}

/// 在阻塞线程池中运行
async fn run_blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Task(e.to_string()))?
}

/// 选择音频引擎（会调用 ffmpeg 检测滤镜）
async fn engine_from_config(config: &AppConfig) -> AppResult<Box<dyn AudioEngine>> {
    let mode = config.transform.engine;
    let sample_format = config.transform.sample_format.clone();
    run_blocking(move || select_engine(mode, &sample_format)).await
}

/// 控制台进度回调：每个工作单元输出一行，取消标志置位后返回 false
fn console_progress(label: &'static str, cancel: Arc<AtomicBool>) -> impl FnMut(usize, usize, &str) -> bool {
    move |current: usize, total: usize, message: &str| {
        eprintln!("[{}] {}/{} {}", label, current, total, message);
        !cancel.load(Ordering::SeqCst)
    }
}

/// 一键处理
pub async fn run(args: RunArgs, config: AppConfig) -> AppResult<()> {
    let request = PipelineRequest {
        table_path: args.table,
        audio_dir: args.audio_dir,
        output_dir: args.output,
        matching: match_config(&config.matching, &args.matching),
        assembly: assembly_config(&config.assembly, &args.assembly)?,
        asset_strategies: config.transform.asset_strategies(),
        keep_intermediate: args.keep_intermediate || config.keep_intermediate,
    };
    info!(
        "[CLI] 一键处理: 表格={:?}, 音频={:?}, 输出={:?}",
        request.table_path, request.audio_dir, request.output_dir
    );

    let engine = engine_from_config(&config).await?;
    let cancel = install_cancel_handler();
    let (tx, rx) = crossbeam_channel::unbounded::<PipelineEvent>();

    let worker = run_blocking(move || pipeline::run(&request, engine.as_ref(), &tx, &cancel));
    let renderer = tokio::task::spawn_blocking(move || {
        for event in rx.iter() {
            for line in event_lines(&event) {
                match &event {
                    PipelineEvent::StepProgress { .. } | PipelineEvent::TotalProgress { .. } => eprintln!("{}", line),
                    _ => println!("{}", line),
                }
            }
        }
    });

    let result = worker.await;
    let _ = renderer.await;
    result?;
    Ok(())
}

/// 把流程事件转换成输出行：进度写到 stderr，日志和最终结果写到 stdout
fn event_lines(event: &PipelineEvent) -> Vec<String> {
    match event {
        PipelineEvent::StepProgress { step, percent, message } => {
            vec![format!("[{}] {:>3}% {}", step.label(), percent, message)]
        }
        PipelineEvent::TotalProgress { percent } => vec![format!("总进度 {}%", percent)],
        PipelineEvent::Log { level, message } => match level.as_str() {
            "INFO" => vec![message.clone()],
            _ => vec![format!("[{}] {}", level, message)],
        },
        PipelineEvent::Finished { summary } => summary_lines(summary),
    }
}

fn stage_line(label: &str, summary: &StageSummary) -> String {
    format!("{}完成：成功 {}/{}，失败 {}", label, summary.success, summary.total, summary.failed())
}

fn summary_lines(summary: &PipelineSummary) -> Vec<String> {
    let mut lines = Vec::new();
    if summary.cancelled {
        lines.push("处理已取消，已生成的文件保留".to_string());
    }
    lines.push(format!("分类表格：{}", summary.workbook.display()));
    lines.push(format!("分类 {} 个，配对 {} 个", summary.groups, summary.pairs));
    lines.push(stage_line("变调变速", &summary.transform));
    lines.push(stage_line("音频拼接", &summary.concat));
    lines
}

/// 分类命令的结果说明
fn classify_lines(outcome: &ClassifyOutcome, workbook: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    if outcome.cancelled {
        lines.push("分类已取消，分类结果不完整".to_string());
    }
    lines.push(format!("分类表格已保存：{}", workbook.display()));
    lines.push(format!("生成了 {} 个分类、{} 个配对", outcome.groups, outcome.pairs));
    lines
}

/// 步骤1：歌曲分类
pub async fn classify(args: ClassifyArgs, config: AppConfig) -> AppResult<()> {
    let matching = match_config(&config.matching, &args.matching);
    let cancel = install_cancel_handler();

    let workbook_path = args.output.clone();
    let outcome = run_blocking(move || {
        let mut callback = console_progress("分类", cancel);
        let mut progress = Progress::new(&mut callback);
        let outcome = pipeline::classify_table(&args.table, &args.output, &matching, &mut progress)?;
        if let Some(csv_path) = &args.csv {
            Workbook::open(&args.output)?.export_csv(csv_path)?;
            println!("CSV 已导出：{}", csv_path.display());
        }
        Ok(outcome)
    })
    .await?;

    for line in classify_lines(&outcome, &workbook_path) {
        println!("{}", line);
    }
    Ok(())
}

/// 步骤2：变调变速
pub async fn transform(args: TransformArgs, config: AppConfig) -> AppResult<()> {
    let engine = engine_from_config(&config).await?;
    let strategies = config.transform.asset_strategies();
    let cancel = install_cancel_handler();

    let summary = run_blocking(move || {
        let mut callback = console_progress("变调", cancel);
        let mut progress = Progress::new(&mut callback);
        pipeline::transform_workbook(
            &args.workbook,
            &args.audio_dir,
            &args.output,
            &strategies,
            engine.as_ref(),
            &mut progress,
        )
    })
    .await?;

    println!("{}", stage_line("变调变速", &summary));
    Ok(())
}

/// 步骤3：音频拼接
pub async fn concat(args: ConcatArgs, config: AppConfig) -> AppResult<()> {
    let options = assembly_config(&config.assembly, &args.assembly)?;
    let engine = engine_from_config(&config).await?;
    let cancel = install_cancel_handler();
    let output_dir = args.output.clone();

    let summary = run_blocking(move || {
        let mut callback = console_progress("拼接", cancel);
        let mut progress = Progress::new(&mut callback);
        pipeline::concat_workbook(
            &args.workbook,
            &args.audio_dir,
            &args.output,
            &options,
            engine.as_ref(),
            &mut progress,
        )
    })
    .await?;

    println!("{}", stage_line("音频拼接", &summary));
    println!("成品目录：{}", output_dir.display());
    Ok(())
}
