// 一键处理流程
//
// 按顺序执行：歌曲分类 -> 变调变速 -> 音频拼接。
// 进度、日志和结束事件通过通道发送给前台，取消标志在每个工作单元之前检查。

pub mod assembler;
pub mod grouper;
pub mod planner;
pub mod progress;

use crate::audio::assets::{DirectoryIndex, ResolveStrategy};
use crate::audio::engine::AudioEngine;
use crate::config::{AssemblyConfig, MatchConfig};
use crate::database::Workbook;
use crate::error::{AppError, AppResult};
use crate::models::{Pair, StageSummary};
use crate::table::load_song_table;
use crate::utils::{file_stem, generate_id};
use crossbeam_channel::Sender;
use progress::Progress;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

/// 中间文件夹名称
pub const TEMP_AUDIO_DIR: &str = ".temp_audio";

/// 流程步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Classify,
    Transform,
    Concat,
}

impl PipelineStep {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStep::Classify => "步骤1：歌曲分类",
            PipelineStep::Transform => "步骤2：变调变速",
            PipelineStep::Concat => "步骤3：音频拼接",
        }
    }

    /// 步骤内进度的 (起点, 跨度) 百分比
    fn progress_span(&self) -> (u32, u32) {
        match self {
            PipelineStep::Classify => (10, 80),
            PipelineStep::Transform | PipelineStep::Concat => (5, 90),
        }
    }
}

/// 流程事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// 步骤进度 (0-100)
    StepProgress { step: PipelineStep, percent: u32, message: String },
    /// 总进度 (0-100)
    TotalProgress { percent: u32 },
    Log { level: String, message: String },
    Finished { summary: PipelineSummary },
}

/// 流程结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSummary {
    pub run_id: String,
    pub workbook: PathBuf,
    pub groups: usize,
    pub pairs: usize,
    pub transform: StageSummary,
    pub concat: StageSummary,
    pub cancelled: bool,
}

/// 一次完整处理的参数
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub table_path: PathBuf,
    pub audio_dir: PathBuf,
    pub output_dir: PathBuf,
    pub matching: MatchConfig,
    pub assembly: AssemblyConfig,
    pub asset_strategies: Vec<ResolveStrategy>,
    pub keep_intermediate: bool,
}

impl PipelineRequest {
    /// 分类结果保存路径：`{输出目录}/{表格名}_分类结果.db`
    pub fn workbook_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_分类结果.db", file_stem(&self.table_path)))
    }

    pub fn temp_audio_dir(&self) -> PathBuf {
        self.output_dir.join(TEMP_AUDIO_DIR)
    }
}

/// 分类结果
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyOutcome {
    pub groups: usize,
    pub pairs: usize,
    /// 分类中途取消，工作簿只包含已完成的分类
    pub cancelled: bool,
}

/// 步骤1：读取表格、分类并写入工作簿
///
/// 表格校验失败时直接返回错误，不会创建工作簿。
pub fn classify_table(
    table_path: &Path,
    workbook_path: &Path,
    matching: &MatchConfig,
    progress: &mut Progress,
) -> AppResult<ClassifyOutcome> {
    let records = load_song_table(table_path)?;
    info!("[PIPELINE] 读取 {} 首歌曲: {:?}", records.len(), table_path);

    let groups = grouper::group(&records, matching.key_range, matching.bpm_range, progress)?;

    let mut workbook = Workbook::create(workbook_path)?;
    workbook.set_meta("source_table", &table_path.to_string_lossy())?;
    workbook.set_meta("key_range", &matching.key_range.to_string())?;
    workbook.set_meta("bpm_range", &matching.bpm_range.to_string())?;
    let cancelled = progress.is_cancelled();
    if cancelled {
        workbook.set_meta("cancelled", "true")?;
        warn!("[PIPELINE] 分类已取消，只保存了 {} 个已完成的分类", groups.len());
    }
    let pairs = workbook.save_groups(&groups)?;

    info!("[PIPELINE] 分类结果已保存至: {:?}", workbook_path);
    Ok(ClassifyOutcome {
        groups: groups.len(),
        pairs: pairs.len(),
        cancelled,
    })
}

/// 读取工作簿中的配对
fn read_workbook_pairs(workbook_path: &Path) -> AppResult<Vec<Pair>> {
    let workbook = Workbook::open(workbook_path)?;
    let sheets = workbook.sheet_names()?;
    match workbook.get_meta("source_table")? {
        Some(source) => info!("[PIPELINE] 工作簿 {:?}: {} 个分类，来源表格 {}", workbook_path, sheets.len(), source),
        None => info!("[PIPELINE] 工作簿 {:?}: {} 个分类", workbook_path, sheets.len()),
    }
    workbook.read_pairs()
}

/// 步骤2：按工作簿中的配对变调变速
pub fn transform_workbook(
    workbook_path: &Path,
    audio_dir: &Path,
    output_root: &Path,
    strategies: &[ResolveStrategy],
    engine: &dyn AudioEngine,
    progress: &mut Progress,
) -> AppResult<StageSummary> {
    let pairs = read_workbook_pairs(workbook_path)?;
    let index = DirectoryIndex::scan(audio_dir)?.with_strategies(strategies);
    info!("[PIPELINE] 音频目录 {:?}: {} 个文件", index.root(), index.len());
    fs::create_dir_all(output_root)?;

    let plan = planner::plan(&pairs, &index, output_root);
    Ok(planner::execute(&plan, engine, progress))
}

/// 步骤3：按工作簿中的配对拼接成品
pub fn concat_workbook(
    workbook_path: &Path,
    conformed_root: &Path,
    output_dir: &Path,
    options: &AssemblyConfig,
    engine: &dyn AudioEngine,
    progress: &mut Progress,
) -> AppResult<StageSummary> {
    let pairs = read_workbook_pairs(workbook_path)?;
    if !conformed_root.is_dir() {
        return Err(AppError::NotFound(format!("音频目录不存在: {}", conformed_root.display())));
    }
    assembler::assemble(&pairs, conformed_root, output_dir, options, engine, progress)
}

/// 事件发送端，前台已退出时忽略发送失败
struct Reporter<'a> {
    events: &'a Sender<PipelineEvent>,
    cancel: &'a AtomicBool,
}

impl<'a> Reporter<'a> {
    fn log(&self, level: &str, message: String) {
        match level {
            "ERROR" => error!("[PIPELINE] {}", message),
            "WARN" => warn!("[PIPELINE] {}", message),
            _ => info!("[PIPELINE] {}", message),
        }
        let _ = self.events.send(PipelineEvent::Log {
            level: level.to_string(),
            message,
        });
    }

    fn step(&self, step: PipelineStep, percent: u32, message: &str) {
        let _ = self.events.send(PipelineEvent::StepProgress {
            step,
            percent,
            message: message.to_string(),
        });
    }

    fn total(&self, percent: u32) {
        let _ = self.events.send(PipelineEvent::TotalProgress { percent });
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// 步骤内的进度回调：汇报缩放后的百分比，返回是否继续
    fn step_callback(&self, step: PipelineStep) -> impl FnMut(usize, usize, &str) -> bool + '_ {
        let (base, span) = step.progress_span();
        move |current: usize, total: usize, message: &str| {
            self.step(step, scale_progress(base, span, current, total), message);
            !self.cancelled()
        }
    }

    fn finish(&self, summary: &PipelineSummary) {
        let _ = self.events.send(PipelineEvent::Finished {
            summary: summary.clone(),
        });
    }
}

/// 把 current/total 映射到 [base, base + span]
pub fn scale_progress(base: u32, span: u32, current: usize, total: usize) -> u32 {
    if total == 0 {
        return base;
    }
    let fraction = (current.min(total) as f64) / (total as f64);
    base + (fraction * span as f64) as u32
}

/// 执行完整流程
///
/// 任一步骤返回错误时流程终止；取消时返回已完成部分的统计，已写出的文件保留。
pub fn run(
    request: &PipelineRequest,
    engine: &dyn AudioEngine,
    events: &Sender<PipelineEvent>,
    cancel: &AtomicBool,
) -> AppResult<PipelineSummary> {
    let reporter = Reporter { events, cancel };
    let mut summary = PipelineSummary {
        run_id: generate_id(),
        workbook: request.workbook_path(),
        ..PipelineSummary::default()
    };
    info!("[PIPELINE] 开始处理 run_id={}", summary.run_id);

    let result = run_steps(request, engine, &reporter, &mut summary);
    match result {
        Ok(()) => {
            reporter.finish(&summary);
            Ok(summary)
        }
        Err(AppError::Cancelled) => {
            summary.cancelled = true;
            reporter.log("WARN", "处理已取消，已生成的文件保留".to_string());
            reporter.finish(&summary);
            Ok(summary)
        }
        Err(e) => {
            reporter.log("ERROR", format!("处理失败：{}", e));
            Err(e)
        }
    }
}

fn run_steps(
    request: &PipelineRequest,
    engine: &dyn AudioEngine,
    reporter: &Reporter,
    summary: &mut PipelineSummary,
) -> AppResult<()> {
    fs::create_dir_all(&request.output_dir)?;
    let workbook_path = request.workbook_path();
    let temp_dir = request.temp_audio_dir();

    // 步骤1
    let step = PipelineStep::Classify;
    reporter.log("INFO", format!("开始{}", step.label()));
    reporter.step(step, 0, "读取表格...");
    reporter.total(0);
    let outcome = {
        let mut callback = reporter.step_callback(step);
        let mut progress = Progress::new(&mut callback);
        classify_table(&request.table_path, &workbook_path, &request.matching, &mut progress)
            .map_err(|e| step_error(step, e))?
    };
    summary.groups = outcome.groups;
    summary.pairs = outcome.pairs;
    reporter.step(step, 100, &format!("完成！生成了 {} 个分类", outcome.groups));
    reporter.log("INFO", format!("步骤1完成：生成了 {} 个分类、{} 个配对", outcome.groups, outcome.pairs));
    reporter.log("INFO", format!("分类表格已保存至：{}", workbook_path.display()));
    check_cancel(reporter)?;
    reporter.total(33);

    // 步骤2
    let step = PipelineStep::Transform;
    reporter.log("INFO", format!("开始{}", step.label()));
    reporter.step(step, 0, "准备音频处理...");
    summary.transform = {
        let mut callback = reporter.step_callback(step);
        let mut progress = Progress::new(&mut callback);
        transform_workbook(
            &workbook_path,
            &request.audio_dir,
            &temp_dir,
            &request.asset_strategies,
            engine,
            &mut progress,
        )
        .map_err(|e| step_error(step, e))?
    };
    let t = summary.transform;
    reporter.step(step, 100, &format!("完成！处理了 {}/{} 个文件", t.success, t.total));
    reporter.log("INFO", format!("步骤2完成：成功处理 {}/{} 个文件", t.success, t.total));
    check_cancel(reporter)?;
    reporter.total(66);

    // 步骤3
    let step = PipelineStep::Concat;
    reporter.log("INFO", format!("开始{}", step.label()));
    reporter.step(step, 0, "准备拼接...");
    summary.concat = {
        let mut callback = reporter.step_callback(step);
        let mut progress = Progress::new(&mut callback);
        concat_workbook(
            &workbook_path,
            &temp_dir,
            &request.output_dir,
            &request.assembly,
            engine,
            &mut progress,
        )
        .map_err(|e| step_error(step, e))?
    };
    let c = summary.concat;
    reporter.step(step, 100, &format!("完成！拼接了 {}/{} 个成品", c.success, c.total));
    reporter.log("INFO", format!("步骤3完成：成功拼接 {}/{} 个成品", c.success, c.total));
    check_cancel(reporter)?;
    reporter.total(100);

    if request.keep_intermediate {
        reporter.log("INFO", format!("中间文件保留在：{}", temp_dir.display()));
    } else if temp_dir.exists() {
        match fs::remove_dir_all(&temp_dir) {
            Ok(()) => reporter.log("INFO", "已清理临时文件".to_string()),
            Err(e) => reporter.log("WARN", format!("清理临时文件失败：{}", e)),
        }
    }

    reporter.log(
        "INFO",
        format!(
            "全部完成！分类 {} 个，变调 {}/{}，成品 {}/{}",
            summary.groups, t.success, t.total, c.success, c.total
        ),
    );
    Ok(())
}

fn check_cancel(reporter: &Reporter) -> AppResult<()> {
    if reporter.cancelled() {
        return Err(AppError::Cancelled);
    }
    Ok(())
}

/// 为步骤错误加上步骤名称（取消不加）
fn step_error(step: PipelineStep, e: AppError) -> AppError {
    match e {
        AppError::Cancelled => e,
        other => {
            error!("[PIPELINE] {}失败: {}", step.label(), other);
            other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::assets::DEFAULT_STRATEGIES;
    use crate::audio::engine::testing::RecordingEngine;

    const TABLE: &str = "ID,歌名,调号,速度,性别\n1,晴天,C,120,f\n2,夜曲,D,122,f\n3,稻香,C,150,m\n";

    struct Fixture {
        _root: tempfile::TempDir,
        request: PipelineRequest,
    }

    fn fixture(audio_files: &[&str]) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let table_path = root.path().join("songs.csv");
        fs::write(&table_path, TABLE).unwrap();
        let audio_dir = root.path().join("audio");
        fs::create_dir_all(&audio_dir).unwrap();
        for name in audio_files {
            fs::write(audio_dir.join(name), b"audio").unwrap();
        }
        let request = PipelineRequest {
            table_path,
            audio_dir,
            output_dir: root.path().join("out"),
            matching: MatchConfig::default(),
            assembly: AssemblyConfig::default(),
            asset_strategies: DEFAULT_STRATEGIES.to_vec(),
            keep_intermediate: false,
        };
        Fixture { _root: root, request }
    }

    #[test]
    fn test_full_run() {
        let f = fixture(&["1-front.wav", "1-back.wav", "2-front.mp3", "2-back.mp3", "3-front.wav"]);
        let engine = RecordingEngine::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        let cancel = AtomicBool::new(false);

        let summary = run(&f.request, &engine, &tx, &cancel).unwrap();
        drop(tx);

        assert_eq!(summary.groups, 1);
        assert_eq!(summary.pairs, 1);
        assert_eq!(summary.transform, StageSummary { success: 2, total: 2 });
        assert_eq!(summary.concat, StageSummary { success: 1, total: 1 });
        assert!(!summary.cancelled);
        assert!(f.request.workbook_path().ends_with("songs_分类结果.db"));
        assert!(f.request.output_dir.join("1-2-晴天+夜曲.mp3").exists());
        assert!(!f.request.temp_audio_dir().exists());

        let events: Vec<PipelineEvent> = rx.iter().collect();
        let totals: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::TotalProgress { percent } => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(totals, vec![0, 33, 66, 100]);
        assert!(matches!(events.last(), Some(PipelineEvent::Finished { .. })));
    }

    #[test]
    fn test_keep_intermediate() {
        let mut f = fixture(&["1-front.wav", "1-back.wav", "2-front.wav", "2-back.wav"]);
        f.request.keep_intermediate = true;
        let engine = RecordingEngine::new();
        let (tx, _rx) = crossbeam_channel::unbounded();
        run(&f.request, &engine, &tx, &AtomicBool::new(false)).unwrap();
        assert!(f.request.temp_audio_dir().join("1-2-晴天+夜曲").join("2-back.wav").exists());
    }

    #[test]
    fn test_cancel_before_start_keeps_workbook() {
        let f = fixture(&["1-front.wav"]);
        let engine = RecordingEngine::new();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let summary = run(&f.request, &engine, &tx, &AtomicBool::new(true)).unwrap();
        assert!(summary.cancelled);
        assert!(summary.workbook.exists());
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_invalid_table_is_fatal() {
        let f = fixture(&[]);
        fs::write(&f.request.table_path, "歌名,速度\n晴天,120\n").unwrap();
        let engine = RecordingEngine::new();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let result = run(&f.request, &engine, &tx, &AtomicBool::new(false));
        assert!(matches!(result, Err(AppError::MissingColumns(_))));
        assert!(!f.request.workbook_path().exists());
    }

    #[test]
    fn test_cancelled_classify_is_marked_partial() {
        let f = fixture(&[]);
        let workbook_path = f.request.workbook_path();
        fs::create_dir_all(&f.request.output_dir).unwrap();
        let mut callback = |current: usize, _total: usize, _msg: &str| current < 2;
        let mut progress = Progress::new(&mut callback);

        let outcome =
            classify_table(&f.request.table_path, &workbook_path, &f.request.matching, &mut progress).unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.groups, 1);
        let workbook = Workbook::open(&workbook_path).unwrap();
        assert_eq!(workbook.get_meta("cancelled").unwrap().as_deref(), Some("true"));

        let mut progress = Progress::none();
        let outcome =
            classify_table(&f.request.table_path, &workbook_path, &f.request.matching, &mut progress).unwrap();
        assert!(!outcome.cancelled);
        let workbook = Workbook::open(&workbook_path).unwrap();
        assert_eq!(workbook.get_meta("cancelled").unwrap(), None);
    }

    #[test]
    fn test_scale_progress() {
        assert_eq!(scale_progress(10, 80, 0, 0), 10);
        assert_eq!(scale_progress(10, 80, 1, 2), 50);
        assert_eq!(scale_progress(5, 90, 3, 3), 95);
        assert_eq!(scale_progress(5, 90, 9, 3), 95);
    }
}
