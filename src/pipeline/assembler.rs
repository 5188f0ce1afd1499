// 音频拼接
//
// 每个配对在中间文件夹中找到四个片段，按固定顺序拼接：
// 静音 -> A前段 -> 静音 -> B前段 -> 静音 -> A后段 -> 静音 -> B后段 -> 静音

use crate::audio::engine::{AudioEngine, ConcatPlan};
use crate::config::AssemblyConfig;
use crate::error::{AppError, AppResult};
use crate::models::{Pair, StageSummary};
use crate::pipeline::planner::pair_folder;
use crate::pipeline::progress::Progress;
use crate::utils::sanitize_filename;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

lazy_static::lazy_static! {
    // 成品名开头的两个数字 ID，例如 `12-34-晴天+夜曲`
    static ref PRODUCT_IDS: Regex = Regex::new(r"^(\d+)-(\d+)-").unwrap();
}

/// 片段文件的查找顺序
const SEGMENT_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "flac", "ogg", "aac"];

/// 取得配对两首歌曲的 ID
///
/// 优先使用配对中保存的 ID，其次从成品名解析，最后按 `-` 切分取前两段。
pub fn resolve_pair_ids(pair: &Pair) -> AppResult<(String, String)> {
    let anchor_id = pair.anchor.id.trim();
    let match_id = pair.matched.id.trim();
    if !anchor_id.is_empty() && !match_id.is_empty() {
        return Ok((anchor_id.to_string(), match_id.to_string()));
    }
    ids_from_product_name(&pair.product_name)
}

/// 从成品名解析两首歌曲的 ID
pub fn ids_from_product_name(product_name: &str) -> AppResult<(String, String)> {
    if let Some(caps) = PRODUCT_IDS.captures(product_name) {
        return Ok((caps[1].to_string(), caps[2].to_string()));
    }

    let mut tokens = product_name.split('-').map(str::trim).filter(|t| !t.is_empty());
    match (tokens.next(), tokens.next()) {
        (Some(a), Some(b)) => Ok((a.to_string(), b.to_string())),
        _ => Err(AppError::UnresolvableProductName(product_name.to_string())),
    }
}

/// 查找片段文件：先找 `{id}/{id}-{label}`，再找 `{id}-{label}`
pub fn find_segment(folder: &Path, song_id: &str, label: &str) -> Option<PathBuf> {
    let file_stem = format!("{}-{}", song_id, label);
    let candidates = [folder.join(song_id), folder.to_path_buf()];

    candidates.iter().find_map(|dir| {
        SEGMENT_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{}.{}", file_stem, ext)))
            .find(|path| path.is_file())
    })
}

/// 构建一个配对的拼接计划，任一片段缺失时返回 `MissingSegment`
pub fn build_plan(
    folder: &Path,
    product_name: &str,
    ids: (&str, &str),
    options: &AssemblyConfig,
) -> AppResult<ConcatPlan> {
    let (id_a, id_b) = ids;
    let order = [
        (id_a, options.front_label.as_str()),
        (id_b, options.front_label.as_str()),
        (id_a, options.back_label.as_str()),
        (id_b, options.back_label.as_str()),
    ];

    let mut plan = ConcatPlan::new();
    plan.push_silence(options.gap_seconds);
    for (song_id, label) in order {
        let path = find_segment(folder, song_id, label).ok_or_else(|| AppError::MissingSegment {
            product: product_name.to_string(),
            segment: format!("{}-{}", song_id, label),
        })?;
        plan.push_segment(path);
        plan.push_silence(options.gap_seconds);
    }
    Ok(plan)
}

/// 成品输出路径
pub fn product_path(output_dir: &Path, product_name: &str, format: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", sanitize_filename(product_name), format.trim_start_matches('.')))
}

/// 拼接所有配对，返回 (成功数, 总数)
///
/// 单个配对的解析、片段缺失或导出失败只记录日志，不影响其他配对。
pub fn assemble(
    pairs: &[Pair],
    conformed_root: &Path,
    output_dir: &Path,
    options: &AssemblyConfig,
    engine: &dyn AudioEngine,
    progress: &mut Progress,
) -> AppResult<StageSummary> {
    fs::create_dir_all(output_dir)?;

    let total = pairs.len();
    let mut summary = StageSummary { success: 0, total };

    for (idx, pair) in pairs.iter().enumerate() {
        let message = format!("拼接 {} ({}/{})", pair.product_name, idx + 1, total);
        if !progress.report(idx + 1, total, &message) {
            info!("[ASSEMBLER] 拼接被取消，已完成 {}/{}", idx, total);
            break;
        }

        match assemble_one(pair, conformed_root, output_dir, options, engine) {
            Ok(path) => {
                info!("[ASSEMBLER] 已保存: {}", path.display());
                summary.success += 1;
            }
            Err(e) => {
                error!("[ASSEMBLER] 拼接失败 {}: {}", pair.product_name, e);
            }
        }
    }

    info!("[ASSEMBLER] 拼接完成: {}/{}", summary.success, summary.total);
    Ok(summary)
}

fn assemble_one(
    pair: &Pair,
    conformed_root: &Path,
    output_dir: &Path,
    options: &AssemblyConfig,
    engine: &dyn AudioEngine,
) -> AppResult<PathBuf> {
    let (id_a, id_b) = resolve_pair_ids(pair)?;
    let folder = pair_folder(conformed_root, &pair.product_name);
    let plan = build_plan(&folder, &pair.product_name, (&id_a, &id_b), options)?;

    let output = product_path(output_dir, &pair.product_name, &options.output_format);
    engine.render(&plan, &output, &options.bitrate)?;
    Ok(output)
}
