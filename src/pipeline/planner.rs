// 变调变速
//
// 为每个配对找到匹配歌曲的音频文件，计算对齐到锚定歌曲所需的半音数和速度比例，
// 生成变调任务；锚定歌曲的音频原样复制（非 WAV 转换为 WAV），每个成品名只复制一次。

use crate::audio::assets::AssetIndex;
use crate::audio::engine::AudioEngine;
use crate::error::AppResult;
use crate::models::{AnchorCopy, AudioAsset, Pair, StageSummary, TransformTask};
use crate::music::key::semitone_shift;
use crate::pipeline::progress::Progress;
use crate::utils::{output_exists, sanitize_filename, write_atomically};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// 变调计划
#[derive(Debug, Clone, Default)]
pub struct TransformPlan {
    pub tasks: Vec<TransformTask>,
    pub anchor_copies: Vec<AnchorCopy>,
    /// 因调号、速度或音频缺失而跳过的配对数
    pub skipped: usize,
}

/// 配对对应的中间文件夹
pub fn pair_folder(output_root: &Path, product_name: &str) -> PathBuf {
    output_root.join(sanitize_filename(product_name))
}

/// 变调输出文件路径，沿用源文件主名
pub fn destination_for(folder: &Path, asset: &AudioAsset) -> PathBuf {
    folder.join(format!("{}.wav", sanitize_filename(&asset.stem())))
}

/// 速度比例 anchor / match，任一速度无效时返回 None
pub fn tempo_ratio(anchor_tempo: f64, match_tempo: f64) -> Option<f64> {
    if anchor_tempo.is_finite() && match_tempo.is_finite() && anchor_tempo > 0.0 && match_tempo > 0.0 {
        Some(anchor_tempo / match_tempo)
    } else {
        None
    }
}

/// 生成变调计划
///
/// 单个配对的调号无法识别、速度无效或找不到音频时只跳过该配对。
pub fn plan(pairs: &[Pair], index: &dyn AssetIndex, output_root: &Path) -> TransformPlan {
    let mut result = TransformPlan::default();
    let mut copied_products: HashSet<&str> = HashSet::new();

    for pair in pairs {
        let anchor = &pair.anchor;
        let matched = &pair.matched;

        let shift = match semitone_shift(&matched.key, &anchor.key) {
            Ok(shift) => shift,
            Err(e) => {
                warn!("[PLANNER] {} 跳过: {}", pair.product_name, e);
                result.skipped += 1;
                continue;
            }
        };

        let ratio = match tempo_ratio(anchor.tempo, matched.tempo) {
            Some(ratio) => ratio,
            None => {
                warn!(
                    "[PLANNER] {} 跳过: 速度无效 (锚定 {}, 匹配 {})",
                    pair.product_name, anchor.tempo, matched.tempo
                );
                result.skipped += 1;
                continue;
            }
        };

        let assets = index.find_assets(&matched.id, &matched.name);
        if assets.is_empty() {
            warn!("[PLANNER] {} 跳过: 未找到 {} ({}) 的音频文件", pair.product_name, matched.name, matched.id);
            result.skipped += 1;
            continue;
        }

        info!(
            "[PLANNER] {}: {} 调号 {} -> {} ({:+} 半音), 速度 {} -> {} (x{:.4}), {} 个文件",
            pair.product_name,
            matched.name,
            matched.key,
            anchor.key,
            shift,
            matched.tempo,
            anchor.tempo,
            ratio,
            assets.len()
        );

        let folder = pair_folder(output_root, &pair.product_name);

        if copied_products.insert(pair.product_name.as_str()) {
            let anchor_assets = index.find_assets(&anchor.id, &anchor.name);
            if anchor_assets.is_empty() {
                warn!("[PLANNER] {}: 未找到锚定歌曲 {} ({}) 的音频文件", pair.product_name, anchor.name, anchor.id);
            } else {
                result.anchor_copies.push(AnchorCopy {
                    pair: pair.clone(),
                    assets: anchor_assets,
                    destination_dir: folder.clone(),
                });
            }
        }

        for asset in assets {
            let destination = destination_for(&folder, &asset);
            result.tasks.push(TransformTask {
                pair: pair.clone(),
                asset,
                semitone_shift: shift,
                tempo_ratio: ratio,
                destination,
            });
        }
    }

    info!(
        "[PLANNER] 共 {} 个配对: {} 个变调任务, {} 个锚定复制, 跳过 {} 个",
        pairs.len(),
        result.tasks.len(),
        result.anchor_copies.len(),
        result.skipped
    );
    result
}

/// 执行变调计划
///
/// 锚定复制在该成品的第一个任务之前进行。已存在的输出按 (成品名, 源文件主名) 判定，
/// 跳过处理但计入成功。单个任务失败只记录日志，不影响其他任务。
pub fn execute(plan: &TransformPlan, engine: &dyn AudioEngine, progress: &mut Progress) -> StageSummary {
    let total = plan.tasks.len();
    let mut summary = StageSummary { success: 0, total };

    let copies: HashMap<&str, &AnchorCopy> = plan
        .anchor_copies
        .iter()
        .map(|copy| (copy.pair.product_name.as_str(), copy))
        .collect();
    let mut copied: HashSet<&str> = HashSet::new();
    let mut finished: HashSet<(String, String)> = HashSet::new();

    for (idx, task) in plan.tasks.iter().enumerate() {
        let message = format!("处理 {} ({}/{})", task.pair.matched.name, idx + 1, total);
        if !progress.report(idx + 1, total, &message) {
            info!("[PLANNER] 变调被取消，已完成 {}/{}", idx, total);
            break;
        }

        let product = task.pair.product_name.as_str();
        if copied.insert(product) {
            if let Some(copy) = copies.get(product) {
                copy_anchor(copy, engine);
            }
        }

        let key = (product.to_string(), task.asset.stem());
        if finished.contains(&key) || output_exists(&task.destination) {
            info!("[PLANNER] 已存在，跳过: {}", task.destination.display());
            finished.insert(key);
            summary.success += 1;
            continue;
        }

        match conform_one(task, engine) {
            Ok(()) => {
                finished.insert(key);
                summary.success += 1;
            }
            Err(e) => {
                error!("[PLANNER] 处理失败 {} ({}): {}", task.pair.matched.name, task.asset.path.display(), e);
            }
        }
    }

    info!("[PLANNER] 变调完成: {}/{}", summary.success, summary.total);
    summary
}

fn conform_one(task: &TransformTask, engine: &dyn AudioEngine) -> AppResult<()> {
    if let Some(parent) = task.destination.parent() {
        fs::create_dir_all(parent)?;
    }
    engine.conform(&task.asset.path, &task.destination, task.semitone_shift, task.tempo_ratio)
}

/// 复制锚定歌曲的所有音频，失败只记录日志
fn copy_anchor(copy: &AnchorCopy, engine: &dyn AudioEngine) {
    for asset in &copy.assets {
        let destination = destination_for(&copy.destination_dir, asset);
        if output_exists(&destination) {
            continue;
        }
        if let Err(e) = copy_one(asset, &destination, engine) {
            error!("[PLANNER] 复制锚定歌曲失败 {}: {}", asset.path.display(), e);
        }
    }
}

fn copy_one(asset: &AudioAsset, destination: &Path, engine: &dyn AudioEngine) -> AppResult<()> {
    if asset.is_wav() {
        write_atomically(destination, |tmp| {
            fs::copy(&asset.path, tmp)?;
            Ok(())
        })
    } else {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        engine.convert_lossless(&asset.path, destination)
    }
}
