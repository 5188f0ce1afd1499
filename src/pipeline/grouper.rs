// 歌曲分类
//
// 按原始行序逐首作为锚定歌曲，在尚未当过锚定的歌曲中查找同性别、调号相近、速度相近的歌曲。
// 注意：一首歌在自己当锚定之前可以被多个组匹配；当过锚定之后不会再被后面的组匹配。
// 因此各组成员可能重叠，不是严格划分。

use crate::error::{AppError, AppResult};
use crate::models::{CompatibilityGroup, Pair, SongRecord};
use crate::music::key::{circular_distance, parse_key};
use crate::pipeline::progress::Progress;
use tracing::{debug, info};

/// 歌曲分类
///
/// 调号或速度无效时整体失败（不产生任何输出）；只返回至少有一首匹配歌曲的组。
pub fn group(
    records: &[SongRecord],
    key_range: u32,
    bpm_range: u32,
    progress: &mut Progress,
) -> AppResult<Vec<CompatibilityGroup>> {
    // 先整体校验，避免处理到一半才失败
    let mut pitch_classes = Vec::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        let pitch = parse_key(&record.key).ok_or_else(|| AppError::InvalidKey {
            row: idx + 1,
            value: record.key.clone(),
        })?;
        if !record.tempo.is_finite() {
            return Err(AppError::InvalidTempo { row: idx + 1, value: record.tempo.to_string() });
        }
        pitch_classes.push(pitch);
    }

    let genders: Vec<String> = records.iter().map(|r| r.gender_normalized()).collect();
    let total = records.len();
    let mut used_as_anchor = vec![false; total];
    let mut groups = Vec::new();

    for anchor_idx in 0..total {
        if !progress.report(anchor_idx + 1, total, &format!("分析第 {}/{} 首歌曲", anchor_idx + 1, total)) {
            info!("[GROUPER] 分类被取消，已完成 {}/{} 首", anchor_idx, total);
            break;
        }

        used_as_anchor[anchor_idx] = true;
        let anchor = &records[anchor_idx];

        let matches: Vec<SongRecord> = (0..total)
            .filter(|&candidate_idx| !used_as_anchor[candidate_idx])
            .filter(|&candidate_idx| genders[candidate_idx] == genders[anchor_idx])
            .filter(|&candidate_idx| {
                circular_distance(pitch_classes[candidate_idx], pitch_classes[anchor_idx]) as u32 <= key_range
            })
            .filter(|&candidate_idx| {
                (records[candidate_idx].tempo - anchor.tempo).abs() <= bpm_range as f64
            })
            .map(|candidate_idx| records[candidate_idx].clone())
            .collect();

        if matches.is_empty() {
            debug!("[GROUPER] {} ({}) 没有匹配歌曲", anchor.name, anchor.id);
            continue;
        }

        debug!("[GROUPER] {} ({}) 匹配 {} 首", anchor.name, anchor.id, matches.len());
        groups.push(CompatibilityGroup {
            anchor: anchor.clone(),
            matches,
        });
    }

    info!("[GROUPER] 共 {} 首歌曲，生成 {} 个分类", total, groups.len());
    Ok(groups)
}

/// 成品名：`{锚定ID}-{匹配ID}-{锚定歌名}+{匹配歌名}`；任一 ID 为空时使用 `pair-{序号}`
pub fn product_name(anchor: &SongRecord, matched: &SongRecord, seq: usize) -> String {
    let anchor_id = anchor.id.trim();
    let match_id = matched.id.trim();
    if anchor_id.is_empty() || match_id.is_empty() {
        return format!("pair-{}", seq);
    }
    format!("{}-{}-{}+{}", anchor_id, match_id, anchor.name.trim(), matched.name.trim())
}

/// 将一个分类组展开为配对，seq 为跨组累计的配对序号
pub fn group_pairs(group: &CompatibilityGroup, seq: &mut usize) -> Vec<Pair> {
    group
        .matches
        .iter()
        .map(|matched| {
            *seq += 1;
            Pair {
                anchor: group.anchor.clone(),
                matched: matched.clone(),
                product_name: product_name(&group.anchor, matched, *seq),
            }
        })
        .collect()
}

/// 将所有分类组展开为配对
pub fn expand_pairs(groups: &[CompatibilityGroup]) -> Vec<Pair> {
    let mut seq = 0;
    groups.iter().flat_map(|g| group_pairs(g, &mut seq)).collect()
}
