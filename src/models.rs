// 数据模型

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 歌曲信息（从表格读取后只读）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongRecord {
    /// 歌曲 ID，缺省时为 1 开始的行号
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artist: String,
    /// 原始调号文本（字母或数字写法）
    pub key: String,
    /// 速度 (BPM)
    pub tempo: f64,
    /// 性别（原始写法，去除首尾空白）
    #[serde(default)]
    pub gender: String,
    /// 其他透传列，按表头顺序保存
    #[serde(default)]
    pub extra: Vec<(String, String)>,
}

impl SongRecord {
    /// 规范化后的性别，用于分组比较
    pub fn gender_normalized(&self) -> String {
        self.gender.trim().to_lowercase()
    }

    /// 读取透传列
    pub fn extra_value(&self, column: &str) -> &str {
        self.extra
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
            .unwrap_or("")
    }
}

/// 分类组：一首锚定歌曲加上与之匹配的歌曲（按原始行序）
#[derive(Debug, Clone, PartialEq)]
pub struct CompatibilityGroup {
    pub anchor: SongRecord,
    pub matches: Vec<SongRecord>,
}

/// 配对：锚定歌曲 + 匹配歌曲，成品名贯穿三个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub anchor: SongRecord,
    pub matched: SongRecord,
    pub product_name: String,
}

/// 音频文件及其代表的片段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioAsset {
    pub path: PathBuf,
    pub song_id: String,
    /// 片段标签，例如 `front`、`back`
    pub segment: String,
}

impl AudioAsset {
    /// 文件主名，变调输出沿用此名
    pub fn stem(&self) -> String {
        crate::utils::file_stem(&self.path)
    }

    pub fn is_wav(&self) -> bool {
        extension_is(&self.path, "wav")
    }
}

fn extension_is(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// 变调变速任务：把匹配歌曲的一个音频文件对齐到锚定歌曲的调号和速度
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformTask {
    pub pair: Pair,
    pub asset: AudioAsset,
    /// 半音数，范围 [-6, 6]
    pub semitone_shift: i32,
    /// anchor_tempo / match_tempo
    pub tempo_ratio: f64,
    pub destination: PathBuf,
}

/// 锚定歌曲原样复制任务（按成品名去重）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorCopy {
    pub pair: Pair,
    pub assets: Vec<AudioAsset>,
    pub destination_dir: PathBuf,
}

/// 各步骤的统计结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub success: usize,
    pub total: usize,
}

impl StageSummary {
    pub fn failed(&self) -> usize {
        self.total.saturating_sub(self.success)
    }
}

/// 依赖检查结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyCheck {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
    pub path: Option<String>,
    pub message: String,
}
