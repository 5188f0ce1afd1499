// 音频文件索引
//
// 根据歌曲 ID 或歌名在音频目录中查找对应的音频文件。
// 查找策略按顺序尝试，前一个策略没有结果才尝试下一个。

use crate::error::{AppError, AppResult};
use crate::models::AudioAsset;
use crate::utils::{file_stem, is_audio_file};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// 查找歌曲音频文件的能力
pub trait AssetIndex {
    /// 返回歌曲的所有音频文件，按文件主名排序
    fn find_assets(&self, song_id: &str, song_name: &str) -> Vec<AudioAsset>;
}

/// 查找策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStrategy {
    /// 文件主名以 ID 开头，其后紧跟结尾或分隔符 `-`、`_`、空格（区分大小写）
    IdPrefix,
    /// 文件主名包含歌名（不区分大小写）
    NameSubstring,
}

/// 默认策略顺序：先 ID，后歌名
pub const DEFAULT_STRATEGIES: &[ResolveStrategy] = &[ResolveStrategy::IdPrefix, ResolveStrategy::NameSubstring];

const ID_SEPARATORS: &[char] = &['-', '_', ' '];

impl ResolveStrategy {
    /// 用该策略匹配一个文件，匹配成功时返回片段标签
    fn matches(self, stem: &str, song_id: &str, song_name: &str) -> Option<String> {
        match self {
            ResolveStrategy::IdPrefix => {
                let id = song_id.trim();
                if id.is_empty() || id.eq_ignore_ascii_case("nan") {
                    return None;
                }
                let rest = stem.strip_prefix(id)?;
                if rest.is_empty() {
                    return Some(String::new());
                }
                let mut chars = rest.chars();
                match chars.next() {
                    Some(c) if ID_SEPARATORS.contains(&c) => Some(chars.as_str().to_string()),
                    _ => None,
                }
            }
            ResolveStrategy::NameSubstring => {
                let name = song_name.trim().to_lowercase();
                if name.is_empty() {
                    return None;
                }
                if stem.to_lowercase().contains(&name) {
                    Some(stem.to_string())
                } else {
                    None
                }
            }
        }
    }

    fn label(self) -> &'static str {
        match self {
            ResolveStrategy::IdPrefix => "ID",
            ResolveStrategy::NameSubstring => "歌名",
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// 目录音频索引：启动时递归扫描一次目录
#[derive(Debug, Clone)]
pub struct DirectoryIndex {
    root: PathBuf,
    /// (文件主名, 路径)，按主名排序
    files: Vec<(String, PathBuf)>,
    strategies: Vec<ResolveStrategy>,
}

impl DirectoryIndex {
    /// 扫描目录下的所有音频文件（跳过隐藏文件）
    pub fn scan(root: &Path) -> AppResult<Self> {
        if !root.is_dir() {
            return Err(AppError::NotFound(format!("音频目录不存在: {}", root.display())));
        }

        // 隐藏文件和隐藏目录（例如 .temp_audio 中间目录）都不参与查找，根目录本身除外
        let mut files: Vec<(String, PathBuf)> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_audio_file(path))
            .map(|path| (file_stem(&path), path))
            .collect();
        files.sort();

        info!("[ASSETS] 扫描 {:?}: 共 {} 个音频文件", root, files.len());
        Ok(Self {
            root: root.to_path_buf(),
            files,
            strategies: DEFAULT_STRATEGIES.to_vec(),
        })
    }

    /// 替换查找策略顺序
    pub fn with_strategies(mut self, strategies: &[ResolveStrategy]) -> Self {
        self.strategies = strategies.to_vec();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

impl AssetIndex for DirectoryIndex {
    fn find_assets(&self, song_id: &str, song_name: &str) -> Vec<AudioAsset> {
        for strategy in &self.strategies {
            let assets: Vec<AudioAsset> = self
                .files
                .iter()
                .filter_map(|(stem, path)| {
                    strategy.matches(stem, song_id, song_name).map(|segment| AudioAsset {
                        path: path.clone(),
                        song_id: song_id.trim().to_string(),
                        segment,
                    })
                })
                .collect();

            if !assets.is_empty() {
                debug!(
                    "[ASSETS] 通过{}找到 {} 个音频文件: id={}, name={}",
                    strategy.label(),
                    assets.len(),
                    song_id,
                    song_name
                );
                return assets;
            }
        }

        warn!("[ASSETS] 未找到音频文件: id={}, name={}", song_id, song_name);
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    fn stems(assets: &[AudioAsset]) -> Vec<String> {
        assets.iter().map(|a| a.stem()).collect()
    }

    #[test]
    fn test_id_prefix_requires_separator() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "12-front.mp3");
        touch(dir.path(), "12_back.wav");
        touch(dir.path(), "123-front.mp3");
        touch(dir.path(), "12.mp3");
        touch(dir.path(), "notes.txt");

        let index = DirectoryIndex::scan(dir.path()).unwrap();
        let assets = index.find_assets("12", "晴天");
        assert_eq!(stems(&assets), vec!["12", "12-front", "12_back"]);
        assert_eq!(assets[1].segment, "front");
        assert_eq!(assets[2].segment, "back");
        assert!(assets.iter().all(|a| a.song_id == "12"));
    }

    #[test]
    fn test_falls_back_to_name_substring() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "sub/周杰伦 - 晴天 Live.flac");
        touch(dir.path(), "夜曲.mp3");

        let index = DirectoryIndex::scan(dir.path()).unwrap();
        let assets = index.find_assets("99", "晴天");
        assert_eq!(stems(&assets), vec!["周杰伦 - 晴天 Live"]);
    }

    #[test]
    fn test_name_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Yesterday-front.wav");
        let index = DirectoryIndex::scan(dir.path()).unwrap();
        assert_eq!(index.find_assets("", "yesterday").len(), 1);
    }

    #[test]
    fn test_id_match_is_case_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a1-front.wav");
        let index = DirectoryIndex::scan(dir.path()).unwrap();
        assert!(index.find_assets("A1", "").is_empty());
        assert_eq!(index.find_assets("a1", "").len(), 1);
    }

    #[test]
    fn test_id_only_strategy_has_no_fallback() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "晴天.mp3");
        let index = DirectoryIndex::scan(dir.path())
            .unwrap()
            .with_strategies(&[ResolveStrategy::IdPrefix]);
        assert!(index.find_assets("1", "晴天").is_empty());
    }

    #[test]
    fn test_hidden_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".mashup-tmp.wav");
        touch(dir.path(), "1-front.wav");
        let index = DirectoryIndex::scan(dir.path()).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_hidden_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "1-front.wav");
        let temp = dir.path().join(".temp_audio").join("1-2-a+b");
        fs::create_dir_all(&temp).unwrap();
        touch(&temp, "1-back.wav");

        let index = DirectoryIndex::scan(dir.path()).unwrap();
        let labels: Vec<String> = index.find_assets("1", "").into_iter().map(|a| a.segment).collect();
        assert_eq!(labels, vec!["front"]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DirectoryIndex::scan(&dir.path().join("missing")),
            Err(AppError::NotFound(_))
        ));
    }
}
