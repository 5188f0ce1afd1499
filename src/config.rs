// 配置管理模块

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::fs;
use crate::audio::assets::{ResolveStrategy, DEFAULT_STRATEGIES};
use crate::error::{AppError, AppResult};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::info;

static CONFIG: OnceCell<RwLock<AppConfig>> = OnceCell::new();
static CONFIG_PATH: OnceCell<std::path::PathBuf> = OnceCell::new();

/// 变调变速引擎选择
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// 启动时检测，rubberband 可用则优先使用
    Auto,
    /// 强制使用 ffmpeg rubberband 滤镜（高质量）
    Rubberband,
    /// 强制使用 asetrate + atempo 滤镜链（兼容模式）
    Ffmpeg,
}

impl Default for EngineMode {
    fn default() -> Self {
        Self::Auto
    }
}

/// 日志级别
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    /// 转换为 tracing 过滤器字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// 分类匹配配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    /// 调号匹配区间（±几个半音）
    pub key_range: u32,
    /// 速度匹配区间（±几个BPM）
    pub bpm_range: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            key_range: 2,
            bpm_range: 5,
        }
    }
}

/// 变调变速配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub engine: EngineMode,
    /// 输出 WAV 的采样格式（ffmpeg sample_fmt 名称去掉 p 后缀），默认 24 位
    #[serde(default = "default_sample_format")]
    pub sample_format: String,
    /// 按 ID 找不到音频时，是否按歌名查找
    #[serde(default = "default_true")]
    pub match_by_name: bool,
}

fn default_true() -> bool {
    true
}

fn default_sample_format() -> String {
    "s24".to_string()
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            engine: EngineMode::Auto,
            sample_format: default_sample_format(),
            match_by_name: true,
        }
    }
}

impl TransformConfig {
    /// 音频文件查找策略
    pub fn asset_strategies(&self) -> Vec<ResolveStrategy> {
        if self.match_by_name {
            DEFAULT_STRATEGIES.to_vec()
        } else {
            vec![ResolveStrategy::IdPrefix]
        }
    }
}

/// 拼接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// 静音间隙时长 (秒)
    pub gap_seconds: f64,
    /// 成品码率
    pub bitrate: String,
    /// 成品格式（扩展名）
    pub output_format: String,
    /// 前段副歌片段标签，文件名形如 `{id}-{front_label}.wav`
    #[serde(default = "default_front_label")]
    pub front_label: String,
    /// 后段副歌片段标签
    #[serde(default = "default_back_label")]
    pub back_label: String,
}

fn default_front_label() -> String {
    "front".to_string()
}

fn default_back_label() -> String {
    "back".to_string()
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            gap_seconds: 0.5,
            bitrate: "320k".to_string(),
            output_format: "mp3".to_string(),
            front_label: default_front_label(),
            back_label: default_back_label(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub matching: MatchConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    /// 完成后保留变调变速中间文件
    #[serde(default)]
    pub keep_intermediate: bool,
    /// 日志级别
    #[serde(default)]
    pub log_level: LogLevel,
}

/// 读取配置文件，解析失败时回退到默认配置
pub fn load_config_file(config_path: &Path) -> AppResult<AppConfig> {
    if !config_path.exists() {
        return Ok(AppConfig::default());
    }
    let content = fs::read_to_string(config_path)?;
    Ok(serde_json::from_str(&content).unwrap_or_else(|e| {
        tracing::warn!("配置文件 JSON 解析失败: {}，使用默认配置", e);
        AppConfig::default()
    }))
}

/// 初始化配置
pub fn init_config(config_path: &Path) -> AppResult<()> {
    CONFIG_PATH.set(config_path.to_path_buf())
        .map_err(|_| AppError::Config("配置路径已初始化".to_string()))?;

    let config = if config_path.exists() {
        load_config_file(config_path)?
    } else {
        let config = AppConfig::default();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&config)?;
        fs::write(config_path, content)?;
        config
    };

    info!("[CONFIG] 配置已加载: {:?}", config_path);

    CONFIG.set(RwLock::new(config))
        .map_err(|_| AppError::Config("配置已初始化".to_string()))?;

    Ok(())
}

/// 获取配置
pub fn get_config() -> AppConfig {
    CONFIG.get()
        .map(|c| c.read().clone())
        .unwrap_or_default()
}

/// 更新配置
pub fn update_config(config: AppConfig) -> AppResult<()> {
    info!("[CONFIG] 配置更新");

    // 先写入文件，成功后再更新内存，避免文件写入失败导致内存与文件不一致
    if let Some(path) = CONFIG_PATH.get() {
        let content = serde_json::to_string_pretty(&config)?;
        fs::write(path, content)?;
    }

    if let Some(lock) = CONFIG.get() {
        let mut current = lock.write();
        *current = config;
    }

    Ok(())
}
