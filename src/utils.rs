// 工具模块

use std::path::{Path, PathBuf};
use std::process::Command;
use regex::Regex;
use crate::error::{AppError, AppResult};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

/// Windows 下隐藏控制台窗口的标志
#[cfg(target_os = "windows")]
pub const CREATE_NO_WINDOW: u32 = 0x08000000;

/// 支持的音频格式
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "flac", "aac", "ogg", "wma"];

lazy_static::lazy_static! {
    // 文件名中的非法字符
    static ref ILLEGAL_FILENAME_CHARS: Regex = Regex::new(r#"[<>:"/\\|?*]"#).unwrap();
}

/// 创建一个隐藏控制台窗口的 Command（Windows 专用）
/// 在非 Windows 平台上等同于 Command::new
#[cfg(target_os = "windows")]
pub fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(not(target_os = "windows"))]
pub fn hidden_command(program: &str) -> Command {
    Command::new(program)
}

/// 生成 UUID
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 获取可执行文件所在目录
pub fn get_exe_dir() -> Option<PathBuf> {
    std::env::current_exe().ok()?.parent().map(|p| p.to_path_buf())
}

/// 解析程序路径，优先使用相对于可执行文件的 ffmpeg 目录
pub fn resolve_tool_path(tool_name: &str) -> String {
    let file_name = format!("{}{}", tool_name, std::env::consts::EXE_SUFFIX);
    if let Some(exe_dir) = get_exe_dir() {
        // 检查 ffmpeg 子目录
        let tool_path = exe_dir.join("ffmpeg").join(&file_name);
        if tool_path.exists() {
            return tool_path.to_string_lossy().to_string();
        }
        // 检查可执行文件同级目录
        let tool_path = exe_dir.join(&file_name);
        if tool_path.exists() {
            return tool_path.to_string_lossy().to_string();
        }
    }
    // 回退到系统 PATH
    tool_name.to_string()
}

/// 清理文件名：路径非法字符替换为下划线
pub fn sanitize_filename(filename: &str) -> String {
    ILLEGAL_FILENAME_CHARS.replace_all(filename, "_").into_owned()
}

/// 是否为支持的音频文件（按扩展名，大小写不敏感）
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// 文件主名（不含扩展名）
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// 规范化歌曲 ID：表格里的整数 ID 常被读成 `12.0`，统一还原为 `12`
pub fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return String::new();
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && trimmed.contains('.') => {
            format!("{}", v as i64)
        }
        _ => trimmed.to_string(),
    }
}

/// 先写到同目录的临时文件，成功后再重命名为目标文件
///
/// 中途失败不会留下不完整的目标文件，重新运行时不会把半成品当成已完成。
pub fn write_atomically<F>(output: &Path, write: F) -> AppResult<()>
where
    F: FnOnce(&Path) -> AppResult<()>,
{
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let suffix = output
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let tmp = tempfile::Builder::new()
        .prefix(".mashup-")
        .suffix(&suffix)
        .tempfile_in(parent)?
        .into_temp_path();

    write(&tmp)?;
    tmp.persist(output).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}

/// 目标文件已存在且非空
pub fn output_exists(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}
