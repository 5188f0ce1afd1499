// 系统命令

use crate::audio::engine::select_engine;
use crate::audio::ffmpeg::rubberband_available;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::models::DependencyCheck;
use crate::utils::{hidden_command, resolve_tool_path};
use tracing::info;

/// 检查必需依赖
pub fn check_dependencies() -> Vec<DependencyCheck> {
    vec![
        check_tool_dependency("ffmpeg", "FFmpeg"),
        check_tool_dependency("ffprobe", "FFprobe"),
    ]
}

/// 检查命令行工具依赖（`-version` 能正常运行即视为可用）
fn check_tool_dependency(tool: &str, display_name: &str) -> DependencyCheck {
    let tool_path = resolve_tool_path(tool);
    if let Ok(output) = hidden_command(&tool_path).args(["-version"]).output() {
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let version = stdout.lines().next().map(|s| s.to_string());
            return DependencyCheck {
                name: display_name.to_string(),
                available: true,
                version,
                path: Some(tool_path),
                message: format!("{} 已安装", display_name),
            };
        }
    }
    DependencyCheck {
        name: display_name.to_string(),
        available: false,
        version: None,
        path: None,
        message: format!("{} 未安装，请安装 FFmpeg 并添加到 PATH", display_name),
    }
}

/// 检查 rubberband 滤镜
fn check_rubberband_dependency() -> DependencyCheck {
    let available = rubberband_available();
    DependencyCheck {
        name: "rubberband 滤镜".to_string(),
        available,
        version: None,
        path: None,
        message: if available {
            "可用，将使用高质量变调变速".to_string()
        } else {
            "不可用，将使用 asetrate + atempo 兼容模式（音质较差）".to_string()
        },
    }
}

/// 按配置选择的引擎名称
fn selected_engine_name(config: &AppConfig) -> String {
    match select_engine(config.transform.engine, &config.transform.sample_format) {
        Ok(engine) => engine.name().to_string(),
        Err(e) => format!("不可用 ({})", e),
    }
}

/// `check` 命令：输出依赖检查结果，必需依赖缺失时返回错误
pub async fn check(config: AppConfig) -> AppResult<()> {
    let (required, rubberband, engine) = tokio::task::spawn_blocking(move || {
        (
            check_dependencies(),
            check_rubberband_dependency(),
            selected_engine_name(&config),
        )
    })
    .await
    .map_err(|e| AppError::Task(e.to_string()))?;

    for check in required.iter().chain(std::iter::once(&rubberband)) {
        let mark = if check.available { "✓" } else { "✗" };
        match &check.version {
            Some(version) => println!("{} {}: {} ({})", mark, check.name, check.message, version),
            None => println!("{} {}: {}", mark, check.name, check.message),
        }
        if let Some(path) = &check.path {
            println!("    路径: {}", path);
        }
    }

    println!("变调变速引擎: {}", engine);

    let missing: Vec<&str> = required
        .iter()
        .filter(|c| !c.available)
        .map(|c| c.name.as_str())
        .collect();
    info!("[SYSTEM] 依赖检查完成，引擎: {}，缺失: {:?}", engine, missing);

    if !missing.is_empty() {
        return Err(AppError::DependencyMissing(missing.join(", ")));
    }
    Ok(())
}
