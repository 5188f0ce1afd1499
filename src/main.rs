// Mashup - 音乐串烧一键工具
// 主入口文件

mod audio;
mod cli;
mod commands;
mod config;
mod database;
mod error;
mod logging;
mod models;
mod music;
mod pipeline;
mod table;
mod utils;

use clap::Parser;
use cli::{Cli, Command};
use std::path::PathBuf;
use tracing::{error, info};

/// 获取应用数据目录（程序目录下的 data 文件夹）
fn get_app_data_dir() -> PathBuf {
    // 优先使用可执行文件所在目录
    if let Some(exe_dir) = utils::get_exe_dir() {
        // 开发模式下，exe 在 target/debug 或 target/release 目录，需要回到项目根目录
        let in_target = ["debug", "release"]
            .iter()
            .any(|profile| exe_dir.ends_with(PathBuf::from("target").join(profile)));
        if in_target {
            if let Some(root) = exe_dir.parent().and_then(|p| p.parent()) {
                return root.join("data");
            }
        }
        return exe_dir.join("data");
    }

    // 回退到系统数据目录
    dirs::data_dir()
        .map(|dir| dir.join("mashup"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

async fn dispatch(command: Command) -> error::AppResult<()> {
    let app_config = config::get_config();
    match command {
        Command::Run(args) => commands::pipeline::run(args, app_config).await,
        Command::Classify(args) => commands::pipeline::classify(args, app_config).await,
        Command::Transform(args) => commands::pipeline::transform(args, app_config).await,
        Command::Concat(args) => commands::pipeline::concat(args, app_config).await,
        Command::Check => commands::system::check(app_config).await,
        Command::Config { action } => commands::config::handle(action),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let app_dir = cli.data_dir.clone().unwrap_or_else(get_app_data_dir);

    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        eprintln!("创建应用数据目录失败: {}", e);
    }

    // 初始化配置
    let config_path = app_dir.join("config.json");
    if let Err(e) = config::init_config(&config_path) {
        eprintln!("配置初始化失败: {}\n\n请检查磁盘空间和写入权限。", e);
        std::process::exit(1);
    }

    // 初始化日志系统 - guard 必须保持存活，否则异步日志线程会退出
    let log_level = config::get_config().log_level;
    let _log_guard = logging::init_logging(&app_dir, &log_level, cli.verbose);

    info!("Mashup 启动中... 数据目录: {:?}", app_dir);

    if let Err(e) = dispatch(cli.command).await {
        error!("执行失败: {}", e);
        eprintln!("错误: {}", e);
        drop(_log_guard);
        std::process::exit(1);
    }
}
