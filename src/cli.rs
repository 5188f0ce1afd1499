// 命令行参数

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// 音乐串烧一键工具
#[derive(Parser, Debug)]
#[command(name = "mashup")]
#[command(about = "歌曲分类、变调变速、音频拼接", long_about = None)]
#[command(version)]
pub struct Cli {
    /// 数据目录（配置文件和日志），默认为程序目录下的 data
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 一键处理：分类 -> 变调变速 -> 拼接
    Run(RunArgs),
    /// 步骤1：歌曲分类，结果写入分类表格
    Classify(ClassifyArgs),
    /// 步骤2：按分类表格变调变速
    Transform(TransformArgs),
    /// 步骤3：按分类表格拼接成品
    Concat(ConcatArgs),
    /// 检查 FFmpeg 等依赖
    Check,
    /// 查看或重置配置
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// 分类参数（覆盖配置文件）
#[derive(Args, Debug, Clone, Default)]
pub struct MatchArgs {
    /// 调号匹配区间（±半音）
    #[arg(long, value_name = "SEMITONES")]
    pub key_range: Option<u32>,

    /// 速度匹配区间（±BPM）
    #[arg(long, value_name = "BPM")]
    pub bpm_range: Option<u32>,
}

/// 拼接参数（覆盖配置文件）
#[derive(Args, Debug, Clone, Default)]
pub struct AssemblyArgs {
    /// 静音间隙（秒）
    #[arg(long, value_name = "SECONDS")]
    pub gap: Option<f64>,

    /// 成品格式，例如 mp3、wav
    #[arg(long, value_name = "EXT")]
    pub format: Option<String>,

    /// 成品码率，例如 320k
    #[arg(long, value_name = "RATE")]
    pub bitrate: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// 歌曲表格（csv / json）
    pub table: PathBuf,

    /// 原始音频目录
    #[arg(long, value_name = "DIR")]
    pub audio_dir: PathBuf,

    /// 输出目录
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    #[command(flatten)]
    pub matching: MatchArgs,

    #[command(flatten)]
    pub assembly: AssemblyArgs,

    /// 保留变调变速中间文件
    #[arg(long)]
    pub keep_intermediate: bool,
}

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// 歌曲表格（csv / json）
    pub table: PathBuf,

    /// 分类表格输出路径（.db）
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    #[command(flatten)]
    pub matching: MatchArgs,

    /// 同时导出一份 CSV 便于查看
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TransformArgs {
    /// 分类表格（.db）
    pub workbook: PathBuf,

    /// 原始音频目录
    #[arg(long, value_name = "DIR")]
    pub audio_dir: PathBuf,

    /// 输出目录（每个成品一个子文件夹）
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct ConcatArgs {
    /// 分类表格（.db）
    pub workbook: PathBuf,

    /// 变调变速后的音频目录
    #[arg(long, value_name = "DIR")]
    pub audio_dir: PathBuf,

    /// 成品输出目录
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    #[command(flatten)]
    pub assembly: AssemblyArgs,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// 显示当前配置
    Show,
    /// 恢复默认配置
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "mashup", "run", "songs.csv", "--audio-dir", "audio", "-o", "out", "--key-range", "3", "--gap", "0",
        ])
        .unwrap();
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.table, PathBuf::from("songs.csv"));
                assert_eq!(args.matching.key_range, Some(3));
                assert_eq!(args.matching.bpm_range, None);
                assert_eq!(args.assembly.gap, Some(0.0));
                assert!(!args.keep_intermediate);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_reset() {
        let cli = Cli::try_parse_from(["mashup", "-v", "config", "reset"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Config { action: ConfigAction::Reset }));
    }

    #[test]
    fn test_command_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
