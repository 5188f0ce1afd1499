// 音频引擎
//
// 变调变速、格式转换和拼接导出都通过 AudioEngine 完成。
// 引擎在启动时选择一次，显式传给变调和拼接步骤，测试时可替换为记录调用的实现。

use crate::audio::ffmpeg::{self, FfmpegBackend, FfmpegEngine};
use crate::config::EngineMode;
use crate::error::{AppError, AppResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 拼接计划中的一段
#[derive(Debug, Clone, PartialEq)]
pub enum ConcatPiece {
    /// 静音（秒）
    Silence(f64),
    /// 音频片段文件
    Segment(PathBuf),
}

/// 拼接计划：按顺序排列的静音和片段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConcatPlan {
    pub pieces: Vec<ConcatPiece>,
}

impl ConcatPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加静音，时长不大于 0 时不追加
    pub fn push_silence(&mut self, seconds: f64) {
        if seconds > 0.0 {
            self.pieces.push(ConcatPiece::Silence(seconds));
        }
    }

    pub fn push_segment(&mut self, path: impl Into<PathBuf>) {
        self.pieces.push(ConcatPiece::Segment(path.into()));
    }

    /// 计划中的片段文件（不含静音）
    pub fn segments(&self) -> impl Iterator<Item = &Path> {
        self.pieces.iter().filter_map(|piece| match piece {
            ConcatPiece::Segment(path) => Some(path.as_path()),
            ConcatPiece::Silence(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }
}

/// 音频处理能力
pub trait AudioEngine: Send + Sync {
    /// 引擎名称，用于日志
    fn name(&self) -> &str;

    /// 变调变速：semitones 个半音，速度乘以 tempo_ratio，输出 WAV
    fn conform(&self, input: &Path, output: &Path, semitones: i32, tempo_ratio: f64) -> AppResult<()>;

    /// 转换为 WAV（保持原采样率）
    fn convert_lossless(&self, input: &Path, output: &Path) -> AppResult<()>;

    /// 按计划拼接并导出，格式由输出扩展名决定
    fn render(&self, plan: &ConcatPlan, output: &Path, bitrate: &str) -> AppResult<()>;
}

/// 根据配置选择引擎
///
/// Auto 模式下 rubberband 滤镜可用则使用高质量模式，否则退回 asetrate + atempo。
/// 强制 rubberband 但不可用时返回错误。
pub fn select_engine(mode: EngineMode, sample_format: &str) -> AppResult<Box<dyn AudioEngine>> {
    let backend = match mode {
        EngineMode::Rubberband => {
            if !ffmpeg::rubberband_available() {
                return Err(AppError::DependencyMissing(
                    "当前 FFmpeg 不支持 rubberband 滤镜，请更换 FFmpeg 或将引擎设置为 auto".to_string(),
                ));
            }
            FfmpegBackend::Rubberband
        }
        EngineMode::Ffmpeg => FfmpegBackend::Resample,
        EngineMode::Auto => {
            if ffmpeg::rubberband_available() {
                FfmpegBackend::Rubberband
            } else {
                warn!("[ENGINE] 未检测到 rubberband 滤镜，将使用兼容模式（音质较差）");
                FfmpegBackend::Resample
            }
        }
    };

    let engine = FfmpegEngine::new(backend, sample_format);
    info!("[ENGINE] 使用引擎: {}", engine.name());
    Ok(Box::new(engine))
}

#[cfg(test)]
pub mod testing {
    //! 记录调用的测试引擎，不调用 ffmpeg

    use super::*;
    use parking_lot::Mutex;
    use std::fs;

    #[derive(Debug, Clone, PartialEq)]
    pub enum EngineCall {
        Conform { input: PathBuf, output: PathBuf, semitones: i32, tempo_ratio: f64 },
        Convert { input: PathBuf, output: PathBuf },
        Render { plan: ConcatPlan, output: PathBuf, bitrate: String },
    }

    #[derive(Default)]
    pub struct RecordingEngine {
        pub calls: Mutex<Vec<EngineCall>>,
        /// 输入文件名包含其中任一字符串时返回失败
        pub fail_on: Vec<String>,
    }

    impl RecordingEngine {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_on(names: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: names.iter().map(|s| s.to_string()).collect(),
            }
        }

        pub fn calls(&self) -> Vec<EngineCall> {
            self.calls.lock().clone()
        }

        fn check(&self, path: &Path) -> AppResult<()> {
            let name = path.to_string_lossy();
            if self.fail_on.iter().any(|f| name.contains(f.as_str())) {
                return Err(AppError::FFmpeg(format!("模拟失败: {}", name)));
            }
            Ok(())
        }
    }

    impl AudioEngine for RecordingEngine {
        fn name(&self) -> &str {
            "recording"
        }

        fn conform(&self, input: &Path, output: &Path, semitones: i32, tempo_ratio: f64) -> AppResult<()> {
            self.check(input)?;
            fs::write(output, b"conformed")?;
            self.calls.lock().push(EngineCall::Conform {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
                semitones,
                tempo_ratio,
            });
            Ok(())
        }

        fn convert_lossless(&self, input: &Path, output: &Path) -> AppResult<()> {
            self.check(input)?;
            fs::write(output, b"converted")?;
            self.calls.lock().push(EngineCall::Convert {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
            });
            Ok(())
        }

        fn render(&self, plan: &ConcatPlan, output: &Path, bitrate: &str) -> AppResult<()> {
            for segment in plan.segments() {
                self.check(segment)?;
            }
            fs::write(output, b"rendered")?;
            self.calls.lock().push(EngineCall::Render {
                plan: plan.clone(),
                output: output.to_path_buf(),
                bitrate: bitrate.to_string(),
            });
            Ok(())
        }
    }
}
