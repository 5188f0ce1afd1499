// FFmpeg 封装模块

use crate::audio::engine::{AudioEngine, ConcatPiece, ConcatPlan};
use crate::error::{AppError, AppResult};
use crate::utils::{hidden_command, resolve_tool_path, write_atomically};
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use tracing::{debug, error, info};

/// 拼接时统一的采样率
const CONCAT_SAMPLE_RATE: u32 = 44100;

/// atempo 单级允许的倍率范围
const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

// 缓存 rubberband 滤镜检测结果
static RUBBERBAND_CACHE: OnceLock<bool> = OnceLock::new();

/// 检测 ffmpeg 是否编译了 rubberband 滤镜
pub fn rubberband_available() -> bool {
    *RUBBERBAND_CACHE.get_or_init(|| {
        let ffmpeg_path = resolve_tool_path("ffmpeg");
        let output = hidden_command(&ffmpeg_path)
            .args(["-hide_banner", "-filters"])
            .stderr(Stdio::null())
            .output();

        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let found = stdout
                    .lines()
                    .any(|line| line.split_whitespace().nth(1) == Some("rubberband"));
                if found {
                    info!("[FFMPEG] 检测到 rubberband 滤镜，将使用高质量变调变速");
                } else {
                    info!("[FFMPEG] 未检测到 rubberband 滤镜");
                }
                found
            }
            Ok(_) => false,
            Err(e) => {
                error!("[FFMPEG] 检测滤镜失败: {}", e);
                false
            }
        }
    })
}

/// 变调变速的实现方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfmpegBackend {
    /// rubberband 滤镜，同时处理音高和速度
    Rubberband,
    /// asetrate 改变音高后用 atempo 校正速度
    Resample,
}

/// 基于 FFmpeg 命令行的音频引擎
pub struct FfmpegEngine {
    backend: FfmpegBackend,
    sample_format: String,
}

impl FfmpegEngine {
    pub fn new(backend: FfmpegBackend, sample_format: &str) -> Self {
        Self {
            backend,
            sample_format: sample_format.to_string(),
        }
    }

    fn pcm_codec(&self) -> &'static str {
        pcm_codec(&self.sample_format)
    }
}

impl AudioEngine for FfmpegEngine {
    fn name(&self) -> &str {
        match self.backend {
            FfmpegBackend::Rubberband => "ffmpeg (rubberband)",
            FfmpegBackend::Resample => "ffmpeg (asetrate + atempo)",
        }
    }

    fn conform(&self, input: &Path, output: &Path, semitones: i32, tempo_ratio: f64) -> AppResult<()> {
        if !(tempo_ratio.is_finite() && tempo_ratio > 0.0) {
            return Err(AppError::InvalidArgument(format!("速度比例无效: {}", tempo_ratio)));
        }

        let sample_rate = match self.backend {
            FfmpegBackend::Rubberband => 0,
            FfmpegBackend::Resample => probe_sample_rate(input)?,
        };
        let filter = pitch_tempo_filter(self.backend, semitones, tempo_ratio, sample_rate);
        debug!("[FFMPEG] 变调变速滤镜: {}", filter);

        let input_str = input.to_string_lossy().to_string();
        let codec = self.pcm_codec();
        write_atomically(output, |tmp| {
            let tmp_str = tmp.to_string_lossy().to_string();
            run_ffmpeg(&[
                "-v", "error",
                "-i", &input_str,
                "-vn",
                "-af", &filter,
                "-c:a", codec,
                "-y",
                &tmp_str,
            ])
        })?;

        info!(
            "[FFMPEG] 变调变速完成: {} ({:+} 半音, x{:.4})",
            output.display(),
            semitones,
            tempo_ratio
        );
        Ok(())
    }

    fn convert_lossless(&self, input: &Path, output: &Path) -> AppResult<()> {
        let input_str = input.to_string_lossy().to_string();
        let codec = self.pcm_codec();
        write_atomically(output, |tmp| {
            let tmp_str = tmp.to_string_lossy().to_string();
            run_ffmpeg(&["-v", "error", "-i", &input_str, "-vn", "-c:a", codec, "-y", &tmp_str])
        })?;
        info!("[FFMPEG] 已转换为 WAV: {}", output.display());
        Ok(())
    }

    fn render(&self, plan: &ConcatPlan, output: &Path, bitrate: &str) -> AppResult<()> {
        let extension = output
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "mp3".to_string());
        let codec_args = output_codec_args(&extension, bitrate, &self.sample_format);

        write_atomically(output, |tmp| {
            let args = concat_args(plan, &codec_args, tmp)?;
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            run_ffmpeg(&args)
        })?;
        info!("[FFMPEG] 拼接导出完成: {}", output.display());
        Ok(())
    }
}

/// 获取音频采样率
pub fn probe_sample_rate(audio_path: &Path) -> AppResult<u32> {
    let ffprobe_path = resolve_tool_path("ffprobe");
    let output = hidden_command(&ffprobe_path)
        .args([
            "-v", "quiet",
            "-select_streams", "a:0",
            "-show_entries", "stream=sample_rate",
            "-of", "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(audio_path)
        .output()
        .map_err(|e| AppError::FFmpeg(format!("ffprobe 执行失败: {}", e)))?;

    if !output.status.success() {
        return Err(AppError::FFmpeg("ffprobe 获取采样率失败".to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .trim()
        .parse::<u32>()
        .map_err(|_| AppError::FFmpeg(format!("解析采样率失败: {}", stdout.trim())))
}

/// 构建变调变速滤镜
pub fn pitch_tempo_filter(backend: FfmpegBackend, semitones: i32, tempo_ratio: f64, sample_rate: u32) -> String {
    let pitch = 2f64.powf(semitones as f64 / 12.0);

    match backend {
        FfmpegBackend::Rubberband => {
            format!("rubberband=tempo={:.6}:pitch={:.6}:pitchq=quality", tempo_ratio, pitch)
        }
        FfmpegBackend::Resample => {
            if semitones == 0 {
                return atempo_chain(tempo_ratio).join(",");
            }
            // asetrate 同时改变音高和速度，剩余速度由 atempo 补偿
            let shifted_rate = (sample_rate as f64 * pitch).round() as u64;
            let mut filters = vec![
                format!("asetrate={}", shifted_rate),
                format!("aresample={}", sample_rate),
            ];
            filters.extend(atempo_chain(tempo_ratio / pitch));
            filters.join(",")
        }
    }
}

/// atempo 单级只支持 [0.5, 2.0]，超出时串联多级
pub fn atempo_chain(factor: f64) -> Vec<String> {
    let mut remaining = factor;
    let mut chain = Vec::new();

    while remaining > ATEMPO_MAX {
        chain.push(format!("atempo={:.6}", ATEMPO_MAX));
        remaining /= ATEMPO_MAX;
    }
    while remaining < ATEMPO_MIN {
        chain.push(format!("atempo={:.6}", ATEMPO_MIN));
        remaining /= ATEMPO_MIN;
    }
    chain.push(format!("atempo={:.6}", remaining));
    chain
}

/// 采样格式对应的 PCM 编码器
pub fn pcm_codec(sample_format: &str) -> &'static str {
    match sample_format.trim().to_lowercase().as_str() {
        "s16" => "pcm_s16le",
        "s32" => "pcm_s32le",
        "flt" | "f32" => "pcm_f32le",
        _ => "pcm_s24le",
    }
}

/// 成品格式对应的编码参数
fn output_codec_args(extension: &str, bitrate: &str, sample_format: &str) -> Vec<String> {
    let args: Vec<&str> = match extension {
        "wav" => vec!["-c:a", pcm_codec(sample_format)],
        "flac" => vec!["-c:a", "flac"],
        "m4a" | "aac" => vec!["-c:a", "aac", "-b:a", bitrate],
        "ogg" => vec!["-c:a", "libvorbis", "-b:a", bitrate],
        _ => vec!["-c:a", "libmp3lame", "-b:a", bitrate],
    };
    args.into_iter().map(String::from).collect()
}

/// 构建拼接命令参数
///
/// 每个片段作为一路输入，静音使用 anullsrc 生成；所有输入先统一为 44.1kHz 立体声再 concat。
pub fn concat_args(plan: &ConcatPlan, codec_args: &[String], output: &Path) -> AppResult<Vec<String>> {
    if plan.is_empty() {
        return Err(AppError::InvalidArgument("拼接计划为空".to_string()));
    }

    let mut args: Vec<String> = vec!["-v".into(), "error".into()];
    for piece in &plan.pieces {
        match piece {
            ConcatPiece::Silence(seconds) => {
                args.extend([
                    "-f".to_string(), "lavfi".to_string(),
                    "-t".to_string(), format!("{:.3}", seconds),
                    "-i".to_string(), format!("anullsrc=r={}:cl=stereo", CONCAT_SAMPLE_RATE),
                ]);
            }
            ConcatPiece::Segment(path) => {
                args.extend(["-i".to_string(), path.to_string_lossy().to_string()]);
            }
        }
    }

    let count = plan.pieces.len();
    let mut filter = String::new();
    for idx in 0..count {
        filter.push_str(&format!(
            "[{}:a]aresample={},aformat=sample_fmts=fltp:channel_layouts=stereo[a{}];",
            idx, CONCAT_SAMPLE_RATE, idx
        ));
    }
    for idx in 0..count {
        filter.push_str(&format!("[a{}]", idx));
    }
    filter.push_str(&format!("concat=n={}:v=0:a=1[out]", count));

    args.extend([
        "-filter_complex".to_string(), filter,
        "-map".to_string(), "[out]".to_string(),
    ]);
    args.extend(codec_args.iter().cloned());
    args.extend(["-y".to_string(), output.to_string_lossy().to_string()]);
    Ok(args)
}

/// 运行 ffmpeg，失败时带上 stderr 末尾的错误信息
fn run_ffmpeg(args: &[&str]) -> AppResult<()> {
    let ffmpeg_path = resolve_tool_path("ffmpeg");
    let output = hidden_command(&ffmpeg_path)
        .args(args)
        .stdout(Stdio::null())
        .output()
        .map_err(|e| AppError::FFmpeg(format!("ffmpeg 执行失败: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let message = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
        return Err(AppError::FFmpeg(message));
    }
    Ok(())
}
