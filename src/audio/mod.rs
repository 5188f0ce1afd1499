// 音频处理模块
//
// 子模块：
// - assets: 按歌曲 ID / 歌名查找音频文件
// - engine: 音频引擎抽象（变调变速、转换、拼接导出）
// - ffmpeg: 基于 FFmpeg 命令行的引擎实现（rubberband 滤镜或 asetrate + atempo）

pub mod assets;
pub mod engine;
pub mod ffmpeg;
