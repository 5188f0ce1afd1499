// 错误处理模块

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("FFmpeg 错误: {0}")]
    FFmpeg(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("依赖缺失: {0}")]
    DependencyMissing(String),

    #[error("任务已取消")]
    Cancelled,

    #[error("后台任务异常退出: {0}")]
    Task(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 表格缺少必需的列（歌名、调号、速度）
    #[error("表格缺少必需的列: {0}")]
    MissingColumns(String),

    /// 第 row 行的调号无法转换为 0-11 的音级
    #[error("第 {row} 行的调号无效: {value}")]
    InvalidKey { row: usize, value: String },

    /// 第 row 行的速度不是有效数值
    #[error("第 {row} 行的速度无效: {value}")]
    InvalidTempo { row: usize, value: String },

    /// 变调阶段无法识别的调号（只跳过对应的配对）
    #[error("无法识别的调号: {0}")]
    UnresolvableKey(String),

    /// 无法从成品名中解析出两首歌曲的 ID
    #[error("无法从成品名解析歌曲ID: {0}")]
    UnresolvableProductName(String),

    /// 拼接所需的片段文件缺失
    #[error("找不到音频文件: {product} 缺少 {segment}")]
    MissingSegment { product: String, segment: String },
}

pub type AppResult<T> = Result<T, AppError>;
