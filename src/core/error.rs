use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("无法打开文件: {0}")]
    OpenError(String),

    #[error("无法找到视频流")]
    NoVideoStream,

    #[error("尚未打开媒体源")]
    NotOpened,

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("像素转换错误: {0}")]
    ConvertError(String),

    #[error("重采样错误: {0}")]
    ResampleError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("音频设备不存在")]
    AudioDeviceMissing,

    #[error("帧缓冲区已销毁")]
    BufferClosed,

    #[error("视频尺寸或像素格式在播放中发生变化: {old} -> {new}")]
    GeometryChanged { old: String, new: String },

    #[error("线程启动失败: {0}")]
    ThreadError(String),
}

impl From<serde_json::Error> for PlayerError {
    fn from(e: serde_json::Error) -> Self {
        PlayerError::ConfigError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
