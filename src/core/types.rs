use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 数据包所属的流
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    /// 字幕、数据等其他流，播放线程直接丢弃
    Other,
}

/// 流时间基（有理数，秒/单位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1000 };

    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }
}

/// 解码帧的几何信息（宽、高、像素格式）
///
/// `format` 为解码器原生像素格式编号，`None` 表示格式未确定
/// （解码器 flush 时可能吐出这种空帧）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub format: Option<i32>,
}

impl FrameGeometry {
    /// 尺寸非零且像素格式确定
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.format.is_some()
    }
}

impl fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format {
            Some(format) => write!(f, "{}x{} fmt={}", self.width, self.height, format),
            None => write!(f, "{}x{} fmt=none", self.width, self.height),
        }
    }
}

/// 显示端原生像素布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayFormat {
    Rgb565,
    Bgra8888,
    Bgrx8888,
    Rgba8888,
}

impl DisplayFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            DisplayFormat::Rgb565 => 2,
            DisplayFormat::Bgra8888 | DisplayFormat::Bgrx8888 | DisplayFormat::Rgba8888 => 4,
        }
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self, DisplayFormat::Bgra8888 | DisplayFormat::Rgba8888)
    }
}

/// 像素转换结果的布局描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: DisplayFormat,
}

impl PixelLayout {
    pub fn packed(width: u32, height: u32, format: DisplayFormat) -> Self {
        Self {
            width,
            height,
            stride: width as usize * format.bytes_per_pixel(),
            format,
        }
    }

    pub fn data_size(&self) -> usize {
        self.stride * self.height as usize
    }
}

/// 已转换为显示格式的视频帧
///
/// 像素数据用 `Arc` 共享，克隆只增加引用计数，
/// 环形缓冲区入队时的克隆因此很便宜。
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts: Option<i64>,   // 显示时间戳（毫秒）
    pub layout: PixelLayout,
    pub data: Arc<[u8]>,
}

/// 音频输出的固定 PCM 格式（交错 S16LE）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * Self::BYTES_PER_SAMPLE
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
        }
    }
}

/// 媒体信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: i64,          // 总时长（毫秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub avg_frame_rate: Option<TimeBase>,
    pub frame_count: i64,
    pub video_time_base: TimeBase,
    pub audio_time_base: Option<TimeBase>,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.audio_time_base.is_some()
    }

    /// 按平均帧率计算刷新周期（毫秒），帧率未知时返回 `None`
    pub fn frame_refresh_period(&self) -> Option<u64> {
        let rate = self.avg_frame_rate?;
        if rate.num <= 0 || rate.den <= 0 {
            return None;
        }
        let period = 1000 * rate.den as i64 / rate.num as i64;
        (period > 0).then_some(period as u64)
    }
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            duration: 0,
            width: 0,
            height: 0,
            fps: 0.0,
            avg_frame_rate: None,
            frame_count: 0,
            video_time_base: TimeBase::MILLIS,
            audio_time_base: None,
            video_codec: String::new(),
            audio_codec: String::new(),
            sample_rate: 0,
            channels: 0,
        }
    }
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PlaybackState {
    Stopped = 0,
    Running = 1,
    Paused = 2,
    /// 播放线程自然结束（输入耗尽或会话中止）
    Ended = 3,
}

impl PlaybackState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Running,
            2 => PlaybackState::Paused,
            3 => PlaybackState::Ended,
            _ => PlaybackState::Stopped,
        }
    }
}

/// 控制命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerCommand {
    Start,
    Stop,
    Pause,
    Resume,
}

/// 播放器对外事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// 播放结束且未开启自动重播
    Ready,
    /// 播放结束后自动从头开始
    Restarted,
}

/// 诊断统计快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybackStats {
    pub video_clock: Option<i64>,
    pub audio_clock: Option<i64>,
    pub frame_drop_count: u64,
    pub frame_repeat_count: u64,
    pub buffered_frames: usize,
    pub evicted_frames: u64,
}
