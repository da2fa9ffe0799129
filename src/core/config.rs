use crate::core::{DisplayFormat, PcmFormat, PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放器配置
///
/// 所有字段都有默认值，JSON 中只需写出要覆盖的项。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 视频帧环形缓冲区容量
    pub ring_capacity: usize,
    pub sync_enabled: bool,
    /// 允许的最大音视频偏差（毫秒）
    pub sync_threshold_ms: i64,
    /// 区分逐帧修正与整体重同步的软上限（毫秒）
    pub max_frame_delay_ms: i64,
    /// 无法获取帧率时的刷新周期（毫秒）
    pub default_frame_period_ms: u64,
    /// 暂停时的轮询间隔（毫秒）
    pub pause_poll_ms: u64,
    /// 读包失败后的退避时间（毫秒）
    pub read_retry_backoff_ms: u64,
    pub auto_restart: bool,
    pub audio_enabled: bool,
    /// 音量 0 - 100
    pub volume: u8,
    /// 每显示多少帧清一次上游图像缓存
    pub cache_drop_interval: u32,
    pub display_format: DisplayFormat,
    pub output_sample_rate: u32,
    pub output_channels: u16,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 5,
            sync_enabled: true,
            sync_threshold_ms: 40,
            max_frame_delay_ms: 100,
            default_frame_period_ms: 33,
            pause_poll_ms: 10,
            read_retry_backoff_ms: 10,
            auto_restart: false,
            audio_enabled: true,
            volume: 75,
            cache_drop_interval: 1,
            display_format: DisplayFormat::Bgrx8888,
            output_sample_rate: 44100,
            output_channels: 2,
        }
    }
}

impl PlayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity == 0 {
            return Err(PlayerError::ConfigError("ring_capacity 必须大于 0".to_string()));
        }
        if self.default_frame_period_ms == 0 || self.pause_poll_ms == 0 {
            return Err(PlayerError::ConfigError("刷新周期和暂停轮询间隔必须大于 0".to_string()));
        }
        if self.volume > 100 {
            return Err(PlayerError::ConfigError(format!("音量超出范围: {}", self.volume)));
        }
        if self.sync_threshold_ms < 0 || self.max_frame_delay_ms < 0 {
            return Err(PlayerError::ConfigError("同步阈值不能为负".to_string()));
        }
        if self.output_sample_rate == 0 || self.output_channels == 0 {
            return Err(PlayerError::ConfigError("音频输出格式无效".to_string()));
        }
        Ok(())
    }

    pub fn pcm_format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.output_sample_rate,
            channels: self.output_channels,
        }
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn read_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.read_retry_backoff_ms)
    }
}
