use crate::core::{MediaInfo, PcmFormat, PlayerConfig, Result};
use crate::player::decoder::{SwrResampler, SwsConverter};
use crate::player::demuxer::FfmpegSource;
use crate::player::media_source::{MediaBackend, MediaSource, OpenedMedia};
use log::{info, warn};

#[cfg(feature = "cpal-output")]
pub type OutputDevice = crate::player::audio_output::CpalPcmDevice;

/// 没有启用音频输出后端时，音频数据被静默丢弃
#[cfg(not(feature = "cpal-output"))]
pub type OutputDevice = crate::player::synthetic::NullPcmDevice;

#[cfg(feature = "cpal-output")]
fn open_output_device(format: PcmFormat) -> Result<OutputDevice> {
    OutputDevice::open(format)
}

#[cfg(not(feature = "cpal-output"))]
fn open_output_device(format: PcmFormat) -> Result<OutputDevice> {
    warn!("⚠️  未启用 cpal-output，音频将被丢弃");
    Ok(OutputDevice::new(format))
}

/// FFmpeg 后端：解封装、软件解码、swscale、swresample
#[derive(Debug, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for FfmpegBackend {
    type Source = FfmpegSource;
    type Converter = SwsConverter;
    type Resampler = SwrResampler;
    type Device = OutputDevice;

    fn open(
        &mut self,
        path: &str,
        config: &PlayerConfig,
    ) -> Result<OpenedMedia<FfmpegSource, SwsConverter, SwrResampler, OutputDevice>> {
        let source = FfmpegSource::open(path)?;
        let converter = SwsConverter::new(source.video_decoder(), config.display_format);

        // 音频初始化失败只禁用音频，不影响视频播放
        let format = config.pcm_format();
        let resampler = match source.audio_decoder() {
            Some(decoder) => SwrResampler::new(decoder, format)
                .map_err(|e| warn!("⚠️  {}，禁用音频", e))
                .ok(),
            None => None,
        };
        let device = if resampler.is_some() && config.audio_enabled {
            open_output_device(format)
                .map_err(|e| warn!("⚠️  音频设备打开失败，禁用音频: {}", e))
                .ok()
        } else {
            None
        };

        info!(
            "✅ 打开完成: {}（音频输出: {}）",
            source.description(),
            device.is_some()
        );
        Ok(OpenedMedia {
            source,
            converter,
            resampler,
            device,
        })
    }

    fn probe(&mut self, path: &str) -> Result<MediaInfo> {
        Ok(FfmpegSource::open(path)?.info().clone())
    }

    fn open_video(&mut self, path: &str, config: &PlayerConfig) -> Result<(FfmpegSource, SwsConverter)> {
        let source = FfmpegSource::open(path)?;
        let converter = SwsConverter::new(source.video_decoder(), config.display_format);
        Ok((source, converter))
    }
}
