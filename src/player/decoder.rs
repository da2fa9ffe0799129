use crate::core::{DisplayFormat, PcmFormat, PixelLayout, PlayerError, Result};
use crate::player::media_source::{AudioResampler, PixelConverter};
use ffmpeg_next::{codec, software, util};
use log::{debug, info};

fn display_pixel(format: DisplayFormat) -> util::format::Pixel {
    match format {
        DisplayFormat::Rgb565 => util::format::Pixel::RGB565LE,
        DisplayFormat::Bgra8888 => util::format::Pixel::BGRA,
        DisplayFormat::Bgrx8888 => util::format::Pixel::BGRZ,
        DisplayFormat::Rgba8888 => util::format::Pixel::RGBA,
    }
}

/// 源像素格式是否带 alpha 通道（YUVA / RGBA / 灰度+alpha 等）
fn pixel_has_alpha(pixel: util::format::Pixel) -> bool {
    pixel
        .descriptor()
        .map(|d| matches!(d.nb_components(), 2 | 4))
        .unwrap_or(false)
}

/// swscale 像素转换：解码格式 -> 显示原生格式
///
/// 源带 alpha 时输出 BGRA，否则输出配置的原生格式。
/// 缩放上下文按首帧几何信息创建一次。
pub struct SwsConverter {
    target: DisplayFormat,
    scaler: Option<software::scaling::Context>,
    layout: Option<PixelLayout>,
}

// SwsContext 本身不是 Send，但转换器只在播放线程中使用
unsafe impl Send for SwsConverter {}

impl SwsConverter {
    pub fn new(decoder: &codec::decoder::Video, native: DisplayFormat) -> Self {
        let target = if pixel_has_alpha(decoder.format()) {
            DisplayFormat::Bgra8888
        } else {
            native
        };
        debug!(
            "像素转换: {:?} {}x{} -> {:?}",
            decoder.format(),
            decoder.width(),
            decoder.height(),
            target
        );
        Self {
            target,
            scaler: None,
            layout: None,
        }
    }

    fn scaler_for(&mut self, frame: &util::frame::Video) -> Result<&mut software::scaling::Context> {
        if self.scaler.is_none() {
            let (width, height) = (frame.width(), frame.height());
            let mut flags = software::scaling::Flags::BILINEAR;
            if width % 8 != 0 || height % 8 != 0 {
                flags |= software::scaling::Flags::ACCURATE_RND;
            }
            let scaler = software::scaling::Context::get(
                frame.format(),
                width,
                height,
                display_pixel(self.target),
                width,
                height,
                flags,
            )?;
            self.layout = Some(PixelLayout::packed(width, height, self.target));
            self.scaler = Some(scaler);
        }
        self.scaler
            .as_mut()
            .ok_or_else(|| PlayerError::ConvertError("缩放上下文不可用".to_string()))
    }
}

impl PixelConverter<util::frame::Video> for SwsConverter {
    fn output_format(&self) -> DisplayFormat {
        self.target
    }

    fn convert(&mut self, frame: &util::frame::Video, dst: &mut Vec<u8>) -> Result<PixelLayout> {
        let mut converted = util::frame::Video::empty();
        self.scaler_for(frame)?.run(frame, &mut converted)?;
        let layout = self
            .layout
            .ok_or_else(|| PlayerError::ConvertError("像素布局未初始化".to_string()))?;

        // 复制数据到连续内存（去掉行对齐填充）
        let row_size = layout.stride;
        let src_stride = converted.stride(0);
        let src = converted.data(0);
        if src_stride < row_size || src.len() < src_stride * (layout.height as usize).saturating_sub(1) + row_size {
            return Err(PlayerError::ConvertError("转换输出小于预期".to_string()));
        }

        dst.clear();
        dst.try_reserve(layout.data_size())
            .map_err(|e| PlayerError::ConvertError(format!("像素缓冲分配失败: {}", e)))?;
        for y in 0..layout.height as usize {
            let offset = y * src_stride;
            dst.extend_from_slice(&src[offset..offset + row_size]);
        }
        Ok(layout)
    }
}

/// swresample 重采样：解码格式 -> 交错 S16
pub struct SwrResampler {
    resampler: software::resampling::Context,
    format: PcmFormat,
}

// SwrContext 只在播放线程中使用
unsafe impl Send for SwrResampler {}

impl SwrResampler {
    pub fn new(decoder: &codec::decoder::Audio, format: PcmFormat) -> Result<Self> {
        let source_layout = if decoder.channel_layout().is_empty() {
            util::channel_layout::ChannelLayout::default(decoder.channels() as i32)
        } else {
            decoder.channel_layout()
        };
        let target_layout = util::channel_layout::ChannelLayout::default(format.channels as i32);

        info!(
            "🔧 初始化音频重采样器: {}Hz/{}ch {:?} → {}Hz/{}ch S16",
            decoder.rate(),
            decoder.channels(),
            decoder.format(),
            format.sample_rate,
            format.channels
        );

        let resampler = software::resampling::Context::get(
            decoder.format(),
            source_layout,
            decoder.rate(),
            util::format::Sample::I16(util::format::sample::Type::Packed),
            target_layout,
            format.sample_rate,
        )
        .map_err(|e| PlayerError::ResampleError(format!("重采样器创建失败: {}", e)))?;

        Ok(Self { resampler, format })
    }
}

impl AudioResampler<util::frame::Audio> for SwrResampler {
    fn output_format(&self) -> PcmFormat {
        self.format
    }

    fn estimate_output_samples(&self, frame: &util::frame::Audio) -> usize {
        let in_rate = frame.rate().max(1) as i64;
        let delay = self.resampler.delay().map(|d| d.input).unwrap_or(0).max(0);
        let total = (delay + frame.samples() as i64) * self.format.sample_rate as i64;
        // 向上取整
        ((total + in_rate - 1) / in_rate) as usize
    }

    fn resample(&mut self, frame: &util::frame::Audio, dst: &mut [u8]) -> Result<usize> {
        let mut resampled = util::frame::Audio::empty();
        self.resampler
            .run(frame, &mut resampled)
            .map_err(|e| PlayerError::ResampleError(e.to_string()))?;

        let bytes_per_frame = self.format.bytes_per_frame();
        let samples = resampled.samples().min(dst.len() / bytes_per_frame);
        let bytes = samples * bytes_per_frame;
        let src = resampled.data(0);
        if src.len() < bytes {
            return Err(PlayerError::ResampleError("重采样输出小于预期".to_string()));
        }
        dst[..bytes].copy_from_slice(&src[..bytes]);
        Ok(samples)
    }
}
