use crate::core::{
    FrameGeometry, MediaInfo, PcmFormat, PixelLayout, PlayerConfig, PlayerError, Result, StreamKind,
    TimeBase, DisplayFormat,
};
use crate::player::media_source::{
    AudioFrameMeta, AudioResampler, DeviceWrite, MediaBackend, MediaSource, OpenedMedia, PcmDevice,
    PixelConverter, Received, VideoFrameMeta,
};
use log::info;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 合成媒体参数（无需任何系统库即可驱动完整播放流水线）
#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// 视频帧总数，`u64::MAX` 表示无限
    pub frame_count: u64,
    /// 是否带音频流（每个视频包之后跟一个等长的音频包）
    pub audio: bool,
    pub sample_rate: u32,
    pub channels: u16,
    /// 是否存在视频流
    pub video: bool,
    /// 每 n 帧插入一个尺寸为 0 的无效帧
    pub invalid_every: Option<u64>,
    /// 从第 n 帧开始改变分辨率
    pub resize_at: Option<u64>,
    /// 按帧率实时读包
    pub realtime: bool,
    /// 读取第 n 个视频包时失败一次，重试后恢复
    pub read_error_at: Option<u64>,
    /// 第 n 个视频包送入解码器时失败
    pub submit_error_at: Option<u64>,
    /// 视频带透明通道（转换器输出 BGRA8888）
    pub alpha: bool,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            width: 64,
            height: 36,
            fps: 30,
            frame_count: 90,
            audio: false,
            sample_rate: 44100,
            channels: 2,
            video: true,
            invalid_every: None,
            resize_at: None,
            realtime: false,
            read_error_at: None,
            submit_error_at: None,
            alpha: false,
        }
    }
}

impl SyntheticSpec {
    fn samples_per_frame(&self) -> usize {
        (self.sample_rate / self.fps.max(1)) as usize
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SyntheticPacket {
    Video(u64),
    Audio(u64),
}

#[derive(Debug, Clone)]
pub struct SyntheticVideoFrame {
    pub index: u64,
    pts: i64,
    geometry: FrameGeometry,
}

impl VideoFrameMeta for SyntheticVideoFrame {
    fn pts(&self) -> Option<i64> {
        Some(self.pts)
    }

    fn geometry(&self) -> FrameGeometry {
        self.geometry
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticAudioFrame {
    pts: i64,
    samples: usize,
    sample_rate: u32,
}

impl AudioFrameMeta for SyntheticAudioFrame {
    fn pts(&self) -> Option<i64> {
        Some(self.pts)
    }

    fn sample_count(&self) -> usize {
        self.samples
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// 合成媒体源：视频时间基为 1/fps，音频时间基为 1/sample_rate
pub struct SyntheticSource {
    spec: SyntheticSpec,
    info: MediaInfo,
    next_video: u64,
    audio_pending: Option<u64>,
    video_decoded: VecDeque<SyntheticVideoFrame>,
    audio_decoded: VecDeque<SyntheticAudioFrame>,
    started_at: Option<Instant>,
    read_failed: bool,
}

impl SyntheticSource {
    pub fn new(spec: SyntheticSpec) -> Self {
        let fps = spec.fps.max(1);
        let info = MediaInfo {
            duration: (spec.frame_count.saturating_mul(1000) / fps as u64).min(i64::MAX as u64) as i64,
            width: spec.width,
            height: spec.height,
            fps: fps as f64,
            avg_frame_rate: Some(TimeBase::new(fps as i32, 1)),
            frame_count: spec.frame_count.min(i64::MAX as u64) as i64,
            video_time_base: TimeBase::new(1, fps as i32),
            audio_time_base: spec.audio.then(|| TimeBase::new(1, spec.sample_rate as i32)),
            video_codec: "synthetic".to_string(),
            audio_codec: if spec.audio { "synthetic-pcm".to_string() } else { String::new() },
            sample_rate: if spec.audio { spec.sample_rate } else { 0 },
            channels: if spec.audio { spec.channels } else { 0 },
        };
        Self {
            spec,
            info,
            next_video: 0,
            audio_pending: None,
            video_decoded: VecDeque::new(),
            audio_decoded: VecDeque::new(),
            started_at: None,
            read_failed: false,
        }
    }

    fn geometry_of(&self, index: u64) -> FrameGeometry {
        if let Some(n) = self.spec.invalid_every {
            if n > 0 && (index + 1) % n == 0 {
                return FrameGeometry { width: 0, height: 0, format: None };
            }
        }
        let (width, height) = match self.spec.resize_at {
            Some(at) if index >= at => (self.spec.width * 2, self.spec.height * 2),
            _ => (self.spec.width, self.spec.height),
        };
        FrameGeometry { width, height, format: Some(0) }
    }

    fn pace(&mut self, index: u64) {
        if !self.spec.realtime {
            return;
        }
        let started = *self.started_at.get_or_insert_with(Instant::now);
        let due = started + Duration::from_millis(index * 1000 / self.spec.fps.max(1) as u64);
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
    }
}

impl MediaSource for SyntheticSource {
    type Packet = SyntheticPacket;
    type VideoFrame = SyntheticVideoFrame;
    type AudioFrame = SyntheticAudioFrame;

    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_packet(&mut self) -> Result<Option<(StreamKind, SyntheticPacket)>> {
        if let Some(index) = self.audio_pending.take() {
            return Ok(Some((StreamKind::Audio, SyntheticPacket::Audio(index))));
        }
        if self.next_video >= self.spec.frame_count {
            return Ok(None);
        }

        let index = self.next_video;
        if self.spec.read_error_at == Some(index) && !self.read_failed {
            self.read_failed = true;
            return Err(PlayerError::DecodeError(format!("第 {} 个视频包读取失败", index)));
        }
        self.next_video += 1;
        self.pace(index);
        if self.spec.audio {
            self.audio_pending = Some(index);
        }
        Ok(Some((StreamKind::Video, SyntheticPacket::Video(index))))
    }

    fn submit_packet(&mut self, kind: StreamKind, packet: &SyntheticPacket) -> Result<()> {
        match (kind, *packet) {
            (StreamKind::Video, SyntheticPacket::Video(index)) => {
                if self.spec.submit_error_at == Some(index) {
                    return Err(PlayerError::DecodeError(format!("第 {} 个视频包无法解码", index)));
                }
                let geometry = self.geometry_of(index);
                self.video_decoded.push_back(SyntheticVideoFrame {
                    index,
                    pts: index as i64,
                    geometry,
                });
                Ok(())
            }
            (StreamKind::Audio, SyntheticPacket::Audio(index)) => {
                let samples = self.spec.samples_per_frame();
                self.audio_decoded.push_back(SyntheticAudioFrame {
                    pts: index as i64 * samples as i64,
                    samples,
                    sample_rate: self.spec.sample_rate,
                });
                Ok(())
            }
            _ => Err(PlayerError::DecodeError("数据包与流类型不匹配".to_string())),
        }
    }

    fn receive_video_frame(&mut self) -> Result<Received<SyntheticVideoFrame>> {
        Ok(self.video_decoded.pop_front().map_or(Received::Again, Received::Frame))
    }

    fn receive_audio_frame(&mut self) -> Result<Received<SyntheticAudioFrame>> {
        Ok(self.audio_decoded.pop_front().map_or(Received::Again, Received::Frame))
    }

    fn rewind(&mut self) -> Result<()> {
        self.next_video = 0;
        self.audio_pending = None;
        self.video_decoded.clear();
        self.audio_decoded.clear();
        self.started_at = None;
        Ok(())
    }

    fn description(&self) -> String {
        format!(
            "Synthetic: {}x{} @ {}fps, {} 帧{}",
            self.spec.width,
            self.spec.height,
            self.spec.fps,
            self.spec.frame_count,
            if self.spec.audio { "，带音频" } else { "" }
        )
    }
}

/// 用帧序号填充像素的转换器
pub struct SyntheticConverter {
    format: DisplayFormat,
}

impl SyntheticConverter {
    pub fn new(format: DisplayFormat) -> Self {
        Self { format }
    }
}

impl Default for SyntheticConverter {
    fn default() -> Self {
        Self::new(DisplayFormat::Bgrx8888)
    }
}

impl PixelConverter<SyntheticVideoFrame> for SyntheticConverter {
    fn output_format(&self) -> DisplayFormat {
        self.format
    }

    fn convert(&mut self, frame: &SyntheticVideoFrame, dst: &mut Vec<u8>) -> Result<PixelLayout> {
        let layout = PixelLayout::packed(frame.geometry.width, frame.geometry.height, self.format);
        dst.clear();
        dst.resize(layout.data_size(), frame.index as u8);
        Ok(layout)
    }
}

/// 输出方波采样的重采样器，输出格式固定
pub struct SyntheticResampler {
    format: PcmFormat,
    phase: u64,
}

impl SyntheticResampler {
    pub fn new(format: PcmFormat) -> Self {
        Self { format, phase: 0 }
    }
}

impl Default for SyntheticResampler {
    fn default() -> Self {
        Self::new(PcmFormat::default())
    }
}

impl AudioResampler<SyntheticAudioFrame> for SyntheticResampler {
    fn output_format(&self) -> PcmFormat {
        self.format
    }

    fn estimate_output_samples(&self, frame: &SyntheticAudioFrame) -> usize {
        let in_rate = frame.sample_rate.max(1) as u64;
        (frame.samples as u64 * self.format.sample_rate as u64).div_ceil(in_rate) as usize
    }

    fn resample(&mut self, frame: &SyntheticAudioFrame, dst: &mut [u8]) -> Result<usize> {
        let bytes_per_frame = self.format.bytes_per_frame();
        let samples = self.estimate_output_samples(frame).min(dst.len() / bytes_per_frame);
        for chunk in dst[..samples * bytes_per_frame].chunks_exact_mut(PcmFormat::BYTES_PER_SAMPLE) {
            // 约 440Hz 方波
            let value: i16 = if (self.phase / 50) % 2 == 0 { 8000 } else { -8000 };
            chunk.copy_from_slice(&value.to_le_bytes());
            self.phase += 1;
        }
        Ok(samples)
    }
}

/// 丢弃所有数据的 PCM 设备，只统计写入字节数
#[derive(Debug, Clone, Default)]
pub struct NullPcmDevice {
    format: PcmFormat,
    written: Arc<AtomicU64>,
}

impl NullPcmDevice {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            written: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 与设备共享的写入计数
    pub fn written_counter(&self) -> Arc<AtomicU64> {
        self.written.clone()
    }
}

impl PcmDevice for NullPcmDevice {
    fn set_nonblocking(&mut self, _nonblocking: bool) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> Result<DeviceWrite> {
        self.written.fetch_add(pcm.len() as u64, Ordering::Relaxed);
        Ok(DeviceWrite::Written(pcm.len()))
    }

    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    fn format(&self) -> PcmFormat {
        self.format
    }
}

/// 合成后端：`open()` 忽略路径，按 `SyntheticSpec` 生成媒体
pub struct SyntheticBackend {
    spec: SyntheticSpec,
    device: NullPcmDevice,
    devices_opened: Arc<AtomicU64>,
}

impl SyntheticBackend {
    pub fn new(spec: SyntheticSpec) -> Self {
        Self {
            spec,
            device: NullPcmDevice::default(),
            devices_opened: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 所有打开的会话共享的音频写入计数
    pub fn audio_bytes_written(&self) -> Arc<AtomicU64> {
        self.device.written_counter()
    }

    /// 累计打开过的输出设备数
    pub fn devices_opened(&self) -> Arc<AtomicU64> {
        self.devices_opened.clone()
    }

    fn converter(&self, config: &PlayerConfig) -> SyntheticConverter {
        if self.spec.alpha {
            SyntheticConverter::new(DisplayFormat::Bgra8888)
        } else {
            SyntheticConverter::new(config.display_format)
        }
    }
}

impl MediaBackend for SyntheticBackend {
    type Source = SyntheticSource;
    type Converter = SyntheticConverter;
    type Resampler = SyntheticResampler;
    type Device = NullPcmDevice;

    fn open(
        &mut self,
        path: &str,
        config: &PlayerConfig,
    ) -> Result<OpenedMedia<SyntheticSource, SyntheticConverter, SyntheticResampler, NullPcmDevice>> {
        if !self.spec.video {
            return Err(PlayerError::NoVideoStream);
        }
        info!("🧪 打开合成媒体: {}", path);

        let format = config.pcm_format();
        let audio = self.spec.audio && config.audio_enabled;
        if audio {
            self.devices_opened.fetch_add(1, Ordering::Relaxed);
        }
        Ok(OpenedMedia {
            source: SyntheticSource::new(self.spec.clone()),
            converter: self.converter(config),
            resampler: self.spec.audio.then(|| SyntheticResampler::new(format)),
            device: audio.then(|| NullPcmDevice {
                format,
                written: self.device.written_counter(),
            }),
        })
    }

    fn probe(&mut self, _path: &str) -> Result<MediaInfo> {
        if !self.spec.video {
            return Err(PlayerError::NoVideoStream);
        }
        Ok(SyntheticSource::new(self.spec.clone()).info().clone())
    }

    fn open_video(&mut self, path: &str, config: &PlayerConfig) -> Result<(SyntheticSource, SyntheticConverter)> {
        if !self.spec.video {
            return Err(PlayerError::NoVideoStream);
        }
        info!("🧪 打开合成图像: {}", path);
        Ok((SyntheticSource::new(self.spec.clone()), self.converter(config)))
    }
}
