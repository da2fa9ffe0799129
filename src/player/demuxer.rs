use crate::core::{FrameGeometry, MediaInfo, PlayerError, Result, StreamKind, TimeBase};
use crate::player::media_source::{AudioFrameMeta, MediaSource, Received, VideoFrameMeta};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, util};
use log::{debug, info, warn};
use std::sync::Once;

/// EAGAIN（解码器需要更多输入）
const EAGAIN: i32 = 11;

static FFMPEG_INIT: Once = Once::new();

/// FFmpeg 全局初始化，整个进程只做一次
pub fn init_ffmpeg() {
    FFMPEG_INIT.call_once(|| match ffmpeg::init() {
        Ok(()) => info!("✅ FFmpeg 初始化完成"),
        Err(e) => warn!("⚠️  FFmpeg 初始化失败: {}", e),
    });
}

fn to_time_base(rational: ffmpeg::Rational) -> TimeBase {
    TimeBase::new(rational.numerator(), rational.denominator())
}

/// FFmpeg 解封装 + 软件解码
pub struct FfmpegSource {
    input_ctx: format::context::Input,
    video_stream_index: usize,
    audio_stream_index: Option<usize>,
    video_decoder: codec::decoder::Video,
    audio_decoder: Option<codec::decoder::Audio>,
    media_info: MediaInfo,
    source_path: String,
}

// 解封装/解码上下文只在持有它的单个线程中使用（打开线程交给播放线程后不再访问）
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    /// 打开媒体文件
    ///
    /// 没有视频流时返回 `NoVideoStream`；音频解码器创建失败只禁用音频。
    pub fn open(path: &str) -> Result<Self> {
        init_ffmpeg();
        info!("正在打开文件: {}", path);

        let input_ctx = format::input(&path)
            .map_err(|e| PlayerError::OpenError(format!("无法打开文件: {}", e)))?;

        let video_stream = input_ctx
            .streams()
            .best(media::Type::Video)
            .ok_or(PlayerError::NoVideoStream)?;
        let video_stream_index = video_stream.index();

        let video_codec_name = video_stream.parameters().id().name().to_string();
        let video_decoder = codec::context::Context::from_parameters(video_stream.parameters())?
            .decoder()
            .video()?;

        let rate = video_stream.avg_frame_rate();
        let avg_frame_rate = (rate.numerator() > 0 && rate.denominator() > 0).then(|| to_time_base(rate));
        let fps = avg_frame_rate
            .map(|r| r.num as f64 / r.den as f64)
            .unwrap_or(0.0);

        let mut media_info = MediaInfo {
            duration: input_ctx.duration().max(0) / 1000, // 微秒转毫秒
            width: video_decoder.width(),
            height: video_decoder.height(),
            fps,
            avg_frame_rate,
            frame_count: video_stream.frames(),
            video_time_base: to_time_base(video_stream.time_base()),
            video_codec: video_codec_name,
            audio_codec: "none".to_string(),
            ..MediaInfo::default()
        };

        let mut audio_stream_index = None;
        let mut audio_decoder = None;
        if let Some(audio_stream) = input_ctx.streams().best(media::Type::Audio) {
            let codec_name = audio_stream.parameters().id().name().to_string();
            let opened = codec::context::Context::from_parameters(audio_stream.parameters())
                .and_then(|ctx| ctx.decoder().audio());
            match opened {
                Ok(decoder) => {
                    media_info.audio_time_base = Some(to_time_base(audio_stream.time_base()));
                    media_info.audio_codec = codec_name;
                    media_info.sample_rate = decoder.rate();
                    media_info.channels = decoder.channels();
                    audio_stream_index = Some(audio_stream.index());
                    audio_decoder = Some(decoder);
                }
                Err(e) => warn!("⚠️  音频解码器创建失败，禁用音频: {}", e),
            }
        }

        debug!("视频流索引: {}", video_stream_index);
        debug!("音频流索引: {:?}", audio_stream_index);
        info!("媒体信息: {:?}", media_info);

        Ok(Self {
            input_ctx,
            video_stream_index,
            audio_stream_index,
            video_decoder,
            audio_decoder,
            media_info,
            source_path: path.to_string(),
        })
    }

    pub fn video_decoder(&self) -> &codec::decoder::Video {
        &self.video_decoder
    }

    pub fn audio_decoder(&self) -> Option<&codec::decoder::Audio> {
        self.audio_decoder.as_ref()
    }
}

fn receive<F>(result: std::result::Result<(), ffmpeg::Error>, frame: F) -> Result<Received<F>> {
    match result {
        Ok(()) => Ok(Received::Frame(frame)),
        Err(ffmpeg::Error::Other { errno: EAGAIN }) => Ok(Received::Again),
        Err(ffmpeg::Error::Eof) => Ok(Received::EndOfStream),
        Err(e) => Err(e.into()),
    }
}

impl VideoFrameMeta for util::frame::Video {
    fn pts(&self) -> Option<i64> {
        self.timestamp()
    }

    fn geometry(&self) -> FrameGeometry {
        let format = match self.format() {
            util::format::Pixel::None => None,
            pixel => Some(ffmpeg::ffi::AVPixelFormat::from(pixel) as i32),
        };
        FrameGeometry {
            width: self.width(),
            height: self.height(),
            format,
        }
    }
}

impl AudioFrameMeta for util::frame::Audio {
    fn pts(&self) -> Option<i64> {
        self.timestamp()
    }

    fn sample_count(&self) -> usize {
        self.samples()
    }

    fn sample_rate(&self) -> u32 {
        self.rate()
    }
}

impl MediaSource for FfmpegSource {
    type Packet = ffmpeg::Packet;
    type VideoFrame = util::frame::Video;
    type AudioFrame = util::frame::Audio;

    fn info(&self) -> &MediaInfo {
        &self.media_info
    }

    fn read_packet(&mut self) -> Result<Option<(StreamKind, ffmpeg::Packet)>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => {
                let index = packet.stream();
                let kind = if index == self.video_stream_index {
                    StreamKind::Video
                } else if Some(index) == self.audio_stream_index {
                    StreamKind::Audio
                } else {
                    StreamKind::Other
                };
                Ok(Some((kind, packet)))
            }
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn submit_packet(&mut self, kind: StreamKind, packet: &ffmpeg::Packet) -> Result<()> {
        let result = match kind {
            StreamKind::Video => self.video_decoder.send_packet(packet),
            StreamKind::Audio => match self.audio_decoder.as_mut() {
                Some(decoder) => decoder.send_packet(packet),
                None => return Ok(()),
            },
            StreamKind::Other => return Ok(()),
        };
        match result {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Eof) => {
                debug!("解码器收到 EOF（send_packet），执行 flush 并忽略本次包");
                match kind {
                    StreamKind::Video => self.video_decoder.flush(),
                    _ => {
                        if let Some(decoder) = self.audio_decoder.as_mut() {
                            decoder.flush();
                        }
                    }
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn receive_video_frame(&mut self) -> Result<Received<util::frame::Video>> {
        let mut frame = util::frame::Video::empty();
        let result = self.video_decoder.receive_frame(&mut frame);
        receive(result, frame)
    }

    fn receive_audio_frame(&mut self) -> Result<Received<util::frame::Audio>> {
        let Some(decoder) = self.audio_decoder.as_mut() else {
            return Ok(Received::EndOfStream);
        };
        let mut frame = util::frame::Audio::empty();
        let result = decoder.receive_frame(&mut frame);
        receive(result, frame)
    }

    fn drain_video(&mut self) -> Result<()> {
        match self.video_decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// 向后 seek 到 0 并清空解码器
    fn rewind(&mut self) -> Result<()> {
        self.input_ctx.seek(0, ..0)?;
        self.video_decoder.flush();
        if let Some(decoder) = self.audio_decoder.as_mut() {
            decoder.flush();
        }
        Ok(())
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}
