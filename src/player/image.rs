use crate::core::{
    presentation_time_ms, DisplayFormat, PlayerConfig, PlayerError, Result, StreamKind, TimeBase, VideoFrame,
};
use crate::player::media_source::{MediaBackend, MediaSource, PixelConverter, Received, VideoFrameMeta};
use log::{debug, info, warn};
use std::sync::Arc;

/// 连续读包失败超过该次数即放弃
const MAX_READ_ERRORS: u32 = 3;

/// 静态图片头信息：尺寸与解码后输出的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    /// 源带透明通道时为带 alpha 的格式，否则为显示端原生格式
    pub format: DisplayFormat,
}

impl ImageHeader {
    pub fn has_alpha(&self) -> bool {
        self.format.has_alpha()
    }
}

/// 读取图片（或视频首帧）的头信息，不解码像素
pub fn image_header<B: MediaBackend>(backend: &mut B, path: &str, config: &PlayerConfig) -> Result<ImageHeader> {
    let (source, converter) = backend.open_video(path, config)?;
    let info = source.info();
    let header = ImageHeader {
        width: info.width,
        height: info.height,
        format: converter.output_format(),
    };
    debug!("🖼 图片头: {}x{} {:?}（alpha: {}）", header.width, header.height, header.format, header.has_alpha());
    Ok(header)
}

/// 解码第一帧有效画面并转换为显示格式
pub fn decode_first_frame<B: MediaBackend>(backend: &mut B, path: &str, config: &PlayerConfig) -> Result<VideoFrame> {
    let (mut source, mut converter) = backend.open_video(path, config)?;
    let time_base = source.info().video_time_base;
    let mut pixels = Vec::new();
    let mut read_errors = 0;

    loop {
        match source.read_packet() {
            Ok(Some((StreamKind::Video, packet))) => {
                read_errors = 0;
                if let Err(e) = source.submit_packet(StreamKind::Video, &packet) {
                    warn!("⚠️  图片数据包解码失败（已跳过）: {}", e);
                    continue;
                }
            }
            Ok(Some(_)) => continue,
            Ok(None) => {
                source.drain_video()?;
                return match first_valid_frame(&mut source)? {
                    Some(frame) => to_video_frame(&frame, time_base, &mut converter, &mut pixels),
                    None => Err(PlayerError::DecodeError(format!("{} 中没有可解码的画面", path))),
                };
            }
            Err(e) => {
                read_errors += 1;
                if read_errors > MAX_READ_ERRORS {
                    return Err(e);
                }
                warn!("⚠️  读取图片数据失败（第 {} 次）: {}", read_errors, e);
                continue;
            }
        }

        if let Some(frame) = first_valid_frame(&mut source)? {
            return to_video_frame(&frame, time_base, &mut converter, &mut pixels);
        }
    }
}

fn first_valid_frame<S: MediaSource>(source: &mut S) -> Result<Option<S::VideoFrame>> {
    loop {
        match source.receive_video_frame()? {
            Received::Frame(frame) if frame.geometry().is_valid() => return Ok(Some(frame)),
            Received::Frame(frame) => debug!("🖼 跳过无效帧: {}", frame.geometry()),
            Received::Again | Received::EndOfStream => return Ok(None),
        }
    }
}

fn to_video_frame<V, C>(frame: &V, time_base: TimeBase, converter: &mut C, pixels: &mut Vec<u8>) -> Result<VideoFrame>
where
    V: VideoFrameMeta,
    C: PixelConverter<V>,
{
    let layout = converter.convert(frame, pixels)?;
    let data = pixels
        .get(..layout.data_size())
        .ok_or_else(|| PlayerError::ConvertError(format!("像素数据不足 {} 字节", layout.data_size())))?;
    info!("🖼 解码完成: {}x{} {:?}", layout.width, layout.height, layout.format);
    Ok(VideoFrame {
        pts: presentation_time_ms(time_base, frame.pts()),
        layout,
        data: Arc::from(data),
    })
}
