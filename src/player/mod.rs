// 播放器核心模块

pub mod media_source;   // 解封装/解码/转换/输出协作者接口
pub mod frame_ring;
pub mod audio_sink;
pub mod playback_thread;
pub mod render;
pub mod manager;
pub mod image;          // 静态图片头信息与首帧解码
pub mod synthetic;      // 合成测试后端（无系统依赖）

#[cfg(feature = "ffmpeg")]
pub mod demuxer;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_backend;
#[cfg(feature = "cpal-output")]
pub mod audio_output;

pub use media_source::{
    AudioFrameMeta, AudioResampler, DeviceWrite, MediaBackend, MediaSource, OpenedMedia, PcmDevice,
    PixelConverter, Received, VideoFrameMeta,
};
pub use frame_ring::FrameRing;
pub use audio_sink::{apply_volume, AudioSink};
pub use playback_thread::{PlaybackControl, PlaybackShared, PlaybackThread, ProducerParts, ThreadTiming};
pub use render::{DisplaySurface, RenderConsumer, TickOutcome};
pub use manager::PlaybackManager;
pub use image::{decode_first_frame, image_header, ImageHeader};
pub use synthetic::{SyntheticBackend, SyntheticSpec};

#[cfg(feature = "ffmpeg")]
pub use ffmpeg_backend::FfmpegBackend;
#[cfg(feature = "cpal-output")]
pub use audio_output::CpalPcmDevice;
