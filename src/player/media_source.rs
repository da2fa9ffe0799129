use crate::core::{
    DisplayFormat, FrameGeometry, MediaInfo, PcmFormat, PixelLayout, PlayerConfig, Result, StreamKind,
};

/// 解码器取帧结果
#[derive(Debug)]
pub enum Received<F> {
    Frame(F),
    /// 需要更多输入（EAGAIN）
    Again,
    /// 解码器已被 flush 完
    EndOfStream,
}

/// 解码后视频帧的元信息
pub trait VideoFrameMeta {
    /// 流时间基下的时间戳
    fn pts(&self) -> Option<i64>;
    fn geometry(&self) -> FrameGeometry;
}

/// 解码后音频帧的元信息
pub trait AudioFrameMeta {
    fn pts(&self) -> Option<i64>;
    fn sample_count(&self) -> usize;
    fn sample_rate(&self) -> u32;
}

/// 解封装 + 解码数据源
///
/// 不同的后端（FFmpeg、合成测试源等）实现这个接口，
/// 播放线程只通过它读包、送包、取帧。
pub trait MediaSource: Send + 'static {
    type Packet;
    type VideoFrame: VideoFrameMeta;
    type AudioFrame: AudioFrameMeta;

    fn info(&self) -> &MediaInfo;

    /// 读取下一个数据包
    ///
    /// 返回：
    /// - Ok(Some((kind, packet))): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误（可重试）
    fn read_packet(&mut self) -> Result<Option<(StreamKind, Self::Packet)>>;

    /// 把数据包送入对应流的解码器
    fn submit_packet(&mut self, kind: StreamKind, packet: &Self::Packet) -> Result<()>;

    fn receive_video_frame(&mut self) -> Result<Received<Self::VideoFrame>>;

    fn receive_audio_frame(&mut self) -> Result<Received<Self::AudioFrame>>;

    /// 输入读完后通知视频解码器排出缓存的帧
    fn drain_video(&mut self) -> Result<()> {
        Ok(())
    }

    /// 回到起点（向后 seek 到 0），并清空解码器内部缓冲
    fn rewind(&mut self) -> Result<()>;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 视频像素转换：解码格式 -> 显示原生格式
pub trait PixelConverter<V>: Send + 'static {
    /// 转换输出的像素格式
    fn output_format(&self) -> DisplayFormat;

    /// 把 `frame` 转换后写入 `dst`（按需扩容），返回像素布局
    fn convert(&mut self, frame: &V, dst: &mut Vec<u8>) -> Result<PixelLayout>;
}

/// 音频重采样：解码格式 -> 输出设备固定格式
pub trait AudioResampler<A>: Send + 'static {
    fn output_format(&self) -> PcmFormat;

    /// 估算本帧重采样后的输出采样数（含重采样器内部延迟）
    fn estimate_output_samples(&self, frame: &A) -> usize;

    /// 重采样写入 `dst`，返回实际输出的采样数（每声道）
    fn resample(&mut self, frame: &A, dst: &mut [u8]) -> Result<usize>;
}

/// PCM 设备单次写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceWrite {
    /// 设备接收了 n 字节
    Written(usize),
    /// 非阻塞模式下设备暂时没有空间
    WouldBlock,
    /// 设备缓冲已经放空，需要 `prepare()` 恢复
    Underrun,
}

/// PCM 输出设备
pub trait PcmDevice: Send + 'static {
    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()>;

    /// 写入交错的 PCM 字节（长度按帧对齐）
    fn write(&mut self, pcm: &[u8]) -> Result<DeviceWrite>;

    /// 欠载后重新准备设备
    fn prepare(&mut self) -> Result<()>;

    fn format(&self) -> PcmFormat;
}

/// 一次打开得到的全部协作者
pub struct OpenedMedia<S, C, R, D> {
    pub source: S,
    pub converter: C,
    /// 没有音频流或音频初始化失败时为 `None`
    pub resampler: Option<R>,
    pub device: Option<D>,
}

/// 媒体后端：负责打开源并构造解码、转换、重采样、输出协作者
pub trait MediaBackend: Send + 'static {
    type Source: MediaSource;
    type Converter: PixelConverter<<Self::Source as MediaSource>::VideoFrame>;
    type Resampler: AudioResampler<<Self::Source as MediaSource>::AudioFrame>;
    type Device: PcmDevice;

    /// 打开媒体源；无法打开或没有视频流时返回错误
    fn open(
        &mut self,
        path: &str,
        config: &PlayerConfig,
    ) -> Result<OpenedMedia<Self::Source, Self::Converter, Self::Resampler, Self::Device>>;

    /// 只读取媒体信息，不创建转换器和输出设备
    fn probe(&mut self, path: &str) -> Result<MediaInfo>;

    /// 只打开视频路径（静态图片解码用），不碰音频
    fn open_video(&mut self, path: &str, config: &PlayerConfig) -> Result<(Self::Source, Self::Converter)>;
}
