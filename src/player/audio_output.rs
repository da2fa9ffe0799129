use crate::core::{PcmFormat, PlayerError, Result};
use crate::player::media_source::{DeviceWrite, PcmDevice};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use crossbeam_channel::{bounded, Sender};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

/// 进程内只探测一次的默认输出设备名
static DEFAULT_DEVICE: OnceLock<Option<String>> = OnceLock::new();

fn default_device_name() -> Option<&'static str> {
    DEFAULT_DEVICE
        .get_or_init(|| {
            let host = cpal::default_host();
            match host.default_output_device() {
                Some(device) => {
                    let name = device.name().unwrap_or_default();
                    info!("🔊 音频主机: {:?}，默认输出设备: {}", host.id(), name);
                    Some(name)
                }
                None => {
                    warn!("⚠️  无法找到音频输出设备");
                    None
                }
            }
        })
        .as_deref()
}

/// 检查配置是否兼容
fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
    let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
        && config.sample_rate.0 <= supported.max_sample_rate().0;
    rate_in_range && config.channels == supported.channels()
}

/// cpal 回调与写入端共享的状态
struct SharedQueue {
    samples: ArrayQueue<i16>,
    /// 回调在开始播放后取不到数据
    underrun: AtomicBool,
    started: AtomicBool,
}

/// cpal 输出设备
///
/// cpal::Stream 不是 Send，流由专门的保持线程创建并持有；
/// 写入端只通过无锁采样队列与回调交互。
pub struct CpalPcmDevice {
    shared: Arc<SharedQueue>,
    format: PcmFormat,
    nonblocking: bool,
    // drop 时关闭通道，保持线程随之释放流
    _keeper: Sender<()>,
}

impl CpalPcmDevice {
    /// 打开默认输出设备，格式固定为交错 S16
    pub fn open(format: PcmFormat) -> Result<Self> {
        if default_device_name().is_none() {
            return Err(PlayerError::AudioError("无法找到音频输出设备".to_string()));
        }
        info!("初始化音频输出: {} Hz, {} 声道", format.sample_rate, format.channels);

        // 约 0.5 秒的缓冲
        let capacity = (format.sample_rate as usize * format.channels as usize / 2).max(1024);
        let shared = Arc::new(SharedQueue {
            samples: ArrayQueue::new(capacity),
            underrun: AtomicBool::new(false),
            started: AtomicBool::new(false),
        });

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let callback_shared = shared.clone();

        thread::Builder::new()
            .name("myy-audio-out".to_string())
            .spawn(move || {
                let stream = match build_stream(format, callback_shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // 阻塞直到设备被 drop
                let _ = stop_rx.recv();
                drop(stream);
                info!("音频输出已停止");
            })
            .map_err(|e| PlayerError::ThreadError(e.to_string()))?;

        ready_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| PlayerError::AudioError("音频输出初始化超时".to_string()))??;

        Ok(Self {
            shared,
            format,
            nonblocking: false,
            _keeper: stop_tx,
        })
    }
}

fn build_stream(format: PcmFormat, shared: Arc<SharedQueue>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;
    debug!("使用音频设备: {}", device.name().unwrap_or_default());

    let config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let supported = device
        .supported_output_configs()
        .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
        .any(|range| is_config_compatible(&config, &range));
    if !supported {
        return Err(PlayerError::AudioError(format!(
            "音频设备不支持 {} Hz, {} 声道",
            format.sample_rate, format.channels
        )));
    }

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    match shared.samples.pop() {
                        Some(value) => {
                            shared.started.store(true, Ordering::Relaxed);
                            *sample = value as f32 / 32768.0;
                        }
                        None => {
                            if shared.started.load(Ordering::Relaxed) {
                                shared.underrun.store(true, Ordering::Release);
                            }
                            *sample = 0.0;
                        }
                    }
                }
            },
            move |err| {
                error!("音频流错误: {}", err);
            },
            None,
        )
        .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

    stream
        .play()
        .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;
    info!("音频输出已启动");
    Ok(stream)
}

impl PcmDevice for CpalPcmDevice {
    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        self.nonblocking = nonblocking;
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> Result<DeviceWrite> {
        if self.shared.underrun.load(Ordering::Acquire) {
            return Ok(DeviceWrite::Underrun);
        }

        let mut written = 0;
        let backoff = Backoff::new();
        for chunk in pcm.chunks_exact(2) {
            let mut sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            loop {
                match self.shared.samples.push(sample) {
                    Ok(()) => break,
                    Err(rejected) if !self.nonblocking => {
                        sample = rejected;
                        // 阻塞模式：等待回调放出空间
                        if backoff.is_completed() {
                            thread::sleep(Duration::from_millis(1));
                        } else {
                            backoff.snooze();
                        }
                    }
                    Err(_) => {
                        return Ok(if written == 0 {
                            DeviceWrite::WouldBlock
                        } else {
                            DeviceWrite::Written(written)
                        });
                    }
                }
            }
            backoff.reset();
            written += 2;
        }
        Ok(DeviceWrite::Written(written))
    }

    fn prepare(&mut self) -> Result<()> {
        self.shared.started.store(false, Ordering::Relaxed);
        self.shared.underrun.store(false, Ordering::Release);
        Ok(())
    }

    fn format(&self) -> PcmFormat {
        self.format
    }
}
