use crate::core::{PcmFormat, PlayerError, Result};
use crate::player::media_source::{DeviceWrite, PcmDevice};
use crossbeam::utils::Backoff;
use log::{debug, error, warn};

/// 单次写入内允许的连续欠载恢复次数，超过视为设备不可恢复
const MAX_UNDERRUN_RECOVERIES: u32 = 8;

/// 音频输出写入器 - 把重采样后的 PCM 交给设备
///
/// 先尝试一次非阻塞写（设备有空间时不阻塞播放线程），
/// 写不完再切到阻塞模式写剩余部分；欠载时重新 prepare 设备后继续。
pub struct AudioSink<D> {
    device: Option<D>,
    underruns: u64,
    bytes_written: u64,
}

impl<D: PcmDevice> AudioSink<D> {
    pub fn new(device: Option<D>) -> Self {
        Self {
            device,
            underruns: 0,
            bytes_written: 0,
        }
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn format(&self) -> Option<PcmFormat> {
        self.device.as_ref().map(|d| d.format())
    }

    /// 写入全部 PCM 字节，直到设备全部接收
    pub fn write(&mut self, pcm: &[u8]) -> Result<()> {
        let device = self.device.as_mut().ok_or(PlayerError::AudioDeviceMissing)?;
        if pcm.is_empty() {
            return Ok(());
        }

        device.set_nonblocking(true)?;
        let mut blocking = false;
        let mut offset = 0;
        let mut recoveries = 0;
        let backoff = Backoff::new();

        while offset < pcm.len() {
            let outcome = device.write(&pcm[offset..]).map_err(|e| {
                error!("❌ 音频设备写入失败: {}", e);
                e
            })?;

            match outcome {
                DeviceWrite::Written(n) if n > 0 => {
                    offset += n.min(pcm.len() - offset);
                    backoff.reset();
                    if offset < pcm.len() && !blocking {
                        debug!("🔊 部分写入 {}/{} 字节，切换到阻塞模式", offset, pcm.len());
                        device.set_nonblocking(false)?;
                        blocking = true;
                    }
                }
                DeviceWrite::Written(_) | DeviceWrite::WouldBlock => {
                    if !blocking {
                        device.set_nonblocking(false)?;
                        blocking = true;
                    }
                    backoff.snooze();
                }
                DeviceWrite::Underrun => {
                    recoveries += 1;
                    self.underruns += 1;
                    if recoveries > MAX_UNDERRUN_RECOVERIES {
                        error!("❌ 音频设备连续欠载 {} 次，放弃本次写入", recoveries - 1);
                        return Err(PlayerError::AudioError("设备欠载无法恢复".to_string()));
                    }
                    warn!("⚠️  音频欠载，重新准备设备（第 {} 次）", recoveries);
                    device.prepare()?;
                }
            }
        }

        self.bytes_written += pcm.len() as u64;
        Ok(())
    }

    pub fn underrun_count(&self) -> u64 {
        self.underruns
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// 按音量 (0 - 100) 缩放交错 S16LE 采样
pub fn apply_volume(pcm: &mut [u8], volume: u8) {
    let volume = volume.min(100) as i32;
    if volume == 100 {
        return;
    }
    for sample in pcm.chunks_exact_mut(2) {
        let value = i16::from_le_bytes([sample[0], sample[1]]) as i32;
        let scaled = (value * volume / 100) as i16;
        sample.copy_from_slice(&scaled.to_le_bytes());
    }
}
