use crate::core::{PlayerError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct RingSlots<T> {
    slots: Vec<Option<T>>,
    write_idx: usize,
    read_idx: usize,
    count: usize,
    initialized: bool,
}

impl<T> RingSlots<T> {
    fn take_oldest(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let frame = self.slots[self.read_idx].take();
        self.read_idx = (self.read_idx + 1) % self.slots.len();
        self.count -= 1;
        frame
    }

    fn drain(&mut self) -> usize {
        let mut released = 0;
        while self.take_oldest().is_some() {
            released += 1;
        }
        self.write_idx = 0;
        self.read_idx = 0;
        released
    }
}

/// 视频帧环形缓冲区 - 单生产者 / 单消费者
///
/// - 满时丢弃最旧的帧，生产者永不阻塞，容量永不增长
/// - 入队时克隆帧，生产者可继续复用自己的帧
/// - `pop()` 不阻塞；需要等待的消费者使用 `pop_timeout()`
pub struct FrameRing<T> {
    inner: Mutex<RingSlots<T>>,
    not_empty: Condvar,
    capacity: usize,
    evicted: AtomicU64,
}

impl<T: Clone> FrameRing<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PlayerError::ConfigError("环形缓冲区容量必须大于 0".to_string()));
        }
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|e| PlayerError::ConfigError(format!("环形缓冲区分配失败: {}", e)))?;
        slots.resize_with(capacity, || None);

        Ok(Self {
            inner: Mutex::new(RingSlots {
                slots,
                write_idx: 0,
                read_idx: 0,
                count: 0,
                initialized: true,
            }),
            not_empty: Condvar::new(),
            capacity,
            evicted: AtomicU64::new(0),
        })
    }

    /// 入队一帧的克隆；缓冲区满时淘汰并返回最旧的帧
    pub fn push(&self, frame: &T) -> Result<Option<T>> {
        let frame = frame.clone();
        let mut ring = self.inner.lock();
        if !ring.initialized {
            return Err(PlayerError::BufferClosed);
        }

        let evicted = if ring.count == self.capacity {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            ring.take_oldest()
        } else {
            None
        };

        let write_idx = ring.write_idx;
        ring.slots[write_idx] = Some(frame);
        ring.write_idx = (write_idx + 1) % self.capacity;
        ring.count += 1;

        self.not_empty.notify_one();
        Ok(evicted)
    }

    /// 取出最旧的一帧，缓冲区为空时立即返回 `None`
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().take_oldest()
    }

    /// 阻塞等待最多 `timeout`，期间有帧入队则立即返回
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.inner.lock();
        while ring.count == 0 && ring.initialized {
            if self.not_empty.wait_until(&mut ring, deadline).timed_out() {
                break;
            }
        }
        ring.take_oldest()
    }

    /// 释放所有排队的帧，缓冲区保持可用
    pub fn clear(&self) -> usize {
        self.inner.lock().drain()
    }

    /// 释放所有排队的帧并关闭缓冲区，之后的 push 返回 `BufferClosed`
    pub fn destroy(&self) -> usize {
        let mut ring = self.inner.lock();
        let released = ring.drain();
        ring.initialized = false;
        self.not_empty.notify_all();
        released
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        !self.inner.lock().initialized
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 因溢出被淘汰的帧总数
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_overflow_evicts_oldest() {
        let ring = FrameRing::new(5).unwrap();
        let mut evicted = Vec::new();
        for tag in 1..=6u32 {
            if let Some(old) = ring.push(&tag).unwrap() {
                evicted.push(old);
            }
        }
        assert_eq!(evicted, vec![1]);
        assert_eq!(ring.evicted_count(), 1);
        assert_eq!(ring.len(), 5);

        let remaining: Vec<u32> = std::iter::from_fn(|| ring.pop()).collect();
        assert_eq!(remaining, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let ring = FrameRing::new(3).unwrap();
        for tag in 0..50u32 {
            ring.push(&tag).unwrap();
            assert!(ring.len() <= 3);
        }
        assert_eq!(ring.evicted_count(), 47);
        assert_eq!(ring.pop(), Some(47));
    }

    #[test]
    fn test_fifo_order_with_interleaved_pops() {
        let ring = FrameRing::new(4).unwrap();
        let mut popped = Vec::new();
        for tag in 0..100u32 {
            ring.push(&tag).unwrap();
            if tag % 2 == 1 {
                popped.extend(ring.pop());
                popped.extend(ring.pop());
            }
        }
        popped.extend(std::iter::from_fn(|| ring.pop()));
        assert_eq!(ring.evicted_count(), 0);
        assert_eq!(popped, (0..100).collect::<Vec<u32>>());
    }

    #[test]
    fn test_pop_empty_is_idempotent() {
        let ring: FrameRing<u32> = FrameRing::new(2).unwrap();
        for _ in 0..10 {
            assert_eq!(ring.pop(), None);
        }
        assert_eq!(ring.len(), 0);
        ring.push(&7).unwrap();
        assert_eq!(ring.pop(), Some(7));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_destroy_releases_queued_frames() {
        let frame = Arc::new(42u32);
        let ring = FrameRing::new(5).unwrap();
        for _ in 0..3 {
            ring.push(&frame).unwrap();
        }
        assert_eq!(Arc::strong_count(&frame), 4);

        assert_eq!(ring.destroy(), 3);
        assert_eq!(Arc::strong_count(&frame), 1);
        assert!(ring.is_closed());
        assert!(matches!(ring.push(&frame), Err(PlayerError::BufferClosed)));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_clear_keeps_ring_usable() {
        let ring = FrameRing::new(2).unwrap();
        ring.push(&1u32).unwrap();
        ring.push(&2u32).unwrap();
        assert_eq!(ring.clear(), 2);
        assert!(!ring.is_closed());
        ring.push(&3u32).unwrap();
        assert_eq!(ring.pop(), Some(3));
    }

    #[test]
    fn test_pop_timeout_wakes_on_push() {
        let ring = Arc::new(FrameRing::new(2).unwrap());
        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                ring.push(&9u32).unwrap();
            })
        };
        assert_eq!(ring.pop_timeout(Duration::from_secs(5)), Some(9));
        producer.join().unwrap();

        assert_eq!(ring.pop_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(FrameRing::<u32>::new(0).is_err());
    }
}
