//! MYY 同步播放引擎
//!
//! 播放线程解码交错的音视频包，维护音视频两个展示时钟，
//! 按音频主时钟决定丢帧/重复帧，并通过有界环形缓冲区把帧交给显示端。

pub mod core;
pub mod player;

pub use crate::core::{
    MediaInfo, PlaybackState, PlaybackStats, PlayerCommand, PlayerConfig, PlayerError, PlayerEvent,
    Result, SyncClock, VideoFrame,
};
pub use crate::player::{DisplaySurface, PlaybackManager, TickOutcome};
