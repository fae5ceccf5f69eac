//! 事件流订阅

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::{
    AudioDevice, AudioParams, PlayerEvent, PlayerLog, Playlist, PlaylistMode, Track, Tracks,
    VideoParams,
};

/// 单个字段的广播点
///
/// 每个订阅者一个无界通道，关闭后所有接收端断开。
pub(crate) struct Topic<T> {
    subscribers: Mutex<Option<Vec<Sender<T>>>>,
}

impl<T: Clone> Topic<T> {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }

    fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded();
        if let Some(subscribers) = self.subscribers.lock().as_mut() {
            subscribers.push(tx);
        }
        rx
    }

    fn publish(&self, value: T) {
        if let Some(subscribers) = self.subscribers.lock().as_mut() {
            subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        }
    }

    fn close(&self) {
        self.subscribers.lock().take();
    }
}

macro_rules! player_stream {
    ($($(#[$doc:meta])* $field:ident: $ty:ty => $variant:ident,)*) => {
        /// 播放器事件流
        ///
        /// 每个方法返回一个新的订阅；播放器销毁后所有订阅结束。
        pub struct PlayerStream {
            $($field: Topic<$ty>,)*
            log: Topic<PlayerLog>,
            error: Topic<String>,
            events: Topic<PlayerEvent>,
        }

        impl PlayerStream {
            pub(crate) fn new() -> Self {
                Self {
                    $($field: Topic::new(),)*
                    log: Topic::new(),
                    error: Topic::new(),
                    events: Topic::new(),
                }
            }

            $(
                $(#[$doc])*
                pub fn $field(&self) -> Receiver<$ty> {
                    self.$field.subscribe()
                }
            )*

            /// 引擎日志
            pub fn log(&self) -> Receiver<PlayerLog> {
                self.log.subscribe()
            }

            /// 可读的错误信息
            pub fn error(&self) -> Receiver<String> {
                self.error.subscribe()
            }

            /// 所有事件，按应用顺序
            pub fn events(&self) -> Receiver<PlayerEvent> {
                self.events.subscribe()
            }

            pub(crate) fn publish(&self, event: PlayerEvent) {
                match &event {
                    $(PlayerEvent::$variant(v) => self.$field.publish(v.clone()),)*
                    PlayerEvent::Log(v) => self.log.publish(v.clone()),
                    PlayerEvent::Error(v) => self.error.publish(v.clone()),
                }
                self.events.publish(event);
            }

            pub(crate) fn close(&self) {
                $(self.$field.close();)*
                self.log.close();
                self.error.close();
                self.events.close();
            }
        }
    };
}

player_stream! {
    playlist: Playlist => Playlist,
    playing: bool => Playing,
    /// 当前曲目是否已播放到结尾
    completed: bool => Completed,
    position: Duration => Position,
    duration: Duration => Duration,
    /// 已缓冲到的位置
    buffer: Duration => Buffer,
    volume: f64 => Volume,
    rate: f64 => Rate,
    pitch: f64 => Pitch,
    buffering: bool => Buffering,
    buffering_percentage: f64 => BufferingPercentage,
    playlist_mode: PlaylistMode => PlaylistMode,
    shuffle: bool => Shuffle,
    audio_params: AudioParams => AudioParams,
    video_params: VideoParams => VideoParams,
    audio_bitrate: Option<f64> => AudioBitrate,
    audio_device: AudioDevice => AudioDevice,
    audio_devices: Vec<AudioDevice> => AudioDevices,
    track: Track => Track,
    tracks: Tracks => Tracks,
    width: Option<u32> => Width,
    height: Option<u32> => Height,
    /// 主、副字幕的当前文本
    subtitle: [String; 2] => Subtitle,
}
