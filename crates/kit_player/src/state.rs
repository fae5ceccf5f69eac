//! 播放状态快照与事件

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{LogLevel, Playlist, PlaylistMode};

/// 音频参数
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioParams {
    pub format: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<String>,
    pub channel_count: Option<u32>,
    pub hr_channels: Option<String>,
}

/// 视频参数
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoParams {
    pub pixelformat: Option<String>,
    pub hw_pixelformat: Option<String>,
    pub w: Option<u32>,
    pub h: Option<u32>,
    pub dw: Option<u32>,
    pub dh: Option<u32>,
    pub aspect: Option<f64>,
    pub par: Option<f64>,
    pub colormatrix: Option<String>,
    pub colorlevels: Option<String>,
    pub primaries: Option<String>,
    pub gamma: Option<String>,
    pub sig_peak: Option<f64>,
    pub light: Option<String>,
    pub chroma_location: Option<String>,
    pub rotate: Option<i32>,
    pub stereo_in: Option<String>,
}

/// 音频输出设备
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub name: String,
    pub description: String,
}

impl AudioDevice {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// 由引擎自动选择的设备
    pub fn auto() -> Self {
        Self::new("auto", "")
    }
}

impl Default for AudioDevice {
    fn default() -> Self {
        Self::auto()
    }
}

/// 轨道信息，`id` 为 `"auto"`、`"no"` 或引擎分配的编号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub title: Option<String>,
    pub language: Option<String>,
}

impl TrackInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            language: None,
        }
    }

    pub fn auto() -> Self {
        Self::new("auto")
    }

    pub fn no() -> Self {
        Self::new("no")
    }
}

impl Default for TrackInfo {
    fn default() -> Self {
        Self::auto()
    }
}

/// 当前选中的轨道
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Track {
    pub video: TrackInfo,
    pub audio: TrackInfo,
    pub subtitle: TrackInfo,
}

/// 可选轨道列表，每类都以 `auto` 与 `no` 开头
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracks {
    pub video: Vec<TrackInfo>,
    pub audio: Vec<TrackInfo>,
    pub subtitle: Vec<TrackInfo>,
}

impl Default for Tracks {
    fn default() -> Self {
        let base = vec![TrackInfo::auto(), TrackInfo::no()];
        Self {
            video: base.clone(),
            audio: base.clone(),
            subtitle: base,
        }
    }
}

/// 引擎日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerLog {
    pub prefix: String,
    pub level: LogLevel,
    pub text: String,
}

/// 播放状态快照
///
/// 由状态存储独占，每次更新整体替换。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub playlist: Playlist,
    pub playing: bool,
    pub completed: bool,
    #[serde(with = "millis")]
    pub position: Duration,
    #[serde(with = "millis")]
    pub duration: Duration,
    #[serde(with = "millis")]
    pub buffer: Duration,
    pub volume: f64,
    pub rate: f64,
    pub pitch: f64,
    pub buffering: bool,
    pub buffering_percentage: f64,
    pub playlist_mode: PlaylistMode,
    pub shuffle: bool,
    pub audio_params: AudioParams,
    pub video_params: VideoParams,
    pub audio_bitrate: Option<f64>,
    pub audio_device: AudioDevice,
    pub audio_devices: Vec<AudioDevice>,
    pub track: Track,
    pub tracks: Tracks,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub subtitle: [String; 2],
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            playlist: Playlist::default(),
            playing: false,
            completed: false,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            buffer: Duration::ZERO,
            volume: 100.0,
            rate: 1.0,
            pitch: 1.0,
            buffering: false,
            buffering_percentage: 0.0,
            playlist_mode: PlaylistMode::default(),
            shuffle: false,
            audio_params: AudioParams::default(),
            video_params: VideoParams::default(),
            audio_bitrate: None,
            audio_device: AudioDevice::auto(),
            audio_devices: vec![AudioDevice::auto()],
            track: Track::default(),
            tracks: Tracks::default(),
            width: None,
            height: None,
            subtitle: Default::default(),
        }
    }
}

/// 播放器事件
///
/// 既是写入状态存储的补丁，也是发给订阅者的值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PlayerEvent {
    Playlist(Playlist),
    Playing(bool),
    Completed(bool),
    Position(#[serde(with = "millis")] Duration),
    Duration(#[serde(with = "millis")] Duration),
    Buffer(#[serde(with = "millis")] Duration),
    Volume(f64),
    Rate(f64),
    Pitch(f64),
    Buffering(bool),
    BufferingPercentage(f64),
    PlaylistMode(PlaylistMode),
    Shuffle(bool),
    AudioParams(AudioParams),
    VideoParams(VideoParams),
    AudioBitrate(Option<f64>),
    AudioDevice(AudioDevice),
    AudioDevices(Vec<AudioDevice>),
    Track(Track),
    Tracks(Tracks),
    Width(Option<u32>),
    Height(Option<u32>),
    Subtitle([String; 2]),
    Log(PlayerLog),
    Error(String),
}

impl PlayerEvent {
    /// 是否对应快照中的字段
    pub fn is_state(&self) -> bool {
        !matches!(self, PlayerEvent::Log(_) | PlayerEvent::Error(_))
    }
}

fn replace<T: PartialEq + Clone>(slot: &mut T, value: &T) -> bool {
    if slot == value {
        false
    } else {
        *slot = value.clone();
        true
    }
}

impl PlayerState {
    /// 把事件写入快照，值有变化时返回 true
    ///
    /// 日志与错误不属于快照，总是返回 true。
    pub fn apply(&mut self, event: &PlayerEvent) -> bool {
        match event {
            PlayerEvent::Playlist(v) => replace(&mut self.playlist, v),
            PlayerEvent::Playing(v) => replace(&mut self.playing, v),
            PlayerEvent::Completed(v) => replace(&mut self.completed, v),
            PlayerEvent::Position(v) => replace(&mut self.position, v),
            PlayerEvent::Duration(v) => replace(&mut self.duration, v),
            PlayerEvent::Buffer(v) => replace(&mut self.buffer, v),
            PlayerEvent::Volume(v) => replace(&mut self.volume, v),
            PlayerEvent::Rate(v) => replace(&mut self.rate, v),
            PlayerEvent::Pitch(v) => replace(&mut self.pitch, v),
            PlayerEvent::Buffering(v) => replace(&mut self.buffering, v),
            PlayerEvent::BufferingPercentage(v) => replace(&mut self.buffering_percentage, v),
            PlayerEvent::PlaylistMode(v) => replace(&mut self.playlist_mode, v),
            PlayerEvent::Shuffle(v) => replace(&mut self.shuffle, v),
            PlayerEvent::AudioParams(v) => replace(&mut self.audio_params, v),
            PlayerEvent::VideoParams(v) => replace(&mut self.video_params, v),
            PlayerEvent::AudioBitrate(v) => replace(&mut self.audio_bitrate, v),
            PlayerEvent::AudioDevice(v) => replace(&mut self.audio_device, v),
            PlayerEvent::AudioDevices(v) => replace(&mut self.audio_devices, v),
            PlayerEvent::Track(v) => replace(&mut self.track, v),
            PlayerEvent::Tracks(v) => replace(&mut self.tracks, v),
            PlayerEvent::Width(v) => replace(&mut self.width, v),
            PlayerEvent::Height(v) => replace(&mut self.height, v),
            PlayerEvent::Subtitle(v) => replace(&mut self.subtitle, v),
            PlayerEvent::Log(_) | PlayerEvent::Error(_) => true,
        }
    }
}

/// Duration 以毫秒整数序列化
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
