//! 原生引擎适配器边界
//!
//! 播放器通过 [`NativeEngine`] 发出命令，适配器通过 [`Notifier`] 回报属性变化与事件。
//! 具体使用哪个适配器由调用方在构造 [`crate::Player`] 时注入。

use std::collections::BTreeMap;
use std::time::Duration;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::{EngineError, LogLevel, PlayerConfiguration};

/// 适配器之间共享的属性名
pub mod property {
    pub const PAUSE: &str = "pause";
    pub const TIME_POS: &str = "time-pos";
    pub const DURATION: &str = "duration";
    pub const DEMUXER_CACHE_TIME: &str = "demuxer-cache-time";
    pub const PAUSED_FOR_CACHE: &str = "paused-for-cache";
    pub const CACHE_BUFFERING_STATE: &str = "cache-buffering-state";
    pub const VOLUME: &str = "volume";
    pub const SPEED: &str = "speed";
    pub const PITCH: &str = "pitch";
    pub const AUDIO_PARAMS: &str = "audio-params";
    pub const VIDEO_PARAMS: &str = "video-params";
    pub const AUDIO_BITRATE: &str = "audio-bitrate";
    pub const AUDIO_DEVICE: &str = "audio-device";
    pub const AUDIO_DEVICE_LIST: &str = "audio-device-list";
    pub const TRACK_LIST: &str = "track-list";
    pub const VID: &str = "vid";
    pub const AID: &str = "aid";
    pub const SID: &str = "sid";
    pub const DWIDTH: &str = "dwidth";
    pub const DHEIGHT: &str = "dheight";
    pub const SUB_TEXT: &str = "sub-text";
    pub const SECONDARY_SUB_TEXT: &str = "secondary-sub-text";
    pub const PLAYLIST: &str = "playlist";
    pub const PLAYLIST_POS: &str = "playlist-pos";
    /// 由适配器合成：`none` / `single` / `loop` / `loop-playlist`
    pub const PLAYLIST_MODE: &str = "playlist-mode";
    /// 由适配器合成：是否处于随机播放
    pub const SHUFFLE: &str = "shuffle";

    /// 与时间相关的属性，同一批次内优先应用
    pub const TIMING: &[&str] = &[TIME_POS, DURATION, DEMUXER_CACHE_TIME];
}

/// 写入引擎属性的值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Flag(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl PropertyValue {
    /// 作为引擎命令参数的文本形式
    pub fn to_arg(&self) -> String {
        match self {
            PropertyValue::Flag(true) => "yes".to_string(),
            PropertyValue::Flag(false) => "no".to_string(),
            PropertyValue::Int(v) => v.to_string(),
            PropertyValue::Double(v) => v.to_string(),
            PropertyValue::String(v) => v.clone(),
        }
    }
}

/// 交给引擎的媒体
#[derive(Debug, Clone, PartialEq)]
pub struct EngineMedia {
    pub uri: String,
    pub http_headers: BTreeMap<String, String>,
}

/// 播放列表命令
#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistCommand {
    Next,
    Previous,
    Jump(usize),
    Add(EngineMedia),
    Remove(usize),
    /// 把 `from` 处的条目移动到 `to`，移动后它位于 `to`
    Move { from: usize, to: usize },
}

/// 截图格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    #[default]
    Jpeg,
    Png,
    /// 未编码的 BGRA 像素
    Raw,
}

impl ScreenshotFormat {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" | "image/jpeg" => ScreenshotFormat::Jpeg,
            "png" | "image/png" => ScreenshotFormat::Png,
            "raw" | "bgra" => ScreenshotFormat::Raw,
            _ => return None,
        })
    }
}

/// 一帧截图
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub format: ScreenshotFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// 引擎通知（适配器 -> 多路复用器）
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotification {
    PropertyChanged {
        name: String,
        value: serde_json::Value,
    },
    /// 开始加载新的播放列表条目
    StartOfFile,
    EndOfFile,
    LogMessage {
        prefix: String,
        level: LogLevel,
        text: String,
    },
    ErrorOccurred {
        code: i32,
        message: String,
    },
}

/// 适配器持有的通知发送端
///
/// 通道有界，多路复用器处理不过来时发送会阻塞适配器线程。
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<EngineNotification>,
}

impl Notifier {
    pub fn new(tx: Sender<EngineNotification>) -> Self {
        Self { tx }
    }

    /// 发送通知，接收端已关闭时返回 false
    pub fn send(&self, notification: EngineNotification) -> bool {
        self.tx.send(notification).is_ok()
    }

    pub fn property_changed(&self, name: impl Into<String>, value: serde_json::Value) -> bool {
        self.send(EngineNotification::PropertyChanged {
            name: name.into(),
            value,
        })
    }

    pub fn start_of_file(&self) -> bool {
        self.send(EngineNotification::StartOfFile)
    }

    pub fn end_of_file(&self) -> bool {
        self.send(EngineNotification::EndOfFile)
    }

    pub fn log_message(
        &self,
        prefix: impl Into<String>,
        level: LogLevel,
        text: impl Into<String>,
    ) -> bool {
        self.send(EngineNotification::LogMessage {
            prefix: prefix.into(),
            level,
            text: text.into(),
        })
    }

    pub fn error_occurred(&self, code: i32, message: impl Into<String>) -> bool {
        self.send(EngineNotification::ErrorOccurred {
            code,
            message: message.into(),
        })
    }
}

/// 原生引擎适配器
///
/// 所有方法都在播放器的命令线程上依次调用，返回即表示原生调用已完成。
pub trait NativeEngine: Send {
    /// 初始化引擎，返回标识该实例的句柄
    fn initialize(
        &mut self,
        notifier: Notifier,
        config: &PlayerConfiguration,
    ) -> Result<i64, EngineError>;

    /// 替换整个播放列表，从 `index` 开始
    fn open(&mut self, medias: &[EngineMedia], index: usize, play: bool) -> Result<(), EngineError>;

    fn play(&mut self) -> Result<(), EngineError>;

    fn pause(&mut self) -> Result<(), EngineError>;

    /// 停止播放并清空播放列表，不释放引擎
    fn stop(&mut self) -> Result<(), EngineError>;

    fn seek(&mut self, position: Duration) -> Result<(), EngineError>;

    fn playlist(&mut self, command: PlaylistCommand) -> Result<(), EngineError>;

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), EngineError>;

    /// 截取当前帧，没有可用帧时返回 `Ok(None)`
    fn screenshot(
        &mut self,
        format: ScreenshotFormat,
        include_subtitles: bool,
    ) -> Result<Option<Screenshot>, EngineError>;

    /// 释放引擎；返回后不得再发送任何通知
    fn dispose(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_value_args() {
        assert_eq!(PropertyValue::Flag(true).to_arg(), "yes");
        assert_eq!(PropertyValue::Double(1.5).to_arg(), "1.5");
        assert_eq!(PropertyValue::String("auto".into()).to_arg(), "auto");
    }

    #[test]
    fn test_notifier_reports_closed_receiver() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let notifier = Notifier::new(tx);
        assert!(notifier.end_of_file());
        assert_eq!(rx.recv(), Ok(EngineNotification::EndOfFile));
        drop(rx);
        assert!(!notifier.start_of_file());
    }

    #[test]
    fn test_screenshot_format_names() {
        assert_eq!(ScreenshotFormat::parse("image/png"), Some(ScreenshotFormat::Png));
        assert_eq!(ScreenshotFormat::parse("JPG"), Some(ScreenshotFormat::Jpeg));
        assert_eq!(ScreenshotFormat::parse("webp"), None);
    }
}
