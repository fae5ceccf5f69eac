//! 事件多路复用器
//!
//! 在单独的线程上消费引擎通知，翻译成 [`PlayerEvent`] 写入状态存储。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, Receiver};
use parking_lot::Mutex;
use serde_json::Value;

use crate::engine::property;
use crate::store::StateStore;
use crate::{
    describe_engine_failure, AudioDevice, AudioParams, EngineNotification, Media, PlayerEvent,
    PlayerLog, Playlist, PlaylistMode, Track, TrackInfo, Tracks, VideoParams,
};

/// 已完成状态下，距结尾在此范围内的位置更新仍视为处于结尾
pub const COMPLETION_TOLERANCE: Duration = Duration::from_millis(500);

/// 引擎地址到调用方 `Media` 的映射，用于还原请求头与附加数据
pub(crate) struct MediaRegistry {
    medias: Mutex<HashMap<String, Registered>>,
}

struct Registered {
    media: Media,
    /// 是否已出现在引擎报告的播放列表中
    listed: bool,
}

impl Registered {
    fn new(media: Media) -> Self {
        Self {
            media,
            listed: false,
        }
    }
}

impl MediaRegistry {
    pub fn new() -> Self {
        Self {
            medias: Mutex::new(HashMap::new()),
        }
    }

    pub fn replace_all(&self, entries: impl IntoIterator<Item = (String, Media)>) {
        let mut medias = self.medias.lock();
        medias.clear();
        medias.extend(entries.into_iter().map(|(uri, media)| (uri, Registered::new(media))));
    }

    pub fn register(&self, engine_uri: String, media: Media) {
        self.medias.lock().insert(engine_uri, Registered::new(media));
    }

    pub fn lookup(&self, engine_uri: &str) -> Media {
        self.medias
            .lock()
            .get(engine_uri)
            .map(|entry| entry.media.clone())
            .unwrap_or_else(|| Media::new(engine_uri))
    }

    /// 按引擎报告的播放列表整理映射
    ///
    /// 曾经出现过、如今不在列表中的条目被移除；尚未出现过的条目保留，
    /// 它们的列表通知可能还在路上。
    pub fn sync_listed(&self, uris: &[&str]) {
        let mut medias = self.medias.lock();
        medias.retain(|uri, entry| {
            if uris.contains(&uri.as_str()) {
                entry.listed = true;
                true
            } else {
                !entry.listed
            }
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.medias.lock().len()
    }
}

pub(crate) struct Multiplexer {
    store: Arc<StateStore>,
    registry: Arc<MediaRegistry>,
}

impl Multiplexer {
    pub fn new(store: Arc<StateStore>, registry: Arc<MediaRegistry>) -> Self {
        Self { store, registry }
    }

    /// 事件循环：每次取出通道中已有的全部通知作为一个批次
    pub fn run(self, notifications: Receiver<EngineNotification>, shutdown: Receiver<()>) {
        loop {
            select! {
                recv(notifications) -> msg => match msg {
                    Ok(first) => {
                        let mut batch = vec![first];
                        batch.extend(notifications.try_iter());
                        self.dispatch(batch);
                    }
                    Err(_) => break,
                },
                recv(shutdown) -> _ => break,
            }
        }
        log::debug!("event multiplexer stopped");
    }

    pub fn dispatch(&self, batch: Vec<EngineNotification>) {
        for notification in order_batch(batch) {
            if self.store.is_closed() {
                return;
            }
            self.handle(notification);
        }
    }

    fn handle(&self, notification: EngineNotification) {
        match notification {
            EngineNotification::PropertyChanged { name, value } => self.on_property(&name, &value),
            EngineNotification::StartOfFile => self.on_start_of_file(),
            EngineNotification::EndOfFile => self.on_end_of_file(),
            EngineNotification::LogMessage {
                prefix,
                level,
                text,
            } => {
                if let Some(level) = level.to_log() {
                    log::log!(target: "kit_player::engine", level, "[{}] {}", prefix, text.trim_end());
                }
                self.store.apply(PlayerEvent::Log(PlayerLog {
                    prefix,
                    level,
                    text,
                }));
            }
            EngineNotification::ErrorOccurred { code, message } => {
                let message = describe_engine_failure(code, &message);
                log::error!("engine error {}: {}", code, message);
                self.store.apply(PlayerEvent::Error(message));
            }
        }
    }

    fn on_property(&self, name: &str, value: &Value) {
        match name {
            property::PAUSE => {
                if let Some(paused) = value.as_bool() {
                    self.store.apply(PlayerEvent::Playing(!paused));
                }
            }
            property::TIME_POS => {
                if let Some(position) = timing(value) {
                    self.on_position(position);
                }
            }
            property::DURATION => {
                if let Some(duration) = timing(value) {
                    self.on_duration(duration);
                }
            }
            property::DEMUXER_CACHE_TIME => {
                if let Some(buffer) = timing(value) {
                    self.store.apply(PlayerEvent::Buffer(buffer));
                }
            }
            property::PAUSED_FOR_CACHE => {
                if let Some(buffering) = value.as_bool() {
                    self.store.apply(PlayerEvent::Buffering(buffering));
                }
            }
            property::CACHE_BUFFERING_STATE => {
                if let Some(percentage) = finite(value) {
                    self.store
                        .apply(PlayerEvent::BufferingPercentage(percentage.clamp(0.0, 100.0)));
                }
            }
            property::VOLUME => {
                if let Some(volume) = finite(value) {
                    self.store.apply(PlayerEvent::Volume(volume.clamp(0.0, 100.0)));
                }
            }
            property::SPEED => {
                if let Some(rate) = finite(value).filter(|v| *v > 0.0) {
                    self.store.apply(PlayerEvent::Rate(rate));
                }
            }
            property::PITCH => {
                if let Some(pitch) = finite(value).filter(|v| *v > 0.0) {
                    self.store.apply(PlayerEvent::Pitch(pitch));
                }
            }
            property::AUDIO_PARAMS => {
                self.store.apply(PlayerEvent::AudioParams(audio_params(value)));
            }
            property::VIDEO_PARAMS => {
                self.store.apply(PlayerEvent::VideoParams(video_params(value)));
            }
            property::AUDIO_BITRATE => {
                self.store.apply(PlayerEvent::AudioBitrate(finite(value)));
            }
            property::AUDIO_DEVICE => {
                if let Some(name) = value.as_str() {
                    self.on_audio_device(name);
                }
            }
            property::AUDIO_DEVICE_LIST => self.on_audio_device_list(value),
            property::TRACK_LIST => self.on_track_list(value),
            property::VID | property::AID | property::SID => self.on_track_selected(name, value),
            property::DWIDTH => {
                self.store.apply(PlayerEvent::Width(dimension(value)));
            }
            property::DHEIGHT => {
                self.store.apply(PlayerEvent::Height(dimension(value)));
            }
            property::SUB_TEXT | property::SECONDARY_SUB_TEXT => {
                let mut subtitle = self.store.state().subtitle.clone();
                let slot = usize::from(name == property::SECONDARY_SUB_TEXT);
                subtitle[slot] = value.as_str().unwrap_or_default().to_string();
                self.store.apply(PlayerEvent::Subtitle(subtitle));
            }
            property::PLAYLIST => self.on_playlist(value),
            property::PLAYLIST_POS => {
                let state = self.store.state();
                if let Some(index) = value.as_u64().map(|i| i as usize) {
                    if index < state.playlist.len() && index != state.playlist.index {
                        let playlist = state.playlist.clone().with_index(index);
                        self.store.apply(PlayerEvent::Playlist(playlist));
                    }
                }
            }
            property::PLAYLIST_MODE => {
                if let Some(mode) = value.as_str().and_then(PlaylistMode::parse) {
                    self.store.apply(PlayerEvent::PlaylistMode(mode));
                }
            }
            property::SHUFFLE => {
                if let Some(shuffle) = value.as_bool() {
                    self.store.apply(PlayerEvent::Shuffle(shuffle));
                }
            }
            _ => {}
        }
    }

    fn on_position(&self, position: Duration) {
        let state = self.store.state();
        let known = !state.duration.is_zero();
        let mut position = if known {
            position.min(state.duration)
        } else {
            position
        };

        let mut patch = Vec::with_capacity(2);
        if state.completed {
            let at_end = if known {
                position.saturating_add(COMPLETION_TOLERANCE) >= state.duration
            } else {
                position >= state.position
            };
            if at_end {
                if known {
                    position = state.duration;
                }
            } else {
                patch.push(PlayerEvent::Completed(false));
            }
        }
        patch.push(PlayerEvent::Position(position));
        self.store.commit(patch);
    }

    fn on_duration(&self, duration: Duration) {
        let state = self.store.state();
        let mut patch = vec![PlayerEvent::Duration(duration)];
        if !duration.is_zero() && (state.position > duration || state.completed) {
            patch.push(PlayerEvent::Position(duration));
        }
        self.store.commit(patch);
    }

    fn on_start_of_file(&self) {
        self.store.commit([
            PlayerEvent::Completed(false),
            PlayerEvent::Position(Duration::ZERO),
            PlayerEvent::Duration(Duration::ZERO),
            PlayerEvent::Buffer(Duration::ZERO),
            PlayerEvent::AudioParams(AudioParams::default()),
            PlayerEvent::VideoParams(VideoParams::default()),
            PlayerEvent::AudioBitrate(None),
            PlayerEvent::Width(None),
            PlayerEvent::Height(None),
            PlayerEvent::Track(Track::default()),
            PlayerEvent::Tracks(Tracks::default()),
            PlayerEvent::Subtitle(Default::default()),
        ]);
    }

    fn on_end_of_file(&self) {
        let state = self.store.state();
        let mut patch = Vec::with_capacity(3);
        if !state.duration.is_zero() && state.position < state.duration {
            patch.push(PlayerEvent::Position(state.duration));
        }
        patch.push(PlayerEvent::Completed(true));
        patch.push(PlayerEvent::Playing(false));
        self.store.commit(patch);
    }

    fn on_audio_device(&self, name: &str) {
        let state = self.store.state();
        if state.audio_devices.is_empty() {
            self.store.apply(PlayerEvent::AudioDevice(AudioDevice::new(name, "")));
            return;
        }
        match state.audio_devices.iter().find(|d| d.name == name) {
            Some(device) => {
                self.store.apply(PlayerEvent::AudioDevice(device.clone()));
            }
            None => log::warn!("engine selected unlisted audio device {:?}", name),
        }
    }

    fn on_audio_device_list(&self, value: &Value) {
        let Some(entries) = value.as_array() else {
            return;
        };
        let devices: Vec<AudioDevice> = entries
            .iter()
            .filter_map(|entry| {
                let name = entry.get("name")?.as_str()?;
                let description = entry
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Some(AudioDevice::new(name, description))
            })
            .collect();

        let current = self.store.state().audio_device.clone();
        let mut patch = Vec::with_capacity(2);
        match devices.iter().find(|d| d.name == current.name) {
            Some(listed) if *listed != current => patch.push(PlayerEvent::AudioDevice(listed.clone())),
            Some(_) => {}
            None => {
                if let Some(first) = devices.first() {
                    patch.push(PlayerEvent::AudioDevice(first.clone()));
                }
            }
        }
        patch.insert(0, PlayerEvent::AudioDevices(devices));
        self.store.commit(patch);
    }

    fn on_track_list(&self, value: &Value) {
        let Some(entries) = value.as_array() else {
            return;
        };
        let mut tracks = Tracks::default();
        for entry in entries {
            let Some(id) = entry.get("id").and_then(track_id) else {
                continue;
            };
            let info = TrackInfo {
                id,
                title: entry.get("title").and_then(Value::as_str).map(str::to_string),
                language: entry.get("lang").and_then(Value::as_str).map(str::to_string),
            };
            match entry.get("type").and_then(Value::as_str) {
                Some("video") => tracks.video.push(info),
                Some("audio") => tracks.audio.push(info),
                Some("sub") => tracks.subtitle.push(info),
                _ => {}
            }
        }

        // 用新列表补全当前选中轨道的标题与语言
        let mut track = self.store.state().track.clone();
        track.video = resolve_track(&tracks.video, &track.video.id);
        track.audio = resolve_track(&tracks.audio, &track.audio.id);
        track.subtitle = resolve_track(&tracks.subtitle, &track.subtitle.id);

        self.store
            .commit([PlayerEvent::Tracks(tracks), PlayerEvent::Track(track)]);
    }

    fn on_track_selected(&self, name: &str, value: &Value) {
        let Some(id) = track_id(value) else {
            return;
        };
        let state = self.store.state();
        let mut track = state.track.clone();
        match name {
            property::VID => track.video = resolve_track(&state.tracks.video, &id),
            property::AID => track.audio = resolve_track(&state.tracks.audio, &id),
            _ => track.subtitle = resolve_track(&state.tracks.subtitle, &id),
        }
        self.store.apply(PlayerEvent::Track(track));
    }

    fn on_playlist(&self, value: &Value) {
        let Some(entries) = value.as_array() else {
            return;
        };
        let uris: Vec<&str> = entries
            .iter()
            .filter_map(|entry| entry.get("filename").and_then(Value::as_str))
            .collect();
        self.registry.sync_listed(&uris);
        let medias: Vec<Media> = uris.iter().map(|uri| self.registry.lookup(uri)).collect();

        let state = self.store.state();
        let index = entries
            .iter()
            .position(|entry| entry.get("current").and_then(Value::as_bool) == Some(true))
            .unwrap_or(state.playlist.index)
            .min(medias.len().saturating_sub(1));
        self.store
            .apply(PlayerEvent::Playlist(Playlist { medias, index }));
    }
}

/// 按文件边界分段；段内时间属性先于其它通知，文件结束最后处理
fn order_batch(batch: Vec<EngineNotification>) -> Vec<EngineNotification> {
    fn priority(notification: &EngineNotification) -> u8 {
        match notification {
            EngineNotification::PropertyChanged { name, .. }
                if property::TIMING.contains(&name.as_str()) =>
            {
                0
            }
            EngineNotification::EndOfFile => 2,
            _ => 1,
        }
    }

    fn flush(segment: &mut Vec<EngineNotification>, ordered: &mut Vec<EngineNotification>) {
        segment.sort_by_key(priority);
        ordered.append(segment);
    }

    let mut ordered = Vec::with_capacity(batch.len());
    let mut segment = Vec::new();
    for notification in batch {
        if notification == EngineNotification::StartOfFile {
            flush(&mut segment, &mut ordered);
            ordered.push(notification);
        } else {
            segment.push(notification);
        }
    }
    flush(&mut segment, &mut ordered);
    ordered
}

fn finite(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

/// 秒数转为时长；负数或超出 `Duration` 范围的值被丢弃
fn seconds(value: &Value) -> Option<Duration> {
    finite(value)
        .filter(|v| *v >= 0.0)
        .and_then(|v| Duration::try_from_secs_f64(v).ok())
}

/// 时间属性：引擎报告不可用（文件卸载后）时归零
fn timing(value: &Value) -> Option<Duration> {
    if value.is_null() {
        Some(Duration::ZERO)
    } else {
        seconds(value)
    }
}

fn dimension(value: &Value) -> Option<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
}

fn track_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n.as_i64().map(|id| id.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Bool(false) => Some("no".to_string()),
        _ => None,
    }
}

fn resolve_track(list: &[TrackInfo], id: &str) -> TrackInfo {
    list.iter()
        .find(|t| t.id == id)
        .cloned()
        .unwrap_or_else(|| TrackInfo::new(id))
}

fn text(object: &Value, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

fn number<T: TryFrom<i64>>(object: &Value, key: &str) -> Option<T> {
    object
        .get(key)
        .and_then(Value::as_i64)
        .and_then(|v| T::try_from(v).ok())
}

fn audio_params(value: &Value) -> AudioParams {
    AudioParams {
        format: text(value, "format"),
        sample_rate: number(value, "samplerate"),
        channels: text(value, "channels"),
        channel_count: number(value, "channel-count"),
        hr_channels: text(value, "hr-channels"),
    }
}

fn video_params(value: &Value) -> VideoParams {
    VideoParams {
        pixelformat: text(value, "pixelformat"),
        hw_pixelformat: text(value, "hw-pixelformat"),
        w: number(value, "w"),
        h: number(value, "h"),
        dw: number(value, "dw"),
        dh: number(value, "dh"),
        aspect: value.get("aspect").and_then(finite),
        par: value.get("par").and_then(finite),
        colormatrix: text(value, "colormatrix"),
        colorlevels: text(value, "colorlevels"),
        primaries: text(value, "primaries"),
        gamma: text(value, "gamma"),
        sig_peak: value.get("sig-peak").and_then(finite),
        light: text(value, "light"),
        chroma_location: text(value, "chroma-location"),
        rotate: number(value, "rotate"),
        stereo_in: text(value, "stereo-in"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn setup() -> (Arc<StateStore>, Arc<MediaRegistry>, Multiplexer) {
        let store = Arc::new(StateStore::new());
        let registry = Arc::new(MediaRegistry::new());
        let mux = Multiplexer::new(store.clone(), registry.clone());
        (store, registry, mux)
    }

    fn prop(name: &str, value: Value) -> EngineNotification {
        EngineNotification::PropertyChanged {
            name: name.to_string(),
            value,
        }
    }

    #[test]
    fn test_duplicate_writes_emit_once() {
        let (store, _, mux) = setup();
        let volume = store.stream().volume();
        let playing = store.stream().playing();

        mux.dispatch(vec![
            prop("volume", json!(60.0)),
            prop("volume", json!(60.0)),
            prop("volume", json!(60.0)),
        ]);

        assert_eq!(volume.try_iter().collect::<Vec<_>>(), vec![60.0]);
        assert!(playing.try_recv().is_err());
    }

    #[test]
    fn test_volume_is_clamped() {
        let (store, _, mux) = setup();
        mux.dispatch(vec![prop("volume", json!(130.0))]);
        assert_eq!(store.state().volume, 100.0);
        mux.dispatch(vec![prop("speed", json!(0.0)), prop("pitch", json!(-1.0))]);
        assert_eq!(store.state().rate, 1.0);
        assert_eq!(store.state().pitch, 1.0);
    }

    #[test]
    fn test_timing_applied_before_end_of_file() {
        let (store, _, mux) = setup();
        let events = store.stream().events();

        mux.dispatch(vec![
            prop("pause", json!(false)),
            EngineNotification::EndOfFile,
            prop("duration", json!(10.0)),
            prop("time-pos", json!(9.98)),
        ]);

        let state = store.state();
        assert!(state.completed);
        assert!(!state.playing);
        assert_eq!(state.position, state.duration);

        let events: Vec<_> = events.try_iter().collect();
        let completed_at = events
            .iter()
            .position(|e| *e == PlayerEvent::Completed(true))
            .unwrap();
        let duration_at = events
            .iter()
            .position(|e| matches!(e, PlayerEvent::Duration(_)))
            .unwrap();
        assert!(duration_at < completed_at);
    }

    #[test]
    fn test_position_near_end_is_not_completed() {
        let (store, _, mux) = setup();
        mux.dispatch(vec![prop("duration", json!(10.0))]);
        mux.dispatch(vec![prop("time-pos", json!(10.0))]);
        assert!(!store.state().completed);
    }

    #[test]
    fn test_seek_back_clears_completed() {
        let (store, _, mux) = setup();
        let completed = store.stream().completed();
        mux.dispatch(vec![prop("duration", json!(10.0))]);
        mux.dispatch(vec![EngineNotification::EndOfFile]);

        // 结尾附近的抖动保持在结尾
        mux.dispatch(vec![prop("time-pos", json!(9.9))]);
        assert!(store.state().completed);
        assert_eq!(store.state().position, Duration::from_secs(10));

        mux.dispatch(vec![prop("time-pos", json!(2.0))]);
        let state = store.state();
        assert!(!state.completed);
        assert_eq!(state.position, Duration::from_secs(2));
        assert_eq!(completed.try_iter().collect::<Vec<_>>(), vec![true, false]);
    }

    #[test]
    fn test_position_clamped_to_duration() {
        let (store, _, mux) = setup();
        mux.dispatch(vec![prop("duration", json!(5.0)), prop("time-pos", json!(7.5))]);
        assert_eq!(store.state().position, Duration::from_secs(5));
    }

    #[test]
    fn test_start_of_file_separates_metadata() {
        let (store, registry, mux) = setup();
        registry.replace_all([
            ("/a.mp3".to_string(), Media::new("/a.mp3")),
            ("/b.mp3".to_string(), Media::new("/b.mp3")),
        ]);
        let position = store.stream().position();

        mux.dispatch(vec![
            EngineNotification::StartOfFile,
            prop(
                "playlist",
                json!([{"filename": "/a.mp3", "current": true}, {"filename": "/b.mp3"}]),
            ),
            prop("audio-params", json!({"format": "floatp", "samplerate": 44100})),
            prop("duration", json!(3.0)),
            prop("time-pos", json!(1.5)),
        ]);
        assert_eq!(store.state().audio_params.sample_rate, Some(44100));

        mux.dispatch(vec![
            EngineNotification::EndOfFile,
            EngineNotification::StartOfFile,
            prop("playlist-pos", json!(1)),
            prop("audio-params", json!({"format": "s16", "samplerate": 48000})),
        ]);

        let state = store.state();
        assert_eq!(state.playlist.index, 1);
        assert_eq!(state.playlist.current().unwrap().uri, "file:///b.mp3");
        assert_eq!(state.audio_params.sample_rate, Some(48000));
        assert_eq!(state.position, Duration::ZERO);
        assert!(!state.completed);
        assert_eq!(position.try_iter().last(), Some(Duration::ZERO));
    }

    #[test]
    fn test_out_of_range_times_are_dropped() {
        let (store, _, mux) = setup();
        mux.dispatch(vec![prop("duration", json!(10.0))]);
        mux.dispatch(vec![
            prop("duration", json!(1e20)),
            prop("time-pos", json!(f64::MAX)),
            prop("demuxer-cache-time", json!(1e300)),
            prop("volume", json!(20.0)),
        ]);
        let state = store.state();
        assert_eq!(state.duration, Duration::from_secs(10));
        assert_eq!(state.position, Duration::ZERO);
        assert_eq!(state.buffer, Duration::ZERO);
        assert_eq!(state.volume, 20.0);
    }

    #[test]
    fn test_unavailable_timing_resets_to_zero() {
        let (store, _, mux) = setup();
        mux.dispatch(vec![
            prop("duration", json!(10.0)),
            prop("time-pos", json!(5.0)),
            prop("demuxer-cache-time", json!(8.0)),
        ]);
        mux.dispatch(vec![
            prop("playlist", json!([])),
            prop("time-pos", Value::Null),
            prop("duration", Value::Null),
            prop("demuxer-cache-time", Value::Null),
        ]);
        let state = store.state();
        assert_eq!(state.playlist.len(), 0);
        assert_eq!(state.position, Duration::ZERO);
        assert_eq!(state.duration, Duration::ZERO);
        assert_eq!(state.buffer, Duration::ZERO);
    }

    #[test]
    fn test_registry_drops_removed_media() {
        let (store, registry, mux) = setup();
        let a = Media::new("/a.mp3").with_extras(json!({"id": 1}));
        let b = Media::new("/b.mp3").with_extras(json!({"id": 2}));
        registry.replace_all([("/a.mp3".to_string(), a.clone()), ("/b.mp3".to_string(), b)]);

        // 旧播放列表的通知不影响尚未出现过的条目
        mux.dispatch(vec![prop("playlist", json!([]))]);
        assert_eq!(registry.len(), 2);

        mux.dispatch(vec![prop(
            "playlist",
            json!([{"filename": "/a.mp3", "current": true}, {"filename": "/b.mp3"}]),
        )]);
        mux.dispatch(vec![prop("playlist", json!([{"filename": "/a.mp3", "current": true}]))]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("/a.mp3"), a);
        assert_eq!(store.state().playlist.medias, vec![a]);
    }

    #[test]
    fn test_playlist_restores_registered_media() {
        let (store, registry, mux) = setup();
        let media = Media::new("https://x.org/a.m3u8").with_extras(json!({"id": 7}));
        registry.replace_all([(media.uri.clone(), media.clone())]);

        mux.dispatch(vec![prop(
            "playlist",
            json!([{"filename": "https://x.org/a.m3u8", "current": true}]),
        )]);
        assert_eq!(store.state().playlist.medias, vec![media]);
    }

    #[test]
    fn test_device_list_keeps_selection_valid() {
        let (store, _, mux) = setup();
        mux.dispatch(vec![prop(
            "audio-device-list",
            json!([
                {"name": "pulse/sink-1", "description": "Speakers"},
                {"name": "pulse/sink-2", "description": "Headphones"}
            ]),
        )]);
        let state = store.state();
        assert_eq!(state.audio_device.name, "pulse/sink-1");
        assert!(state.audio_devices.contains(&state.audio_device));

        mux.dispatch(vec![prop("audio-device", json!("bogus"))]);
        assert_eq!(store.state().audio_device.name, "pulse/sink-1");

        mux.dispatch(vec![prop("audio-device", json!("pulse/sink-2"))]);
        assert_eq!(store.state().audio_device.description, "Headphones");
    }

    #[test]
    fn test_tracks_and_selection() {
        let (store, _, mux) = setup();
        mux.dispatch(vec![
            prop(
                "track-list",
                json!([
                    {"id": 1, "type": "audio", "lang": "jpn", "title": "Main"},
                    {"id": 2, "type": "audio", "lang": "eng"},
                    {"id": 1, "type": "sub", "lang": "eng"}
                ]),
            ),
            prop("aid", json!(2)),
            prop("sid", json!(false)),
        ]);
        let state = store.state();
        assert_eq!(state.tracks.audio.len(), 4);
        assert_eq!(state.track.audio.language.as_deref(), Some("eng"));
        assert_eq!(state.track.subtitle, TrackInfo::no());
    }

    #[test]
    fn test_errors_become_readable_strings() {
        let (store, _, mux) = setup();
        let errors = store.stream().error();
        mux.dispatch(vec![EngineNotification::ErrorOccurred {
            code: crate::error_code::UNKNOWN_FORMAT,
            message: "/tmp/x.bin".into(),
        }]);
        assert_eq!(
            errors.try_recv(),
            Ok("unrecognized file format: /tmp/x.bin".to_string())
        );
    }

    #[test]
    fn test_subtitle_lines() {
        let (store, _, mux) = setup();
        mux.dispatch(vec![
            prop("sub-text", json!("Hello")),
            prop("secondary-sub-text", json!("Bonjour")),
        ]);
        assert_eq!(store.state().subtitle, ["Hello".to_string(), "Bonjour".to_string()]);
        mux.dispatch(vec![prop("sub-text", Value::Null)]);
        assert_eq!(store.state().subtitle[0], "");
    }

    #[test]
    fn test_closed_store_ignores_batches() {
        let (store, _, mux) = setup();
        store.close();
        mux.dispatch(vec![prop("volume", json!(10.0))]);
        assert_eq!(store.state().volume, 100.0);
    }
}
