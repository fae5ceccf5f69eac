//! mpv 引擎适配器

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use kit_player::{
    error_code, error_code_for, property, EngineError, EngineMedia, LogLevel, NativeEngine,
    Notifier, PlayerConfiguration, PlaylistCommand, PlaylistMode, PropertyValue, Screenshot,
    ScreenshotFormat,
};
use serde_json::{json, Value};

use crate::screenshot::{png_size, png_to_bgra};
use crate::{IpcClient, IpcError, MpvEvent, MpvOptions};

/// 播放停在结尾（keep-open）时 mpv 不发 end-file，只设置这个属性
const EOF_REACHED: &str = "eof-reached";

const OBSERVED: &[&str] = &[
    property::PAUSE,
    property::TIME_POS,
    property::DURATION,
    property::DEMUXER_CACHE_TIME,
    property::PAUSED_FOR_CACHE,
    property::CACHE_BUFFERING_STATE,
    property::VOLUME,
    property::SPEED,
    property::PITCH,
    property::AUDIO_PARAMS,
    property::VIDEO_PARAMS,
    property::AUDIO_BITRATE,
    property::AUDIO_DEVICE,
    property::AUDIO_DEVICE_LIST,
    property::TRACK_LIST,
    property::VID,
    property::AID,
    property::SID,
    property::DWIDTH,
    property::DHEIGHT,
    property::SUB_TEXT,
    property::SECONDARY_SUB_TEXT,
    property::PLAYLIST,
    property::PLAYLIST_POS,
    EOF_REACHED,
];

static INSTANCES: AtomicU64 = AtomicU64::new(0);

/// 驱动独立 mpv 进程的引擎
pub struct MpvEngine {
    options: MpvOptions,
    child: Option<Child>,
    client: Option<IpcClient>,
    notifier: Option<Notifier>,
    socket: Option<PathBuf>,
    screenshots: u64,
}

impl MpvEngine {
    pub fn new(options: MpvOptions) -> Self {
        Self {
            options,
            child: None,
            client: None,
            notifier: None,
            socket: None,
            screenshots: 0,
        }
    }

    fn client(&self) -> Result<&IpcClient, EngineError> {
        self.client
            .as_ref()
            .ok_or_else(|| EngineError::new(error_code::UNINITIALIZED, "mpv is not running"))
    }

    fn command(&self, args: Vec<Value>) -> Result<Value, EngineError> {
        Ok(self.client()?.command(args)?)
    }

    fn set(&self, name: &str, value: Value) -> Result<(), EngineError> {
        Ok(self.client()?.set_property(name, value)?)
    }

    fn notify(&self, name: &str, value: Value) {
        if let Some(notifier) = &self.notifier {
            notifier.property_changed(name, value);
        }
    }

    fn spawn(&mut self, config: &PlayerConfiguration, notifier: Notifier) -> Result<i64, IpcError> {
        let socket = match &self.options.socket_path {
            Some(path) => path.clone(),
            None => std::env::temp_dir().join(format!(
                "kit-mpv-{}-{}.sock",
                std::process::id(),
                INSTANCES.fetch_add(1, Ordering::Relaxed)
            )),
        };
        let _ = std::fs::remove_file(&socket);

        let args = self.options.command_args(config, &socket);
        log::debug!("spawning {} {:?}", self.options.binary.display(), args);
        let mut child = Command::new(&self.options.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(IpcError::Spawn)?;

        let client = match IpcClient::connect(
            &socket,
            self.options.connect_timeout(),
            self.options.request_timeout(),
            move |event| forward(event, &notifier),
        ) {
            Ok(client) => client,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        let pid = i64::from(child.id());
        self.child = Some(child);
        self.client = Some(client);
        self.socket = Some(socket);
        Ok(pid)
    }

    fn observe(&self, level: LogLevel) -> Result<(), EngineError> {
        for (id, name) in OBSERVED.iter().enumerate() {
            self.command(vec![json!("observe_property"), json!(id + 1), json!(name)])?;
        }
        if level != LogLevel::None {
            self.command(vec![json!("request_log_messages"), json!(level.as_str())])?;
        }
        Ok(())
    }

    fn set_playlist_mode(&self, value: &PropertyValue) -> Result<(), EngineError> {
        let mode = match value {
            PropertyValue::String(name) => PlaylistMode::parse(name),
            _ => None,
        }
        .ok_or_else(|| {
            EngineError::new(
                error_code::PROPERTY_FORMAT,
                format!("invalid playlist mode {}", value.to_arg()),
            )
        })?;
        for (name, value) in playlist_mode_options(mode) {
            self.set(name, json!(value))?;
        }
        self.notify(property::PLAYLIST_MODE, json!(mode.as_str()));
        Ok(())
    }

    fn set_shuffle(&self, shuffle: bool) -> Result<(), EngineError> {
        let command = if shuffle {
            "playlist-shuffle"
        } else {
            "playlist-unshuffle"
        };
        self.command(vec![json!(command)])?;
        self.notify(property::SHUFFLE, json!(shuffle));
        Ok(())
    }

    fn apply_http_headers(&self, media: Option<&EngineMedia>) -> Result<(), EngineError> {
        let fields: Vec<String> = media
            .map(|m| {
                m.http_headers
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect()
            })
            .unwrap_or_default();
        self.set("http-header-fields", json!(fields))
    }

    fn video_size(&self) -> (u32, u32) {
        let dimension = |name: &str| {
            self.client()
                .ok()
                .and_then(|c| c.get_property(name).ok())
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0)
        };
        (dimension("width"), dimension("height"))
    }
}

impl NativeEngine for MpvEngine {
    fn initialize(
        &mut self,
        notifier: Notifier,
        config: &PlayerConfiguration,
    ) -> Result<i64, EngineError> {
        let handle = self.spawn(config, notifier.clone())?;
        self.notifier = Some(notifier);
        if let Err(e) = self.observe(config.log_level) {
            self.dispose();
            return Err(e);
        }
        log::info!("mpv started, pid {}", handle);
        Ok(handle)
    }

    fn open(&mut self, medias: &[EngineMedia], index: usize, play: bool) -> Result<(), EngineError> {
        // 先暂停，避免在跳到起始条目之前就开始播放第一个
        self.set(property::PAUSE, json!(true))?;
        self.command(vec![json!("stop")])?;
        self.apply_http_headers(medias.get(index))?;
        for media in medias {
            self.command(vec![json!("loadfile"), json!(media.uri), json!("append")])?;
        }
        self.command(vec![json!("playlist-play-index"), json!(index)])?;
        self.set(property::PAUSE, json!(!play))
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.set(property::PAUSE, json!(false))
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.set(property::PAUSE, json!(true))
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.command(vec![json!("stop")]).map(|_| ())
    }

    fn seek(&mut self, position: Duration) -> Result<(), EngineError> {
        self.command(vec![
            json!("seek"),
            json!(position.as_secs_f64()),
            json!("absolute"),
        ])
        .map(|_| ())
    }

    fn playlist(&mut self, command: PlaylistCommand) -> Result<(), EngineError> {
        let args = match command {
            PlaylistCommand::Next => vec![json!("playlist-next")],
            PlaylistCommand::Previous => vec![json!("playlist-prev")],
            PlaylistCommand::Jump(index) => vec![json!("playlist-play-index"), json!(index)],
            PlaylistCommand::Add(media) => vec![json!("loadfile"), json!(media.uri), json!("append")],
            PlaylistCommand::Remove(index) => vec![json!("playlist-remove"), json!(index)],
            PlaylistCommand::Move { from, to } => vec![
                json!("playlist-move"),
                json!(from),
                json!(move_target(from, to)),
            ],
        };
        self.command(args).map(|_| ())
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), EngineError> {
        match name {
            property::PLAYLIST_MODE => self.set_playlist_mode(&value),
            property::SHUFFLE => match value {
                PropertyValue::Flag(shuffle) => self.set_shuffle(shuffle),
                other => Err(EngineError::new(
                    error_code::PROPERTY_FORMAT,
                    format!("shuffle expects a flag, got {}", other.to_arg()),
                )),
            },
            _ => {
                let value = serde_json::to_value(&value)
                    .map_err(|e| EngineError::new(error_code::PROPERTY_FORMAT, e.to_string()))?;
                self.set(name, value)
            }
        }
    }

    fn screenshot(
        &mut self,
        format: ScreenshotFormat,
        include_subtitles: bool,
    ) -> Result<Option<Screenshot>, EngineError> {
        let client = self.client()?;
        let vo_configured = client
            .get_property("vo-configured")
            .map(|v| v.as_bool().unwrap_or(false))
            .unwrap_or(false);
        if !vo_configured {
            return Ok(None);
        }

        self.screenshots += 1;
        let extension = match format {
            ScreenshotFormat::Jpeg => "jpg",
            ScreenshotFormat::Png | ScreenshotFormat::Raw => "png",
        };
        let path = std::env::temp_dir().join(format!(
            "kit-screenshot-{}-{}.{}",
            std::process::id(),
            self.screenshots,
            extension
        ));
        let mode = if include_subtitles { "subtitles" } else { "video" };
        self.command(vec![
            json!("screenshot-to-file"),
            json!(path.to_string_lossy()),
            json!(mode),
        ])?;

        let bytes = std::fs::read(&path).map_err(IpcError::from);
        let _ = std::fs::remove_file(&path);
        let bytes = bytes?;

        let screenshot = match format {
            ScreenshotFormat::Raw => {
                let (width, height, pixels) = png_to_bgra(&bytes)?;
                Screenshot {
                    format,
                    width,
                    height,
                    bytes: pixels,
                }
            }
            ScreenshotFormat::Png => {
                let (width, height) = png_size(&bytes)?;
                Screenshot {
                    format,
                    width,
                    height,
                    bytes,
                }
            }
            ScreenshotFormat::Jpeg => {
                let (width, height) = self.video_size();
                Screenshot {
                    format,
                    width,
                    height,
                    bytes,
                }
            }
        };
        Ok(Some(screenshot))
    }

    fn dispose(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.command(vec![json!("quit")]) {
                log::debug!("mpv quit: {}", e);
            }
            client.close();
        }
        if let Some(mut child) = self.child.take() {
            let mut exited = false;
            for _ in 0..20 {
                if matches!(child.try_wait(), Ok(Some(_))) {
                    exited = true;
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
            if !exited {
                log::warn!("mpv did not quit, killing pid {}", child.id());
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        if let Some(socket) = self.socket.take() {
            let _ = std::fs::remove_file(socket);
        }
        self.notifier = None;
    }
}

impl Drop for MpvEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// 把 mpv 事件转成引擎通知
fn forward(event: MpvEvent, notifier: &Notifier) {
    match event {
        MpvEvent::PropertyChange { name, data } if name == EOF_REACHED => {
            if data.as_bool() == Some(true) {
                notifier.end_of_file();
            }
        }
        MpvEvent::PropertyChange { name, data } => {
            notifier.property_changed(name, data);
        }
        MpvEvent::StartFile => {
            notifier.start_of_file();
        }
        MpvEvent::EndFile { reason, error } => match reason.as_str() {
            "eof" => {
                notifier.end_of_file();
            }
            "error" => {
                let message = error.unwrap_or_default();
                let code = match error_code_for(&message) {
                    error_code::GENERIC => error_code::LOADING_FAILED,
                    code => code,
                };
                notifier.error_occurred(code, message);
            }
            _ => {}
        },
        MpvEvent::LogMessage {
            prefix,
            level,
            text,
        } => {
            let level = LogLevel::parse(&level).unwrap_or(LogLevel::Info);
            notifier.log_message(prefix, level, text);
        }
        MpvEvent::Shutdown => log::debug!("mpv is shutting down"),
        MpvEvent::Other(_) => {}
    }
}

/// 播放列表模式对应的 mpv 选项
fn playlist_mode_options(mode: PlaylistMode) -> [(&'static str, &'static str); 3] {
    match mode {
        PlaylistMode::None => [("loop-file", "no"), ("loop-playlist", "no"), ("keep-open", "yes")],
        PlaylistMode::Single => [
            ("loop-file", "no"),
            ("loop-playlist", "no"),
            ("keep-open", "always"),
        ],
        PlaylistMode::Loop => [("loop-file", "inf"), ("loop-playlist", "no"), ("keep-open", "yes")],
        PlaylistMode::LoopPlaylist => [
            ("loop-file", "no"),
            ("loop-playlist", "inf"),
            ("keep-open", "yes"),
        ],
    }
}

/// `playlist-move` 把条目放到目标条目之前，向后移动时目标要加一
fn move_target(from: usize, to: usize) -> usize {
    if from < to {
        to + 1
    } else {
        to
    }
}

#[cfg(test)]
mod tests {
    use kit_player::EngineNotification;

    use super::*;

    fn notifier() -> (Notifier, crossbeam_channel::Receiver<EngineNotification>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Notifier::new(tx), rx)
    }

    #[test]
    fn test_end_file_reasons() {
        let (notifier, rx) = notifier();
        forward(
            MpvEvent::EndFile {
                reason: "stop".into(),
                error: None,
            },
            &notifier,
        );
        assert!(rx.try_recv().is_err());

        forward(
            MpvEvent::EndFile {
                reason: "eof".into(),
                error: None,
            },
            &notifier,
        );
        assert_eq!(rx.try_recv(), Ok(EngineNotification::EndOfFile));

        forward(
            MpvEvent::EndFile {
                reason: "error".into(),
                error: Some("unrecognized file format".into()),
            },
            &notifier,
        );
        assert_eq!(
            rx.try_recv(),
            Ok(EngineNotification::ErrorOccurred {
                code: error_code::UNKNOWN_FORMAT,
                message: "unrecognized file format".into()
            })
        );
    }

    #[test]
    fn test_eof_reached_is_end_of_file() {
        let (notifier, rx) = notifier();
        forward(
            MpvEvent::PropertyChange {
                name: EOF_REACHED.into(),
                data: json!(false),
            },
            &notifier,
        );
        forward(
            MpvEvent::PropertyChange {
                name: EOF_REACHED.into(),
                data: json!(true),
            },
            &notifier,
        );
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![EngineNotification::EndOfFile]);
    }

    #[test]
    fn test_log_levels() {
        let (notifier, rx) = notifier();
        forward(
            MpvEvent::LogMessage {
                prefix: "ao".into(),
                level: "warn".into(),
                text: "underrun\n".into(),
            },
            &notifier,
        );
        assert_eq!(
            rx.try_recv(),
            Ok(EngineNotification::LogMessage {
                prefix: "ao".into(),
                level: LogLevel::Warn,
                text: "underrun\n".into()
            })
        );
    }

    #[test]
    fn test_playlist_mode_options() {
        assert_eq!(playlist_mode_options(PlaylistMode::Single)[2], ("keep-open", "always"));
        assert_eq!(playlist_mode_options(PlaylistMode::Loop)[0], ("loop-file", "inf"));
        assert_eq!(
            playlist_mode_options(PlaylistMode::LoopPlaylist)[1],
            ("loop-playlist", "inf")
        );
    }

    #[test]
    fn test_move_target() {
        // [a, b, c]: a 移到 2 之后应为 [b, c, a]
        assert_eq!(move_target(0, 2), 3);
        assert_eq!(move_target(2, 0), 0);
    }

    #[test]
    fn test_missing_binary_fails_initialization() {
        let mut engine = MpvEngine::new(MpvOptions {
            binary: PathBuf::from("/nonexistent/mpv"),
            ..Default::default()
        });
        let (notifier, _rx) = notifier();
        let err = engine
            .initialize(notifier, &PlayerConfiguration::default())
            .unwrap_err();
        assert_eq!(err.code, error_code::UNINITIALIZED);
        assert!(engine.play().is_err());
    }
}

#[cfg(all(test, unix))]
mod command_tests {
    use std::collections::BTreeMap;
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;

    use crossbeam_channel::Receiver;
    use kit_player::EngineNotification;
    use parking_lot::Mutex;

    use super::*;

    /// 接在套接字另一端的 mpv：记录每条命令并回复成功
    fn scripted(vo_configured: bool) -> (MpvEngine, Arc<Mutex<Vec<Value>>>, Receiver<EngineNotification>) {
        let (client_end, server_end) = UnixStream::pair().unwrap();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        thread::spawn(move || {
            let mut writer = server_end.try_clone().unwrap();
            for line in BufReader::new(server_end).lines() {
                let Ok(line) = line else { break };
                let request: Value = serde_json::from_str(&line).unwrap();
                let command = request["command"].clone();
                let data = if command == json!(["get_property", "vo-configured"]) {
                    json!(vo_configured)
                } else {
                    Value::Null
                };
                log.lock().push(command);
                let reply = json!({"request_id": request["request_id"], "error": "success", "data": data});
                if writeln!(writer, "{}", reply).is_err() {
                    return;
                }
            }
        });

        let (tx, rx) = crossbeam_channel::unbounded();
        let notifier = Notifier::new(tx);
        let reader = client_end.try_clone().unwrap();
        let closer = client_end.try_clone().unwrap();
        let forward_to = notifier.clone();
        let client = IpcClient::new(
            reader,
            client_end,
            move || {
                let _ = closer.shutdown(std::net::Shutdown::Both);
            },
            Duration::from_secs(1),
            move |event| forward(event, &forward_to),
        );

        let mut engine = MpvEngine::new(MpvOptions::default());
        engine.client = Some(client);
        engine.notifier = Some(notifier);
        (engine, sent, rx)
    }

    fn media(uri: &str, headers: &[(&str, &str)]) -> EngineMedia {
        EngineMedia {
            uri: uri.to_string(),
            http_headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_open_command_sequence() {
        let (mut engine, sent, _) = scripted(true);
        let medias = [
            media("/a.mp3", &[]),
            media("https://x.org/b.m3u8", &[("Referer", "https://x.org")]),
        ];
        engine.open(&medias, 1, true).unwrap();

        assert_eq!(
            *sent.lock(),
            vec![
                json!(["set_property", "pause", true]),
                json!(["stop"]),
                json!(["set_property", "http-header-fields", ["Referer: https://x.org"]]),
                json!(["loadfile", "/a.mp3", "append"]),
                json!(["loadfile", "https://x.org/b.m3u8", "append"]),
                json!(["playlist-play-index", 1]),
                json!(["set_property", "pause", false]),
            ]
        );
    }

    #[test]
    fn test_open_paused_keeps_pause() {
        let (mut engine, sent, _) = scripted(true);
        engine.open(&[media("/a.mp3", &[])], 0, false).unwrap();
        assert_eq!(sent.lock().last(), Some(&json!(["set_property", "pause", true])));
    }

    #[test]
    fn test_playlist_mode_is_applied_and_reported() {
        let (mut engine, sent, events) = scripted(true);
        engine
            .set_property(property::PLAYLIST_MODE, PropertyValue::String("single".into()))
            .unwrap();

        assert_eq!(
            *sent.lock(),
            vec![
                json!(["set_property", "loop-file", "no"]),
                json!(["set_property", "loop-playlist", "no"]),
                json!(["set_property", "keep-open", "always"]),
            ]
        );
        assert_eq!(
            events.try_recv(),
            Ok(EngineNotification::PropertyChanged {
                name: property::PLAYLIST_MODE.into(),
                value: json!("single"),
            })
        );

        assert!(engine
            .set_property(property::PLAYLIST_MODE, PropertyValue::String("sometimes".into()))
            .is_err());
        assert_eq!(sent.lock().len(), 3);
    }

    #[test]
    fn test_shuffle_is_applied_and_reported() {
        let (mut engine, sent, events) = scripted(true);
        engine.set_property(property::SHUFFLE, PropertyValue::Flag(true)).unwrap();
        engine.set_property(property::SHUFFLE, PropertyValue::Flag(false)).unwrap();

        assert_eq!(
            *sent.lock(),
            vec![json!(["playlist-shuffle"]), json!(["playlist-unshuffle"])]
        );
        let reported: Vec<_> = events.try_iter().collect();
        assert_eq!(
            reported,
            vec![
                EngineNotification::PropertyChanged {
                    name: property::SHUFFLE.into(),
                    value: json!(true),
                },
                EngineNotification::PropertyChanged {
                    name: property::SHUFFLE.into(),
                    value: json!(false),
                },
            ]
        );
    }

    #[test]
    fn test_playlist_commands() {
        let (mut engine, sent, _) = scripted(true);
        engine.playlist(PlaylistCommand::Move { from: 0, to: 2 }).unwrap();
        engine.playlist(PlaylistCommand::Remove(1)).unwrap();
        engine.seek(Duration::from_millis(1500)).unwrap();

        assert_eq!(
            *sent.lock(),
            vec![
                json!(["playlist-move", 0, 3]),
                json!(["playlist-remove", 1]),
                json!(["seek", 1.5, "absolute"]),
            ]
        );
    }

    #[test]
    fn test_screenshot_without_video_output() {
        let (mut engine, sent, _) = scripted(false);
        assert_eq!(engine.screenshot(ScreenshotFormat::Png, false).unwrap(), None);
        assert_eq!(*sent.lock(), vec![json!(["get_property", "vo-configured"])]);
    }
}
