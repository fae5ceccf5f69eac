//! 播放器 API
//!
//! 每个操作都被送到该播放器唯一的命令线程，按发出顺序调用引擎适配器，
//! 适配器返回后操作即完成。状态变化随后经多路复用器写入快照，
//! 需要等待实际效果的调用方应订阅对应的事件流。

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::engine::property;
use crate::multiplexer::{MediaRegistry, Multiplexer};
use crate::store::StateStore;
use crate::{
    error_code, AudioDevice, EngineError, EngineMedia, Media, NativeEngine, Notifier, Playable,
    PlayerConfiguration, PlayerError, PlayerState, PlayerStream, Playlist, PlaylistCommand,
    PlaylistMode, PropertyValue, Screenshot, ScreenshotFormat, TrackInfo,
};

/// 播放器生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// 引擎尚未完成初始化
    Uninitialized,
    Idle,
    /// 已打开媒体但未开始播放
    Ready,
    Playing,
    Paused,
    Disposed,
}

#[derive(Debug, Clone, Copy)]
enum Transition {
    Open { play: bool },
    Play,
    Pause,
    Stop,
}

impl Lifecycle {
    fn after(self, transition: Transition) -> Lifecycle {
        use Lifecycle::*;
        match (self, transition) {
            (Uninitialized | Disposed, _) => self,
            (_, Transition::Open { play: true }) => Playing,
            (_, Transition::Open { play: false }) => Ready,
            (_, Transition::Stop) => Idle,
            (Idle, _) => Idle,
            (_, Transition::Play) => Playing,
            (_, Transition::Pause) => Paused,
        }
    }
}

enum EngineCommand {
    Open {
        playlist: Playlist,
        medias: Vec<EngineMedia>,
        play: bool,
    },
    Play {
        restart: bool,
    },
    Pause,
    Stop,
    Seek(Duration),
    Add {
        media: Media,
        engine_media: EngineMedia,
    },
    Playlist(PlaylistCommand),
    SetProperty {
        name: &'static str,
        value: PropertyValue,
    },
}

impl EngineCommand {
    fn transition(&self) -> Option<Transition> {
        match self {
            EngineCommand::Open { play, .. } => Some(Transition::Open { play: *play }),
            EngineCommand::Play { .. } => Some(Transition::Play),
            EngineCommand::Pause => Some(Transition::Pause),
            EngineCommand::Stop => Some(Transition::Stop),
            _ => None,
        }
    }
}

enum Request {
    Command {
        command: EngineCommand,
        reply: Sender<Result<(), PlayerError>>,
    },
    Screenshot {
        format: ScreenshotFormat,
        include_subtitles: bool,
        reply: Sender<Result<Option<Screenshot>, PlayerError>>,
    },
    Shutdown {
        reply: Sender<()>,
    },
}

impl Request {
    fn reject(self, error: PlayerError) {
        match self {
            Request::Command { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Request::Screenshot { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Request::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

struct Status {
    lifecycle: Lifecycle,
    init_error: Option<PlayerError>,
    handle: Option<i64>,
}

struct Shared {
    config: PlayerConfiguration,
    store: Arc<StateStore>,
    registry: Arc<MediaRegistry>,
    notifier: Notifier,
    status: Mutex<Status>,
    status_changed: Condvar,
}

impl Shared {
    fn lifecycle(&self) -> Lifecycle {
        self.status.lock().lifecycle
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        let mut status = self.status.lock();
        status.lifecycle = lifecycle;
        self.status_changed.notify_all();
    }

    fn advance(&self, transition: Transition) {
        let mut status = self.status.lock();
        let next = status.lifecycle.after(transition);
        if next != status.lifecycle {
            log::debug!("lifecycle {:?} -> {:?}", status.lifecycle, next);
            status.lifecycle = next;
            self.status_changed.notify_all();
        }
    }

    fn initialized(&self, handle: i64) {
        let mut status = self.status.lock();
        status.handle = Some(handle);
        if status.lifecycle == Lifecycle::Uninitialized {
            status.lifecycle = Lifecycle::Idle;
        }
        self.status_changed.notify_all();
    }

    fn initialization_failed(&self, error: PlayerError) {
        let mut status = self.status.lock();
        status.init_error = Some(error);
        self.status_changed.notify_all();
    }

    /// 引擎错误同时发到错误流
    fn report(&self, error: EngineError) -> PlayerError {
        log::warn!("engine command failed: {}", error);
        self.notifier.error_occurred(error.code, error.message.clone());
        error.into()
    }

    fn execute(&self, engine: &mut dyn NativeEngine, command: EngineCommand) -> Result<(), PlayerError> {
        let transition = command.transition();
        let result = match command {
            EngineCommand::Open {
                playlist,
                medias,
                play,
            } => {
                self.registry.replace_all(
                    medias
                        .iter()
                        .map(|m| m.uri.clone())
                        .zip(playlist.medias.iter().cloned()),
                );
                engine.open(&medias, playlist.index, play)
            }
            EngineCommand::Play { restart } => {
                // 播放结束后再次播放从头开始
                let rewound = if restart {
                    engine.seek(Duration::ZERO)
                } else {
                    Ok(())
                };
                rewound.and_then(|_| engine.play())
            }
            EngineCommand::Pause => engine.pause(),
            EngineCommand::Stop => engine.stop(),
            EngineCommand::Seek(position) => engine.seek(position),
            EngineCommand::Add {
                media,
                engine_media,
            } => {
                self.registry.register(engine_media.uri.clone(), media);
                engine.playlist(PlaylistCommand::Add(engine_media))
            }
            EngineCommand::Playlist(command) => engine.playlist(command),
            EngineCommand::SetProperty { name, value } => engine.set_property(name, value),
        };

        match result {
            Ok(()) => {
                if let Some(transition) = transition {
                    self.advance(transition);
                }
                Ok(())
            }
            Err(e) => Err(self.report(e)),
        }
    }
}

fn run_engine(mut engine: Box<dyn NativeEngine>, requests: Receiver<Request>, shared: Arc<Shared>) {
    let initialized = match engine.initialize(shared.notifier.clone(), &shared.config) {
        Ok(handle) => {
            log::debug!("engine initialized, handle {}", handle);
            shared.initialized(handle);
            true
        }
        Err(e) => {
            log::error!("engine initialization failed: {}", e);
            shared.notifier.error_occurred(e.code, e.message.clone());
            shared.initialization_failed(PlayerError::from(e));
            false
        }
    };

    for request in requests.iter() {
        match request {
            Request::Command { command, reply } => {
                let result = if initialized {
                    shared.execute(engine.as_mut(), command)
                } else {
                    Err(PlayerError::Uninitialized)
                };
                let _ = reply.send(result);
            }
            Request::Screenshot {
                format,
                include_subtitles,
                reply,
            } => {
                let result = if initialized {
                    engine
                        .screenshot(format, include_subtitles)
                        .map_err(|e| shared.report(e))
                } else {
                    Err(PlayerError::Uninitialized)
                };
                let _ = reply.send(result);
            }
            Request::Shutdown { reply } => {
                engine.dispose();
                for pending in requests.try_iter() {
                    pending.reject(PlayerError::Disposed);
                }
                let _ = reply.send(());
                return;
            }
        }
    }
    engine.dispose();
}

struct Workers {
    engine: JoinHandle<()>,
    multiplexer: JoinHandle<()>,
    shutdown: Sender<()>,
}

/// 播放器
///
/// 引擎适配器由调用方注入；`Drop` 时自动销毁。
pub struct Player {
    shared: Arc<Shared>,
    commands: Mutex<Option<Sender<Request>>>,
    workers: Mutex<Option<Workers>>,
}

impl Player {
    /// 创建播放器并在后台初始化引擎
    pub fn new(engine: Box<dyn NativeEngine>, config: PlayerConfiguration) -> Result<Self, PlayerError> {
        config
            .validate()
            .map_err(|e| PlayerError::InvalidArgument(e.to_string()))?;

        let (cmd_tx, cmd_rx) = bounded(config.command_capacity);
        let (notify_tx, notify_rx) = bounded(config.notification_capacity);
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let store = Arc::new(StateStore::new());
        let registry = Arc::new(MediaRegistry::new());
        let shared = Arc::new(Shared {
            config,
            store: store.clone(),
            registry: registry.clone(),
            notifier: Notifier::new(notify_tx),
            status: Mutex::new(Status {
                lifecycle: Lifecycle::Uninitialized,
                init_error: None,
                handle: None,
            }),
            status_changed: Condvar::new(),
        });

        let multiplexer = Multiplexer::new(store, registry);
        let multiplexer = thread::spawn(move || multiplexer.run(notify_rx, shutdown_rx));

        let engine_shared = shared.clone();
        let engine = thread::spawn(move || run_engine(engine, cmd_rx, engine_shared));

        Ok(Self {
            shared,
            commands: Mutex::new(Some(cmd_tx)),
            workers: Mutex::new(Some(Workers {
                engine,
                multiplexer,
                shutdown: shutdown_tx,
            })),
        })
    }

    /// 当前状态快照；销毁后返回销毁前的最后一个快照
    pub fn state(&self) -> Arc<PlayerState> {
        self.shared.store.state()
    }

    pub fn stream(&self) -> &PlayerStream {
        self.shared.store.stream()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    pub fn configuration(&self) -> &PlayerConfiguration {
        &self.shared.config
    }

    /// 阻塞直到引擎初始化完成
    pub fn wait_for_initialization(&self) -> Result<(), PlayerError> {
        let mut status = self.shared.status.lock();
        loop {
            if let Some(error) = &status.init_error {
                return Err(error.clone());
            }
            match status.lifecycle {
                Lifecycle::Uninitialized => self.shared.status_changed.wait(&mut status),
                Lifecycle::Disposed => return Err(PlayerError::Disposed),
                _ => return Ok(()),
            }
        }
    }

    /// 引擎实例的平台句柄，仅用于传给其它原生集成
    pub fn handle(&self) -> Result<i64, PlayerError> {
        self.wait_for_initialization()?;
        self.shared
            .status
            .lock()
            .handle
            .ok_or(PlayerError::Uninitialized)
    }

    /// 打开媒体或播放列表，替换当前整个播放列表
    pub fn open(&self, playable: impl Into<Playable>, play: bool) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        let playable = playable.into();
        playable.validate()?;
        let playlist = playable.into_playlist();
        let medias = playlist.medias.iter().map(|m| self.engine_media(m)).collect();
        self.execute(EngineCommand::Open {
            playlist,
            medias,
            play,
        })
    }

    pub fn play(&self) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        let restart = self.state().completed;
        self.execute(EngineCommand::Play { restart })
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        self.execute(EngineCommand::Pause)
    }

    pub fn play_or_pause(&self) -> Result<(), PlayerError> {
        if self.state().playing {
            self.pause()
        } else {
            self.play()
        }
    }

    /// 停止播放并清空播放列表，引擎保持可用
    pub fn stop(&self) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        self.execute(EngineCommand::Stop)
    }

    pub fn seek(&self, position: Duration) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        self.execute(EngineCommand::Seek(position))
    }

    pub fn next(&self) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        self.execute(EngineCommand::Playlist(PlaylistCommand::Next))
    }

    pub fn previous(&self) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        self.execute(EngineCommand::Playlist(PlaylistCommand::Previous))
    }

    pub fn jump(&self, index: usize) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        self.check_index(index)?;
        self.execute(EngineCommand::Playlist(PlaylistCommand::Jump(index)))
    }

    pub fn add(&self, media: Media) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        media.validate()?;
        let engine_media = self.engine_media(&media);
        self.execute(EngineCommand::Add {
            media,
            engine_media,
        })
    }

    pub fn remove(&self, index: usize) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        self.check_index(index)?;
        self.execute(EngineCommand::Playlist(PlaylistCommand::Remove(index)))
    }

    pub fn move_media(&self, from: usize, to: usize) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }
        self.execute(EngineCommand::Playlist(PlaylistCommand::Move { from, to }))
    }

    pub fn set_playlist_mode(&self, mode: PlaylistMode) -> Result<(), PlayerError> {
        self.set_property(
            property::PLAYLIST_MODE,
            PropertyValue::String(mode.as_str().to_string()),
        )
    }

    pub fn set_shuffle(&self, shuffle: bool) -> Result<(), PlayerError> {
        self.set_property(property::SHUFFLE, PropertyValue::Flag(shuffle))
    }

    /// 音量，范围 0..=100
    pub fn set_volume(&self, volume: f64) -> Result<(), PlayerError> {
        if !volume.is_finite() || !(0.0..=100.0).contains(&volume) {
            return Err(PlayerError::InvalidArgument(format!(
                "volume must be within 0..=100, got {}",
                volume
            )));
        }
        self.set_property(property::VOLUME, PropertyValue::Double(volume))
    }

    pub fn set_rate(&self, rate: f64) -> Result<(), PlayerError> {
        check_positive("rate", rate)?;
        self.set_property(property::SPEED, PropertyValue::Double(rate))
    }

    /// 需要在配置中开启 `pitch`
    pub fn set_pitch(&self, pitch: f64) -> Result<(), PlayerError> {
        if !self.shared.config.pitch {
            return Err(PlayerError::InvalidArgument(
                "pitch shifting is disabled in PlayerConfiguration".into(),
            ));
        }
        check_positive("pitch", pitch)?;
        self.set_property(property::PITCH, PropertyValue::Double(pitch))
    }

    /// 切换音频输出设备
    ///
    /// 设备列表非空时只接受列表中的设备，否则拒绝并在错误流上报告。
    pub fn set_audio_device(&self, device: &AudioDevice) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        let state = self.state();
        if !state.audio_devices.is_empty()
            && !state.audio_devices.iter().any(|d| d.name == device.name)
        {
            let message = format!("audio device not available: {}", device.name);
            self.shared
                .notifier
                .error_occurred(error_code::INVALID_PARAMETER, message.clone());
            return Err(PlayerError::InvalidArgument(message));
        }
        self.set_property(
            property::AUDIO_DEVICE,
            PropertyValue::String(device.name.clone()),
        )
    }

    pub fn set_video_track(&self, track: &TrackInfo) -> Result<(), PlayerError> {
        self.check_track(&self.state().tracks.video, track)?;
        self.set_property(property::VID, PropertyValue::String(track.id.clone()))
    }

    pub fn set_audio_track(&self, track: &TrackInfo) -> Result<(), PlayerError> {
        self.check_track(&self.state().tracks.audio, track)?;
        self.set_property(property::AID, PropertyValue::String(track.id.clone()))
    }

    pub fn set_subtitle_track(&self, track: &TrackInfo) -> Result<(), PlayerError> {
        self.check_track(&self.state().tracks.subtitle, track)?;
        self.set_property(property::SID, PropertyValue::String(track.id.clone()))
    }

    /// 截取当前帧；还没有可用帧时返回 `Ok(None)`
    pub fn screenshot(
        &self,
        format: ScreenshotFormat,
        include_subtitles: bool,
    ) -> Result<Option<Screenshot>, PlayerError> {
        self.ensure_alive()?;
        let (reply_tx, reply_rx) = bounded(1);
        self.send(Request::Screenshot {
            format,
            include_subtitles,
            reply: reply_tx,
        })?;
        reply_rx.recv().map_err(|_| PlayerError::Disposed)?
    }

    /// 销毁播放器，可重复调用
    ///
    /// 等待已排队的命令完成后释放引擎，随后所有事件流结束。
    pub fn dispose(&self) {
        let Some(commands) = self.commands.lock().take() else {
            return;
        };
        self.shared.set_lifecycle(Lifecycle::Disposed);

        let (reply_tx, reply_rx) = bounded(1);
        if commands.send(Request::Shutdown { reply: reply_tx }).is_ok() {
            let _ = reply_rx.recv();
        }
        drop(commands);

        if let Some(workers) = self.workers.lock().take() {
            let _ = workers.engine.join();
            self.shared.store.close();
            let _ = workers.shutdown.send(());
            let _ = workers.multiplexer.join();
        }
        log::debug!("player disposed");
    }

    fn set_property(&self, name: &'static str, value: PropertyValue) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        self.execute(EngineCommand::SetProperty { name, value })
    }

    fn engine_media(&self, media: &Media) -> EngineMedia {
        EngineMedia {
            uri: media.engine_uri(self.shared.config.asset_root.as_deref()),
            http_headers: media.http_headers.clone(),
        }
    }

    fn ensure_alive(&self) -> Result<(), PlayerError> {
        match self.lifecycle() {
            Lifecycle::Disposed => Err(PlayerError::Disposed),
            _ => Ok(()),
        }
    }

    fn check_index(&self, index: usize) -> Result<(), PlayerError> {
        let len = self.state().playlist.len();
        if index >= len {
            return Err(PlayerError::InvalidArgument(format!(
                "playlist index {} out of range (len {})",
                index, len
            )));
        }
        Ok(())
    }

    fn check_track(&self, available: &[TrackInfo], track: &TrackInfo) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        if available.iter().any(|t| t.id == track.id) {
            Ok(())
        } else {
            Err(PlayerError::InvalidArgument(format!(
                "unknown track: {}",
                track.id
            )))
        }
    }

    fn execute(&self, command: EngineCommand) -> Result<(), PlayerError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(Request::Command {
            command,
            reply: reply_tx,
        })?;
        reply_rx.recv().map_err(|_| PlayerError::Disposed)?
    }

    fn send(&self, request: Request) -> Result<(), PlayerError> {
        // 只在锁内克隆发送端，等待回复前释放，销毁时通道才能断开
        let commands = self.commands.lock().clone().ok_or(PlayerError::Disposed)?;
        commands.send(request).map_err(|_| PlayerError::Disposed)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn check_positive(what: &str, value: f64) -> Result<(), PlayerError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PlayerError::InvalidArgument(format!(
            "{} must be a positive number, got {}",
            what, value
        )))
    }
}
