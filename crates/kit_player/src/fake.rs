//! 测试用的脚本化引擎

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::engine::property;
use crate::{
    error_code, EngineError, EngineMedia, NativeEngine, Notifier, PlayerConfiguration,
    PlaylistCommand, PropertyValue, Screenshot, ScreenshotFormat,
};

pub(crate) const FAKE_HANDLE: i64 = 42;
pub(crate) const BROKEN_DEVICE: &str = "alsa/broken";

/// 记录收到的命令，并像真实引擎那样回报属性变化
pub(crate) struct FakeEngine {
    calls: Arc<Mutex<Vec<String>>>,
    notifier: Option<Notifier>,
    fail_init: bool,
    medias: Vec<EngineMedia>,
    index: usize,
}

impl FakeEngine {
    pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine = Self {
            calls: calls.clone(),
            notifier: None,
            fail_init: false,
            medias: Vec::new(),
            index: 0,
        };
        (engine, calls)
    }

    pub fn failing() -> Self {
        let (mut engine, _) = Self::new();
        engine.fail_init = true;
        engine
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn notify(&self, name: &str, value: serde_json::Value) {
        if let Some(notifier) = &self.notifier {
            notifier.property_changed(name, value);
        }
    }

    fn emit_playlist(&self) {
        let entries: Vec<_> = self
            .medias
            .iter()
            .enumerate()
            .map(|(i, m)| json!({"filename": m.uri, "current": i == self.index}))
            .collect();
        self.notify(property::PLAYLIST, json!(entries));
    }

    /// 模拟开始播放当前条目
    fn start_current(&self) {
        let Some(media) = self.medias.get(self.index) else {
            return;
        };
        if let Some(notifier) = &self.notifier {
            notifier.start_of_file();
        }
        self.notify(property::PLAYLIST_POS, json!(self.index));
        self.notify(property::DURATION, json!(10.0));
        self.notify(property::AUDIO_PARAMS, json!({"format": media.uri, "samplerate": 48000}));
        self.notify(property::TIME_POS, json!(0.0));
    }
}

impl NativeEngine for FakeEngine {
    fn initialize(
        &mut self,
        notifier: Notifier,
        _config: &PlayerConfiguration,
    ) -> Result<i64, EngineError> {
        self.record("initialize".into());
        if self.fail_init {
            return Err(EngineError::new(error_code::UNINITIALIZED, "no engine"));
        }
        self.notifier = Some(notifier);
        self.notify(
            property::AUDIO_DEVICE_LIST,
            json!([
                {"name": "auto", "description": "Autoselect device"},
                {"name": "alsa/hw0", "description": "Built-in"},
                {"name": BROKEN_DEVICE, "description": "Unplugged"}
            ]),
        );
        self.notify(property::AUDIO_DEVICE, json!("auto"));
        Ok(FAKE_HANDLE)
    }

    fn open(&mut self, medias: &[EngineMedia], index: usize, play: bool) -> Result<(), EngineError> {
        self.record(format!("open {} {} {}", medias.len(), index, play));
        self.medias = medias.to_vec();
        self.index = index;
        self.notify(property::PAUSE, json!(!play));
        self.emit_playlist();
        self.start_current();
        Ok(())
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.record("play".into());
        self.notify(property::PAUSE, json!(false));
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.record("pause".into());
        self.notify(property::PAUSE, json!(true));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.record("stop".into());
        self.medias.clear();
        self.index = 0;
        // 卸载文件后时间属性变为不可用
        for name in property::TIMING {
            self.notify(name, Value::Null);
        }
        self.emit_playlist();
        self.notify(property::PAUSE, json!(true));
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<(), EngineError> {
        self.record(format!("seek {}", position.as_secs_f64()));
        if self.medias.is_empty() {
            return Err(EngineError::new(error_code::PROPERTY_UNAVAILABLE, "nothing loaded"));
        }
        self.notify(property::TIME_POS, json!(position.as_secs_f64()));
        Ok(())
    }

    fn playlist(&mut self, command: PlaylistCommand) -> Result<(), EngineError> {
        self.record(format!("playlist {:?}", command));
        match command {
            PlaylistCommand::Next if self.index + 1 < self.medias.len() => {
                self.index += 1;
                self.start_current();
            }
            PlaylistCommand::Previous if self.index > 0 => {
                self.index -= 1;
                self.start_current();
            }
            PlaylistCommand::Jump(index) => {
                self.index = index;
                self.start_current();
            }
            PlaylistCommand::Add(media) => {
                self.medias.push(media);
                self.emit_playlist();
            }
            PlaylistCommand::Remove(index) => {
                self.medias.remove(index);
                self.emit_playlist();
            }
            PlaylistCommand::Move { from, to } => {
                let media = self.medias.remove(from);
                self.medias.insert(to, media);
                self.emit_playlist();
            }
            _ => {}
        }
        Ok(())
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), EngineError> {
        self.record(format!("set {} {}", name, value.to_arg()));
        if name == property::AUDIO_DEVICE && value == PropertyValue::String(BROKEN_DEVICE.into()) {
            return Err(EngineError::new(error_code::AO_INIT_FAILED, BROKEN_DEVICE));
        }
        let echoed = serde_json::to_value(&value).unwrap_or_default();
        self.notify(name, echoed);
        Ok(())
    }

    fn screenshot(
        &mut self,
        format: ScreenshotFormat,
        include_subtitles: bool,
    ) -> Result<Option<Screenshot>, EngineError> {
        self.record(format!("screenshot {:?} {}", format, include_subtitles));
        if self.medias.is_empty() {
            return Ok(None);
        }
        Ok(Some(Screenshot {
            format,
            width: 2,
            height: 2,
            bytes: vec![0; 16],
        }))
    }

    fn dispose(&mut self) {
        self.record("dispose".into());
        self.notifier = None;
    }
}
