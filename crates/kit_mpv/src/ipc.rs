//! mpv JSON IPC
//!
//! 每行一个 JSON 对象。请求带 `request_id`，mpv 用同样的 id 回应；
//! 其余消息都是事件，由读线程转交给回调。

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::IpcError;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Message {
    Response {
        request_id: u64,
        error: String,
        #[serde(default)]
        data: Value,
    },
    Event {
        event: String,
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
}

/// mpv 事件
#[derive(Debug, Clone, PartialEq)]
pub enum MpvEvent {
    PropertyChange { name: String, data: Value },
    StartFile,
    EndFile { reason: String, error: Option<String> },
    LogMessage { prefix: String, level: String, text: String },
    Shutdown,
    Other(String),
}

impl MpvEvent {
    fn from_fields(event: &str, mut fields: Map<String, Value>) -> Self {
        match event {
            "property-change" => MpvEvent::PropertyChange {
                name: take_string(&mut fields, "name").unwrap_or_default(),
                data: fields.remove("data").unwrap_or(Value::Null),
            },
            "start-file" => MpvEvent::StartFile,
            "end-file" => MpvEvent::EndFile {
                reason: take_string(&mut fields, "reason").unwrap_or_default(),
                error: take_string(&mut fields, "file_error"),
            },
            "log-message" => MpvEvent::LogMessage {
                prefix: take_string(&mut fields, "prefix").unwrap_or_default(),
                level: take_string(&mut fields, "level").unwrap_or_default(),
                text: take_string(&mut fields, "text").unwrap_or_default(),
            },
            "shutdown" => MpvEvent::Shutdown,
            other => MpvEvent::Other(other.to_string()),
        }
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

type Reply = Result<Value, String>;
type Pending = Arc<Mutex<Option<HashMap<u64, Sender<Reply>>>>>;

/// IPC 客户端
///
/// 请求可以来自任意线程；读线程在连接断开时退出，所有未完成的请求随之失败。
pub struct IpcClient {
    writer: Mutex<Box<dyn Write + Send>>,
    pending: Pending,
    next_id: AtomicU64,
    timeout: Duration,
    closer: Box<dyn Fn() + Send + Sync>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl IpcClient {
    /// 在给定的读写两端上建立客户端
    pub fn new<R, W, C, F>(reader: R, writer: W, closer: C, timeout: Duration, on_event: F) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
        C: Fn() + Send + Sync + 'static,
        F: FnMut(MpvEvent) + Send + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let reader_pending = pending.clone();
        let reader = thread::spawn(move || read_loop(BufReader::new(reader), reader_pending, on_event));
        Self {
            writer: Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            timeout,
            closer: Box::new(closer),
            reader: Mutex::new(Some(reader)),
        }
    }

    /// 连接 mpv 的 Unix socket，mpv 刚启动时 socket 可能还不存在
    #[cfg(unix)]
    pub fn connect<F>(
        path: &Path,
        connect_timeout: Duration,
        timeout: Duration,
        on_event: F,
    ) -> Result<Self, IpcError>
    where
        F: FnMut(MpvEvent) + Send + 'static,
    {
        use std::os::unix::net::UnixStream;

        const RETRY_INTERVAL: Duration = Duration::from_millis(100);

        let attempts = (connect_timeout.as_millis() / RETRY_INTERVAL.as_millis()).max(1);
        let mut stream = None;
        for _ in 0..attempts {
            match UnixStream::connect(path) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => thread::sleep(RETRY_INTERVAL),
            }
        }
        let stream = stream.ok_or_else(|| IpcError::ConnectTimeout(path.to_path_buf()))?;
        log::debug!("connected to mpv socket {}", path.display());

        let reader = stream.try_clone()?;
        let closer = stream.try_clone()?;
        Ok(Self::new(
            reader,
            stream,
            move || {
                let _ = closer.shutdown(std::net::Shutdown::Both);
            },
            timeout,
            on_event,
        ))
    }

    #[cfg(not(unix))]
    pub fn connect<F>(
        _path: &Path,
        _connect_timeout: Duration,
        _timeout: Duration,
        _on_event: F,
    ) -> Result<Self, IpcError>
    where
        F: FnMut(MpvEvent) + Send + 'static,
    {
        Err(IpcError::Unsupported)
    }

    /// 发送命令并等待回应
    pub fn command(&self, args: Vec<Value>) -> Result<Value, IpcError> {
        let name = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(1);
        match self.pending.lock().as_mut() {
            Some(pending) => {
                pending.insert(id, tx);
            }
            None => return Err(IpcError::Closed),
        }

        let mut line = serde_json::to_string(&json!({ "command": args, "request_id": id }))?;
        line.push('\n');
        let written = {
            let mut writer = self.writer.lock();
            writer.write_all(line.as_bytes()).and_then(|_| writer.flush())
        };
        if let Err(e) = written {
            self.forget(id);
            return Err(e.into());
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(error)) => Err(IpcError::Command {
                command: name,
                error,
            }),
            Err(RecvTimeoutError::Timeout) => {
                self.forget(id);
                Err(IpcError::Timeout(name))
            }
            Err(RecvTimeoutError::Disconnected) => Err(IpcError::Closed),
        }
    }

    pub fn get_property(&self, name: &str) -> Result<Value, IpcError> {
        self.command(vec![json!("get_property"), json!(name)])
    }

    pub fn set_property(&self, name: &str, value: Value) -> Result<(), IpcError> {
        self.command(vec![json!("set_property"), json!(name), value])
            .map(|_| ())
    }

    /// 断开连接并等待读线程退出
    pub fn close(&self) {
        (self.closer)();
        if let Some(reader) = self.reader.lock().take() {
            let _ = reader.join();
        }
    }

    fn forget(&self, id: u64) {
        if let Some(pending) = self.pending.lock().as_mut() {
            pending.remove(&id);
        }
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop<R, F>(reader: R, pending: Pending, mut on_event: F)
where
    R: BufRead,
    F: FnMut(MpvEvent),
{
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::debug!("mpv IPC read error: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(&line) {
            Ok(Message::Response {
                request_id,
                error,
                data,
            }) => {
                let waiter = pending.lock().as_mut().and_then(|p| p.remove(&request_id));
                if let Some(tx) = waiter {
                    let reply = if error == "success" { Ok(data) } else { Err(error) };
                    let _ = tx.send(reply);
                }
            }
            Ok(Message::Event { event, fields }) => on_event(MpvEvent::from_fields(&event, fields)),
            Err(e) => log::warn!("ignoring malformed mpv message: {}", e),
        }
    }
    // 丢弃等待者，正在等待的请求得到 Closed
    pending.lock().take();
    log::debug!("mpv IPC reader stopped");
}
