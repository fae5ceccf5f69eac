//! 错误定义

use std::path::PathBuf;

use kit_player::{error_code, error_code_for, EngineError};

/// IPC 错误
#[derive(thiserror::Error, Debug)]
pub enum IpcError {
    #[error("Failed to spawn mpv: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Timed out connecting to mpv socket {}", .0.display())]
    ConnectTimeout(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("mpv command {command} failed: {error}")]
    Command { command: String, error: String },

    #[error("Timed out waiting for mpv to answer {0}")]
    Timeout(String),

    #[error("mpv IPC connection closed")]
    Closed,

    #[error("mpv IPC is not supported on this platform")]
    Unsupported,

    #[error("Invalid image: {0}")]
    Image(String),
}

impl From<png::DecodingError> for IpcError {
    fn from(e: png::DecodingError) -> Self {
        IpcError::Image(e.to_string())
    }
}

impl From<IpcError> for EngineError {
    fn from(e: IpcError) -> Self {
        match e {
            // mpv 的错误字符串与 libmpv 的错误描述一致
            IpcError::Command { command, error } => EngineError::new(error_code_for(&error), command),
            IpcError::Spawn(_) | IpcError::ConnectTimeout(_) | IpcError::Closed => {
                EngineError::new(error_code::UNINITIALIZED, e.to_string())
            }
            IpcError::Unsupported => EngineError::new(error_code::UNSUPPORTED, e.to_string()),
            _ => EngineError::generic(e.to_string()),
        }
    }
}
