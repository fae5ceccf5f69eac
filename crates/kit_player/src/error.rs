//! 错误定义

/// 播放器错误
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PlayerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Engine error: {}", describe_engine_failure(*.code, .message))]
    Engine { code: i32, message: String },

    #[error("Player has been disposed")]
    Disposed,

    #[error("Player is not initialized")]
    Uninitialized,
}

impl From<EngineError> for PlayerError {
    fn from(e: EngineError) -> Self {
        PlayerError::Engine {
            code: e.code,
            message: e.message,
        }
    }
}

/// 引擎适配器返回的错误
///
/// `code` 沿用 libmpv 的负数错误码。
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", describe_engine_failure(*.code, .message))]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// 通用错误（MPV_ERROR_GENERIC）
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(error_code::GENERIC, message)
    }
}

/// libmpv 错误码
pub mod error_code {
    pub const SUCCESS: i32 = 0;
    pub const EVENT_QUEUE_FULL: i32 = -1;
    pub const NOMEM: i32 = -2;
    pub const UNINITIALIZED: i32 = -3;
    pub const INVALID_PARAMETER: i32 = -4;
    pub const OPTION_NOT_FOUND: i32 = -5;
    pub const OPTION_FORMAT: i32 = -6;
    pub const OPTION_ERROR: i32 = -7;
    pub const PROPERTY_NOT_FOUND: i32 = -8;
    pub const PROPERTY_FORMAT: i32 = -9;
    pub const PROPERTY_UNAVAILABLE: i32 = -10;
    pub const PROPERTY_ERROR: i32 = -11;
    pub const COMMAND: i32 = -12;
    pub const LOADING_FAILED: i32 = -13;
    pub const AO_INIT_FAILED: i32 = -14;
    pub const VO_INIT_FAILED: i32 = -15;
    pub const NOTHING_TO_PLAY: i32 = -16;
    pub const UNKNOWN_FORMAT: i32 = -17;
    pub const UNSUPPORTED: i32 = -18;
    pub const NOT_IMPLEMENTED: i32 = -19;
    pub const GENERIC: i32 = -20;
}

/// 错误码对应的可读描述
pub fn describe_error(code: i32) -> &'static str {
    use error_code::*;
    match code {
        SUCCESS => "success",
        EVENT_QUEUE_FULL => "event queue full",
        NOMEM => "memory allocation failed",
        UNINITIALIZED => "core not initialized",
        INVALID_PARAMETER => "invalid parameter",
        OPTION_NOT_FOUND => "option not found",
        OPTION_FORMAT => "unsupported format for accessing option",
        OPTION_ERROR => "error setting option",
        PROPERTY_NOT_FOUND => "property not found",
        PROPERTY_FORMAT => "unsupported format for accessing property",
        PROPERTY_UNAVAILABLE => "property unavailable",
        PROPERTY_ERROR => "error accessing property",
        COMMAND => "error running command",
        LOADING_FAILED => "loading failed",
        AO_INIT_FAILED => "audio output initialization failed",
        VO_INIT_FAILED => "video output initialization failed",
        NOTHING_TO_PLAY => "no audio or video data played",
        UNKNOWN_FORMAT => "unrecognized file format",
        UNSUPPORTED => "not supported",
        NOT_IMPLEMENTED => "operation not implemented",
        _ => "something happened",
    }
}

/// 根据描述反查错误码，找不到时返回 GENERIC
pub fn error_code_for(description: &str) -> i32 {
    (error_code::GENERIC..=error_code::SUCCESS)
        .find(|code| describe_error(*code).eq_ignore_ascii_case(description.trim()))
        .unwrap_or(error_code::GENERIC)
}

/// 面向用户的错误字符串
pub fn describe_engine_failure(code: i32, message: &str) -> String {
    let description = describe_error(code);
    let message = message.trim();
    if message.is_empty() || message.eq_ignore_ascii_case(description) {
        description.to_string()
    } else {
        format!("{}: {}", description, message)
    }
}

/// 配置错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_engine_failure() {
        assert_eq!(
            describe_engine_failure(error_code::LOADING_FAILED, "http 404"),
            "loading failed: http 404"
        );
        assert_eq!(
            describe_engine_failure(error_code::LOADING_FAILED, "loading failed"),
            "loading failed"
        );
        assert_eq!(describe_engine_failure(-999, ""), "something happened");
    }

    #[test]
    fn test_error_code_lookup() {
        assert_eq!(error_code_for("unrecognized file format"), error_code::UNKNOWN_FORMAT);
        assert_eq!(error_code_for(" Loading Failed "), error_code::LOADING_FAILED);
        assert_eq!(error_code_for("no idea"), error_code::GENERIC);
    }

    #[test]
    fn test_engine_error_into_player_error() {
        let err: PlayerError = EngineError::new(error_code::AO_INIT_FAILED, "no sink").into();
        assert_eq!(
            err.to_string(),
            "Engine error: audio output initialization failed: no sink"
        );
    }
}
