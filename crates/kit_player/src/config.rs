//! 播放器配置

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// 引擎日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Fatal,
    #[default]
    Error,
    Warn,
    Info,
    V,
    Debug,
    Trace,
}

impl LogLevel {
    /// 引擎使用的级别名
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::None => "no",
            LogLevel::Fatal => "fatal",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::V => "v",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// 解析引擎日志里的级别名
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "no" | "none" => LogLevel::None,
            "fatal" => LogLevel::Fatal,
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "v" | "status" => LogLevel::V,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => return None,
        })
    }

    /// 对应的 `log` 级别，`None` 表示不输出
    pub fn to_log(self) -> Option<log::Level> {
        match self {
            LogLevel::None => None,
            LogLevel::Fatal | LogLevel::Error => Some(log::Level::Error),
            LogLevel::Warn => Some(log::Level::Warn),
            LogLevel::Info => Some(log::Level::Info),
            LogLevel::V | LogLevel::Debug => Some(log::Level::Debug),
            LogLevel::Trace => Some(log::Level::Trace),
        }
    }
}

/// 播放器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfiguration {
    /// 传给引擎的窗口/应用标题
    pub title: String,
    pub log_level: LogLevel,
    /// 解复用缓存大小（字节）
    pub buffer_size: u64,
    /// 是否允许 `set_pitch`
    pub pitch: bool,
    pub protocol_whitelist: Vec<String>,
    /// `asset:///` URI 的根目录
    pub asset_root: Option<PathBuf>,
    /// 命令通道容量
    pub command_capacity: usize,
    /// 引擎通知通道容量
    pub notification_capacity: usize,
}

impl Default for PlayerConfiguration {
    fn default() -> Self {
        Self {
            title: "kit".to_string(),
            log_level: LogLevel::default(),
            buffer_size: 32 * 1024 * 1024,
            pitch: false,
            protocol_whitelist: ["udp", "rtp", "tcp", "tls", "data", "file", "http", "https", "crypto"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            asset_root: None,
            command_capacity: 32,
            notification_capacity: 256,
        }
    }
}

impl PlayerConfiguration {
    /// 从 JSON 字符串读取，缺省字段取默认值
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件读取
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be greater than zero"));
        }
        if self.command_capacity == 0 {
            return Err(ConfigError::Invalid("command_capacity must be greater than zero"));
        }
        if self.notification_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notification_capacity must be greater than zero",
            ));
        }
        Ok(())
    }
}
