//! mpv 进程选项

use std::path::{Path, PathBuf};
use std::time::Duration;

use kit_player::{LogLevel, PlayerConfiguration};
use serde::{Deserialize, Serialize};

/// 启动 mpv 的选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpvOptions {
    /// mpv 可执行文件
    pub binary: PathBuf,
    /// IPC socket 路径，缺省时在临时目录下生成
    pub socket_path: Option<PathBuf>,
    /// 追加在内置参数之后的命令行参数
    pub extra_args: Vec<String>,
    /// 把视频嵌入到这个原生窗口
    pub wid: Option<i64>,
    /// 视频输出驱动，例如 `null`
    pub vo: Option<String>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for MpvOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("mpv"),
            socket_path: None,
            extra_args: Vec::new(),
            wid: None,
            vo: None,
            connect_timeout_ms: 5000,
            request_timeout_ms: 5000,
        }
    }
}

impl MpvOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// 组装 mpv 命令行参数
    pub fn command_args(&self, config: &PlayerConfiguration, socket: &Path) -> Vec<String> {
        let mut args = vec![
            "--idle=yes".to_string(),
            format!("--input-ipc-server={}", socket.display()),
            "--no-terminal".to_string(),
            "--input-default-bindings=no".to_string(),
            "--keep-open=yes".to_string(),
            format!("--title={}", config.title),
            format!("--demuxer-max-bytes={}", config.buffer_size),
        ];
        if !config.protocol_whitelist.is_empty() {
            args.push(format!(
                "--demuxer-lavf-o=protocol_whitelist=[{}]",
                config.protocol_whitelist.join(",")
            ));
        }
        if config.log_level == LogLevel::None {
            args.push("--msg-level=all=no".to_string());
        }
        if let Some(wid) = self.wid {
            args.push(format!("--wid={}", wid));
            args.push("--force-window=immediate".to_string());
        }
        if let Some(vo) = &self.vo {
            args.push(format!("--vo={}", vo));
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_args() {
        let options = MpvOptions {
            wid: Some(0x1c00007),
            extra_args: vec!["--hwdec=auto".into()],
            ..Default::default()
        };
        let config = PlayerConfiguration {
            title: "demo".into(),
            protocol_whitelist: vec!["file".into(), "https".into()],
            ..Default::default()
        };
        let args = options.command_args(&config, Path::new("/tmp/kit.sock"));

        assert_eq!(args[0], "--idle=yes");
        assert!(args.contains(&"--input-ipc-server=/tmp/kit.sock".to_string()));
        assert!(args.contains(&"--title=demo".to_string()));
        assert!(args.contains(&"--demuxer-lavf-o=protocol_whitelist=[file,https]".to_string()));
        assert!(args.contains(&"--wid=29360135".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--hwdec=auto"));
    }

    #[test]
    fn test_partial_json() {
        let options: MpvOptions = serde_json::from_str(r#"{"vo": "null"}"#).unwrap();
        assert_eq!(options.vo.as_deref(), Some("null"));
        assert_eq!(options.binary, PathBuf::from("mpv"));
        assert_eq!(options.request_timeout(), Duration::from_secs(5));
    }
}
