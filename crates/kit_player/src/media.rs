//! 媒体与播放列表

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::PlayerError;

/// 单个媒体引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub uri: String,
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
    /// 调用方附带的任意数据，原样保留
    #[serde(default)]
    pub extras: Option<serde_json::Value>,
}

/// URI 来源分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSource {
    File,
    Asset,
    Network,
    Stream,
    Other,
}

const NETWORK_SCHEMES: &[&str] = &["http", "https", "ftp", "ftps", "sftp"];
const STREAM_SCHEMES: &[&str] = &[
    "rtmp", "rtmps", "rtsp", "rtsps", "rtp", "udp", "tcp", "srt", "mms", "mmsh", "hls",
];

impl Media {
    /// 创建媒体，裸绝对路径会被规范成 `file://` URI
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let uri = if is_bare_path(&uri) {
            format!("file://{}", uri)
        } else {
            uri
        };
        Self {
            uri,
            http_headers: BTreeMap::new(),
            extras: None,
        }
    }

    pub fn with_http_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.http_headers = headers;
        self
    }

    pub fn with_extras(mut self, extras: serde_json::Value) -> Self {
        self.extras = Some(extras);
        self
    }

    /// URI 的 scheme（小写），没有时返回 `None`
    pub fn scheme(&self) -> Option<String> {
        let (scheme, _) = self.uri.split_once("://")?;
        Some(scheme.to_ascii_lowercase())
    }

    pub fn source(&self) -> MediaSource {
        match self.scheme().as_deref() {
            Some("file") => MediaSource::File,
            Some("asset") => MediaSource::Asset,
            Some(s) if NETWORK_SCHEMES.contains(&s) => MediaSource::Network,
            Some(s) if STREAM_SCHEMES.contains(&s) => MediaSource::Stream,
            _ => MediaSource::Other,
        }
    }

    /// 交给引擎的地址
    ///
    /// `file://` 去掉前缀，`asset:///` 解析到 `asset_root` 下，其余原样返回。
    pub fn engine_uri(&self, asset_root: Option<&Path>) -> String {
        match self.source() {
            MediaSource::File => self.uri["file://".len()..].to_string(),
            MediaSource::Asset => {
                let relative = self.uri["asset://".len()..].trim_start_matches('/');
                match asset_root {
                    Some(root) => root.join(relative).to_string_lossy().into_owned(),
                    None => relative.to_string(),
                }
            }
            _ => self.uri.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.uri.trim().is_empty() {
            return Err(PlayerError::InvalidArgument("media uri is empty".into()));
        }
        if let Some((scheme, rest)) = self.uri.split_once("://") {
            let well_formed = scheme
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
            if !well_formed {
                return Err(PlayerError::InvalidArgument(format!(
                    "malformed uri scheme: {}",
                    self.uri
                )));
            }
            if rest.trim().is_empty() {
                return Err(PlayerError::InvalidArgument(format!(
                    "uri has no location: {}",
                    self.uri
                )));
            }
        }
        Ok(())
    }
}

fn is_bare_path(uri: &str) -> bool {
    if uri.contains("://") {
        return false;
    }
    if uri.starts_with('/') {
        return true;
    }
    // Windows 盘符路径
    let bytes = uri.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

impl From<&str> for Media {
    fn from(uri: &str) -> Self {
        Media::new(uri)
    }
}

impl From<String> for Media {
    fn from(uri: String) -> Self {
        Media::new(uri)
    }
}

/// 播放列表模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaylistMode {
    /// 顺序播放到列表末尾后停止
    #[default]
    None,
    /// 当前曲目播完后停止
    Single,
    /// 单曲循环
    Loop,
    /// 列表循环
    LoopPlaylist,
}

impl PlaylistMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaylistMode::None => "none",
            PlaylistMode::Single => "single",
            PlaylistMode::Loop => "loop",
            PlaylistMode::LoopPlaylist => "loop-playlist",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "none" => PlaylistMode::None,
            "single" => PlaylistMode::Single,
            "loop" => PlaylistMode::Loop,
            "loop-playlist" => PlaylistMode::LoopPlaylist,
            _ => return None,
        })
    }
}

/// 播放列表
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Playlist {
    pub medias: Vec<Media>,
    #[serde(default)]
    pub index: usize,
}

impl Playlist {
    pub fn new(medias: Vec<Media>) -> Self {
        Self { medias, index: 0 }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn current(&self) -> Option<&Media> {
        self.medias.get(self.index)
    }

    pub fn len(&self) -> usize {
        self.medias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.medias.is_empty()
    }

    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.medias.is_empty() {
            return Err(PlayerError::InvalidArgument("playlist is empty".into()));
        }
        if self.index >= self.medias.len() {
            return Err(PlayerError::InvalidArgument(format!(
                "playlist index {} out of range (len {})",
                self.index,
                self.medias.len()
            )));
        }
        self.medias.iter().try_for_each(Media::validate)
    }
}

/// 传给 `open` 的可播放对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Playable {
    Media(Media),
    Playlist(Playlist),
}

impl Playable {
    pub fn validate(&self) -> Result<(), PlayerError> {
        match self {
            Playable::Media(media) => media.validate(),
            Playable::Playlist(playlist) => playlist.validate(),
        }
    }

    pub fn into_playlist(self) -> Playlist {
        match self {
            Playable::Media(media) => Playlist::new(vec![media]),
            Playable::Playlist(playlist) => playlist,
        }
    }
}

impl From<Media> for Playable {
    fn from(media: Media) -> Self {
        Playable::Media(media)
    }
}

impl From<Playlist> for Playable {
    fn from(playlist: Playlist) -> Self {
        Playable::Playlist(playlist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_paths_become_file_uris() {
        assert_eq!(Media::new("/music/a.flac").uri, "file:///music/a.flac");
        assert_eq!(Media::new("C:\\music\\a.flac").uri, "file://C:\\music\\a.flac");
        assert_eq!(Media::new("https://x.org/a.mp3").uri, "https://x.org/a.mp3");
    }

    #[test]
    fn test_engine_uri() {
        let root = Path::new("/opt/app/assets");
        assert_eq!(Media::new("/music/a.flac").engine_uri(None), "/music/a.flac");
        assert_eq!(
            Media::new("asset:///videos/intro.mp4").engine_uri(Some(root)),
            "/opt/app/assets/videos/intro.mp4"
        );
        assert_eq!(
            Media::new("rtsp://cam.local/live").engine_uri(Some(root)),
            "rtsp://cam.local/live"
        );
    }

    #[test]
    fn test_sources() {
        assert_eq!(Media::new("/a.mp3").source(), MediaSource::File);
        assert_eq!(Media::new("asset:///a.mp3").source(), MediaSource::Asset);
        assert_eq!(Media::new("HTTPS://x.org/a.m3u8").source(), MediaSource::Network);
        assert_eq!(Media::new("rtmp://live/stream").source(), MediaSource::Stream);
        assert_eq!(Media::new("data:audio/wav;base64,AAAA").source(), MediaSource::Other);
    }

    #[test]
    fn test_validation() {
        assert!(Media::new("  ").validate().is_err());
        assert!(Media::new("1http://x").validate().is_err());
        assert!(Media::new("http://").validate().is_err());
        assert!(Media::new("https://x.org/a.mp3").validate().is_ok());

        assert!(Playlist::new(vec![]).validate().is_err());
        assert!(Playlist::new(vec![Media::new("/a.mp3")])
            .with_index(1)
            .validate()
            .is_err());
        assert!(Playable::from(Media::new("/a.mp3")).validate().is_ok());
    }

    #[test]
    fn test_playable_json() {
        let playable: Playable = serde_json::from_str(
            r#"{"type":"playlist","medias":[{"uri":"https://x.org/a.mp3"},{"uri":"asset:///b.mp3"}],"index":1}"#,
        )
        .unwrap();
        let playlist = playable.into_playlist();
        assert_eq!(playlist.len(), 2);
        assert_eq!(playlist.current().unwrap().uri, "asset:///b.mp3");
        assert_eq!(PlaylistMode::parse("loop-playlist"), Some(PlaylistMode::LoopPlaylist));
    }
}
