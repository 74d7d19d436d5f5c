//! JSON configuration loading
//!
//! Unknown keys are ignored, malformed stream entries are skipped with a
//! warning, and an empty stream set after filtering is fatal.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_HTTP_PORT: u16 = 8090;
pub const DEFAULT_PRE_BUFFERING: f32 = 5.0;
pub const DEFAULT_POST_BUFFERING: f32 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON parse error in config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no valid streams found in config")]
    NoStreams,

    #[error("cannot create recordings folder {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One configured camera; immutable after load.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub id: String,
    pub url: String,
}

/// On-disk shape; stream entries stay raw so bad ones can be skipped
/// individually instead of failing the whole file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_http_port")]
    http_port: u16,
    #[serde(default)]
    display_mode: i64,
    #[serde(default)]
    autostart: i64,
    #[serde(default = "default_pre_buffering")]
    pre_buffering_time: f32,
    #[serde(default = "default_post_buffering")]
    post_buffering_time: f32,
    #[serde(default = "default_rec_base_folder")]
    rec_base_folder: PathBuf,
    streams: Vec<serde_json::Value>,
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_pre_buffering() -> f32 {
    DEFAULT_PRE_BUFFERING
}

fn default_post_buffering() -> f32 {
    DEFAULT_POST_BUFFERING
}

fn default_rec_base_folder() -> PathBuf {
    PathBuf::from("./")
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_port: u16,
    pub autostart: bool,
    pub pre_buffering_time: f32,
    pub post_buffering_time: f32,
    pub rec_base_folder: PathBuf,
    pub streams: Vec<StreamConfig>,
}

impl AppConfig {
    /// Read and validate the config file, creating the recordings folder if
    /// it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&data)?;

        if !config.rec_base_folder.exists() {
            fs::create_dir_all(&config.rec_base_folder).map_err(|source| {
                ConfigError::CreateDir {
                    path: config.rec_base_folder.clone(),
                    source,
                }
            })?;
            warn!(folder = %config.rec_base_folder.display(), "created recordings folder");
        }

        Ok(config)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(data)?;

        let mut streams: Vec<StreamConfig> = Vec::new();
        for entry in &raw.streams {
            let id = entry.get("id").and_then(|v| v.as_str()).unwrap_or("");
            let url = entry.get("url").and_then(|v| v.as_str()).unwrap_or("");
            if id.is_empty() || url.is_empty() {
                warn!("skipping invalid stream entry in config");
                continue;
            }
            if streams.iter().any(|s| s.id == id) {
                warn!(stream_id = %id, "skipping duplicate stream id");
                continue;
            }
            streams.push(StreamConfig {
                id: id.to_string(),
                url: url.to_string(),
            });
        }
        if streams.is_empty() {
            return Err(ConfigError::NoStreams);
        }

        let http_port = if raw.http_port == 0 {
            warn!("http_port 0 is invalid, using default {DEFAULT_HTTP_PORT}");
            DEFAULT_HTTP_PORT
        } else {
            raw.http_port
        };

        if raw.display_mode != 0 {
            warn!("display_mode requested but this build is headless");
        }

        Ok(AppConfig {
            http_port,
            autostart: raw.autostart == 1,
            pre_buffering_time: raw.pre_buffering_time,
            post_buffering_time: raw.post_buffering_time,
            rec_base_folder: raw.rec_base_folder,
            streams,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = AppConfig::from_json(
            r#"{ "streams": [ {"id": "cam1", "url": "rtsp://host/stream"} ] }"#,
        )
        .unwrap();

        assert_eq!(config.http_port, 8090);
        assert!(!config.autostart);
        assert_eq!(config.pre_buffering_time, 5.0);
        assert_eq!(config.post_buffering_time, 0.5);
        assert_eq!(config.rec_base_folder, PathBuf::from("./"));
        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].id, "cam1");
    }

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_json(
            r#"{
                "http_port": 9000,
                "autostart": 1,
                "pre_buffering_time": 2.5,
                "post_buffering_time": 1.0,
                "rec_base_folder": "/var/recordings",
                "streams": [
                    {"id": "cam1", "url": "rtsp://a/1"},
                    {"id": "cam2", "url": "rtsp://a/2"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.http_port, 9000);
        assert!(config.autostart);
        assert_eq!(config.pre_buffering_time, 2.5);
        assert_eq!(config.streams.len(), 2);
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let config = AppConfig::from_json(
            r#"{ "streams": [
                {"id": "cam1", "url": "rtsp://a/1"},
                {"id": "cam1", "url": "rtsp://a/duplicate"},
                {"id": "", "url": "rtsp://a/2"},
                {"url": "rtsp://a/3"},
                {"id": 42, "url": "rtsp://a/4"}
            ] }"#,
        )
        .unwrap();

        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].url, "rtsp://a/1");
    }

    #[test]
    fn test_no_valid_streams_is_fatal() {
        assert!(matches!(
            AppConfig::from_json(r#"{ "streams": [] }"#),
            Err(ConfigError::NoStreams)
        ));
        assert!(matches!(
            AppConfig::from_json(r#"{ "streams": [ {"id": "", "url": ""} ] }"#),
            Err(ConfigError::NoStreams)
        ));
    }

    #[test]
    fn test_missing_streams_key_is_parse_error() {
        assert!(matches!(
            AppConfig::from_json(r#"{ "http_port": 8090 }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config = AppConfig::from_json(
            r#"{
                "display_mode": 0,
                "some_future_knob": true,
                "streams": [ {"id": "cam1", "url": "rtsp://a/1", "note": "front door"} ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.streams.len(), 1);
    }

    #[test]
    fn test_port_zero_falls_back_to_default() {
        let config = AppConfig::from_json(
            r#"{ "http_port": 0, "streams": [ {"id": "cam1", "url": "rtsp://a/1"} ] }"#,
        )
        .unwrap();
        assert_eq!(config.http_port, 8090);
    }
}
