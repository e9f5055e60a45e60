use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub stations: StationsConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
}

/// TCP socket the control protocol listens on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_daemon_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

/// Station list source — a local TOML file, or an m3u URL / path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationsConfig {
    /// Highest priority.  Defaults to `~/.config/ugstream/stations.toml`.
    #[serde(default = "default_stations_toml")]
    pub stations_toml: PathBuf,
    /// https:// URL or file path of an m3u playlist.  Empty disables it.
    #[serde(default)]
    pub m3u_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_recording_enabled")]
    pub enabled: bool,
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_daemon_port(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            stations_toml: default_stations_toml(),
            m3u_url: String::new(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: default_recording_enabled(),
            recordings_dir: default_recordings_dir(),
        }
    }
}

fn default_bind_address() -> String {
    platform::DAEMON_TCP_HOST.to_string()
}

fn default_daemon_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    8990
}

fn default_volume() -> f32 {
    0.5
}

fn default_recording_enabled() -> bool {
    true
}

fn default_stations_toml() -> PathBuf {
    platform::config_dir().join("stations.toml")
}

fn default_recordings_dir() -> PathBuf {
    platform::data_dir().join("recordings")
}

impl Config {
    /// Load from the default location, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_or_create(&Self::config_path())
    }

    /// Read `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            tracing::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }
        Self::load_from(path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.playback.default_volume = config.playback.default_volume.clamp(0.0, 1.0);
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.daemon.port, 9876);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert!(config.stations.m3u_url.is_empty());
        assert!(config
            .stations
            .stations_toml
            .ends_with("ugstream/stations.toml"));
        assert!(config.recording.recordings_dir.ends_with("recordings"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[http]\nenabled = false\n\n[playback]\ndefault_volume = 3.0\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(!config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.playback.default_volume, 1.0);
        assert!(config.recording.enabled);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.stations.m3u_url = "https://example.com/radios.m3u".into();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.stations.m3u_url, "https://example.com/radios.m3u");
    }

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ugstream").join("config.toml");

        let config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.daemon.port, 9876);

        std::fs::write(&path, "[daemon]\nport = 7000\n").unwrap();
        assert_eq!(Config::load_or_create(&path).unwrap().daemon.port, 7000);
    }
}
