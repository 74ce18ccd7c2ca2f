use std::sync::Mutex;
use std::time::SystemTime;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::monitoring::MonitorSettings;
use crate::targets::{Target, TargetSource};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("Failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("Failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("No config directory available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

/// Which transport probes use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// OS `ping` utility
    Icmp,
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub interval_seconds: f64,
    pub timeout_seconds: f64,
    pub probe: ProbeKind,
    /// Used by tcp probes when the address carries no port
    pub tcp_port: u16,
    /// Also notify when monitoring starts and stops
    pub notify_lifecycle: bool,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_seconds: 5.0,
            timeout_seconds: 1.0,
            probe: ProbeKind::Icmp,
            tcp_port: 80,
            notify_lifecycle: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotifySection {
    #[default]
    None,
    Telegram {
        #[serde(default)]
        token: String,
        #[serde(default)]
        chat_id: String,
    },
    Webhook {
        url: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Journal of log events, disabled when unset
    pub log_file: Option<path::PathBuf>,
    pub monitor: MonitorSection,
    pub notify: NotifySection,
    pub targets: Vec<Target>,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pingmon/config.toml or
/// $HOME/.config/...)
pub fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("pingmon/config.toml"))
}

/// Resolve the path `from_config` would use
pub fn resolve_path(optional_path: Option<impl AsRef<path::Path>>) -> Result<path::PathBuf, ConfigError> {
    match optional_path {
        Some(path) => Ok(normalize_toml_path(path.as_ref())),
        None => default_config_path(),
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Configuration:")?;
        write_title_1(f, "Monitor")?;
        write_1(f, "Interval (s)", &self.monitor.interval_seconds)?;
        write_1(f, "Timeout (s)", &self.monitor.timeout_seconds)?;
        write_1(f, "Probe", &format!("{:?}", self.monitor.probe).to_lowercase())?;
        if self.monitor.probe == ProbeKind::Tcp {
            write_1(f, "TCP Port", &self.monitor.tcp_port)?;
        }
        write_1(f, "Lifecycle Notices", &self.monitor.notify_lifecycle)?;

        write_title_1(f, "Notify")?;
        match &self.notify {
            NotifySection::None => write_1(f, "Kind", &"none")?,
            NotifySection::Telegram { token, chat_id } => {
                write_1(f, "Kind", &"telegram")?;
                let token = if token.is_empty() { "<unset>" } else { "<set>" };
                write_1(f, "Token", &token)?;
                write_1(f, "Chat", chat_id)?;
            }
            NotifySection::Webhook { url } => {
                write_1(f, "Kind", &"webhook")?;
                write_1(f, "URL", url)?;
            }
        }

        write_title_1(f, "Journal")?;
        match &self.log_file {
            Some(path) => write_1(f, "File", &path.display())?,
            None => write_1(f, "File", &"<disabled>")?,
        }

        write_title_1(f, &format!("Targets ({})", self.targets.len()))?;
        for target in &self.targets {
            let label = if target.group.is_empty() { "-" } else { target.group.as_str() };
            let note = if target.note.is_empty() { "" } else { target.note.as_str() };
            write_2(f, label, &format!("{} {}", target.address, note).trim_end())?;
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/pingmon/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// # use pingmon::config::Config;
    /// let cfg = Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), pingmon::config::ConfigError>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path = resolve_path(optional_path)?;

        if config_path.exists() {
            Self::read(&config_path)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Parse an existing file without creating defaults
    pub fn read(path: &path::Path) -> Result<Self, ConfigError> {
        let raw_string = fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFailed { path: path.to_path_buf(), source })?;
        Ok(toml::from_str(raw_string.as_str())?)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Apply `PINGMON_TELEGRAM_TOKEN` / `PINGMON_TELEGRAM_CHAT_ID`
    pub fn apply_env_overrides(&mut self) {
        let token = env::var("PINGMON_TELEGRAM_TOKEN").ok();
        let chat = env::var("PINGMON_TELEGRAM_CHAT_ID").ok();
        self.apply_telegram_overrides(token, chat);
    }

    fn apply_telegram_overrides(&mut self, token: Option<String>, chat: Option<String>) {
        if token.is_none() && chat.is_none() {
            return;
        }
        let (mut current_token, mut current_chat) = match &self.notify {
            NotifySection::Telegram { token, chat_id } => (token.clone(), chat_id.clone()),
            _ => (String::new(), String::new()),
        };
        if let Some(token) = token {
            current_token = token;
        }
        if let Some(chat) = chat {
            current_chat = chat;
        }
        self.notify = NotifySection::Telegram { token: current_token, chat_id: current_chat };
    }

    /// Interval and timeout as validated engine settings
    pub fn monitor_settings(&self) -> Result<MonitorSettings, crate::monitoring::MonitorError> {
        MonitorSettings::from_secs(self.monitor.interval_seconds, self.monitor.timeout_seconds)
            .map(|settings| settings.with_lifecycle_notices(self.monitor.notify_lifecycle))
    }
}

/// Target source backed by the config file.
///
/// The file is re-read when its modification time changes, so edits made by
/// another process show up at the next pass. A file that fails to parse keeps
/// the last good list.
pub struct ConfigTargets {
    path: path::PathBuf,
    cache: Mutex<(Option<SystemTime>, Vec<Target>)>,
}

impl ConfigTargets {
    pub fn new(path: impl Into<path::PathBuf>, initial: Vec<Target>) -> Self {
        let path = path.into();
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
        Self { path, cache: Mutex::new((modified, initial)) }
    }
}

impl TargetSource for ConfigTargets {
    fn targets(&self) -> Vec<Target> {
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        if modified.is_some() && modified != cache.0 {
            match Config::read(&self.path) {
                Ok(config) => *cache = (modified, config.targets),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Keeping previous target list");
                    cache.0 = modified;
                }
            }
        }

        cache.1.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config");

        let config = Config::from_config(Some(&path)).unwrap();

        assert_eq!(config, Config::default());
        assert!(dir.path().join("nested/config.toml").exists());
        assert_eq!(config.monitor.interval_seconds, 5.0);
        assert_eq!(config.monitor.timeout_seconds, 1.0);
    }

    #[test]
    fn test_parses_full_file() {
        let raw = r#"
            log_file = "/tmp/monitor.log"

            [monitor]
            interval_seconds = 2.5
            timeout_seconds = 0.5
            probe = "tcp"
            tcp_port = 443

            [notify]
            kind = "telegram"
            token = "123:abc"
            chat_id = "42"

            [[targets]]
            group = "Server"
            address = "10.0.0.1"
            note = "rack 3"

            [[targets]]
            address = "printer.lan"
        "#;

        let config: Config = toml::from_str(raw).unwrap();

        assert_eq!(config.monitor.probe, ProbeKind::Tcp);
        assert_eq!(config.monitor.tcp_port, 443);
        assert!(!config.monitor.notify_lifecycle);
        assert_eq!(
            config.notify,
            NotifySection::Telegram { token: "123:abc".into(), chat_id: "42".into() }
        );
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[1].group, "");
        assert_eq!(config.log_file, Some(path::PathBuf::from("/tmp/monitor.log")));

        let settings = config.monitor_settings().unwrap();
        assert_eq!(settings.interval.as_millis(), 2500);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config {
            targets: vec![Target::new("Camera", "10.0.0.7", "")],
            notify: NotifySection::Webhook { url: "http://hooks.local/x".into() },
            ..Config::default()
        };

        config.write_config(&path).unwrap();

        assert_eq!(Config::read(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_interval_is_rejected() {
        let mut config = Config::default();
        config.monitor.interval_seconds = 0.0;
        assert!(config.monitor_settings().is_err());
    }

    #[test]
    fn test_telegram_overrides() {
        let mut config = Config::default();
        config.apply_telegram_overrides(Some("tok".into()), None);
        assert_eq!(config.notify, NotifySection::Telegram { token: "tok".into(), chat_id: "".into() });

        config.apply_telegram_overrides(None, Some("7".into()));
        assert_eq!(config.notify, NotifySection::Telegram { token: "tok".into(), chat_id: "7".into() });

        let mut config = Config { notify: NotifySection::Webhook { url: "u".into() }, ..Config::default() };
        config.apply_telegram_overrides(None, None);
        assert_eq!(config.notify, NotifySection::Webhook { url: "u".into() });
    }

    #[test]
    fn test_display_lists_targets() {
        let config = Config {
            targets: vec![Target::new("Server", "10.0.0.1", "rack 3")],
            ..Config::default()
        };

        let text = config.to_string();
        assert!(text.contains("Targets (1)"));
        assert!(text.contains("Server: 10.0.0.1 rack 3"));
        assert!(text.contains("<disabled>"));
    }

    #[test]
    fn test_config_targets_follow_file_edits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config { targets: vec![Target::new("", "10.0.0.1", "")], ..Config::default() };
        config.write_config(&path).unwrap();

        let source = ConfigTargets::new(&path, config.targets.clone());
        assert_eq!(source.targets().len(), 1);

        config.targets.push(Target::new("", "10.0.0.2", ""));
        config.write_config(&path).unwrap();
        // make sure the modification time moves even on coarse filesystems
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options().write(true).open(&path).unwrap().set_modified(later).unwrap();

        assert_eq!(source.targets().len(), 2);

        fs::write(&path, "not = [valid").unwrap();
        let even_later = later + std::time::Duration::from_secs(5);
        fs::File::options().write(true).open(&path).unwrap().set_modified(even_later).unwrap();

        assert_eq!(source.targets().len(), 2);
    }
}
