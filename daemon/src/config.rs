use anyhow::{bail, Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::event::DaemonEvent;

pub const DEFAULT_BACKEND_PROGRAM: &str = "usbguard";
pub const DEFAULT_CHOOSER_PROGRAM: &str = "rofi";
pub const DEFAULT_CHOOSER_STDIN: &str = "yes\nno";
pub const DEFAULT_AFFIRMATIVE: &str = "yes";
pub const DEFAULT_NOTIFIER_PROGRAM: &str = "notify-send";
/// Replaced with the device name in chooser templates.
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Root configuration structure. Deserialized from `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub chooser: ChooserConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// The USB access-control backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Executable run as `<program> watch` and `<program> allow-device <id>`.
    #[serde(default = "default_backend_program")]
    pub program: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_BACKEND_PROGRAM.to_string(),
        }
    }
}

/// The interactive yes/no prompt shown for inserted devices.
///
/// `args` and `stdin` are templates: every `{name}` is replaced with the
/// device name when a prompt is rendered. The stored values are never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChooserConfig {
    #[serde(default = "default_chooser_program")]
    pub program: String,
    #[serde(default = "default_chooser_args")]
    pub args: Vec<String>,
    #[serde(default = "default_chooser_stdin")]
    pub stdin: String,
    /// Chooser output (minus its trailing newline) that allows the device.
    /// Compared case-sensitively.
    #[serde(default = "default_affirmative")]
    pub affirmative: String,
}

impl Default for ChooserConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_CHOOSER_PROGRAM.to_string(),
            args: default_chooser_args(),
            stdin: DEFAULT_CHOOSER_STDIN.to_string(),
            affirmative: DEFAULT_AFFIRMATIVE.to_string(),
        }
    }
}

/// Desktop notifications for policy changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Executable run with the message as its only argument.
    #[serde(default = "default_notifier_program")]
    pub program: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_NOTIFIER_PROGRAM.to_string(),
        }
    }
}

impl Config {
    /// Rejects values that would make every prompt or action fail.
    pub fn validate(&self) -> Result<()> {
        if self.backend.program.trim().is_empty() {
            bail!("backend.program must not be empty");
        }
        if self.chooser.program.trim().is_empty() {
            bail!("chooser.program must not be empty");
        }
        if self.chooser.affirmative.is_empty() {
            bail!("chooser.affirmative must not be empty");
        }
        if self.notifier.program.trim().is_empty() {
            bail!("notifier.program must not be empty");
        }
        Ok(())
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read, parsed, or validated.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

/// Watches the directory containing `path` and sends `ConfigReloaded` whenever
/// the file is written and parses to a config different from the last one sent.
/// Files that fail to load are logged and skipped; the daemon keeps its current config.
pub async fn watch_config(path: PathBuf, initial: Config, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!("failed to create config watcher: {e}");
            return;
        }
    };

    // The parent directory catches editors that save by write-new + rename.
    let Some(watch_dir) = path.parent().map(Path::to_path_buf) else {
        warn!("config path {} has no parent directory", path.display());
        return;
    };
    if !watch_dir.is_dir() {
        info!("config directory {} does not exist; reload disabled", watch_dir.display());
        return;
    }
    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        warn!("failed to watch config directory: {e}");
        return;
    }

    let mut current = initial;
    while let Some(event) = watch_rx.recv().await {
        if !is_config_write(&event, &path) {
            continue;
        }
        match load_or_default(&path) {
            Ok(config) if config == current => {}
            Ok(config) => {
                info!("config reloaded from {}", path.display());
                current = config.clone();
                if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("failed to reload config: {e:#}"),
        }
    }
}

fn is_config_write(event: &notify::Event, path: &Path) -> bool {
    let affects_config = event.paths.iter().any(|p| p == path);
    let is_write = matches!(
        event.kind,
        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
    );
    affects_config && is_write
}

fn default_backend_program() -> String {
    DEFAULT_BACKEND_PROGRAM.to_string()
}

fn default_chooser_program() -> String {
    DEFAULT_CHOOSER_PROGRAM.to_string()
}

fn default_chooser_args() -> Vec<String> {
    vec![
        "-dmenu".to_string(),
        "-p".to_string(),
        format!("Allow {NAME_PLACEHOLDER}?"),
    ]
}

fn default_chooser_stdin() -> String {
    DEFAULT_CHOOSER_STDIN.to_string()
}

fn default_affirmative() -> String {
    DEFAULT_AFFIRMATIVE.to_string()
}

fn default_notifier_program() -> String {
    DEFAULT_NOTIFIER_PROGRAM.to_string()
}
