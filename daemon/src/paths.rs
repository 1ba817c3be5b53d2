/// Canonical file paths for usbgate data files.
///
///   - config.toml  `$XDG_CONFIG_HOME/usbgate/`, read by the daemon.
///   - status.toml  `$XDG_RUNTIME_DIR/usbgate/` (or the XDG state dir), written by the daemon.
use std::path::PathBuf;

const APP_DIR_NAME: &str = "usbgate";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns `$XDG_CONFIG_HOME/usbgate/config.toml`, if a config directory is known.
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Returns the status file path, preferring the per-session runtime directory.
pub fn status_file_path() -> Option<PathBuf> {
    dirs::runtime_dir()
        .or_else(dirs::state_dir)
        .map(|d| d.join(APP_DIR_NAME).join(STATUS_FILE_NAME))
}
