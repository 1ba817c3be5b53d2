use clap::Parser;
use std::path::PathBuf;

/// Prompt before allowing newly inserted USB devices.
///
/// Follows `usbguard watch`, asks through an interactive chooser whether each
/// inserted device may be used, and sends a desktop notification when a
/// device's policy target changes.
#[derive(Debug, Parser)]
#[command(name = "usbgate", version)]
pub struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/usbgate/config.toml).
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Status file (default: $XDG_RUNTIME_DIR/usbgate/status.toml).
    #[arg(long, value_name = "PATH", conflicts_with = "no_status")]
    pub status_file: Option<PathBuf>,

    /// Do not write a status file.
    #[arg(long)]
    pub no_status: bool,

    /// Log at debug level, including every backend line.
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    pub print_config: bool,
}
