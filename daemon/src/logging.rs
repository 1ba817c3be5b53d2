/// Structured logging to stderr.
///
/// `RUST_LOG` takes precedence; otherwise `info`. `--verbose` lowers this
/// crate's own targets to `debug` while dependencies stay at `info`.
/// Raw backend lines are logged at `info` under the `usbgate::backend` target.
use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "info,usbgate=debug"
    } else {
        "info"
    }
}
