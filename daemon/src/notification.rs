/// Desktop notifications for devices whose policy target changed.
use tracing::{info, warn};

use crate::config::NotifierConfig;
use crate::device::device_name;
use crate::record::PolicyChangeEvent;
use crate::runner::{CommandRunner, Invocation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Old and new targets are identical.
    Unchanged,
    Sent,
    Failed(String),
}

pub fn format_message(name: &str, target_old: &str, target_new: &str) -> String {
    format!("USB Policy changed for device [{name}]: {target_old} -> {target_new}")
}

/// Tells the operator about a target transition. Notifier failures are logged only.
pub async fn handle_policy_change<R: CommandRunner>(
    change: &PolicyChangeEvent,
    notifier: &NotifierConfig,
    runner: &R,
) -> Notification {
    if !change.is_change() {
        return Notification::Unchanged;
    }

    let name = device_name(&change.device_rule);
    let message = format_message(&name, &change.target_old, &change.target_new);
    info!(id = change.id, "{message}");

    match runner.run(&Invocation::new(&notifier.program, [message])).await {
        Ok(out) if out.success => Notification::Sent,
        Ok(out) => {
            warn!(code = ?out.code, stderr = %out.stderr.trim(), "notifier exited unsuccessfully");
            Notification::Failed(format!("notifier exited with {:?}", out.code))
        }
        Err(e) => {
            warn!("notifier failed: {e:#}");
            Notification::Failed(format!("{e:#}"))
        }
    }
}
