/// Asks the operator whether a newly inserted device may be used.
use tracing::{debug, info, warn};

use crate::config::{ChooserConfig, NAME_PLACEHOLDER};
use crate::device::device_name;
use crate::record::{PresenceEvent, PresenceKind};
use crate::runner::{CommandRunner, Invocation};
use crate::status::LastDecision;

/// What happened to one presence event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Not an insertion; nothing to ask.
    Ignored,
    /// The operator agreed and the backend accepted `allow-device`.
    Allowed,
    /// The operator picked something other than the affirmative option.
    Declined,
    /// The chooser could not be run or exited unsuccessfully.
    ChooserFailed(String),
    /// The operator agreed but `allow-device` failed.
    AllowFailed(String),
}

impl Decision {
    /// Status-file summary; `None` for events that never prompted.
    pub fn outcome(&self) -> Option<LastDecision> {
        match self {
            Self::Ignored => None,
            Self::Allowed => Some(LastDecision::Allowed),
            Self::Declined => Some(LastDecision::Declined),
            Self::ChooserFailed(_) | Self::AllowFailed(_) => Some(LastDecision::Failed),
        }
    }
}

/// Renders the chooser command for `name`.
/// Works on copies; the configured templates are left untouched.
pub fn render_chooser(chooser: &ChooserConfig, name: &str) -> Invocation {
    let args = chooser
        .args
        .iter()
        .map(|arg| arg.replace(NAME_PLACEHOLDER, name));
    let stdin = chooser.stdin.replace(NAME_PLACEHOLDER, name);

    let invocation = Invocation::new(&chooser.program, args);
    if stdin.is_empty() {
        invocation
    } else {
        invocation.with_stdin(stdin)
    }
}

/// Drops the single newline the chooser prints after the selected option.
fn chosen_option(stdout: &str) -> &str {
    let choice = stdout.strip_suffix('\n').unwrap_or(stdout);
    choice.strip_suffix('\r').unwrap_or(choice)
}

/// The backend command that permanently allows device `id` for this session.
pub fn allow_invocation(backend: &str, id: u32) -> Invocation {
    Invocation::new(backend, ["allow-device".to_string(), id.to_string()])
}

/// Prompts for inserted devices and allows them on an affirmative answer.
/// All failures are logged and reported in the returned [`Decision`].
pub async fn handle_presence<R: CommandRunner>(
    event: &PresenceEvent,
    chooser: &ChooserConfig,
    backend: &str,
    runner: &R,
) -> Decision {
    if event.kind != PresenceKind::Insert {
        return Decision::Ignored;
    }

    let name = device_name(&event.device_rule);
    info!(id = event.id, name = %name, target = %event.target, "device inserted; prompting");

    let output = match runner.run(&render_chooser(chooser, &name)).await {
        Ok(output) => output,
        Err(e) => {
            warn!("chooser failed: {e:#}");
            return Decision::ChooserFailed(format!("{e:#}"));
        }
    };
    if !output.success {
        warn!(code = ?output.code, stderr = %output.stderr.trim(), "chooser exited unsuccessfully");
        return Decision::ChooserFailed(format!("chooser exited with {:?}", output.code));
    }

    let choice = chosen_option(&output.stdout);
    debug!(choice, "chooser answered");
    if choice != chooser.affirmative {
        info!(id = event.id, name = %name, "device not allowed");
        return Decision::Declined;
    }

    match runner.run(&allow_invocation(backend, event.id)).await {
        Ok(out) if out.success => {
            info!(id = event.id, name = %name, "device allowed");
            debug!(stdout = %out.stdout.trim(), "allow-device output");
            Decision::Allowed
        }
        Ok(out) => {
            warn!(code = ?out.code, stderr = %out.stderr.trim(), "allow-device failed");
            Decision::AllowFailed(format!("allow-device exited with {:?}", out.code))
        }
        Err(e) => {
            warn!("allow-device failed: {e:#}");
            Decision::AllowFailed(format!("{e:#}"))
        }
    }
}
