/// The daemon's event loop.
///
/// Waits on the presence, policy-change and raw-line channels plus the control
/// channel, handling whichever is ready first. Handlers run inline: while the
/// chooser is open no other record is processed, and the reader task blocks
/// once its channels fill up. Control messages are still served during a
/// prompt, so an interrupt abandons an unanswered chooser.
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{ChooserConfig, Config, NotifierConfig};
use crate::decision::{self, Decision};
use crate::device::device_name;
use crate::event::{DaemonEvent, EventReceivers, ShutdownReason};
use crate::notification::{self, Notification};
use crate::record::{PolicyChangeEvent, PresenceEvent, PresenceKind};
use crate::runner::CommandRunner;
use crate::status::{DaemonState, StatusReporter};

pub struct Dispatcher<R> {
    /// Fixed for the life of the backend subprocess.
    backend_program: String,
    chooser: ChooserConfig,
    notifier: NotifierConfig,
    runner: R,
    status: StatusReporter,
}

impl<R: CommandRunner> Dispatcher<R> {
    pub fn new(config: Config, runner: R, status: StatusReporter) -> Self {
        Self {
            backend_program: config.backend.program,
            chooser: config.chooser,
            notifier: config.notifier,
            runner,
            status,
        }
    }

    /// Runs until a shutdown or interrupt arrives on `control`.
    pub async fn run(
        &mut self,
        mut events: EventReceivers,
        mut control: mpsc::Receiver<DaemonEvent>,
    ) -> ShutdownReason {
        self.status.set_state(DaemonState::Watching);

        let reason = loop {
            tokio::select! {
                Some(event) = events.presence.recv() => {
                    if let Err(reason) = self.on_presence(event, &mut control).await {
                        break reason;
                    }
                }
                Some(change) = events.policy.recv() => self.on_policy_change(change).await,
                Some(line) = events.lines.recv() => {
                    info!(target: "usbgate::backend", "{line}");
                }
                message = control.recv() => match message {
                    Some(DaemonEvent::ConfigReloaded(config)) => self.apply_config(config),
                    Some(DaemonEvent::Shutdown(reason)) => break reason,
                    None => break ShutdownReason::ControlClosed,
                },
            }
        };

        info!("dispatcher stopping: {reason}");
        if reason.is_fatal() {
            self.status.set_error(reason.to_string());
        }
        self.status.set_state(DaemonState::Stopped);
        reason
    }

    /// Prompts for an inserted device. Returns `Err` when a shutdown arrives
    /// before the chooser answers; the pending prompt is dropped unanswered.
    async fn on_presence(
        &mut self,
        event: PresenceEvent,
        control: &mut mpsc::Receiver<DaemonEvent>,
    ) -> Result<(), ShutdownReason> {
        debug!(?event, "presence event");
        if event.kind != PresenceKind::Insert {
            return Ok(());
        }

        self.status.set_state(DaemonState::Prompting);
        let mut reloaded = None;
        let outcome = {
            let prompt = decision::handle_presence(
                &event,
                &self.chooser,
                &self.backend_program,
                &self.runner,
            );
            tokio::pin!(prompt);
            loop {
                tokio::select! {
                    decision = &mut prompt => break Ok(decision),
                    message = control.recv() => match message {
                        // Applied after the prompt ends.
                        Some(DaemonEvent::ConfigReloaded(config)) => reloaded = Some(config),
                        Some(DaemonEvent::Shutdown(reason)) => break Err(reason),
                        None => break Err(ShutdownReason::ControlClosed),
                    },
                }
            }
        };

        if let Some(config) = reloaded {
            self.apply_config(config);
        }
        let decision = match outcome {
            Ok(decision) => decision,
            Err(reason) => {
                warn!(id = event.id, "prompt abandoned: {reason}");
                return Err(reason);
            }
        };

        if let Some(outcome) = decision.outcome() {
            self.status
                .record_decision(&device_name(&event.device_rule), event.id, outcome);
        }
        if let Decision::ChooserFailed(e) | Decision::AllowFailed(e) = &decision {
            self.status.set_error(e.as_str());
        }
        self.status.set_state(DaemonState::Watching);
        Ok(())
    }

    async fn on_policy_change(&mut self, change: PolicyChangeEvent) {
        debug!(?change, "policy change");
        let result = notification::handle_policy_change(&change, &self.notifier, &self.runner).await;
        if let Notification::Failed(e) = result {
            self.status.set_error(e);
        }
    }

    /// Swaps in new chooser and notifier settings. The backend program only
    /// takes effect on restart since the running subprocess was started with the old one.
    fn apply_config(&mut self, config: Config) {
        if config.backend.program != self.backend_program {
            warn!(
                "backend.program changed to {:?}; restart the daemon to apply it",
                config.backend.program
            );
        }
        self.chooser = config.chooser;
        self.notifier = config.notifier;
        info!("applied reloaded config");
    }

    #[cfg(test)]
    pub fn status(&self) -> &StatusReporter {
        &self.status
    }
}
