//! Supervisor actor - owns the relay table.
//!
//! At most one relay exists per key. Starting and stopping are serialised
//! through this actor; relay tasks report unsolicited exits back to it
//! tagged with the generation they were started under.
//!
//! A plain stop returns as soon as the relay is cancelled. A shutdown
//! also waits for the relay tasks, so encoder children get their SIGINT
//! grace before the runtime goes away.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures are ignored (the caller went away)

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use hub_core::{DeviceId, RelayKind, RelayState, Target};

use super::commands::{
    RelayExit, RelayInfo, RelayStatus, StartOutcome, SupervisorCommand, SupervisorError,
};
use super::relay::{
    external_command, launch_external, launch_synthetic, StartRequest, STOP_GRACE,
};

/// Time past [`STOP_GRACE`] a shutdown waits for relay tasks to finish.
pub const SHUTDOWN_MARGIN: Duration = Duration::from_millis(500);

/// One relay held by the supervisor.
#[derive(Debug)]
struct RelayEntry {
    kind: RelayKind,
    state: RelayState,
    generation: u64,
    cancel: CancellationToken,
    rtp_ip: String,
    rtp_port: u16,
    frame_ms: u32,
    started_at: DateTime<Utc>,
}

impl RelayEntry {
    fn transition(&mut self, key: &DeviceId, next: RelayState) {
        if self.state.can_transition_to(next) {
            debug!(key = %key, from = %self.state, to = %next, "Relay state change");
            self.state = next;
        } else {
            warn!(key = %key, from = %self.state, to = %next, "Ignoring invalid relay transition");
        }
    }

    fn info(&self, key: &DeviceId) -> RelayInfo {
        RelayInfo {
            key: key.clone(),
            kind: self.kind,
            state: self.state,
            rtp_ip: self.rtp_ip.clone(),
            rtp_port: self.rtp_port,
            frame_ms: self.frame_ms,
            started_at: self.started_at,
        }
    }
}

/// The supervisor actor.
pub struct SupervisorActor {
    receiver: mpsc::Receiver<SupervisorCommand>,

    /// Handed to relay tasks for exit reports; weak so it never keeps
    /// the actor alive on its own
    exits: mpsc::WeakSender<SupervisorCommand>,

    relays: HashMap<DeviceId, RelayEntry>,

    /// Every synthetic generator and child supervisor task
    tasks: TaskTracker,

    next_generation: u64,
}

impl SupervisorActor {
    pub fn new(
        receiver: mpsc::Receiver<SupervisorCommand>,
        exits: mpsc::WeakSender<SupervisorCommand>,
    ) -> Self {
        Self {
            receiver,
            exits,
            relays: HashMap::new(),
            tasks: TaskTracker::new(),
            next_generation: 1,
        }
    }

    /// Runs the actor until every handle is dropped.
    ///
    /// Remaining relays are stopped on the way out.
    pub async fn run(mut self) {
        info!("Supervisor actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                SupervisorCommand::Shutdown { respond_to } => {
                    let stopped = self.handle_shutdown().await;
                    let _ = respond_to.send(stopped);
                }
                cmd => self.handle_command(cmd),
            }
        }

        let remaining = self.handle_shutdown().await;
        info!(stopped = remaining.len(), "Supervisor actor stopped");
    }

    fn handle_command(&mut self, cmd: SupervisorCommand) {
        match cmd {
            SupervisorCommand::Start {
                request,
                respond_to,
            } => {
                let result = self.handle_start(request);
                let _ = respond_to.send(result);
            }
            SupervisorCommand::Stop { target, respond_to } => {
                let stopped = self.handle_stop(&target);
                let _ = respond_to.send(stopped);
            }
            SupervisorCommand::Shutdown { respond_to } => {
                // The wait for relay tasks happens in run().
                let _ = respond_to.send(self.handle_stop(&Target::All));
            }
            SupervisorCommand::Status { target, respond_to } => {
                let _ = respond_to.send(self.handle_status(&target));
            }
            SupervisorCommand::List { respond_to } => {
                let _ = respond_to.send(self.handle_list());
            }
            SupervisorCommand::RelayExited {
                key,
                generation,
                exit,
            } => {
                self.handle_relay_exited(key, generation, exit);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_start(&mut self, request: StartRequest) -> Result<StartOutcome, SupervisorError> {
        let dest = request.validate()?;

        if let Some(existing) = self.relays.get(&request.key) {
            debug!(
                key = %request.key,
                state = %existing.state,
                "Relay already running, ignoring start"
            );
            return Ok(StartOutcome::AlreadyRunning);
        }

        let kind = request.source.mode.relay_kind();
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        let cancel = CancellationToken::new();

        self.relays.insert(
            request.key.clone(),
            RelayEntry {
                kind,
                state: RelayState::Starting,
                generation,
                cancel: cancel.clone(),
                rtp_ip: request.rtp_ip.clone(),
                rtp_port: request.rtp_port,
                frame_ms: request.frame_ms,
                started_at: Utc::now(),
            },
        );

        let launched = match kind {
            RelayKind::Synthetic => {
                launch_synthetic(&request, dest, cancel, &self.tasks).map(|()| None)
            }
            RelayKind::External => external_command(&request, dest).and_then(|command| {
                launch_external(
                    &request,
                    command,
                    generation,
                    cancel,
                    self.exits.clone(),
                    &self.tasks,
                )
                .map(Some)
            }),
        };

        match launched {
            Ok(pid) => {
                if let Some(entry) = self.relays.get_mut(&request.key) {
                    entry.transition(&request.key, RelayState::Running);
                }
                info!(
                    key = %request.key,
                    kind = %kind,
                    mode = %request.source.mode,
                    dest = %dest,
                    frame_ms = request.frame_ms,
                    pid = ?pid,
                    "Relay started"
                );
                Ok(StartOutcome::Started { kind })
            }
            Err(e) => {
                self.relays.remove(&request.key);
                warn!(key = %request.key, mode = %request.source.mode, error = %e, "Relay start failed");
                Err(e)
            }
        }
    }

    /// Removes matching entries and cancels their tasks.
    fn handle_stop(&mut self, target: &Target) -> Vec<DeviceId> {
        let keys: Vec<DeviceId> = match target {
            Target::All => self.relays.keys().cloned().collect(),
            Target::Device(key) => {
                if !self.relays.contains_key(key) {
                    debug!(key = %key, "No relay to stop");
                    return Vec::new();
                }
                vec![key.clone()]
            }
        };

        let mut stopped = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(mut entry) = self.relays.remove(&key) {
                entry.transition(&key, RelayState::Stopping);
                entry.cancel.cancel();
                info!(key = %key, kind = %entry.kind, "Relay stop requested");
                stopped.push(key);
            }
        }
        stopped.sort();
        stopped
    }

    /// Stops every relay, then waits up to `STOP_GRACE + SHUTDOWN_MARGIN`
    /// for the relay tasks to finish.
    async fn handle_shutdown(&mut self) -> Vec<DeviceId> {
        let stopped = self.handle_stop(&Target::All);

        self.tasks.close();
        if timeout(STOP_GRACE + SHUTDOWN_MARGIN, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(pending = self.tasks.len(), "Relay tasks still running at shutdown deadline");
        }
        self.tasks.reopen();

        info!(stopped = stopped.len(), "Relay shutdown sweep finished");
        stopped
    }

    fn handle_status(&self, target: &Target) -> RelayStatus {
        let running = match target {
            Target::All => !self.relays.is_empty(),
            Target::Device(key) => self.relays.contains_key(key),
        };
        RelayStatus { running }
    }

    fn handle_list(&self) -> Vec<RelayInfo> {
        let mut infos: Vec<RelayInfo> = self
            .relays
            .iter()
            .map(|(key, entry)| entry.info(key))
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    fn handle_relay_exited(&mut self, key: DeviceId, generation: u64, exit: RelayExit) {
        let current = self.relays.get(&key).map(|entry| entry.generation);
        if current != Some(generation) {
            debug!(
                key = %key,
                generation,
                current = ?current,
                "Ignoring exit report for replaced relay"
            );
            return;
        }

        if let Some(mut entry) = self.relays.remove(&key) {
            entry.transition(&key, RelayState::Stopped);
        }

        if let Some(error) = exit.error {
            warn!(key = %key, error = %error, "Relay wait failed, entry removed");
        } else {
            warn!(
                key = %key,
                code = ?exit.code,
                signal = ?exit.signal,
                "Relay exited unexpectedly"
            );
        }
    }

    /// Returns the number of relays (for testing).
    #[cfg(test)]
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::relay::LiveSource;
    use hub_core::LiveMode;
    use tokio::sync::oneshot;

    fn create_actor() -> (mpsc::Sender<SupervisorCommand>, SupervisorActor) {
        let (tx, rx) = mpsc::channel(16);
        let actor = SupervisorActor::new(rx, tx.downgrade());
        (tx, actor)
    }

    fn dummy_request(key: &str) -> StartRequest {
        StartRequest {
            key: DeviceId::new(key),
            rtp_ip: "127.0.0.1".to_string(),
            rtp_port: 5004,
            frame_ms: 20,
            source: LiveSource::default(),
        }
    }

    fn start(
        actor: &mut SupervisorActor,
        request: StartRequest,
    ) -> oneshot::Receiver<Result<StartOutcome, SupervisorError>> {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(SupervisorCommand::Start {
            request,
            respond_to: tx,
        });
        rx
    }

    fn status(actor: &mut SupervisorActor, target: Target) -> oneshot::Receiver<RelayStatus> {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(SupervisorCommand::Status {
            target,
            respond_to: tx,
        });
        rx
    }

    #[tokio::test]
    async fn test_start_twice_reports_already_running() {
        let (_tx, mut actor) = create_actor();

        let first = start(&mut actor, dummy_request("kitchen")).await.unwrap();
        assert_eq!(
            first,
            Ok(StartOutcome::Started {
                kind: RelayKind::Synthetic
            })
        );

        let second = start(&mut actor, dummy_request("kitchen")).await.unwrap();
        assert_eq!(second, Ok(StartOutcome::AlreadyRunning));
        assert_eq!(actor.relay_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_then_status_false() {
        let (_tx, mut actor) = create_actor();
        start(&mut actor, dummy_request("kitchen")).await.unwrap().unwrap();

        let (tx, rx) = oneshot::channel();
        actor.handle_command(SupervisorCommand::Stop {
            target: Target::device("kitchen"),
            respond_to: tx,
        });
        assert_eq!(rx.await.unwrap(), vec![DeviceId::new("kitchen")]);

        assert!(!status(&mut actor, Target::device("kitchen")).await.unwrap().running);
    }

    #[tokio::test]
    async fn test_stop_missing_key_is_noop() {
        let (_tx, mut actor) = create_actor();
        start(&mut actor, dummy_request("kitchen")).await.unwrap().unwrap();

        let (tx, rx) = oneshot::channel();
        actor.handle_command(SupervisorCommand::Stop {
            target: Target::device("hall"),
            respond_to: tx,
        });
        assert!(rx.await.unwrap().is_empty());
        assert_eq!(actor.relay_count(), 1);
    }

    #[tokio::test]
    async fn test_status_all_and_stop_all() {
        let (_tx, mut actor) = create_actor();
        assert!(!status(&mut actor, Target::All).await.unwrap().running);

        start(&mut actor, dummy_request("a")).await.unwrap().unwrap();
        start(&mut actor, dummy_request("b")).await.unwrap().unwrap();
        assert!(status(&mut actor, Target::All).await.unwrap().running);

        let (tx, rx) = oneshot::channel();
        actor.handle_command(SupervisorCommand::Stop {
            target: Target::All,
            respond_to: tx,
        });
        assert_eq!(rx.await.unwrap(), vec![DeviceId::new("a"), DeviceId::new("b")]);
        assert!(!status(&mut actor, Target::All).await.unwrap().running);
    }

    #[tokio::test]
    async fn test_invalid_request_registers_nothing() {
        let (_tx, mut actor) = create_actor();
        let mut request = dummy_request("kitchen");
        request.rtp_port = 0;

        let result = start(&mut actor, request).await.unwrap();
        assert!(matches!(result, Err(SupervisorError::InvalidRequest(_))));
        assert_eq!(actor.relay_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_input_device_registers_nothing() {
        let (_tx, mut actor) = create_actor();
        let mut request = dummy_request("kitchen");
        request.source.mode = LiveMode::Ffmpeg;

        let result = start(&mut actor, request).await.unwrap();
        assert_eq!(result, Err(SupervisorError::MissingInputDevice));
        assert!(!status(&mut actor, Target::device("kitchen")).await.unwrap().running);
    }

    #[tokio::test]
    async fn test_spawn_failure_removes_entry() {
        let (_tx, mut actor) = create_actor();
        let mut request = dummy_request("kitchen");
        request.source.mode = LiveMode::MicSender;
        request.source.mic_sender_bin = Some("/nonexistent/relay-binary".to_string());

        let result = start(&mut actor, request).await.unwrap();
        assert!(matches!(result, Err(SupervisorError::Spawn { .. })));
        assert_eq!(actor.relay_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_exit_report_ignored() {
        let (_tx, mut actor) = create_actor();
        start(&mut actor, dummy_request("kitchen")).await.unwrap().unwrap();

        actor.handle_command(SupervisorCommand::RelayExited {
            key: DeviceId::new("kitchen"),
            generation: 999,
            exit: RelayExit::default(),
        });
        assert_eq!(actor.relay_count(), 1);

        actor.handle_command(SupervisorCommand::RelayExited {
            key: DeviceId::new("kitchen"),
            generation: 1,
            exit: RelayExit::default(),
        });
        assert_eq!(actor.relay_count(), 0);
    }

    #[tokio::test]
    async fn test_list_reports_running_entries() {
        let (_tx, mut actor) = create_actor();
        start(&mut actor, dummy_request("kitchen")).await.unwrap().unwrap();

        let (tx, rx) = oneshot::channel();
        actor.handle_command(SupervisorCommand::List { respond_to: tx });
        let relays = rx.await.unwrap();

        assert_eq!(relays.len(), 1);
        assert_eq!(relays[0].key.as_str(), "kitchen");
        assert_eq!(relays[0].state, RelayState::Running);
        assert_eq!(relays[0].kind, RelayKind::Synthetic);
        assert_eq!(relays[0].rtp_port, 5004);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_relay_tasks() {
        let (_tx, mut actor) = create_actor();
        start(&mut actor, dummy_request("kitchen")).await.unwrap().unwrap();
        start(&mut actor, dummy_request("hall")).await.unwrap().unwrap();
        assert_eq!(actor.tasks.len(), 2);

        let stopped = actor.handle_shutdown().await;

        assert_eq!(stopped, vec![DeviceId::new("hall"), DeviceId::new("kitchen")]);
        assert_eq!(actor.relay_count(), 0);
        assert!(actor.tasks.is_empty());

        // The tracker is reopened, so later starts are still tracked.
        start(&mut actor, dummy_request("kitchen")).await.unwrap().unwrap();
        assert_eq!(actor.tasks.len(), 1);
    }
}
