//! Live agent sessions.
//!
//! A [`Session`] owns one process on a pseudo-terminal plus the
//! [`SessionMachine`] that interprets its output. A driver task feeds output,
//! exit and timer inputs into the machine; callers feed sends, writes and stop
//! requests. Every input runs under the machine lock and its effects are
//! applied before the lock is released, so events for one session are
//! published in the order the terminal produced them.

pub mod machine;
pub mod pty;

use chrono::Utc;
use futures::Stream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tether_proto::{
    BlockingPromptDetection, SessionEvent, SessionEventKind, SessionHandle, SessionMetrics,
    SessionStatus, SpawnConfig,
};
use tokio::sync::{Notify, broadcast, mpsc, oneshot, watch};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::adapter::CliAdapter;
use crate::completion::TaskCompletionTimeline;
use crate::error::SessionError;

pub use machine::{Effect, MachineConfig, SessionMachine, key_sequence};
pub use pty::{KillSignal, OutputEvent, PtyProcess, PtySpawnSpec, merged_env};

/// How long to keep reading after the process exits.
const EXIT_DRAIN: Duration = Duration::from_millis(200);

/// Capacity of the per-session log line channel.
const LINE_CHANNEL: usize = 1024;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub machine: MachineConfig,
    pub cols: u16,
    pub rows: u16,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            machine: MachineConfig::default(),
            cols: 120,
            rows: 40,
        }
    }
}

struct SessionShared {
    id: String,
    config: SpawnConfig,
    adapter: Arc<dyn CliAdapter>,
    cols: u16,
    rows: u16,
    machine: Mutex<SessionMachine>,
    process: Mutex<Option<PtyProcess>>,
    pid: Mutex<Option<u32>>,
    status: watch::Sender<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
    lines: Mutex<Option<broadcast::Sender<String>>>,
    wake: Notify,
}

/// Cheap handle to one running (or finished) session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("type", &self.shared.config.agent_type)
            .field("status", &self.status())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Creates a pending session. Nothing runs until [`Session::start`].
    pub fn new(
        id: impl Into<String>,
        config: SpawnConfig,
        adapter: Arc<dyn CliAdapter>,
        options: SessionOptions,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let id = id.into();
        let mut machine_config = options.machine;
        if let Some(ms) = config.stall_timeout_ms {
            machine_config.stall_timeout = Some(Duration::from_millis(ms));
        }
        let machine = SessionMachine::new(
            id.clone(),
            Arc::clone(&adapter),
            &config.rule_overrides,
            machine_config,
        );
        let (status, _) = watch::channel(SessionStatus::Pending);
        let (lines, _) = broadcast::channel(LINE_CHANNEL);
        Self {
            shared: Arc::new(SessionShared {
                id,
                cols: config.cols.unwrap_or(options.cols),
                rows: config.rows.unwrap_or(options.rows),
                config,
                adapter,
                machine: Mutex::new(machine),
                process: Mutex::new(None),
                pid: Mutex::new(None),
                status,
                events,
                lines: Mutex::new(Some(lines)),
                wake: Notify::new(),
            }),
        }
    }

    /// Pending → starting, then spawns the process. A spawn failure leaves
    /// the session in `error`.
    pub fn start(&self) -> Result<(), SessionError> {
        let shared = &self.shared;
        // Checked under the machine lock so a concurrent stop cannot slip in.
        let mut claimed = false;
        shared.dispatch(|m| {
            if m.status() != SessionStatus::Pending {
                return Vec::new();
            }
            claimed = true;
            m.begin_start(Instant::now())
        });
        if !claimed {
            return Err(SessionError::InvalidState {
                status: self.status(),
                operation: "start",
            });
        }

        let spec = PtySpawnSpec {
            command: shared.adapter.command().to_string(),
            args: shared.adapter.args(&shared.config),
            cwd: shared.config.workdir.clone(),
            env: merged_env(shared.adapter.env(&shared.config), &shared.config.env),
            cols: shared.cols,
            rows: shared.rows,
        };
        info!(
            session_id = %shared.id,
            "Starting {} session '{}': {} {}",
            shared.adapter.adapter_type(),
            shared.config.name,
            spec.command,
            spec.args.join(" ")
        );

        let (process, streams) = match PtyProcess::spawn(&spec) {
            Ok(spawned) => spawned,
            Err(e) => {
                let message = e.to_string();
                warn!(session_id = %shared.id, "Spawn failed: {}", message);
                shared.dispatch(|m| m.spawn_failed(&message));
                return Err(SessionError::Spawn {
                    command: spec.command,
                    message,
                });
            }
        };

        *lock(&shared.pid) = process.pid();
        {
            let mut slot = lock(&shared.process);
            let mut process = process;
            // A stop that arrived while the process was being created found
            // nothing to signal.
            let status = self.status();
            if status == SessionStatus::Stopping || status.is_terminal() {
                debug!(session_id = %shared.id, "Stopped during spawn, killing");
                if let Err(e) = process.signal(KillSignal::Kill) {
                    warn!(session_id = %shared.id, "Kill after stop failed: {}", e);
                }
            }
            *slot = Some(process);
        }

        let span = info_span!("session", session_id = %shared.id);
        tokio::spawn(drive(Arc::clone(shared), streams.output, streams.exit).instrument(span));
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn config(&self) -> &SpawnConfig {
        &self.shared.config
    }

    pub fn adapter(&self) -> &Arc<dyn CliAdapter> {
        &self.shared.adapter
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.borrow()
    }

    pub fn pid(&self) -> Option<u32> {
        *lock(&self.shared.pid)
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    /// Waits until `pred` holds for the status, or `timeout` elapses.
    pub async fn wait_for_status(
        &self,
        timeout: Duration,
        pred: impl Fn(SessionStatus) -> bool,
    ) -> Option<SessionStatus> {
        let mut rx = self.shared.status.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|s| pred(*s))).await;
        match result {
            Ok(Ok(status)) => Some(*status),
            _ => None,
        }
    }

    /// Formats and writes a message; ready → busy.
    pub fn send(&self, message: &str) -> Result<(), SessionError> {
        self.shared.try_dispatch(|m| m.send(message, Instant::now()))
    }

    /// Writes raw bytes; ready → busy.
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        self.shared.try_dispatch(|m| m.write(data, Instant::now()))
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        let process = lock(&self.shared.process);
        let process = process.as_ref().ok_or(SessionError::NotRunning)?;
        process.resize(cols, rows)?;
        debug!(session_id = %self.shared.id, cols, rows, "Resized terminal");
        Ok(())
    }

    /// Non-terminal → stopping, then delivers `signal`. The process exit
    /// completes the move to `stopped`.
    pub fn kill(&self, signal: KillSignal) -> Result<(), SessionError> {
        if self.status().is_terminal() {
            return Ok(());
        }
        self.shared.dispatch(|m| m.begin_stop());
        let mut process = lock(&self.shared.process);
        let process = process.as_mut().ok_or(SessionError::NotRunning)?;
        process.signal(signal)?;
        Ok(())
    }

    /// Asks the tool to quit: its exit sequence if it has one, SIGTERM otherwise.
    pub fn request_exit(&self) -> Result<(), SessionError> {
        if self.status().is_terminal() {
            return Ok(());
        }
        let Some(sequence) = self.shared.adapter.exit_sequence().map(str::to_string) else {
            return self.kill(KillSignal::Terminate);
        };
        self.shared.dispatch(|m| m.begin_stop());
        let mut process = lock(&self.shared.process);
        let process = process.as_mut().ok_or(SessionError::NotRunning)?;
        debug!(session_id = %self.shared.id, "Writing exit sequence");
        process.write_all(sequence.as_bytes())?;
        Ok(())
    }

    /// Marks the session stopped regardless of what the process did.
    pub fn finish_stop(&self) {
        self.shared.dispatch(|m| m.force_stopped());
    }

    pub fn handle(&self, restarts: u32) -> SessionHandle {
        let machine = lock(&self.shared.machine);
        SessionHandle {
            id: self.shared.id.clone(),
            name: self.shared.config.name.clone(),
            agent_type: self.shared.config.agent_type.clone(),
            status: machine.status(),
            pid: self.pid(),
            role: self.shared.config.role.clone(),
            capabilities: self.shared.config.capabilities.clone(),
            started_at: machine.started_at(),
            last_activity_at: machine.last_activity_at(),
            restarts,
        }
    }

    pub fn logs(&self, tail: Option<usize>) -> Vec<String> {
        lock(&self.shared.machine).logs(tail)
    }

    /// Live stream of normalized output lines; ends when the session does.
    pub fn follow_logs(&self) -> impl Stream<Item = String> + Send + use<> {
        let rx = lock(&self.shared.lines).as_ref().map(broadcast::Sender::subscribe);
        futures::stream::unfold(rx, |rx| async move {
            let mut rx = rx?;
            loop {
                match rx.recv().await {
                    Ok(line) => return Some((line, Some(rx))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Log follower lagged by {} lines", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    pub fn metrics(&self, restarts: u32) -> SessionMetrics {
        lock(&self.shared.machine).metrics(Instant::now(), restarts)
    }

    pub fn timeline(&self) -> TaskCompletionTimeline {
        lock(&self.shared.machine).timeline()
    }

    pub fn blocking_prompt(&self) -> Option<BlockingPromptDetection> {
        lock(&self.shared.machine).blocking_prompt().cloned()
    }
}

impl SessionShared {
    /// Runs one machine input and applies its effects under the machine lock.
    fn dispatch(&self, f: impl FnOnce(&mut SessionMachine) -> Vec<Effect>) {
        let mut machine = lock(&self.machine);
        let effects = f(&mut machine);
        if let Err(e) = self.apply(effects) {
            warn!(session_id = %self.id, "Terminal write failed: {}", e);
        }
        drop(machine);
        self.wake.notify_one();
    }

    fn try_dispatch(
        &self,
        f: impl FnOnce(&mut SessionMachine) -> Result<Vec<Effect>, SessionError>,
    ) -> Result<(), SessionError> {
        let mut machine = lock(&self.machine);
        let effects = f(&mut machine)?;
        let result = self.apply(effects);
        drop(machine);
        self.wake.notify_one();
        result
    }

    fn apply(&self, effects: Vec<Effect>) -> Result<(), SessionError> {
        let mut result = Ok(());
        for effect in effects {
            match effect {
                Effect::Emit(kind) => self.publish(kind),
                Effect::Write(bytes) => {
                    let mut process = lock(&self.process);
                    let outcome = match process.as_mut() {
                        Some(p) => p.write_all(&bytes).map_err(SessionError::from),
                        None => Err(SessionError::NotRunning),
                    };
                    if result.is_ok() {
                        result = outcome;
                    }
                }
                Effect::Terminate => {
                    if let Some(p) = lock(&self.process).as_mut()
                        && let Err(e) = p.signal(KillSignal::Kill)
                    {
                        debug!(session_id = %self.id, "Kill after reported exit failed: {}", e);
                    }
                }
            }
        }
        result
    }

    fn publish(&self, kind: SessionEventKind) {
        match &kind {
            SessionEventKind::StatusChanged { to, .. } => {
                self.status.send_replace(*to);
            }
            SessionEventKind::Output { line } => {
                if let Some(lines) = lock(&self.lines).as_ref() {
                    let _ = lines.send(line.clone());
                }
            }
            _ => {}
        }
        let _ = self.events.send(SessionEvent {
            session_id: self.id.clone(),
            at: Utc::now(),
            kind,
        });
    }
}

async fn drive(
    shared: Arc<SessionShared>,
    mut output: mpsc::Receiver<OutputEvent>,
    mut exit: oneshot::Receiver<Option<i32>>,
) {
    let mut output_open = true;
    loop {
        let deadline = lock(&shared.machine).next_deadline();
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = output.recv(), if output_open => match event {
                Some(OutputEvent::Data(bytes)) => {
                    shared.dispatch(|m| m.on_output(&bytes, Instant::now()));
                }
                Some(OutputEvent::Error(e)) => {
                    debug!("Terminal closed: {}", e);
                    output_open = false;
                }
                Some(OutputEvent::Eof) | None => output_open = false,
            },
            code = &mut exit => {
                let code = code.ok().flatten();
                if output_open {
                    drain(&shared, &mut output).await;
                }
                info!("Process exited with code {:?}", code);
                shared.dispatch(|m| m.on_exit(code));
                break;
            }
            () = timer => {
                shared.dispatch(|m| m.on_deadline(Instant::now()));
            }
            () = shared.wake.notified() => {}
        }
    }

    lock(&shared.process).take();
    lock(&shared.lines).take();
    debug!("Session driver finished");
}

async fn drain(shared: &SessionShared, output: &mut mpsc::Receiver<OutputEvent>) {
    let until = tokio::time::Instant::now() + EXIT_DRAIN;
    while let Ok(Some(OutputEvent::Data(bytes))) = tokio::time::timeout_at(until, output.recv()).await {
        shared.dispatch(|m| m.on_output(&bytes, Instant::now()));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::FakeAdapter;
    use futures::StreamExt;

    fn make_session(adapter: FakeAdapter, config: SpawnConfig) -> (Session, broadcast::Receiver<SessionEvent>) {
        let (events, rx) = broadcast::channel(1024);
        let options = SessionOptions {
            machine: MachineConfig {
                debounce: Duration::from_millis(50),
                ..MachineConfig::default()
            },
            ..SessionOptions::default()
        };
        (
            Session::new("s1", config, Arc::new(adapter), options, events),
            rx,
        )
    }

    async fn next_message(rx: &mut broadcast::Receiver<SessionEvent>) -> String {
        loop {
            let event = rx.recv().await.unwrap();
            if let SessionEventKind::Message { message } = event.kind
                && message.direction == tether_proto::MessageDirection::Outbound
            {
                return message.content;
            }
        }
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (session, mut rx) = make_session(FakeAdapter::new("fake"), SpawnConfig::new("t", "fake"));
        session.start().unwrap();
        assert!(session.pid().is_some());

        let status = session
            .wait_for_status(Duration::from_secs(5), |s| s == SessionStatus::Ready)
            .await;
        assert_eq!(status, Some(SessionStatus::Ready));

        session.send("hello").unwrap();
        let content = tokio::time::timeout(Duration::from_secs(5), next_message(&mut rx))
            .await
            .unwrap();
        assert!(content.contains("got: hello"));

        let ready_again = session
            .wait_for_status(Duration::from_secs(5), |s| s == SessionStatus::Ready)
            .await;
        assert_eq!(ready_again, Some(SessionStatus::Ready));
        assert_eq!(session.metrics(0).turns_completed, 1);

        session.kill(KillSignal::Kill).unwrap();
        let stopped = session
            .wait_for_status(Duration::from_secs(5), SessionStatus::is_terminal)
            .await;
        assert_eq!(stopped, Some(SessionStatus::Stopped));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let adapter = FakeAdapter::new("fake");
        let mut config = SpawnConfig::new("t", "fake");
        config.workdir = Some("/definitely/not/a/dir".into());
        let (session, _rx) = make_session(adapter, config);
        assert!(matches!(session.start(), Err(SessionError::Spawn { .. })));
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(session.start().is_err());
    }

    #[tokio::test]
    async fn test_exit_during_startup_is_error() {
        let adapter = FakeAdapter::new("fake").with_script("echo 'bad flag' >&2; exit 2");
        let (session, _rx) = make_session(adapter, SpawnConfig::new("t", "fake"));
        session.start().unwrap();
        let status = session
            .wait_for_status(Duration::from_secs(5), SessionStatus::is_terminal)
            .await;
        assert_eq!(status, Some(SessionStatus::Error));
        assert!(session.logs(None).iter().any(|l| l.contains("bad flag")));
    }

    #[tokio::test]
    async fn test_exit_sequence_stops_session() {
        let adapter = FakeAdapter::new("fake")
            .with_script(
                r#"printf 'fake> '; while IFS= read -r line; do [ "$line" = quit ] && exit 0; printf 'fake> '; done"#,
            )
            .with_exit_sequence("quit\r");
        let (session, _rx) = make_session(adapter, SpawnConfig::new("t", "fake"));
        session.start().unwrap();
        session
            .wait_for_status(Duration::from_secs(5), |s| s == SessionStatus::Ready)
            .await
            .unwrap();

        session.request_exit().unwrap();
        let status = session
            .wait_for_status(Duration::from_secs(5), SessionStatus::is_terminal)
            .await;
        assert_eq!(status, Some(SessionStatus::Stopped));
    }

    #[tokio::test]
    async fn test_follow_logs_streams_lines() {
        let adapter = FakeAdapter::new("fake").with_script("echo one; echo two; sleep 0.2");
        let (session, _rx) = make_session(adapter, SpawnConfig::new("t", "fake"));
        let lines = session.follow_logs();
        session.start().unwrap();
        let lines: Vec<String> = tokio::time::timeout(Duration::from_secs(5), lines.collect())
            .await
            .unwrap();
        assert_eq!(lines, vec!["one", "two"]);
    }
}
