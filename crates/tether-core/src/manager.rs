//! The session manager: one explicit context object owning every session.
//!
//! The manager holds the session table, enforces the concurrency ceiling,
//! resolves adapters from its registry, provisions workspaces, and owns the
//! shutdown path that guarantees no process or worktree outlives it.
//!
//! Must be created inside a tokio runtime; a supervisor task is spawned to
//! restart sessions configured with `auto_restart`.

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tether_proto::{
    ApprovalPreset, MessageDirection, PresetConfig, PresetInfo, SessionEvent, SessionEventKind,
    SessionHandle, SessionMessage, SessionMetrics, SessionStatus, SpawnConfig,
};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::completion::TaskCompletionTimeline;
use crate::config::{ManagerConfig, TetherConfig, validate_spawn_config};
use crate::error::{ManagerError, SessionError};
use crate::health::{HealthReport, SessionCounts, check_adapters};
use crate::presets;
use crate::registry::AdapterRegistry;
use crate::session::{KillSignal, MachineConfig, Session, SessionOptions};
use crate::workspace::{
    FinalizeOptions, FinalizeResult, NoopVcsProvider, ProvisionRequest, VcsProvider, Workspace,
    WorkspaceManager,
};

/// How long a SIGKILL gets to be acknowledged before the session is marked stopped anyway.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Capacity of the manager-wide event channel.
const EVENT_CHANNEL: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StopOptions {
    /// Skip the exit sequence and kill immediately.
    pub force: bool,
    /// Graceful window before escalating; defaults to the configured stop timeout.
    pub timeout_ms: Option<u64>,
}

impl StopOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            timeout_ms: None,
        }
    }

    pub fn graceful(timeout: Duration) -> Self {
        Self {
            force: false,
            timeout_ms: Some(timeout.as_millis() as u64),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SendOptions {
    /// Wait for the next outbound message.
    pub expect_response: bool,
    /// Defaults to the configured response timeout.
    pub timeout_ms: Option<u64>,
}

impl SendOptions {
    pub fn expect_response(timeout: Duration) -> Self {
        Self {
            expect_response: true,
            timeout_ms: Some(timeout.as_millis() as u64),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogOptions {
    /// Only the last `tail` lines.
    pub tail: Option<usize>,
}

/// Criteria for [`Manager::list`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    #[serde(rename = "type")]
    pub agent_type: Option<String>,
    pub role: Option<String>,
    /// Sessions must advertise all of these.
    pub capabilities: Vec<String>,
}

impl SessionFilter {
    pub fn matches(&self, handle: &SessionHandle) -> bool {
        self.status.is_none_or(|s| s == handle.status)
            && self
                .agent_type
                .as_deref()
                .is_none_or(|t| t == handle.agent_type)
            && self
                .role
                .as_deref()
                .is_none_or(|r| handle.role.as_deref() == Some(r))
            && self
                .capabilities
                .iter()
                .all(|c| handle.capabilities.contains(c))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
    pub sessions_stopped: usize,
    pub workspaces_cleaned: usize,
}

#[derive(Clone)]
struct SessionEntry {
    session: Session,
    restarts: u32,
}

struct ManagerInner {
    config: ManagerConfig,
    registry: AdapterRegistry,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    events: broadcast::Sender<SessionEvent>,
    workspaces: WorkspaceManager,
    shutting_down: AtomicBool,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Owns all sessions. Cloning shares the same table.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Manager without a hosting provider; merge requests are recorded locally.
    pub fn new(config: TetherConfig, registry: AdapterRegistry) -> Result<Self, ManagerError> {
        Self::with_provider(config, registry, Arc::new(NoopVcsProvider))
    }

    pub fn with_provider(
        config: TetherConfig,
        registry: AdapterRegistry,
        provider: Arc<dyn VcsProvider>,
    ) -> Result<Self, ManagerError> {
        config.validate()?;
        let (events, supervisor_rx) = broadcast::channel(EVENT_CHANNEL);
        let inner = Arc::new(ManagerInner {
            config: config.manager,
            registry,
            sessions: RwLock::new(HashMap::new()),
            events,
            workspaces: WorkspaceManager::new(config.workspace, provider),
            shutting_down: AtomicBool::new(false),
            supervisor: Mutex::new(None),
        });

        let handle = tokio::spawn(supervise(Arc::downgrade(&inner), supervisor_rx));
        if let Ok(mut slot) = inner.supervisor.try_lock() {
            *slot = Some(handle);
        }
        info!(
            "Manager ready with {} adapters (max {} sessions)",
            inner.registry.len(),
            inner.config.max_sessions
        );
        Ok(Self { inner })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.inner.registry
    }

    /// Events from every session, in per-session order.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    fn session_options(&self) -> SessionOptions {
        let c = &self.inner.config;
        SessionOptions {
            machine: MachineConfig {
                output_buffer_bytes: c.output_buffer_bytes,
                log_lines: c.log_lines,
                debounce: c.debounce(),
                stall_timeout: c.stall_timeout_ms.map(Duration::from_millis),
                weights: c.confidence,
            },
            cols: c.cols,
            rows: c.rows,
        }
    }

    /// Starts a session. With `wait_for_ready` the call also waits for the
    /// tool's first prompt; a failed wait leaves the session running.
    pub async fn spawn(&self, config: SpawnConfig) -> Result<SessionHandle, ManagerError> {
        validate_spawn_config(&config).map_err(|e| ManagerError::InvalidConfig(e.to_string()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let session = {
            let mut sessions = self.inner.sessions.write().await;
            self.ensure_open()?;
            let active = active_count(&sessions);
            let max = self.inner.config.max_sessions;
            if active >= max {
                return Err(ManagerError::CapacityExceeded { active, max });
            }
            let adapter = self
                .inner
                .registry
                .get(&config.agent_type)
                .ok_or_else(|| ManagerError::UnknownAdapter(config.agent_type.clone()))?;
            let session = Session::new(
                id.clone(),
                config.clone(),
                adapter,
                self.session_options(),
                self.inner.events.clone(),
            );
            sessions.insert(
                id.clone(),
                SessionEntry {
                    session: session.clone(),
                    restarts: 0,
                },
            );
            session
        };

        session
            .start()
            .map_err(|e| ManagerError::from_session(&id, e))?;
        info!("Spawned {} session {} ('{}')", config.agent_type, id, config.name);

        if config.wait_for_ready {
            let timeout = config
                .ready_timeout_ms
                .map_or(self.inner.config.ready_timeout(), Duration::from_millis);
            self.await_ready(&session, timeout).await?;
        }
        Ok(session.handle(0))
    }

    async fn await_ready(&self, session: &Session, timeout: Duration) -> Result<(), ManagerError> {
        let status = session
            .wait_for_status(timeout, |s| {
                matches!(
                    s,
                    SessionStatus::Ready | SessionStatus::Busy | SessionStatus::Authenticating
                ) || s.is_terminal()
            })
            .await;
        match status {
            Some(SessionStatus::Ready | SessionStatus::Busy) => Ok(()),
            Some(SessionStatus::Authenticating) => Err(ManagerError::AuthenticationRequired {
                id: session.id().to_string(),
                instructions: session
                    .blocking_prompt()
                    .and_then(|d| d.instructions)
                    .unwrap_or_else(|| "complete the tool's login flow".to_string()),
            }),
            Some(status) => {
                let last = session.logs(Some(1)).pop().unwrap_or_default();
                Err(ManagerError::Process {
                    id: session.id().to_string(),
                    message: format!("session {status} before becoming ready: {last}"),
                })
            }
            None => Err(ManagerError::Timeout {
                what: format!("session {} to become ready", session.id()),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Stops a session. Always ends with the session `stopped`.
    pub async fn stop(&self, id: &str, options: StopOptions) -> Result<SessionHandle, ManagerError> {
        let entry = self.entry(id).await?;
        let session = entry.session;
        if session.status().is_terminal() {
            return Ok(session.handle(entry.restarts));
        }

        if options.force {
            info!("Force-stopping session {} (PID {:?})", id, session.pid());
            self.kill_and_wait(&session).await;
        } else {
            let timeout = options
                .timeout_ms
                .map_or(self.inner.config.stop_timeout(), Duration::from_millis);
            info!("Stopping session {} (PID {:?})", id, session.pid());
            if let Err(e) = session.request_exit() {
                debug!("Graceful stop request for {} failed: {}", id, e);
            }
            let exited = session
                .wait_for_status(timeout, SessionStatus::is_terminal)
                .await;
            if exited.is_none() {
                warn!(
                    "Session {} did not exit within {}ms, escalating to SIGKILL",
                    id,
                    timeout.as_millis()
                );
                self.kill_and_wait(&session).await;
            }
        }

        session.finish_stop();
        Ok(session.handle(entry.restarts))
    }

    async fn kill_and_wait(&self, session: &Session) {
        match session.kill(KillSignal::Kill) {
            Ok(()) | Err(SessionError::NotRunning) => {}
            Err(e) => warn!("Failed to kill session {}: {}", session.id(), e),
        }
        if session
            .wait_for_status(KILL_WAIT, SessionStatus::is_terminal)
            .await
            .is_none()
        {
            warn!("Session {} did not acknowledge SIGKILL", session.id());
        }
    }

    /// Force-stops (if needed) and starts a fresh process with the same id and config.
    pub async fn restart(&self, id: &str) -> Result<SessionHandle, ManagerError> {
        let entry = self.entry(id).await?;
        if !entry.session.status().is_terminal() {
            self.stop(id, StopOptions::forced()).await?;
        }
        let config = entry.session.config().clone();
        let adapter = Arc::clone(entry.session.adapter());

        let (session, restarts) = {
            let mut sessions = self.inner.sessions.write().await;
            self.ensure_open()?;
            let active = sessions
                .iter()
                .filter(|(other, e)| other.as_str() != id && !e.session.status().is_terminal())
                .count();
            let max = self.inner.config.max_sessions;
            if active >= max {
                return Err(ManagerError::CapacityExceeded { active, max });
            }
            let slot = sessions
                .get_mut(id)
                .ok_or_else(|| ManagerError::SessionNotFound(id.to_string()))?;
            let session = Session::new(
                id,
                config.clone(),
                adapter,
                self.session_options(),
                self.inner.events.clone(),
            );
            slot.session = session.clone();
            slot.restarts += 1;
            (session, slot.restarts)
        };

        info!("Restarting session {} (restart #{})", id, restarts);
        session.start().map_err(|e| ManagerError::from_session(id, e))?;
        if config.wait_for_ready {
            let timeout = config
                .ready_timeout_ms
                .map_or(self.inner.config.ready_timeout(), Duration::from_millis);
            self.await_ready(&session, timeout).await?;
        }
        Ok(session.handle(restarts))
    }

    /// Drops a finished session from the table.
    pub async fn remove(&self, id: &str) -> Result<SessionHandle, ManagerError> {
        let mut sessions = self.inner.sessions.write().await;
        let entry = sessions
            .get(id)
            .ok_or_else(|| ManagerError::SessionNotFound(id.to_string()))?;
        let status = entry.session.status();
        if !status.is_terminal() {
            return Err(ManagerError::InvalidState(format!(
                "session {id} is {status}; stop it before removing"
            )));
        }
        let handle = entry.session.handle(entry.restarts);
        sessions.remove(id);
        Ok(handle)
    }

    /// Sessions matching `filter`, oldest first.
    pub async fn list(&self, filter: &SessionFilter) -> Vec<SessionHandle> {
        let sessions = self.inner.sessions.read().await;
        let mut handles: Vec<SessionHandle> = sessions
            .values()
            .map(|e| e.session.handle(e.restarts))
            .filter(|h| filter.matches(h))
            .collect();
        handles.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        handles
    }

    pub async fn get(&self, id: &str) -> Result<SessionHandle, ManagerError> {
        let entry = self.entry(id).await?;
        Ok(entry.session.handle(entry.restarts))
    }

    /// Writes a message. With `expect_response`, waits for the next outbound
    /// message from the session.
    pub async fn send(
        &self,
        id: &str,
        message: &str,
        options: SendOptions,
    ) -> Result<Option<SessionMessage>, ManagerError> {
        let session = self.entry(id).await?.session;
        // Subscribe first so a fast reply is not missed.
        let mut events = self.inner.events.subscribe();
        session
            .send(message)
            .map_err(|e| ManagerError::from_session(id, e))?;
        if !options.expect_response {
            return Ok(None);
        }

        let timeout = options
            .timeout_ms
            .map_or(self.inner.config.response_timeout(), Duration::from_millis);
        let wait = async {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Response wait for {} lagged by {} events", id, n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ManagerError::InvalidState("event channel closed".to_string()));
                    }
                };
                if event.session_id != id {
                    continue;
                }
                match event.kind {
                    SessionEventKind::Message { message }
                        if message.direction == MessageDirection::Outbound =>
                    {
                        return Ok(message);
                    }
                    SessionEventKind::Exited { code, .. } => {
                        return Err(ManagerError::Process {
                            id: id.to_string(),
                            message: format!("exited with code {code:?} before responding"),
                        });
                    }
                    _ => {}
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result.map(Some),
            Err(_) => Err(ManagerError::Timeout {
                what: format!("a response from session {id}"),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Writes raw bytes (keystrokes) to the terminal.
    pub async fn write(&self, id: &str, data: &[u8]) -> Result<(), ManagerError> {
        let session = self.entry(id).await?.session;
        session
            .write(data)
            .map_err(|e| ManagerError::from_session(id, e))
    }

    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), ManagerError> {
        let session = self.entry(id).await?.session;
        session
            .resize(cols, rows)
            .map_err(|e| ManagerError::from_session(id, e))
    }

    /// Delivers a signal; the session moves to stopping.
    pub async fn kill(&self, id: &str, signal: KillSignal) -> Result<(), ManagerError> {
        let session = self.entry(id).await?.session;
        session
            .kill(signal)
            .map_err(|e| ManagerError::from_session(id, e))
    }

    pub async fn logs(&self, id: &str, options: LogOptions) -> Result<Vec<String>, ManagerError> {
        Ok(self.entry(id).await?.session.logs(options.tail))
    }

    /// Live output lines until the session ends.
    pub async fn follow_logs(
        &self,
        id: &str,
    ) -> Result<BoxStream<'static, String>, ManagerError> {
        Ok(self.entry(id).await?.session.follow_logs().boxed())
    }

    pub async fn metrics(&self, id: &str) -> Result<SessionMetrics, ManagerError> {
        let entry = self.entry(id).await?;
        Ok(entry.session.metrics(entry.restarts))
    }

    pub async fn timeline(&self, id: &str) -> Result<TaskCompletionTimeline, ManagerError> {
        Ok(self.entry(id).await?.session.timeline())
    }

    pub async fn health(&self) -> HealthReport {
        let registry = self.inner.registry.clone();
        let adapters = tokio::task::spawn_blocking(move || check_adapters(&registry))
            .await
            .unwrap_or_else(|e| {
                warn!("Adapter checks failed: {}", e);
                Vec::new()
            });
        let statuses: Vec<SessionStatus> = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .map(|e| e.session.status())
            .collect();
        HealthReport::new(
            adapters,
            SessionCounts::from_statuses(statuses),
            self.inner.config.max_sessions,
            self.inner.workspaces.list().await.len(),
        )
    }

    pub fn list_presets(&self) -> Vec<PresetInfo> {
        presets::list_presets()
    }

    pub fn get_preset_config(
        &self,
        preset: ApprovalPreset,
        agent_type: &str,
    ) -> Result<PresetConfig, ManagerError> {
        presets::get_preset_config(&self.inner.registry, preset, agent_type)
            .ok_or_else(|| ManagerError::UnknownAdapter(agent_type.to_string()))
    }

    /// Creates a worktree for a task, optionally bound to a session.
    pub async fn provision_workspace(
        &self,
        request: ProvisionRequest,
    ) -> Result<Workspace, ManagerError> {
        if let Some(session_id) = &request.session_id {
            self.entry(session_id).await?;
        }
        Ok(self.inner.workspaces.provision(request).await?)
    }

    pub async fn finalize_workspace(
        &self,
        id: &str,
        options: FinalizeOptions,
    ) -> Result<FinalizeResult, ManagerError> {
        Ok(self.inner.workspaces.finalize(id, options).await?)
    }

    pub async fn cleanup_workspace(&self, id: &str) -> Result<Workspace, ManagerError> {
        Ok(self.inner.workspaces.cleanup(id).await?)
    }

    pub async fn list_workspaces(&self) -> Vec<Workspace> {
        self.inner.workspaces.list().await
    }

    /// Stops every running session and cleans every open workspace.
    ///
    /// Without `force`, sessions get their graceful window first; either way
    /// no process is left running when this returns.
    pub async fn shutdown(&self, force: bool) -> ShutdownReport {
        // Set under the write lock: spawn and restart check the flag under
        // the same lock, so every session they insert is in `running`.
        let running: Vec<String> = {
            let sessions = self.inner.sessions.write().await;
            self.inner.shutting_down.store(true, Ordering::SeqCst);
            sessions
                .iter()
                .filter(|(_, e)| !e.session.status().is_terminal())
                .map(|(id, _)| id.clone())
                .collect()
        };
        if let Some(handle) = self.inner.supervisor.lock().await.take() {
            handle.abort();
        }
        info!("Shutting down {} running sessions (force: {})", running.len(), force);

        let options = StopOptions {
            force,
            timeout_ms: None,
        };
        let results = futures::future::join_all(
            running.iter().map(|id| self.stop(id, options.clone())),
        )
        .await;
        let sessions_stopped = results.iter().filter(|r| r.is_ok()).count();

        let workspaces_cleaned = self.inner.workspaces.force_cleanup_open().await;
        ShutdownReport {
            sessions_stopped,
            workspaces_cleaned,
        }
    }

    fn ensure_open(&self) -> Result<(), ManagerError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            Err(ManagerError::InvalidState("manager is shutting down".to_string()))
        } else {
            Ok(())
        }
    }

    async fn entry(&self, id: &str) -> Result<SessionEntry, ManagerError> {
        self.inner
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ManagerError::SessionNotFound(id.to_string()))
    }
}

fn active_count(sessions: &HashMap<String, SessionEntry>) -> usize {
    sessions
        .values()
        .filter(|e| !e.session.status().is_terminal())
        .count()
}

/// Restarts `auto_restart` sessions after a stall or an unrequested crash.
async fn supervise(inner: Weak<ManagerInner>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Supervisor lagged by {} events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let crashed = match &event.kind {
            SessionEventKind::Stalled { .. } => true,
            SessionEventKind::Exited {
                code,
                requested: false,
            } => *code != Some(0),
            _ => false,
        };
        if !crashed {
            continue;
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let manager = Manager { inner };
        if manager.inner.shutting_down.load(Ordering::SeqCst) {
            continue;
        }
        let Ok(entry) = manager.entry(&event.session_id).await else {
            continue;
        };
        if !entry.session.config().auto_restart {
            continue;
        }
        // Events from a process that has already been replaced.
        if entry
            .session
            .handle(entry.restarts)
            .started_at
            .is_some_and(|started| event.at < started)
        {
            continue;
        }
        if entry.restarts >= manager.inner.config.max_restarts {
            warn!(
                "Session {} hit the restart limit ({}); leaving it {}",
                event.session_id,
                manager.inner.config.max_restarts,
                entry.session.status()
            );
            continue;
        }

        info!(
            "Auto-restarting session {} after {}",
            event.session_id,
            event.kind.name()
        );
        let id = event.session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.restart(&id).await {
                warn!("Auto-restart of {} failed: {}", id, e);
            }
        });
    }
    debug!("Supervisor finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn handle(agent_type: &str, role: Option<&str>, caps: &[&str]) -> SessionHandle {
        SessionHandle {
            id: "id".into(),
            name: "n".into(),
            agent_type: agent_type.into(),
            status: SessionStatus::Ready,
            pid: None,
            role: role.map(str::to_string),
            capabilities: caps.iter().map(|c| (*c).to_string()).collect(),
            started_at: Some(Utc::now()),
            last_activity_at: None,
            restarts: 0,
        }
    }

    #[test]
    fn test_filter_matches() {
        let h = handle("claude", Some("reviewer"), &["rust", "review"]);
        assert!(SessionFilter::default().matches(&h));
        assert!(
            SessionFilter {
                agent_type: Some("claude".into()),
                capabilities: vec!["rust".into()],
                ..SessionFilter::default()
            }
            .matches(&h)
        );
        assert!(
            !SessionFilter {
                capabilities: vec!["go".into()],
                ..SessionFilter::default()
            }
            .matches(&h)
        );
        assert!(
            !SessionFilter {
                role: Some("writer".into()),
                ..SessionFilter::default()
            }
            .matches(&h)
        );
        assert!(
            !SessionFilter {
                status: Some(SessionStatus::Busy),
                ..SessionFilter::default()
            }
            .matches(&h)
        );
    }

    #[test]
    fn test_options_serde_defaults() {
        let stop: StopOptions = serde_json::from_str("{}").unwrap();
        assert!(!stop.force);
        let send: SendOptions = serde_json::from_str(r#"{"expectResponse":true}"#).unwrap();
        assert!(send.expect_response);
        assert_eq!(send.timeout_ms, None);
    }
}
