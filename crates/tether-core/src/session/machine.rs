//! The per-session state machine, free of any process or terminal.
//!
//! [`SessionMachine`] consumes inputs (output chunks, sends, exits, timer
//! deadlines) and returns [`Effect`]s for the caller to carry out. The PTY
//! session owns one machine and feeds it from a single driver task, so every
//! state change for a session happens in terminal order.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_proto::{
    AutoResponseRule, BlockingPromptCategory, BlockingPromptDetection, MessageDirection,
    MessageKind, ResponseType, SessionEventKind, SessionMessage, SessionMetrics, SessionStatus,
    TaskCompletionTraceRecord, TraceEvent,
};
use tracing::{debug, info, warn};

use crate::adapter::CliAdapter;
use crate::classifier::CLASSIFY_TAIL_LINES;
use crate::completion::{ConfidenceWeights, TaskCompletionTimeline, TaskCompletionTracker};
use crate::error::SessionError;
use crate::text;

/// Raw bytes kept for screen detection (ready, loading, prompts, exit).
const SCREEN_BYTES: usize = 16 * 1024;

/// Characters of screen text attached to trace records.
const EXCERPT_CHARS: usize = 120;

#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Bound on the unparsed message buffer.
    pub output_buffer_bytes: usize,
    /// Normalized lines retained for `logs`.
    pub log_lines: usize,
    pub debounce: Duration,
    pub stall_timeout: Option<Duration>,
    pub weights: ConfidenceWeights,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            output_buffer_bytes: 64 * 1024,
            log_lines: 2_000,
            debounce: Duration::from_millis(400),
            stall_timeout: None,
            weights: ConfidenceWeights::default(),
        }
    }
}

/// Something the owner of the machine must do.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Emit(SessionEventKind),
    /// Bytes to write to the terminal.
    Write(Vec<u8>),
    /// The tool reported its own exit; the process should be reaped.
    Terminate,
}

struct CompiledRule {
    regex: Regex,
    rule: AutoResponseRule,
}

pub struct SessionMachine {
    id: String,
    adapter: Arc<dyn CliAdapter>,
    config: MachineConfig,
    rules: Vec<CompiledRule>,
    status: SessionStatus,

    buffer: Vec<u8>,
    screen: Vec<u8>,
    pending_line: Vec<u8>,
    logs: VecDeque<String>,

    ready_seen: bool,
    exit_requested: bool,
    active_prompt: Option<(BlockingPromptCategory, String)>,
    last_detection: Option<BlockingPromptDetection>,

    debounce_deadline: Option<Instant>,
    last_output: Instant,
    stall_reported: bool,
    tracker: TaskCompletionTracker,

    message_seq: u64,
    messages_sent: u64,
    messages_received: u64,
    bytes_received: u64,
    turns_completed: u64,
    started_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    last_activity_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for SessionMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMachine")
            .field("id", &self.id)
            .field("adapter", &self.adapter.adapter_type())
            .field("status", &self.status)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl SessionMachine {
    /// Builds a machine. `overrides` are evaluated before the adapter's own rules.
    pub fn new(
        id: impl Into<String>,
        adapter: Arc<dyn CliAdapter>,
        overrides: &[AutoResponseRule],
        config: MachineConfig,
    ) -> Self {
        let id = id.into();
        let rules = overrides
            .iter()
            .cloned()
            .chain(adapter.auto_response_rules())
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(regex) => Some(CompiledRule { regex, rule }),
                Err(e) => {
                    warn!(session_id = %id, "Skipping auto-response rule '{}': {}", rule.description, e);
                    None
                }
            })
            .collect();
        let tracker = TaskCompletionTracker::new(config.weights);
        Self {
            id,
            adapter,
            config,
            rules,
            status: SessionStatus::Pending,
            buffer: Vec::new(),
            screen: Vec::new(),
            pending_line: Vec::new(),
            logs: VecDeque::new(),
            ready_seen: false,
            exit_requested: false,
            active_prompt: None,
            last_detection: None,
            debounce_deadline: None,
            last_output: Instant::now(),
            stall_reported: false,
            tracker,
            message_seq: 0,
            messages_sent: 0,
            messages_received: 0,
            bytes_received: 0,
            turns_completed: 0,
            started_at: None,
            started_instant: None,
            last_activity_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn adapter(&self) -> &Arc<dyn CliAdapter> {
        &self.adapter
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        self.last_activity_at
    }

    /// The blocking prompt currently on screen, if any.
    pub fn blocking_prompt(&self) -> Option<&BlockingPromptDetection> {
        self.last_detection.as_ref()
    }

    /// Pending → starting.
    pub fn begin_start(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.transition(SessionStatus::Starting, &mut effects);
        self.started_at = Some(Utc::now());
        self.started_instant = Some(now);
        self.last_output = now;
        effects
    }

    /// The process could not be created. Terminal for this session.
    pub fn spawn_failed(&mut self, message: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.transition(SessionStatus::Error, &mut effects);
        effects.push(Effect::Emit(SessionEventKind::Error {
            message: message.to_string(),
        }));
        effects
    }

    /// Processes one chunk of raw terminal output.
    pub fn on_output(&mut self, chunk: &[u8], now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.status.is_terminal() || chunk.is_empty() {
            return effects;
        }

        self.bytes_received += chunk.len() as u64;
        self.last_output = now;
        self.stall_reported = false;
        self.last_activity_at = Some(Utc::now());

        self.buffer.extend_from_slice(chunk);
        trim_front(&mut self.buffer, self.config.output_buffer_bytes);
        self.screen.extend_from_slice(chunk);
        trim_front(&mut self.screen, SCREEN_BYTES);
        self.collect_lines(chunk, &mut effects);

        let screen = text::normalize(&self.screen);
        let detection = self.adapter.detect_blocking_prompt(&screen);
        self.handle_prompt(&screen, detection, &mut effects);

        if !self.ready_seen
            && self.last_detection.is_none()
            && matches!(
                self.status,
                SessionStatus::Starting | SessionStatus::Authenticating
            )
            && self.adapter.detect_ready(&screen)
        {
            self.ready_seen = true;
            self.transition(SessionStatus::Ready, &mut effects);
            effects.push(Effect::Emit(SessionEventKind::Ready));
            info!(session_id = %self.id, "Session ready");
        }

        let exit = self.adapter.detect_exit(&screen);
        if exit.exited {
            info!(
                session_id = %self.id,
                "Tool reported exit: {}",
                exit.reason.as_deref().unwrap_or("no reason")
            );
            self.debounce_deadline = None;
            self.transition(SessionStatus::Stopped, &mut effects);
            effects.push(Effect::Emit(SessionEventKind::Exited {
                code: exit.code,
                requested: self.exit_requested,
            }));
            effects.push(Effect::Terminate);
            return effects;
        }

        if matches!(self.status, SessionStatus::Ready | SessionStatus::Busy) {
            self.try_parse(&mut effects);
        }

        if self.status == SessionStatus::Busy {
            self.track_completion(&screen, now);
        }

        effects
    }

    /// Formats and writes a message. Ready → busy.
    pub fn send(&mut self, message: &str, now: Instant) -> Result<Vec<Effect>, SessionError> {
        self.ensure_accepts_input("send")?;
        let mut bytes = self.adapter.format_input(message).into_bytes();
        bytes.push(b'\r');

        let mut effects = vec![Effect::Write(bytes)];
        self.begin_turn(now, &mut effects);
        self.messages_sent += 1;

        let seq = self.next_seq();
        let record = SessionMessage::new(
            &self.id,
            seq,
            MessageDirection::Inbound,
            MessageKind::Task,
            message,
        );
        effects.push(Effect::Emit(SessionEventKind::Message { message: record }));
        Ok(effects)
    }

    /// Writes raw bytes. Ready → busy.
    pub fn write(&mut self, data: &[u8], now: Instant) -> Result<Vec<Effect>, SessionError> {
        self.ensure_accepts_input("write")?;
        let mut effects = vec![Effect::Write(data.to_vec())];
        self.begin_turn(now, &mut effects);
        Ok(effects)
    }

    /// Marks a stop request: non-terminal → stopping.
    pub fn begin_stop(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.exit_requested = true;
        self.debounce_deadline = None;
        if !self.status.is_terminal() && self.status != SessionStatus::Stopping {
            self.transition(SessionStatus::Stopping, &mut effects);
        }
        effects
    }

    /// Forces the terminal `stopped` status after a kill that the process
    /// did not acknowledge in time.
    pub fn force_stopped(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.status.is_terminal() {
            return effects;
        }
        self.exit_requested = true;
        self.transition(SessionStatus::Stopped, &mut effects);
        effects.push(Effect::Emit(SessionEventKind::Exited {
            code: None,
            requested: true,
        }));
        effects
    }

    /// The process exited.
    pub fn on_exit(&mut self, code: Option<i32>) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.flush_pending_line(&mut effects);
        self.debounce_deadline = None;
        if self.status.is_terminal() {
            return effects;
        }

        let failed_start = !self.exit_requested
            && self.status == SessionStatus::Starting
            && code.is_some_and(|c| c != 0);
        if failed_start {
            self.transition(SessionStatus::Error, &mut effects);
            let mut message = format!("Process exited during startup with code {}", code.unwrap_or(-1));
            if let Some(line) = self.logs.back() {
                message.push_str(": ");
                message.push_str(&text::truncate_with_ellipsis(line, 200));
            }
            effects.push(Effect::Emit(SessionEventKind::Error { message }));
        } else {
            self.transition(SessionStatus::Stopped, &mut effects);
        }
        effects.push(Effect::Emit(SessionEventKind::Exited {
            code,
            requested: self.exit_requested,
        }));
        effects
    }

    /// Earliest instant at which [`SessionMachine::on_deadline`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let stall = self.stall_deadline();
        match (self.debounce_deadline, stall) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fires an elapsed debounce and reports stalls.
    pub fn on_deadline(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.debounce_deadline.is_some_and(|d| d <= now) {
            self.debounce_deadline = None;
            self.fire_debounce(&mut effects);
        }
        if self.stall_deadline().is_some_and(|d| d <= now) {
            self.stall_reported = true;
            let silent_ms = now.duration_since(self.last_output).as_millis() as u64;
            warn!(session_id = %self.id, "Session stalled: no output for {}ms", silent_ms);
            effects.push(Effect::Emit(SessionEventKind::Stalled { silent_ms }));
        }
        effects
    }

    /// Last `tail` normalized lines, including the unterminated current line.
    pub fn logs(&self, tail: Option<usize>) -> Vec<String> {
        let mut lines: Vec<String> = self.logs.iter().cloned().collect();
        let partial = text::normalize(&self.pending_line);
        if !partial.trim().is_empty() {
            lines.push(partial.trim_end().to_string());
        }
        if let Some(n) = tail
            && lines.len() > n
        {
            lines.drain(..lines.len() - n);
        }
        lines
    }

    pub fn metrics(&self, now: Instant, restarts: u32) -> SessionMetrics {
        SessionMetrics {
            session_id: self.id.clone(),
            status: self.status,
            uptime_ms: self
                .started_instant
                .map_or(0, |s| now.duration_since(s).as_millis() as u64),
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            bytes_received: self.bytes_received,
            restarts,
            turns_completed: self.turns_completed,
            last_activity_at: self.last_activity_at,
        }
    }

    pub fn timeline(&self) -> TaskCompletionTimeline {
        self.tracker.timeline()
    }

    fn ensure_accepts_input(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.status.accepts_input() {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                status: self.status,
                operation,
            })
        }
    }

    fn begin_turn(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        if self.status == SessionStatus::Ready {
            self.transition(SessionStatus::Busy, effects);
        }
        // Detection and parsing restart from what the tool prints in reply.
        self.screen.clear();
        self.buffer.clear();
        self.active_prompt = None;
        self.last_detection = None;
        self.debounce_deadline = None;
        self.last_output = now;
        self.stall_reported = false;
        self.last_activity_at = Some(Utc::now());
    }

    fn next_seq(&mut self) -> u64 {
        self.message_seq += 1;
        self.message_seq
    }

    fn stall_deadline(&self) -> Option<Instant> {
        let timeout = self.config.stall_timeout?;
        if self.stall_reported
            || !matches!(self.status, SessionStatus::Starting | SessionStatus::Busy)
        {
            return None;
        }
        Some(self.last_output + timeout)
    }

    fn transition(&mut self, to: SessionStatus, effects: &mut Vec<Effect>) {
        let from = self.status;
        if !from.can_transition_to(to) {
            debug!(session_id = %self.id, "Ignoring transition {} -> {}", from, to);
            return;
        }
        self.status = to;
        debug!(session_id = %self.id, "Status {} -> {}", from, to);
        effects.push(Effect::Emit(SessionEventKind::StatusChanged { from, to }));
    }

    fn collect_lines(&mut self, chunk: &[u8], effects: &mut Vec<Effect>) {
        for &byte in chunk {
            if byte == b'\n' {
                self.flush_pending_line(effects);
            } else {
                self.pending_line.push(byte);
            }
        }
        if self.pending_line.len() > self.config.output_buffer_bytes {
            self.flush_pending_line(effects);
        }
    }

    fn flush_pending_line(&mut self, effects: &mut Vec<Effect>) {
        if self.pending_line.is_empty() {
            return;
        }
        let line = text::normalize(&self.pending_line);
        self.pending_line.clear();
        let line = line.trim_end();
        if line.trim().is_empty() {
            return;
        }
        self.logs.push_back(line.to_string());
        while self.logs.len() > self.config.log_lines {
            self.logs.pop_front();
        }
        effects.push(Effect::Emit(SessionEventKind::Output {
            line: line.to_string(),
        }));
    }

    fn handle_prompt(
        &mut self,
        screen: &str,
        detection: BlockingPromptDetection,
        effects: &mut Vec<Effect>,
    ) {
        let Some(category) = detection.category.filter(|_| detection.detected) else {
            self.active_prompt = None;
            self.last_detection = None;
            return;
        };

        let key = (category, detection.prompt.clone().unwrap_or_default());
        let is_new = self.active_prompt.as_ref() != Some(&key);
        self.last_detection = Some(detection.clone());
        if !is_new {
            return;
        }
        self.active_prompt = Some(key);

        if category == BlockingPromptCategory::Login {
            if self.status == SessionStatus::Starting {
                self.transition(SessionStatus::Authenticating, effects);
            }
            let mut login = self.adapter.detect_login(screen);
            if login.url.is_none() {
                login.url = detection.url.clone();
            }
            if login.instructions.is_none() {
                login.instructions = detection.instructions.clone();
            }
            login.required = true;
            warn!(session_id = %self.id, "Authentication required");
            effects.push(Effect::Emit(SessionEventKind::LoginRequired { detection: login }));
            return;
        }

        info!(
            session_id = %self.id,
            "Blocking prompt ({}): {}",
            category.as_str(),
            detection.prompt.as_deref().unwrap_or("")
        );
        effects.push(Effect::Emit(SessionEventKind::BlockingPrompt {
            detection: detection.clone(),
        }));
        self.auto_respond(screen, category, effects);
    }

    fn auto_respond(
        &mut self,
        screen: &str,
        detected: BlockingPromptCategory,
        effects: &mut Vec<Effect>,
    ) {
        if detected.is_never_auto() {
            return;
        }
        let tail = text::tail(screen, CLASSIFY_TAIL_LINES);
        let Some(compiled) = self.rules.iter().find(|r| {
            r.rule.safe && !r.rule.category.is_never_auto() && r.regex.is_match(tail)
        }) else {
            return;
        };

        let bytes = response_bytes(&compiled.rule);
        info!(
            session_id = %self.id,
            "Auto-responding to {} prompt: {}",
            detected.as_str(),
            compiled.rule.description
        );
        effects.push(Effect::Write(bytes));
        // The answered prompt must not mask what the tool prints next.
        self.screen.clear();
        self.last_detection = None;
        effects.push(Effect::Emit(SessionEventKind::AutoResponded {
            description: compiled.rule.description.clone(),
            response: compiled.rule.response.clone(),
        }));
    }

    fn try_parse(&mut self, effects: &mut Vec<Effect>) {
        let buffered = text::normalize(&self.buffer);
        let Some(parsed) = self.adapter.parse_output(&buffered) else {
            return;
        };
        self.buffer.clear();
        self.messages_received += 1;

        let kind = parsed.message_kind();
        let seq = self.next_seq();
        let message = SessionMessage::new(
            &self.id,
            seq,
            MessageDirection::Outbound,
            kind,
            parsed.content.clone(),
        )
        .with_metadata(parsed.metadata.clone());
        debug!(session_id = %self.id, "Parsed {} chars of output", message.content.len());
        if parsed.is_question {
            effects.push(Effect::Emit(SessionEventKind::Message {
                message: message.clone(),
            }));
            effects.push(Effect::Emit(SessionEventKind::Question { message }));
        } else {
            effects.push(Effect::Emit(SessionEventKind::Message { message }));
        }
    }

    fn signals(&self, screen: &str) -> (bool, bool, bool) {
        (
            self.adapter.detect_loading(screen),
            self.adapter.detect_ready(screen),
            self.adapter.detect_task_complete(screen),
        )
    }

    fn track_completion(&mut self, screen: &str, now: Instant) {
        let (loading, ready, task_complete) = self.signals(screen);
        let signal = (ready || task_complete) && !loading;
        let excerpt = text::truncate_with_ellipsis(text::last_line(screen).trim(), EXCERPT_CHARS);

        self.record(
            TaskCompletionTraceRecord::new(&self.id, TraceEvent::BusySignal)
                .with_flags(loading, ready, task_complete)
                .with_signal(signal)
                .with_excerpt(excerpt.clone()),
        );

        match (signal, self.debounce_deadline.is_some()) {
            (true, false) => {
                self.debounce_deadline = Some(now + self.config.debounce);
                self.record(
                    TaskCompletionTraceRecord::new(&self.id, TraceEvent::DebounceSchedule)
                        .with_flags(loading, ready, task_complete)
                        .with_signal(true)
                        .with_excerpt(excerpt),
                );
            }
            (false, true) => {
                self.debounce_deadline = None;
                self.record(
                    TaskCompletionTraceRecord::new(&self.id, TraceEvent::DebounceRejectSignal)
                        .with_flags(loading, ready, task_complete)
                        .with_excerpt(excerpt),
                );
            }
            _ => {}
        }
    }

    fn fire_debounce(&mut self, effects: &mut Vec<Effect>) {
        if self.status != SessionStatus::Busy {
            self.record(TaskCompletionTraceRecord::new(
                &self.id,
                TraceEvent::DebounceRejectStatus,
            ));
            return;
        }

        let screen = text::normalize(&self.screen);
        let (loading, ready, task_complete) = self.signals(&screen);
        let signal = (ready || task_complete) && !loading;
        if !signal {
            self.record(
                TaskCompletionTraceRecord::new(&self.id, TraceEvent::DebounceRejectSignal)
                    .with_flags(loading, ready, task_complete),
            );
            return;
        }

        self.record(
            TaskCompletionTraceRecord::new(&self.id, TraceEvent::DebounceFire)
                .with_flags(loading, ready, task_complete)
                .with_signal(true),
        );
        let assessment = self.record(
            TaskCompletionTraceRecord::new(&self.id, TraceEvent::TransitionReady)
                .with_flags(loading, ready, task_complete)
                .with_signal(true),
        );
        self.transition(SessionStatus::Ready, effects);
        self.turns_completed += 1;
        info!(
            session_id = %self.id,
            "Turn {} complete (confidence {})",
            assessment.turn,
            assessment.confidence
        );
        effects.push(Effect::Emit(SessionEventKind::TaskComplete {
            confidence: assessment.confidence,
        }));
    }

    fn record(&mut self, record: TaskCompletionTraceRecord) -> crate::completion::Assessment {
        debug!(
            target: "tether::completion",
            session_id = %self.id,
            event = record.event.as_str(),
            loading = record.loading,
            ready = record.ready,
            task_complete = record.task_complete,
            signal = record.signal,
            "completion trace"
        );
        self.tracker.push(record)
    }
}

/// Drops bytes from the front so at most `max` remain, never splitting a
/// UTF-8 sequence.
fn trim_front(buf: &mut Vec<u8>, max: usize) {
    if buf.len() <= max {
        return;
    }
    let mut cut = buf.len() - max;
    while cut < buf.len() && (buf[cut] & 0b1100_0000) == 0b1000_0000 {
        cut += 1;
    }
    buf.drain(..cut);
}

/// Terminal bytes for a named key. Unknown names are sent literally.
pub fn key_sequence(name: &str) -> &str {
    match name.to_ascii_lowercase().as_str() {
        "enter" | "return" => "\r",
        "up" => "\x1b[A",
        "down" => "\x1b[B",
        "right" => "\x1b[C",
        "left" => "\x1b[D",
        "esc" | "escape" => "\x1b",
        "tab" => "\t",
        "space" => " ",
        "backspace" => "\x7f",
        "ctrl-c" => "\x03",
        "ctrl-d" => "\x04",
        _ => name,
    }
}

fn response_bytes(rule: &AutoResponseRule) -> Vec<u8> {
    match rule.response_type {
        ResponseType::Text => format!("{}\r", rule.response).into_bytes(),
        ResponseType::Keys => rule
            .response
            .split_whitespace()
            .map(key_sequence)
            .collect::<String>()
            .into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAdapter;

    fn machine(adapter: FakeAdapter) -> SessionMachine {
        SessionMachine::new("s1", Arc::new(adapter), &[], MachineConfig::default())
    }

    fn started(adapter: FakeAdapter) -> (SessionMachine, Instant) {
        let now = Instant::now();
        let mut m = machine(adapter);
        m.begin_start(now);
        (m, now)
    }

    fn events(effects: &[Effect]) -> Vec<&'static str> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Emit(kind) => Some(kind.name()),
                _ => None,
            })
            .collect()
    }

    fn writes(effects: &[Effect]) -> Vec<Vec<u8>> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Write(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_ready_on_first_prompt_only() {
        let (mut m, now) = started(FakeAdapter::new("x"));
        let effects = m.on_output(b"banner\r\nfake> ", now);
        assert_eq!(m.status(), SessionStatus::Ready);
        assert!(events(&effects).contains(&"ready"));

        let effects = m.on_output(b"\r\nfake> ", now);
        assert!(!events(&effects).contains(&"ready"));
    }

    #[test]
    fn test_send_moves_to_busy_and_records_task() {
        let (mut m, now) = started(FakeAdapter::new("x"));
        m.on_output(b"fake> ", now);

        let effects = m.send("hello", now).unwrap();
        assert_eq!(m.status(), SessionStatus::Busy);
        assert_eq!(writes(&effects), vec![b"hello\r".to_vec()]);
        let message = effects.iter().find_map(|e| match e {
            Effect::Emit(SessionEventKind::Message { message }) => Some(message.clone()),
            _ => None,
        });
        let message = message.unwrap();
        assert_eq!(message.direction, MessageDirection::Inbound);
        assert_eq!(message.kind, MessageKind::Task);
        assert_eq!(message.id, "s1-1");
    }

    #[test]
    fn test_send_rejected_when_pending_or_stopped() {
        let mut m = machine(FakeAdapter::new("x"));
        assert!(matches!(
            m.send("hi", Instant::now()),
            Err(SessionError::InvalidState { .. })
        ));
        m.begin_start(Instant::now());
        m.on_exit(Some(0));
        assert!(m.send("hi", Instant::now()).is_err());
    }

    #[test]
    fn test_parse_clears_buffer_and_emits_message() {
        let (mut m, now) = started(FakeAdapter::new("x"));
        m.on_output(b"fake> ", now);
        m.send("hello", now).unwrap();

        let effects = m.on_output(b"hello\r\ngot: hello\r\n", now);
        assert!(!events(&effects).contains(&"message"));

        let effects = m.on_output(b"fake> ", now);
        let content = effects.iter().find_map(|e| match e {
            Effect::Emit(SessionEventKind::Message { message }) => Some(message.content.clone()),
            _ => None,
        });
        assert_eq!(content.as_deref(), Some("hello\ngot: hello"));
        assert!(m.buffer.is_empty());
    }

    #[test]
    fn test_question_emits_both_events() {
        let (mut m, now) = started(FakeAdapter::new("x"));
        m.on_output(b"fake> ", now);
        m.send("q", now).unwrap();
        let effects = m.on_output(b"Which file?\r\nfake> ", now);
        let names = events(&effects);
        let message_idx = names.iter().position(|n| *n == "message").unwrap();
        assert_eq!(names[message_idx + 1], "question");
    }

    #[test]
    fn test_debounced_completion() {
        let (mut m, now) = started(FakeAdapter::new("x"));
        m.on_output(b"fake> ", now);
        m.send("hi", now).unwrap();
        m.on_output(b"got: hi\r\nfake> ", now);

        let deadline = m.next_deadline().unwrap();
        assert_eq!(deadline, now + Duration::from_millis(400));
        assert_eq!(m.status(), SessionStatus::Busy);

        let effects = m.on_deadline(deadline);
        assert_eq!(m.status(), SessionStatus::Ready);
        assert!(effects.contains(&Effect::Emit(SessionEventKind::TaskComplete {
            confidence: 100
        })));

        let turn = m.timeline().last().cloned().unwrap();
        assert_eq!(turn.confidence, 100);
        assert_eq!(m.metrics(now, 0).turns_completed, 1);
    }

    #[test]
    fn test_flicker_rejects_debounce() {
        let adapter = FakeAdapter::new("x").with_loading_marker("working");
        let (mut m, now) = started(adapter);
        m.on_output(b"fake> ", now);
        m.send("hi", now).unwrap();
        m.on_output(b"fake> ", now);
        assert!(m.next_deadline().is_some());

        m.on_output(b"\r\nworking", now);
        assert!(m.next_deadline().is_none());
        assert_eq!(m.status(), SessionStatus::Busy);

        let turn = m.timeline().last().cloned().unwrap();
        assert_eq!(turn.status, crate::completion::TurnStatus::Rejected);
    }

    #[test]
    fn test_login_transitions_to_authenticating_once() {
        let adapter = FakeAdapter::new("x").with_login_marker("Please log in");
        let (mut m, now) = started(adapter);

        let effects = m.on_output(b"Please log in at https://example.com/auth\r\n", now);
        assert_eq!(m.status(), SessionStatus::Authenticating);
        let login = effects.iter().find_map(|e| match e {
            Effect::Emit(SessionEventKind::LoginRequired { detection }) => Some(detection.clone()),
            _ => None,
        });
        assert_eq!(login.unwrap().url.as_deref(), Some("https://example.com/auth"));

        let effects = m.on_output(b"", now);
        assert!(effects.is_empty());
        let effects = m.on_output(b" ", now);
        assert!(!events(&effects).contains(&"login_required"));
    }

    #[test]
    fn test_auto_response_fires_once_per_prompt() {
        let adapter = FakeAdapter::new("x").with_rule(AutoResponseRule::text(
            r"(?i)update available",
            BlockingPromptCategory::Update,
            "n",
            "Decline update",
        ));
        let (mut m, now) = started(adapter);

        let effects = m.on_output(b"Update available! Install now? (y/n) ", now);
        assert_eq!(writes(&effects), vec![b"n\r".to_vec()]);
        assert!(events(&effects).contains(&"auto_responded"));

        let effects = m.on_output(b" ", now);
        assert!(writes(&effects).is_empty());
    }

    #[test]
    fn test_ready_after_auto_answered_prompt() {
        let adapter = FakeAdapter::new("x").with_rule(AutoResponseRule::text(
            r"(?i)update available",
            BlockingPromptCategory::Update,
            "n",
            "Decline update",
        ));
        let (mut m, now) = started(adapter);

        let effects = m.on_output(b"Update available! Install now? (y/n) ", now);
        assert_eq!(writes(&effects).len(), 1);
        assert!(m.blocking_prompt().is_none());

        let effects = m.on_output(b"n\r\nSkipping update.\r\nfake> ", now);
        assert!(writes(&effects).is_empty());
        assert_eq!(m.status(), SessionStatus::Ready);
        assert!(events(&effects).contains(&"ready"));
    }

    #[test]
    fn test_reply_excludes_previous_prompt() {
        let (mut m, now) = started(FakeAdapter::new("x"));
        m.on_output(b"banner\r\nfake> ", now);
        m.send("hi", now).unwrap();

        let effects = m.on_output(b"hi\r\ngot: hi\r\nfake> ", now);
        let content = effects.iter().find_map(|e| match e {
            Effect::Emit(SessionEventKind::Message { message })
                if message.direction == MessageDirection::Outbound =>
            {
                Some(message.content.clone())
            }
            _ => None,
        });
        assert_eq!(content.as_deref(), Some("hi\ngot: hi"));
    }

    #[test]
    fn test_unsafe_rules_never_fire() {
        let adapter = FakeAdapter::new("x")
            .with_rule(
                AutoResponseRule::text(r"(?i)terms", BlockingPromptCategory::Tos, "y", "Accept terms")
                    .unsafe_rule(),
            )
            .with_rule(AutoResponseRule::text(
                r"(?i)terms",
                BlockingPromptCategory::Tos,
                "y",
                "Accept terms anyway",
            ));
        let (mut m, now) = started(adapter);
        let effects = m.on_output(b"Do you accept the Terms of Service? (y/n) ", now);
        assert!(writes(&effects).is_empty());
        assert!(events(&effects).contains(&"blocking_prompt"));
    }

    #[test]
    fn test_keys_response() {
        let adapter = FakeAdapter::new("x").with_rule(AutoResponseRule::keys(
            r"(?i)update available",
            BlockingPromptCategory::Update,
            "down enter",
            "Skip update",
        ));
        let (mut m, now) = started(adapter);
        let effects = m.on_output(b"Update available. Update now? (y/n) ", now);
        assert_eq!(writes(&effects), vec![b"\x1b[B\r".to_vec()]);
    }

    #[test]
    fn test_detected_exit_stops_session() {
        let (mut m, now) = started(FakeAdapter::new("x"));
        let effects = m.on_output(b"oops\r\nSegmentation fault\r\n", now);
        assert_eq!(m.status(), SessionStatus::Stopped);
        assert!(effects.contains(&Effect::Terminate));

        // The real exit afterwards changes nothing.
        let effects = m.on_exit(Some(139));
        assert!(events(&effects).is_empty());
    }

    #[test]
    fn test_exit_during_start_is_error() {
        let (mut m, _) = started(FakeAdapter::new("x"));
        m.on_output(b"fatal: bad flag\r\n", Instant::now());
        let effects = m.on_exit(Some(2));
        assert_eq!(m.status(), SessionStatus::Error);
        let names = events(&effects);
        assert!(names.contains(&"error"));
        assert_eq!(names.last(), Some(&"exited"));
    }

    #[test]
    fn test_requested_exit_is_stopped() {
        let (mut m, now) = started(FakeAdapter::new("x"));
        m.on_output(b"fake> ", now);
        m.begin_stop();
        assert_eq!(m.status(), SessionStatus::Stopping);
        let effects = m.on_exit(Some(143));
        assert_eq!(m.status(), SessionStatus::Stopped);
        assert!(effects.contains(&Effect::Emit(SessionEventKind::Exited {
            code: Some(143),
            requested: true
        })));
    }

    #[test]
    fn test_force_stopped_from_stopping() {
        let (mut m, _) = started(FakeAdapter::new("x"));
        m.begin_stop();
        m.force_stopped();
        assert_eq!(m.status(), SessionStatus::Stopped);
        assert!(m.force_stopped().is_empty());
    }

    #[test]
    fn test_stall_reported_once_per_silence() {
        let config = MachineConfig {
            stall_timeout: Some(Duration::from_secs(5)),
            ..MachineConfig::default()
        };
        let now = Instant::now();
        let mut m = SessionMachine::new("s1", Arc::new(FakeAdapter::new("x")), &[], config);
        m.begin_start(now);

        let later = now + Duration::from_secs(6);
        let effects = m.on_deadline(later);
        assert_eq!(events(&effects), vec!["stalled"]);
        assert!(m.on_deadline(later + Duration::from_secs(10)).is_empty());

        m.on_output(b"tick\r\n", later);
        assert_eq!(m.next_deadline(), Some(later + Duration::from_secs(5)));
    }

    #[test]
    fn test_logs_tail_includes_partial_line() {
        let (mut m, now) = started(FakeAdapter::new("x"));
        m.on_output(b"one\r\ntwo\r\n\x1b[1mthree\x1b[0m\r\nfake> ", now);
        assert_eq!(m.logs(None), vec!["one", "two", "three", "fake>"]);
        assert_eq!(m.logs(Some(2)), vec!["three", "fake>"]);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let config = MachineConfig {
            output_buffer_bytes: 1024,
            ..MachineConfig::default()
        };
        let mut m = SessionMachine::new("s1", Arc::new(FakeAdapter::new("x")), &[], config);
        let now = Instant::now();
        m.begin_start(now);
        for _ in 0..10 {
            m.on_output("é".repeat(300).as_bytes(), now);
        }
        assert!(m.buffer.len() <= 1024);
        assert!(std::str::from_utf8(&m.buffer).is_ok());
    }

    #[test]
    fn test_key_sequence() {
        assert_eq!(key_sequence("enter"), "\r");
        assert_eq!(key_sequence("Down"), "\x1b[B");
        assert_eq!(key_sequence("y"), "y");
    }
}
