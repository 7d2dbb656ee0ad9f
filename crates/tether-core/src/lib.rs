//! # tether-core
//!
//! Supervision of interactive CLI coding agents running on pseudo-terminals.
//!
//! - [`Session`] wraps one tool process and turns its raw terminal output into
//!   status transitions, parsed messages, blocking-prompt detections and
//!   task-completion evidence.
//! - [`Manager`] owns every session, enforces the concurrency ceiling,
//!   auto-restarts crashed or stalled sessions, and provisions per-task git
//!   worktrees.
//! - [`CliAdapter`] is the seam a tool plugs into; concrete adapters live in
//!   `tether-adapters`.

pub mod adapter;
pub mod classifier;
pub mod completion;
pub mod config;
pub mod diagnostics;
mod error;
pub mod health;
mod manager;
pub mod presets;
mod registry;
pub mod session;
pub mod testing;
pub mod text;
pub mod workspace;

pub use adapter::{CliAdapter, InstallInfo, InstallationStatus};
pub use classifier::{BlockingPromptClassifier, CLASSIFY_TAIL_LINES, RuleSpec};
pub use completion::{
    Assessment, CompletionTurn, ConfidenceWeights, TaskCompletionTimeline, TaskCompletionTracker,
    TurnStatus, build_timeline,
};
pub use config::{CONFIG_FILE, ConfigError, ManagerConfig, TetherConfig, WorkspaceConfig};
pub use diagnostics::{DIAGNOSTICS_ENV, JsonlTraceLayer, TRACE_FILE};
pub use error::{ManagerError, SessionError};
pub use health::{AdapterCheck, CheckStatus, HealthReport, SessionCounts};
pub use manager::{
    LogOptions, Manager, SendOptions, SessionFilter, ShutdownReport, StopOptions,
};
pub use registry::AdapterRegistry;
pub use session::{KillSignal, Session, SessionOptions};
pub use text::truncate_with_ellipsis;
pub use workspace::{
    FinalizeOptions, FinalizeResult, GitHubCliProvider, MergeRequest, NoopVcsProvider,
    ProvisionRequest, VcsProvider, Workspace, WorkspaceError, WorkspaceManager, WorkspaceState,
};
