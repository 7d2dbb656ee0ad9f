//! A child process attached to a pseudo-terminal.
//!
//! Reads happen on a dedicated OS thread (the PTY reader is blocking) and are
//! forwarded over a bounded channel. A second thread waits for the child and
//! reports its exit code through a oneshot.

use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[cfg(unix)]
use nix::sys::signal::{Signal, kill};
#[cfg(unix)]
use nix::unistd::Pid;

/// Variables every wrapped tool sees, applied last.
pub const FORCED_ENV: [(&str, &str); 3] = [
    ("TERM", "xterm-256color"),
    ("COLORTERM", "truecolor"),
    ("FORCE_COLOR", "1"),
];

/// Output read from the terminal.
#[derive(Debug)]
pub enum OutputEvent {
    Data(Vec<u8>),
    Eof,
    Error(String),
}

/// Signals a session can deliver to its process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KillSignal {
    Interrupt,
    Terminate,
    Hangup,
    Kill,
}

impl KillSignal {
    #[cfg(unix)]
    fn as_nix(self) -> Signal {
        match self {
            KillSignal::Interrupt => Signal::SIGINT,
            KillSignal::Terminate => Signal::SIGTERM,
            KillSignal::Hangup => Signal::SIGHUP,
            KillSignal::Kill => Signal::SIGKILL,
        }
    }
}

/// What to run and how big the terminal is.
#[derive(Debug, Clone)]
pub struct PtySpawnSpec {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Overrides on top of the inherited process environment.
    pub env: BTreeMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

/// Adapter env, then config env, then [`FORCED_ENV`].
pub fn merged_env(
    adapter_env: BTreeMap<String, String>,
    config_env: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = adapter_env;
    env.extend(config_env.iter().map(|(k, v)| (k.clone(), v.clone())));
    for (key, value) in FORCED_ENV {
        env.insert(key.to_string(), value.to_string());
    }
    env
}

/// Handles for a running child. Dropping it closes the terminal.
pub struct PtyProcess {
    pid: Option<u32>,
    writer: Box<dyn Write + Send>,
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess").field("pid", &self.pid).finish_non_exhaustive()
    }
}

/// Receivers for a spawned process.
pub struct PtyStreams {
    pub output: mpsc::Receiver<OutputEvent>,
    /// Resolves with the exit code once the child is reaped.
    pub exit: oneshot::Receiver<Option<i32>>,
}

impl PtyProcess {
    pub fn spawn(spec: &PtySpawnSpec) -> io::Result<(Self, PtyStreams)> {
        // portable-pty silently falls back to $HOME for a missing cwd.
        if let Some(cwd) = &spec.cwd
            && !cwd.is_dir()
        {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("working directory {} does not exist", cwd.display()),
            ));
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| io::Error::other(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&spec.command);
        cmd.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| io::Error::other(e.to_string()))?;
        // The child holds its own copy; ours would keep the terminal open after exit.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| io::Error::other(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| io::Error::other(e.to_string()))?;

        let (output_tx, output_rx) = mpsc::channel::<OutputEvent>(256);
        std::thread::spawn(move || read_loop(reader, output_tx));

        let (exit_tx, exit_rx) = oneshot::channel();
        std::thread::spawn(move || {
            let code = match child.wait() {
                Ok(status) => Some(status.exit_code() as i32),
                Err(e) => {
                    warn!("Failed to wait for child: {}", e);
                    None
                }
            };
            let _ = exit_tx.send(code);
        });

        debug!(pid = ?pid, command = %spec.command, "Spawned PTY process");
        Ok((
            Self {
                pid,
                writer,
                master: pair.master,
                killer,
            },
            PtyStreams {
                output: output_rx,
                exit: exit_rx,
            },
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    pub fn resize(&self, cols: u16, rows: u16) -> io::Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| io::Error::other(e.to_string()))
    }

    #[cfg(unix)]
    pub fn signal(&mut self, signal: KillSignal) -> io::Result<()> {
        let Some(pid) = self.pid else {
            return self.killer.kill();
        };
        debug!(pid, signal = ?signal, "Signalling child");
        match kill(Pid::from_raw(pid as i32), signal.as_nix()) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    #[cfg(not(unix))]
    pub fn signal(&mut self, _signal: KillSignal) -> io::Result<()> {
        self.killer.kill()
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, output_tx: mpsc::Sender<OutputEvent>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                let _ = output_tx.blocking_send(OutputEvent::Eof);
                break;
            }
            Ok(n) => {
                if output_tx.blocking_send(OutputEvent::Data(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                // EIO is how Linux reports the slave side closing.
                debug!(error = %e, "PTY reader finished");
                let _ = output_tx.blocking_send(OutputEvent::Error(e.to_string()));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_precedence() {
        let adapter = BTreeMap::from([
            ("A".to_string(), "adapter".to_string()),
            ("TERM".to_string(), "dumb".to_string()),
        ]);
        let config = BTreeMap::from([
            ("A".to_string(), "config".to_string()),
            ("B".to_string(), "config".to_string()),
        ]);
        let env = merged_env(adapter, &config);
        assert_eq!(env["A"], "config");
        assert_eq!(env["B"], "config");
        assert_eq!(env["TERM"], "xterm-256color");
        assert_eq!(env["FORCE_COLOR"], "1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_reads_output_and_exit_code() {
        let spec = PtySpawnSpec {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "printf hello; exit 3".to_string()],
            cwd: None,
            env: BTreeMap::new(),
            cols: 80,
            rows: 24,
        };
        let (process, mut streams) = PtyProcess::spawn(&spec).unwrap();
        assert!(process.pid().is_some());

        let mut output = Vec::new();
        while let Some(OutputEvent::Data(bytes)) = streams.output.recv().await {
            output.extend(bytes);
        }
        assert!(String::from_utf8_lossy(&output).contains("hello"));
        assert_eq!(streams.exit.await.unwrap(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_missing_command_fails() {
        let spec = PtySpawnSpec {
            command: "definitely-not-a-real-command-xyz".to_string(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            cols: 80,
            rows: 24,
        };
        assert!(PtyProcess::spawn(&spec).is_err());
    }
}
