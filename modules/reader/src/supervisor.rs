// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::parser::{FIX_MARKER, parse_fix_line};
use futures::StreamExt;
use module_core::{Event, EventKind, ReaderLifecycle};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::Error;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

/// Time the helper gets to exit on its own after SIGTERM before it is
/// killed.
const STOP_GRACE_PERIOD: Duration = Duration::from_millis(300);

/// Lifecycle state of the supervised helper process.
///
/// Transitions are monotonic per run: `Stopped → Running → Stopped`, or
/// `Stopped → Failed` when the helper could not be spawned. There is never
/// more than one run at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    Stopped,
    Running,
    Failed,
}

/// Outcome of a start request. Both variants are informational, a start
/// while already running is not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyActive,
}

/// Outcome of a stop request. A stop while not running is not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotActive,
}

/// Command line of the sensor-reading helper process.
#[derive(Clone, Debug)]
pub struct HelperCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Owns the lifecycle of the single external sensor helper process.
///
/// The supervisor spawns the helper with piped stdout/stderr, feeds stdout
/// lines through the [`parser`](crate::parser), and publishes
/// [`FixEvent`](EventKind::FixEvent)s and
/// [`ReaderLifecycleEvent`](EventKind::ReaderLifecycleEvent)s on the bus.
/// All operations consult the current [`ReaderState`] first, so `start` and
/// `stop` are idempotent and a double spawn is impossible.
pub struct SensorProcessSupervisor {
    command: HelperCommand,
    state: ReaderState,
    child: Option<Child>,
    lines: Option<FramedRead<ChildStdout, LinesCodec>>,
    stderr_task: Option<tokio::task::JoinHandle<()>>,
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl SensorProcessSupervisor {
    pub fn new(
        command: HelperCommand,
        sender: tokio::sync::broadcast::Sender<Event>,
    ) -> SensorProcessSupervisor {
        SensorProcessSupervisor {
            command,
            state: ReaderState::Stopped,
            child: None,
            lines: None,
            stderr_task: None,
            sender,
        }
    }

    /// Returns the current lifecycle state.
    pub fn status(&self) -> ReaderState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ReaderState::Running
    }

    /// Spawns the helper process and begins streaming its stdout.
    ///
    /// A start while the helper is already running is a no-op returning
    /// [`StartOutcome::AlreadyActive`]. A spawn failure transitions to
    /// [`ReaderState::Failed`] and is returned as the error.
    pub async fn start(&mut self) -> Result<StartOutcome, Error> {
        if self.state == ReaderState::Running {
            return Ok(StartOutcome::AlreadyActive);
        }
        let mut command = Command::new(&self.command.program);
        command
            .args(&self.command.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.state = ReaderState::Failed;
                self.publish_lifecycle(ReaderLifecycle::Failed(e.to_string()));
                return Err(e);
            }
        };
        let Some(stdout) = child.stdout.take() else {
            self.state = ReaderState::Failed;
            self.publish_lifecycle(ReaderLifecycle::Failed(
                "helper stdout not captured".to_string(),
            ));
            return Err(Error::other("helper stdout not captured"));
        };
        if let Some(stderr) = child.stderr.take() {
            self.stderr_task = Some(tokio::spawn(stderr_reader(stderr)));
        }
        self.lines = Some(FramedRead::new(stdout, LinesCodec::new()));
        self.child = Some(child);
        self.state = ReaderState::Running;
        info!(
            "Sensor helper started: {} {:?}",
            self.command.program, self.command.args
        );
        self.publish_lifecycle(ReaderLifecycle::Started);
        Ok(StartOutcome::Started)
    }

    /// Terminates the helper process.
    ///
    /// The helper is asked to exit with SIGTERM first so it can release
    /// its sensor resources, after [`STOP_GRACE_PERIOD`] it is killed.
    /// A stop while the helper is not running returns
    /// [`StopOutcome::NotActive`] instead of failing.
    pub async fn stop(&mut self) -> StopOutcome {
        if self.state != ReaderState::Running {
            return StopOutcome::NotActive;
        }
        self.lines = None;
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        if let Some(mut child) = self.child.take() {
            terminate(&mut child).await;
        }
        self.state = ReaderState::Stopped;
        info!("Sensor helper stopped");
        self.publish_lifecycle(ReaderLifecycle::Stopped);
        StopOutcome::Stopped
    }

    /// Reads the next stdout line of the running helper.
    ///
    /// Resolves to `None` when the stream has ended, which means the
    /// helper exited without a stop request.
    pub async fn next_line(&mut self) -> Option<Result<String, LinesCodecError>> {
        match self.lines.as_mut() {
            Some(lines) => lines.next().await,
            None => None,
        }
    }

    /// Feeds one stdout line through the parser.
    ///
    /// Well-formed records are published as fixes. Marked but malformed
    /// records are dropped with a warning, everything else is diagnostic
    /// output of the helper.
    pub fn handle_line(&self, line: &str) {
        match parse_fix_line(line) {
            Some(fix) => {
                let _ = self.sender.send(Event {
                    kind: EventKind::FixEvent(Arc::new(fix)),
                });
            }
            None => {
                if line.trim().starts_with(FIX_MARKER) {
                    warn!("Dropped malformed sensor line: {line}");
                } else {
                    debug!("helper: {line}");
                }
            }
        }
    }

    /// Reaps the helper after its stdout stream ended unexpectedly.
    ///
    /// Transitions to [`ReaderState::Stopped`] and publishes an
    /// [`ReaderLifecycle::UnexpectedExit`] event with the exit code when
    /// one was available.
    pub async fn reap(&mut self) -> Option<i32> {
        self.lines = None;
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        let code = match self.child.take() {
            Some(mut child) => child.wait().await.ok().and_then(|status| status.code()),
            None => None,
        };
        self.state = ReaderState::Stopped;
        self.publish_lifecycle(ReaderLifecycle::UnexpectedExit(code));
        code
    }

    fn publish_lifecycle(&self, lifecycle: ReaderLifecycle) {
        let _ = self.sender.send(Event {
            kind: EventKind::ReaderLifecycleEvent(lifecycle),
        });
    }
}

/// Sends SIGTERM to the helper and escalates to SIGKILL when it has not
/// exited within the grace period.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("Failed to signal sensor helper: {e}");
        } else if timeout(STOP_GRACE_PERIOD, child.wait()).await.is_ok() {
            return;
        } else {
            warn!("Sensor helper ignored SIGTERM, killing it");
        }
    }
    if let Err(e) = child.kill().await {
        warn!("Failed to kill sensor helper: {e}");
    }
}

async fn stderr_reader(stderr: ChildStderr) {
    let mut lines = FramedRead::new(stderr, LinesCodec::new());
    while let Some(result) = lines.next().await {
        match result {
            Ok(line) => warn!("helper stderr: {line}"),
            Err(e) => {
                warn!("Failed to read helper stderr: {e}");
                break;
            }
        }
    }
}
