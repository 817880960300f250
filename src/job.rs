//! The job record: identity, the immutable-per-attempt config snapshot, and
//! the small mutable live block the supervision activity writes.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::config::JobSpec;

/// Sent to a running supervision activity's control channel.
#[derive(Debug, Clone, Copy)]
pub enum Control {
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Stopped,
    Starting,
    Running,
    Backoff,
    Stopping,
    Exited,
    Fatal,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Stopped => "STOPPED",
            JobState::Starting => "STARTING",
            JobState::Running => "RUNNING",
            JobState::Backoff => "BACKOFF",
            JobState::Stopping => "STOPPING",
            JobState::Exited => "EXITED",
            JobState::Fatal => "FATAL",
        }
    }

    /// `true` when no supervision activity should be running for this job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Stopped | JobState::Exited | JobState::Fatal
        )
    }
}

/// The mutable part of a job, written only by its own supervision activity
/// (except `killed`, which the stop protocol also sets before waking it).
#[derive(Debug)]
pub struct JobLive {
    pub state: JobState,
    pub pid: u32,
    pub runtime_start: Option<SystemTime>,
    pub killed: bool,
}

impl Default for JobLive {
    fn default() -> Self {
        JobLive {
            state: JobState::Stopped,
            pid: 0,
            runtime_start: None,
            killed: false,
        }
    }
}

/// One managed job. `spec` is replaced wholesale by reload's hot-patch or
/// restart path; a running supervision activity keeps its own clone taken at
/// the start of its current attempt cycle and only observes a new `spec` on
/// its next attempt.
pub struct JobRecord {
    pub name: String,
    pub spec: Mutex<JobSpec>,
    pub live: Mutex<JobLive>,
    /// Signaled whenever `live.state` changes, so `stop` can race a timeout
    /// against the state reaching `Stopped` without polling.
    pub live_cv: Condvar,
    /// Control channel into the currently-running supervision activity, if
    /// any. `None` when the job is in a terminal state.
    pub control_tx: Mutex<Option<crossbeam_channel::Sender<Control>>>,
}

impl JobRecord {
    pub fn new(name: String, spec: JobSpec) -> Self {
        JobRecord {
            name,
            spec: Mutex::new(spec),
            live: Mutex::new(JobLive::default()),
            live_cv: Condvar::new(),
            control_tx: Mutex::new(None),
        }
    }

    pub fn set_state(&self, state: JobState) {
        let mut live = self.live.lock();
        live.state = state;
        self.live_cv.notify_all();
    }

    pub fn spec_snapshot(&self) -> JobSpec {
        self.spec.lock().clone()
    }

    pub fn status(&self) -> ProcStatus {
        let live = self.live.lock();
        let runtime = live
            .runtime_start
            .and_then(|t| t.elapsed().ok())
            .unwrap_or_default();
        ProcStatus {
            name: self.name.clone(),
            pid: live.pid,
            state: live.state.as_str().to_string(),
            runtime_secs: runtime.as_secs(),
        }
    }
}

/// Wire/status representation of a job, returned by `GetStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcStatus {
    pub name: String,
    pub pid: u32,
    pub state: String,
    pub runtime_secs: u64,
}

/// Exit-code classification (spec §4.1 / §8 invariant 7).
///
/// Mirrors the source's manual `(raw>>8)&0xFF` / `raw+128` decode, expressed
/// through `ExitStatusExt` instead of re-deriving the packed wait-status
/// layout by hand.
pub fn has_correctly_exited(
    status: std::process::ExitStatus,
    killed: bool,
    exit_codes: &[i32],
) -> bool {
    if killed {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            return exit_codes.contains(&code);
        }
        if let Some(sig) = status.signal() {
            return exit_codes.contains(&(sig + 128));
        }
        false
    }
    #[cfg(not(unix))]
    {
        status.code().is_some_and(|c| exit_codes.contains(&c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(JobState::Stopped.is_terminal());
        assert!(JobState::Exited.is_terminal());
        assert!(JobState::Fatal.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Backoff.is_terminal());
    }

    #[test]
    fn killed_always_counts_as_correct_exit() {
        let status = std::process::Command::new("true").status().unwrap();
        assert!(has_correctly_exited(status, true, &[]));
    }
}
