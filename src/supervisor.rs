//! The supervision activity: one thread per running job instance, driving
//! the STARTING/RUNNING/BACKOFF/STOPPING/EXITED/FATAL state machine.

use crossbeam_channel::{after, bounded, select, Receiver};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::config::{AutoRestart, JobSpec};
use crate::job::{has_correctly_exited, Control, JobRecord, JobState};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {name} is in state {state:?}, cannot perform this action")]
    WrongState { name: String, state: JobState },
    #[error("failed to spawn job {name}: {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Launch a new supervision activity for `record` if it is currently in a
/// terminal state. Blocks until the first attempt has either begun
/// (STARTING) or failed to spawn at all.
pub fn start(record: &Arc<JobRecord>) -> Result<(), JobError> {
    {
        let live = record.live.lock();
        if !live.state.is_terminal() {
            return Err(JobError::WrongState {
                name: record.name.clone(),
                state: live.state,
            });
        }
    }

    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    *record.control_tx.lock() = Some(control_tx);

    let (ready_tx, ready_rx) = bounded::<Result<(), JobError>>(1);
    let rec = Arc::clone(record);
    std::thread::Builder::new()
        .name(format!("job-{}", record.name))
        .spawn(move || run_attempt_cycle(rec, control_rx, ready_tx))
        .expect("spawn supervision thread");

    match ready_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(result) => result,
        Err(_) => Ok(()),
    }
}

/// Stop protocol (spec §4.2). Preconditions: job must be in
/// STARTING/RUNNING/BACKOFF.
pub fn stop(record: &Arc<JobRecord>) -> Result<(), JobError> {
    let state = record.live.lock().state;
    match state {
        JobState::Starting | JobState::Running | JobState::Backoff => {}
        other => {
            return Err(JobError::WrongState {
                name: record.name.clone(),
                state: other,
            });
        }
    }

    record.live.lock().killed = true;

    let control = record.control_tx.lock().clone();
    if let Some(tx) = control {
        // The activity may be asleep between attempts (BACKOFF) or blocked
        // waiting on the child; either way it observes this on its next
        // select iteration and is responsible for actually killing the
        // child and transitioning to STOPPED.
        let _ = tx.send(Control::Stop);
    }

    let stop_time = record.spec_snapshot().stop_time;
    let mut live = record.live.lock();
    let deadline = Duration::from_secs(stop_time) + Duration::from_millis(500);
    let timed_out = record
        .live_cv
        .wait_while_for(&mut live, |l| !l.state.is_terminal(), deadline)
        .timed_out();
    if timed_out && !live.state.is_terminal() {
        warn!(job = %record.name, "stop did not observe STOPPED within stop_time, forcing");
        if live.pid != 0 {
            force_kill(live.pid);
        }
    }
    Ok(())
}

/// Restart: stop then start.
pub fn restart(record: &Arc<JobRecord>) -> Result<(), JobError> {
    stop(record)?;
    start(record)
}

fn force_kill(pid: u32) {
    send_signal(pid, libc::SIGKILL);
}

fn send_signal(pid: u32, signal: i32) {
    // SAFETY: kill(2) is safe to call with any pid and a valid signal number.
    let ret = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("kill({}, {}) failed: {}", pid, signal, err);
        }
    }
}

fn max_attempts(spec: &JobSpec) -> u32 {
    match spec.autorestart {
        AutoRestart::Always => u32::MAX,
        _ => spec.start_retries + 1,
    }
}

fn open_redirect(path: &str) -> std::io::Result<Stdio> {
    if path.is_empty() {
        return Ok(Stdio::null());
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    Ok(Stdio::from(file))
}

fn spawn_child(spec: &JobSpec) -> std::io::Result<Child> {
    let mut parts = spec.command.split_whitespace();
    let program = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let mut cmd = Command::new(program);
    cmd.args(&args);
    cmd.stdout(open_redirect(&spec.outfile)?);
    cmd.stderr(open_redirect(&spec.errfile)?);
    if !spec.working_dir.is_empty() {
        cmd.current_dir(&spec.working_dir);
    }
    if !spec.env.is_empty() {
        cmd.env_clear();
        for kv in &spec.env {
            if let Some((k, v)) = kv.split_once('=') {
                cmd.env(k, v);
            }
        }
    }
    apply_umask(spec.umask);
    cmd.spawn()
}

#[cfg(unix)]
fn apply_umask(mask: u32) {
    // SAFETY: umask(2) only affects the calling process's file mode creation
    // mask and takes no pointers; mode_t truncation is intentional (the
    // value is always <= 0o777 in practice).
    unsafe {
        libc::umask(mask as libc::mode_t);
    }
}

#[cfg(not(unix))]
fn apply_umask(_mask: u32) {}

/// The heart of the state machine. Runs on its own thread for the lifetime
/// of one job instance's start/restart cycle, terminating only when the
/// job reaches STOPPED, a terminal EXITED, or FATAL.
fn run_attempt_cycle(
    record: Arc<JobRecord>,
    control_rx: Receiver<Control>,
    ready_tx: crossbeam_channel::Sender<Result<(), JobError>>,
) {
    let spec = record.spec_snapshot();
    let limit = max_attempts(&spec);
    let mut reported_ready = false;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if attempt > limit {
            info!(job = %record.name, "start retries exhausted, FATAL");
            record.set_state(JobState::Fatal);
            break;
        }

        record.live.lock().killed = false;

        let child = match spawn_child(&spec) {
            Ok(child) => child,
            Err(source) => {
                warn!(job = %record.name, error = %source, "spawn failed");
                if !reported_ready {
                    reported_ready = true;
                    let _ = ready_tx.send(Err(JobError::SpawnFailed {
                        name: record.name.clone(),
                        source,
                    }));
                }
                record.set_state(JobState::Backoff);
                if stop_requested_during_backoff(&record, &control_rx) {
                    return;
                }
                continue;
            }
        };

        let pid = child.id();
        {
            let mut live = record.live.lock();
            live.pid = pid;
            live.state = JobState::Starting;
            live.runtime_start = Some(SystemTime::now());
            record.live_cv.notify_all();
        }
        if !reported_ready {
            reported_ready = true;
            let _ = ready_tx.send(Ok(()));
        }

        match run_one_attempt(&record, &spec, child, &control_rx) {
            AttemptOutcome::StoppedByUser => return,
            AttemptOutcome::ExitedCorrectly => {
                record.set_state(JobState::Exited);
                return;
            }
            AttemptOutcome::BackoffRetry => {
                if stop_requested_during_backoff(&record, &control_rx) {
                    return;
                }
                continue;
            }
            AttemptOutcome::NeverRestart => {
                record.set_state(JobState::Exited);
                return;
            }
        }
    }
}

enum AttemptOutcome {
    StoppedByUser,
    ExitedCorrectly,
    BackoffRetry,
    NeverRestart,
}

/// Non-blocking drain of the control channel while sleeping between attempts
/// (spec §4.1's BACKOFF-preemption rendezvous). Returns `true` if a stop was
/// observed and handled (activity should terminate).
fn stop_requested_during_backoff(record: &Arc<JobRecord>, control_rx: &Receiver<Control>) -> bool {
    if control_rx.try_recv().is_ok() {
        record.live.lock().killed = true;
        record.set_state(JobState::Stopped);
        true
    } else {
        false
    }
}

/// Runs a single spawn-to-exit cycle: races the `start_time` timer against
/// the child dying early, then (once RUNNING) races the child's exit
/// against a stop request.
fn run_one_attempt(
    record: &Arc<JobRecord>,
    spec: &JobSpec,
    mut child: Child,
    control_rx: &Receiver<Control>,
) -> AttemptOutcome {
    let pid = child.id();
    let (exit_tx, exit_rx) = bounded::<std::io::Result<ExitStatus>>(1);
    std::thread::spawn(move || {
        let result = child.wait();
        let _ = exit_tx.send(result);
    });

    let start_timer = after(Duration::from_secs(spec.start_time));

    select! {
        recv(start_timer) -> _ => {
            record.set_state(JobState::Running);
            wait_running(record, spec, pid, &exit_rx, control_rx)
        }
        recv(exit_rx) -> status => {
            classify_early_exit(record, spec, status)
        }
        recv(control_rx) -> _ => {
            send_signal(pid, spec.stop_signal);
            await_stop(record, spec, pid, &exit_rx)
        }
    }
}

fn wait_running(
    record: &Arc<JobRecord>,
    spec: &JobSpec,
    pid: u32,
    exit_rx: &Receiver<std::io::Result<ExitStatus>>,
    control_rx: &Receiver<Control>,
) -> AttemptOutcome {
    loop {
        select! {
            recv(exit_rx) -> status => {
                return classify_running_exit(record, spec, status);
            }
            recv(control_rx) -> _ => {
                send_signal(pid, spec.stop_signal);
                return await_stop(record, spec, pid, exit_rx);
            }
        }
    }
}

fn classify_early_exit(
    record: &Arc<JobRecord>,
    spec: &JobSpec,
    status: Result<std::io::Result<ExitStatus>, crossbeam_channel::RecvError>,
) -> AttemptOutcome {
    let killed = record.live.lock().killed;
    if killed {
        record.set_state(JobState::Stopped);
        return AttemptOutcome::StoppedByUser;
    }
    warn!(job = %record.name, "child exited before start_time elapsed");
    let _ = status;
    if spec.autorestart == AutoRestart::Never {
        AttemptOutcome::NeverRestart
    } else {
        record.set_state(JobState::Backoff);
        AttemptOutcome::BackoffRetry
    }
}

fn classify_running_exit(
    record: &Arc<JobRecord>,
    spec: &JobSpec,
    status: Result<std::io::Result<ExitStatus>, crossbeam_channel::RecvError>,
) -> AttemptOutcome {
    let killed = record.live.lock().killed;
    if killed {
        record.set_state(JobState::Stopped);
        return AttemptOutcome::StoppedByUser;
    }
    let exit_status = match status {
        Ok(Ok(s)) => s,
        _ => {
            record.set_state(JobState::Backoff);
            return AttemptOutcome::BackoffRetry;
        }
    };
    let correct = has_correctly_exited(exit_status, false, &spec.exit_codes);
    match spec.autorestart {
        AutoRestart::Always => {
            record.set_state(JobState::Backoff);
            AttemptOutcome::BackoffRetry
        }
        AutoRestart::Never => AttemptOutcome::NeverRestart,
        AutoRestart::Unexpected => {
            if correct {
                AttemptOutcome::NeverRestart
            } else {
                record.set_state(JobState::Backoff);
                AttemptOutcome::BackoffRetry
            }
        }
    }
}

/// After sending `stop_signal`, race `stop_time` against the child actually
/// exiting; send SIGKILL if the timer wins.
fn await_stop(
    record: &Arc<JobRecord>,
    spec: &JobSpec,
    pid: u32,
    exit_rx: &Receiver<std::io::Result<ExitStatus>>,
) -> AttemptOutcome {
    record.set_state(JobState::Stopping);
    let timer = after(Duration::from_secs(spec.stop_time));
    select! {
        recv(exit_rx) -> _ => {}
        recv(timer) -> _ => {
            warn!(job = %record.name, "stop_time elapsed, sending SIGKILL");
            send_signal(pid, libc::SIGKILL);
            let _ = exit_rx.recv();
        }
    }
    record.live.lock().killed = true;
    record.set_state(JobState::Stopped);
    AttemptOutcome::StoppedByUser
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobSpec;

    fn make_record(name: &str, command: &str) -> Arc<JobRecord> {
        Arc::new(JobRecord::new(
            name.to_string(),
            JobSpec {
                name: name.to_string(),
                command: command.to_string(),
                start_time: 1,
                ..Default::default()
            },
        ))
    }

    #[test]
    fn start_rejects_non_terminal_state() {
        let record = make_record("busy", "/bin/sleep 100");
        record.set_state(JobState::Running);
        let err = start(&record).unwrap_err();
        assert!(matches!(err, JobError::WrongState { .. }));
    }

    #[test]
    fn stop_rejects_already_stopped() {
        let record = make_record("idle", "/bin/true");
        let err = stop(&record).unwrap_err();
        assert!(matches!(err, JobError::WrongState { .. }));
    }

    #[test]
    fn happy_path_reaches_running_then_stopped() {
        let record = make_record("sleeper", "/bin/sleep 5");
        start(&record).expect("start should succeed");
        std::thread::sleep(Duration::from_millis(1500));
        assert_eq!(record.live.lock().state, JobState::Running);
        stop(&record).expect("stop should succeed");
        assert_eq!(record.live.lock().state, JobState::Stopped);
    }

    #[test]
    fn quick_exit_with_never_restart_goes_to_exited() {
        let record = Arc::new(JobRecord::new(
            "quick".to_string(),
            JobSpec {
                name: "quick".to_string(),
                command: "/bin/true".to_string(),
                start_time: 2,
                autorestart: AutoRestart::Never,
                ..Default::default()
            },
        ));
        start(&record).expect("start should succeed");
        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(record.live.lock().state, JobState::Exited);
    }
}
