//! Command dispatcher: the single serialization point for the five
//! privileged actions (Start/Stop/Restart/Reload/Shutdown). Read-only
//! queries bypass this entirely and read the registry directly.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::Arc;
use tracing::info;

use crate::job::ProcStatus;
use crate::registry::Registry;
use crate::supervisor::{self, JobError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error(transparent)]
    Job(#[from] JobError),
}

#[derive(Debug)]
pub enum Action {
    Start(String),
    Stop(String),
    Restart(String),
    Reload(String),
    Shutdown,
}

type Reply = Sender<Result<Vec<ProcStatus>, DispatchError>>;

struct Envelope {
    action: Action,
    reply: Reply,
}

/// Handle used by callers (RPC surface, SIGHUP listener, CLI) to submit
/// actions. Cloneable; every clone feeds the same dispatcher thread.
#[derive(Clone)]
pub struct Dispatcher {
    actions_tx: Sender<Envelope>,
    pause_tx: Sender<Receiver<()>>,
}

impl Dispatcher {
    /// Submit an action and block for its outcome.
    pub fn submit(&self, action: Action) -> Result<Vec<ProcStatus>, DispatchError> {
        let (reply, reply_rx) = bounded(1);
        self.actions_tx
            .send(Envelope { action, reply })
            .map_err(|_| DispatchError::UnknownMethod("dispatcher closed".into()))?;
        reply_rx
            .recv()
            .unwrap_or_else(|_| Err(DispatchError::UnknownMethod("dispatcher closed".into())))
    }

    /// Pause the dispatcher loop; used by the reload handler so registry
    /// mutation is atomic from every other caller's perspective. The
    /// dispatcher will not look at another action until the returned guard
    /// is dropped (mirrors the source's `select { case <-Pause: <-Continue }`).
    pub fn pause(&self) -> PauseGuard {
        let (continue_tx, continue_rx) = bounded(1);
        // Best-effort: if the dispatcher already shut down, there is nothing
        // to pause.
        let _ = self.pause_tx.send(continue_rx);
        PauseGuard { continue_tx }
    }
}

pub struct PauseGuard {
    continue_tx: Sender<()>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        let _ = self.continue_tx.send(());
    }
}

/// Spawns the dispatcher thread and returns a handle plus the reload-facing
/// `Reload` action name used to look up the registry swap entry point.
pub fn spawn(
    registry: Arc<Registry>,
    on_reload: impl Fn(&str) -> Result<Vec<ProcStatus>, DispatchError> + Send + 'static,
) -> (Dispatcher, std::thread::JoinHandle<()>) {
    let (actions_tx, actions_rx) = crossbeam_channel::unbounded::<Envelope>();
    let (pause_tx, pause_rx) = crossbeam_channel::unbounded::<Receiver<()>>();

    let handle = std::thread::Builder::new()
        .name("dispatcher".into())
        .spawn(move || run(registry, actions_rx, pause_rx, on_reload))
        .expect("spawn dispatcher thread");

    (
        Dispatcher {
            actions_tx,
            pause_tx,
        },
        handle,
    )
}

fn run(
    registry: Arc<Registry>,
    actions_rx: Receiver<Envelope>,
    pause_rx: Receiver<Receiver<()>>,
    on_reload: impl Fn(&str) -> Result<Vec<ProcStatus>, DispatchError>,
) {
    loop {
        select! {
            recv(actions_rx) -> envelope => {
                let Ok(envelope) = envelope else { break };
                let is_shutdown = matches!(envelope.action, Action::Shutdown);
                let result = handle(&registry, envelope.action, &on_reload);
                let _ = envelope.reply.send(result);
                if is_shutdown {
                    break;
                }
            }
            recv(pause_rx) -> continue_rx => {
                let Ok(continue_rx) = continue_rx else { break };
                info!("dispatcher paused for reload");
                // Block until the reload handler drops its PauseGuard, which
                // sends on this channel (mirrors the source's blocking
                // `<-Continue` inside the paused select branch).
                let _ = continue_rx.recv();
                info!("dispatcher resumed");
            }
        }
    }
}

fn handle(
    registry: &Registry,
    action: Action,
    on_reload: &impl Fn(&str) -> Result<Vec<ProcStatus>, DispatchError>,
) -> Result<Vec<ProcStatus>, DispatchError> {
    match action {
        Action::Start(name) => with_job(registry, &name, |rec| {
            supervisor::start(rec)?;
            Ok(vec![rec.status()])
        }),
        Action::Stop(name) => with_job(registry, &name, |rec| {
            supervisor::stop(rec)?;
            Ok(vec![rec.status()])
        }),
        Action::Restart(name) => with_job(registry, &name, |rec| {
            supervisor::restart(rec)?;
            Ok(vec![rec.status()])
        }),
        Action::Reload(path) => on_reload(&path),
        Action::Shutdown => {
            for rec in registry.records() {
                let _ = supervisor::stop(&rec);
            }
            Ok(vec![])
        }
    }
}

fn with_job(
    registry: &Registry,
    name: &str,
    f: impl FnOnce(&Arc<crate::job::JobRecord>) -> Result<Vec<ProcStatus>, DispatchError>,
) -> Result<Vec<ProcStatus>, DispatchError> {
    match registry.get(name) {
        Some(rec) => f(&rec),
        None => Err(DispatchError::Job(JobError::NotFound(name.to_string()))),
    }
}
