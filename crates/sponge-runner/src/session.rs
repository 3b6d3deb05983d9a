#![forbid(unsafe_code)]

//! One generation of worker, signal buffers and proxy.
//!
//! A [`Session`] is owned by the coordinator. Replacing it terminates the
//! old one: the kill flag is raised, every parked proxy request is
//! resolved, and both channels are dropped, so the old worker can neither
//! receive another command nor deliver another event.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use crate::bridge::Bridge;
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::protocol::{WorkerCommand, WorkerEvent};
use crate::proxy::SyncProxy;
use crate::signal::SharedBuffers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The worker's half of a session.
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub id: SessionId,
    pub commands: Receiver<WorkerCommand>,
    pub events: Sender<WorkerEvent>,
    pub proxy: Arc<SyncProxy>,
    pub killed: Arc<AtomicBool>,
}

impl WorkerEndpoint {
    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Send an event; `false` once the coordinator has let go.
    pub fn emit(&self, event: WorkerEvent) -> bool {
        !self.is_killed() && self.events.send(event).is_ok()
    }
}

/// Starts the worker side of a new session.
pub trait WorkerSpawner {
    fn spawn(&mut self, endpoint: WorkerEndpoint, config: &RunnerConfig) -> Result<(), RunnerError>;
}

/// Runs each worker on its own named OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl WorkerSpawner for ThreadSpawner {
    fn spawn(&mut self, endpoint: WorkerEndpoint, config: &RunnerConfig) -> Result<(), RunnerError> {
        let name = format!("{}-{}", config.worker_name_prefix, endpoint.id.0);
        let bridge = Bridge::new(endpoint, config);
        thread::Builder::new()
            .name(name)
            .stack_size(config.worker_stack_mib.saturating_mul(1024 * 1024))
            .spawn(move || bridge.run())
            .map(drop)
            .map_err(RunnerError::WorkerSpawn)
    }
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    commands: Sender<WorkerCommand>,
    events: Receiver<WorkerEvent>,
    proxy: Arc<SyncProxy>,
    buffers: Option<SharedBuffers>,
    killed: Arc<AtomicBool>,
    fully_initialised: bool,
}

impl Session {
    /// Spawn a worker and queue its setup commands.
    pub fn start(
        id: SessionId,
        spawner: &mut dyn WorkerSpawner,
        config: &RunnerConfig,
    ) -> Result<Self, RunnerError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let proxy = Arc::new(SyncProxy::new());
        let killed = Arc::new(AtomicBool::new(false));
        let buffers = config.shared_memory.then(SharedBuffers::new);

        spawner.spawn(
            WorkerEndpoint {
                id,
                commands: command_rx,
                events: event_tx,
                proxy: Arc::clone(&proxy),
                killed: Arc::clone(&killed),
            },
            config,
        )?;

        let session = Self {
            id,
            commands: command_tx,
            events: event_rx,
            proxy,
            buffers,
            killed,
            fully_initialised: false,
        };
        if let Some(buffers) = &session.buffers {
            session.send(WorkerCommand::SetSharedBuffers {
                buffers: buffers.clone(),
            })?;
        }
        session.send(WorkerCommand::Init {
            standalone: config.standalone,
        })?;
        tracing::debug!(target: "sponge.session", session = %id, shared_memory = session.buffers.is_some(), "session started");
        Ok(session)
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn send(&self, command: WorkerCommand) -> Result<(), RunnerError> {
        tracing::trace!(target: "sponge.session", session = %self.id, cmd = command.name(), "send");
        self.commands
            .send(command)
            .map_err(|_| RunnerError::Disconnected)
    }

    /// Next queued event, if any. `Err` once the worker is gone.
    pub fn try_recv(&self) -> Result<Option<WorkerEvent>, RunnerError> {
        match self.events.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(RunnerError::Disconnected),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerEvent>, RunnerError> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(RunnerError::Disconnected),
        }
    }

    #[must_use]
    pub fn proxy(&self) -> &SyncProxy {
        &self.proxy
    }

    #[must_use]
    pub fn buffers(&self) -> Option<&SharedBuffers> {
        self.buffers.as_ref()
    }

    /// Stop using the interrupt buffer; only a hard restart is left.
    pub fn disable_interrupt(&mut self) {
        self.buffers = None;
    }

    #[must_use]
    pub fn is_fully_initialised(&self) -> bool {
        self.fully_initialised
    }

    pub fn mark_initialised(&mut self) {
        self.fully_initialised = true;
    }

    /// Whether a soft interrupt can stop this session.
    #[must_use]
    pub fn can_interrupt(&self) -> bool {
        self.buffers.is_some() && self.fully_initialised
    }

    /// Raise the interrupt flag to `value`. No-op without buffers.
    pub fn interrupt(&self, value: u8) -> bool {
        match &self.buffers {
            Some(buffers) => {
                buffers.interrupt.set(value);
                true
            }
            None => false,
        }
    }

    pub fn terminate(self) {
        self.killed.store(true, Ordering::Release);
        let resolved = self.proxy.reset();
        tracing::debug!(target: "sponge.session", session = %self.id, resolved, "session terminated");
    }
}
