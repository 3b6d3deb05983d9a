#![forbid(unsafe_code)]

//! The execution coordinator.
//!
//! Single point of truth for whether the runtime is available and what the
//! user can do right now. The coordinator owns exactly one [`Session`] at a
//! time and never blocks: operations either send a command, answer a parked
//! proxy request, or return a [`Completion`] that resolves while the owner
//! keeps calling [`Coordinator::pump`].
//!
//! Misuse (debug while not ready, continue while not paused) changes no
//! state and sends nothing to the worker. Operations that hand back a
//! completion resolve it at once with [`RunnerError::NotReady`]; the others
//! return `false`.
//!
//! Observers read [`CoordinatorEvent`]s from [`Coordinator::drain_events`].
//! Turtle commands are replayed one at a time: each
//! [`CoordinatorEvent::Turtle`] must be acknowledged with
//! [`Coordinator::turtle_cmd_complete`] before the runtime continues.

use std::collections::VecDeque;
use std::mem;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use sponge_lang::{DrawCommand, TurtleCommand};
use web_time::Instant;

use crate::canvas::Drawing;
use crate::checker::{TestCase, TestResult};
use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::model::{AdditionalFile, BreakpointSet, DebugContext, additional_files_init_code};
use crate::protocol::{BookNode, FinishReason, SessionFile, WorkerCommand, WorkerEvent};
use crate::proxy::{Reply, Route};
use crate::replay::{ReplayQueue, Ticket};
use crate::session::{Session, SessionId, ThreadSpawner, WorkerSpawner};
use crate::signal::{INTERRUPT_SIGINT, key_to_vm_code};
use crate::state::ExecutionState;

/// What the coordinator reports to its observers.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    StateChanged(ExecutionState),
    Print(String),
    Cls,
    Draw(Vec<DrawCommand>),
    Audio(String),
    /// Replay `command` on turtle `id`, then call
    /// [`Coordinator::turtle_cmd_complete`] with `ticket`.
    Turtle {
        ticket: Ticket,
        id: i64,
        command: TurtleCommand,
    },
    /// Stop every turtle animation in progress.
    TurtleStop,
}

/// The result of an asynchronous coordinator operation.
///
/// Resolves exactly once. Polling after the value was taken reports
/// [`RunnerError::Disconnected`].
#[derive(Debug)]
pub struct Completion<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Completion<T> {
    fn channel() -> (Sender<Result<T>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }

    fn resolved(result: Result<T>) -> Self {
        let (tx, completion) = Self::channel();
        let _ = tx.send(result);
        completion
    }

    /// The result, if it has arrived.
    pub fn try_take(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(RunnerError::Disconnected)),
        }
    }
}

/// How a debug or run finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugFinished {
    pub reason: FinishReason,
    pub updated_session_files: Vec<SessionFile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestFinished {
    pub results: Vec<TestResult>,
    pub code: String,
    pub book_node: BookNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExampleDrawn {
    pub book_node: BookNode,
    pub drawing: Drawing,
}

/// Extras for [`Coordinator::debug`] and [`Coordinator::run`].
#[derive(Debug, Clone, Default)]
pub struct DebugOptions {
    /// Expressions evaluated at every pause.
    pub watches: Vec<String>,
    /// Written before the program starts.
    pub additional_files: Vec<AdditionalFile>,
    /// Canned console input, one line per request.
    pub fixed_input: Option<String>,
    pub session_files: Vec<SessionFile>,
}

struct PendingTest {
    tx: Sender<Result<TestFinished>>,
    code: String,
    book_node: BookNode,
}

pub struct Coordinator<S: WorkerSpawner = ThreadSpawner> {
    config: RunnerConfig,
    spawner: S,
    session: Option<Session>,
    last_session: u64,
    state: ExecutionState,
    breakpoints: BreakpointSet,
    debug_context: Option<DebugContext>,
    fixed_input: Option<VecDeque<String>>,
    pending_debug: Option<Sender<Result<DebugFinished>>>,
    pending_test: Option<PendingTest>,
    pending_install: Option<Sender<Result<()>>>,
    pending_example: Option<Sender<Result<ExampleDrawn>>>,
    kill_deadline: Option<Instant>,
    turtles: ReplayQueue<(i64, TurtleCommand)>,
    outbox: Vec<CoordinatorEvent>,
    console: String,
}

impl<S: WorkerSpawner> std::fmt::Debug for Coordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("session", &self.session.as_ref().map(Session::id))
            .field("state", &self.state)
            .field("breakpoints", &self.breakpoints)
            .field("kill_pending", &self.kill_deadline.is_some())
            .finish_non_exhaustive()
    }
}

impl Coordinator<ThreadSpawner> {
    /// Start a coordinator running workers on OS threads.
    pub fn new(config: RunnerConfig) -> Result<Self> {
        Self::with_spawner(config, ThreadSpawner)
    }
}

impl<S: WorkerSpawner> Coordinator<S> {
    /// Start the first session. The coordinator begins in
    /// [`ExecutionState::Loading`].
    pub fn with_spawner(config: RunnerConfig, mut spawner: S) -> Result<Self> {
        let session = Session::start(SessionId(1), &mut spawner, &config)?;
        let mut coordinator = Self {
            config,
            spawner,
            session: Some(session),
            last_session: 1,
            state: ExecutionState::Loading,
            breakpoints: BreakpointSet::new(),
            debug_context: None,
            fixed_input: None,
            pending_debug: None,
            pending_test: None,
            pending_install: None,
            pending_example: None,
            kill_deadline: None,
            turtles: ReplayQueue::new(),
            outbox: Vec::new(),
            console: String::new(),
        };
        coordinator.emit(CoordinatorEvent::StateChanged(ExecutionState::Loading));
        coordinator.print("Initialising");
        Ok(coordinator)
    }

    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    #[must_use]
    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    /// Id of the active session.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(Session::id)
    }

    /// Everything printed since the last clear.
    #[must_use]
    pub fn console(&self) -> &str {
        &self.console
    }

    #[must_use]
    pub fn debug_context(&self) -> Option<&DebugContext> {
        self.debug_context.as_ref()
    }

    #[must_use]
    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    pub fn set_breakpoints(&mut self, lines: impl IntoIterator<Item = u32>) -> bool {
        self.breakpoints.set(lines)
    }

    /// Gutter click. Returns whether the line is now armed.
    pub fn toggle_breakpoint(&mut self, line: u32) -> bool {
        self.breakpoints.toggle(line)
    }

    /// Whether a kill is waiting for the runtime to acknowledge.
    #[must_use]
    pub fn is_killing(&self) -> bool {
        self.kill_deadline.is_some()
    }

    pub fn drain_events(&mut self) -> Vec<CoordinatorEvent> {
        mem::take(&mut self.outbox)
    }

    fn emit(&mut self, event: CoordinatorEvent) {
        self.outbox.push(event);
    }

    fn print(&mut self, msg: &str) {
        if msg.is_empty() {
            return;
        }
        self.console.push_str(msg);
        self.emit(CoordinatorEvent::Print(msg.to_string()));
    }

    fn set_state(&mut self, to: ExecutionState) {
        let from = self.state;
        if from == to {
            return;
        }
        if !from.can_transition(to) {
            tracing::debug!(target: "sponge.coordinator", %from, %to, "ignoring transition outside the lifecycle");
            return;
        }
        tracing::debug!(target: "sponge.coordinator", %from, %to, "state changed");
        self.state = to;
        self.emit(CoordinatorEvent::StateChanged(to));
    }

    fn send(&mut self, command: WorkerCommand) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        match session.send(command) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(target: "sponge.coordinator", session = %session.id(), %err, "worker unreachable");
                self.replace_session("Restart Python...");
                false
            }
        }
    }

    fn reject(&self, op: &'static str) {
        tracing::debug!(target: "sponge.coordinator", op, state = %self.state, "command rejected");
    }

    fn clear_interrupt(&self) {
        if let Some(buffers) = self.session.as_ref().and_then(Session::buffers) {
            buffers.interrupt.clear();
        }
    }

    fn respond(&self, route: Route, reply: Reply) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.proxy().respond(route, reply))
    }

    /// Ensure a fresh, idle session.
    ///
    /// With a working interrupt channel the running program is interrupted
    /// and every parked request is reset instead of replacing the worker.
    /// Returns `false` when nothing was done.
    pub fn restart_worker(&mut self, force: bool, msg: &str) -> bool {
        let _span = tracing::debug_span!(target: "sponge.coordinator", "coordinator.command", op = "restart").entered();
        if self.state == ExecutionState::Ready && !force {
            self.reject("restart");
            return false;
        }
        self.turtles.reset();
        self.emit(CoordinatorEvent::TurtleStop);
        if self.state == ExecutionState::RestartingWorker && self.session.is_some() {
            tracing::debug!(target: "sponge.coordinator", "restart already in progress");
            return false;
        }
        if let Some(session) = self.session.as_ref().filter(|s| s.can_interrupt()) {
            session.interrupt(INTERRUPT_SIGINT);
            let reset = session.proxy().reset();
            tracing::debug!(target: "sponge.coordinator", session = %session.id(), reset, "soft reset");
            if matches!(
                self.state,
                ExecutionState::AwaitingInput | ExecutionState::OnBreakpoint
            ) {
                self.debug_context = None;
                self.set_state(ExecutionState::Running);
            }
            return true;
        }
        self.replace_session(msg);
        true
    }

    /// Terminate the current session and start the next one.
    fn replace_session(&mut self, msg: &str) {
        if let Some(old) = self.session.take() {
            old.terminate();
        }
        self.kill_deadline = None;
        self.debug_context = None;
        self.fixed_input = None;
        self.abandon_pending();

        self.last_session += 1;
        let id = SessionId(self.last_session);
        match Session::start(id, &mut self.spawner, &self.config) {
            Ok(session) => {
                tracing::debug!(target: "sponge.coordinator", session = %id, "worker replaced");
                self.session = Some(session);
            }
            Err(err) => {
                tracing::error!(target: "sponge.coordinator", session = %id, %err, "failed to start worker");
            }
        }
        self.set_state(ExecutionState::RestartingWorker);
        self.print(msg);
    }

    /// A replaced worker will never answer what was asked of it.
    fn abandon_pending(&mut self) {
        if let Some(tx) = self.pending_debug.take() {
            let _ = tx.send(Err(RunnerError::Disconnected));
        }
        if let Some(pending) = self.pending_test.take() {
            let _ = pending.tx.send(Err(RunnerError::Disconnected));
        }
        if let Some(tx) = self.pending_install.take() {
            let _ = tx.send(Err(RunnerError::Disconnected));
        }
        if let Some(tx) = self.pending_example.take() {
            let _ = tx.send(Err(RunnerError::Disconnected));
        }
    }

    /// Debug `code` with the current breakpoint set.
    pub fn debug(&mut self, code: &str, options: DebugOptions) -> Completion<DebugFinished> {
        self.start_program(code, options, true)
    }

    /// Run `code` without instrumentation.
    pub fn run(&mut self, code: &str, options: DebugOptions) -> Completion<DebugFinished> {
        self.start_program(code, options, false)
    }

    fn start_program(
        &mut self,
        code: &str,
        options: DebugOptions,
        debugging: bool,
    ) -> Completion<DebugFinished> {
        let op = if debugging { "debug" } else { "run" };
        let _span = tracing::debug_span!(target: "sponge.coordinator", "coordinator.command", op).entered();
        if let Some(previous) = self.pending_debug.take() {
            let _ = previous.send(Err(RunnerError::cancelled("Debug")));
        }
        if code.is_empty() || self.session.is_none() || self.state != ExecutionState::Ready {
            self.reject(op);
            return Completion::resolved(Err(RunnerError::NotReady { state: self.state }));
        }
        self.clear_interrupt();

        let init_code = Some(additional_files_init_code(&options.additional_files))
            .filter(|c| !c.is_empty());
        let session_files_allowed = self.config.session_files_allowed;
        let command = if debugging {
            let breakpoints = Some(self.breakpoints.to_vec());
            self.breakpoints.mark_sent();
            WorkerCommand::Debug {
                code: code.to_string(),
                init_code,
                breakpoints,
                watches: options.watches,
                session_files: options.session_files,
                is_session_files_allowed: session_files_allowed,
            }
        } else {
            WorkerCommand::Run {
                code: code.to_string(),
                init_code,
                session_files: options.session_files,
                is_session_files_allowed: session_files_allowed,
            }
        };
        self.fixed_input = options
            .fixed_input
            .map(|text| text.split('\n').map(str::to_string).collect());
        self.debug_context = None;
        if !self.send(command) {
            return Completion::resolved(Err(RunnerError::Disconnected));
        }

        let (tx, completion) = Completion::channel();
        self.pending_debug = Some(tx);
        self.set_state(ExecutionState::Running);
        self.clear_console();
        completion
    }

    /// Run `tests` against `code`. At most one test batch is pending; an
    /// earlier one is cancelled first.
    pub fn test(
        &mut self,
        code: &str,
        tests: Vec<TestCase>,
        additional_files: &[AdditionalFile],
        book_node: BookNode,
    ) -> Completion<TestFinished> {
        let _span = tracing::debug_span!(target: "sponge.coordinator", "coordinator.command", op = "test").entered();
        if let Some(previous) = self.pending_test.take() {
            let _ = previous.tx.send(Err(RunnerError::cancelled("Test")));
        }
        if code.is_empty() || self.session.is_none() || self.state != ExecutionState::Ready {
            self.reject("test");
            return Completion::resolved(Err(RunnerError::NotReady { state: self.state }));
        }
        self.clear_interrupt();

        let init_code = Some(additional_files_init_code(additional_files)).filter(|c| !c.is_empty());
        let command = WorkerCommand::Test {
            code: code.to_string(),
            init_code,
            tests,
            book_node: book_node.clone(),
            session_files: Vec::new(),
            is_session_files_allowed: false,
        };
        if !self.send(command) {
            return Completion::resolved(Err(RunnerError::Disconnected));
        }

        let (tx, completion) = Completion::channel();
        self.pending_test = Some(PendingTest {
            tx,
            code: code.to_string(),
            book_node,
        });
        self.set_state(ExecutionState::Running);
        self.clear_console();
        completion
    }

    /// Install packages from the configured index.
    pub fn install_deps(&mut self, deps: Vec<String>) -> Completion<()> {
        let _span = tracing::debug_span!(target: "sponge.coordinator", "coordinator.command", op = "install-deps").entered();
        if self.pending_install.is_some() || self.state != ExecutionState::Ready {
            self.reject("install-deps");
            return Completion::resolved(Err(RunnerError::NotReady { state: self.state }));
        }
        if !self.send(WorkerCommand::InstallDeps { deps }) {
            return Completion::resolved(Err(RunnerError::Disconnected));
        }
        let (tx, completion) = Completion::channel();
        self.pending_install = Some(tx);
        self.set_state(ExecutionState::Running);
        completion
    }

    /// Draw an example picture off screen.
    pub fn draw_turtle_example(
        &mut self,
        code: &str,
        inputs: Vec<String>,
        book_node: BookNode,
    ) -> Completion<ExampleDrawn> {
        let _span = tracing::debug_span!(target: "sponge.coordinator", "coordinator.command", op = "draw-turtle-example").entered();
        if self.pending_example.is_some() || self.state != ExecutionState::Ready {
            self.reject("draw-turtle-example");
            return Completion::resolved(Err(RunnerError::NotReady { state: self.state }));
        }
        self.clear_interrupt();
        let command = WorkerCommand::DrawTurtleExample {
            code: code.to_string(),
            inputs,
            book_node,
        };
        if !self.send(command) {
            return Completion::resolved(Err(RunnerError::Disconnected));
        }
        let (tx, completion) = Completion::channel();
        self.pending_example = Some(tx);
        self.set_state(ExecutionState::Running);
        completion
    }

    fn clear_console(&mut self) {
        self.console.clear();
        self.emit(CoordinatorEvent::Cls);
    }

    /// Answer the program's input request with `text`.
    pub fn input(&mut self, text: &str) -> bool {
        let _span = tracing::debug_span!(target: "sponge.coordinator", "coordinator.command", op = "input").entered();
        if self.state != ExecutionState::AwaitingInput {
            self.reject("input");
            return false;
        }
        self.send_input(text)
    }

    fn send_input(&mut self, text: &str) -> bool {
        let reply = Reply::Input {
            data: text.to_string(),
            breakpoints: self.breakpoints.take_dirty(),
        };
        if !self.respond(Route::Input, reply) {
            tracing::debug!(target: "sponge.coordinator", "no input request parked");
        }
        self.print(&format!("{text}\n"));
        self.set_state(ExecutionState::Running);
        true
    }

    /// Resume from a breakpoint.
    pub fn resume(&mut self) -> bool {
        self.continue_execution(false)
    }

    /// Resume and pause again at the next line.
    pub fn step(&mut self) -> bool {
        self.continue_execution(true)
    }

    /// Resume from a breakpoint. A step also arms the line after the
    /// current one. The breakpoint set travels only when it changed.
    pub fn continue_execution(&mut self, step: bool) -> bool {
        let op = if step { "step" } else { "continue" };
        let _span = tracing::debug_span!(target: "sponge.coordinator", "coordinator.command", op).entered();
        if self.state != ExecutionState::OnBreakpoint {
            self.reject(op);
            return false;
        }
        if step && let Some(ctx) = &self.debug_context {
            self.breakpoints.synthesize_step(ctx.line);
        }
        let reply = Reply::Continue {
            step,
            breakpoints: self.breakpoints.take_dirty(),
        };
        if !self.respond(Route::DebugBreak, reply) {
            tracing::debug!(target: "sponge.coordinator", "no breakpoint request parked");
        }
        self.debug_context = None;
        self.set_state(ExecutionState::Running);
        true
    }

    /// Stop the running program. Escalates to a hard restart when the
    /// runtime has not acknowledged within the kill timeout. A second kill
    /// while one is pending does nothing.
    pub fn kill(&mut self) -> bool {
        let _span = tracing::debug_span!(target: "sponge.coordinator", "coordinator.command", op = "kill").entered();
        if self.kill_deadline.is_some() || !self.state.is_busy() {
            self.reject("kill");
            return false;
        }
        self.kill_deadline = Some(Instant::now() + self.config.kill_timeout());
        self.restart_worker(true, "Interrupted");
        true
    }

    fn check_kill_deadline(&mut self) {
        let Some(deadline) = self.kill_deadline else {
            return;
        };
        if Instant::now() < deadline {
            return;
        }
        self.kill_deadline = None;
        tracing::warn!(
            target: "sponge.coordinator",
            session = ?self.session_id(),
            timeout_ms = self.config.kill_timeout_ms,
            "runtime ignored interrupt; restarting worker"
        );
        if let Some(session) = &mut self.session {
            session.disable_interrupt();
        }
        self.restart_worker(true, "Restart Python...");
    }

    /// Acknowledge a replayed turtle command. Ignored while ready or for a
    /// ticket from before a reset.
    pub fn turtle_cmd_complete(&mut self, ticket: Ticket, result: Option<String>) -> bool {
        if self.state == ExecutionState::Ready || !self.turtles.is_in_flight(ticket) {
            self.turtles.complete(ticket);
            tracing::debug!(target: "sponge.coordinator", generation = ticket.generation(), "stale turtle completion");
            return false;
        }
        self.respond(Route::Turtle, Reply::Turtle(result));
        if let Some((ticket, (id, command))) = self.turtles.complete(ticket) {
            self.emit(CoordinatorEvent::Turtle {
                ticket,
                id,
                command,
            });
        }
        true
    }

    /// A key went down. Accepts key names (`"ArrowUp"`, `"a"`).
    pub fn key_down(&self, key: &str) -> bool {
        self.write_key(key, true)
    }

    pub fn key_up(&self, key: &str) -> bool {
        self.write_key(key, false)
    }

    fn write_key(&self, key: &str, down: bool) -> bool {
        let Some(buffers) = self.session.as_ref().and_then(Session::buffers) else {
            return false;
        };
        let Some(code) = key_to_vm_code(key) else {
            return false;
        };
        if down {
            buffers.key_down.press(code)
        } else {
            buffers.key_down.release(code)
        }
    }

    /// Handle every event already queued by the worker and check the kill
    /// deadline. Returns how many events were handled.
    pub fn pump(&mut self) -> usize {
        self.check_kill_deadline();
        let mut handled = 0;
        loop {
            let Some(session) = &self.session else {
                break;
            };
            match session.try_recv() {
                Ok(Some(event)) => {
                    self.handle_event(event);
                    handled += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    self.worker_lost(&err);
                    break;
                }
            }
        }
        handled
    }

    /// Wait up to `timeout` for at least one event, then pump.
    pub fn pump_blocking(&mut self, timeout: Duration) -> usize {
        let mut timeout = timeout;
        if let Some(deadline) = self.kill_deadline {
            timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
        }
        let first = match &self.session {
            Some(session) => session.recv_timeout(timeout),
            None => Ok(None),
        };
        let mut handled = 0;
        match first {
            Ok(Some(event)) => {
                self.handle_event(event);
                handled += 1;
            }
            Ok(None) => {}
            Err(err) => self.worker_lost(&err),
        }
        handled + self.pump()
    }

    /// Pump until `completion` resolves or `timeout` passes.
    pub fn wait_for<T>(&mut self, completion: &Completion<T>, timeout: Duration) -> Option<Result<T>> {
        let start = Instant::now();
        loop {
            if let Some(result) = completion.try_take() {
                return Some(result);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return None;
            }
            self.pump_blocking((timeout - elapsed).min(Duration::from_millis(20)));
        }
    }

    fn worker_lost(&mut self, err: &RunnerError) {
        tracing::error!(target: "sponge.coordinator", session = ?self.session_id(), %err, "worker lost");
        self.replace_session("Restart Python...");
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Loaded => self.set_state(ExecutionState::Initialising),
            WorkerEvent::InitDone => {
                if let Some(session) = &mut self.session {
                    session.mark_initialised();
                }
                self.kill_deadline = None;
                self.set_state(ExecutionState::Ready);
            }
            WorkerEvent::Print { msg } => {
                if self.state != ExecutionState::Ready {
                    self.print(&msg);
                }
            }
            WorkerEvent::Draw { msg } => self.emit(CoordinatorEvent::Draw(msg)),
            WorkerEvent::Audio { msg } => self.emit(CoordinatorEvent::Audio(msg)),
            WorkerEvent::Cls => self.clear_console(),
            WorkerEvent::Turtle { id, msg } => {
                if let Some((ticket, (id, command))) = self.turtles.push((id, msg)) {
                    self.emit(CoordinatorEvent::Turtle {
                        ticket,
                        id,
                        command,
                    });
                }
            }
            WorkerEvent::Input | WorkerEvent::Breakpt { .. }
                if self.state != ExecutionState::Running =>
            {
                tracing::debug!(target: "sponge.coordinator", state = %self.state, "ignoring pause outside a run");
            }
            WorkerEvent::Input => {
                let canned = self
                    .fixed_input
                    .as_mut()
                    .map(|lines| lines.pop_front().unwrap_or_default());
                match canned {
                    Some(line) => {
                        self.send_input(&line);
                    }
                    None => self.set_state(ExecutionState::AwaitingInput),
                }
            }
            WorkerEvent::Breakpt {
                lineno,
                env,
                watches,
            } => {
                self.debug_context = Some(DebugContext {
                    line: lineno,
                    variables: env.into_iter().collect(),
                    watches,
                });
                self.set_state(ExecutionState::OnBreakpoint);
            }
            WorkerEvent::DebugFinished {
                reason,
                updated_session_files,
            } => {
                self.kill_deadline = None;
                self.fixed_input = None;
                self.print(&format!("\n{}\n", reason.message()));
                self.set_state(ExecutionState::Ready);
                match self.pending_debug.take() {
                    Some(tx) => {
                        let _ = tx.send(Ok(DebugFinished {
                            reason,
                            updated_session_files,
                        }));
                    }
                    None => {
                        tracing::debug!(target: "sponge.coordinator", %reason, "dropping stale debug result");
                    }
                }
            }
            WorkerEvent::TestFinished {
                results,
                code,
                book_node,
            } => {
                self.kill_deadline = None;
                self.set_state(ExecutionState::Ready);
                match self.pending_test.take() {
                    Some(pending) if pending.code == code && pending.book_node == book_node => {
                        let _ = pending.tx.send(Ok(TestFinished {
                            results,
                            code,
                            book_node,
                        }));
                    }
                    other => {
                        self.pending_test = other;
                        tracing::debug!(target: "sponge.coordinator", node = %book_node.id, "dropping stale test result");
                    }
                }
            }
            WorkerEvent::InstallDepsFinished => {
                self.kill_deadline = None;
                self.set_state(ExecutionState::Ready);
                if let Some(tx) = self.pending_install.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            WorkerEvent::DrawTurtleExampleFinished { book_node, drawing } => {
                self.kill_deadline = None;
                self.set_state(ExecutionState::Ready);
                if let Some(tx) = self.pending_example.take() {
                    let _ = tx.send(Ok(ExampleDrawn { book_node, drawing }));
                }
            }
        }
    }
}

impl<S: WorkerSpawner> Drop for Coordinator<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::WorkerEndpoint;

    /// Keeps endpoints so tests can play the worker by hand.
    #[derive(Default)]
    struct Manual(Vec<WorkerEndpoint>);

    impl WorkerSpawner for Manual {
        fn spawn(&mut self, endpoint: WorkerEndpoint, _config: &RunnerConfig) -> Result<()> {
            self.0.push(endpoint);
            Ok(())
        }
    }

    fn ready() -> Coordinator<Manual> {
        let mut c = Coordinator::with_spawner(RunnerConfig::default(), Manual::default()).unwrap();
        let worker = c.spawner.0.last().unwrap();
        worker.emit(WorkerEvent::Loaded);
        worker.emit(WorkerEvent::InitDone);
        c.pump();
        assert_eq!(c.state(), ExecutionState::Ready);
        c.drain_events();
        c
    }

    fn worker(c: &Coordinator<Manual>) -> &WorkerEndpoint {
        c.spawner.0.last().unwrap()
    }

    #[test]
    fn starts_loading_then_becomes_ready() {
        let mut c = Coordinator::with_spawner(RunnerConfig::default(), Manual::default()).unwrap();
        assert_eq!(c.state(), ExecutionState::Loading);
        assert_eq!(c.console(), "Initialising");
        worker(&c).emit(WorkerEvent::Loaded);
        c.pump();
        assert_eq!(c.state(), ExecutionState::Initialising);
        worker(&c).emit(WorkerEvent::InitDone);
        c.pump();
        assert_eq!(c.state(), ExecutionState::Ready);
    }

    #[test]
    fn debug_sends_breakpoints_and_clears_console() {
        let mut c = ready();
        c.set_breakpoints([2]);
        let _done = c.debug("x = 1\ny = 2", DebugOptions::default());
        assert_eq!(c.state(), ExecutionState::Running);
        assert!(!c.breakpoints().is_dirty());
        let cmds: Vec<_> = worker(&c).commands.try_iter().collect();
        let Some(WorkerCommand::Debug { breakpoints, .. }) = cmds.last() else {
            panic!("expected debug, got {cmds:?}");
        };
        assert_eq!(breakpoints.as_deref(), Some(&[2][..]));
        assert_eq!(c.console(), "");
        assert!(c.drain_events().contains(&CoordinatorEvent::Cls));
    }

    #[test]
    fn debug_outside_ready_is_rejected() {
        let mut c = Coordinator::with_spawner(RunnerConfig::default(), Manual::default()).unwrap();
        let done = c.debug("print(1)", DebugOptions::default());
        assert!(matches!(
            done.try_take(),
            Some(Err(RunnerError::NotReady {
                state: ExecutionState::Loading
            }))
        ));
        assert_eq!(c.state(), ExecutionState::Loading);
    }

    #[test]
    fn prints_are_dropped_while_ready() {
        let mut c = ready();
        worker(&c).emit(WorkerEvent::Print { msg: "late".into() });
        c.pump();
        assert!(!c.console().contains("late"));
    }

    #[test]
    fn fixed_input_answers_requests() {
        let mut c = ready();
        let options = DebugOptions {
            fixed_input: Some("a\nb".into()),
            ..DebugOptions::default()
        };
        let _done = c.run("input()", options);
        let pending = worker(&c).proxy.request(Route::Input);
        worker(&c).emit(WorkerEvent::Input);
        c.pump();
        assert_eq!(c.state(), ExecutionState::Running);
        assert_eq!(
            pending.wait(),
            Reply::Input {
                data: "a".into(),
                breakpoints: None
            }
        );
        assert_eq!(c.console(), "a\n");
    }

    #[test]
    fn step_resends_breakpoints_only_when_changed() {
        let mut c = ready();
        c.set_breakpoints([2, 3]);
        let _done = c.debug("a = 1\nb = 2\nc = 3\nd = 4", DebugOptions::default());

        let paused = |c: &mut Coordinator<Manual>, line: u32| {
            let pending = worker(c).proxy.request(Route::DebugBreak);
            worker(c).emit(WorkerEvent::Breakpt {
                lineno: line,
                env: Default::default(),
                watches: Vec::new(),
            });
            c.pump();
            assert_eq!(c.state(), ExecutionState::OnBreakpoint);
            pending
        };

        let pending = paused(&mut c, 2);
        assert!(c.step());
        assert_eq!(
            pending.wait(),
            Reply::Continue {
                step: true,
                breakpoints: None
            }
        );

        let pending = paused(&mut c, 3);
        assert!(c.step());
        assert_eq!(
            pending.wait(),
            Reply::Continue {
                step: true,
                breakpoints: Some(vec![2, 3, 4])
            }
        );
        assert!(!c.breakpoints().is_dirty());
    }

    #[test]
    fn continue_outside_breakpoint_is_rejected() {
        let mut c = ready();
        assert!(!c.resume());
        assert!(!c.input("x"));
        assert!(!c.kill());
        assert_eq!(c.state(), ExecutionState::Ready);
        assert!(c.drain_events().is_empty());
    }

    #[test]
    fn stale_test_result_is_dropped() {
        let mut c = ready();
        let done = c.test("print(1)", Vec::new(), &[], BookNode::new("a", "A"));
        worker(&c).emit(WorkerEvent::TestFinished {
            results: Vec::new(),
            code: "print(2)".into(),
            book_node: BookNode::new("a", "A"),
        });
        c.pump();
        assert_eq!(c.state(), ExecutionState::Ready);
        assert!(done.try_take().is_none());
    }

    #[test]
    fn soft_restart_unblocks_input() {
        let mut c = ready();
        let _done = c.debug("input()", DebugOptions::default());
        let pending = worker(&c).proxy.request(Route::Input);
        worker(&c).emit(WorkerEvent::Input);
        c.pump();
        assert_eq!(c.state(), ExecutionState::AwaitingInput);

        assert!(c.restart_worker(true, "Interrupted"));
        assert_eq!(pending.wait(), Reply::Neutral);
        assert_eq!(c.state(), ExecutionState::Running);
        assert_eq!(c.session_id(), Some(SessionId(1)));
        assert!(c.session.as_ref().unwrap().buffers().unwrap().interrupt.is_raised());
    }

    #[test]
    fn stale_turtle_ticket_is_ignored() {
        let mut c = ready();
        let _done = c.run("import turtle", DebugOptions::default());
        worker(&c).emit(WorkerEvent::Turtle {
            id: 0,
            msg: TurtleCommand::Forward { value: 5.0 },
        });
        c.pump();
        let ticket = c
            .drain_events()
            .into_iter()
            .find_map(|e| match e {
                CoordinatorEvent::Turtle { ticket, .. } => Some(ticket),
                _ => None,
            })
            .unwrap();
        c.restart_worker(true, "");
        assert!(!c.turtle_cmd_complete(ticket, None));
    }

    #[test]
    fn key_codes_reach_the_buffer() {
        let c = ready();
        assert!(c.key_down("ArrowUp"));
        let keys = &c.session.as_ref().unwrap().buffers().unwrap().key_down;
        assert!(keys.is_down(38));
        assert!(c.key_up("ArrowUp"));
        assert!(!keys.is_down(38));
        assert!(!c.key_down("NotAKey"));
    }
}
