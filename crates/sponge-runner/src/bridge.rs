#![forbid(unsafe_code)]

//! Worker side of a session.
//!
//! The bridge owns the embedded runtime state (file system, installed
//! packages) and executes one [`WorkerCommand`] at a time. While a program
//! runs, runtime callbacks become [`WorkerEvent`]s; the blocking ones
//! (input, breakpoint pauses, sleep, turtle animation) park a request on
//! the session's [`SyncProxy`](crate::proxy::SyncProxy) *before* emitting
//! their event and block until the coordinator resolves it.
//!
//! Runtime faults never cross the channel as errors. Every debug or run
//! ends in exactly one `debug-finished` event carrying a
//! [`FinishReason`], every test batch in one `test-finished`.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sponge_lang::{
    BreakSnapshot, DrawCommand, Host, HostError, InjectionPlan, Interpreter, MemoryFs, Program,
    SESSION_DIR, TurtleCommand,
};

use crate::canvas::{Drawing, VirtualCanvas};
use crate::checker::{self, EvidenceSource, RunEnd, TestCase, TestResult};
use crate::config::RunnerConfig;
use crate::protocol::{FinishReason, SessionFile, WorkerCommand, WorkerEvent};
use crate::proxy::{Reply, Route};
use crate::session::WorkerEndpoint;
use crate::signal::{InterruptBuffer, KeyDownBuffer, SharedBuffers};

/// Reads the two ways a running program can be asked to stop.
#[derive(Debug, Clone)]
struct InterruptProbe {
    killed: Arc<AtomicBool>,
    buffer: Option<InterruptBuffer>,
}

impl InterruptProbe {
    fn raised(&self) -> bool {
        self.killed.load(Ordering::Acquire) || self.buffer.as_ref().is_some_and(InterruptBuffer::is_raised)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Debug,
    Run,
}

/// A program to execute in debug or run mode.
struct Job {
    mode: Mode,
    code: String,
    init_code: Option<String>,
    breakpoints: Option<Vec<u32>>,
    watches: Vec<String>,
    session_files: Vec<SessionFile>,
    session_files_allowed: bool,
}

#[derive(Debug)]
pub struct Bridge {
    endpoint: WorkerEndpoint,
    buffers: Option<SharedBuffers>,
    fs: MemoryFs,
    installed: BTreeSet<String>,
    installer_ready: bool,
    package_index: Vec<String>,
    standalone: bool,
    lock_revision: Option<u64>,
    initialised: bool,
}

impl Bridge {
    #[must_use]
    pub fn new(endpoint: WorkerEndpoint, config: &RunnerConfig) -> Self {
        Self {
            endpoint,
            buffers: None,
            fs: MemoryFs::new(),
            installed: BTreeSet::new(),
            installer_ready: false,
            package_index: config.package_index.clone(),
            standalone: config.standalone,
            lock_revision: None,
            initialised: false,
        }
    }

    /// Serve commands until the session is terminated.
    pub fn run(mut self) {
        if !self.endpoint.emit(WorkerEvent::Loaded) {
            return;
        }
        while let Ok(command) = self.endpoint.commands.recv() {
            if self.endpoint.is_killed() {
                break;
            }
            self.handle(command);
        }
        tracing::debug!(target: "sponge.bridge", session = %self.endpoint.id, "worker exiting");
    }

    fn probe(&self) -> InterruptProbe {
        InterruptProbe {
            killed: Arc::clone(&self.endpoint.killed),
            buffer: self.buffers.as_ref().map(|b| b.interrupt.clone()),
        }
    }

    fn print(&self, msg: impl Into<String>) {
        self.endpoint.emit(WorkerEvent::Print { msg: msg.into() });
    }

    pub fn handle(&mut self, command: WorkerCommand) {
        let _span = tracing::debug_span!(
            target: "sponge.bridge",
            "bridge.command",
            cmd = command.name(),
            session = %self.endpoint.id
        )
        .entered();
        match command {
            WorkerCommand::Init { standalone } => {
                self.standalone = standalone;
                self.fs.mkdir(SESSION_DIR);
                self.initialised = true;
                self.print(format!("Sponge runtime {}\n", env!("CARGO_PKG_VERSION")));
                self.endpoint.emit(WorkerEvent::InitDone);
            }
            WorkerCommand::SetSharedBuffers { buffers } => {
                self.buffers = Some(buffers);
            }
            WorkerCommand::InstallDeps { deps } => {
                for dep in &deps {
                    self.install_package(dep);
                }
                self.endpoint.emit(WorkerEvent::InstallDepsFinished);
            }
            WorkerCommand::Debug {
                code,
                init_code,
                breakpoints,
                watches,
                session_files,
                is_session_files_allowed,
            } => self.execute(Job {
                mode: Mode::Debug,
                code,
                init_code,
                breakpoints,
                watches,
                session_files,
                session_files_allowed: is_session_files_allowed,
            }),
            WorkerCommand::Run {
                code,
                init_code,
                session_files,
                is_session_files_allowed,
            } => self.execute(Job {
                mode: Mode::Run,
                code,
                init_code,
                breakpoints: None,
                watches: Vec::new(),
                session_files,
                session_files_allowed: is_session_files_allowed,
            }),
            WorkerCommand::Test {
                code,
                init_code,
                tests,
                book_node,
                session_files,
                is_session_files_allowed,
            } => {
                if !self.initialised {
                    self.print("Runtime not yet initialised\n");
                    return;
                }
                if is_session_files_allowed {
                    self.install_session_files(&session_files);
                }
                self.run_init_code(init_code.as_deref());
                let results = self.run_tests(&code, &tests);
                self.endpoint.emit(WorkerEvent::TestFinished {
                    results,
                    code,
                    book_node,
                });
            }
            WorkerCommand::DrawTurtleExample {
                code,
                inputs,
                book_node,
            } => {
                let drawing = self.draw_example(&code, inputs);
                self.endpoint
                    .emit(WorkerEvent::DrawTurtleExampleFinished { book_node, drawing });
            }
        }
    }

    fn install_package(&mut self, name: &str) {
        if !self.installer_ready {
            self.print("Initialising package installer\n");
            self.installer_ready = true;
        }
        self.print(format!("Installing package: {name}\n"));
        if self.package_index.iter().any(|p| p == name) {
            self.installed.insert(name.to_string());
            self.print(format!("Successfully installed package '{name}'\n"));
        } else {
            let index = if self.standalone { "bundled" } else { "network" };
            tracing::debug!(target: "sponge.bridge", package = name, index, "package not found");
            self.print(format!(
                "Error installing package: {name}\nNo package named '{name}' in the {index} index\n"
            ));
        }
    }

    fn install_session_files(&mut self, files: &[SessionFile]) {
        for file in files {
            self.fs
                .write(&format!("{SESSION_DIR}/{}", file.filename), file.data.as_str());
        }
        self.lock_revision = Some(self.fs.revision());
    }

    fn updated_session_files(&mut self) -> Vec<SessionFile> {
        let Some(since) = self.lock_revision.take() else {
            return Vec::new();
        };
        self.fs
            .modified_since(SESSION_DIR, since)
            .into_iter()
            .map(|(name, data)| SessionFile::new(name, data))
            .collect()
    }

    fn run_init_code(&mut self, init_code: Option<&str>) {
        let Some(code) = init_code.filter(|c| !c.trim().is_empty()) else {
            return;
        };
        let mut host = TestHost::new(&self.fs, &self.installed, self.probe(), Vec::new());
        if let Err(err) = Interpreter::new(&mut host).exec_source(code) {
            tracing::debug!(target: "sponge.bridge", %err, "init code failed");
        }
        self.fs = host.fs;
    }

    fn execute(&mut self, job: Job) {
        if !self.initialised {
            self.print("Runtime not yet initialised\n");
            return;
        }
        self.run_init_code(job.init_code.as_deref());
        if job.session_files_allowed {
            self.install_session_files(&job.session_files);
        }

        let reason = match Program::compile(&job.code) {
            Err(err) => {
                self.print(format!("{err}\n"));
                FinishReason::Error
            }
            Ok(mut program) => {
                if job.mode == Mode::Debug {
                    program.instrument(&InjectionPlan::AllLines);
                }
                let probe = self.probe();
                let key_down = self.buffers.as_ref().map(|b| b.key_down.clone());
                let mut host = LiveHost {
                    endpoint: &self.endpoint,
                    fs: &mut self.fs,
                    installed: &self.installed,
                    probe,
                    key_down,
                    debugging: job.mode == Mode::Debug,
                    active: job.breakpoints.unwrap_or_default().into_iter().collect(),
                    step_into: false,
                    watches: job.watches,
                };
                let outcome = Interpreter::new(&mut host).run(program.body());
                match outcome {
                    Ok(()) => FinishReason::Ok,
                    Err(err) if err.is_interrupt() => FinishReason::Interrupt,
                    Err(err) => {
                        self.print(format!("{err}\n"));
                        FinishReason::Error
                    }
                }
            }
        };
        tracing::debug!(target: "sponge.bridge", %reason, "program finished");
        let updated_session_files = if job.session_files_allowed {
            self.updated_session_files()
        } else {
            Vec::new()
        };
        self.endpoint.emit(WorkerEvent::DebugFinished {
            reason,
            updated_session_files,
        });
    }

    fn run_tests(&self, code: &str, tests: &[TestCase]) -> Vec<TestResult> {
        let program = match Program::compile(code) {
            Ok(program) => program,
            Err(err) => {
                tracing::debug!(target: "sponge.bridge", %err, "test code failed to compile");
                return tests
                    .iter()
                    .map(|_| TestResult::failure(checker::FAILED_TO_COMPILE))
                    .collect();
            }
        };
        let mut results = Vec::with_capacity(tests.len());
        for case in tests {
            match self.run_case(&program, code, case) {
                Some(result) => results.push(result),
                None => {
                    tracing::debug!(target: "sponge.bridge", "test batch interrupted");
                    return tests
                        .iter()
                        .map(|_| TestResult::failure(checker::INTERRUPTED))
                        .collect();
                }
            }
        }
        results
    }

    /// `None` when the run was interrupted.
    fn run_case(&self, program: &Program, code: &str, case: &TestCase) -> Option<TestResult> {
        let inputs = case.input.lines();
        let mut host = TestHost::new(&self.fs, &self.installed, self.probe(), inputs.clone());
        let end = match Interpreter::new(&mut host).run(program.body()) {
            Ok(()) => RunEnd::Completed,
            Err(err) if err.is_interrupt() => return None,
            Err(_) => RunEnd::Faulted,
        };
        let unconsumed: Vec<String> = host.inputs.iter().cloned().collect();
        let mut evidence = TestEvidence {
            bridge: self,
            program,
            code,
            inputs,
            output: host.output.take(),
            fs: host.fs,
            drawing: host.canvas.into_drawing(),
        };
        Some(checker::evaluate(case, end, &unconsumed, &mut evidence))
    }

    fn draw_example(&self, code: &str, inputs: Vec<String>) -> Drawing {
        let mut host = TestHost::new(&self.fs, &self.installed, self.probe(), inputs);
        if let Err(err) = Interpreter::new(&mut host).exec_source(code) {
            tracing::debug!(target: "sponge.bridge", %err, "example drawing failed");
        }
        host.canvas.into_drawing()
    }
}

/// Host for debug and run mode: talks to the coordinator.
struct LiveHost<'a> {
    endpoint: &'a WorkerEndpoint,
    fs: &'a mut MemoryFs,
    installed: &'a BTreeSet<String>,
    probe: InterruptProbe,
    key_down: Option<KeyDownBuffer>,
    debugging: bool,
    active: BTreeSet<u32>,
    step_into: bool,
    watches: Vec<String>,
}

impl LiveHost<'_> {
    fn emit(&self, event: WorkerEvent) -> Result<(), HostError> {
        if self.endpoint.emit(event) {
            Ok(())
        } else {
            Err(HostError::Interrupted)
        }
    }

    /// Park on `route`, announce it with `event`, then block.
    fn block_on(&self, route: Route, event: WorkerEvent) -> Result<Reply, HostError> {
        let pending = self.endpoint.proxy.request(route);
        self.emit(event)?;
        match pending.wait() {
            Reply::Neutral => Err(HostError::Interrupted),
            reply => Ok(reply),
        }
    }
}

impl Host for LiveHost<'_> {
    fn write(&mut self, text: &str) -> Result<(), HostError> {
        self.emit(WorkerEvent::Print {
            msg: text.to_string(),
        })
    }

    fn read_line(&mut self) -> Result<String, HostError> {
        match self.block_on(Route::Input, WorkerEvent::Input)? {
            Reply::Input { data, breakpoints } => {
                if let Some(lines) = breakpoints {
                    self.active = lines.into_iter().collect();
                }
                Ok(data)
            }
            other => Err(HostError::Failed(format!("unexpected reply to input: {other:?}"))),
        }
    }

    fn fs(&mut self) -> &mut MemoryFs {
        &mut *self.fs
    }

    fn interrupted(&self) -> bool {
        self.probe.raised()
    }

    fn sleep(&mut self, seconds: f64) -> Result<(), HostError> {
        let duration = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO);
        match self.endpoint.proxy.sleep(duration) {
            Reply::Elapsed | Reply::NotModified => Ok(()),
            Reply::Neutral => Err(HostError::Interrupted),
            other => Err(HostError::Failed(format!("unexpected reply to sleep: {other:?}"))),
        }
    }

    fn should_pause(&mut self, line: u32) -> bool {
        self.debugging && (self.step_into || self.active.contains(&line))
    }

    fn pause(&mut self, snapshot: BreakSnapshot) -> Result<(), HostError> {
        self.step_into = false;
        let event = WorkerEvent::Breakpt {
            lineno: snapshot.line,
            env: snapshot.variables,
            watches: snapshot.watches,
        };
        match self.block_on(Route::DebugBreak, event)? {
            Reply::Continue { step, breakpoints } => {
                if let Some(lines) = breakpoints {
                    self.active = lines.into_iter().collect();
                }
                self.step_into = step;
                Ok(())
            }
            other => Err(HostError::Failed(format!("unexpected reply to breakpoint: {other:?}"))),
        }
    }

    fn watches(&self) -> Vec<String> {
        self.watches.clone()
    }

    fn turtle(&mut self, id: u32, command: TurtleCommand) -> Result<(), HostError> {
        let event = WorkerEvent::Turtle {
            id: i64::from(id),
            msg: command,
        };
        self.block_on(Route::Turtle, event).map(drop)
    }

    fn draw(&mut self, commands: Vec<DrawCommand>) -> Result<(), HostError> {
        self.emit(WorkerEvent::Draw { msg: commands })
    }

    fn audio(&mut self, name: &str) -> Result<(), HostError> {
        self.emit(WorkerEvent::Audio {
            msg: name.to_string(),
        })
    }

    fn clear_screen(&mut self) -> Result<(), HostError> {
        self.emit(WorkerEvent::Cls)
    }

    fn key_down(&self, code: u8) -> bool {
        self.key_down.as_ref().is_some_and(|keys| keys.is_down(code))
    }

    fn has_package(&self, name: &str) -> bool {
        self.installed.contains(name)
    }
}

/// Host for test runs: canned input, captured output, virtual canvas.
struct TestHost<'a> {
    output: Rc<RefCell<String>>,
    inputs: VecDeque<String>,
    fs: MemoryFs,
    canvas: VirtualCanvas,
    installed: &'a BTreeSet<String>,
    probe: InterruptProbe,
}

impl<'a> TestHost<'a> {
    fn new(
        fs: &MemoryFs,
        installed: &'a BTreeSet<String>,
        probe: InterruptProbe,
        inputs: Vec<String>,
    ) -> Self {
        Self {
            output: Rc::default(),
            inputs: inputs.into(),
            fs: fs.clone(),
            canvas: VirtualCanvas::new(),
            installed,
            probe,
        }
    }
}

impl Host for TestHost<'_> {
    fn write(&mut self, text: &str) -> Result<(), HostError> {
        self.output.borrow_mut().push_str(text);
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, HostError> {
        self.inputs.pop_front().ok_or(HostError::EndOfInput)
    }

    fn fs(&mut self) -> &mut MemoryFs {
        &mut self.fs
    }

    fn interrupted(&self) -> bool {
        self.probe.raised()
    }

    fn turtle(&mut self, id: u32, command: TurtleCommand) -> Result<(), HostError> {
        self.canvas.apply(i64::from(id), &command);
        Ok(())
    }

    fn draw(&mut self, commands: Vec<DrawCommand>) -> Result<(), HostError> {
        self.canvas.draw(&commands);
        Ok(())
    }

    fn has_package(&self, name: &str) -> bool {
        self.installed.contains(name)
    }
}

/// What a finished test run left behind. Statement and turtle criteria
/// re-run the program on a fresh host with the same inputs.
struct TestEvidence<'a> {
    bridge: &'a Bridge,
    program: &'a Program,
    code: &'a str,
    inputs: Vec<String>,
    output: String,
    fs: MemoryFs,
    drawing: Drawing,
}

impl TestEvidence<'_> {
    fn fresh_host(&self) -> TestHost<'_> {
        TestHost::new(
            &self.bridge.fs,
            &self.bridge.installed,
            self.bridge.probe(),
            self.inputs.clone(),
        )
    }
}

impl EvidenceSource for TestEvidence<'_> {
    fn output(&self) -> &str {
        &self.output
    }

    fn code(&self) -> &str {
        self.code
    }

    fn file(&mut self, name: &str) -> Option<String> {
        self.fs.read(name).map(str::to_string)
    }

    fn statement_output(&mut self, statement: &str) -> Option<String> {
        let mut host = self.fresh_host();
        let sink = Rc::clone(&host.output);
        let mut interp = Interpreter::new(&mut host);
        interp.run(self.program.body()).ok()?;
        sink.borrow_mut().clear();
        interp.exec_source(statement).ok()?;
        let out = sink.borrow().clone();
        Some(out)
    }

    fn turtle_matches(&mut self, reference_code: &str) -> bool {
        let mut host = self.fresh_host();
        if let Err(err) = Interpreter::new(&mut host).exec_source(reference_code) {
            tracing::debug!(target: "sponge.bridge", %err, "reference drawing failed");
            return false;
        }
        host.canvas.drawing().same_as(&self.drawing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{ExpectedOutput, Requirement, RequirementKind, TestInput};
    use crate::protocol::BookNode;
    use crate::proxy::SyncProxy;
    use crate::session::SessionId;
    use std::sync::mpsc::{self, Receiver};
    use std::thread;

    fn bridge() -> (Bridge, Receiver<WorkerEvent>, Arc<SyncProxy>) {
        let (_command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let proxy = Arc::new(SyncProxy::new());
        let endpoint = WorkerEndpoint {
            id: SessionId(1),
            commands: command_rx,
            events: event_tx,
            proxy: Arc::clone(&proxy),
            killed: Arc::new(AtomicBool::new(false)),
        };
        let mut bridge = Bridge::new(endpoint, &RunnerConfig::default());
        bridge.handle(WorkerCommand::Init { standalone: false });
        assert!(matches!(event_rx.try_recv(), Ok(WorkerEvent::Print { .. })));
        assert_eq!(event_rx.try_recv().ok(), Some(WorkerEvent::InitDone));
        (bridge, event_rx, proxy)
    }

    fn run(code: &str) -> WorkerCommand {
        WorkerCommand::Run {
            code: code.into(),
            init_code: None,
            session_files: Vec::new(),
            is_session_files_allowed: false,
        }
    }

    fn drain(rx: &Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
        rx.try_iter().collect()
    }

    fn printed(events: &[WorkerEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Print { msg } => Some(msg.as_str()),
                _ => None,
            })
            .collect()
    }

    fn test(code: &str, tests: Vec<TestCase>) -> WorkerCommand {
        WorkerCommand::Test {
            code: code.into(),
            init_code: None,
            tests,
            book_node: BookNode::new("n1", "Sums"),
            session_files: Vec::new(),
            is_session_files_allowed: false,
        }
    }

    fn results(events: Vec<WorkerEvent>) -> Vec<TestResult> {
        match events.into_iter().last() {
            Some(WorkerEvent::TestFinished { results, .. }) => results,
            other => panic!("expected test-finished, got {other:?}"),
        }
    }

    #[test]
    fn run_prints_then_finishes_ok() {
        let (mut bridge, rx, _) = bridge();
        bridge.handle(run("print('a', 1)"));
        let events = drain(&rx);
        assert_eq!(printed(&events), "a 1\n");
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::DebugFinished {
                reason: FinishReason::Ok,
                ..
            })
        ));
    }

    #[test]
    fn syntax_error_is_printed_and_reported() {
        let (mut bridge, rx, _) = bridge();
        bridge.handle(run("if x\n  pass"));
        let events = drain(&rx);
        assert!(printed(&events).contains("SyntaxError"));
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::DebugFinished {
                reason: FinishReason::Error,
                ..
            })
        ));
    }

    #[test]
    fn runtime_error_prints_traceback() {
        let (mut bridge, rx, _) = bridge();
        bridge.handle(run("x = 1 / 0"));
        let events = drain(&rx);
        assert!(printed(&events).contains("ZeroDivisionError: division by zero"));
    }

    #[test]
    fn input_blocks_until_answered() {
        let (mut bridge, rx, proxy) = bridge();
        let worker = thread::spawn(move || {
            bridge.handle(run("name = input('who? ')\nprint('hi', name)"));
        });
        assert_eq!(rx.recv().unwrap(), WorkerEvent::Print { msg: "who? ".into() });
        assert_eq!(rx.recv().unwrap(), WorkerEvent::Input);
        assert!(proxy.respond(
            Route::Input,
            Reply::Input {
                data: "sam".into(),
                breakpoints: None
            }
        ));
        worker.join().unwrap();
        let events = drain(&rx);
        assert_eq!(printed(&events), "hi sam\n");
    }

    #[test]
    fn reset_while_waiting_is_an_interrupt() {
        let (mut bridge, rx, proxy) = bridge();
        let worker = thread::spawn(move || bridge.handle(run("input()")));
        assert_eq!(rx.recv().unwrap(), WorkerEvent::Input);
        proxy.reset();
        worker.join().unwrap();
        assert!(matches!(
            rx.recv().unwrap(),
            WorkerEvent::DebugFinished {
                reason: FinishReason::Interrupt,
                ..
            }
        ));
    }

    #[test]
    fn failed_compile_fails_every_case() {
        let (mut bridge, rx, _) = bridge();
        bridge.handle(test("print(", vec![TestCase::text("", ""), TestCase::text("1", "1")]));
        let results = results(drain(&rx));
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.error.as_deref() == Some(checker::FAILED_TO_COMPILE)));
    }

    #[test]
    fn cases_run_with_their_own_inputs() {
        let (mut bridge, rx, _) = bridge();
        let code = "a = int(input())\nb = int(input())\nprint(a + b)";
        bridge.handle(test(
            code,
            vec![
                TestCase::text("1\n2", "3"),
                TestCase::text("2\n2", "5"),
                TestCase::text("1", "1"),
                TestCase::text("1\n1\n1", "2"),
            ],
        ));
        let results = results(drain(&rx));
        assert!(results[0].passed);
        assert_eq!(results[1].error.as_deref(), Some(checker::INCORRECT_OUTPUT));
        assert_eq!(results[2].error.as_deref(), Some(checker::RUNTIME_ERROR));
        assert_eq!(results[3].error.as_deref(), Some(checker::UNCONSUMED_INPUT));
    }

    #[test]
    fn statement_and_file_requirements() {
        let (mut bridge, rx, _) = bridge();
        let code = "def twice(n):\n    return n * 2\nf = open('out.txt', 'w')\nf.write('saved')\nf.close()";
        let mut stmt = Requirement::new(RequirementKind::StatementContains, "^8$");
        stmt.statement = Some("print(twice(4))".into());
        let mut file = Requirement::new(RequirementKind::FileContains, "saved");
        file.filename = Some("out.txt".into());
        let case = TestCase {
            input: TestInput::Text(String::new()),
            output: ExpectedOutput::Requirements(vec![
                Requirement {
                    pattern: "^8\\n$".into(),
                    ..stmt.clone()
                },
                file,
                Requirement::new(RequirementKind::CodeContains, r"def\s+twice"),
            ]),
            reveal: true,
        };
        bridge.handle(test(code, vec![case]));
        let results = results(drain(&rx));
        assert_eq!(results[0].criteria_outcomes, Some(vec![true, true, true]));
        assert!(results[0].passed);
    }

    #[test]
    fn turtle_requirement_compares_drawings() {
        let (mut bridge, rx, _) = bridge();
        let code = "import turtle\nfor i in range(4):\n    turtle.forward(50)\n    turtle.left(90)";
        let reference = "import turtle\nturtle.forward(50)\nturtle.left(90)\nturtle.forward(50)\nturtle.left(90)\nturtle.forward(50)\nturtle.left(90)\nturtle.forward(50)";
        let case = TestCase {
            input: TestInput::Text(String::new()),
            output: ExpectedOutput::Requirements(vec![
                Requirement::new(RequirementKind::Turtle, reference),
                Requirement::new(RequirementKind::Turtle, "import turtle\nturtle.forward(10)"),
            ]),
            reveal: true,
        };
        bridge.handle(test(code, vec![case]));
        let results = results(drain(&rx));
        assert_eq!(results[0].criteria_outcomes, Some(vec![true, false]));
    }

    #[test]
    fn packages_need_installing() {
        let (mut bridge, rx, _) = bridge();
        let code = "import math\nprint(math.floor(2.5))";
        bridge.handle(test(code, vec![TestCase::text("", "2")]));
        assert_eq!(results(drain(&rx))[0].error.as_deref(), Some(checker::RUNTIME_ERROR));

        bridge.handle(WorkerCommand::InstallDeps {
            deps: vec!["math".into(), "numpy".into()],
        });
        let events = drain(&rx);
        let log = printed(&events);
        assert!(log.starts_with("Initialising package installer\n"));
        assert!(log.contains("Successfully installed package 'math'"));
        assert!(log.contains("Error installing package: numpy"));
        assert_eq!(events.last(), Some(&WorkerEvent::InstallDepsFinished));

        bridge.handle(test(code, vec![TestCase::text("", "2")]));
        assert!(results(drain(&rx))[0].passed);
    }

    #[test]
    fn updated_session_files_are_returned() {
        let (mut bridge, rx, _) = bridge();
        bridge.handle(WorkerCommand::Run {
            code: "f = open('session/log.txt', 'a')\nf.write('more')\nf.close()".into(),
            init_code: None,
            session_files: vec![
                SessionFile::new("log.txt", "start "),
                SessionFile::new("keep.csv", "a,b"),
            ],
            is_session_files_allowed: true,
        });
        match drain(&rx).pop() {
            Some(WorkerEvent::DebugFinished {
                updated_session_files,
                ..
            }) => {
                assert_eq!(updated_session_files, vec![SessionFile::new("log.txt", "start more")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn example_drawing_uses_inputs() {
        let (mut bridge, rx, _) = bridge();
        bridge.handle(WorkerCommand::DrawTurtleExample {
            code: "import turtle\nturtle.forward(int(input()))".into(),
            inputs: vec!["30".into()],
            book_node: BookNode::new("n2", "Lines"),
        });
        match drain(&rx).pop() {
            Some(WorkerEvent::DrawTurtleExampleFinished { book_node, drawing }) => {
                assert_eq!(book_node.id, "n2");
                assert_eq!(drawing.segments.len(), 1);
                assert_eq!(drawing.segments[0].to, (30.0, 0.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
