#![forbid(unsafe_code)]

//! End-to-end coordinator scenarios against real worker threads.
//!
//! Covers:
//! 1. Console contents after an input round trip
//! 2. Breakpoint hit reports the bound environment, resume finishes ok
//! 3. Stepping arms the next line
//! 4. Restart while ready is a no-op
//! 5. Interleaved forced restarts leave exactly one session
//! 6. At most one pending test batch
//! 7. Kill acknowledged by the runtime, and kill escalation on a hung worker
//! 8. Turtle replay, package install, session files
//!
//! Run:
//!   cargo test -p sponge-runner --test e2e_coordinator

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sponge_runner::canvas::VirtualCanvas;
use sponge_runner::checker::{self, TestCase};
use sponge_runner::{
    BookNode, Coordinator, CoordinatorEvent, DebugOptions, ExecutionState, FinishReason,
    RunnerConfig, RunnerError, SessionFile, ThreadSpawner, WorkerCommand, WorkerEndpoint,
    WorkerEvent, WorkerSpawner,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;

const TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Helpers
// ============================================================================

fn pump_until<S: WorkerSpawner>(
    c: &mut Coordinator<S>,
    mut done: impl FnMut(&Coordinator<S>) -> bool,
) {
    let start = std::time::Instant::now();
    while !done(c) {
        assert!(start.elapsed() < TIMEOUT, "timed out in state {}", c.state());
        c.pump_blocking(Duration::from_millis(20));
    }
}

fn ready_with<S: WorkerSpawner>(config: RunnerConfig, spawner: S) -> Coordinator<S> {
    let mut c = Coordinator::with_spawner(config, spawner).unwrap();
    pump_until(&mut c, |c| c.state() == ExecutionState::Ready);
    c.drain_events();
    c
}

fn ready() -> Coordinator {
    ready_with(RunnerConfig::default(), ThreadSpawner)
}

/// Counts sessions started through it.
#[derive(Clone, Default)]
struct Counting {
    spawned: Arc<Mutex<Vec<u64>>>,
}

impl WorkerSpawner for Counting {
    fn spawn(&mut self, endpoint: WorkerEndpoint, config: &RunnerConfig) -> Result<(), RunnerError> {
        self.spawned.lock().unwrap().push(endpoint.id.0);
        ThreadSpawner.spawn(endpoint, config)
    }
}

/// A worker that initialises but never finishes a program and ignores the
/// interrupt flag.
#[derive(Default)]
struct Hung {
    spawned: u64,
}

impl WorkerSpawner for Hung {
    fn spawn(&mut self, endpoint: WorkerEndpoint, _config: &RunnerConfig) -> Result<(), RunnerError> {
        self.spawned += 1;
        thread::spawn(move || {
            endpoint.emit(WorkerEvent::Loaded);
            while let Ok(command) = endpoint.commands.recv() {
                match command {
                    WorkerCommand::Init { .. } => {
                        endpoint.emit(WorkerEvent::InitDone);
                    }
                    WorkerCommand::Run { .. } => {
                        while !endpoint.is_killed() {
                            thread::sleep(Duration::from_millis(5));
                        }
                        return;
                    }
                    _ => {}
                }
            }
        });
        Ok(())
    }
}

// ============================================================================
// Tracing capture
// ============================================================================

#[derive(Debug, Clone)]
#[allow(dead_code)]
struct CapturedEvent {
    level: tracing::Level,
    target: String,
    message: String,
    fields: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct CapturedSpan {
    name: String,
    fields: HashMap<String, String>,
}

struct Capture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
    spans: Arc<Mutex<Vec<CapturedSpan>>>,
}

struct FieldVisitor(Vec<(String, String)>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
}

impl<S> tracing_subscriber::Layer<S> for Capture
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        _id: &tracing::span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor(Vec::new());
        attrs.record(&mut visitor);
        self.spans.lock().unwrap().push(CapturedSpan {
            name: attrs.metadata().name().to_string(),
            fields: visitor.0.into_iter().collect(),
        });
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor(Vec::new());
        event.record(&mut visitor);
        let fields: HashMap<String, String> = visitor.0.into_iter().collect();
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: fields.get("message").cloned().unwrap_or_default(),
            fields,
        });
    }
}

fn with_captured_tracing(f: impl FnOnce()) -> (Vec<CapturedEvent>, Vec<CapturedSpan>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let spans = Arc::new(Mutex::new(Vec::new()));
    let layer = Capture {
        events: Arc::clone(&events),
        spans: Arc::clone(&spans),
    };
    tracing::subscriber::with_default(tracing_subscriber::registry().with(layer), f);
    let events = events.lock().unwrap().clone();
    let spans = spans.lock().unwrap().clone();
    (events, spans)
}

// ============================================================================
// 1. Console round trip
// ============================================================================

#[test]
fn input_round_trip_console() {
    let mut c = ready();
    let done = c.debug("print('hi')\ninput()\nprint('done')", DebugOptions::default());
    assert_eq!(c.state(), ExecutionState::Running);

    pump_until(&mut c, |c| c.state() == ExecutionState::AwaitingInput);
    assert!(c.input("5"));
    assert_eq!(c.state(), ExecutionState::Running);

    let finished = c.wait_for(&done, TIMEOUT).unwrap().unwrap();
    assert_eq!(finished.reason, FinishReason::Ok);
    assert_eq!(c.state(), ExecutionState::Ready);
    assert_eq!(
        c.console(),
        "hi\n5\ndone\n\nProgram finished ok. Press run/debug to run again...\n"
    );
}

#[test]
fn runtime_error_finishes_with_error() {
    let mut c = ready();
    let done = c.run("print(undefined_name)", DebugOptions::default());
    let finished = c.wait_for(&done, TIMEOUT).unwrap().unwrap();
    assert_eq!(finished.reason, FinishReason::Error);
    assert!(c.console().contains("NameError"));
    assert!(c.console().ends_with(&format!("\n{}\n", FinishReason::Error.message())));

    // The session stays usable.
    let again = c.run("print('ok')", DebugOptions::default());
    assert_eq!(c.wait_for(&again, TIMEOUT).unwrap().unwrap().reason, FinishReason::Ok);
}

#[test]
fn fixed_input_never_waits() {
    let mut c = ready();
    let options = DebugOptions {
        fixed_input: Some("3\n4".into()),
        ..DebugOptions::default()
    };
    let done = c.run("a = int(input())\nb = int(input())\nprint(a * b)", options);
    c.wait_for(&done, TIMEOUT).unwrap().unwrap();
    assert!(c.console().starts_with("3\n4\n12\n"));
}

// ============================================================================
// 2-3. Breakpoints
// ============================================================================

#[test]
fn breakpoint_reports_bound_environment() {
    let mut c = ready();
    c.set_breakpoints([2]);
    let done = c.debug("x=1\ny=2\nz=3", DebugOptions::default());

    pump_until(&mut c, |c| c.state() == ExecutionState::OnBreakpoint);
    let ctx = c.debug_context().unwrap();
    assert_eq!(ctx.line, 2);
    assert_eq!(ctx.variable("x"), Some("1"));
    assert_eq!(ctx.variable("y"), None);
    assert_eq!(ctx.variable("z"), None);

    assert!(c.resume());
    assert!(c.debug_context().is_none());
    let finished = c.wait_for(&done, TIMEOUT).unwrap().unwrap();
    assert_eq!(finished.reason, FinishReason::Ok);
}

#[test]
fn step_arms_the_next_line() {
    let mut c = ready();
    c.set_breakpoints([2]);
    let done = c.debug("a = 1\nb = 2\nc = 3\nd = 4", DebugOptions::default());

    pump_until(&mut c, |c| c.state() == ExecutionState::OnBreakpoint);
    assert!(c.step());
    assert!(c.breakpoints().contains(3));
    assert!(!c.breakpoints().is_dirty());

    pump_until(&mut c, |c| c.state() == ExecutionState::OnBreakpoint);
    assert_eq!(c.debug_context().unwrap().line, 3);
    assert_eq!(c.debug_context().unwrap().variable("b"), Some("2"));

    assert!(c.resume());
    assert_eq!(
        c.wait_for(&done, TIMEOUT).unwrap().unwrap().reason,
        FinishReason::Ok
    );
}

#[test]
fn breakpoint_added_while_paused_is_honoured() {
    let mut c = ready();
    c.set_breakpoints([1]);
    let done = c.debug("a = 1\nb = 2\nc = 3\nd = 4", DebugOptions::default());
    pump_until(&mut c, |c| c.state() == ExecutionState::OnBreakpoint);

    assert!(c.toggle_breakpoint(4));
    assert!(c.resume());
    pump_until(&mut c, |c| c.state() == ExecutionState::OnBreakpoint);
    assert_eq!(c.debug_context().unwrap().line, 4);

    assert!(c.resume());
    c.wait_for(&done, TIMEOUT).unwrap().unwrap();
}

#[test]
fn watches_are_reported() {
    let mut c = ready();
    c.set_breakpoints([2]);
    let options = DebugOptions {
        watches: vec!["x * 10".into()],
        ..DebugOptions::default()
    };
    let done = c.debug("x = 4\nprint(x)", options);
    pump_until(&mut c, |c| c.state() == ExecutionState::OnBreakpoint);
    assert_eq!(
        c.debug_context().unwrap().watches,
        vec![("x * 10".to_string(), "40".to_string())]
    );
    c.resume();
    c.wait_for(&done, TIMEOUT).unwrap().unwrap();
}

// ============================================================================
// 4-5. Restarts
// ============================================================================

#[test]
fn restart_when_ready_is_a_no_op() {
    let counting = Counting::default();
    let mut c = ready_with(RunnerConfig::default(), counting.clone());
    assert!(!c.restart_worker(false, "Restarting"));
    assert_eq!(c.state(), ExecutionState::Ready);
    assert!(c.drain_events().is_empty());
    assert_eq!(counting.spawned.lock().unwrap().len(), 1);
}

#[test]
fn interleaved_restarts_leave_one_session() {
    let counting = Counting::default();
    let config = RunnerConfig {
        shared_memory: false,
        ..RunnerConfig::default()
    };
    let mut c = ready_with(config, counting.clone());
    for _ in 0..4 {
        assert!(c.restart_worker(true, "Restarting"));
        c.pump();
        pump_until(&mut c, |c| c.state() == ExecutionState::Ready);
        assert!(c.restart_worker(true, ""));
        assert_eq!(c.state(), ExecutionState::RestartingWorker);
        assert!(!c.restart_worker(true, ""));
        pump_until(&mut c, |c| c.state() == ExecutionState::Ready);
    }

    let spawned = counting.spawned.lock().unwrap().clone();
    assert_eq!(spawned.len(), 9);
    assert_eq!(c.session_id().unwrap().0, *spawned.last().unwrap());

    let done = c.run("print('still here')", DebugOptions::default());
    c.wait_for(&done, TIMEOUT).unwrap().unwrap();
    assert!(c.console().starts_with("still here\n"));
}

#[test]
fn soft_restart_keeps_the_session() {
    let counting = Counting::default();
    let mut c = ready_with(RunnerConfig::default(), counting.clone());
    let done = c.debug("input()", DebugOptions::default());
    pump_until(&mut c, |c| c.state() == ExecutionState::AwaitingInput);

    assert!(c.restart_worker(true, "Interrupted"));
    let finished = c.wait_for(&done, TIMEOUT).unwrap().unwrap();
    assert_eq!(finished.reason, FinishReason::Interrupt);
    assert_eq!(counting.spawned.lock().unwrap().len(), 1);
}

// ============================================================================
// 6. Tests
// ============================================================================

#[test]
fn at_most_one_pending_test() {
    let mut c = ready();
    let node = BookNode::new("sum", "Sum");
    let first = c.test("print(1)", vec![TestCase::text("", "1")], &[], node.clone());
    let second = c.test("print(2)", vec![TestCase::text("", "2")], &[], node);

    assert!(first.try_take().unwrap().unwrap_err().is_cancelled());
    assert!(matches!(
        second.try_take(),
        Some(Err(RunnerError::NotReady {
            state: ExecutionState::Running
        }))
    ));

    pump_until(&mut c, |c| c.state() == ExecutionState::Ready);
}

#[test]
fn test_batch_results_are_ordered() {
    let mut c = ready();
    let code = "n = int(input())\nprint(n * 2)";
    let tests = vec![
        TestCase::text("2", "4"),
        TestCase::text("3", "7").hidden(),
        TestCase::text("x", "0"),
    ];
    let done = c.test(code, tests, &[], BookNode::new("dbl", "Double"));
    let finished = c.wait_for(&done, TIMEOUT).unwrap().unwrap();
    assert_eq!(finished.code, code);
    assert_eq!(finished.book_node.id, "dbl");

    let results = finished.results;
    assert!(results[0].passed);
    assert_eq!(results[1].error.as_deref(), Some(checker::INCORRECT_OUTPUT));
    assert!(results[1].expected.is_none());
    assert_eq!(results[2].error.as_deref(), Some(checker::RUNTIME_ERROR));
}

#[test]
fn additional_files_exist_before_tests() {
    let mut c = ready();
    let files = [sponge_runner::AdditionalFile::new("data.txt", "7\n")];
    let done = c.test(
        "print(open('data.txt').read().strip())",
        vec![TestCase::text("", "7")],
        &files,
        BookNode::new("files", "Files"),
    );
    let finished = c.wait_for(&done, TIMEOUT).unwrap().unwrap();
    assert!(finished.results[0].passed, "{:?}", finished.results[0]);
}

#[test]
fn packages_install_once_ready() {
    let mut c = ready();
    let installed = c.install_deps(vec!["random".into()]);
    c.wait_for(&installed, TIMEOUT).unwrap().unwrap();
    assert!(c.console().contains("Successfully installed package 'random'"));

    let done = c.test(
        "import random\nprint(random.randint(1, 1))",
        vec![TestCase::text("", "1")],
        &[],
        BookNode::new("rnd", "Random"),
    );
    assert!(c.wait_for(&done, TIMEOUT).unwrap().unwrap().results[0].passed);
}

// ============================================================================
// 7. Kill
// ============================================================================

#[test]
fn kill_interrupts_a_busy_loop() {
    let mut c = ready();
    let done = c.run("while True:\n    pass", DebugOptions::default());
    thread::sleep(Duration::from_millis(50));
    c.pump();
    assert!(c.kill());
    assert!(!c.kill(), "second kill while pending is a no-op");

    let finished = c.wait_for(&done, TIMEOUT).unwrap().unwrap();
    assert_eq!(finished.reason, FinishReason::Interrupt);
    assert!(!c.is_killing());
    assert!(c.console().ends_with("\nInterrupted...\n"));

    // Next run clears the interrupt flag.
    let again = c.run("print('fresh')", DebugOptions::default());
    assert_eq!(c.wait_for(&again, TIMEOUT).unwrap().unwrap().reason, FinishReason::Ok);
}

#[test]
fn kill_escalates_on_hung_worker() {
    let config = RunnerConfig {
        kill_timeout_ms: 100,
        ..RunnerConfig::default()
    };
    let (events, spans) = with_captured_tracing(|| {
        let mut c = ready_with(config, Hung::default());
        let done = c.run("while True:\n    pass", DebugOptions::default());
        assert!(c.kill());
        assert_eq!(c.state(), ExecutionState::Running);

        pump_until(&mut c, |c| c.spawner().spawned == 2);
        assert!(matches!(done.try_take(), Some(Err(RunnerError::Disconnected))));
        assert!(c.console().contains("Restart Python..."));

        pump_until(&mut c, |c| c.state() == ExecutionState::Ready);
        assert_eq!(c.spawner().spawned, 2);
    });

    let warn = events
        .iter()
        .find(|e| e.level == tracing::Level::WARN)
        .expect("escalation is logged at warn");
    assert_eq!(warn.target, "sponge.coordinator");
    assert!(warn.message.contains("ignored interrupt"));
    assert!(
        spans
            .iter()
            .any(|s| s.name == "coordinator.command" && s.fields.get("op").map(String::as_str) == Some("kill"))
    );
}

#[test]
fn rejected_commands_log_at_debug() {
    let (events, _) = with_captured_tracing(|| {
        let mut c = ready();
        assert!(!c.input("nobody asked"));
        assert!(!c.step());
        assert_eq!(c.state(), ExecutionState::Ready);
    });
    let rejected: Vec<_> = events
        .iter()
        .filter(|e| e.message == "command rejected")
        .collect();
    assert_eq!(rejected.len(), 2);
    assert!(rejected.iter().all(|e| e.level == tracing::Level::DEBUG));
}

// ============================================================================
// 8. Graphics and session files
// ============================================================================

#[test]
fn turtle_commands_replay_in_order() {
    let mut c = ready();
    let done = c.run(
        "import turtle\nturtle.forward(10)\nturtle.left(90)\nturtle.forward(20)",
        DebugOptions::default(),
    );
    let mut canvas = VirtualCanvas::new();
    let start = std::time::Instant::now();
    while done_pending(&mut c, &done) {
        assert!(start.elapsed() < TIMEOUT);
        c.pump_blocking(Duration::from_millis(20));
        for event in c.drain_events() {
            if let CoordinatorEvent::Turtle { ticket, id, command } = event {
                canvas.apply(id, &command);
                assert!(c.turtle_cmd_complete(ticket, None));
            }
        }
    }
    let drawing = canvas.into_drawing();
    assert_eq!(drawing.segments.len(), 2);
    let end = drawing.segments[1].to;
    assert!((end.0 - 10.0).abs() < 1e-9 && (end.1 - 20.0).abs() < 1e-9, "{end:?}");
}

fn done_pending<S: WorkerSpawner, T>(
    c: &mut Coordinator<S>,
    done: &sponge_runner::Completion<T>,
) -> bool {
    c.state() != ExecutionState::Ready || done.try_take().is_none()
}

#[test]
fn session_files_come_back_updated() {
    let mut c = ready();
    let options = DebugOptions {
        session_files: vec![SessionFile::new("score.txt", "1")],
        ..DebugOptions::default()
    };
    let done = c.run(
        "with open('session/score.txt', 'w') as f:\n    f.write('2')",
        options,
    );
    let finished = c.wait_for(&done, TIMEOUT).unwrap().unwrap();
    assert_eq!(
        finished.updated_session_files,
        vec![SessionFile::new("score.txt", "2")]
    );
}

#[test]
fn example_drawing_is_returned() {
    let mut c = ready();
    let done = c.draw_turtle_example(
        "import turtle\nturtle.forward(5)",
        Vec::new(),
        BookNode::new("ex", "Example"),
    );
    let drawn = c.wait_for(&done, TIMEOUT).unwrap().unwrap();
    assert_eq!(drawn.book_node.id, "ex");
    assert_eq!(drawn.drawing.segments.len(), 1);
    assert_eq!(c.state(), ExecutionState::Ready);
}
