#![forbid(unsafe_code)]

//! Property-based invariant tests for the runner.
//!
//! 1. Every proxy request resolves exactly once; only the last of N
//!    overlapping requests on a route sees the real reply.
//! 2. A proxy reset leaves nothing parked.
//! 3. The coordinator only ever moves along lifecycle edges, whatever the
//!    mix of user operations and worker events.
//! 4. Rejected operations send nothing to the worker.
//! 5. The replay queue hands out items in push order, each at most once,
//!    and never hands out items pushed before a reset after it.

use proptest::prelude::*;
use sponge_runner::{
    Coordinator, CoordinatorEvent, DebugOptions, ExecutionState, Reply, ReplayQueue, Route,
    RunnerConfig, RunnerError, SyncProxy, WorkerEndpoint, WorkerEvent, WorkerSpawner,
};

// ── Strategies ────────────────────────────────────────────────────────────

fn route_strategy() -> impl Strategy<Value = Route> {
    prop::sample::select(Route::ALL.to_vec())
}

#[derive(Debug, Clone)]
enum Op {
    Debug,
    Run,
    Test,
    Input,
    Continue,
    Step,
    Kill,
    Restart(bool),
    ToggleBreakpoint(u32),
    WorkerLoaded,
    WorkerInitDone,
    WorkerInput,
    WorkerBreak(u32),
    WorkerPrint,
    WorkerFinished,
    WorkerTestFinished,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Debug),
        Just(Op::Run),
        Just(Op::Test),
        Just(Op::Input),
        Just(Op::Continue),
        Just(Op::Step),
        Just(Op::Kill),
        any::<bool>().prop_map(Op::Restart),
        (1u32..10).prop_map(Op::ToggleBreakpoint),
        Just(Op::WorkerLoaded),
        Just(Op::WorkerInitDone),
        Just(Op::WorkerInput),
        (1u32..10).prop_map(Op::WorkerBreak),
        Just(Op::WorkerPrint),
        Just(Op::WorkerFinished),
        Just(Op::WorkerTestFinished),
    ]
}

#[derive(Debug, Clone)]
enum QueueOp {
    Push,
    Complete,
    CompleteStale,
    Reset,
}

fn queue_op_strategy() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        4 => Just(QueueOp::Push),
        4 => Just(QueueOp::Complete),
        1 => Just(QueueOp::CompleteStale),
        1 => Just(QueueOp::Reset),
    ]
}

/// Keeps endpoints; the test plays the worker.
#[derive(Default)]
struct Scripted(Vec<WorkerEndpoint>);

impl WorkerSpawner for Scripted {
    fn spawn(&mut self, endpoint: WorkerEndpoint, _config: &RunnerConfig) -> Result<(), RunnerError> {
        self.0.push(endpoint);
        Ok(())
    }
}

fn worker_event(op: &Op) -> Option<WorkerEvent> {
    Some(match op {
        Op::WorkerLoaded => WorkerEvent::Loaded,
        Op::WorkerInitDone => WorkerEvent::InitDone,
        Op::WorkerInput => WorkerEvent::Input,
        Op::WorkerBreak(line) => WorkerEvent::Breakpt {
            lineno: *line,
            env: Default::default(),
            watches: Vec::new(),
        },
        Op::WorkerPrint => WorkerEvent::Print { msg: "x".into() },
        Op::WorkerFinished => WorkerEvent::DebugFinished {
            reason: sponge_runner::FinishReason::Ok,
            updated_session_files: Vec::new(),
        },
        Op::WorkerTestFinished => WorkerEvent::TestFinished {
            results: Vec::new(),
            code: "print(1)".into(),
            book_node: Default::default(),
        },
        _ => return None,
    })
}

fn apply(c: &mut Coordinator<Scripted>, op: &Op) {
    if let Some(event) = worker_event(op) {
        if let Some(endpoint) = c.spawner().0.last() {
            endpoint.emit(event);
        }
        c.pump();
        return;
    }
    match op {
        Op::Debug => drop(c.debug("print(1)", DebugOptions::default())),
        Op::Run => drop(c.run("print(1)", DebugOptions::default())),
        Op::Test => drop(c.test("print(1)", Vec::new(), &[], Default::default())),
        Op::Input => drop(c.input("1")),
        Op::Continue => drop(c.resume()),
        Op::Step => drop(c.step()),
        Op::Kill => drop(c.kill()),
        Op::Restart(force) => drop(c.restart_worker(*force, "")),
        Op::ToggleBreakpoint(line) => drop(c.toggle_breakpoint(*line)),
        _ => {}
    }
}

fn queued_commands(c: &Coordinator<Scripted>) -> usize {
    c.spawner()
        .0
        .last()
        .map_or(0, |endpoint| endpoint.commands.try_iter().count())
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Proxy resolves exactly once
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn overlapping_requests_resolve_exactly_once(route in route_strategy(), n in 1usize..8) {
        let proxy = SyncProxy::new();
        let pending: Vec<_> = (0..n).map(|_| proxy.request(route)).collect();
        prop_assert!(proxy.respond(route, Reply::Turtle(Some("done".into()))));
        prop_assert!(!proxy.respond(route, Reply::Neutral));

        let replies: Vec<Reply> = pending.into_iter().map(|p| p.wait()).collect();
        let (last, earlier) = replies.split_last().unwrap();
        prop_assert_eq!(last, &Reply::Turtle(Some("done".into())));
        let superseded = if route == Route::Sleep { Reply::NotModified } else { Reply::Neutral };
        prop_assert!(earlier.iter().all(|r| *r == superseded));

        let stats = proxy.stats();
        prop_assert_eq!(stats.parked, n as u64);
        prop_assert_eq!(stats.superseded + stats.responded, n as u64);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Reset leaves nothing parked
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn reset_clears_every_route(routes in prop::collection::vec(route_strategy(), 0..12)) {
        let proxy = SyncProxy::new();
        let pending: Vec<_> = routes.iter().map(|r| proxy.request(*r)).collect();
        proxy.reset();
        for route in Route::ALL {
            prop_assert!(!proxy.is_parked(route));
        }
        for p in pending {
            prop_assert_eq!(p.wait(), Reply::Neutral);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. State machine closure
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn coordinator_stays_on_lifecycle_edges(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut c = Coordinator::with_spawner(RunnerConfig::default(), Scripted::default()).unwrap();
        let mut state = c.state();
        prop_assert_eq!(state, ExecutionState::Loading);
        c.drain_events();

        for op in &ops {
            apply(&mut c, op);
            for event in c.drain_events() {
                if let CoordinatorEvent::StateChanged(next) = event {
                    prop_assert!(
                        state.can_transition(next),
                        "{:?} -> {:?} after {:?}", state, next, op
                    );
                    state = next;
                }
            }
            prop_assert_eq!(state, c.state());
            if c.debug_context().is_some() {
                prop_assert_eq!(c.state(), ExecutionState::OnBreakpoint);
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Rejected operations send nothing
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn rejected_operations_send_nothing(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut c = Coordinator::with_spawner(RunnerConfig::default(), Scripted::default()).unwrap();
        queued_commands(&c);
        for op in &ops {
            let before = c.state();
            let session = c.session_id();
            let is_user_op = worker_event(op).is_none();
            apply(&mut c, op);
            let sent = queued_commands(&c);
            if is_user_op && before == c.state() && session == c.session_id() {
                let starts_program = matches!(op, Op::Debug | Op::Run | Op::Test);
                if starts_program {
                    prop_assert_eq!(sent, 0, "{:?} sent while {:?}", op, before);
                }
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Replay order
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn replay_preserves_order(ops in prop::collection::vec(queue_op_strategy(), 1..80)) {
        let mut queue = ReplayQueue::new();
        let mut next_item = 0u32;
        let mut reset_floor = 0u32;
        let mut started: Vec<u32> = Vec::new();
        let mut in_flight = None;
        let mut stale = Vec::new();

        for op in &ops {
            match op {
                QueueOp::Push => {
                    if let Some(start) = queue.push(next_item) {
                        prop_assert!(in_flight.is_none());
                        in_flight = Some(start.0);
                        started.push(start.1);
                    }
                    next_item += 1;
                }
                QueueOp::Complete => {
                    if let Some(ticket) = in_flight.take() {
                        if let Some((ticket, item)) = queue.complete(ticket) {
                            in_flight = Some(ticket);
                            started.push(item);
                        }
                    }
                }
                QueueOp::CompleteStale => {
                    if let Some(ticket) = stale.last().copied() {
                        prop_assert!(queue.complete(ticket).is_none());
                    }
                }
                QueueOp::Reset => {
                    if let Some(ticket) = in_flight.take() {
                        stale.push(ticket);
                    }
                    queue.reset();
                    reset_floor = next_item;
                }
            }
            if let Some(&last) = started.last()
                && started.len() > 1
            {
                let prev = started[started.len() - 2];
                prop_assert!(prev < last, "out of order: {} then {}", prev, last);
            }
            if let Some(ticket) = in_flight {
                prop_assert!(queue.is_in_flight(ticket));
                prop_assert!(*started.last().unwrap() >= reset_floor);
            }
        }
    }
}
