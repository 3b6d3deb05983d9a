#![forbid(unsafe_code)]

//! Sponge Runner
//!
//! Coordinates execution of learner programs on a background worker and
//! makes the worker's blocking calls (console input, breakpoint pauses,
//! sleeps, turtle animation) look synchronous from inside the runtime.
//!
//! # Key Components
//!
//! - [`Coordinator`] - Owns the active session and the lifecycle state machine
//! - [`Bridge`] - Worker loop executing commands on the embedded runtime
//! - [`SyncProxy`] - Per-route parked requests resolved by the coordinator
//! - [`SharedBuffers`] - Interrupt flag and key-down table shared with the worker
//! - [`ReplayQueue`] - In-order graphics replay with generation invalidation
//! - [`DebugView`] - Button affordances and gutter decorations
//!
//! # How it fits together
//! A UI action calls the coordinator, which validates the current
//! [`ExecutionState`] and sends a [`WorkerCommand`]. The bridge runs the
//! program and reports back with [`WorkerEvent`]s. When the program asks
//! for input, the bridge parks a request on the proxy and blocks until the
//! coordinator answers it.

pub mod bridge;
pub mod canvas;
pub mod checker;
pub mod config;
pub mod coordinator;
pub mod debug_view;
pub mod error;
pub mod model;
pub mod protocol;
pub mod proxy;
pub mod replay;
pub mod session;
pub mod signal;
pub mod state;

pub use bridge::Bridge;
pub use canvas::{Drawing, VirtualCanvas};
pub use checker::{TestCase, TestResult};
pub use config::{ConfigError, RunnerConfig};
pub use coordinator::{
    Completion, Coordinator, CoordinatorEvent, DebugFinished, DebugOptions, ExampleDrawn,
    TestFinished,
};
pub use debug_view::{Affordances, Decoration, DebugView, DebugViewCache};
pub use error::{Result, RunnerError};
pub use model::{AdditionalFile, BreakpointSet, DebugContext};
pub use protocol::{BookNode, FinishReason, SessionFile, WorkerCommand, WorkerEvent};
pub use proxy::{Reply, Route, SyncProxy};
pub use replay::{ReplayQueue, Ticket};
pub use session::{Session, SessionId, ThreadSpawner, WorkerEndpoint, WorkerSpawner};
pub use signal::SharedBuffers;
pub use state::ExecutionState;
