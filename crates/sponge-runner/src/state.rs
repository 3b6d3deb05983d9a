#![forbid(unsafe_code)]

//! Coordinator lifecycle states and the transitions between them.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionState {
    Loading,
    Initialising,
    RestartingWorker,
    Ready,
    AwaitingInput,
    OnBreakpoint,
    Running,
}

impl ExecutionState {
    pub const ALL: [ExecutionState; 7] = [
        ExecutionState::Loading,
        ExecutionState::Initialising,
        ExecutionState::RestartingWorker,
        ExecutionState::Ready,
        ExecutionState::AwaitingInput,
        ExecutionState::OnBreakpoint,
        ExecutionState::Running,
    ];

    /// Whether `self -> to` is an edge of the lifecycle graph.
    ///
    /// ```text
    /// Loading          -> Initialising      worker loaded
    /// Initialising     -> Ready             runtime init done
    /// Ready            -> Running           debug / run / test issued
    /// Running          -> AwaitingInput     runtime requests input
    /// Running          -> OnBreakpoint      runtime hits a breakpoint
    /// Running          -> Ready             finished
    /// AwaitingInput    -> Running           input supplied
    /// OnBreakpoint     -> Running           continue / step
    /// *                -> RestartingWorker  forced restart, kill fallback
    /// RestartingWorker -> Initialising      new worker loaded
    /// ```
    ///
    /// `Ready -> RestartingWorker` is only taken on a forced restart.
    #[must_use]
    pub fn can_transition(self, to: ExecutionState) -> bool {
        use ExecutionState::*;
        match (self, to) {
            (RestartingWorker, RestartingWorker) => false,
            (_, RestartingWorker) => true,
            (Loading | RestartingWorker, Initialising) => true,
            (Initialising, Ready) => true,
            (Ready, Running) => true,
            (Running, AwaitingInput | OnBreakpoint | Ready) => true,
            (AwaitingInput | OnBreakpoint, Running) => true,
            _ => false,
        }
    }

    /// A program (or test batch) is executing on the worker.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            ExecutionState::Running | ExecutionState::AwaitingInput | ExecutionState::OnBreakpoint
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Loading => "loading",
            ExecutionState::Initialising => "initialising",
            ExecutionState::RestartingWorker => "restarting-worker",
            ExecutionState::Ready => "ready",
            ExecutionState::AwaitingInput => "awaiting-input",
            ExecutionState::OnBreakpoint => "on-breakpoint",
            ExecutionState::Running => "running",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionState::*;
    use super::*;

    #[test]
    fn happy_path_edges_exist() {
        let path = [Loading, Initialising, Ready, Running, AwaitingInput, Running, OnBreakpoint, Running, Ready];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn ready_cannot_skip_to_pause_states() {
        assert!(!Ready.can_transition(AwaitingInput));
        assert!(!Ready.can_transition(OnBreakpoint));
        assert!(!Initialising.can_transition(Running));
        assert!(!AwaitingInput.can_transition(Ready));
    }

    #[test]
    fn every_state_can_restart_except_restarting() {
        for state in ExecutionState::ALL {
            assert_eq!(state.can_transition(RestartingWorker), state != RestartingWorker);
        }
        assert!(RestartingWorker.can_transition(Initialising));
    }

    #[test]
    fn serde_names_are_kebab_case() {
        let json = serde_json::to_string(&OnBreakpoint).unwrap();
        assert_eq!(json, "\"on-breakpoint\"");
        assert_eq!(OnBreakpoint.to_string(), "on-breakpoint");
    }
}
