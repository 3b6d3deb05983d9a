#![forbid(unsafe_code)]

//! Presentation projection of the coordinator's state.
//!
//! Not authoritative: it mirrors [`ExecutionState`], the breakpoint set and
//! the paused context into button affordances and gutter decorations.

use std::collections::BTreeMap;

use crate::model::{BreakpointSet, DebugContext};
use crate::state::ExecutionState;

/// Which actions the front end should enable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Affordances {
    pub run: bool,
    pub debug: bool,
    pub test: bool,
    pub stop: bool,
    pub continue_: bool,
    pub step: bool,
    pub input: bool,
    pub restart: bool,
}

impl Affordances {
    #[must_use]
    pub fn for_state(state: ExecutionState) -> Self {
        let ready = state == ExecutionState::Ready;
        let paused = state == ExecutionState::OnBreakpoint;
        Self {
            run: ready,
            debug: ready,
            test: ready,
            stop: state.is_busy(),
            continue_: paused,
            step: paused,
            input: state == ExecutionState::AwaitingInput,
            restart: state != ExecutionState::RestartingWorker,
        }
    }
}

/// How a gutter line is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decoration {
    /// Breakpoint set, not hit.
    Armed,
    /// Execution is paused here without a breakpoint (a step).
    Active,
    /// Paused on an armed breakpoint.
    ActiveArmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugView {
    pub affordances: Affordances,
    pub decorations: BTreeMap<u32, Decoration>,
    /// Variables of the paused frame, in name order.
    pub variables: Vec<(String, String)>,
    pub watches: Vec<(String, String)>,
}

impl DebugView {
    #[must_use]
    pub fn project(
        state: ExecutionState,
        breakpoints: &BreakpointSet,
        context: Option<&DebugContext>,
    ) -> Self {
        let active = active_line(state, context);
        Self {
            affordances: Affordances::for_state(state),
            decorations: decorations(breakpoints, active),
            variables: context.map(|c| c.variables.clone()).unwrap_or_default(),
            watches: context.map(|c| c.watches.clone()).unwrap_or_default(),
        }
    }
}

fn active_line(state: ExecutionState, context: Option<&DebugContext>) -> Option<u32> {
    (state == ExecutionState::OnBreakpoint)
        .then_some(context)
        .flatten()
        .map(|c| c.line)
}

fn decorations(breakpoints: &BreakpointSet, active: Option<u32>) -> BTreeMap<u32, Decoration> {
    let mut out: BTreeMap<u32, Decoration> = breakpoints
        .lines()
        .iter()
        .map(|&line| (line, Decoration::Armed))
        .collect();
    if let Some(line) = active {
        let decoration = if breakpoints.contains(line) {
            Decoration::ActiveArmed
        } else {
            Decoration::Active
        };
        out.insert(line, decoration);
    }
    out
}

/// Gutter decorations, recomputed only when the breakpoint revision or
/// the active line moves.
#[derive(Debug, Default)]
pub struct DebugViewCache {
    key: Option<(u64, Option<u32>)>,
    decorations: BTreeMap<u32, Decoration>,
    recomputes: u64,
}

impl DebugViewCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decorations(
        &mut self,
        state: ExecutionState,
        breakpoints: &BreakpointSet,
        context: Option<&DebugContext>,
    ) -> &BTreeMap<u32, Decoration> {
        let key = (breakpoints.revision(), active_line(state, context));
        if self.key != Some(key) {
            self.decorations = decorations(breakpoints, key.1);
            self.key = Some(key);
            self.recomputes += 1;
        }
        &self.decorations
    }

    #[must_use]
    pub fn recomputes(&self) -> u64 {
        self.recomputes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paused_at(line: u32) -> DebugContext {
        DebugContext {
            line,
            variables: vec![("x".into(), "1".into())],
            watches: Vec::new(),
        }
    }

    #[test]
    fn affordances_follow_state() {
        let ready = Affordances::for_state(ExecutionState::Ready);
        assert!(ready.run && ready.debug && ready.test && !ready.stop);

        let paused = Affordances::for_state(ExecutionState::OnBreakpoint);
        assert!(paused.continue_ && paused.step && paused.stop && !paused.run);

        let waiting = Affordances::for_state(ExecutionState::AwaitingInput);
        assert!(waiting.input && !waiting.step);

        assert!(!Affordances::for_state(ExecutionState::RestartingWorker).restart);
    }

    #[test]
    fn hit_line_is_marked_distinctly() {
        let bps = BreakpointSet::from_lines([2, 5]);
        let ctx = paused_at(2);
        let view = DebugView::project(ExecutionState::OnBreakpoint, &bps, Some(&ctx));
        assert_eq!(view.decorations[&2], Decoration::ActiveArmed);
        assert_eq!(view.decorations[&5], Decoration::Armed);
        assert_eq!(view.variables, vec![("x".to_string(), "1".to_string())]);

        let stepped = DebugView::project(ExecutionState::OnBreakpoint, &bps, Some(&paused_at(3)));
        assert_eq!(stepped.decorations[&3], Decoration::Active);
    }

    #[test]
    fn context_ignored_when_not_paused() {
        let bps = BreakpointSet::from_lines([2]);
        let view = DebugView::project(ExecutionState::Running, &bps, Some(&paused_at(2)));
        assert_eq!(view.decorations[&2], Decoration::Armed);
    }

    #[test]
    fn cache_recomputes_on_change_only() {
        let mut bps = BreakpointSet::from_lines([1]);
        let mut cache = DebugViewCache::new();
        let ctx = paused_at(1);
        cache.decorations(ExecutionState::OnBreakpoint, &bps, Some(&ctx));
        cache.decorations(ExecutionState::OnBreakpoint, &bps, Some(&ctx));
        assert_eq!(cache.recomputes(), 1);

        bps.toggle(4);
        let decorations = cache.decorations(ExecutionState::OnBreakpoint, &bps, Some(&ctx));
        assert_eq!(decorations.len(), 2);
        assert_eq!(cache.recomputes(), 2);

        cache.decorations(ExecutionState::OnBreakpoint, &bps, Some(&paused_at(2)));
        assert_eq!(cache.recomputes(), 3);
    }
}
