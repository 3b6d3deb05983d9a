#![forbid(unsafe_code)]

//! Synchronous I/O proxy.
//!
//! The worker thread blocks on a [`PendingRequest`] while the coordinator
//! thread, driven by the user, eventually calls [`SyncProxy::respond`].
//! Every route parks at most one request. A new request on a route
//! resolves the previous one before parking: a sleep with
//! [`Reply::NotModified`], anything else with [`Reply::Neutral`].
//! [`SyncProxy::reset`] resolves everything that is parked with `Neutral`. No request is
//! ever left unresolved: dropping the proxy disconnects the channel, which
//! [`PendingRequest::wait`] also reports as `Neutral`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, mpsc};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Route {
    Input,
    DebugBreak,
    Sleep,
    Turtle,
}

impl Route {
    pub const ALL: [Route; 4] = [Route::Input, Route::DebugBreak, Route::Sleep, Route::Turtle];

    /// Reply for a request replaced by a newer one on the same route.
    fn superseded(self) -> Reply {
        match self {
            Route::Sleep => Reply::NotModified,
            Route::Input | Route::DebugBreak | Route::Turtle => Reply::Neutral,
        }
    }

    fn slot(self) -> usize {
        match self {
            Route::Input => 0,
            Route::DebugBreak => 1,
            Route::Sleep => 2,
            Route::Turtle => 3,
        }
    }
}

/// What a parked request resolves with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Console input, plus the breakpoint set if it changed.
    Input {
        data: String,
        breakpoints: Option<Vec<u32>>,
    },
    /// Resume from a breakpoint.
    Continue {
        step: bool,
        breakpoints: Option<Vec<u32>>,
    },
    /// A replayed graphics command finished.
    Turtle(Option<String>),
    /// The sleep timer ran out.
    Elapsed,
    /// A newer sleep took over; the program carries on.
    NotModified,
    /// Superseded, reset or abandoned.
    Neutral,
}

#[derive(Debug)]
struct Parked {
    ticket: u64,
    tx: mpsc::Sender<Reply>,
}

/// Counters for each way a request can be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    pub parked: u64,
    pub responded: u64,
    pub superseded: u64,
    pub reset: u64,
    pub elapsed: u64,
}

#[derive(Debug, Default)]
struct Slots {
    parked: [Option<Parked>; 4],
    stats: ProxyStats,
}

#[derive(Debug, Default)]
pub struct SyncProxy {
    slots: Mutex<Slots>,
    next_ticket: AtomicU64,
}

/// A request parked on the proxy. The worker blocks on it.
#[derive(Debug)]
pub struct PendingRequest {
    route: Route,
    ticket: u64,
    rx: mpsc::Receiver<Reply>,
}

impl PendingRequest {
    #[must_use]
    pub fn route(&self) -> Route {
        self.route
    }

    /// Block until resolved.
    pub fn wait(self) -> Reply {
        self.rx.recv().unwrap_or(Reply::Neutral)
    }

    /// Block until resolved or `timeout` passes.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Reply> {
        match self.rx.recv_timeout(timeout) {
            Ok(reply) => Some(reply),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Reply::Neutral),
        }
    }
}

impl SyncProxy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Park a new request on `route`, first resolving any request already
    /// parked there with its superseded reply.
    pub fn request(&self, route: Route) -> PendingRequest {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        let mut slots = self.lock();
        if let Some(stale) = slots.parked[route.slot()].take() {
            let _ = stale.tx.send(route.superseded());
            slots.stats.superseded += 1;
            tracing::trace!(target: "sponge.proxy", ?route, ticket = stale.ticket, "superseded parked request");
        }
        slots.parked[route.slot()] = Some(Parked { ticket, tx });
        slots.stats.parked += 1;
        PendingRequest { route, ticket, rx }
    }

    /// Resolve the request parked on `route`. Returns `false` when nothing
    /// was parked; the reply is then discarded.
    pub fn respond(&self, route: Route, reply: Reply) -> bool {
        let mut slots = self.lock();
        let Some(parked) = slots.parked[route.slot()].take() else {
            tracing::trace!(target: "sponge.proxy", ?route, "response with nothing parked");
            return false;
        };
        let _ = parked.tx.send(reply);
        slots.stats.responded += 1;
        true
    }

    /// Resolve every parked request with [`Reply::Neutral`]. Returns how
    /// many were parked.
    pub fn reset(&self) -> usize {
        let mut slots = self.lock();
        let mut count = 0;
        for slot in &mut slots.parked {
            if let Some(parked) = slot.take() {
                let _ = parked.tx.send(Reply::Neutral);
                count += 1;
            }
        }
        slots.stats.reset += count as u64;
        if count > 0 {
            tracing::debug!(target: "sponge.proxy", count, "reset parked requests");
        }
        count
    }

    /// Sleep for `duration` unless superseded by another sleep or a reset.
    pub fn sleep(&self, duration: Duration) -> Reply {
        let pending = self.request(Route::Sleep);
        if let Some(reply) = pending.wait_timeout(duration) {
            return reply;
        }
        let mut slots = self.lock();
        let slot = &mut slots.parked[Route::Sleep.slot()];
        if slot.as_ref().is_some_and(|p| p.ticket == pending.ticket) {
            *slot = None;
            slots.stats.elapsed += 1;
            return Reply::Elapsed;
        }
        drop(slots);
        // Resolved between the timeout and the lock.
        pending.wait()
    }

    #[must_use]
    pub fn is_parked(&self, route: Route) -> bool {
        self.lock().parked[route.slot()].is_some()
    }

    #[must_use]
    pub fn stats(&self) -> ProxyStats {
        self.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn response_reaches_parked_request() {
        let proxy = SyncProxy::new();
        let pending = proxy.request(Route::Input);
        assert!(proxy.is_parked(Route::Input));
        assert!(proxy.respond(
            Route::Input,
            Reply::Input {
                data: "5".into(),
                breakpoints: None
            }
        ));
        assert_eq!(
            pending.wait(),
            Reply::Input {
                data: "5".into(),
                breakpoints: None
            }
        );
        assert!(!proxy.is_parked(Route::Input));
    }

    #[test]
    fn response_without_request_is_noop() {
        let proxy = SyncProxy::new();
        assert!(!proxy.respond(Route::DebugBreak, Reply::Neutral));
        assert_eq!(proxy.stats().responded, 0);
    }

    #[test]
    fn second_request_supersedes_first() {
        let proxy = SyncProxy::new();
        let first = proxy.request(Route::DebugBreak);
        let second = proxy.request(Route::DebugBreak);
        assert_eq!(first.wait(), Reply::Neutral);
        proxy.respond(
            Route::DebugBreak,
            Reply::Continue {
                step: true,
                breakpoints: None,
            },
        );
        assert_eq!(
            second.wait(),
            Reply::Continue {
                step: true,
                breakpoints: None
            }
        );
        assert_eq!(proxy.stats().superseded, 1);
    }

    #[test]
    fn reset_resolves_every_route() {
        let proxy = SyncProxy::new();
        let input = proxy.request(Route::Input);
        let brk = proxy.request(Route::DebugBreak);
        assert_eq!(proxy.reset(), 2);
        assert_eq!(input.wait(), Reply::Neutral);
        assert_eq!(brk.wait(), Reply::Neutral);
        assert_eq!(proxy.reset(), 0);
    }

    #[test]
    fn sleep_elapses_without_interference() {
        let proxy = SyncProxy::new();
        assert_eq!(proxy.sleep(Duration::from_millis(5)), Reply::Elapsed);
        assert!(!proxy.is_parked(Route::Sleep));
    }

    #[test]
    fn reset_cuts_a_long_sleep_short() {
        let proxy = Arc::new(SyncProxy::new());
        let sleeper = {
            let proxy = Arc::clone(&proxy);
            thread::spawn(move || proxy.sleep(Duration::from_secs(30)))
        };
        while !proxy.is_parked(Route::Sleep) {
            thread::yield_now();
        }
        proxy.reset();
        assert_eq!(sleeper.join().unwrap(), Reply::Neutral);
    }

    #[test]
    fn newer_sleep_lets_the_older_one_return() {
        let proxy = Arc::new(SyncProxy::new());
        let sleeper = {
            let proxy = Arc::clone(&proxy);
            thread::spawn(move || proxy.sleep(Duration::from_secs(30)))
        };
        while !proxy.is_parked(Route::Sleep) {
            thread::yield_now();
        }
        assert_eq!(proxy.sleep(Duration::from_millis(5)), Reply::Elapsed);
        assert_eq!(sleeper.join().unwrap(), Reply::NotModified);
        assert_eq!(proxy.stats().superseded, 1);
    }

    #[test]
    fn dropped_proxy_never_strands_a_waiter() {
        let proxy = SyncProxy::new();
        let pending = proxy.request(Route::Turtle);
        drop(proxy);
        assert_eq!(pending.wait(), Reply::Neutral);
    }
}
