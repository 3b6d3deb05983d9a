#![forbid(unsafe_code)]

//! In-order replay queue for graphics commands.
//!
//! Commands arrive from the runtime faster than a front end can animate
//! them. The queue hands out one item at a time; the front end reports
//! completion with the [`Ticket`] it was given, and only then receives the
//! next item. [`ReplayQueue::reset`] bumps the generation so completions
//! for work started before the reset are recognised and dropped.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    generation: u64,
    seq: u64,
}

impl Ticket {
    #[must_use]
    pub fn generation(self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
pub struct ReplayQueue<T> {
    pending: VecDeque<T>,
    in_flight: Option<Ticket>,
    generation: u64,
    next_seq: u64,
    dropped: u64,
}

impl<T> Default for ReplayQueue<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: None,
            generation: 0,
            next_seq: 0,
            dropped: 0,
        }
    }
}

impl<T> ReplayQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&mut self) -> Ticket {
        let ticket = Ticket {
            generation: self.generation,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.in_flight = Some(ticket);
        ticket
    }

    /// Enqueue `item`. Returns it with a ticket when nothing is in flight
    /// and the caller should start it now.
    pub fn push(&mut self, item: T) -> Option<(Ticket, T)> {
        if self.in_flight.is_none() && self.pending.is_empty() {
            return Some((self.issue(), item));
        }
        self.pending.push_back(item);
        None
    }

    /// Mark `ticket` done and return the next item to start. Stale or
    /// unknown tickets return `None` and change nothing.
    pub fn complete(&mut self, ticket: Ticket) -> Option<(Ticket, T)> {
        if self.in_flight != Some(ticket) {
            self.dropped += 1;
            tracing::trace!(
                target: "sponge.coordinator",
                generation = ticket.generation,
                current = self.generation,
                "dropping stale replay completion"
            );
            return None;
        }
        self.in_flight = None;
        let item = self.pending.pop_front()?;
        Some((self.issue(), item))
    }

    /// Drop everything queued and invalidate the in-flight ticket.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.in_flight = None;
        self.generation += 1;
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `ticket` is the one currently being replayed.
    #[must_use]
    pub fn is_in_flight(&self, ticket: Ticket) -> bool {
        self.in_flight == Some(ticket)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Completions ignored because their ticket was stale.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
