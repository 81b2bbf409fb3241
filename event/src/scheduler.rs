// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Poll wrapper plus deadline-ordered timer heap.

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};
use tracing::trace;

/// Token reserved for the cross-context waker; never assign it to a source.
pub const WAKER_TOKEN: Token = Token(usize::MAX);

/// Error produced by scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("poll I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque handle identifying a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// A drained, expired timer.
#[derive(Debug)]
pub struct Expired<T> {
    pub handle: TimerHandle,
    pub payload: T,
    pub deadline: Instant,
}

struct TimerEntry<T> {
    deadline: Instant,
    /// Tie-breaker keeping same-deadline timers in insertion order.
    seq: u64,
    id: u64,
    period: Option<Duration>,
    payload: T,
}

impl<T> PartialEq for TimerEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for TimerEntry<T> {}

impl<T> PartialOrd for TimerEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for TimerEntry<T> {
    // BinaryHeap is a max-heap: invert so the earliest deadline is greatest
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Single-owner cooperative scheduler.
///
/// Owns the `mio::Poll` instance and a min-heap of timers carrying payload
/// `T`. The run loop that owns the scheduler drives [`Scheduler::turn`] and
/// services whatever it reports.
pub struct Scheduler<T> {
    poll: Poll,
    waker: std::sync::Arc<Waker>,
    timers: BinaryHeap<TimerEntry<T>>,
    cancelled: HashSet<u64>,
    next_id: u64,
}

impl<T> Scheduler<T> {
    /// Create a scheduler and its waker.
    ///
    /// # Errors
    ///
    /// Fails when the OS poll instance cannot be created.
    pub fn new() -> Result<Scheduler<T>, SchedulerError> {
        let poll = Poll::new()?;
        let waker = std::sync::Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(Scheduler {
            poll,
            waker,
            timers: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_id: 0,
        })
    }

    /// Register an I/O source for the given interests.
    ///
    /// # Errors
    ///
    /// Propagates registry failures.
    pub fn register(
        &self,
        source: &mut impl Source,
        token: Token,
        interests: Interest,
    ) -> Result<(), SchedulerError> {
        self.poll.registry().register(source, token, interests)?;
        Ok(())
    }

    /// Change the interests of a registered source.
    ///
    /// # Errors
    ///
    /// Propagates registry failures.
    pub fn reregister(
        &self,
        source: &mut impl Source,
        token: Token,
        interests: Interest,
    ) -> Result<(), SchedulerError> {
        self.poll.registry().reregister(source, token, interests)?;
        Ok(())
    }

    /// Remove a source from the poll set.
    ///
    /// # Errors
    ///
    /// Propagates registry failures.
    pub fn deregister(&self, source: &mut impl Source) -> Result<(), SchedulerError> {
        self.poll.registry().deregister(source)?;
        Ok(())
    }

    /// A waker that interrupts [`Scheduler::turn`] from signal handlers or
    /// other threads; the interrupted poll reports [`WAKER_TOKEN`].
    #[must_use]
    pub fn waker(&self) -> std::sync::Arc<Waker> {
        self.waker.clone()
    }

    /// Arm a one-shot timer.
    pub fn after(&mut self, delay: Duration, payload: T) -> TimerHandle {
        self.arm(Instant::now() + delay, None, payload)
    }

    /// Arm a periodic timer; it re-inserts its next deadline each time it
    /// fires.
    pub fn every(&mut self, period: Duration, payload: T) -> TimerHandle
    where
        T: Clone,
    {
        self.arm(Instant::now() + period, Some(period), payload)
    }

    fn arm(&mut self, deadline: Instant, period: Option<Duration>, payload: T) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.timers.push(TimerEntry {
            deadline,
            seq: id,
            id,
            period,
            payload,
        });
        trace!(id, ?period, "armed timer");
        TimerHandle(id)
    }

    /// Cancel a timer. Cancelling one that already fired (or was already
    /// cancelled) is a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) {
        self.cancelled.insert(handle.0);
    }

    /// Number of live (non-cancelled) timers.
    #[must_use]
    pub fn live_timers(&self) -> usize {
        self.timers
            .iter()
            .filter(|entry| !self.cancelled.contains(&entry.id))
            .count()
    }

    /// One loop iteration: poll with the earliest-deadline timeout, then
    /// drain expired timers in deadline order into `expired`.
    ///
    /// With no timers armed the poll parks until I/O or the waker fires.
    ///
    /// # Errors
    ///
    /// Propagates poll failures; interrupted polls are retried by the
    /// caller's next turn.
    pub fn turn(
        &mut self,
        events: &mut Events,
        expired: &mut Vec<Expired<T>>,
    ) -> Result<(), SchedulerError>
    where
        T: Clone,
    {
        let timeout = self.next_deadline().map(|deadline| {
            deadline.saturating_duration_since(Instant::now())
        });
        match self.poll.poll(events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(SchedulerError::Io(err)),
        }
        self.drain_expired(expired);
        Ok(())
    }

    /// Earliest non-cancelled deadline, dropping cancelled heap heads as a
    /// side effect.
    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(head) = self.timers.peek() {
            if self.cancelled.remove(&head.id) {
                self.timers.pop();
                continue;
            }
            return Some(head.deadline);
        }
        None
    }

    fn drain_expired(&mut self, expired: &mut Vec<Expired<T>>)
    where
        T: Clone,
    {
        let now = Instant::now();
        while let Some(head) = self.timers.peek() {
            if self.cancelled.remove(&head.id) {
                self.timers.pop();
                continue;
            }
            if head.deadline > now {
                break;
            }
            #[allow(clippy::unwrap_used)] // peek above proves non-empty
            let entry = self.timers.pop().unwrap();
            if let Some(period) = entry.period {
                self.timers.push(TimerEntry {
                    deadline: entry.deadline + period,
                    seq: entry.seq,
                    id: entry.id,
                    period: entry.period,
                    payload: entry.payload.clone(),
                });
            }
            expired.push(Expired {
                handle: TimerHandle(entry.id),
                payload: entry.payload,
                deadline: entry.deadline,
            });
        }
    }
}
