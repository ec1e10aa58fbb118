//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Cooperative discrete-event scheduler for set-point changes."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use chrono::NaiveDateTime;
use r_ems_common::time::{delta_seconds, seconds_to_delta};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

pub type Result<T> = std::result::Result<T, SchedulingError>;

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("event queue is empty")]
    EmptyQueue,
    #[error("event due at {due}s is before the current scheduler time {now}s")]
    InThePast { due: f64, now: f64 },
    #[error("relative offset must not be negative, got {0}s")]
    NegativeOffset(f64),
    #[error("relative offset {0}s does not land on a representable time")]
    OffsetOutOfRange(f64),
    #[error("event execution failed: {0:#}")]
    Execution(#[source] anyhow::Error),
}

/// Tie-break applied to events due at the same instant. Lower runs first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Critical = 0,
    Urgent = 1,
    #[default]
    Normal = 2,
    Low = 3,
    Minimum = 4,
}

/// Unit of work executed by an [`EventScheduler`] against a context `C`.
pub trait Event<C>: Send {
    fn priority(&self) -> EventPriority {
        EventPriority::Normal
    }

    /// Short label used in logs.
    fn label(&self) -> String {
        "event".to_owned()
    }

    /// Run the event. `at` is the simulated instant it was due.
    fn execute(self: Box<Self>, at: NaiveDateTime, ctx: &mut C) -> anyhow::Result<()>;
}

/// Adapter turning a closure into an [`Event`].
pub struct FnEvent<F> {
    label: String,
    priority: EventPriority,
    run: F,
}

impl<F> FnEvent<F> {
    pub fn new(label: impl Into<String>, priority: EventPriority, run: F) -> Self {
        Self {
            label: label.into(),
            priority,
            run,
        }
    }
}

impl<C, F> Event<C> for FnEvent<F>
where
    F: FnOnce(NaiveDateTime, &mut C) -> anyhow::Result<()> + Send,
{
    fn priority(&self) -> EventPriority {
        self.priority
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn execute(self: Box<Self>, at: NaiveDateTime, ctx: &mut C) -> anyhow::Result<()> {
        (self.run)(at, ctx)
    }
}

struct Entry<C> {
    due: f64,
    priority: EventPriority,
    seq: u64,
    event: Box<dyn Event<C>>,
}

impl<C> Entry<C> {
    fn key_cmp(&self, other: &Self) -> Ordering {
        self.due
            .total_cmp(&other.due)
            .then(self.priority.cmp(&other.priority))
            .then(self.seq.cmp(&other.seq))
    }
}

impl<C> PartialEq for Entry<C> {
    fn eq(&self, other: &Self) -> bool {
        self.key_cmp(other) == Ordering::Equal
    }
}

impl<C> Eq for Entry<C> {}

impl<C> PartialOrd for Entry<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for Entry<C> {
    // BinaryHeap is a max-heap; invert so the earliest key sits on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key_cmp(self)
    }
}

/// Min-priority queue of events keyed by `(due, priority, insertion order)`.
///
/// Times are float seconds measured from the scheduler's epoch. The
/// scheduler is single-threaded: events run to completion on the caller's
/// thread inside [`pop_and_execute`](Self::pop_and_execute) and the notion
/// of "now" only moves when an event is popped.
pub struct EventScheduler<C> {
    epoch: NaiveDateTime,
    now: f64,
    next_seq: u64,
    queue: BinaryHeap<Entry<C>>,
}

impl<C> EventScheduler<C> {
    pub fn new(epoch: NaiveDateTime) -> Self {
        Self {
            epoch,
            now: 0.0,
            next_seq: 0,
            queue: BinaryHeap::new(),
        }
    }

    pub fn epoch(&self) -> NaiveDateTime {
        self.epoch
    }

    /// Seconds since the epoch of the most recently popped event.
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn current_time(&self) -> NaiveDateTime {
        self.timestamp_at(self.now)
    }

    /// Convert scheduler seconds to a timestamp.
    pub fn timestamp_at(&self, seconds: f64) -> NaiveDateTime {
        self.epoch
            .checked_add_signed(seconds_to_delta(seconds))
            .unwrap_or(NaiveDateTime::MAX)
    }

    /// Convert a timestamp to seconds since the epoch.
    pub fn seconds_from_epoch(&self, ts: NaiveDateTime) -> f64 {
        delta_seconds(self.epoch, ts)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Schedule `offset` seconds after the current scheduler time.
    pub fn schedule_relative(&mut self, event: Box<dyn Event<C>>, offset: f64) -> Result<f64> {
        if offset < 0.0 || offset.is_nan() {
            return Err(SchedulingError::NegativeOffset(offset));
        }
        let due = self.now + offset;
        let representable = due.is_finite()
            && self
                .epoch
                .checked_add_signed(seconds_to_delta(due))
                .is_some();
        if !representable {
            return Err(SchedulingError::OffsetOutOfRange(offset));
        }
        self.push(event, due)
    }

    /// Schedule at an absolute simulated instant.
    pub fn schedule_absolute(
        &mut self,
        event: Box<dyn Event<C>>,
        ts: NaiveDateTime,
    ) -> Result<f64> {
        let due = self.seconds_from_epoch(ts);
        self.push(event, due)
    }

    fn push(&mut self, event: Box<dyn Event<C>>, due: f64) -> Result<f64> {
        if due < self.now {
            return Err(SchedulingError::InThePast { due, now: self.now });
        }
        let priority = event.priority();
        let seq = self.next_seq;
        self.next_seq += 1;
        trace!(due, ?priority, seq, label = %event.label(), "event scheduled");
        self.queue.push(Entry {
            due,
            priority,
            seq,
            event,
        });
        Ok(due)
    }

    /// The next event and its due time, without removing it.
    pub fn peek(&self) -> Option<(f64, &dyn Event<C>)> {
        self.queue.peek().map(|entry| (entry.due, entry.event.as_ref()))
    }

    /// Due time of the next event as a timestamp.
    pub fn next_due(&self) -> Option<NaiveDateTime> {
        self.queue.peek().map(|entry| self.timestamp_at(entry.due))
    }

    /// Pop the next event, move "now" to its due time and execute it.
    ///
    /// Returns the due time in seconds. Fails with
    /// [`SchedulingError::EmptyQueue`] when nothing is queued, which callers
    /// use as the signal to fall through to stepping the simulator.
    pub fn pop_and_execute(&mut self, ctx: &mut C) -> Result<f64> {
        let entry = self.queue.pop().ok_or(SchedulingError::EmptyQueue)?;
        self.now = entry.due;
        let at = self.timestamp_at(entry.due);
        debug!(due = entry.due, at = %at, label = %entry.event.label(), "executing event");
        entry
            .event
            .execute(at, ctx)
            .map_err(SchedulingError::Execution)?;
        Ok(entry.due)
    }

    /// Execute every event due at or before `ts`, returning how many ran.
    pub fn run_until(&mut self, ts: NaiveDateTime, ctx: &mut C) -> Result<usize> {
        let limit = self.seconds_from_epoch(ts);
        let mut executed = 0;
        while matches!(self.queue.peek(), Some(entry) if entry.due <= limit) {
            self.pop_and_execute(ctx)?;
            executed += 1;
        }
        Ok(executed)
    }
}

impl<C> fmt::Debug for EventScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventScheduler")
            .field("epoch", &self.epoch)
            .field("now", &self.now)
            .field("pending", &self.queue.len())
            .finish()
    }
}
