use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use scopeguard::ScopeGuard;
use tokio::time::Instant;

use super::event::{Event, EventName, EventValue};
use crate::failure::{self, FailureCode};

/// Append-only event log for one measurement attempt.
///
/// Clones share the same log. Appending never fails: a lock poisoned by a
/// panicking producer is recovered, since a `Vec` push cannot leave the log
/// half-written.
#[derive(Debug, Clone, Default)]
pub struct Saver {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Saver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, event: Event) {
        self.lock().push(event);
    }

    /// Snapshot of everything appended so far. Cumulative, not a diff.
    pub fn read(&self) -> Vec<Event> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&*self.lock())
    }

    /// Rebuilds a log from [`Saver::to_json`] output.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let events: Vec<Event> = serde_json::from_str(raw)?;
        Ok(Self {
            events: Arc::new(Mutex::new(events)),
        })
    }
}

/// One paired operation in flight: its start event is already in the log.
#[derive(Debug)]
pub struct Operation {
    saver: Saver,
    done: EventName,
    value: EventValue,
    started: Instant,
}

/// An [`Operation`] that records itself as canceled if dropped unfinished,
/// e.g. when the caller drops the future driving it.
pub type PendingOperation = ScopeGuard<Operation, fn(Operation)>;

impl Operation {
    /// Appends the start event and starts the clock. `value` holds the
    /// pre-call fields and is reused as the base of the done event.
    pub fn begin(saver: &Saver, start: EventName, done: EventName, value: EventValue) -> PendingOperation {
        saver.append(Event::new(
            start,
            EventValue {
                time: Some(Utc::now()),
                ..value.clone()
            },
        ));
        let op = Operation {
            saver: saver.clone(),
            done,
            value,
            started: Instant::now(),
        };
        scopeguard::guard(op, Operation::abandon as fn(Operation))
    }

    /// For combined events such as `connect`: nothing is appended until the
    /// operation finishes, then a single `name` event is written.
    pub fn single(saver: &Saver, name: EventName, value: EventValue) -> PendingOperation {
        let op = Operation {
            saver: saver.clone(),
            done: name,
            value,
            started: Instant::now(),
        };
        scopeguard::guard(op, Operation::abandon as fn(Operation))
    }

    pub fn succeed(pending: PendingOperation, fill: impl FnOnce(&mut EventValue)) {
        ScopeGuard::into_inner(pending).finish(None, fill);
    }

    pub fn fail(pending: PendingOperation, err: &(dyn Error + 'static), fill: impl FnOnce(&mut EventValue)) {
        let code = failure::classify_or_unknown(err);
        ScopeGuard::into_inner(pending).finish(Some(code), fill);
    }

    fn abandon(self) {
        tracing::debug!(event = %self.done, "operation dropped before completion");
        self.finish(Some(FailureCode::OperationCanceled), |_| {});
    }

    fn finish(self, failure: Option<FailureCode>, fill: impl FnOnce(&mut EventValue)) {
        let Operation {
            saver,
            done,
            mut value,
            started,
        } = self;
        value.duration = Some(started.elapsed());
        value.failure = failure;
        value.time = Some(Utc::now());
        fill(&mut value);
        saver.append(Event::new(done, value));
    }
}
