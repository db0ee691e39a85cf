//! Time-ordered scheduler driven by one dedicated thread.
//!
//! Items are kept sorted by trigger time; ties keep insertion order. The
//! scheduling thread sleeps on a condition variable until the earliest item
//! is due (or `default_wait` when empty) and fires the callback for every
//! due item with the internal lock released, so the callback may call back
//! into the scheduler.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, error};

/// Trigger time of a scheduled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    Now,
    In(TimeDelta),
    At(DateTime<Utc>),
}

impl When {
    pub fn resolve(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            When::Now => now,
            When::In(delta) => now + delta,
            When::At(at) => at,
        }
    }
}

impl From<DateTime<Utc>> for When {
    fn from(at: DateTime<Utc>) -> Self {
        When::At(at)
    }
}

impl From<TimeDelta> for When {
    fn from(delta: TimeDelta) -> Self {
        When::In(delta)
    }
}

pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Invoked by the scheduling thread for every due item.
pub type SchedulerCallback<T> = Box<dyn Fn(T) -> Result<(), CallbackError> + Send + Sync>;

struct State<T> {
    items: Vec<(DateTime<Utc>, T)>,
    finished: bool,
}

pub struct Scheduler<T> {
    state: Mutex<State<T>>,
    wakeup: Condvar,
    callback: SchedulerCallback<T>,
    default_wait: Duration,
}

impl<T: Send> Scheduler<T> {
    pub fn new(callback: SchedulerCallback<T>, default_wait: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                items: Vec::new(),
                finished: false,
            }),
            wakeup: Condvar::new(),
            callback,
            default_wait,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts an item and wakes the scheduling thread. Duplicates are
    /// allowed.
    pub fn schedule(&self, when: impl Into<When>, payload: T) {
        let at = when.into().resolve(Utc::now());
        let mut state = self.lock();
        let index = state.items.partition_point(|(t, _)| *t <= at);
        state.items.insert(index, (at, payload));
        drop(state);
        self.wakeup.notify_all();
    }

    /// Removes every item matching `predicate` and returns how many were
    /// removed.
    pub fn remove<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&DateTime<Utc>, &T) -> bool,
    {
        let mut state = self.lock();
        let before = state.items.len();
        state.items.retain(|(t, item)| !predicate(t, item));
        let removed = before - state.items.len();
        drop(state);
        if removed > 0 {
            self.wakeup.notify_all();
        }
        removed
    }

    /// Removes all items.
    pub fn reset(&self) {
        self.lock().items.clear();
        self.wakeup.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Asks the scheduling thread to leave its loop. A callback already in
    /// flight completes.
    pub fn shutdown(&self) {
        self.lock().finished = true;
        self.wakeup.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().finished
    }

    /// Body of the scheduling thread. Returns after [`shutdown`](Self::shutdown).
    pub fn run(&self) {
        debug!("Scheduler started");
        let mut state = self.lock();
        loop {
            if state.finished {
                break;
            }

            let now = Utc::now();
            let due_count = state.items.partition_point(|(t, _)| *t <= now);
            if due_count > 0 {
                let due: Vec<(DateTime<Utc>, T)> = state.items.drain(..due_count).collect();
                drop(state);
                for (at, payload) in due {
                    self.fire(at, payload);
                }
                state = self.lock();
                continue;
            }

            let wait = match state.items.first() {
                Some((next, _)) => (*next - now).to_std().unwrap_or(Duration::ZERO),
                None => self.default_wait,
            };
            debug!("Scheduler sleeping for {:.3}s", wait.as_secs_f64());
            state = self
                .wakeup
                .wait_timeout(state, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
            debug!("Scheduler woke up");
        }
        debug!("Scheduler stopped");
    }

    fn fire(&self, at: DateTime<Utc>, payload: T) {
        match catch_unwind(AssertUnwindSafe(|| (self.callback)(payload))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Scheduled item due at {} failed: {}", at, e),
            Err(_) => error!("Scheduled item due at {} panicked", at),
        }
    }
}

impl<T: Clone + Send> Scheduler<T> {
    /// First item, in time order, matching `predicate` and due no later than
    /// `until`. The item stays scheduled.
    pub fn find<P>(&self, mut predicate: P, until: Option<DateTime<Utc>>) -> Option<(DateTime<Utc>, T)>
    where
        P: FnMut(&DateTime<Utc>, &T) -> bool,
    {
        self.lock()
            .items
            .iter()
            .take_while(|(t, _)| until.map_or(true, |u| *t <= u))
            .find(|(t, item)| predicate(t, item))
            .cloned()
    }

    /// Snapshot of all items in firing order.
    pub fn items(&self) -> Vec<(DateTime<Utc>, T)> {
        self.lock().items.clone()
    }
}
