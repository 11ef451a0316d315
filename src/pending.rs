//! Completion tracking shared by all pipeline threads.
//!
//! [`PendingWork`] counts outstanding units of work. Whoever hands a unit to
//! another stage calls [`PendingWork::add`] *before* the hand-off, and the
//! stage that finishes the unit calls [`PendingWork::retire`]. The count can
//! therefore only reach zero once nothing is queued or in flight.
//!
//! It also carries the run's first fatal error and a halt signal. Halting
//! disconnects an internal channel that every blocking queue operation
//! selects on, so threads parked on a full or empty queue wake up and exit.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::error::{ArchiverError, Result};

#[derive(Debug, Default)]
struct State {
    outstanding: usize,
    failure: Option<ArchiverError>,
}

#[derive(Debug)]
pub struct PendingWork {
    state: Mutex<State>,
    cv: Condvar,
    /// Never sent on. Dropping it disconnects `halt_rx`.
    halt_tx: Mutex<Option<Sender<()>>>,
    halt_rx: Receiver<()>,
}

impl PendingWork {
    pub fn new() -> Self {
        let (halt_tx, halt_rx) = bounded(0);
        PendingWork {
            state: Mutex::new(State::default()),
            cv: Condvar::new(),
            halt_tx: Mutex::new(Some(halt_tx)),
            halt_rx,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `n` new units.
    pub fn add(&self, n: usize) {
        self.state().outstanding += n;
    }

    /// Marks one unit as finished and wakes the waiter when none are left.
    pub fn retire(&self) {
        let mut state = self.state();
        debug_assert!(state.outstanding > 0, "retire without matching add");
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 {
            self.cv.notify_all();
        }
    }

    pub fn outstanding(&self) -> usize {
        self.state().outstanding
    }

    /// Records a fatal error and halts the run. Only the first error is kept.
    pub fn fail(&self, err: ArchiverError) {
        {
            let mut state = self.state();
            if state.failure.is_none() {
                state.failure = Some(err);
            } else {
                tracing::debug!(error = %err, "suppressing error after first failure");
            }
            self.cv.notify_all();
        }
        self.halt();
    }

    /// Wakes every thread blocked in [`send`](Self::send) or
    /// [`recv`](Self::recv). Idempotent.
    pub fn halt(&self) {
        self.halt_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_halted(&self) -> bool {
        self.halt_tx.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Blocks until every unit is retired or a failure is recorded, and
    /// returns that failure.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state();
        while state.outstanding > 0 && state.failure.is_none() {
            state = self.cv.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        match state.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Removes and returns the recorded failure, if any.
    pub fn take_failure(&self) -> Option<ArchiverError> {
        self.state().failure.take()
    }

    /// Sends `msg`, blocking while the queue is full. Returns `false` if the
    /// run halted first or every receiver is gone.
    pub fn send<T>(&self, tx: &Sender<T>, msg: T) -> bool {
        select! {
            send(tx, msg) -> res => res.is_ok(),
            recv(self.halt_rx) -> _ => false,
        }
    }

    /// Receives the next item. Returns `None` once the run halts or every
    /// sender is gone.
    pub fn recv<T>(&self, rx: &Receiver<T>) -> Option<T> {
        select! {
            recv(rx) -> msg => msg.ok(),
            recv(self.halt_rx) -> _ => None,
        }
    }

    /// Guard for a worker thread: a panic while it is alive fails the run
    /// instead of leaving the waiter blocked forever.
    pub fn watch(&self) -> PanicWatch<'_> {
        PanicWatch { pending: self }
    }
}

pub struct PanicWatch<'a> {
    pending: &'a PendingWork,
}

impl Drop for PanicWatch<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.pending.fail(ArchiverError::WorkerPanicked);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn wait_returns_once_count_drops_to_zero() {
        let pending = PendingWork::new();
        pending.add(3);
        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..3 {
                    thread::sleep(Duration::from_millis(5));
                    pending.retire();
                }
            });
            pending.wait().unwrap();
        });
        assert_eq!(pending.outstanding(), 0);
    }

    #[test]
    fn wait_on_idle_counter_does_not_block() {
        PendingWork::new().wait().unwrap();
    }

    #[test]
    fn failure_wakes_waiter_and_keeps_first_error() {
        let pending = PendingWork::new();
        pending.add(1);
        thread::scope(|s| {
            s.spawn(|| {
                pending.fail(ArchiverError::NoRoots);
                pending.fail(ArchiverError::WorkerPanicked);
            });
            assert!(matches!(pending.wait(), Err(ArchiverError::NoRoots)));
        });
        assert!(pending.is_halted());
        assert!(pending.take_failure().is_none());
    }

    #[test]
    fn halt_unblocks_send_and_recv() {
        let pending = PendingWork::new();
        let (tx, rx) = bounded::<u8>(1);
        assert!(pending.send(&tx, 1));
        thread::scope(|s| {
            let blocked = s.spawn(|| pending.send(&tx, 2));
            thread::sleep(Duration::from_millis(10));
            pending.halt();
            assert!(!blocked.join().unwrap());
        });
        let (_keep, empty) = bounded::<u8>(1);
        assert_eq!(pending.recv(&empty), None);
        drop(rx);
    }

    #[test]
    fn panicking_worker_fails_the_run() {
        let pending = PendingWork::new();
        pending.add(1);
        let res = thread::scope(|s| {
            s.spawn(|| {
                let _watch = pending.watch();
                panic!("boom");
            })
            .join()
        });
        assert!(res.is_err());
        assert!(matches!(pending.wait(), Err(ArchiverError::WorkerPanicked)));
    }
}
