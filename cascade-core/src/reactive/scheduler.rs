//! Update Scheduler
//!
//! The scheduler coalesces effect invalidations into flushes and runs
//! next-tick callbacks once a flush has completed.
//!
//! # State Machine
//!
//! ```text
//!   Idle --enqueue/next_tick--> Pending --tick()--> Flushing --drained--> Idle
//! ```
//!
//! - The first effect enqueued (or next-tick callback registered) while
//!   `Idle` arranges exactly one flush and moves to `Pending`. Further
//!   invalidations in the same synchronous window only join the queue.
//! - A flush runs queued effects in first-enqueued order. An effect enqueued
//!   during the flush, including by its own run, is appended and handled in
//!   the same flush. A single effect may run at most
//!   [`RuntimeConfig::max_flush_passes`] times per flush; past that the flush
//!   is aborted with [`ReactiveError::FlushOverflow`].
//! - After the queue drains the state returns to `Idle` and the next-tick
//!   callbacks registered so far run, in registration order.
//!
//! # Driving Flushes
//!
//! "Arranging" a flush means waking whoever drives the scheduler. Embedders
//! with their own loop call [`tick`] at each scheduling opportunity. Under
//! tokio, spawn [`drive`] on a `LocalSet` and it will call [`tick`] whenever a
//! flush is arranged.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tokio::sync::{oneshot, Notify};

use crate::config::RuntimeConfig;
use crate::error::{self, ReactiveError};
use crate::graph::NodeId;

use super::effect::EffectInner;

/// Scheduler states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Nothing to do.
    Idle,

    /// A flush has been arranged but has not started.
    Pending,

    /// Effects are running.
    Flushing,
}

/// Summary of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Effects that ran, including ones that failed.
    pub effects_run: usize,

    /// Next-tick callbacks that ran, including ones that failed.
    pub callbacks_run: usize,

    /// Errors reported during the flush. Each was also sent to the error hook.
    pub errors: Vec<ReactiveError>,
}

type Callback = Box<dyn FnOnce()>;

struct Scheduler {
    state: Cell<FlushState>,
    queue: RefCell<VecDeque<Rc<EffectInner>>>,
    callbacks: RefCell<Vec<Callback>>,
    wake: Rc<Notify>,
    config: RefCell<RuntimeConfig>,
}

thread_local! {
    static SCHEDULER: Scheduler = Scheduler::new();
}

impl Scheduler {
    fn new() -> Self {
        Self {
            state: Cell::new(FlushState::Idle),
            queue: RefCell::new(VecDeque::new()),
            callbacks: RefCell::new(Vec::new()),
            wake: Rc::new(Notify::new()),
            config: RefCell::new(RuntimeConfig::default()),
        }
    }

    /// Arrange a flush if none is pending or running.
    fn arrange(&self) {
        if self.state.get() == FlushState::Idle {
            self.state.set(FlushState::Pending);
            self.wake.notify_one();
            tracing::trace!("flush arranged");
        }
    }

    fn enqueue(&self, effect: Rc<EffectInner>) {
        tracing::trace!(effect = %effect.info(), "effect enqueued");
        self.queue.borrow_mut().push_back(effect);
        self.arrange();
    }

    fn cancel(&self, id: NodeId) {
        self.queue
            .borrow_mut()
            .retain(|effect| effect.info().id() != id);
    }

    fn next_effect(&self) -> Option<Rc<EffectInner>> {
        self.queue.borrow_mut().pop_front()
    }

    /// Drop everything still queued after an aborted flush.
    fn abandon_queue(&self) {
        let abandoned = std::mem::take(&mut *self.queue.borrow_mut());
        for effect in abandoned {
            effect.dequeue();
        }
    }

    fn flush(&self) -> Result<FlushReport, ReactiveError> {
        // A tick requested from inside a running flush has nothing to add.
        if self.state.get() == FlushState::Flushing {
            return Ok(FlushReport::default());
        }

        let limit = self.config.borrow().max_flush_passes;
        let mut report = FlushReport::default();
        let mut overflow = None;

        {
            let _flushing = StateGuard::enter(&self.state);
            let mut runs: HashMap<NodeId, usize> = HashMap::new();

            while let Some(effect) = self.next_effect() {
                effect.dequeue();

                let count = runs.entry(effect.info().id()).or_insert(0);
                *count += 1;
                if *count > limit {
                    self.abandon_queue();
                    overflow = Some(ReactiveError::FlushOverflow {
                        node: effect.info().clone(),
                        limit,
                    });
                    break;
                }

                report.effects_run += 1;
                if let Err(error) = effect.run() {
                    error::report(&error);
                    report.errors.push(error);
                }
            }
        }

        if let Some(error) = &overflow {
            tracing::error!(error = %error, "flush aborted");
            error::report(error);
        }

        // Callbacks registered from here on belong to the next tick.
        let callbacks = std::mem::take(&mut *self.callbacks.borrow_mut());
        for callback in callbacks {
            report.callbacks_run += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                let error = ReactiveError::CallbackPanicked {
                    message: error::panic_message(&*payload),
                };
                error::report(&error);
                report.errors.push(error);
            }
        }

        tracing::debug!(
            effects = report.effects_run,
            callbacks = report.callbacks_run,
            errors = report.errors.len(),
            "flush complete"
        );

        match overflow {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }
}

/// Holds the scheduler in `Flushing` and returns it to `Idle` on every exit
/// path.
struct StateGuard<'a>(&'a Cell<FlushState>);

impl<'a> StateGuard<'a> {
    fn enter(state: &'a Cell<FlushState>) -> Self {
        state.set(FlushState::Flushing);
        Self(state)
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.0.set(FlushState::Idle);
    }
}

pub(crate) fn enqueue(effect: Rc<EffectInner>) {
    let _ = SCHEDULER.try_with(|scheduler| scheduler.enqueue(effect));
}

pub(crate) fn cancel(id: NodeId) {
    let _ = SCHEDULER.try_with(|scheduler| scheduler.cancel(id));
}

pub(crate) fn configure(config: RuntimeConfig) {
    SCHEDULER.with(|scheduler| *scheduler.config.borrow_mut() = config);
}

pub(crate) fn config() -> RuntimeConfig {
    SCHEDULER.with(|scheduler| scheduler.config.borrow().clone())
}

/// Run one scheduling opportunity: flush every pending effect, then the
/// next-tick callbacks registered so far.
///
/// Returns the flush summary, or [`ReactiveError::FlushOverflow`] if an effect
/// kept re-triggering itself. Calling `tick` from inside a running flush is a
/// no-op.
pub fn tick() -> Result<FlushReport, ReactiveError> {
    SCHEDULER.with(|scheduler| scheduler.flush())
}

/// Register `callback` to run after the current (or next) flush completes.
///
/// Callbacks run in registration order and observe fully flushed state. If
/// nothing is pending, a flush is arranged so the callback still runs at the
/// next scheduling opportunity.
pub fn next_tick<F>(callback: F)
where
    F: FnOnce() + 'static,
{
    SCHEDULER.with(|scheduler| {
        scheduler.callbacks.borrow_mut().push(Box::new(callback));
        scheduler.arrange();
    });
}

/// Future form of [`next_tick`].
///
/// The callback is registered when this function is called, not when the
/// future is first polled.
pub fn next_tick_async() -> impl Future<Output = ()> {
    let (sender, receiver) = oneshot::channel();
    next_tick(move || {
        let _ = sender.send(());
    });
    async move {
        // The sender is only dropped unsent if the thread's runtime is torn
        // down; resolve either way.
        let _ = receiver.await;
    }
}

/// Flush whenever a flush is arranged. Never returns.
///
/// Must run on the thread that owns the reactive state, typically through
/// `tokio::task::spawn_local`.
pub async fn drive() {
    let wake = SCHEDULER.with(|scheduler| Rc::clone(&scheduler.wake));
    loop {
        wake.notified().await;
        // Overflow was already logged and reported by the flush.
        let _ = tick();
    }
}

/// Current scheduler state.
pub fn flush_state() -> FlushState {
    SCHEDULER.with(|scheduler| scheduler.state.get())
}

/// Number of effects waiting for a flush.
pub fn pending_effects() -> usize {
    SCHEDULER.with(|scheduler| scheduler.queue.borrow().len())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
