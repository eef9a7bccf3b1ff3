//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies (unless created lazy).
//!
//! 2. When any dependency changes, the effect enqueues itself with the
//!    scheduler. It is never run synchronously from a write; the next flush
//!    runs it once no matter how many of its dependencies changed.
//!
//! 3. Each run rebuilds the dependency set from what the function read,
//!    exactly like a computed.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are pulled on read; effects are pushed by the scheduler.
//! - A computed's failure goes to its caller; an effect's failure inside a
//!   flush goes to the error hook.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::error::{self, ReactiveError};
use crate::graph::{self, Disposable, NodeId, NodeInfo, NodeKind, SourceSet, Subscriber};

use super::context::{self, FrameOwner};
use super::scheduler;
use super::scope;

/// Options for [`Effect::with_options`].
#[derive(Debug, Clone, Default)]
pub struct EffectOptions {
    /// Skip the initial synchronous run. The effect does nothing until it is
    /// run or scheduled explicitly.
    pub lazy: bool,

    /// Name used in diagnostics.
    pub label: Option<String>,
}

impl EffectOptions {
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use cascade_core::reactive::{tick, Effect, Signal};
///
/// let count = Signal::new(0);
/// let seen = Rc::new(Cell::new(-1));
///
/// let _effect = Effect::new({
///     let (count, seen) = (count.clone(), seen.clone());
///     move || seen.set(count.get())
/// });
/// assert_eq!(seen.get(), 0);
///
/// count.set(5);
/// assert_eq!(seen.get(), 0); // not yet: the flush is deferred
/// tick().unwrap();
/// assert_eq!(seen.get(), 5);
/// ```
pub struct Effect {
    inner: Rc<EffectInner>,
}

pub(crate) struct EffectInner {
    info: NodeInfo,

    /// The effect function.
    run: RefCell<Box<dyn FnMut()>>,

    /// Sources read during the last run.
    sources: RefCell<SourceSet>,

    /// Whether the effect sits in the scheduler's queue.
    enqueued: Cell<bool>,

    disposed: Cell<bool>,

    /// The scope holding this effect alive.
    owner: RefCell<scope::Owner>,

    /// Number of times the effect has run.
    run_count: Cell<usize>,

    this: Weak<EffectInner>,
}

impl Effect {
    /// Create a new effect. The function runs immediately to establish
    /// dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self::with_options(EffectOptions::default(), run)
    }

    /// Create a new effect without running it immediately.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self::with_options(EffectOptions::default().lazy(), run)
    }

    /// Create a new effect with explicit options.
    ///
    /// The effect is owned by the current scope, or by the thread's root
    /// scope when none is active.
    pub fn with_options<F>(options: EffectOptions, run: F) -> Self
    where
        F: FnMut() + 'static,
    {
        let inner = Rc::new_cyclic(|this| EffectInner {
            info: NodeInfo::new(NodeKind::Effect, options.label),
            run: RefCell::new(Box::new(run)),
            sources: RefCell::new(SourceSet::new()),
            enqueued: Cell::new(false),
            disposed: Cell::new(false),
            run_count: Cell::new(0),
            owner: RefCell::new(scope::Owner::default()),
            this: this.clone(),
        });
        let owner = scope::adopt_or_root(inner.info.id(), inner.clone());
        *inner.owner.borrow_mut() = owner;

        if !options.lazy {
            if let Err(error) = inner.run() {
                error::report(&error);
            }
        }

        Self { inner }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.info.id()
    }

    /// Get the effect's diagnostic label.
    pub fn label(&self) -> Option<&str> {
        self.inner.info.label()
    }

    /// Run the effect now, outside of any flush.
    pub fn run(&self) -> Result<(), ReactiveError> {
        self.inner.run()
    }

    /// Enqueue the effect for the next flush.
    pub fn schedule(&self) {
        self.inner.schedule();
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again and is removed from the
    /// scheduler's queue.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Check if the effect is waiting for a flush.
    pub fn is_scheduled(&self) -> bool {
        self.inner.enqueued.get()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Get the number of sources read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.sources.borrow().len()
    }
}

impl EffectInner {
    pub(crate) fn info(&self) -> &NodeInfo {
        &self.info
    }

    /// Execute the effect function inside a tracking frame.
    pub(crate) fn run(&self) -> Result<(), ReactiveError> {
        if self.disposed.get() {
            return Ok(());
        }

        // Already on the stack: the function asked to run itself.
        let Ok(mut function) = self.run.try_borrow_mut() else {
            return Err(ReactiveError::Cycle {
                node: self.info.clone(),
            });
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let function: &mut dyn FnMut() = &mut **function;
            context::collect_as(FrameOwner::Effect(self.info.id()), function)
        }));
        drop(function);

        self.run_count.set(self.run_count.get() + 1);

        match outcome {
            Ok(((), deps)) => {
                // The run may have disposed its own scope.
                if !self.disposed.get() {
                    let stale = deps.is_stale();
                    let this: Weak<dyn Subscriber> = self.this.clone();
                    graph::rebind(&self.sources, deps.into_sources(), self.info.id(), &this);

                    // Something it read changed before it was subscribed.
                    if stale {
                        tracing::trace!(effect = %self.info, "input changed during run");
                        self.schedule();
                    }
                }
                Ok(())
            }
            Err(payload) => Err(ReactiveError::EffectPanicked {
                node: self.info.clone(),
                message: error::panic_message(&*payload),
            }),
        }
    }

    /// Hand the effect to the scheduler unless it is already queued.
    pub(crate) fn schedule(&self) {
        if self.disposed.get() || self.enqueued.replace(true) {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            scheduler::enqueue(this);
        }
    }

    /// Called by the scheduler when the effect leaves the queue.
    pub(crate) fn dequeue(&self) {
        self.enqueued.set(false);
    }
}

impl Subscriber for EffectInner {
    fn node_id(&self) -> NodeId {
        self.info.id()
    }

    fn notify(&self) {
        self.schedule();
    }
}

impl Disposable for EffectInner {
    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        scheduler::cancel(self.info.id());
        self.enqueued.set(false);
        graph::unbind(&self.sources, self.info.id());
        self.owner.take().release(self.info.id());

        // Release captured state unless the function is running right now.
        if let Ok(mut function) = self.run.try_borrow_mut() {
            *function = Box::new(|| {});
        }
        tracing::trace!(effect = %self.info, "effect disposed");
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("node", &self.inner.info)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("scheduled", &self.is_scheduled())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{tick, Signal};

    fn counter() -> (Rc<Cell<usize>>, impl FnMut() + 'static) {
        let run_count = Rc::new(Cell::new(0));
        let run_count_clone = run_count.clone();
        (run_count, move || run_count_clone.set(run_count_clone.get() + 1))
    }

    #[test]
    fn effect_runs_on_creation() {
        let (run_count, run) = counter();
        let effect = Effect::new(run);

        assert_eq!(run_count.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let (run_count, run) = counter();
        let effect = Effect::new_lazy(run);

        assert_eq!(run_count.get(), 0);
        assert_eq!(effect.run_count(), 0);

        effect.run().unwrap();
        assert_eq!(run_count.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_on_flush_not_on_write() {
        let signal = Signal::new(0);
        let seen = Rc::new(Cell::new(-1));
        let effect = Effect::new({
            let (signal, seen) = (signal.clone(), seen.clone());
            move || seen.set(signal.get())
        });
        assert_eq!(effect.dependency_count(), 1);

        signal.set(42);
        assert!(effect.is_scheduled());
        assert_eq!(seen.get(), 0);

        let report = tick().unwrap();
        assert_eq!(report.effects_run, 1);
        assert_eq!(seen.get(), 42);
        assert!(!effect.is_scheduled());
    }

    #[test]
    fn schedule_is_deduplicated() {
        let (run_count, run) = counter();
        let effect = Effect::new(run);

        effect.schedule();
        effect.schedule();
        effect.schedule();
        tick().unwrap();

        assert_eq!(run_count.get(), 2);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let signal = Signal::new(0);
        let run_count = Rc::new(Cell::new(0));
        let effect = Effect::new({
            let (signal, run_count) = (signal.clone(), run_count.clone());
            move || {
                signal.get();
                run_count.set(run_count.get() + 1);
            }
        });
        assert_eq!(run_count.get(), 1);

        signal.set(1);
        effect.dispose();
        assert!(effect.is_disposed());
        assert!(!effect.is_scheduled());
        assert_eq!(signal.subscriber_count(), 0);

        tick().unwrap();
        effect.run().unwrap();
        assert_eq!(run_count.get(), 1);
    }

    #[test]
    fn panicking_run_keeps_previous_dependencies() {
        let signal = Signal::new(0);
        let effect = Effect::new_lazy({
            let signal = signal.clone();
            move || {
                if signal.get() > 0 {
                    panic!("refusing positive values");
                }
            }
        });

        effect.run().unwrap();
        signal.set(1);

        let report = tick().unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            &report.errors[0],
            ReactiveError::EffectPanicked { node, .. } if node.id() == effect.id()
        ));
        assert_eq!(signal.subscriber_count(), 1);

        signal.set(0);
        let report = tick().unwrap();
        assert!(report.errors.is_empty());
        assert_eq!(effect.run_count(), 3);
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::with_options(EffectOptions::default().label("shared"), || {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());
        assert_eq!(effect2.label(), Some("shared"));

        effect1.run().unwrap();
        assert_eq!(effect2.run_count(), 2);

        effect1.dispose();
        assert!(effect2.is_disposed());
    }
}
