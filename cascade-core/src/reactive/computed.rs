//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change, and only when someone asks for it.
//!
//! # How Computeds Work
//!
//! 1. On first access, the computed runs its read function inside a tracking
//!    frame and caches the result.
//!
//! 2. When accessed again, if no dependency has changed, the cached value is
//!    returned without running anything.
//!
//! 3. When a dependency changes, the computed is marked dirty and passes the
//!    notification on to its own subscribers. Nothing is recomputed yet.
//!
//! 4. On next access, the read function runs again and the dependency set is
//!    rebuilt from what it actually read this time.
//!
//! # Failure
//!
//! A panic in the read function is caught at the recomputation boundary. The
//! previous value and subscriptions are kept, the node is left `Errored`, and
//! the error is returned from [`Computed::try_get`] (or re-raised by
//! [`Computed::get`]).

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::error::{self, ReactiveError};
use crate::graph::{
    self, Disposable, NodeId, NodeInfo, NodeKind, Source, SourceSet, Subscriber, SubscriberSet,
};

use super::context::{self, FrameOwner};
use super::scope;

/// Dirty state for a computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed since the last evaluation, or the computed has
    /// never been evaluated.
    Dirty,

    /// The last evaluation failed. Behaves like `Dirty` on read, but the next
    /// invalidation is still forwarded to subscribers.
    Errored,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use cascade_core::reactive::{Computed, Signal};
///
/// let count = Signal::new(2);
/// let squared = Computed::new({
///     let count = count.clone();
///     move || count.get() * count.get()
/// });
///
/// assert_eq!(squared.get(), 4);
/// count.set(3);
/// assert_eq!(squared.get(), 9);
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

pub(crate) struct ComputedInner<T> {
    info: NodeInfo,

    /// The read function.
    compute: Box<dyn Fn() -> T>,

    /// The cached value (None if never computed).
    value: RefCell<Option<T>>,

    state: Cell<ComputedState>,

    /// Advanced on every invalidation.
    version: Cell<u64>,

    /// Set while the read function is on the stack.
    computing: Cell<bool>,

    /// Sources read during the last successful evaluation.
    sources: RefCell<SourceSet>,

    /// Subscribers that read this computed.
    subscribers: SubscriberSet,

    disposed: Cell<bool>,

    this: Weak<ComputedInner<T>>,
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a new computed with the given read function.
    ///
    /// The read function is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(None, compute)
    }

    /// Create a computed whose diagnostics carry `label`.
    pub fn with_label<F>(label: impl Into<String>, compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(Some(label.into()), compute)
    }

    fn build<F>(label: Option<String>, compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let inner = Rc::new_cyclic(|this| ComputedInner {
            info: NodeInfo::new(NodeKind::Computed, label),
            compute: Box::new(compute),
            value: RefCell::new(None),
            state: Cell::new(ComputedState::Dirty),
            version: Cell::new(0),
            computing: Cell::new(false),
            sources: RefCell::new(SourceSet::new()),
            subscribers: SubscriberSet::new(),
            disposed: Cell::new(false),
            this: this.clone(),
        });
        scope::adopt(inner.info.id(), inner.clone());
        Self { inner }
    }

    /// Get the computed's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.info.id()
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Re-raises a failed evaluation with the [`ReactiveError`] as the panic
    /// payload. Use [`try_get`](Self::try_get) to handle it instead.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(error) => panic::panic_any(error),
        }
    }

    /// Get the current value, recomputing if necessary, and report failures
    /// instead of panicking.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        if !self.inner.disposed.get() && context::is_tracking() {
            context::track(self.inner.clone());
        }
        self.inner.read()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> Result<T, ReactiveError> {
        self.inner.read()
    }

    /// Get the current dirty state.
    pub fn state(&self) -> ComputedState {
        self.inner.state.get()
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Get the number of sources read during the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.sources.borrow().len()
    }

    /// Check if the owning scope has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }
}

impl<T: Clone + 'static> ComputedInner<T> {
    fn read(&self) -> Result<T, ReactiveError> {
        if self.computing.get() {
            return Err(ReactiveError::Cycle {
                node: self.info.clone(),
            });
        }

        // A disposed computed serves its last value without re-subscribing.
        if self.state.get() == ComputedState::Clean || self.disposed.get() {
            if let Some(value) = self.value.borrow().as_ref() {
                return Ok(value.clone());
            }
        }

        self.recompute()
    }

    /// Run the read function and rebind dependencies.
    ///
    /// The previous value and sources are only replaced once the read
    /// function has returned successfully.
    fn recompute(&self) -> Result<T, ReactiveError> {
        let _computing = ComputingGuard::enter(&self.computing);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            context::collect_as(FrameOwner::Computed(self.info.id()), || (self.compute)())
        }));

        let (value, deps) = match outcome {
            Ok(evaluated) => evaluated,
            Err(payload) => {
                self.state.set(ComputedState::Errored);
                return Err(error::from_computation_panic(&self.info, payload));
            }
        };

        if deps.self_invalidated() {
            self.state.set(ComputedState::Errored);
            return Err(ReactiveError::Cycle {
                node: self.info.clone(),
            });
        }

        *self.value.borrow_mut() = Some(value.clone());

        if !self.disposed.get() {
            let stale = deps.is_stale();
            let this: Weak<dyn Subscriber> = self.this.clone();
            graph::rebind(&self.sources, deps.into_sources(), self.info.id(), &this);
            self.state.set(ComputedState::Clean);

            // An input changed while the read function ran, before this node
            // was subscribed to it. The value is consistent with what was read
            // but already outdated.
            if stale {
                tracing::trace!(computed = %self.info, "input changed during evaluation");
                self.invalidate();
            }
        }

        Ok(value)
    }
}

impl<T: 'static> ComputedInner<T> {
    /// Mark dirty and forward the invalidation to subscribers.
    fn invalidate(&self) {
        self.version.set(self.version.get() + 1);
        if self.state.get() == ComputedState::Dirty {
            return;
        }
        self.state.set(ComputedState::Dirty);
        self.subscribers.notify_all();
    }
}

impl<T: 'static> Subscriber for ComputedInner<T> {
    fn node_id(&self) -> NodeId {
        self.info.id()
    }

    /// Mark dirty and forward the invalidation. Recomputation is left to the
    /// next read.
    ///
    /// An already dirty computed does not forward again: every subscriber
    /// bound to it is either dirty itself or already scheduled, because a
    /// reader that binds to a dirty computed re-dirties itself after its
    /// evaluation.
    fn notify(&self) {
        if !self.disposed.get() {
            self.invalidate();
        }
    }
}

impl<T: 'static> Source for ComputedInner<T> {
    fn node_id(&self) -> NodeId {
        self.info.id()
    }

    fn subscribe(&self, id: NodeId, subscriber: Weak<dyn Subscriber>) {
        if !self.disposed.get() {
            self.subscribers.insert(id, subscriber);
        }
    }

    fn unsubscribe(&self, id: NodeId) {
        self.subscribers.remove(id);
    }

    fn version(&self) -> u64 {
        self.version.get()
    }

    /// Errored computeds still forward invalidations, so only a dirty one is
    /// out of date. Disposed computeds never change again.
    fn is_current(&self, version: u64) -> bool {
        self.disposed.get()
            || (self.version.get() == version && self.state.get() != ComputedState::Dirty)
    }
}

impl<T: 'static> Disposable for ComputedInner<T> {
    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        graph::unbind(&self.sources, self.info.id());
        self.subscribers.clear();
    }
}

/// Clears the `computing` flag on every exit path.
struct ComputingGuard<'a>(&'a Cell<bool>);

impl<'a> ComputingGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("node", &self.inner.info)
            .field("state", &self.inner.state.get())
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.inner.subscribers.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::context::collect;
    use crate::reactive::Signal;

    fn counted<T: Clone + 'static>(
        f: impl Fn() -> T + 'static,
    ) -> (Computed<T>, Rc<Cell<usize>>) {
        let call_count = Rc::new(Cell::new(0));
        let call_count_clone = call_count.clone();
        let computed = Computed::new(move || {
            call_count_clone.set(call_count_clone.get() + 1);
            f()
        });
        (computed, call_count)
    }

    #[test]
    fn computed_is_lazy_until_first_access() {
        let (computed, call_count) = counted(|| 42);

        // Not computed yet
        assert!(!computed.has_value());
        assert_eq!(computed.state(), ComputedState::Dirty);
        assert_eq!(call_count.get(), 0);

        // First access triggers computation
        assert_eq!(computed.get(), 42);
        assert_eq!(call_count.get(), 1);
        assert!(computed.has_value());
        assert_eq!(computed.state(), ComputedState::Clean);
    }

    #[test]
    fn computed_caches_value_when_clean() {
        let (computed, call_count) = counted(|| 42);

        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(call_count.get(), 1);
    }

    #[test]
    fn write_marks_dirty_without_recomputing() {
        let source = Signal::new(1);
        let (computed, call_count) = counted({
            let source = source.clone();
            move || source.get() * 10
        });

        assert_eq!(computed.get(), 10);
        source.set(2);
        source.set(3);
        assert_eq!(computed.state(), ComputedState::Dirty);
        assert_eq!(call_count.get(), 1);

        // Several invalidations, one recomputation.
        assert_eq!(computed.get(), 30);
        assert_eq!(call_count.get(), 2);
    }

    #[test]
    fn branch_switch_drops_unread_dependency() {
        let use_a = Signal::new(true);
        let a = Signal::new(1);
        let b = Signal::new(2);
        let computed = Computed::new({
            let (use_a, a, b) = (use_a.clone(), a.clone(), b.clone());
            move || if use_a.get() { a.get() } else { b.get() }
        });

        assert_eq!(computed.get(), 1);
        assert_eq!(b.subscriber_count(), 0);
        b.set(20);
        assert_eq!(computed.state(), ComputedState::Clean);

        use_a.set(false);
        assert_eq!(computed.get(), 20);
        assert_eq!(a.subscriber_count(), 0);
        a.set(100);
        assert_eq!(computed.state(), ComputedState::Clean);
    }

    #[test]
    fn nested_computed_registers_only_itself() {
        let base = Signal::new(5);
        let doubled = Computed::new({
            let base = base.clone();
            move || base.get() * 2
        });
        let plus_ten = Computed::new({
            let doubled = doubled.clone();
            move || doubled.get() + 10
        });

        let (value, deps) = collect(|| plus_ten.get());
        assert_eq!(value, 20);
        assert_eq!(deps.ids(), vec![plus_ten.id()]);
        assert_eq!(plus_ten.dependency_count(), 1);

        base.set(10);
        assert_eq!(doubled.state(), ComputedState::Dirty);
        assert_eq!(plus_ten.state(), ComputedState::Dirty);
        assert_eq!(plus_ten.get(), 30);
    }

    #[test]
    fn failed_recompute_keeps_previous_value_and_edges() {
        let input = Signal::new(1);
        let computed = Computed::new({
            let input = input.clone();
            move || {
                let value = input.get();
                assert!(value >= 0, "negative input");
                value
            }
        });

        assert_eq!(computed.get(), 1);
        input.set(-1);

        let error = computed.try_get().unwrap_err();
        assert!(matches!(error, ReactiveError::ComputationPanicked { .. }));
        assert_eq!(computed.state(), ComputedState::Errored);
        assert_eq!(*computed.inner.value.borrow(), Some(1));
        assert_eq!(input.subscriber_count(), 1);

        // Still subscribed, so fixing the input recovers.
        input.set(4);
        assert_eq!(computed.state(), ComputedState::Dirty);
        assert_eq!(computed.get(), 4);
    }

    #[test]
    fn self_read_is_a_cycle() {
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let computed = Computed::with_label("loop", {
            let slot = slot.clone();
            move || {
                let me = slot.borrow().clone();
                me.map(|c| c.get() + 1).unwrap_or(0)
            }
        });
        *slot.borrow_mut() = Some(computed.clone());

        let error = computed.try_get().unwrap_err();
        assert_eq!(
            error,
            ReactiveError::Cycle {
                node: computed.inner.info.clone()
            }
        );
        // Nothing subscribed to itself.
        assert_eq!(computed.subscriber_count(), 0);
    }

    #[test]
    fn write_to_own_dependency_fails_fast() {
        let counter = Signal::new(0);
        let computed = Computed::new({
            let counter = counter.clone();
            move || {
                let value = counter.get();
                counter.set(value + 1);
                value
            }
        });

        assert!(matches!(
            computed.try_get(),
            Err(ReactiveError::Cycle { .. })
        ));
    }

    #[test]
    fn computed_clone_shares_state() {
        let computed1 = Computed::new(|| 42);
        assert_eq!(computed1.get(), 42);

        let computed2 = computed1.clone();
        assert_eq!(computed1.id(), computed2.id());
        assert!(computed2.has_value());
        assert_eq!(computed2.get(), 42);
    }

    #[test]
    fn disposed_computed_serves_last_value() {
        let input = Signal::new(2);
        let (computed, call_count) = counted({
            let input = input.clone();
            move || input.get() + 1
        });
        assert_eq!(computed.get(), 3);

        computed.inner.dispose();
        assert_eq!(input.subscriber_count(), 0);

        input.set(10);
        assert_eq!(computed.get(), 3);
        assert_eq!(call_count.get(), 1);
    }
}
