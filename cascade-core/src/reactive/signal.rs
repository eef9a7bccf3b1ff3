//! Signal Implementation
//!
//! A Signal is the reactive cell: the atomic unit of observable mutable
//! state. It holds a value and tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a tracking frame (computed/effect), the
//!    signal registers itself with that frame. The reader subscribes once its
//!    evaluation completes.
//!
//! 2. When a signal is written with a value that differs from the current one
//!    (by its equality check), the version is bumped and all subscribers are
//!    notified. Equal writes are dropped without notifying anyone.
//!
//! 3. Computeds react to a notification by marking themselves dirty; effects
//!    react by enqueueing themselves with the scheduler.
//!
//! # Ownership
//!
//! A signal created inside a [`Scope`](super::Scope) is owned by it. Once the
//! scope is disposed, writes become silent no-ops and reads return the last
//! value without tracking.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use crate::graph::{Disposable, NodeId, NodeInfo, NodeKind, Source, Subscriber, SubscriberSet};

use super::context;
use super::scope;

type Equals<T> = Box<dyn Fn(&T, &T) -> bool>;

/// A reactive cell holding a value of type T.
///
/// Handles are cheap to clone; clones share the same cell.
///
/// # Example
///
/// ```rust
/// use cascade_core::reactive::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// assert!(count.set(5));
///
/// // Writing the same value again is a no-op
/// assert!(!count.set(5));
/// assert_eq!(count.version(), 1);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

pub(crate) struct SignalInner<T> {
    info: NodeInfo,

    /// The current value.
    value: RefCell<T>,

    /// Decides whether a write changes the value.
    equals: Equals<T>,

    /// Incremented on every accepted write.
    version: Cell<u64>,

    /// Computeds and effects that read this signal during their last run.
    subscribers: SubscriberSet,

    disposed: Cell<bool>,
}

impl<T: 'static> Signal<T> {
    /// Create a new signal compared with `PartialEq`.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equals(value, |current, next| current == next)
    }

    /// Create a new signal with a custom equality check.
    ///
    /// A write is accepted only when `equals(current, new)` is false. Passing
    /// `|_, _| false` makes every write notify.
    pub fn with_equals<F>(value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        let inner = Rc::new(SignalInner {
            info: NodeInfo::new(NodeKind::Signal, None),
            value: RefCell::new(value),
            equals: Box::new(equals),
            version: Cell::new(0),
            subscribers: SubscriberSet::new(),
            disposed: Cell::new(false),
        });
        scope::adopt(inner.info.id(), inner.clone());
        Self { inner }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.info.id()
    }

    /// Get the current value, registering a dependency if called inside a
    /// tracking frame.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.get_untracked()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, registering a dependency like [`get`](Self::get).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&*self.inner.value.borrow())
    }

    /// Set a new value and notify subscribers.
    ///
    /// Returns whether the value changed. An equal value, or any write to a
    /// disposed signal, is dropped.
    pub fn set(&self, value: T) -> bool {
        self.inner.write(value)
    }

    /// Mutate a copy of the value and write it back.
    ///
    /// The write goes through the equality check, so a mutation that leaves
    /// the value unchanged does not notify.
    pub fn update<F>(&self, f: F) -> bool
    where
        T: Clone,
        F: FnOnce(&mut T),
    {
        let mut next = self.get_untracked();
        f(&mut next);
        self.set(next)
    }

    /// Number of accepted writes since creation.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Check if the owning scope has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    fn track(&self) {
        if !self.inner.disposed.get() && context::is_tracking() {
            context::track(self.inner.clone());
        }
    }
}

impl<T: 'static> SignalInner<T> {
    fn write(&self, value: T) -> bool {
        if self.disposed.get() {
            tracing::trace!(signal = %self.info, "write to disposed signal ignored");
            return false;
        }

        let unchanged = {
            let current = self.value.borrow();
            (self.equals)(&*current, &value)
        };
        if unchanged {
            return false;
        }

        *self.value.borrow_mut() = value;
        self.version.set(self.version.get() + 1);

        context::note_write(self.info.id());
        self.subscribers.notify_all();
        true
    }
}

impl<T: 'static> Source for SignalInner<T> {
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

    fn is_current(&self, version: u64) -> bool {
        // Disposed signals never change again.
        self.disposed.get() || self.version.get() == version
    }
}

impl<T: 'static> Disposable for SignalInner<T> {
    fn dispose(&self) {
        self.disposed.set(true);
        self.subscribers.clear();
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.version())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
