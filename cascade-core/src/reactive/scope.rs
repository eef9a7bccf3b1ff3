//! Instance Scopes
//!
//! A scope is the lifetime container for one component instance. Signals,
//! computeds, and effects created while a scope is current are owned by it;
//! disposing the scope tears all of them down and cancels any pending effect
//! runs.
//!
//! Scopes also carry ordered lifecycle callbacks per [`LifecyclePhase`]. The
//! core only guarantees ordering and once-only invocation; deciding when a
//! phase actually happens is up to whatever layer drives rendering.
//!
//! The current scope is tracked on a thread-local stack, pushed for the
//! duration of [`Scope::run`] through a guard, so it is restored even if the
//! setup function panics.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::str::FromStr;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::{self, ReactiveError};
use crate::graph::{Disposable, NodeId, NodeInfo, NodeKind};

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };

    /// Owner of effects created outside any scope. Never disposed.
    static ROOT: Scope = Scope::detached(Some("root".to_string()));
}

/// Named lifecycle phases, in the order a component normally goes through
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecyclePhase {
    Created,
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    BeforeUnmount,
    Unmounted,
}

impl LifecyclePhase {
    /// Every phase, in lifecycle order.
    pub const ALL: [LifecyclePhase; 7] = [
        LifecyclePhase::Created,
        LifecyclePhase::BeforeMount,
        LifecyclePhase::Mounted,
        LifecyclePhase::BeforeUpdate,
        LifecyclePhase::Updated,
        LifecyclePhase::BeforeUnmount,
        LifecyclePhase::Unmounted,
    ];

    /// The hook name as written in component definitions.
    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::Created => "created",
            LifecyclePhase::BeforeMount => "beforeMount",
            LifecyclePhase::Mounted => "mounted",
            LifecyclePhase::BeforeUpdate => "beforeUpdate",
            LifecyclePhase::Updated => "updated",
            LifecyclePhase::BeforeUnmount => "beforeUnmount",
            LifecyclePhase::Unmounted => "unmounted",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecyclePhase {
    type Err = ReactiveError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == name)
            .ok_or_else(|| ReactiveError::UnknownPhase(name.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeState {
    Active,
    Disposing,
    Disposed,
}

type Hook = Box<dyn FnOnce()>;

struct ScopeInner {
    info: NodeInfo,
    parent: Weak<ScopeInner>,
    owned: RefCell<IndexMap<NodeId, Rc<dyn Disposable>>>,
    children: RefCell<Vec<Scope>>,
    hooks: RefCell<IndexMap<LifecyclePhase, Vec<Hook>>>,
    fired: RefCell<IndexSet<LifecyclePhase>>,
    state: Cell<ScopeState>,
}

/// Ownership boundary for one component instance.
///
/// # Example
///
/// ```rust
/// use cascade_core::reactive::{cell, Scope};
///
/// let (scope, count) = Scope::create(|_| cell(0));
/// count.set(1);
///
/// scope.dispose();
/// assert!(!count.set(2));
/// assert_eq!(count.get(), 1);
/// ```
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    /// Create a scope. If another scope is current, the new one becomes its
    /// child and is disposed with it.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a scope whose diagnostics carry `label`.
    pub fn with_label(label: impl Into<String>) -> Self {
        Self::build(Some(label.into()))
    }

    /// Create a scope and run `setup` with it current.
    ///
    /// Everything `setup` creates is owned by the returned scope.
    pub fn create<R>(setup: impl FnOnce(&Scope) -> R) -> (Scope, R) {
        let scope = Scope::new();
        let result = scope.run(|| setup(&scope));
        (scope, result)
    }

    fn build(label: Option<String>) -> Self {
        match Scope::current() {
            Some(parent) => {
                let child = Scope {
                    inner: Rc::new(ScopeInner::new(label, Rc::downgrade(&parent.inner))),
                };
                if parent.inner.state.get() == ScopeState::Active {
                    parent.inner.children.borrow_mut().push(child.clone());
                } else {
                    child.dispose();
                }
                child
            }
            None => Scope::detached(label),
        }
    }

    fn detached(label: Option<String>) -> Self {
        Scope {
            inner: Rc::new(ScopeInner::new(label, Weak::new())),
        }
    }

    /// The innermost scope entered with [`run`](Self::run), if any.
    pub fn current() -> Option<Scope> {
        SCOPE_STACK
            .try_with(|stack| stack.borrow().last().cloned())
            .ok()
            .flatten()
    }

    /// Run `f` with this scope current.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = ScopeGuard::enter(self.clone());
        f()
    }

    /// Get the scope's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.info.id()
    }

    pub fn label(&self) -> Option<&str> {
        self.inner.info.label()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.get() == ScopeState::Disposed
    }

    /// Number of signals, computeds, and effects owned directly by this scope.
    pub fn owned_count(&self) -> usize {
        self.inner.owned.borrow().len()
    }

    /// Number of live child scopes.
    pub fn child_count(&self) -> usize {
        self.inner.children.borrow().len()
    }

    /// Append `callback` to the phase's list. Ignored once the scope is being
    /// disposed.
    pub fn register_lifecycle_hook<F>(&self, phase: LifecyclePhase, callback: F)
    where
        F: FnOnce() + 'static,
    {
        if self.inner.state.get() != ScopeState::Active {
            tracing::trace!(
                scope = %self.inner.info,
                %phase,
                "hook registered on disposed scope ignored"
            );
            return;
        }
        self.inner
            .hooks
            .borrow_mut()
            .entry(phase)
            .or_default()
            .push(Box::new(callback));
    }

    /// Run every callback registered for `phase`, in registration order.
    ///
    /// Each callback runs exactly once: invoking the phase again only runs
    /// callbacks registered since. Returns the number of callbacks run.
    /// Disposed scopes run nothing.
    ///
    /// A panicking callback is reported as [`ReactiveError::HookPanicked`]
    /// and the remaining callbacks still run.
    pub fn invoke(&self, phase: LifecyclePhase) -> usize {
        if self.inner.state.get() != ScopeState::Active {
            return 0;
        }
        self.inner.fire(phase)
    }

    /// Whether `phase` has been invoked at least once.
    pub fn has_fired(&self, phase: LifecyclePhase) -> bool {
        self.inner.fired.borrow().contains(&phase)
    }

    /// Tear the scope down.
    ///
    /// Child scopes are disposed first, then owned nodes in reverse creation
    /// order (which also cancels their pending effect runs), then the
    /// `beforeUnmount` and `unmounted` callbacks run if those phases have not
    /// fired yet. Calling `dispose` again is a no-op.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.state.get() != ScopeState::Active {
            return;
        }
        inner.state.set(ScopeState::Disposing);

        let children = std::mem::take(&mut *inner.children.borrow_mut());
        for child in children.iter().rev() {
            child.dispose();
        }

        let owned = std::mem::take(&mut *inner.owned.borrow_mut());
        for node in owned.values().rev() {
            node.dispose();
        }

        for phase in [LifecyclePhase::BeforeUnmount, LifecyclePhase::Unmounted] {
            if !self.has_fired(phase) {
                inner.fire(phase);
            }
        }

        inner.hooks.borrow_mut().clear();
        inner.state.set(ScopeState::Disposed);

        if let Some(parent) = inner.parent.upgrade() {
            parent
                .children
                .borrow_mut()
                .retain(|child| !Rc::ptr_eq(&child.inner, inner));
        }

        tracing::debug!(
            scope = %inner.info,
            nodes = owned.len(),
            children = children.len(),
            "scope disposed"
        );
    }

    fn own(&self, id: NodeId, node: Rc<dyn Disposable>) -> Owner {
        if self.inner.state.get() == ScopeState::Active {
            self.inner.owned.borrow_mut().insert(id, node);
            Owner(Rc::downgrade(&self.inner))
        } else {
            node.dispose();
            Owner::default()
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("node", &self.inner.info)
            .field("state", &self.inner.state.get())
            .field("owned", &self.owned_count())
            .field("children", &self.child_count())
            .finish()
    }
}

impl ScopeInner {
    fn new(label: Option<String>, parent: Weak<ScopeInner>) -> Self {
        Self {
            info: NodeInfo::new(NodeKind::Scope, label),
            parent,
            owned: RefCell::new(IndexMap::new()),
            children: RefCell::new(Vec::new()),
            hooks: RefCell::new(IndexMap::new()),
            fired: RefCell::new(IndexSet::new()),
            state: Cell::new(ScopeState::Active),
        }
    }

    fn fire(&self, phase: LifecyclePhase) -> usize {
        self.fired.borrow_mut().insert(phase);
        let callbacks = self
            .hooks
            .borrow_mut()
            .get_mut(&phase)
            .map(std::mem::take)
            .unwrap_or_default();

        let count = callbacks.len();
        for callback in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                error::report(&ReactiveError::HookPanicked {
                    node: self.info.clone(),
                    phase,
                    message: error::panic_message(&*payload),
                });
            }
        }
        count
    }
}

/// Link from a node back to the scope that owns it.
#[derive(Default)]
pub(crate) struct Owner(Weak<ScopeInner>);

impl Owner {
    /// Drop the owning scope's reference to node `id`.
    pub(crate) fn release(&self, id: NodeId) {
        if let Some(scope) = self.0.upgrade() {
            scope.owned.borrow_mut().shift_remove(&id);
        }
    }
}

/// Pops the scope stack when dropped.
struct ScopeGuard;

impl ScopeGuard {
    fn enter(scope: Scope) -> Self {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(scope));
        ScopeGuard
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let _ = SCOPE_STACK.try_with(|stack| stack.borrow_mut().pop());
    }
}

/// Register `node` with the current scope, if any.
pub(crate) fn adopt(id: NodeId, node: Rc<dyn Disposable>) -> Owner {
    match Scope::current() {
        Some(scope) => scope.own(id, node),
        None => Owner::default(),
    }
}

/// Register `node` with the current scope, falling back to the root scope.
pub(crate) fn adopt_or_root(id: NodeId, node: Rc<dyn Disposable>) -> Owner {
    match Scope::current() {
        Some(scope) => scope.own(id, node),
        None => ROOT.try_with(|root| root.own(id, node)).unwrap_or_default(),
    }
}

/// Register a lifecycle callback on the current scope.
pub fn register_lifecycle_hook<F>(phase: LifecyclePhase, callback: F) -> Result<(), ReactiveError>
where
    F: FnOnce() + 'static,
{
    let scope = Scope::current().ok_or(ReactiveError::NoActiveScope)?;
    scope.register_lifecycle_hook(phase, callback);
    Ok(())
}

/// Register a `mounted` callback on the current scope.
pub fn on_mounted<F>(callback: F) -> Result<(), ReactiveError>
where
    F: FnOnce() + 'static,
{
    register_lifecycle_hook(LifecyclePhase::Mounted, callback)
}

/// Register an `unmounted` callback on the current scope.
pub fn on_unmounted<F>(callback: F) -> Result<(), ReactiveError>
where
    F: FnOnce() + 'static,
{
    register_lifecycle_hook(LifecyclePhase::Unmounted, callback)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{tick, Computed, Effect, Signal};

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn FnOnce()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |entry: &str| -> Box<dyn FnOnce()> {
            let log = log_clone.clone();
            let entry = entry.to_string();
            Box::new(move || log.borrow_mut().push(entry))
        };
        (log, make)
    }

    #[test]
    fn phases_parse_from_hook_names() {
        assert_eq!("mounted".parse::<LifecyclePhase>().unwrap(), LifecyclePhase::Mounted);
        assert_eq!(
            "beforeUnmount".parse::<LifecyclePhase>().unwrap(),
            LifecyclePhase::BeforeUnmount
        );
        assert_eq!(
            "attached".parse::<LifecyclePhase>(),
            Err(ReactiveError::UnknownPhase("attached".to_string()))
        );

        let phase: LifecyclePhase = serde_json::from_str("\"beforeMount\"").unwrap();
        assert_eq!(phase, LifecyclePhase::BeforeMount);
    }

    #[test]
    fn create_makes_scope_current_during_setup() {
        assert!(Scope::current().is_none());
        let (scope, seen) =
            Scope::create(|scope| Scope::current().map(|current| current.id() == scope.id()));
        assert_eq!(seen, Some(true));
        assert!(Scope::current().is_none());
        assert!(!scope.is_disposed());
    }

    #[test]
    fn nodes_created_in_setup_are_owned() {
        let (scope, _) = Scope::create(|_| {
            let count = Signal::new(0);
            let doubled = Computed::new({
                let count = count.clone();
                move || count.get() * 2
            });
            Effect::new(move || {
                doubled.get();
            });
        });
        assert_eq!(scope.owned_count(), 3);
    }

    #[test]
    fn hooks_run_in_order_exactly_once() {
        let (log, make) = recorder();
        let scope = Scope::new();
        scope.register_lifecycle_hook(LifecyclePhase::Mounted, make("first"));
        scope.register_lifecycle_hook(LifecyclePhase::Mounted, make("second"));

        assert_eq!(scope.invoke(LifecyclePhase::Mounted), 2);
        assert_eq!(scope.invoke(LifecyclePhase::Mounted), 0);
        assert_eq!(*log.borrow(), vec!["first", "second"]);
        assert!(scope.has_fired(LifecyclePhase::Mounted));
    }

    #[test]
    fn free_functions_need_a_current_scope() {
        assert_eq!(on_mounted(|| {}), Err(ReactiveError::NoActiveScope));

        let (log, make) = recorder();
        let (scope, registered) = Scope::create(|_| on_unmounted(make("bye")));
        assert!(registered.is_ok());

        scope.dispose();
        assert_eq!(*log.borrow(), vec!["bye"]);
    }

    #[test]
    fn dispose_runs_unmount_phases_once() {
        let (log, make) = recorder();
        let scope = Scope::new();
        scope.register_lifecycle_hook(LifecyclePhase::Unmounted, make("unmounted"));
        scope.register_lifecycle_hook(LifecyclePhase::BeforeUnmount, make("before"));

        scope.dispose();
        scope.dispose();

        assert_eq!(*log.borrow(), vec!["before", "unmounted"]);
        assert!(scope.is_disposed());

        // Nothing fires after disposal.
        scope.register_lifecycle_hook(LifecyclePhase::Updated, make("late"));
        assert_eq!(scope.invoke(LifecyclePhase::Updated), 0);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn already_fired_unmount_is_not_repeated() {
        let (log, make) = recorder();
        let scope = Scope::new();
        scope.register_lifecycle_hook(LifecyclePhase::Unmounted, make("unmounted"));
        scope.invoke(LifecyclePhase::Unmounted);
        scope.register_lifecycle_hook(LifecyclePhase::Unmounted, make("again"));

        scope.dispose();
        assert_eq!(*log.borrow(), vec!["unmounted"]);
    }

    #[test]
    fn dispose_cancels_pending_effects() {
        let signal = Signal::new(0);
        let (scope, effect) = Scope::create(|_| {
            let signal = signal.clone();
            Effect::new(move || {
                signal.get();
            })
        });

        signal.set(1);
        assert!(effect.is_scheduled());

        scope.dispose();
        assert!(effect.is_disposed());
        tick().unwrap();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn children_are_disposed_before_parent() {
        let (log, make) = recorder();
        let (parent, child) = Scope::create(|parent| {
            parent.register_lifecycle_hook(LifecyclePhase::Unmounted, make("parent"));
            let child = Scope::with_label("child");
            child.register_lifecycle_hook(LifecyclePhase::Unmounted, make("child"));
            child
        });
        assert_eq!(parent.child_count(), 1);

        parent.dispose();
        assert!(child.is_disposed());
        assert_eq!(*log.borrow(), vec!["child", "parent"]);
    }

    #[test]
    fn disposing_child_detaches_it() {
        let (parent, child) = Scope::create(|_| Scope::new());
        child.dispose();
        assert_eq!(parent.child_count(), 0);
        assert!(!parent.is_disposed());
    }

    #[test]
    fn nodes_created_in_disposed_scope_are_inert() {
        let scope = Scope::new();
        scope.dispose();

        let (signal, effect) = scope.run(|| {
            let signal = Signal::new(1);
            let effect = Effect::new(|| {});
            (signal, effect)
        });

        assert!(signal.is_disposed());
        assert!(!signal.set(2));
        assert!(effect.is_disposed());
        assert_eq!(effect.run_count(), 0);
    }

    #[test]
    fn disposed_effects_leave_their_scope() {
        let (scope, effects) = Scope::create(|_| {
            (0..3).map(|_| Effect::new(|| {})).collect::<Vec<_>>()
        });
        assert_eq!(scope.owned_count(), 3);

        for effect in &effects {
            effect.dispose();
        }
        assert_eq!(scope.owned_count(), 0);

        // Disposing the scope afterwards has nothing left to tear down.
        scope.dispose();
        assert!(scope.is_disposed());
    }

    #[test]
    fn panicking_hook_does_not_stall_disposal() {
        let (log, make) = recorder();
        let scope = Scope::new();
        scope.register_lifecycle_hook(LifecyclePhase::BeforeUnmount, || panic!("hook failure"));
        scope.register_lifecycle_hook(LifecyclePhase::Unmounted, make("unmounted"));

        scope.dispose();

        assert!(scope.is_disposed());
        assert_eq!(*log.borrow(), vec!["unmounted"]);
    }

    #[test]
    fn panicking_hook_counts_and_later_hooks_run() {
        let (log, make) = recorder();
        let scope = Scope::new();
        scope.register_lifecycle_hook(LifecyclePhase::Mounted, || panic!("hook failure"));
        scope.register_lifecycle_hook(LifecyclePhase::Mounted, make("after"));

        assert_eq!(scope.invoke(LifecyclePhase::Mounted), 2);
        assert_eq!(*log.borrow(), vec!["after"]);
    }
}
