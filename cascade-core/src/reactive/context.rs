//! Reactive Context
//!
//! The reactive context records which sources a computation reads. This
//! enables automatic dependency tracking: when a signal or computed is read,
//! it registers itself with the innermost active frame.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering an evaluation pushes a
//! frame through a guard; the guard pops it when dropped, so the stack is
//! restored even if the evaluation panics.
//!
//! Frames nest: a computed evaluated inside another computed pushes its own
//! frame, so the outer frame records the inner computed itself rather than the
//! inner computed's transitive sources.

use std::cell::RefCell;
use std::rc::Rc;

use crate::graph::{NodeId, Source, SourceSet};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Who opened a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameOwner {
    /// A caller of [`collect`].
    Anonymous,
    /// A computed evaluating its read function.
    Computed(NodeId),
    /// An effect executing its run function.
    Effect(NodeId),
    /// Tracking suspended by [`untracked`].
    Untracked,
}

struct Frame {
    owner: FrameOwner,
    sources: SourceSet,
    /// Version of each source when first read, parallel to `sources`.
    versions: Vec<u64>,
    self_invalidated: bool,
}

/// The sources read during one [`collect`] call, in first-read order.
#[derive(Default)]
pub struct Dependencies {
    sources: SourceSet,
    versions: Vec<u64>,
    self_invalidated: bool,
}

impl Dependencies {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.sources.contains_key(&id)
    }

    /// IDs of the sources read, in the order they were first read.
    pub fn ids(&self) -> Vec<NodeId> {
        self.sources.keys().copied().collect()
    }

    /// Whether any source changed after it was read, for example because
    /// the evaluation itself wrote to it or to one of its inputs.
    ///
    /// A reader that binds to such a source would otherwise miss the change:
    /// it was not yet subscribed when the notification went out.
    pub fn is_stale(&self) -> bool {
        self.sources
            .values()
            .zip(&self.versions)
            .any(|(source, &version)| !source.is_current(version))
    }

    /// Whether the evaluation wrote to a source it had already read.
    pub(crate) fn self_invalidated(&self) -> bool {
        self.self_invalidated
    }

    pub(crate) fn into_sources(self) -> SourceSet {
        self.sources
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies")
            .field("ids", &self.ids())
            .field("self_invalidated", &self.self_invalidated)
            .finish()
    }
}

/// Guard that pops its frame when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub(crate) struct ReactiveContext {
    owner: FrameOwner,
    depth: usize,
    finished: bool,
}

impl ReactiveContext {
    /// Push a new empty frame.
    pub(crate) fn enter(owner: FrameOwner) -> Self {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(Frame {
                owner,
                sources: SourceSet::new(),
                versions: Vec::new(),
                self_invalidated: false,
            });
            stack.len()
        });

        Self {
            owner,
            depth,
            finished: false,
        }
    }

    /// Pop the frame and hand back what it collected.
    pub(crate) fn finish(mut self) -> Dependencies {
        self.finished = true;
        let frame = Self::pop(self.depth, self.owner);
        frame
            .map(|frame| Dependencies {
                sources: frame.sources,
                versions: frame.versions,
                self_invalidated: frame.self_invalidated,
            })
            .unwrap_or_default()
    }

    fn pop(depth: usize, owner: FrameOwner) -> Option<Frame> {
        // `try_with` because a guard may be dropped during thread teardown.
        CONTEXT_STACK
            .try_with(|stack| {
                let mut stack = stack.borrow_mut();
                debug_assert_eq!(
                    stack.len(),
                    depth,
                    "ReactiveContext mismatch: expected depth {depth} for {owner:?}"
                );
                let popped = stack.pop();
                if let Some(frame) = &popped {
                    debug_assert_eq!(frame.owner, owner, "ReactiveContext owner mismatch");
                }
                popped
            })
            .ok()
            .flatten()
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.finished {
            Self::pop(self.depth, self.owner);
        }
    }
}

/// Run `f` inside a fresh frame and return its result with the frame's
/// collected dependencies.
pub(crate) fn collect_as<R>(owner: FrameOwner, f: impl FnOnce() -> R) -> (R, Dependencies) {
    let ctx = ReactiveContext::enter(owner);
    let result = f();
    (result, ctx.finish())
}

/// Run `f` and record every signal or computed it reads.
///
/// Reads register with the innermost frame only, so nested `collect` calls
/// each see their own reads.
///
/// ```rust
/// use cascade_core::reactive::{cell, collect};
///
/// let a = cell(1);
/// let b = cell(2);
/// let (sum, deps) = collect(|| a.get() + b.get());
/// assert_eq!(sum, 3);
/// assert_eq!(deps.ids(), vec![a.id(), b.id()]);
/// ```
pub fn collect<R>(f: impl FnOnce() -> R) -> (R, Dependencies) {
    collect_as(FrameOwner::Anonymous, f)
}

/// Run `f` without recording any reads.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let ctx = ReactiveContext::enter(FrameOwner::Untracked);
    let result = f();
    drop(ctx);
    result
}

/// Check if reads are currently being recorded.
pub fn is_tracking() -> bool {
    CONTEXT_STACK
        .try_with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|frame| frame.owner != FrameOwner::Untracked)
        })
        .unwrap_or(false)
}

/// Record a read of `source` in the innermost frame.
pub(crate) fn track(source: Rc<dyn Source>) {
    let _ = CONTEXT_STACK.try_with(|stack| {
        let mut stack = stack.borrow_mut();
        if let Some(frame) = stack.last_mut() {
            if frame.owner != FrameOwner::Untracked {
                let id = source.node_id();
                if !frame.sources.contains_key(&id) {
                    frame.versions.push(source.version());
                    frame.sources.insert(id, source);
                }
            }
        }
    });
}

/// Note that source `id` was written.
///
/// Any computed on the stack that already read `id` during its current
/// evaluation is flagged: its result would be stale the moment it is cached.
pub(crate) fn note_write(id: NodeId) {
    let _ = CONTEXT_STACK.try_with(|stack| {
        for frame in stack.borrow_mut().iter_mut() {
            if matches!(frame.owner, FrameOwner::Computed(_)) && frame.sources.contains_key(&id) {
                frame.self_invalidated = true;
            }
        }
    });
}
