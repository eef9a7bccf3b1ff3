//! Dependency Edges
//!
//! Edges are stored on both ends. A source keeps a set of weak references to
//! the subscribers that read it; a subscriber keeps strong references to the
//! sources it read during its last evaluation. Dependencies therefore never
//! keep their dependents alive, while a live dependent keeps everything it
//! reads reachable.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::node::NodeId;

/// Something that can be read inside a tracking frame (signals, computeds).
pub trait Source {
    /// Identity of this source.
    fn node_id(&self) -> NodeId;

    /// Register `subscriber` to be notified when this source changes.
    /// Registering the same ID twice keeps a single entry.
    fn subscribe(&self, id: NodeId, subscriber: Weak<dyn Subscriber>);

    /// Remove a previously registered subscriber.
    fn unsubscribe(&self, id: NodeId);

    /// Change counter, advanced whenever the source's value may have changed.
    fn version(&self) -> u64;

    /// Whether a reader that observed `version` still holds an up-to-date
    /// view of this source.
    fn is_current(&self, version: u64) -> bool {
        self.version() == version
    }
}

/// Something that is notified when one of its sources changes
/// (computeds, effects).
pub trait Subscriber {
    /// Identity of this subscriber.
    fn node_id(&self) -> NodeId;

    /// A source this subscriber depends on has changed.
    fn notify(&self);
}

/// Anything an owning scope tears down.
pub trait Disposable {
    fn dispose(&self);
}

/// Sources read during one evaluation, in first-read order.
pub type SourceSet = IndexMap<NodeId, Rc<dyn Source>>;

/// The subscriber side of a source.
#[derive(Default)]
pub struct SubscriberSet {
    entries: RefCell<IndexMap<NodeId, Weak<dyn Subscriber>>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: NodeId, subscriber: Weak<dyn Subscriber>) {
        self.entries.borrow_mut().insert(id, subscriber);
    }

    pub fn remove(&self, id: NodeId) {
        self.entries.borrow_mut().shift_remove(&id);
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.borrow().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Notify every live subscriber.
    ///
    /// The live set is snapshotted first: subscribers rebind their edges while
    /// being notified, so the borrow must not be held across `notify`.
    pub fn notify_all(&self) {
        let live: SmallVec<[Rc<dyn Subscriber>; 4]> = {
            let mut entries = self.entries.borrow_mut();
            entries.retain(|_, subscriber| subscriber.strong_count() > 0);
            entries.values().filter_map(Weak::upgrade).collect()
        };

        for subscriber in live {
            subscriber.notify();
        }
    }
}

/// Replace the dependency set of subscriber `id` with `next`.
///
/// Sources that were read last time but not this time drop the subscriber;
/// every source read this time (re)registers it.
pub fn rebind(
    current: &RefCell<SourceSet>,
    next: SourceSet,
    id: NodeId,
    subscriber: &Weak<dyn Subscriber>,
) {
    let previous = current.replace(SourceSet::new());

    for (source_id, source) in &previous {
        if !next.contains_key(source_id) {
            source.unsubscribe(id);
        }
    }
    for source in next.values() {
        source.subscribe(id, subscriber.clone());
    }

    *current.borrow_mut() = next;
}

/// Drop every edge from subscriber `id` to its sources.
pub fn unbind(current: &RefCell<SourceSet>, id: NodeId) {
    let previous = current.replace(SourceSet::new());
    for source in previous.values() {
        source.unsubscribe(id);
    }
}
