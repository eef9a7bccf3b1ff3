//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computeds,
//! effects, the scheduler that batches effect runs, and the scopes that own
//! them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking frame (such as a computed or effect), the signal
//! registers itself with that frame. When the signal's value changes, all
//! dependents are notified.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changed and someone reads it.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation, such as a render callback. A
//! change to any of its dependencies enqueues it; the scheduler runs it once
//! per flush.
//!
//! ## Scheduler
//!
//! Writes made in one synchronous stretch of code are coalesced into a single
//! flush. [`next_tick`] queues work to run after that flush.
//!
//! ## Scopes
//!
//! A Scope groups the state of one component instance and tears it down
//! deterministically.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking stack to detect
//! dependencies automatically. When a signal is read, we check if there is an
//! active frame and, if so, record the read there.

mod computed;
mod context;
mod effect;
mod runtime;
mod scheduler;
mod scope;
mod signal;

pub use computed::{Computed, ComputedState};
pub use context::{collect, is_tracking, untracked, Dependencies};
pub use effect::{Effect, EffectOptions};
pub use runtime::{cell, computed, effect, Runtime};
pub use scheduler::{
    drive, flush_state, next_tick, next_tick_async, pending_effects, tick, FlushReport, FlushState,
};
pub use scope::{on_mounted, on_unmounted, register_lifecycle_hook, LifecyclePhase, Scope};
pub use signal::Signal;
