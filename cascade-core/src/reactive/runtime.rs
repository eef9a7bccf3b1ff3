//! Reactive Runtime
//!
//! The runtime is the per-thread coordinator that ties signals, computeds,
//! effects, and scopes together. All of its state is thread-local: the
//! tracking stack, the scope stack, and the scheduler. Reactive handles are
//! `!Send`, so everything created on a thread stays on that thread.
//!
//! This module exposes the short constructor functions used by rendering
//! and template layers, and a [`Runtime`] type for configuration and
//! introspection.

use crate::config::RuntimeConfig;
use crate::error::ReactiveError;

use super::computed::Computed;
use super::context;
use super::effect::Effect;
use super::scheduler::{self, FlushState};
use super::scope::Scope;
use super::signal::Signal;

/// Handle to the calling thread's reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Install `config` for the calling thread.
    pub fn configure(config: RuntimeConfig) -> Result<(), ReactiveError> {
        config.validate()?;
        tracing::debug!(max_flush_passes = config.max_flush_passes, "runtime configured");
        scheduler::configure(config);
        Ok(())
    }

    /// The calling thread's configuration.
    pub fn config() -> RuntimeConfig {
        scheduler::config()
    }

    /// Check if reads are currently being recorded.
    pub fn is_tracking() -> bool {
        context::is_tracking()
    }

    /// The innermost active scope, if any.
    pub fn current_scope() -> Option<Scope> {
        Scope::current()
    }

    /// Number of effects waiting for a flush.
    pub fn pending_effects() -> usize {
        scheduler::pending_effects()
    }

    /// Current scheduler state.
    pub fn flush_state() -> FlushState {
        scheduler::flush_state()
    }
}

/// Create a reactive cell.
pub fn cell<T>(initial: T) -> Signal<T>
where
    T: PartialEq + 'static,
{
    Signal::new(initial)
}

/// Create a lazily evaluated derived value.
pub fn computed<T, F>(read: F) -> Computed<T>
where
    T: Clone + 'static,
    F: Fn() -> T + 'static,
{
    Computed::new(read)
}

/// Create an effect. It runs once immediately, then once per flush in which
/// any of its dependencies changed.
pub fn effect<F>(run: F) -> Effect
where
    F: FnMut() + 'static,
{
    Effect::new(run)
}
