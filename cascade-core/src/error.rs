//! Error types and the process-wide error hook.
//!
//! Reads never fail because of staleness; staleness is resolved by
//! recomputation. What can fail is user code running inside the engine
//! (a computed's read function, an effect, a next-tick callback) and the
//! engine's own loop guards.
//!
//! Failures with a synchronous caller are returned to it. Failures inside a
//! flush have no caller, so they are handed to [`report`], which logs them and
//! forwards them to the hook installed with [`set_error_hook`].

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::graph::NodeInfo;
use crate::reactive::LifecyclePhase;

/// Errors produced by the reactive engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A computed was read while it was evaluating, or it wrote to a cell it
    /// had already read during the same evaluation.
    #[error("dependency cycle detected while evaluating {node}")]
    Cycle { node: NodeInfo },

    /// A computed's read function panicked. The previous cached value and
    /// subscriptions are kept.
    #[error("{node} panicked during recomputation: {message}")]
    ComputationPanicked { node: NodeInfo, message: String },

    /// An effect's run function panicked.
    #[error("{node} panicked while running: {message}")]
    EffectPanicked { node: NodeInfo, message: String },

    /// A next-tick callback panicked.
    #[error("next-tick callback panicked: {message}")]
    CallbackPanicked { message: String },

    /// A lifecycle callback panicked. The scope's other callbacks still ran.
    #[error("{phase} hook of {node} panicked: {message}")]
    HookPanicked {
        node: NodeInfo,
        phase: LifecyclePhase,
        message: String,
    },

    /// An effect kept re-triggering itself inside one flush.
    #[error("{node} ran more than {limit} times in one flush; aborting flush")]
    FlushOverflow { node: NodeInfo, limit: usize },

    /// A scope-relative operation was called outside of any scope.
    #[error("no active scope")]
    NoActiveScope,

    /// A lifecycle hook name did not match any known phase.
    #[error("unknown lifecycle phase '{0}'")]
    UnknownPhase(String),

    /// Runtime configuration could not be parsed or is out of range.
    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),
}

impl ReactiveError {
    /// The node this error is about, if any.
    pub fn node(&self) -> Option<&NodeInfo> {
        match self {
            ReactiveError::Cycle { node }
            | ReactiveError::ComputationPanicked { node, .. }
            | ReactiveError::EffectPanicked { node, .. }
            | ReactiveError::HookPanicked { node, .. }
            | ReactiveError::FlushOverflow { node, .. } => Some(node),
            _ => None,
        }
    }
}

type ErrorHook = Arc<dyn Fn(&ReactiveError) + Send + Sync>;

static ERROR_HOOK: RwLock<Option<ErrorHook>> = parking_lot::const_rwlock(None);

/// Install the process-wide error hook, replacing any previous one.
///
/// The hook receives every error raised where no synchronous caller exists:
/// effect failures during a flush, failed next-tick and lifecycle callbacks,
/// and flush overflows.
pub fn set_error_hook<F>(hook: F)
where
    F: Fn(&ReactiveError) + Send + Sync + 'static,
{
    *ERROR_HOOK.write() = Some(Arc::new(hook));
}

/// Remove the process-wide error hook.
pub fn clear_error_hook() {
    *ERROR_HOOK.write() = None;
}

/// Log `error` and forward it to the installed hook.
pub(crate) fn report(error: &ReactiveError) {
    tracing::warn!(error = %error, "reactive error");

    // Clone the hook out so it may itself install or clear hooks.
    let hook = ERROR_HOOK.read().clone();
    if let Some(hook) = hook {
        hook(error);
    }
}

/// Extract a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(error) = payload.downcast_ref::<ReactiveError>() {
        error.to_string()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Convert a panic caught while recomputing `node`.
///
/// A payload that is already a `ReactiveError` (a nested computed failed and
/// re-raised) is passed through untouched so the root cause stays visible.
pub(crate) fn from_computation_panic(
    node: &NodeInfo,
    payload: Box<dyn Any + Send>,
) -> ReactiveError {
    match payload.downcast::<ReactiveError>() {
        Ok(error) => *error,
        Err(payload) => ReactiveError::ComputationPanicked {
            node: node.clone(),
            message: panic_message(&*payload),
        },
    }
}
