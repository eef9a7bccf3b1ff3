//! Cascade Core
//!
//! This crate provides the reactive state and update-scheduling substrate for
//! a component-based UI layer. It implements:
//!
//! - Reactive cells (signals) with dependency tracking
//! - Lazily cached derived values (computeds)
//! - Effects whose re-runs are batched into one flush per scheduling tick
//! - A next-tick queue that observes fully flushed state
//! - Instance scopes with deterministic teardown and lifecycle hooks
//!
//! Rendering, templating, and DOM event dispatch are left to the layers
//! built on top: a renderer registers one effect per component, a template
//! evaluator reads signals and computeds, and lifecycle wiring decides when
//! each phase of a scope fires.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Node identities and the dependency edges between them
//! - `reactive`: Tracking, primitives, scheduler, and scopes
//! - `error`: Error taxonomy and the process-wide error hook
//! - `config`: Runtime configuration
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use cascade_core::reactive::{cell, computed, effect, tick};
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let a = cell(1);
//! let b = computed({
//!     let a = a.clone();
//!     move || a.get() * 2
//! });
//! let _render = effect({
//!     let (b, log) = (b.clone(), log.clone());
//!     move || log.borrow_mut().push(b.get())
//! });
//!
//! a.set(2);
//! // Nothing yet: the effect runs on the next flush.
//! assert_eq!(*log.borrow(), vec![2]);
//!
//! tick().unwrap();
//! assert_eq!(*log.borrow(), vec![2, 4]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{clear_error_hook, set_error_hook, ReactiveError};
