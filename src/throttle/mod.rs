//! Admission control subsystem.
//!
//! Two enforcement layers behind one pipeline stage:
//!
//! - [`ConcurrentAccessController`] — a counting semaphore bounding
//!   simultaneously in-flight requests per throttle group.
//!
//! - [`AccessController`] over per-scope [`ThrottleContext`]s — sliding
//!   per-caller rate windows, grouped by domain or IP.
//!
//! [`ThrottleMediator`] resolves the group's [`ThrottlePolicy`] (inline or
//! dynamically reloaded via a [`PolicySource`](crate::traits::PolicySource)),
//! consults both layers, and routes the outcome to its on-accept/on-reject
//! continuation.

pub mod access;
pub mod concurrency;
pub mod mediator;
pub mod policy;

pub use access::{AccessController, ThrottleContext, ThrottleScope};
pub use concurrency::{Access, ConcurrentAccessController};
pub use mediator::{PolicySpec, ThrottleConfig, ThrottleMediator};
pub use policy::{
    CallerRule, OTHER_CALLERS_KEY, PolicyStatus, ThrottleGroup, ThrottlePolicy, ThrottleState,
};
