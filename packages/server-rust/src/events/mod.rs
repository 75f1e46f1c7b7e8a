//! Event propagation with two explicit subscriber classes.
//!
//! A [`SyncSubscriber`] runs inline with the publisher's context and so
//! inside the publisher's open transaction scope. A [`DeferredSubscriber`]
//! runs later on its own task with a detached context and never sees the
//! publisher's scope; it must re-fetch anything it needs by id.

pub mod bus;

pub use bus::{DeferredDispatch, DeferredSubscriber, EventBus, SyncSubscriber};
