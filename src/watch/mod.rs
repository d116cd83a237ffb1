//! Watcher engine: registration and edge-triggered notification.
//!
//! A watcher observes either a boolean fact pattern or a set of instances.
//! After each committed mutation every watcher is re-evaluated and fires only
//! on a state transition, according to its [`TriggerMode`].

mod consumer;
mod engine;
mod types;

pub use consumer::{ChannelConsumer, EventConsumer, WatchStream};
pub use engine::{dispatch, Notification, WatcherEngine};
pub use types::{EventKind, PatternKind, TriggerMode, WatchEvent, WatchPattern, WatcherId};
