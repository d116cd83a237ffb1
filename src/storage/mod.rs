//! Graph storage for orokb.
//!
//! [`GraphStore`] is the abstract fact store; [`SharedGraph`] wraps one in
//! scoped read/write sections; [`InMemoryGraph`] is the reference backend.

#[cfg(test)]
mod failing;
mod memory;
mod section;
mod traits;

#[cfg(test)]
pub(crate) use failing::{FailingGraph, Faults};
pub use memory::InMemoryGraph;
pub use section::SharedGraph;
pub use traits::{ConsistencyReport, GraphStore, NamedResource, ResourceType, StorageError};
