//! Memory manager: per-fact expiry governed by memory profiles.
//!
//! Non-permanent facts are recorded with their creation time and profile.
//! A background [`Sweeper`] periodically asks the knowledge base to remove
//! every fact whose TTL has elapsed, in one batched write section.

mod manager;
mod profile;
mod sweeper;

pub use manager::{FactRecord, MemoryConfig, MemoryManager};
pub use profile::MemoryProfile;
pub use sweeper::{SweepTarget, Sweeper};
