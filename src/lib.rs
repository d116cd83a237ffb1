//! # orokb - a knowledge base core for robots
//!
//! orokb keeps a robot's symbolic model of the world as a graph of
//! subject/predicate/object facts and lets the rest of the robot react to it.
//!
//! ## Core Concepts
//!
//! - **KnowledgeBase**: the mutation coordinator; every change goes through it
//! - **MemoryProfile**: how long an asserted fact lives before it is forgotten
//! - **LookupCache**: label and identifier lookup over the named resources
//! - **Watcher**: an edge-triggered subscription to a fact pattern or a class
//! - **AgentRegistry**: one independent model per agent the robot knows about
//!
//! ## Usage
//!
//! ```rust,ignore
//! use orokb::{KnowledgeBase, KnowledgeConfig, MemoryProfile, TriggerMode, WatchPattern};
//!
//! let kb = KnowledgeBase::new(KnowledgeConfig::default())?;
//! let sub = kb.subscribe(&WatchPattern::facts(["?x isOn table"], TriggerMode::OnBecomeTrue))?;
//!
//! kb.assert_str("cup isOn table", MemoryProfile::Episodic, false)?;
//! let event = sub.stream.recv();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agents;
pub mod config;
pub mod engine;
pub mod error;
pub mod lookup;
pub mod memory;
pub mod pattern;
pub mod storage;
pub mod term;
pub mod watch;

// Re-export primary types at crate root for convenience
pub use agents::{AgentRegistry, RevisionPolicy, MYSELF};
pub use config::{AgentConfig, KnowledgeConfig, WatchConfig};
pub use engine::{KnowledgeBase, Subscription};
pub use error::{ExecutionError, KbError, KbResult, ValidationError};
pub use lookup::{LookupCache, LookupEntry};
pub use memory::{FactRecord, MemoryConfig, MemoryProfile};
pub use pattern::{CompiledQuery, Filter, PartialStatement, PatternTerm};
pub use storage::{ConsistencyReport, GraphStore, InMemoryGraph, ResourceType, StorageError};
pub use term::{FactId, Literal, Namespaces, Term, Triple};
pub use watch::{
    ChannelConsumer, EventConsumer, EventKind, PatternKind, TriggerMode, WatchEvent, WatchPattern, WatchStream,
    WatcherId,
};
