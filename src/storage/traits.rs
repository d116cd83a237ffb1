//! Abstract storage traits for orokb.
//!
//! The graph store is the collaborator that owns the triples and performs
//! pattern evaluation and inference. The core only reaches it through
//! [`GraphStore`], always from inside a read or write section of
//! [`crate::storage::SharedGraph`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::FactRecord;
use crate::pattern::{CompiledQuery, PartialStatement};
use crate::term::{Literal, Term, Triple};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend failed or its lock was poisoned.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A resource the request depends on is unknown to the store.
    #[error("Unknown {what}: {id}")]
    Unknown {
        /// Kind of resource.
        what: &'static str,
        /// Its qualified id.
        id: String,
    },
}

/// Inconsistencies found by [`GraphStore::check_consistency`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("inconsistent model: {}", violations.join("; "))]
pub struct ConsistencyReport {
    /// One line per violated axiom.
    pub violations: Vec<String>,
}

/// Kind of a named resource, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    /// A class.
    Class,
    /// A member of some class.
    Instance,
    /// A property linking resources.
    ObjectProperty,
    /// A property with literal values.
    DatatypeProperty,
    /// None of the above.
    Undefined,
}

impl ResourceType {
    /// Lenient parse, `Undefined` for unrecognised names.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "class" => Self::Class,
            "instance" => Self::Instance,
            "object_property" | "objectproperty" => Self::ObjectProperty,
            "datatype_property" | "datatypeproperty" => Self::DatatypeProperty,
            _ => Self::Undefined,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Class => "CLASS",
            Self::Instance => "INSTANCE",
            Self::ObjectProperty => "OBJECT_PROPERTY",
            Self::DatatypeProperty => "DATATYPE_PROPERTY",
            Self::Undefined => "UNDEFINED",
        };
        f.write_str(s)
    }
}

/// A non-anonymous resource with its kind and labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedResource {
    /// Qualified id.
    pub id: String,
    /// What the store knows it to be.
    pub kind: ResourceType,
    /// `rdfs:label` values.
    pub labels: Vec<Literal>,
}

/// Storage trait for the fact graph.
///
/// Mutations take `&mut self`: the caller guarantees exclusivity through the
/// write section. Reads take `&self` and may run concurrently.
pub trait GraphStore: Send + Sync {
    /// Inserts a triple. Returns false when it was already present.
    fn assert_triple(&mut self, triple: &Triple) -> Result<bool, StorageError>;

    /// Removes a triple and its annotation. Returns false when it was absent.
    fn retract_triple(&mut self, triple: &Triple) -> Result<bool, StorageError>;

    /// True if the exact triple is asserted.
    fn contains(&self, triple: &Triple) -> Result<bool, StorageError>;

    /// True if at least one solution of the query exists.
    fn ask(&self, query: &CompiledQuery) -> Result<bool, StorageError>;

    /// Values bound to `variable` over all solutions of the query.
    fn select(&self, variable: &str, query: &CompiledQuery) -> Result<HashSet<Term>, StorageError>;

    /// Asserted statements matching one partial statement.
    fn matching(&self, pattern: &PartialStatement) -> Result<Vec<Triple>, StorageError>;

    /// Instances of a class, subclasses included.
    ///
    /// # Errors
    /// `Unknown` if the class is not known to the store.
    fn instances_of(&self, class: &str) -> Result<HashSet<String>, StorageError>;

    /// True if the predicate is declared `owl:FunctionalProperty`.
    fn is_functional(&self, predicate: &str) -> Result<bool, StorageError>;

    /// Checks global consistency of the current model.
    fn check_consistency(&self) -> Result<(), ConsistencyReport>;

    /// Every named resource with its kind and labels.
    fn named_resources(&self) -> Result<Vec<NamedResource>, StorageError>;

    /// Stores the memory profile and creation time of an asserted triple,
    /// replacing any earlier annotation. Annotations are not triples: they
    /// are invisible to queries and to [`GraphStore::len`].
    ///
    /// # Errors
    /// `Unknown` if the triple is not asserted.
    fn annotate(&mut self, record: &FactRecord) -> Result<(), StorageError>;

    /// The annotation of a triple, if any.
    fn annotation(&self, triple: &Triple) -> Result<Option<FactRecord>, StorageError>;

    /// Every annotation in the store.
    fn annotations(&self) -> Result<Vec<FactRecord>, StorageError>;

    /// Number of asserted triples.
    fn len(&self) -> usize;

    /// True when no triple is asserted.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compile-time check that the trait stays object safe.
#[allow(dead_code)]
fn _assert_object_safe(_: &dyn GraphStore) {}
