//! Test backend that fails on demand.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::memory::FactRecord;
use crate::pattern::{CompiledQuery, PartialStatement, PatternTerm};
use crate::storage::memory::InMemoryGraph;
use crate::storage::traits::{ConsistencyReport, GraphStore, NamedResource, StorageError};
use crate::term::{Term, Triple};

/// Which operations fail. Shared with the test after the graph is boxed.
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub(crate) assert: HashSet<Triple>,
    pub(crate) retract: HashSet<Triple>,
    /// Qualified predicates; any query mentioning one fails.
    pub(crate) query_predicates: HashSet<String>,
}

/// [`InMemoryGraph`] with injectable backend errors.
#[derive(Debug, Default)]
pub(crate) struct FailingGraph {
    inner: InMemoryGraph,
    faults: Arc<Mutex<Faults>>,
}

impl FailingGraph {
    pub(crate) fn faults(&self) -> Arc<Mutex<Faults>> {
        Arc::clone(&self.faults)
    }

    fn fails(&self, check: impl Fn(&Faults) -> bool) -> bool {
        self.faults.lock().map(|f| check(&*f)).unwrap_or(true)
    }

    fn check_query(&self, query: &CompiledQuery) -> Result<(), StorageError> {
        let hit = query.patterns.iter().find_map(|p| match &p.predicate {
            PatternTerm::Bound { term } => term
                .as_resource()
                .filter(|id| self.fails(|f| f.query_predicates.contains(*id))),
            PatternTerm::Var { .. } => None,
        });
        match hit {
            Some(id) => Err(StorageError::Backend(format!("query on {id} failed"))),
            None => Ok(()),
        }
    }
}

impl GraphStore for FailingGraph {
    fn assert_triple(&mut self, triple: &Triple) -> Result<bool, StorageError> {
        if self.fails(|f| f.assert.contains(triple)) {
            return Err(StorageError::Backend(format!("insert of '{triple}' failed")));
        }
        self.inner.assert_triple(triple)
    }

    fn retract_triple(&mut self, triple: &Triple) -> Result<bool, StorageError> {
        if self.fails(|f| f.retract.contains(triple)) {
            return Err(StorageError::Backend(format!("removal of '{triple}' failed")));
        }
        self.inner.retract_triple(triple)
    }

    fn contains(&self, triple: &Triple) -> Result<bool, StorageError> {
        self.inner.contains(triple)
    }

    fn ask(&self, query: &CompiledQuery) -> Result<bool, StorageError> {
        self.check_query(query)?;
        self.inner.ask(query)
    }

    fn select(&self, variable: &str, query: &CompiledQuery) -> Result<HashSet<Term>, StorageError> {
        self.check_query(query)?;
        self.inner.select(variable, query)
    }

    fn matching(&self, pattern: &PartialStatement) -> Result<Vec<Triple>, StorageError> {
        self.inner.matching(pattern)
    }

    fn instances_of(&self, class: &str) -> Result<HashSet<String>, StorageError> {
        self.inner.instances_of(class)
    }

    fn is_functional(&self, predicate: &str) -> Result<bool, StorageError> {
        self.inner.is_functional(predicate)
    }

    fn check_consistency(&self) -> Result<(), ConsistencyReport> {
        self.inner.check_consistency()
    }

    fn named_resources(&self) -> Result<Vec<NamedResource>, StorageError> {
        self.inner.named_resources()
    }

    fn annotate(&mut self, record: &FactRecord) -> Result<(), StorageError> {
        self.inner.annotate(record)
    }

    fn annotation(&self, triple: &Triple) -> Result<Option<FactRecord>, StorageError> {
        self.inner.annotation(triple)
    }

    fn annotations(&self) -> Result<Vec<FactRecord>, StorageError> {
        self.inner.annotations()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
