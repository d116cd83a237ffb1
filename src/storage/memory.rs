//! In-memory graph backend.
//!
//! Reference implementation of [`GraphStore`] for embedded usage and tests.
//! Inference is limited to `rdfs:subClassOf` closure over `rdf:type`, and the
//! consistency check covers `owl:disjointWith` and functional datatype
//! properties. It is not an OWL reasoner.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::memory::FactRecord;
use crate::pattern::{Bindings, CompiledQuery, PartialStatement};
use crate::storage::traits::{ConsistencyReport, GraphStore, NamedResource, ResourceType, StorageError};
use crate::term::{
    FactId, Namespaces, Term, Triple, OWL_CLASS, OWL_DATATYPE_PROPERTY, OWL_DISJOINT_WITH, OWL_FUNCTIONAL_PROPERTY,
    OWL_OBJECT_PROPERTY, RDFS_CLASS, RDFS_LABEL, RDFS_SUBCLASS_OF, RDF_TYPE,
};

/// Triple set indexed by subject and predicate.
#[derive(Debug, Default, Clone)]
pub struct InMemoryGraph {
    triples: HashSet<Triple>,
    by_subject: HashMap<String, HashSet<Triple>>,
    by_predicate: HashMap<String, HashSet<Triple>>,
    annotations: HashMap<FactId, FactRecord>,
}

impl InMemoryGraph {
    /// An empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_predicate(&self, predicate: &str) -> impl Iterator<Item = &Triple> {
        self.by_predicate.get(predicate).into_iter().flatten()
    }

    fn objects_of(&self, subject: &str, predicate: &str) -> impl Iterator<Item = &Term> + '_ {
        let predicate = predicate.to_string();
        self.by_subject
            .get(subject)
            .into_iter()
            .flatten()
            .filter(move |t| t.predicate == predicate)
            .map(|t| &t.object)
    }

    /// Reflexive-transitive closure over `rdfs:subClassOf`, upwards.
    fn superclasses(&self, class: &str) -> HashSet<String> {
        let mut seen = HashSet::from([class.to_string()]);
        let mut stack = vec![class.to_string()];
        while let Some(current) = stack.pop() {
            for parent in self.objects_of(&current, RDFS_SUBCLASS_OF).filter_map(Term::as_resource) {
                if seen.insert(parent.to_string()) {
                    stack.push(parent.to_string());
                }
            }
        }
        seen
    }

    /// Reflexive-transitive closure over `rdfs:subClassOf`, downwards.
    fn subclasses(&self, class: &str) -> HashSet<String> {
        let mut seen = HashSet::from([class.to_string()]);
        let mut stack = vec![class.to_string()];
        while let Some(current) = stack.pop() {
            for t in self.with_predicate(RDFS_SUBCLASS_OF) {
                if t.object.as_resource() == Some(current.as_str()) && seen.insert(t.subject.clone()) {
                    stack.push(t.subject.clone());
                }
            }
        }
        seen
    }

    fn is_known_class(&self, class: &str) -> bool {
        let declared = self
            .objects_of(class, RDF_TYPE)
            .any(|o| matches!(o.as_resource(), Some(OWL_CLASS | RDFS_CLASS)));
        declared
            || self.with_predicate(RDF_TYPE).any(|t| t.object.as_resource() == Some(class))
            || self
                .with_predicate(RDFS_SUBCLASS_OF)
                .any(|t| t.subject == class || t.object.as_resource() == Some(class))
    }

    fn instances(&self, class: &str) -> HashSet<String> {
        let classes = self.subclasses(class);
        self.with_predicate(RDF_TYPE)
            .filter(|t| t.object.as_resource().is_some_and(|c| classes.contains(c)))
            .map(|t| t.subject.clone())
            .collect()
    }

    /// Candidate triples for a statement under the current bindings,
    /// including `rdf:type` statements entailed by the class hierarchy.
    fn candidates(&self, pattern: &PartialStatement, bindings: &Bindings) -> Vec<Triple> {
        let subject = pattern.subject.resolve(bindings).and_then(Term::as_resource);
        let predicate = pattern.predicate.resolve(bindings).and_then(Term::as_resource);

        let asserted: Box<dyn Iterator<Item = &Triple> + '_> = match (subject, predicate) {
            (Some(s), _) => Box::new(self.by_subject.get(s).into_iter().flatten()),
            (None, Some(p)) => Box::new(self.with_predicate(p)),
            (None, None) => Box::new(self.triples.iter()),
        };

        let mut out: HashSet<Triple> = HashSet::new();
        for t in asserted {
            if predicate.is_some_and(|p| p != t.predicate) {
                continue;
            }
            if t.predicate == RDF_TYPE {
                if let Some(class) = t.object.as_resource() {
                    for sup in self.superclasses(class) {
                        out.insert(Triple::new(t.subject.clone(), RDF_TYPE, Term::resource(sup)));
                    }
                    continue;
                }
            }
            out.insert(t.clone());
        }
        out.into_iter().collect()
    }

    fn solutions(&self, query: &CompiledQuery) -> Vec<Bindings> {
        let mut partial = vec![Bindings::new()];
        for pattern in &query.patterns {
            let mut next = Vec::new();
            for bindings in &partial {
                for triple in self.candidates(pattern, bindings) {
                    if let Some(extended) = pattern.unify(&triple, bindings) {
                        next.push(extended);
                    }
                }
            }
            if next.is_empty() {
                return next;
            }
            partial = next;
        }
        partial.retain(|b| query.accepts(b));
        partial
    }

    fn declared(&self, vocabulary: &str) -> HashSet<String> {
        self.with_predicate(RDF_TYPE)
            .filter(|t| t.object.as_resource() == Some(vocabulary))
            .map(|t| t.subject.clone())
            .collect()
    }

    fn index(&mut self, triple: &Triple) {
        self.by_subject
            .entry(triple.subject.clone())
            .or_default()
            .insert(triple.clone());
        self.by_predicate
            .entry(triple.predicate.clone())
            .or_default()
            .insert(triple.clone());
    }

    fn unindex(&mut self, triple: &Triple) {
        if let Some(set) = self.by_subject.get_mut(&triple.subject) {
            set.remove(triple);
            if set.is_empty() {
                self.by_subject.remove(&triple.subject);
            }
        }
        if let Some(set) = self.by_predicate.get_mut(&triple.predicate) {
            set.remove(triple);
            if set.is_empty() {
                self.by_predicate.remove(&triple.predicate);
            }
        }
    }
}

impl GraphStore for InMemoryGraph {
    fn assert_triple(&mut self, triple: &Triple) -> Result<bool, StorageError> {
        if !self.triples.insert(triple.clone()) {
            return Ok(false);
        }
        self.index(triple);
        Ok(true)
    }

    fn retract_triple(&mut self, triple: &Triple) -> Result<bool, StorageError> {
        if !self.triples.remove(triple) {
            return Ok(false);
        }
        self.unindex(triple);
        self.annotations.remove(&triple.id());
        Ok(true)
    }

    fn contains(&self, triple: &Triple) -> Result<bool, StorageError> {
        Ok(self.triples.contains(triple))
    }

    fn ask(&self, query: &CompiledQuery) -> Result<bool, StorageError> {
        Ok(!self.solutions(query).is_empty())
    }

    fn select(&self, variable: &str, query: &CompiledQuery) -> Result<HashSet<Term>, StorageError> {
        Ok(self
            .solutions(query)
            .into_iter()
            .filter_map(|mut b| b.remove(variable))
            .collect())
    }

    fn matching(&self, pattern: &PartialStatement) -> Result<Vec<Triple>, StorageError> {
        let empty = Bindings::new();
        let subject = pattern.subject.resolve(&empty).and_then(Term::as_resource);
        let predicate = pattern.predicate.resolve(&empty).and_then(Term::as_resource);
        let asserted: Box<dyn Iterator<Item = &Triple> + '_> = match (subject, predicate) {
            (Some(s), _) => Box::new(self.by_subject.get(s).into_iter().flatten()),
            (None, Some(p)) => Box::new(self.with_predicate(p)),
            (None, None) => Box::new(self.triples.iter()),
        };
        Ok(asserted
            .filter(|t| pattern.unify(t, &empty).is_some())
            .cloned()
            .collect())
    }

    fn instances_of(&self, class: &str) -> Result<HashSet<String>, StorageError> {
        if !self.is_known_class(class) {
            return Err(StorageError::Unknown {
                what: "class",
                id: class.to_string(),
            });
        }
        Ok(self.instances(class))
    }

    fn is_functional(&self, predicate: &str) -> Result<bool, StorageError> {
        Ok(self
            .objects_of(predicate, RDF_TYPE)
            .any(|o| o.as_resource() == Some(OWL_FUNCTIONAL_PROPERTY)))
    }

    fn check_consistency(&self) -> Result<(), ConsistencyReport> {
        let mut violations = Vec::new();

        for t in self.with_predicate(OWL_DISJOINT_WITH) {
            let Some(other) = t.object.as_resource() else {
                continue;
            };
            let left = self.instances(&t.subject);
            let right = self.instances(other);
            let mut both: Vec<&String> = left.intersection(&right).collect();
            both.sort();
            for individual in both {
                violations.push(format!(
                    "{individual} is an instance of disjoint classes {} and {other}",
                    t.subject
                ));
            }
        }

        for property in self.declared(OWL_FUNCTIONAL_PROPERTY) {
            let mut values: BTreeMap<&str, HashSet<&Term>> = BTreeMap::new();
            for t in self.with_predicate(&property).filter(|t| t.object.is_literal()) {
                values.entry(t.subject.as_str()).or_default().insert(&t.object);
            }
            for (subject, objects) in values {
                if objects.len() > 1 {
                    violations.push(format!(
                        "functional property {property} has {} values for {subject}",
                        objects.len()
                    ));
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConsistencyReport { violations })
        }
    }

    fn named_resources(&self) -> Result<Vec<NamedResource>, StorageError> {
        let object_properties = self.declared(OWL_OBJECT_PROPERTY);
        let datatype_properties = self.declared(OWL_DATATYPE_PROPERTY);

        let mut classes: HashSet<String> = self.declared(OWL_CLASS);
        classes.extend(self.declared(RDFS_CLASS));
        for t in self.with_predicate(RDF_TYPE) {
            if let Some(c) = t.object.as_resource() {
                classes.insert(c.to_string());
            }
        }
        for t in self.with_predicate(RDFS_SUBCLASS_OF) {
            classes.insert(t.subject.clone());
            if let Some(c) = t.object.as_resource() {
                classes.insert(c.to_string());
            }
        }

        let mut ids: HashSet<&str> = HashSet::new();
        for t in &self.triples {
            ids.insert(&t.subject);
            if let Some(o) = t.object.as_resource() {
                ids.insert(o);
            }
        }
        for c in &classes {
            ids.insert(c);
        }

        let mut out: Vec<NamedResource> = ids
            .into_iter()
            .filter(|id| !Namespaces::is_vocabulary(id))
            .map(|id| {
                let kind = if classes.contains(id) {
                    ResourceType::Class
                } else if object_properties.contains(id) {
                    ResourceType::ObjectProperty
                } else if datatype_properties.contains(id) {
                    ResourceType::DatatypeProperty
                } else if self.objects_of(id, RDF_TYPE).next().is_some() {
                    ResourceType::Instance
                } else {
                    ResourceType::Undefined
                };
                let labels = self
                    .objects_of(id, RDFS_LABEL)
                    .filter_map(Term::as_literal)
                    .cloned()
                    .collect();
                NamedResource {
                    id: id.to_string(),
                    kind,
                    labels,
                }
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn annotate(&mut self, record: &FactRecord) -> Result<(), StorageError> {
        if !self.triples.contains(&record.fact) {
            return Err(StorageError::Unknown {
                what: "statement",
                id: record.fact.to_string(),
            });
        }
        self.annotations.insert(record.fact.id(), record.clone());
        Ok(())
    }

    fn annotation(&self, triple: &Triple) -> Result<Option<FactRecord>, StorageError> {
        Ok(self.annotations.get(&triple.id()).cloned())
    }

    fn annotations(&self) -> Result<Vec<FactRecord>, StorageError> {
        let mut out: Vec<FactRecord> = self.annotations.values().cloned().collect();
        out.sort_by(|a, b| a.fact.cmp(&b.fact));
        Ok(out)
    }

    fn len(&self) -> usize {
        self.triples.len()
    }
}
