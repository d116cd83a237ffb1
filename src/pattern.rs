//! Partial statements and compiled conjunctive queries.
//!
//! A partial statement is a statement where at least one position is a
//! variable (`?a type Monkey`). A conjunction of partial statements plus
//! optional filters is compiled once into a [`CompiledQuery`], which the
//! graph store evaluates.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KbError, ValidationError};
use crate::term::{tokenize, Namespaces, Term, Triple};

/// Variable bindings of one solution, keyed by variable name without `?`.
pub type Bindings = HashMap<String, Term>;

/// One position of a partial statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternTerm {
    /// Variable name, without the leading `?`.
    Var {
        /// Name without `?`.
        name: String,
    },
    /// Fixed term.
    Bound {
        /// The term, qualified.
        term: Term,
    },
}

impl PatternTerm {
    /// A variable position.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var { name: name.into() }
    }

    /// A fixed resource position.
    #[must_use]
    pub fn resource(id: impl Into<String>) -> Self {
        Self::Bound {
            term: Term::resource(id),
        }
    }

    /// The fixed term, after substituting bound variables.
    #[must_use]
    pub fn resolve<'a>(&'a self, bindings: &'a Bindings) -> Option<&'a Term> {
        match self {
            Self::Bound { term } => Some(term),
            Self::Var { name } => bindings.get(name),
        }
    }

    fn unify(&self, value: &Term, bindings: &mut Bindings) -> bool {
        match self {
            Self::Bound { term } => term == value,
            Self::Var { name } => match bindings.get(name) {
                Some(bound) => bound == value,
                None => {
                    bindings.insert(name.clone(), value.clone());
                    true
                }
            },
        }
    }
}

impl fmt::Display for PatternTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var { name } => write!(f, "?{name}"),
            Self::Bound { term } => write!(f, "{term}"),
        }
    }
}

/// A statement pattern. Parsed patterns have at least one variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialStatement {
    /// Subject position.
    pub subject: PatternTerm,
    /// Predicate position.
    pub predicate: PatternTerm,
    /// Object position.
    pub object: PatternTerm,
}

impl PartialStatement {
    /// Parses `"?a type Monkey"`.
    ///
    /// Exactly three tokens are required and at least one must be a variable.
    pub fn parse(ns: &Namespaces, raw: &str) -> Result<Self, ValidationError> {
        let fail = |reason: String| ValidationError::PatternCompilation {
            pattern: vec![raw.to_string()],
            reason,
        };
        let tokens = tokenize(raw).map_err(|e| fail(e.to_string()))?;
        if tokens.len() != 3 {
            return Err(fail(format!(
                "three tokens are expected in a partial statement, {} found",
                tokens.len()
            )));
        }
        if !tokens.iter().any(|t| t.starts_with('?')) {
            return Err(fail("a partial statement needs at least one variable".to_string()));
        }

        let position = |token: &str, object: bool| -> Result<PatternTerm, ValidationError> {
            if let Some(name) = token.strip_prefix('?') {
                if name.is_empty() {
                    return Err(fail("empty variable name".to_string()));
                }
                return Ok(PatternTerm::var(name));
            }
            let term = if object {
                ns.parse_object(raw, token)
            } else {
                ns.parse_resource(raw, token).map(Term::resource)
            };
            term.map(|term| PatternTerm::Bound { term })
                .map_err(|e| fail(validation_reason(e)))
        };

        Ok(Self {
            subject: position(&tokens[0], false)?,
            predicate: position(&tokens[1], false)?,
            object: position(&tokens[2], true)?,
        })
    }

    /// A fully bound statement, used to test one triple with inference.
    #[must_use]
    pub fn from_triple(triple: &Triple) -> Self {
        Self {
            subject: PatternTerm::resource(triple.subject.as_str()),
            predicate: PatternTerm::resource(triple.predicate.as_str()),
            object: PatternTerm::Bound {
                term: triple.object.clone(),
            },
        }
    }

    /// Extends `bindings` so that this statement matches `triple`.
    #[must_use]
    pub fn unify(&self, triple: &Triple, bindings: &Bindings) -> Option<Bindings> {
        let mut out = bindings.clone();
        let subject = Term::resource(triple.subject.as_str());
        let predicate = Term::resource(triple.predicate.as_str());
        if self.subject.unify(&subject, &mut out)
            && self.predicate.unify(&predicate, &mut out)
            && self.object.unify(&triple.object, &mut out)
        {
            Some(out)
        } else {
            None
        }
    }

    /// Variable names used by this statement.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        [&self.subject, &self.predicate, &self.object]
            .into_iter()
            .filter_map(|t| match t {
                PatternTerm::Var { name } => Some(name.as_str()),
                PatternTerm::Bound { .. } => None,
            })
    }
}

impl fmt::Display for PartialStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// `=` or `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Comparison {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "=" | "==" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            _ => return None,
        })
    }
}

/// Restriction on the value bound to a variable (`?w > 10`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Variable name without `?`.
    pub variable: String,
    /// Operator.
    pub op: Comparison,
    /// Right-hand side.
    pub value: Term,
}

impl Filter {
    /// Parses `?var op value`.
    ///
    /// # Errors
    /// `PatternCompilation` for anything else.
    pub fn parse(ns: &Namespaces, raw: &str) -> Result<Self, ValidationError> {
        let fail = |reason: String| ValidationError::PatternCompilation {
            pattern: vec![raw.to_string()],
            reason,
        };
        let tokens = tokenize(raw).map_err(|e| fail(e.to_string()))?;
        let [var, op, value] = tokens.as_slice() else {
            return Err(fail("a filter reads '?var <op> value'".to_string()));
        };
        let Some(variable) = var.strip_prefix('?').filter(|v| !v.is_empty()) else {
            return Err(fail(format!("'{var}' is not a variable")));
        };
        let Some(op) = Comparison::parse(op) else {
            return Err(fail(format!("unknown comparison operator '{op}'")));
        };
        let value = ns
            .parse_object(raw, value)
            .map_err(|e| fail(validation_reason(e)))?;
        Ok(Self {
            variable: variable.to_string(),
            op,
            value,
        })
    }

    /// True if the solution satisfies the filter. Unbound variables fail.
    #[must_use]
    pub fn accepts(&self, bindings: &Bindings) -> bool {
        let Some(bound) = bindings.get(&self.variable) else {
            return false;
        };
        match compare_terms(bound, &self.value) {
            Some(ord) => match self.op {
                Comparison::Eq => ord == Ordering::Equal,
                Comparison::Ne => ord != Ordering::Equal,
                Comparison::Lt => ord == Ordering::Less,
                Comparison::Le => ord != Ordering::Greater,
                Comparison::Gt => ord == Ordering::Greater,
                Comparison::Ge => ord != Ordering::Less,
            },
            None => match self.op {
                Comparison::Eq => bound == &self.value,
                Comparison::Ne => bound != &self.value,
                _ => false,
            },
        }
    }
}

fn compare_terms(a: &Term, b: &Term) -> Option<Ordering> {
    let (Some(a), Some(b)) = (a.as_literal(), b.as_literal()) else {
        return None;
    };
    match (a.lexical.parse::<f64>(), b.lexical.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y),
        _ => Some(a.lexical.cmp(&b.lexical)),
    }
}

fn validation_reason(err: KbError) -> String {
    match err {
        KbError::Validation(ValidationError::MalformedFact { reason, .. }) => reason,
        other => other.to_string(),
    }
}

/// A conjunction of partial statements with filters, compiled once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    /// Conjuncts, in the order given.
    pub patterns: Vec<PartialStatement>,
    /// Applied to every solution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    variables: BTreeSet<String>,
}

impl CompiledQuery {
    /// Compiles a conjunction of partial statements.
    pub fn compile<S: AsRef<str>>(ns: &Namespaces, patterns: &[S]) -> Result<Self, ValidationError> {
        Self::compile_filtered::<S, &str>(ns, patterns, &[])
    }

    /// Compiles a conjunction of partial statements restricted by filters.
    pub fn compile_filtered<S: AsRef<str>, F: AsRef<str>>(
        ns: &Namespaces,
        patterns: &[S],
        filters: &[F],
    ) -> Result<Self, ValidationError> {
        if patterns.is_empty() {
            return Err(ValidationError::PatternCompilation {
                pattern: Vec::new(),
                reason: "at least one partial statement is required".to_string(),
            });
        }
        let patterns = patterns
            .iter()
            .map(|p| PartialStatement::parse(ns, p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let variables: BTreeSet<String> = patterns
            .iter()
            .flat_map(PartialStatement::variables)
            .map(str::to_string)
            .collect();
        let filters = filters
            .iter()
            .map(|f| Filter::parse(ns, f.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(f) = filters.iter().find(|f| !variables.contains(&f.variable)) {
            return Err(ValidationError::PatternCompilation {
                pattern: patterns.iter().map(ToString::to_string).collect(),
                reason: format!("filter on unknown variable '?{}'", f.variable),
            });
        }
        Ok(Self {
            patterns,
            filters,
            variables,
        })
    }

    /// Builds a query from already-parsed statements, without filters.
    #[must_use]
    pub fn from_patterns(patterns: Vec<PartialStatement>) -> Self {
        let variables = patterns
            .iter()
            .flat_map(PartialStatement::variables)
            .map(str::to_string)
            .collect();
        Self {
            patterns,
            filters: Vec::new(),
            variables,
        }
    }

    /// Variable names, without `?`.
    #[must_use]
    pub fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }

    /// Accepts `?a` or `a`; fails if the variable does not occur.
    pub fn require_variable(&self, variable: &str) -> Result<String, ValidationError> {
        let name = variable.trim().trim_start_matches('?');
        if self.variables.contains(name) {
            Ok(name.to_string())
        } else {
            Err(ValidationError::PatternCompilation {
                pattern: self.patterns.iter().map(ToString::to_string).collect(),
                reason: format!("variable '?{name}' does not occur in the patterns"),
            })
        }
    }

    /// True if every filter accepts the solution.
    #[must_use]
    pub fn accepts(&self, bindings: &Bindings) -> bool {
        self.filters.iter().all(|f| f.accepts(bindings))
    }
}
