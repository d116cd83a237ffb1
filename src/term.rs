//! RDF-ish terms, triples, and the statement parser.
//!
//! Resources are identified by namespace-qualified strings (`oro:baboon`,
//! `rdf:type`). Literals carry an optional language tag or datatype.
//! Statements are written as three whitespace-separated tokens; quoted
//! literals may contain spaces.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KbError, KbResult};

/// Class membership.
pub const RDF_TYPE: &str = "rdf:type";
/// Human-readable name of a resource.
pub const RDFS_LABEL: &str = "rdfs:label";
/// Subclass relation, transitive.
pub const RDFS_SUBCLASS_OF: &str = "rdfs:subClassOf";
/// Marks a resource as a class.
pub const RDFS_CLASS: &str = "rdfs:Class";
/// Marks a resource as a class.
pub const OWL_CLASS: &str = "owl:Class";
/// Top class.
pub const OWL_THING: &str = "owl:Thing";
/// Property between resources.
pub const OWL_OBJECT_PROPERTY: &str = "owl:ObjectProperty";
/// Property with literal values.
pub const OWL_DATATYPE_PROPERTY: &str = "owl:DatatypeProperty";
/// Property with at most one value per subject.
pub const OWL_FUNCTIONAL_PROPERTY: &str = "owl:FunctionalProperty";
/// No resource is an instance of both classes.
pub const OWL_DISJOINT_WITH: &str = "owl:disjointWith";
/// Two ids name one resource.
pub const OWL_SAME_AS: &str = "owl:sameAs";
/// Two ids name distinct resources.
pub const OWL_DIFFERENT_FROM: &str = "owl:differentFrom";

/// Integer literal datatype.
pub const XSD_INT: &str = "xsd:int";
/// Floating point literal datatype.
pub const XSD_DOUBLE: &str = "xsd:double";
/// Boolean literal datatype.
pub const XSD_BOOLEAN: &str = "xsd:boolean";

const WELL_KNOWN_PREFIXES: [&str; 4] = ["rdf", "rdfs", "owl", "xsd"];

const TOKEN_PATTERN: &str =
    r#""[^"]*"(?:@[A-Za-z][A-Za-z0-9-]*|\^\^\S+)?|'[^']*'(?:@[A-Za-z][A-Za-z0-9-]*|\^\^\S+)?|\S+"#;

fn token_regex() -> KbResult<&'static Regex> {
    static TOKENS: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    TOKENS
        .get_or_init(|| Regex::new(TOKEN_PATTERN))
        .as_ref()
        .map_err(|e| KbError::internal(format!("statement tokenizer: {e}")))
}

/// Splits a raw statement into tokens, keeping quoted literals whole.
pub fn tokenize(raw: &str) -> KbResult<Vec<String>> {
    let re = token_regex()?;
    Ok(re
        .find_iter(raw.trim())
        .map(|m| m.as_str().to_string())
        .collect())
}

/// A literal value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Literal {
    /// Lexical form, without quotes.
    pub lexical: String,
    /// Language tag (`en`, `fr`), for plain literals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Qualified datatype (`xsd:int`), for typed literals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

/// Object position of a triple: a resource or a literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Term {
    /// A qualified resource id.
    Resource {
        /// Qualified id, e.g. `oro:cup`.
        id: String,
    },
    /// A literal value.
    Literal(Literal),
}

impl Term {
    /// A resource term from an already-qualified id.
    #[must_use]
    pub fn resource(id: impl Into<String>) -> Self {
        Self::Resource { id: id.into() }
    }

    /// A plain literal without language tag.
    #[must_use]
    pub fn plain(lexical: impl Into<String>) -> Self {
        Self::Literal(Literal {
            lexical: lexical.into(),
            lang: None,
            datatype: None,
        })
    }

    /// A language-tagged literal.
    #[must_use]
    pub fn tagged(lexical: impl Into<String>, lang: impl Into<String>) -> Self {
        Self::Literal(Literal {
            lexical: lexical.into(),
            lang: Some(lang.into()),
            datatype: None,
        })
    }

    /// A typed literal.
    #[must_use]
    pub fn typed(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::Literal(Literal {
            lexical: lexical.into(),
            lang: None,
            datatype: Some(datatype.into()),
        })
    }

    /// The resource id, if this is a resource.
    #[must_use]
    pub fn as_resource(&self) -> Option<&str> {
        match self {
            Self::Resource { id } => Some(id),
            Self::Literal(_) => None,
        }
    }

    /// The literal, if this is one.
    #[must_use]
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Self::Literal(lit) => Some(lit),
            Self::Resource { .. } => None,
        }
    }

    /// True for literals.
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource { id } => write!(f, "{id}"),
            Self::Literal(lit) => match (&lit.lang, &lit.datatype) {
                (Some(lang), _) => write!(f, "\"{}\"@{lang}", lit.lexical),
                (None, Some(dt)) if dt == XSD_INT || dt == XSD_DOUBLE || dt == XSD_BOOLEAN => {
                    write!(f, "{}", lit.lexical)
                }
                (None, Some(dt)) => write!(f, "\"{}\"^^{dt}", lit.lexical),
                (None, None) => write!(f, "\"{}\"", lit.lexical),
            },
        }
    }
}

/// Stable handle of a triple: the blake3 digest of its canonical form.
///
/// The same triple always yields the same id, across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId([u8; 32]);

impl FactId {
    /// The id of `triple`.
    #[must_use]
    pub fn of(triple: &Triple) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(triple.subject.as_bytes());
        hasher.update(&[0]);
        hasher.update(triple.predicate.as_bytes());
        hasher.update(&[0]);
        match &triple.object {
            Term::Resource { id } => {
                hasher.update(b"r");
                hasher.update(id.as_bytes());
            }
            Term::Literal(lit) => {
                hasher.update(b"l");
                hasher.update(lit.lexical.as_bytes());
                hasher.update(&[0]);
                hasher.update(lit.lang.as_deref().unwrap_or_default().as_bytes());
                hasher.update(&[0]);
                hasher.update(lit.datatype.as_deref().unwrap_or_default().as_bytes());
            }
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Raw digest.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", blake3::Hash::from(self.0).to_hex())
    }
}

/// One subject-predicate-object statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    /// Qualified subject id.
    pub subject: String,
    /// Qualified predicate id.
    pub predicate: String,
    /// Resource or literal.
    pub object: Term,
}

impl Triple {
    /// A triple from already-qualified parts.
    #[must_use]
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }

    /// See [`FactId::of`].
    #[must_use]
    pub fn id(&self) -> FactId {
        FactId::of(self)
    }

    /// Every resource id the triple mentions.
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        [Some(self.subject.as_str()), Some(self.predicate.as_str()), self.object.as_resource()]
            .into_iter()
            .flatten()
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// Prefix handling for resource identifiers.
///
/// Unprefixed tokens are qualified with the default prefix; the prefixes
/// `rdf`, `rdfs`, `owl` and `xsd` are always recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    default_prefix: String,
}

impl Namespaces {
    /// Namespaces with `default_prefix` for bare tokens.
    #[must_use]
    pub fn new(default_prefix: impl Into<String>) -> Self {
        Self {
            default_prefix: default_prefix.into(),
        }
    }

    /// Prefix given to bare tokens.
    #[must_use]
    pub fn default_prefix(&self) -> &str {
        &self.default_prefix
    }

    /// Qualifies a bare token with the default prefix.
    ///
    /// The bare predicate `type` is an alias for `rdf:type`.
    #[must_use]
    pub fn qualify(&self, token: &str) -> String {
        if token == "type" {
            return RDF_TYPE.to_string();
        }
        if token.contains(':') {
            return token.to_string();
        }
        format!("{}:{token}", self.default_prefix)
    }

    /// Strips the default prefix for display (`oro:baboon` -> `baboon`).
    #[must_use]
    pub fn light(&self, id: &str) -> String {
        id.strip_prefix(&self.default_prefix)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(id)
            .to_string()
    }

    /// Local part of a qualified id.
    #[must_use]
    pub fn local_name(id: &str) -> &str {
        id.rsplit_once(':').map_or(id, |(_, local)| local)
    }

    /// True for ids under `rdf:`, `rdfs:`, `owl:` or `xsd:`.
    #[must_use]
    pub fn is_vocabulary(id: &str) -> bool {
        id.split_once(':')
            .is_some_and(|(prefix, _)| WELL_KNOWN_PREFIXES.contains(&prefix))
    }

    /// Parses `"subject predicate object"` into a triple.
    pub fn parse_statement(&self, raw: &str) -> KbResult<Triple> {
        let tokens = tokenize(raw)?;
        if tokens.len() != 3 {
            return Err(KbError::malformed(
                raw,
                format!("three tokens are expected in a statement, {} found", tokens.len()),
            ));
        }
        let subject = self.parse_resource(raw, &tokens[0])?;
        let predicate = self.parse_resource(raw, &tokens[1])?;
        let object = self.parse_object(raw, &tokens[2])?;
        Ok(Triple {
            subject,
            predicate,
            object,
        })
    }

    pub(crate) fn parse_resource(&self, raw: &str, token: &str) -> KbResult<String> {
        if is_quoted(token) {
            return Err(KbError::malformed(
                raw,
                format!("literal '{token}' cannot be used as subject or predicate"),
            ));
        }
        if token.starts_with('?') {
            return Err(KbError::malformed(raw, format!("unexpected variable '{token}'")));
        }
        Ok(self.qualify(token))
    }

    pub(crate) fn parse_object(&self, raw: &str, token: &str) -> KbResult<Term> {
        if token.starts_with('?') {
            return Err(KbError::malformed(raw, format!("unexpected variable '{token}'")));
        }
        if let Some((lexical, datatype)) = token.split_once("^^") {
            let datatype = datatype.trim_start_matches('<').trim_end_matches('>');
            if datatype.is_empty() {
                return Err(KbError::malformed(raw, "empty datatype"));
            }
            return Ok(Term::typed(unquote(lexical), self.qualify(datatype)));
        }
        if is_quoted(token) {
            return Ok(Term::plain(unquote(token)));
        }
        if let Some((lexical, lang)) = token.rsplit_once('@') {
            if is_quoted(lexical) {
                return Ok(Term::tagged(unquote(lexical), lang.to_ascii_lowercase()));
            }
        }
        match token {
            "true" | "false" => return Ok(Term::typed(token, XSD_BOOLEAN)),
            _ => {}
        }
        if token.parse::<i64>().is_ok() {
            return Ok(Term::typed(token, XSD_INT));
        }
        if token.contains('.') && token.parse::<f64>().is_ok() {
            return Ok(Term::typed(token, XSD_DOUBLE));
        }
        Ok(Term::resource(self.qualify(token)))
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::new("oro")
    }
}

fn is_quoted(token: &str) -> bool {
    token.len() >= 2
        && ((token.starts_with('"') && token.ends_with('"'))
            || (token.starts_with('\'') && token.ends_with('\'')))
}

fn unquote(token: &str) -> String {
    if is_quoted(token) {
        token[1..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}
