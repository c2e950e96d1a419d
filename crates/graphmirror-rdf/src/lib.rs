//! Local RDF graph materialization and store-native serialization.
//!
//! A compiled JSON-LD document is parsed into an in-memory triple set
//! ([`LocalGraph`]) for local analysis: path counting from the record's
//! root node, the object → owning-triple map the resolver walks, and the
//! concrete edge triples a record contributes to a shared node.
//!
//! The `sparql` module serializes documents (and computed delete clauses)
//! into the store's write syntax: prefixed names, a subject-grouped
//! `INSERT DATA` envelope, and one `DELETE WHERE` operation per clause.

pub mod graph;
pub mod sparql;

pub use graph::LocalGraph;
pub use sparql::{format_term, DeleteClause, PrefixTable};

use serde::{Deserialize, Serialize};

pub const RDF_TYPE: &str = "rdf:type";
pub const XSD_INTEGER: &str = "xsd:integer";
pub const XSD_DECIMAL: &str = "xsd:decimal";
pub const XSD_BOOLEAN: &str = "xsd:boolean";

/// An RDF literal: lexical form plus optional language tag or datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Literal {
    pub lexical: String,
    pub language: Option<String>,
    pub datatype: Option<String>,
}

impl Literal {
    pub fn plain(lexical: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            language: None,
            datatype: None,
        }
    }

    pub fn tagged(lexical: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            language: Some(language.into()),
            datatype: None,
        }
    }

    pub fn typed(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            language: None,
            datatype: Some(datatype.into()),
        }
    }
}

/// An RDF term.
///
/// Blank identifiers are scoped to a single parse ([`LocalGraph`] mints
/// them from its own arena counter); they are never persisted and never
/// compared across parses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    Iri(String),
    Blank(String),
    Literal(Literal),
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri(value.into())
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal(_))
    }
}

/// A subject–predicate–object triple. Subjects are IRIs or blank nodes;
/// predicates are IRIs or prefixed names as written in the template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: Term, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object,
        }
    }
}

/// Fatal graph-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The compiled document cannot be read as a JSON-LD graph.
    #[error("bad document: {0}")]
    BadDocument(String),
    /// Path search exceeded the hop bound; a node with no bounded chain
    /// back to the root indicates a stale or corrupt projection.
    #[error("path search for {node} exceeded {max_hops} hops")]
    PathSearchExceeded { node: String, max_hops: usize },
    /// A prefixed name uses a prefix absent from the prefix table.
    #[error("unknown prefix in {0:?}")]
    UnknownPrefix(String),
}
