//! In-memory triple graph parsed from one compiled JSON-LD document.

use serde_json::Value;
use std::collections::HashMap;

use crate::sparql::PrefixTable;
use crate::{GraphError, Literal, Term, Triple, RDF_TYPE, XSD_BOOLEAN, XSD_DECIMAL, XSD_INTEGER};

/// One record's local graph projection.
///
/// The root is the document's top-level `@id` subject (the catalogue
/// node). Blank-node identifiers come from an arena counter owned by the
/// parse and are meaningless outside this graph.
#[derive(Debug, Clone)]
pub struct LocalGraph {
    root: Term,
    triples: Vec<Triple>,
}

impl LocalGraph {
    /// Parse a compiled JSON-LD document.
    ///
    /// Tolerates bare literal-language objects (`{"@value", "@language"}`),
    /// nested anonymous structures, and scalar literals; the document root
    /// must be an object carrying `@id`.
    pub fn from_document(document: &Value) -> Result<Self, GraphError> {
        let obj = document
            .as_object()
            .ok_or_else(|| GraphError::BadDocument("document root must be an object".into()))?;
        if !matches!(obj.get("@id"), Some(Value::String(s)) if !s.is_empty()) {
            return Err(GraphError::BadDocument(
                "document root must carry a non-empty @id".into(),
            ));
        }

        let mut parser = Parser::default();
        let root = parser.parse_node(obj)?;
        Ok(Self {
            root,
            triples: parser.triples,
        })
    }

    /// Build a graph directly from triples (test and substitution support).
    pub fn from_triples(root: Term, triples: Vec<Triple>) -> Self {
        Self { root, triples }
    }

    pub fn root(&self) -> &Term {
        &self.root
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    /// Distinct subjects in first-appearance order.
    pub fn subjects(&self) -> Vec<&Term> {
        let mut seen = Vec::new();
        for triple in &self.triples {
            if !seen.contains(&&triple.subject) {
                seen.push(&triple.subject);
            }
        }
        seen
    }

    /// Triples in which `term` appears as the object — the
    /// object → owning-triple map the resolver walks back to the root.
    pub fn owning_triples(&self, term: &Term) -> Vec<&Triple> {
        self.triples.iter().filter(|t| &t.object == term).collect()
    }

    pub fn is_object(&self, term: &Term) -> bool {
        self.triples.iter().any(|t| &t.object == term)
    }

    /// Number of directed edge-chains from the root to `node` within this
    /// graph. Zero when the node is unreachable or absent; an error when
    /// the walk exceeds `max_hops` (a cycle or corrupt projection).
    pub fn count_paths(&self, node: &Term, max_hops: usize) -> Result<usize, GraphError> {
        if node == &self.root {
            return Ok(0);
        }
        self.count_paths_rec(node, 0, max_hops)
    }

    fn count_paths_rec(
        &self,
        node: &Term,
        depth: usize,
        max_hops: usize,
    ) -> Result<usize, GraphError> {
        if depth >= max_hops {
            return Err(GraphError::PathSearchExceeded {
                node: format!("{node:?}"),
                max_hops,
            });
        }
        let mut total = 0;
        for owner in self.owning_triples(node) {
            if owner.subject == self.root {
                total += 1;
            } else {
                total += self.count_paths_rec(&owner.subject, depth + 1, max_hops)?;
            }
        }
        Ok(total)
    }

    /// The final-hop triples `(s, p, node)` lying on each chain from the
    /// root to `node` — the edges this record contributes to the node.
    pub fn path_edges(&self, node: &Term, max_hops: usize) -> Result<Vec<&Triple>, GraphError> {
        let mut edges = Vec::new();
        for owner in self.owning_triples(node) {
            let on_chain = owner.subject == self.root
                || self.count_paths(&owner.subject, max_hops)? > 0;
            if on_chain {
                edges.push(owner);
            }
        }
        Ok(edges)
    }

    /// Expand compact IRI terms to their full form, giving every node one
    /// canonical spelling regardless of how the template wrote its `@id`s.
    /// Stores hold full IRIs, so path counts and delete clauses must not
    /// treat `ex:org` and its expansion as different nodes.
    pub fn expand_iris(&self, prefixes: &PrefixTable) -> Result<LocalGraph, GraphError> {
        let expand = |term: &Term| -> Result<Term, GraphError> {
            match term {
                Term::Iri(iri) => Ok(Term::Iri(prefixes.expand(iri)?)),
                other => Ok(other.clone()),
            }
        };
        let mut triples = Vec::with_capacity(self.triples.len());
        for triple in &self.triples {
            triples.push(Triple::new(
                expand(&triple.subject)?,
                triple.predicate.clone(),
                expand(&triple.object)?,
            ));
        }
        Ok(LocalGraph {
            root: expand(&self.root)?,
            triples,
        })
    }

    /// Rewrite terms through a substitution map, producing a new graph.
    /// Used to overlay resolved store URIs onto a probe skeleton.
    pub fn substitute(&self, map: &HashMap<Term, Term>) -> LocalGraph {
        let swap = |term: &Term| map.get(term).cloned().unwrap_or_else(|| term.clone());
        let triples = self
            .triples
            .iter()
            .map(|t| Triple::new(swap(&t.subject), t.predicate.clone(), swap(&t.object)))
            .collect();
        LocalGraph {
            root: swap(&self.root),
            triples,
        }
    }
}

#[derive(Default)]
struct Parser {
    triples: Vec<Triple>,
    blank_counter: usize,
}

impl Parser {
    fn fresh_blank(&mut self) -> Term {
        let id = self.blank_counter;
        self.blank_counter += 1;
        Term::Blank(format!("b{id}"))
    }

    fn parse_node(
        &mut self,
        obj: &serde_json::Map<String, Value>,
    ) -> Result<Term, GraphError> {
        let subject = match obj.get("@id") {
            Some(Value::String(iri)) if !iri.is_empty() => Term::Iri(iri.clone()),
            Some(other) if !other.is_string() => {
                return Err(GraphError::BadDocument(format!(
                    "@id must be a string, got {other}"
                )))
            }
            _ => self.fresh_blank(),
        };

        for (key, value) in obj {
            match key.as_str() {
                "@id" | "@context" => {}
                "@type" => self.parse_types(&subject, value)?,
                _ => self.parse_attribute(&subject, key, value)?,
            }
        }
        Ok(subject)
    }

    fn parse_types(&mut self, subject: &Term, value: &Value) -> Result<(), GraphError> {
        let types: Vec<&str> = match value {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .ok_or_else(|| GraphError::BadDocument(format!("non-string @type: {v}")))
                })
                .collect::<Result<_, _>>()?,
            other => {
                return Err(GraphError::BadDocument(format!(
                    "@type must be a string or list, got {other}"
                )))
            }
        };
        for ty in types {
            self.triples.push(Triple::new(
                subject.clone(),
                RDF_TYPE,
                Term::Iri(ty.to_string()),
            ));
        }
        Ok(())
    }

    fn parse_attribute(
        &mut self,
        subject: &Term,
        predicate: &str,
        value: &Value,
    ) -> Result<(), GraphError> {
        match value {
            Value::Null => Ok(()),
            Value::Array(items) => {
                for item in items {
                    self.parse_attribute(subject, predicate, item)?;
                }
                Ok(())
            }
            Value::Object(obj) => {
                if obj.contains_key("@value") {
                    let literal = parse_value_object(obj)?;
                    self.triples.push(Triple::new(
                        subject.clone(),
                        predicate,
                        Term::Literal(literal),
                    ));
                } else {
                    let child = self.parse_node(obj)?;
                    self.triples
                        .push(Triple::new(subject.clone(), predicate, child));
                }
                Ok(())
            }
            Value::String(s) => {
                self.triples.push(Triple::new(
                    subject.clone(),
                    predicate,
                    Term::Literal(Literal::plain(s.clone())),
                ));
                Ok(())
            }
            Value::Number(n) => {
                let datatype = if n.is_i64() || n.is_u64() {
                    XSD_INTEGER
                } else {
                    XSD_DECIMAL
                };
                self.triples.push(Triple::new(
                    subject.clone(),
                    predicate,
                    Term::Literal(Literal::typed(n.to_string(), datatype)),
                ));
                Ok(())
            }
            Value::Bool(b) => {
                self.triples.push(Triple::new(
                    subject.clone(),
                    predicate,
                    Term::Literal(Literal::typed(b.to_string(), XSD_BOOLEAN)),
                ));
                Ok(())
            }
        }
    }
}

fn parse_value_object(obj: &serde_json::Map<String, Value>) -> Result<Literal, GraphError> {
    let lexical = match obj.get("@value") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        other => {
            return Err(GraphError::BadDocument(format!(
                "@value must be a scalar, got {other:?}"
            )))
        }
    };
    let language = match obj.get("@language") {
        Some(Value::String(lang)) if !lang.is_empty() => Some(lang.clone()),
        Some(other) => {
            return Err(GraphError::BadDocument(format!(
                "@language must be a non-empty string, got {other}"
            )))
        }
        None => None,
    };
    let datatype = match obj.get("@type") {
        Some(Value::String(dt)) => Some(dt.clone()),
        Some(other) => {
            return Err(GraphError::BadDocument(format!(
                "literal @type must be a string, got {other}"
            )))
        }
        None => None,
    };
    Ok(Literal {
        lexical,
        language,
        datatype,
    })
}
