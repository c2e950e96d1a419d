//! Store-native write syntax: prefixed names, the bulk `INSERT DATA`
//! envelope, and `DELETE WHERE` programs.

use std::collections::BTreeSet;

use crate::{GraphError, LocalGraph, Literal, Term, RDF_TYPE};

/// Namespace prefix table. Defaults cover the vocabularies the shipped
/// templates use; callers may add their own.
#[derive(Debug, Clone)]
pub struct PrefixTable {
    entries: Vec<(String, String)>,
}

impl Default for PrefixTable {
    fn default() -> Self {
        let defaults = [
            ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
            ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
            ("xsd", "http://www.w3.org/2001/XMLSchema#"),
            ("dct", "http://purl.org/dc/terms/"),
            ("dcat", "http://www.w3.org/ns/dcat#"),
            ("foaf", "http://xmlns.com/foaf/0.1/"),
            ("skos", "http://www.w3.org/2004/02/skos/core#"),
            ("vcard", "http://www.w3.org/2006/vcard/ns#"),
        ];
        Self {
            entries: defaults
                .iter()
                .map(|(p, ns)| (p.to_string(), ns.to_string()))
                .collect(),
        }
    }
}

impl PrefixTable {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) {
        let prefix = prefix.into();
        self.entries.retain(|(p, _)| *p != prefix);
        self.entries.push((prefix, namespace.into()));
    }

    pub fn namespace(&self, prefix: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, ns)| ns.as_str())
    }

    /// Expand a prefixed name to a full IRI; full IRIs pass through.
    pub fn expand(&self, name: &str) -> Result<String, GraphError> {
        let Some((prefix, local)) = name.split_once(':').filter(|_| is_prefixed_name(name)) else {
            return Ok(name.to_string());
        };
        match self.namespace(prefix) {
            Some(ns) => Ok(format!("{ns}{local}")),
            None => Err(GraphError::UnknownPrefix(name.to_string())),
        }
    }

    /// `PREFIX` declarations for exactly the prefixes in `used`.
    pub fn header(&self, used: &BTreeSet<String>) -> Result<String, GraphError> {
        let mut out = String::new();
        for prefix in used {
            let ns = self
                .namespace(prefix)
                .ok_or_else(|| GraphError::UnknownPrefix(format!("{prefix}:")))?;
            out.push_str(&format!("PREFIX {prefix}: <{ns}>\n"));
        }
        Ok(out)
    }
}

/// True for compact `prefix:local` names (as opposed to full IRIs).
pub fn is_prefixed_name(name: &str) -> bool {
    let Some((prefix, local)) = name.split_once(':') else {
        return false;
    };
    if prefix.is_empty()
        || !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return false;
    }
    // Full IRIs and URNs have path-ish or nested-colon locals.
    !local.is_empty() && !local.contains('/') && !local.contains(':')
}

fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn format_literal(literal: &Literal) -> String {
    let quoted = format!("\"{}\"", escape_literal(&literal.lexical));
    if let Some(lang) = &literal.language {
        return format!("{quoted}@{lang}");
    }
    if let Some(dt) = &literal.datatype {
        if is_prefixed_name(dt) {
            return format!("{quoted}^^{dt}");
        }
        return format!("{quoted}^^<{dt}>");
    }
    quoted
}

/// Render a term in SPARQL surface syntax.
pub fn format_term(term: &Term) -> String {
    match term {
        Term::Iri(iri) if is_prefixed_name(iri) => iri.clone(),
        Term::Iri(iri) => format!("<{iri}>"),
        Term::Blank(id) => format!("_:{id}"),
        Term::Literal(literal) => format_literal(literal),
    }
}

fn note_prefix(used: &mut BTreeSet<String>, name: &str) {
    if is_prefixed_name(name) {
        if let Some((prefix, _)) = name.split_once(':') {
            used.insert(prefix.to_string());
        }
    }
}

fn note_term_prefixes(used: &mut BTreeSet<String>, term: &Term) {
    match term {
        Term::Iri(iri) => note_prefix(used, iri),
        Term::Literal(Literal {
            datatype: Some(dt), ..
        }) => note_prefix(used, dt),
        _ => {}
    }
}

// ============================================================================
// Insert program
// ============================================================================

/// Serialize a local graph as a bulk `INSERT DATA` program.
///
/// Triples are grouped by subject in first-appearance order. A subject
/// whose only statement is its `rdf:type` declaration is suppressed — a
/// by-product of elision leaving a typed-but-otherwise-empty node.
pub fn insert_data_program(
    graph: &LocalGraph,
    prefixes: &PrefixTable,
) -> Result<String, GraphError> {
    let mut used = BTreeSet::new();
    let mut groups: Vec<String> = Vec::new();

    for subject in graph.subjects() {
        let statements: Vec<_> = graph
            .triples()
            .iter()
            .filter(|t| &t.subject == subject)
            .collect();
        if statements.iter().all(|t| t.predicate == RDF_TYPE) {
            continue;
        }

        note_term_prefixes(&mut used, subject);
        let mut lines = Vec::with_capacity(statements.len());
        for triple in &statements {
            let predicate = if triple.predicate == RDF_TYPE {
                "a".to_string()
            } else {
                note_prefix(&mut used, &triple.predicate);
                if is_prefixed_name(&triple.predicate) {
                    triple.predicate.clone()
                } else {
                    format!("<{}>", triple.predicate)
                }
            };
            note_term_prefixes(&mut used, &triple.object);
            lines.push(format!("{predicate} {}", format_term(&triple.object)));
        }
        groups.push(format!(
            "  {} {} .",
            format_term(subject),
            lines.join(" ;\n    ")
        ));
    }

    let header = prefixes.header(&used)?;
    let body = groups.join("\n");
    Ok(format!("{header}\nINSERT DATA {{\n{body}\n}}\n"))
}

// ============================================================================
// Delete program
// ============================================================================

/// One `DELETE WHERE` target computed by the reconciliation planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteClause {
    /// All triples where the node is the subject.
    SubjectOf(Term),
    /// All triples where the node is the object.
    ObjectOf(Term),
    /// One specific contributed edge.
    Edge(Term, String, Term),
}

impl DeleteClause {
    fn pattern(&self) -> String {
        match self {
            DeleteClause::SubjectOf(term) => format!("{} ?p ?o .", format_term(term)),
            DeleteClause::ObjectOf(term) => format!("?s ?p {} .", format_term(term)),
            DeleteClause::Edge(subject, predicate, object) => {
                let predicate = if is_prefixed_name(predicate) {
                    predicate.clone()
                } else {
                    format!("<{predicate}>")
                };
                format!(
                    "{} {predicate} {} .",
                    format_term(subject),
                    format_term(object)
                )
            }
        }
    }

    fn note_prefixes(&self, used: &mut BTreeSet<String>) {
        match self {
            DeleteClause::SubjectOf(term) | DeleteClause::ObjectOf(term) => {
                note_term_prefixes(used, term)
            }
            DeleteClause::Edge(subject, predicate, object) => {
                note_term_prefixes(used, subject);
                note_prefix(used, predicate);
                note_term_prefixes(used, object);
            }
        }
    }
}

/// Serialize delete clauses as one combined update program: a grouped
/// prefix header, then one `DELETE WHERE` operation per clause.
pub fn delete_program(
    clauses: &[DeleteClause],
    prefixes: &PrefixTable,
) -> Result<String, GraphError> {
    let mut used = BTreeSet::new();
    for clause in clauses {
        clause.note_prefixes(&mut used);
    }
    let header = prefixes.header(&used)?;
    let operations: Vec<String> = clauses
        .iter()
        .map(|c| format!("DELETE WHERE {{ {} }}", c.pattern()))
        .collect();
    Ok(format!("{header}\n{}\n", operations.join(" ;\n")))
}
