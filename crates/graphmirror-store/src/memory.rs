//! Hermetic in-memory store backend.
//!
//! Holds a plain triple set and interprets the parsed query subset with
//! standard left-to-right join semantics. OPTIONAL keeps the input
//! binding when the inner group has no solution; DISTINCT deduplicates
//! rows; COUNT counts solutions without deduplication.

use graphmirror_rdf::{Term, Triple};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::query::{parse_operations, ParsedOp, PatTerm, PatternItem, TriplePattern};
use crate::{BindingRow, SparqlStore, StoreError, StoreResponse};

/// In-memory triple store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    triples: RwLock<Vec<Triple>>,
    /// Scopes blank-node labels per INSERT DATA operation so unrelated
    /// inserts cannot alias each other's anonymous nodes.
    insert_epoch: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed triples directly (test setup).
    pub fn insert_triples(&self, triples: impl IntoIterator<Item = Triple>) {
        let mut guard = self.triples.write();
        for triple in triples {
            if !guard.contains(&triple) {
                guard.push(triple);
            }
        }
    }

    /// Snapshot of the current contents.
    pub fn triples(&self) -> Vec<Triple> {
        self.triples.read().clone()
    }

    pub fn len(&self) -> usize {
        self.triples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.read().is_empty()
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.triples.read().contains(triple)
    }

    fn run_select(
        &self,
        distinct: bool,
        count: Option<String>,
        pattern: &[PatternItem],
    ) -> StoreResponse {
        let triples = self.triples.read();
        let solutions = eval_group(pattern, &triples, vec![BTreeMap::new()]);
        if count.is_some() {
            return StoreResponse::Count(solutions.len() as u64);
        }
        let mut rows: Vec<BindingRow> = solutions;
        if distinct {
            let mut seen = Vec::new();
            rows.retain(|row| {
                if seen.contains(row) {
                    false
                } else {
                    seen.push(row.clone());
                    true
                }
            });
        }
        StoreResponse::Bindings(rows)
    }

    fn run_delete(&self, pattern: &[TriplePattern]) {
        let mut guard = self.triples.write();
        let items: Vec<PatternItem> = pattern
            .iter()
            .cloned()
            .map(PatternItem::Triple)
            .collect();
        let solutions = eval_group(&items, &guard, vec![BTreeMap::new()]);
        let mut doomed = Vec::new();
        for solution in &solutions {
            for tp in pattern {
                if let Some(triple) = instantiate(tp, solution) {
                    if !doomed.contains(&triple) {
                        doomed.push(triple);
                    }
                }
            }
        }
        guard.retain(|t| !doomed.contains(t));
    }

    fn run_insert(&self, triples: &[Triple]) {
        let epoch = self.insert_epoch.fetch_add(1, Ordering::SeqCst);
        let scoped = triples.iter().map(|t| Triple {
            subject: scope_blank(&t.subject, epoch),
            predicate: t.predicate.clone(),
            object: scope_blank(&t.object, epoch),
        });
        self.insert_triples(scoped);
    }
}

fn scope_blank(term: &Term, epoch: u64) -> Term {
    match term {
        Term::Blank(label) => Term::Blank(format!("{label}.{epoch}")),
        other => other.clone(),
    }
}

impl SparqlStore for MemoryStore {
    fn execute(&self, query: &str) -> Result<StoreResponse, StoreError> {
        debug!(query, "memory store executing");
        let ops = parse_operations(query)?;
        let mut response = StoreResponse::Ok;
        for op in ops {
            match op {
                ParsedOp::Select {
                    distinct,
                    count,
                    pattern,
                } => response = self.run_select(distinct, count, &pattern),
                ParsedOp::DeleteWhere { pattern } => self.run_delete(&pattern),
                ParsedOp::InsertData { triples } => self.run_insert(&triples),
            }
        }
        Ok(response)
    }
}

// ============================================================================
// Pattern evaluation
// ============================================================================

fn resolve<'a>(term: &'a PatTerm, binding: &'a BindingRow) -> Option<&'a Term> {
    match term {
        PatTerm::Term(t) => Some(t),
        PatTerm::Var(name) => binding.get(name),
    }
}

fn match_triple(tp: &TriplePattern, triple: &Triple, binding: &BindingRow) -> Option<BindingRow> {
    let mut extended = binding.clone();
    let predicate = predicate_term(triple);
    let positions = [
        (&tp.subject, &triple.subject),
        (&tp.predicate, &predicate),
        (&tp.object, &triple.object),
    ];
    for (pat, actual) in positions {
        match pat {
            PatTerm::Term(expected) => {
                if expected != actual {
                    return None;
                }
            }
            PatTerm::Var(name) => match extended.get(name) {
                Some(bound) if bound != actual => return None,
                Some(_) => {}
                None => {
                    extended.insert(name.clone(), actual.clone());
                }
            },
        }
    }
    Some(extended)
}

fn predicate_term(triple: &Triple) -> Term {
    Term::Iri(triple.predicate.clone())
}

fn eval_group(
    items: &[PatternItem],
    triples: &[Triple],
    input: Vec<BindingRow>,
) -> Vec<BindingRow> {
    let mut current = input;
    for item in items {
        match item {
            PatternItem::Triple(tp) => {
                let mut next = Vec::new();
                for binding in &current {
                    for triple in triples {
                        if let Some(extended) = match_triple(tp, triple, binding) {
                            next.push(extended);
                        }
                    }
                }
                current = next;
            }
            PatternItem::Optional(inner) => {
                let mut next = Vec::new();
                for binding in current {
                    let solutions = eval_group(inner, triples, vec![binding.clone()]);
                    if solutions.is_empty() {
                        next.push(binding);
                    } else {
                        next.extend(solutions);
                    }
                }
                current = next;
            }
        }
        if current.is_empty() {
            break;
        }
    }
    current
}

fn instantiate(tp: &TriplePattern, binding: &BindingRow) -> Option<Triple> {
    let subject = resolve(&tp.subject, binding)?.clone();
    let predicate = match resolve(&tp.predicate, binding)? {
        Term::Iri(iri) => iri.clone(),
        _ => return None,
    };
    let object = resolve(&tp.object, binding)?.clone();
    Some(Triple::new(subject, predicate, object))
}
