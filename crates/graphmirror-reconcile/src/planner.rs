//! Reconciliation planning: path counts, store-wide usage counts, and
//! the resulting delete/insert programs.
//!
//! `local_paths` is always computed against the locally compiled graph,
//! never via a store-side path search; the only live round-trips are the
//! resolve SELECT and one in-degree COUNT per candidate node.

use graphmirror_rdf::sparql::{delete_program, insert_data_program};
use graphmirror_rdf::{DeleteClause, LocalGraph, Term};
use graphmirror_store::{SparqlStore, StoreError, StoreResponse};
use graphmirror_template::{compile, Elide, Record};
use serde_json::Value;
use tracing::debug;

use crate::{ReconcileError, Reconciler};

/// The full outcome of planning an update: the compiled document plus the
/// two programs that replace the record's graph region.
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub document: Value,
    pub clauses: Vec<DeleteClause>,
    pub delete_program: String,
    pub insert_program: String,
}

/// Outcome of planning a removal.
#[derive(Debug, Clone)]
pub struct DeletePlan {
    pub clauses: Vec<DeleteClause>,
    pub program: String,
}

impl<S: SparqlStore> Reconciler<'_, S> {
    /// Plan an update (or first-time creation) of `record`.
    pub fn plan_update(&self, record: &Record) -> Result<UpdatePlan, ReconcileError> {
        let record = prepare(record);
        let (skeleton, existing) = self.resolve_with_skeleton(&record)?;

        let document = compile(
            self.template(),
            &record,
            self.registry(),
            self.caches(),
            &Elide,
        )?;
        let graph = LocalGraph::from_document(&document)?;
        // Path counts and clause targets work on full IRIs; the insert
        // program keeps the template's compact spellings.
        let counts = graph.expand_iris(self.prefixes())?;
        let root = counts.root().clone();
        // Contributed edges come from the projection currently in the
        // store, not the new one, so a drifted intermediate's stale edge
        // into a shared node is still torn down.
        let previous = skeleton.substitute(&existing.bindings);

        let mut candidates: Vec<Term> = existing.uris.iter().map(Term::iri).collect();
        if !candidates.contains(&root) {
            candidates.push(root.clone());
        }
        let mut clauses = self.plan_clauses(&counts, &previous, &candidates)?;
        // The record's own direct statements are always fully replaced.
        push_unique(&mut clauses, DeleteClause::SubjectOf(root));

        let delete_program = delete_program(&clauses, self.prefixes())?;
        let insert_program = insert_data_program(&graph, self.prefixes())?;
        Ok(UpdatePlan {
            document,
            clauses,
            delete_program,
            insert_program,
        })
    }

    /// Plan the removal of `record`'s projection. Counts run against the
    /// existing projection (resolved identities overlaid on the probe
    /// skeleton) since there is no new state.
    pub fn plan_delete(&self, record: &Record) -> Result<DeletePlan, ReconcileError> {
        let record = prepare(record);
        let (skeleton, existing) = self.resolve_with_skeleton(&record)?;
        let graph = skeleton.substitute(&existing.bindings);
        let root = graph.root().clone();

        let mut candidates: Vec<Term> = existing.uris.iter().map(Term::iri).collect();
        if !candidates.contains(&root) {
            candidates.push(root.clone());
        }
        let mut clauses = self.plan_clauses(&graph, &graph, &candidates)?;
        push_unique(&mut clauses, DeleteClause::SubjectOf(root));

        let program = delete_program(&clauses, self.prefixes())?;
        Ok(DeletePlan { clauses, program })
    }

    /// Execute an update plan: delete program, then insert program. A
    /// failure in between is left to the caller's retry.
    pub fn apply_update(&self, plan: &UpdatePlan) -> Result<(), ReconcileError> {
        self.store().execute(&plan.delete_program)?;
        self.store().execute(&plan.insert_program)?;
        Ok(())
    }

    pub fn apply_delete(&self, plan: &DeletePlan) -> Result<(), ReconcileError> {
        self.store().execute(&plan.program)?;
        Ok(())
    }

    /// Plan and apply in one call.
    pub fn reconcile_update(&self, record: &Record) -> Result<UpdatePlan, ReconcileError> {
        let plan = self.plan_update(record)?;
        self.apply_update(&plan)?;
        Ok(plan)
    }

    pub fn reconcile_delete(&self, record: &Record) -> Result<DeletePlan, ReconcileError> {
        let plan = self.plan_delete(record)?;
        self.apply_delete(&plan)?;
        Ok(plan)
    }

    /// `counts` decides how many chains this record holds to each node;
    /// `contributed` is the graph whose concrete edges get deleted when a
    /// node stays shared (the existing projection on update and delete
    /// alike; on a first creation the two coincide).
    fn plan_clauses(
        &self,
        counts: &LocalGraph,
        contributed: &LocalGraph,
        candidates: &[Term],
    ) -> Result<Vec<DeleteClause>, ReconcileError> {
        let mut clauses = Vec::new();
        for node in candidates {
            let local = counts.count_paths(node, self.max_hops())?;
            if local == 0 {
                // Dropped implicitly when the root's own outbound edge to
                // it disappears.
                continue;
            }
            let global = self.usage_count(node)?;
            debug!(node = %graphmirror_rdf::format_term(node), local, global, "candidate counts");

            if global == local as u64 {
                push_unique(&mut clauses, DeleteClause::SubjectOf(node.clone()));
                push_unique(&mut clauses, DeleteClause::ObjectOf(node.clone()));
            } else if global > local as u64 {
                for edge in contributed.path_edges(node, self.max_hops())? {
                    // Anonymous subjects cannot be addressed in a delete
                    // template; their edges go when the parent is deleted.
                    if matches!(edge.subject, Term::Blank(_)) {
                        continue;
                    }
                    push_unique(
                        &mut clauses,
                        DeleteClause::Edge(
                            edge.subject.clone(),
                            edge.predicate.clone(),
                            node.clone(),
                        ),
                    );
                }
            }
            // global < local: the store has not yet seen every edge the
            // new projection adds. Nothing to delete for this node.
        }
        Ok(clauses)
    }

    /// Store-wide in-degree of `node`.
    fn usage_count(&self, node: &Term) -> Result<u64, ReconcileError> {
        let iri = match node {
            Term::Iri(iri) => self.prefixes().expand(iri)?,
            other => {
                return Err(ReconcileError::InconsistentGraph(format!(
                    "usage count requested for non-IRI node {other:?}"
                )))
            }
        };
        let query = format!("SELECT (COUNT(*) AS ?usage) WHERE {{ ?s ?p <{iri}> . }}");
        match self.store().execute(&query)? {
            StoreResponse::Count(count) => Ok(count),
            other => Err(ReconcileError::Store(StoreError::Decode(format!(
                "usage query returned {other:?}, expected a count"
            )))),
        }
    }
}

fn prepare(record: &Record) -> Record {
    let mut record = record.clone();
    record.canonicalize();
    record.strip_empty();
    record
}

fn push_unique(clauses: &mut Vec<DeleteClause>, clause: DeleteClause) {
    if !clauses.contains(&clause) {
        clauses.push(clause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmirror_rdf::{Literal, PrefixTable, Triple};
    use graphmirror_store::MemoryStore;
    use serde_json::json;
    use std::cell::RefCell;

    fn template() -> Value {
        json!({
            "@id": "http://x/{id}",
            "@type": "dcat:Dataset",
            "dct:title": "{title}",
            "dct:license": {"@id": "{license}"},
        })
    }

    fn record(id: &str, license: &str) -> Record {
        Record::from_value(json!({
            "id": id,
            "title": "Housing",
            "license": license,
        }))
        .unwrap()
    }

    #[test]
    fn first_time_creation_only_clears_the_root() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(&store, template());
        let plan = reconciler.plan_update(&record("r1", "http://lic/L")).unwrap();
        assert_eq!(
            plan.clauses,
            vec![DeleteClause::SubjectOf(Term::iri("http://x/r1"))]
        );
        assert!(plan.insert_program.contains("<http://x/r1> a dcat:Dataset"));
        assert!(plan.insert_program.contains("dct:license <http://lic/L>"));
    }

    #[test]
    fn sole_owner_node_is_fully_deleted() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(&store, template());
        reconciler.reconcile_update(&record("r1", "http://lic/L")).unwrap();

        // Only r1 references L, so a re-update tears L down before the
        // insert rebuilds it.
        let plan = reconciler.plan_update(&record("r1", "http://lic/L")).unwrap();
        assert!(plan
            .clauses
            .contains(&DeleteClause::SubjectOf(Term::iri("http://lic/L"))));
        assert!(plan
            .clauses
            .contains(&DeleteClause::ObjectOf(Term::iri("http://lic/L"))));
    }

    #[test]
    fn shared_node_loses_only_this_records_edge() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(&store, template());
        reconciler.reconcile_update(&record("r1", "http://lic/L")).unwrap();
        reconciler.reconcile_update(&record("r2", "http://lic/L")).unwrap();
        reconciler.reconcile_update(&record("r3", "http://lic/L")).unwrap();

        // global_usage(L) is 3, r1 contributes one path: edge-only delete.
        let plan = reconciler.plan_update(&record("r1", "http://lic/L")).unwrap();
        assert!(plan.clauses.contains(&DeleteClause::Edge(
            Term::iri("http://x/r1"),
            "dct:license".into(),
            Term::iri("http://lic/L"),
        )));
        assert!(!plan
            .clauses
            .iter()
            .any(|c| matches!(c, DeleteClause::SubjectOf(t) if t == &Term::iri("http://lic/L"))));
    }

    #[test]
    fn compact_id_nodes_are_reconciled_like_full_ones() {
        let store = MemoryStore::new();
        let mut prefixes = PrefixTable::default();
        prefixes.insert("ex", "http://example.org/ns#");
        let template = json!({
            "@id": "http://x/{id}",
            "@type": "dcat:Dataset",
            "dct:publisher": {"@id": "ex:org", "foaf:name": "{org_name}"},
        });
        let reconciler = Reconciler::new(&store, template).with_prefixes(prefixes);

        let first = Record::from_value(json!({"id": "r1", "org_name": "ACME"})).unwrap();
        reconciler.reconcile_update(&first).unwrap();
        let renamed = Record::from_value(json!({"id": "r1", "org_name": "ACME B.V."})).unwrap();
        let plan = reconciler.reconcile_update(&renamed).unwrap();

        // The publisher is written compactly but owned solely by r1, so it
        // must be counted under its full IRI and fully torn down.
        let org = Term::iri("http://example.org/ns#org");
        assert!(plan.clauses.contains(&DeleteClause::SubjectOf(org.clone())));
        assert!(plan.clauses.contains(&DeleteClause::ObjectOf(org.clone())));
        assert!(store.contains(&Triple::new(
            org.clone(),
            "http://xmlns.com/foaf/0.1/name",
            Term::Literal(Literal::plain("ACME B.V.")),
        )));
        assert!(!store.contains(&Triple::new(
            org,
            "http://xmlns.com/foaf/0.1/name",
            Term::Literal(Literal::plain("ACME")),
        )));
    }

    #[test]
    fn stale_edge_from_a_drifted_intermediate_is_deleted() {
        let store = MemoryStore::new();
        let template = json!({
            "@id": "http://x/{id}",
            "@type": "dcat:Dataset",
            "dcat:distribution": {
                "@id": "http://x/dist/{dist}",
                "dct:license": {"@id": "{license}"},
            },
        });
        let reconciler = Reconciler::new(&store, template);
        let rec = |id: &str, dist: &str| {
            Record::from_value(json!({"id": id, "dist": dist, "license": "http://lic/L"}))
                .unwrap()
        };
        reconciler.reconcile_update(&rec("r1", "d1")).unwrap();
        reconciler.reconcile_update(&rec("r2", "d2")).unwrap();

        // r1's distribution moves to a new identifier. The license stays
        // shared with r2, so only r1's contributed edge goes, and it is
        // the edge the *old* projection holds, not the new one.
        let plan = reconciler.reconcile_update(&rec("r1", "d1b")).unwrap();
        let lic = Term::iri("http://lic/L");
        assert!(plan.clauses.contains(&DeleteClause::Edge(
            Term::iri("http://x/dist/d1"),
            "dct:license".into(),
            lic.clone(),
        )));
        assert!(!plan.clauses.iter().any(|c| matches!(
            c,
            DeleteClause::Edge(s, _, _) if s == &Term::iri("http://x/dist/d1b")
        )));

        let license_edge = |dist: &str| {
            Triple::new(
                Term::iri(dist),
                "http://purl.org/dc/terms/license",
                lic.clone(),
            )
        };
        assert!(!store.contains(&license_edge("http://x/dist/d1")));
        assert!(store.contains(&license_edge("http://x/dist/d1b")));
        assert!(store.contains(&license_edge("http://x/dist/d2")));
    }

    #[test]
    fn delete_plan_uses_the_existing_projection() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(&store, template());
        reconciler.reconcile_update(&record("r1", "http://lic/L")).unwrap();

        // The record has since lost its license field; the old projection
        // still knows about L.
        let bare = Record::from_value(json!({"id": "r1", "title": "Housing"})).unwrap();
        let plan = reconciler.plan_delete(&bare).unwrap();
        assert!(plan
            .clauses
            .contains(&DeleteClause::SubjectOf(Term::iri("http://lic/L"))));
        assert!(plan
            .clauses
            .contains(&DeleteClause::SubjectOf(Term::iri("http://x/r1"))));

        reconciler.apply_delete(&plan).unwrap();
        assert!(store.is_empty());
    }

    /// Pins the choice that path counts never leave the process: the only
    /// COUNT queries sent to the store are plain in-degree probes.
    #[test]
    fn path_counts_stay_local() {
        struct Recording<'a> {
            inner: &'a MemoryStore,
            queries: RefCell<Vec<String>>,
        }
        impl SparqlStore for Recording<'_> {
            fn execute(&self, query: &str) -> Result<StoreResponse, StoreError> {
                self.queries.borrow_mut().push(query.to_string());
                self.inner.execute(query)
            }
        }

        let memory = MemoryStore::new();
        {
            let seed = Reconciler::new(&memory, template());
            seed.reconcile_update(&record("r1", "http://lic/L")).unwrap();
        }

        let store = Recording {
            inner: &memory,
            queries: RefCell::new(Vec::new()),
        };
        let reconciler = Reconciler::new(&store, template());
        reconciler.plan_update(&record("r1", "http://lic/L")).unwrap();

        let queries = store.queries.borrow();
        for query in queries.iter().filter(|q| q.contains("COUNT(")) {
            assert!(
                query.contains("WHERE { ?s ?p <"),
                "unexpected count shape: {query}"
            );
        }
        assert_eq!(queries.iter().filter(|q| q.contains("COUNT(")).count(), 1);
    }
}
