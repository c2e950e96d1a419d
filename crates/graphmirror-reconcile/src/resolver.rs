//! Existing-instance resolution.
//!
//! Before touching the store, the planner must know which graph nodes a
//! *previous* projection of this record minted. Field values may have
//! changed since (a different license, a renamed publisher), so the new
//! projection's identifiers cannot be trusted to address the old nodes.
//!
//! The record is compiled in probe mode into a skeleton graph whose shape
//! matches any previous projection even where data is now missing. Every
//! non-literal object in the skeleton becomes a query variable; the edge
//! chain from the root down to it becomes a nest of `OPTIONAL` groups
//! (innermost group is the farthest hop, so a missing intermediate does
//! not unbind the whole chain). One `SELECT DISTINCT *` round-trip then
//! recovers all previously emitted instance URIs at once.
//!
//! An all-`OPTIONAL` body yields exactly one row even when nothing
//! matches; more than one row means the store holds several projections
//! for this record's shape and reconciliation cannot proceed.

use std::collections::{BTreeSet, HashMap};

use graphmirror_rdf::sparql::is_prefixed_name;
use graphmirror_rdf::{format_term, LocalGraph, Term, RDF_TYPE};
use graphmirror_store::{SparqlStore, StoreError, StoreResponse};
use graphmirror_template::{compile, Record, SubstitutePlaceholder};
use tracing::debug;

use crate::{ReconcileError, Reconciler};

/// Store instances recovered for one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInstances {
    /// URIs of nested instances a previous projection minted.
    pub uris: BTreeSet<String>,
    /// Skeleton node → resolved store term, for overlaying resolved
    /// identities onto the probe skeleton.
    pub bindings: HashMap<Term, Term>,
}

impl<S: SparqlStore> Reconciler<'_, S> {
    /// Resolve the store instances a previous projection of `record`
    /// minted. The record must already be canonicalized.
    pub fn resolve(&self, record: &Record) -> Result<ResolvedInstances, ReconcileError> {
        let (_, resolved) = self.resolve_with_skeleton(record)?;
        Ok(resolved)
    }

    pub(crate) fn resolve_with_skeleton(
        &self,
        record: &Record,
    ) -> Result<(LocalGraph, ResolvedInstances), ReconcileError> {
        let probe = SubstitutePlaceholder::default();
        let document = compile(
            self.template(),
            record,
            self.registry(),
            self.caches(),
            &probe,
        )?;
        // Compact `@id` spellings get their full form up front so skeleton
        // nodes share one identity with the URIs the store hands back.
        let skeleton = LocalGraph::from_document(&document)?.expand_iris(self.prefixes())?;
        let resolved = self.resolve_skeleton(&skeleton)?;
        Ok((skeleton, resolved))
    }

    fn resolve_skeleton(&self, skeleton: &LocalGraph) -> Result<ResolvedInstances, ReconcileError> {
        let variables = assign_variables(skeleton);
        if variables.is_empty() {
            return Ok(ResolvedInstances::default());
        }

        let query = self.build_resolve_query(skeleton, &variables)?;
        debug!(query, "resolving existing instances");
        let rows = match self.store().execute(&query)? {
            StoreResponse::Bindings(rows) => rows,
            other => {
                return Err(ReconcileError::Store(StoreError::Decode(format!(
                    "resolve query returned {other:?}, expected bindings"
                ))))
            }
        };
        if rows.len() > 1 {
            return Err(ReconcileError::InconsistentGraph(format!(
                "{} conflicting projections found for root {}",
                rows.len(),
                format_term(skeleton.root()),
            )));
        }

        let mut resolved = ResolvedInstances::default();
        let Some(row) = rows.into_iter().next() else {
            return Ok(resolved);
        };
        for (node, var) in &variables {
            // Blank bindings cannot be addressed by later delete clauses;
            // literals would mean the shape drifted. Only IRIs count.
            if let Some(term @ Term::Iri(uri)) = row.get(var) {
                resolved.uris.insert(uri.clone());
                resolved.bindings.insert(node.clone(), term.clone());
            }
        }
        Ok(resolved)
    }

    fn build_resolve_query(
        &self,
        skeleton: &LocalGraph,
        variables: &[(Term, String)],
    ) -> Result<String, ReconcileError> {
        let var_of: HashMap<&Term, &str> = variables
            .iter()
            .map(|(node, var)| (node, var.as_str()))
            .collect();

        let mut used = BTreeSet::new();
        let root = skeleton.root().clone();
        let groups = self.render_groups(
            skeleton,
            &root,
            &format_term(&root),
            &var_of,
            &mut used,
            0,
        )?;

        let header = self.prefixes().header(&used)?;
        let body = groups
            .iter()
            .map(|g| format!("  {g}"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!("{header}\nSELECT DISTINCT * WHERE {{\n{body}\n}}\n"))
    }

    /// One `OPTIONAL` group per instance edge out of `subject`, with the
    /// subject's own groups nested inside.
    fn render_groups(
        &self,
        skeleton: &LocalGraph,
        subject: &Term,
        subject_text: &str,
        var_of: &HashMap<&Term, &str>,
        used: &mut BTreeSet<String>,
        depth: usize,
    ) -> Result<Vec<String>, ReconcileError> {
        if depth >= self.max_hops() {
            return Err(ReconcileError::InconsistentGraph(format!(
                "probe skeleton deeper than {} hops at {}",
                self.max_hops(),
                subject_text,
            )));
        }

        let mut groups = Vec::new();
        for triple in skeleton.triples().iter().filter(|t| &t.subject == subject) {
            let Some(var) = var_of.get(&triple.object) else {
                continue;
            };
            note_prefix(used, &triple.predicate);
            let predicate = predicate_text(&triple.predicate);
            let inner = self.render_groups(
                skeleton,
                &triple.object,
                &format!("?{var}"),
                var_of,
                used,
                depth + 1,
            )?;
            if inner.is_empty() {
                groups.push(format!("OPTIONAL {{ {subject_text} {predicate} ?{var} . }}"));
            } else {
                groups.push(format!(
                    "OPTIONAL {{ {subject_text} {predicate} ?{var} . {} }}",
                    inner.join(" ")
                ));
            }
        }
        Ok(groups)
    }
}

/// Assign one query variable to every resolvable skeleton node: a
/// non-literal object of an instance edge that is not the root. Type
/// declarations point at classes, not instances, and are skipped.
fn assign_variables(skeleton: &LocalGraph) -> Vec<(Term, String)> {
    let root = skeleton.root();
    let mut variables: Vec<(Term, String)> = Vec::new();
    for triple in skeleton.triples() {
        if triple.predicate == RDF_TYPE
            || triple.object.is_literal()
            || &triple.object == root
        {
            continue;
        }
        if variables.iter().any(|(node, _)| node == &triple.object) {
            continue;
        }
        let var = format!("v{}", variables.len());
        variables.push((triple.object.clone(), var));
    }
    variables
}

fn predicate_text(predicate: &str) -> String {
    if is_prefixed_name(predicate) {
        predicate.to_string()
    } else {
        format!("<{predicate}>")
    }
}

fn note_prefix(used: &mut BTreeSet<String>, name: &str) {
    if is_prefixed_name(name) {
        if let Some((prefix, _)) = name.split_once(':') {
            used.insert(prefix.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmirror_rdf::{Literal, Triple};
    use graphmirror_store::MemoryStore;
    use serde_json::json;

    fn template() -> serde_json::Value {
        json!({
            "@id": "eval(stable_uri('http://catalog.example/dataset/', id))",
            "@type": "dcat:Dataset",
            "dct:title": "{title}",
            "dct:license": {"@id": "eval(license_uri(license))"},
            "dcat:distribution": {
                "@id": "eval(stable_uri('http://catalog.example/dist/', id))",
                "@type": "dcat:Distribution",
                "dcat:accessURL": {"@id": "{url}"},
            },
        })
    }

    fn record(id: &str) -> Record {
        Record::from_value(json!({
            "id": id,
            "title": "Housing",
            "license": "cc-by",
            "url": "http://files.example/housing.csv",
        }))
        .unwrap()
    }

    #[test]
    fn empty_store_resolves_to_nothing() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(&store, template());
        let resolved = reconciler.resolve(&record("r1")).unwrap();
        assert!(resolved.uris.is_empty());
        assert!(resolved.bindings.is_empty());
    }

    #[test]
    fn recovers_previous_instances_through_chains() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(&store, template());

        // A previous projection with a different license than the record
        // now carries.
        let (skeleton, _) = reconciler.resolve_with_skeleton(&record("r1")).unwrap();
        let root = skeleton.root().clone();
        let dist = skeleton
            .triples()
            .iter()
            .find(|t| t.predicate == "dcat:distribution")
            .map(|t| t.object.clone())
            .unwrap();
        store.insert_triples([
            Triple::new(
                root.clone(),
                "http://purl.org/dc/terms/license",
                Term::iri("http://license.example/old"),
            ),
            Triple::new(
                root.clone(),
                "http://www.w3.org/ns/dcat#distribution",
                dist.clone(),
            ),
            Triple::new(
                dist.clone(),
                "http://www.w3.org/ns/dcat#accessURL",
                Term::iri("http://files.example/old.csv"),
            ),
        ]);

        // Predicates in the store are full IRIs while the skeleton uses
        // prefixed names; the query's PREFIX header must reconcile them.
        let resolved = reconciler.resolve(&record("r1")).unwrap();
        assert!(resolved.uris.contains("http://license.example/old"));
        assert!(resolved.uris.contains("http://files.example/old.csv"));
        assert!(resolved.uris.contains(dist.as_iri().unwrap()));
        assert_eq!(resolved.uris.len(), 3);
    }

    #[test]
    fn conflicting_projections_are_rejected() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(&store, template());
        let (skeleton, _) = reconciler.resolve_with_skeleton(&record("r1")).unwrap();
        let root = skeleton.root().clone();
        store.insert_triples([
            Triple::new(
                root.clone(),
                "http://purl.org/dc/terms/license",
                Term::iri("http://license.example/a"),
            ),
            Triple::new(
                root.clone(),
                "http://purl.org/dc/terms/license",
                Term::iri("http://license.example/b"),
            ),
        ]);
        assert!(matches!(
            reconciler.resolve(&record("r1")),
            Err(ReconcileError::InconsistentGraph(_))
        ));
    }

    #[test]
    fn compact_root_ids_resolve_against_full_iri_stores() {
        let store = MemoryStore::new();
        let mut prefixes = graphmirror_rdf::PrefixTable::default();
        prefixes.insert("ex", "http://example.org/ns#");
        let template = json!({
            "@id": "ex:{id}",
            "@type": "dcat:Dataset",
            "dct:license": {"@id": "eval(license_uri(license))"},
        });
        let reconciler = Reconciler::new(&store, template).with_prefixes(prefixes);

        // The store only ever sees full IRIs; the compact root spelling in
        // the template must still address the same subject.
        store.insert_triples([Triple::new(
            Term::iri("http://example.org/ns#r1"),
            "http://purl.org/dc/terms/license",
            Term::iri("http://license.example/old"),
        )]);

        let resolved = reconciler.resolve(&record("r1")).unwrap();
        assert!(resolved.uris.contains("http://license.example/old"));
    }

    #[test]
    fn variables_skip_types_literals_and_root() {
        let skeleton = LocalGraph::from_triples(
            Term::iri("http://x/r1"),
            vec![
                Triple::new(
                    Term::iri("http://x/r1"),
                    RDF_TYPE,
                    Term::iri("dcat:Dataset"),
                ),
                Triple::new(
                    Term::iri("http://x/r1"),
                    "dct:title",
                    Term::Literal(Literal::plain("Housing")),
                ),
                Triple::new(
                    Term::iri("http://x/r1"),
                    "dct:license",
                    Term::iri("urn:probe:v0"),
                ),
            ],
        );
        let variables = assign_variables(&skeleton);
        assert_eq!(
            variables,
            vec![(Term::iri("urn:probe:v0"), "v0".to_string())]
        );
    }
}
