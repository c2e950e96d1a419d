//! Integration tests for the complete Graphmirror pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - record → Template Compiler → JSON-LD document
//! - document → Local Graph → insert program → store
//! - probe skeleton → Resolver → Planner → delete program → store
//!
//! Run with: cargo test --test integration_tests

use graphmirror_rdf::{Term, Triple};
use graphmirror_reconcile::Reconciler;
use graphmirror_store::MemoryStore;
use graphmirror_template::{compile, Elide, HelperCaches, HelperRegistry, Record};
use serde_json::json;
use std::collections::HashSet;

const DCT_LICENSE: &str = "http://purl.org/dc/terms/license";
const DCT_TITLE: &str = "http://purl.org/dc/terms/title";

fn catalog_template() -> serde_json::Value {
    json!({
        "@id": "http://catalog.example/dataset/{id}",
        "@type": "dcat:Dataset",
        "dct:title": {"@value": "{title}", "@language": "en"},
        "dct:license": {"@id": "{license}"},
        "dct:publisher": {
            "@id": "http://catalog.example/org/{org}",
            "@type": "foaf:Organization",
            "foaf:name": "{org_name}",
        },
    })
}

fn dataset(id: &str, license: &str, org: &str) -> Record {
    Record::from_value(json!({
        "id": id,
        "title": format!("Dataset {id}"),
        "license": license,
        "org": org,
        "org_name": format!("Org {org}"),
    }))
    .expect("record is an object")
}

fn root_of(id: &str) -> Term {
    Term::iri(format!("http://catalog.example/dataset/{id}"))
}

/// Sweep-and-verify: every remaining triple must hang off a live root.
fn assert_no_orphans(store: &MemoryStore, roots: &[Term]) {
    let triples = store.triples();
    let mut reachable: HashSet<Term> = roots.iter().cloned().collect();
    loop {
        let mut grew = false;
        for triple in &triples {
            if reachable.contains(&triple.subject)
                && !triple.object.is_literal()
                && reachable.insert(triple.object.clone())
            {
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    for triple in &triples {
        assert!(
            reachable.contains(&triple.subject),
            "orphaned subject: {triple:?}"
        );
        if !triple.object.is_literal() {
            assert!(
                reachable.contains(&triple.object),
                "orphaned object: {triple:?}"
            );
        }
    }
}

// ============================================================================
// Template compilation
// ============================================================================

#[test]
fn test_compile_minimal_record() {
    let template = json!({"@id": "http://x/{id}", "dct:title": "{title}"});
    let record = Record::from_value(json!({"id": "r1", "title": "Housing"})).unwrap();
    let document = compile(
        &template,
        &record,
        &HelperRegistry::default(),
        &HelperCaches::new(),
        &Elide,
    )
    .expect("compiles");
    assert_eq!(
        document,
        json!({"@id": "http://x/r1", "dct:title": "Housing"})
    );
}

#[test]
fn test_missing_field_elides_attribute() {
    let template = json!({"@id": "http://x/{id}", "dct:title": "{title}"});
    let record = Record::from_value(json!({"id": "r1"})).unwrap();
    let document = compile(
        &template,
        &record,
        &HelperRegistry::default(),
        &HelperCaches::new(),
        &Elide,
    )
    .expect("compiles");
    // The title key is absent, not present as an empty string.
    assert_eq!(document, json!({"@id": "http://x/r1"}));
}

// ============================================================================
// Create / update round-trips
// ============================================================================

#[test]
fn test_create_inserts_full_projection() {
    let store = MemoryStore::new();
    let reconciler = Reconciler::new(&store, catalog_template());
    reconciler
        .reconcile_update(&dataset("a", "http://license.example/X", "acme"))
        .expect("creation succeeds");

    let root = root_of("a");
    assert!(store.contains(&Triple::new(
        root.clone(),
        DCT_TITLE,
        Term::Literal(graphmirror_rdf::Literal::tagged("Dataset a", "en")),
    )));
    assert!(store.contains(&Triple::new(
        root.clone(),
        DCT_LICENSE,
        Term::iri("http://license.example/X"),
    )));
    assert!(store.contains(&Triple::new(
        Term::iri("http://catalog.example/org/acme"),
        "http://xmlns.com/foaf/0.1/name",
        Term::Literal(graphmirror_rdf::Literal::plain("Org acme")),
    )));
}

#[test]
fn test_update_is_idempotent() {
    let store = MemoryStore::new();
    let reconciler = Reconciler::new(&store, catalog_template());
    let record = dataset("a", "http://license.example/X", "acme");

    reconciler.reconcile_update(&record).expect("create");
    let mut first: Vec<Triple> = store.triples();
    first.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));

    reconciler.reconcile_update(&record).expect("re-update");
    let mut second: Vec<Triple> = store.triples();
    second.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));

    assert_eq!(first, second);
}

#[test]
fn test_rename_addresses_new_identity() {
    let record = Record::from_value(json!({
        "id": "old-name",
        "rename_to": "new-name",
        "title": "Renamed",
    }))
    .unwrap();
    let store = MemoryStore::new();
    let reconciler = Reconciler::new(&store, catalog_template());
    let plan = reconciler.plan_update(&record).expect("plan");
    assert!(plan
        .insert_program
        .contains("<http://catalog.example/dataset/new-name>"));
    assert!(!plan.insert_program.contains("old-name"));
}

// ============================================================================
// Reference counting across records
// ============================================================================

#[test]
fn test_shared_node_survives_first_delete_then_goes() {
    let store = MemoryStore::new();
    let reconciler = Reconciler::new(&store, catalog_template());
    let a = dataset("a", "http://license.example/X", "org-a");
    let b = dataset("b", "http://license.example/X", "org-b");
    reconciler.reconcile_update(&a).expect("create a");
    reconciler.reconcile_update(&b).expect("create b");

    let x = Term::iri("http://license.example/X");

    // Deleting A leaves X with exactly B's edge.
    reconciler.reconcile_delete(&a).expect("delete a");
    assert!(store.contains(&Triple::new(root_of("b"), DCT_LICENSE, x.clone())));
    assert!(!store.contains(&Triple::new(root_of("a"), DCT_LICENSE, x.clone())));
    assert!(!store.triples().iter().any(|t| t.subject == root_of("a")));

    // Deleting B removes X entirely.
    reconciler.reconcile_delete(&b).expect("delete b");
    assert!(!store
        .triples()
        .iter()
        .any(|t| t.subject == x || t.object == x));
    assert!(store.is_empty());
}

#[test]
fn test_shared_license_update_removes_only_this_records_edge() {
    let store = MemoryStore::new();
    let reconciler = Reconciler::new(&store, catalog_template());
    for id in ["r1", "r2", "r3"] {
        reconciler
            .reconcile_update(&dataset(
                id,
                "http://license.example/L",
                &format!("org-{id}"),
            ))
            .expect("create");
    }

    let l = Term::iri("http://license.example/L");
    let mut before: Vec<Triple> = store.triples();
    before.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));

    // global_usage(L) is 3 and r1 contributes one path, so the plan touches
    // the (r1, dct:license, L) edge and nothing else of L.
    let plan = reconciler
        .plan_update(&dataset("r1", "http://license.example/L", "org-r1"))
        .expect("plan");
    assert!(plan
        .delete_program
        .contains("<http://catalog.example/dataset/r1> dct:license <http://license.example/L>"));
    assert!(!plan
        .delete_program
        .contains("<http://license.example/L> ?p ?o"));

    reconciler.apply_update(&plan).expect("apply");
    let mut after: Vec<Triple> = store.triples();
    after.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    assert_eq!(before, after);
    assert_eq!(store.triples().iter().filter(|t| t.object == l).count(), 3);
}

#[test]
fn test_no_orphans_after_mixed_operations() {
    let store = MemoryStore::new();
    let reconciler = Reconciler::new(&store, catalog_template());
    let a = dataset("a", "http://license.example/X", "org-a");
    let b = dataset("b", "http://license.example/X", "org-b");
    reconciler.reconcile_update(&a).expect("create a");
    reconciler.reconcile_update(&b).expect("create b");

    // A drops its license; X must keep B's edge.
    let a_without_license = Record::from_value(json!({
        "id": "a",
        "title": "Dataset a",
        "org": "org-a",
        "org_name": "Org org-a",
    }))
    .unwrap();
    reconciler
        .reconcile_update(&a_without_license)
        .expect("update a");
    assert!(store.contains(&Triple::new(
        root_of("b"),
        DCT_LICENSE,
        Term::iri("http://license.example/X"),
    )));
    assert_no_orphans(&store, &[root_of("a"), root_of("b")]);

    // B goes away; X was only B's by now and goes with it.
    reconciler.reconcile_delete(&b).expect("delete b");
    assert!(!store
        .triples()
        .iter()
        .any(|t| t.object == Term::iri("http://license.example/X")));
    assert_no_orphans(&store, &[root_of("a")]);
}

// ============================================================================
// Delete-only flow
// ============================================================================

#[test]
fn test_delete_clears_sole_record_completely() {
    let store = MemoryStore::new();
    let reconciler = Reconciler::new(&store, catalog_template());
    let record = dataset("solo", "http://license.example/S", "org-solo");
    reconciler.reconcile_update(&record).expect("create");
    assert!(!store.is_empty());

    reconciler.reconcile_delete(&record).expect("delete");
    assert!(store.is_empty());
}

#[test]
fn test_delete_resolves_stale_field_values() {
    // The record's license changed after the projection was written; the
    // delete must still find and remove the *old* license edge.
    let store = MemoryStore::new();
    let reconciler = Reconciler::new(&store, catalog_template());
    reconciler
        .reconcile_update(&dataset("a", "http://license.example/OLD", "org-a"))
        .expect("create");

    let drifted = dataset("a", "http://license.example/NEW", "org-a");
    reconciler.reconcile_delete(&drifted).expect("delete");
    assert!(store.is_empty());
}
