//! Reconciliation of a record's graph projection against the live store.
//!
//! On every update or delete, the engine must decide which previously
//! emitted graph nodes are now orphaned (remove them) versus still
//! referenced by other records (leave them untouched). The decision is
//! reference counting:
//!
//! - `local_paths`: edge-chains from the record's root to a node within
//!   the freshly compiled *local* graph (cheap, deterministic);
//! - `global_usage`: the node's in-degree across the *entire* store (one
//!   live COUNT per candidate).
//!
//! `global == local` means every reference comes from this record: the
//! node is deleted outright. `global > local` means the node is shared:
//! only the edges this record contributed are deleted.
//!
//! The pipeline is synchronous and single-threaded per record; the host
//! must not reconcile the same record concurrently. A crash between the
//! delete and insert programs leaves the record absent until the
//! operation is retried — idempotent retry is the failure model, not
//! transactional masking.

pub mod planner;
pub mod resolver;

pub use planner::{DeletePlan, UpdatePlan};
pub use resolver::ResolvedInstances;

use graphmirror_rdf::{GraphError, PrefixTable};
use graphmirror_store::{SparqlStore, StoreError};
use graphmirror_template::{HelperCaches, HelperRegistry, TemplateError};
use serde_json::Value;

/// Hop bound for path walks. Template depth is small; anything deeper is
/// a cycle or a corrupt prior projection.
pub const DEFAULT_MAX_HOPS: usize = 32;

/// Fatal reconciliation errors. None of these may leave a partial
/// delete/insert applied by this layer's own doing: the failing step
/// aborts the call before the next program is sent.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The store holds more than one binding set for this record's shape,
    /// or a recorded instance has no bounded path back to the root.
    #[error("inconsistent graph: {0}")]
    InconsistentGraph(String),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("graph error: {0}")]
    Graph(GraphError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GraphError> for ReconcileError {
    fn from(error: GraphError) -> Self {
        match error {
            GraphError::PathSearchExceeded { .. } => {
                ReconcileError::InconsistentGraph(error.to_string())
            }
            other => ReconcileError::Graph(other),
        }
    }
}

/// One reconciliation session: a template, its helper registry and
/// per-session caches, a prefix table, and the store handle.
pub struct Reconciler<'a, S: SparqlStore> {
    store: &'a S,
    template: Value,
    registry: HelperRegistry,
    caches: HelperCaches,
    prefixes: PrefixTable,
    max_hops: usize,
}

impl<'a, S: SparqlStore> Reconciler<'a, S> {
    pub fn new(store: &'a S, template: Value) -> Self {
        Self {
            store,
            template,
            registry: HelperRegistry::default(),
            caches: HelperCaches::new(),
            prefixes: PrefixTable::default(),
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    pub fn with_registry(mut self, registry: HelperRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_prefixes(mut self, prefixes: PrefixTable) -> Self {
        self.prefixes = prefixes;
        self
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn store(&self) -> &S {
        self.store
    }

    pub(crate) fn template(&self) -> &Value {
        &self.template
    }

    pub(crate) fn registry(&self) -> &HelperRegistry {
        &self.registry
    }

    pub(crate) fn caches(&self) -> &HelperCaches {
        &self.caches
    }

    pub(crate) fn prefixes(&self) -> &PrefixTable {
        &self.prefixes
    }

    pub(crate) fn max_hops(&self) -> usize {
        self.max_hops
    }
}
