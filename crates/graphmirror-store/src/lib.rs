//! Store access for Graphmirror.
//!
//! The wire contract with the triple store is a single operation:
//! [`SparqlStore::execute`] takes query text and returns bindings, a
//! count, or a success marker. Two backends implement it:
//!
//! - [`HttpStore`]: a SPARQL 1.1 endpoint over HTTP, synchronous
//!   request/response (the pipeline has no async overlap by design);
//! - [`MemoryStore`]: an in-memory triple set with an interpreter for
//!   exactly the query subset graphmirror emits, used by tests and demos.
//!
//! All store failures are fatal to the calling step; there is no retry at
//! this layer.

pub mod http;
pub mod memory;
pub mod query;

pub use http::HttpStore;
pub use memory::MemoryStore;

use graphmirror_rdf::Term;
use std::collections::BTreeMap;

/// One SELECT result row: variable name → bound term.
pub type BindingRow = BTreeMap<String, Term>;

/// Result of executing one query or update program.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreResponse {
    /// SELECT rows.
    Bindings(Vec<BindingRow>),
    /// Scalar aggregate (a COUNT-shaped SELECT).
    Count(u64),
    /// Update executed.
    Ok,
}

/// Store access failures. Fatal; the caller decides whether to retry the
/// whole reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("http transport error: {0}")]
    Http(String),
    #[error("endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },
    #[error("cannot decode endpoint response: {0}")]
    Decode(String),
    #[error("unsupported query construct: {0}")]
    UnsupportedQuery(String),
}

/// The single store operation: execute query text, synchronously.
pub trait SparqlStore {
    fn execute(&self, query: &str) -> Result<StoreResponse, StoreError>;
}
