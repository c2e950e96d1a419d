//! SPARQL 1.1 endpoint backend over blocking HTTP.

use graphmirror_rdf::{Literal, Term};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use url::Url;

use crate::{BindingRow, SparqlStore, StoreError, StoreResponse};

/// A SPARQL endpoint. Query and update may live at different URLs
/// (Virtuoso-style `/sparql` vs Fuseki-style `/ds/update`).
#[derive(Debug)]
pub struct HttpStore {
    client: reqwest::blocking::Client,
    query_url: Url,
    update_url: Url,
}

impl HttpStore {
    pub fn new(endpoint: &str) -> Result<Self, StoreError> {
        let url = Url::parse(endpoint).map_err(|e| StoreError::Http(e.to_string()))?;
        Ok(Self {
            client: reqwest::blocking::Client::new(),
            query_url: url.clone(),
            update_url: url,
        })
    }

    pub fn with_update_endpoint(mut self, endpoint: &str) -> Result<Self, StoreError> {
        self.update_url = Url::parse(endpoint).map_err(|e| StoreError::Http(e.to_string()))?;
        Ok(self)
    }

    fn run_query(&self, query: &str) -> Result<StoreResponse, StoreError> {
        let response = self
            .client
            .post(self.query_url.clone())
            .header("Content-Type", "application/sparql-query")
            .header("Accept", "application/sparql-results+json")
            .body(query.to_string())
            .send()
            .map_err(|e| StoreError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StoreError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }

        let results: SparqlResults = response
            .json()
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        decode_results(query, results)
    }

    fn run_update(&self, update: &str) -> Result<StoreResponse, StoreError> {
        let response = self
            .client
            .post(self.update_url.clone())
            .header("Content-Type", "application/sparql-update")
            .body(update.to_string())
            .send()
            .map_err(|e| StoreError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StoreError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }
        Ok(StoreResponse::Ok)
    }
}

impl SparqlStore for HttpStore {
    fn execute(&self, query: &str) -> Result<StoreResponse, StoreError> {
        debug!(query, "http store executing");
        if is_select(query) {
            self.run_query(query)
        } else {
            self.run_update(query)
        }
    }
}

/// The first keyword after any PREFIX header decides the request kind.
fn is_select(query: &str) -> bool {
    query
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.to_ascii_uppercase().starts_with("PREFIX"))
        .map(|line| line.to_ascii_uppercase().starts_with("SELECT"))
        .unwrap_or(false)
}

// ============================================================================
// SPARQL JSON results (https://www.w3.org/TR/sparql11-results-json/)
// ============================================================================

#[derive(Debug, Deserialize)]
struct SparqlResults {
    head: Head,
    results: Results,
}

#[derive(Debug, Deserialize)]
struct Head {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Results {
    bindings: Vec<HashMap<String, RdfJsonTerm>>,
}

#[derive(Debug, Deserialize)]
struct RdfJsonTerm {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    #[serde(rename = "xml:lang")]
    language: Option<String>,
    datatype: Option<String>,
}

fn decode_term(term: RdfJsonTerm) -> Result<Term, StoreError> {
    match term.kind.as_str() {
        "uri" => Ok(Term::Iri(term.value)),
        "bnode" => Ok(Term::Blank(term.value)),
        "literal" | "typed-literal" => Ok(Term::Literal(Literal {
            lexical: term.value,
            language: term.language,
            datatype: term.datatype,
        })),
        other => Err(StoreError::Decode(format!("unknown term type {other:?}"))),
    }
}

fn decode_results(query: &str, results: SparqlResults) -> Result<StoreResponse, StoreError> {
    // A COUNT-shaped SELECT comes back as one row binding one variable to
    // an integer literal.
    if query.to_ascii_uppercase().contains("COUNT(") {
        let row = results.results.bindings.first().ok_or_else(|| {
            StoreError::Decode("COUNT query returned no rows".to_string())
        })?;
        let var = results
            .head
            .vars
            .first()
            .ok_or_else(|| StoreError::Decode("COUNT query has no result variable".to_string()))?;
        let term = row
            .get(var)
            .ok_or_else(|| StoreError::Decode(format!("COUNT variable {var:?} unbound")))?;
        let count = term
            .value
            .parse::<u64>()
            .map_err(|_| StoreError::Decode(format!("non-numeric count {:?}", term.value)))?;
        return Ok(StoreResponse::Count(count));
    }

    let mut rows = Vec::with_capacity(results.results.bindings.len());
    for binding in results.results.bindings {
        let mut row: BindingRow = BTreeMap::new();
        for (var, term) in binding {
            row.insert(var, decode_term(term)?);
        }
        rows.push(row);
    }
    Ok(StoreResponse::Bindings(rows))
}
