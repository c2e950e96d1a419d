//! Declarative JSON-LD projection of catalog records.
//!
//! A catalog record (a JSON map of field name → value) is turned into a
//! JSON-LD document by walking a declarative mapping template:
//!
//! - scalar leaves are either literal strings with `{field}` placeholders,
//!   or whole-value `eval(<expression>)` forms evaluated against the record
//!   and a registry of pure helper functions;
//! - `@`-prefixed keys (`@id`, `@type`, `@value`, `@language`) carry the
//!   usual linked-data semantics and are otherwise structurally inert.
//!
//! Compilation runs in one of two modes, modeled as strategy objects:
//!
//! - **value mode** (`Elide`): real data; attributes whose value reduces to
//!   the empty sentinel are deleted from the document;
//! - **probe mode** (`SubstitutePlaceholder`): missing data is replaced by a
//!   distinguishable sentinel literal so the document *shape* is preserved,
//!   suitable for parsing into a skeleton graph.
//!
//! Expression failures never abort compilation of the surrounding document;
//! structurally malformed templates fail fast.

pub mod compiler;
pub mod expr;
pub mod helpers;
pub mod record;

pub use compiler::{
    compile, is_probe_value, CompiledValue, Elide, OnMissingValue, SubstitutePlaceholder,
    TemplateError, PROBE_PREFIX,
};
pub use expr::{evaluate, interpolate, parse_expr, EvalFailure, Expr};
pub use helpers::{HelperCaches, HelperError, HelperRegistry};
pub use record::Record;
