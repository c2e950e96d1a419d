//! The template compiler: depth-first walk of a declarative JSON-LD
//! template, substituting record values and eliding empty branches.
//!
//! The value-mode / probe-mode duality is a strategy object
//! ([`OnMissingValue`]) rather than a boolean threaded through the
//! recursion: [`Elide`] deletes attributes whose value reduced to the
//! empty sentinel, [`SubstitutePlaceholder`] replaces them with a unique
//! probe literal so the document shape survives.

use serde_json::{Map, Value};
use std::cell::Cell;
use tracing::warn;

use crate::expr::{evaluate, interpolate, parse_expr, EvalFailure};
use crate::helpers::{HelperCaches, HelperRegistry};
use crate::record::{type_name, Record};

/// Prefix of probe-mode sentinel literals. Never produced by real data.
pub const PROBE_PREFIX: &str = "urn:probe:v";

/// True for values minted by probe-mode compilation.
pub fn is_probe_value(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.starts_with(PROBE_PREFIX))
}

/// Fatal template/record structure errors. Expression failures are *not*
/// represented here — they degrade to the empty sentinel instead.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// Structural template bug: a leaf that is not a string, object, or
    /// list. Caller error; fail fast.
    #[error("malformed template: {0}")]
    MalformedTemplate(String),
    /// The record handed over by the host is not a JSON object.
    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

/// Result of compiling one template node.
///
/// `Empty` is the EMPTY_FIELD sentinel: distinct from `null`, `""`, and
/// "attribute absent". It propagates upward until an enclosing attribute
/// is elided (value mode) or substituted (probe mode).
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledValue {
    Empty,
    Value(Value),
}

/// Strategy for attributes whose evaluation failed, and for whether empty
/// results are elided from the parent.
pub trait OnMissingValue {
    /// Called when a scalar attribute failed to evaluate.
    fn on_missing(&self, failure: &EvalFailure) -> CompiledValue;

    /// Whether empty results are deleted from their parent.
    fn elides(&self) -> bool;
}

/// Value mode: real data; empty results disappear from the document.
#[derive(Debug, Default)]
pub struct Elide;

impl OnMissingValue for Elide {
    fn on_missing(&self, _failure: &EvalFailure) -> CompiledValue {
        CompiledValue::Empty
    }

    fn elides(&self) -> bool {
        true
    }
}

/// Probe mode: missing data is tolerated and replaced by a unique sentinel
/// literal so every attribute stays present.
///
/// Sentinels are unique per substitution (counter scoped to one compile
/// call): distinct nested nodes whose `@id` depends on missing fields must
/// not collapse into one skeleton node.
#[derive(Debug, Default)]
pub struct SubstitutePlaceholder {
    counter: Cell<u64>,
}

impl OnMissingValue for SubstitutePlaceholder {
    fn on_missing(&self, _failure: &EvalFailure) -> CompiledValue {
        let n = self.counter.get();
        self.counter.set(n + 1);
        CompiledValue::Value(Value::String(format!("{PROBE_PREFIX}{n}")))
    }

    fn elides(&self) -> bool {
        false
    }
}

const EVAL_OPEN: &str = "eval(";

/// Compile a template against a record.
///
/// If the outer template compiles to a single-element list the document is
/// unwrapped to that element; nested sub-templates retain list form.
pub fn compile(
    template: &Value,
    record: &Record,
    registry: &HelperRegistry,
    caches: &HelperCaches,
    mode: &dyn OnMissingValue,
) -> Result<Value, TemplateError> {
    let compiled = compile_node(template, record, registry, caches, mode)?;
    let value = match compiled {
        CompiledValue::Value(v) => v,
        // An entirely-empty document still has a defined JSON form.
        CompiledValue::Empty => Value::Object(Map::new()),
    };
    Ok(match value {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    })
}

fn compile_node(
    node: &Value,
    record: &Record,
    registry: &HelperRegistry,
    caches: &HelperCaches,
    mode: &dyn OnMissingValue,
) -> Result<CompiledValue, TemplateError> {
    match node {
        Value::String(text) => Ok(compile_scalar(text, record, registry, caches, mode)),
        Value::Object(attrs) => compile_object(attrs, record, registry, caches, mode),
        Value::Array(items) => compile_list(items, record, registry, caches, mode),
        other => Err(TemplateError::MalformedTemplate(format!(
            "template leaves must be strings, objects, or lists; got {} ({other})",
            type_name(other)
        ))),
    }
}

fn compile_scalar(
    text: &str,
    record: &Record,
    registry: &HelperRegistry,
    caches: &HelperCaches,
    mode: &dyn OnMissingValue,
) -> CompiledValue {
    let result = if let Some(inner) = text
        .strip_prefix(EVAL_OPEN)
        .and_then(|rest| rest.strip_suffix(')'))
    {
        match parse_expr(inner) {
            Ok(expr) => evaluate(&expr, record, registry, caches),
            // A syntactically broken eval() is a template bug, but the
            // contract is that expression problems never abort the
            // surrounding document; treat it like any failed expression.
            Err(e) => Err(EvalFailure::Expression(e)),
        }
    } else {
        interpolate(text, record).map(Value::String)
    };

    match result {
        Ok(value) => CompiledValue::Value(value),
        Err(failure) => {
            if let EvalFailure::Expression(msg) = &failure {
                warn!(template = text, error = %msg, "expression failed; attribute degraded");
            }
            mode.on_missing(&failure)
        }
    }
}

fn compile_object(
    attrs: &Map<String, Value>,
    record: &Record,
    registry: &HelperRegistry,
    caches: &HelperCaches,
    mode: &dyn OnMissingValue,
) -> Result<CompiledValue, TemplateError> {
    let mut out = Map::new();
    for (key, value) in attrs {
        let compiled = compile_node(value, record, registry, caches, mode)?;
        match compiled {
            CompiledValue::Empty if mode.elides() => continue,
            CompiledValue::Empty => {
                // Probe mode tolerates a nested branch reducing to nothing
                // only if the strategy refuses elision; substitute so the
                // attribute stays present.
                if let CompiledValue::Value(v) =
                    mode.on_missing(&EvalFailure::Expression("empty branch".into()))
                {
                    out.insert(key.clone(), v);
                }
            }
            CompiledValue::Value(v) => {
                if mode.elides() && attribute_is_discardable(&v) {
                    continue;
                }
                out.insert(key.clone(), v);
            }
        }
    }
    Ok(CompiledValue::Value(Value::Object(out)))
}

fn compile_list(
    items: &[Value],
    record: &Record,
    registry: &HelperRegistry,
    caches: &HelperCaches,
    mode: &dyn OnMissingValue,
) -> Result<CompiledValue, TemplateError> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let compiled = compile_node(item, record, registry, caches, mode)?;
        match compiled {
            CompiledValue::Empty => {
                if !mode.elides() {
                    if let CompiledValue::Value(v) =
                        mode.on_missing(&EvalFailure::Expression("empty element".into()))
                    {
                        out.push(v);
                    }
                }
            }
            CompiledValue::Value(v) => {
                if mode.elides() {
                    match &v {
                        Value::Object(obj) if !keep_object(obj) => continue,
                        Value::String(s) if s.is_empty() => continue,
                        Value::Null => continue,
                        _ => {}
                    }
                }
                out.push(v);
            }
        }
    }
    Ok(CompiledValue::Value(Value::Array(out)))
}

/// Value-mode rule for deleting an attribute after compilation: the empty
/// string, null, and (for nested results) empty or all-`@` collections are
/// treated as "no data".
fn attribute_is_discardable(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(obj) => !keep_object(obj),
        _ => false,
    }
}

/// The elision rule for compiled objects:
///
/// - a fully-empty object is dropped;
/// - an object carrying `@id` is always kept — a bare reference is
///   meaningful even with no other data;
/// - an object whose every key is `@`-prefixed but carries no `@value` is
///   dropped (a typed-but-otherwise-empty by-product of elision);
/// - anything else is kept.
fn keep_object(obj: &Map<String, Value>) -> bool {
    if obj.is_empty() {
        return false;
    }
    if obj.contains_key("@id") {
        return true;
    }
    if obj.keys().all(|k| k.starts_with('@')) {
        return obj.contains_key("@value");
    }
    true
}
