//! Helper registry: the fixed set of pure functions callable from
//! `eval(...)` expressions.
//!
//! Helpers never mutate shared state observable by the compiler. The one
//! helper that memoizes (`stable_uri`) does so through [`HelperCaches`], an
//! explicit per-session cache injected by the caller — never a hidden
//! process-global. Entries are idempotent, so concurrent access only needs
//! a synchronized map.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::record::{flatten_language_map, type_name, DEFAULT_LANGUAGE};

/// Error raised by a helper. Callers downgrade it to the empty sentinel;
/// it never aborts compilation.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HelperError(pub String);

impl HelperError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type HelperResult = Result<Value, HelperError>;

/// A pure helper function.
pub type Helper = fn(&[Value], &HelperCaches) -> HelperResult;

/// Per-session memoization owned by the caller (typically one
/// reconciliation session). Safe for concurrent read/write; staleness is
/// acceptable because entries are deterministic for their key.
#[derive(Debug, Default)]
pub struct HelperCaches {
    stable_uris: DashMap<String, String>,
}

impl HelperCaches {
    pub fn new() -> Self {
        Self::default()
    }

    fn stable_uri(&self, namespace: &str, key: &str) -> String {
        let cache_key = format!("{namespace}\n{key}");
        if let Some(hit) = self.stable_uris.get(&cache_key) {
            return hit.clone();
        }
        let digest = Sha256::digest(key.as_bytes());
        let mut suffix = String::with_capacity(32);
        for byte in digest.iter().take(16) {
            suffix.push_str(&format!("{byte:02x}"));
        }
        let uri = format!("{namespace}{suffix}");
        self.stable_uris.insert(cache_key, uri.clone());
        uri
    }
}

/// Name → helper table. The default set is fixed; tests may register
/// extras.
pub struct HelperRegistry {
    helpers: HashMap<String, Helper>,
}

impl Default for HelperRegistry {
    fn default() -> Self {
        let mut registry = Self {
            helpers: HashMap::new(),
        };
        registry.register("parse_date", parse_date);
        registry.register("parse_bool", parse_bool);
        registry.register("uri_quote", uri_quote);
        registry.register("license_uri", license_uri);
        registry.register("lang_map", lang_map);
        registry.register("default_lang", default_lang);
        registry.register("split_tags", split_tags);
        registry.register("stable_uri", stable_uri);
        registry
    }
}

impl HelperRegistry {
    pub fn register(&mut self, name: &str, helper: Helper) {
        self.helpers.insert(name.to_string(), helper);
    }

    pub fn call(&self, name: &str, args: &[Value], caches: &HelperCaches) -> HelperResult {
        match self.helpers.get(name) {
            Some(helper) => helper(args, caches),
            None => Err(HelperError::new(format!("unknown helper {name:?}"))),
        }
    }
}

// ============================================================================
// Default helpers
// ============================================================================

fn one_string(args: &[Value], helper: &str) -> Result<String, HelperError> {
    match args {
        [Value::String(s)] => Ok(s.clone()),
        [other] => Err(HelperError::new(format!(
            "{helper} expects a string, got {}",
            type_name(other)
        ))),
        _ => Err(HelperError::new(format!(
            "{helper} expects exactly one argument, got {}",
            args.len()
        ))),
    }
}

/// Coerce common date inputs to `xsd:dateTime` lexical form.
fn parse_date(args: &[Value], _caches: &HelperCaches) -> HelperResult {
    let text = one_string(args, "parse_date")?;
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(json!(dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string()));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(json!(dt.format("%Y-%m-%dT%H:%M:%S").to_string()));
        }
    }
    for format in ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Ok(json!(format!("{}T00:00:00", date.format("%Y-%m-%d"))));
        }
    }
    Err(HelperError::new(format!("unparseable date {text:?}")))
}

/// Truthy-string coercion to the xsd:boolean lexical forms.
fn parse_bool(args: &[Value], _caches: &HelperCaches) -> HelperResult {
    let truthy = match args {
        [Value::Bool(b)] => *b,
        [Value::String(s)] => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => true,
            "false" | "no" | "off" | "0" | "" => false,
            other => {
                return Err(HelperError::new(format!(
                    "unrecognized boolean value {other:?}"
                )))
            }
        },
        _ => {
            return Err(HelperError::new(
                "parse_bool expects one string or bool argument",
            ))
        }
    };
    Ok(json!(if truthy { "true" } else { "false" }))
}

/// Characters percent-encoded when embedding a value inside a URI.
const URI_QUOTE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'%')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

/// Percent-encode a value for safe embedding in a URI.
fn uri_quote(args: &[Value], _caches: &HelperCaches) -> HelperResult {
    let text = one_string(args, "uri_quote")?;
    Ok(json!(utf8_percent_encode(&text, URI_QUOTE_SET).to_string()))
}

/// Fixed license-id → canonical URI table. Unknown ids raise, which the
/// compiler downgrades to an elided attribute.
fn license_uri(args: &[Value], _caches: &HelperCaches) -> HelperResult {
    let id = one_string(args, "license_uri")?;
    let uri = match id.trim().to_ascii_lowercase().as_str() {
        "cc-by" => "http://creativecommons.org/licenses/by/4.0/",
        "cc-by-sa" => "http://creativecommons.org/licenses/by-sa/4.0/",
        "cc-nc" => "http://creativecommons.org/licenses/by-nc/4.0/",
        "cc-zero" | "cc0" => "http://creativecommons.org/publicdomain/zero/1.0/",
        "odc-by" => "http://opendatacommons.org/licenses/by/1.0/",
        "odc-odbl" => "http://opendatacommons.org/licenses/odbl/1.0/",
        "odc-pddl" => "http://opendatacommons.org/licenses/pddl/1.0/",
        other => return Err(HelperError::new(format!("unknown license id {other:?}"))),
    };
    Ok(json!(uri))
}

/// Expand a language map into JSON-LD `@value`/`@language` objects.
/// A bare string becomes a single default-language entry.
fn lang_map(args: &[Value], _caches: &HelperCaches) -> HelperResult {
    match args {
        [Value::Object(map)] => {
            let mut entries = Vec::with_capacity(map.len());
            let mut langs: Vec<&String> = map.keys().collect();
            langs.sort();
            for lang in langs {
                match &map[lang] {
                    Value::String(text) if !text.is_empty() => {
                        entries.push(json!({"@value": text, "@language": lang}));
                    }
                    Value::String(_) => {}
                    other => {
                        return Err(HelperError::new(format!(
                            "language map entry {lang:?} is a {}, expected string",
                            type_name(other)
                        )))
                    }
                }
            }
            Ok(Value::Array(entries))
        }
        [Value::String(s)] => Ok(json!([{"@value": s, "@language": DEFAULT_LANGUAGE}])),
        [other] => Err(HelperError::new(format!(
            "lang_map expects a language map or string, got {}",
            type_name(other)
        ))),
        _ => Err(HelperError::new("lang_map expects exactly one argument")),
    }
}

/// Contract a language map to its default-language string.
fn default_lang(args: &[Value], _caches: &HelperCaches) -> HelperResult {
    match args {
        [Value::String(s)] => Ok(json!(s)),
        [value @ Value::Object(_)] => flatten_language_map(value)
            .map(|s| json!(s))
            .ok_or_else(|| HelperError::new("language map has no usable entries")),
        [other] => Err(HelperError::new(format!(
            "default_lang expects a language map or string, got {}",
            type_name(other)
        ))),
        _ => Err(HelperError::new("default_lang expects exactly one argument")),
    }
}

/// Split a delimiter-joined tag string into a list. Lists of strings (or
/// tag objects with a `name`) pass through as their names.
fn split_tags(args: &[Value], _caches: &HelperCaches) -> HelperResult {
    let (value, delimiter) = match args {
        [v] => (v, ","),
        [v, Value::String(d)] if !d.is_empty() => (v, d.as_str()),
        _ => {
            return Err(HelperError::new(
                "split_tags expects a value and an optional non-empty delimiter",
            ))
        }
    };
    let tags: Vec<Value> = match value {
        Value::String(joined) => joined
            .split(delimiter)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| json!(t))
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.is_empty() => Some(json!(s)),
                Value::Object(obj) => match obj.get("name") {
                    Some(Value::String(s)) if !s.is_empty() => Some(json!(s)),
                    _ => None,
                },
                _ => None,
            })
            .collect(),
        other => {
            return Err(HelperError::new(format!(
                "split_tags expects a string or list, got {}",
                type_name(other)
            )))
        }
    };
    Ok(Value::Array(tags))
}

/// Mint a deterministic URI under a namespace from a caller-supplied key,
/// memoized per session.
fn stable_uri(args: &[Value], caches: &HelperCaches) -> HelperResult {
    match args {
        [Value::String(namespace), Value::String(key)] if !key.is_empty() => {
            Ok(json!(caches.stable_uri(namespace, key)))
        }
        _ => Err(HelperError::new(
            "stable_uri expects a namespace and a non-empty key",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> HelperResult {
        HelperRegistry::default().call(name, args, &HelperCaches::new())
    }

    #[test]
    fn parse_date_accepts_common_forms() {
        assert_eq!(
            call("parse_date", &[json!("2024-05-01")]).unwrap(),
            json!("2024-05-01T00:00:00")
        );
        assert_eq!(
            call("parse_date", &[json!("2024-05-01T12:30:00Z")]).unwrap(),
            json!("2024-05-01T12:30:00")
        );
        assert!(call("parse_date", &[json!("next tuesday")]).is_err());
    }

    #[test]
    fn parse_bool_is_lenient_on_truthy_strings() {
        assert_eq!(call("parse_bool", &[json!("Yes")]).unwrap(), json!("true"));
        assert_eq!(call("parse_bool", &[json!(false)]).unwrap(), json!("false"));
        assert!(call("parse_bool", &[json!("maybe")]).is_err());
    }

    #[test]
    fn uri_quote_encodes_reserved_characters() {
        assert_eq!(
            call("uri_quote", &[json!("a b#c")]).unwrap(),
            json!("a%20b%23c")
        );
    }

    #[test]
    fn license_uri_lookup() {
        assert_eq!(
            call("license_uri", &[json!("cc-by")]).unwrap(),
            json!("http://creativecommons.org/licenses/by/4.0/")
        );
        assert!(call("license_uri", &[json!("proprietary-x")]).is_err());
    }

    #[test]
    fn lang_map_expands_sorted_by_language() {
        assert_eq!(
            call("lang_map", &[json!({"nl": "Huis", "en": "House"})]).unwrap(),
            json!([
                {"@value": "House", "@language": "en"},
                {"@value": "Huis", "@language": "nl"},
            ])
        );
        assert_eq!(
            call("lang_map", &[json!("House")]).unwrap(),
            json!([{"@value": "House", "@language": "en"}])
        );
    }

    #[test]
    fn split_tags_handles_strings_and_objects() {
        assert_eq!(
            call("split_tags", &[json!("a, b,,c")]).unwrap(),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            call("split_tags", &[json!([{"name": "a"}, {"name": "b"}])]).unwrap(),
            json!(["a", "b"])
        );
    }

    #[test]
    fn stable_uri_is_memoized_and_deterministic() {
        let caches = HelperCaches::new();
        let registry = HelperRegistry::default();
        let args = [json!("http://x/org/"), json!("ACME")];
        let first = registry.call("stable_uri", &args, &caches).unwrap();
        let second = registry.call("stable_uri", &args, &caches).unwrap();
        assert_eq!(first, second);
        assert!(first.as_str().unwrap().starts_with("http://x/org/"));

        // A fresh cache must reproduce the same URI for the same key.
        let fresh = registry
            .call("stable_uri", &args, &HelperCaches::new())
            .unwrap();
        assert_eq!(first, fresh);
    }
}
