//! Catalog record model and canonicalization.
//!
//! A record is a flat/nested JSON map of canonical field name → value
//! (string, list, nested object, or language map `{lang: value}`). The
//! host catalog hands records over as plain JSON; canonicalization makes
//! the legacy field conventions explicit before any template sees them.

use serde_json::{Map, Value};

use crate::compiler::TemplateError;

/// Primary identity field of a record.
pub const IDENTITY_FIELD: &str = "id";

/// Rename-on-update field. When present it takes precedence over
/// [`IDENTITY_FIELD`], so an update that renames a record still addresses
/// the graph region minted under the *new* identity.
pub const RENAME_FIELD: &str = "rename_to";

/// Suffix marking translated fields carrying a `{lang: value}` map.
pub const TRANSLATED_SUFFIX: &str = "_translated";

/// Default language used when flattening translated fields.
pub const DEFAULT_LANGUAGE: &str = "en";

const TAGS_FIELD: &str = "tags";
const TAG_OBJECTS_FIELD: &str = "tag_objects";
const TAG_JOIN: &str = ",";

/// A catalog record. The core pipeline never mutates a record after
/// canonicalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Build a record from a JSON value; the value must be an object.
    pub fn from_value(value: Value) -> Result<Self, TemplateError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(TemplateError::MalformedRecord(format!(
                "record must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The identity under which this record addresses its graph region.
    /// The rename-on-update field wins over the primary identity field.
    pub fn canonical_id(&self) -> Option<&str> {
        for field in [RENAME_FIELD, IDENTITY_FIELD] {
            if let Some(Value::String(s)) = self.fields.get(field) {
                if !s.is_empty() {
                    return Some(s);
                }
            }
        }
        None
    }

    /// Normalize legacy field conventions in place:
    ///
    /// - a pending rename replaces the primary identity field, so templates
    ///   interpolating the identity mint the region under the new name;
    /// - a list of tag objects `[{"name": t}, ...]` under `tags` reduces to
    ///   one comma-joined string; the raw list survives as `tag_objects`;
    /// - for every `<field>_translated` language map, a flattened
    ///   default-language string is exposed under `<field>` when absent.
    pub fn canonicalize(&mut self) {
        if let Some(Value::String(rename)) = self.fields.get(RENAME_FIELD) {
            if !rename.is_empty() {
                let rename = rename.clone();
                self.fields
                    .insert(IDENTITY_FIELD.to_string(), Value::String(rename));
            }
        }

        if let Some(Value::Array(items)) = self.fields.get(TAGS_FIELD) {
            if items.iter().any(|v| v.is_object()) {
                let names: Vec<String> = items
                    .iter()
                    .filter_map(|item| match item {
                        Value::Object(obj) => match obj.get("name") {
                            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                            _ => None,
                        },
                        Value::String(s) if !s.is_empty() => Some(s.clone()),
                        _ => None,
                    })
                    .collect();
                let raw = self.fields.remove(TAGS_FIELD).unwrap_or(Value::Null);
                self.fields.insert(TAG_OBJECTS_FIELD.to_string(), raw);
                self.fields
                    .insert(TAGS_FIELD.to_string(), Value::String(names.join(TAG_JOIN)));
            }
        }

        let translated: Vec<(String, Value)> = self
            .fields
            .iter()
            .filter_map(|(key, value)| {
                let base = key.strip_suffix(TRANSLATED_SUFFIX)?;
                if base.is_empty() || self.fields.contains_key(base) {
                    return None;
                }
                let flattened = flatten_language_map(value)?;
                Some((base.to_string(), Value::String(flattened)))
            })
            .collect();
        for (base, value) in translated {
            self.fields.insert(base, value);
        }
    }

    /// Drop fields whose value is the empty string ("not provided").
    pub fn strip_empty(&mut self) {
        self.fields
            .retain(|_, value| !matches!(value, Value::String(s) if s.is_empty()));
    }
}

/// Pick the default-language entry of a language map, falling back to the
/// first entry in key order.
pub fn flatten_language_map(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    if let Some(Value::String(s)) = map.get(DEFAULT_LANGUAGE) {
        return Some(s.clone());
    }
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys.into_iter()
        .find_map(|k| map.get(k).and_then(Value::as_str).map(str::to_string))
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_id_prefers_rename_field() {
        let record = Record::from_value(json!({
            "id": "old-name",
            "rename_to": "new-name",
        }))
        .unwrap();
        assert_eq!(record.canonical_id(), Some("new-name"));

        let record = Record::from_value(json!({"id": "only"})).unwrap();
        assert_eq!(record.canonical_id(), Some("only"));
    }

    #[test]
    fn canonicalize_applies_pending_rename_to_identity() {
        let mut record = Record::from_value(json!({
            "id": "old-name",
            "rename_to": "new-name",
        }))
        .unwrap();
        record.canonicalize();
        assert_eq!(record.get("id"), Some(&json!("new-name")));
    }

    #[test]
    fn tag_objects_reduce_to_joined_string() {
        let mut record = Record::from_value(json!({
            "id": "r1",
            "tags": [{"name": "housing"}, {"name": "census"}],
        }))
        .unwrap();
        record.canonicalize();
        assert_eq!(record.get("tags"), Some(&json!("housing,census")));
        assert_eq!(
            record.get("tag_objects"),
            Some(&json!([{"name": "housing"}, {"name": "census"}]))
        );
    }

    #[test]
    fn translated_fields_flatten_to_default_language() {
        let mut record = Record::from_value(json!({
            "id": "r1",
            "notes_translated": {"en": "About housing", "nl": "Over huisvesting"},
        }))
        .unwrap();
        record.canonicalize();
        assert_eq!(record.get("notes"), Some(&json!("About housing")));
        // The map itself stays visible for templates that want per-language output.
        assert!(record.get("notes_translated").is_some());
    }

    #[test]
    fn translated_does_not_clobber_explicit_field() {
        let mut record = Record::from_value(json!({
            "id": "r1",
            "notes": "explicit",
            "notes_translated": {"en": "flattened"},
        }))
        .unwrap();
        record.canonicalize();
        assert_eq!(record.get("notes"), Some(&json!("explicit")));
    }

    #[test]
    fn strip_empty_removes_empty_strings_only() {
        let mut record = Record::from_value(json!({
            "id": "r1",
            "title": "",
            "count": 0,
        }))
        .unwrap();
        record.strip_empty();
        assert!(record.get("title").is_none());
        assert_eq!(record.get("count"), Some(&json!(0)));
    }

    #[test]
    fn non_object_record_is_rejected() {
        assert!(Record::from_value(json!(["not", "a", "record"])).is_err());
    }
}
