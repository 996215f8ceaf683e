//! Scraped entity schema

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single attribute value of an extracted record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Named attributes, ordered by name so hashing and serialization are stable.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Record as yielded by an extraction source, before validation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    pub identity: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl RawEntity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            attributes: Attributes::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Where and when an entity was scraped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeMeta {
    pub page: u32,
    pub run_started_at: DateTime<Utc>,
}

/// Extracted record stamped with scrape metadata. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScrapedEntity {
    identity: String,
    attributes: Attributes,
    meta: ScrapeMeta,
}

impl ScrapedEntity {
    /// Stamp a raw record. A missing identity becomes the empty string and is
    /// rejected later by the accumulator.
    pub fn from_raw(raw: RawEntity, meta: ScrapeMeta) -> Self {
        Self {
            identity: raw.identity.unwrap_or_default(),
            attributes: raw.attributes,
            meta,
        }
    }

    pub fn new(identity: impl Into<String>, attributes: Attributes, meta: ScrapeMeta) -> Self {
        Self {
            identity: identity.into(),
            attributes,
            meta,
        }
    }

    /// Raw identity as scraped (not normalized)
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn meta(&self) -> &ScrapeMeta {
        &self.meta
    }
}

/// Overlay `incoming` onto `existing`. Incoming nulls never clobber stored values.
pub fn merge_attributes(existing: &Attributes, incoming: &Attributes) -> Attributes {
    let mut merged = existing.clone();
    for (name, value) in incoming {
        if value.is_null() && merged.contains_key(name) {
            continue;
        }
        merged.insert(name.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn merge_overlays_non_null() {
        let existing = attrs(&[
            ("name", "Old Shop".into()),
            ("rating", AttrValue::Float(4.1)),
            ("phone", "555-0100".into()),
        ]);
        let incoming = attrs(&[
            ("name", "New Shop".into()),
            ("rating", AttrValue::Null),
            ("reviews", AttrValue::Integer(12)),
        ]);
        let merged = merge_attributes(&existing, &incoming);
        assert_eq!(merged["name"], AttrValue::from("New Shop"));
        assert_eq!(merged["rating"], AttrValue::Float(4.1));
        assert_eq!(merged["phone"], AttrValue::from("555-0100"));
        assert_eq!(merged["reviews"], AttrValue::Integer(12));
    }

    #[test]
    fn merge_keeps_new_null_fields() {
        let merged = merge_attributes(&Attributes::new(), &attrs(&[("email", AttrValue::Null)]));
        assert_eq!(merged["email"], AttrValue::Null);
    }

    #[test]
    fn attr_value_untagged_json() {
        let raw: RawEntity = serde_json::from_str(
            r#"{"identity":"https://a.example","attributes":{"n":3,"x":1.5,"s":"t","b":true,"z":null}}"#,
        )
        .unwrap();
        assert_eq!(raw.attributes["n"], AttrValue::Integer(3));
        assert_eq!(raw.attributes["x"], AttrValue::Float(1.5));
        assert_eq!(raw.attributes["s"], AttrValue::from("t"));
        assert_eq!(raw.attributes["b"], AttrValue::Bool(true));
        assert_eq!(raw.attributes["z"], AttrValue::Null);
    }

    #[test]
    fn from_raw_missing_identity_is_empty() {
        let meta = ScrapeMeta {
            page: 1,
            run_started_at: Utc::now(),
        };
        let entity = ScrapedEntity::from_raw(RawEntity::default(), meta);
        assert_eq!(entity.identity(), "");
    }

    #[test]
    fn option_into_attr_value() {
        assert_eq!(AttrValue::from(None::<i64>), AttrValue::Null);
        assert_eq!(AttrValue::from(Some("x")), AttrValue::from("x"));
    }
}
