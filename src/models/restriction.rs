// src/models/restriction.rs
//! Credential restrictions narrowing which issued credentials may
//! satisfy a referent.
//!
//! A restriction is a set of optional equality constraints plus two open
//! maps over attribute names. On the wire the maps are flattened into
//! sibling keys of the form `attr::<name>::marker` (attribute must be
//! present) and `attr::<name>::value` (attribute must equal the value).
//! The in-memory model keeps them as proper maps and the serde
//! implementation below round-trips the flattening in both directions.

use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// A constraint narrowing which credentials may satisfy a referent.
///
/// All fields are optional; an empty restriction matches any credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Restriction {
    /// Exact schema id the credential must be issued against
    pub schema_id: Option<String>,
    /// DID of the schema issuer
    pub schema_issuer_did: Option<String>,
    /// Schema name
    pub schema_name: Option<String>,
    /// Schema version
    pub schema_version: Option<String>,
    /// DID of the credential issuer
    pub issuer_did: Option<String>,
    /// Exact credential definition id
    pub cred_def_id: Option<String>,
    /// Attributes that must be present in the credential
    pub attribute_markers: BTreeMap<String, bool>,
    /// Attributes that must carry an exact value
    pub attribute_values: BTreeMap<String, String>,
}

impl Restriction {
    /// Returns a restriction constraining only the credential definition
    /// id, the shape produced when converting proposal previews into
    /// requests.
    pub fn for_cred_def_id(cred_def_id: impl Into<String>) -> Self {
        Restriction {
            cred_def_id: Some(cred_def_id.into()),
            ..Default::default()
        }
    }

    /// True when no constraint is set at all.
    pub fn is_empty(&self) -> bool {
        self.schema_id.is_none()
            && self.schema_issuer_did.is_none()
            && self.schema_name.is_none()
            && self.schema_version.is_none()
            && self.issuer_did.is_none()
            && self.cred_def_id.is_none()
            && self.attribute_markers.is_empty()
            && self.attribute_values.is_empty()
    }
}

impl Serialize for Restriction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;

        if let Some(v) = &self.schema_id {
            map.serialize_entry("schema_id", v)?;
        }
        if let Some(v) = &self.schema_issuer_did {
            map.serialize_entry("schema_issuer_did", v)?;
        }
        if let Some(v) = &self.schema_name {
            map.serialize_entry("schema_name", v)?;
        }
        if let Some(v) = &self.schema_version {
            map.serialize_entry("schema_version", v)?;
        }
        if let Some(v) = &self.issuer_did {
            map.serialize_entry("issuer_did", v)?;
        }
        if let Some(v) = &self.cred_def_id {
            map.serialize_entry("cred_def_id", v)?;
        }
        // Flatten the open maps into `attr::<name>::marker` / `::value`
        // sibling keys. Markers are carried as "1" / "0" strings.
        for (name, marker) in &self.attribute_markers {
            let key = format!("attr::{}::marker", name);
            map.serialize_entry(&key, if *marker { "1" } else { "0" })?;
        }
        for (name, value) in &self.attribute_values {
            let key = format!("attr::{}::value", name);
            map.serialize_entry(&key, value)?;
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for Restriction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut restriction = Restriction::default();

        let as_string = |key: &str, value: &serde_json::Value| -> Result<String, D::Error> {
            value
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| D::Error::custom(format!("restriction key `{}` must be a string", key)))
        };

        for (key, value) in &raw {
            match key.as_str() {
                "schema_id" => restriction.schema_id = Some(as_string(key, value)?),
                "schema_issuer_did" => restriction.schema_issuer_did = Some(as_string(key, value)?),
                "schema_name" => restriction.schema_name = Some(as_string(key, value)?),
                "schema_version" => restriction.schema_version = Some(as_string(key, value)?),
                "issuer_did" => restriction.issuer_did = Some(as_string(key, value)?),
                "cred_def_id" => restriction.cred_def_id = Some(as_string(key, value)?),
                other => {
                    // Unflatten `attr::<name>::marker` / `attr::<name>::value`.
                    // Unknown keys outside that namespace are tolerated so
                    // counterparties may extend restrictions.
                    let Some(rest) = other.strip_prefix("attr::") else {
                        continue;
                    };
                    if let Some(name) = rest.strip_suffix("::marker") {
                        let marker = as_string(key, value)?;
                        restriction
                            .attribute_markers
                            .insert(name.to_owned(), marker == "1");
                    } else if let Some(name) = rest.strip_suffix("::value") {
                        restriction
                            .attribute_values
                            .insert(name.to_owned(), as_string(key, value)?);
                    } else {
                        return Err(D::Error::custom(format!(
                            "malformed attribute restriction key `{}`",
                            key
                        )));
                    }
                }
            }
        }

        Ok(restriction)
    }
}
