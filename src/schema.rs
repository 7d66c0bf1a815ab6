// Copyright (c) 2024-present, meta-catalog contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Opaque measurement-schema value objects.
//!
//! The real data-type/encoding/compressor enumerations and the SQL-level token
//! tables that produce them live outside this catalog. The catalog only needs
//! to persist and round-trip the small integer IDs a caller hands it; it
//! never interprets them.

use std::collections::BTreeMap;

/// A measurement's physical encoding, opaque to the catalog.
///
/// `data_type`, `encoding` and `compressor` are small integer IDs assigned by
/// the (external) schema registry; `props` carries free-form key/value
/// properties (e.g. codec tuning knobs) that ride along in the operation log.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeasurementSchema {
    /// External data-type ID.
    pub data_type: u16,
    /// External encoding ID.
    pub encoding: u16,
    /// External compressor ID.
    pub compressor: u16,
    /// Free-form `k=v` properties, serialized as `k1=v1&k2=v2` in the log.
    pub props: BTreeMap<String, String>,
}

impl MeasurementSchema {
    /// Builds a schema with no properties.
    #[must_use]
    pub fn new(data_type: u16, encoding: u16, compressor: u16) -> Self {
        Self {
            data_type,
            encoding,
            compressor,
            props: BTreeMap::new(),
        }
    }

    /// Attaches properties, consuming `self` (builder style).
    #[must_use]
    pub fn with_props(mut self, props: BTreeMap<String, String>) -> Self {
        self.props = props;
        self
    }

    /// Serializes `props` as `k1=v1&k2=v2`, or an empty string if there are none.
    pub(crate) fn encode_props(&self) -> String {
        self.props
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Parses the `k1=v1&k2=v2` property encoding used by the operation log.
    pub(crate) fn decode_props(raw: &str) -> BTreeMap<String, String> {
        if raw.is_empty() {
            return BTreeMap::new();
        }

        raw.split('&')
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_props() {
        let mut props = BTreeMap::new();
        props.insert("a".to_string(), "1".to_string());
        props.insert("b".to_string(), "2".to_string());

        let schema = MeasurementSchema::new(1, 2, 3).with_props(props.clone());
        let encoded = schema.encode_props();
        assert_eq!(encoded, "a=1&b=2");
        assert_eq!(MeasurementSchema::decode_props(&encoded), props);
    }

    #[test]
    fn empty_props_encode_to_empty_string() {
        let schema = MeasurementSchema::new(1, 2, 3);
        assert_eq!(schema.encode_props(), "");
        assert!(MeasurementSchema::decode_props("").is_empty());
    }
}
