//! # Schema-Tagged Serialization
//!
//! The source system (a dynamically typed agent-execution runtime) tags
//! every serialized value with its fully-qualified class name and
//! reconstructs the type at read time via runtime reflection. Rust has
//! no such reflection, so instead every type that crosses a queue or KV
//! boundary implements [`Schema`], a compile-time-checked identity that
//! gets carried alongside the payload as `__schema__`.
//!
//! A reader that encounters an unrecognized or mismatched `__schema__`
//! fails closed with [`SerializationError`]: rolling-deploy schema
//! drift is surfaced as an error, not silently migrated.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Implemented by every type that can cross the queue/KV wire boundary
/// (task contexts, task results, pipeline step inputs/outputs).
///
/// `SCHEMA_ID` should be stable and unique per logical schema version —
/// by convention `"<crate>::<type>::v<n>"`.
pub trait Schema: Serialize + DeserializeOwned + Send + Sync + 'static {
    const SCHEMA_ID: &'static str;
}

/// A self-describing wire record: `{ __schema__, __data__ }`.
///
/// Mirrors the `tagged_record` wire format used on the queue and KV boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedValue {
    #[serde(rename = "__schema__")]
    pub schema: String,
    #[serde(rename = "__data__")]
    pub data: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("failed to encode value for schema '{schema}': {source}")]
    Encode {
        schema: &'static str,
        source: serde_json::Error,
    },
    #[error("failed to decode value for schema '{expected}': {source}")]
    Decode {
        expected: &'static str,
        source: serde_json::Error,
    },
    #[error("schema mismatch: expected '{expected}', found '{found}'")]
    SchemaMismatch { expected: String, found: String },
    #[error("unknown schema tag: '{0}'")]
    UnknownSchema(String),
    #[error("malformed envelope bytes: {0}")]
    Malformed(String),
}

impl fmt::Display for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaggedValue({})", self.schema)
    }
}

/// Tag a typed value into its wire representation.
pub fn tag<T: Schema>(value: &T) -> Result<TaggedValue, SerializationError> {
    let data = serde_json::to_value(value).map_err(|source| SerializationError::Encode {
        schema: T::SCHEMA_ID,
        source,
    })?;
    Ok(TaggedValue {
        schema: T::SCHEMA_ID.to_string(),
        data,
    })
}

/// Untag a wire representation back into a typed value, verifying the
/// schema tag matches exactly (no coercion across versions).
pub fn untag<T: Schema>(value: &TaggedValue) -> Result<T, SerializationError> {
    if value.schema != T::SCHEMA_ID {
        return Err(SerializationError::SchemaMismatch {
            expected: T::SCHEMA_ID.to_string(),
            found: value.schema.clone(),
        });
    }
    serde_json::from_value(value.data.clone()).map_err(|source| SerializationError::Decode {
        expected: T::SCHEMA_ID,
        source,
    })
}

/// Serialize a tagged value to bytes for backend storage (KV values,
/// queued envelopes).
pub fn to_bytes(value: &TaggedValue) -> Result<Vec<u8>, SerializationError> {
    serde_json::to_vec(value).map_err(|source| SerializationError::Encode {
        schema: "__tagged_value__",
        source,
    })
}

/// Deserialize bytes back into a tagged value.
pub fn from_bytes(bytes: &[u8]) -> Result<TaggedValue, SerializationError> {
    serde_json::from_slice(bytes).map_err(|e| SerializationError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        msg: String,
    }

    impl Schema for Greeting {
        const SCHEMA_ID: &'static str = "tasker_shared::test::Greeting::v1";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OtherType {
        n: i64,
    }

    impl Schema for OtherType {
        const SCHEMA_ID: &'static str = "tasker_shared::test::OtherType::v1";
    }

    #[test]
    fn round_trip_preserves_value() {
        let original = Greeting {
            msg: "hi".to_string(),
        };
        let tagged = tag(&original).unwrap();
        let bytes = to_bytes(&tagged).unwrap();
        let decoded_tagged = from_bytes(&bytes).unwrap();
        let decoded: Greeting = untag(&decoded_tagged).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let tagged = tag(&OtherType { n: 5 }).unwrap();
        let result: Result<Greeting, _> = untag(&tagged);
        assert!(matches!(
            result,
            Err(SerializationError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn malformed_bytes_fail_closed() {
        let result = from_bytes(b"not json");
        assert!(matches!(result, Err(SerializationError::Malformed(_))));
    }
}
