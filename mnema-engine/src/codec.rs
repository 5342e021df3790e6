//! Row (de)serialization helpers shared by the stores

use mnema_core::{MnemaError, MnemaResult, StorageError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

/// Serialize an entity into its backend row.
pub(crate) fn encode_row<T: Serialize>(table: &str, value: &T) -> MnemaResult<JsonValue> {
    serde_json::to_value(value).map_err(|e| {
        MnemaError::Storage(StorageError::Corrupt {
            table: table.to_string(),
            reason: format!("encode: {}", e),
        })
    })
}

/// Deserialize a backend row into its entity.
pub(crate) fn decode_row<T: DeserializeOwned>(table: &str, row: JsonValue) -> MnemaResult<T> {
    serde_json::from_value(row).map_err(|e| {
        MnemaError::Storage(StorageError::Corrupt {
            table: table.to_string(),
            reason: format!("decode: {}", e),
        })
    })
}
