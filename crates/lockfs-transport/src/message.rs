//! Payload encoding for RPC messages.
//!
//! Messages are serialized using bincode for efficient wire encoding.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, TransportError};

/// Serialize any serde-compatible message to bytes using bincode.
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| TransportError::SerializationError(e.to_string()))
}

/// Deserialize bytes to a message using bincode.
pub fn deserialize_message<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    bincode::deserialize(data).map_err(|e| TransportError::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Sample {
        Acquire { lock_id: u64, client: String },
        Stat(u64),
    }

    #[test]
    fn test_enum_message() {
        let msg = Sample::Acquire {
            lock_id: 7,
            client: "127.0.0.1:4100".to_string(),
        };
        let bytes = serialize_message(&msg).unwrap();
        let decoded: Sample = deserialize_message(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let result: Result<Sample> = deserialize_message(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(result, Err(TransportError::SerializationError(_))));
    }

    #[test]
    fn test_json_and_bincode_agree() {
        let msg = Sample::Stat(99);
        let json = serde_json::to_string(&msg).unwrap();
        let from_json: Sample = serde_json::from_str(&json).unwrap();
        let from_bin: Sample = deserialize_message(&serialize_message(&msg).unwrap()).unwrap();
        assert_eq!(from_json, from_bin);
    }
}
