//! Byte codec for operations and responses.
//!
//! The consensus layer replicates opaque command bytes; this module is
//! the boundary where those bytes become typed operations. Decoding is
//! total: bytes that do not decode are rejected as malformed before any
//! state change, and the rejection is itself a well-formed encoded
//! response.

use crate::core::error::{KeystoneError, KeystoneResult};
use crate::map::ops::{Operation, Response};
use crate::map::service::{CommandContext, MapService, QueryContext};

/// Encode an operation for replication.
pub fn encode_operation(op: &Operation) -> KeystoneResult<Vec<u8>> {
    bincode::serialize(op).map_err(|e| KeystoneError::Internal(format!("encode operation: {}", e)))
}

/// Decode replicated operation bytes.
pub fn decode_operation(bytes: &[u8]) -> KeystoneResult<Operation> {
    bincode::deserialize(bytes).map_err(|e| KeystoneError::malformed(e.to_string()))
}

/// Encode a response for the consensus layer to return.
pub fn encode_response(response: &Response) -> KeystoneResult<Vec<u8>> {
    bincode::serialize(response)
        .map_err(|e| KeystoneError::Internal(format!("encode response: {}", e)))
}

/// Decode response bytes.
pub fn decode_response(bytes: &[u8]) -> KeystoneResult<Response> {
    bincode::deserialize(bytes).map_err(|e| KeystoneError::malformed(e.to_string()))
}

/// Apply encoded command bytes to the service, returning encoded
/// response bytes.
///
/// Undecodable bytes yield an encoded `MalformedCommand` response; an
/// `Err` from this function is structural and fatal to the replica.
pub fn dispatch_command(
    service: &mut MapService,
    ctx: &CommandContext,
    bytes: &[u8],
) -> KeystoneResult<Vec<u8>> {
    let response = match decode_operation(bytes) {
        Ok(op) => service.apply(ctx, op),
        Err(err) => Response::malformed(err.to_string()),
    };
    encode_response(&response)
}

/// Serve encoded query bytes, returning encoded response bytes.
pub fn dispatch_query(
    service: &mut MapService,
    ctx: &QueryContext,
    bytes: &[u8],
) -> KeystoneResult<Vec<u8>> {
    let response = match decode_operation(bytes) {
        Ok(op) => service.query(ctx, op),
        Err(err) => Response::malformed(err.to_string()),
    };
    encode_response(&response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::LogicalTime;
    use bytes::Bytes;

    #[test]
    fn operation_round_trip() {
        let op = Operation::Put {
            key: "k".into(),
            value: Bytes::from_static(b"v"),
            ttl_ms: 250,
        };
        let bytes = encode_operation(&op).unwrap();
        assert_eq!(decode_operation(&bytes).unwrap(), op);
    }

    #[test]
    fn garbage_bytes_are_malformed() {
        let err = decode_operation(&[0xff, 0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, KeystoneError::MalformedCommand(_)));
    }

    #[test]
    fn malformed_command_yields_encoded_rejection() {
        let mut service = MapService::with_defaults();
        let ctx = CommandContext {
            index: 1,
            timestamp: LogicalTime::zero(),
            session: 1,
            sequence: 1,
        };
        let bytes = dispatch_command(&mut service, &ctx, &[0xde, 0xad]).unwrap();
        let response = decode_response(&bytes).unwrap();
        assert!(response.is_error());
    }
}
