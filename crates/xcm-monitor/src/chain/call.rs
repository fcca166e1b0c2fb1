//! Structural decoding of SCALE-encoded call payloads.
//!
//! Only the call index is interpreted: byte 0 is the pallet index, byte 1 the call index.
//! Arguments stay opaque.

use crate::error::ChainError;
use std::fmt;

/// Pallet/call index of a call plus its raw argument bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescription {
    pub pallet_index: u8,
    pub call_index: u8,
    pub args: Vec<u8>,
}

impl fmt::Display for CallDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "call({}, {}) args=0x{}",
            self.pallet_index,
            self.call_index,
            hex::encode(&self.args)
        )
    }
}

/// Decode a `0x`-prefixed (or bare) hex call payload.
pub fn decode_call_payload(payload: &str) -> Result<CallDescription, ChainError> {
    let s = payload.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| ChainError::Decode(format!("call payload: {}", e)))?;
    if bytes.len() < 2 {
        return Err(ChainError::Decode(format!(
            "call payload too short: {} bytes",
            bytes.len()
        )));
    }
    Ok(CallDescription {
        pallet_index: bytes[0],
        call_index: bytes[1],
        args: bytes[2..].to_vec(),
    })
}
