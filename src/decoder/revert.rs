//! Revert payload decoding.
//!
//! A revert is tried first as a registered custom error, then as the generic
//! `Error(string)` / `Panic(uint256)` encodings Solidity emits on its own.

use alloy_dyn_abi::{DynSolValue, JsonAbiExt};
use alloy_primitives::Selector;
use alloy_sol_types::{Panic, Revert, SolError};
use tracing::debug;

use crate::decoder::{DecodingContext, named_params};
use crate::models::decoded::{DecodedArg, DecodedRevert};

impl DecodingContext {
    /// Decodes revert data as a custom error or a bare revert reason.
    pub fn try_decode_revert(&self, data: &[u8]) -> Option<DecodedRevert> {
        self.try_decode_custom_error(data)
            .or_else(|| decode_generic_revert(data))
    }

    fn try_decode_custom_error(&self, data: &[u8]) -> Option<DecodedRevert> {
        let selector = Selector::try_from(data.get(..4)?).ok()?;

        self.errors_for(selector).iter().find_map(|error| {
            match error.abi_decode_input(&data[4..]) {
                Ok(values) => Some(DecodedRevert {
                    error_name: error.name.clone(),
                    values: named_params(&error.inputs, values),
                }),
                Err(e) => {
                    debug!("Revert selector {} matched {} but did not decode: {}", selector, error.signature(), e);
                    None
                }
            }
        })
    }
}

/// Decodes the encodings the compiler produces without a registered ABI:
/// `Error(string)` from `require`/`revert` and `Panic(uint256)` from checks.
pub fn decode_generic_revert(data: &[u8]) -> Option<DecodedRevert> {
    if let Ok(revert) = Revert::abi_decode(data) {
        return Some(DecodedRevert {
            error_name: "Error".to_string(),
            values: vec![DecodedArg {
                name: "reason".to_string(),
                ty: "string".to_string(),
                value: DynSolValue::String(revert.reason),
            }],
        });
    }

    if let Ok(panic) = Panic::abi_decode(data) {
        return Some(DecodedRevert {
            error_name: "Panic".to_string(),
            values: vec![DecodedArg {
                name: "code".to_string(),
                ty: "uint256".to_string(),
                value: DynSolValue::Uint(panic.code, 256),
            }],
        });
    }

    None
}
