use alloy_dyn_abi::DynSolValue;
use alloy_primitives::hex;
use serde::{Serialize, Serializer};
use serde_json::{Value, json};

/// JSON form of a decoded ABI value. Integers become decimal strings so that
/// 256-bit values survive the round trip through JSON consumers.
pub fn sol_value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(int, _) => Value::String(int.to_string()),
        DynSolValue::Uint(uint, _) => Value::String(uint.to_string()),
        DynSolValue::Address(address) => Value::String(address.to_string()),
        DynSolValue::Function(function) => Value::String(hex::encode_prefixed(function.as_slice())),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(hex::encode_prefixed(&word.as_slice()[..*size]))
        }
        DynSolValue::Bytes(bytes) => Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(sol_value_to_json).collect())
        }
        #[allow(unreachable_patterns)]
        other => json!(format!("{other:?}")),
    }
}

pub fn serialize_sol_value<S: Serializer>(value: &DynSolValue, serializer: S) -> Result<S::Ok, S::Error> {
    sol_value_to_json(value).serialize(serializer)
}
