use alloy_dyn_abi::DynSolValue;
use alloy_primitives::Selector;
use serde::Serialize;

use crate::decoder::values::serialize_sol_value;

/// A decoded ABI value with the parameter name it was declared under.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecodedArg {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(serialize_with = "serialize_sol_value")]
    pub value: DynSolValue,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedCall {
    pub function_name: String,
    pub signature: String,
    pub selector: Selector,
    pub arguments: Vec<DecodedArg>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedEvent {
    pub event_name: String,
    pub signature: String,
    pub args: Vec<DecodedArg>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedRevert {
    pub error_name: String,
    pub values: Vec<DecodedArg>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DecodedOutput {
    Return { values: Vec<DecodedArg> },
    Revert(DecodedRevert),
}

impl DecodedOutput {
    pub fn values(&self) -> &[DecodedArg] {
        match self {
            DecodedOutput::Return { values } => values,
            DecodedOutput::Revert(revert) => &revert.values,
        }
    }
}
