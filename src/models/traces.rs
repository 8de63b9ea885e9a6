use alloy_primitives::{Address, Bytes, Log, Selector, TxHash, U256, hex};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::models::decoded::{DecodedArg, DecodedCall, DecodedOutput};

////////////////////////////////////// Raw Tracer Output ////////////////////////////////////////
// Default struct logger output (debug_traceTransaction without a tracer)
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpcodeTrace {
    #[serde(default)]
    pub gas: u64,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub return_value: String,
    #[serde(default)]
    pub struct_logs: Vec<RawOpcodeStep>,
}

/// One executed EVM instruction. Stack top is the last element.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOpcodeStep {
    #[serde(default)]
    pub pc: u64,
    pub op: String,
    pub depth: u64,
    #[serde(default)]
    pub gas: u64,
    #[serde(default)]
    pub gas_cost: u64,
    #[serde(default)]
    pub stack: Option<Vec<String>>,
    #[serde(default)]
    pub memory: Option<Vec<String>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RawOpcodeStep {
    pub fn stack(&self) -> &[String] {
        self.stack.as_deref().unwrap_or_default()
    }

    pub fn memory(&self) -> &[String] {
        self.memory.as_deref().unwrap_or_default()
    }
}

// Frame emitted by the bundled JS call tracer
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCallTrace {
    pub r#type: String,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub value: Option<String>,
    pub gas: String,
    pub gas_used: String,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default)]
    pub output: Bytes,
    #[serde(default)]
    pub calls: Vec<RawCallTrace>,
    #[serde(default)]
    pub events: Vec<RawEventTrace>,
    #[serde(default)]
    pub reverted: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Log emitted inside a call frame. Topics arrive without `0x` and without
/// left padding.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEventTrace {
    pub topics: Vec<String>,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default)]
    pub gas: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
}

/// The outer transaction or pending call a trace was produced for.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootCall {
    pub from: Option<Address>,
    pub to: Option<Address>,
    #[serde(default)]
    pub calldata: Bytes,
    #[serde(default)]
    pub value: Option<U256>,
}

/// A mined transaction joined with its receipt.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MinedTransaction {
    pub tx_hash: TxHash,
    pub call: RootCall,
    pub block_number: Option<u64>,
    pub transaction_index: Option<u64>,
    pub success: bool,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

/// Raw trace as acquired, tagged by the tracer that produced it.
#[derive(Clone, Debug, PartialEq)]
pub enum RawTrace {
    Opcode { trace: OpcodeTrace, root: RootCall },
    Call(RawCallTrace),
}

/////////////////////////////////// Annotated Data ///////////////////////////////////
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
    SelfDestruct,
    Fallback,
}

impl Operation {
    /// Operation for a frame-opening opcode, `None` for everything else.
    pub fn from_opcode(op: &str) -> Option<Self> {
        match op {
            "CALL" => Some(Self::Call),
            "CALLCODE" => Some(Self::CallCode),
            "DELEGATECALL" => Some(Self::DelegateCall),
            "STATICCALL" => Some(Self::StaticCall),
            "CREATE" => Some(Self::Create),
            "CREATE2" => Some(Self::Create2),
            _ => None,
        }
    }

    /// Operation for a frame `type` reported by a call tracer. Types outside the
    /// call family render as the root kind.
    pub fn from_tracer_type(r#type: &str) -> Self {
        let upper = r#type.to_uppercase();
        match upper.as_str() {
            "SELFDESTRUCT" => Self::SelfDestruct,
            other => Self::from_opcode(other).unwrap_or(Self::Fallback),
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Call => "CALL",
            Operation::CallCode => "CALLCODE",
            Operation::DelegateCall => "DELEGATECALL",
            Operation::StaticCall => "STATICCALL",
            Operation::Create => "CREATE",
            Operation::Create2 => "CREATE2",
            Operation::SelfDestruct => "SELFDESTRUCT",
            Operation::Fallback => "FALLBACK",
        };
        write!(f, "{name}")
    }
}

/// One node of the reconstructed call tree.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedCallFrame {
    pub operation: Operation,
    pub depth: usize,
    pub from: Option<Address>,
    /// Address whose storage the frame executes against.
    pub address: Option<Address>,
    /// Address the executed code was loaded from.
    pub code_address: Option<Address>,
    pub value: Option<U256>,
    /// Gas handed to the frame: the call opcode's charge, or the tracer's `gas` field.
    pub gas_cost: u64,
    /// Gas consumed by this frame alone, excluding its children.
    pub gas_used: u64,
    /// Gas consumed by this frame and everything it called.
    pub gas_used_total: u64,
    pub call_data: Bytes,
    pub return_data: Bytes,
    pub decoded_input: Option<DecodedCall>,
    pub decoded_output: Option<DecodedOutput>,
    pub reverted: bool,
    /// False when the call never entered a new depth (precompile or code-less account).
    pub executed: bool,
    pub error: Option<String>,
    pub children: Vec<AnnotatedCallFrame>,
    pub events: Vec<AnnotatedEvent>,
}

impl AnnotatedCallFrame {
    pub fn new(operation: Operation, depth: usize) -> Self {
        Self {
            operation,
            depth,
            from: None,
            address: None,
            code_address: None,
            value: None,
            gas_cost: 0,
            gas_used: 0,
            gas_used_total: 0,
            call_data: Bytes::new(),
            return_data: Bytes::new(),
            decoded_input: None,
            decoded_output: None,
            reverted: false,
            executed: true,
            error: None,
            children: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn selector(&self) -> Option<Selector> {
        self.call_data.get(..4).map(Selector::from_slice)
    }

    /// Leading four bytes of call data as hex, used when decoding fails.
    pub fn signature(&self) -> String {
        match self.call_data.get(..4) {
            Some(selector) => hex::encode_prefixed(selector),
            None => hex::encode_prefixed(&self.call_data),
        }
    }

    /// This frame and all of its descendants in execution (pre-)order.
    /// Splits `gas_used_total` into this frame's own share, given children
    /// whose totals are already set.
    pub fn settle_own_gas(&mut self) {
        let children: u64 = self.children.iter().map(|child| child.gas_used_total).sum();
        self.gas_used = self.gas_used_total.saturating_sub(children);
    }

    pub fn frames(&self) -> Vec<&AnnotatedCallFrame> {
        let mut frames = vec![self];
        for child in &self.children {
            frames.extend(child.frames());
        }
        frames
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedEvent {
    pub topics: Vec<String>,
    pub raw_data: Bytes,
    /// Decoded event name, or the raw first topic when the event is unknown.
    pub name: String,
    pub args: Option<Vec<DecodedArg>>,
    /// Gas remaining when the log was emitted (call tracer only).
    pub gas: Option<u64>,
    /// Cost of the LOG opcode (call tracer only).
    pub gas_used: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AnomalyKind {
    /// No open frame at `depth - 1`.
    MissingParent,
    /// Stack held fewer items than the opcode consumes.
    StackTooShort,
    /// Offset and length point past the captured memory.
    MemoryOutOfRange,
}

/// Tracer inconsistency tolerated during a non-strict build.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub step: usize,
    pub depth: u64,
    pub op: String,
    pub kind: AnomalyKind,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTree {
    pub root: AnnotatedCallFrame,
    pub anomalies: Vec<Anomaly>,
}
