use alloy_primitives::TxHash;
use thiserror::Error;

/// Failures while obtaining a trace. These abort the command.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("Invalid target: {target}. Expected a 0x-prefixed transaction hash or an http(s) quote URL")]
    InvalidTarget { target: String },
    #[error("Transaction not found: {tx_hash}")]
    TransactionNotFound { tx_hash: TxHash },
    #[error("Trace contains no struct logs")]
    EmptyTrace,
    #[error("Quote response is missing required field: {field}")]
    MissingQuoteField { field: String },
    #[error("Opcode traces need the root call (to, calldata) of the traced transaction")]
    MissingRootCall,
}

/// Structural problems found while reconstructing a call tree.
#[derive(Error, Debug, PartialEq)]
pub enum BuildError {
    #[error("Frame at depth {depth} already resolved, second {op} at step {step}")]
    FrameAlreadyResolved { step: usize, depth: u64, op: String },
    #[error("No open frame at depth {parent_depth} for {op} at step {step}")]
    MissingParent {
        step: usize,
        parent_depth: u64,
        op: String,
    },
    #[error("Unable to get index {index} from stack with length {length} for {op} at step {step}")]
    StackTooShort {
        step: usize,
        op: String,
        index: usize,
        length: usize,
    },
    #[error("Trace contains no struct logs")]
    EmptyTrace,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown profile: {name}")]
    UnknownProfile { name: String },
}
