//! Stack positions of the arguments each trace-relevant opcode consumes.
//!
//! Indices count from the stack top (0 = top), matching the order the EVM pops
//! them. Keeping them in one table keeps the builder free of magic offsets.

use crate::models::traces::Operation;

/// Arguments of an opcode that opens a new frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallLayout {
    /// Target address, absent for the create family.
    pub address: Option<usize>,
    /// Transferred value, absent for DELEGATECALL and STATICCALL.
    pub value: Option<usize>,
    pub input_offset: usize,
    pub input_length: usize,
}

/// Memory region handed back by RETURN / REVERT or written by LOGn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataLayout {
    pub offset: usize,
    pub length: usize,
}

impl CallLayout {
    /// Deepest stack position read for this opcode.
    pub const fn deepest(&self) -> usize {
        self.input_length
    }
}

const DATA: DataLayout = DataLayout { offset: 0, length: 1 };

/// First topic of LOGn sits right below offset and length.
pub const FIRST_TOPIC: usize = 2;

pub const fn call_layout(operation: Operation) -> Option<CallLayout> {
    match operation {
        Operation::Call | Operation::CallCode => Some(CallLayout {
            address: Some(1),
            value: Some(2),
            input_offset: 3,
            input_length: 4,
        }),
        Operation::DelegateCall | Operation::StaticCall => Some(CallLayout {
            address: Some(1),
            value: None,
            input_offset: 2,
            input_length: 3,
        }),
        Operation::Create | Operation::Create2 => Some(CallLayout {
            address: None,
            value: Some(0),
            input_offset: 1,
            input_length: 2,
        }),
        Operation::SelfDestruct | Operation::Fallback => None,
    }
}

/// How an opcode ends the frame it executes in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Terminator {
    Return,
    Revert,
    Invalid,
    SelfDestruct,
}

impl Terminator {
    pub const fn data_layout(self) -> Option<DataLayout> {
        match self {
            Terminator::Return | Terminator::Revert => Some(DATA),
            Terminator::Invalid | Terminator::SelfDestruct => None,
        }
    }
}

/// The opcodes the tree builder reacts to. Everything else is skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpcodeClass {
    Frame(Operation),
    Terminator(Terminator),
    Log { topics: usize },
}

impl OpcodeClass {
    pub fn classify(op: &str) -> Option<Self> {
        if let Some(operation) = Operation::from_opcode(op) {
            return Some(Self::Frame(operation));
        }
        match op {
            "RETURN" => Some(Self::Terminator(Terminator::Return)),
            "REVERT" => Some(Self::Terminator(Terminator::Revert)),
            "SELFDESTRUCT" | "SUICIDE" => Some(Self::Terminator(Terminator::SelfDestruct)),
            "INVALID" => Some(Self::Terminator(Terminator::Invalid)),
            // geth names undefined opcodes e.g. "opcode 0xfe not defined"
            op if op.starts_with("opcode 0x") => Some(Self::Terminator(Terminator::Invalid)),
            "LOG0" => Some(Self::Log { topics: 0 }),
            "LOG1" => Some(Self::Log { topics: 1 }),
            "LOG2" => Some(Self::Log { topics: 2 }),
            "LOG3" => Some(Self::Log { topics: 3 }),
            "LOG4" => Some(Self::Log { topics: 4 }),
            _ => None,
        }
    }

    pub const fn log_data() -> DataLayout {
        DATA
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_family_layouts() {
        let call = call_layout(Operation::Call).unwrap();
        assert_eq!((call.address, call.value, call.input_offset, call.input_length), (Some(1), Some(2), 3, 4));
        assert_eq!(call.deepest(), 4);
        assert_eq!(call_layout(Operation::Create).unwrap().deepest(), 2);

        let delegate = call_layout(Operation::DelegateCall).unwrap();
        assert_eq!(delegate.value, None);
        assert_eq!((delegate.input_offset, delegate.input_length), (2, 3));
        assert_eq!(call_layout(Operation::StaticCall), Some(delegate));

        let create = call_layout(Operation::Create2).unwrap();
        assert_eq!(create.address, None);
        assert_eq!(create.value, Some(0));

        assert!(call_layout(Operation::Fallback).is_none());
    }

    #[test]
    fn test_classify() {
        assert_eq!(OpcodeClass::classify("CALLCODE"), Some(OpcodeClass::Frame(Operation::CallCode)));
        assert_eq!(OpcodeClass::classify("REVERT"), Some(OpcodeClass::Terminator(Terminator::Revert)));
        assert_eq!(
            OpcodeClass::classify("opcode 0xfe not defined"),
            Some(OpcodeClass::Terminator(Terminator::Invalid))
        );
        assert_eq!(OpcodeClass::classify("LOG3"), Some(OpcodeClass::Log { topics: 3 }));
        assert_eq!(OpcodeClass::classify("SSTORE"), None);
        assert_eq!(OpcodeClass::classify("STOP"), None);
    }
}
