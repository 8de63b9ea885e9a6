//! Humanized display of decoded values.

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256, hex};

use crate::render::address_book::AddressBook;

/// Renders values with address labels and, in compact mode, shortened hex.
#[derive(Debug, Clone, Copy)]
pub struct Semantics<'a> {
    pub book: &'a AddressBook,
    pub compact: bool,
}

impl<'a> Semantics<'a> {
    pub fn new(book: &'a AddressBook, compact: bool) -> Self {
        Self { book, compact }
    }

    pub fn value(&self, value: &DynSolValue) -> String {
        match value {
            DynSolValue::Address(address) => self.address(address),
            DynSolValue::Uint(uint, _) if *uint == U256::MAX => "MAX_UINT".to_string(),
            DynSolValue::Uint(uint, _) => uint.to_string(),
            DynSolValue::Int(int, _) => int.to_string(),
            DynSolValue::Bool(b) => b.to_string(),
            DynSolValue::String(s) => s.clone(),
            DynSolValue::Bytes(bytes) => self.hex(bytes),
            DynSolValue::FixedBytes(word, size) => self.hex(&word[..*size]),
            DynSolValue::Function(function) => self.hex(function.as_slice()),
            DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
                format!("[{}]", self.list(items))
            }
            DynSolValue::Tuple(items) => format!("({})", self.list(items)),
            #[allow(unreachable_patterns)]
            other => format!("{other:?}"),
        }
    }

    pub fn address(&self, address: &Address) -> String {
        match self.book.label(address) {
            Some(label) => label.to_string(),
            None => self.truncate(&hex::encode_prefixed(address)),
        }
    }

    pub fn hex(&self, bytes: &[u8]) -> String {
        self.truncate(&hex::encode_prefixed(bytes))
    }

    /// Shortens `0x` strings longer than a word of context. Addresses keep
    /// 6 leading and trailing digits, longer data 8.
    pub fn truncate(&self, s: &str) -> String {
        if !self.compact || !s.starts_with("0x") || s.len() < 42 || !s.is_ascii() {
            return s.to_string();
        }
        if s.len() == 42 {
            format!("{}...{}", &s[..8], &s[s.len() - 6..])
        } else {
            format!("{}...{}", &s[..10], &s[s.len() - 8..])
        }
    }

    fn list(&self, items: &[DynSolValue]) -> String {
        items.iter().map(|item| self.value(item)).collect::<Vec<_>>().join(", ")
    }
}
