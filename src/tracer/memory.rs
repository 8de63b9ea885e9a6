//! Stack and memory access for a single struct-log step.

use alloy_primitives::{Address, B256, Bytes, U256, hex};

use crate::models::errors::BuildError;
use crate::models::traces::RawOpcodeStep;

/// Parses a stack word as reported by the node: hex, optionally `0x`-prefixed,
/// without left padding. An empty string is zero.
pub fn parse_word(word: &str) -> Option<U256> {
    let digits = word.trim_start_matches("0x");
    if digits.is_empty() {
        return Some(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).ok()
}

/// Address held in the low 20 bytes of a stack word.
pub fn word_to_address(word: U256) -> Address {
    Address::from_word(B256::from(word))
}

/// Copies `length` bytes starting at `offset` out of word-chunked memory.
/// `None` when the region runs past the captured memory.
pub fn read_memory(memory: &[String], offset: usize, length: usize) -> Option<Bytes> {
    if length == 0 {
        return Some(Bytes::new());
    }
    let flat: String = memory.iter().map(|word| word.trim_start_matches("0x")).collect();
    let start = offset.checked_mul(2)?;
    let end = offset.checked_add(length)?.checked_mul(2)?;
    let slice = flat.get(start..end)?;
    hex::decode(slice).ok().map(Bytes::from)
}

/// Read access to one step, tagged with its position so failures can name it.
pub struct StepReader<'a> {
    pub index: usize,
    pub step: &'a RawOpcodeStep,
}

impl<'a> StepReader<'a> {
    pub fn new(index: usize, step: &'a RawOpcodeStep) -> Self {
        Self { index, step }
    }

    /// Stack item `n` counting from the top.
    pub fn stack_nth(&self, n: usize) -> Result<U256, BuildError> {
        let stack = self.step.stack();
        let too_short = || BuildError::StackTooShort {
            step: self.index,
            op: self.step.op.clone(),
            index: n,
            length: stack.len(),
        };
        let position = stack.len().checked_sub(n + 1).ok_or_else(too_short)?;
        parse_word(&stack[position]).ok_or_else(too_short)
    }

    /// Stack item `n` narrowed to a memory offset or length. Values beyond
    /// `usize` can never address captured memory and map to `None`.
    pub fn stack_usize(&self, n: usize) -> Result<Option<usize>, BuildError> {
        Ok(usize::try_from(self.stack_nth(n)?).ok())
    }

    /// Memory region named by the stack items at `offset` and `length`.
    pub fn memory_at(&self, offset: usize, length: usize) -> Result<Option<Bytes>, BuildError> {
        let length = self.stack_usize(length)?;
        if length == Some(0) {
            return Ok(Some(Bytes::new()));
        }
        let offset = self.stack_usize(offset)?;
        Ok(offset
            .zip(length)
            .and_then(|(offset, length)| read_memory(self.step.memory(), offset, length)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(stack: &[&str], memory: &[&str]) -> RawOpcodeStep {
        RawOpcodeStep {
            op: "CALL".to_string(),
            depth: 1,
            stack: Some(stack.iter().map(|s| s.to_string()).collect()),
            memory: Some(memory.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_word() {
        assert_eq!(parse_word("0x"), Some(U256::ZERO));
        assert_eq!(parse_word("0x2a"), Some(U256::from(42)));
        assert_eq!(parse_word("ff"), Some(U256::from(255)));
        assert_eq!(parse_word("0xzz"), None);
    }

    #[test]
    fn test_word_to_address_keeps_low_bytes() {
        let word = parse_word("0xffffffffffffffffffffffff00000000000000000000000000000000000000aa").unwrap();
        assert_eq!(
            word_to_address(word),
            "0x00000000000000000000000000000000000000aa".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_stack_nth_counts_from_top() {
        let step = step(&["0x1", "0x2", "0x3"], &[]);
        let reader = StepReader::new(7, &step);
        assert_eq!(reader.stack_nth(0).unwrap(), U256::from(3));
        assert_eq!(reader.stack_nth(2).unwrap(), U256::from(1));
        assert_eq!(
            reader.stack_nth(3),
            Err(BuildError::StackTooShort {
                step: 7,
                op: "CALL".to_string(),
                index: 3,
                length: 3,
            })
        );
    }

    #[test]
    fn test_read_memory() {
        let memory = vec![
            "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff".to_string(),
            "a9059cbb00000000000000000000000000000000000000000000000000000000".to_string(),
        ];
        assert_eq!(read_memory(&memory, 32, 4).unwrap(), Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]));
        assert_eq!(read_memory(&memory, 1, 2).unwrap(), Bytes::from(vec![0x11, 0x22]));
        assert_eq!(read_memory(&memory, 60, 8), None);
        assert_eq!(read_memory(&[], 1_000, 0).unwrap(), Bytes::new());
    }

    #[test]
    fn test_memory_at_reads_stack_arguments() {
        // offset 0x20 on top, length 0x04 below it
        let zero = "0".repeat(64);
        let word = format!("deadbeef{}", "0".repeat(56));
        let step = step(&["0x4", "0x20"], &[zero.as_str(), word.as_str()]);
        let reader = StepReader::new(0, &step);
        assert_eq!(reader.memory_at(0, 1).unwrap().unwrap(), Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
    }
}
