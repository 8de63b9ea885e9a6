//! Console and JSON rendering of annotated call trees.

pub mod address_book;
pub mod semantic;

use anyhow::Result;
use serde::Serialize;
use std::io::Write;

use alloy_primitives::Address;

use crate::explain::ExplainedTransaction;
use crate::models::decoded::{DecodedArg, DecodedCall, DecodedOutput};
use crate::models::traces::{AnnotatedCallFrame, AnnotatedEvent, Operation};
use crate::render::address_book::AddressBook;
use crate::render::semantic::Semantics;

const INDENT: &str = "  ";

fn operation_prefix(operation: Operation) -> &'static str {
    match operation {
        Operation::Call => "[C]",
        Operation::CallCode => "[CC]",
        Operation::Create2 => "[C2]",
        Operation::Create => "[CR]",
        Operation::DelegateCall => "[DC]",
        Operation::StaticCall => "[S]",
        Operation::SelfDestruct | Operation::Fallback => "",
    }
}

/// Prints one line per frame, nested two spaces per level:
///
/// ```text
/// [C] [ 46109] To.transfer(to=0xab5801...a9f4ad, value=1000) => true
/// [E] [   375]   Transfer(from=To, to=0xab5801...a9f4ad, value=1000)
/// ```
pub struct TreePrinter<'a> {
    semantics: Semantics<'a>,
}

impl<'a> TreePrinter<'a> {
    pub fn new(book: &'a AddressBook, compact: bool) -> Self {
        Self {
            semantics: Semantics::new(book, compact),
        }
    }

    pub fn print<W: Write>(&self, out: &mut W, root: &AnnotatedCallFrame) -> Result<()> {
        self.print_frame(out, root, 0)
    }

    fn print_frame<W: Write>(&self, out: &mut W, frame: &AnnotatedCallFrame, level: usize) -> Result<()> {
        let padding = INDENT.repeat(level);
        let target = frame
            .code_address
            .or(frame.address)
            .map(|address| self.semantics.address(&address))
            .unwrap_or_else(|| "0x".to_string());
        let (function, args) = match &frame.decoded_input {
            Some(call) => (call.function_name.clone(), self.arguments(call)),
            None => (frame.signature(), "...".to_string()),
        };

        let mut line = format!(
            "{:<4}[{:>6}] {}{}.{}({}) => {}",
            operation_prefix(frame.operation),
            frame.gas_used,
            padding,
            target,
            function,
            args,
            self.output(frame)
        );
        if frame.reverted {
            line.push_str(" [REVERTED]");
            if let Some(error) = &frame.error {
                line.push_str(&format!(" ({error})"));
            }
        }
        if !frame.executed {
            line.push_str(" [no code]");
        }
        writeln!(out, "{line}")?;

        for child in &frame.children {
            self.print_frame(out, child, level + 1)?;
        }
        for event in &frame.events {
            self.print_event(out, event, &padding)?;
        }
        Ok(())
    }

    fn print_event<W: Write>(&self, out: &mut W, event: &AnnotatedEvent, padding: &str) -> Result<()> {
        let gas = event.gas_used.map(|gas| gas.to_string()).unwrap_or_default();
        let args = event
            .args
            .iter()
            .flatten()
            .map(|arg| format!("{}={}", arg.name, self.semantics.value(&arg.value)))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(
            out,
            "{:<4}[{:>6}] {}{}{}({})",
            "[E]",
            gas,
            padding,
            INDENT,
            self.semantics.truncate(&event.name),
            args
        )?;
        Ok(())
    }

    fn arguments(&self, call: &DecodedCall) -> String {
        call.arguments
            .iter()
            .map(|arg| format!("{}={}", arg.name, self.semantics.value(&arg.value)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn output(&self, frame: &AnnotatedCallFrame) -> String {
        let values = |output: &DecodedOutput| {
            output
                .values()
                .iter()
                .map(|arg| self.semantics.value(&arg.value))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match &frame.decoded_output {
            Some(output @ DecodedOutput::Return { .. }) => values(output),
            Some(output @ DecodedOutput::Revert(revert)) => format!("{}({})", revert.error_name, values(output)),
            None => self.semantics.hex(&frame.return_data),
        }
    }
}

/// Writes `value` as pretty JSON followed by a newline.
pub fn print_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// One line per decoded calldata blob for the `abi-decode` command.
pub fn print_decoded_call<W: Write>(
    out: &mut W,
    semantics: &Semantics<'_>,
    data: &[u8],
    decoded: Option<&DecodedCall>,
) -> Result<()> {
    match decoded {
        Some(call) => {
            let args = call
                .arguments
                .iter()
                .map(|arg| format!("{}={}", arg.name, semantics.value(&arg.value)))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(out, "{}({})", call.function_name, args)?;
        }
        None => {
            let selector = data.get(..4).unwrap_or(data);
            writeln!(out, "Unknown selector {}", alloy_primitives::hex::encode_prefixed(selector))?;
        }
    }
    Ok(())
}

/// Labelled summary for the `explain` command:
///
/// ```text
/// Status     reverted
/// Call       transfer(to=0x030303...030303, value=1)
/// Revert     Error(reason=transfer amount exceeds balance)
/// ```
pub fn print_explanation<W: Write>(
    out: &mut W,
    semantics: &Semantics<'_>,
    explained: &ExplainedTransaction,
) -> Result<()> {
    let address = |address: Option<Address>| {
        address
            .map(|address| semantics.address(&address))
            .unwrap_or_else(|| "(contract creation)".to_string())
    };
    let pairs = |args: &[DecodedArg]| {
        args.iter()
            .map(|arg| format!("{}={}", arg.name, semantics.value(&arg.value)))
            .collect::<Vec<_>>()
            .join(", ")
    };

    writeln!(out, "{:<11}{}", "Tx", explained.tx_hash)?;
    writeln!(out, "{:<11}{}", "Status", if explained.success { "success" } else { "reverted" })?;
    if let Some(block) = explained.block_number {
        let index = explained.transaction_index.map(|index| format!(" (index {index})")).unwrap_or_default();
        writeln!(out, "{:<11}{}{}", "Block", block, index)?;
    }
    writeln!(out, "{:<11}{}", "From", address(explained.from))?;
    writeln!(out, "{:<11}{}", "To", address(explained.to))?;
    writeln!(out, "{:<11}{}", "Value", explained.value.unwrap_or_default())?;
    writeln!(out, "{:<11}{}", "Gas used", explained.gas_used)?;

    match (&explained.decoded_input, explained.selector) {
        (Some(call), _) => {
            let offset = match explained.input_offset {
                Some(offset) if offset > 0 => format!(" (at input byte {offset})"),
                _ => String::new(),
            };
            writeln!(out, "{:<11}{}({}){}", "Call", call.function_name, pairs(call.arguments.as_slice()), offset)?;
        }
        (None, Some(selector)) => writeln!(out, "{:<11}unknown selector {}", "Call", selector)?,
        (None, None) => writeln!(out, "{:<11}(no input)", "Call")?,
    }

    if let Some(revert) = &explained.revert_reason {
        writeln!(out, "{:<11}{}({})", "Revert", revert.error_name, pairs(revert.values.as_slice()))?;
    } else if let Some(data) = &explained.revert_data {
        writeln!(out, "{:<11}{}", "Revert", semantics.hex(data))?;
    }

    if !explained.logs.is_empty() {
        writeln!(out, "Logs")?;
    }
    for (index, log) in explained.logs.iter().enumerate() {
        let emitter = semantics.address(&log.address);
        match (&log.name, &log.args) {
            (Some(name), Some(args)) => writeln!(out, "{INDENT}[{index}] {emitter}.{name}({})", pairs(args.as_slice()))?,
            _ => {
                let topic = log.topics.first().map(|topic| semantics.hex(topic.as_slice())).unwrap_or_default();
                writeln!(out, "{INDENT}[{index}] {emitter}.{topic} {}", semantics.hex(&log.data))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explain::ExplainedLog;
    use crate::models::decoded::DecodedRevert;
    use alloy_dyn_abi::DynSolValue;
    use alloy_primitives::{B256, Bytes, Selector, TxHash, U256};

    fn render(root: &AnnotatedCallFrame, book: &AddressBook) -> String {
        let mut out = Vec::new();
        TreePrinter::new(book, true).print(&mut out, root).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_renders_nested_frames_and_events() {
        let token = Address::repeat_byte(0x22);
        let mut book = AddressBook::new();
        book.insert(token, "WETH");

        let mut root = AnnotatedCallFrame::new(Operation::Call, 0);
        root.code_address = Some(Address::repeat_byte(0x11));
        root.gas_used = 50_000;
        root.call_data = Bytes::from(vec![0x12, 0x34, 0x56, 0x78]);

        let mut child = AnnotatedCallFrame::new(Operation::StaticCall, 1);
        child.code_address = Some(token);
        child.gas_used = 2_600;
        child.decoded_input = Some(DecodedCall {
            function_name: "balanceOf".to_string(),
            signature: "balanceOf(address)".to_string(),
            selector: Selector::from([0x70, 0xa0, 0x82, 0x31]),
            arguments: vec![DecodedArg {
                name: "owner".to_string(),
                ty: "address".to_string(),
                value: DynSolValue::Address(token),
            }],
        });
        child.decoded_output = Some(DecodedOutput::Return {
            values: vec![DecodedArg {
                name: "0".to_string(),
                ty: "uint256".to_string(),
                value: DynSolValue::Uint(U256::MAX, 256),
            }],
        });
        root.children.push(child);
        root.events.push(AnnotatedEvent {
            topics: vec!["0x01".to_string()],
            raw_data: Bytes::new(),
            name: "Ping".to_string(),
            args: Some(vec![]),
            gas: None,
            gas_used: Some(375),
        });

        let lines: Vec<String> = render(&root, &book).lines().map(str::to_string).collect();
        assert_eq!(lines[0], "[C] [ 50000] 0x111111...111111.0x12345678(...) => 0x");
        assert_eq!(lines[1], "[S] [  2600]   WETH.balanceOf(owner=WETH) => MAX_UINT");
        assert_eq!(lines[2], "[E] [   375]   Ping()");
    }

    #[test]
    fn test_renders_revert_reason() {
        let mut root = AnnotatedCallFrame::new(Operation::DelegateCall, 0);
        root.reverted = true;
        root.decoded_output = Some(DecodedOutput::Revert(DecodedRevert {
            error_name: "Error".to_string(),
            values: vec![DecodedArg {
                name: "reason".to_string(),
                ty: "string".to_string(),
                value: DynSolValue::String("insufficient balance".to_string()),
            }],
        }));

        let rendered = render(&root, &AddressBook::new());
        assert_eq!(rendered.trim_end(), "[DC][     0] 0x.0x(...) => Error(insufficient balance) [REVERTED]");
    }

    #[test]
    fn test_print_decoded_call_unknown() {
        let book = AddressBook::new();
        let semantics = Semantics::new(&book, true);
        let mut out = Vec::new();
        print_decoded_call(&mut out, &semantics, &[0xde, 0xad, 0xbe, 0xef, 0x00], None).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Unknown selector 0xdeadbeef\n");
    }

    #[test]
    fn test_print_explanation() {
        let token = Address::repeat_byte(0x22);
        let mut book = AddressBook::new();
        book.insert(token, "USDC");
        let semantics = Semantics::new(&book, true);
        let explained = ExplainedTransaction {
            tx_hash: TxHash::repeat_byte(0xab),
            success: false,
            block_number: Some(100),
            transaction_index: Some(2),
            from: Some(Address::repeat_byte(0x01)),
            to: Some(token),
            value: None,
            gas_used: 30_000,
            selector: Some(Selector::from([0xa9, 0x05, 0x9c, 0xbb])),
            decoded_input: None,
            input_offset: None,
            logs: vec![ExplainedLog {
                address: token,
                name: None,
                args: None,
                topics: vec![B256::repeat_byte(0x77)],
                data: Bytes::new(),
            }],
            revert_reason: Some(DecodedRevert {
                error_name: "Error".to_string(),
                values: vec![DecodedArg {
                    name: "reason".to_string(),
                    ty: "string".to_string(),
                    value: DynSolValue::String("paused".to_string()),
                }],
            }),
            revert_data: None,
        };

        let mut out = Vec::new();
        print_explanation(&mut out, &semantics, &explained).unwrap();
        let rendered = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[1], "Status     reverted");
        assert_eq!(lines[2], "Block      100 (index 2)");
        assert_eq!(lines[4], "To         USDC");
        assert_eq!(lines[5], "Value      0");
        assert_eq!(lines[7], "Call       unknown selector 0xa9059cbb");
        assert_eq!(lines[8], "Revert     Error(reason=paused)");
        assert_eq!(lines[9], "Logs");
        assert_eq!(lines[10], "  [0] USDC.0x77777777...77777777 0x");
    }
}
