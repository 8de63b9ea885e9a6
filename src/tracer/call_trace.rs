//! Annotation of frames produced by the bundled JS call tracer.
//!
//! The tracer already aggregates frames and their logs, so this is a straight
//! recursive walk: normalize gas and topics, then decode what the context knows.

use alloy_primitives::{Address, B256, U256};
use tracing::debug;

use crate::decoder::DecodingContext;
use crate::models::decoded::DecodedOutput;
use crate::models::traces::{AnnotatedCallFrame, AnnotatedEvent, Operation, RawCallTrace, RawEventTrace};
use crate::utils::hex_to_u64;

pub fn annotate_call_trace(trace: &RawCallTrace, context: &DecodingContext) -> AnnotatedCallFrame {
    annotate_frame(trace, context, 0, None)
}

fn annotate_frame(
    raw: &RawCallTrace,
    context: &DecodingContext,
    depth: usize,
    parent_address: Option<Address>,
) -> AnnotatedCallFrame {
    let operation = Operation::from_tracer_type(&raw.r#type);
    let mut frame = AnnotatedCallFrame::new(operation, depth);

    // Delegated code runs against the caller's storage
    frame.address = match operation {
        Operation::DelegateCall | Operation::CallCode => parent_address,
        _ => raw.to,
    };
    frame.code_address = raw.to;
    frame.from = Some(raw.from);
    frame.value = raw.value.as_deref().and_then(parse_quantity);
    frame.gas_cost = gas_field(&raw.gas, "gas");
    // The tracer's gasUsed includes every nested call
    frame.gas_used_total = gas_field(&raw.gas_used, "gasUsed");
    frame.call_data = raw.input.clone();
    frame.return_data = raw.output.clone();
    frame.reverted = raw.reverted;
    frame.error = raw.error.clone();

    frame.decoded_input = context.try_decode_calldata(&raw.input);
    frame.decoded_output = if raw.reverted {
        context.try_decode_revert(&raw.output).map(DecodedOutput::Revert)
    } else {
        frame
            .selector()
            .and_then(|selector| context.try_decode_output(selector, &raw.output))
    };

    frame.events = raw.events.iter().map(|event| annotate_event(event, context)).collect();
    frame.children = raw
        .calls
        .iter()
        .map(|call| annotate_frame(call, context, depth + 1, frame.address))
        .collect();
    frame.settle_own_gas();
    frame
}

fn annotate_event(raw: &RawEventTrace, context: &DecodingContext) -> AnnotatedEvent {
    let topics: Vec<String> = raw.topics.iter().map(|topic| pad_topic(topic)).collect();
    let words: Option<Vec<B256>> = topics.iter().map(|topic| topic.parse().ok()).collect();
    let decoded = words.and_then(|words| context.try_decode_log(&words, &raw.input));

    let name = match &decoded {
        Some(event) => event.event_name.clone(),
        None => raw.topics.first().cloned().unwrap_or_default(),
    };

    AnnotatedEvent {
        topics,
        raw_data: raw.input.clone(),
        name,
        args: decoded.map(|event| event.args),
        gas: raw.gas.as_deref().and_then(hex_to_u64),
        gas_used: raw.gas_used.as_deref().and_then(hex_to_u64),
    }
}

/// Left-pads a tracer topic to a full 32-byte word with a `0x` prefix. Topics
/// that are not hex or exceed 32 bytes are passed through untouched.
pub fn pad_topic(topic: &str) -> String {
    let digits = topic.trim_start_matches("0x");
    if digits.len() > 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return topic.to_string();
    }
    format!("0x{digits:0>64}")
}

/// Decimal or `0x`-hex quantity.
fn parse_quantity(value: &str) -> Option<U256> {
    value.parse().ok()
}

fn gas_field(value: &str, field: &str) -> u64 {
    hex_to_u64(value).unwrap_or_else(|| {
        debug!("Unparseable {} value {:?} in call trace, using 0", field, value);
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_dyn_abi::DynSolValue;
    use alloy_primitives::{Bytes, address, hex};
    use alloy_sol_types::{Revert, SolError};

    fn frame(r#type: &str, to: Address, input: Bytes) -> RawCallTrace {
        RawCallTrace {
            r#type: r#type.to_string(),
            from: address!("00000000000000000000000000000000000000f0"),
            to: Some(to),
            value: None,
            gas: "0x5208".to_string(),
            gas_used: "0x100".to_string(),
            input,
            output: Bytes::new(),
            calls: vec![],
            events: vec![],
            reverted: false,
            error: None,
        }
    }

    #[test]
    fn test_pad_topic() {
        assert_eq!(pad_topic("ab"), format!("0x{}ab", "0".repeat(62)));
        assert_eq!(pad_topic("0x01"), format!("0x{}01", "0".repeat(62)));
        let long = "f".repeat(66);
        assert_eq!(pad_topic(&long), long);
        assert_eq!(pad_topic("not-hex"), "not-hex");
    }

    #[test]
    fn test_gas_and_depth() {
        let context = DecodingContext::new();
        let mut root = frame("CALL", Address::repeat_byte(1), Bytes::new());
        let mut child = frame("STATICCALL", Address::repeat_byte(2), Bytes::new());
        child.gas_used = "0x40".to_string();
        root.calls.push(child);

        let annotated = annotate_call_trace(&root, &context);
        assert_eq!(annotated.operation, Operation::Call);
        assert_eq!(annotated.gas_cost, 21_000);
        assert_eq!(annotated.gas_used_total, 0x100);
        // the child's 0x40 is not counted against the parent
        assert_eq!(annotated.gas_used, 0xc0);
        assert_eq!(annotated.children[0].operation, Operation::StaticCall);
        assert_eq!(annotated.children[0].depth, 1);
        assert_eq!(annotated.children[0].gas_used, 0x40);
    }

    #[test]
    fn test_delegatecall_keeps_parent_address() {
        let context = DecodingContext::new();
        let proxy = Address::repeat_byte(0xaa);
        let implementation = Address::repeat_byte(0xbb);
        let mut root = frame("CALL", proxy, Bytes::new());
        root.calls.push(frame("DELEGATECALL", implementation, Bytes::new()));

        let annotated = annotate_call_trace(&root, &context);
        let child = &annotated.children[0];
        assert_eq!(child.address, Some(proxy));
        assert_eq!(child.code_address, Some(implementation));
    }

    #[test]
    fn test_reverted_frame_decodes_reason() {
        let context = DecodingContext::with_builtins().unwrap();
        let mut raw = frame("CALL", Address::repeat_byte(1), Bytes::from(hex!("a9059cbb")));
        raw.reverted = true;
        raw.output = Revert { reason: "insufficient balance".to_string() }.abi_encode().into();

        let annotated = annotate_call_trace(&raw, &context);
        match annotated.decoded_output.unwrap() {
            DecodedOutput::Revert(revert) => {
                assert_eq!(revert.error_name, "Error");
                assert_eq!(
                    revert.values[0].value,
                    DynSolValue::String("insufficient balance".to_string())
                );
            }
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[test]
    fn test_events_are_padded_and_named() {
        let context = DecodingContext::with_builtins().unwrap();
        let mut raw = frame("CALL", Address::repeat_byte(1), Bytes::new());
        // Transfer(address,address,uint256) with unpadded address topics
        raw.events.push(RawEventTrace {
            topics: vec![
                "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef".to_string(),
                "11".to_string(),
                "22".to_string(),
            ],
            input: DynSolValue::Uint(U256::from(5), 256).abi_encode().into(),
            gas: Some("0x64".to_string()),
            gas_used: Some("0x3".to_string()),
        });
        raw.events.push(RawEventTrace {
            topics: vec!["1234".to_string()],
            input: Bytes::new(),
            gas: None,
            gas_used: None,
        });

        let annotated = annotate_call_trace(&raw, &context);
        let transfer = &annotated.events[0];
        assert_eq!(transfer.name, "Transfer");
        assert_eq!(transfer.topics[1], format!("0x{}11", "0".repeat(62)));
        assert_eq!(transfer.args.as_ref().unwrap()[2].value, DynSolValue::Uint(U256::from(5), 256));
        assert_eq!((transfer.gas, transfer.gas_used), (Some(100), Some(3)));

        let unknown = &annotated.events[1];
        assert_eq!(unknown.name, "1234");
        assert!(unknown.args.is_none());
    }
}
