//! Receipt-level summary of a mined transaction. Needs no trace, only the
//! transaction, its receipt and an `eth_call` replay when it failed.

use alloy_primitives::{Address, B256, Bytes, Selector, TxHash, U256};
use alloy_provider::Provider;
use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::decoder::DecodingContext;
use crate::models::decoded::{DecodedArg, DecodedCall, DecodedRevert};
use crate::models::traces::MinedTransaction;
use crate::tracer::rpc::{fetch_revert_data, get_mined_transaction};
use crate::utils::retry::RetryConfig;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainedTransaction {
    pub tx_hash: TxHash,
    pub success: bool,
    pub block_number: Option<u64>,
    pub transaction_index: Option<u64>,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub gas_used: u64,
    /// Leading four bytes of the input, absent for plain transfers.
    pub selector: Option<Selector>,
    pub decoded_input: Option<DecodedCall>,
    /// Byte offset of the decoded call inside the input. Non-zero when the
    /// call was found embedded in a wrapper's calldata.
    pub input_offset: Option<usize>,
    pub logs: Vec<ExplainedLog>,
    pub revert_reason: Option<DecodedRevert>,
    /// Raw revert bytes returned when replaying a failed transaction.
    pub revert_data: Option<Bytes>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainedLog {
    pub address: Address,
    pub name: Option<String>,
    pub args: Option<Vec<DecodedArg>>,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Decodes a fetched transaction. `revert_data` is what replaying the call
/// returned, if it failed.
pub fn explain(tx: &MinedTransaction, revert_data: Option<&[u8]>, context: &DecodingContext) -> ExplainedTransaction {
    let input = &tx.call.calldata;
    let decoded = context.try_decode_calldata_scan(input);
    if decoded.is_none() && input.len() >= 4 {
        info!("Input of {} matches no known function", tx.tx_hash);
    }

    let logs = tx
        .logs
        .iter()
        .map(|log| {
            let decoded = context.try_decode_log(log.data.topics(), &log.data.data);
            ExplainedLog {
                address: log.address,
                name: decoded.as_ref().map(|event| event.event_name.clone()),
                args: decoded.map(|event| event.args),
                topics: log.data.topics().to_vec(),
                data: log.data.data.clone(),
            }
        })
        .collect();

    ExplainedTransaction {
        tx_hash: tx.tx_hash,
        success: tx.success,
        block_number: tx.block_number,
        transaction_index: tx.transaction_index,
        from: tx.call.from,
        to: tx.call.to,
        value: tx.call.value,
        gas_used: tx.gas_used,
        selector: input.get(..4).and_then(|bytes| Selector::try_from(bytes).ok()),
        input_offset: decoded.as_ref().map(|(offset, _)| *offset),
        decoded_input: decoded.map(|(_, call)| call),
        logs,
        revert_reason: revert_data.and_then(|data| context.try_decode_revert(data)),
        revert_data: revert_data.map(Bytes::copy_from_slice),
    }
}

/// Fetches `tx_hash` with its receipt and explains it. Failed transactions
/// are replayed at their block to recover the revert reason.
pub async fn explain_transaction<P: Provider>(
    provider: &P,
    tx_hash: TxHash,
    context: &DecodingContext,
    retry_config: &RetryConfig,
) -> Result<ExplainedTransaction> {
    let tx = get_mined_transaction(provider, tx_hash, retry_config).await?;
    info!("Transaction {} mined in block {:?} with {} logs", tx_hash, tx.block_number, tx.logs.len());

    let revert_data = match (tx.success, tx.block_number) {
        (false, Some(block)) => match fetch_revert_data(provider, &tx.call, block, retry_config).await {
            Ok(data) => data,
            Err(e) => {
                warn!("Unable to replay {} for its revert reason: {:#}", tx_hash, e);
                None
            }
        },
        _ => None,
    };

    Ok(explain(&tx, revert_data.as_ref().map(|b| b.as_ref()), context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::traces::RootCall;
    use alloy_dyn_abi::{DynSolValue, JsonAbiExt};
    use alloy_primitives::{Log, LogData, b256};
    use alloy_sol_types::{Revert, SolError};

    const TRANSFER_TOPIC: B256 = b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

    fn transfer_calldata(context: &DecodingContext, to: Address, amount: u64) -> Bytes {
        let transfer = &context.functions_for(Selector::from([0xa9, 0x05, 0x9c, 0xbb]))[0];
        transfer
            .abi_encode_input(&[DynSolValue::Address(to), DynSolValue::Uint(U256::from(amount), 256)])
            .unwrap()
            .into()
    }

    fn mined(calldata: Bytes, success: bool, logs: Vec<Log>) -> MinedTransaction {
        MinedTransaction {
            tx_hash: TxHash::repeat_byte(0xab),
            call: RootCall {
                from: Some(Address::repeat_byte(0x01)),
                to: Some(Address::repeat_byte(0x02)),
                calldata,
                value: Some(U256::ZERO),
            },
            block_number: Some(19_000_000),
            transaction_index: Some(4),
            success,
            gas_used: 51_234,
            logs,
        }
    }

    #[test]
    fn test_successful_transfer() {
        let context = DecodingContext::with_builtins().unwrap();
        let token = Address::repeat_byte(0x22);
        let (from, to) = (Address::repeat_byte(0x01), Address::repeat_byte(0x03));
        let transfer = Log {
            address: token,
            data: LogData::new_unchecked(
                vec![TRANSFER_TOPIC, from.into_word(), to.into_word()],
                DynSolValue::Uint(U256::from(9), 256).abi_encode().into(),
            ),
        };
        let unknown = Log {
            address: token,
            data: LogData::new_unchecked(vec![B256::repeat_byte(0x77)], Bytes::new()),
        };
        let tx = mined(transfer_calldata(&context, to, 9), true, vec![transfer, unknown]);

        let explained = explain(&tx, None, &context);
        assert!(explained.success);
        assert_eq!(explained.selector, Some(Selector::from([0xa9, 0x05, 0x9c, 0xbb])));
        assert_eq!(explained.input_offset, Some(0));
        assert_eq!(explained.decoded_input.as_ref().unwrap().function_name, "transfer");
        assert_eq!(explained.logs.len(), 2);
        assert_eq!(explained.logs[0].name.as_deref(), Some("Transfer"));
        assert_eq!(explained.logs[0].args.as_ref().unwrap()[1].value, DynSolValue::Address(to));
        assert_eq!(explained.logs[1].name, None);
        assert_eq!(explained.logs[1].topics, vec![B256::repeat_byte(0x77)]);
        assert!(explained.revert_reason.is_none());
    }

    #[test]
    fn test_failed_transaction_keeps_revert_reason() {
        let context = DecodingContext::with_builtins().unwrap();
        let revert = Revert {
            reason: "transfer amount exceeds balance".to_string(),
        }
        .abi_encode();
        let tx = mined(transfer_calldata(&context, Address::repeat_byte(0x03), 1), false, vec![]);

        let explained = explain(&tx, Some(&revert), &context);
        assert!(!explained.success);
        let reason = explained.revert_reason.unwrap();
        assert_eq!(reason.error_name, "Error");
        assert_eq!(
            reason.values[0].value,
            DynSolValue::String("transfer amount exceeds balance".to_string())
        );
        assert_eq!(explained.revert_data, Some(Bytes::from(revert)));
    }

    #[test]
    fn test_wrapped_input_is_found() {
        let context = DecodingContext::with_builtins().unwrap();
        let inner = transfer_calldata(&context, Address::repeat_byte(0x03), 5);
        // unknown forwarder selector followed by a word of padding
        let mut input = vec![0x1c, 0xff, 0x79, 0xcd];
        input.extend_from_slice(&[0u8; 32]);
        input.extend_from_slice(&inner);

        let explained = explain(&mined(input.into(), true, vec![]), None, &context);
        assert_eq!(explained.selector, Some(Selector::from([0x1c, 0xff, 0x79, 0xcd])));
        assert_eq!(explained.input_offset, Some(36));
        assert_eq!(explained.decoded_input.unwrap().function_name, "transfer");
    }

    #[test]
    fn test_plain_transfer_has_no_selector() {
        let context = DecodingContext::with_builtins().unwrap();
        let explained = explain(&mined(Bytes::new(), true, vec![]), None, &context);
        assert_eq!(explained.selector, None);
        assert!(explained.decoded_input.is_none());
        assert!(explained.logs.is_empty());

        let json = serde_json::to_value(&explained).unwrap();
        assert_eq!(json["gasUsed"], 51_234);
        assert_eq!(json["transactionIndex"], 4);
    }
}
