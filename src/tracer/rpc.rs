//! Trace acquisition over JSON-RPC.
//!
//! Both tracer variants use the same two debug RPCs; only the tracer options
//! differ. Every request goes through the retry helper.

use alloy_eips::{BlockId, BlockNumberOrTag};
use alloy_network::TransactionResponse;
use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_provider::{Provider, ProviderBuilder, ext::DebugApi};
use alloy_rpc_types_eth::{Transaction, TransactionInput, TransactionRequest};
use alloy_rpc_types_trace::geth::{
    GethDebugTracerType, GethDebugTracingCallOptions, GethDebugTracingOptions,
    GethDefaultTracingOptions,
};
use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::models::common::{Config, TracerKind};
use crate::models::errors::AcquisitionError;
use crate::models::traces::{MinedTransaction, OpcodeTrace, RawCallTrace, RawTrace, RootCall};
use crate::utils::retry::{RetryConfig, retry};

const CALL_TRACER: &str = include_str!("call_tracer.js");

/// What to trace: a mined transaction or a pending call.
#[derive(Clone, Debug)]
pub enum TraceTarget {
    Transaction(TxHash),
    Call {
        request: TransactionRequest,
        block: BlockId,
    },
}

impl TraceTarget {
    /// Resolves a command-line target: a transaction hash, or a quote URL whose
    /// response describes the call to simulate.
    pub async fn resolve(target: &str) -> Result<Self> {
        if target.starts_with("0x") {
            return Ok(Self::Transaction(parse_tx_hash(target)?));
        }
        if target.starts_with("http://") || target.starts_with("https://") {
            let request = fetch_quote(target).await?;
            return Ok(Self::pending(request));
        }
        Err(AcquisitionError::InvalidTarget {
            target: target.to_string(),
        }
        .into())
    }

    /// A call simulated on top of the latest block.
    pub fn pending(request: TransactionRequest) -> Self {
        Self::Call {
            request,
            block: BlockId::Number(BlockNumberOrTag::Latest),
        }
    }
}

pub fn parse_tx_hash(target: &str) -> Result<TxHash, AcquisitionError> {
    target.parse().map_err(|_| AcquisitionError::InvalidTarget {
        target: target.to_string(),
    })
}

pub fn connect(rpc_url: &str) -> Result<impl Provider> {
    let url = Url::parse(rpc_url).with_context(|| format!("invalid RPC URL {rpc_url}"))?;
    Ok(ProviderBuilder::new().connect_http(url))
}

////////////////////////////////////// Quotes ////////////////////////////////////////
pub async fn fetch_quote(url: &str) -> Result<TransactionRequest> {
    info!("Fetching quote from {}", url);
    let body = reqwest::get(url)
        .await
        .context("quote request failed")?
        .error_for_status()
        .context("quote endpoint returned an error")?
        .text()
        .await
        .context("failed to read quote response")?;
    let quote: Value = serde_json::from_str(&body).context("quote response is not JSON")?;
    Ok(quote_request(&quote)?)
}

/// Builds the call request described by a swap quote: `to` and `data` are
/// required, `from`, `value` and `gas` are used when present.
pub fn quote_request(quote: &Value) -> Result<TransactionRequest, AcquisitionError> {
    let field = |name: &str| quote.get(name).filter(|value| !value.is_null());
    let missing = |name: &str| AcquisitionError::MissingQuoteField {
        field: name.to_string(),
    };

    let to: Address = field("to")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| missing("to"))?;
    let data: Bytes = field("data")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| missing("data"))?;

    let mut request = TransactionRequest::default()
        .to(to)
        .input(TransactionInput::new(data));
    if let Some(from) = field("from").and_then(Value::as_str).and_then(|s| s.parse().ok()) {
        request = request.from(from);
    }
    if let Some(value) = field("value").and_then(quote_number) {
        request = request.value(value);
    }
    if let Some(gas) = field("gas").and_then(quote_number).and_then(|gas| u64::try_from(gas).ok()) {
        request = request.gas_limit(gas);
    }
    Ok(request)
}

// Quote APIs send amounts as decimal strings, occasionally as numbers or hex
fn quote_number(value: &Value) -> Option<U256> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

pub fn request_from_root(root: &RootCall) -> TransactionRequest {
    let mut request = TransactionRequest::default().input(TransactionInput::new(root.calldata.clone()));
    if let Some(to) = root.to {
        request = request.to(to);
    }
    if let Some(from) = root.from {
        request = request.from(from);
    }
    if let Some(value) = root.value {
        request = request.value(value);
    }
    request
}

pub fn root_from_request(request: &TransactionRequest) -> RootCall {
    RootCall {
        from: request.from,
        to: request.to.and_then(|kind| kind.to().copied()),
        calldata: request.input.input().cloned().unwrap_or_default(),
        value: request.value,
    }
}

////////////////////////////////////// Traces ////////////////////////////////////////
pub fn struct_log_options(timeout: &str) -> GethDebugTracingOptions {
    GethDebugTracingOptions {
        config: GethDefaultTracingOptions {
            enable_memory: Some(true),
            disable_storage: Some(true),
            ..Default::default()
        },
        timeout: Some(timeout.to_string()),
        ..Default::default()
    }
}

pub fn call_tracer_options(timeout: &str) -> GethDebugTracingOptions {
    GethDebugTracingOptions {
        config: GethDefaultTracingOptions {
            enable_memory: Some(true),
            disable_storage: Some(true),
            ..Default::default()
        },
        tracer: Some(GethDebugTracerType::JsTracer(CALL_TRACER.to_string())),
        timeout: Some(timeout.to_string()),
        ..Default::default()
    }
}

fn call_options(tracing_options: GethDebugTracingOptions) -> GethDebugTracingCallOptions {
    GethDebugTracingCallOptions {
        tracing_options,
        ..Default::default()
    }
}

/// Acquires a trace with the configured tracer. Opcode traces are paired with
/// the root call, which the struct logger does not report.
pub async fn fetch_trace<P: Provider>(
    provider: &P,
    target: &TraceTarget,
    config: &Config,
) -> Result<RawTrace> {
    match config.tracer {
        TracerKind::Opcode => {
            let trace = fetch_opcode_trace(provider, target, &config.timeout, &config.retry).await?;
            let root = match target {
                TraceTarget::Transaction(tx_hash) => get_root_call(provider, *tx_hash, &config.retry).await?,
                TraceTarget::Call { request, .. } => root_from_request(request),
            };
            Ok(RawTrace::Opcode { trace, root })
        }
        TracerKind::Custom => {
            let trace = fetch_call_trace(provider, target, &config.timeout, &config.retry).await?;
            Ok(RawTrace::Call(trace))
        }
    }
}

pub async fn fetch_opcode_trace<P: Provider>(
    provider: &P,
    target: &TraceTarget,
    timeout: &str,
    retry_config: &RetryConfig,
) -> Result<OpcodeTrace> {
    let options = struct_log_options(timeout);
    let trace = retry(|| async {
        let result = match target {
            TraceTarget::Transaction(tx_hash) => {
                provider
                    .debug_trace_transaction_as::<OpcodeTrace>(*tx_hash, options.clone())
                    .await
            }
            TraceTarget::Call { request, block } => {
                provider
                    .debug_trace_call_as::<OpcodeTrace>(request.clone(), *block, call_options(options.clone()))
                    .await
            }
        };

        result.map_err(|e| {
            warn!("Failed to fetch opcode trace. Error details:\n{:#?}", e);
            anyhow!("RPC error: {}", e)
        })
    },
    retry_config,
    "debug_trace_opcodes"
    )
    .await?;

    if trace.struct_logs.is_empty() {
        return Err(AcquisitionError::EmptyTrace.into());
    }
    info!("Fetched {} struct log steps", trace.struct_logs.len());
    Ok(trace)
}

pub async fn fetch_call_trace<P: Provider>(
    provider: &P,
    target: &TraceTarget,
    timeout: &str,
    retry_config: &RetryConfig,
) -> Result<RawCallTrace> {
    let options = call_tracer_options(timeout);
    retry(|| async {
        let result = match target {
            TraceTarget::Transaction(tx_hash) => {
                provider
                    .debug_trace_transaction_as::<RawCallTrace>(*tx_hash, options.clone())
                    .await
            }
            TraceTarget::Call { request, block } => {
                provider
                    .debug_trace_call_as::<RawCallTrace>(request.clone(), *block, call_options(options.clone()))
                    .await
            }
        };

        result.map_err(|e| {
            warn!("Failed to fetch call trace. Error details:\n{:#?}", e);
            anyhow!("RPC error: {}", e)
        })
    },
    retry_config,
    "debug_trace_calls"
    )
    .await
}

/// Sender, target, call data and value of a mined transaction.
pub async fn get_root_call<P: Provider>(
    provider: &P,
    tx_hash: TxHash,
    retry_config: &RetryConfig,
) -> Result<RootCall> {
    let transaction = get_transaction(provider, tx_hash, retry_config).await?;
    Ok(root_from_transaction(&transaction))
}

async fn get_transaction<P: Provider>(
    provider: &P,
    tx_hash: TxHash,
    retry_config: &RetryConfig,
) -> Result<Transaction> {
    let transaction = retry(|| async {
        provider
            .get_transaction_by_hash(tx_hash)
            .await
            .map_err(|e| anyhow!("RPC error: {}", e))
    },
    retry_config,
    "get_transaction_by_hash"
    )
    .await?
    .ok_or(AcquisitionError::TransactionNotFound { tx_hash })?;
    Ok(transaction)
}

fn root_from_transaction(transaction: &Transaction) -> RootCall {
    RootCall {
        from: Some(TransactionResponse::from(transaction)),
        to: alloy_consensus::Transaction::to(transaction),
        calldata: alloy_consensus::Transaction::input(transaction).clone(),
        value: Some(alloy_consensus::Transaction::value(transaction)),
    }
}

////////////////////////////////////// Receipts ////////////////////////////////////////
/// The transaction, its receipt and the block it landed in.
pub async fn get_mined_transaction<P: Provider>(
    provider: &P,
    tx_hash: TxHash,
    retry_config: &RetryConfig,
) -> Result<MinedTransaction> {
    let transaction = get_transaction(provider, tx_hash, retry_config).await?;

    let receipt = retry(|| async {
        provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| anyhow!("RPC error: {}", e))
    },
    retry_config,
    "get_transaction_receipt"
    )
    .await?
    // Pending transactions have no receipt yet
    .ok_or(AcquisitionError::TransactionNotFound { tx_hash })?;

    Ok(MinedTransaction {
        tx_hash,
        call: root_from_transaction(&transaction),
        block_number: transaction.block_number.or(receipt.block_number),
        transaction_index: transaction.transaction_index,
        success: receipt.status(),
        gas_used: receipt.gas_used,
        logs: receipt.inner.logs().iter().map(|log| log.inner.clone()).collect(),
    })
}

/// Replays `call` at `block` and returns the data it reverts with. A node that
/// rejects the call without revert data yields `None`; transport failures are
/// retried.
pub async fn fetch_revert_data<P: Provider>(
    provider: &P,
    call: &RootCall,
    block: u64,
    retry_config: &RetryConfig,
) -> Result<Option<Bytes>> {
    let request = request_from_root(call);
    retry(|| async {
        match provider.call(request.clone()).block(BlockId::number(block)).await {
            Ok(output) => Ok(Some(output)),
            Err(e) => match e.as_error_resp() {
                Some(payload) => {
                    info!("eth_call at block {} failed: {}", block, payload.message);
                    Ok(payload.as_revert_data())
                }
                None => Err(anyhow!("RPC error: {}", e)),
            },
        }
    },
    retry_config,
    "eth_call"
    )
    .await
}
