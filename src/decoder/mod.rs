//! Best-effort ABI decoding against a table of known signatures.
//!
//! Every lookup returns `Option`: most frames in a real trace target contracts
//! outside the known ABI set, so a miss is the common case and never an error.

pub mod revert;
pub mod values;

use alloy_dyn_abi::{DynSolValue, EventExt, FunctionExt, JsonAbiExt};
use alloy_json_abi::{Error as AbiError, Event, EventParam, Function, JsonAbi, Param};
use alloy_primitives::{B256, Selector};
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::models::decoded::{DecodedArg, DecodedCall, DecodedEvent, DecodedOutput};

const BUILTIN_SIGNATURES: &[&str] = &[
    // ERC-20
    "function transfer(address to, uint256 value) returns (bool)",
    "function transferFrom(address from, address to, uint256 value) returns (bool)",
    "function approve(address spender, uint256 value) returns (bool)",
    "function balanceOf(address owner) view returns (uint256)",
    "function allowance(address owner, address spender) view returns (uint256)",
    "function totalSupply() view returns (uint256)",
    "function decimals() view returns (uint8)",
    "function symbol() view returns (string)",
    "function name() view returns (string)",
    "event Transfer(address indexed from, address indexed to, uint256 value)",
    "event Approval(address indexed owner, address indexed spender, uint256 value)",
    // WETH
    "function deposit() payable",
    "function withdraw(uint256 wad)",
    "event Deposit(address indexed dst, uint256 wad)",
    "event Withdrawal(address indexed src, uint256 wad)",
];

/// Read-only signature tables, built once per command invocation and passed by
/// reference into the call-tree builders.
#[derive(Debug, Default, Clone)]
pub struct DecodingContext {
    functions: HashMap<Selector, Vec<Function>>,
    events: HashMap<B256, Vec<Event>>,
    errors: HashMap<Selector, Vec<AbiError>>,
}

impl DecodingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context preloaded with ERC-20 and WETH signatures.
    pub fn with_builtins() -> Result<Self> {
        let mut context = Self::new();
        let abi = JsonAbi::parse(BUILTIN_SIGNATURES.iter().copied())
            .context("failed to parse built-in signatures")?;
        context.add_abi(&abi);
        Ok(context)
    }

    pub fn add_abi(&mut self, abi: &JsonAbi) {
        for function in abi.functions() {
            let entries = self.functions.entry(function.selector()).or_default();
            if !entries.iter().any(|f| f.signature() == function.signature()) {
                entries.push(function.clone());
            }
        }
        for event in abi.events().filter(|event| !event.anonymous) {
            let entries = self.events.entry(event.selector()).or_default();
            if !entries.iter().any(|e| e == event) {
                entries.push(event.clone());
            }
        }
        for error in abi.errors() {
            let entries = self.errors.entry(error.selector()).or_default();
            if !entries.iter().any(|e| e.signature() == error.signature()) {
                entries.push(error.clone());
            }
        }
    }

    /// Loads every `*.json` file in `dir`. Files may hold a bare ABI array or a
    /// compiler artifact with an `abi` field. Unreadable files are skipped.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        let mut loaded = 0;
        let entries = fs::read_dir(dir)
            .with_context(|| format!("failed to read ABI directory {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match read_abi_file(&path) {
                Ok(abi) => {
                    self.add_abi(&abi);
                    loaded += 1;
                }
                Err(e) => warn!("Skipping ABI file {}: {:#}", path.display(), e),
            }
        }

        info!("Loaded {} ABI files from {}", loaded, dir.display());
        Ok(loaded)
    }

    pub fn function_count(&self) -> usize {
        self.functions.values().map(Vec::len).sum()
    }

    pub fn functions_for(&self, selector: Selector) -> &[Function] {
        self.functions
            .get(&selector)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn errors_for(&self, selector: Selector) -> &[AbiError] {
        self.errors
            .get(&selector)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Decodes call data whose leading selector matches a registered function.
    pub fn try_decode_calldata(&self, data: &[u8]) -> Option<DecodedCall> {
        let selector = Selector::try_from(data.get(..4)?).ok()?;
        let body = &data[4..];

        self.functions_for(selector).iter().find_map(|function| {
            match function.abi_decode_input(body) {
                Ok(values) => Some(DecodedCall {
                    function_name: function.name.clone(),
                    signature: function.signature(),
                    selector,
                    arguments: named_params(&function.inputs, values),
                }),
                Err(e) => {
                    debug!("Selector {} matched {} but input did not decode: {}", selector, function.signature(), e);
                    None
                }
            }
        })
    }

    /// Like `try_decode_calldata`, but when the leading selector is unknown the
    /// data is searched for an embedded call to a known function, as sent
    /// through wrappers and forwarders. Returns the byte offset the decoded
    /// call starts at.
    pub fn try_decode_calldata_scan(&self, data: &[u8]) -> Option<(usize, DecodedCall)> {
        if let Some(call) = self.try_decode_calldata(data) {
            return Some((0, call));
        }
        (1..data.len().saturating_sub(3))
            .filter(|&offset| {
                Selector::try_from(&data[offset..offset + 4]).is_ok_and(|selector| self.functions.contains_key(&selector))
            })
            .find_map(|offset| self.try_decode_calldata(&data[offset..]).map(|call| (offset, call)))
    }

    /// Decodes return data with the output types registered for `selector`.
    pub fn try_decode_output(&self, selector: Selector, data: &[u8]) -> Option<DecodedOutput> {
        self.functions_for(selector)
            .iter()
            .filter(|function| !function.outputs.is_empty())
            .find_map(|function| function.abi_decode_output(data).ok().map(|values| {
                DecodedOutput::Return {
                    values: named_params(&function.outputs, values),
                }
            }))
    }

    /// Decodes a log whose first topic matches a registered event.
    pub fn try_decode_log(&self, topics: &[B256], data: &[u8]) -> Option<DecodedEvent> {
        let topic0 = topics.first()?;

        self.events.get(topic0)?.iter().find_map(|event| {
            let decoded = event.decode_log_parts(topics.iter().copied(), data).ok()?;
            let mut indexed = decoded.indexed.into_iter();
            let mut body = decoded.body.into_iter();

            let args = event
                .inputs
                .iter()
                .enumerate()
                .map(|(i, param)| {
                    let value = if param.indexed { indexed.next() } else { body.next() }?;
                    Some(event_arg(i, param, value))
                })
                .collect::<Option<Vec<_>>>()?;

            Some(DecodedEvent {
                event_name: event.name.clone(),
                signature: event.signature(),
                args,
            })
        })
    }
}

fn read_abi_file(path: &Path) -> Result<JsonAbi> {
    let contents = fs::read_to_string(path).context("failed to read ABI file")?;
    let value: Value = serde_json::from_str(&contents).context("failed to parse ABI JSON")?;
    let abi = match value {
        Value::Object(mut artifact) => artifact
            .remove("abi")
            .context("JSON object has no `abi` field")?,
        other => other,
    };
    Ok(serde_json::from_value(abi)?)
}

pub(crate) fn named_params(params: &[Param], values: Vec<DynSolValue>) -> Vec<DecodedArg> {
    params
        .iter()
        .zip(values)
        .enumerate()
        .map(|(i, (param, value))| DecodedArg {
            name: arg_name(i, &param.name),
            ty: param.selector_type().into_owned(),
            value,
        })
        .collect()
}

fn event_arg(index: usize, param: &EventParam, value: DynSolValue) -> DecodedArg {
    DecodedArg {
        name: arg_name(index, &param.name),
        ty: param.selector_type().into_owned(),
        value,
    }
}

// Unnamed parameters are keyed by position.
fn arg_name(index: usize, name: &str) -> String {
    if name.is_empty() {
        index.to_string()
    } else {
        name.to_string()
    }
}
