pub mod call_trace;
pub mod layout;
pub mod memory;
pub mod opcode;
pub mod rpc;

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::decoder::DecodingContext;
use crate::models::common::{BuildOptions, TracerKind};
use crate::models::errors::{AcquisitionError, BuildError};
use crate::models::traces::{CallTree, RawTrace, RootCall};

/// Builds the annotated call tree with the builder matching the trace's shape.
pub fn build_call_tree(
    trace: &RawTrace,
    context: &DecodingContext,
    options: BuildOptions,
) -> Result<CallTree, BuildError> {
    match trace {
        RawTrace::Opcode { trace, root } => opcode::build_from_opcodes(trace, root, context, options),
        RawTrace::Call(call) => Ok(CallTree {
            root: call_trace::annotate_call_trace(call, context),
            anomalies: Vec::new(),
        }),
    }
}

/// Reads a saved trace. The file may hold the bare tracer result or a full
/// JSON-RPC response with the result under `result`.
pub fn load_trace_file<P: AsRef<Path>>(path: P, kind: TracerKind, root: Option<RootCall>) -> Result<RawTrace> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read trace file {}", path.display()))?;
    let mut value: Value = serde_json::from_str(&contents).context("trace file is not JSON")?;
    if let Some(result) = value.get_mut("result") {
        value = result.take();
    }

    match kind {
        TracerKind::Opcode => {
            let root = root.ok_or(AcquisitionError::MissingRootCall)?;
            let trace = serde_json::from_value(value).context("failed to parse struct log trace")?;
            Ok(RawTrace::Opcode { trace, root })
        }
        TracerKind::Custom => {
            let trace = serde_json::from_value(value).context("failed to parse call trace")?;
            Ok(RawTrace::Call(trace))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_trace_file_unwraps_rpc_envelope() {
        let path = std::env::temp_dir().join(format!("tx-trace-call-{}.json", std::process::id()));
        let trace = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "type": "CALL",
                "from": "0x00000000000000000000000000000000000000f0",
                "to": "0x00000000000000000000000000000000000000aa",
                "gas": "0x5208",
                "gasUsed": "0x5208",
                "input": "0x",
                "output": "0x",
            }
        });
        fs::write(&path, trace.to_string()).unwrap();

        let loaded = load_trace_file(&path, TracerKind::Custom, None).unwrap();
        let opcode = load_trace_file(&path, TracerKind::Opcode, None);
        fs::remove_file(&path).unwrap();

        assert!(matches!(loaded, RawTrace::Call(ref call) if call.r#type == "CALL"));
        assert!(opcode.is_err());
    }
}
