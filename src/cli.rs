//! Command line interface for tx-trace

use alloy_primitives::{Address, Bytes, U256};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::models::common::{Config, TracerKind};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct AppArgs {
    /// YAML config file. Missing files fall back to defaults.
    #[clap(short, long, global = true, default_value = "config.yml")]
    pub config: PathBuf,
    /// Named profile from the config file
    #[clap(short, long, global = true)]
    pub profile: Option<String>,
    /// Node URL for debug_trace* requests
    #[clap(long, global = true)]
    pub rpc_url: Option<String>,
    /// Directory of JSON ABI files to decode against
    #[clap(long, global = true)]
    pub abi_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Trace a transaction or quote and print its annotated call tree
    Trace(TraceArgs),
    /// Explain a mined transaction from its receipt: call, logs and revert reason
    Explain(ExplainArgs),
    /// Decode raw calldata against the known ABIs
    AbiDecode(AbiDecodeArgs),
}

#[derive(Args, Debug)]
pub struct ExplainArgs {
    /// 0x-prefixed transaction hash
    pub tx: String,
    /// Print the explanation as JSON
    #[clap(long)]
    pub json: bool,
    /// Print full addresses and data instead of shortened hex
    #[clap(long)]
    pub no_compact: bool,
}

#[derive(Args, Debug)]
pub struct TraceArgs {
    /// Transaction hash, or an http(s) URL returning a quote with to/data/value/gas.
    /// Omit when tracing a call given by --to/--data.
    pub target: Option<String>,
    /// Node tracer producing the raw trace
    #[clap(long, value_enum)]
    pub tracer: Option<TracerArg>,
    /// Print the annotated tree as JSON
    #[clap(long)]
    pub json: bool,
    /// Print full addresses and data instead of shortened hex
    #[clap(long)]
    pub no_compact: bool,
    /// Fail on tracer inconsistencies instead of reporting them
    #[clap(long)]
    pub strict: bool,
    #[command(flatten)]
    pub call: CallArgs,
    /// Read the trace from a saved JSON file instead of a node
    #[clap(long)]
    pub trace_file: Option<PathBuf>,
}

/// A call to simulate, or the root call of a saved opcode trace.
#[derive(Args, Debug, Default)]
pub struct CallArgs {
    #[clap(long)]
    pub from: Option<Address>,
    #[clap(long)]
    pub to: Option<Address>,
    #[clap(long)]
    pub data: Option<Bytes>,
    #[clap(long)]
    pub value: Option<U256>,
}

#[derive(Args, Debug)]
pub struct AbiDecodeArgs {
    /// 0x-prefixed calldata blobs
    #[clap(required = true)]
    pub data: Vec<Bytes>,
    #[clap(long)]
    pub json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum TracerArg {
    /// Default struct logger, one entry per opcode
    Opcode,
    /// Bundled JS call tracer
    Custom,
}

impl From<TracerArg> for TracerKind {
    fn from(arg: TracerArg) -> Self {
        match arg {
            TracerArg::Opcode => TracerKind::Opcode,
            TracerArg::Custom => TracerKind::Custom,
        }
    }
}

impl AppArgs {
    /// Flags given on the command line win over file and environment values.
    pub fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(rpc_url) = &self.rpc_url {
            config.rpc_url = rpc_url.clone();
        }
        if let Some(abi_dir) = &self.abi_dir {
            config.abi_dir = Some(abi_dir.clone());
        }
        match &self.command {
            Command::Trace(trace) => {
                if let Some(tracer) = trace.tracer {
                    config.tracer = tracer.into();
                }
                config.json |= trace.json;
                config.strict |= trace.strict;
                if trace.no_compact {
                    config.compact = false;
                }
            }
            Command::Explain(explain) => {
                config.json |= explain.json;
                if explain.no_compact {
                    config.compact = false;
                }
            }
            Command::AbiDecode(_) => {}
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trace_flags() {
        let args = AppArgs::parse_from([
            "tx-trace",
            "--rpc-url",
            "http://node:8545",
            "trace",
            "0xabc",
            "--tracer",
            "opcode",
            "--strict",
        ]);
        let config = args.apply_overrides(Config::default());
        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.tracer, TracerKind::Opcode);
        assert!(config.strict);
        assert!(config.compact);
    }

    #[test]
    fn test_parse_explain() {
        let hash = format!("0x{}", "ab".repeat(32));
        let args = AppArgs::parse_from(["tx-trace", "explain", hash.as_str(), "--json", "--no-compact"]);
        let config = args.apply_overrides(Config::default());
        assert!(config.json);
        assert!(!config.compact);
        match args.command {
            Command::Explain(explain) => assert_eq!(explain.tx, hash),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_abi_decode() {
        let args = AppArgs::parse_from(["tx-trace", "abi-decode", "0xa9059cbb", "--json"]);
        match args.command {
            Command::AbiDecode(decode) => {
                assert_eq!(decode.data, vec![Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb])]);
                assert!(decode.json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
