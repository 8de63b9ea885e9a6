use anyhow::{Result, anyhow};
use clap::Parser;
use std::io::{self, Write};
use tracing::{error, info, warn};
use tracing_subscriber::{self, EnvFilter};

use tx_trace::cli::{AbiDecodeArgs, AppArgs, Command, ExplainArgs, TraceArgs};
use tx_trace::decoder::DecodingContext;
use tx_trace::explain::explain_transaction;
use tx_trace::models::common::{BuildOptions, Config};
use tx_trace::models::traces::{RawTrace, RootCall};
use tx_trace::render::address_book::AddressBook;
use tx_trace::render::semantic::Semantics;
use tx_trace::render::{TreePrinter, print_decoded_call, print_explanation, print_json};
use tx_trace::tracer::rpc::{TraceTarget, connect, fetch_trace, parse_tx_hash, request_from_root};
use tx_trace::tracer::{build_call_tree, load_trace_file};
use tx_trace::utils::load_config;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for the tree or JSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let args = AppArgs::parse();

    let config = match load_config(&args.config).and_then(|config| config.with_profile(args.profile.as_deref())) {
        Ok(config) => args.apply_overrides(config),
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Err(e);
        }
    };

    let mut context = DecodingContext::with_builtins()?;
    if let Some(abi_dir) = &config.abi_dir {
        context.load_dir(abi_dir)?;
    }
    info!("Decoding against {} known functions", context.function_count());

    match &args.command {
        Command::Trace(trace_args) => run_trace(trace_args, &config, &context).await,
        Command::Explain(explain_args) => run_explain(explain_args, &config, &context).await,
        Command::AbiDecode(decode_args) => run_abi_decode(decode_args, &config, &context),
    }
}

async fn run_trace(args: &TraceArgs, config: &Config, context: &DecodingContext) -> Result<()> {
    let raw = acquire(args, config).await?;
    let tree = build_call_tree(&raw, context, BuildOptions { strict: config.strict })?;
    if !tree.anomalies.is_empty() {
        warn!("Call tree built with {} tracer anomalies", tree.anomalies.len());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if config.json {
        return print_json(&mut out, &tree);
    }

    let book = address_book(config)?.with_participants(&tree.root);
    TreePrinter::new(&book, config.compact).print(&mut out, &tree.root)?;
    out.flush()?;
    Ok(())
}

async fn acquire(args: &TraceArgs, config: &Config) -> Result<RawTrace> {
    let call = &args.call;
    let root = call.to.map(|to| RootCall {
        from: call.from,
        to: Some(to),
        calldata: call.data.clone().unwrap_or_default(),
        value: call.value,
    });

    if let Some(path) = &args.trace_file {
        info!("Loading trace from {}", path.display());
        return load_trace_file(path, config.tracer, root);
    }

    let target = match (&args.target, root) {
        (Some(target), _) => TraceTarget::resolve(target).await?,
        (None, Some(root)) => TraceTarget::pending(request_from_root(&root)),
        (None, None) => {
            return Err(anyhow!("Nothing to trace: pass a transaction hash, a quote URL or --to/--data"));
        }
    };

    info!("Tracing with the {:?} tracer via {}", config.tracer, config.rpc_url);
    let provider = connect(&config.rpc_url)?;
    fetch_trace(&provider, &target, config).await
}

async fn run_explain(args: &ExplainArgs, config: &Config, context: &DecodingContext) -> Result<()> {
    let tx_hash = parse_tx_hash(&args.tx)?;
    info!("Explaining {} via {}", tx_hash, config.rpc_url);
    let provider = connect(&config.rpc_url)?;
    let explained = explain_transaction(&provider, tx_hash, context, &config.retry).await?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if config.json {
        return print_json(&mut out, &explained);
    }

    let mut book = address_book(config)?;
    if let Some(from) = explained.from {
        book.insert(from, "Sender");
    }
    let semantics = Semantics::new(&book, config.compact);
    print_explanation(&mut out, &semantics, &explained)?;
    out.flush()?;
    Ok(())
}

fn run_abi_decode(args: &AbiDecodeArgs, config: &Config, context: &DecodingContext) -> Result<()> {
    let decoded: Vec<_> = args
        .data
        .iter()
        .map(|data| context.try_decode_calldata(data))
        .collect();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json || config.json {
        return print_json(&mut out, &decoded);
    }

    let book = address_book(config)?;
    let semantics = Semantics::new(&book, config.compact);
    for (data, call) in args.data.iter().zip(&decoded) {
        print_decoded_call(&mut out, &semantics, data, call.as_ref())?;
    }
    out.flush()?;
    Ok(())
}

fn address_book(config: &Config) -> Result<AddressBook> {
    let mut book = AddressBook::new();
    if let Some(dir) = &config.tokenlist_dir {
        book.load_tokenlists(dir, config.network_id)?;
    }
    Ok(book)
}
