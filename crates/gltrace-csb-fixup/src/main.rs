#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use gltrace::{DecodeMode, TraceReader, TraceWriter};
use gltrace_csb_fixup::{add_conversion_entry, analyze_trace, inject_deletions};
use tracing_subscriber::EnvFilter;

/// Operation name recorded in the output header's conversion history.
const CONVERSION_OPERATION: &str = "inject_client_side_delete";

#[derive(Debug, Parser)]
#[command(
    name = "gltrace-csb-fixup",
    version,
    disable_version_flag = true,
    about = "Inject explicit client-side buffer deletions at each buffer's last use",
    long_about = "Repairs the implicit client-side buffer lifetimes of a recorded trace.\n\
                  A first pass reconstructs, per thread, the last call that references\n\
                  each client-side buffer; a second pass copies the trace verbatim,\n\
                  appending a synthetic glDeleteClientSideBuffer directly after each\n\
                  such call so replay releases the memory at the recorded point."
)]
struct Args {
    /// Source trace to repair
    source: PathBuf,

    /// Destination trace to write
    dest: PathBuf,

    /// Enable per-buffer diagnostic logging
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}

fn main() {
    // Recorded tool contract: help and usage errors exit 1; only -v exits 0.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            process::exit(code);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(&args) {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let (mut meta, liveness) = analyze_trace(&args.source)
        .with_context(|| format!("read {} for liveness analysis", args.source.display()))?;
    tracing::info!(
        "{} client-side buffer deletion point(s) to inject",
        liveness.len()
    );

    add_conversion_entry(
        &mut meta,
        CONVERSION_OPERATION,
        &args.source.display().to_string(),
        serde_json::json!({}),
    );

    let mut source = TraceReader::open(&args.source, DecodeMode::Full)
        .with_context(|| format!("reopen {} for the rewrite pass", args.source.display()))?;
    let mut sink = TraceWriter::create(&args.dest, &meta)
        .with_context(|| format!("open {} for writing", args.dest.display()))?;

    let summary = inject_deletions(&mut source, &mut sink, &liveness).with_context(|| {
        format!(
            "rewrite {} into {}",
            args.source.display(),
            args.dest.display()
        )
    })?;
    sink.finish()
        .with_context(|| format!("flush {}", args.dest.display()))?;

    println!("Injected {} deletion calls", summary.deletions_injected);
    Ok(())
}
