//! Fish CLI: a single command that reads a ><> codebox from a file and
//! runs it to completion, alternating JIT-compiled traces and the
//! interpreter fallback the way `fish_engine::Interpreter` does.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use fish_engine::{Codebox, Interpreter, JitConfig};

#[derive(Parser)]
#[command(name = "fish")]
#[command(about = "Tracing JIT for the ><> (Fish) esoteric language")]
#[command(version)]
struct Cli {
    /// Path to the ><> source file to run.
    file: PathBuf,

    /// Disable the JIT and run the program through the direct interpreter only.
    #[arg(long)]
    no_jit: bool,

    /// Maximum number of compiled traces kept in the cache.
    #[arg(long, default_value = "256")]
    max_cached_traces: usize,

    /// Enable debug logging (trace compilation, cache hits/misses).
    #[arg(short, long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let source = fs::read_to_string(&cli.file).with_context(|| format!("reading {}", cli.file.display()))?;
    let codebox = Codebox::parse(&source);

    let config = JitConfig {
        max_cached_traces: cli.max_cached_traces,
        jit_disabled: cli.no_jit,
    };

    let mut interp = Interpreter::with_config(codebox, config);
    interp.run().with_context(|| format!("running {}", cli.file.display()))?;

    log::debug!("halted with {} trace(s) cached", interp.cached_trace_count());

    Ok(())
}
