//! # CLI - StrataKV Interactive Shell
//!
//! A REPL over the StrataKV storage engine. Reads commands from stdin,
//! executes them against the engine, and prints results to stdout. Logs go
//! to stderr, so scripted sessions (commands piped via stdin) keep a clean
//! stdout.
//!
//! ## Configuration
//!
//! The engine is configured through `STRATA_*` environment variables (see the
//! `config` crate); log verbosity through `RUST_LOG` (default: `info`).
//!
//! ## Example
//!
//! ```text
//! $ STRATA_DATA_DIR=/tmp/strata cargo run -p cli
//! StrataKV started (data_dir=/tmp/strata, compaction=SizeTiered, memtable=SkipList)
//! > PUT name Alice
//! OK
//! > GET name
//! Alice
//! > RANGE a z
//! name -> Alice
//! (1 entries)
//! > EXIT
//! bye
//! ```

mod commands;

use anyhow::{Context, Result};
use commands::{execute, parse, Command, HELP};
use config::EngineConfig;
use engine::Engine;
use std::io::{self, BufRead, Write};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_logging();

    let config = EngineConfig::from_env().context("invalid STRATA_* configuration")?;
    let mut engine = Engine::open(config)?;

    println!(
        "StrataKV started (data_dir={}, compaction={:?}, memtable={:?})",
        engine.config().data_dir.display(),
        engine.config().compaction_kind,
        engine.config().memtable_kind,
    );
    println!("{}", HELP);
    print!("> ");
    io::stdout().flush().ok();

    for line in io::stdin().lock().lines() {
        let line = line?;
        match parse(&line) {
            Ok(Some(Command::Exit)) => {
                println!("{}", execute(&mut engine, &Command::Exit));
                break;
            }
            Ok(Some(cmd)) => println!("{}", execute(&mut engine, &cmd)),
            Ok(None) => {}
            Err(e) => println!("ERR {}", e),
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    engine.close()?;
    info!("shutdown complete");
    Ok(())
}
