//! Command parsing and execution for the interactive shell.
//!
//! Each input line maps to one [`Command`]; [`execute`] runs it against the
//! engine and returns the text to print. Engine errors are rendered as
//! `ERR ...` lines so a failed command never ends the session.

use anyhow::{bail, Context, Result};
use engine::{Engine, Record};

/// Page size used when a scan command does not give one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Put { key: String, value: String },
    Get { key: String },
    Del { key: String },
    Prefix { prefix: String, page: usize, page_size: usize },
    Range { min: String, max: String, page: usize, page_size: usize },
    Flush,
    Compact { level: usize },
    Stats,
    Verify,
    Help,
    Exit,
}

/// Optional positional number, `default` when absent.
fn number_or(arg: Option<&str>, default: usize, name: &str) -> Result<usize> {
    match arg {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", name, raw)),
        None => Ok(default),
    }
}

/// Parses one input line. Blank lines yield `Ok(None)`.
///
/// Command names are case-insensitive. Everything after the key of `PUT` is
/// the value, spaces included.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        return Ok(None);
    };
    let cmd = match name.to_uppercase().as_str() {
        "PUT" | "SET" => {
            let Some(key) = parts.next() else {
                bail!("usage: PUT key value");
            };
            let value = parts.collect::<Vec<_>>().join(" ");
            if value.is_empty() {
                bail!("usage: PUT key value");
            }
            Command::Put {
                key: key.to_string(),
                value,
            }
        }
        "GET" => match parts.next() {
            Some(key) => Command::Get { key: key.to_string() },
            None => bail!("usage: GET key"),
        },
        "DEL" | "DELETE" => match parts.next() {
            Some(key) => Command::Del { key: key.to_string() },
            None => bail!("usage: DEL key"),
        },
        "PREFIX" => {
            let prefix = parts.next().unwrap_or("").to_string();
            Command::Prefix {
                prefix,
                page: number_or(parts.next(), 1, "page")?,
                page_size: number_or(parts.next(), DEFAULT_PAGE_SIZE, "page size")?,
            }
        }
        "RANGE" => {
            let (Some(min), Some(max)) = (parts.next(), parts.next()) else {
                bail!("usage: RANGE min max [page] [page_size]");
            };
            Command::Range {
                min: min.to_string(),
                max: max.to_string(),
                page: number_or(parts.next(), 1, "page")?,
                page_size: number_or(parts.next(), DEFAULT_PAGE_SIZE, "page size")?,
            }
        }
        "FLUSH" => Command::Flush,
        "COMPACT" => Command::Compact {
            level: number_or(parts.next(), 0, "level")?,
        },
        "STATS" => Command::Stats,
        "VERIFY" => Command::Verify,
        "HELP" => Command::Help,
        "EXIT" | "QUIT" => Command::Exit,
        other => bail!("unknown command: {}", other),
    };
    Ok(Some(cmd))
}

pub const HELP: &str = "\
PUT key value                      insert or update a key
GET key                            print the value or (nil)
DEL key                            delete a key
PREFIX prefix [page] [page_size]   keys starting with prefix
RANGE min max [page] [page_size]   keys in [min, max]
FLUSH                              write every memtable to level 0
COMPACT [level]                    compact a level now
STATS                              engine counters
VERIFY                             check every table's integrity
EXIT                               flush and quit";

fn render_records(records: &[Record]) -> String {
    if records.is_empty() {
        return "(empty)".to_string();
    }
    let mut out: Vec<String> = records
        .iter()
        .map(|r| format!("{} -> {}", r.key, String::from_utf8_lossy(&r.value)))
        .collect();
    out.push(format!("({} entries)", records.len()));
    out.join("\n")
}

fn tables_line(engine: &Engine) -> String {
    let counts: Vec<String> = (0..engine.config().lsm_max_depth)
        .map(|level| format!("L{}={}", level, engine.level_len(level)))
        .collect();
    counts.join(", ")
}

/// Runs `cmd` and returns the text to print.
pub fn execute(engine: &mut Engine, cmd: &Command) -> String {
    match cmd {
        Command::Put { key, value } => match engine.put(key, value.as_bytes()) {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("ERR put failed: {:#}", e),
        },
        Command::Get { key } => match engine.get(key) {
            Ok(Some(v)) => String::from_utf8_lossy(&v).into_owned(),
            Ok(None) => "(nil)".to_string(),
            Err(e) => format!("ERR read failed: {:#}", e),
        },
        Command::Del { key } => match engine.delete(key) {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("ERR delete failed: {:#}", e),
        },
        Command::Prefix {
            prefix,
            page,
            page_size,
        } => match engine.prefix_scan(prefix, *page, *page_size) {
            Ok(records) => render_records(&records),
            Err(e) => format!("{}\nERR {}", render_records(&e.partial), e),
        },
        Command::Range {
            min,
            max,
            page,
            page_size,
        } => match engine.range_scan(min, max, *page, *page_size) {
            Ok(records) => render_records(&records),
            Err(e) => format!("{}\nERR {}", render_records(&e.partial), e),
        },
        Command::Flush => match engine.flush() {
            Ok(()) => format!("OK ({})", tables_line(engine)),
            Err(e) => format!("ERR flush failed: {:#}", e),
        },
        Command::Compact { level } => match engine.compact_level(*level) {
            Ok(()) => format!("OK ({})", tables_line(engine)),
            Err(e) => format!("ERR compact failed: {:#}", e),
        },
        Command::Stats => match engine.stats() {
            Ok(stats) => format!("{:#?}", stats),
            Err(e) => format!("ERR stats failed: {:#}", e),
        },
        Command::Verify => match engine.verify_tables() {
            Ok(damaged) if damaged.is_empty() => "OK (all tables intact)".to_string(),
            Ok(damaged) => damaged
                .iter()
                .map(|dir| format!("DAMAGED {}", dir.display()))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("ERR verify failed: {:#}", e),
        },
        Command::Help => HELP.to_string(),
        Command::Exit => "bye".to_string(),
    }
}
