//! Command-line argument parsing.
//!
//! Usage:
//!   pex [-c <file> | -n] [-a NAME=VALUE]... [-u] [-p] [-v]... [<expr>...]
//!
//! With no expressions, one expression is read per line from stdin.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Parsed command-line arguments.
#[derive(Parser, Debug, Default)]
#[command(name = "pex", version, about = "Parse, fold and evaluate policy expressions")]
pub struct CliArgs {
    /// Config file [default: $PEX_CONFIG, else pex.conf in the user config dir]
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Do not load any config file
    #[arg(long, short = 'n', conflicts_with = "config")]
    pub no_config: bool,

    /// Add a request value; the attribute is defined if needed
    #[arg(long = "attr", short = 'a', value_name = "NAME=VALUE")]
    pub attrs: Vec<String>,

    /// Let expressions reference attributes not in the dictionary
    #[arg(long, short = 'u')]
    pub allow_unknown: bool,

    /// Print the folded expression without evaluating it
    #[arg(long, short = 'p')]
    pub print_only: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    /// Expressions to evaluate
    #[arg(value_name = "EXPR")]
    pub exprs: Vec<String>,
}

/// Parse `std::env::args()`, exiting with usage on error.
pub fn parse_args() -> CliArgs {
    CliArgs::parse()
}

/// Parse an explicit argument list (exposed for testing).
pub fn try_parse_from<I, T>(argv: I) -> Result<CliArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    CliArgs::try_parse_from(argv)
}

/// Default `RUST_LOG` filter for a `-v` count.
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Split a `-a NAME=VALUE` argument.
pub fn split_assignment(s: &str) -> Result<(&str, &str), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => Err(format!("expected NAME=VALUE, got '{s}'")),
    }
}
