//! `pex.conf` configuration file parser.
//!
//! A line-oriented file declaring the attribute dictionary and the request
//! values expressions are evaluated against:
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `attribute <Name> <type>` | declare an attribute |
//! | `value <Name> <literal>` | append a value for a declared attribute |
//! | `set allow_unknown=<yes\|no>` | allow expressions to define attributes |
//! | Lines starting with `#` or `;` | comment, ignored |

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;

use crate::dict::Dictionary;
use crate::expr::interp::MapRequest;
use crate::expr::value::{Type, Value, ValueBox};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "PEX_CONFIG";

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

/// Dictionary and request values loaded from a config file.
#[derive(Debug, Default)]
pub struct Config {
    pub dictionary: Dictionary,
    pub request: MapRequest,
    pub allow_unknown: bool,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.
    ///
    /// Bad lines are reported and skipped; everything else still loads.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            let (cmd, args_str) = line
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((line, ""));
            let tokens = split_args(args_str.trim());

            let result = match cmd {
                "attribute" => config.attribute(&tokens),
                "value" => config.value(&tokens),
                "set" => config.set(&tokens),
                other => Err(format!("unknown directive '{other}'")),
            };
            if let Err(message) = result {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        log::debug!(
            "loaded config: {} attributes, {} errors",
            config.dictionary.len(),
            errors.len()
        );
        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        log::info!("reading config from {}", path.display());
        Ok(Self::load_str(&s))
    }

    fn attribute(&mut self, tokens: &[String]) -> Result<(), String> {
        let [name, ty] = tokens else {
            return Err("usage: attribute <name> <type>".into());
        };
        let ty = Type::from_name(ty).ok_or_else(|| format!("unknown data type '{ty}'"))?;
        self.dictionary
            .define(name, ty)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn value(&mut self, tokens: &[String]) -> Result<(), String> {
        let [name, text] = tokens else {
            return Err("usage: value <name> <literal>".into());
        };
        let attr = self
            .dictionary
            .get(name)
            .ok_or_else(|| format!("attribute '{name}' is not defined"))?;
        let value = Value::parse_as(text, attr.ty).map_err(|e| e.to_string())?;
        self.request.insert(&attr.name, ValueBox::tainted(value));
        Ok(())
    }

    fn set(&mut self, tokens: &[String]) -> Result<(), String> {
        // `set name=value` or `set name value`
        let (name, val) = match tokens {
            [one] => one
                .split_once('=')
                .ok_or_else(|| format!("set: missing value for '{one}'"))?,
            [name, val] => (name.as_str(), val.as_str()),
            _ => return Err("usage: set <name>=<value>".into()),
        };
        match name {
            "allow_unknown" => {
                self.allow_unknown = parse_flag(val)
                    .ok_or_else(|| format!("set: expected yes or no, got '{val}'"))?;
                Ok(())
            }
            other => Err(format!("set: unknown setting '{other}'")),
        }
    }
}

/// The config file to load when none is given on the command line.
///
/// `$PEX_CONFIG` wins; otherwise `pex.conf` in the platform config
/// directory, if it exists.
pub fn default_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    let dirs = ProjectDirs::from("org", "pex", "pex")?;
    let path = dirs.config_dir().join("pex.conf");
    path.is_file().then_some(path)
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "yes" | "on" | "true" | "1" => Some(true),
        "no" | "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.
fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() || quoted {
                    args.push(std::mem::take(&mut cur));
                }
                quoted = false;
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() || quoted {
        args.push(cur);
    }
    args
}
