use std::io::{self, BufRead};
use std::process::ExitCode;

use pex::cli::{self, CliArgs};
use pex::config::{self, Config};
use pex::expr::{parse, Interpreter, ParseRules, Registry, Value, ValueBox};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = cli::parse_args();

    let env = env_logger::Env::default().filter_or("RUST_LOG", cli::log_filter(args.verbose));
    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(args.verbose >= 2)
        .init();

    let mut config = match load_config(&args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("pex: {msg}");
            return ExitCode::from(2);
        }
    };
    for assignment in &args.attrs {
        if let Err(msg) = apply_assignment(&mut config, assignment) {
            eprintln!("pex: {msg}");
            return ExitCode::from(2);
        }
    }

    let registry = match Registry::with_expressions() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("pex: {e}");
            return ExitCode::from(2);
        }
    };
    let allow_unknown = args.allow_unknown || config.allow_unknown;

    let mut failed = false;
    let exprs: Vec<String> = if args.exprs.is_empty() {
        let (exprs, read_failed) = read_exprs(io::stdin().lock());
        failed |= read_failed;
        exprs
    } else {
        args.exprs.clone()
    };

    for text in &exprs {
        let parsed = {
            let mut rules =
                ParseRules::new(&registry, &mut config.dictionary).allow_unknown(allow_unknown);
            parse(text, &mut rules)
        };
        let parsed = match parsed {
            Ok(p) => p,
            Err(e) => {
                println!("error: {e}");
                failed = true;
                continue;
            }
        };
        if args.print_only {
            println!("{parsed}");
            continue;
        }

        let mut interp = Interpreter::new();
        match interp.eval(&parsed.root, &mut config.request).await {
            Ok(values) => {
                let shown: Vec<String> = values.iter().map(ToString::to_string).collect();
                println!("{parsed} => {}", shown.join(", "));
            }
            Err(e) => {
                println!("{parsed} => error: {e}");
                failed = true;
            }
        }
        log::debug!(
            "looked up {:?}, suspended {} time(s)",
            config.request.lookups(),
            interp.suspensions()
        );
        config.request.clear_lookups();
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Non-blank lines of `input`, and whether any line could not be read.
///
/// A line that is not UTF-8 is reported and skipped; any other read error ends
/// the input.
fn read_exprs(input: impl BufRead) -> (Vec<String>, bool) {
    let mut exprs = Vec::new();
    let mut failed = false;
    for (n, line) in input.lines().enumerate() {
        match line {
            Ok(l) if l.trim().is_empty() => {}
            Ok(l) => exprs.push(l),
            Err(e) => {
                eprintln!("pex: stdin line {}: {e}", n + 1);
                failed = true;
                if e.kind() != io::ErrorKind::InvalidData {
                    break;
                }
            }
        }
    }
    (exprs, failed)
}

/// Load the config named on the command line, or the default one.
fn load_config(args: &CliArgs) -> Result<Config, String> {
    if args.no_config {
        return Ok(Config::new());
    }
    let Some(path) = args.config.clone().or_else(config::default_path) else {
        return Ok(Config::new());
    };
    let (cfg, errors) =
        Config::load_file(&path).map_err(|e| format!("{}: {e}", path.display()))?;
    for e in &errors {
        log::warn!("{}: {e}", path.display());
    }
    Ok(cfg)
}

/// Apply `-a NAME=VALUE`, defining `NAME` from the value's inferred type when
/// the dictionary lacks it.
fn apply_assignment(config: &mut Config, assignment: &str) -> Result<(), String> {
    let (name, text) = cli::split_assignment(assignment)?;
    let value = match config.dictionary.get(name) {
        Some(attr) => Value::parse_as(text, attr.ty).map_err(|e| format!("{name}: {e}"))?,
        None => {
            let value = Value::infer(text).unwrap_or_else(|| Value::String(text.to_owned()));
            config
                .dictionary
                .register_unknown(name, value.ty())
                .map_err(|e| format!("{name}: {e}"))?;
            value
        }
    };
    config.request.insert(name, ValueBox::tainted(value));
    Ok(())
}
