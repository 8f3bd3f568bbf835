/// End-to-end tests: run expressions through the `pex` binary and check what
/// it prints and how it exits.
///
/// Every run passes `-n` (or an explicit `-c`) so a config file in the user's
/// config directory cannot change the results.

use std::io::Write;
use std::process::{Command, Stdio};

// ── Helpers ───────────────────────────────────────────────────────────────────

struct Output {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

fn pex_binary() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_BIN_EXE_pex"))
}

fn run_pex(args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(pex_binary())
        .args(args)
        .env_remove("PEX_CONFIG")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn pex binary");
    {
        let input = child.stdin.as_mut().expect("stdin not open");
        input.write_all(stdin.as_bytes()).expect("write to stdin");
    }
    let out = child.wait_with_output().expect("wait failed");
    Output {
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        code: out.status.code(),
    }
}

fn lines(s: &str) -> Vec<&str> {
    s.lines().collect()
}

// ── Constant expressions ──────────────────────────────────────────────────────

#[test]
fn folds_constant_arithmetic() {
    let out = run_pex(&["-n", "1 + 2 * 3", "(1 + 2) * 3"], "");
    assert_eq!(lines(&out.stdout), vec!["7 => 7", "9 => 9"]);
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
}

#[test]
fn reads_expressions_from_stdin() {
    let out = run_pex(&["-n"], "1 + 1\n\n2 < 3\n");
    assert_eq!(lines(&out.stdout), vec!["2 => 2", "true => true"]);
    assert_eq!(out.code, Some(0));
}

#[test]
fn unreadable_stdin_line_is_reported() {
    let mut child = Command::new(pex_binary())
        .arg("-n")
        .env_remove("PEX_CONFIG")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn pex binary");
    child
        .stdin
        .as_mut()
        .expect("stdin not open")
        .write_all(b"1 + 1\n\xff\xfe\n2 * 3\n")
        .expect("write to stdin");
    let out = child.wait_with_output().expect("wait failed");
    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_eq!(lines(&stdout), vec!["2 => 2", "6 => 6"]);
    assert!(stderr.contains("pex: stdin line 2:"), "{stderr}");
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn long_operator_chain_is_an_error() {
    let chain = format!("&Port{}", " + &Port".repeat(5_000));
    let out = run_pex(&["-n", "-a", "Port=1", &chain], "");
    assert_eq!(out.stdout.lines().count(), 1);
    assert!(
        out.stdout.starts_with("error: ") && out.stdout.contains("Expression is nested too deeply"),
        "{}",
        out.stdout
    );
    assert_eq!(out.code, Some(1));
}

#[test]
fn parse_error_reports_offset() {
    let out = run_pex(&["-n", "1 +", "2"], "");
    assert_eq!(lines(&out.stdout), vec!["error: 3: Expected operand", "2 => 2"]);
    assert_eq!(out.code, Some(1));
}

#[test]
fn folding_error_is_a_parse_error() {
    let out = run_pex(&["-n", "1 / 0"], "");
    assert_eq!(out.stdout.lines().count(), 1);
    assert!(out.stdout.starts_with("error: 0: "), "{}", out.stdout);
    assert_eq!(out.code, Some(1));
}

// ── Attributes ────────────────────────────────────────────────────────────────

#[test]
fn command_line_attributes() {
    let out = run_pex(&["-n", "-a", "Port=1812", "&Port + 1"], "");
    assert_eq!(lines(&out.stdout), vec!["(&Port + 1) => 1813"]);
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
}

#[test]
fn logical_operators_short_circuit() {
    let out = run_pex(
        &["-n", "-a", "A=true", "-a", "B=false", "&A && &B", "&B || &A", "&A && &B && &A"],
        "",
    );
    assert_eq!(
        lines(&out.stdout),
        vec![
            "(&A && &B) => false",
            "(&B || &A) => true",
            "(&A && &B && &A) => false",
        ]
    );
}

#[test]
fn print_only_does_not_evaluate() {
    let out = run_pex(&["-n", "-p", "-a", "Port=1", "&Port + 2 * 3"], "");
    assert_eq!(lines(&out.stdout), vec!["(&Port + 6)"]);
    assert_eq!(out.code, Some(0));
}

#[test]
fn unknown_attribute_rejected_by_default() {
    let out = run_pex(&["-n", "&Nope == 1"], "");
    assert_eq!(lines(&out.stdout), vec!["error: 0: Unknown attribute 'Nope'"]);
    assert_eq!(out.code, Some(1));
}

#[test]
fn missing_attribute_fails_arithmetic() {
    let out = run_pex(&["-n", "-u", "(uint32)&Nope + 1"], "");
    assert!(
        out.stdout.starts_with("((uint32)&Nope + 1) => error: "),
        "{}",
        out.stdout
    );
    assert_eq!(out.code, Some(1));
}

// ── Config files ──────────────────────────────────────────────────────────────

#[test]
fn config_file_supplies_dictionary_and_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# test dictionary").unwrap();
    writeln!(file, "attribute User-Name string").unwrap();
    writeln!(file, "attribute NAS-Port uint32").unwrap();
    writeln!(file, "value User-Name bob").unwrap();
    writeln!(file, "value NAS-Port 1812").unwrap();
    let path = file.path().to_str().unwrap();

    let out = run_pex(
        &["-c", path, "&User-Name == \"bob\"", "&NAS-Port > 1024 && &User-Name"],
        "",
    );
    assert_eq!(
        lines(&out.stdout),
        vec![
            "(&User-Name == \"bob\") => true",
            "((&NAS-Port > (uint32)1024) && &User-Name) => true",
        ]
    );
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
}

#[test]
fn config_from_environment() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "set allow_unknown=yes").unwrap();
    let out = Command::new(pex_binary())
        .arg("(string)&Fresh")
        .env("PEX_CONFIG", file.path())
        .stdin(Stdio::null())
        .output()
        .expect("failed to run pex binary");
    assert_eq!(String::from_utf8_lossy(&out.stdout), "(string)&Fresh => \n");
    assert!(out.status.success());
}

#[test]
fn missing_config_file_is_fatal() {
    let out = run_pex(&["-c", "/nonexistent/pex.conf", "1"], "");
    assert!(out.stdout.is_empty());
    assert!(out.stderr.starts_with("pex: /nonexistent/pex.conf"), "{}", out.stderr);
    assert_eq!(out.code, Some(2));
}

#[test]
fn bad_config_lines_are_warnings() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "bogus line").unwrap();
    writeln!(file, "attribute Port uint32").unwrap();
    let path = file.path().to_str().unwrap();
    let out = run_pex(&["-c", path, "-a", "Port=7", "&Port"], "");
    assert_eq!(lines(&out.stdout), vec!["&Port => 7"]);
    assert!(out.stderr.contains("unknown directive 'bogus'"), "{}", out.stderr);
    assert_eq!(out.code, Some(0));
}
