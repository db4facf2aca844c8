//! Purpose: `tfapi` entry point; parses flags and runs the HTTP server.
//! Role: Binary crate root; everything request-shaped lives in the library.
//! Invariants: Flag errors print help on stderr and exit with status 1.
//! Invariants: Fatal errors are emitted as JSON on non-interactive stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::ffi::OsString;
use std::fmt::Write as _;
use std::io::{self, IsTerminal};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod serve;

use tfapi::api::{Error, ErrorKind, to_exit_code};

const DEFAULT_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;
const DEFAULT_MAX_CONCURRENT_RUNS: usize = 8;

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(0);
            }
            _ => {
                eprintln!("{}", Cli::command().render_help());
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `tfapi --help`."));
            }
        },
    };

    let config = serve_config_from_cli(cli);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start async runtime")
                .with_source(err)
        })?;
    runtime.block_on(serve::serve(config))?;
    Ok(0)
}

/// Accepts Go-style single-dash long flags (`-ip=0.0.0.0`, `-port 9000`).
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let command = Cli::command();
    let longs: Vec<&str> = command
        .get_arguments()
        .filter_map(|arg| arg.get_long())
        .chain(["help", "version"])
        .collect();

    args.into_iter()
        .map(|arg| {
            let replacement = arg.to_str().and_then(|value| {
                let flag = value.strip_prefix('-')?;
                if flag.starts_with('-') {
                    return None;
                }
                let name = flag.split_once('=').map_or(flag, |(name, _)| name);
                longs.contains(&name).then(|| format!("-{value}"))
            });
            replacement.map(OsString::from).unwrap_or(arg)
        })
        .collect()
}

#[derive(Parser, Debug)]
#[command(
    name = "tfapi",
    version,
    about = "Run Terraform as a service providing a RESTful API endpoint",
    long_about = None,
    after_help = r#"ENDPOINTS
  PUT    /apply     apply config or plan to the supplied state
  DELETE /apply     apply in destroy mode
  POST   /plan      generate a plan (returned base64-encoded)
  DELETE /plan      generate a destroy plan
  PUT    /refresh   refresh the supplied state

  Request body:  {"Config": {...}, "Plan": "<base64>", "State": {...}}
  Response body: {"Plan", "State", "Ask", "Info", "Output", "Error", "ExitCode"}

EXAMPLES
  $ tfapi
  $ tfapi -ip=0.0.0.0 -port=9000
  $ tfapi --engine /usr/local/bin/terraform --run-timeout-secs 600
  $ curl -X PUT localhost:8080/refresh -d '{"State": {"version": 4}}'"#
)]
struct Cli {
    #[arg(
        long,
        default_value_t = DEFAULT_IP,
        help = "The IP address the service will bind to",
        help_heading = "Connection"
    )]
    ip: IpAddr,
    #[arg(
        long,
        default_value_t = DEFAULT_PORT,
        help = "The port the service will bind to",
        help_heading = "Connection"
    )]
    port: u16,
    #[arg(
        long,
        value_name = "PATH",
        default_value = "terraform",
        help = "Provisioning engine executable",
        value_hint = ValueHint::CommandName,
        help_heading = "Engine"
    )]
    engine: PathBuf,
    #[arg(
        long,
        value_name = "SECS",
        help = "Kill engine runs that take longer than this (default: no limit)",
        help_heading = "Engine"
    )]
    run_timeout_secs: Option<u64>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Parent directory for per-request staging dirs (default: system temp dir)",
        value_hint = ValueHint::DirPath,
        help_heading = "Engine"
    )]
    temp_dir: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_BODY_BYTES,
        help = "Max request body size in bytes",
        help_heading = "Safety"
    )]
    max_body_bytes: u64,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONCURRENT_RUNS,
        help = "Max engine runs in flight; extra requests are rejected",
        help_heading = "Safety"
    )]
    max_concurrent_runs: usize,
}

fn serve_config_from_cli(cli: Cli) -> serve::ServeConfig {
    serve::ServeConfig {
        bind: SocketAddr::new(cli.ip, cli.port),
        engine: cli.engine,
        temp_dir: cli.temp_dir,
        max_body_bytes: cli.max_body_bytes,
        max_concurrent_runs: cli.max_concurrent_runs,
        run_timeout: cli.run_timeout_secs.map(Duration::from_secs),
    }
}

fn emit_error(err: &Error) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, true));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Engine => "provisioning engine error".to_string(),
        ErrorKind::Timeout => "timed out".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

/// Human rendering for an interactive terminal; only the leading label is colored.
fn error_text(err: &Error, use_color: bool) -> String {
    let label = if use_color {
        "\u{1b}[31merror:\u{1b}[0m"
    } else {
        "error:"
    };
    let mut text = format!("{label} {}", error_message(err));
    if let Some(hint) = err.hint() {
        let _ = write!(text, "\nhint: {hint}");
    }
    if let Some(path) = err.path() {
        let _ = write!(text, "\npath: {}", path.display());
    }
    if let Some(cause) = err.source() {
        let _ = write!(text, "\ncaused by: {cause}");
    }
    text
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, error_json, error_text, normalize_args, serve_config_from_cli};
    use clap::Parser;
    use std::ffi::OsString;
    use std::time::Duration;
    use tfapi::api::{Error, ErrorKind};

    fn args(values: &[&str]) -> Vec<OsString> {
        values.iter().map(OsString::from).collect()
    }

    fn parse(values: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(normalize_args(args(values)))
    }

    #[test]
    fn single_dash_long_flags_are_normalized() {
        let normalized = normalize_args(args(&[
            "tfapi",
            "-ip=0.0.0.0",
            "-port",
            "9000",
            "--engine=/bin/tf",
            "-h",
            "-max-concurrent-runs=2",
        ]));
        assert_eq!(
            normalized,
            args(&[
                "tfapi",
                "--ip=0.0.0.0",
                "--port",
                "9000",
                "--engine=/bin/tf",
                "-h",
                "--max-concurrent-runs=2",
            ])
        );
    }

    #[test]
    fn unknown_single_dash_flags_pass_through() {
        let normalized = normalize_args(args(&["tfapi", "-bogus=1"]));
        assert_eq!(normalized, args(&["tfapi", "-bogus=1"]));
    }

    #[test]
    fn defaults_bind_localhost_8080() {
        let cli = parse(&["tfapi"]).expect("parse");
        let config = serve_config_from_cli(cli);
        assert_eq!(config.bind, "127.0.0.1:8080".parse().expect("addr"));
        assert_eq!(config.engine, std::path::PathBuf::from("terraform"));
        assert!(config.temp_dir.is_none());
        assert!(config.run_timeout.is_none());
        assert_eq!(config.max_concurrent_runs, 8);
    }

    #[test]
    fn go_style_flags_configure_bind() {
        let cli = parse(&["tfapi", "-ip=0.0.0.0", "-port=9000", "-run-timeout-secs=30"])
            .expect("parse");
        let config = serve_config_from_cli(cli);
        assert_eq!(config.bind, "0.0.0.0:9000".parse().expect("addr"));
        assert_eq!(config.run_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn invalid_values_fail_to_parse() {
        assert!(parse(&["tfapi", "-ip=not-an-ip"]).is_err());
        assert!(parse(&["tfapi", "-port=70000"]).is_err());
        assert!(parse(&["tfapi", "-nope"]).is_err());
    }

    #[test]
    fn error_json_includes_hint_and_causes() {
        let err = Error::new(ErrorKind::Io)
            .with_message("failed to bind server")
            .with_hint("Check the port.")
            .with_source(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "address in use",
            ));
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Io");
        assert_eq!(value["error"]["message"], "failed to bind server");
        assert_eq!(value["error"]["hint"], "Check the port.");
        assert_eq!(value["error"]["causes"][0], "address in use");
    }

    #[test]
    fn error_text_without_color_is_plain() {
        let err = Error::new(ErrorKind::Usage).with_hint("Try `tfapi --help`.");
        assert_eq!(
            error_text(&err, false),
            "error: usage error\nhint: Try `tfapi --help`."
        );
    }

    #[test]
    fn error_text_lists_path_and_first_cause() {
        let err = Error::new(ErrorKind::Io)
            .with_message("failed to bind server")
            .with_path("/tmp/staging")
            .with_source(std::io::Error::other("address in use"));
        assert_eq!(
            error_text(&err, false),
            "error: failed to bind server\npath: /tmp/staging\ncaused by: address in use"
        );
        assert!(error_text(&err, true).starts_with("\u{1b}[31merror:\u{1b}[0m "));
    }
}
