mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "rsprims", version, about = "ReactiveSocket request/response CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use rsprims_transport::Endpoint;

    use super::*;

    #[test]
    fn parses_bench_short_flags() {
        let cli = Cli::try_parse_from([
            "rsprims",
            "bench",
            "tcp://127.0.0.1:1337",
            "-n",
            "500",
            "-c",
            "25",
            "-s",
            "64",
            "-m",
            "meta",
        ])
        .expect("bench args should parse");

        let Command::Bench(args) = cli.command else {
            panic!("expected bench command");
        };
        assert_eq!(args.endpoint, Endpoint::Tcp("127.0.0.1:1337".to_string()));
        assert_eq!((args.requests, args.concurrency, args.size), (500, 25, 64));
        assert_eq!(args.metadata.as_deref(), Some("meta"));
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "rsprims",
            "request",
            "tcp://127.0.0.1:1337",
            "--data",
            "hello",
            "--file",
            "/tmp/payload.bin",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn rejects_malformed_endpoint() {
        let err = Cli::try_parse_from(["rsprims", "request", "localhost:1337"])
            .expect_err("endpoint without a known scheme should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_global_log_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "rsprims",
            "decode",
            "000000",
            "--log-format",
            "json",
            "--log-level",
            "debug",
        ])
        .expect("global flags should parse anywhere");
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert!(matches!(cli.command, Command::Decode(_)));
    }
}
