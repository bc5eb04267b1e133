use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use rsprims_transport::Endpoint;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod bench;
pub mod decode;
pub mod request;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an echo responder.
    Serve(ServeArgs),
    /// Send one request and print the answer.
    Request(RequestArgs),
    /// Measure request/response throughput against a running responder.
    Bench(BenchArgs),
    /// Decode a hex-encoded frame.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => block_on(serve::run(args, format)),
        Command::Request(args) => block_on(request::run(args, format)),
        Command::Bench(args) => block_on(bench::run(args, format)),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

fn block_on<F>(future: F) -> CliResult<i32>
where
    F: std::future::Future<Output = CliResult<i32>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime start failed: {err}")))?;
    runtime.block_on(future)
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Endpoint to listen on (tcp://host:port or unix:///path.sock).
    #[arg(env = "RSPRIMS_ENDPOINT")]
    pub endpoint: Endpoint,
    /// Answer every request with APPLICATION_ERROR carrying the request payload.
    #[arg(long)]
    pub fail: bool,
    /// Grant each client a lease of this many requests after setup.
    #[arg(long, value_name = "REQUESTS")]
    pub lease: Option<u32>,
    /// Lease time-to-live when --lease is set (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s", requires = "lease")]
    pub lease_ttl: String,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Endpoint to connect to.
    #[arg(env = "RSPRIMS_ENDPOINT")]
    pub endpoint: Endpoint,
    /// Request data as a string.
    #[arg(long, short = 'd', conflicts_with = "file")]
    pub data: Option<String>,
    /// Read request data from a file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Request metadata.
    #[arg(long, short = 'm')]
    pub metadata: Option<String>,
    /// Data carried in the SETUP frame.
    #[arg(long)]
    pub setup_data: Option<String>,
    /// Metadata carried in the SETUP frame.
    #[arg(long)]
    pub setup_metadata: Option<String>,
    /// Payload encoding advertised in SETUP (utf-8, ascii, binary).
    #[arg(long, default_value = "utf-8")]
    pub encoding: String,
    /// Maximum time to wait for the answer (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    /// Endpoint of a running responder.
    #[arg(env = "RSPRIMS_ENDPOINT")]
    pub endpoint: Endpoint,
    /// Number of requests to perform.
    #[arg(long = "number", short = 'n', default_value_t = 1000)]
    pub requests: usize,
    /// Number of requests in flight at a time.
    #[arg(long, short = 'c', default_value_t = 10)]
    pub concurrency: usize,
    /// Request data size in bytes.
    #[arg(long, short = 's', default_value_t = 8)]
    pub size: usize,
    /// Metadata to include with every request.
    #[arg(long, short = 'm')]
    pub metadata: Option<String>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Hex-encoded frame bytes; whitespace is ignored. Reads stdin when omitted.
    pub hex: Option<String>,
    /// Ignore the header length field, as for message transports that delimit frames.
    #[arg(long)]
    pub no_length: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `250ms` or a bare number of seconds.
pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: '{input}'")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration(" 3 ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
    }
}
