use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use rsprims_conn::{Connection, ConnectionConfig};
use rsprims_frame::Payload;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::cmd::BenchArgs;
use crate::exit::{transport_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_bench, BenchReport, OutputFormat};

/// Filler text repeated to build request data of the requested size.
const FILLER: &str = "To be, or not to be, that is the question: \
Whether 'tis nobler in the mind to suffer \
The slings and arrows of outrageous fortune, \
Or to take arms against a sea of troubles \
And by opposing end them. ";

#[derive(Debug, Default)]
struct Tally {
    completed: AtomicUsize,
    errors: AtomicUsize,
}

pub async fn run(args: BenchArgs, format: OutputFormat) -> CliResult<i32> {
    if args.requests == 0 || args.concurrency == 0 {
        return Err(CliError::new(
            USAGE,
            "--number and --concurrency must be greater than zero",
        ));
    }

    let payload = bench_payload(args.size, args.metadata.as_deref());
    let connect_started = Instant::now();
    let stream = rsprims_transport::connect(&args.endpoint)
        .await
        .map_err(|err| transport_error("connect failed", err))?;
    let connect_ms = connect_started.elapsed().as_secs_f64() * 1000.0;
    let (connection, _events) = Connection::client(stream, ConnectionConfig::client());

    info!(
        endpoint = %args.endpoint,
        requests = args.requests,
        concurrency = args.concurrency,
        "starting benchmark"
    );

    let next = Arc::new(AtomicUsize::new(0));
    let tally = Arc::new(Tally::default());
    let started = Instant::now();

    let mut workers = JoinSet::new();
    for _ in 0..args.concurrency.min(args.requests) {
        workers.spawn(worker(
            connection.clone(),
            payload.clone(),
            args.requests,
            next.clone(),
            tally.clone(),
        ));
    }
    while workers.join_next().await.is_some() {}

    let elapsed = started.elapsed().as_secs_f64();
    connection.close().await;

    let completed = tally.completed.load(Ordering::Relaxed);
    let errors = tally.errors.load(Ordering::Relaxed);
    let report = BenchReport {
        endpoint: args.endpoint.to_string(),
        requests: args.requests,
        concurrency: args.concurrency,
        payload_size: args.size,
        completed,
        errors,
        connect_ms,
        elapsed_secs: elapsed,
        rps: rate(completed, elapsed),
    };
    print_bench(&report, format);

    Ok(if errors == 0 { SUCCESS } else { FAILURE })
}

/// Issue requests one at a time until `total` have been claimed across workers.
async fn worker(
    connection: Connection,
    payload: Payload,
    total: usize,
    next: Arc<AtomicUsize>,
    tally: Arc<Tally>,
) {
    while next.fetch_add(1, Ordering::Relaxed) < total {
        let outcome = match connection.request(payload.clone()).await {
            Ok(pending) => pending.response().await.map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        match outcome {
            Ok(_) => {
                tally.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                debug!(error = %err, "request failed");
                tally.errors.fetch_add(1, Ordering::Relaxed);
                if connection.is_closed() {
                    return;
                }
            }
        }
    }
}

fn bench_payload(size: usize, metadata: Option<&str>) -> Payload {
    let data: Vec<u8> = FILLER.bytes().cycle().take(size).collect();
    let payload = Payload::new(data);
    match metadata {
        Some(metadata) => payload.with_metadata(Bytes::copy_from_slice(metadata.as_bytes())),
        None => payload,
    }
}

fn rate(count: usize, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        count as f64 / elapsed_secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_has_requested_size() {
        let payload = bench_payload(1000, None);
        assert_eq!(payload.data.len(), 1000);
        assert!(payload.data.starts_with(b"To be, or not to be"));
        assert!(payload.metadata.is_none());
    }

    #[test]
    fn metadata_is_attached_when_given() {
        let payload = bench_payload(8, Some("bench"));
        assert_eq!(payload.data.as_ref(), b"To be, o");
        assert_eq!(payload.metadata.as_deref(), Some(&b"bench"[..]));
    }

    #[test]
    fn rate_handles_zero_elapsed() {
        assert_eq!(rate(10, 0.0), 0.0);
        assert_eq!(rate(10, 2.0), 5.0);
    }
}
