use std::time::Duration;

use rsprims_conn::{Connection, ConnectionConfig, ConnectionEvent, RequestStream};
use rsprims_frame::ErrorCode;
use rsprims_transport::{RsListener, RsStream};
use tracing::{debug, info, warn};

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

/// How the echo responder answers.
#[derive(Debug, Clone, Copy)]
struct ServeOptions {
    fail: bool,
    lease: Option<(Duration, u32)>,
}

pub async fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let lease = match args.lease {
        Some(budget) => Some((parse_duration(&args.lease_ttl)?, budget)),
        None => None,
    };
    let options = ServeOptions {
        fail: args.fail,
        lease,
    };

    let listener = RsListener::bind(&args.endpoint)
        .await
        .map_err(|err| transport_error("bind failed", err))?;
    info!(endpoint = %listener.endpoint(), "serving");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    tokio::spawn(serve_connection(stream, options));
                }
                Err(err) => return Err(transport_error("accept failed", err)),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|err| {
                    CliError::new(INTERNAL, format!("signal handler failed: {err}"))
                })?;
                info!("shutting down");
                break;
            }
        }
    }

    Ok(SUCCESS)
}

async fn serve_connection(stream: RsStream, options: ServeOptions) {
    let peer = stream.peer_description();
    let (connection, mut events) = Connection::server(stream, ConnectionConfig::server());
    debug!(%peer, "connection accepted");

    while let Some(event) = events.next().await {
        match event {
            ConnectionEvent::Setup(info) => {
                info!(
                    %peer,
                    keepalive_ms = info.keepalive.as_millis() as u64,
                    metadata_encoding = info.metadata_encoding.name(),
                    data_encoding = info.data_encoding.name(),
                    setup_data_size = info.payload.data.len(),
                    "client setup"
                );
            }
            ConnectionEvent::Ready => {
                if let Some((ttl, budget)) = options.lease {
                    let ttl_ms = u32::try_from(ttl.as_millis()).unwrap_or(u32::MAX);
                    // Granted off the event loop so a full event queue cannot stall it.
                    let connection = connection.clone();
                    let peer = peer.clone();
                    tokio::spawn(async move {
                        if let Err(err) = connection.grant_lease(ttl_ms, budget, None).await {
                            warn!(%peer, error = %err, "lease grant failed");
                        }
                    });
                }
            }
            ConnectionEvent::SetupError(err) => warn!(%peer, error = %err, "setup error"),
            ConnectionEvent::Request(request) => {
                tokio::spawn(answer(request, options.fail));
            }
            ConnectionEvent::Lease(_) => {}
            ConnectionEvent::Closed(reason) => {
                info!(%peer, %reason, "connection closed");
            }
        }
    }
}

async fn answer(request: RequestStream, fail: bool) {
    let stream_id = request.stream_id();
    let payload = request.request().clone();
    let result = if fail {
        request.error(ErrorCode::APPLICATION_ERROR, payload).await
    } else {
        request.respond(payload).await
    };
    if let Err(err) = result {
        debug!(stream_id, error = %err, "answer not delivered");
    }
}
