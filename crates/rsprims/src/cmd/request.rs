use std::fs;

use bytes::Bytes;
use rsprims_conn::{Connection, ConnectionConfig, StreamError};
use rsprims_frame::{Encoding, Payload};
use tracing::debug;

use crate::cmd::{parse_duration, RequestArgs};
use crate::exit::{
    conn_error, frame_error, io_error, stream_error, transport_error, CliError, CliResult,
    SUCCESS, TIMEOUT,
};
use crate::output::{print_payload, OutputFormat};

pub async fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;
    let config = client_config(&args);

    let stream = rsprims_transport::connect(&args.endpoint)
        .await
        .map_err(|err| transport_error("connect failed", err))?;
    let (connection, _events) = Connection::client(stream, config);

    let pending = connection
        .request(payload)
        .await
        .map_err(|err| conn_error("request failed", err))?;
    let stream_id = pending.stream_id();
    debug!(stream_id, "request sent");

    let outcome = tokio::time::timeout(timeout, pending.response())
        .await
        .map_err(|_| CliError::new(TIMEOUT, format!("no answer within {timeout:?}")))?;
    connection.close().await;

    match outcome {
        Ok(response) => {
            print_payload(stream_id, "response", &response, format);
            Ok(SUCCESS)
        }
        Err(StreamError::Remote { code, payload }) => {
            print_payload(stream_id, &code.to_string(), &payload, format);
            Err(stream_error(
                "request failed",
                StreamError::Remote { code, payload },
            ))
        }
        Err(err) => Err(stream_error("request failed", err)),
    }
}

fn client_config(args: &RequestArgs) -> ConnectionConfig {
    let encoding = Encoding::from_name(&args.encoding);
    ConnectionConfig {
        metadata_encoding: encoding.clone(),
        data_encoding: encoding,
        setup_metadata: args.setup_metadata.clone().map(Bytes::from),
        setup_data: args.setup_data.clone().map(Bytes::from).unwrap_or_default(),
        ..ConnectionConfig::client()
    }
}

/// Build the request payload; string arguments are encoded with `--encoding`.
fn resolve_payload(args: &RequestArgs) -> CliResult<Payload> {
    let encoding = Encoding::from_name(&args.encoding);
    let encode = |text: &str| {
        encoding
            .encode(text)
            .map(Bytes::from)
            .map_err(|err| frame_error("invalid payload", err))
    };
    let data = match (&args.data, &args.file) {
        (Some(data), _) => encode(data.as_str())?,
        (None, Some(path)) => fs::read(path)
            .map(Bytes::from)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?,
        (None, None) => Bytes::new(),
    };
    let mut payload = Payload::new(data);
    if let Some(metadata) = &args.metadata {
        payload = payload.with_metadata(encode(metadata.as_str())?);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use rsprims_transport::Endpoint;

    use super::*;

    fn args() -> RequestArgs {
        RequestArgs {
            endpoint: Endpoint::Tcp("127.0.0.1:7878".to_string()),
            data: Some("hello".to_string()),
            file: None,
            metadata: Some("md".to_string()),
            setup_data: Some("setup".to_string()),
            setup_metadata: None,
            encoding: "ascii".to_string(),
            timeout: "5s".to_string(),
        }
    }

    #[test]
    fn payload_carries_data_and_metadata() {
        let payload = resolve_payload(&args()).expect("payload should resolve");
        assert_eq!(payload, Payload::new("hello").with_metadata("md"));
    }

    #[test]
    fn missing_data_is_an_empty_payload() {
        let payload = resolve_payload(&RequestArgs {
            data: None,
            metadata: None,
            ..args()
        })
        .expect("payload should resolve");
        assert!(payload.data.is_empty());
        assert!(payload.metadata.is_none());
    }

    #[test]
    fn ascii_encoding_rejects_non_ascii_data() {
        let err = resolve_payload(&RequestArgs {
            data: Some("caf\u{e9}".to_string()),
            ..args()
        })
        .expect_err("non-ascii data should be rejected");
        assert_eq!(err.code, crate::exit::DATA_INVALID);
    }

    #[test]
    fn binary_encoding_maps_code_points_to_bytes() {
        let payload = resolve_payload(&RequestArgs {
            data: Some("caf\u{e9}".to_string()),
            encoding: "binary".to_string(),
            ..args()
        })
        .expect("latin-1 text should encode");
        assert_eq!(payload.data.as_ref(), b"caf\xe9");
    }

    #[test]
    fn setup_fields_flow_into_config() {
        let config = client_config(&args());
        assert_eq!(config.data_encoding, Encoding::Ascii);
        assert_eq!(config.setup_data, Bytes::from_static(b"setup"));
        assert!(config.setup_metadata.is_none());
    }
}
