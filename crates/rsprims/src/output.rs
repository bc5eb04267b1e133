use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use rsprims_frame::{Frame, FrameBody, Payload};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct PayloadOutput<'a> {
    stream_id: u32,
    outcome: &'a str,
    metadata: Option<String>,
    data: String,
    data_size: usize,
    timestamp: String,
}

/// Print the answer to a request.
pub fn print_payload(stream_id: u32, outcome: &str, payload: &Payload, format: OutputFormat) {
    let metadata = payload.metadata.as_deref().map(preview);
    let data = preview(&payload.data);
    match format {
        OutputFormat::Json => {
            let out = PayloadOutput {
                stream_id,
                outcome,
                metadata,
                data,
                data_size: payload.data.len(),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["STREAM", "OUTCOME", "METADATA", "DATA"])
                .add_row(vec![
                    stream_id.to_string(),
                    outcome.to_string(),
                    metadata.unwrap_or_default(),
                    data,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "stream={stream_id} outcome={outcome} metadata={} data={data}",
                metadata.as_deref().unwrap_or("-")
            );
        }
        OutputFormat::Raw => print_raw(&payload.data),
    }
}

#[derive(Serialize)]
struct FrameOutput {
    length: u32,
    frame_type: String,
    type_code: u16,
    flags: String,
    stream_id: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<(String, String)>,
}

/// Print a decoded frame with its header and body fields.
pub fn print_frame(frame: &Frame, format: OutputFormat) {
    let header = frame.header();
    let fields = body_fields(frame);
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                length: header.length,
                frame_type: frame.frame_type().to_string(),
                type_code: header.frame_type,
                flags: format!("{:#06x}", header.flags),
                stream_id: header.stream_id,
                fields,
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec!["length".to_string(), header.length.to_string()])
                .add_row(vec!["type".to_string(), frame.frame_type().to_string()])
                .add_row(vec!["flags".to_string(), format!("{:#06x}", header.flags)])
                .add_row(vec!["stream_id".to_string(), header.stream_id.to_string()]);
            for (name, value) in fields {
                table.add_row(vec![name, value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            print!(
                "{} length={} flags={:#06x} stream={}",
                frame.frame_type(),
                header.length,
                header.flags,
                header.stream_id
            );
            for (name, value) in fields {
                print!(" {name}={value}");
            }
            println!();
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub endpoint: String,
    pub requests: usize,
    pub concurrency: usize,
    pub payload_size: usize,
    pub completed: usize,
    pub errors: usize,
    pub connect_ms: f64,
    pub elapsed_secs: f64,
    pub rps: f64,
}

pub fn print_bench(report: &BenchReport, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METRIC", "VALUE"])
                .add_row(vec!["endpoint".to_string(), report.endpoint.clone()])
                .add_row(vec!["total reqs".to_string(), report.completed.to_string()])
                .add_row(vec!["errors".to_string(), report.errors.to_string()])
                .add_row(vec!["concurrency".to_string(), report.concurrency.to_string()])
                .add_row(vec!["payload size".to_string(), report.payload_size.to_string()])
                .add_row(vec![
                    "connect (ms)".to_string(),
                    format!("{:.3}", report.connect_ms),
                ])
                .add_row(vec![
                    "elapsed time (s)".to_string(),
                    format!("{:.3}", report.elapsed_secs),
                ])
                .add_row(vec!["RPS".to_string(), format!("{:.1}", report.rps)]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} reqs ({} errors) in {:.3}s: {:.1} req/s",
                report.completed, report.errors, report.elapsed_secs, report.rps
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn body_fields(frame: &Frame) -> Vec<(String, String)> {
    fn payload(fields: &mut Vec<(String, String)>, payload: &Payload) {
        if let Some(metadata) = &payload.metadata {
            fields.push(("metadata".to_string(), preview(metadata)));
        }
        fields.push(("data".to_string(), preview(&payload.data)));
    }

    let mut fields = Vec::new();
    match &frame.body {
        FrameBody::Setup(setup) => {
            fields.push(("version".to_string(), setup.version.to_string()));
            fields.push(("keepalive_ms".to_string(), setup.keepalive.to_string()));
            fields.push(("max_lifetime_ms".to_string(), setup.max_lifetime.to_string()));
            fields.push(("lease".to_string(), setup.lease.to_string()));
            fields.push((
                "metadata_encoding".to_string(),
                setup.metadata_encoding.clone(),
            ));
            fields.push(("data_encoding".to_string(), setup.data_encoding.clone()));
            payload(&mut fields, &setup.payload);
        }
        FrameBody::Lease(lease) => {
            fields.push(("ttl_ms".to_string(), lease.ttl.to_string()));
            fields.push(("budget".to_string(), lease.budget.to_string()));
            if let Some(metadata) = &lease.metadata {
                fields.push(("metadata".to_string(), preview(metadata)));
            }
        }
        FrameBody::Keepalive(keepalive) => {
            fields.push(("response".to_string(), keepalive.response.to_string()));
            fields.push(("data".to_string(), preview(&keepalive.data)));
        }
        FrameBody::RequestResponse(body) | FrameBody::Response(body) => {
            payload(&mut fields, body);
        }
        FrameBody::Error(error) => {
            fields.push(("code".to_string(), error.code.to_string()));
            payload(&mut fields, &error.payload);
        }
        FrameBody::Cancel(cancel) => {
            if let Some(metadata) = &cancel.metadata {
                fields.push(("metadata".to_string(), preview(metadata)));
            }
        }
    }
    fields
}

fn preview(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", bytes.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
