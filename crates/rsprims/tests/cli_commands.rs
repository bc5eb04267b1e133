#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/rsprims-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

struct Server {
    child: Child,
    endpoint: String,
}

impl Server {
    fn start(dir: &Path, extra: &[&str]) -> Self {
        let sock = dir.join("serve.sock");
        let endpoint = format!("unix://{}", sock.display());
        let child = Command::new(env!("CARGO_BIN_EXE_rsprims"))
            .args(["--log-level", "error", "serve", &endpoint])
            .args(extra)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve should start");

        let start = Instant::now();
        while !sock.exists() {
            assert!(
                start.elapsed() < Duration::from_secs(5),
                "server socket never appeared"
            );
            thread::sleep(Duration::from_millis(25));
        }
        Self { child, endpoint }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn rsprims(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rsprims"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("rsprims should run")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be one JSON document")
}

#[test]
fn request_is_echoed_by_serve() {
    let dir = unique_temp_dir("echo");
    let server = Server::start(&dir, &[]);

    let output = rsprims(&[
        "request",
        &server.endpoint,
        "--data",
        "so much trouble in the world",
        "--metadata",
        "can't nobody feel your pain",
    ]);
    assert!(output.status.success(), "request should succeed: {output:?}");

    let value = stdout_json(&output);
    assert_eq!(value["stream_id"], 1);
    assert_eq!(value["outcome"], "response");
    assert_eq!(value["data"], "so much trouble in the world");
    assert_eq!(value["metadata"], "can't nobody feel your pain");
}

#[test]
fn application_error_sets_exit_code() {
    let dir = unique_temp_dir("fail");
    let server = Server::start(&dir, &["--fail"]);

    let output = rsprims(&["request", &server.endpoint, "--data", "nope"]);
    assert_eq!(output.status.code(), Some(2));

    let value = stdout_json(&output);
    assert_eq!(value["outcome"], "APPLICATION_ERROR");
    assert_eq!(value["data"], "nope");
}

#[test]
fn bench_reports_throughput() {
    let dir = unique_temp_dir("bench");
    let server = Server::start(&dir, &[]);

    let output = rsprims(&["bench", &server.endpoint, "-n", "200", "-c", "8", "-s", "32"]);
    assert!(output.status.success(), "bench should succeed: {output:?}");

    let value = stdout_json(&output);
    assert_eq!(value["completed"], 200);
    assert_eq!(value["errors"], 0);
    assert!(value["rps"].as_f64().expect("rps should be a number") > 0.0);
}

#[test]
fn decode_prints_frame_fields() {
    // RESPONSE on stream 5 with metadata "md" and data "ok".
    let output = rsprims(&[
        "decode",
        "00000014 000b 4000 00000005 00000006 6d64 6f6b",
    ]);
    assert!(output.status.success(), "decode should succeed: {output:?}");

    let value = stdout_json(&output);
    assert_eq!(value["frame_type"], "RESPONSE");
    assert_eq!(value["stream_id"], 5);
    assert_eq!(value["flags"], "0x4000");
}

#[test]
fn connect_failure_is_a_transport_error() {
    let dir = unique_temp_dir("refused");
    let endpoint = format!("unix://{}", dir.join("missing.sock").display());

    let output = rsprims(&["request", &endpoint, "--data", "hello"]);
    assert_eq!(output.status.code(), Some(3));
}
