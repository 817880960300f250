//! Black-box integration tests: launch the compiled `taskmasterd` binary
//! against a temporary config file and exercise it over the RPC protocol,
//! the same way a real client would.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

fn binary() -> PathBuf {
    let mut p = std::env::current_exe().expect("current exe");
    p.pop();
    if p.ends_with("deps") {
        p.pop();
    }
    p.push("taskmasterd");
    if cfg!(windows) {
        p.set_extension("exe");
    }
    p
}

/// Owns a running supervisor process plus the temp dir backing its config
/// and log file; killed when dropped.
struct Harness {
    child: Child,
    port: u16,
    _tmp: tempfile::TempDir,
}

impl Harness {
    fn start(config_json: &str) -> Self {
        let tmp = tempfile::tempdir().expect("create tempdir");
        let config_path = tmp.path().join("config.json");
        std::fs::write(&config_path, config_json).expect("write config");
        let log_path = tmp.path().join("taskmaster_logs");

        let port = pick_port();
        let child = Command::new(binary())
            .arg("-p")
            .arg(port.to_string())
            .arg("-c")
            .arg(&config_path)
            .arg("-l")
            .arg(&log_path)
            .arg("-b")
            .arg("false")
            .spawn()
            .expect("spawn taskmasterd");

        let harness = Harness {
            child,
            port,
            _tmp: tmp,
        };
        harness.wait_for_listener();
        harness
    }

    fn wait_for_listener(&self) {
        for _ in 0..50 {
            if TcpStream::connect(("127.0.0.1", self.port)).is_ok() {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        panic!("taskmasterd did not start listening on port {}", self.port);
    }

    fn call(&self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let mut stream =
            TcpStream::connect(("127.0.0.1", self.port)).expect("connect to RPC port");
        let request = serde_json::json!({ "method": method, "params": params });
        let mut line = serde_json::to_string(&request).unwrap();
        line.push('\n');
        stream.write_all(line.as_bytes()).expect("send request");

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .expect("read response");
        serde_json::from_str(&response_line).expect("response is valid JSON")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pick_port() -> u16 {
    // Bind to an ephemeral port, read it back, then drop the listener so
    // taskmasterd can bind it itself; good enough for serial test execution.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

#[test]
fn get_proc_list_reflects_autostart_job() {
    let harness = Harness::start(
        r#"{ "Password": "", "ProgList": [
            { "Name": "sleeper", "Command": "/bin/sleep 5", "AutoStart": true, "StartTime": 1 }
        ] }"#,
    );
    std::thread::sleep(Duration::from_millis(300));
    let response = harness.call("GetProcList", serde_json::Value::Null);
    assert_eq!(response["ok"], true);
    let names = response["result"].as_array().expect("array result");
    assert!(names.iter().any(|n| n == "sleeper"));
}

#[test]
fn start_then_stop_roundtrip() {
    let harness = Harness::start(
        r#"{ "Password": "", "ProgList": [
            { "Name": "idle", "Command": "/bin/sleep 30", "AutoStart": false, "StartTime": 1 }
        ] }"#,
    );
    let start = harness.call(
        "AddMethod",
        serde_json::json!({ "method_name": "StartProc", "parameter": "idle" }),
    );
    assert_eq!(start["ok"], true, "start failed: {start:?}");

    std::thread::sleep(Duration::from_millis(1500));
    let status = harness.call(
        "GetStatus",
        serde_json::json!({ "names": ["idle"] }),
    );
    let result = status["result"].as_array().expect("array result");
    assert_eq!(result[0]["state"], "RUNNING");

    let stop = harness.call(
        "AddMethod",
        serde_json::json!({ "method_name": "StopProc", "parameter": "idle" }),
    );
    assert_eq!(stop["ok"], true, "stop failed: {stop:?}");

    let status = harness.call("GetStatus", serde_json::json!({ "names": ["idle"] }));
    let result = status["result"].as_array().expect("array result");
    assert_eq!(result[0]["state"], "STOPPED");
}

#[test]
fn unauthenticated_calls_are_refused_when_password_set() {
    let password_hash = taskmaster::auth::hash_hex("secret");
    let config = format!(
        r#"{{ "Password": "{password_hash}", "ProgList": [] }}"#
    );
    let harness = Harness::start(&config);

    let has_password = harness.call("HasPassword", serde_json::Value::Null);
    assert_eq!(has_password["result"], true);

    let list = harness.call("GetProcList", serde_json::Value::Null);
    assert_eq!(list["ok"], false, "expected refusal before authenticating");

    let auth = harness.call(
        "Authenticate",
        serde_json::json!({ "password": "secret" }),
    );
    assert_eq!(auth["result"], true);
}

#[test]
fn unknown_method_is_rejected() {
    let harness = Harness::start(r#"{ "Password": "", "ProgList": [] }"#);
    let response = harness.call("NotAMethod", serde_json::Value::Null);
    assert_eq!(response["ok"], false);
}
