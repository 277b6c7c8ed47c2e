use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_scorebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn scorebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn health_and_unknown_methods_answer_without_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let unknown = request(&mut stdin, &mut reader, "2", "nope.method", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    let classes = request_ok(&mut stdin, &mut reader, "3", "classes.list", json!({}));
    assert_eq!(
        classes.get("classes").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let students = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.list",
        json!({ "classId": "missing" }),
    );
    assert_eq!(error_code(&students), Some("no_workspace"));
}

#[test]
fn malformed_line_gets_bad_json_and_loop_continues() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse");
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&value), Some("bad_json"));

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").is_some());
}

#[test]
fn workspace_select_creates_database_and_is_reported_by_health() {
    let workspace = temp_dir("scorebook-router-workspace");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let missing = request(&mut stdin, &mut reader, "1", "workspace.select", json!({}));
    assert_eq!(error_code(&missing), Some("bad_params"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("scorebook.sqlite3").is_file());

    let health = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert_eq!(
        health.get("workspacePath").and_then(|v| v.as_str()),
        Some(workspace.to_string_lossy().as_ref())
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "name": "Primary 4" }),
    );
    assert_eq!(
        created.get("resolvedTier").and_then(|v| v.as_str()),
        Some("primary")
    );
    let bad_tier = request(
        &mut stdin,
        &mut reader,
        "5",
        "classes.create",
        json!({ "name": "Form A", "tier": "college" }),
    );
    assert_eq!(error_code(&bad_tier), Some("bad_params"));

    let classes = request_ok(&mut stdin, &mut reader, "6", "classes.list", json!({}));
    let list = classes
        .get("classes")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].get("studentCount").and_then(|v| v.as_i64()), Some(0));
}
