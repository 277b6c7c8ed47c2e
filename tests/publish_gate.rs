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

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

#[test]
fn report_cards_stay_hidden_from_learners_until_published() {
    let workspace = temp_dir("scorebook-publish-gate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "settings.update",
        json!({ "section": "school", "patch": { "currentSession": "2025/2026" } }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "Basic 5", "tier": "primary" }),
    );
    let class_id = str_field(&class, "classId");
    let scored = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "classId": class_id, "lastName": "Eze", "firstName": "Ngozi" }),
    );
    let scored_id = str_field(&scored, "studentId");
    let blank = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "classId": class_id, "lastName": "Femi", "firstName": "Tola" }),
    );
    let blank_id = str_field(&blank, "studentId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "scores.upsertRow",
        json!({ "studentId": scored_id, "subject": "Mathematics", "ca1": 18, "ca2": 17, "exam": 50 }),
    );

    let hidden = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reportCard.open",
        json!({ "studentId": scored_id, "viewerRole": "student" }),
    );
    assert_eq!(hidden.get("visible").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(hidden.get("status").and_then(|v| v.as_str()), Some("not_published"));
    assert!(hidden.get("reportCard").is_none());

    let staff = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "reportCard.open",
        json!({ "studentId": scored_id, "viewerRole": "teacher" }),
    );
    assert_eq!(staff.get("visible").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        staff
            .get("reportCard")
            .and_then(|c| c.get("isPassed"))
            .and_then(|v| v.as_bool()),
        Some(false)
    );

    let teacher_publish = request(
        &mut stdin,
        &mut reader,
        "9",
        "scores.setPublished",
        json!({ "actorRole": "teacher", "published": true, "classId": class_id }),
    );
    assert_eq!(error_code(&teacher_publish), Some("forbidden"));

    let no_document = request(
        &mut stdin,
        &mut reader,
        "10",
        "scores.setPublished",
        json!({ "actorRole": "admin", "published": true, "studentId": blank_id }),
    );
    assert_eq!(error_code(&no_document), Some("not_found"));

    let both = request(
        &mut stdin,
        &mut reader,
        "11",
        "scores.setPublished",
        json!({ "actorRole": "admin", "published": true, "classId": class_id, "studentId": scored_id }),
    );
    assert_eq!(error_code(&both), Some("bad_params"));

    let published = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "scores.setPublished",
        json!({ "actorRole": "admin", "published": true, "classId": class_id }),
    );
    assert_eq!(published.get("changed").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(published.get("total").and_then(|v| v.as_u64()), Some(1));

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "scores.setPublished",
        json!({ "actorRole": "super_admin", "published": true, "classId": class_id }),
    );
    assert_eq!(again.get("changed").and_then(|v| v.as_u64()), Some(0));

    let visible = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "reportCard.open",
        json!({ "studentId": scored_id, "viewerRole": "parent" }),
    );
    assert_eq!(visible.get("visible").and_then(|v| v.as_bool()), Some(true));
    let card = visible.get("reportCard").cloned().expect("reportCard");
    assert_eq!(card.get("isPassed").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(card.get("classSize").and_then(|v| v.as_u64()), Some(2));

    // The student without a document is still unpublished.
    let blank_view = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "reportCard.open",
        json!({ "studentId": blank_id, "viewerRole": "parent" }),
    );
    assert_eq!(blank_view.get("visible").and_then(|v| v.as_bool()), Some(false));

    let unpublished = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "scores.setPublished",
        json!({ "actorRole": "admin", "published": false, "studentId": scored_id }),
    );
    assert_eq!(unpublished.get("changed").and_then(|v| v.as_u64()), Some(1));
    let hidden_again = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "reportCard.open",
        json!({ "studentId": scored_id, "viewerRole": "student" }),
    );
    assert_eq!(hidden_again.get("visible").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn publishing_is_scoped_to_session_and_term() {
    let workspace = temp_dir("scorebook-publish-scope");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "SSS 1" }),
    );
    let class_id = str_field(&class, "classId");
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "lastName": "Obi", "firstName": "Chi" }),
    );
    let student_id = str_field(&student, "studentId");
    for (id, term) in [("4", 1), ("5", 2)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "scores.upsertRow",
            json!({
                "studentId": student_id,
                "session": "2024/2025",
                "term": term,
                "subject": "Physics",
                "exam": 45
            }),
        );
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "scores.setPublished",
        json!({
            "actorRole": "admin",
            "published": true,
            "studentId": student_id,
            "session": "2024/2025",
            "term": 1
        }),
    );
    let term1 = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reportCard.open",
        json!({ "studentId": student_id, "viewerRole": "student", "session": "2024/2025", "term": 1 }),
    );
    assert_eq!(term1.get("visible").and_then(|v| v.as_bool()), Some(true));
    let term2 = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "reportCard.open",
        json!({ "studentId": student_id, "viewerRole": "student", "session": "2024/2025", "term": 2 }),
    );
    assert_eq!(term2.get("visible").and_then(|v| v.as_bool()), Some(false));

    // No current session configured and none given.
    let no_session = request(
        &mut stdin,
        &mut reader,
        "9",
        "reportCard.open",
        json!({ "studentId": student_id, "viewerRole": "teacher" }),
    );
    assert_eq!(error_code(&no_session), Some("bad_params"));
}
