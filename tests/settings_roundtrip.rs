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
fn settings_defaults_patches_and_persistence() {
    let workspace = temp_dir("scorebook-settings-roundtrip");
    {
        let (_child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );

        let defaults = request_ok(&mut stdin, &mut reader, "2", "settings.get", json!({}));
        let grading = defaults.get("grading").cloned().expect("grading");
        assert_eq!(grading.get("ca1Max").and_then(|v| v.as_f64()), Some(20.0));
        assert_eq!(grading.get("examMax").and_then(|v| v.as_f64()), Some(60.0));
        assert_eq!(grading.get("entryPolicy").and_then(|v| v.as_str()), Some("clamp"));
        assert_eq!(grading.get("averageDivisor").and_then(|v| v.as_str()), Some("expected"));
        assert_eq!(grading.get("tieBreak").and_then(|v| v.as_str()), Some("rosterOrder"));
        assert_eq!(grading.get("positionMode").and_then(|v| v.as_str()), Some("sequential"));
        assert_eq!(
            grading.get("bands").and_then(|v| v.as_array()).map(|a| a.len()),
            Some(6)
        );
        let school = defaults.get("school").cloned().expect("school");
        assert_eq!(school.get("termsPerSession").and_then(|v| v.as_i64()), Some(3));

        let unknown = request(
            &mut stdin,
            &mut reader,
            "3",
            "settings.update",
            json!({ "section": "grading", "patch": { "passMark": 40 } }),
        );
        assert_eq!(error_code(&unknown), Some("bad_params"));

        let unordered = request(
            &mut stdin,
            &mut reader,
            "4",
            "settings.update",
            json!({
                "section": "grading",
                "patch": { "bands": [
                    { "min": 50, "grade": "P", "remark": "Pass" },
                    { "min": 60, "grade": "M", "remark": "Merit" },
                    { "min": 0, "grade": "F", "remark": "Fail" }
                ] }
            }),
        );
        assert_eq!(error_code(&unordered), Some("bad_params"));

        let bad_section = request(
            &mut stdin,
            &mut reader,
            "5",
            "settings.update",
            json!({ "section": "theme", "patch": {} }),
        );
        assert_eq!(error_code(&bad_section), Some("bad_params"));

        let updated = request_ok(
            &mut stdin,
            &mut reader,
            "6",
            "settings.update",
            json!({
                "section": "grading",
                "patch": {
                    "ca1Max": 10,
                    "ca2Max": 10,
                    "examMax": 80,
                    "bands": [
                        { "min": 75, "grade": "A1", "remark": "Excellent" },
                        { "min": 40, "grade": "P", "remark": "Pass" },
                        { "min": 0, "grade": "F9", "remark": "Fail" }
                    ]
                }
            }),
        );
        assert_eq!(
            updated
                .get("value")
                .and_then(|v| v.get("examMax"))
                .and_then(|v| v.as_f64()),
            Some(80.0)
        );

        let term_out_of_range = request(
            &mut stdin,
            &mut reader,
            "7",
            "settings.update",
            json!({ "section": "school", "patch": { "currentTerm": 4 } }),
        );
        assert_eq!(error_code(&term_out_of_range), Some("bad_params"));
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "8",
            "settings.update",
            json!({ "section": "school", "patch": { "currentSession": "2026/2027", "termsPerSession": 2, "currentTerm": 2 } }),
        );
    }

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let reloaded = request_ok(&mut stdin, &mut reader, "2", "settings.get", json!({}));
    assert_eq!(
        reloaded
            .get("grading")
            .and_then(|g| g.get("bands"))
            .and_then(|b| b.as_array())
            .and_then(|b| b.first())
            .and_then(|b| b.get("grade"))
            .and_then(|v| v.as_str()),
        Some("A1")
    );
    assert_eq!(
        reloaded.get("school"),
        Some(&json!({ "currentSession": "2026/2027", "currentTerm": 2, "termsPerSession": 2 }))
    );

    // The new caps and bands drive grading.
    let class = request_ok(&mut stdin, &mut reader, "3", "classes.create", json!({ "name": "SS2" }));
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "classId": class_id, "lastName": "Lawal", "firstName": "Bisi" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let row = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scores.upsertRow",
        json!({ "studentId": student_id, "subject": "Chemistry", "ca1": 15, "ca2": 10, "exam": 70 }),
    );
    assert_eq!(row.get("ca1").and_then(|v| v.as_f64()), Some(10.0));
    assert_eq!(row.get("total").and_then(|v| v.as_f64()), Some(90.0));
    assert_eq!(row.get("grade").and_then(|v| v.as_str()), Some("A1"));
    assert_eq!(row.get("term").and_then(|v| v.as_i64()), Some(2));
}

#[test]
fn curriculum_overrides_and_reset() {
    let workspace = temp_dir("scorebook-curriculum-roundtrip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "2", "curriculum.list", json!({}));
    let tiers = listed
        .get("tiers")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("tiers");
    assert_eq!(tiers.len(), 4);
    assert!(tiers
        .iter()
        .all(|t| t.get("overridden").and_then(|v| v.as_bool()) == Some(false)));

    let duplicate = request(
        &mut stdin,
        &mut reader,
        "3",
        "curriculum.set",
        json!({ "tier": "sss", "subjects": ["Physics", "physics"] }),
    );
    assert_eq!(error_code(&duplicate), Some("bad_params"));
    let empty = request(
        &mut stdin,
        &mut reader,
        "4",
        "curriculum.set",
        json!({ "tier": "sss", "subjects": [] }),
    );
    assert_eq!(error_code(&empty), Some("bad_params"));

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "curriculum.set",
        json!({ "tier": "SSS", "subjects": [" Physics ", "Chemistry"] }),
    );
    assert_eq!(set.get("subjects"), Some(&json!(["Physics", "Chemistry"])));

    let class = request_ok(&mut stdin, &mut reader, "6", "classes.create", json!({ "name": "SSS 3 Science" }));
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "curriculum.get",
        json!({ "classId": class_id }),
    );
    assert_eq!(got.get("subjects"), Some(&json!(["Physics", "Chemistry"])));

    let reset = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "curriculum.reset",
        json!({ "tier": "sss" }),
    );
    assert_eq!(reset.get("removed").and_then(|v| v.as_bool()), Some(true));
    let builtin = reset
        .get("subjects")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("subjects");
    assert!(builtin.len() > 2);
    assert_eq!(builtin[0].as_str(), Some("Mathematics"));

    // A class whose name and tier resolve nothing has no subjects.
    let loose = request_ok(&mut stdin, &mut reader, "9", "classes.create", json!({ "name": "Remedial" }));
    let loose_id = loose
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let none = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "curriculum.get",
        json!({ "classId": loose_id }),
    );
    assert_eq!(none.get("subjects"), Some(&json!([])));
    assert!(none.get("tier").map(|v| v.is_null()).unwrap_or(false));
}
