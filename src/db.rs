use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "scorebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            tier TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            student_no TEXT,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS curricula(
            tier TEXT PRIMARY KEY,
            subjects_json TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_documents(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            session TEXT NOT NULL,
            term INTEGER NOT NULL,
            affective_json TEXT NOT NULL DEFAULT '{}',
            psychomotor_json TEXT NOT NULL DEFAULT '{}',
            attendance_present INTEGER NOT NULL DEFAULT 0,
            attendance_total INTEGER NOT NULL DEFAULT 0,
            teacher_remark TEXT,
            head_teacher_remark TEXT,
            is_passed INTEGER NOT NULL DEFAULT 0,
            published_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, session, term),
            CHECK(attendance_present >= 0 AND attendance_present <= attendance_total)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_documents_session_term
         ON score_documents(session, term)",
        [],
    )?;

    // Totals and grades are derived on read; only raw components are stored.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_rows(
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            subject TEXT NOT NULL COLLATE NOCASE,
            ca1 REAL,
            ca2 REAL,
            exam REAL,
            comment TEXT,
            updated_at TEXT,
            FOREIGN KEY(document_id) REFERENCES score_documents(id),
            UNIQUE(document_id, subject)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_rows_document ON score_rows(document_id)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid json", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}


#[cfg(test)]
mod tests {
    use super::test_support::temp_workspace;
    use super::*;
    use serde_json::json;

    #[test]
    fn open_is_idempotent() {
        let ws = temp_workspace("scorebook-db-open");
        drop(open_db(&ws).expect("first open"));
        let conn = open_db(&ws).expect("second open");
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'score_rows'",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(n, 1);
    }

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let ws = temp_workspace("scorebook-db-settings");
        let conn = open_db(&ws).expect("open");
        assert!(settings_get_json(&conn, "settings.grading")
            .expect("get")
            .is_none());
        settings_set_json(&conn, "settings.grading", &json!({ "ca1Max": 15 })).expect("set");
        settings_set_json(&conn, "settings.grading", &json!({ "ca1Max": 10 })).expect("set");
        let v = settings_get_json(&conn, "settings.grading")
            .expect("get")
            .expect("value");
        assert_eq!(v["ca1Max"], 10);
    }
}
