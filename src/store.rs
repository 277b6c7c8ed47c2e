use crate::db::now_rfc3339;
use crate::error::{Error, Result};
use crate::publish::PublishState;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    pub id: String,
    pub name: String,
    pub tier: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub class_id: String,
    pub last_name: String,
    pub first_name: String,
    pub student_no: Option<String>,
    pub sort_order: i64,
}

impl StudentRecord {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

/// Raw component marks as entered. Totals and grades are always derived.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRow {
    pub subject: String,
    pub ca1: Option<f64>,
    pub ca2: Option<f64>,
    pub exam: Option<f64>,
    pub comment: Option<String>,
}

impl StoredRow {
    /// A row with no component entered (comment only, or every mark
    /// cleared) does not count as a recorded result.
    pub fn has_marks(&self) -> bool {
        self.ca1.is_some() || self.ca2.is_some() || self.exam.is_some()
    }
}

pub type Traits = BTreeMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentFields {
    pub affective: Traits,
    pub psychomotor: Traits,
    pub attendance_present: i64,
    pub attendance_total: i64,
    pub teacher_remark: Option<String>,
    pub head_teacher_remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreDocument {
    pub id: String,
    pub student_id: String,
    pub session: String,
    pub term: i64,
    pub rows: Vec<StoredRow>,
    pub fields: DocumentFields,
    pub is_passed: bool,
    pub published_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DocumentKey<'a> {
    pub student_id: &'a str,
    pub session: &'a str,
    pub term: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub changed: usize,
    pub total: usize,
}

pub fn get_class(conn: &Connection, class_id: &str) -> Result<Option<ClassRecord>> {
    conn.query_row(
        "SELECT id, name, tier FROM classes WHERE id = ?",
        [class_id],
        |r| {
            Ok(ClassRecord {
                id: r.get(0)?,
                name: r.get(1)?,
                tier: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(Error::Query)
}

pub fn require_class(conn: &Connection, class_id: &str) -> Result<ClassRecord> {
    get_class(conn, class_id)?.ok_or(Error::NotFound("class"))
}

fn map_student(r: &Row<'_>) -> rusqlite::Result<StudentRecord> {
    Ok(StudentRecord {
        id: r.get(0)?,
        class_id: r.get(1)?,
        last_name: r.get(2)?,
        first_name: r.get(3)?,
        student_no: r.get(4)?,
        sort_order: r.get(5)?,
    })
}

pub fn get_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRecord>> {
    conn.query_row(
        "SELECT id, class_id, last_name, first_name, student_no, sort_order
         FROM students WHERE id = ?",
        [student_id],
        map_student,
    )
    .optional()
    .map_err(Error::Query)
}

pub fn require_student(conn: &Connection, student_id: &str) -> Result<StudentRecord> {
    get_student(conn, student_id)?.ok_or(Error::NotFound("student"))
}

/// Class roster in roster order.
pub fn list_students(conn: &Connection, class_id: &str) -> Result<Vec<StudentRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, class_id, last_name, first_name, student_no, sort_order
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order, rowid",
        )
        .map_err(Error::Query)?;
    stmt.query_map([class_id], map_student)
        .and_then(|it| it.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(Error::Query)
}

fn parse_traits(raw: &str, doc_id: &str) -> Traits {
    match serde_json::from_str::<Traits>(raw) {
        Ok(t) => t,
        Err(e) => {
            warn!(document_id = doc_id, error = %e, "unreadable trait ratings; treating as empty");
            Traits::new()
        }
    }
}

struct DocumentHead {
    id: String,
    student_id: String,
    session: String,
    term: i64,
    affective_json: String,
    psychomotor_json: String,
    attendance_present: i64,
    attendance_total: i64,
    teacher_remark: Option<String>,
    head_teacher_remark: Option<String>,
    is_passed: bool,
    published_at: Option<String>,
    updated_at: Option<String>,
}

const DOCUMENT_COLUMNS: &str = "d.id, d.student_id, d.session, d.term, d.affective_json,
    d.psychomotor_json, d.attendance_present, d.attendance_total, d.teacher_remark,
    d.head_teacher_remark, d.is_passed, d.published_at, d.updated_at";

fn map_document_head(r: &Row<'_>) -> rusqlite::Result<DocumentHead> {
    Ok(DocumentHead {
        id: r.get(0)?,
        student_id: r.get(1)?,
        session: r.get(2)?,
        term: r.get(3)?,
        affective_json: r.get(4)?,
        psychomotor_json: r.get(5)?,
        attendance_present: r.get(6)?,
        attendance_total: r.get(7)?,
        teacher_remark: r.get(8)?,
        head_teacher_remark: r.get(9)?,
        is_passed: r.get::<_, i64>(10)? != 0,
        published_at: r.get(11)?,
        updated_at: r.get(12)?,
    })
}

impl DocumentHead {
    fn into_document(self, rows: Vec<StoredRow>) -> ScoreDocument {
        let affective = parse_traits(&self.affective_json, &self.id);
        let psychomotor = parse_traits(&self.psychomotor_json, &self.id);
        ScoreDocument {
            id: self.id,
            student_id: self.student_id,
            session: self.session,
            term: self.term,
            rows,
            fields: DocumentFields {
                affective,
                psychomotor,
                attendance_present: self.attendance_present,
                attendance_total: self.attendance_total,
                teacher_remark: self.teacher_remark,
                head_teacher_remark: self.head_teacher_remark,
            },
            is_passed: self.is_passed,
            published_at: self.published_at,
            updated_at: self.updated_at,
        }
    }
}

fn map_stored_row(r: &Row<'_>) -> rusqlite::Result<(String, StoredRow)> {
    Ok((
        r.get(0)?,
        StoredRow {
            subject: r.get(1)?,
            ca1: r.get(2)?,
            ca2: r.get(3)?,
            exam: r.get(4)?,
            comment: r.get(5)?,
        },
    ))
}

pub fn find_document(conn: &Connection, key: DocumentKey<'_>) -> Result<Option<ScoreDocument>> {
    let sql = format!(
        "SELECT {} FROM score_documents d
         WHERE d.student_id = ? AND d.session = ? AND d.term = ?",
        DOCUMENT_COLUMNS
    );
    let head = conn
        .query_row(
            &sql,
            (key.student_id, key.session, key.term),
            map_document_head,
        )
        .optional()
        .map_err(Error::Query)?;
    let Some(head) = head else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT document_id, subject, ca1, ca2, exam, comment
             FROM score_rows
             WHERE document_id = ?
             ORDER BY rowid",
        )
        .map_err(Error::Query)?;
    let rows = stmt
        .query_map([&head.id], map_stored_row)
        .and_then(|it| it.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(Error::Query)?
        .into_iter()
        .map(|(_, row)| row)
        .collect();
    Ok(Some(head.into_document(rows)))
}

/// All documents for a class's students in one session+term, keyed by
/// student id.
pub fn documents_for_class(
    conn: &Connection,
    class_id: &str,
    session: &str,
    term: i64,
) -> Result<HashMap<String, ScoreDocument>> {
    let sql = format!(
        "SELECT {} FROM score_documents d
         JOIN students s ON s.id = d.student_id
         WHERE s.class_id = ? AND d.session = ? AND d.term = ?",
        DOCUMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(Error::Query)?;
    let heads = stmt
        .query_map((class_id, session, term), map_document_head)
        .and_then(|it| it.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(Error::Query)?;

    let mut rows_stmt = conn
        .prepare(
            "SELECT r.document_id, r.subject, r.ca1, r.ca2, r.exam, r.comment
             FROM score_rows r
             JOIN score_documents d ON d.id = r.document_id
             JOIN students s ON s.id = d.student_id
             WHERE s.class_id = ? AND d.session = ? AND d.term = ?
             ORDER BY r.rowid",
        )
        .map_err(Error::Query)?;
    let all_rows = rows_stmt
        .query_map((class_id, session, term), map_stored_row)
        .and_then(|it| it.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(Error::Query)?;

    let mut rows_by_doc: HashMap<String, Vec<StoredRow>> = HashMap::new();
    for (doc_id, row) in all_rows {
        rows_by_doc.entry(doc_id).or_default().push(row);
    }

    Ok(heads
        .into_iter()
        .map(|h| {
            let rows = rows_by_doc.remove(&h.id).unwrap_or_default();
            let doc = h.into_document(rows);
            (doc.student_id.clone(), doc)
        })
        .collect())
}

/// Returns the document id for the key, creating an empty unpublished
/// document on first write.
pub fn ensure_document(conn: &Connection, key: DocumentKey<'_>) -> Result<String> {
    conn.execute(
        "INSERT INTO score_documents(id, student_id, session, term, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, session, term) DO NOTHING",
        (
            Uuid::new_v4().to_string(),
            key.student_id,
            key.session,
            key.term,
            now_rfc3339(),
        ),
    )
    .map_err(Error::Update)?;
    conn.query_row(
        "SELECT id FROM score_documents WHERE student_id = ? AND session = ? AND term = ?",
        (key.student_id, key.session, key.term),
        |r| r.get(0),
    )
    .map_err(Error::Query)
}

pub fn upsert_row(conn: &Connection, document_id: &str, row: &StoredRow) -> Result<()> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO score_rows(id, document_id, subject, ca1, ca2, exam, comment, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(document_id, subject) DO UPDATE SET
           subject = excluded.subject,
           ca1 = excluded.ca1,
           ca2 = excluded.ca2,
           exam = excluded.exam,
           comment = excluded.comment,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            document_id,
            &row.subject,
            row.ca1,
            row.ca2,
            row.exam,
            &row.comment,
            &now,
        ),
    )
    .map_err(Error::Update)?;
    touch_document(conn, document_id, &now)
}

fn touch_document(conn: &Connection, document_id: &str, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE score_documents SET updated_at = ? WHERE id = ?",
        (now, document_id),
    )
    .map_err(Error::Update)?;
    Ok(())
}

pub fn write_document_fields(
    conn: &Connection,
    document_id: &str,
    fields: &DocumentFields,
) -> Result<()> {
    if fields.attendance_present < 0 || fields.attendance_present > fields.attendance_total {
        return Err(Error::bad_params(
            "attendance must satisfy 0 <= present <= total",
        ));
    }
    let affective = serde_json::to_string(&fields.affective).map_err(Error::Encode)?;
    let psychomotor = serde_json::to_string(&fields.psychomotor).map_err(Error::Encode)?;
    conn.execute(
        "UPDATE score_documents SET
           affective_json = ?,
           psychomotor_json = ?,
           attendance_present = ?,
           attendance_total = ?,
           teacher_remark = ?,
           head_teacher_remark = ?,
           updated_at = ?
         WHERE id = ?",
        (
            affective,
            psychomotor,
            fields.attendance_present,
            fields.attendance_total,
            &fields.teacher_remark,
            &fields.head_teacher_remark,
            now_rfc3339(),
            document_id,
        ),
    )
    .map_err(Error::Update)?;
    Ok(())
}

/// Creates the document if needed and upserts one row, atomically.
pub fn save_row(conn: &Connection, key: DocumentKey<'_>, row: &StoredRow) -> Result<String> {
    let tx = conn.unchecked_transaction().map_err(Error::Update)?;
    let document_id = ensure_document(&tx, key)?;
    upsert_row(&tx, &document_id, row)?;
    tx.commit().map_err(Error::Update)?;
    Ok(document_id)
}

/// Creates the document if needed and writes its non-score fields,
/// atomically. A rejected write leaves no empty document behind.
pub fn save_document_fields(
    conn: &Connection,
    key: DocumentKey<'_>,
    fields: &DocumentFields,
) -> Result<String> {
    let tx = conn.unchecked_transaction().map_err(Error::Update)?;
    let document_id = ensure_document(&tx, key)?;
    write_document_fields(&tx, &document_id, fields)?;
    tx.commit().map_err(Error::Update)?;
    Ok(document_id)
}

/// Sets the publish flag on every existing document of the given students
/// for one session+term. Students without a document are skipped.
pub fn set_published(
    conn: &Connection,
    student_ids: &[String],
    session: &str,
    term: i64,
    publish: bool,
) -> Result<PublishOutcome> {
    let tx = conn.unchecked_transaction().map_err(Error::Update)?;
    let now = now_rfc3339();
    let mut outcome = PublishOutcome {
        changed: 0,
        total: 0,
    };
    {
        let mut select = tx
            .prepare(
                "SELECT id, is_passed FROM score_documents
                 WHERE student_id = ? AND session = ? AND term = ?",
            )
            .map_err(Error::Query)?;
        let mut update = tx
            .prepare(
                "UPDATE score_documents
                 SET is_passed = ?, published_at = ?, updated_at = ?
                 WHERE id = ?",
            )
            .map_err(Error::Update)?;

        for student_id in student_ids {
            let found: Option<(String, i64)> = select
                .query_row((student_id, session, term), |r| Ok((r.get(0)?, r.get(1)?)))
                .optional()
                .map_err(Error::Query)?;
            let Some((doc_id, flag)) = found else {
                continue;
            };
            outcome.total += 1;
            let (next, changed) = PublishState::from_flag(flag != 0).transition(publish);
            if !changed {
                continue;
            }
            let published_at = next.is_passed().then(|| now.clone());
            update
                .execute((next.is_passed() as i64, published_at, &now, &doc_id))
                .map_err(Error::Update)?;
            outcome.changed += 1;
        }
    }
    tx.commit().map_err(Error::Update)?;
    Ok(outcome)
}
