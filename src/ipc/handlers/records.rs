use crate::ipc::error::{err, ok};
use crate::ipc::handlers::auth::require_session;
use crate::ipc::types::{AppState, Request};
use crate::validate::{
    normalize_name, normalize_roll_number, validate_integer_in_range, Subject,
};
use chrono::Utc;
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn db_query(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn sql_value_to_json(v: SqlValue) -> serde_json::Value {
    match v {
        SqlValue::Null | SqlValue::Blob(_) => serde_json::Value::Null,
        SqlValue::Integer(i) => json!(i),
        SqlValue::Real(r) => json!(r),
        SqlValue::Text(s) => json!(s),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortKey {
    Name,
    RollNumber,
    Subject,
    Marks,
    Attendance,
    MarksDesc,
    AttendanceDesc,
}

impl SortKey {
    /// Anything outside the allow-list silently falls back to name.
    /// The raw string is never interpolated into SQL.
    fn parse(raw: Option<&str>) -> SortKey {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("roll_number") => SortKey::RollNumber,
            Some("subject") => SortKey::Subject,
            Some("marks") => SortKey::Marks,
            Some("attendance") => SortKey::Attendance,
            Some("marks_desc") => SortKey::MarksDesc,
            Some("attendance_desc") => SortKey::AttendanceDesc,
            _ => SortKey::Name,
        }
    }

    fn order_clause(self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::RollNumber => "roll_number",
            SortKey::Subject => "subject",
            SortKey::Marks => "marks",
            SortKey::Attendance => "attendance",
            SortKey::MarksDesc => "marks DESC",
            SortKey::AttendanceDesc => "attendance DESC",
        }
    }
}

fn submit_bulk(
    conn: &Connection,
    owner_id: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = normalize_name(&get_required_str(params, "name")?);
    if name.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "name must not be empty".to_string(),
            details: None,
        });
    }
    let roll_number = normalize_roll_number(&get_required_str(params, "rollNumber")?);
    if roll_number.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "rollNumber must not be empty".to_string(),
            details: None,
        });
    }

    // Attendance gates the whole submission; nothing is written when it
    // fails to validate.
    let Some(attendance) = validate_integer_in_range(params.get("attendance"), 0, 100) else {
        return Err(HandlerErr {
            code: "invalid_attendance",
            message: "attendance must be an integer between 0 and 100".to_string(),
            details: None,
        });
    };

    let Some(marks_map) = params.get("marks").and_then(|v| v.as_object()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing marks".to_string(),
            details: None,
        });
    };

    let created_at = Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let mut results: Vec<serde_json::Value> = Vec::new();
    let mut records_added = 0_usize;
    for subject in Subject::ALL {
        let raw = marks_map.get(subject.as_str());
        // A subject left blank on the form was not attempted.
        let attempted = match raw {
            None => false,
            Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !attempted {
            continue;
        }

        let Some(marks) = validate_integer_in_range(raw, 0, 100) else {
            results.push(json!({
                "subject": subject.as_str(),
                "created": false,
                "reason": "marks must be an integer between 0 and 100"
            }));
            continue;
        };

        let record_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO score_records(id, owner_id, name, roll_number, subject, marks, attendance, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &record_id,
                owner_id,
                &name,
                &roll_number,
                subject.as_str(),
                marks,
                attendance,
                &created_at,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "score_records" })),
        })?;
        records_added += 1;
        results.push(json!({
            "subject": subject.as_str(),
            "created": true
        }));
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    tracing::debug!(records_added, roll_number = %roll_number, "bulk submission");
    Ok(json!({
        "recordsAdded": records_added,
        "results": results
    }))
}

fn list_records(
    conn: &Connection,
    owner_id: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let search = params
        .get("search")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let sort = SortKey::parse(params.get("sort").and_then(|v| v.as_str()));

    let mut sql = String::from(
        "SELECT id, name, roll_number, subject, marks, attendance, created_at
         FROM score_records
         WHERE owner_id = ?",
    );
    let mut bind: Vec<SqlValue> = vec![SqlValue::Text(owner_id.to_string())];
    if let Some(search) = &search {
        sql.push_str(" AND (name LIKE ? OR roll_number LIKE ? OR subject LIKE ?)");
        let pattern = format!("%{}%", search);
        for _ in 0..3 {
            bind.push(SqlValue::Text(pattern.clone()));
        }
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(sort.order_clause());

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let records = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "rollNumber": r.get::<_, String>(2)?,
                "subject": r.get::<_, String>(3)?,
                "marks": sql_value_to_json(r.get::<_, SqlValue>(4)?),
                "attendance": sql_value_to_json(r.get::<_, SqlValue>(5)?),
                "createdAt": r.get::<_, String>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "records": records }))
}

fn get_record(
    conn: &Connection,
    owner_id: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "recordId")?;
    let record = conn
        .query_row(
            "SELECT id, name, roll_number, subject, marks, attendance, created_at
             FROM score_records
             WHERE id = ? AND owner_id = ?",
            (&record_id, owner_id),
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "rollNumber": r.get::<_, String>(2)?,
                    "subject": r.get::<_, String>(3)?,
                    "marks": sql_value_to_json(r.get::<_, SqlValue>(4)?),
                    "attendance": sql_value_to_json(r.get::<_, SqlValue>(5)?),
                    "createdAt": r.get::<_, String>(6)?
                }))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;

    record.ok_or(HandlerErr {
        code: "not_found",
        message: "student record not found".to_string(),
        details: None,
    })
}

fn update_record(
    conn: &Connection,
    owner_id: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "recordId")?;
    let name = normalize_name(&get_required_str(params, "name")?);
    let roll_number = normalize_roll_number(&get_required_str(params, "rollNumber")?);
    // The edit form exposes the subject as free text; unlike the bulk
    // path it is not limited to the fixed five.
    let subject = get_required_str(params, "subject")?.trim().to_string();
    if name.is_empty() || roll_number.is_empty() || subject.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "name, rollNumber and subject must not be empty".to_string(),
            details: None,
        });
    }
    let Some(marks) = validate_integer_in_range(params.get("marks"), 0, 100) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "marks must be an integer between 0 and 100".to_string(),
            details: None,
        });
    };
    let Some(attendance) = validate_integer_in_range(params.get("attendance"), 0, 100) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "attendance must be an integer between 0 and 100".to_string(),
            details: None,
        });
    };

    let exists = conn
        .query_row(
            "SELECT 1 FROM score_records WHERE id = ? AND owner_id = ?",
            (&record_id, owner_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "student record not found".to_string(),
            details: None,
        });
    }

    // Last write wins; concurrent edits are not detected.
    conn.execute(
        "UPDATE score_records
         SET name = ?, roll_number = ?, subject = ?, marks = ?, attendance = ?
         WHERE id = ? AND owner_id = ?",
        (&name, &roll_number, &subject, marks, attendance, &record_id, owner_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "score_records" })),
    })?;

    Ok(json!({ "ok": true }))
}

fn delete_record(
    conn: &Connection,
    owner_id: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "recordId")?;
    let affected = conn
        .execute(
            "DELETE FROM score_records WHERE id = ? AND owner_id = ?",
            (&record_id, owner_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "score_records" })),
        })?;
    if affected == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "student record not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "deleted": true }))
}

fn handle(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &str, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user = match require_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match f(conn, &user.user_id, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.submitBulk" => Some(handle(state, req, submit_bulk)),
        "records.list" => Some(handle(state, req, list_records)),
        "records.get" => Some(handle(state, req, get_record)),
        "records.update" => Some(handle(state, req, update_record)),
        "records.delete" => Some(handle(state, req, delete_record)),
        _ => None,
    }
}
