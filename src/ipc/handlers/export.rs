use crate::ipc::error::{err, ok};
use crate::ipc::handlers::auth::require_session;
use crate::ipc::types::{AppState, Request};
use rusqlite::{types::Value as SqlValue, Connection};
use serde_json::json;
use std::path::Path;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn sql_value_to_field(v: SqlValue) -> String {
    match v {
        SqlValue::Null | SqlValue::Blob(_) => String::new(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(r) => r.to_string(),
        SqlValue::Text(s) => s,
    }
}

fn write_text_file(path: &str, contents: &str) -> Result<(), HandlerErr> {
    let out = Path::new(path);
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| HandlerErr {
                code: "export_failed",
                message: e.to_string(),
                details: Some(json!({ "path": path })),
            })?;
        }
    }
    std::fs::write(out, contents).map_err(|e| HandlerErr {
        code: "export_failed",
        message: e.to_string(),
        details: Some(json!({ "path": path })),
    })?;
    Ok(())
}

fn export_csv(
    conn: &Connection,
    owner_id: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let out_path = params
        .get("outPath")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing outPath".to_string(),
            details: None,
        })?;

    // Plain row projection in insertion order; no aggregation, no
    // filtering beyond ownership.
    let mut stmt = conn
        .prepare(
            "SELECT name, roll_number, subject, marks, attendance, created_at
             FROM score_records
             WHERE owner_id = ?
             ORDER BY rowid",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let rows: Vec<(String, String, String, SqlValue, SqlValue, String)> = stmt
        .query_map([owner_id], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get::<_, SqlValue>(3)?,
                r.get::<_, SqlValue>(4)?,
                r.get(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    if rows.is_empty() {
        return Err(HandlerErr {
            code: "no_data",
            message: "no records to export".to_string(),
            details: None,
        });
    }

    let mut csv = String::from("name,roll_number,subject,marks,attendance,created_at\n");
    let mut rows_exported = 0_usize;
    for (name, roll_number, subject, marks, attendance, created_at) in rows {
        rows_exported += 1;
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_quote(&name),
            csv_quote(&roll_number),
            csv_quote(&subject),
            csv_quote(&sql_value_to_field(marks)),
            csv_quote(&sql_value_to_field(attendance)),
            csv_quote(&created_at)
        ));
    }
    write_text_file(&out_path, &csv)?;

    tracing::info!(rows_exported, path = %out_path, "csv export written");
    Ok(json!({
        "rowsExported": rows_exported,
        "path": out_path
    }))
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user = match require_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match export_csv(conn, &user.user_id, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.csv" => Some(handle_export_csv(state, req)),
        _ => None,
    }
}
