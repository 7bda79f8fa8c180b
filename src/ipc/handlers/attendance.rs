use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};

use super::students::student_exists;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, get_str, new_id, with_db};
use crate::ipc::types::{AppState, Request};

const STATUSES: &[&str] = &["present", "absent", "leave"];

fn attendance_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_str(params, "student_id");
    let month = get_str(params, "month"); // YYYY-MM

    let mut sql =
        String::from("SELECT id, student_id, date, status, note FROM attendance WHERE 1 = 1");
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(sid) = student_id {
        sql.push_str(" AND student_id = ?");
        args.push(SqlValue::Text(sid));
    }
    if let Some(m) = month {
        sql.push_str(" AND date LIKE ?");
        args.push(SqlValue::Text(format!("{}%", m)));
    }
    sql.push_str(" ORDER BY date DESC, rowid DESC");

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_from_iter(args), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "student_id": r.get::<_, String>(1)?,
                "date": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "note": r.get::<_, Option<String>>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "attendance": records }))
}

fn attendance_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "student_id")?;
    let date = get_required_str(params, "date")?;
    let status = get_required_str(params, "status")?;
    if !STATUSES.contains(&status.as_str()) {
        return Err(HandlerErr::bad_params(
            "status must be present, absent or leave",
        ));
    }
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO attendance(id, student_id, date, status, note) VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![id, student_id, date, status, get_str(params, "note")],
    )?;
    Ok(json!({ "attendance_id": id }))
}

fn attendance_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let attendance_id = get_required_str(params, "attendance_id")?;
    let n = conn.execute("DELETE FROM attendance WHERE id = ?", [&attendance_id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("attendance record not found"));
    }
    Ok(json!({ "ok": true }))
}

/// Per-student counts by status plus an attendance rate in percent.
fn attendance_stats(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "student_id")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let mut counts = serde_json::Map::new();
    let mut total: i64 = 0;
    let mut present: i64 = 0;
    for status in STATUSES {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE student_id = ? AND status = ?",
            (&student_id, status),
            |r| r.get(0),
        )?;
        counts.insert(status.to_string(), json!(n));
        total += n;
        if *status == "present" {
            present = n;
        }
    }
    let rate = if total > 0 {
        present as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    Ok(json!({
        "student_id": student_id,
        "total": total,
        "counts": counts,
        "rate": rate,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.attendance.list" => Some(with_db(state, req, attendance_list)),
        "admin.attendance.create" => Some(with_db(state, req, attendance_create)),
        "admin.attendance.delete" => Some(with_db(state, req, attendance_delete)),
        "admin.attendance.stats" => Some(with_db(state, req, attendance_stats)),
        _ => None,
    }
}
