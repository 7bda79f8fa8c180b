use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};

use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, get_str, new_id, now_string, with_db};
use crate::ipc::types::{AppState, Request};

fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<bool, HandlerErr> {
    Ok(conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

fn shifts_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mut sql = String::from(
        "SELECT id, teacher_id, date, start_time, end_time, note FROM shifts WHERE 1 = 1",
    );
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(tid) = get_str(params, "teacher_id") {
        sql.push_str(" AND teacher_id = ?");
        args.push(SqlValue::Text(tid));
    }
    if let Some(d) = get_str(params, "date") {
        sql.push_str(" AND date = ?");
        args.push(SqlValue::Text(d));
    }
    sql.push_str(" ORDER BY date, start_time");

    let mut stmt = conn.prepare(&sql)?;
    let shifts = stmt
        .query_map(params_from_iter(args), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "teacher_id": r.get::<_, String>(1)?,
                "date": r.get::<_, String>(2)?,
                "start_time": r.get::<_, String>(3)?,
                "end_time": r.get::<_, String>(4)?,
                "note": r.get::<_, Option<String>>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "shifts": shifts }))
}

fn shifts_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacher_id")?;
    let date = get_required_str(params, "date")?;
    let start_time = get_required_str(params, "start_time")?;
    let end_time = get_required_str(params, "end_time")?;
    if !teacher_exists(conn, &teacher_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO shifts(id, teacher_id, date, start_time, end_time, note)
         VALUES(?, ?, ?, ?, ?, ?)",
        rusqlite::params![id, teacher_id, date, start_time, end_time, get_str(params, "note")],
    )?;
    Ok(json!({ "shift_id": id }))
}

fn shifts_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let shift_id = get_required_str(params, "shift_id")?;
    let n = conn.execute("DELETE FROM shifts WHERE id = ?", [&shift_id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("shift not found"));
    }
    Ok(json!({ "ok": true }))
}

fn subs_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mut sql = String::from(
        "SELECT id, shift_id, substitute_teacher_id, reason, status, created_at
         FROM substitute_requests",
    );
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(s) = get_str(params, "status") {
        sql.push_str(" WHERE status = ?");
        args.push(SqlValue::Text(s));
    }
    sql.push_str(" ORDER BY created_at DESC, rowid DESC");

    let mut stmt = conn.prepare(&sql)?;
    let requests = stmt
        .query_map(params_from_iter(args), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "shift_id": r.get::<_, String>(1)?,
                "substitute_teacher_id": r.get::<_, Option<String>>(2)?,
                "reason": r.get::<_, String>(3)?,
                "status": r.get::<_, String>(4)?,
                "created_at": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "requests": requests }))
}

fn subs_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let shift_id = get_required_str(params, "shift_id")?;
    let reason = get_required_str(params, "reason")?;
    let shift_found = conn
        .query_row("SELECT 1 FROM shifts WHERE id = ?", [&shift_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !shift_found {
        return Err(HandlerErr::not_found("shift not found"));
    }
    let substitute = get_str(params, "substitute_teacher_id");
    if let Some(sub) = &substitute {
        if !teacher_exists(conn, sub)? {
            return Err(HandlerErr::not_found("substitute teacher not found"));
        }
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO substitute_requests(id, shift_id, substitute_teacher_id, reason, status, created_at)
         VALUES(?, ?, ?, ?, 'pending', ?)",
        rusqlite::params![id, shift_id, substitute, reason, now_string()],
    )?;
    Ok(json!({ "request_id": id }))
}

/// Approve/reject is valid only from `pending`; a second decision conflicts.
fn resolve_request(
    conn: &Connection,
    table: &str,
    id_key: &str,
    params: &Value,
    status: &str,
) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, id_key)?;
    let n = conn.execute(
        &format!(
            "UPDATE {} SET status = ? WHERE id = ? AND status = 'pending'",
            table
        ),
        rusqlite::params![status, id],
    )?;
    if n == 0 {
        let exists = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?", table),
                [&id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        return Err(if exists {
            HandlerErr::conflict("request already resolved")
        } else {
            HandlerErr::not_found("request not found")
        });
    }
    Ok(json!({ "ok": true, "status": status }))
}

fn leaves_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mut sql = String::from(
        "SELECT id, teacher_id, start_date, end_date, reason, status, created_at
         FROM leave_requests",
    );
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(s) = get_str(params, "status") {
        sql.push_str(" WHERE status = ?");
        args.push(SqlValue::Text(s));
    }
    sql.push_str(" ORDER BY created_at DESC, rowid DESC");

    let mut stmt = conn.prepare(&sql)?;
    let requests = stmt
        .query_map(params_from_iter(args), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "teacher_id": r.get::<_, String>(1)?,
                "start_date": r.get::<_, String>(2)?,
                "end_date": r.get::<_, String>(3)?,
                "reason": r.get::<_, String>(4)?,
                "status": r.get::<_, String>(5)?,
                "created_at": r.get::<_, String>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "requests": requests }))
}

fn leaves_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacher_id")?;
    let start_date = get_required_str(params, "start_date")?;
    let end_date = get_required_str(params, "end_date")?;
    let reason = get_required_str(params, "reason")?;
    if !teacher_exists(conn, &teacher_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO leave_requests(id, teacher_id, start_date, end_date, reason, status, created_at)
         VALUES(?, ?, ?, ?, ?, 'pending', ?)",
        rusqlite::params![id, teacher_id, start_date, end_date, reason, now_string()],
    )?;
    Ok(json!({ "request_id": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.shifts.list" => Some(with_db(state, req, shifts_list)),
        "admin.shifts.create" => Some(with_db(state, req, shifts_create)),
        "admin.shifts.delete" => Some(with_db(state, req, shifts_delete)),
        "admin.subs.list" => Some(with_db(state, req, subs_list)),
        "admin.subs.create" => Some(with_db(state, req, subs_create)),
        "admin.subs.approve" => Some(with_db(state, req, |c, p| {
            resolve_request(c, "substitute_requests", "request_id", p, "approved")
        })),
        "admin.subs.reject" => Some(with_db(state, req, |c, p| {
            resolve_request(c, "substitute_requests", "request_id", p, "rejected")
        })),
        "admin.leaves.list" => Some(with_db(state, req, leaves_list)),
        "admin.leaves.create" => Some(with_db(state, req, leaves_create)),
        "admin.leaves.approve" => Some(with_db(state, req, |c, p| {
            resolve_request(c, "leave_requests", "request_id", p, "approved")
        })),
        "admin.leaves.reject" => Some(with_db(state, req, |c, p| {
            resolve_request(c, "leave_requests", "request_id", p, "rejected")
        })),
        _ => None,
    }
}
