use rusqlite::Connection;
use serde_json::{json, Value};

use crate::booking;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_i64, get_required_str, get_str, new_id, with_db};
use crate::ipc::types::{AppState, Request};

fn teacher_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "instrument": r.get::<_, String>(2)?,
        "bio": r.get::<_, String>(3)?,
        "hourly_rate": r.get::<_, i64>(4)?,
    }))
}

fn teachers_list_public(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, name, instrument, bio, hourly_rate FROM teachers
         WHERE is_active = 1 ORDER BY rowid",
    )?;
    let teachers = stmt
        .query_map([], |r| teacher_row(r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "teachers": teachers }))
}

fn teachers_list_admin(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, name, instrument, bio, hourly_rate, is_active FROM teachers
         ORDER BY rowid",
    )?;
    let teachers = stmt
        .query_map([], |r| {
            let mut v = teacher_row(r)?;
            v["is_active"] = json!(r.get::<_, i64>(5)? != 0);
            Ok(v)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "teachers": teachers }))
}

fn teachers_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let instrument = get_required_str(params, "instrument")?;
    let bio = get_str(params, "bio").unwrap_or_default();
    let hourly_rate = get_i64(params, "hourly_rate").unwrap_or(1000);

    let id = new_id();
    conn.execute(
        "INSERT INTO teachers(id, name, instrument, bio, hourly_rate, is_active)
         VALUES(?, ?, ?, ?, ?, 1)",
        rusqlite::params![id, name, instrument, bio, hourly_rate],
    )?;

    // New teachers get a full horizon of slots immediately.
    let times: Vec<String> = params
        .get("times")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_else(|| {
            booking::DEFAULT_SLOT_TIMES
                .iter()
                .map(|s| s.to_string())
                .collect()
        });
    let created =
        booking::generate_slots(conn, &id, &times, booking::DEFAULT_HORIZON_DAYS)?;

    Ok(json!({
        "teacher": {
            "id": id,
            "name": name,
            "instrument": instrument,
            "bio": bio,
            "hourly_rate": hourly_rate,
        },
        "slots_created": created,
    }))
}

fn teachers_deactivate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacher_id")?;
    let n = conn.execute(
        "UPDATE teachers SET is_active = 0 WHERE id = ?",
        [&teacher_id],
    )?;
    if n == 0 {
        return Err(HandlerErr::not_found("teacher not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(with_db(state, req, teachers_list_public)),
        "admin.teachers.list" => Some(with_db(state, req, teachers_list_admin)),
        "admin.teachers.create" => Some(with_db(state, req, teachers_create)),
        "admin.teachers.deactivate" => Some(with_db(state, req, teachers_deactivate)),
        _ => None,
    }
}
