use chrono::{Days, Local};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};

use crate::booking;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, get_str, new_id, with_db};
use crate::ipc::types::{AppState, Request};

fn slot_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "teacher_id": r.get::<_, String>(1)?,
        "date": r.get::<_, String>(2)?,
        "time": r.get::<_, String>(3)?,
        "is_available": r.get::<_, i64>(4)? != 0,
    }))
}

/// Available slots, optionally narrowed to a teacher and either one date or a
/// rolling days-ahead window (default 14).
fn slots_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_str(params, "teacher_id");
    let date = get_str(params, "date");
    let days = params.get("days").and_then(|v| v.as_u64()).unwrap_or(14);

    let mut sql = String::from(
        "SELECT id, teacher_id, date, time, is_available FROM time_slots
         WHERE is_available = 1",
    );
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(tid) = teacher_id {
        sql.push_str(" AND teacher_id = ?");
        args.push(SqlValue::Text(tid));
    }
    if let Some(d) = date {
        sql.push_str(" AND date = ? ORDER BY time");
        args.push(SqlValue::Text(d));
    } else {
        let today = Local::now().date_naive();
        let end = today
            .checked_add_days(Days::new(days))
            .unwrap_or(today);
        sql.push_str(" AND date >= ? AND date <= ? ORDER BY date, time");
        args.push(SqlValue::Text(today.format("%Y-%m-%d").to_string()));
        args.push(SqlValue::Text(end.format("%Y-%m-%d").to_string()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let slots = stmt
        .query_map(params_from_iter(args), |r| slot_row(r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "slots": slots }))
}

fn booking_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    // Student-facing validation messages stay in the operator's language.
    for field in ["teacher_id", "slot_id", "student_name", "student_contact"] {
        let present = params
            .get(field)
            .and_then(|v| v.as_str())
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !present {
            return Err(HandlerErr::bad_params(format!("缺少必填欄位：{}", field)));
        }
    }

    let courses = params
        .get("courses")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let reserve = booking::ReserveRequest {
        teacher_id: get_required_str(params, "teacher_id")?,
        slot_id: get_required_str(params, "slot_id")?,
        student_name: get_required_str(params, "student_name")?,
        student_contact: get_required_str(params, "student_contact")?,
        student_age: get_str(params, "student_age").unwrap_or_default(),
        student_level: get_str(params, "student_level").unwrap_or_default(),
        student_note: get_str(params, "student_note").unwrap_or_default(),
        courses,
    };
    booking::reserve(conn, &reserve)
}

fn bookings_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let status = get_str(params, "status");
    let mut sql =
        String::from("SELECT id FROM bookings");
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(s) = status {
        sql.push_str(" WHERE status = ?");
        args.push(SqlValue::Text(s));
    }
    sql.push_str(" ORDER BY created_at DESC, rowid DESC");

    let mut stmt = conn.prepare(&sql)?;
    let ids: Vec<String> = stmt
        .query_map(params_from_iter(args), |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);
    let mut bookings = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(b) = booking::booking_to_json(conn, &id)? {
            bookings.push(b);
        }
    }
    Ok(json!({ "bookings": bookings }))
}

fn bookings_cancel(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let booking_id = get_required_str(params, "booking_id")?;
    booking::cancel(conn, &booking_id)?;
    Ok(json!({ "ok": true }))
}

fn slots_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacher_id")?;
    let date = get_required_str(params, "date")?;
    let time = get_required_str(params, "time")?;

    let teacher_exists = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !teacher_exists {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    let id = new_id();
    let n = conn.execute(
        "INSERT OR IGNORE INTO time_slots(id, teacher_id, date, time, is_available)
         VALUES(?, ?, ?, ?, 1)",
        rusqlite::params![id, teacher_id, date, time],
    )?;
    if n == 0 {
        return Err(HandlerErr::conflict("slot already exists"));
    }
    Ok(json!({
        "slot": {
            "id": id,
            "teacher_id": teacher_id,
            "date": date,
            "time": time,
            "is_available": true,
        }
    }))
}

fn slots_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let slot_id = get_required_str(params, "slot_id")?;
    let n = conn.execute("DELETE FROM time_slots WHERE id = ?", [&slot_id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("slot not found"));
    }
    Ok(json!({ "ok": true }))
}

fn slots_generate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacher_id")?;
    let teacher_exists = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !teacher_exists {
        return Err(HandlerErr::not_found("teacher not found"));
    }

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
    let days = params
        .get("days")
        .and_then(|v| v.as_u64())
        .unwrap_or(booking::DEFAULT_HORIZON_DAYS);

    let created = booking::generate_slots(conn, &teacher_id, &times, days)?;
    Ok(json!({ "created": created }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "slots.list" => Some(with_db(state, req, slots_list)),
        "booking.create" => Some(with_db(state, req, booking_create)),
        "admin.bookings.list" => Some(with_db(state, req, bookings_list)),
        "admin.bookings.cancel" => Some(with_db(state, req, bookings_cancel)),
        "admin.slots.create" => Some(with_db(state, req, slots_create)),
        "admin.slots.delete" => Some(with_db(state, req, slots_delete)),
        "admin.slots.generate" => Some(with_db(state, req, slots_generate)),
        _ => None,
    }
}
