use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_bool, get_required_str, get_str, new_id, today_string, with_db};
use crate::ipc::types::{AppState, Request};

pub fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    Ok(conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

fn student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "contact": r.get::<_, String>(2)?,
        "instrument": r.get::<_, Option<String>>(3)?,
        "level": r.get::<_, Option<String>>(4)?,
        "note": r.get::<_, Option<String>>(5)?,
        "joined_on": r.get::<_, String>(6)?,
        "is_active": r.get::<_, i64>(7)? != 0,
    }))
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let include_inactive = get_bool(params, "include_inactive").unwrap_or(false);
    let sql = if include_inactive {
        "SELECT id, name, contact, instrument, level, note, joined_on, is_active
         FROM students ORDER BY rowid"
    } else {
        "SELECT id, name, contact, instrument, level, note, joined_on, is_active
         FROM students WHERE is_active = 1 ORDER BY rowid"
    };
    let mut stmt = conn.prepare(sql)?;
    let students = stmt
        .query_map([], |r| student_row(r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let contact = get_required_str(params, "contact")?;
    let instrument = get_str(params, "instrument");
    let level = get_str(params, "level");
    let note = get_str(params, "note");
    let joined_on = get_str(params, "joined_on").unwrap_or_else(today_string);

    let id = new_id();
    conn.execute(
        "INSERT INTO students(id, name, contact, instrument, level, note, joined_on, is_active)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1)",
        rusqlite::params![id, name, contact, instrument, level, note, joined_on],
    )?;
    Ok(json!({ "student_id": id }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "student_id")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    const TEXT_KEYS: [&str; 5] = ["name", "contact", "instrument", "level", "note"];
    // Validate the whole patch before writing any of it.
    for key in TEXT_KEYS {
        if let Some(v) = patch.get(key) {
            if !v.is_string() {
                return Err(HandlerErr::bad_params(format!(
                    "patch.{} must be a string",
                    key
                )));
            }
        }
    }
    for key in TEXT_KEYS {
        if let Some(text) = patch.get(key).and_then(|v| v.as_str()) {
            conn.execute(
                &format!("UPDATE students SET {} = ? WHERE id = ?", key),
                rusqlite::params![text, student_id],
            )?;
        }
    }
    if let Some(active) = patch.get("is_active").and_then(|v| v.as_bool()) {
        conn.execute(
            "UPDATE students SET is_active = ? WHERE id = ?",
            rusqlite::params![active as i64, student_id],
        )?;
    }
    Ok(json!({ "ok": true }))
}

fn students_deactivate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "student_id")?;
    let n = conn.execute(
        "UPDATE students SET is_active = 0 WHERE id = ?",
        [&student_id],
    )?;
    if n == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.students.list" => Some(with_db(state, req, students_list)),
        "admin.students.create" => Some(with_db(state, req, students_create)),
        "admin.students.update" => Some(with_db(state, req, students_update)),
        "admin.students.deactivate" => Some(with_db(state, req, students_deactivate)),
        _ => None,
    }
}
