use rusqlite::Connection;
use serde_json::{json, Value};

use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_i64, get_required_str, new_id, with_db};
use crate::ipc::types::{AppState, Request};

/// Active catalog grouped by category, groups in first-seen order after the
/// group sort, items in insertion order within each group.
fn courses_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, group_label, name, price FROM courses
         WHERE is_active = 1
         ORDER BY group_label, rowid",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(1)?,
                json!({
                    "id": r.get::<_, String>(0)?,
                    "group": r.get::<_, String>(1)?,
                    "name": r.get::<_, String>(2)?,
                    "price": r.get::<_, i64>(3)?,
                }),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut groups: Vec<(String, Vec<Value>)> = Vec::new();
    for (group, item) in rows {
        match groups.iter_mut().find(|(g, _)| *g == group) {
            Some((_, items)) => items.push(item),
            None => groups.push((group, vec![item])),
        }
    }
    let result: Vec<Value> = groups
        .into_iter()
        .map(|(group, items)| json!({ "group": group, "items": items }))
        .collect();
    Ok(json!({ "groups": result }))
}

fn courses_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let group = get_required_str(params, "group")?;
    let name = get_required_str(params, "name")?;
    let price = get_required_i64(params, "price")?;
    let id = new_id();
    conn.execute(
        "INSERT INTO courses(id, group_label, name, price, is_active) VALUES(?, ?, ?, ?, 1)",
        rusqlite::params![id, group, name, price],
    )?;
    Ok(json!({
        "course": { "id": id, "group": group, "name": name, "price": price }
    }))
}

fn courses_deactivate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "course_id")?;
    let n = conn.execute(
        "UPDATE courses SET is_active = 0 WHERE id = ?",
        [&course_id],
    )?;
    if n == 0 {
        return Err(HandlerErr::not_found("course not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(with_db(state, req, courses_list)),
        "admin.courses.create" => Some(with_db(state, req, courses_create)),
        "admin.courses.deactivate" => Some(with_db(state, req, courses_deactivate)),
        _ => None,
    }
}
