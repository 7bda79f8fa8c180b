use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};

use super::students::student_exists;
use crate::grading;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_required_f64, get_required_str, get_str, new_id, now_string, with_db,
};
use crate::ipc::types::{AppState, Request};

fn exam_exists(conn: &Connection, exam_id: &str) -> Result<bool, HandlerErr> {
    Ok(conn
        .query_row("SELECT 1 FROM exams WHERE id = ?", [exam_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

fn exams_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt =
        conn.prepare("SELECT id, name, exam_date, note FROM exams ORDER BY rowid")?;
    let exams = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "exam_date": r.get::<_, Option<String>>(2)?,
                "note": r.get::<_, Option<String>>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "exams": exams }))
}

fn exams_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let id = new_id();
    conn.execute(
        "INSERT INTO exams(id, name, exam_date, note) VALUES(?, ?, ?, ?)",
        rusqlite::params![
            id,
            name,
            get_str(params, "exam_date"),
            get_str(params, "note")
        ],
    )?;
    Ok(json!({ "exam_id": id }))
}

fn exams_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam_id = get_required_str(params, "exam_id")?;
    if !exam_exists(conn, &exam_id)? {
        return Err(HandlerErr::not_found("exam not found"));
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM grades WHERE exam_id = ?", [&exam_id])?;
    tx.execute("DELETE FROM exams WHERE id = ?", [&exam_id])?;
    tx.commit()?;
    Ok(json!({ "ok": true }))
}

fn grade_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "exam_id": r.get::<_, String>(1)?,
        "student_id": r.get::<_, String>(2)?,
        "score": r.get::<_, f64>(3)?,
        "rank": r.get::<_, Option<i64>>(4)?,
        "trend": r.get::<_, Option<String>>(5)?,
        "created_at": r.get::<_, String>(6)?,
    }))
}

fn grades_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mut sql = String::from(
        "SELECT id, exam_id, student_id, score, rank, trend, created_at
         FROM grades WHERE 1 = 1",
    );
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(eid) = get_str(params, "exam_id") {
        sql.push_str(" AND exam_id = ?");
        args.push(SqlValue::Text(eid));
    }
    if let Some(sid) = get_str(params, "student_id") {
        sql.push_str(" AND student_id = ?");
        args.push(SqlValue::Text(sid));
    }
    sql.push_str(" ORDER BY created_at, rowid");

    let mut stmt = conn.prepare(&sql)?;
    let grades = stmt
        .query_map(params_from_iter(args), |r| grade_row(r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "grades": grades }))
}

fn grades_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam_id = get_required_str(params, "exam_id")?;
    let student_id = get_required_str(params, "student_id")?;
    let score = get_required_f64(params, "score")?;
    if !exam_exists(conn, &exam_id)? {
        return Err(HandlerErr::not_found("exam not found"));
    }
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let id = new_id();
    let n = conn.execute(
        "INSERT OR IGNORE INTO grades(id, exam_id, student_id, score, created_at)
         VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![id, exam_id, student_id, score, now_string()],
    )?;
    if n == 0 {
        return Err(HandlerErr::conflict(
            "grade already recorded for this student",
        ));
    }
    grading::recompute_exam(conn, &exam_id)?;

    let grade = conn.query_row(
        "SELECT id, exam_id, student_id, score, rank, trend, created_at
         FROM grades WHERE id = ?",
        [&id],
        |r| grade_row(r),
    )?;
    Ok(json!({ "grade": grade }))
}

fn grades_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let grade_id = get_required_str(params, "grade_id")?;
    let exam_id: Option<String> = conn
        .query_row("SELECT exam_id FROM grades WHERE id = ?", [&grade_id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(exam_id) = exam_id else {
        return Err(HandlerErr::not_found("grade not found"));
    };
    conn.execute("DELETE FROM grades WHERE id = ?", [&grade_id])?;
    // Recompute with the exam id captured before the delete.
    grading::recompute_exam(conn, &exam_id)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.exams.list" => Some(with_db(state, req, exams_list)),
        "admin.exams.create" => Some(with_db(state, req, exams_create)),
        "admin.exams.delete" => Some(with_db(state, req, exams_delete)),
        "admin.grades.list" => Some(with_db(state, req, grades_list)),
        "admin.grades.create" => Some(with_db(state, req, grades_create)),
        "admin.grades.delete" => Some(with_db(state, req, grades_delete)),
        _ => None,
    }
}
