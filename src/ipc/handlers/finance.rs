use chrono::Local;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};

use super::students::student_exists;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_required_i64, get_required_str, get_str, new_id, today_string, with_db,
};
use crate::ipc::types::{AppState, Request};

fn payments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_str(params, "student_id");
    let mut sql = String::from(
        "SELECT id, student_id, item, amount, method, paid_on, note FROM payments",
    );
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(sid) = student_id {
        sql.push_str(" WHERE student_id = ?");
        args.push(SqlValue::Text(sid));
    }
    sql.push_str(" ORDER BY paid_on DESC, rowid DESC");

    let mut stmt = conn.prepare(&sql)?;
    let payments = stmt
        .query_map(params_from_iter(args), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "student_id": r.get::<_, String>(1)?,
                "item": r.get::<_, Option<String>>(2)?,
                "amount": r.get::<_, i64>(3)?,
                "method": r.get::<_, Option<String>>(4)?,
                "paid_on": r.get::<_, String>(5)?,
                "note": r.get::<_, Option<String>>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "payments": payments }))
}

fn payments_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "student_id")?;
    let amount = get_required_i64(params, "amount")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let id = new_id();
    conn.execute(
        "INSERT INTO payments(id, student_id, item, amount, method, paid_on, note)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            student_id,
            get_str(params, "item"),
            amount,
            get_str(params, "method"),
            get_str(params, "paid_on").unwrap_or_else(today_string),
            get_str(params, "note"),
        ],
    )?;
    Ok(json!({ "payment_id": id }))
}

fn payments_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let payment_id = get_required_str(params, "payment_id")?;
    let n = conn.execute("DELETE FROM payments WHERE id = ?", [&payment_id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("payment not found"));
    }
    Ok(json!({ "ok": true }))
}

fn expenses_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, category, amount, spent_on, note FROM expenses
         ORDER BY spent_on DESC, rowid DESC",
    )?;
    let expenses = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "category": r.get::<_, Option<String>>(1)?,
                "amount": r.get::<_, i64>(2)?,
                "spent_on": r.get::<_, String>(3)?,
                "note": r.get::<_, Option<String>>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "expenses": expenses }))
}

fn expenses_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let amount = get_required_i64(params, "amount")?;
    let id = new_id();
    conn.execute(
        "INSERT INTO expenses(id, category, amount, spent_on, note) VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            get_str(params, "category"),
            amount,
            get_str(params, "spent_on").unwrap_or_else(today_string),
            get_str(params, "note"),
        ],
    )?;
    Ok(json!({ "expense_id": id }))
}

fn expenses_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let expense_id = get_required_str(params, "expense_id")?;
    let n = conn.execute("DELETE FROM expenses WHERE id = ?", [&expense_id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("expense not found"));
    }
    Ok(json!({ "ok": true }))
}

fn finance_summary(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let total_income: i64 =
        conn.query_row("SELECT COALESCE(SUM(amount), 0) FROM payments", [], |r| {
            r.get(0)
        })?;
    let total_expense: i64 =
        conn.query_row("SELECT COALESCE(SUM(amount), 0) FROM expenses", [], |r| {
            r.get(0)
        })?;
    let active_students: i64 = conn.query_row(
        "SELECT COUNT(*) FROM students WHERE is_active = 1",
        [],
        |r| r.get(0),
    )?;
    let month_prefix = format!("{}%", Local::now().format("%Y-%m"));
    let month_income: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE paid_on LIKE ?",
        [&month_prefix],
        |r| r.get(0),
    )?;

    Ok(json!({
        "total_income": total_income,
        "total_expense": total_expense,
        "net": total_income - total_expense,
        "active_students": active_students,
        "month_income": month_income,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.payments.list" => Some(with_db(state, req, payments_list)),
        "admin.payments.create" => Some(with_db(state, req, payments_create)),
        "admin.payments.delete" => Some(with_db(state, req, payments_delete)),
        "admin.expenses.list" => Some(with_db(state, req, expenses_list)),
        "admin.expenses.create" => Some(with_db(state, req, expenses_create)),
        "admin.expenses.delete" => Some(with_db(state, req, expenses_delete)),
        "admin.finance.summary" => Some(with_db(state, req, finance_summary)),
        _ => None,
    }
}
