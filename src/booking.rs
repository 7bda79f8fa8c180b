use chrono::{Datelike, Days, Local, Weekday};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::HandlerErr;

/// Default lesson times generated for a new teacher.
pub const DEFAULT_SLOT_TIMES: &[&str] = &["10:00", "14:00", "16:00", "19:00"];
/// Default generation/listing horizon in days.
pub const DEFAULT_HORIZON_DAYS: u64 = 14;
/// The school is closed on Sundays; no slots are ever generated for them.
pub const CLOSED_WEEKDAY: Weekday = Weekday::Sun;

const BOOKING_CODE_PREFIX: &str = "MU";
const BOOKING_CODE_SEQ_START: i64 = 1001;

pub struct ReserveRequest {
    pub teacher_id: String,
    pub slot_id: String,
    pub student_name: String,
    pub student_contact: String,
    pub student_age: String,
    pub student_level: String,
    pub student_note: String,
    pub courses: Vec<serde_json::Value>,
}

/// Sum of the `price` fields across the selected course line items. Prices are
/// trusted as supplied; a missing or non-numeric price counts as zero.
pub fn course_total(courses: &[serde_json::Value]) -> i64 {
    courses
        .iter()
        .map(|c| c.get("price").and_then(|v| v.as_i64()).unwrap_or(0))
        .sum()
}

fn format_booking_code(seq: i64) -> String {
    format!(
        "{}{}{}",
        BOOKING_CODE_PREFIX,
        Local::now().format("%m%d"),
        seq
    )
}

/// Reserve a slot for a student. The availability flip and the booking insert
/// happen in one immediate transaction; the flip itself is a conditional
/// update, so two racing reservations can never both claim the same slot.
/// Immediate mode takes the write lock up front, so a concurrent writer from
/// another process waits (busy timeout) and then sees 0 affected rows rather
/// than a busy error.
pub fn reserve(
    conn: &Connection,
    req: &ReserveRequest,
) -> Result<serde_json::Value, HandlerErr> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    // Read first so a dead slot reports conflict before a missing teacher
    // reports not_found, matching the public API's error precedence.
    let available: Option<bool> = tx
        .query_row(
            "SELECT is_available FROM time_slots WHERE id = ?",
            [&req.slot_id],
            |r| r.get::<_, i64>(0).map(|v| v != 0),
        )
        .optional()?;
    if available != Some(true) {
        return Err(HandlerErr::conflict("此時段已被預約，請選擇其他時段"));
    }

    let teacher_exists: bool = tx
        .query_row(
            "SELECT 1 FROM teachers WHERE id = ?",
            [&req.teacher_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !teacher_exists {
        return Err(HandlerErr::not_found("找不到老師資料"));
    }

    let total = course_total(&req.courses);
    let seq = db::next_counter(&tx, "booking_code", BOOKING_CODE_SEQ_START)?;
    let booking_code = format_booking_code(seq);

    // The compare-and-swap: only the reservation that still sees the slot
    // available gets to flip it.
    let flipped = tx.execute(
        "UPDATE time_slots SET is_available = 0 WHERE id = ? AND is_available = 1",
        [&req.slot_id],
    )?;
    if flipped == 0 {
        return Err(HandlerErr::conflict("此時段已被預約，請選擇其他時段"));
    }

    let booking_id = Uuid::new_v4().to_string();
    let created_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let courses_json = serde_json::to_string(&req.courses)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    tx.execute(
        "INSERT INTO bookings(
            id, booking_code, teacher_id, slot_id,
            student_name, student_contact, student_age, student_level, student_note,
            courses_json, total_price, status, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'confirmed', ?)",
        rusqlite::params![
            booking_id,
            booking_code,
            req.teacher_id,
            req.slot_id,
            req.student_name,
            req.student_contact,
            req.student_age,
            req.student_level,
            req.student_note,
            courses_json,
            total,
            created_at,
        ],
    )?;
    tx.commit()?;

    tracing::info!(booking_code, teacher_id = %req.teacher_id, "booking created");
    let booking = booking_to_json(conn, &booking_id)?
        .ok_or_else(|| HandlerErr::new("db_failed", "booking vanished after insert"))?;
    Ok(json!({
        "booking_code": booking_code,
        "booking": booking,
    }))
}

/// Cancel a booking and release its slot. Cancelling twice is harmless; the
/// slot simply goes (or stays) available.
pub fn cancel(conn: &Connection, booking_id: &str) -> Result<(), HandlerErr> {
    let slot_id: Option<String> = conn
        .query_row(
            "SELECT slot_id FROM bookings WHERE id = ?",
            [booking_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(slot_id) = slot_id else {
        return Err(HandlerErr::not_found("找不到預約資料"));
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE bookings SET status = 'cancelled' WHERE id = ?",
        [booking_id],
    )?;
    tx.execute(
        "UPDATE time_slots SET is_available = 1 WHERE id = ?",
        [&slot_id],
    )?;
    tx.commit()?;
    Ok(())
}

/// The full denormalized booking record handed to clients.
pub fn booking_to_json(
    conn: &Connection,
    booking_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    conn.query_row(
        "SELECT b.id, b.booking_code,
                COALESCE(t.name, ''), COALESCE(t.instrument, ''),
                COALESCE(s.date, ''), COALESCE(s.time, ''),
                b.student_name, b.student_contact, b.student_age,
                b.student_level, b.student_note,
                b.courses_json, b.total_price, b.status, b.created_at
         FROM bookings b
         LEFT JOIN teachers t ON t.id = b.teacher_id
         LEFT JOIN time_slots s ON s.id = b.slot_id
         WHERE b.id = ?",
        [booking_id],
        |r| {
            let courses_raw: String = r.get(11)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "booking_code": r.get::<_, String>(1)?,
                "teacher": r.get::<_, String>(2)?,
                "instrument": r.get::<_, String>(3)?,
                "date": r.get::<_, String>(4)?,
                "time": r.get::<_, String>(5)?,
                "student_name": r.get::<_, String>(6)?,
                "student_contact": r.get::<_, String>(7)?,
                "student_age": r.get::<_, Option<String>>(8)?,
                "student_level": r.get::<_, Option<String>>(9)?,
                "student_note": r.get::<_, Option<String>>(10)?,
                "courses": serde_json::from_str::<serde_json::Value>(&courses_raw)
                    .unwrap_or_else(|_| json!([])),
                "total_price": r.get::<_, i64>(12)?,
                "status": r.get::<_, String>(13)?,
                "created_at": r.get::<_, String>(14)?,
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::from)
}

/// Generate one slot per (future date, time) over the horizon, skipping the
/// weekly closed day. Idempotent: the (teacher, date, time) uniqueness lives
/// in the schema, so repeats and concurrent calls insert nothing twice.
pub fn generate_slots(
    conn: &Connection,
    teacher_id: &str,
    times: &[String],
    days_ahead: u64,
) -> Result<usize, HandlerErr> {
    let today = Local::now().date_naive();
    let mut created = 0usize;
    for offset in 1..=days_ahead {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            continue;
        };
        if date.weekday() == CLOSED_WEEKDAY {
            continue;
        }
        let date_str = date.format("%Y-%m-%d").to_string();
        for time in times {
            created += conn.execute(
                "INSERT OR IGNORE INTO time_slots(id, teacher_id, date, time, is_available)
                 VALUES(?, ?, ?, ?, 1)",
                rusqlite::params![Uuid::new_v4().to_string(), teacher_id, date_str, time],
            )?;
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn course_total_sums_prices_and_ignores_malformed() {
        let courses = vec![
            json!({ "name": "體驗課", "price": 500 }),
            json!({ "name": "基礎入門", "price": 900 }),
            json!({ "name": "no price" }),
            json!({ "name": "bad price", "price": "NaN" }),
        ];
        assert_eq!(course_total(&courses), 1400);
        assert_eq!(course_total(&[]), 0);
    }

    #[test]
    fn booking_code_has_prefix_month_day_and_sequence() {
        let code = format_booking_code(1001);
        assert!(code.starts_with("MU"));
        // MU + MMDD + seq
        assert_eq!(code.len(), 2 + 4 + 4);
        assert!(code.ends_with("1001"));
    }
}
