use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("booking.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // Several daemon processes may share one workspace file; writers wait
    // instead of failing with a busy error.
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            instrument TEXT NOT NULL,
            bio TEXT NOT NULL DEFAULT '',
            hourly_rate INTEGER NOT NULL DEFAULT 1000,
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    // UNIQUE(teacher_id, date, time) makes slot generation idempotent at the
    // storage level; concurrent generators cannot produce duplicates.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS time_slots(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            is_available INTEGER NOT NULL DEFAULT 1,
            UNIQUE(teacher_id, date, time),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_time_slots_teacher ON time_slots(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_time_slots_date ON time_slots(date, time)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            group_label TEXT NOT NULL,
            name TEXT NOT NULL,
            price INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bookings(
            id TEXT PRIMARY KEY,
            booking_code TEXT NOT NULL UNIQUE,
            teacher_id TEXT NOT NULL,
            slot_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            student_contact TEXT NOT NULL,
            student_age TEXT,
            student_level TEXT,
            student_note TEXT,
            courses_json TEXT NOT NULL DEFAULT '[]',
            total_price INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'confirmed',
            created_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(slot_id) REFERENCES time_slots(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bookings_slot ON bookings(slot_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bookings_status ON bookings(status)",
        [],
    )?;

    // Monotonic sequences (booking codes). Never derived from row counts.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS counters(
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            contact TEXT NOT NULL,
            instrument TEXT,
            level TEXT,
            note TEXT,
            joined_on TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            item TEXT,
            amount INTEGER NOT NULL,
            method TEXT,
            paid_on TEXT NOT NULL,
            note TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_paid_on ON payments(paid_on)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS expenses(
            id TEXT PRIMARY KEY,
            category TEXT,
            amount INTEGER NOT NULL,
            spent_on TEXT NOT NULL,
            note TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            note TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            exam_date TEXT,
            note TEXT
        )",
        [],
    )?;

    // rank and trend are derived columns, rewritten by the grading engine on
    // every grade insert/delete for the affected exam.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            score REAL NOT NULL,
            rank INTEGER,
            trend TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(exam_id, student_id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_exam ON grades(exam_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS shifts(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            note TEXT,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_shifts_teacher ON shifts(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS substitute_requests(
            id TEXT PRIMARY KEY,
            shift_id TEXT NOT NULL,
            substitute_teacher_id TEXT,
            reason TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            FOREIGN KEY(shift_id) REFERENCES shifts(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leave_requests(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            reason TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS message_contacts(
            user_id TEXT PRIMARY KEY,
            display_name TEXT,
            followed_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Allocate the next value of a named monotonic counter. The first allocation
/// returns `start`; deletions elsewhere never move the counter backwards.
pub fn next_counter(conn: &Connection, name: &str, start: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "INSERT INTO counters(name, value) VALUES(?, ?)
         ON CONFLICT(name) DO UPDATE SET value = counters.value + 1
         RETURNING value",
        (name, start),
        |r| r.get(0),
    )
}
