use rusqlite::Connection;
use std::cmp::Ordering;
use std::collections::HashMap;

/// A score must move by more than this many points to count as a trend change.
pub const TREND_THRESHOLD: f64 = 5.0;

/// Classify the latest score against the one before it.
pub fn classify_trend(previous: f64, current: f64) -> &'static str {
    if current > previous + TREND_THRESHOLD {
        "up"
    } else if current < previous - TREND_THRESHOLD {
        "down"
    } else {
        "stable"
    }
}

/// Assign 1-based ranks over (grade id, score) pairs given in creation order.
/// Stable sort: tied scores keep their creation order and still get distinct
/// sequential ranks.
pub fn assign_ranks(grades: &mut [(String, String, f64)]) -> Vec<(String, i64)> {
    grades.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal));
    grades
        .iter()
        .enumerate()
        .map(|(i, (id, _, _))| (id.clone(), i as i64 + 1))
        .collect()
}

/// Full-rescan recompute of rank and trend for one exam's grade set. Runs
/// after every grade insert and delete; cohorts are small enough that the
/// rescan cost never matters.
pub fn recompute_exam(conn: &Connection, exam_id: &str) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, score FROM grades
         WHERE exam_id = ?
         ORDER BY created_at, rowid",
    )?;
    let mut grades: Vec<(String, String, f64)> = stmt
        .query_map([exam_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    for (id, rank) in assign_ranks(&mut grades) {
        conn.execute("UPDATE grades SET rank = ? WHERE id = ?", (rank, id))?;
    }

    // Trend depends on the student's whole history, not this exam alone, and
    // is refreshed on every grade of the exam's roster.
    let mut per_student: HashMap<String, Option<&'static str>> = HashMap::new();
    for (grade_id, student_id, _) in &grades {
        let trend = match per_student.get(student_id) {
            Some(t) => *t,
            None => {
                let t = student_trend(conn, student_id)?;
                per_student.insert(student_id.clone(), t);
                t
            }
        };
        match trend {
            Some(t) => {
                conn.execute("UPDATE grades SET trend = ? WHERE id = ?", (t, grade_id))?
            }
            None => conn.execute("UPDATE grades SET trend = NULL WHERE id = ?", [grade_id])?,
        };
    }
    Ok(())
}

fn student_trend(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<&'static str>> {
    let mut stmt = conn
        .prepare("SELECT score FROM grades WHERE student_id = ? ORDER BY created_at, rowid")?;
    let scores: Vec<f64> = stmt
        .query_map([student_id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    if scores.len() < 2 {
        return Ok(None);
    }
    let current = scores[scores.len() - 1];
    let previous = scores[scores.len() - 2];
    Ok(Some(classify_trend(previous, current)))
}
