
use serde_json::json;
use std::collections::HashMap;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{admin_ok, create_student, open_workspace, spawn_sidecar, temp_dir};

fn create_exam(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
) -> String {
    let created = admin_ok(
        stdin,
        reader,
        id,
        "admin.exams.create",
        json!({ "name": name }),
    );
    created
        .get("exam_id")
        .and_then(|v| v.as_str())
        .expect("exam id")
        .to_string()
}

fn add_grade(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    exam_id: &str,
    student_id: &str,
    score: f64,
) -> serde_json::Value {
    let created = admin_ok(
        stdin,
        reader,
        id,
        "admin.grades.create",
        json!({ "exam_id": exam_id, "student_id": student_id, "score": score }),
    );
    created.get("grade").cloned().expect("grade")
}

fn grades_by_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    exam_id: &str,
) -> HashMap<String, serde_json::Value> {
    let listed = admin_ok(
        stdin,
        reader,
        id,
        "admin.grades.list",
        json!({ "exam_id": exam_id }),
    );
    listed
        .get("grades")
        .and_then(|v| v.as_array())
        .expect("grades")
        .iter()
        .map(|g| {
            (
                g.get("student_id").and_then(|v| v.as_str()).unwrap().to_string(),
                g.clone(),
            )
        })
        .collect()
}

#[test]
fn tied_scores_rank_sequentially_in_creation_order() {
    let workspace = temp_dir("musicschool-ranks");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let a = create_student(&mut stdin, &mut reader, "1", "甲");
    let b = create_student(&mut stdin, &mut reader, "2", "乙");
    let c = create_student(&mut stdin, &mut reader, "3", "丙");
    let exam = create_exam(&mut stdin, &mut reader, "4", "十月檢定");

    let _ = add_grade(&mut stdin, &mut reader, "5", &exam, &a, 80.0);
    let _ = add_grade(&mut stdin, &mut reader, "6", &exam, &b, 80.0);
    let _ = add_grade(&mut stdin, &mut reader, "7", &exam, &c, 60.0);

    let by_student = grades_by_student(&mut stdin, &mut reader, "8", &exam);
    assert_eq!(by_student[&a].get("rank").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(by_student[&b].get("rank").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(by_student[&c].get("rank").and_then(|v| v.as_i64()), Some(3));

    // One grade in total: no trend yet.
    assert!(by_student[&a].get("trend").map(|v| v.is_null()).unwrap_or(false));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn trend_compares_latest_two_scores_with_a_five_point_threshold() {
    let workspace = temp_dir("musicschool-trend");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let up = create_student(&mut stdin, &mut reader, "1", "上升");
    let flat = create_student(&mut stdin, &mut reader, "2", "持平");
    let down = create_student(&mut stdin, &mut reader, "3", "下降");
    let exam1 = create_exam(&mut stdin, &mut reader, "4", "第一次月考");
    let exam2 = create_exam(&mut stdin, &mut reader, "5", "第二次月考");

    for (i, sid) in [&up, &flat, &down].iter().enumerate() {
        let _ = add_grade(
            &mut stdin,
            &mut reader,
            &format!("6-{}", i),
            &exam1,
            sid,
            70.0,
        );
    }
    let _ = add_grade(&mut stdin, &mut reader, "7", &exam2, &up, 78.0);
    let _ = add_grade(&mut stdin, &mut reader, "8", &exam2, &flat, 72.0);
    let _ = add_grade(&mut stdin, &mut reader, "9", &exam2, &down, 60.0);

    let by_student = grades_by_student(&mut stdin, &mut reader, "10", &exam2);
    assert_eq!(
        by_student[&up].get("trend").and_then(|v| v.as_str()),
        Some("up")
    );
    assert_eq!(
        by_student[&flat].get("trend").and_then(|v| v.as_str()),
        Some("stable")
    );
    assert_eq!(
        by_student[&down].get("trend").and_then(|v| v.as_str()),
        Some("down")
    );
    // 78 > 72 > 60 in the second exam.
    assert_eq!(by_student[&up].get("rank").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(by_student[&flat].get("rank").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(by_student[&down].get("rank").and_then(|v| v.as_i64()), Some(3));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_a_grade_recomputes_the_remaining_ranks() {
    let workspace = temp_dir("musicschool-grade-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let a = create_student(&mut stdin, &mut reader, "1", "甲");
    let b = create_student(&mut stdin, &mut reader, "2", "乙");
    let c = create_student(&mut stdin, &mut reader, "3", "丙");
    let exam = create_exam(&mut stdin, &mut reader, "4", "期末考");

    let top = add_grade(&mut stdin, &mut reader, "5", &exam, &a, 95.0);
    let _ = add_grade(&mut stdin, &mut reader, "6", &exam, &b, 85.0);
    let _ = add_grade(&mut stdin, &mut reader, "7", &exam, &c, 75.0);

    let top_id = top.get("id").and_then(|v| v.as_str()).expect("grade id");
    let _ = admin_ok(
        &mut stdin,
        &mut reader,
        "8",
        "admin.grades.delete",
        json!({ "grade_id": top_id }),
    );

    let by_student = grades_by_student(&mut stdin, &mut reader, "9", &exam);
    assert_eq!(by_student.len(), 2);
    assert_eq!(by_student[&b].get("rank").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(by_student[&c].get("rank").and_then(|v| v.as_i64()), Some(2));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn duplicate_grade_for_same_exam_and_student_conflicts() {
    let workspace = temp_dir("musicschool-grade-dup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let a = create_student(&mut stdin, &mut reader, "1", "甲");
    let exam = create_exam(&mut stdin, &mut reader, "2", "期中考");
    let _ = add_grade(&mut stdin, &mut reader, "3", &exam, &a, 88.0);
    let _ = test_support::request_err(
        &mut stdin,
        &mut reader,
        "4",
        "admin.grades.create",
        Some(test_support::ADMIN_SECRET),
        json!({ "exam_id": exam, "student_id": a, "score": 90.0 }),
        "conflict",
    );

    let _ = std::fs::remove_dir_all(workspace);
}
