
use serde_json::json;
use std::collections::HashSet;
use test_support::{admin_ok, create_bare_teacher, open_workspace, request_ok, spawn_sidecar, temp_dir};

#[test]
fn seven_day_horizon_skips_sunday_and_repeats_insert_nothing() {
    let workspace = temp_dir("musicschool-slotgen");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let teacher_id = create_bare_teacher(&mut stdin, &mut reader, "1", "林建宏");

    let times = json!(["10:00", "14:00"]);
    let generated = admin_ok(
        &mut stdin,
        &mut reader,
        "2",
        "admin.slots.generate",
        json!({ "teacher_id": teacher_id, "times": times, "days": 7 }),
    );
    // Any 7 consecutive future days contain exactly one Sunday.
    assert_eq!(generated.get("created").and_then(|v| v.as_u64()), Some(12));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "slots.list",
        None,
        json!({ "teacher_id": teacher_id, "days": 8 }),
    );
    let slots = listed.get("slots").and_then(|v| v.as_array()).expect("slots");
    assert_eq!(slots.len(), 12);

    let mut tuples = HashSet::new();
    let mut dates = HashSet::new();
    for s in slots {
        let date = s.get("date").and_then(|v| v.as_str()).expect("date").to_string();
        let time = s.get("time").and_then(|v| v.as_str()).expect("time").to_string();
        dates.insert(date.clone());
        assert!(
            tuples.insert((date, time)),
            "duplicate (date, time) tuple in generated slots"
        );
    }
    assert_eq!(dates.len(), 6, "one closed day must be skipped");

    // Second identical call is a no-op.
    let again = admin_ok(
        &mut stdin,
        &mut reader,
        "4",
        "admin.slots.generate",
        json!({ "teacher_id": teacher_id, "times": times, "days": 7 }),
    );
    assert_eq!(again.get("created").and_then(|v| v.as_u64()), Some(0));

    let relisted = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "slots.list",
        None,
        json!({ "teacher_id": teacher_id, "days": 8 }),
    );
    assert_eq!(
        relisted.get("slots").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(12)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn new_teacher_gets_a_default_horizon_of_slots() {
    let workspace = temp_dir("musicschool-slotgen-default");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let created = admin_ok(
        &mut stdin,
        &mut reader,
        "1",
        "admin.teachers.create",
        json!({ "name": "陳雅婷", "instrument": "鋼琴", "hourly_rate": 1200 }),
    );
    // 14 future days always contain exactly two Sundays: 12 open days,
    // 4 default lesson times each.
    assert_eq!(
        created.get("slots_created").and_then(|v| v.as_u64()),
        Some(48)
    );

    let _ = std::fs::remove_dir_all(workspace);
}
