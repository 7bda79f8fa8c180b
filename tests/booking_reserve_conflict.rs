
use serde_json::json;
use std::thread;
use test_support::{
    create_bare_teacher, create_slot, open_workspace, request, request_err, request_ok,
    spawn_sidecar, temp_dir,
};

#[test]
fn one_slot_admits_exactly_one_booking() {
    let workspace = temp_dir("musicschool-reserve");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let teacher_id = create_bare_teacher(&mut stdin, &mut reader, "1", "陳雅婷");
    let slot_id = create_slot(&mut stdin, &mut reader, "2", &teacher_id, "2030-01-02", "10:00");

    let booked = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "booking.create",
        None,
        json!({
            "teacher_id": teacher_id,
            "slot_id": slot_id,
            "student_name": "王小明",
            "student_contact": "0912345678",
            "courses": [
                { "name": "初次體驗課（60分鐘）", "price": 500 },
                { "name": "基礎入門（60分鐘）", "price": 900 }
            ]
        }),
    );
    let code = booked
        .get("booking_code")
        .and_then(|v| v.as_str())
        .expect("booking_code");
    assert!(code.starts_with("MU"), "code {} missing prefix", code);
    let booking = booked.get("booking").expect("booking record");
    assert_eq!(booking.get("total_price").and_then(|v| v.as_i64()), Some(1400));
    assert_eq!(
        booking.get("status").and_then(|v| v.as_str()),
        Some("confirmed")
    );
    assert_eq!(
        booking.get("teacher").and_then(|v| v.as_str()),
        Some("陳雅婷")
    );
    assert_eq!(booking.get("date").and_then(|v| v.as_str()), Some("2030-01-02"));

    // The slot is consumed.
    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "slots.list",
        None,
        json!({ "teacher_id": teacher_id, "date": "2030-01-02" }),
    );
    assert_eq!(
        slots.get("slots").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // A second attempt against the same slot conflicts.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "booking.create",
        None,
        json!({
            "teacher_id": teacher_id,
            "slot_id": slot_id,
            "student_name": "李小華",
            "student_contact": "0987654321"
        }),
        "conflict",
    );
    assert_eq!(
        error.get("message").and_then(|v| v.as_str()),
        Some("此時段已被預約，請選擇其他時段")
    );

    // Same story from a second daemon process sharing the database file:
    // the conditional flip leaves no window for a double booking.
    let (_child2, mut stdin2, mut reader2) = spawn_sidecar();
    open_workspace(&mut stdin2, &mut reader2, &workspace);
    let _ = request_err(
        &mut stdin2,
        &mut reader2,
        "6",
        "booking.create",
        None,
        json!({
            "teacher_id": teacher_id,
            "slot_id": slot_id,
            "student_name": "李小華",
            "student_contact": "0987654321"
        }),
        "conflict",
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn simultaneous_attempts_from_two_processes_get_one_winner_one_conflict() {
    let workspace = temp_dir("musicschool-reserve-race");
    let (_child1, mut stdin1, mut reader1) = spawn_sidecar();
    open_workspace(&mut stdin1, &mut reader1, &workspace);

    let teacher_id = create_bare_teacher(&mut stdin1, &mut reader1, "1", "陳雅婷");
    let slot_id = create_slot(&mut stdin1, &mut reader1, "2", &teacher_id, "2030-04-01", "10:00");

    let (_child2, mut stdin2, mut reader2) = spawn_sidecar();
    open_workspace(&mut stdin2, &mut reader2, &workspace);

    let payload = |name: &str| {
        json!({
            "teacher_id": teacher_id,
            "slot_id": slot_id,
            "student_name": name,
            "student_contact": "0912000111"
        })
    };
    let first = payload("王小明");
    let second = payload("李小華");

    // Fire both reservations at once; the write lock serializes them and the
    // loser must see a clean conflict, never a busy/locked database error.
    let t1 = thread::spawn(move || {
        request(&mut stdin1, &mut reader1, "race-1", "booking.create", None, first)
    });
    let t2 = thread::spawn(move || {
        request(&mut stdin2, &mut reader2, "race-2", "booking.create", None, second)
    });
    let responses = [t1.join().expect("thread 1"), t2.join().expect("thread 2")];

    let winners: Vec<_> = responses
        .iter()
        .filter(|r| r.get("ok").and_then(|v| v.as_bool()) == Some(true))
        .collect();
    assert_eq!(winners.len(), 1, "exactly one reservation must win: {:?}", responses);

    let loser = responses
        .iter()
        .find(|r| r.get("ok").and_then(|v| v.as_bool()) == Some(false))
        .expect("one attempt must lose");
    assert_eq!(
        loser.pointer("/error/code").and_then(|v| v.as_str()),
        Some("conflict"),
        "loser saw {:?}",
        loser
    );
    assert_eq!(
        loser.pointer("/error/message").and_then(|v| v.as_str()),
        Some("此時段已被預約，請選擇其他時段")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn booking_against_unknown_teacher_is_not_found() {
    let workspace = temp_dir("musicschool-reserve-teacher");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let teacher_id = create_bare_teacher(&mut stdin, &mut reader, "1", "林建宏");
    let slot_id = create_slot(&mut stdin, &mut reader, "2", &teacher_id, "2030-01-03", "14:00");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "booking.create",
        None,
        json!({
            "teacher_id": "no-such-teacher",
            "slot_id": slot_id,
            "student_name": "王小明",
            "student_contact": "0912345678"
        }),
        "not_found",
    );
    assert_eq!(
        error.get("message").and_then(|v| v.as_str()),
        Some("找不到老師資料")
    );

    // The failed attempt must not consume the slot.
    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "slots.list",
        None,
        json!({ "date": "2030-01-03" }),
    );
    assert_eq!(
        slots.get("slots").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let _ = std::fs::remove_dir_all(workspace);
}
