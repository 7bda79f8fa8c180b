
use serde_json::json;
use test_support::{
    admin_ok, create_bare_teacher, create_slot, open_workspace, request_ok, spawn_sidecar,
    temp_dir,
};

#[test]
fn cancel_returns_slot_to_available_and_codes_stay_monotonic() {
    let workspace = temp_dir("musicschool-cancel");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let teacher_id = create_bare_teacher(&mut stdin, &mut reader, "1", "王怡婷");
    let slot_id = create_slot(&mut stdin, &mut reader, "2", &teacher_id, "2030-02-01", "16:00");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "booking.create",
        None,
        json!({
            "teacher_id": teacher_id,
            "slot_id": slot_id,
            "student_name": "張小美",
            "student_contact": "0900111222"
        }),
    );
    let first_code = first
        .get("booking_code")
        .and_then(|v| v.as_str())
        .expect("code")
        .to_string();
    assert!(first_code.ends_with("1001"));

    let listed = admin_ok(
        &mut stdin,
        &mut reader,
        "4",
        "admin.bookings.list",
        json!({ "status": "confirmed" }),
    );
    let bookings = listed.get("bookings").and_then(|v| v.as_array()).expect("bookings");
    assert_eq!(bookings.len(), 1);
    let booking_id = bookings[0]
        .get("id")
        .and_then(|v| v.as_str())
        .expect("booking id")
        .to_string();

    let _ = admin_ok(
        &mut stdin,
        &mut reader,
        "5",
        "admin.bookings.cancel",
        json!({ "booking_id": booking_id }),
    );

    // Slot is bookable again.
    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "slots.list",
        None,
        json!({ "date": "2030-02-01" }),
    );
    assert_eq!(
        slots.get("slots").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "booking.create",
        None,
        json!({
            "teacher_id": teacher_id,
            "slot_id": slot_id,
            "student_name": "張小美",
            "student_contact": "0900111222"
        }),
    );
    let second_code = second
        .get("booking_code")
        .and_then(|v| v.as_str())
        .expect("code");
    // The sequence never reuses a code, even after cancellation.
    assert_ne!(second_code, first_code);
    assert!(second_code.ends_with("1002"));

    // Cancelled and confirmed rows coexist in the full list.
    let all = admin_ok(&mut stdin, &mut reader, "8", "admin.bookings.list", json!({}));
    assert_eq!(
        all.get("bookings").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );

    let _ = std::fs::remove_dir_all(workspace);
}
