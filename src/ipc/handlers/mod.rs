pub mod attendance;
pub mod booking;
pub mod catalog;
pub mod core;
pub mod finance;
pub mod grading;
pub mod messaging;
pub mod staffing;
pub mod students;
pub mod teachers;
