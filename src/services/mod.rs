pub(crate) mod attempt_timing;
pub(crate) mod grading;
pub mod session;
