use time::{Duration, PrimitiveDateTime};

/// Expiry is a predicate over the stored start time, never a stored state.
/// Everything here is a pure function of `now`, so callers pick the clock.

pub(crate) fn deadline(
    start_time: PrimitiveDateTime,
    duration_minutes: i32,
) -> PrimitiveDateTime {
    start_time + Duration::minutes(duration_minutes as i64)
}

pub(crate) fn is_expired(
    now: PrimitiveDateTime,
    start_time: PrimitiveDateTime,
    duration_minutes: i32,
) -> bool {
    now > deadline(start_time, duration_minutes)
}

pub(crate) fn remaining_seconds(
    now: PrimitiveDateTime,
    start_time: PrimitiveDateTime,
    duration_minutes: i32,
) -> i64 {
    (deadline(start_time, duration_minutes) - now).whole_seconds().max(0)
}
