use time::{format_description::well_known::Rfc3339, OffsetDateTime, PrimitiveDateTime};

pub(crate) fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

pub(crate) fn format_primitive(value: PrimitiveDateTime) -> String {
    value.assume_utc().format(&Rfc3339).unwrap_or_else(|_| value.assume_utc().to_string())
}

/// Signed distance `to - from` as a std duration, clamped at zero.
pub(crate) fn until(from: PrimitiveDateTime, to: PrimitiveDateTime) -> std::time::Duration {
    std::time::Duration::try_from(to - from).unwrap_or(std::time::Duration::ZERO)
}

pub(crate) fn add_std(value: PrimitiveDateTime, delta: std::time::Duration) -> PrimitiveDateTime {
    let delta = time::Duration::try_from(delta).unwrap_or(time::Duration::MAX);
    value.saturating_add(delta)
}

pub(crate) fn sub_std(value: PrimitiveDateTime, delta: std::time::Duration) -> PrimitiveDateTime {
    let delta = time::Duration::try_from(delta).unwrap_or(time::Duration::MAX);
    value.saturating_sub(delta)
}
