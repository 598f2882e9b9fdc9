use std::fmt::Debug;

use time::PrimitiveDateTime;

use crate::core::time::primitive_now_utc;

/// Wall-clock source for session deadlines and job timestamps. All values are UTC.
pub(crate) trait Clock: Send + Sync + Debug {
    fn now(&self) -> PrimitiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> PrimitiveDateTime {
        primitive_now_utc()
    }
}

#[cfg(test)]
pub(crate) use test_clocks::{ManualClock, TokioClock};
