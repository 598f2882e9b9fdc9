pub(crate) mod deadlines;
pub(crate) mod grading;
pub(crate) mod scheduler;
