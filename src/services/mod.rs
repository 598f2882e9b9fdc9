pub(crate) mod dispatcher;
pub(crate) mod exam_timing;
pub(crate) mod notifier;
pub(crate) mod scoring;
pub(crate) mod session_manager;
