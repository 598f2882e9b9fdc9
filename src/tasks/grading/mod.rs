mod maintenance;
mod worker;

pub(crate) use maintenance::run_pass as run_maintenance_pass;
pub(crate) use worker::handle_delivery;
