//! Process wiring: settings in, cache manager and router state out.

pub mod context;
pub mod error;
