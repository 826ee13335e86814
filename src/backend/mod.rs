pub mod analyze;
pub mod common;
pub mod dump;
pub mod trace_viewer;
pub mod visualize;
