//! Process plumbing: logging setup and OS signal handling.

pub mod logging;
pub mod signal;
