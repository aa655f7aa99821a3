//! Supervisor module for worker lifecycle, watchdogs and event delivery.

mod runner;
mod sink;
mod watchdog;

pub use runner::*;
pub use sink::*;
pub use watchdog::*;
