//! Three-phase visitor-counting workflow.

mod runner;
mod state;

pub use runner::*;
pub use state::*;
