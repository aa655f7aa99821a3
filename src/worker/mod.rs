//! Worker module for external process spawning and output parsing.

mod classifier;
mod events;
mod framer;
mod process;

pub use classifier::*;
pub use events::*;
pub use framer::*;
pub use process::*;
