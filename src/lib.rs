//! Visitor Flow - supervises the capture and recognition workers behind a
//! three-phase visitor-counting workflow.

pub mod config;
pub mod display;
pub mod metrics;
pub mod supervisor;
pub mod worker;
pub mod workflow;
