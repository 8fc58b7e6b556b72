//! Kernel module - units of work the server schedules on the orchestrator.

pub mod simulated_crawl;

pub use simulated_crawl::{SimulatedCrawl, PROGRESS_STEP};
