// Crawl Task Server - API Core
//
// This crate exposes the task orchestrator over HTTP: a REST API to start,
// pause, resume, cancel and inspect crawl tasks, and a WebSocket endpoint
// that streams each task's lifecycle events.

pub mod common;
pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
