//! Observability module
//!
//! Structured, event-named logging on top of `tracing`.

pub mod structured_logger;

pub use structured_logger::StructuredLogger;
