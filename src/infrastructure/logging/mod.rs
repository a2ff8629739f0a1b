//! Structured logging using tracing and tracing-subscriber, with optional
//! rolling JSON log files via tracing-appender.

pub mod logger;

pub use logger::LoggerImpl;
