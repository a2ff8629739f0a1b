//! Process-backed transformation agent.

pub mod command_agent;

pub use command_agent::CommandAgent;
