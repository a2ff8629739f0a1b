//! Process-backed test oracle.

pub mod command_oracle;

pub use command_oracle::CommandOracle;
