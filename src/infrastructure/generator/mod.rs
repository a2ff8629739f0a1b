//! Test suite provisioning.

pub mod preset_suites;

pub use preset_suites::PresetSuites;
