//! File-backed run record persistence.

pub mod json_store;

pub use json_store::JsonRunRecordStore;
