//! Long-running services

pub mod sync;
