//! Infrastructure layer: store boundaries, the change bus and logging bootstrap

pub mod logging;
pub mod store;
pub mod sync;
