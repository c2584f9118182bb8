//! Sync infrastructure shared between the engine and its consumers

pub mod event_bus;

pub use event_bus::{ChangeAction, ChangeOrigin, DataChanged, DataChangedBus, SyncSignal};
