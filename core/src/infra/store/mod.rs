//! Boundaries to the device-local store and the remote document store
//!
//! Both are traits so hosts can plug their own transport clients in; the
//! in-memory implementations in [`memory`] back the tests and local tooling.

pub mod local;
pub mod memory;
pub mod remote;

pub use local::{LocalReadGuard, LocalStore, LocalStoreError, LocalWriteGuard, LocalWriter};
pub use memory::{MemoryLocalStore, MemoryRemoteStore};
pub use remote::{
	ChangeType, Document, Filter, RemoteChange, RemoteError, RemoteStore, Revision,
	TransactDecision, TransactOutcome, Transaction,
};
