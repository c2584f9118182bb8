use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::{Record, RecordKind};

#[derive(thiserror::Error, Debug)]
pub enum LocalStoreError {
	#[error("local store backend failure: {0}")]
	Backend(String),
	#[error("record kind mismatch: expected {expected}, found {found}")]
	KindMismatch {
		expected: RecordKind,
		found: RecordKind,
	},
}

/// Filter evaluated against every record of a kind
pub type RecordPredicate<'a> = &'a (dyn Fn(&Record) -> bool + Send + Sync);

/// Device-local persistent store, the single mutable source of truth on the device
#[async_trait]
pub trait LocalStore: Send + Sync + 'static {
	async fn get(&self, kind: RecordKind, id: &str) -> Result<Option<Record>, LocalStoreError>;

	/// Creates or fully replaces the record, atomically
	async fn upsert(&self, record: Record) -> Result<(), LocalStoreError>;

	/// Returns whether a record was removed
	async fn delete(&self, kind: RecordKind, id: &str) -> Result<bool, LocalStoreError>;

	async fn query(
		&self,
		kind: RecordKind,
		predicate: RecordPredicate<'_>,
	) -> Result<Vec<Record>, LocalStoreError>;

	/// Marks a record as having local changes not yet confirmed by the remote store
	async fn set_pending_writes(
		&self,
		kind: RecordKind,
		id: &str,
		pending: bool,
	) -> Result<(), LocalStoreError>;

	async fn has_pending_writes(&self, kind: RecordKind, id: &str)
		-> Result<bool, LocalStoreError>;
}

/// Single-writer access point to the local store.
///
/// Every read-modify-write of local records happens under one write guard, so
/// listener tasks and local mutations never interleave halfway through an
/// update. Plain reads share the lock.
#[derive(Clone)]
pub struct LocalWriter {
	store: Arc<dyn LocalStore>,
	gate: Arc<RwLock<()>>,
}

impl LocalWriter {
	pub fn new(store: Arc<dyn LocalStore>) -> Self {
		Self {
			store,
			gate: Arc::new(RwLock::new(())),
		}
	}

	pub async fn write(&self) -> LocalWriteGuard<'_> {
		LocalWriteGuard {
			_guard: self.gate.write().await,
			store: self.store.as_ref(),
		}
	}

	pub async fn read(&self) -> LocalReadGuard<'_> {
		LocalReadGuard {
			_guard: self.gate.read().await,
			store: self.store.as_ref(),
		}
	}
}

/// Exclusive access to the local store
pub struct LocalWriteGuard<'a> {
	_guard: RwLockWriteGuard<'a, ()>,
	store: &'a dyn LocalStore,
}

impl Deref for LocalWriteGuard<'_> {
	type Target = dyn LocalStore;

	fn deref(&self) -> &Self::Target {
		self.store
	}
}

/// Shared read access to the local store
pub struct LocalReadGuard<'a> {
	_guard: RwLockReadGuard<'a, ()>,
	store: &'a dyn LocalStore,
}

impl LocalReadGuard<'_> {
	pub async fn get(&self, kind: RecordKind, id: &str) -> Result<Option<Record>, LocalStoreError> {
		self.store.get(kind, id).await
	}

	pub async fn query(
		&self,
		kind: RecordKind,
		predicate: RecordPredicate<'_>,
	) -> Result<Vec<Record>, LocalStoreError> {
		self.store.query(kind, predicate).await
	}

	pub async fn has_pending_writes(
		&self,
		kind: RecordKind,
		id: &str,
	) -> Result<bool, LocalStoreError> {
		self.store.has_pending_writes(kind, id).await
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::{
		domain::test_utils::{operation, ts},
		infra::store::MemoryLocalStore,
	};

	#[tokio::test]
	async fn writers_are_exclusive() {
		let writer = LocalWriter::new(Arc::new(MemoryLocalStore::new()));
		let guard = writer.write().await;

		let contender = writer.clone();
		let blocked = tokio::time::timeout(Duration::from_millis(50), async move {
			contender.read().await.get(RecordKind::Card, "x").await.is_ok()
		})
		.await;
		assert!(blocked.is_err());

		drop(guard);
		let record = Record::from(operation("alice", 1, ts(0)));
		writer.write().await.upsert(record.clone()).await.unwrap();

		let read = writer.read().await;
		assert_eq!(
			read.get(RecordKind::Operation, &record.id()).await.unwrap(),
			Some(record)
		);
	}
}
