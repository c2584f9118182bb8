//! In-memory store adapters
//!
//! [`MemoryRemoteStore`] behaves like a document database with live queries:
//! every write gets a fresh revision, subscribers get a snapshot followed by
//! changes, and transactions run under one lock. It can also be switched
//! offline or have its subscriptions cut to exercise recovery paths.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use super::{
	local::{LocalStore, LocalStoreError, RecordPredicate},
	remote::{
		ChangeType, Document, Filter, RemoteChange, RemoteError, RemoteStore, Revision,
		TransactDecision, TransactOutcome, Transaction,
	},
};
use crate::domain::{Fields, Record, RecordKind, Scope};

#[derive(Debug, Clone)]
struct StoredRecord {
	record: Record,
	pending_writes: bool,
}

#[derive(Debug, Default)]
pub struct MemoryLocalStore {
	records: RwLock<BTreeMap<(RecordKind, String), StoredRecord>>,
}

impl MemoryLocalStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.records.read().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.records.read().is_empty()
	}
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
	async fn get(&self, kind: RecordKind, id: &str) -> Result<Option<Record>, LocalStoreError> {
		Ok(self
			.records
			.read()
			.get(&(kind, id.to_string()))
			.map(|stored| stored.record.clone()))
	}

	async fn upsert(&self, record: Record) -> Result<(), LocalStoreError> {
		let key = (record.kind(), record.id());
		let mut records = self.records.write();

		match records.get_mut(&key) {
			Some(stored) => stored.record = record,
			None => {
				records.insert(
					key,
					StoredRecord {
						record,
						pending_writes: false,
					},
				);
			}
		}

		Ok(())
	}

	async fn delete(&self, kind: RecordKind, id: &str) -> Result<bool, LocalStoreError> {
		Ok(self.records.write().remove(&(kind, id.to_string())).is_some())
	}

	async fn query(
		&self,
		kind: RecordKind,
		predicate: RecordPredicate<'_>,
	) -> Result<Vec<Record>, LocalStoreError> {
		Ok(self
			.records
			.read()
			.iter()
			.filter(|((stored_kind, _), stored)| *stored_kind == kind && predicate(&stored.record))
			.map(|(_, stored)| stored.record.clone())
			.collect())
	}

	async fn set_pending_writes(
		&self,
		kind: RecordKind,
		id: &str,
		pending: bool,
	) -> Result<(), LocalStoreError> {
		if let Some(stored) = self.records.write().get_mut(&(kind, id.to_string())) {
			stored.pending_writes = pending;
		}

		Ok(())
	}

	async fn has_pending_writes(
		&self,
		kind: RecordKind,
		id: &str,
	) -> Result<bool, LocalStoreError> {
		Ok(self
			.records
			.read()
			.get(&(kind, id.to_string()))
			.is_some_and(|stored| stored.pending_writes))
	}
}

type CollectionKey = (Scope, RecordKind);

#[derive(Default)]
struct RemoteState {
	collections: BTreeMap<CollectionKey, BTreeMap<String, Document>>,
	subscribers: HashMap<CollectionKey, Vec<mpsc::UnboundedSender<RemoteChange>>>,
	last_revision: Revision,
	offline: bool,
	denied: HashSet<Scope>,
	writes: u64,
}

impl RemoteState {
	fn check_reachable(&self, scope: &Scope) -> Result<(), RemoteError> {
		if self.offline {
			return Err(RemoteError::Unreachable {
				scope: scope.clone(),
				reason: "offline".to_string(),
			});
		}

		if self.denied.contains(scope) {
			return Err(RemoteError::PermissionDenied(scope.clone()));
		}

		Ok(())
	}

	fn put(&mut self, scope: &Scope, kind: RecordKind, id: &str, fields: Fields) -> Revision {
		self.last_revision += 1;
		self.writes += 1;
		let revision = self.last_revision;
		let key = (scope.clone(), kind);

		let previous = self.collections.entry(key.clone()).or_default().insert(
			id.to_string(),
			Document {
				id: id.to_string(),
				fields: fields.clone(),
				revision,
			},
		);

		let change_type = if previous.is_some() {
			ChangeType::Modified
		} else {
			ChangeType::Added
		};

		self.notify(
			&key,
			RemoteChange {
				id: id.to_string(),
				fields,
				change_type,
				revision,
			},
		);

		revision
	}

	fn remove(&mut self, scope: &Scope, kind: RecordKind, id: &str) -> Revision {
		self.last_revision += 1;
		self.writes += 1;
		let revision = self.last_revision;
		let key = (scope.clone(), kind);

		let removed = self
			.collections
			.get_mut(&key)
			.and_then(|documents| documents.remove(id));

		if removed.is_some() {
			self.notify(
				&key,
				RemoteChange {
					id: id.to_string(),
					fields: Fields::new(),
					change_type: ChangeType::Removed,
					revision,
				},
			);
		}

		revision
	}

	fn notify(&mut self, key: &CollectionKey, change: RemoteChange) {
		if let Some(subscribers) = self.subscribers.get_mut(key) {
			subscribers.retain(|tx| tx.send(change.clone()).is_ok());
		}
	}
}

#[derive(Default)]
pub struct MemoryRemoteStore {
	state: Mutex<RemoteState>,
}

impl MemoryRemoteStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Offline stores fail every call and refuse new subscriptions; live ones keep running
	pub fn set_offline(&self, offline: bool) {
		self.state.lock().offline = offline;
	}

	pub fn deny(&self, scope: Scope) {
		self.state.lock().denied.insert(scope);
	}

	pub fn allow(&self, scope: &Scope) {
		self.state.lock().denied.remove(scope);
	}

	/// Ends every live subscription stream, as a dropped connection would
	pub fn disconnect_all(&self) {
		self.state.lock().subscribers.clear();
	}

	#[must_use]
	pub fn document(&self, scope: &Scope, kind: RecordKind, id: &str) -> Option<Document> {
		self.state
			.lock()
			.collections
			.get(&(scope.clone(), kind))
			.and_then(|documents| documents.get(id))
			.cloned()
	}

	#[must_use]
	pub fn documents(&self, scope: &Scope, kind: RecordKind) -> Vec<Document> {
		self.state
			.lock()
			.collections
			.get(&(scope.clone(), kind))
			.map(|documents| documents.values().cloned().collect())
			.unwrap_or_default()
	}

	/// Total writes and deletes accepted so far
	#[must_use]
	pub fn write_count(&self) -> u64 {
		self.state.lock().writes
	}

	#[must_use]
	pub fn subscriber_count(&self, scope: &Scope, kind: RecordKind) -> usize {
		self.state
			.lock()
			.subscribers
			.get(&(scope.clone(), kind))
			.map_or(0, |subscribers| {
				subscribers.iter().filter(|tx| !tx.is_closed()).count()
			})
	}
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
	async fn write(
		&self,
		scope: &Scope,
		kind: RecordKind,
		id: &str,
		fields: Fields,
	) -> Result<Revision, RemoteError> {
		let mut state = self.state.lock();
		state.check_reachable(scope)?;

		let revision = state.put(scope, kind, id, fields);
		trace!(%scope, %kind, id, revision, "Document written");

		Ok(revision)
	}

	async fn delete(
		&self,
		scope: &Scope,
		kind: RecordKind,
		id: &str,
	) -> Result<Revision, RemoteError> {
		let mut state = self.state.lock();
		state.check_reachable(scope)?;

		Ok(state.remove(scope, kind, id))
	}

	async fn subscribe(
		&self,
		scope: &Scope,
		kind: RecordKind,
	) -> Result<BoxStream<'static, RemoteChange>, RemoteError> {
		let mut state = self.state.lock();
		state.check_reachable(scope)?;

		let (tx, rx) = mpsc::unbounded_channel();
		let key = (scope.clone(), kind);

		if let Some(documents) = state.collections.get(&key) {
			for document in documents.values() {
				// receiver is still in hand, this can't fail
				let _ = tx.send(RemoteChange {
					id: document.id.clone(),
					fields: document.fields.clone(),
					change_type: ChangeType::Modified,
					revision: document.revision,
				});
			}
		}

		state.subscribers.entry(key).or_default().push(tx);

		Ok(UnboundedReceiverStream::new(rx).boxed())
	}

	async fn query_once(
		&self,
		scope: &Scope,
		kind: RecordKind,
		filter: &Filter,
	) -> Result<Vec<Document>, RemoteError> {
		let state = self.state.lock();
		state.check_reachable(scope)?;

		Ok(state
			.collections
			.get(&(scope.clone(), kind))
			.map(|documents| {
				documents
					.values()
					.filter(|document| filter.matches(&document.fields))
					.cloned()
					.collect()
			})
			.unwrap_or_default())
	}

	async fn transact(
		&self,
		scope: &Scope,
		kind: RecordKind,
		id: &str,
		transaction: Transaction,
	) -> Result<TransactOutcome, RemoteError> {
		let mut state = self.state.lock();
		state.check_reachable(scope)?;

		let before = state
			.collections
			.get(&(scope.clone(), kind))
			.and_then(|documents| documents.get(id))
			.map(|document| document.fields.clone());

		let outcome = match transaction(before.as_ref()) {
			TransactDecision::Write(fields) => {
				let revision = state.put(scope, kind, id, fields.clone());
				TransactOutcome {
					before,
					after: Some(fields),
					committed: true,
					revision: Some(revision),
				}
			}
			TransactDecision::Delete => {
				let revision = state.remove(scope, kind, id);
				TransactOutcome {
					before,
					after: None,
					committed: true,
					revision: Some(revision),
				}
			}
			TransactDecision::Abort => TransactOutcome {
				after: before.clone(),
				before,
				committed: false,
				revision: None,
			},
		};

		Ok(outcome)
	}
}
