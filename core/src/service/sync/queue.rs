//! Durable offline mutation queue
//!
//! Every local mutation becomes one entry per target scope. Entries are keyed
//! by (scope, kind, record id): mutating the same record again before it was
//! delivered replaces the queued payload in place, so a record edited ten
//! times offline costs one remote write per scope and keeps its original
//! position in the replay order.
//!
//! The queue is mirrored in memory and persisted in a redb table, so entries
//! survive restarts. Draining delivers entries in sequence order and removes
//! them only after the remote store confirmed the write.

use std::{
	collections::{BTreeMap, HashMap, HashSet},
	path::Path,
	sync::Arc,
	time::Duration,
};

use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use sl_utils::{error::FileIOError, TimeSource};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::{cache::SyncCaches, Error};
use crate::{
	config::QueueConfig,
	domain::{Fields, RecordKind, Scope},
	infra::{
		store::{RemoteError, RemoteStore},
		sync::SyncSignal,
	},
};

const QUEUE_TABLE: TableDefinition<'_, u64, &[u8]> = TableDefinition::new("pending_mutations");

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
	#[error("mutation queue storage error: {0}")]
	Storage(#[from] redb::Error),
	#[error("failed to encode queued mutation: {0}")]
	Encode(#[from] rmp_serde::encode::Error),
	#[error("failed to decode queued mutation <sequence={sequence}>: {source}")]
	Decode {
		sequence: u64,
		#[source]
		source: rmp_serde::decode::Error,
	},
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutationPayload {
	Upsert(Fields),
	Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
	pub sequence: u64,
	pub scope: Scope,
	pub kind: RecordKind,
	pub record_id: String,
	pub payload: MutationPayload,
	pub enqueued_at: DateTime<Utc>,
	#[serde(default)]
	pub attempts: u32,
}

/// Outcome of one pass over the queue
#[derive(Debug, Default)]
pub struct DrainReport {
	/// Records whose write reached at least one scope
	pub delivered: Vec<(RecordKind, String)>,
	pub failed: usize,
	/// Entries not attempted because an earlier entry of their scope failed
	pub skipped: usize,
	pub remaining: usize,
	/// Health transition caused by this pass
	pub signal: Option<SyncSignal>,
	/// First failure of the pass
	pub error: Option<(Scope, RemoteError)>,
}

impl DrainReport {
	pub fn into_result(self) -> Result<Self, Error> {
		match self.error {
			Some((scope, source)) => Err(Error::ScopeUnreachable {
				scope: scope.to_string(),
				pending: self.remaining,
				source,
			}),
			None => Ok(self),
		}
	}
}

type EntryKey = (Scope, RecordKind, String);

struct Slot {
	mutation: PendingMutation,
	/// Changes whenever the payload is replaced, so an in-flight delivery can tell it went stale
	version: u64,
}

struct QueueState {
	entries: BTreeMap<u64, Slot>,
	index: HashMap<EntryKey, u64>,
	next_sequence: u64,
	next_version: u64,
	backoff: ExponentialBackoff,
	degraded: bool,
}

impl QueueState {
	fn bump_version(&mut self) -> u64 {
		self.next_version += 1;
		self.next_version
	}
}

pub struct MutationQueue {
	db: Database,
	state: Mutex<QueueState>,
	drain_lock: tokio::sync::Mutex<()>,
	pending_tx: watch::Sender<usize>,
	config: QueueConfig,
	time: Arc<dyn TimeSource>,
}

impl MutationQueue {
	/// Opens (or creates) the queue file and loads every persisted entry
	pub fn open(
		path: impl AsRef<Path>,
		config: QueueConfig,
		time: Arc<dyn TimeSource>,
	) -> Result<Self, QueueError> {
		let path = path.as_ref();

		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).map_err(|e| {
				FileIOError::with_context(parent, e, "creating mutation queue directory")
			})?;
		}

		let db = Database::create(path).map_err(redb::Error::from)?;
		create_table(&db)?;

		let mut entries = BTreeMap::new();
		let mut index = HashMap::new();
		let mut next_version = 0;

		for mutation in load_entries(&db)? {
			next_version += 1;
			let key = (
				mutation.scope.clone(),
				mutation.kind,
				mutation.record_id.clone(),
			);

			if let Some(stale) = index.insert(key, mutation.sequence) {
				// only possible if a crash interrupted a replacement; the newer entry wins
				entries.remove(&stale);
				remove_entry(&db, stale)?;
			}

			entries.insert(
				mutation.sequence,
				Slot {
					mutation,
					version: next_version,
				},
			);
		}

		let next_sequence = entries.keys().next_back().map_or(1, |last| last + 1);
		let pending = entries.len();

		if pending > 0 {
			info!(pending, path = %path.display(), "Loaded pending mutations");
		}

		Ok(Self {
			db,
			state: Mutex::new(QueueState {
				entries,
				index,
				next_sequence,
				next_version,
				backoff: build_backoff(&config),
				degraded: false,
			}),
			drain_lock: tokio::sync::Mutex::new(()),
			pending_tx: watch::channel(pending).0,
			config,
			time,
		})
	}

	/// Queues a remote write, replacing any undelivered payload for the same key.
	///
	/// Returns the entry's sequence number.
	pub fn enqueue(
		&self,
		scope: Scope,
		kind: RecordKind,
		record_id: impl Into<String>,
		payload: MutationPayload,
	) -> Result<u64, QueueError> {
		let sequences = self.enqueue_all(&[scope], kind, record_id, payload)?;

		Ok(sequences.first().copied().unwrap_or_default())
	}

	/// Queues the same write for every scope in one storage transaction.
	///
	/// Either every scope gets its entry or, on error, the queue is left
	/// untouched. Returns the sequence numbers in scope order.
	pub fn enqueue_all(
		&self,
		scopes: &[Scope],
		kind: RecordKind,
		record_id: impl Into<String>,
		payload: MutationPayload,
	) -> Result<Vec<u64>, QueueError> {
		let record_id = record_id.into();
		let now = self.time.now();

		let mut guard = self.state.lock();
		let state = &mut *guard;

		let mut next_sequence = state.next_sequence;
		let staged = scopes
			.iter()
			.map(|scope| {
				let key = (scope.clone(), kind, record_id.clone());
				let collapsed = state.index.get(&key).copied();
				let sequence = collapsed.unwrap_or_else(|| {
					let sequence = next_sequence;
					next_sequence += 1;
					sequence
				});
				let attempts = collapsed
					.and_then(|sequence| state.entries.get(&sequence))
					.map_or(0, |slot| slot.mutation.attempts);

				(
					key,
					collapsed.is_some(),
					PendingMutation {
						sequence,
						scope: scope.clone(),
						kind,
						record_id: record_id.clone(),
						payload: payload.clone(),
						enqueued_at: now,
						attempts,
					},
				)
			})
			.collect::<Vec<_>>();

		persist_entries(&self.db, staged.iter().map(|(_, _, mutation)| mutation))?;

		state.next_sequence = next_sequence;
		let mut sequences = Vec::with_capacity(staged.len());

		for (key, collapsed, mutation) in staged {
			let sequence = mutation.sequence;
			let version = state.bump_version();
			sequences.push(sequence);

			if collapsed {
				debug!(sequence, scope = %key.0, kind = %key.1, id = %key.2, "Collapsed queued mutation");
			}

			state.index.insert(key, sequence);
			state.entries.insert(sequence, Slot { mutation, version });
		}

		self.pending_tx.send_replace(state.entries.len());
		debug!(
			scopes = sequences.len(),
			pending = state.entries.len(),
			"Queued mutation"
		);

		Ok(sequences)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.state.lock().entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.state.lock().entries.is_empty()
	}

	/// Snapshot of the queue in replay order
	#[must_use]
	pub fn pending(&self) -> Vec<PendingMutation> {
		self.state
			.lock()
			.entries
			.values()
			.map(|slot| slot.mutation.clone())
			.collect()
	}

	#[must_use]
	pub fn is_pending(&self, kind: RecordKind, record_id: &str) -> bool {
		self.state
			.lock()
			.index
			.keys()
			.any(|(_, pending_kind, id)| *pending_kind == kind && id == record_id)
	}

	/// Pending entry count, updated on every change
	#[must_use]
	pub fn watch_pending(&self) -> watch::Receiver<usize> {
		self.pending_tx.subscribe()
	}

	/// Delay before the next attempt after a failed drain
	#[must_use]
	pub fn next_retry_delay(&self) -> Duration {
		self.state
			.lock()
			.backoff
			.next_backoff()
			.unwrap_or_else(|| self.config.max_backoff())
	}

	pub fn reset_backoff(&self) {
		self.state.lock().backoff.reset();
	}

	/// Drops every undelivered entry targeting `scope`, e.g. after leaving a group
	pub fn discard_scope(&self, scope: &Scope) -> Result<usize, QueueError> {
		let mut guard = self.state.lock();
		let state = &mut *guard;

		let sequences = state
			.entries
			.iter()
			.filter(|(_, slot)| slot.mutation.scope == *scope)
			.map(|(sequence, _)| *sequence)
			.collect::<Vec<_>>();

		for sequence in &sequences {
			if let Some(slot) = state.entries.remove(sequence) {
				let mutation = slot.mutation;
				state
					.index
					.remove(&(mutation.scope, mutation.kind, mutation.record_id));
			}
			remove_entry(&self.db, *sequence)?;
		}

		if !sequences.is_empty() {
			self.pending_tx.send_replace(state.entries.len());
			debug!(%scope, discarded = sequences.len(), "Discarded queued mutations");
		}

		Ok(sequences.len())
	}

	/// Delivers queued entries in order.
	///
	/// A failed entry stays queued and blocks the rest of its scope for this
	/// pass, so one scope's writes are never reordered; other scopes go on.
	/// Only one drain runs at a time.
	#[instrument(skip_all)]
	pub async fn drain(&self, remote: &dyn RemoteStore, caches: &SyncCaches) -> DrainReport {
		let _drain = self.drain_lock.lock().await;

		let batch = self
			.state
			.lock()
			.entries
			.values()
			.map(|slot| (slot.version, slot.mutation.clone()))
			.collect::<Vec<_>>();

		let mut report = DrainReport::default();
		let mut blocked = HashSet::new();

		for (version, mutation) in batch {
			if blocked.contains(&mutation.scope) {
				report.skipped += 1;
				continue;
			}

			let result = match &mutation.payload {
				MutationPayload::Upsert(fields) => {
					remote
						.write(
							&mutation.scope,
							mutation.kind,
							&mutation.record_id,
							fields.clone(),
						)
						.await
				}
				MutationPayload::Delete => {
					remote
						.delete(&mutation.scope, mutation.kind, &mutation.record_id)
						.await
				}
			};

			match result {
				Ok(revision) => {
					caches.mark_seen(&mutation.record_id, revision);

					if let Err(e) = self.complete(mutation.sequence, version) {
						error!(sequence = mutation.sequence, ?e, "Failed to remove delivered mutation");
					}

					report
						.delivered
						.push((mutation.kind, mutation.record_id.clone()));
				}
				Err(e) => {
					warn!(
						scope = %mutation.scope,
						kind = %mutation.kind,
						id = %mutation.record_id,
						attempts = mutation.attempts + 1,
						%e,
						"Failed to deliver queued mutation"
					);

					if let Err(e) = self.record_failure(mutation.sequence) {
						error!(sequence = mutation.sequence, ?e, "Failed to persist attempt count");
					}

					report.failed += 1;
					blocked.insert(mutation.scope.clone());
					report.error.get_or_insert((mutation.scope, e));
				}
			}
		}

		self.finish_pass(&mut report);

		report
	}

	/// Removes a delivered entry unless its payload was replaced meanwhile
	fn complete(&self, sequence: u64, version: u64) -> Result<(), QueueError> {
		let mut guard = self.state.lock();
		let state = &mut *guard;

		let Some(slot) = state.entries.get(&sequence) else {
			return Ok(());
		};

		if slot.version != version {
			debug!(sequence, "Mutation replaced while in flight, keeping it queued");
			return Ok(());
		}

		let mutation = &slot.mutation;
		state.index.remove(&(
			mutation.scope.clone(),
			mutation.kind,
			mutation.record_id.clone(),
		));
		state.entries.remove(&sequence);
		remove_entry(&self.db, sequence)?;

		self.pending_tx.send_replace(state.entries.len());

		Ok(())
	}

	fn record_failure(&self, sequence: u64) -> Result<(), QueueError> {
		let mut state = self.state.lock();

		if let Some(slot) = state.entries.get_mut(&sequence) {
			slot.mutation.attempts += 1;
			persist_entries(&self.db, [&slot.mutation])?;
		}

		Ok(())
	}

	fn finish_pass(&self, report: &mut DrainReport) {
		let mut state = self.state.lock();
		report.remaining = state.entries.len();

		let max_attempts = state
			.entries
			.values()
			.map(|slot| slot.mutation.attempts)
			.max()
			.unwrap_or_default();

		if report.failed == 0 {
			state.backoff.reset();
		}

		if !state.degraded && max_attempts >= self.config.retry_ceiling && report.failed > 0 {
			state.degraded = true;
			warn!(
				pending = report.remaining,
				max_attempts, "Mutation queue is degraded, remote writes keep failing"
			);
			report.signal = Some(SyncSignal::Degraded {
				pending: report.remaining,
				max_attempts,
			});
		} else if state.degraded && report.failed == 0 && report.remaining == 0 {
			state.degraded = false;
			info!("Mutation queue recovered");
			report.signal = Some(SyncSignal::Recovered);
		}
	}
}

fn build_backoff(config: &QueueConfig) -> ExponentialBackoff {
	ExponentialBackoffBuilder::new()
		.with_initial_interval(config.initial_backoff())
		.with_max_interval(config.max_backoff())
		.with_multiplier(2.0)
		.with_randomization_factor(0.0)
		.with_max_elapsed_time(None)
		.build()
}

fn create_table(db: &Database) -> Result<(), redb::Error> {
	let txn = db.begin_write()?;
	{
		txn.open_table(QUEUE_TABLE)?;
	}
	txn.commit()?;

	Ok(())
}

fn load_entries(db: &Database) -> Result<Vec<PendingMutation>, QueueError> {
	let raw = read_raw_entries(db)?;

	raw.into_iter()
		.map(|(sequence, bytes)| {
			rmp_serde::from_slice::<PendingMutation>(&bytes)
				.map_err(|source| QueueError::Decode { sequence, source })
		})
		.collect()
}

fn read_raw_entries(db: &Database) -> Result<Vec<(u64, Vec<u8>)>, redb::Error> {
	let txn = db.begin_read()?;
	let table = txn.open_table(QUEUE_TABLE)?;

	let mut raw = Vec::new();
	for entry in table.iter()? {
		let (sequence, bytes) = entry?;
		raw.push((sequence.value(), bytes.value().to_vec()));
	}

	Ok(raw)
}

fn persist_entries<'a>(
	db: &Database,
	mutations: impl IntoIterator<Item = &'a PendingMutation>,
) -> Result<(), QueueError> {
	let encoded = mutations
		.into_iter()
		.map(|mutation| -> Result<_, QueueError> {
			Ok((mutation.sequence, rmp_serde::to_vec_named(mutation)?))
		})
		.collect::<Result<Vec<_>, _>>()?;

	write_entries(db, &encoded)?;

	Ok(())
}

fn write_entries(db: &Database, entries: &[(u64, Vec<u8>)]) -> Result<(), redb::Error> {
	let txn = db.begin_write()?;
	{
		let mut table = txn.open_table(QUEUE_TABLE)?;
		for (sequence, bytes) in entries {
			table.insert(*sequence, bytes.as_slice())?;
		}
	}
	txn.commit()?;

	Ok(())
}

fn remove_entry(db: &Database, sequence: u64) -> Result<(), redb::Error> {
	let txn = db.begin_write()?;
	{
		let mut table = txn.open_table(QUEUE_TABLE)?;
		table.remove(sequence)?;
	}
	txn.commit()?;

	Ok(())
}
