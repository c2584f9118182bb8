//! Remote change subscriptions
//!
//! One subscription per (scope, record kind), each driven by its own tracked
//! task that follows this state machine:
//!
//! ```text
//! Unsubscribed --subscribe--> Subscribing --stream open--> Active
//!                                  ^                          |
//!                                  |        timeout, failure  |
//!                                  +---- Error <--------------+
//!                                           stream ended
//! ```
//!
//! Events of one subscription are applied strictly in the order the remote
//! store emitted them; different subscriptions run concurrently.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use futures::{stream::BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
	sync::mpsc,
	task::{AbortHandle, JoinSet},
	time::{sleep, timeout, Instant},
};
use tracing::{debug, info, trace, warn, Instrument};

use super::{cache::SyncCaches, Error};
use crate::{
	config::ListenerConfig,
	domain::{RecordKind, Scope},
	infra::store::{RemoteChange, RemoteStore},
};

const STATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
	Unsubscribed,
	Subscribing,
	Active,
	/// Waiting to resubscribe after a failure or disconnect
	Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
	pub scope: Scope,
	pub kind: RecordKind,
}

impl SubscriptionKey {
	#[must_use]
	pub const fn new(scope: Scope, kind: RecordKind) -> Self {
		Self { scope, kind }
	}
}

impl fmt::Display for SubscriptionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.scope, self.kind)
	}
}

/// Receives the events of every subscription
#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
	async fn handle_change(&self, key: &SubscriptionKey, change: RemoteChange)
		-> Result<(), Error>;
}

struct Entry {
	state: SubscriptionState,
	generation: u64,
	abort: Option<AbortHandle>,
}

type Registry = Arc<Mutex<HashMap<SubscriptionKey, Entry>>>;

pub struct ListenerManager {
	remote: Arc<dyn RemoteStore>,
	handler: Arc<dyn ChangeHandler>,
	caches: Arc<SyncCaches>,
	config: ListenerConfig,
	registry: Registry,
	next_generation: Mutex<u64>,
	tasks: Mutex<JoinSet<()>>,
}

impl ListenerManager {
	pub fn new(
		remote: Arc<dyn RemoteStore>,
		handler: Arc<dyn ChangeHandler>,
		caches: Arc<SyncCaches>,
		config: ListenerConfig,
	) -> Self {
		Self {
			remote,
			handler,
			caches,
			config,
			registry: Arc::default(),
			next_generation: Mutex::new(0),
			tasks: Mutex::new(JoinSet::new()),
		}
	}

	/// Starts listening to `key`; no-op when a subscription for it already runs
	pub fn subscribe(&self, key: SubscriptionKey) {
		let mut registry = self.registry.lock();

		if registry
			.get(&key)
			.is_some_and(|entry| entry.state != SubscriptionState::Unsubscribed)
		{
			trace!(%key, "Already subscribed");
			return;
		}

		let generation = {
			let mut next = self.next_generation.lock();
			*next += 1;
			*next
		};

		let task = SubscriptionTask {
			key: key.clone(),
			generation,
			remote: Arc::clone(&self.remote),
			handler: Arc::clone(&self.handler),
			caches: Arc::clone(&self.caches),
			config: self.config.clone(),
			registry: Arc::clone(&self.registry),
		};

		let span = tracing::info_span!("subscription", %key);
		let abort = {
			let mut tasks = self.tasks.lock();
			reap_finished(&mut tasks);
			tasks.spawn(task.run().instrument(span))
		};

		registry.insert(
			key,
			Entry {
				state: SubscriptionState::Subscribing,
				generation,
				abort: Some(abort),
			},
		);
	}

	pub fn unsubscribe(&self, key: &SubscriptionKey) {
		if let Some(entry) = self.registry.lock().remove(key) {
			if let Some(abort) = entry.abort {
				abort.abort();
			}
			debug!(%key, "Unsubscribed");
		}

		reap_finished(&mut self.tasks.lock());
	}

	/// Drops every subscription of `scope`
	pub fn unsubscribe_scope(&self, scope: &Scope) {
		let keys = self
			.registry
			.lock()
			.keys()
			.filter(|key| &key.scope == scope)
			.cloned()
			.collect::<Vec<_>>();

		for key in &keys {
			self.unsubscribe(key);
		}
	}

	#[must_use]
	pub fn state(&self, key: &SubscriptionKey) -> SubscriptionState {
		self.registry
			.lock()
			.get(key)
			.map_or(SubscriptionState::Unsubscribed, |entry| entry.state)
	}

	/// Every key with a running subscription task, sorted
	#[must_use]
	pub fn active_keys(&self) -> Vec<SubscriptionKey> {
		let mut keys = self
			.registry
			.lock()
			.keys()
			.cloned()
			.collect::<Vec<_>>();
		keys.sort();
		keys
	}

	/// Polls until `key` reaches `state`; returns whether it did within `within`
	pub async fn wait_for_state(
		&self,
		key: &SubscriptionKey,
		state: SubscriptionState,
		within: Duration,
	) -> bool {
		let deadline = Instant::now() + within;

		loop {
			if self.state(key) == state {
				return true;
			}

			if Instant::now() >= deadline {
				return false;
			}

			sleep(STATE_POLL_INTERVAL).await;
		}
	}

	/// Aborts every subscription task and waits for them to wind down
	pub async fn shutdown(&self) {
		self.registry.lock().clear();

		let mut tasks = std::mem::take(&mut *self.tasks.lock());
		tasks.shutdown().await;

		info!("Listener manager stopped");
	}
}

/// Collects tasks that already ended, so aborted subscriptions don't pile up
fn reap_finished(tasks: &mut JoinSet<()>) {
	while let Some(result) = tasks.try_join_next() {
		if let Err(e) = result {
			if e.is_panic() {
				warn!(?e, "Subscription task panicked");
			}
		}
	}
}

struct SubscriptionTask {
	key: SubscriptionKey,
	generation: u64,
	remote: Arc<dyn RemoteStore>,
	handler: Arc<dyn ChangeHandler>,
	caches: Arc<SyncCaches>,
	config: ListenerConfig,
	registry: Registry,
}

impl SubscriptionTask {
	async fn run(self) {
		let mut retry = self.resubscribe_backoff();

		loop {
			self.set_state(SubscriptionState::Subscribing);

			match timeout(
				self.config.subscribe_timeout(),
				self.remote.subscribe(&self.key.scope, self.key.kind),
			)
			.await
			{
				Ok(Ok(stream)) => {
					self.set_state(SubscriptionState::Active);
					info!("Subscription active");
					retry.reset();

					self.pump(stream).await;
					warn!("Subscription stream ended, resubscribing");
				}
				Ok(Err(e)) => warn!(%e, "Failed to subscribe"),
				Err(_) => warn!(
					timeout_secs = self.config.subscribe_timeout_secs,
					"Subscribe timed out"
				),
			}

			self.set_state(SubscriptionState::Error);

			let delay = retry
				.next_backoff()
				.unwrap_or_else(|| self.config.max_resubscribe_backoff());
			debug!(delay_ms = delay.as_millis(), "Waiting before resubscribing");
			sleep(delay).await;
		}
	}

	/// Feeds the stream through a bounded buffer into the sequential applier
	async fn pump(&self, mut stream: BoxStream<'static, RemoteChange>) {
		let (tx, mut rx) = mpsc::channel(self.config.work_queue_capacity.max(1));

		let reader = async move {
			while let Some(change) = stream.next().await {
				if tx.send(change).await.is_err() {
					break;
				}
			}
		};

		let applier = async {
			while let Some(change) = rx.recv().await {
				self.apply(change).await;
			}
		};

		tokio::join!(reader, applier);
	}

	async fn apply(&self, change: RemoteChange) {
		if self.caches.is_seen(&change.id, change.revision) {
			trace!(id = %change.id, revision = change.revision, "Skipping already applied change");
			return;
		}

		let (id, revision) = (change.id.clone(), change.revision);

		match self.handler.handle_change(&self.key, change).await {
			Ok(()) => self.caches.mark_seen(&id, revision),
			Err(Error::MalformedRecord { .. }) => {
				// already reported by the resolver, and re-delivery won't fix it
				self.caches.mark_seen(&id, revision);
			}
			Err(e) => warn!(%id, revision, ?e, "Failed to apply remote change"),
		}
	}

	fn set_state(&self, state: SubscriptionState) {
		if let Some(entry) = self.registry.lock().get_mut(&self.key) {
			if entry.generation == self.generation {
				entry.state = state;
			}
		}
	}

	fn resubscribe_backoff(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.config.resubscribe_backoff())
			.with_max_interval(self.config.max_resubscribe_backoff())
			.with_max_elapsed_time(None)
			.build()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use serde_json::json;
	use sl_utils::UserId;

	use super::*;
	use crate::{
		domain::Fields,
		infra::store::{
			ChangeType, Document, Filter, MemoryRemoteStore, RemoteError, Revision,
			TransactOutcome, Transaction,
		},
	};

	#[derive(Default)]
	struct Recorder {
		applied: Mutex<Vec<(String, ChangeType)>>,
		calls: AtomicUsize,
	}

	#[async_trait]
	impl ChangeHandler for Recorder {
		async fn handle_change(
			&self,
			_key: &SubscriptionKey,
			change: RemoteChange,
		) -> Result<(), Error> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			self.applied.lock().push((change.id, change.change_type));
			Ok(())
		}
	}

	fn config() -> ListenerConfig {
		ListenerConfig {
			subscribe_timeout_secs: 1,
			resubscribe_backoff_ms: 10,
			max_resubscribe_backoff_ms: 50,
			seen_cache_capacity: 64,
			work_queue_capacity: 2,
		}
	}

	fn doc(id: &str) -> Fields {
		let mut fields = Fields::new();
		fields.insert("id".into(), json!(id));
		fields
	}

	fn setup() -> (Arc<MemoryRemoteStore>, Arc<Recorder>, Arc<SyncCaches>, ListenerManager) {
		let remote = Arc::new(MemoryRemoteStore::new());
		let recorder = Arc::new(Recorder::default());
		let caches = Arc::new(SyncCaches::new(64));
		let manager = ListenerManager::new(
			Arc::clone(&remote) as Arc<dyn RemoteStore>,
			Arc::clone(&recorder) as Arc<dyn ChangeHandler>,
			Arc::clone(&caches),
			config(),
		);

		(remote, recorder, caches, manager)
	}

	fn key() -> SubscriptionKey {
		SubscriptionKey::new(Scope::Owner(UserId::parse("alice").unwrap()), RecordKind::Operation)
	}

	async fn wait_for_calls(recorder: &Recorder, calls: usize) {
		for _ in 0..200 {
			if recorder.calls.load(Ordering::SeqCst) >= calls {
				return;
			}
			sleep(Duration::from_millis(5)).await;
		}
		panic!("handler saw {} calls, expected {calls}", recorder.calls.load(Ordering::SeqCst));
	}

	#[tokio::test]
	async fn subscribe_is_idempotent() {
		let (remote, _, _, manager) = setup();

		manager.subscribe(key());
		manager.subscribe(key());

		assert!(
			manager
				.wait_for_state(&key(), SubscriptionState::Active, Duration::from_secs(1))
				.await
		);
		assert_eq!(remote.subscriber_count(&key().scope, key().kind), 1);
		assert_eq!(manager.active_keys(), vec![key()]);

		manager.unsubscribe(&key());
		assert_eq!(manager.state(&key()), SubscriptionState::Unsubscribed);
		manager.shutdown().await;
	}

	#[tokio::test]
	async fn applies_events_in_emission_order() {
		let (remote, recorder, _, manager) = setup();
		let scope = key().scope;

		remote
			.write(&scope, RecordKind::Operation, "a", doc("a"))
			.await
			.unwrap();

		manager.subscribe(key());
		wait_for_calls(&recorder, 1).await;

		for id in ["b", "c", "d", "e"] {
			remote
				.write(&scope, RecordKind::Operation, id, doc(id))
				.await
				.unwrap();
		}
		remote.delete(&scope, RecordKind::Operation, "a").await.unwrap();
		wait_for_calls(&recorder, 6).await;

		let applied = recorder.applied.lock().clone();
		assert_eq!(
			applied,
			vec![
				("a".to_string(), ChangeType::Modified),
				("b".to_string(), ChangeType::Added),
				("c".to_string(), ChangeType::Added),
				("d".to_string(), ChangeType::Added),
				("e".to_string(), ChangeType::Added),
				("a".to_string(), ChangeType::Removed),
			]
		);

		manager.shutdown().await;
	}

	#[tokio::test]
	async fn seen_revisions_are_skipped() {
		let (remote, recorder, caches, manager) = setup();
		let scope = key().scope;

		manager.subscribe(key());
		assert!(
			manager
				.wait_for_state(&key(), SubscriptionState::Active, Duration::from_secs(1))
				.await
		);

		// the revision the write will get, as the queue records it for its own writes
		caches.mark_seen("mine", 1);
		remote
			.write(&scope, RecordKind::Operation, "mine", doc("mine"))
			.await
			.unwrap();
		remote
			.write(&scope, RecordKind::Operation, "theirs", doc("theirs"))
			.await
			.unwrap();

		wait_for_calls(&recorder, 1).await;
		sleep(Duration::from_millis(50)).await;

		assert_eq!(
			recorder.applied.lock().clone(),
			vec![("theirs".to_string(), ChangeType::Added)]
		);

		manager.shutdown().await;
	}

	#[tokio::test]
	async fn resubscribes_after_disconnect() {
		let (remote, recorder, _, manager) = setup();
		let scope = key().scope;

		manager.subscribe(key());
		assert!(
			manager
				.wait_for_state(&key(), SubscriptionState::Active, Duration::from_secs(1))
				.await
		);

		remote.set_offline(true);
		remote.disconnect_all();
		assert!(
			manager
				.wait_for_state(&key(), SubscriptionState::Error, Duration::from_secs(1))
				.await
		);

		remote.set_offline(false);
		assert!(
			manager
				.wait_for_state(&key(), SubscriptionState::Active, Duration::from_secs(2))
				.await
		);

		remote
			.write(&scope, RecordKind::Operation, "after", doc("after"))
			.await
			.unwrap();
		wait_for_calls(&recorder, 1).await;

		manager.shutdown().await;
	}

	/// Remote store whose subscribe never answers
	#[derive(Default)]
	struct Unresponsive {
		attempts: AtomicUsize,
	}

	#[async_trait]
	impl RemoteStore for Unresponsive {
		async fn write(
			&self,
			_scope: &Scope,
			_kind: RecordKind,
			_id: &str,
			_fields: Fields,
		) -> Result<Revision, RemoteError> {
			Ok(0)
		}

		async fn delete(
			&self,
			_scope: &Scope,
			_kind: RecordKind,
			_id: &str,
		) -> Result<Revision, RemoteError> {
			Ok(0)
		}

		async fn subscribe(
			&self,
			_scope: &Scope,
			_kind: RecordKind,
		) -> Result<BoxStream<'static, RemoteChange>, RemoteError> {
			self.attempts.fetch_add(1, Ordering::SeqCst);
			futures::future::pending().await
		}

		async fn query_once(
			&self,
			_scope: &Scope,
			_kind: RecordKind,
			_filter: &Filter,
		) -> Result<Vec<Document>, RemoteError> {
			Ok(Vec::new())
		}

		async fn transact(
			&self,
			_scope: &Scope,
			_kind: RecordKind,
			_id: &str,
			_transaction: Transaction,
		) -> Result<TransactOutcome, RemoteError> {
			Err(RemoteError::Other("not supported".to_string()))
		}
	}

	#[tokio::test(start_paused = true)]
	async fn hanging_subscribe_times_out_and_retries() {
		let remote = Arc::new(Unresponsive::default());
		let manager = ListenerManager::new(
			Arc::clone(&remote) as Arc<dyn RemoteStore>,
			Arc::new(Recorder::default()) as Arc<dyn ChangeHandler>,
			Arc::new(SyncCaches::new(64)),
			config(),
		);

		manager.subscribe(key());
		assert_eq!(manager.state(&key()), SubscriptionState::Subscribing);

		// nothing happens before the timeout elapses
		sleep(Duration::from_millis(900)).await;
		assert_eq!(manager.state(&key()), SubscriptionState::Subscribing);

		assert!(
			manager
				.wait_for_state(&key(), SubscriptionState::Error, Duration::from_secs(1))
				.await
		);

		let deadline = Instant::now() + Duration::from_secs(5);
		while remote.attempts.load(Ordering::SeqCst) < 2 {
			assert!(Instant::now() < deadline, "subscribe was never retried");
			sleep(STATE_POLL_INTERVAL).await;
		}
		assert_ne!(manager.state(&key()), SubscriptionState::Active);

		manager.shutdown().await;
	}

	#[tokio::test]
	async fn unsubscribed_tasks_are_reaped() {
		let (_, _, _, manager) = setup();

		for _ in 0..4 {
			manager.subscribe(key());
			assert!(
				manager
					.wait_for_state(&key(), SubscriptionState::Active, Duration::from_secs(1))
					.await
			);
			manager.unsubscribe(&key());
		}

		// the last abort completes in the background; the next call collects it
		sleep(Duration::from_millis(20)).await;
		manager.unsubscribe(&key());
		assert_eq!(manager.tasks.lock().len(), 0);

		manager.shutdown().await;
	}
}
