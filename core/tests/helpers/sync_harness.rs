//! Common test harness for sync integration tests
//!
//! Every device gets its own local store, session and queue file, while all
//! of them talk to one shared in-memory remote store and one manual clock.

use std::{future::Future, path::PathBuf, sync::Arc};

use chrono::{NaiveDate, TimeZone, Utc};
use sl_core::{
	config::{ListenerConfig, QueueConfig},
	domain::{Card, CardBrand, Operation, OperationKind, PaymentMethod, Record, RecordKind},
	infra::store::{LocalStore, MemoryLocalStore, MemoryRemoteStore, RemoteStore},
	service::sync::Session,
	SyncConfig, SyncDeps, SyncService,
};
use sl_utils::{FakeTimeSource, RecordId, TimeSource, UserId};
use tempfile::TempDir;
use tokio::time::{sleep, Duration, Instant};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Sync settings tuned for tests: quick retries, short subscribe timeouts
pub fn test_config() -> SyncConfig {
	SyncConfig {
		queue: QueueConfig {
			initial_backoff_ms: 10,
			max_backoff_ms: 100,
			retry_ceiling: 3,
			drain_interval_secs: 1,
		},
		listener: ListenerConfig {
			subscribe_timeout_secs: 1,
			resubscribe_backoff_ms: 10,
			max_resubscribe_backoff_ms: 100,
			..ListenerConfig::default()
		},
		..SyncConfig::default()
	}
}

pub struct Harness {
	pub remote: Arc<MemoryRemoteStore>,
	pub time: FakeTimeSource,
	dir: TempDir,
}

impl Harness {
	pub fn new() -> anyhow::Result<Self> {
		Ok(Self {
			remote: Arc::new(MemoryRemoteStore::new()),
			time: FakeTimeSource::new(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()),
			dir: tempfile::tempdir()?,
		})
	}

	/// Queue file of the named device; reusing a name reopens its queue
	pub fn queue_path(&self, device: &str) -> PathBuf {
		self.dir.path().join(device).join("mutation_queue.redb")
	}

	/// A signed-in device with a fresh local store
	pub fn device(&self, name: &str, user: &str) -> anyhow::Result<Device> {
		self.device_with_store(name, user, Arc::new(MemoryLocalStore::new()))
	}

	pub fn device_with_store(
		&self,
		name: &str,
		user: &str,
		local: Arc<MemoryLocalStore>,
	) -> anyhow::Result<Device> {
		self.device_with_remote(
			name,
			user,
			local,
			Arc::clone(&self.remote) as Arc<dyn RemoteStore>,
		)
	}

	/// A device talking to `remote` instead of the shared store, e.g. a faulty wrapper around it
	pub fn device_with_remote(
		&self,
		name: &str,
		user: &str,
		local: Arc<MemoryLocalStore>,
		remote: Arc<dyn RemoteStore>,
	) -> anyhow::Result<Device> {
		let user = user_id(user);
		let deps = SyncDeps::new(
			Arc::clone(&local) as Arc<dyn LocalStore>,
			remote,
			Arc::new(Session::signed_in(user.clone())),
			self.queue_path(name),
		)
		.with_config(test_config())
		.with_time(Arc::new(self.time.clone()));

		Ok(Device {
			user,
			local,
			service: SyncService::new(deps)?,
		})
	}
}

pub struct Device {
	pub user: UserId,
	pub local: Arc<MemoryLocalStore>,
	pub service: SyncService,
}

impl Device {
	pub async fn record(&self, kind: RecordKind, id: &str) -> Option<Record> {
		self.local.get(kind, id).await.ok().flatten()
	}

	pub async fn records(&self, kind: RecordKind) -> Vec<Record> {
		self.local
			.query(kind, &|_: &Record| true)
			.await
			.unwrap_or_default()
	}

	pub fn operation(&self, amount: i64, time: &FakeTimeSource) -> Operation {
		Operation {
			id: RecordId::new(),
			owner_id: self.user.clone(),
			amount,
			description: "groceries".to_string(),
			date: time.today(),
			payment_method: PaymentMethod::Cash,
			card_id: None,
			recurrence_id: None,
			installment_count: None,
			installment_index: None,
			kind: OperationKind::Single,
			updated_at: time.now(),
		}
	}

	pub fn card(&self, closing_day: u8, due_day: u8, activated_on: NaiveDate) -> Card {
		Card::new(
			self.user.clone(),
			"Main",
			CardBrand::Visa,
			500_000,
			closing_day,
			due_day,
			activated_on,
			Utc::now(),
		)
	}
}

pub fn user_id(raw: &str) -> UserId {
	UserId::parse(raw).unwrap()
}

/// Polls `check` until it holds or the wait times out
pub async fn eventually<F, Fut>(what: &str, mut check: F) -> anyhow::Result<()>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = bool>,
{
	let deadline = Instant::now() + WAIT_TIMEOUT;

	loop {
		if check().await {
			return Ok(());
		}

		if Instant::now() >= deadline {
			anyhow::bail!("timed out waiting for {what}");
		}

		sleep(POLL_INTERVAL).await;
	}
}
