//! Sync Service - shared ledger replication
//!
//! Background service that keeps the device's local store in step with the
//! remote document store:
//! - Local mutations are written locally first, then queued once per target
//!   scope (the owner's scope plus every group the owner belongs to) and
//!   replayed by the drain loop
//! - Remote changes arrive through one listener per (scope, kind) and are
//!   applied with last-writer-wins
//! - Card changes re-run the bill projector, whose bills take the regular
//!   local mutation path

pub mod cache;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod listener;
pub mod projector;
pub mod queue;
pub mod session;
pub mod upsert;

use std::{
	path::PathBuf,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use parking_lot::Mutex;
use sl_utils::{error::report_error, GroupCode, RecordId, SystemTimeSource, TimeSource, UserId};
use tokio::{
	sync::{broadcast, mpsc, watch, Notify},
	task::JoinSet,
	time::sleep,
};
use tracing::{debug, error, info, instrument, trace, warn};

pub use cache::SyncCaches;
pub use dispatch::SyncDispatcher;
pub use error::{Error, NotJoinableReason};
pub use fanout::{FanoutResolver, GroupObservation, MembershipEvent};
pub use listener::{
	ChangeHandler, ListenerManager, SubscriptionKey, SubscriptionState,
};
pub use projector::{bills_for_card, BillProjector, BillSchedule, ProjectionPlan};
pub use queue::{DrainReport, MutationPayload, MutationQueue, PendingMutation, QueueError};
pub use session::Session;
pub use upsert::{ApplyOutcome, ConflictPolicy, LastWriterWins, Resolution, UpsertResolver};

use crate::{
	config::SyncConfig,
	domain::{Bill, Card, Record, RecordKind, Scope, SharedGroup},
	infra::{
		store::{ChangeType, Filter, LocalStore, LocalWriter, RemoteStore},
		sync::{ChangeAction, ChangeOrigin, DataChanged, DataChangedBus, SyncSignal},
	},
};

/// Everything the sync service needs from its host
pub struct SyncDeps {
	pub local: Arc<dyn LocalStore>,
	pub remote: Arc<dyn RemoteStore>,
	pub session: Arc<Session>,
	/// Location of the persisted mutation queue
	pub queue_path: PathBuf,
	pub config: SyncConfig,
	pub time: Arc<dyn TimeSource>,
	/// Defaults to [`LastWriterWins`]
	pub policy: Option<Arc<dyn ConflictPolicy>>,
}

impl SyncDeps {
	pub fn new(
		local: Arc<dyn LocalStore>,
		remote: Arc<dyn RemoteStore>,
		session: Arc<Session>,
		queue_path: impl Into<PathBuf>,
	) -> Self {
		Self {
			local,
			remote,
			session,
			queue_path: queue_path.into(),
			config: SyncConfig::default(),
			time: Arc::new(SystemTimeSource),
			policy: None,
		}
	}

	#[must_use]
	pub fn with_config(mut self, config: SyncConfig) -> Self {
		self.config = config;
		self
	}

	#[must_use]
	pub fn with_time(mut self, time: Arc<dyn TimeSource>) -> Self {
		self.time = time;
		self
	}

	#[must_use]
	pub fn with_policy(mut self, policy: Arc<dyn ConflictPolicy>) -> Self {
		self.policy = Some(policy);
		self
	}
}

/// State shared by the service handle and its background tasks
struct SyncContext {
	config: SyncConfig,
	local: LocalWriter,
	remote: Arc<dyn RemoteStore>,
	session: Arc<Session>,
	time: Arc<dyn TimeSource>,
	bus: Arc<DataChangedBus>,
	caches: Arc<SyncCaches>,
	queue: Arc<MutationQueue>,
	resolver: Arc<UpsertResolver>,
	fanout: Arc<FanoutResolver>,
	listeners: Arc<ListenerManager>,
	projector: BillProjector,
	drain_wake: Notify,
}

/// Sync service for one signed-in device
///
/// Local mutation entry points work whether or not the background tasks are
/// running; without them, queued writes wait for [`SyncService::drain_now`].
pub struct SyncService {
	ctx: Arc<SyncContext>,

	/// Membership transitions reported by the registry listener
	membership_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MembershipEvent>>>,

	tasks: Mutex<JoinSet<()>>,

	/// Whether the service is running
	is_running: AtomicBool,

	/// Shutdown signal
	shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
}

impl SyncService {
	/// Wires the sync components together and opens the mutation queue
	pub fn new(deps: SyncDeps) -> Result<Self, Error> {
		let SyncDeps {
			local,
			remote,
			session,
			queue_path,
			config,
			time,
			policy,
		} = deps;

		let local = LocalWriter::new(local);
		let bus = Arc::new(DataChangedBus::new());
		let caches = Arc::new(SyncCaches::new(config.listener.seen_cache_capacity));
		let queue = Arc::new(MutationQueue::open(
			&queue_path,
			config.queue.clone(),
			Arc::clone(&time),
		)?);

		let resolver = Arc::new(UpsertResolver::new(
			local.clone(),
			Arc::clone(&bus),
			policy.unwrap_or_else(|| Arc::new(LastWriterWins)),
			Arc::clone(&time),
			config.clock.max_skew(),
		));

		let fanout = Arc::new(FanoutResolver::new(
			Arc::clone(&remote),
			local.clone(),
			Arc::clone(&caches),
			config.groups.clone(),
			Arc::clone(&time),
		));

		let (membership_tx, membership_rx) = mpsc::unbounded_channel();
		let dispatcher = Arc::new(SyncDispatcher::new(
			Arc::clone(&resolver),
			Arc::clone(&fanout),
			Arc::clone(&session),
			membership_tx,
		));

		let listeners = Arc::new(ListenerManager::new(
			Arc::clone(&remote),
			dispatcher,
			Arc::clone(&caches),
			config.listener.clone(),
		));

		info!(
			queue_path = %queue_path.display(),
			pending = queue.len(),
			participant_cap = config.groups.participant_cap,
			window_months = config.projection.window_months,
			"Created sync service"
		);

		Ok(Self {
			ctx: Arc::new(SyncContext {
				projector: BillProjector::new(config.projection.window_months),
				config,
				local,
				remote,
				session,
				time,
				bus,
				caches,
				queue,
				resolver,
				fanout,
				listeners,
				drain_wake: Notify::new(),
			}),
			membership_rx: Arc::new(tokio::sync::Mutex::new(membership_rx)),
			tasks: Mutex::new(JoinSet::new()),
			is_running: AtomicBool::new(false),
			shutdown_tx: Mutex::new(None),
		})
	}

	/// Subscribes the signed-in user's scopes and spawns the background loops
	pub async fn start(&self) -> Result<(), Error> {
		let user = self.ctx.session.require()?;

		if self.is_running.swap(true, Ordering::SeqCst) {
			warn!("Sync service already running");
			return Ok(());
		}

		info!(%user, "Starting sync service");

		for kind in RecordKind::SHAREABLE {
			self.ctx
				.listeners
				.subscribe(SubscriptionKey::new(Scope::Owner(user.clone()), kind));
		}
		self.ctx
			.listeners
			.subscribe(SubscriptionKey::new(Scope::Registry, RecordKind::SharedGroup));

		match self.ctx.fanout.active_groups(&user).await {
			Ok(groups) => {
				for code in groups.keys() {
					self.ctx.subscribe_group(code);
				}
			}
			Err(e) => {
				// the registry listener picks the groups up once it connects
				warn!(%user, ?e, "Failed to load active groups");
			}
		}

		let (shutdown_tx, _) = broadcast::channel(1);

		{
			let mut tasks = self.tasks.lock();
			tasks.spawn(Self::run_drain_loop(
				Arc::clone(&self.ctx),
				shutdown_tx.subscribe(),
			));
			tasks.spawn(Self::run_projector_loop(
				Arc::clone(&self.ctx),
				shutdown_tx.subscribe(),
			));
			tasks.spawn(Self::run_membership_loop(
				Arc::clone(&self.ctx),
				Arc::clone(&self.membership_rx),
				shutdown_tx.subscribe(),
			));
		}

		*self.shutdown_tx.lock() = Some(shutdown_tx);

		self.ctx.project_all_cards().await;
		self.ctx.drain_wake.notify_one();

		Ok(())
	}

	/// Stops every background task and listener
	pub async fn stop(&self) {
		if !self.is_running.swap(false, Ordering::SeqCst) {
			return;
		}

		if let Some(shutdown_tx) = self.shutdown_tx.lock().take() {
			// receivers may already be gone
			let _ = shutdown_tx.send(());
		}

		let mut tasks = std::mem::take(&mut *self.tasks.lock());
		while let Some(res) = tasks.join_next().await {
			if let Err(e) = res {
				if !e.is_cancelled() {
					warn!(?e, "Sync task failed");
				}
			}
		}

		self.ctx.listeners.shutdown().await;

		info!("Sync service stopped");
	}

	#[must_use]
	pub fn is_running(&self) -> bool {
		self.is_running.load(Ordering::SeqCst)
	}

	/// Writes a record locally and queues it for every scope it belongs to.
	///
	/// The record's `updatedAt` is stamped with the current time. Returns the
	/// stored record.
	pub async fn save(&self, record: impl Into<Record> + Send) -> Result<Record, Error> {
		self.ctx.save(record.into()).await
	}

	/// Deletes a record locally and queues the removal for every scope it belongs to
	pub async fn delete(&self, kind: RecordKind, id: &str) -> Result<bool, Error> {
		self.ctx.delete(kind, id).await
	}

	/// Creates a shared group with the signed-in user as its first participant
	pub async fn create_group(&self) -> Result<SharedGroup, Error> {
		let user = self.ctx.session.require()?;
		let group = self.ctx.fanout.create_group(&user).await?;

		self.ctx.store_group(group.clone()).await?;
		self.ctx.subscribe_group(&group.code);
		self.ctx.republish(&user, &group.code).await?;
		self.ctx.drain_wake.notify_one();

		Ok(group)
	}

	/// Joins a group, pulls its existing records and shares the user's own into it
	pub async fn join_group(&self, code: &GroupCode) -> Result<SharedGroup, Error> {
		let user = self.ctx.session.require()?;
		let group = self.ctx.fanout.join(code, &user).await?;

		self.ctx.store_group(group.clone()).await?;
		self.ctx.subscribe_group(code);
		let backfilled = self.ctx.backfill_group(code).await?;
		let republished = self.ctx.republish(&user, code).await?;
		self.ctx.drain_wake.notify_one();

		info!(%code, %user, backfilled, republished, "Joined shared group");

		Ok(group)
	}

	/// Leaves a group; returns the group as left behind, or `None` if it was dissolved.
	///
	/// Records already replicated from the group stay in the local store.
	pub async fn leave_group(&self, code: &GroupCode) -> Result<Option<SharedGroup>, Error> {
		let user = self.ctx.session.require()?;
		let remaining = self.ctx.fanout.leave(code, &user).await?;

		self.ctx.forget_group(code).await?;

		Ok(remaining)
	}

	/// Runs one drain pass right away
	pub async fn drain_now(&self) -> Result<DrainReport, Error> {
		self.ctx.drain_once().await
	}

	/// Tells the service the network is back: retries immediately without waiting for the backoff
	pub fn connectivity_restored(&self) {
		debug!("Connectivity restored, draining");
		self.ctx.queue.reset_backoff();
		self.ctx.drain_wake.notify_one();
	}

	/// Brings the card's bill window up to date; returns the number of bills written
	pub async fn project_card(&self, card_id: &RecordId) -> Result<usize, Error> {
		self.ctx.project_card(card_id).await
	}

	/// Deletes every bill of a card, for callers that remove the card itself
	pub async fn delete_card_bills(&self, card_id: &RecordId) -> Result<usize, Error> {
		let bills = self.ctx.bills_of(card_id).await?;

		let mut deleted = 0;
		for bill in bills_for_card(card_id, &bills) {
			if self.ctx.delete(RecordKind::Bill, &bill.id.to_string()).await? {
				deleted += 1;
			}
		}

		debug!(%card_id, deleted, "Deleted card bills");

		Ok(deleted)
	}

	/// Owners with more than one active default card among the local records.
	///
	/// Concurrent edits on two devices can briefly produce this; it's reported, not repaired.
	pub async fn default_card_conflicts(&self) -> Result<Vec<(UserId, Vec<RecordId>)>, Error> {
		self.ctx.default_card_conflicts().await
	}

	/// Change notifications for one record kind
	#[must_use]
	pub fn subscribe(&self, kind: RecordKind) -> broadcast::Receiver<DataChanged> {
		self.ctx.bus.subscribe(kind)
	}

	/// Degraded/recovered notifications of the mutation queue
	#[must_use]
	pub fn signals(&self) -> broadcast::Receiver<SyncSignal> {
		self.ctx.bus.subscribe_signals()
	}

	/// Number of queued remote writes, updated on every change
	#[must_use]
	pub fn pending_mutations(&self) -> watch::Receiver<usize> {
		self.ctx.queue.watch_pending()
	}

	#[must_use]
	pub fn session(&self) -> &Arc<Session> {
		&self.ctx.session
	}

	#[must_use]
	pub fn listeners(&self) -> &Arc<ListenerManager> {
		&self.ctx.listeners
	}

	#[must_use]
	pub fn queue(&self) -> &Arc<MutationQueue> {
		&self.ctx.queue
	}

	#[must_use]
	pub fn config(&self) -> &SyncConfig {
		&self.ctx.config
	}

	/// Replays the queue on a timer, on new enqueues and after failures with backoff
	async fn run_drain_loop(ctx: Arc<SyncContext>, mut shutdown_rx: broadcast::Receiver<()>) {
		let interval = ctx.config.queue.drain_interval();
		let mut delay = interval;

		info!(interval_secs = interval.as_secs(), "Starting drain loop");

		loop {
			tokio::select! {
				_ = shutdown_rx.recv() => break,
				() = ctx.drain_wake.notified() => {}
				() = sleep(delay) => {}
			}

			delay = match ctx.drain_once().await {
				Ok(_) => interval,
				Err(e) => {
					let retry = ctx.queue.next_retry_delay();
					debug!(?e, retry_ms = retry.as_millis(), "Drain incomplete, backing off");
					retry
				}
			};
		}

		info!("Drain loop stopped");
	}

	/// Re-projects bills whenever a card changes, whatever the origin
	async fn run_projector_loop(ctx: Arc<SyncContext>, mut shutdown_rx: broadcast::Receiver<()>) {
		let mut cards = ctx.bus.subscribe(RecordKind::Card);

		loop {
			tokio::select! {
				_ = shutdown_rx.recv() => break,
				event = cards.recv() => match event {
					Ok(DataChanged { id, action: ChangeAction::Upserted, .. }) => {
						match RecordId::parse(&id) {
							Ok(card_id) => {
								if let Err(e) = ctx.project_card(&card_id).await {
									warn!(%card_id, ?e, "Failed to project bills");
								}
								match ctx.default_card_conflicts().await {
									Ok(conflicts) => {
										for (owner, cards) in conflicts {
											warn!(%owner, ?cards, "Owner has more than one default card");
										}
									}
									Err(e) => warn!(?e, "Failed to check default cards"),
								}
							}
							Err(e) => warn!(%id, %e, "Card change with invalid id"),
						}
					}
					Ok(_) => {}
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						debug!(skipped, "Missed card changes, projecting every card");
						ctx.project_all_cards().await;
					}
					Err(broadcast::error::RecvError::Closed) => break,
				},
			}
		}

		info!("Projector loop stopped");
	}

	/// Follows membership changes made elsewhere (another device, another participant)
	async fn run_membership_loop(
		ctx: Arc<SyncContext>,
		membership_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MembershipEvent>>>,
		mut shutdown_rx: broadcast::Receiver<()>,
	) {
		let mut events = membership_rx.lock().await;

		loop {
			tokio::select! {
				_ = shutdown_rx.recv() => break,
				event = events.recv() => {
					let Some(event) = event else {
						break;
					};
					report_error("membership change", &ctx.on_membership_event(event).await);
				}
			}
		}

		info!("Membership loop stopped");
	}
}

impl SyncContext {
	#[instrument(skip_all, fields(kind = %record.kind(), id = %record.id()))]
	async fn save(&self, mut record: Record) -> Result<Record, Error> {
		let user = self.session.require()?;
		let kind = record.kind();

		if !kind.is_shareable() {
			return Err(Error::NotShareable(kind));
		}

		record.touch(self.time.now());

		let id = record.id();
		let malformed = |source| Error::MalformedRecord {
			kind,
			id: id.clone(),
			source,
		};
		record.validate().map_err(malformed)?;
		let fields = record.to_fields().map_err(malformed)?;
		let owner = record.owner().cloned().unwrap_or(user);

		// resolved before any local change, a failure here leaves the device untouched
		let scopes = self.fanout.scopes_for(&owner).await?;

		{
			let store = self.local.write().await;
			let previous = store.get(kind, &id).await?;
			store.upsert(record.clone()).await?;

			if let Err(e) =
				self.queue
					.enqueue_all(&scopes, kind, id.clone(), MutationPayload::Upsert(fields))
			{
				restore(&*store, kind, &id, previous).await;
				return Err(e.into());
			}

			store.set_pending_writes(kind, &id, true).await?;
		}
		self.emit(kind, id.clone(), ChangeAction::Upserted);

		trace!(scopes = scopes.len(), "Saved record");
		self.drain_wake.notify_one();

		Ok(record)
	}

	async fn delete(&self, kind: RecordKind, id: &str) -> Result<bool, Error> {
		let user = self.session.require()?;

		if !kind.is_shareable() {
			return Err(Error::NotShareable(kind));
		}

		let owner = self
			.local
			.read()
			.await
			.get(kind, id)
			.await?
			.and_then(|record| record.owner().cloned())
			.unwrap_or(user);

		let scopes = self.fanout.scopes_for(&owner).await?;

		let removed = {
			let store = self.local.write().await;
			let previous = store.get(kind, id).await?;
			let removed = store.delete(kind, id).await?;

			if let Err(e) = self
				.queue
				.enqueue_all(&scopes, kind, id, MutationPayload::Delete)
			{
				restore(&*store, kind, id, previous).await;
				return Err(e.into());
			}

			removed
		};

		if removed {
			self.emit(kind, id.to_string(), ChangeAction::Deleted);
		}

		debug!(%kind, %id, removed, scopes = scopes.len(), "Deleted record");
		self.drain_wake.notify_one();

		Ok(removed)
	}

	async fn drain_once(&self) -> Result<DrainReport, Error> {
		let report = self.queue.drain(self.remote.as_ref(), &self.caches).await;

		if let Some(signal) = report.signal.clone() {
			self.bus.emit_signal(signal);
		}

		if !report.delivered.is_empty() {
			let store = self.local.write().await;
			for (kind, id) in &report.delivered {
				if !self.queue.is_pending(*kind, id) {
					store.set_pending_writes(*kind, id, false).await?;
				}
			}
		}

		report.into_result()
	}

	fn subscribe_group(&self, code: &GroupCode) {
		for kind in RecordKind::SHAREABLE {
			self.listeners
				.subscribe(SubscriptionKey::new(Scope::Group(code.clone()), kind));
		}
	}

	/// One-time pull of everything already in the group; returns the number of documents seen
	async fn backfill_group(&self, code: &GroupCode) -> Result<usize, Error> {
		let scope = Scope::Group(code.clone());
		let mut seen = 0;

		for kind in RecordKind::SHAREABLE {
			let documents = self.remote.query_once(&scope, kind, &Filter::All).await?;

			for document in documents {
				seen += 1;
				match self
					.resolver
					.apply_remote_change(kind, &document.id, document.fields, ChangeType::Modified)
					.await
				{
					Ok(_) | Err(Error::MalformedRecord { .. }) => {
						self.caches.mark_seen(&document.id, document.revision);
					}
					Err(e) => return Err(e),
				}
			}
		}

		debug!(%code, seen, "Backfilled group");

		Ok(seen)
	}

	/// Queues every shareable record owned by `user` for the group's scope
	async fn republish(&self, user: &UserId, code: &GroupCode) -> Result<usize, Error> {
		let scope = Scope::Group(code.clone());
		let mut queued = 0;

		for kind in RecordKind::SHAREABLE {
			let records = self
				.local
				.read()
				.await
				.query(kind, &|record: &Record| record.owner() == Some(user))
				.await?;

			for record in records {
				let id = record.id();
				let fields = record.to_fields().map_err(|source| Error::MalformedRecord {
					kind,
					id: id.clone(),
					source,
				})?;

				self.queue
					.enqueue(scope.clone(), kind, id, MutationPayload::Upsert(fields))?;
				queued += 1;
			}
		}

		Ok(queued)
	}

	async fn store_group(&self, group: SharedGroup) -> Result<(), Error> {
		let id = group.code.to_string();
		self.local.write().await.upsert(group.into()).await?;
		self.emit(RecordKind::SharedGroup, id, ChangeAction::Upserted);

		Ok(())
	}

	/// Stops following a group the user is no longer part of
	async fn forget_group(&self, code: &GroupCode) -> Result<(), Error> {
		let scope = Scope::Group(code.clone());
		self.listeners.unsubscribe_scope(&scope);

		let discarded = self.queue.discard_scope(&scope)?;
		if discarded > 0 {
			debug!(%code, discarded, "Dropped undelivered group writes");
		}

		let id = code.to_string();
		if self
			.local
			.write()
			.await
			.delete(RecordKind::SharedGroup, &id)
			.await?
		{
			self.emit(RecordKind::SharedGroup, id, ChangeAction::Deleted);
		}

		Ok(())
	}

	async fn on_membership_event(&self, event: MembershipEvent) -> Result<(), Error> {
		match event {
			MembershipEvent::Joined(group) => {
				info!(code = %group.code, "Joined shared group on another device");
				self.subscribe_group(&group.code);
				self.backfill_group(&group.code).await?;
			}
			MembershipEvent::Left(code) | MembershipEvent::Dissolved(code) => {
				info!(%code, "No longer in shared group");
				self.forget_group(&code).await?;
			}
			MembershipEvent::ParticipantsChanged(group) => {
				info!(
					code = %group.code,
					participants = group.participants.len(),
					"Shared group participants changed"
				);
			}
		}

		Ok(())
	}

	async fn project_card(&self, card_id: &RecordId) -> Result<usize, Error> {
		let card = match self
			.local
			.read()
			.await
			.get(RecordKind::Card, &card_id.to_string())
			.await?
		{
			Some(Record::Card(card)) => card,
			_ => {
				trace!(%card_id, "Card not found, nothing to project");
				return Ok(0);
			}
		};

		let bills = self.bills_of(card_id).await?;
		let today = self.time.today();
		let plan = self.projector.plan(
			&card,
			BillProjector::window_anchor(&card, today),
			today,
			&bills,
			self.time.now(),
		);

		let written = plan.len();
		for record in plan.into_records() {
			self.save(record).await?;
		}

		Ok(written)
	}

	/// Owners whose replicated cards currently carry more than one active default
	async fn default_card_conflicts(&self) -> Result<Vec<(UserId, Vec<RecordId>)>, Error> {
		let cards = self
			.local
			.read()
			.await
			.query(RecordKind::Card, &|_: &Record| true)
			.await?
			.into_iter()
			.filter_map(|record| match record {
				Record::Card(card) => Some(card),
				_ => None,
			})
			.collect::<Vec<_>>();

		Ok(Card::default_conflicts(&cards))
	}

	async fn project_all_cards(&self) {
		let cards = match self
			.local
			.read()
			.await
			.query(RecordKind::Card, &|_: &Record| true)
			.await
		{
			Ok(cards) => cards,
			Err(e) => {
				warn!(%e, "Failed to list cards for projection");
				return;
			}
		};

		for record in cards {
			if let Record::Card(Card { id, .. }) = record {
				if let Err(e) = self.project_card(&id).await {
					warn!(card_id = %id, ?e, "Failed to project bills");
				}
			}
		}
	}

	async fn bills_of(&self, card_id: &RecordId) -> Result<Vec<Bill>, Error> {
		let records = self
			.local
			.read()
			.await
			.query(RecordKind::Bill, &|record: &Record| {
				matches!(record, Record::Bill(bill) if bill.card_id == *card_id)
			})
			.await?;

		Ok(records
			.into_iter()
			.filter_map(|record| match record {
				Record::Bill(bill) => Some(bill),
				_ => None,
			})
			.collect())
	}

	fn emit(&self, kind: RecordKind, id: String, action: ChangeAction) {
		self.bus.emit(DataChanged {
			kind,
			id,
			action,
			origin: ChangeOrigin::Local,
		});
	}
}

/// Puts a record back the way it was before a mutation that could not be queued
async fn restore(store: &dyn LocalStore, kind: RecordKind, id: &str, previous: Option<Record>) {
	let restored = match previous {
		Some(record) => store.upsert(record).await,
		None => store.delete(kind, id).await.map(|_| ()),
	};

	if let Err(e) = restored {
		error!(%kind, %id, %e, "Failed to roll back local mutation");
	}
}
