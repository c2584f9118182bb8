//! Typed "data changed" channels
//!
//! Every record kind has its own broadcast channel so a screen showing bills
//! is not woken up by operation churn. Consumers re-read the local store when
//! they receive an event; the event itself only says what changed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::RecordKind;

const DEFAULT_CAPACITY: usize = 1_024;
const SIGNAL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
	/// Mutation made on this device
	Local,
	/// Change received from a remote scope
	Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
	Upserted,
	Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChanged {
	pub kind: RecordKind,
	pub id: String,
	pub action: ChangeAction,
	pub origin: ChangeOrigin,
}

/// Health of the outbound replication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncSignal {
	/// Some queued mutation kept failing past the retry ceiling
	Degraded { pending: usize, max_attempts: u32 },
	/// The queue drained cleanly after being degraded
	Recovered,
}

#[derive(Debug, Clone)]
pub struct DataChangedBus {
	channels: HashMap<RecordKind, broadcast::Sender<DataChanged>>,
	signals: broadcast::Sender<SyncSignal>,
}

impl DataChangedBus {
	#[must_use]
	pub fn new() -> Self {
		Self::with_capacity(DEFAULT_CAPACITY)
	}

	#[must_use]
	pub fn with_capacity(capacity: usize) -> Self {
		let channels = RecordKind::ALL
			.into_iter()
			.map(|kind| (kind, broadcast::channel(capacity).0))
			.collect();

		Self {
			channels,
			signals: broadcast::channel(SIGNAL_CAPACITY).0,
		}
	}

	/// Returns the number of subscribers that received the event
	pub fn emit(&self, event: DataChanged) -> usize {
		let Some(sender) = self.channels.get(&event.kind) else {
			warn!(kind = %event.kind, "No channel for record kind");
			return 0;
		};

		let (kind, action, origin) = (event.kind, event.action, event.origin);

		match sender.send(event) {
			Ok(count) => {
				debug!(%kind, ?action, ?origin, subscribers = count, "Data change emitted");
				count
			}
			// Nobody is listening, e.g. before the UI attaches
			Err(_) => 0,
		}
	}

	#[must_use]
	pub fn subscribe(&self, kind: RecordKind) -> broadcast::Receiver<DataChanged> {
		self.channels
			.get(&kind)
			.map_or_else(|| broadcast::channel(1).1, broadcast::Sender::subscribe)
	}

	pub fn emit_signal(&self, signal: SyncSignal) {
		debug!(?signal, "Sync signal emitted");
		let _ = self.signals.send(signal);
	}

	#[must_use]
	pub fn subscribe_signals(&self) -> broadcast::Receiver<SyncSignal> {
		self.signals.subscribe()
	}

	#[must_use]
	pub fn subscriber_count(&self, kind: RecordKind) -> usize {
		self.channels
			.get(&kind)
			.map_or(0, broadcast::Sender::receiver_count)
	}
}

impl Default for DataChangedBus {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn changed(kind: RecordKind, id: &str) -> DataChanged {
		DataChanged {
			kind,
			id: id.to_string(),
			action: ChangeAction::Upserted,
			origin: ChangeOrigin::Remote,
		}
	}

	#[test]
	fn emit_with_no_subscribers() {
		let bus = DataChangedBus::new();
		assert_eq!(bus.emit(changed(RecordKind::Card, "a")), 0);
	}

	#[tokio::test]
	async fn channels_are_per_kind() {
		let bus = DataChangedBus::new();
		let mut cards = bus.subscribe(RecordKind::Card);
		let mut bills = bus.subscribe(RecordKind::Bill);

		assert_eq!(bus.emit(changed(RecordKind::Card, "card-1")), 1);

		assert_eq!(cards.recv().await.unwrap().id, "card-1");
		assert!(matches!(
			bills.try_recv(),
			Err(broadcast::error::TryRecvError::Empty)
		));
		assert_eq!(bus.subscriber_count(RecordKind::Bill), 1);
	}

	#[tokio::test]
	async fn signals_reach_every_subscriber() {
		let bus = DataChangedBus::new();
		let mut first = bus.subscribe_signals();
		let mut second = bus.subscribe_signals();

		bus.emit_signal(SyncSignal::Recovered);

		assert_eq!(first.recv().await.unwrap(), SyncSignal::Recovered);
		assert_eq!(second.recv().await.unwrap(), SyncSignal::Recovered);
	}
}
