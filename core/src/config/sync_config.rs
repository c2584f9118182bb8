//! Synchronization engine tuning
//!
//! Every section falls back to its defaults field by field, so a config file
//! only has to mention the values it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	pub queue: QueueConfig,
	pub listener: ListenerConfig,
	pub groups: GroupConfig,
	pub projection: ProjectionConfig,
	pub clock: ClockConfig,
}

/// Offline mutation queue replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
	/// First retry delay after a failed drain
	pub initial_backoff_ms: u64,

	/// Upper bound for the retry delay
	pub max_backoff_ms: u64,

	/// Attempts after which a single `Degraded` signal is raised
	pub retry_ceiling: u32,

	/// Periodic drain even without any trigger
	pub drain_interval_secs: u64,
}

impl QueueConfig {
	#[must_use]
	pub const fn initial_backoff(&self) -> Duration {
		Duration::from_millis(self.initial_backoff_ms)
	}

	#[must_use]
	pub const fn max_backoff(&self) -> Duration {
		Duration::from_millis(self.max_backoff_ms)
	}

	#[must_use]
	pub const fn drain_interval(&self) -> Duration {
		Duration::from_secs(self.drain_interval_secs)
	}
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			initial_backoff_ms: 500,
			max_backoff_ms: 60_000,
			retry_ceiling: 8,
			drain_interval_secs: 30,
		}
	}
}

/// Remote change subscriptions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
	pub subscribe_timeout_secs: u64,
	pub resubscribe_backoff_ms: u64,
	pub max_resubscribe_backoff_ms: u64,

	/// Entries of the (record id, revision) cache used to skip already applied events
	pub seen_cache_capacity: usize,

	/// Bounded buffer between a subscription stream and its applier
	pub work_queue_capacity: usize,
}

impl ListenerConfig {
	#[must_use]
	pub const fn subscribe_timeout(&self) -> Duration {
		Duration::from_secs(self.subscribe_timeout_secs)
	}

	#[must_use]
	pub const fn resubscribe_backoff(&self) -> Duration {
		Duration::from_millis(self.resubscribe_backoff_ms)
	}

	#[must_use]
	pub const fn max_resubscribe_backoff(&self) -> Duration {
		Duration::from_millis(self.max_resubscribe_backoff_ms)
	}
}

impl Default for ListenerConfig {
	fn default() -> Self {
		Self {
			subscribe_timeout_secs: 10,
			resubscribe_backoff_ms: 1_000,
			max_resubscribe_backoff_ms: 30_000,
			seen_cache_capacity: 4_096,
			work_queue_capacity: 256,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
	pub participant_cap: usize,
	pub code_length: usize,
}

impl Default for GroupConfig {
	fn default() -> Self {
		Self {
			participant_cap: 2,
			code_length: 6,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
	/// Number of monthly bills projected ahead for every active card
	pub window_months: u32,
}

impl Default for ProjectionConfig {
	fn default() -> Self {
		Self { window_months: 12 }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
	/// Incoming timestamps further ahead than this are logged as clock skew
	pub max_skew_ms: i64,
}

impl ClockConfig {
	#[must_use]
	pub fn max_skew(&self) -> chrono::Duration {
		chrono::Duration::milliseconds(self.max_skew_ms)
	}
}

impl Default for ClockConfig {
	fn default() -> Self {
		Self {
			max_skew_ms: 5 * 60 * 1_000,
		}
	}
}
