//! Applying remote changes to the local store
//!
//! Application is idempotent and commutative: applying the same change twice,
//! or a set of changes in any order, leaves the same local state. That is what
//! lets listeners replay full snapshots after every resubscribe.

use std::{cmp::Ordering, fmt, sync::Arc};

use chrono::Duration;
use sl_utils::{time::is_ahead_beyond_skew, TimeSource};
use tracing::{debug, trace, warn};

use super::Error;
use crate::{
	domain::{Fields, Record, RecordKind},
	infra::{
		store::{ChangeType, LocalWriter},
		sync::{ChangeAction, ChangeOrigin, DataChanged, DataChangedBus},
	},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
	Create,
	Overwrite,
	Skip,
}

/// Decides whether an incoming record replaces the local one
pub trait ConflictPolicy: Send + Sync + fmt::Debug {
	fn resolve(&self, local: Option<&Record>, incoming: &Record) -> Resolution;
}

/// Newer `updatedAt` wins the whole record.
///
/// Exact ties are broken on the canonical payload so every device picks the
/// same winner regardless of arrival order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl ConflictPolicy for LastWriterWins {
	fn resolve(&self, local: Option<&Record>, incoming: &Record) -> Resolution {
		let Some(local) = local else {
			return Resolution::Create;
		};

		if local == incoming {
			return Resolution::Skip;
		}

		match incoming.updated_at().cmp(&local.updated_at()) {
			Ordering::Greater => Resolution::Overwrite,
			Ordering::Less => Resolution::Skip,
			Ordering::Equal => {
				if incoming.canonical_payload() > local.canonical_payload() {
					Resolution::Overwrite
				} else {
					Resolution::Skip
				}
			}
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
	Created,
	Updated,
	Deleted,
	Unchanged,
}

pub struct UpsertResolver {
	local: LocalWriter,
	bus: Arc<DataChangedBus>,
	policy: Arc<dyn ConflictPolicy>,
	time: Arc<dyn TimeSource>,
	max_skew: Duration,
}

impl UpsertResolver {
	pub fn new(
		local: LocalWriter,
		bus: Arc<DataChangedBus>,
		policy: Arc<dyn ConflictPolicy>,
		time: Arc<dyn TimeSource>,
		max_skew: Duration,
	) -> Self {
		Self {
			local,
			bus,
			policy,
			time,
			max_skew,
		}
	}

	/// Applies one remote change of document `id`.
	///
	/// Malformed payloads are logged and rejected without touching the store.
	pub async fn apply_remote_change(
		&self,
		kind: RecordKind,
		id: &str,
		payload: Fields,
		change_type: ChangeType,
	) -> Result<ApplyOutcome, Error> {
		if change_type == ChangeType::Removed {
			return self.apply_removal(kind, id).await;
		}

		let incoming = Record::from_fields(kind, id, payload).map_err(|source| {
			warn!(%kind, %id, %source, "Dropping malformed remote record");
			Error::MalformedRecord {
				kind,
				id: id.to_string(),
				source,
			}
		})?;

		self.apply_record(incoming).await
	}

	/// Applies an already decoded remote record
	pub async fn apply_record(&self, incoming: Record) -> Result<ApplyOutcome, Error> {
		let kind = incoming.kind();
		let id = incoming.id();
		let now = self.time.now();

		if is_ahead_beyond_skew(incoming.updated_at(), now, self.max_skew) {
			warn!(
				%kind,
				%id,
				updated_at = %incoming.updated_at(),
				%now,
				"Incoming record is timestamped in the future, device clocks disagree"
			);
		}

		let outcome = {
			let store = self.local.write().await;
			let local = store.get(kind, &id).await?;

			match self.policy.resolve(local.as_ref(), &incoming) {
				Resolution::Skip => {
					trace!(%kind, %id, "Incoming record is not newer, skipping");
					return Ok(ApplyOutcome::Unchanged);
				}
				Resolution::Create => {
					store.upsert(incoming).await?;
					ApplyOutcome::Created
				}
				Resolution::Overwrite => {
					if store.has_pending_writes(kind, &id).await? {
						debug!(%kind, %id, "Remote record overrides unsynced local changes");
					}
					store.upsert(incoming).await?;
					ApplyOutcome::Updated
				}
			}
		};

		debug!(%kind, %id, ?outcome, "Applied remote record");
		self.emit(kind, id, ChangeAction::Upserted);

		Ok(outcome)
	}

	async fn apply_removal(&self, kind: RecordKind, id: &str) -> Result<ApplyOutcome, Error> {
		let removed = self.local.write().await.delete(kind, id).await?;

		if !removed {
			trace!(%kind, %id, "Removed record is not present locally");
			return Ok(ApplyOutcome::Unchanged);
		}

		debug!(%kind, %id, "Applied remote removal");
		self.emit(kind, id.to_string(), ChangeAction::Deleted);

		Ok(ApplyOutcome::Deleted)
	}

	fn emit(&self, kind: RecordKind, id: String, action: ChangeAction) {
		self.bus.emit(DataChanged {
			kind,
			id,
			action,
			origin: ChangeOrigin::Remote,
		});
	}
}
