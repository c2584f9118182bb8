//! Routes listener events to the resolvers

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{
	fanout::{FanoutResolver, GroupObservation, MembershipEvent},
	listener::{ChangeHandler, SubscriptionKey},
	session::Session,
	upsert::UpsertResolver,
	Error,
};
use crate::{
	domain::RecordKind,
	infra::store::{ChangeType, RemoteChange},
};

pub struct SyncDispatcher {
	resolver: Arc<UpsertResolver>,
	fanout: Arc<FanoutResolver>,
	session: Arc<Session>,
	membership_tx: mpsc::UnboundedSender<MembershipEvent>,
}

impl SyncDispatcher {
	pub fn new(
		resolver: Arc<UpsertResolver>,
		fanout: Arc<FanoutResolver>,
		session: Arc<Session>,
		membership_tx: mpsc::UnboundedSender<MembershipEvent>,
	) -> Self {
		Self {
			resolver,
			fanout,
			session,
			membership_tx,
		}
	}

	async fn handle_group_change(&self, change: RemoteChange) -> Result<(), Error> {
		let Some(user) = self.session.current() else {
			trace!(id = %change.id, "Ignoring group change while signed out");
			return Ok(());
		};

		let observation = self
			.fanout
			.observe_group_change(&user, &change)
			.map_err(|source| {
				warn!(id = %change.id, %source, "Dropping malformed group document");
				Error::MalformedRecord {
					kind: RecordKind::SharedGroup,
					id: change.id.clone(),
					source,
				}
			})?;

		let GroupObservation::Current(event) = observation else {
			return Ok(());
		};

		// only groups the user belongs to are replicated locally
		let keep = change.change_type != ChangeType::Removed
			&& change
				.fields
				.get("participants")
				.and_then(|participants| participants.as_array())
				.is_some_and(|participants| {
					participants
						.iter()
						.any(|participant| participant.as_str() == Some(user.as_str()))
				});

		let change_type = if keep {
			change.change_type
		} else {
			ChangeType::Removed
		};

		self.resolver
			.apply_remote_change(RecordKind::SharedGroup, &change.id, change.fields, change_type)
			.await?;

		if let Some(event) = event {
			debug!(?event, "Membership changed");
			if self.membership_tx.send(event).is_err() {
				trace!("Membership loop is gone, dropping event");
			}
		}

		Ok(())
	}
}

#[async_trait]
impl ChangeHandler for SyncDispatcher {
	async fn handle_change(&self, key: &SubscriptionKey, change: RemoteChange) -> Result<(), Error> {
		if key.kind == RecordKind::SharedGroup {
			return self.handle_group_change(change).await;
		}

		self.resolver
			.apply_remote_change(key.kind, &change.id, change.fields, change.change_type)
			.await
			.map(|_| ())
	}
}
