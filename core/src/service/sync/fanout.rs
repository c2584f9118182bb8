//! Shared group membership and target scope resolution
//!
//! A record is written to its owner's private scope plus the scope of every
//! group the owner currently participates in. Group documents live in the
//! registry scope; membership changes go through remote transactions so two
//! users joining at once can't overflow a group.

use std::sync::Arc;

use sl_utils::{GroupCode, TimeSource, UserId};
use tracing::{debug, info, warn};

use super::{
	cache::{GroupMap, SyncCaches},
	error::NotJoinableReason,
	Error,
};
use crate::{
	config::GroupConfig,
	domain::{Fields, Record, RecordError, RecordKind, Scope, SharedGroup},
	infra::store::{
		ChangeType, Filter, LocalWriter, RemoteChange, RemoteError, RemoteStore, TransactDecision,
		TransactOutcome, Transaction,
	},
};

const CODE_ATTEMPTS: usize = 5;

/// Membership transition of the signed-in user, derived from registry changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
	Joined(SharedGroup),
	Left(GroupCode),
	/// Someone else joined or left a group the user is in
	ParticipantsChanged(SharedGroup),
	/// The group document was deleted
	Dissolved(GroupCode),
}

/// What a registry change means once folded into the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupObservation {
	/// Older than a membership state already seen, must not be applied
	Stale,
	Current(Option<MembershipEvent>),
}

pub struct FanoutResolver {
	remote: Arc<dyn RemoteStore>,
	local: LocalWriter,
	caches: Arc<SyncCaches>,
	config: GroupConfig,
	time: Arc<dyn TimeSource>,
}

impl FanoutResolver {
	pub fn new(
		remote: Arc<dyn RemoteStore>,
		local: LocalWriter,
		caches: Arc<SyncCaches>,
		config: GroupConfig,
		time: Arc<dyn TimeSource>,
	) -> Self {
		Self {
			remote,
			local,
			caches,
			config,
			time,
		}
	}

	/// Owner scope followed by the scopes of the owner's active groups
	pub async fn scopes_for(&self, owner: &UserId) -> Result<Vec<Scope>, Error> {
		let groups = self.active_groups(owner).await?;

		Ok(std::iter::once(Scope::Owner(owner.clone()))
			.chain(groups.into_keys().map(Scope::Group))
			.collect())
	}

	/// Groups `user` participates in.
	///
	/// Served from the cache once loaded. When the registry can't be reached
	/// the locally replicated group records are used instead, without caching.
	pub async fn active_groups(&self, user: &UserId) -> Result<GroupMap, Error> {
		if let Some(groups) = self.caches.groups_of(user) {
			return Ok(groups);
		}

		match self.refresh_groups(user).await {
			Ok(groups) => Ok(groups),
			Err(Error::Remote(e)) if e.is_transient() => {
				debug!(%user, %e, "Registry unreachable, using local group records");
				self.local_groups(user).await
			}
			Err(e) => Err(e),
		}
	}

	/// Reloads the user's groups from the registry
	pub async fn refresh_groups(&self, user: &UserId) -> Result<GroupMap, Error> {
		let documents = self
			.remote
			.query_once(
				&Scope::Registry,
				RecordKind::SharedGroup,
				&Filter::array_contains("participants", user.as_str()),
			)
			.await?;

		let mut groups = GroupMap::new();
		for document in documents {
			match decode_group(&document.id, document.fields) {
				Ok(group) => {
					groups.insert(group.code.clone(), group);
				}
				Err(e) => warn!(id = %document.id, %e, "Ignoring malformed group document"),
			}
		}

		debug!(%user, groups = groups.len(), "Loaded active groups");
		self.caches.set_groups(user.clone(), groups.values().cloned());

		Ok(groups)
	}

	async fn local_groups(&self, user: &UserId) -> Result<GroupMap, Error> {
		let records = self
			.local
			.read()
			.await
			.query(RecordKind::SharedGroup, &|record: &Record| {
				matches!(record, Record::SharedGroup(group) if group.contains(user))
			})
			.await?;

		Ok(records
			.into_iter()
			.filter_map(|record| match record {
				Record::SharedGroup(group) => Some((group.code.clone(), group)),
				_ => None,
			})
			.collect())
	}

	/// Creates a group with `user` as its only participant under a fresh code
	pub async fn create_group(&self, user: &UserId) -> Result<SharedGroup, Error> {
		for _ in 0..CODE_ATTEMPTS {
			let code = GroupCode::generate(self.config.code_length);
			let group = SharedGroup::new(code.clone(), user.clone(), self.time.now());
			let fields = encode_group(&group)?;

			let outcome = self
				.transact_group(
					&code,
					Box::new(move |current: Option<&Fields>| {
						if current.is_some() {
							TransactDecision::Abort
						} else {
							TransactDecision::Write(fields)
						}
					}),
				)
				.await?;

			if outcome.committed {
				info!(%code, %user, "Created shared group");
				// the code may have belonged to a dissolved group
				self.caches.reset_group_epoch(&code, group.membership_epoch);
				self.remember(user, group.clone());
				return Ok(group);
			}

			debug!(%code, "Group code already taken, generating another");
		}

		Err(Error::Remote(RemoteError::Other(format!(
			"no free group code after {CODE_ATTEMPTS} attempts"
		))))
	}

	/// Adds `user` to the group; joining a group twice is a no-op
	pub async fn join(&self, code: &GroupCode, user: &UserId) -> Result<SharedGroup, Error> {
		let cap = self.config.participant_cap;
		let now = self.time.now();
		let joiner = user.clone();
		let document_id = code.to_string();

		let outcome = self
			.transact_group(
				code,
				Box::new(move |current: Option<&Fields>| {
					let Some(Ok(mut group)) =
						current.map(|fields| decode_group(&document_id, fields.clone()))
					else {
						return TransactDecision::Abort;
					};

					if group.contains(&joiner) || group.is_full(cap) {
						return TransactDecision::Abort;
					}

					group.add_participant(joiner, now);
					encode_group(&group).map_or(TransactDecision::Abort, TransactDecision::Write)
				}),
			)
			.await?;

		let Some(before) = outcome.before else {
			return Err(Error::NotJoinable {
				code: code.clone(),
				reason: NotJoinableReason::Missing,
			});
		};

		let group = match outcome.after {
			Some(after) if outcome.committed => decode_group(code.as_str(), after),
			_ => decode_group(code.as_str(), before),
		}
		.map_err(|source| Error::MalformedRecord {
			kind: RecordKind::SharedGroup,
			id: code.to_string(),
			source,
		})?;

		if !group.contains(user) {
			return Err(Error::NotJoinable {
				code: code.clone(),
				reason: NotJoinableReason::Full { cap },
			});
		}

		if outcome.committed {
			info!(%code, %user, participants = group.participants.len(), "Joined shared group");
		} else {
			debug!(%code, %user, "Already a member of the group");
		}

		self.caches
			.advance_group_epoch(code, group.membership_epoch);
		self.remember(user, group.clone());

		Ok(group)
	}

	/// Removes `user` from the group, deleting the group once it is empty.
	///
	/// Returns the remaining group, or `None` when it was dissolved or the
	/// user wasn't a member.
	pub async fn leave(
		&self,
		code: &GroupCode,
		user: &UserId,
	) -> Result<Option<SharedGroup>, Error> {
		let now = self.time.now();
		let leaver = user.clone();
		let document_id = code.to_string();

		let outcome = self
			.transact_group(
				code,
				Box::new(move |current: Option<&Fields>| {
					let Some(Ok(mut group)) =
						current.map(|fields| decode_group(&document_id, fields.clone()))
					else {
						return TransactDecision::Abort;
					};

					if !group.remove_participant(&leaver, now) {
						return TransactDecision::Abort;
					}

					if group.participants.is_empty() {
						TransactDecision::Delete
					} else {
						encode_group(&group)
							.map_or(TransactDecision::Abort, TransactDecision::Write)
					}
				}),
			)
			.await?;

		self.caches
			.update_loaded_groups(user, |groups| groups.remove(code));

		if !outcome.committed {
			debug!(%code, %user, "Not a member of the group, nothing to leave");
			return Ok(None);
		}

		match outcome.after {
			Some(after) => {
				let group = decode_group(code.as_str(), after).map_err(|source| {
					Error::MalformedRecord {
						kind: RecordKind::SharedGroup,
						id: code.to_string(),
						source,
					}
				})?;
				info!(%code, %user, remaining = group.participants.len(), "Left shared group");
				self.caches
					.advance_group_epoch(code, group.membership_epoch);
				Ok(Some(group))
			}
			None => {
				if let Some(Ok(last)) = outcome
					.before
					.map(|fields| decode_group(code.as_str(), fields))
				{
					self.caches
						.advance_group_epoch(code, last.membership_epoch);
				}
				self.caches.retire_group_epoch(code);
				info!(%code, %user, "Left shared group, group dissolved");
				Ok(None)
			}
		}
	}

	/// Folds a registry change into the cache and reports what it means for `user`
	pub fn observe_group_change(
		&self,
		user: &UserId,
		change: &RemoteChange,
	) -> Result<GroupObservation, RecordError> {
		// other users' group maps are only used for fan-out and get reloaded on demand
		self.caches.retain_groups_of(user);

		let code = match GroupCode::parse(&change.id) {
			Ok(code) => code,
			Err(_) => {
				return Err(RecordError::IdMismatch {
					expected: "group code".to_string(),
					found: change.id.clone(),
				})
			}
		};

		if change.change_type == ChangeType::Removed {
			self.caches.retire_group_epoch(&code);
			let removed = self.caches.update_groups(user, |groups| groups.remove(&code));
			return Ok(GroupObservation::Current(
				removed.map(|_| MembershipEvent::Dissolved(code)),
			));
		}

		let group = decode_group(&change.id, change.fields.clone())?;

		if change.change_type == ChangeType::Added {
			self.caches.reset_group_epoch(&code, group.membership_epoch);
		} else if !self.caches.advance_group_epoch(&code, group.membership_epoch) {
			debug!(%code, epoch = group.membership_epoch, "Ignoring stale group change");
			return Ok(GroupObservation::Stale);
		}

		let event = self.caches.update_groups(user, |groups| {
			let member = group.contains(user);

			match (groups.get(&code), member) {
				(Some(cached), true) => {
					let changed = cached.participants != group.participants;
					groups.insert(code.clone(), group.clone());
					changed.then(|| MembershipEvent::ParticipantsChanged(group.clone()))
				}
				(Some(_), false) => {
					groups.remove(&code);
					Some(MembershipEvent::Left(code.clone()))
				}
				(None, true) => {
					groups.insert(code.clone(), group.clone());
					Some(MembershipEvent::Joined(group.clone()))
				}
				(None, false) => None,
			}
		});

		Ok(GroupObservation::Current(event))
	}

	async fn transact_group(
		&self,
		code: &GroupCode,
		transaction: Transaction,
	) -> Result<TransactOutcome, Error> {
		Ok(self
			.remote
			.transact(
				&Scope::Registry,
				RecordKind::SharedGroup,
				code.as_str(),
				transaction,
			)
			.await?)
	}

	fn remember(&self, user: &UserId, group: SharedGroup) {
		self.caches.update_loaded_groups(user, |groups| {
			groups.insert(group.code.clone(), group);
		});
	}
}

fn decode_group(id: &str, fields: Fields) -> Result<SharedGroup, RecordError> {
	match Record::from_fields(RecordKind::SharedGroup, id, fields)? {
		Record::SharedGroup(group) => Ok(group),
		other => Err(RecordError::Invalid {
			kind: other.kind(),
			reason: "expected a shared group".to_string(),
		}),
	}
}

fn encode_group(group: &SharedGroup) -> Result<Fields, Error> {
	Record::SharedGroup(group.clone())
		.to_fields()
		.map_err(|source| Error::MalformedRecord {
			kind: RecordKind::SharedGroup,
			id: group.code.to_string(),
			source,
		})
}
