//! Caches shared by the listeners, the queue and the fan-out resolver

use std::{
	collections::{BTreeMap, HashMap},
	num::NonZeroUsize,
};

use lru::LruCache;
use parking_lot::Mutex;
use sl_utils::{GroupCode, UserId};

use crate::{domain::SharedGroup, infra::store::Revision};

const FALLBACK_SEEN_CAPACITY: NonZeroUsize = match NonZeroUsize::new(4_096) {
	Some(capacity) => capacity,
	None => unreachable!(),
};

/// Active groups of one user, by code
pub type GroupMap = BTreeMap<GroupCode, SharedGroup>;

struct CacheState {
	/// (record id, revision) pairs already applied locally or written by this device
	seen: LruCache<(String, Revision), ()>,
	groups: HashMap<UserId, GroupMap>,
	/// Newest membership epoch known per group, to spot stale registry events
	group_epochs: HashMap<GroupCode, u64>,
}

pub struct SyncCaches {
	state: Mutex<CacheState>,
}

impl SyncCaches {
	#[must_use]
	pub fn new(seen_capacity: usize) -> Self {
		Self {
			state: Mutex::new(CacheState {
				seen: LruCache::new(
					NonZeroUsize::new(seen_capacity).unwrap_or(FALLBACK_SEEN_CAPACITY),
				),
				groups: HashMap::new(),
				group_epochs: HashMap::new(),
			}),
		}
	}

	#[must_use]
	pub fn is_seen(&self, id: &str, revision: Revision) -> bool {
		self.state.lock().seen.contains(&(id.to_string(), revision))
	}

	pub fn mark_seen(&self, id: &str, revision: Revision) {
		self.state.lock().seen.put((id.to_string(), revision), ());
	}

	/// `None` until the user's groups were loaded once
	#[must_use]
	pub fn groups_of(&self, user: &UserId) -> Option<GroupMap> {
		self.state.lock().groups.get(user).cloned()
	}

	pub fn set_groups(&self, user: UserId, groups: impl IntoIterator<Item = SharedGroup>) {
		let groups = groups
			.into_iter()
			.map(|group| (group.code.clone(), group))
			.collect();

		self.state.lock().groups.insert(user, groups);
	}

	/// Applies `update` to the user's loaded group map, initializing it empty if needed
	pub fn update_groups<R>(&self, user: &UserId, update: impl FnOnce(&mut GroupMap) -> R) -> R {
		let mut state = self.state.lock();
		update(state.groups.entry(user.clone()).or_default())
	}

	/// Like [`Self::update_groups`], but leaves users whose groups were never loaded alone
	pub fn update_loaded_groups<R>(
		&self,
		user: &UserId,
		update: impl FnOnce(&mut GroupMap) -> R,
	) -> Option<R> {
		self.state.lock().groups.get_mut(user).map(update)
	}

	/// Records `epoch` as the group's newest known membership state.
	///
	/// Returns `false`, leaving the record untouched, when a newer epoch is already known.
	pub fn advance_group_epoch(&self, code: &GroupCode, epoch: u64) -> bool {
		let mut state = self.state.lock();
		let known = state.group_epochs.entry(code.clone()).or_insert(epoch);

		if epoch < *known {
			return false;
		}

		*known = epoch;
		true
	}

	/// Starts tracking a newly created group from `epoch`, forgetting any group
	/// that used the same code before
	pub fn reset_group_epoch(&self, code: &GroupCode, epoch: u64) {
		self.state.lock().group_epochs.insert(code.clone(), epoch);
	}

	/// Moves the known epoch past the group's last state once the group is gone
	pub fn retire_group_epoch(&self, code: &GroupCode) {
		if let Some(known) = self.state.lock().group_epochs.get_mut(code) {
			*known += 1;
		}
	}

	/// Drops every cached user except `keep`, whose membership is tracked by events
	pub fn retain_groups_of(&self, keep: &UserId) {
		self.state.lock().groups.retain(|user, _| user == keep);
	}
}
