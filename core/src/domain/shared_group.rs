use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sl_utils::{GroupCode, UserId};

/// Small group of users whose records are replicated into a common scope.
///
/// The document lives in the registry scope under its code and is removed once
/// the last participant leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedGroup {
	#[serde(rename = "id")]
	pub code: GroupCode,
	/// Join order is preserved
	pub participants: Vec<UserId>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	/// Bumped on every join and leave
	#[serde(default)]
	pub membership_epoch: u64,
}

impl SharedGroup {
	#[must_use]
	pub fn new(code: GroupCode, founder: UserId, now: DateTime<Utc>) -> Self {
		Self {
			code,
			participants: vec![founder],
			created_at: now,
			updated_at: now,
			membership_epoch: 0,
		}
	}

	#[must_use]
	pub fn contains(&self, user: &UserId) -> bool {
		self.participants.contains(user)
	}

	#[must_use]
	pub fn is_full(&self, cap: usize) -> bool {
		self.participants.len() >= cap
	}

	/// Appends `user`; returns `false` when already a member
	pub fn add_participant(&mut self, user: UserId, now: DateTime<Utc>) -> bool {
		if self.contains(&user) {
			return false;
		}

		self.participants.push(user);
		self.bump(now);
		true
	}

	/// Removes `user`; returns `false` when not a member
	pub fn remove_participant(&mut self, user: &UserId, now: DateTime<Utc>) -> bool {
		let before = self.participants.len();
		self.participants.retain(|participant| participant != user);

		if self.participants.len() == before {
			return false;
		}

		self.bump(now);
		true
	}

	fn bump(&mut self, now: DateTime<Utc>) {
		self.updated_at = now;
		self.membership_epoch += 1;
	}

	pub(super) fn validate(&self) -> Result<(), String> {
		let mut seen = Vec::with_capacity(self.participants.len());
		for participant in &self.participants {
			if seen.contains(&participant) {
				return Err(format!("participant {participant} listed twice"));
			}
			seen.push(participant);
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::domain::test_utils::{ts, user};

	#[test]
	fn membership_changes_bump_the_epoch() {
		let mut group = SharedGroup::new(GroupCode::parse("ABCD23").unwrap(), user("alice"), ts(0));

		assert!(group.add_participant(user("bob"), ts(10)));
		assert!(!group.add_participant(user("bob"), ts(20)));
		assert_eq!(group.membership_epoch, 1);
		assert_eq!(group.updated_at, ts(10));
		assert!(group.is_full(2));

		assert!(group.remove_participant(&user("alice"), ts(30)));
		assert!(!group.remove_participant(&user("alice"), ts(40)));
		assert_eq!(group.participants, vec![user("bob")]);
		assert_eq!(group.membership_epoch, 2);
	}

	#[test]
	fn code_is_the_document_id() {
		let group = SharedGroup::new(GroupCode::parse("ABCD23").unwrap(), user("alice"), ts(0));
		let value = serde_json::to_value(&group).unwrap();

		assert_eq!(value["id"], json!("ABCD23"));
		assert_eq!(value["participants"], json!(["alice"]));
		assert_eq!(value["membershipEpoch"], json!(0));
	}
}
