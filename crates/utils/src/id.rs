//! Stable identifiers
//!
//! Every synced record gets a [`RecordId`] when it is created and keeps it for
//! its whole life, on every device and in every remote scope. Shared groups are
//! addressed by a short human-typeable [`GroupCode`] instead, and users by the
//! opaque [`UserId`] handed out by the authentication provider.

use std::{fmt, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alphabet for generated group codes, without the easily confused `0/O` and `1/I`
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const MIN_CODE_LEN: usize = 4;
const MAX_CODE_LEN: usize = 12;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
	#[error("invalid record id <raw='{raw}'>: {reason}")]
	InvalidRecordId { raw: String, reason: String },
	#[error("invalid group code <raw='{0}'>")]
	InvalidGroupCode(String),
	#[error("invalid user id <raw='{0}'>")]
	InvalidUserId(String),
}

/// Globally unique record identifier.
///
/// New ids are UUIDv7 so they sort roughly by creation time. Ids for records
/// that several devices derive independently (projected bills) come from
/// [`RecordId::derived`], which is a deterministic UUIDv5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::now_v7())
	}

	/// Same `namespace` and `name` always yield the same id
	#[must_use]
	pub fn derived(namespace: &Self, name: &str) -> Self {
		Self(Uuid::new_v5(&namespace.0, name.as_bytes()))
	}

	#[must_use]
	pub const fn from_uuid(uuid: Uuid) -> Self {
		Self(uuid)
	}

	#[must_use]
	pub const fn as_uuid(&self) -> &Uuid {
		&self.0
	}

	pub fn parse(raw: &str) -> Result<Self, IdError> {
		Uuid::parse_str(raw.trim())
			.map(Self)
			.map_err(|e| IdError::InvalidRecordId {
				raw: raw.to_string(),
				reason: e.to_string(),
			})
	}
}

impl Default for RecordId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for RecordId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.0.hyphenated(), f)
	}
}

impl FromStr for RecordId {
	type Err = IdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

/// Short code identifying a shared group, also used as its remote scope name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupCode(String);

impl GroupCode {
	/// Generates a random code; `len` is clamped to the accepted code length range
	#[must_use]
	pub fn generate(len: usize) -> Self {
		let len = len.clamp(MIN_CODE_LEN, MAX_CODE_LEN);
		let mut rng = rand::thread_rng();

		Self(
			(0..len)
				.map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
				.collect(),
		)
	}

	/// Codes are typed by people, so surrounding whitespace and case are ignored
	pub fn parse(raw: &str) -> Result<Self, IdError> {
		let code = raw.trim().to_ascii_uppercase();

		if (MIN_CODE_LEN..=MAX_CODE_LEN).contains(&code.len())
			&& code.bytes().all(|b| b.is_ascii_alphanumeric())
		{
			Ok(Self(code))
		} else {
			Err(IdError::InvalidGroupCode(raw.to_string()))
		}
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl TryFrom<String> for GroupCode {
	type Error = IdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(&value)
	}
}

impl From<GroupCode> for String {
	fn from(code: GroupCode) -> Self {
		code.0
	}
}

impl fmt::Display for GroupCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Opaque user identifier issued by the authentication provider.
///
/// It ends up inside remote scope paths, so it can't be empty or contain `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
	pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
		let raw = raw.into();

		if raw.is_empty() || raw.contains('/') || raw.chars().any(char::is_whitespace) {
			Err(IdError::InvalidUserId(raw))
		} else {
			Ok(Self(raw))
		}
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl TryFrom<String> for UserId {
	type Error = IdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(value)
	}
}

impl From<UserId> for String {
	fn from(user: UserId) -> Self {
		user.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn record_id_roundtrips_through_display() {
		let id = RecordId::new();
		let parsed: RecordId = id.to_string().parse().unwrap();
		assert_eq!(id, parsed);
	}

	#[test]
	fn record_id_rejects_garbage() {
		assert!(matches!(
			RecordId::parse("not-a-uuid"),
			Err(IdError::InvalidRecordId { .. })
		));
	}

	#[test]
	fn derived_ids_are_deterministic() {
		let card = RecordId::new();
		assert_eq!(
			RecordId::derived(&card, "2024-02"),
			RecordId::derived(&card, "2024-02")
		);
		assert_ne!(
			RecordId::derived(&card, "2024-02"),
			RecordId::derived(&card, "2024-03")
		);
	}

	#[test]
	fn new_ids_sort_by_creation() {
		let first = RecordId::new();
		std::thread::sleep(std::time::Duration::from_millis(2));
		let second = RecordId::new();
		assert!(first < second);
	}

	#[test]
	fn group_codes() {
		let code = GroupCode::generate(6);
		assert_eq!(code.as_str().len(), 6);
		assert_eq!(GroupCode::parse(code.as_str()).unwrap(), code);

		assert_eq!(GroupCode::parse(" ab12cd ").unwrap().as_str(), "AB12CD");
		assert!(GroupCode::parse("ab").is_err());
		assert!(GroupCode::parse("AB-12-CD").is_err());
	}

	#[test]
	fn user_ids_cannot_break_scope_paths() {
		assert!(UserId::parse("uid_123").is_ok());
		assert!(UserId::parse("").is_err());
		assert!(UserId::parse("a/b").is_err());
		assert!(UserId::parse("a b").is_err());
	}

	#[test]
	fn serde_uses_plain_strings() {
		let code = GroupCode::parse("QWER23").unwrap();
		assert_eq!(serde_json::to_string(&code).unwrap(), "\"QWER23\"");

		let bad: Result<UserId, _> = serde_json::from_str("\"\"");
		assert!(bad.is_err());
	}
}
