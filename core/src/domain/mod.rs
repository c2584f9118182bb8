//! Synced record types
//!
//! Records travel between the local store and the remote scopes as flat JSON
//! objects ([`Fields`]) with camelCase keys. [`Record`] is the typed view of
//! such a payload; decoding validates it completely so a malformed document is
//! rejected as a whole instead of being partially applied.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sl_utils::UserId;

pub mod bill;
pub mod card;
pub mod operation;
pub mod recurrence;
pub mod scope;
pub mod shared_group;

pub use bill::Bill;
pub use card::{Card, CardBrand};
pub use operation::{Operation, OperationKind, PaymentMethod};
pub use recurrence::{Cadence, Recurrence};
pub use scope::{Scope, ScopeError};
pub use shared_group::SharedGroup;

/// Wire representation of a record
pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
	Card,
	Operation,
	Bill,
	Recurrence,
	SharedGroup,
}

impl RecordKind {
	pub const ALL: [Self; 5] = [
		Self::Card,
		Self::Operation,
		Self::Bill,
		Self::Recurrence,
		Self::SharedGroup,
	];

	/// Kinds replicated into owner and group scopes
	pub const SHAREABLE: [Self; 4] = [Self::Card, Self::Operation, Self::Bill, Self::Recurrence];

	/// Remote collection name
	#[must_use]
	pub const fn collection(self) -> &'static str {
		match self {
			Self::Card => "cards",
			Self::Operation => "operations",
			Self::Bill => "bills",
			Self::Recurrence => "recurrences",
			Self::SharedGroup => "shared_groups",
		}
	}

	#[must_use]
	pub const fn is_shareable(self) -> bool {
		!matches!(self, Self::SharedGroup)
	}
}

impl fmt::Display for RecordKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.collection())
	}
}

#[derive(thiserror::Error, Debug)]
pub enum RecordError {
	#[error("payload has no string `id` field")]
	MissingId,
	#[error("payload id <id='{found}'> does not match document id <id='{expected}'>")]
	IdMismatch { expected: String, found: String },
	#[error("failed to decode {kind} payload: {source}")]
	Decode {
		kind: RecordKind,
		#[source]
		source: serde_json::Error,
	},
	#[error("failed to encode {kind} record: {source}")]
	Encode {
		kind: RecordKind,
		#[source]
		source: serde_json::Error,
	},
	#[error("{kind} encoded to a non-object payload")]
	NotAnObject { kind: RecordKind },
	#[error("invalid {kind} record: {reason}")]
	Invalid { kind: RecordKind, reason: String },
}

/// Any synced record
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
	Card(Card),
	Operation(Operation),
	Bill(Bill),
	Recurrence(Recurrence),
	SharedGroup(SharedGroup),
}

impl Record {
	#[must_use]
	pub const fn kind(&self) -> RecordKind {
		match self {
			Self::Card(_) => RecordKind::Card,
			Self::Operation(_) => RecordKind::Operation,
			Self::Bill(_) => RecordKind::Bill,
			Self::Recurrence(_) => RecordKind::Recurrence,
			Self::SharedGroup(_) => RecordKind::SharedGroup,
		}
	}

	/// Document id, the same in every scope the record is written to
	#[must_use]
	pub fn id(&self) -> String {
		match self {
			Self::Card(card) => card.id.to_string(),
			Self::Operation(operation) => operation.id.to_string(),
			Self::Bill(bill) => bill.id.to_string(),
			Self::Recurrence(recurrence) => recurrence.id.to_string(),
			Self::SharedGroup(group) => group.code.to_string(),
		}
	}

	#[must_use]
	pub const fn updated_at(&self) -> DateTime<Utc> {
		match self {
			Self::Card(card) => card.updated_at,
			Self::Operation(operation) => operation.updated_at,
			Self::Bill(bill) => bill.updated_at,
			Self::Recurrence(recurrence) => recurrence.updated_at,
			Self::SharedGroup(group) => group.updated_at,
		}
	}

	/// Owner scope user; shared groups live in the registry and have none
	#[must_use]
	pub const fn owner(&self) -> Option<&UserId> {
		match self {
			Self::Card(card) => Some(&card.owner_id),
			Self::Operation(operation) => Some(&operation.owner_id),
			Self::Bill(bill) => Some(&bill.owner_id),
			Self::Recurrence(recurrence) => Some(&recurrence.owner_id),
			Self::SharedGroup(_) => None,
		}
	}

	/// Stamps a new modification time
	pub fn touch(&mut self, at: DateTime<Utc>) {
		match self {
			Self::Card(card) => card.updated_at = at,
			Self::Operation(operation) => operation.updated_at = at,
			Self::Bill(bill) => bill.updated_at = at,
			Self::Recurrence(recurrence) => recurrence.updated_at = at,
			Self::SharedGroup(group) => group.updated_at = at,
		}
	}

	pub fn to_fields(&self) -> Result<Fields, RecordError> {
		let kind = self.kind();
		let value = match self {
			Self::Card(card) => serde_json::to_value(card),
			Self::Operation(operation) => serde_json::to_value(operation),
			Self::Bill(bill) => serde_json::to_value(bill),
			Self::Recurrence(recurrence) => serde_json::to_value(recurrence),
			Self::SharedGroup(group) => serde_json::to_value(group),
		}
		.map_err(|source| RecordError::Encode { kind, source })?;

		match value {
			Value::Object(fields) => Ok(fields),
			_ => Err(RecordError::NotAnObject { kind }),
		}
	}

	/// Decodes and validates the payload of document `id`
	pub fn from_fields(kind: RecordKind, id: &str, fields: Fields) -> Result<Self, RecordError> {
		match fields.get("id") {
			Some(Value::String(found)) if found == id => {}
			Some(Value::String(found)) => {
				return Err(RecordError::IdMismatch {
					expected: id.to_string(),
					found: found.clone(),
				})
			}
			_ => return Err(RecordError::MissingId),
		}

		let value = Value::Object(fields);
		let decode = |source| RecordError::Decode { kind, source };

		let record = match kind {
			RecordKind::Card => Self::Card(serde_json::from_value(value).map_err(decode)?),
			RecordKind::Operation => Self::Operation(serde_json::from_value(value).map_err(decode)?),
			RecordKind::Bill => Self::Bill(serde_json::from_value(value).map_err(decode)?),
			RecordKind::Recurrence => {
				Self::Recurrence(serde_json::from_value(value).map_err(decode)?)
			}
			RecordKind::SharedGroup => {
				Self::SharedGroup(serde_json::from_value(value).map_err(decode)?)
			}
		};

		record.validate()?;

		Ok(record)
	}

	pub fn validate(&self) -> Result<(), RecordError> {
		let result = match self {
			Self::Card(card) => card.validate(),
			Self::Operation(operation) => operation.validate(),
			Self::Bill(bill) => bill.validate(),
			Self::Recurrence(recurrence) => recurrence.validate(),
			Self::SharedGroup(group) => group.validate(),
		};

		result.map_err(|reason| RecordError::Invalid {
			kind: self.kind(),
			reason,
		})
	}

	/// Deterministic serialization used to break exact timestamp ties
	#[must_use]
	pub fn canonical_payload(&self) -> String {
		// serde_json maps are sorted by key, so this is stable across devices
		self.to_fields()
			.map(|fields| Value::Object(fields).to_string())
			.unwrap_or_default()
	}
}

impl From<Card> for Record {
	fn from(card: Card) -> Self {
		Self::Card(card)
	}
}

impl From<Operation> for Record {
	fn from(operation: Operation) -> Self {
		Self::Operation(operation)
	}
}

impl From<Bill> for Record {
	fn from(bill: Bill) -> Self {
		Self::Bill(bill)
	}
}

impl From<Recurrence> for Record {
	fn from(recurrence: Recurrence) -> Self {
		Self::Recurrence(recurrence)
	}
}

impl From<SharedGroup> for Record {
	fn from(group: SharedGroup) -> Self {
		Self::SharedGroup(group)
	}
}


#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::{test_utils::*, *};

	#[test]
	fn records_survive_the_wire_format() {
		let record = Record::from(operation("alice", -4_250, ts(10)));
		let fields = record.to_fields().unwrap();

		assert_eq!(fields["amount"], json!(-4_250));
		assert_eq!(fields["paymentMethod"], json!("cash"));
		assert_eq!(fields["ownerId"], json!("alice"));
		assert_eq!(fields["date"], json!("2024-03-10"));

		let decoded = Record::from_fields(RecordKind::Operation, &record.id(), fields).unwrap();
		assert_eq!(decoded, record);
	}

	#[test]
	fn malformed_payloads_are_rejected() {
		let record = Record::from(operation("alice", -100, ts(0)));
		let id = record.id();
		let fields = record.to_fields().unwrap();

		let mut missing_id = fields.clone();
		missing_id.remove("id");
		assert!(matches!(
			Record::from_fields(RecordKind::Operation, &id, missing_id),
			Err(RecordError::MissingId)
		));

		assert!(matches!(
			Record::from_fields(RecordKind::Operation, "other", fields.clone()),
			Err(RecordError::IdMismatch { .. })
		));

		let mut bad_timestamp = fields.clone();
		bad_timestamp.insert("updatedAt".into(), json!("yesterday"));
		assert!(matches!(
			Record::from_fields(RecordKind::Operation, &id, bad_timestamp),
			Err(RecordError::Decode { .. })
		));

		let mut wrong_shape = fields;
		wrong_shape.insert("amount".into(), json!({ "value": 1 }));
		assert!(matches!(
			Record::from_fields(RecordKind::Operation, &id, wrong_shape),
			Err(RecordError::Decode { .. })
		));
	}

	#[test]
	fn semantic_validation_runs_on_decode() {
		let mut card = card("alice", 25, 5, date(2024, 1, 1));
		card.due_day = 32;
		let id = card.id.to_string();
		let fields = Record::from(card).to_fields().unwrap();

		assert!(matches!(
			Record::from_fields(RecordKind::Card, &id, fields),
			Err(RecordError::Invalid {
				kind: RecordKind::Card,
				..
			})
		));
	}

	#[test]
	fn canonical_payload_ignores_field_insertion_order() {
		let record = Record::from(operation("bob", 10, ts(5)));
		let mut reordered = Fields::new();
		for (key, value) in record.to_fields().unwrap().into_iter().rev() {
			reordered.insert(key, value);
		}

		let decoded = Record::from_fields(RecordKind::Operation, &record.id(), reordered).unwrap();
		assert_eq!(decoded.canonical_payload(), record.canonical_payload());
	}

	#[test]
	fn only_groups_are_not_shareable() {
		assert!(RecordKind::SHAREABLE.iter().all(|kind| kind.is_shareable()));
		assert!(!RecordKind::SharedGroup.is_shareable());
		assert_eq!(RecordKind::Bill.to_string(), "bills");
	}
}
