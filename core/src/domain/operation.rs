use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sl_utils::{RecordId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
	Cash,
	Card,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
	Single,
	Recurring,
	Installment,
}

/// A single money movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
	pub id: RecordId,
	pub owner_id: UserId,
	/// Signed amount in minor units, negative for expenses
	pub amount: i64,
	pub description: String,
	pub date: NaiveDate,
	pub payment_method: PaymentMethod,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub card_id: Option<RecordId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub recurrence_id: Option<RecordId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub installment_count: Option<u16>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub installment_index: Option<u16>,
	pub kind: OperationKind,
	pub updated_at: DateTime<Utc>,
}

impl Operation {
	#[must_use]
	pub const fn is_expense(&self) -> bool {
		self.amount < 0
	}

	pub(super) fn validate(&self) -> Result<(), String> {
		if self.payment_method == PaymentMethod::Card && self.card_id.is_none() {
			return Err("card payment without a card id".to_string());
		}

		match (self.kind, self.installment_count, self.installment_index) {
			(OperationKind::Installment, Some(count), Some(index)) => {
				if count == 0 || index == 0 || index > count {
					return Err(format!("installment {index} of {count} is out of range"));
				}
			}
			(OperationKind::Installment, _, _) => {
				return Err("installment without count and index".to_string());
			}
			_ => {}
		}

		if self.kind == OperationKind::Recurring && self.recurrence_id.is_none() {
			return Err("recurring operation without a recurrence id".to_string());
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::test_utils::{operation, ts};

	#[test]
	fn optional_links_are_omitted_from_the_payload() {
		let op = operation("alice", -10, ts(0));
		let value = serde_json::to_value(&op).unwrap();

		assert!(value.get("cardId").is_none());
		assert!(value.get("installmentCount").is_none());
		assert!(op.is_expense());
	}

	#[test]
	fn installment_bounds() {
		let mut op = operation("alice", -10, ts(0));
		op.kind = OperationKind::Installment;
		assert!(op.validate().is_err());

		op.installment_count = Some(3);
		op.installment_index = Some(3);
		assert!(op.validate().is_ok());

		op.installment_index = Some(4);
		assert!(op.validate().is_err());
	}

	#[test]
	fn card_payments_need_a_card() {
		let mut op = operation("alice", -10, ts(0));
		op.payment_method = PaymentMethod::Card;
		assert!(op.validate().is_err());

		op.card_id = Some(RecordId::new());
		assert!(op.validate().is_ok());
	}
}
