use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sl_utils::{RecordId, UserId};

/// Monthly card statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
	pub id: RecordId,
	pub owner_id: UserId,
	pub card_id: RecordId,
	pub period_start: NaiveDate,
	pub closing_date: NaiveDate,
	pub due_date: NaiveDate,
	/// Amount in minor units
	pub total_amount: i64,
	pub paid: bool,
	pub updated_at: DateTime<Utc>,
}

impl Bill {
	/// Paid or already due bills are never rescheduled
	#[must_use]
	pub fn is_settled(&self, today: NaiveDate) -> bool {
		self.paid || self.due_date <= today
	}

	pub(super) fn validate(&self) -> Result<(), String> {
		if self.period_start > self.closing_date {
			return Err(format!(
				"period starts on {} after closing on {}",
				self.period_start, self.closing_date
			));
		}

		Ok(())
	}
}
