use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sl_utils::{
	time::{clamped_date, shift_month},
	RecordId, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
	Daily,
	Weekly,
	Biweekly,
	Monthly,
	Yearly,
}

/// Series of operations repeating on a fixed cadence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
	pub id: RecordId,
	pub owner_id: UserId,
	pub cadence: Cadence,
	/// Repeat every `interval` cadence units
	pub interval: u16,
	pub anchor_date: NaiveDate,
	pub origin_operation_id: RecordId,
	pub updated_at: DateTime<Utc>,
}

impl Recurrence {
	/// Date of the `n`-th occurrence, the anchor being occurrence zero.
	///
	/// Monthly and yearly series keep the anchor's day of month, clamped to
	/// shorter months, so a series anchored on the 31st never drifts.
	#[must_use]
	pub fn occurrence(&self, n: u32) -> Option<NaiveDate> {
		let steps = n.checked_mul(u32::from(self.interval))?;

		match self.cadence {
			Cadence::Daily => self.anchor_date.checked_add_days(Days::new(u64::from(steps))),
			Cadence::Weekly => self
				.anchor_date
				.checked_add_days(Days::new(u64::from(steps) * 7)),
			Cadence::Biweekly => self
				.anchor_date
				.checked_add_days(Days::new(u64::from(steps) * 14)),
			Cadence::Monthly => self.month_offset(steps),
			Cadence::Yearly => self.month_offset(steps.checked_mul(12)?),
		}
	}

	fn month_offset(&self, months: u32) -> Option<NaiveDate> {
		let (year, month) = shift_month(self.anchor_date, i32::try_from(months).ok()?);
		clamped_date(year, month, self.anchor_date.day())
	}

	pub(super) fn validate(&self) -> Result<(), String> {
		if self.interval == 0 {
			return Err("interval must be at least 1".to_string());
		}

		if self.occurrence(1).is_none() {
			return Err(format!(
				"series anchored on {} has no next occurrence",
				self.anchor_date
			));
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::test_utils::{date, ts, user};

	fn series(cadence: Cadence, interval: u16, anchor: NaiveDate) -> Recurrence {
		Recurrence {
			id: RecordId::new(),
			owner_id: user("alice"),
			cadence,
			interval,
			anchor_date: anchor,
			origin_operation_id: RecordId::new(),
			updated_at: ts(0),
		}
	}

	#[test]
	fn monthly_series_clamp_without_drifting() {
		let rent = series(Cadence::Monthly, 1, date(2024, 1, 31));

		assert_eq!(rent.occurrence(0), Some(date(2024, 1, 31)));
		assert_eq!(rent.occurrence(1), Some(date(2024, 2, 29)));
		assert_eq!(rent.occurrence(2), Some(date(2024, 3, 31)));
		assert_eq!(rent.occurrence(13), Some(date(2025, 2, 28)));
	}

	#[test]
	fn day_based_cadences() {
		let anchor = date(2024, 12, 30);

		assert_eq!(
			series(Cadence::Daily, 3, anchor).occurrence(1),
			Some(date(2025, 1, 2))
		);
		assert_eq!(
			series(Cadence::Weekly, 1, anchor).occurrence(2),
			Some(date(2025, 1, 13))
		);
		assert_eq!(
			series(Cadence::Biweekly, 1, anchor).occurrence(1),
			Some(date(2025, 1, 13))
		);
	}

	#[test]
	fn yearly_series_handle_leap_days() {
		let leap = series(Cadence::Yearly, 1, date(2024, 2, 29));

		assert_eq!(leap.occurrence(1), Some(date(2025, 2, 28)));
		assert_eq!(leap.occurrence(4), Some(date(2028, 2, 29)));
	}

	#[test]
	fn zero_interval_is_invalid() {
		assert!(series(Cadence::Monthly, 0, date(2024, 1, 1))
			.validate()
			.is_err());
	}

	#[test]
	fn series_without_a_next_date_is_invalid() {
		assert!(series(Cadence::Daily, 1, NaiveDate::MAX).validate().is_err());
		assert!(series(Cadence::Yearly, 5, date(2024, 2, 29)).validate().is_ok());
	}
}
