use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sl_utils::{RecordId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardBrand {
	Visa,
	Mastercard,
	Amex,
	Elo,
	Hipercard,
	Discover,
	#[serde(other)]
	Other,
}

/// Credit card and its billing schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
	pub id: RecordId,
	pub owner_id: UserId,
	pub nickname: String,
	pub brand: CardBrand,
	/// Credit limit in minor units
	pub limit: i64,
	/// Monthly interest rate, in percent
	pub interest_rate: f64,
	pub closing_day: u8,
	pub due_day: u8,
	pub active: bool,
	pub is_default: bool,
	pub activated_on: NaiveDate,
	pub updated_at: DateTime<Utc>,
}

impl Card {
	#[allow(clippy::too_many_arguments)]
	#[must_use]
	pub fn new(
		owner_id: UserId,
		nickname: impl Into<String>,
		brand: CardBrand,
		limit: i64,
		closing_day: u8,
		due_day: u8,
		activated_on: NaiveDate,
		now: DateTime<Utc>,
	) -> Self {
		Self {
			id: RecordId::new(),
			owner_id,
			nickname: nickname.into(),
			brand,
			limit,
			interest_rate: 0.0,
			closing_day,
			due_day,
			active: true,
			is_default: false,
			activated_on,
			updated_at: now,
		}
	}

	pub(super) fn validate(&self) -> Result<(), String> {
		if !(1..=31).contains(&self.closing_day) {
			return Err(format!("closing day {} is outside 1..=31", self.closing_day));
		}

		if !(1..=31).contains(&self.due_day) {
			return Err(format!("due day {} is outside 1..=31", self.due_day));
		}

		if self.limit < 0 {
			return Err(format!("negative limit {}", self.limit));
		}

		Ok(())
	}

	/// Owners with more than one active default card.
	///
	/// Replication can briefly produce this state when two devices pick a new
	/// default at the same time; the UI resolves it, sync only reports it.
	#[must_use]
	pub fn default_conflicts<'a>(
		cards: impl IntoIterator<Item = &'a Self>,
	) -> Vec<(UserId, Vec<RecordId>)> {
		let mut defaults = BTreeMap::<&UserId, Vec<RecordId>>::new();

		for card in cards {
			if card.active && card.is_default {
				defaults.entry(&card.owner_id).or_default().push(card.id);
			}
		}

		defaults
			.into_iter()
			.filter(|(_, ids)| ids.len() > 1)
			.map(|(owner, mut ids)| {
				ids.sort();
				(owner.clone(), ids)
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::domain::test_utils::{card, date, user};

	#[test]
	fn unknown_brands_decode_as_other() {
		let brand: CardBrand = serde_json::from_value(json!("diners")).unwrap();
		assert_eq!(brand, CardBrand::Other);
	}

	#[test]
	fn reports_multiple_active_defaults_per_owner() {
		let mut first = card("alice", 20, 28, date(2024, 1, 1));
		let mut second = card("alice", 10, 18, date(2024, 1, 1));
		let mut inactive = card("alice", 10, 18, date(2024, 1, 1));
		let mut other_owner = card("bob", 10, 18, date(2024, 1, 1));
		for c in [&mut first, &mut second, &mut inactive, &mut other_owner] {
			c.is_default = true;
		}
		inactive.active = false;

		let conflicts = Card::default_conflicts([&first, &second, &inactive, &other_owner]);

		assert_eq!(conflicts.len(), 1);
		assert_eq!(conflicts[0].0, user("alice"));
		assert_eq!(conflicts[0].1.len(), 2);
		assert!(!conflicts[0].1.contains(&inactive.id));
	}
}
