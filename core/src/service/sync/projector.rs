//! Forward-looking bill projection
//!
//! Every active card gets one bill per month for a rolling window. Projection
//! is a pure function of the card, the existing bills and the calendar: it
//! returns a plan instead of writing anything, and running it again against
//! its own output yields an empty plan.
//!
//! Bill ids are derived from the card id and the billing month, so two devices
//! projecting the same card independently produce the same documents.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sl_utils::{
	time::{clamped_date, shift_month},
	RecordId,
};
use tracing::debug;

use crate::domain::{Bill, Card, Record};

/// Dates of one monthly billing cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillSchedule {
	pub period_start: NaiveDate,
	pub closing_date: NaiveDate,
	pub due_date: NaiveDate,
}

impl BillSchedule {
	/// Cycle of `card` whose due date falls in `year`-`month`.
	///
	/// Days beyond the end of the month clamp to its last day; the period
	/// starts the day after the previous month's closing.
	#[must_use]
	pub fn for_month(card: &Card, year: i32, month: u32) -> Option<Self> {
		let closing_date = clamped_date(year, month, u32::from(card.closing_day))?;
		let due_date = clamped_date(year, month, u32::from(card.due_day))?;

		let first_of_month = NaiveDate::from_ymd_opt(year, month, 1)?;
		let (previous_year, previous_month) = shift_month(first_of_month, -1);
		let period_start =
			clamped_date(previous_year, previous_month, u32::from(card.closing_day))?.succ_opt()?;

		Some(Self {
			period_start,
			closing_date,
			due_date,
		})
	}

	fn differs_from(&self, bill: &Bill) -> bool {
		self.period_start != bill.period_start
			|| self.closing_date != bill.closing_date
			|| self.due_date != bill.due_date
	}
}

/// Bills to write for one card
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionPlan {
	pub create: Vec<Bill>,
	/// Future unpaid bills whose dates moved with the card's configuration
	pub reschedule: Vec<Bill>,
}

impl ProjectionPlan {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.create.is_empty() && self.reschedule.is_empty()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.create.len() + self.reschedule.len()
	}

	pub fn into_records(self) -> impl Iterator<Item = Record> {
		self.create
			.into_iter()
			.chain(self.reschedule)
			.map(Record::Bill)
	}
}

#[derive(Debug, Clone, Copy)]
pub struct BillProjector {
	window_months: u32,
}

impl BillProjector {
	#[must_use]
	pub const fn new(window_months: u32) -> Self {
		Self { window_months }
	}

	/// Id of `card`'s bill for the given billing month
	#[must_use]
	pub fn bill_id(card_id: &RecordId, year: i32, month: u32) -> RecordId {
		RecordId::derived(card_id, &format!("{year:04}-{month:02}"))
	}

	/// First billing month of the window: the activation month, or the
	/// current month once the card has been active for a while
	#[must_use]
	pub fn window_anchor(card: &Card, today: NaiveDate) -> NaiveDate {
		let activation = card.activated_on.with_day(1).unwrap_or(card.activated_on);
		let current = today.with_day(1).unwrap_or(today);

		activation.max(current)
	}

	/// Works out which bills are missing or stale for `card`.
	///
	/// `existing` may contain bills of other cards; they are ignored.
	#[must_use]
	pub fn plan(
		&self,
		card: &Card,
		anchor: NaiveDate,
		today: NaiveDate,
		existing: &[Bill],
		now: DateTime<Utc>,
	) -> ProjectionPlan {
		let mut plan = ProjectionPlan::default();

		if !card.active {
			debug!(card_id = %card.id, "Card is inactive, not projecting bills");
			return plan;
		}

		let own_bills = existing
			.iter()
			.filter(|bill| bill.card_id == card.id)
			.collect::<Vec<_>>();

		for bill in &own_bills {
			if bill.is_settled(today) {
				continue;
			}

			let Some(schedule) =
				BillSchedule::for_month(card, bill.due_date.year(), bill.due_date.month())
			else {
				continue;
			};

			if schedule.differs_from(bill) {
				let mut moved = (*bill).clone();
				moved.period_start = schedule.period_start;
				moved.closing_date = schedule.closing_date;
				moved.due_date = schedule.due_date;
				moved.updated_at = now;
				plan.reschedule.push(moved);
			}
		}

		let billed_months = own_bills
			.iter()
			.map(|bill| (bill.due_date.year(), bill.due_date.month()))
			.collect::<Vec<_>>();

		for offset in 0..self.window_months {
			let Ok(offset) = i32::try_from(offset) else {
				break;
			};

			let (year, month) = shift_month(anchor, offset);
			let Some(schedule) = BillSchedule::for_month(card, year, month) else {
				continue;
			};

			let id = Self::bill_id(&card.id, year, month);
			let exists = own_bills
				.iter()
				.any(|bill| bill.id == id || bill.due_date == schedule.due_date)
				|| billed_months.contains(&(year, month));

			if exists {
				continue;
			}

			plan.create.push(Bill {
				id,
				owner_id: card.owner_id.clone(),
				card_id: card.id,
				period_start: schedule.period_start,
				closing_date: schedule.closing_date,
				due_date: schedule.due_date,
				total_amount: 0,
				paid: false,
				updated_at: now,
			});
		}

		if !plan.is_empty() {
			debug!(
				card_id = %card.id,
				create = plan.create.len(),
				reschedule = plan.reschedule.len(),
				"Projected bills"
			);
		}

		plan
	}
}

/// Every bill of `card_id` among `bills`, for explicit cleanup after a card is removed
#[must_use]
pub fn bills_for_card<'a>(
	card_id: &RecordId,
	bills: impl IntoIterator<Item = &'a Bill>,
) -> Vec<&'a Bill> {
	bills
		.into_iter()
		.filter(|bill| bill.card_id == *card_id)
		.collect()
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use pretty_assertions::assert_eq;
	use sl_utils::time::last_day_of_month;

	use super::*;
	use crate::domain::test_utils::{card, date, ts};

	fn project(card: &Card, today: NaiveDate, existing: &[Bill]) -> ProjectionPlan {
		BillProjector::new(12).plan(card, card.activated_on, today, existing, ts(0))
	}

	#[test]
	fn day_31_card_gets_twelve_month_end_bills() {
		let card = card("alice", 31, 31, date(2024, 1, 15));
		let plan = project(&card, date(2024, 1, 15), &[]);

		let due_dates = plan
			.create
			.iter()
			.map(|bill| bill.due_date)
			.collect::<Vec<_>>();

		assert_eq!(
			due_dates,
			vec![
				date(2024, 1, 31),
				date(2024, 2, 29),
				date(2024, 3, 31),
				date(2024, 4, 30),
				date(2024, 5, 31),
				date(2024, 6, 30),
				date(2024, 7, 31),
				date(2024, 8, 31),
				date(2024, 9, 30),
				date(2024, 10, 31),
				date(2024, 11, 30),
				date(2024, 12, 31),
			]
		);

		let unique = due_dates.iter().collect::<HashSet<_>>();
		assert_eq!(unique.len(), 12);

		// projecting again over its own output changes nothing
		assert!(project(&card, date(2024, 1, 15), &plan.create).is_empty());
	}

	#[test]
	fn activation_on_the_31st_anchors_at_that_month() {
		for activated_on in [date(2024, 1, 31), date(2024, 3, 31)] {
			let card = card("alice", 31, 31, activated_on);
			let anchor = BillProjector::window_anchor(&card, activated_on);
			assert_eq!(anchor, activated_on.with_day(1).unwrap());

			let plan =
				BillProjector::new(12).plan(&card, anchor, activated_on, &[], ts(0));
			assert_eq!(plan.create.len(), 12);
			assert_eq!(plan.create[0].due_date, activated_on);
			assert!(plan
				.create
				.iter()
				.all(|bill| bill.due_date.day()
					== last_day_of_month(bill.due_date.year(), bill.due_date.month())));

			let again = BillProjector::new(12).plan(&card, anchor, activated_on, &plan.create, ts(0));
			assert!(again.is_empty());
		}

		// a march activation runs into a short february
		let card = card("alice", 31, 31, date(2024, 3, 31));
		let plan = project(&card, date(2024, 3, 31), &[]);
		assert_eq!(plan.create.last().unwrap().due_date, date(2025, 2, 28));
	}

	#[test]
	fn periods_chain_from_previous_closing() {
		let card = card("alice", 25, 5, date(2024, 3, 1));
		let plan = project(&card, date(2024, 3, 1), &[]);

		let march = &plan.create[0];
		assert_eq!(march.period_start, date(2024, 2, 26));
		assert_eq!(march.closing_date, date(2024, 3, 25));
		assert_eq!(march.due_date, date(2024, 3, 5));

		let april = &plan.create[1];
		assert_eq!(april.period_start, date(2024, 3, 26));
	}

	#[test]
	fn ids_are_deterministic_per_card_and_month() {
		let card = card("alice", 10, 20, date(2024, 1, 1));

		let first = project(&card, date(2024, 1, 1), &[]);
		let second = project(&card, date(2024, 1, 1), &[]);

		assert_eq!(first, second);
		assert_eq!(
			first.create[1].id,
			BillProjector::bill_id(&card.id, 2024, 2)
		);
	}

	#[test]
	fn existing_bill_with_same_due_date_blocks_creation() {
		let card = card("alice", 10, 20, date(2024, 1, 1));
		let mut manual = project(&card, date(2024, 1, 1), &[]).create.remove(0);
		manual.id = RecordId::new();

		let plan = project(&card, date(2024, 1, 1), &[manual]);
		assert_eq!(plan.create.len(), 11);
	}

	#[test]
	fn only_future_unpaid_bills_are_rescheduled() {
		let mut card = card("alice", 10, 20, date(2024, 1, 1));
		let mut bills = project(&card, date(2024, 1, 1), &[]).create;
		bills[3].paid = true;

		card.due_day = 28;
		card.closing_day = 18;
		let today = date(2024, 3, 1);
		let plan = project(&card, today, &bills);

		assert!(plan.create.is_empty());

		let moved = plan
			.reschedule
			.iter()
			.map(|bill| bill.due_date)
			.collect::<Vec<_>>();

		// january and february are past, april is paid
		assert_eq!(moved.len(), 9);
		assert_eq!(moved[0], date(2024, 3, 28));
		assert!(!moved.contains(&date(2024, 4, 28)));
		assert!(plan.reschedule.iter().all(|bill| bill.closing_date.day() == 18));
	}

	#[test]
	fn inactive_cards_are_not_projected() {
		let mut card = card("alice", 10, 20, date(2024, 1, 1));
		card.active = false;

		assert!(project(&card, date(2024, 1, 1), &[]).is_empty());
	}

	#[test]
	fn rolling_anchor() {
		let card = card("alice", 10, 20, date(2023, 6, 17));

		assert_eq!(
			BillProjector::window_anchor(&card, date(2023, 7, 2)),
			date(2023, 7, 1)
		);
		assert_eq!(
			BillProjector::window_anchor(&card, date(2023, 1, 2)),
			date(2023, 6, 1)
		);
	}

	#[test]
	fn bills_are_selected_by_card() {
		let first = card("alice", 10, 20, date(2024, 1, 1));
		let second = card("alice", 10, 20, date(2024, 1, 1));
		let mut bills = project(&first, date(2024, 1, 1), &[]).create;
		bills.extend(project(&second, date(2024, 1, 1), &[]).create);

		assert_eq!(bills_for_card(&first.id, &bills).len(), 12);
	}
}
