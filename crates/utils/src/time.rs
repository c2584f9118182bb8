//! Time sources and calendar helpers
//!
//! Devices disagree about the current time by a few seconds (sometimes
//! minutes), so every comparison of record timestamps coming from different
//! devices goes through the skew-aware helpers here instead of a raw `<`.
//! Production code reads the wall clock through [`SystemTimeSource`]; tests
//! drive a [`FakeTimeSource`] by hand.

use std::{
	cmp::Ordering as CmpOrdering,
	fmt,
	sync::{
		atomic::{AtomicI64, Ordering},
		Arc,
	},
};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

/// Abstracts the clock used for record timestamps and calendar decisions
pub trait TimeSource: Send + Sync + fmt::Debug {
	fn now(&self) -> DateTime<Utc>;

	fn today(&self) -> NaiveDate {
		self.now().date_naive()
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Manually driven clock, shared between clones.
///
/// Can be moved backwards to simulate clock skew between devices.
#[derive(Debug, Clone)]
pub struct FakeTimeSource {
	millis: Arc<AtomicI64>,
}

impl FakeTimeSource {
	#[must_use]
	pub fn new(start: DateTime<Utc>) -> Self {
		Self {
			millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
		}
	}

	pub fn advance(&self, delta: Duration) {
		self.millis
			.fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
	}

	pub fn set(&self, at: DateTime<Utc>) {
		self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
	}
}

impl Default for FakeTimeSource {
	fn default() -> Self {
		Self::new(DateTime::<Utc>::UNIX_EPOCH)
	}
}

impl TimeSource for FakeTimeSource {
	fn now(&self) -> DateTime<Utc> {
		DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
	}
}

/// Compares two timestamps, treating anything within `tolerance` as concurrent
#[must_use]
pub fn compare_with_skew(a: DateTime<Utc>, b: DateTime<Utc>, tolerance: Duration) -> CmpOrdering {
	let delta = a - b;

	if delta > tolerance {
		CmpOrdering::Greater
	} else if delta < -tolerance {
		CmpOrdering::Less
	} else {
		CmpOrdering::Equal
	}
}

/// Whether `candidate` lies further in the future than `reference` plus `tolerance`
#[must_use]
pub fn is_ahead_beyond_skew(
	candidate: DateTime<Utc>,
	reference: DateTime<Utc>,
	tolerance: Duration,
) -> bool {
	compare_with_skew(candidate, reference, tolerance) == CmpOrdering::Greater
}

#[must_use]
pub fn last_day_of_month(year: i32, month: u32) -> u32 {
	let (next_year, next_month) = if month >= 12 {
		(year + 1, 1)
	} else {
		(year, month + 1)
	};

	NaiveDate::from_ymd_opt(next_year, next_month, 1)
		.and_then(|first| first.pred_opt())
		.map_or(28, |last| last.day())
}

/// Builds `year-month-day`, clamping `day` to the month's last day
#[must_use]
pub fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
	let day = day.clamp(1, last_day_of_month(year, month));
	NaiveDate::from_ymd_opt(year, month, day)
}

/// Year and month `offset` months away from `date`'s month
#[must_use]
pub fn shift_month(date: NaiveDate, offset: i32) -> (i32, u32) {
	#[allow(clippy::cast_possible_wrap)]
	// month0 is always in 0..12
	let total = date.year() * 12 + date.month0() as i32 + offset;

	#[allow(clippy::cast_sign_loss)]
	// rem_euclid(12) is never negative
	let month = total.rem_euclid(12) as u32 + 1;

	(total.div_euclid(12), month)
}

/// First day of the month `offset` months away from `date`'s month
#[must_use]
pub fn month_start(date: NaiveDate, offset: i32) -> Option<NaiveDate> {
	let (year, month) = shift_month(date, offset);
	NaiveDate::from_ymd_opt(year, month, 1)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn at(ms: i64) -> DateTime<Utc> {
		DateTime::from_timestamp_millis(ms).unwrap()
	}

	#[test]
	fn fake_time_source_is_shared_between_clones() {
		let time = FakeTimeSource::new(at(1_000));
		let clone = time.clone();

		time.advance(Duration::milliseconds(500));
		assert_eq!(clone.now(), at(1_500));

		clone.set(at(200));
		assert_eq!(time.now(), at(200));
	}

	#[test]
	fn skew_comparison() {
		let tolerance = Duration::seconds(5);

		assert_eq!(
			compare_with_skew(at(10_000), at(6_000), tolerance),
			CmpOrdering::Equal
		);
		assert_eq!(
			compare_with_skew(at(20_000), at(6_000), tolerance),
			CmpOrdering::Greater
		);
		assert_eq!(
			compare_with_skew(at(0), at(6_000), Duration::zero()),
			CmpOrdering::Less
		);
		assert!(is_ahead_beyond_skew(at(60_000), at(0), tolerance));
		assert!(!is_ahead_beyond_skew(at(4_000), at(0), tolerance));
	}

	#[test]
	fn month_end_clamping() {
		assert_eq!(last_day_of_month(2024, 2), 29);
		assert_eq!(last_day_of_month(2023, 2), 28);
		assert_eq!(last_day_of_month(2024, 4), 30);
		assert_eq!(last_day_of_month(2024, 12), 31);

		assert_eq!(
			clamped_date(2024, 4, 31),
			NaiveDate::from_ymd_opt(2024, 4, 30)
		);
		assert_eq!(
			clamped_date(2024, 1, 0),
			NaiveDate::from_ymd_opt(2024, 1, 1)
		);
	}

	#[test]
	fn month_shifting_crosses_years() {
		let date = NaiveDate::from_ymd_opt(2024, 11, 30).unwrap();

		assert_eq!(shift_month(date, 2), (2025, 1));
		assert_eq!(shift_month(date, -11), (2023, 12));
		assert_eq!(month_start(date, 3), NaiveDate::from_ymd_opt(2025, 2, 1));
	}
}
