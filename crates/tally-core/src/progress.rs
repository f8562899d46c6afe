use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::datetime::{app_timezone, days_between_in};
use crate::settings::SemesterDates;

/// Percentage of the semester elapsed at `today`, always within `0.0..=100.0`.
///
/// Days are whole calendar days in the app timezone, not elapsed 24-hour
/// periods: the time of day stored on the bounds (the initial settings are
/// anchored at creation time) never shifts the result. A zero-length or
/// inverted range reports 100 once `today` has reached the start date and 0
/// before it.
#[must_use]
pub fn semester_progress(dates: &SemesterDates, today: DateTime<Utc>) -> f64 {
    semester_progress_in(app_timezone(), dates, today)
}

#[must_use]
pub fn semester_progress_in(tz: &Tz, dates: &SemesterDates, today: DateTime<Utc>) -> f64 {
    let total_days = days_between_in(tz, dates.start_date, dates.end_date);
    let days_passed = days_between_in(tz, dates.start_date, today);

    if total_days <= 0 {
        tracing::debug!(
            total_days,
            days_passed,
            "degenerate semester range"
        );
        return if days_passed >= 0 { 100.0 } else { 0.0 };
    }

    let ratio = days_passed as f64 / total_days as f64 * 100.0;
    ratio.clamp(0.0, 100.0)
}
