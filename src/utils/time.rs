use chrono::{Days, NaiveDate};

/// Returns the date `days` days before `date`. Saturates at the minimal representable date.
pub fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_days(Days::new(days.into()))
        .unwrap_or(NaiveDate::MIN)
}

/// Iterates over `days` calendar days ending at `end` (inclusive), newest first.
pub fn trailing_days(end: NaiveDate, days: u32) -> impl Iterator<Item = NaiveDate> {
    (0..days).map_while(move |offset| end.checked_sub_days(Days::new(offset.into())))
}
