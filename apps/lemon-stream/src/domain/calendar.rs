//! Trading Calendar
//!
//! lemon.markets routes to the Lang & Schwarz Tradecenter, which only
//! publishes prices during its opening hours (Europe/Berlin local time):
//!
//! | Day             | Hours         |
//! |-----------------|---------------|
//! | Monday - Friday | 07:30 - 23:00 |
//! | Saturday        | 10:00 - 13:00 |
//! | Sunday          | 17:00 - 19:00 |
//!
//! Connecting outside these hours is pointless: the stream stays silent.
//! Opening instants are inclusive, closing instants exclusive.

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeZone, Weekday};
use chrono_tz::Europe::Berlin;
use chrono_tz::Tz;

/// Opening window for a weekday as `(open, close)` in venue-local time.
const fn session(weekday: Weekday) -> ((u32, u32), (u32, u32)) {
    match weekday {
        Weekday::Sat => ((10, 0), (13, 0)),
        Weekday::Sun => ((17, 0), (19, 0)),
        _ => ((7, 30), (23, 0)),
    }
}

fn hm((hour, minute): (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Whether the venue is open at the given instant.
#[must_use]
pub fn is_exchange_open<Z: TimeZone>(instant: &DateTime<Z>) -> bool {
    let local = instant.with_timezone(&Berlin);
    let (open, close) = session(local.weekday());
    let time = local.time();

    time >= hm(open) && time < hm(close)
}

/// The first opening instant strictly after `after`, in venue-local time.
///
/// Returns `None` only if no opening could be resolved within a week,
/// which cannot happen with the fixed schedule above.
#[must_use]
pub fn next_opening<Z: TimeZone>(after: &DateTime<Z>) -> Option<DateTime<Tz>> {
    let local = after.with_timezone(&Berlin);
    let start = local.date_naive();

    (0..=7u64).find_map(|offset| {
        let date = start.checked_add_days(Days::new(offset))?;
        let (open, _) = session(date.weekday());
        let candidate = Berlin
            .from_local_datetime(&date.and_time(hm(open)))
            .earliest()?;

        (candidate > local).then_some(candidate)
    })
}
