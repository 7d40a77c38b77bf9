use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::clock::JitterSource;
use crate::error::{Error, Result};

/// Weekday sending window, `[start_hour, end_hour)` in local time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    start_hour: u32,
    end_hour: u32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 17,
        }
    }
}

impl BusinessHours {
    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self> {
        if start_hour >= end_hour || end_hour > 24 {
            return Err(Error::ParsingError(format!(
                "Invalid business hours {}-{}",
                start_hour, end_hour
            )));
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn window_length(&self) -> Duration {
        Duration::hours(i64::from(self.end_hour - self.start_hour))
    }

    pub fn is_open(&self, t: DateTime<Utc>, tz: Tz) -> bool {
        let local = t.with_timezone(&tz);
        is_weekday(local.date_naive())
            && local.hour() >= self.start_hour
            && local.hour() < self.end_hour
    }

    /// The first window opening at or after `t`
    pub fn next_opening(&self, t: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        let local = t.with_timezone(&tz);
        let mut date = local.date_naive();
        if !(is_weekday(date) && local.hour() < self.start_hour) {
            date += Duration::days(1);
        }
        while !is_weekday(date) {
            date += Duration::days(1);
        }
        let opening = NaiveTime::from_hms_opt(self.start_hour, 0, 0).unwrap_or(NaiveTime::MIN);
        resolve_local(tz, date.and_time(opening))
    }
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Map a local wall-clock time to UTC. Ambiguous times take the earlier
/// instant, times inside a DST gap move forward until they exist.
fn resolve_local(tz: Tz, mut local: NaiveDateTime) -> DateTime<Utc> {
    loop {
        match tz.from_local_datetime(&local) {
            LocalResult::Single(t) => return t.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => local += Duration::minutes(30),
        }
    }
}

/// `[midnight, next midnight)` of the local calendar day containing `t`
pub fn day_bounds(t: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = t.with_timezone(&tz).date_naive();
    let start = resolve_local(tz, date.and_time(NaiveTime::MIN));
    let end = resolve_local(tz, (date + Duration::days(1)).and_time(NaiveTime::MIN));
    (start, end)
}

/// Pick a send time: jitter first, then shift into the business-hour window
/// when one applies, reapplying jitter inside the window.
pub fn plan_send_time(
    now: DateTime<Utc>,
    jitter: &dyn JitterSource,
    max_jitter: Duration,
    hours: Option<(BusinessHours, Tz)>,
) -> DateTime<Utc> {
    let raw = now + jitter.jitter(max_jitter);
    match hours {
        Some((hours, tz)) if !hours.is_open(raw, tz) => {
            let in_window = max_jitter.min(hours.window_length() - Duration::seconds(1));
            hours.next_opening(raw, tz) + jitter.jitter(in_window)
        }
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::FixedJitter;

    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    // 2024-05-15 is a Wednesday
    const WED: (i32, u32, u32) = (2024, 5, 15);

    #[test]
    fn weekday_office_hours_are_open() {
        let hours = BusinessHours::default();
        let (y, m, d) = WED;
        assert!(hours.is_open(utc(y, m, d, 9, 0), Tz::UTC));
        assert!(hours.is_open(utc(y, m, d, 16, 59), Tz::UTC));
        assert!(!hours.is_open(utc(y, m, d, 17, 0), Tz::UTC));
        assert!(!hours.is_open(utc(y, m, d, 8, 59), Tz::UTC));
        assert!(!hours.is_open(utc(2024, 5, 18, 12, 0), Tz::UTC));
    }

    #[test]
    fn next_opening_before_start_is_same_day() {
        let hours = BusinessHours::default();
        let (y, m, d) = WED;
        assert_eq!(utc(y, m, d, 9, 0), hours.next_opening(utc(y, m, d, 6, 30), Tz::UTC));
    }

    #[test]
    fn next_opening_after_close_is_next_weekday() {
        let hours = BusinessHours::default();
        let (y, m, d) = WED;
        assert_eq!(utc(y, m, d + 1, 9, 0), hours.next_opening(utc(y, m, d, 18, 0), Tz::UTC));
        // Friday evening rolls over the weekend
        assert_eq!(utc(2024, 5, 20, 9, 0), hours.next_opening(utc(2024, 5, 17, 18, 0), Tz::UTC));
    }

    #[test]
    fn openings_respect_the_campaign_timezone() {
        let hours = BusinessHours::default();
        let tz: Tz = "America/New_York".parse().unwrap();
        // 06:00 UTC is 02:00 in New York (EDT, UTC-4)
        let opening = hours.next_opening(utc(2024, 5, 15, 6, 0), tz);
        assert_eq!(utc(2024, 5, 15, 13, 0), opening);
    }

    #[test]
    fn day_bounds_follow_the_local_calendar() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        // 23:30 UTC on the 15th is already the 16th in Berlin (CEST, UTC+2)
        let (start, end) = day_bounds(utc(2024, 5, 15, 23, 30), tz);
        assert_eq!(utc(2024, 5, 15, 22, 0), start);
        assert_eq!(utc(2024, 5, 16, 22, 0), end);
    }

    #[test]
    fn jitter_applies_before_the_shift() {
        let hours = BusinessHours::default();
        let jitter = FixedJitter(Duration::minutes(20));
        let (y, m, d) = WED;

        // Inside the window: only the raw jitter
        let planned = plan_send_time(utc(y, m, d, 10, 0), &jitter, Duration::minutes(60), Some((hours, Tz::UTC)));
        assert_eq!(utc(y, m, d, 10, 20), planned);

        // 16:50 + 20 min falls after close, so shift to tomorrow 09:00 + jitter
        let planned = plan_send_time(utc(y, m, d, 16, 50), &jitter, Duration::minutes(60), Some((hours, Tz::UTC)));
        assert_eq!(utc(y, m, d + 1, 9, 20), planned);
    }

    #[test]
    fn no_window_means_raw_jitter() {
        let jitter = FixedJitter(Duration::minutes(45));
        let now = utc(2024, 5, 18, 23, 0);
        assert_eq!(now + Duration::minutes(45), plan_send_time(now, &jitter, Duration::minutes(60), None));
    }

    #[test]
    fn inverted_hours_are_rejected() {
        assert!(BusinessHours::new(17, 9).is_err());
        assert!(BusinessHours::new(9, 25).is_err());
        assert!(BusinessHours::new(8, 18).is_ok());
    }
}
