//! Due-time computation and the clock the engine reads "now" from.

use automation_core::{AutomationError, AutomationResult};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use parking_lot::Mutex;

use crate::types::Delay;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// `now + delay`, with the clock time replaced by `send_time` when one is
/// set. The calendar date of the delayed instant is kept, so the result can
/// land earlier than `now`; such a step is simply due immediately.
///
/// A delay that runs past the representable date range is an
/// `InvalidStep`.
pub fn next_action_at(
    now: DateTime<Utc>,
    delay: &Delay,
    send_time: Option<NaiveTime>,
) -> AutomationResult<DateTime<Utc>> {
    let base = delay
        .to_duration()
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| {
            AutomationError::InvalidStep(format!(
                "delay of {} {:?} is out of range",
                delay.amount, delay.unit
            ))
        })?;
    Ok(match send_time {
        Some(at) => base.date_naive().and_time(at).and_utc(),
        None => base,
    })
}

/// Parses an `HH:MM` or `HH:MM:SS` time of day.
pub fn parse_send_time(raw: &str) -> AutomationResult<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| AutomationError::InvalidStep(format!("invalid send time `{raw}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_plain_delay() {
        let now = at(1, 14, 0);
        assert_eq!(next_action_at(now, &Delay::NONE, None).unwrap(), now);
        assert_eq!(next_action_at(now, &Delay::days(2), None).unwrap(), at(3, 14, 0));
        assert_eq!(
            next_action_at(now, &Delay::minutes(90), None).unwrap(),
            at(1, 15, 30)
        );
        assert_eq!(next_action_at(now, &Delay::weeks(1), None).unwrap(), at(8, 14, 0));
    }

    #[test]
    fn test_delay_past_date_range_is_rejected() {
        let now = at(1, 14, 0);
        for delay in [Delay::weeks(u32::MAX), Delay::days(400_000_000)] {
            let err = next_action_at(now, &delay, None).unwrap_err();
            assert!(matches!(err, AutomationError::InvalidStep(_)));
        }
    }

    #[test]
    fn test_fixed_time_of_day_overrides_clock() {
        let nine = parse_send_time("09:00").unwrap();
        let due = next_action_at(at(1, 14, 0), &Delay::days(1), Some(nine)).unwrap();
        assert_eq!(due, at(2, 9, 0));
    }

    #[test]
    fn test_fixed_time_can_fall_before_now() {
        let nine = parse_send_time("09:00").unwrap();
        let now = at(1, 14, 0);
        let due = next_action_at(now, &Delay::NONE, Some(nine)).unwrap();
        assert_eq!(due, at(1, 9, 0));
        assert!(due < now);
    }

    #[test]
    fn test_parse_send_time() {
        assert_eq!(
            parse_send_time("17:45:30").unwrap(),
            NaiveTime::from_hms_opt(17, 45, 30).unwrap()
        );
        assert!(parse_send_time("25:00").is_err());
        assert!(parse_send_time("nine").is_err());
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(at(1, 8, 0));
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), at(1, 10, 0));
        clock.set(at(5, 0, 0));
        assert_eq!(clock.now(), at(5, 0, 0));
    }
}
