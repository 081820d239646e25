//! Free-tier daily quota per client IP.
//!
//! A usage day begins at `reset_hour` UTC. Counters from earlier days are
//! swept by the first check of each new usage day.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Snapshot of a client's daily usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    /// Whether the client is still within the quota
    pub allowed: bool,
    /// Requests left today
    pub remaining: u32,
    /// Requests counted today
    pub used: u32,
    /// Daily quota
    pub limit: u32,
    /// When the counter starts over
    pub reset_time: DateTime<Utc>,
    /// Few requests left, the UI should warn
    pub should_warn: bool,
}

#[derive(Debug, Clone, Copy)]
struct DayCounter {
    count: u32,
    day: NaiveDate,
}

#[derive(Debug, Default)]
struct Counters {
    by_ip: HashMap<String, DayCounter>,
    // usage day of the last sweep
    swept: Option<NaiveDate>,
}

impl Counters {
    fn sweep(&mut self, today: NaiveDate) {
        if self.swept != Some(today) {
            self.by_ip.retain(|_, c| c.day == today);
            self.swept = Some(today);
        }
    }
}

/// Daily usage counter keyed by client IP.
#[derive(Debug)]
pub struct DailyUsageLimiter {
    counters: Mutex<Counters>,
    limit: u32,
    warning_threshold: u32,
    reset_hour: u32,
}

impl DailyUsageLimiter {
    /// `reset_hour` is clamped to 0..=23.
    pub fn new(limit: u32, warning_threshold: u32, reset_hour: u32) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            limit,
            warning_threshold,
            reset_hour: reset_hour.min(23),
        }
    }

    /// Daily quota.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Remaining-count at or below which clients are warned.
    pub fn warning_threshold(&self) -> u32 {
        self.warning_threshold
    }

    /// Count a request for `ip` (when `increment`) and report usage.
    pub fn check(&self, ip: &str, increment: bool) -> DailyUsage {
        self.check_at(ip, increment, Utc::now())
    }

    /// Report usage for `ip` without counting a request.
    pub fn status(&self, ip: &str) -> DailyUsage {
        self.check_at(ip, false, Utc::now())
    }

    /// [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(&self, ip: &str, increment: bool, now: DateTime<Utc>) -> DailyUsage {
        let today = self.usage_day(now);
        let mut counters = self.lock();
        counters.sweep(today);

        let used = {
            let counter = counters.by_ip.entry(ip.to_string()).or_insert(DayCounter {
                count: 0,
                day: today,
            });
            if counter.day != today {
                counter.day = today;
                counter.count = 0;
            }
            if increment {
                counter.count = counter.count.saturating_add(1);
            }
            counter.count
        };

        // a plain status lookup should not leave an empty entry behind
        if used == 0 {
            counters.by_ip.remove(ip);
        }

        self.snapshot(used, now)
    }

    fn snapshot(&self, used: u32, now: DateTime<Utc>) -> DailyUsage {
        let remaining = self.limit.saturating_sub(used);
        DailyUsage {
            allowed: used <= self.limit,
            remaining,
            used,
            limit: self.limit,
            reset_time: self.next_reset(now),
            should_warn: remaining > 0 && remaining <= self.warning_threshold,
        }
    }

    /// Calendar day (UTC, shifted by the reset hour) that `now` counts toward.
    fn usage_day(&self, now: DateTime<Utc>) -> NaiveDate {
        (now - Duration::hours(i64::from(self.reset_hour))).date_naive()
    }

    /// The next instant at which counters start over.
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let next_day = self.usage_day(now) + Duration::days(1);
        next_day
            .and_hms_opt(self.reset_hour, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or(now)
    }

    /// Number of clients with a counter.
    pub fn tracked_clients(&self) -> usize {
        self.lock().by_ip.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Human-readable time until `reset`, e.g. `"5 hours"` or `"1 day 3 hours"`.
pub fn format_reset_time(reset: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff_ms = (reset - now).num_milliseconds();
    if diff_ms <= 0 {
        return "0 hours".to_string();
    }

    let hours = (diff_ms + 3_599_999) / 3_600_000;
    let unit = |n: i64, one: &str, many: &str| {
        format!("{} {}", n, if n == 1 { one } else { many })
    };

    if hours < 24 {
        return unit(hours, "hour", "hours");
    }
    let days = hours / 24;
    let rest = hours % 24;
    if rest == 0 {
        unit(days, "day", "days")
    } else {
        format!("{} {}", unit(days, "day", "days"), unit(rest, "hour", "hours"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_counts_and_blocks_over_limit() {
        let limiter = DailyUsageLimiter::new(3, 1, 0);
        let now = at(2025, 3, 10, 12, 0);

        let first = limiter.check_at("1.2.3.4", true, now);
        assert_eq!((first.used, first.remaining, first.allowed), (1, 2, true));
        assert!(!first.should_warn);

        let second = limiter.check_at("1.2.3.4", true, now);
        assert!(second.should_warn);

        limiter.check_at("1.2.3.4", true, now);
        let over = limiter.check_at("1.2.3.4", true, now);
        assert_eq!(over.used, 4);
        assert_eq!(over.remaining, 0);
        assert!(!over.allowed);
        assert!(!over.should_warn);
    }

    #[test]
    fn test_status_does_not_increment() {
        let limiter = DailyUsageLimiter::new(5, 2, 0);
        let now = at(2025, 3, 10, 12, 0);
        assert_eq!(limiter.check_at("ip", false, now).used, 0);
        limiter.check_at("ip", true, now);
        assert_eq!(limiter.check_at("ip", false, now).used, 1);
        assert_eq!(limiter.check_at("ip", false, now).used, 1);
    }

    #[test]
    fn test_resets_on_next_day() {
        let limiter = DailyUsageLimiter::new(1, 0, 0);
        limiter.check_at("ip", true, at(2025, 3, 10, 23, 59));
        assert!(!limiter.check_at("ip", true, at(2025, 3, 10, 23, 59)).allowed);
        let next = limiter.check_at("ip", true, at(2025, 3, 11, 0, 0));
        assert!(next.allowed);
        assert_eq!(next.used, 1);
    }

    #[test]
    fn test_reset_hour_shifts_the_day() {
        let limiter = DailyUsageLimiter::new(1, 0, 8);
        limiter.check_at("ip", true, at(2025, 3, 10, 9, 0));
        // 07:00 next day still belongs to the same usage day
        let early = limiter.check_at("ip", false, at(2025, 3, 11, 7, 0));
        assert_eq!(early.used, 1);
        assert_eq!(early.reset_time, at(2025, 3, 11, 8, 0));
        let after = limiter.check_at("ip", false, at(2025, 3, 11, 8, 0));
        assert_eq!(after.used, 0);
    }

    #[test]
    fn test_new_day_sweeps_stale_clients() {
        let limiter = DailyUsageLimiter::new(5, 1, 0);
        let day_one = at(2025, 3, 10, 12, 0);
        for ip in ["a", "b", "c"] {
            limiter.check_at(ip, true, day_one);
        }
        assert_eq!(limiter.tracked_clients(), 3);

        // a status lookup on the next day is enough to drop yesterday's clients
        limiter.check_at("d", false, at(2025, 3, 11, 0, 1));
        assert_eq!(limiter.tracked_clients(), 0);

        limiter.check_at("a", true, at(2025, 3, 11, 0, 2));
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_next_reset_midnight() {
        let limiter = DailyUsageLimiter::new(30, 3, 0);
        assert_eq!(
            limiter.next_reset(at(2025, 12, 31, 15, 30)),
            at(2026, 1, 1, 0, 0)
        );
    }

    #[test]
    fn test_format_reset_time() {
        let now = at(2025, 3, 10, 0, 0);
        assert_eq!(format_reset_time(now, now), "0 hours");
        assert_eq!(format_reset_time(at(2025, 3, 10, 0, 30), now), "1 hour");
        assert_eq!(format_reset_time(at(2025, 3, 10, 5, 0), now), "5 hours");
        assert_eq!(format_reset_time(at(2025, 3, 11, 0, 0), now), "1 day");
        assert_eq!(format_reset_time(at(2025, 3, 12, 3, 0), now), "2 days 3 hours");
    }
}
