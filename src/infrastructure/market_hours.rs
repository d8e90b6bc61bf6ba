//! Taiwan exchange trading calendar.
//!
//! Sessions run 09:00-13:25 Taipei time on weekdays outside the scheduled
//! holiday list. Taiwan observes no daylight saving, so a fixed UTC+8 offset
//! reproduces Asia/Taipei exactly.

use crate::domain::ports::MarketCalendar;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use std::collections::HashSet;

const TAIPEI_UTC_OFFSET_SECS: i32 = 8 * 3600;

fn taipei_offset() -> FixedOffset {
    FixedOffset::east_opt(TAIPEI_UTC_OFFSET_SECS).unwrap()
}

pub struct TaiwanCalendar {
    holidays: HashSet<NaiveDate>,
}

impl TaiwanCalendar {
    pub fn new() -> Self {
        let holidays = [
            // New Year's Day
            (2025, 1, 1),
            // Lunar New Year (eve through make-up days)
            (2025, 1, 28),
            (2025, 1, 29),
            (2025, 1, 30),
            (2025, 1, 31),
            (2025, 2, 1),
            (2025, 2, 2),
            (2025, 2, 3),
            // Peace Memorial Day
            (2025, 2, 28),
            // Children's Day / Tomb Sweeping
            (2025, 4, 3),
            (2025, 4, 4),
            (2025, 4, 5),
            (2025, 4, 7),
            // Labor Day
            (2025, 5, 1),
            // Dragon Boat Festival
            (2025, 5, 31),
            (2025, 6, 2),
            // Mid-Autumn Festival
            (2025, 10, 6),
            (2025, 10, 7),
            // National Day
            (2025, 10, 10),
            (2025, 10, 11),
        ]
        .into_iter()
        .filter_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
        .collect();

        Self { holidays }
    }

    fn session_bounds() -> (NaiveTime, NaiveTime) {
        (
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(13, 25, 0).unwrap(),
        )
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }
}

impl Default for TaiwanCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketCalendar for TaiwanCalendar {
    fn is_open(&self, at: Option<DateTime<Utc>>) -> bool {
        let taipei = at.unwrap_or_else(Utc::now).with_timezone(&taipei_offset());
        let date = taipei.date_naive();

        if !self.is_trading_day(date) {
            return false;
        }

        let (open, close) = Self::session_bounds();
        let time = taipei.time();
        time >= open && time <= close
    }

    fn next_open(&self, from: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let taipei = from.unwrap_or_else(Utc::now).with_timezone(&taipei_offset());
        let (open, _) = Self::session_bounds();

        // Start from the following day, scan at most 30 days ahead.
        for days_ahead in 1..=30 {
            let candidate = taipei.date_naive() + chrono::Duration::days(days_ahead);
            if !self.is_trading_day(candidate) {
                continue;
            }
            let session_start = candidate
                .and_time(open)
                .and_local_timezone(taipei_offset())
                .single()?;
            return Some(session_start.with_timezone(&Utc));
        }

        None
    }

    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }
}
