use crate::types::{PublisherError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};

/// Allocates publication slots for one ingestion run. Weekdays are numbered
/// 0 = Sunday .. 6 = Saturday. The first slot lands on the nearest strictly
/// future configured weekday; every later slot in the same run lands on the
/// next configured weekday after the previous one, so a single run never
/// books two posts on the same calendar day.
pub struct SlotAllocator {
    days: Vec<u8>,
    time: NaiveTime,
    cursor: Option<i64>,
    allocated: usize,
}

impl SlotAllocator {
    pub fn new(days: &[u8], time: NaiveTime) -> Self {
        Self {
            days: days.to_vec(),
            time,
            cursor: None,
            allocated: 0,
        }
    }

    /// Number of slots handed out so far in this run.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn next_slot(&mut self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if self.days.is_empty() {
            return Err(PublisherError::NoPostingDayConfigured);
        }

        let today = now.weekday().num_days_from_sunday() as i64;
        let start = self.cursor.map_or(1, |c| c + 1);

        for offset in start..start + 7 {
            let weekday = ((today + offset) % 7) as u8;
            if self.days.contains(&weekday) {
                self.cursor = Some(offset);
                self.allocated += 1;
                let date = now.date_naive() + Duration::days(offset);
                return Ok(date.and_time(self.time).and_utc());
            }
        }

        // Any 7 consecutive days contain every weekday.
        Err(PublisherError::NoPostingDayConfigured)
    }
}

/// The next `count` posting slots after `now` over a two-week lookahead,
/// for the status surface. Unlike `SlotAllocator`, today's slot is included
/// when its time has not passed yet.
pub fn upcoming_slots(
    days: &[u8],
    time: NaiveTime,
    now: DateTime<Utc>,
    count: usize,
) -> Vec<DateTime<Utc>> {
    let today = now.weekday().num_days_from_sunday() as i64;
    let mut slots = Vec::new();

    for offset in 0..14 {
        let weekday = ((today + offset) % 7) as u8;
        if !days.contains(&weekday) {
            continue;
        }
        let slot = (now.date_naive() + Duration::days(offset))
            .and_time(time)
            .and_utc();
        if slot > now {
            slots.push(slot);
        }
        if slots.len() >= count {
            break;
        }
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn posting_time() -> NaiveTime {
        NaiveTime::from_hms_opt(10, 30, 0).unwrap()
    }

    // 2020-01-06 was a Monday.
    fn monday_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 6, 9, 0, 0).unwrap()
    }

    #[test]
    fn first_slot_is_nearest_future_posting_day() {
        let mut allocator = SlotAllocator::new(&[2, 5], posting_time());
        let slot = allocator.next_slot(monday_morning()).unwrap();
        assert_eq!(slot, Utc.with_ymd_and_hms(2020, 1, 7, 10, 30, 0).unwrap());
    }

    #[test]
    fn batch_spreads_across_posting_days() {
        let now = monday_morning();
        let mut allocator = SlotAllocator::new(&[2, 5], posting_time());

        let first = allocator.next_slot(now).unwrap();
        let second = allocator.next_slot(now).unwrap();
        let third = allocator.next_slot(now).unwrap();

        // Tuesday, Friday, then next week's Tuesday.
        assert_eq!(first, Utc.with_ymd_and_hms(2020, 1, 7, 10, 30, 0).unwrap());
        assert_eq!(second, Utc.with_ymd_and_hms(2020, 1, 10, 10, 30, 0).unwrap());
        assert_eq!(third, Utc.with_ymd_and_hms(2020, 1, 14, 10, 30, 0).unwrap());
    }

    #[test]
    fn single_day_wraps_a_full_week() {
        let now = monday_morning();
        let mut allocator = SlotAllocator::new(&[1], posting_time());

        let first = allocator.next_slot(now).unwrap();
        let second = allocator.next_slot(now).unwrap();

        assert_eq!(first, Utc.with_ymd_and_hms(2020, 1, 13, 10, 30, 0).unwrap());
        assert_eq!(second, Utc.with_ymd_and_hms(2020, 1, 20, 10, 30, 0).unwrap());
    }

    #[test]
    fn same_day_slot_goes_to_next_week_not_today() {
        // Monday with Monday configured: "strictly future" means next week.
        let mut allocator = SlotAllocator::new(&[1], posting_time());
        let slot = allocator.next_slot(monday_morning()).unwrap();
        assert_eq!(slot, Utc.with_ymd_and_hms(2020, 1, 13, 10, 30, 0).unwrap());
    }

    #[test]
    fn no_posting_days_is_an_error() {
        let mut allocator = SlotAllocator::new(&[], posting_time());
        assert!(matches!(
            allocator.next_slot(monday_morning()),
            Err(PublisherError::NoPostingDayConfigured)
        ));
    }

    #[test]
    fn distinct_days_within_one_batch() {
        let now = monday_morning();
        let mut allocator = SlotAllocator::new(&[2, 5], posting_time());
        let mut seen = std::collections::HashSet::new();
        for _ in 0..6 {
            let slot = allocator.next_slot(now).unwrap();
            assert!(seen.insert(slot.date_naive()), "slot day double-booked");
        }
    }

    #[test]
    fn upcoming_includes_today_before_posting_time() {
        // Monday 09:00 with Monday configured: today's 10:30 slot is still ahead.
        let slots = upcoming_slots(&[1], posting_time(), monday_morning(), 4);
        assert_eq!(slots[0], Utc.with_ymd_and_hms(2020, 1, 6, 10, 30, 0).unwrap());
    }

    #[test]
    fn upcoming_excludes_past_slot_today() {
        let after = Utc.with_ymd_and_hms(2020, 1, 6, 12, 0, 0).unwrap();
        let slots = upcoming_slots(&[1], posting_time(), after, 4);
        assert_eq!(slots[0], Utc.with_ymd_and_hms(2020, 1, 13, 10, 30, 0).unwrap());
    }
}
