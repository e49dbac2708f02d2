use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use std::collections::BTreeMap;

use crate::model::*;

// ── Availability Resolution ───────────────────────────────────────

/// Effective hours for one calendar date, as local wall-clock bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayHours {
    Closed,
    Open { start: NaiveTime, end: NaiveTime },
}

/// Resolve the effective open hours for `date`.
///
/// An exception for the exact date fully overrides the weekly schedule:
/// ClosedAllDay closes the day, CustomHours with both bounds replaces the
/// window, CustomHours missing either bound closes the day. Without an
/// exception, the first enabled weekly window matching the weekday wins.
/// Pure function of its inputs.
pub fn resolve(
    windows: &[AvailabilityWindow],
    exceptions: &BTreeMap<NaiveDate, ExceptionKind>,
    date: NaiveDate,
) -> DayHours {
    if let Some(kind) = exceptions.get(&date) {
        return match kind {
            ExceptionKind::ClosedAllDay => DayHours::Closed,
            ExceptionKind::CustomHours {
                start: Some(s),
                end: Some(e),
            } if s < e => DayHours::Open { start: *s, end: *e },
            // Either bound missing, or degenerate hours: fail safe.
            ExceptionKind::CustomHours { .. } => DayHours::Closed,
        };
    }

    let weekday = date.weekday().num_days_from_sunday() as u8;
    for w in windows {
        if w.enabled && w.weekday == weekday && w.start < w.end {
            return DayHours::Open {
                start: w.start,
                end: w.end,
            };
        }
    }
    DayHours::Closed
}

/// Localize resolved hours to an absolute span in the business timezone.
///
/// Returns None when closed or when a wall-clock bound does not exist on
/// that date (DST spring-forward gap) — closed beats guessing.
pub fn day_span(hours: &DayHours, date: NaiveDate, tz: Tz) -> Option<Span> {
    match hours {
        DayHours::Closed => None,
        DayHours::Open { start, end } => {
            let s = localize(date, *start, tz)?;
            let e = localize(date, *end, tz)?;
            if s < e { Some(Span::new(s, e)) } else { None }
        }
    }
}

/// Wall-clock time on a date to unix ms. Ambiguous local times (DST
/// fall-back) take the earlier instant.
fn localize(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<Ms> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn window(weekday: u8, start: NaiveTime, end: NaiveTime) -> AvailabilityWindow {
        AvailabilityWindow {
            weekday,
            start,
            end,
            enabled: true,
        }
    }

    // 2024-01-01 is a Monday (weekday 1).
    const MONDAY: (i32, u32, u32) = (2024, 1, 1);

    #[test]
    fn weekly_window_applies() {
        let windows = vec![window(1, t(9, 0), t(17, 0))];
        let hours = resolve(&windows, &BTreeMap::new(), d(MONDAY.0, MONDAY.1, MONDAY.2));
        assert_eq!(
            hours,
            DayHours::Open {
                start: t(9, 0),
                end: t(17, 0)
            }
        );
    }

    #[test]
    fn no_window_for_weekday_is_closed() {
        let windows = vec![window(2, t(9, 0), t(17, 0))]; // Tuesday only
        let hours = resolve(&windows, &BTreeMap::new(), d(MONDAY.0, MONDAY.1, MONDAY.2));
        assert_eq!(hours, DayHours::Closed);
    }

    #[test]
    fn disabled_window_is_skipped() {
        let mut w = window(1, t(9, 0), t(17, 0));
        w.enabled = false;
        let hours = resolve(&[w], &BTreeMap::new(), d(MONDAY.0, MONDAY.1, MONDAY.2));
        assert_eq!(hours, DayHours::Closed);
    }

    #[test]
    fn first_enabled_window_wins() {
        let windows = vec![
            AvailabilityWindow {
                weekday: 1,
                start: t(9, 0),
                end: t(12, 0),
                enabled: false,
            },
            window(1, t(10, 0), t(16, 0)),
            window(1, t(8, 0), t(20, 0)),
        ];
        let hours = resolve(&windows, &BTreeMap::new(), d(MONDAY.0, MONDAY.1, MONDAY.2));
        assert_eq!(
            hours,
            DayHours::Open {
                start: t(10, 0),
                end: t(16, 0)
            }
        );
    }

    #[test]
    fn closed_all_day_overrides_weekly_window() {
        let windows = vec![window(1, t(9, 0), t(17, 0))];
        let mut exceptions = BTreeMap::new();
        exceptions.insert(d(MONDAY.0, MONDAY.1, MONDAY.2), ExceptionKind::ClosedAllDay);
        let hours = resolve(&windows, &exceptions, d(MONDAY.0, MONDAY.1, MONDAY.2));
        assert_eq!(hours, DayHours::Closed);
    }

    #[test]
    fn exception_only_affects_its_date() {
        let windows = vec![window(1, t(9, 0), t(17, 0))];
        let mut exceptions = BTreeMap::new();
        exceptions.insert(d(2024, 1, 1), ExceptionKind::ClosedAllDay);
        // The following Monday is untouched.
        let hours = resolve(&windows, &exceptions, d(2024, 1, 8));
        assert_eq!(
            hours,
            DayHours::Open {
                start: t(9, 0),
                end: t(17, 0)
            }
        );
    }

    #[test]
    fn custom_hours_replace_window() {
        let windows = vec![window(1, t(9, 0), t(17, 0))];
        let mut exceptions = BTreeMap::new();
        exceptions.insert(
            d(MONDAY.0, MONDAY.1, MONDAY.2),
            ExceptionKind::CustomHours {
                start: Some(t(12, 0)),
                end: Some(t(15, 0)),
            },
        );
        let hours = resolve(&windows, &exceptions, d(MONDAY.0, MONDAY.1, MONDAY.2));
        assert_eq!(
            hours,
            DayHours::Open {
                start: t(12, 0),
                end: t(15, 0)
            }
        );
    }

    #[test]
    fn custom_hours_missing_bound_is_closed() {
        let windows = vec![window(1, t(9, 0), t(17, 0))];
        for (start, end) in [
            (Some(t(12, 0)), None),
            (None, Some(t(15, 0))),
            (None, None),
        ] {
            let mut exceptions = BTreeMap::new();
            exceptions.insert(
                d(MONDAY.0, MONDAY.1, MONDAY.2),
                ExceptionKind::CustomHours { start, end },
            );
            let hours = resolve(&windows, &exceptions, d(MONDAY.0, MONDAY.1, MONDAY.2));
            assert_eq!(hours, DayHours::Closed);
        }
    }

    #[test]
    fn degenerate_custom_hours_are_closed() {
        let mut exceptions = BTreeMap::new();
        exceptions.insert(
            d(MONDAY.0, MONDAY.1, MONDAY.2),
            ExceptionKind::CustomHours {
                start: Some(t(15, 0)),
                end: Some(t(12, 0)),
            },
        );
        let hours = resolve(&[], &exceptions, d(MONDAY.0, MONDAY.1, MONDAY.2));
        assert_eq!(hours, DayHours::Closed);
    }

    #[test]
    fn day_span_localizes_to_utc_ms() {
        let hours = DayHours::Open {
            start: t(9, 0),
            end: t(17, 0),
        };
        let span = day_span(&hours, d(2024, 1, 1), chrono_tz::UTC).unwrap();
        let base = chrono::Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(span.start, base + 9 * MS_PER_HOUR);
        assert_eq!(span.end, base + 17 * MS_PER_HOUR);
    }

    #[test]
    fn day_span_honors_timezone_offset() {
        let hours = DayHours::Open {
            start: t(9, 0),
            end: t(17, 0),
        };
        // 2024-01-15 New York is UTC-5: 09:00 local = 14:00Z.
        let span = day_span(&hours, d(2024, 1, 15), chrono_tz::America::New_York).unwrap();
        let expected = chrono::Utc
            .with_ymd_and_hms(2024, 1, 15, 14, 0, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(span.start, expected);
    }

    #[test]
    fn dst_gap_start_is_closed() {
        // 2024-03-10 in New York: 02:00-03:00 local does not exist.
        let hours = DayHours::Open {
            start: t(2, 30),
            end: t(10, 0),
        };
        let span = day_span(&hours, d(2024, 3, 10), chrono_tz::America::New_York);
        assert_eq!(span, None);
    }

    #[test]
    fn closed_has_no_span() {
        assert_eq!(day_span(&DayHours::Closed, d(2024, 1, 1), chrono_tz::UTC), None);
    }
}
