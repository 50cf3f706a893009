//! Named time intervals referenced by routes through `mute_time_intervals`.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// A named set of time interval specifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    /// Name referenced by routes.
    pub name: String,
    /// Windows of the interval; any match mutes.
    #[serde(default)]
    pub time_intervals: Vec<TimeIntervalSpec>,
}

/// A recurring window; empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeIntervalSpec {
    /// Times of day; empty matches the whole day.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub times: Vec<TimeRange>,
    /// Day names or inclusive ranges such as `monday:friday`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekdays: Vec<String>,
}

/// `HH:MM` start (inclusive) and end (exclusive), in UTC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// `HH:MM` start.
    pub start_time: String,
    /// `HH:MM` end.
    pub end_time: String,
}

fn parse_minutes(value: &str) -> Result<u32, String> {
    let (h, m) = value.split_once(':').ok_or_else(|| format!("invalid time '{value}'"))?;
    let h: u32 = h.parse().map_err(|_| format!("invalid time '{value}'"))?;
    let m: u32 = m.parse().map_err(|_| format!("invalid time '{value}'"))?;
    if h > 24 || m > 59 || (h == 24 && m != 0) {
        return Err(format!("time '{value}' out of range"));
    }
    Ok(h * 60 + m)
}

fn parse_weekday(value: &str) -> Result<u32, String> {
    value
        .trim()
        .parse::<Weekday>()
        .map(|d| d.num_days_from_monday())
        .map_err(|_| format!("invalid weekday '{value}'"))
}

fn parse_weekday_range(value: &str) -> Result<(u32, u32), String> {
    let (start, end) = match value.split_once(':') {
        Some((s, e)) => (parse_weekday(s)?, parse_weekday(e)?),
        None => {
            let d = parse_weekday(value)?;
            (d, d)
        }
    };
    if start > end {
        return Err(format!("weekday range '{value}' is inverted"));
    }
    Ok((start, end))
}

impl TimeRange {
    fn bounds(&self) -> Result<(u32, u32), String> {
        let start = parse_minutes(&self.start_time)?;
        let end = parse_minutes(&self.end_time)?;
        if start >= end {
            return Err(format!(
                "start time '{}' must be before end time '{}'",
                self.start_time, self.end_time
            ));
        }
        Ok((start, end))
    }
}

impl TimeIntervalSpec {
    /// Checks the times and weekdays are well formed.
    pub fn validate(&self) -> Result<(), String> {
        for range in &self.times {
            range.bounds()?;
        }
        for day in &self.weekdays {
            parse_weekday_range(day)?;
        }
        Ok(())
    }

    /// Whether `at` falls inside the window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let minute = at.hour() * 60 + at.minute();
        let in_times = self.times.is_empty()
            || self
                .times
                .iter()
                .filter_map(|r| r.bounds().ok())
                .any(|(start, end)| minute >= start && minute < end);
        let day = at.weekday().num_days_from_monday();
        let in_days = self.weekdays.is_empty()
            || self
                .weekdays
                .iter()
                .filter_map(|d| parse_weekday_range(d).ok())
                .any(|(start, end)| day >= start && day <= end);
        in_times && in_days
    }
}

impl TimeInterval {
    /// Checks every window.
    pub fn validate(&self) -> Result<(), String> {
        self.time_intervals.iter().try_for_each(TimeIntervalSpec::validate)
    }

    /// Whether `at` falls inside any window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.time_intervals.iter().any(|spec| spec.contains(at))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn business_hours() -> TimeInterval {
        TimeInterval {
            name: "business".into(),
            time_intervals: vec![TimeIntervalSpec {
                times: vec![TimeRange { start_time: "09:00".into(), end_time: "17:00".into() }],
                weekdays: vec!["monday:friday".into()],
            }],
        }
    }

    #[test]
    fn test_contains_respects_time_and_weekday() {
        let interval = business_hours();
        // 2024-01-03 is a Wednesday.
        assert!(interval.contains(Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap()));
        assert!(!interval.contains(Utc.with_ymd_and_hms(2024, 1, 3, 17, 0, 0).unwrap()));
        assert!(!interval.contains(Utc.with_ymd_and_hms(2024, 1, 6, 10, 0, 0).unwrap()));
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        assert!(business_hours().validate().is_ok());

        let inverted = TimeIntervalSpec {
            times: vec![TimeRange { start_time: "18:00".into(), end_time: "08:00".into() }],
            weekdays: vec![],
        };
        assert!(inverted.validate().is_err());

        let bad_day = TimeIntervalSpec { times: vec![], weekdays: vec!["someday".into()] };
        assert!(bad_day.validate().is_err());
    }
}
