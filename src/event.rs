use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Raw fields as returned by the vision model. Everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionEvent {
    pub title: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub description: Option<String>,
    pub participants: Option<String>,
    pub location: Option<String>,
}

impl VisionEvent {
    pub fn is_valid(&self) -> bool {
        non_blank(&self.title).is_some() && non_blank(&self.date).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub description: Option<String>,
    pub participants: Option<String>,
    pub location: Option<String>,
}

impl NormalizedEvent {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Description with the participants appended, as shown in calendars.
    pub fn details(&self) -> Option<String> {
        match (self.description.as_deref(), self.participants.as_deref()) {
            (Some(description), Some(participants)) => {
                Some(format!("{description}\n\nParticipants: {participants}"))
            }
            (Some(description), None) => Some(description.to_string()),
            (None, Some(participants)) => Some(format!("Participants: {participants}")),
            (None, None) => None,
        }
    }
}

pub const DEFAULT_EVENT_MINUTES: i64 = 60;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y"];
const TIME_FORMATS: &[&str] = &["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p", "%I %p", "%I%p"];

/// Turns the model output into a concrete one-hour event in UTC.
///
/// A date without a time lands at 12:00. Values without an offset are taken as UTC.
pub fn normalize(event: &VisionEvent) -> Option<NormalizedEvent> {
    let (Some(title), Some(date)) = (non_blank(&event.title), non_blank(&event.date)) else {
        warn!(stage = "normalize", "event missing title or date");
        return None;
    };

    let Some(start) = parse_start(date, non_blank(&event.time)) else {
        warn!(stage = "normalize", date, time = ?event.time, "failed to parse event date/time");
        return None;
    };
    let end = start + Duration::minutes(DEFAULT_EVENT_MINUTES);

    let normalized = NormalizedEvent {
        title: title.to_string(),
        start,
        end,
        description: non_blank(&event.description).map(str::to_string),
        participants: non_blank(&event.participants).map(str::to_string),
        location: non_blank(&event.location).map(str::to_string),
    };
    info!(
        stage = "normalize",
        title = %normalized.title,
        start = %normalized.start.to_rfc3339(),
        duration_min = normalized.duration_minutes(),
        "event normalized"
    );
    Some(normalized)
}

fn parse_start(date: &str, time: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(start) = parse_full_datetime(date, time) {
        return Some(start);
    }

    let day = parse_date(date)?;
    let time = match time {
        Some(time) => parse_time(time)?,
        None => NaiveTime::from_hms_opt(12, 0, 0)?,
    };
    Some(NaiveDateTime::new(day, time).and_utc())
}

/// ISO 8601 timestamps, with or without an offset, given in the date field
/// (or split across date and time).
fn parse_full_datetime(date: &str, time: Option<&str>) -> Option<DateTime<Utc>> {
    let combined = match time {
        Some(time) => format!("{date}T{time}"),
        None => date.to_string(),
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&combined) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&combined, format).ok())
        .map(|naive| naive.and_utc())
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim().to_ascii_uppercase();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(&value, format).ok())
        .or_else(|| {
            // "3 PM" style has no minutes, which NaiveTime refuses on its own.
            let (hour, meridiem) = value.split_once(' ').or_else(|| {
                let index = value.find(['A', 'P'])?;
                Some(value.split_at(index))
            })?;
            let hour: u32 = hour.trim().parse().ok()?;
            let hour = match (hour, meridiem.trim()) {
                (12, "AM") => 0,
                (1..=11, "AM") => hour,
                (12, "PM") => 12,
                (1..=11, "PM") => hour + 12,
                _ => return None,
            };
            NaiveTime::from_hms_opt(hour, 0, 0)
        })
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
