use crate::event::NormalizedEvent;
use crate::notify::Notifier;
use crate::settings::CalendarPreference;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Url;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

const GOOGLE_CALENDAR_EDIT_URL: &str = "https://calendar.google.com/calendar/r/eventedit";
const ICS_LINE_LIMIT: usize = 75;

/// Where the user reviews the new event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarTarget {
    IcsFile(PathBuf),
    GoogleUrl(Url),
}

impl fmt::Display for CalendarTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalendarTarget::IcsFile(path) => write!(f, "{}", path.display()),
            CalendarTarget::GoogleUrl(url) => write!(f, "{url}"),
        }
    }
}

pub trait TargetOpener: Send + Sync {
    fn open(&self, target: &CalendarTarget) -> Result<()>;
}

/// Hands the target to the OS default handler (Calendar for `.ics`, the
/// browser for URLs).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl TargetOpener for SystemOpener {
    fn open(&self, target: &CalendarTarget) -> Result<()> {
        match target {
            CalendarTarget::IcsFile(path) => opener::open(path),
            CalendarTarget::GoogleUrl(url) => opener::open_browser(url.as_str()),
        }
        .with_context(|| format!("failed to open {target}"))
    }
}

/// A created event whose opener thread may still be waiting.
#[derive(Debug)]
pub struct CalendarLaunch {
    pub ics_path: Option<PathBuf>,
    opener: JoinHandle<()>,
}

impl CalendarLaunch {
    pub fn wait(self) -> Option<PathBuf> {
        if self.opener.join().is_err() {
            warn!(stage = "calendar", "calendar opener thread panicked");
        }
        self.ics_path
    }
}

#[derive(Clone)]
pub struct CalendarConnector {
    events_dir: PathBuf,
    open_delay: Duration,
    opener: Arc<dyn TargetOpener>,
}

impl CalendarConnector {
    pub fn new(events_dir: impl Into<PathBuf>, open_delay: Duration) -> Self {
        Self {
            events_dir: events_dir.into(),
            open_delay,
            opener: Arc::new(SystemOpener),
        }
    }

    pub fn with_opener(mut self, opener: Arc<dyn TargetOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Materializes the event for `preference` and opens it after the
    /// configured delay on a separate thread. Returns the `.ics` path for
    /// Apple Calendar and `None` for Google Calendar.
    pub fn create_calendar_event(
        &self,
        event: &NormalizedEvent,
        preference: CalendarPreference,
        notifier: &Notifier,
    ) -> Result<Option<PathBuf>> {
        Ok(self.launch(event, preference, notifier)?.ics_path)
    }

    pub fn launch(
        &self,
        event: &NormalizedEvent,
        preference: CalendarPreference,
        notifier: &Notifier,
    ) -> Result<CalendarLaunch> {
        let (target, ics_path) = match preference {
            CalendarPreference::Apple => {
                let path = write_ics(event, &self.events_dir, Utc::now())?;
                (CalendarTarget::IcsFile(path.clone()), Some(path))
            }
            CalendarPreference::Google => (CalendarTarget::GoogleUrl(google_calendar_url(event)?), None),
        };
        info!(stage = "calendar", calendar = %preference, title = %event.title, "calendar event created");

        let notifier = notifier.clone();
        let opener = self.opener.clone();
        let delay = self.open_delay;
        let handle = thread::Builder::new()
            .name("screencal-calendar-opener".to_string())
            .spawn(move || open_after_delay(&target, delay, &notifier, opener.as_ref()))
            .context("failed to spawn calendar opener thread")?;

        Ok(CalendarLaunch {
            ics_path,
            opener: handle,
        })
    }
}

impl fmt::Debug for CalendarConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalendarConnector")
            .field("events_dir", &self.events_dir)
            .field("open_delay", &self.open_delay)
            .finish()
    }
}

fn open_after_delay(
    target: &CalendarTarget,
    delay: Duration,
    notifier: &Notifier,
    opener: &dyn TargetOpener,
) {
    if notifier.is_shut_down() {
        info!(stage = "calendar", "shutting down, calendar opener aborted");
        return;
    }
    notifier.on_calendar_opening();

    if !delay.is_zero() {
        info!(stage = "calendar", delay_ms = delay.as_millis() as u64, "waiting before opening calendar");
        thread::sleep(delay);
    }
    if notifier.is_shut_down() {
        info!(stage = "calendar", "shutting down before calendar open, aborted");
        return;
    }

    match opener.open(target) {
        Ok(()) => info!(stage = "calendar", %target, "calendar opened"),
        Err(err) => warn!(stage = "calendar", "{err:#}"),
    }
}

pub fn write_ics(event: &NormalizedEvent, dir: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create events directory {}", dir.display()))?;

    let stamp = now.format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("ScreenCal_{}_{stamp}.ics", slug(&event.title)));
    std::fs::write(&path, render_ics(event, now))
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(stage = "ics", path = %path.display(), "ICS file written");
    Ok(path)
}

pub fn render_ics(event: &NormalizedEvent, now: DateTime<Utc>) -> String {
    let uid = format!(
        "{}-{}@screencal.local",
        now.format("%Y%m%dT%H%M%S%.3f"),
        slug(&event.title)
    );

    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//ScreenCal//ScreenCal//EN".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        "METHOD:PUBLISH".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{uid}"),
        format!("DTSTAMP:{}", ics_datetime(now)),
        format!("DTSTART:{}", ics_datetime(event.start)),
        format!("DTEND:{}", ics_datetime(event.end)),
        format!("SUMMARY:{}", escape_ics_text(&event.title)),
    ];
    if let Some(details) = event.details() {
        lines.push(format!("DESCRIPTION:{}", escape_ics_text(&details)));
    }
    if let Some(location) = &event.location {
        lines.push(format!("LOCATION:{}", escape_ics_text(location)));
    }
    lines.push("END:VEVENT".to_string());
    lines.push("END:VCALENDAR".to_string());

    let mut out = String::new();
    for line in lines {
        out.push_str(&fold_line(&line));
        out.push_str("\r\n");
    }
    out
}

fn ics_datetime(value: DateTime<Utc>) -> String {
    value.format("%Y%m%dT%H%M%SZ").to_string()
}

fn escape_ics_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\r', "")
        .replace('\n', "\\n")
}

/// Splits a content line into 75-octet pieces; continuation lines start with a space.
fn fold_line(line: &str) -> String {
    let mut folded = String::with_capacity(line.len() + line.len() / ICS_LINE_LIMIT * 3);
    let mut width = 0;
    for ch in line.chars() {
        if width + ch.len_utf8() > ICS_LINE_LIMIT {
            folded.push_str("\r\n ");
            width = 1;
        }
        folded.push(ch);
        width += ch.len_utf8();
    }
    folded
}

fn slug(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .take(50)
        .collect();
    let joined = cleaned
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if joined.is_empty() {
        "event".to_string()
    } else {
        joined
    }
}

/// Builds the Google Calendar template link, pinned to the system time zone
/// when it can be resolved.
pub fn google_calendar_url(event: &NormalizedEvent) -> Result<Url> {
    let zone = match iana_time_zone::get_timezone() {
        Ok(zone) => {
            info!(stage = "calendar", zone = %zone, "using system time zone for Google Calendar");
            Some(zone)
        }
        Err(err) => {
            warn!(
                stage = "calendar",
                "unable to determine system time zone, Google account default applies: {err}"
            );
            None
        }
    };
    google_calendar_url_in(event, zone.as_deref())
}

fn google_calendar_url_in(event: &NormalizedEvent, zone: Option<&str>) -> Result<Url> {
    let mut params = vec![
        ("action", "TEMPLATE".to_string()),
        (
            "dates",
            format!("{}/{}", ics_datetime(event.start), ics_datetime(event.end)),
        ),
        ("text", event.title.clone()),
    ];
    if let Some(details) = event.details() {
        params.push(("details", details));
    }
    if let Some(location) = &event.location {
        params.push(("location", location.clone()));
    }
    if let Some(zone) = zone.filter(|zone| !zone.trim().is_empty()) {
        params.push(("ctz", zone.to_string()));
    }
    Url::parse_with_params(GOOGLE_CALENDAR_EDIT_URL, &params)
        .context("failed to build Google Calendar URL")
}
