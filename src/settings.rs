use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const GOOGLE_CALENDAR_ENV: &str = "USE_GOOGLE_CALENDAR";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarPreference {
    #[default]
    Apple,
    Google,
}

impl CalendarPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarPreference::Apple => "apple",
            CalendarPreference::Google => "google",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            CalendarPreference::Apple => CalendarPreference::Google,
            CalendarPreference::Google => CalendarPreference::Apple,
        }
    }
}

impl fmt::Display for CalendarPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalendarPreference {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "apple" => Ok(CalendarPreference::Apple),
            "google" => Ok(CalendarPreference::Google),
            other => bail!("invalid calendar preference '{other}' (expected apple or google)"),
        }
    }
}

/// Timings for the on-screen notification lifecycle, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Minimum time the capture acknowledgment stays up before "Analyzing…" replaces it.
    pub capture_dwell_ms: u64,
    pub no_event_timeout_ms: u64,
    pub calendar_opening_timeout_ms: u64,
    pub fade_in_ms: u64,
    pub fade_out_ms: u64,
    pub reset_fade_out_ms: u64,
    pub calendar_open_delay_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capture_dwell_ms: 1_500,
            no_event_timeout_ms: 2_500,
            calendar_opening_timeout_ms: 2_500,
            fade_in_ms: 180,
            fade_out_ms: 250,
            reset_fade_out_ms: 40,
            calendar_open_delay_ms: 2_000,
        }
    }
}

impl NotificationConfig {
    pub fn capture_dwell(&self) -> Duration {
        Duration::from_millis(self.capture_dwell_ms)
    }

    pub fn no_event_timeout(&self) -> Duration {
        Duration::from_millis(self.no_event_timeout_ms)
    }

    pub fn calendar_opening_timeout(&self) -> Duration {
        Duration::from_millis(self.calendar_opening_timeout_ms)
    }

    pub fn fade_in(&self) -> Duration {
        Duration::from_millis(self.fade_in_ms)
    }

    pub fn fade_out(&self) -> Duration {
        Duration::from_millis(self.fade_out_ms)
    }

    pub fn reset_fade_out(&self) -> Duration {
        Duration::from_millis(self.reset_fade_out_ms)
    }

    pub fn calendar_open_delay(&self) -> Duration {
        Duration::from_millis(self.calendar_open_delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub preferred_calendar: CalendarPreference,
    pub notifications: NotificationConfig,
}

impl Settings {
    /// The calendar to use, honouring the `USE_GOOGLE_CALENDAR` override.
    pub fn effective_calendar(&self) -> CalendarPreference {
        match std::env::var(GOOGLE_CALENDAR_ENV) {
            Ok(value) if env_flag_enabled(&value) => CalendarPreference::Google,
            _ => self.preferred_calendar,
        }
    }
}

pub(crate) fn env_flag_enabled(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: unreadable or invalid files fall back to defaults.
    pub fn load(&self) -> Settings {
        if !self.path.exists() {
            info!(path = %self.path.display(), "settings file not found, using defaults");
            return Settings::default();
        }

        match self.try_load() {
            Ok(settings) => settings,
            Err(err) => {
                warn!(path = %self.path.display(), "failed to read settings: {err:#}");
                Settings::default()
            }
        }
    }

    fn try_load(&self) -> Result<Settings> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", self.path.display()))
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory {}", parent.display())
            })?;
        }

        let body = toml::to_string_pretty(settings).context("failed to serialize settings")?;
        std::fs::write(&self.path, body)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    pub fn set_preferred_calendar(&self, preference: CalendarPreference) -> Result<Settings> {
        let mut settings = self.load();
        settings.preferred_calendar = preference;
        self.save(&settings)?;
        info!(calendar = %preference, "saved preferred calendar");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::{CalendarPreference, NotificationConfig, Settings, SettingsStore};
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempdir().expect("tempdir");
        let store = SettingsStore::new(temp.path().join("settings.toml"));
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        std::fs::write(&path, "preferred_calendar = 42").expect("write");
        assert_eq!(SettingsStore::new(&path).load(), Settings::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        std::fs::write(
            &path,
            "preferred_calendar = \"google\"\n[notifications]\ncapture_dwell_ms = 900\nunknown = 1\n",
        )
        .expect("write");

        let settings = SettingsStore::new(&path).load();
        assert_eq!(settings.preferred_calendar, CalendarPreference::Google);
        assert_eq!(settings.notifications.capture_dwell_ms, 900);
        assert_eq!(
            settings.notifications.fade_out_ms,
            NotificationConfig::default().fade_out_ms
        );
    }

    #[test]
    fn set_preferred_calendar_persists() {
        let temp = tempdir().expect("tempdir");
        let store = SettingsStore::new(temp.path().join("nested").join("settings.toml"));
        store
            .set_preferred_calendar(CalendarPreference::Google)
            .expect("save succeeds");
        assert_eq!(store.load().preferred_calendar, CalendarPreference::Google);
    }

    #[test]
    fn parses_preference_names() {
        assert_eq!(
            " Google ".parse::<CalendarPreference>().expect("valid"),
            CalendarPreference::Google
        );
        assert!("outlook".parse::<CalendarPreference>().is_err());
        assert_eq!(
            CalendarPreference::Apple.toggled(),
            CalendarPreference::Google
        );
    }
}
