use crate::calendar::CalendarConnector;
use crate::capture::{CaptureContext, ScreenCapturer};
use crate::event::{NormalizedEvent, normalize};
use crate::notify::Notifier;
use crate::notify::state::{MESSAGE_CALENDAR_FAILED, MESSAGE_PROCESSING_ERROR};
use crate::settings::CalendarPreference;
use crate::vision::EventExtractor;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const CALENDAR_FAILED_TIMEOUT: Duration = Duration::from_millis(2500);
const PROCESSING_ERROR_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Nothing was shown to the user.
    CaptureFailed(String),
    NoEvent,
    Created {
        event: NormalizedEvent,
        ics_path: Option<PathBuf>,
    },
    CalendarFailed(String),
    Failed(String),
}

impl PipelineOutcome {
    pub fn summary(&self) -> String {
        match self {
            PipelineOutcome::CaptureFailed(reason) => format!("capture failed: {reason}"),
            PipelineOutcome::NoEvent => "no event detected".to_string(),
            PipelineOutcome::Created { event, ics_path } => match ics_path {
                Some(path) => format!("created '{}' at {}", event.title, path.display()),
                None => format!("created '{}' in Google Calendar", event.title),
            },
            PipelineOutcome::CalendarFailed(reason) => format!("calendar failed: {reason}"),
            PipelineOutcome::Failed(reason) => format!("processing failed: {reason}"),
        }
    }
}

/// Screen capture through to an opened calendar entry, reporting each
/// milestone to the notifier.
pub struct CapturePipeline {
    capturer: Arc<dyn ScreenCapturer>,
    extractor: Arc<dyn EventExtractor>,
    calendar: CalendarConnector,
    notifier: Notifier,
    captures_dir: PathBuf,
}

impl CapturePipeline {
    pub fn new(
        capturer: Arc<dyn ScreenCapturer>,
        extractor: Arc<dyn EventExtractor>,
        calendar: CalendarConnector,
        notifier: Notifier,
        captures_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            capturer,
            extractor,
            calendar,
            notifier,
            captures_dir: captures_dir.into(),
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub async fn run(&self, preference: CalendarPreference) -> PipelineOutcome {
        let (image_path, context) = match self.capture().await {
            Ok(captured) => captured,
            Err(err) => {
                warn!(stage = "capture", "{err:#}");
                return PipelineOutcome::CaptureFailed(format!("{err:#}"));
            }
        };
        self.notifier.on_capture_complete();

        match self.process(&image_path, &context, preference).await {
            Ok(outcome) => {
                info!(stage = "pipeline", outcome = %outcome.summary(), "capture processed");
                outcome
            }
            Err(err) => {
                warn!(stage = "pipeline", "{err:#}");
                self.notifier.on_llm_complete(false);
                self.notifier
                    .update(MESSAGE_PROCESSING_ERROR, Some(PROCESSING_ERROR_TIMEOUT));
                PipelineOutcome::Failed(format!("{err:#}"))
            }
        }
    }

    async fn capture(&self) -> Result<(PathBuf, CaptureContext)> {
        std::fs::create_dir_all(&self.captures_dir).with_context(|| {
            format!(
                "failed to create captures directory {}",
                self.captures_dir.display()
            )
        })?;
        let path = self
            .captures_dir
            .join(format!("capture_{}.png", Utc::now().format("%Y%m%d_%H%M%S_%3f")));
        let context = self.capturer.capture(&path).await?;
        Ok((path, context))
    }

    async fn process(
        &self,
        image_path: &Path,
        context: &CaptureContext,
        preference: CalendarPreference,
    ) -> Result<PipelineOutcome> {
        self.notifier.on_llm_processing_start();

        let Some(raw) = self.extractor.extract_event(image_path, context).await? else {
            self.notifier.on_llm_complete(false);
            return Ok(PipelineOutcome::NoEvent);
        };
        let Some(event) = normalize(&raw) else {
            self.notifier.on_llm_complete(false);
            return Ok(PipelineOutcome::NoEvent);
        };
        self.notifier.on_llm_complete(true);

        match self
            .calendar
            .create_calendar_event(&event, preference, &self.notifier)
        {
            Ok(ics_path) => Ok(PipelineOutcome::Created { event, ics_path }),
            Err(err) => {
                warn!(stage = "calendar", "{err:#}");
                self.notifier
                    .update(MESSAGE_CALENDAR_FAILED, Some(CALENDAR_FAILED_TIMEOUT));
                Ok(PipelineOutcome::CalendarFailed(format!("{err:#}")))
            }
        }
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("calendar", &self.calendar)
            .field("captures_dir", &self.captures_dir)
            .finish()
    }
}
