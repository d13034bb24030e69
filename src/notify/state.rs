use crate::settings::NotificationConfig;
use std::fmt;
use std::time::Duration;

pub const APP_TITLE: &str = "ScreenCal";

pub const MESSAGE_SCREEN_CAPTURED: &str = "Screen captured, passing information to LLM";
pub const MESSAGE_ANALYZING: &str = "Analyzing…";
pub const MESSAGE_EVENT_DETECTED: &str = "Event detected, creating appointment";
pub const MESSAGE_NO_EVENT: &str = "No event detected";
pub const MESSAGE_CALENDAR_OPENING: &str = "Opening calendar";
pub const MESSAGE_CALENDAR_FAILED: &str = "Unable to open calendar event";
pub const MESSAGE_PROCESSING_ERROR: &str = "An error occurred while processing";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NotificationState {
    #[default]
    Idle,
    ScreenCaptured,
    ProcessingLlm,
    EventDetected,
    NoEvent,
}

impl fmt::Display for NotificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationState::Idle => "idle",
            NotificationState::ScreenCaptured => "screen_captured",
            NotificationState::ProcessingLlm => "processing_llm",
            NotificationState::EventDetected => "event_detected",
            NotificationState::NoEvent => "no_event",
        };
        f.write_str(name)
    }
}

/// How long a notification stays up before fading out on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeTimeout {
    /// Stays visible until replaced or reset.
    Sticky,
    After(Duration),
}

impl FadeTimeout {
    pub fn is_sticky(&self) -> bool {
        matches!(self, FadeTimeout::Sticky)
    }
}

impl From<Option<Duration>> for FadeTimeout {
    fn from(value: Option<Duration>) -> Self {
        match value {
            Some(timeout) => FadeTimeout::After(timeout),
            None => FadeTimeout::Sticky,
        }
    }
}

/// A state change request. Only built through the named constructors below,
/// one per application milestone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    target: NotificationState,
    message: String,
    fade_timeout: FadeTimeout,
    arm_dwell: bool,
}

impl TransitionRequest {
    pub(crate) fn capture_complete() -> Self {
        Self {
            target: NotificationState::ScreenCaptured,
            message: MESSAGE_SCREEN_CAPTURED.to_string(),
            fade_timeout: FadeTimeout::Sticky,
            arm_dwell: true,
        }
    }

    pub(crate) fn processing_llm() -> Self {
        Self {
            target: NotificationState::ProcessingLlm,
            message: MESSAGE_ANALYZING.to_string(),
            fade_timeout: FadeTimeout::Sticky,
            arm_dwell: false,
        }
    }

    pub(crate) fn llm_complete(found: bool, config: &NotificationConfig) -> Self {
        if found {
            Self {
                target: NotificationState::EventDetected,
                message: MESSAGE_EVENT_DETECTED.to_string(),
                fade_timeout: FadeTimeout::Sticky,
                arm_dwell: false,
            }
        } else {
            Self {
                target: NotificationState::NoEvent,
                message: MESSAGE_NO_EVENT.to_string(),
                fade_timeout: FadeTimeout::After(config.no_event_timeout()),
                arm_dwell: false,
            }
        }
    }

    pub(crate) fn calendar_opening(config: &NotificationConfig) -> Self {
        Self {
            target: NotificationState::EventDetected,
            message: MESSAGE_CALENDAR_OPENING.to_string(),
            fade_timeout: FadeTimeout::After(config.calendar_opening_timeout()),
            arm_dwell: false,
        }
    }

    pub fn target(&self) -> NotificationState {
        self.target
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn fade_timeout(&self) -> FadeTimeout {
        self.fade_timeout
    }

    pub fn arms_dwell(&self) -> bool {
        self.arm_dwell
    }
}
