use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info};

pub type SurfaceId = u64;

const LAYOUT_COLUMNS: usize = 36;

/// Message text broken into centred lines for a fixed-width overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLayout {
    pub lines: Vec<String>,
    pub columns: usize,
}

impl MessageLayout {
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Word-wraps `message` to `columns` and pads every line so it sits centred.
/// Words longer than a line are split.
pub fn layout_message(message: &str, columns: usize) -> MessageLayout {
    let columns = columns.max(1);
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in message.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > columns {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(columns);
            lines.push(word.into_iter().collect());
            word = rest;
        }

        let word: String = word.into_iter().collect();
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > columns && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }

    let lines = lines
        .into_iter()
        .map(|line| {
            let width = line.chars().count();
            let left = (columns.saturating_sub(width)) / 2;
            let right = columns.saturating_sub(width) - left;
            format!("{}{}{}", " ".repeat(left), line, " ".repeat(right))
        })
        .collect();

    MessageLayout { lines, columns }
}

/// Rendering port of one on-screen overlay. Implementations are tied to the UI
/// thread and are never required to be `Send`.
pub trait OverlayBackend {
    /// Puts the overlay on screen, fully transparent.
    fn show(&mut self, layout: &MessageLayout);
    fn set_layout(&mut self, layout: &MessageLayout);
    fn animate_alpha(&mut self, target: f32, duration: Duration);
    fn close(&mut self);
}

pub trait SurfaceFactory {
    fn create(&mut self, id: SurfaceId, title: &str) -> Result<Box<dyn OverlayBackend>>;
}

/// One notification instance on screen.
///
/// `active` starts true and flips to false exactly once, at the start of
/// teardown. Every later teardown attempt is a no-op.
pub struct Surface {
    id: SurfaceId,
    title: String,
    message: String,
    active: bool,
    backend: Box<dyn OverlayBackend>,
}

impl Surface {
    pub fn create(
        factory: &mut dyn SurfaceFactory,
        id: SurfaceId,
        title: &str,
        message: &str,
    ) -> Result<Self> {
        let mut backend = factory.create(id, title)?;
        backend.show(&layout_message(message, LAYOUT_COLUMNS));
        debug!(stage = "notify", surface = id, "overlay created");
        Ok(Self {
            id,
            title: title.to_string(),
            message: message.to_string(),
            active: true,
            backend,
        })
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn fade_in(&mut self, duration: Duration) {
        self.backend.animate_alpha(1.0, duration);
    }

    /// Re-lays out the overlay for the new text. Ignored once teardown started.
    pub fn update_text(&mut self, message: &str) -> bool {
        if !self.active {
            debug!(stage = "notify", surface = self.id, "text update on inactive overlay ignored");
            return false;
        }
        self.message = message.to_string();
        self.backend
            .set_layout(&layout_message(message, LAYOUT_COLUMNS));
        true
    }

    /// Marks the surface inactive and starts the fade-out animation.
    /// Returns `false` when another path already began tearing it down.
    pub fn begin_teardown(&mut self, fade_out: Duration) -> bool {
        if !self.active {
            info!(stage = "notify", surface = self.id, "teardown already in progress");
            return false;
        }
        self.active = false;
        self.backend.animate_alpha(0.0, fade_out);
        true
    }

    pub fn destroy(mut self) {
        self.active = false;
        self.backend.close();
        debug!(stage = "notify", surface = self.id, "overlay closed");
    }

    /// Drops the reference without calling into the backend. The toolkit may
    /// already be torn down at this point, so its drop glue must not run either.
    pub fn release(self) {
        debug!(stage = "notify", surface = self.id, "overlay released without teardown");
        std::mem::forget(self.backend);
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("message", &self.message)
            .field("active", &self.active)
            .finish()
    }
}

/// Overlay for hosts without a windowing toolkit: every lifecycle step is logged.
#[derive(Debug)]
pub struct LogOverlay {
    id: SurfaceId,
    title: String,
}

impl OverlayBackend for LogOverlay {
    fn show(&mut self, layout: &MessageLayout) {
        info!(stage = "overlay", surface = self.id, title = %self.title, "show: {}", layout.text());
    }

    fn set_layout(&mut self, layout: &MessageLayout) {
        info!(stage = "overlay", surface = self.id, "update: {}", layout.text());
    }

    fn animate_alpha(&mut self, target: f32, duration: Duration) {
        debug!(
            stage = "overlay",
            surface = self.id,
            alpha = target,
            duration_ms = duration.as_millis() as u64,
            "fade"
        );
    }

    fn close(&mut self) {
        info!(stage = "overlay", surface = self.id, "close");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogOverlayFactory;

impl SurfaceFactory for LogOverlayFactory {
    fn create(&mut self, id: SurfaceId, title: &str) -> Result<Box<dyn OverlayBackend>> {
        Ok(Box::new(LogOverlay {
            id,
            title: title.to_string(),
        }))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{MessageLayout, OverlayBackend, SurfaceFactory, SurfaceId};
    use anyhow::{Result, bail};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    pub enum OverlayEvent {
        Shown { id: SurfaceId, text: String },
        Updated { id: SurfaceId, text: String },
        Alpha { id: SurfaceId, target: f32 },
        Closed { id: SurfaceId },
        Dropped { id: SurfaceId },
    }

    #[derive(Debug, Clone, Default)]
    pub struct OverlayLog(Arc<Mutex<Vec<OverlayEvent>>>);

    impl OverlayLog {
        pub fn push(&self, event: OverlayEvent) {
            self.0.lock().expect("overlay log").push(event);
        }

        pub fn events(&self) -> Vec<OverlayEvent> {
            self.0.lock().expect("overlay log").clone()
        }

        pub fn shown(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, OverlayEvent::Shown { .. }))
                .count()
        }

        pub fn closed(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, OverlayEvent::Closed { .. }))
                .count()
        }

        pub fn last_text(&self) -> Option<String> {
            self.events().into_iter().rev().find_map(|event| match event {
                OverlayEvent::Shown { text, .. } | OverlayEvent::Updated { text, .. } => {
                    Some(text)
                }
                _ => None,
            })
        }
    }

    struct RecordingOverlay {
        id: SurfaceId,
        log: OverlayLog,
    }

    impl OverlayBackend for RecordingOverlay {
        fn show(&mut self, layout: &MessageLayout) {
            self.log.push(OverlayEvent::Shown {
                id: self.id,
                text: layout.text(),
            });
        }

        fn set_layout(&mut self, layout: &MessageLayout) {
            self.log.push(OverlayEvent::Updated {
                id: self.id,
                text: layout.text(),
            });
        }

        fn animate_alpha(&mut self, target: f32, _duration: Duration) {
            self.log.push(OverlayEvent::Alpha {
                id: self.id,
                target,
            });
        }

        fn close(&mut self) {
            self.log.push(OverlayEvent::Closed { id: self.id });
        }
    }

    impl Drop for RecordingOverlay {
        fn drop(&mut self) {
            self.log.push(OverlayEvent::Dropped { id: self.id });
        }
    }

    #[derive(Debug, Clone, Default)]
    pub struct RecordingFactory {
        pub log: OverlayLog,
        pub fail: bool,
    }

    impl SurfaceFactory for RecordingFactory {
        fn create(&mut self, id: SurfaceId, _title: &str) -> Result<Box<dyn OverlayBackend>> {
            if self.fail {
                bail!("overlay unavailable");
            }
            Ok(Box::new(RecordingOverlay {
                id,
                log: self.log.clone(),
            }))
        }
    }
}
