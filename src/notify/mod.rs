//! On-screen status notifications.
//!
//! Any thread may raise a milestone through [`Notifier`]; the work is marshaled
//! onto the single UI thread that owns every surface. See [`machine`] for the
//! transition rules.

pub mod banner;
pub mod executor;
pub mod gate;
pub mod host;
pub mod machine;
pub mod queue;
pub mod run_loop;
pub mod state;
pub mod surface;
pub mod timer;

use crate::notify::banner::post_banner;
use crate::notify::executor::{MainThreadExecutor, UiCommand};
use crate::notify::gate::ShutdownGate;
use crate::notify::host::NotificationHost;
use crate::notify::machine::{MachineSnapshot, NotificationStateMachine};
use crate::notify::queue::PendingNotification;
use crate::notify::run_loop::UiRunLoop;
use crate::notify::state::TransitionRequest;
use crate::notify::surface::SurfaceFactory;
use crate::notify::timer::DwellTimer;
use crate::settings::NotificationConfig;
use anyhow::Result;
use std::sync::{Arc, mpsc};
use std::time::Duration;
use tracing::debug;

enum Mode {
    Interactive {
        executor: MainThreadExecutor,
        dwell: Arc<DwellTimer>,
    },
    /// No UI toolkit: every notification becomes a one-shot banner.
    Headless,
}

struct Inner {
    mode: Mode,
    gate: ShutdownGate,
    config: NotificationConfig,
}

/// Cloneable, thread-safe entry point to the notification subsystem.
///
/// Entry points never block and never fail towards the caller; they return
/// whether the request reached the UI thread (or a banner was posted).
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    /// Builds a notifier for an executor the caller wires to its own UI loop.
    /// The executor must share `gate`.
    pub fn interactive(
        config: NotificationConfig,
        executor: MainThreadExecutor,
        gate: ShutdownGate,
    ) -> Result<Self> {
        let dwell = Arc::new(DwellTimer::new()?);
        Ok(Self {
            inner: Arc::new(Inner {
                mode: Mode::Interactive { executor, dwell },
                gate,
                config,
            }),
        })
    }

    pub fn headless(config: NotificationConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                mode: Mode::Headless,
                gate: ShutdownGate::new(),
                config,
            }),
        }
    }

    /// Starts a dedicated UI thread hosting surfaces from `make_factory`.
    pub fn spawn<F>(config: NotificationConfig, make_factory: F) -> Result<(Self, UiRunLoop)>
    where
        F: FnOnce() -> Box<dyn SurfaceFactory> + Send + 'static,
    {
        let gate = ShutdownGate::new();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let executor = MainThreadExecutor::new(gate.clone()).with_primary(Arc::new(tx));
        let notifier = Self::interactive(config, executor, gate)?;
        let run_loop = UiRunLoop::spawn(notifier.clone(), rx, make_factory)?;
        Ok((notifier, run_loop))
    }

    /// Binds the calling thread as the UI thread and builds the host it must
    /// install. `None` for a headless notifier.
    pub fn build_host(&self, factory: Box<dyn SurfaceFactory>) -> Option<NotificationHost> {
        let Mode::Interactive { executor, dwell } = &self.inner.mode else {
            return None;
        };
        executor.bind_current_thread();
        let machine = NotificationStateMachine::new(
            self.inner.config.clone(),
            factory,
            dwell.clone(),
            executor.clone(),
            self.inner.gate.clone(),
        );
        Some(NotificationHost::new(machine))
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.inner.config
    }

    pub fn gate(&self) -> ShutdownGate {
        self.inner.gate.clone()
    }

    pub fn is_headless(&self) -> bool {
        matches!(self.inner.mode, Mode::Headless)
    }

    pub fn on_capture_complete(&self) -> bool {
        self.dispatch(UiCommand::Transition(TransitionRequest::capture_complete()))
    }

    pub fn on_llm_processing_start(&self) -> bool {
        self.dispatch(UiCommand::LlmProcessingStart)
    }

    pub fn on_llm_complete(&self, found: bool) -> bool {
        self.dispatch(UiCommand::Transition(TransitionRequest::llm_complete(
            found,
            &self.inner.config,
        )))
    }

    pub fn on_calendar_opening(&self) -> bool {
        self.dispatch(UiCommand::Transition(TransitionRequest::calendar_opening(
            &self.inner.config,
        )))
    }

    /// Replaces the visible text, or shows a fresh notification. `None` keeps
    /// it up until something else replaces it.
    pub fn update(&self, message: &str, timeout: Option<Duration>) -> bool {
        self.dispatch(UiCommand::Update {
            message: message.to_string(),
            timeout: timeout.into(),
        })
    }

    /// Queues a one-shot notification behind the visible one.
    pub fn show(&self, title: &str, message: &str, timeout: Duration) -> bool {
        self.dispatch(UiCommand::Show(PendingNotification {
            title: title.to_string(),
            message: message.to_string(),
            timeout,
        }))
    }

    pub fn reset(&self) -> bool {
        self.dispatch(UiCommand::Reset)
    }

    /// Engages the shutdown gate, cancels the dwell countdown and has the UI
    /// thread forget its surfaces. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.inner.gate.engage() {
            return;
        }
        if let Mode::Interactive { executor, dwell } = &self.inner.mode {
            dwell.cancel();
            executor.run_on_main(UiCommand::Release);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.gate.is_engaged()
    }

    /// Asks the UI thread for a snapshot. Returns `None` when headless, when
    /// the UI thread does not answer in time, or when called while the UI
    /// thread is itself handling a command.
    pub fn inspect(&self, timeout: Duration) -> Option<MachineSnapshot> {
        let Mode::Interactive { executor, .. } = &self.inner.mode else {
            return None;
        };
        let (tx, rx) = mpsc::channel();
        if !executor.run_on_main(UiCommand::Inspect(tx)).delivered() {
            return None;
        }
        rx.recv_timeout(timeout).ok()
    }

    fn dispatch(&self, command: UiCommand) -> bool {
        if self.inner.gate.is_engaged() {
            debug!(stage = "notify", ?command, "notifier shut down, request ignored");
            return false;
        }
        match &self.inner.mode {
            Mode::Interactive { executor, .. } => executor.run_on_main(command).delivered(),
            Mode::Headless => match command.banner() {
                Some((title, message)) => post_banner(title, message),
                None => false,
            },
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("headless", &self.is_headless())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Notifier;
    use crate::notify::state::{
        MESSAGE_CALENDAR_OPENING, MESSAGE_EVENT_DETECTED, MESSAGE_NO_EVENT, NotificationState,
    };
    use crate::notify::surface::SurfaceFactory;
    use crate::notify::surface::testing::{OverlayLog, RecordingFactory};
    use crate::settings::NotificationConfig;
    use std::thread;
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_config() -> NotificationConfig {
        NotificationConfig {
            capture_dwell_ms: 60,
            no_event_timeout_ms: 80,
            calendar_opening_timeout_ms: 80,
            fade_in_ms: 5,
            fade_out_ms: 20,
            reset_fade_out_ms: 5,
            calendar_open_delay_ms: 10,
        }
    }

    fn spawn_recording() -> (Notifier, super::UiRunLoop, OverlayLog) {
        let factory = RecordingFactory::default();
        let log = factory.log.clone();
        let (notifier, run_loop) = Notifier::spawn(fast_config(), move || {
            Box::new(factory) as Box<dyn SurfaceFactory>
        })
        .expect("spawn notifier");
        (notifier, run_loop, log)
    }

    fn wait_for(notifier: &Notifier, done: impl Fn(&super::MachineSnapshot) -> bool) -> super::MachineSnapshot {
        let deadline = Instant::now() + WAIT;
        loop {
            let snapshot = notifier.inspect(WAIT).expect("snapshot");
            if done(&snapshot) || Instant::now() > deadline {
                return snapshot;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn found_event_survives_dwell_and_stays_sticky() {
        let (notifier, _run_loop, log) = spawn_recording();
        assert!(notifier.on_capture_complete());
        assert!(notifier.on_llm_complete(true));

        // Well past the dwell: the dwell expiry must not override the result.
        thread::sleep(Duration::from_millis(200));
        let snapshot = notifier.inspect(WAIT).expect("snapshot");
        assert_eq!(snapshot.state, NotificationState::EventDetected);
        assert_eq!(snapshot.message.as_deref(), Some(MESSAGE_EVENT_DETECTED));
        assert!(!snapshot.fade_armed);
        assert_eq!(log.shown(), 1);

        assert!(notifier.on_calendar_opening());
        let snapshot = notifier.inspect(WAIT).expect("snapshot");
        assert_eq!(snapshot.message.as_deref(), Some(MESSAGE_CALENDAR_OPENING));

        let snapshot = wait_for(&notifier, |s| s.active_surface.is_none());
        assert_eq!(snapshot.state, NotificationState::Idle);
        assert_eq!(log.closed(), 1);
    }

    #[test]
    fn no_event_fades_out_on_its_own() {
        let (notifier, _run_loop, log) = spawn_recording();
        notifier.on_capture_complete();
        notifier.on_llm_complete(false);

        let snapshot = notifier.inspect(WAIT).expect("snapshot");
        assert_eq!(snapshot.state, NotificationState::NoEvent);
        assert_eq!(snapshot.message.as_deref(), Some(MESSAGE_NO_EVENT));

        let snapshot = wait_for(&notifier, |s| s.state == NotificationState::Idle);
        assert_eq!(snapshot.state, NotificationState::Idle);
        assert_eq!(snapshot.active_surface, None);
        assert_eq!(log.closed(), 1);
    }

    #[test]
    fn dwell_promotes_capture_to_analyzing() {
        let (notifier, _run_loop, _log) = spawn_recording();
        notifier.on_capture_complete();
        notifier.on_llm_processing_start();
        assert_eq!(
            notifier.inspect(WAIT).expect("snapshot").state,
            NotificationState::ScreenCaptured
        );

        let snapshot = wait_for(&notifier, |s| s.state == NotificationState::ProcessingLlm);
        assert_eq!(snapshot.state, NotificationState::ProcessingLlm);
    }

    #[test]
    fn concurrent_callers_never_show_two_notifications() {
        let (notifier, _run_loop, log) = spawn_recording();
        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let notifier = notifier.clone();
                thread::spawn(move || {
                    for step in 0..25 {
                        match (worker + step) % 5 {
                            0 => notifier.on_capture_complete(),
                            1 => notifier.on_llm_complete(step % 2 == 0),
                            2 => notifier.update("working", Some(Duration::from_millis(3))),
                            3 => notifier.reset(),
                            _ => notifier.on_calendar_opening(),
                        };
                    }
                })
            })
            .collect();

        let mut samples = 0;
        while workers.iter().any(|w| !w.is_finished()) {
            let snapshot = notifier.inspect(WAIT).expect("snapshot");
            assert!(snapshot.visible <= 1);
            samples += 1;
        }
        for worker in workers {
            worker.join().expect("worker");
        }
        assert!(samples > 0);
        assert!(notifier.inspect(WAIT).expect("snapshot").visible <= 1);
        assert!(log.shown() >= 1);
    }

    #[test]
    fn shutdown_turns_every_entry_point_into_a_no_op() {
        let (notifier, run_loop, log) = spawn_recording();
        notifier.on_capture_complete();
        notifier.inspect(WAIT).expect("snapshot");

        notifier.shutdown();
        notifier.shutdown();
        assert!(notifier.is_shut_down());

        let remote = notifier.clone();
        let results = thread::spawn(move || {
            [
                remote.on_capture_complete(),
                remote.on_llm_processing_start(),
                remote.on_llm_complete(true),
                remote.on_calendar_opening(),
                remote.update("late", None),
                remote.show("ScreenCal", "late", Duration::from_secs(1)),
                remote.reset(),
            ]
        })
        .join()
        .expect("caller thread");
        assert!(results.iter().all(|delivered| !delivered));

        let snapshot = notifier.inspect(WAIT).expect("snapshot");
        assert_eq!(snapshot.active_surface, None);
        assert_eq!(snapshot.surfaces_created, 1);
        assert!(!snapshot.dwell_armed);
        assert!(!snapshot.fade_armed);

        thread::sleep(Duration::from_millis(150));
        drop(run_loop);
        assert_eq!(log.shown(), 1);
        assert_eq!(log.closed(), 0);
    }

    #[test]
    fn unbounded_update_timeout_keeps_ui_thread_alive() {
        let (notifier, _run_loop, log) = spawn_recording();
        assert!(notifier.update("hello", Some(Duration::MAX)));

        let snapshot = notifier.inspect(WAIT).expect("UI thread still answering");
        assert_eq!(snapshot.message.as_deref(), Some("hello"));
        assert!(!snapshot.fade_armed);

        assert!(notifier.on_llm_complete(false));
        let snapshot = notifier.inspect(WAIT).expect("snapshot");
        assert_eq!(snapshot.message.as_deref(), Some(MESSAGE_NO_EVENT));
        assert_eq!(log.shown(), 1);
    }

    #[test]
    fn headless_notifier_has_no_ui_thread() {
        let notifier = Notifier::headless(NotificationConfig::default());
        assert!(notifier.is_headless());
        assert!(!notifier.reset());
        assert!(notifier.inspect(Duration::from_millis(10)).is_none());
        assert!(
            notifier
                .build_host(Box::new(RecordingFactory::default()))
                .is_none()
        );
        notifier.shutdown();
        assert!(!notifier.update("ignored", None));
    }
}
