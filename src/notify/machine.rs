use crate::notify::banner::post_banner;
use crate::notify::executor::{MainThreadExecutor, UiCommand};
use crate::notify::gate::ShutdownGate;
use crate::notify::queue::{PendingNotification, PendingQueue};
use crate::notify::state::{APP_TITLE, FadeTimeout, NotificationState, TransitionRequest};
use crate::notify::surface::{Surface, SurfaceFactory, SurfaceId};
use crate::notify::timer::{DwellTimer, FadeTimer, UiTimer, UiTimerQueue};
use crate::settings::NotificationConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The notification currently owning the screen.
struct ActiveNotification {
    surface: Surface,
    state: NotificationState,
    state_entered_at: Instant,
    fade_timer: FadeTimer,
}

/// Point-in-time view of the machine, for tests and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSnapshot {
    pub state: NotificationState,
    pub active_surface: Option<SurfaceId>,
    pub message: Option<String>,
    /// Surfaces on screen that still accept updates. Never more than one.
    pub visible: usize,
    pub fade_armed: bool,
    pub dwell_armed: bool,
    pub pending: usize,
    pub retiring: usize,
    pub surfaces_created: usize,
}

/// Owns the notification state and every surface. Lives on the UI thread and
/// is only driven through [`UiCommand`]s and UI timer expiries.
pub struct NotificationStateMachine {
    config: NotificationConfig,
    state: NotificationState,
    state_entered_at: Instant,
    active: Option<ActiveNotification>,
    retiring: Vec<Surface>,
    pending: PendingQueue,
    factory: Box<dyn SurfaceFactory>,
    dwell: Arc<DwellTimer>,
    dwell_generation: Option<u64>,
    executor: MainThreadExecutor,
    gate: ShutdownGate,
    next_surface_id: SurfaceId,
    surfaces_created: usize,
}

impl NotificationStateMachine {
    pub fn new(
        config: NotificationConfig,
        factory: Box<dyn SurfaceFactory>,
        dwell: Arc<DwellTimer>,
        executor: MainThreadExecutor,
        gate: ShutdownGate,
    ) -> Self {
        Self {
            config,
            state: NotificationState::Idle,
            state_entered_at: Instant::now(),
            active: None,
            retiring: Vec::new(),
            pending: PendingQueue::default(),
            factory,
            dwell,
            dwell_generation: None,
            executor,
            gate,
            next_surface_id: 0,
            surfaces_created: 0,
        }
    }

    pub fn state(&self) -> NotificationState {
        self.state
    }

    pub fn state_entered_at(&self) -> Instant {
        self.state_entered_at
    }

    pub fn handle(&mut self, command: UiCommand, timers: &mut UiTimerQueue) {
        if self.gate.is_engaged() && !command.survives_shutdown() {
            debug!(stage = "notify", ?command, "shutdown in progress, command ignored");
            return;
        }

        match command {
            UiCommand::Transition(request) => self.transition(request, timers),
            UiCommand::LlmProcessingStart => self.llm_processing_start(timers),
            UiCommand::Update { message, timeout } => self.update(&message, timeout, timers),
            UiCommand::Show(entry) => self.show(entry, timers),
            UiCommand::DwellElapsed { generation } => self.dwell_elapsed(generation, timers),
            UiCommand::Reset => self.reset(timers),
            UiCommand::Release => self.release(timers),
            UiCommand::Inspect(reply) => {
                let _ = reply.send(self.snapshot(timers));
            }
        }
    }

    pub fn on_ui_timer(&mut self, timer: UiTimer, timers: &mut UiTimerQueue) {
        if self.gate.is_engaged() {
            return;
        }
        match timer {
            UiTimer::FadeOut { surface } => {
                self.begin_fade_out(surface, self.config.fade_out(), timers)
            }
            UiTimer::FadeComplete { surface } => self.fade_complete(surface, timers),
        }
    }

    fn transition(&mut self, request: TransitionRequest, timers: &mut UiTimerQueue) {
        self.cancel_dwell();
        if request.arms_dwell() {
            self.arm_dwell();
        }
        self.enter(request.target());
        self.present_and_update(request.message(), request.fade_timeout(), timers);
    }

    fn llm_processing_start(&mut self, timers: &mut UiTimerQueue) {
        match self.state {
            NotificationState::Idle => self.transition(TransitionRequest::processing_llm(), timers),
            NotificationState::ScreenCaptured if self.dwell_generation.is_none() => {
                self.transition(TransitionRequest::processing_llm(), timers)
            }
            NotificationState::ScreenCaptured => {
                debug!(stage = "notify", "processing start deferred until capture dwell elapses")
            }
            state => debug!(stage = "notify", %state, "processing start ignored"),
        }
    }

    /// Updates the text in place and keeps the current state.
    fn update(&mut self, message: &str, timeout: FadeTimeout, timers: &mut UiTimerQueue) {
        self.cancel_dwell();
        self.present_and_update(message, timeout, timers);
    }

    fn show(&mut self, entry: PendingNotification, timers: &mut UiTimerQueue) {
        self.pending.push(entry);
        if self.active.is_some() {
            debug!(stage = "notify", pending = self.pending.len(), "notification queued");
        }
        self.dequeue_next(timers);
    }

    fn dwell_elapsed(&mut self, generation: u64, timers: &mut UiTimerQueue) {
        if self.dwell_generation != Some(generation) || !self.dwell.is_current(generation) {
            debug!(stage = "notify", generation, "stale dwell expiry ignored");
            return;
        }
        self.dwell_generation = None;

        if self.state != NotificationState::ScreenCaptured {
            debug!(stage = "notify", state = %self.state, "dwell elapsed after state moved on");
            return;
        }
        debug!(
            stage = "notify",
            shown_ms = self.state_entered_at.elapsed().as_millis() as u64,
            "capture message dwelled"
        );
        self.transition(TransitionRequest::processing_llm(), timers);
    }

    fn reset(&mut self, timers: &mut UiTimerQueue) {
        self.cancel_dwell();
        let dropped = self.pending.clear();
        if dropped > 0 {
            debug!(stage = "notify", dropped, "pending notifications dropped by reset");
        }
        self.enter(NotificationState::Idle);

        if let Some(surface) = self.active.as_ref().map(|active| active.surface.id()) {
            self.begin_fade_out(surface, self.config.reset_fade_out(), timers);
        }
    }

    /// Forgets every surface and timer without calling into the toolkit.
    fn release(&mut self, timers: &mut UiTimerQueue) {
        self.cancel_dwell();
        timers.clear();
        let mut released = 0;
        if let Some(active) = self.active.take() {
            active.surface.release();
            released += 1;
        }
        for surface in self.retiring.drain(..) {
            surface.release();
            released += 1;
        }
        self.pending.clear();
        self.state = NotificationState::Idle;
        info!(stage = "notify", released, "notification references released");
    }

    fn present_and_update(&mut self, message: &str, timeout: FadeTimeout, timers: &mut UiTimerQueue) {
        if let Some(active) = self.active.as_mut().filter(|a| a.surface.is_active()) {
            active.surface.update_text(message);
            active.state = self.state;
            active.state_entered_at = self.state_entered_at;
            match timeout {
                FadeTimeout::Sticky => {
                    active.fade_timer.cancel(timers);
                }
                FadeTimeout::After(delay) => {
                    let surface = active.surface.id();
                    if !active
                        .fade_timer
                        .start(timers, delay, UiTimer::FadeOut { surface })
                    {
                        warn!(stage = "notify", surface, ?delay, "fade timeout out of range, keeping notification up");
                    }
                }
            }
            debug!(stage = "notify", surface = active.surface.id(), "notification updated in place");
            return;
        }

        // A surface that is already fading keeps fading; the new one replaces it.
        if let Some(mut previous) = self.active.take() {
            previous.fade_timer.cancel(timers);
            self.retiring.push(previous.surface);
        }

        if !self.create_surface(APP_TITLE, message, timeout, timers) && !timeout.is_sticky() {
            self.enter(NotificationState::Idle);
            self.dequeue_next(timers);
        }
    }

    fn create_surface(
        &mut self,
        title: &str,
        message: &str,
        timeout: FadeTimeout,
        timers: &mut UiTimerQueue,
    ) -> bool {
        self.next_surface_id += 1;
        let id = self.next_surface_id;

        let mut surface = match Surface::create(self.factory.as_mut(), id, title, message) {
            Ok(surface) => surface,
            Err(err) => {
                warn!(stage = "notify", "failed to create overlay, falling back to banner: {err:#}");
                post_banner(title, message);
                return false;
            }
        };
        surface.fade_in(self.config.fade_in());
        self.surfaces_created += 1;

        let mut fade_timer = FadeTimer::default();
        if let FadeTimeout::After(delay) = timeout
            && !fade_timer.start(timers, delay, UiTimer::FadeOut { surface: id })
        {
            warn!(stage = "notify", surface = id, ?delay, "fade timeout out of range, keeping notification up");
        }
        info!(stage = "notify", surface = id, state = %self.state, "notification shown");

        self.active = Some(ActiveNotification {
            surface,
            state: self.state,
            state_entered_at: self.state_entered_at,
            fade_timer,
        });
        true
    }

    fn begin_fade_out(&mut self, surface: SurfaceId, duration: Duration, timers: &mut UiTimerQueue) {
        let Some(active) = self
            .active
            .as_mut()
            .filter(|active| active.surface.id() == surface)
        else {
            debug!(stage = "notify", surface, "stale fade-out ignored");
            return;
        };

        active.fade_timer.cancel(timers);
        if active.surface.begin_teardown(duration) {
            debug!(
                stage = "notify",
                surface,
                state = %active.state,
                shown_ms = active.state_entered_at.elapsed().as_millis() as u64,
                "fading out"
            );
            if timers
                .schedule(duration, UiTimer::FadeComplete { surface })
                .is_none()
            {
                warn!(stage = "notify", surface, ?duration, "fade-out duration out of range, closing now");
                self.fade_complete(surface, timers);
            }
        }
    }

    fn fade_complete(&mut self, surface: SurfaceId, timers: &mut UiTimerQueue) {
        if let Some(index) = self.retiring.iter().position(|s| s.id() == surface) {
            self.retiring.swap_remove(index).destroy();
            return;
        }

        match self.active.take() {
            Some(mut active) if active.surface.id() == surface => {
                active.fade_timer.cancel(timers);
                active.surface.destroy();
                self.cancel_dwell();
                self.enter(NotificationState::Idle);
                self.dequeue_next(timers);
            }
            other => {
                self.active = other;
                debug!(stage = "notify", surface, "stale fade completion ignored");
            }
        }
    }

    fn dequeue_next(&mut self, timers: &mut UiTimerQueue) {
        while self.active.is_none() {
            let Some(next) = self.pending.pop() else {
                break;
            };
            self.create_surface(
                &next.title,
                &next.message,
                FadeTimeout::After(next.timeout),
                timers,
            );
        }
    }

    fn enter(&mut self, state: NotificationState) {
        if state != self.state {
            info!(stage = "notify", from = %self.state, to = %state, "state change");
        }
        self.state = state;
        self.state_entered_at = Instant::now();
    }

    fn arm_dwell(&mut self) {
        let executor = self.executor.clone();
        let generation = self.dwell.start(self.config.capture_dwell(), move |generation| {
            executor.run_on_main(UiCommand::DwellElapsed { generation });
        });
        self.dwell_generation = Some(generation);
    }

    fn cancel_dwell(&mut self) {
        self.dwell_generation = None;
        self.dwell.cancel();
    }

    pub fn snapshot(&self, timers: &UiTimerQueue) -> MachineSnapshot {
        let active = self.active.as_ref();
        MachineSnapshot {
            state: self.state,
            active_surface: active.map(|a| a.surface.id()),
            message: active.map(|a| a.surface.message().to_string()),
            visible: active.filter(|a| a.surface.is_active()).map_or(0, |_| 1)
                + self.retiring.iter().filter(|s| s.is_active()).count(),
            fade_armed: active.is_some_and(|a| a.fade_timer.is_armed(timers)),
            dwell_armed: self.dwell_generation.is_some(),
            pending: self.pending.len(),
            retiring: self.retiring.len(),
            surfaces_created: self.surfaces_created,
        }
    }
}

impl std::fmt::Debug for NotificationStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationStateMachine")
            .field("state", &self.state)
            .field("active", &self.active.as_ref().map(|a| &a.surface))
            .field("retiring", &self.retiring.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::NotificationStateMachine;
    use crate::notify::executor::{MainThreadExecutor, UiCommand};
    use crate::notify::gate::ShutdownGate;
    use crate::notify::host::NotificationHost;
    use crate::notify::queue::PendingNotification;
    use crate::notify::state::{
        FadeTimeout, MESSAGE_ANALYZING, MESSAGE_CALENDAR_OPENING, MESSAGE_EVENT_DETECTED,
        MESSAGE_NO_EVENT, MESSAGE_SCREEN_CAPTURED, NotificationState, TransitionRequest,
    };
    use crate::notify::surface::testing::{OverlayEvent, OverlayLog, RecordingFactory};
    use crate::notify::timer::DwellTimer;
    use crate::settings::NotificationConfig;
    use std::sync::{Arc, mpsc};
    use std::time::{Duration, Instant};

    struct Harness {
        host: NotificationHost,
        log: OverlayLog,
        commands: mpsc::Receiver<UiCommand>,
        gate: ShutdownGate,
        config: NotificationConfig,
    }

    fn test_config() -> NotificationConfig {
        NotificationConfig {
            capture_dwell_ms: 40,
            ..NotificationConfig::default()
        }
    }

    fn harness_with(factory: RecordingFactory) -> Harness {
        let config = test_config();
        let gate = ShutdownGate::new();
        let (tx, rx) = mpsc::channel();
        let executor = MainThreadExecutor::new(gate.clone()).with_primary(Arc::new(tx));
        let log = factory.log.clone();
        let dwell = Arc::new(DwellTimer::new().expect("dwell timer"));
        let machine = NotificationStateMachine::new(
            config.clone(),
            Box::new(factory),
            dwell,
            executor,
            gate.clone(),
        );
        Harness {
            host: NotificationHost::new(machine),
            log,
            commands: rx,
            gate,
            config,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingFactory::default())
    }

    impl Harness {
        fn send(&mut self, command: UiCommand) {
            self.host.handle(command);
        }

        fn transition(&mut self, request: TransitionRequest) {
            self.send(UiCommand::Transition(request));
        }

        fn update(&mut self, message: &str, timeout: Option<Duration>) {
            self.send(UiCommand::Update {
                message: message.to_string(),
                timeout: timeout.into(),
            });
        }

        /// Waits for the dwell countdown to marshal its expiry and applies it.
        fn deliver_dwell(&mut self) {
            let command = self
                .commands
                .recv_timeout(Duration::from_secs(2))
                .expect("dwell expiry marshaled");
            assert!(matches!(command, UiCommand::DwellElapsed { .. }));
            self.send(command);
        }

        /// Runs every UI timer to completion, including ones scheduled by
        /// earlier expiries.
        fn settle(&mut self) {
            let horizon = Instant::now() + Duration::from_secs(3600);
            while self.host.next_deadline().is_some() {
                self.host.fire_due(horizon);
            }
        }

        fn state(&self) -> NotificationState {
            self.host.snapshot().state
        }
    }

    #[test]
    fn capture_message_dwells_then_advances_to_analyzing() {
        let mut h = harness();
        h.transition(TransitionRequest::capture_complete());

        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.state, NotificationState::ScreenCaptured);
        assert_eq!(snapshot.message.as_deref(), Some(MESSAGE_SCREEN_CAPTURED));
        assert!(snapshot.dwell_armed);
        assert!(!snapshot.fade_armed);

        h.deliver_dwell();
        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.state, NotificationState::ProcessingLlm);
        assert_eq!(snapshot.message.as_deref(), Some(MESSAGE_ANALYZING));
        assert!(!snapshot.fade_armed);
        assert_eq!(snapshot.surfaces_created, 1);
        assert_eq!(h.log.shown(), 1);
    }

    #[test]
    fn llm_result_before_dwell_suppresses_it() {
        let mut h = harness();
        h.transition(TransitionRequest::capture_complete());
        h.transition(TransitionRequest::llm_complete(false, &h.config));

        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.state, NotificationState::NoEvent);
        assert_eq!(snapshot.message.as_deref(), Some(MESSAGE_NO_EVENT));
        assert!(snapshot.fade_armed);
        assert!(!snapshot.dwell_armed);
        assert!(h.commands.recv_timeout(Duration::from_millis(200)).is_err());

        // A late expiry from the cancelled countdown changes nothing.
        h.send(UiCommand::DwellElapsed { generation: 1 });
        assert_eq!(h.state(), NotificationState::NoEvent);

        h.settle();
        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.state, NotificationState::Idle);
        assert_eq!(snapshot.active_surface, None);
        assert_eq!(h.log.closed(), 1);
    }

    #[test]
    fn found_event_stays_until_calendar_opens() {
        let mut h = harness();
        h.transition(TransitionRequest::capture_complete());
        h.transition(TransitionRequest::llm_complete(true, &h.config));

        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.state, NotificationState::EventDetected);
        assert_eq!(snapshot.message.as_deref(), Some(MESSAGE_EVENT_DETECTED));
        assert!(!snapshot.fade_armed);
        assert_eq!(h.host.next_deadline(), None);

        h.transition(TransitionRequest::calendar_opening(&h.config));
        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.message.as_deref(), Some(MESSAGE_CALENDAR_OPENING));
        assert!(snapshot.fade_armed);

        h.settle();
        assert_eq!(h.state(), NotificationState::Idle);
        assert_eq!(h.log.shown(), 1);
        assert_eq!(h.log.closed(), 1);
    }

    #[test]
    fn updates_reuse_the_visible_surface() {
        let mut h = harness();
        h.update("first", None);
        h.update("second, a somewhat longer status line that wraps", None);
        h.update("third", Some(Duration::from_secs(2)));

        assert_eq!(h.log.shown(), 1);
        assert_eq!(h.log.last_text().as_deref(), Some("third"));
        let fades_in = h
            .log
            .events()
            .iter()
            .filter(|e| matches!(e, OverlayEvent::Alpha { target, .. } if *target == 1.0))
            .count();
        assert_eq!(fades_in, 1);
    }

    #[test]
    fn unbounded_timeout_keeps_notification_sticky() {
        let mut h = harness();
        h.update("hello", Some(Duration::MAX));

        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.message.as_deref(), Some("hello"));
        assert_eq!(snapshot.visible, 1);
        assert!(!snapshot.fade_armed);
        assert_eq!(h.host.next_deadline(), None);

        h.update("still here", Some(Duration::MAX));
        assert_eq!(h.log.shown(), 1);
        assert_eq!(h.log.last_text().as_deref(), Some("still here"));

        h.send(UiCommand::Reset);
        h.settle();
        assert_eq!(h.host.snapshot().active_surface, None);
    }

    #[test]
    fn rescheduling_fade_replaces_previous_deadline() {
        let mut h = harness();
        let before = Instant::now();
        h.update("short", Some(Duration::from_millis(10)));
        h.update("long", Some(Duration::from_secs(60)));

        let deadline = h.host.next_deadline().expect("fade armed");
        assert!(deadline >= before + Duration::from_secs(60));
        assert_eq!(h.host.fire_due(Instant::now() + Duration::from_secs(1)), 0);
        assert!(h.host.snapshot().fade_armed);

        h.update("sticky again", None);
        assert!(!h.host.snapshot().fade_armed);
        assert_eq!(h.host.next_deadline(), None);
    }

    #[test]
    fn fading_surface_is_replaced_not_revived() {
        let mut h = harness();
        h.update("going away", Some(Duration::from_millis(5)));
        h.host.fire_due(Instant::now() + Duration::from_millis(100));

        let fading = h.host.snapshot();
        assert_eq!(fading.active_surface, Some(1));
        assert_eq!(fading.visible, 0);

        h.transition(TransitionRequest::capture_complete());
        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.active_surface, Some(2));
        assert_eq!(snapshot.retiring, 1);
        assert_eq!(snapshot.visible, 1);

        h.settle();
        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.state, NotificationState::ScreenCaptured);
        assert_eq!(snapshot.active_surface, Some(2));
        assert_eq!(snapshot.retiring, 0);
        assert!(
            h.log
                .events()
                .contains(&OverlayEvent::Closed { id: 1 })
        );
    }

    #[test]
    fn reset_returns_to_idle_and_clears_after_teardown() {
        let mut h = harness();
        h.transition(TransitionRequest::llm_complete(true, &h.config));
        h.send(UiCommand::Show(PendingNotification {
            title: "ScreenCal".to_string(),
            message: "queued".to_string(),
            timeout: Duration::from_secs(1),
        }));
        assert_eq!(h.host.snapshot().pending, 1);

        h.send(UiCommand::Reset);
        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.state, NotificationState::Idle);
        assert_eq!(snapshot.pending, 0);
        assert_eq!(snapshot.active_surface, Some(1));
        assert_eq!(snapshot.visible, 0);

        // A second reset while fading does not start another teardown.
        h.send(UiCommand::Reset);
        h.settle();
        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.active_surface, None);
        assert_eq!(h.log.closed(), 1);
        assert_eq!(h.log.shown(), 1);
    }

    #[test]
    fn shown_notifications_queue_behind_the_visible_one() {
        let mut h = harness();
        for message in ["one", "two"] {
            h.send(UiCommand::Show(PendingNotification {
                title: "ScreenCal".to_string(),
                message: message.to_string(),
                timeout: Duration::from_millis(10),
            }));
        }
        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.message.as_deref(), Some("one"));
        assert_eq!(snapshot.pending, 1);

        // Fade out and completion of "one" brings up "two".
        h.host.fire_due(Instant::now() + Duration::from_millis(50));
        h.host.fire_due(Instant::now() + Duration::from_secs(5));
        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.message.as_deref(), Some("two"));
        assert_eq!(snapshot.pending, 0);

        h.settle();
        assert_eq!(h.host.snapshot().active_surface, None);
        assert_eq!(h.log.shown(), 2);
    }

    #[test]
    fn processing_start_respects_capture_dwell() {
        let mut h = harness();
        h.send(UiCommand::LlmProcessingStart);
        assert_eq!(h.state(), NotificationState::ProcessingLlm);

        h.transition(TransitionRequest::capture_complete());
        h.send(UiCommand::LlmProcessingStart);
        assert_eq!(h.state(), NotificationState::ScreenCaptured);

        h.deliver_dwell();
        assert_eq!(h.state(), NotificationState::ProcessingLlm);
    }

    #[test]
    fn update_preempts_pending_dwell() {
        let mut h = harness();
        h.transition(TransitionRequest::capture_complete());
        h.update("Custom status", None);

        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.state, NotificationState::ScreenCaptured);
        assert!(!snapshot.dwell_armed);
        assert!(h.commands.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn release_forgets_everything_without_touching_surfaces() {
        let mut h = harness();
        h.transition(TransitionRequest::capture_complete());
        h.gate.engage();
        h.send(UiCommand::Release);

        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.state, NotificationState::Idle);
        assert_eq!(snapshot.active_surface, None);
        assert!(!snapshot.dwell_armed);
        assert_eq!(h.host.next_deadline(), None);

        h.transition(TransitionRequest::capture_complete());
        h.update("late", Some(Duration::from_secs(1)));
        h.send(UiCommand::Reset);
        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.state, NotificationState::Idle);
        assert_eq!(snapshot.surfaces_created, 1);
        assert!(!snapshot.dwell_armed);
        assert_eq!(h.log.closed(), 0);
        assert!(
            !h.log
                .events()
                .iter()
                .any(|e| matches!(e, OverlayEvent::Dropped { .. } | OverlayEvent::Updated { .. }))
        );
    }

    #[test]
    fn failed_surface_creation_leaves_no_notification() {
        let mut h = harness_with(RecordingFactory {
            fail: true,
            ..RecordingFactory::default()
        });
        h.send(UiCommand::Update {
            message: "unreachable".to_string(),
            timeout: FadeTimeout::After(Duration::from_secs(1)),
        });

        let snapshot = h.host.snapshot();
        assert_eq!(snapshot.active_surface, None);
        assert_eq!(snapshot.state, NotificationState::Idle);
        assert_eq!(snapshot.surfaces_created, 0);
        assert_eq!(h.host.next_deadline(), None);
    }
}
