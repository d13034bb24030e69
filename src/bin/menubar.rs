use anyhow::{Context, Result};
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use screencal::calendar::CalendarConnector;
use screencal::capture::MacOsScreenCapturer;
use screencal::logging;
use screencal::notify::Notifier;
use screencal::notify::executor::{MainThreadExecutor, Marshal, UiCommand};
use screencal::notify::gate::ShutdownGate;
use screencal::notify::host;
use screencal::notify::state::APP_TITLE;
use screencal::notify::surface::{MessageLayout, OverlayBackend, SurfaceFactory, SurfaceId};
use screencal::paths::{default_captures_dir, default_events_dir, default_settings_path};
use screencal::permissions::{Permission, PermissionStatus};
use screencal::pipeline::{CapturePipeline, PipelineOutcome};
use screencal::settings::{CalendarPreference, SettingsStore};
use screencal::vision::{DEFAULT_MODEL, ExtractorKind, build_extractor};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::time::{Duration, Instant};
use tao::event::{Event, StartCause};
use tao::event_loop::{ControlFlow, EventLoopBuilder, EventLoopClosed, EventLoopProxy};
use tracing::{debug, info, warn};
use tray_icon::menu::{Menu, MenuEvent, MenuItem, PredefinedMenuItem};
use tray_icon::{Icon, TrayIcon, TrayIconBuilder};

const IDLE_TITLE: &str = "SC";
const PERMISSION_NOTICE_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug)]
enum UserEvent {
    Menu(MenuEvent),
    Hotkey(GlobalHotKeyEvent),
    Notify(UiCommand),
    Finished(PipelineOutcome),
}

/// Delivers notification commands through the tao event loop.
struct ProxyMarshal(Mutex<EventLoopProxy<UserEvent>>);

impl Marshal for ProxyMarshal {
    fn name(&self) -> &'static str {
        "event-loop-proxy"
    }

    fn marshal(&self, command: UiCommand) -> Result<(), UiCommand> {
        let proxy = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match proxy.send_event(UserEvent::Notify(command)) {
            Ok(()) => Ok(()),
            Err(EventLoopClosed(UserEvent::Notify(command))) => Err(command),
            // Only `Notify` is sent from here.
            Err(EventLoopClosed(_)) => Ok(()),
        }
    }
}

/// The tray title doubles as the notification overlay. Only the most recent
/// surface owns it; closing an older one leaves the title alone.
#[derive(Clone)]
struct TrayTitle {
    tray: Rc<TrayIcon>,
    owner: Rc<RefCell<Option<SurfaceId>>>,
}

impl TrayTitle {
    fn set(&self, id: SurfaceId, text: &str) {
        if *self.owner.borrow() == Some(id) {
            self.tray.set_title(Some(text));
        }
    }

    fn claim(&self, id: SurfaceId) {
        *self.owner.borrow_mut() = Some(id);
    }

    fn release(&self, id: SurfaceId) {
        let mut owner = self.owner.borrow_mut();
        if *owner == Some(id) {
            *owner = None;
            self.tray.set_title(Some(IDLE_TITLE));
        }
    }
}

struct TrayOverlay {
    id: SurfaceId,
    title: TrayTitle,
}

impl OverlayBackend for TrayOverlay {
    fn show(&mut self, layout: &MessageLayout) {
        self.title.claim(self.id);
        self.title.set(self.id, &layout.text());
    }

    fn set_layout(&mut self, layout: &MessageLayout) {
        self.title.set(self.id, &layout.text());
    }

    fn animate_alpha(&mut self, target: f32, duration: Duration) {
        // Menu bar titles cannot fade; the text is swapped when the surface closes.
        debug!(
            stage = "overlay",
            surface = self.id,
            alpha = target,
            duration_ms = duration.as_millis() as u64,
            "fade"
        );
    }

    fn close(&mut self) {
        self.title.release(self.id);
    }
}

struct TrayOverlayFactory {
    title: TrayTitle,
}

impl SurfaceFactory for TrayOverlayFactory {
    fn create(&mut self, id: SurfaceId, _title: &str) -> Result<Box<dyn OverlayBackend>> {
        Ok(Box::new(TrayOverlay {
            id,
            title: self.title.clone(),
        }))
    }
}

fn main() -> Result<()> {
    if let Some(path) = logging::init(false) {
        info!(path = %path.display(), "logging to file");
    }

    let store = SettingsStore::new(default_settings_path());
    let settings = store.load();
    let mut preference = settings.effective_calendar();

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;

    let event_loop = EventLoopBuilder::<UserEvent>::with_user_event().build();
    let proxy = event_loop.create_proxy();

    let (fallback_tx, fallback_rx) = mpsc::channel::<UiCommand>();
    let gate = ShutdownGate::new();
    let executor = MainThreadExecutor::new(gate.clone())
        .with_primary(Arc::new(ProxyMarshal(Mutex::new(proxy.clone()))))
        .with_secondary(Arc::new(fallback_tx));
    let notifier = Notifier::interactive(settings.notifications.clone(), executor, gate)?;

    let extractor = build_extractor(ExtractorKind::resolve(false, false), DEFAULT_MODEL)?;
    let pipeline = Arc::new(CapturePipeline::new(
        Arc::new(MacOsScreenCapturer),
        extractor,
        CalendarConnector::new(default_events_dir(), settings.notifications.calendar_open_delay()),
        notifier.clone(),
        default_captures_dir(),
    ));

    let proxy_for_menu = proxy.clone();
    MenuEvent::set_event_handler(Some(move |event| {
        let _ = proxy_for_menu.send_event(UserEvent::Menu(event));
    }));

    let hotkey_manager = match GlobalHotKeyManager::new() {
        Ok(manager) => Some(manager),
        Err(err) => {
            warn!("global hotkey init failed: {err}");
            None
        }
    };
    let mut hotkey_id = None;
    if let Some(manager) = hotkey_manager.as_ref() {
        let capture_hotkey = HotKey::new(Some(Modifiers::ALT), Code::KeyS);
        let id = capture_hotkey.id();
        match manager.register(capture_hotkey) {
            Ok(()) => hotkey_id = Some(id),
            Err(err) => warn!("failed to register hotkey Option+S: {err}"),
        }
    }
    let proxy_for_hotkey = proxy.clone();
    GlobalHotKeyEvent::set_event_handler(Some(move |event| {
        let _ = proxy_for_hotkey.send_event(UserEvent::Hotkey(event));
    }));

    let status_item = MenuItem::new("Last capture: none", false, None);
    let permission_status_item = MenuItem::new(
        permission_text(Permission::ScreenRecording.status()),
        false,
        None,
    );
    let permission_settings_item = MenuItem::new("Open Screen Recording Settings...", true, None);
    let capture_item = MenuItem::new("Capture (Option+S)", true, None);
    let calendar_item = MenuItem::new(calendar_text(preference), true, None);
    let open_events_item = MenuItem::new("Open events folder", true, None);
    let quit_item = MenuItem::new("Quit", true, None);

    let menu = Menu::new();
    menu.append(&status_item)?;
    menu.append(&permission_status_item)?;
    menu.append(&permission_settings_item)?;
    menu.append(&PredefinedMenuItem::separator())?;
    menu.append(&capture_item)?;
    menu.append(&calendar_item)?;
    menu.append(&open_events_item)?;
    menu.append(&PredefinedMenuItem::separator())?;
    menu.append(&quit_item)?;

    let icon = build_tray_icon()?;
    let mut tray_icon: Option<Rc<TrayIcon>> = None;
    let mut capture_running = false;

    event_loop.run(move |event, _target, control_flow| {
        match event {
            Event::NewEvents(StartCause::Init) => {
                if tray_icon.is_none() {
                    let built = TrayIconBuilder::new()
                        .with_menu(Box::new(menu.clone()))
                        .with_tooltip(APP_TITLE)
                        .with_title(IDLE_TITLE)
                        .with_icon(icon.clone())
                        .build();
                    match built {
                        Ok(tray) => {
                            let tray = Rc::new(tray);
                            let factory = TrayOverlayFactory {
                                title: TrayTitle {
                                    tray: tray.clone(),
                                    owner: Rc::new(RefCell::new(None)),
                                },
                            };
                            if let Some(ui_host) = notifier.build_host(Box::new(factory)) {
                                host::install(ui_host);
                            }
                            tray_icon = Some(tray);
                        }
                        Err(err) => {
                            warn!("failed to init tray icon: {err}");
                            status_item.set_text("Tray icon unavailable");
                        }
                    }
                }
            }
            Event::UserEvent(UserEvent::Notify(command)) => apply(command),
            Event::UserEvent(UserEvent::Hotkey(hotkey_event)) => {
                let matches = hotkey_id.as_ref().is_some_and(|id| hotkey_event.id == *id);
                if matches && hotkey_event.state == HotKeyState::Pressed {
                    capture_running =
                        start_capture(capture_running, &pipeline, preference, &runtime, &proxy);
                }
            }
            Event::UserEvent(UserEvent::Menu(menu_event)) => {
                if menu_event.id == capture_item.id() {
                    capture_running =
                        start_capture(capture_running, &pipeline, preference, &runtime, &proxy);
                } else if menu_event.id == calendar_item.id() {
                    preference = preference.toggled();
                    if let Err(err) = store.set_preferred_calendar(preference) {
                        warn!("failed to save calendar preference: {err:#}");
                    }
                    calendar_item.set_text(calendar_text(preference));
                } else if menu_event.id == permission_settings_item.id() {
                    if let Err(err) = Permission::ScreenRecording.open_settings() {
                        warn!("{err:#}");
                    }
                    permission_status_item
                        .set_text(permission_text(Permission::ScreenRecording.status()));
                } else if menu_event.id == open_events_item.id() {
                    let events_dir = default_events_dir();
                    let opened = std::fs::create_dir_all(&events_dir)
                        .context("failed to create events folder")
                        .and_then(|()| opener::open(&events_dir).context("failed to open events folder"));
                    if let Err(err) = opened {
                        warn!("{err:#}");
                    }
                } else if menu_event.id == quit_item.id() {
                    info!("quitting");
                    notifier.shutdown();
                    drain_fallback(&fallback_rx);
                    drop(host::uninstall());
                    tray_icon = None;
                    *control_flow = ControlFlow::Exit;
                    return;
                }
            }
            Event::UserEvent(UserEvent::Finished(outcome)) => {
                capture_running = false;
                status_item.set_text(format!("Last capture: {}", outcome.summary()));
                if matches!(outcome, PipelineOutcome::CaptureFailed(_)) {
                    let status = Permission::ScreenRecording.status();
                    permission_status_item.set_text(permission_text(status));
                    if status.needs_user_action() {
                        notifier.show(
                            APP_TITLE,
                            "Screen Recording permission needed",
                            PERMISSION_NOTICE_TIMEOUT,
                        );
                    }
                }
            }
            _ => {}
        }

        drain_fallback(&fallback_rx);
        let deadline = host::with_installed(|ui_host| {
            ui_host.fire_due(Instant::now());
            ui_host.next_deadline()
        })
        .flatten();
        *control_flow = match deadline {
            Some(deadline) => ControlFlow::WaitUntil(deadline),
            None => ControlFlow::Wait,
        };
    });
}

fn apply(command: UiCommand) {
    if let Err(command) = host::dispatch_on_ui_thread(command) {
        debug!(stage = "notify", ?command, "tray not ready, notification dropped");
    }
}

fn drain_fallback(fallback_rx: &mpsc::Receiver<UiCommand>) {
    while let Ok(command) = fallback_rx.try_recv() {
        apply(command);
    }
}

/// Returns whether a capture is now running.
fn start_capture(
    already_running: bool,
    pipeline: &Arc<CapturePipeline>,
    preference: CalendarPreference,
    runtime: &tokio::runtime::Runtime,
    proxy: &EventLoopProxy<UserEvent>,
) -> bool {
    if already_running {
        info!("capture already in progress");
        return true;
    }
    let pipeline = pipeline.clone();
    let proxy = proxy.clone();
    runtime.spawn(async move {
        let outcome = pipeline.run(preference).await;
        let _ = proxy.send_event(UserEvent::Finished(outcome));
    });
    true
}

fn calendar_text(preference: CalendarPreference) -> String {
    match preference {
        CalendarPreference::Apple => "Calendar: Apple Calendar".to_string(),
        CalendarPreference::Google => "Calendar: Google Calendar".to_string(),
    }
}

fn permission_text(status: PermissionStatus) -> String {
    format!("Screen Recording: {status}")
}

fn build_tray_icon() -> Result<Icon> {
    let (width, height) = (18, 18);
    let mut rgba = Vec::with_capacity(width * height * 4);
    let border = [40, 40, 40, 255];
    let header = [231, 76, 60, 255];
    let background = [0, 0, 0, 0];

    // A calendar page: outlined square with a filled header strip.
    for y in 0..height {
        for x in 0..width {
            let is_border = x == 0 || y == 0 || x == width - 1 || y == height - 1;
            let is_header = y > 0 && y < 5;
            let pixel = if is_border {
                border
            } else if is_header {
                header
            } else {
                background
            };
            rgba.extend_from_slice(&pixel);
        }
    }

    Icon::from_rgba(rgba, width as u32, height as u32).context("invalid tray icon")
}
