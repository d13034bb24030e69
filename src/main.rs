use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use screencal::calendar::CalendarConnector;
use screencal::capture::{MacOsScreenCapturer, MockScreenCapturer, ScreenCapturer};
use screencal::logging;
use screencal::notify::Notifier;
use screencal::notify::state::{APP_TITLE, NotificationState};
use screencal::notify::surface::{LogOverlayFactory, SurfaceFactory};
use screencal::paths::{default_captures_dir, default_events_dir, default_settings_path};
use screencal::permissions::{Permission, permission_report};
use screencal::pipeline::{CapturePipeline, PipelineOutcome};
use screencal::settings::{CalendarPreference, Settings, SettingsStore};
use screencal::vision::{DEFAULT_MODEL, ExtractorKind, build_extractor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Parser)]
#[command(name = "screencal")]
#[command(about = "Turn what is on screen into a calendar event")]
struct Cli {
    #[arg(long, short, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Capture the screen once and create an event from it.
    Capture(CaptureArgs),
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Show Screen Recording and Accessibility status.
    Permissions {
        #[arg(long, action = ArgAction::SetTrue)]
        open: bool,
    },
    /// Walk the notification through every milestone.
    NotifyDemo {
        #[arg(long, default_value = "1s", value_parser = parse_duration)]
        step: Duration,

        #[arg(long, action = ArgAction::SetTrue)]
        no_event: bool,
    },
}

#[derive(Debug, Args, Clone)]
struct CaptureArgs {
    /// Use a canned event instead of calling OpenAI.
    #[arg(long, action = ArgAction::SetTrue)]
    stub: bool,

    /// Use a stub that never finds an event.
    #[arg(long, action = ArgAction::SetTrue)]
    no_event: bool,

    /// Write a placeholder image instead of capturing the screen.
    #[arg(long, action = ArgAction::SetTrue)]
    mock_capture: bool,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Overrides the saved calendar preference for this run.
    #[arg(long)]
    calendar: Option<CalendarPreference>,

    #[arg(long)]
    captures_dir: Option<PathBuf>,

    #[arg(long)]
    events_dir: Option<PathBuf>,

    /// How long to wait for the notification to finish after processing.
    #[arg(long, default_value = "15s", value_parser = parse_duration)]
    linger: Duration,
}

#[derive(Debug, Subcommand)]
enum SettingsCommand {
    Show,
    SetCalendar { calendar: CalendarPreference },
}

fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(path) = logging::init(cli.verbose) {
        tracing::debug!(path = %path.display(), "logging to file");
    }

    let store = SettingsStore::new(cli.settings.unwrap_or_else(default_settings_path));

    match cli.command {
        Commands::Capture(args) => run_capture(args, store.load()).await,
        Commands::Settings(SettingsCommand::Show) => {
            print_settings(&store);
            Ok(())
        }
        Commands::Settings(SettingsCommand::SetCalendar { calendar }) => {
            store.set_preferred_calendar(calendar)?;
            println!("preferred calendar: {calendar}");
            Ok(())
        }
        Commands::Permissions { open } => print_permissions(open),
        Commands::NotifyDemo { step, no_event } => run_notify_demo(store.load(), step, no_event).await,
    }
}

async fn run_capture(args: CaptureArgs, settings: Settings) -> Result<()> {
    let capturer: Arc<dyn ScreenCapturer> = if args.mock_capture {
        Arc::new(MockScreenCapturer::default())
    } else {
        ensure_screen_recording_permission()?;
        Arc::new(MacOsScreenCapturer)
    };
    let extractor = build_extractor(ExtractorKind::resolve(args.stub, args.no_event), &args.model)
        .context("failed to initialize event extractor")?;
    let preference = args.calendar.unwrap_or_else(|| settings.effective_calendar());

    let (notifier, run_loop) = spawn_log_notifier(&settings)?;
    let calendar = CalendarConnector::new(
        args.events_dir.unwrap_or_else(default_events_dir),
        settings.notifications.calendar_open_delay(),
    );
    let pipeline = CapturePipeline::new(
        capturer,
        extractor,
        calendar,
        notifier.clone(),
        args.captures_dir.unwrap_or_else(default_captures_dir),
    );

    let outcome = pipeline.run(preference).await;
    wait_for_idle(&notifier, args.linger).await;
    notifier.shutdown();
    run_loop.stop();

    match outcome {
        PipelineOutcome::CaptureFailed(reason) => bail!("capture failed: {reason}"),
        PipelineOutcome::Failed(reason) => bail!("processing failed: {reason}"),
        PipelineOutcome::CalendarFailed(reason) => bail!("calendar failed: {reason}"),
        outcome => {
            println!("{}", outcome.summary());
            Ok(())
        }
    }
}

async fn run_notify_demo(settings: Settings, step: Duration, no_event: bool) -> Result<()> {
    let (notifier, run_loop) = spawn_log_notifier(&settings)?;

    notifier.on_capture_complete();
    tokio::time::sleep(step).await;
    notifier.on_llm_processing_start();
    tokio::time::sleep(step).await;
    notifier.on_llm_complete(!no_event);
    if !no_event {
        tokio::time::sleep(step).await;
        notifier.on_calendar_opening();
    }
    wait_for_idle(&notifier, Duration::from_secs(15)).await;

    notifier.show(APP_TITLE, "Demo finished", step);
    wait_for_idle(&notifier, step * 4).await;

    notifier.shutdown();
    run_loop.stop();
    Ok(())
}

fn spawn_log_notifier(settings: &Settings) -> Result<(Notifier, screencal::notify::run_loop::UiRunLoop)> {
    Notifier::spawn(settings.notifications.clone(), || {
        Box::new(LogOverlayFactory) as Box<dyn SurfaceFactory>
    })
    .context("failed to start notification thread")
}

async fn wait_for_idle(notifier: &Notifier, limit: Duration) {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        match notifier.inspect(Duration::from_secs(1)) {
            Some(snapshot)
                if snapshot.state == NotificationState::Idle
                    && snapshot.active_surface.is_none()
                    && snapshot.pending == 0
                    && snapshot.retiring == 0 =>
            {
                return;
            }
            Some(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            None => return,
        }
    }
    tracing::warn!("notification still visible after {}", humantime::format_duration(limit));
}

fn print_settings(store: &SettingsStore) {
    let settings = store.load();
    println!("settings file: {}", store.path().display());
    println!("preferred calendar: {}", settings.preferred_calendar);
    if settings.effective_calendar() != settings.preferred_calendar {
        println!("effective calendar: {} (environment override)", settings.effective_calendar());
    }
    let n = &settings.notifications;
    println!("capture dwell: {}", humantime::format_duration(n.capture_dwell()));
    println!("no-event timeout: {}", humantime::format_duration(n.no_event_timeout()));
    println!(
        "calendar-opening timeout: {}",
        humantime::format_duration(n.calendar_opening_timeout())
    );
    println!("calendar open delay: {}", humantime::format_duration(n.calendar_open_delay()));
}

fn print_permissions(open: bool) -> Result<()> {
    for (permission, status) in permission_report() {
        println!("{}: {status}", permission.label());
        if status.needs_user_action() {
            println!("  {}", permission.help_message());
            if open {
                permission.open_settings()?;
            }
        }
    }
    Ok(())
}

fn ensure_screen_recording_permission() -> Result<()> {
    let permission = Permission::ScreenRecording;
    if permission.status().is_granted() {
        return Ok(());
    }
    eprintln!("Screen Recording permission is denied. {}", permission.help_message());
    if let Err(err) = permission.open_settings() {
        eprintln!("Unable to auto-open System Settings: {err:#}");
    }
    bail!("grant Screen Recording permission and re-run")
}
