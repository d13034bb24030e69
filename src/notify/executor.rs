use crate::notify::banner::post_banner;
use crate::notify::gate::ShutdownGate;
use crate::notify::host;
use crate::notify::machine::MachineSnapshot;
use crate::notify::queue::PendingNotification;
use crate::notify::state::{APP_TITLE, FadeTimeout, MESSAGE_ANALYZING, TransitionRequest};
use std::sync::{Arc, OnceLock, mpsc};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

/// Everything the UI thread can be asked to do.
#[derive(Debug, Clone)]
pub enum UiCommand {
    Transition(TransitionRequest),
    LlmProcessingStart,
    Update {
        message: String,
        timeout: FadeTimeout,
    },
    Show(PendingNotification),
    DwellElapsed {
        generation: u64,
    },
    Reset,
    /// Shutdown: forget every UI reference without touching it.
    Release,
    Inspect(mpsc::Sender<MachineSnapshot>),
}

impl UiCommand {
    pub fn survives_shutdown(&self) -> bool {
        matches!(self, UiCommand::Release | UiCommand::Inspect(_))
    }

    /// Title and text to show when the command has to degrade to a banner.
    pub fn banner(&self) -> Option<(&str, &str)> {
        match self {
            UiCommand::Transition(request) => Some((APP_TITLE, request.message())),
            UiCommand::LlmProcessingStart => Some((APP_TITLE, MESSAGE_ANALYZING)),
            UiCommand::Update { message, .. } => Some((APP_TITLE, message)),
            UiCommand::Show(pending) => Some((&pending.title, &pending.message)),
            UiCommand::DwellElapsed { .. }
            | UiCommand::Reset
            | UiCommand::Release
            | UiCommand::Inspect(_) => None,
        }
    }
}

/// A way of getting a command onto the UI thread's queue. On failure the
/// command is handed back so the next mechanism can try.
pub trait Marshal: Send + Sync {
    fn name(&self) -> &'static str;
    fn marshal(&self, command: UiCommand) -> Result<(), UiCommand>;
}

impl Marshal for tokio::sync::mpsc::UnboundedSender<UiCommand> {
    fn name(&self) -> &'static str {
        "ui-channel"
    }

    fn marshal(&self, command: UiCommand) -> Result<(), UiCommand> {
        self.send(command).map_err(|err| err.0)
    }
}

impl Marshal for mpsc::Sender<UiCommand> {
    fn name(&self) -> &'static str {
        "fallback-channel"
    }

    fn marshal(&self, command: UiCommand) -> Result<(), UiCommand> {
        self.send(command).map_err(|err| err.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Ran synchronously on the calling (UI) thread.
    Inline,
    Marshaled(&'static str),
    /// No UI thread reachable; shown as a banner instead.
    Degraded,
    Dropped,
}

impl Dispatch {
    pub fn delivered(&self) -> bool {
        matches!(self, Dispatch::Inline | Dispatch::Marshaled(_))
    }
}

/// Runs commands on the thread that owns the notification UI.
#[derive(Clone)]
pub struct MainThreadExecutor {
    owner: Arc<OnceLock<ThreadId>>,
    primary: Option<Arc<dyn Marshal>>,
    secondary: Option<Arc<dyn Marshal>>,
    gate: ShutdownGate,
}

impl MainThreadExecutor {
    pub fn new(gate: ShutdownGate) -> Self {
        Self {
            owner: Arc::new(OnceLock::new()),
            primary: None,
            secondary: None,
            gate,
        }
    }

    pub fn with_primary(mut self, marshal: Arc<dyn Marshal>) -> Self {
        self.primary = Some(marshal);
        self
    }

    pub fn with_secondary(mut self, marshal: Arc<dyn Marshal>) -> Self {
        self.secondary = Some(marshal);
        self
    }

    /// Declares the calling thread the UI thread. Only the first binding wins.
    pub fn bind_current_thread(&self) -> bool {
        let current = thread::current().id();
        self.owner.set(current).is_ok() || self.owner.get() == Some(&current)
    }

    pub fn is_on_owning_thread(&self) -> bool {
        self.owner
            .get()
            .is_some_and(|owner| *owner == thread::current().id())
    }

    /// Never fails towards the caller: on the UI thread the command runs
    /// inline, elsewhere it goes through the primary then the secondary
    /// marshal, and as a last resort degrades to a banner.
    pub fn run_on_main(&self, command: UiCommand) -> Dispatch {
        if self.gate.is_engaged() && !command.survives_shutdown() {
            debug!(stage = "notify", ?command, "shutdown in progress, command dropped");
            return Dispatch::Dropped;
        }

        let mut command = command;
        if self.is_on_owning_thread() {
            match host::dispatch_on_ui_thread(command) {
                Ok(()) => return Dispatch::Inline,
                Err(returned) => command = returned,
            }
        }

        for marshal in [&self.primary, &self.secondary].into_iter().flatten() {
            match marshal.marshal(command) {
                Ok(()) => return Dispatch::Marshaled(marshal.name()),
                Err(returned) => {
                    warn!(
                        stage = "notify",
                        marshal = marshal.name(),
                        "could not marshal command onto the UI thread"
                    );
                    command = returned;
                }
            }
        }

        self.degrade(command)
    }

    fn degrade(&self, command: UiCommand) -> Dispatch {
        if self.gate.is_engaged() {
            return Dispatch::Dropped;
        }
        match command.banner() {
            Some((title, message)) => {
                warn!(stage = "notify", "UI thread unreachable, degrading to banner");
                post_banner(title, message);
                Dispatch::Degraded
            }
            None => {
                warn!(stage = "notify", ?command, "UI thread unreachable, command dropped");
                Dispatch::Dropped
            }
        }
    }
}

impl std::fmt::Debug for MainThreadExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadExecutor")
            .field("owner", &self.owner.get())
            .field("primary", &self.primary.as_ref().map(|m| m.name()))
            .field("secondary", &self.secondary.as_ref().map(|m| m.name()))
            .finish()
    }
}
