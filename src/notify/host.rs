use crate::notify::executor::UiCommand;
use crate::notify::machine::{MachineSnapshot, NotificationStateMachine};
use crate::notify::timer::UiTimerQueue;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Instant;

/// The state machine together with the timers it schedules on the UI thread.
#[derive(Debug)]
pub struct NotificationHost {
    machine: NotificationStateMachine,
    timers: UiTimerQueue,
}

impl NotificationHost {
    pub fn new(machine: NotificationStateMachine) -> Self {
        Self {
            machine,
            timers: UiTimerQueue::default(),
        }
    }

    pub fn handle(&mut self, command: UiCommand) {
        self.machine.handle(command, &mut self.timers);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Runs every UI timer due at `now`. Returns how many fired.
    pub fn fire_due(&mut self, now: Instant) -> usize {
        let due = self.timers.pop_due(now);
        let fired = due.len();
        for timer in due {
            self.machine.on_ui_timer(timer, &mut self.timers);
        }
        fired
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        self.machine.snapshot(&self.timers)
    }
}

thread_local! {
    static INSTALLED: RefCell<Option<NotificationHost>> = const { RefCell::new(None) };
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
    static DEFERRED: RefCell<VecDeque<UiCommand>> = const { RefCell::new(VecDeque::new()) };
}

/// Makes `host` the notification host of the calling thread, returning the
/// previous one.
pub fn install(host: NotificationHost) -> Option<NotificationHost> {
    INSTALLED.with(|slot| slot.borrow_mut().replace(host))
}

pub fn uninstall() -> Option<NotificationHost> {
    DEFERRED.with(|queue| queue.borrow_mut().clear());
    INSTALLED.with(|slot| slot.borrow_mut().take())
}

struct DispatchGuard;

impl DispatchGuard {
    fn enter() -> Self {
        DISPATCHING.with(|flag| flag.set(true));
        DispatchGuard
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|flag| flag.set(false));
    }
}

/// Runs `f` against this thread's host, then drains any command submitted
/// re-entrantly while it ran. `None` when no host is installed or the host is
/// already busy further up the stack.
pub fn with_installed<R>(f: impl FnOnce(&mut NotificationHost) -> R) -> Option<R> {
    if DISPATCHING.with(Cell::get) {
        return None;
    }
    INSTALLED.with(|slot| {
        let mut slot = slot.borrow_mut();
        let host = slot.as_mut()?;
        let _guard = DispatchGuard::enter();
        let result = f(host);
        while let Some(command) = DEFERRED.with(|queue| queue.borrow_mut().pop_front()) {
            host.handle(command);
        }
        Some(result)
    })
}

/// Hands `command` to this thread's host. A command raised while another
/// one is being handled is not run inline: it is queued and runs once the
/// current command returns, before control goes back to the caller that
/// started the dispatch. Returns the command when this thread has no host.
pub fn dispatch_on_ui_thread(command: UiCommand) -> Result<(), UiCommand> {
    if DISPATCHING.with(Cell::get) {
        DEFERRED.with(|queue| queue.borrow_mut().push_back(command));
        return Ok(());
    }
    let mut command = Some(command);
    let handled = with_installed(|host| {
        if let Some(command) = command.take() {
            host.handle(command);
        }
    });
    match (handled, command) {
        (Some(()), _) => Ok(()),
        (None, Some(command)) => Err(command),
        (None, None) => Ok(()),
    }
}
