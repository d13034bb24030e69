use crate::notify::surface::SurfaceId;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// One-shot countdown that can be armed and cancelled from any thread.
///
/// Backed by a private current-thread runtime on its own thread so that it keeps
/// running regardless of what the UI thread is doing. Each arm gets a fresh
/// generation; cancelling or re-arming bumps the generation so a callback that
/// already escaped the abort can be recognised as stale.
pub struct DwellTimer {
    handle: Handle,
    live: Mutex<Option<AbortHandle>>,
    generation: AtomicU64,
    stop: Option<oneshot::Sender<()>>,
}

impl DwellTimer {
    pub fn new() -> Result<Self> {
        let (handle_tx, handle_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        thread::Builder::new()
            .name("screencal-dwell".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        let _ = handle_tx.send(Err(err));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(async move {
                    let _ = stop_rx.await;
                });
            })
            .context("failed to spawn dwell timer thread")?;

        let handle = handle_rx
            .recv()
            .context("dwell timer thread exited before starting")?
            .context("failed to build dwell timer runtime")?;

        Ok(Self {
            handle,
            live: Mutex::new(None),
            generation: AtomicU64::new(0),
            stop: Some(stop_tx),
        })
    }

    /// Arms the countdown, replacing any live one. Returns the new generation.
    pub fn start<F>(&self, duration: Duration, on_elapsed: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = live.take() {
            previous.abort();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let task = self.handle.spawn(async move {
            tokio::time::sleep(duration).await;
            on_elapsed(generation);
        });
        *live = Some(task.abort_handle());
        generation
    }

    /// Returns whether a countdown was live.
    pub fn cancel(&self) -> bool {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        match live.take() {
            Some(task) => {
                let was_live = !task.is_finished();
                task.abort();
                was_live
            }
            None => false,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

impl Drop for DwellTimer {
    fn drop(&mut self) {
        if let Some(task) = self
            .live
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl std::fmt::Debug for DwellTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DwellTimer")
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Work the UI loop performs when one of its own timers comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiTimer {
    FadeOut { surface: SurfaceId },
    FadeComplete { surface: SurfaceId },
}

/// Deadline-ordered timers owned by the UI thread.
#[derive(Debug, Default)]
pub struct UiTimerQueue {
    next_id: u64,
    entries: BTreeMap<(Instant, u64), UiTimer>,
}

impl UiTimerQueue {
    /// `None` when `delay` puts the deadline past what `Instant` can represent.
    pub fn schedule(&mut self, delay: Duration, timer: UiTimer) -> Option<TimerId> {
        let at = Instant::now().checked_add(delay)?;
        Some(self.schedule_at(at, timer))
    }

    pub fn schedule_at(&mut self, at: Instant, timer: UiTimer) -> TimerId {
        self.next_id += 1;
        self.entries.insert((at, self.next_id), timer);
        TimerId(self.next_id)
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        let key = self.entries.keys().find(|(_, seq)| *seq == id.0).copied();
        key.and_then(|key| self.entries.remove(&key)).is_some()
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.entries.keys().any(|(_, seq)| *seq == id.0)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(at, _)| *at)
    }

    /// Removes and returns every timer due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<UiTimer> {
        let later = self.entries.split_off(&(now, u64::MAX));
        std::mem::replace(&mut self.entries, later)
            .into_values()
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The single fade-out countdown of the visible notification.
#[derive(Debug, Default)]
pub struct FadeTimer {
    live: Option<TimerId>,
}

impl FadeTimer {
    /// Returns whether the timer was armed; an unrepresentable deadline leaves it disarmed.
    pub fn start(&mut self, queue: &mut UiTimerQueue, delay: Duration, timer: UiTimer) -> bool {
        self.cancel(queue);
        self.live = queue.schedule(delay, timer);
        self.live.is_some()
    }

    pub fn cancel(&mut self, queue: &mut UiTimerQueue) -> bool {
        self.live.take().is_some_and(|id| queue.cancel(id))
    }

    pub fn is_armed(&self, queue: &UiTimerQueue) -> bool {
        self.live.is_some_and(|id| queue.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::{DwellTimer, FadeTimer, UiTimer, UiTimerQueue};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    #[test]
    fn dwell_timer_reports_its_generation() {
        let timer = DwellTimer::new().expect("timer");
        let (tx, rx) = mpsc::channel();
        let generation = timer.start(Duration::from_millis(20), move |g| {
            let _ = tx.send(g);
        });

        let fired = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("dwell fired");
        assert_eq!(fired, generation);
        assert!(timer.is_current(generation));
    }

    #[test]
    fn cancelled_dwell_never_fires() {
        let timer = DwellTimer::new().expect("timer");
        let (tx, rx) = mpsc::channel();
        let generation = timer.start(Duration::from_millis(50), move |g| {
            let _ = tx.send(g);
        });
        assert!(timer.cancel());
        assert!(!timer.is_current(generation));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn restarting_dwell_replaces_previous_countdown() {
        let timer = DwellTimer::new().expect("timer");
        let (tx, rx) = mpsc::channel();
        let first_tx = tx.clone();
        let first = timer.start(Duration::from_millis(40), move |g| {
            let _ = first_tx.send(g);
        });
        let second = timer.start(Duration::from_millis(60), move |g| {
            let _ = tx.send(g);
        });

        let fired = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("second dwell fired");
        assert_eq!(fired, second);
        assert_ne!(first, second);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn pops_due_timers_in_deadline_order() {
        let mut queue = UiTimerQueue::default();
        let base = Instant::now();
        queue.schedule_at(
            base + Duration::from_millis(30),
            UiTimer::FadeComplete { surface: 2 },
        );
        queue.schedule_at(
            base + Duration::from_millis(10),
            UiTimer::FadeOut { surface: 1 },
        );
        queue.schedule_at(base + Duration::from_secs(5), UiTimer::FadeOut { surface: 3 });

        assert_eq!(queue.next_deadline(), Some(base + Duration::from_millis(10)));
        let due = queue.pop_due(base + Duration::from_millis(30));
        assert_eq!(
            due,
            vec![
                UiTimer::FadeOut { surface: 1 },
                UiTimer::FadeComplete { surface: 2 }
            ]
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn fade_timer_cancels_before_rescheduling() {
        let mut queue = UiTimerQueue::default();
        let mut fade = FadeTimer::default();
        let timer = UiTimer::FadeOut { surface: 1 };
        fade.start(&mut queue, Duration::from_secs(1), timer);
        fade.start(&mut queue, Duration::from_secs(2), timer);
        assert_eq!(queue.len(), 1);
        assert!(fade.is_armed(&queue));

        assert!(fade.cancel(&mut queue));
        assert!(queue.is_empty());
        assert!(!fade.is_armed(&queue));
    }

    #[test]
    fn unrepresentable_deadline_is_not_scheduled() {
        let mut queue = UiTimerQueue::default();
        let mut fade = FadeTimer::default();
        assert!(fade.start(&mut queue, Duration::from_secs(1), UiTimer::FadeOut { surface: 1 }));
        assert!(!fade.start(&mut queue, Duration::MAX, UiTimer::FadeOut { surface: 1 }));
        assert!(queue.is_empty());
        assert!(!fade.is_armed(&queue));
        assert_eq!(
            queue.schedule(Duration::MAX, UiTimer::FadeComplete { surface: 1 }),
            None
        );
    }
}
