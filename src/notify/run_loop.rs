use crate::notify::Notifier;
use crate::notify::executor::UiCommand;
use crate::notify::host;
use crate::notify::surface::SurfaceFactory;
use anyhow::{Context, Result, anyhow};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A dedicated UI thread for hosts without a native event loop.
///
/// Owns the notification host, applies marshaled commands in arrival order and
/// fires UI timers as their deadlines pass.
#[derive(Debug)]
pub struct UiRunLoop {
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl UiRunLoop {
    pub fn spawn<F>(
        notifier: Notifier,
        mut commands: UnboundedReceiver<UiCommand>,
        make_factory: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> Box<dyn SurfaceFactory> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("screencal-ui".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow!(err).context("failed to build UI runtime")));
                        return;
                    }
                };

                let Some(ui_host) = notifier.build_host(make_factory()) else {
                    let _ = ready_tx.send(Err(anyhow!("headless notifier cannot host a UI loop")));
                    return;
                };
                drop(notifier);
                host::install(ui_host);
                let _ = ready_tx.send(Ok(()));

                runtime.block_on(async move {
                    loop {
                        let deadline = host::with_installed(|h| h.next_deadline()).flatten();
                        tokio::select! {
                            biased;
                            _ = &mut stop_rx => break,
                            command = commands.recv() => match command {
                                Some(command) => {
                                    if let Err(command) = host::dispatch_on_ui_thread(command) {
                                        warn!(stage = "notify", ?command, "no notification host installed");
                                    }
                                }
                                None => break,
                            },
                            _ = wait_until(deadline) => {
                                host::with_installed(|h| h.fire_due(Instant::now()));
                            }
                        }
                    }
                });

                drop(host::uninstall());
                debug!(stage = "notify", "UI loop stopped");
            })
            .context("failed to spawn UI thread")?;

        ready_rx
            .recv()
            .context("UI thread exited before starting")??;

        Ok(Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Stops the loop and waits for the UI thread to drop its surfaces.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(stage = "notify", "UI thread panicked");
            }
        }
    }
}

impl Drop for UiRunLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}
