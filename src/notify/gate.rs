use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Process-wide "teardown has begun" flag, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct ShutdownGate {
    engaged: Arc<AtomicBool>,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually engaged the gate.
    pub fn engage(&self) -> bool {
        let first = !self.engaged.swap(true, Ordering::SeqCst);
        if first {
            info!(stage = "notify", "shutdown gate engaged");
        } else {
            info!(stage = "notify", "shutdown gate already engaged");
        }
        first
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }
}
