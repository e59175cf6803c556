use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Stop flag shared between the live loop and the signal handler. The loop
/// checks it between ticks; nothing is interrupted mid-tick.
pub struct BotController {
    running: AtomicBool,
}

impl BotController {
    pub fn new_running() -> Self {
        Self {
            running: AtomicBool::new(true),
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("Stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Default for BotController {
    fn default() -> Self {
        Self::new_running()
    }
}
