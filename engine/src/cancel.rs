use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Caller-requested cancellation of a resolution session.
///
/// Clones share one flag; the session checks it between states and between
/// status polls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
