use std::sync::atomic::{AtomicBool, Ordering};

/// Mutual-exclusion flag for a periodic job.
///
/// A second run while one is in flight is skipped rather than queued.
#[derive(Debug, Default)]
pub struct RunFlag(AtomicBool);

impl RunFlag {
    /// Claim the flag for the lifetime of the returned guard
    pub fn try_acquire(&self) -> Option<RunGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(&self.0))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the [`RunFlag`] on drop, including when a run panics or errors
#[derive(Debug)]
pub struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
