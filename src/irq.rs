//! Pending-touch signal shared with the INT edge interrupt

use core::sync::atomic::{AtomicBool, Ordering};

/// Flag raised by the INT pin interrupt handler and consumed by the
/// session service routine
///
/// ```rust,ignore
/// static TOUCH_PENDING: gt911::PendingFlag = gt911::PendingFlag::new();
///
/// #[interrupt]
/// fn IO_IRQ_BANK0() {
///     // clear the pin interrupt, then
///     TOUCH_PENDING.raise();
/// }
/// ```
#[derive(Debug)]
pub struct PendingFlag {
    pending: AtomicBool,
}

impl PendingFlag {
    pub const fn new() -> PendingFlag {
        PendingFlag {
            pending: AtomicBool::new(false),
        }
    }

    /// Mark a touch report as pending; safe to call from interrupt context
    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Read and clear the flag
    ///
    /// The load and store run inside a critical section so a concurrent
    /// `raise()` is neither lost nor seen twice, including on cores without
    /// an atomic swap.
    pub fn take(&self) -> bool {
        critical_section::with(|_| {
            let pending = self.pending.load(Ordering::Acquire);
            self.pending.store(false, Ordering::Release);
            pending
        })
    }

    /// Peek at the flag without clearing it
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

impl Default for PendingFlag {
    fn default() -> Self {
        Self::new()
    }
}
