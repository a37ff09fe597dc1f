//! Interrupt handling: SIGINT/SIGTERM set a flag that the wave loop polls
//! between entries, so the entry in flight always reaches a terminal state.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared "stop after the current entry" flag.
///
/// `Ordering::Relaxed` is enough: the flag is polled once per entry and
/// orders nothing else.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    flag: Arc<AtomicBool>,
}

impl InterruptFlag {
    /// A flag nothing but [`InterruptFlag::request`] will ever set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag wired to SIGINT and SIGTERM. Registration is best-effort;
    /// failures are reported on stderr and the flag still works manually.
    #[cfg(feature = "signals")]
    pub fn with_os_signals() -> Self {
        use signal_hook::consts::{SIGINT, SIGTERM};

        let handler = Self::new();
        for (name, signal) in [("SIGINT", SIGINT), ("SIGTERM", SIGTERM)] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&handler.flag)) {
                eprintln!("[HMH-SIGNAL] failed to register {name}: {e}");
            }
        }
        handler
    }

    #[cfg(not(feature = "signals"))]
    pub fn with_os_signals() -> Self {
        Self::new()
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Programmatically request a stop.
    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}
