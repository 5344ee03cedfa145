//! Control flags shared by the controller, the command listener and the
//! process signal handler.
//!
//! Listener and controller go through the mutex and only ever hold it for a
//! flag read or write. The signal handler may fire while the lock is held by
//! the interrupted thread, so it only touches an atomic that every reader
//! folds into its snapshot.

use std::{
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlFlags {
    pub running: bool,
    pub shutdown_requested: bool,
    pub start_requested: bool,
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self {
            running: true,
            shutdown_requested: false,
            start_requested: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct SharedControl {
    flags: Mutex<ControlFlags>,
    signalled: AtomicBool,
}

impl SharedControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControlFlags> {
        match self.flags.lock() {
            Ok(guard) => guard,
            // Flag writes are single assignments, a panicking holder cannot
            // leave them half-written.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current flags, including a pending signal.
    pub fn snapshot(&self) -> ControlFlags {
        let mut flags = *self.lock();
        if self.signalled.load(Ordering::SeqCst) {
            flags.shutdown_requested = true;
            flags.running = false;
        }
        flags
    }

    pub fn shutdown_requested(&self) -> bool {
        self.snapshot().shutdown_requested
    }

    pub fn start_requested(&self) -> bool {
        self.snapshot().start_requested
    }

    pub fn is_running(&self) -> bool {
        self.snapshot().running
    }

    /// Request shutdown and clear `running`. Returns `true` only for the call
    /// that moved the system out of the running state.
    pub fn request_shutdown(&self) -> bool {
        let signalled = self.signalled.load(Ordering::SeqCst);
        let mut flags = self.lock();
        let transitioned = flags.running && !signalled;
        flags.shutdown_requested = true;
        flags.running = false;
        drop(flags);
        if transitioned {
            info!("shutdown requested");
        }
        transitioned
    }

    /// Arm the controller. Ignored once armed or after shutdown.
    pub fn request_start(&self) -> bool {
        if self.signalled.load(Ordering::SeqCst) {
            return false;
        }
        let mut flags = self.lock();
        if flags.start_requested || flags.shutdown_requested {
            return false;
        }
        flags.start_requested = true;
        drop(flags);
        info!("start requested");
        true
    }

    /// Async-signal-safe shutdown: a single atomic store, no lock.
    pub fn signal_shutdown(&self) {
        self.signalled.store(true, Ordering::SeqCst);
    }
}

/// Block until start or shutdown is requested, polling every `poll`.
/// Returns `true` when the controller should run.
pub fn wait_for_start(control: &SharedControl, poll: Duration) -> bool {
    loop {
        let flags = control.snapshot();
        if flags.shutdown_requested {
            return false;
        }
        if flags.start_requested {
            return true;
        }
        thread::sleep(poll);
    }
}
