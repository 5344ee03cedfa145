//! Command listener thread.
//!
//! Polls the display link for single byte commands for the whole lifetime of
//! the controller. A shutdown byte flips the shared flags but the thread keeps
//! polling until its owner stops it, so nothing else reads the link after the
//! owner decides to close it.

use std::{io, sync::Arc, thread::JoinHandle, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use tracing::{debug, info, warn};

use crate::{control::SharedControl, display::StatusDisplay, pipeline::telemetry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Shutdown,
}

impl Command {
    /// `B`/`b` stops the line, any other printable non-space byte arms it.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'B' | b'b' => Some(Command::Shutdown),
            33..=126 => Some(Command::Start),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Shutdown => "shutdown",
        }
    }
}

/// Counts kept by the listener thread and returned on join.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub bytes_read: u64,
    pub commands: u64,
    pub read_errors: u64,
}

pub struct CommandListener {
    display: StatusDisplay,
    control: Arc<SharedControl>,
    poll: Duration,
}

impl CommandListener {
    pub fn new(display: StatusDisplay, control: Arc<SharedControl>, poll: Duration) -> Self {
        Self {
            display,
            control,
            poll,
        }
    }

    pub fn spawn(self) -> io::Result<ListenerHandle> {
        let (exit_tx, exit_rx) = bounded(1);
        let join = telemetry::spawn_thread("command-listener", move || self.run(exit_rx))?;
        Ok(ListenerHandle { exit_tx, join })
    }

    fn handle_byte(&self, byte: u8, stats: &mut ListenerStats) {
        stats.bytes_read += 1;
        let Some(command) = Command::from_byte(byte) else {
            debug!(byte, "ignoring display byte");
            return;
        };
        let accepted = match command {
            Command::Shutdown => self.control.request_shutdown(),
            Command::Start => self.control.request_start(),
        };
        if accepted {
            stats.commands += 1;
            metrics::counter!("inspection_commands_total", "command" => command.label())
                .increment(1);
            info!(command = command.label(), "display command");
        }
    }

    fn run(self, exit_rx: Receiver<()>) -> ListenerStats {
        let mut stats = ListenerStats::default();
        debug!(poll_ms = self.poll.as_millis() as u64, "command listener started");
        loop {
            match self.display.poll_byte() {
                Ok(Some(byte)) => {
                    self.handle_byte(byte, &mut stats);
                    if !matches!(exit_rx.try_recv(), Err(TryRecvError::Empty)) {
                        break;
                    }
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    stats.read_errors += 1;
                    warn!("display read failed: {err}");
                }
            }
            match exit_rx.recv_timeout(self.poll) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!(?stats, "command listener stopped");
        stats
    }
}

pub struct ListenerHandle {
    exit_tx: Sender<()>,
    join: JoinHandle<ListenerStats>,
}

impl ListenerHandle {
    /// Tell the listener to exit and wait for it.
    pub fn stop(self) -> ListenerStats {
        let _ = self.exit_tx.try_send(());
        match self.join.join() {
            Ok(stats) => stats,
            Err(_) => {
                warn!("command listener panicked");
                ListenerStats::default()
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
