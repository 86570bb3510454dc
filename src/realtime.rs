//! Real-time clock scheduling
//!
//! Timer threads never touch the model. Each one sends toggle commands into
//! a channel; the model drains that channel from its own stepping loop, so
//! the graph keeps a single writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

use crate::clock::ClockId;
use crate::error::{Error, Result};

/// Toggles buffered between the timer threads and the model. Toggles that
/// arrive while the queue is full are dropped.
pub const QUEUE_DEPTH: usize = 4;

/// Command delivered from a timer thread to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockCommand {
    Toggle(ClockId),
}

struct Timer {
    clock: ClockId,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the timer threads and the command queue of one model
pub struct RealTimeClocks {
    tx: SyncSender<ClockCommand>,
    rx: Receiver<ClockCommand>,
    timers: Vec<Timer>,
}

impl RealTimeClocks {
    pub fn new() -> Self {
        let (tx, rx) = sync_channel(QUEUE_DEPTH);
        Self {
            tx,
            rx,
            timers: Vec::new(),
        }
    }

    /// Start a timer toggling `clock` every `half_period`
    pub fn start(&mut self, clock: ClockId, half_period: Duration) -> Result<()> {
        if half_period.is_zero() {
            return Err(Error::InvalidPeriod { clock: clock.index() });
        }
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_timer_thread(clock, half_period, self.tx.clone(), stop.clone())?;
        debug!(clock = clock.index(), ?half_period, "real-time clock started");
        self.timers.push(Timer {
            clock,
            stop,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Next pending command without blocking
    pub fn try_next(&self) -> Option<ClockCommand> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next command
    pub fn next_timeout(&self, timeout: Duration) -> Option<ClockCommand> {
        match self.rx.recv_timeout(timeout) {
            Ok(cmd) => Some(cmd),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn running(&self) -> usize {
        self.timers.len()
    }

    /// Stop and join every timer thread; queued commands are discarded
    pub fn stop(&mut self) {
        for timer in &self.timers {
            timer.stop.store(true, Ordering::SeqCst);
            if let Some(handle) = &timer.handle {
                handle.thread().unpark();
            }
        }
        for mut timer in self.timers.drain(..) {
            if let Some(handle) = timer.handle.take() {
                if handle.join().is_err() {
                    error!(clock = timer.clock.index(), "real-time clock thread panicked");
                }
            }
        }
        while self.rx.try_recv().is_ok() {}
    }
}

impl Default for RealTimeClocks {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RealTimeClocks {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_timer_thread(
    clock: ClockId,
    half_period: Duration,
    tx: SyncSender<ClockCommand>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("clock-{}", clock.index()))
        .spawn(move || {
            let mut deadline = Instant::now() + half_period;
            loop {
                // park_timeout may wake early; keep waiting until the deadline
                loop {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    thread::park_timeout(deadline - now);
                }
                match tx.try_send(ClockCommand::Toggle(clock)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => trace!(clock = clock.index(), "toggle dropped, model is behind"),
                    Err(TrySendError::Disconnected(_)) => return,
                }
                // Missed deadlines are skipped, not replayed
                deadline += half_period;
                let now = Instant::now();
                if deadline < now {
                    deadline = now + half_period;
                }
            }
        })
}
