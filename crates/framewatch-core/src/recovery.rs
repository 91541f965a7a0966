//! Connection recovery
//!
//! State machine driven by I/O errors and 100 ms probe ticks:
//!
//! ```text
//! Connected --io error--> Probing --device seen--> Stabilizing --stable 1 s--> Reconnecting
//!                            ^                          |                          |
//!                            +------device lost---------+             ok: Connected / err: Idle
//! Probing | Stabilizing --more than 10 s since the error--> Idle
//! ```
//!
//! Time is passed in by the caller, so the machine holds no timers itself.

use std::time::{Duration, Instant};

use crate::device::SerialParams;
use crate::field::SlotId;

/// Interval between device probes
pub const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Give up if the device has not come back after this long
pub const RECOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a reappeared device must stay present before reconnecting
pub const STABLE_PERIOD: Duration = Duration::from_secs(1);

/// A periodic sender that was running when the connection was lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSender {
    /// Preset slot
    pub id: SlotId,
    /// Send period
    pub period: Duration,
}

/// What to restore after reconnecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverySnapshot {
    /// Parameters of the lost connection
    pub params: SerialParams,
    /// Senders to restart with their original periods
    pub senders: Vec<ActiveSender>,
}

/// Current recovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// No connection; reconnecting is up to the user
    Idle,
    /// Connection healthy
    Connected,
    /// Waiting for the device to reappear
    Probing {
        /// When the connection was lost
        started: Instant,
    },
    /// Device reappeared, waiting for it to stay present
    Stabilizing {
        /// When the connection was lost
        started: Instant,
        /// When the device was first seen again
        since: Instant,
    },
    /// Reopen in progress
    Reconnecting,
}

/// Result of one probe tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Not recovering; the tick should not have been scheduled
    NotActive,
    /// Nothing changed
    Waiting,
    /// Device reappeared, stabilization started
    DeviceSeen,
    /// Device vanished again during stabilization
    DeviceLost,
    /// Device has been stable long enough; reopen with this snapshot
    Reconnect(RecoverySnapshot),
    /// Recovery abandoned
    TimedOut,
}

/// Recovery state machine
#[derive(Debug, Clone)]
pub struct ConnectionRecovery {
    state: RecoveryState,
    params: Option<SerialParams>,
    snapshot: Option<RecoverySnapshot>,
    timeout: Duration,
    stable_period: Duration,
}

impl Default for ConnectionRecovery {
    fn default() -> Self {
        Self::new(RECOVERY_TIMEOUT, STABLE_PERIOD)
    }
}

impl ConnectionRecovery {
    /// Machine with custom timings
    pub fn new(timeout: Duration, stable_period: Duration) -> Self {
        Self {
            state: RecoveryState::Idle,
            params: None,
            snapshot: None,
            timeout,
            stable_period,
        }
    }

    /// Current state
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Whether probe ticks should be running
    pub fn is_probing(&self) -> bool {
        matches!(
            self.state,
            RecoveryState::Probing { .. } | RecoveryState::Stabilizing { .. }
        )
    }

    /// How long probing lasts before giving up
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Parameters of the current or lost connection
    pub fn params(&self) -> Option<&SerialParams> {
        self.params.as_ref()
    }

    /// The device was opened
    pub fn on_connected(&mut self, params: SerialParams) {
        self.params = Some(params);
        self.snapshot = None;
        self.state = RecoveryState::Connected;
    }

    /// The user closed the connection or abandoned recovery
    pub fn reset(&mut self) {
        self.snapshot = None;
        self.state = RecoveryState::Idle;
    }

    /// An I/O error hit the open device. Returns `true` if recovery started;
    /// the caller must then stop the listed senders and close the source.
    pub fn on_io_error(&mut self, now: Instant, senders: Vec<ActiveSender>) -> bool {
        if self.state != RecoveryState::Connected {
            return false;
        }
        let Some(params) = self.params.clone() else {
            return false;
        };

        tracing::info!(
            "connection to {} lost, probing for {:?} ({} periodic sender(s) suspended)",
            params.port,
            self.timeout,
            senders.len()
        );
        self.snapshot = Some(RecoverySnapshot { params, senders });
        self.state = RecoveryState::Probing { started: now };
        true
    }

    /// Probe tick with the devices currently present
    pub fn on_probe(&mut self, now: Instant, devices: &[String]) -> ProbeOutcome {
        let started = match self.state {
            RecoveryState::Probing { started } | RecoveryState::Stabilizing { started, .. } => {
                started
            }
            _ => return ProbeOutcome::NotActive,
        };

        let Some(port) = self.snapshot.as_ref().map(|s| s.params.port.clone()) else {
            self.state = RecoveryState::Idle;
            return ProbeOutcome::NotActive;
        };

        if now.saturating_duration_since(started) > self.timeout {
            self.reset();
            return ProbeOutcome::TimedOut;
        }

        let present = devices.iter().any(|d| *d == port);
        match (self.state, present) {
            (RecoveryState::Probing { .. }, true) => {
                tracing::info!("{} reappeared, waiting for it to settle", port);
                self.state = RecoveryState::Stabilizing { started, since: now };
                ProbeOutcome::DeviceSeen
            }
            (RecoveryState::Stabilizing { .. }, false) => {
                tracing::info!("{} disappeared again", port);
                self.state = RecoveryState::Probing { started };
                ProbeOutcome::DeviceLost
            }
            (RecoveryState::Stabilizing { since, .. }, true)
                if now.saturating_duration_since(since) >= self.stable_period =>
            {
                self.state = RecoveryState::Reconnecting;
                match self.snapshot.take() {
                    Some(snapshot) => {
                        tracing::info!("{} stable, reconnecting", port);
                        ProbeOutcome::Reconnect(snapshot)
                    }
                    None => {
                        self.state = RecoveryState::Idle;
                        ProbeOutcome::NotActive
                    }
                }
            }
            _ => ProbeOutcome::Waiting,
        }
    }

    /// Outcome of the reopen requested by [`ProbeOutcome::Reconnect`]
    pub fn on_reconnect_result(&mut self, success: bool) {
        if self.state != RecoveryState::Reconnecting {
            return;
        }
        self.state = if success {
            RecoveryState::Connected
        } else {
            RecoveryState::Idle
        };
    }
}
