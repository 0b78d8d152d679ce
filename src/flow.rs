//! Batching, pacing and pause handling between the session and the transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::protocol::{
    Command, DATA_FLOW_PAUSE, DATA_FLOW_RESUME, DeviceState, TX_CHARACTERISTIC, parse_notification,
};
use crate::transport::{NotifyCallback, Transport};
use crate::{CatPrinterError, Result};

/// How frames are batched and paced on the way to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    /// Largest single transport write, in bytes.
    pub mtu: usize,
    /// Pause after every write. Printers tear or drop lines without it.
    pub write_interval: Duration,
    /// How often a paused flush checks whether the device resumed.
    pub pause_poll_interval: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            mtu: 200,
            write_interval: Duration::from_millis(20),
            pause_poll_interval: Duration::from_millis(200),
        }
    }
}

/// Sleep for `duration` unless the token is cancelled first.
async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        _ = token.cancelled() => Err(CatPrinterError::Cancelled),
        _ = sleep(duration) => Ok(()),
    }
}

/// Device-side state, updated from notifications.
///
/// Written by the notification callback and read by the flushing task.
#[derive(Debug)]
pub struct DeviceMonitor {
    paused: AtomicBool,
    state: watch::Sender<Option<DeviceState>>,
}

impl Default for DeviceMonitor {
    fn default() -> Self {
        Self {
            paused: AtomicBool::new(false),
            state: watch::channel(None).0,
        }
    }
}

impl DeviceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a raw notification from the device.
    pub fn notify(&self, data: &[u8]) {
        if data == DATA_FLOW_PAUSE {
            tracing::debug!("device asked to pause data flow");
            self.paused.store(true, Ordering::Release);
            return;
        }
        if data == DATA_FLOW_RESUME {
            tracing::debug!("device resumed data flow");
            self.paused.store(false, Ordering::Release);
            return;
        }
        match parse_notification(data) {
            Ok(n) if n.command == Command::GetDeviceState as u8 && !n.payload.is_empty() => {
                let state = DeviceState(n.payload[0]);
                tracing::debug!(state = state.bits(), "device state report");
                self.state.send_replace(Some(state));
            }
            Ok(n) => match Command::from_byte(n.command) {
                Some(command) => tracing::trace!(?command, len = n.payload.len(), "notification"),
                None => tracing::debug!(command = n.command, "unknown notification"),
            },
            Err(reason) => tracing::debug!(reason, "ignoring malformed notification"),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Last state the device reported, if any.
    pub fn state(&self) -> Option<DeviceState> {
        *self.state.borrow()
    }

    /// Watch for state reports.
    pub fn subscribe(&self) -> watch::Receiver<Option<DeviceState>> {
        self.state.subscribe()
    }

    /// A transport callback feeding this monitor.
    pub fn callback(self: &Arc<Self>) -> NotifyCallback {
        let monitor = Arc::clone(self);
        Arc::new(move |data: &[u8]| monitor.notify(data))
    }
}

/// Collects frames into MTU-sized writes.
///
/// The buffer only ever holds whole frames, so no frame is split across
/// two transport writes.
pub struct FlowController<T> {
    transport: T,
    policy: PacingPolicy,
    buffer: Vec<u8>,
    monitor: Arc<DeviceMonitor>,
    cancel: CancellationToken,
}

impl<T: Transport> FlowController<T> {
    pub fn new(transport: T, policy: PacingPolicy) -> Self {
        Self {
            transport,
            buffer: Vec::with_capacity(policy.mtu),
            policy,
            monitor: Arc::new(DeviceMonitor::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Share an existing monitor, e.g. one already subscribed to the device.
    pub fn with_monitor(mut self, monitor: Arc<DeviceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the token, e.g. to start a new job after an abort.
    pub fn set_cancel_token(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    pub fn policy(&self) -> &PacingPolicy {
        &self.policy
    }

    pub fn monitor(&self) -> &Arc<DeviceMonitor> {
        &self.monitor
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Bytes waiting for the next flush.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop queued frames without writing them. Returns how many bytes were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }

    /// Queue one frame, flushing first if it would not fit.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() > self.policy.mtu {
            return Err(CatPrinterError::FrameExceedsMtu {
                len: frame.len(),
                mtu: self.policy.mtu,
            });
        }
        if self.buffer.len() + frame.len() > self.policy.mtu {
            self.flush().await?;
        }
        self.buffer.extend_from_slice(frame);
        Ok(())
    }

    /// Write the buffer out, waiting while the device is paused.
    ///
    /// On a transport error the buffer is kept as it was.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if self.monitor.is_paused() {
            tracing::debug!(pending = self.buffer.len(), "device paused, holding data");
            while self.monitor.is_paused() {
                sleep_or_cancel(&self.cancel, self.policy.pause_poll_interval).await?;
            }
        }
        if self.cancel.is_cancelled() {
            return Err(CatPrinterError::Cancelled);
        }
        tracing::trace!(bytes = self.buffer.len(), "flushing");
        self.transport.write(TX_CHARACTERISTIC, &self.buffer).await?;
        self.buffer.clear();
        sleep_or_cancel(&self.cancel, self.policy.write_interval).await
    }
}
