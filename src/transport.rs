//! Transport seam between the print pipeline and the link to the printer.
//!
//! [`Transport`] is what a BLE stack has to provide. [`MemoryTransport`]
//! records traffic for tests and [`DumpTransport`] writes it to a file
//! instead of a device.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use crate::protocol::RX_CHARACTERISTIC;
use crate::{CatPrinterError, Result};

/// Receives raw notification payloads from the device.
pub type NotifyCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Link to a printer.
#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> Result<()>;

    /// Write `data` to `characteristic`, returning once the link accepted it.
    async fn write(&mut self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    /// Deliver notifications from `characteristic` to `callback`.
    async fn subscribe(&mut self, characteristic: Uuid, callback: NotifyCallback) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}

type Responder = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    connected: bool,
    writes: Vec<(Uuid, Vec<u8>)>,
    subscribers: Vec<(Uuid, NotifyCallback)>,
    fail_after: Option<usize>,
    responder: Option<Responder>,
}

/// In-memory transport that records writes and replays notifications.
///
/// Clones share the same state, so a test can keep one handle while the
/// printer owns another.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryTransport")
            .field("connected", &state.connected)
            .field("writes", &state.writes.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write after the first `writes` successful ones.
    pub fn fail_after(self, writes: usize) -> Self {
        self.lock().fail_after = Some(writes);
        self
    }

    /// Answer writes: whatever `responder` returns is emitted as a notification.
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.lock().responder = Some(Arc::new(responder));
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Payloads of every write so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.iter().map(|(_, data)| data.clone()).collect()
    }

    /// Every written byte, concatenated.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.lock().writes.iter().flat_map(|(_, data)| data.iter().copied()).collect()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// Deliver a notification to everyone subscribed to the RX characteristic.
    pub fn emit(&self, data: &[u8]) {
        let callbacks: Vec<NotifyCallback> = self
            .lock()
            .subscribers
            .iter()
            .filter(|(uuid, _)| *uuid == RX_CHARACTERISTIC)
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(data);
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self) -> Result<()> {
        self.lock().connected = true;
        Ok(())
    }

    async fn write(&mut self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let responder = {
            let mut state = self.lock();
            if !state.connected {
                return Err(CatPrinterError::Transport("not connected".into()));
            }
            if state.fail_after.is_some_and(|limit| state.writes.len() >= limit) {
                return Err(CatPrinterError::Transport("link lost".into()));
            }
            state.writes.push((characteristic, data.to_vec()));
            state.responder.clone()
        };
        if let Some(reply) = responder.and_then(|respond| respond(data)) {
            self.emit(&reply);
        }
        Ok(())
    }

    async fn subscribe(&mut self, characteristic: Uuid, callback: NotifyCallback) -> Result<()> {
        self.lock().subscribers.push((characteristic, callback));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.connected = false;
        state.subscribers.clear();
        Ok(())
    }
}

/// Writes traffic to `W` instead of a device.
///
/// Each write is stored as a 2-byte little-endian length followed by the
/// bytes, so the stream can be replayed write by write.
#[derive(Debug)]
pub struct DumpTransport<W> {
    writer: W,
}

impl<W: Write + Send> DumpTransport<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: Write + Send> Transport for DumpTransport<W> {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn write(&mut self, _characteristic: Uuid, data: &[u8]) -> Result<()> {
        let len = u16::try_from(data.len()).map_err(|_| {
            CatPrinterError::Transport(format!("write of {} bytes cannot be dumped", data.len()))
        })?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(data)?;
        Ok(())
    }

    async fn subscribe(&mut self, _characteristic: Uuid, _callback: NotifyCallback) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
