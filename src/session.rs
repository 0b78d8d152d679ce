//! One print job on the wire: prepare, stream bitmap lines, finish.

use crate::flow::FlowController;
use crate::model::{Model, ModelSpec};
use crate::protocol::{
    Command, CommandType, LATTICE_END, LATTICE_START, frame, reverse_bits, run_length_encode,
};
use crate::transport::Transport;
use crate::{CatPrinterError, Result};

/// Speed used while feeding out the finished job.
const FINISH_SPEED: u8 = 8;

/// DPI register value for 200 dpi.
const DPI_200: u8 = 50;

/// Where a session is in its print cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Preparing,
    Streaming,
    Finalizing,
}

/// Drives a printer through one job at a time.
///
/// `prepare` moves `Idle` to `Streaming`, `draw` is only valid while
/// streaming and `finish` returns to `Idle`.
pub struct PrintSession<T> {
    flow: FlowController<T>,
    model: Model,
    spec: ModelSpec,
    state: SessionState,
    dry_run: bool,
    compress: bool,
}

impl<T: Transport> PrintSession<T> {
    pub fn new(flow: FlowController<T>, model: Model) -> Self {
        Self {
            flow,
            model,
            spec: model.spec(),
            state: SessionState::Idle,
            dry_run: false,
            compress: false,
        }
    }

    /// Send blank lines in place of the real ones.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run-length encode lines when the model accepts it and it saves bytes.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn flow(&self) -> &FlowController<T> {
        &self.flow
    }

    pub fn flow_mut(&mut self) -> &mut FlowController<T> {
        &mut self.flow
    }

    pub fn into_flow(self) -> FlowController<T> {
        self.flow
    }

    /// Configure the printer and open the lattice.
    pub async fn prepare(&mut self, speed: u8, energy: u16) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(CatPrinterError::SessionInProgress);
        }
        tracing::info!(model = %self.model, speed, energy, "preparing print session");
        self.state = SessionState::Preparing;
        match self.send_prepare(speed, energy).await {
            Ok(()) => {
                self.state = SessionState::Streaming;
                self.report_faults();
                Ok(())
            }
            Err(err) => {
                self.flow.discard();
                self.state = SessionState::Idle;
                Err(err)
            }
        }
    }

    async fn send_prepare(&mut self, speed: u8, energy: u16) -> Result<()> {
        self.flow.flush().await?;
        self.get_device_state().await?;
        self.command(Command::SetDpi, &[DPI_200]).await?;
        self.set_speed(speed).await?;
        self.command(Command::SetEnergy, &energy.to_le_bytes()).await?;
        self.command(Command::ApplyEnergy, &[0x01]).await?;
        self.command(Command::UpdateDevice, &[0x00]).await?;
        self.command(Command::Lattice, &LATTICE_START).await?;
        self.flow.flush().await
    }

    /// Queue one packed line (PBM bit order).
    pub async fn draw(&mut self, line: &[u8]) -> Result<()> {
        if self.state != SessionState::Streaming {
            return Err(CatPrinterError::SessionNotPrepared);
        }
        self.draw_line(line).await
    }

    async fn draw_line(&mut self, line: &[u8]) -> Result<()> {
        let blank;
        let line = if self.dry_run {
            blank = vec![0; line.len()];
            &blank[..]
        } else {
            line
        };
        if self.compress && self.spec.supports_compressed_transfer {
            let encoded = run_length_encode(line);
            if encoded.len() < line.len() {
                return self.command(Command::CompressedBitmap, &encoded).await;
            }
        }
        let data: Vec<u8> = line.iter().map(|&b| reverse_bits(b)).collect();
        self.command(Command::Bitmap, &data).await
    }

    /// Close the lattice, feed `extra_feed` pixels of paper and flush.
    pub async fn finish(&mut self, extra_feed: u16) -> Result<()> {
        if self.state != SessionState::Streaming {
            return Err(CatPrinterError::SessionNotPrepared);
        }
        self.state = SessionState::Finalizing;
        self.flow.flush().await?;
        self.command(Command::Lattice, &LATTICE_END).await?;
        self.set_speed(FINISH_SPEED).await?;
        if self.spec.has_feed_defect {
            let blank = vec![0; self.spec.line_bytes()];
            for _ in 0..extra_feed {
                self.command(Command::Bitmap, &blank).await?;
            }
        } else {
            self.feed(extra_feed).await?;
        }
        self.get_device_state().await?;
        self.flow.flush().await?;
        self.state = SessionState::Idle;
        tracing::info!(model = %self.model, "print session finished");
        self.report_faults();
        Ok(())
    }

    /// Drop anything queued and return to `Idle` after a failed job.
    pub fn reset(&mut self) -> usize {
        let dropped = self.flow.discard();
        if self.state != SessionState::Idle {
            tracing::debug!(state = ?self.state, dropped, "resetting print session");
        }
        self.state = SessionState::Idle;
        dropped
    }

    pub async fn feed(&mut self, pixels: u16) -> Result<()> {
        self.command(Command::Feed, &pixels.to_le_bytes()).await
    }

    pub async fn retract(&mut self, pixels: u16) -> Result<()> {
        self.command(Command::Retract, &pixels.to_le_bytes()).await
    }

    pub async fn set_speed(&mut self, speed: u8) -> Result<()> {
        self.command(Command::SetSpeed, &[speed]).await
    }

    pub async fn get_device_state(&mut self) -> Result<()> {
        self.command(Command::GetDeviceState, &[0x00]).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.flow.flush().await
    }

    async fn command(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        let frame = frame(command, CommandType::Transfer, payload)?;
        self.flow.send(&frame).await
    }

    fn report_faults(&self) {
        if let Some(state) = self.flow.monitor().state() {
            if state.has_faults() {
                tracing::warn!(faults = ?state.faults(), "printer reports a fault");
            }
        }
    }
}
