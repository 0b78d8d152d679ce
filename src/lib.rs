//! Cat printer library: drive GB/MX series thermal printers over BLE.
//!
//! Main modules:
//! - protocol: command framing, checksum and device notifications
//! - model: supported models and their capabilities
//! - flow: MTU batching, pacing and pause handling
//! - session: the prepare / draw / finish state machine
//! - bitmap: page-aware raster store and PBM interchange
//! - transform: bit-level flips
//! - font: PF2 bitmap fonts
//! - text: text to raster lines
//! - transport: the BLE seam, plus in-memory and dump transports
//! - ble: btleplug transport (feature `ble`)
//! - printer: high-level jobs

#[cfg(feature = "ble")]
pub mod ble;
pub mod bitmap;
pub mod flow;
pub mod font;
pub mod model;
pub mod options;
pub mod printer;
pub mod protocol;
pub mod session;
pub mod text;
pub mod transform;
pub mod transport;

/// BLE API: scan for printers and connect to one
#[cfg(feature = "ble")]
pub use ble::{BleTransport, DeviceInfo, find, scan};
pub use bitmap::{BitmapStore, Page};
pub use flow::{DeviceMonitor, FlowController, PacingPolicy};
pub use font::{Glyph, Pf2Font, ScaledFont};
pub use model::{Model, ModelSpec};
pub use options::PrinterOptions;
/// High-level printer API
pub use printer::CatPrinter;
/// Protocol utilities (frames, checksums, device state)
pub use protocol::*;
pub use session::{PrintSession, SessionState};
pub use text::TextCanvas;
pub use transform::{flip, flip_in_place};
pub use transport::{DumpTransport, MemoryTransport, NotifyCallback, Transport};

/// Stage of a print job, used to report where a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Preparing,
    Streaming,
    Finalizing,
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JobStage::Preparing => "preparing",
            JobStage::Streaming => "streaming",
            JobStage::Finalizing => "finalizing",
        })
    }
}

/// Errors that can occur while talking to a printer or rendering for it.
#[derive(Debug, thiserror::Error)]
pub enum CatPrinterError {
    #[error("Command payload too big ({0} > 255)")]
    PayloadTooLarge(usize),

    #[error("Frame of {len} bytes can never fit a {mtu} byte transport write")]
    FrameExceedsMtu { len: usize, mtu: usize },

    #[error("Invalid image data: {0}")]
    InvalidImageData(String),

    #[error("PF2 font is broken: {0}")]
    BrokenFont(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Input is not a text file")]
    InvalidText,

    #[error("Print session is not prepared")]
    SessionNotPrepared,

    #[error("Print session already in progress")]
    SessionInProgress,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Print job cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Print job failed while {stage}: {source}")]
    Job {
        stage: JobStage,
        #[source]
        source: Box<CatPrinterError>,
    },
}

impl CatPrinterError {
    /// Wrap an error with the job stage it happened in.
    ///
    /// Errors that already carry a stage are returned as they are.
    pub fn at(self, stage: JobStage) -> Self {
        match self {
            err @ CatPrinterError::Job { .. } => err,
            err => CatPrinterError::Job {
                stage,
                source: Box::new(err),
            },
        }
    }

    /// The stage a job failed in, if known.
    pub fn stage(&self) -> Option<JobStage> {
        match self {
            CatPrinterError::Job { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Result type alias for catprint operations.
pub type Result<T> = std::result::Result<T, CatPrinterError>;
