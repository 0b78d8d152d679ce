//! Printer configuration options.
//!
//! Every knob a print job takes, with the defaults the printers are known to
//! behave well with. Fields are public; the `with_*` builders that take a
//! bounded value check it, and [`PrinterOptions::validate`] checks the whole
//! set against a model before a printer is connected.

use std::path::PathBuf;

use crate::bitmap::DEFAULT_MAX_SIZE;
use crate::flow::PacingPolicy;
use crate::model::ModelSpec;
use crate::protocol::FRAME_OVERHEAD;
use crate::{CatPrinterError, Result};

/// Energy used for images when none is set.
pub const DEFAULT_IMAGE_ENERGY: u16 = 0x4000;

/// Energy used for text when none is set. Text needs more heat to stay crisp.
pub const DEFAULT_TEXT_ENERGY: u16 = 0x6000;

/// Speed for the default quality.
pub const DEFAULT_SPEED: u8 = 32;

/// Paper fed after a job, in pixels.
pub const DEFAULT_EXTRA_FEED: u16 = 128;

/// Configuration options for a print job.
#[derive(Debug, Clone, PartialEq)]
pub struct PrinterOptions {
    /// Thermal energy, up to `0xffff`. `None` picks the image or text default.
    pub energy: Option<u16>,

    /// Print and feed speed. Lower is quicker; slower heats more evenly.
    pub speed: u8,

    /// Mirror the output left to right.
    pub flip_h: bool,

    /// Print upside down.
    pub flip_v: bool,

    /// Wrap text at spaces.
    pub wrap: bool,

    /// Lay text out right to left.
    pub rtl: bool,

    /// Integer scale applied to font glyphs.
    pub font_scale: usize,

    /// Send blank lines instead of the real ones.
    pub dry_run: bool,

    /// Use run-length encoded lines on models that accept them.
    pub compress: bool,

    /// Paper fed after the job, in pixels.
    pub extra_feed: u16,

    /// Capacity of the bitmap store, in bytes.
    pub max_store_size: usize,

    /// Write the printed raster to this PBM file after the job.
    pub dump_path: Option<PathBuf>,

    /// Batching and pacing of transport writes.
    pub pacing: PacingPolicy,
}

impl Default for PrinterOptions {
    fn default() -> Self {
        Self {
            energy: None,
            speed: DEFAULT_SPEED,
            flip_h: false,
            flip_v: false,
            wrap: true,
            rtl: false,
            font_scale: 1,
            dry_run: false,
            compress: false,
            extra_feed: DEFAULT_EXTRA_FEED,
            max_store_size: DEFAULT_MAX_SIZE,
            dump_path: None,
            pacing: PacingPolicy::default(),
        }
    }
}

impl PrinterOptions {
    /// Create options with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the energy register directly.
    pub fn with_energy(mut self, energy: u16) -> Self {
        self.energy = Some(energy);
        self
    }

    /// Builder: set energy as a share of the maximum, 0.0 to 1.0.
    pub fn with_energy_ratio(mut self, ratio: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(CatPrinterError::InvalidOption(format!(
                "energy ratio must be between 0.0 and 1.0, got {ratio}"
            )));
        }
        self.energy = Some((f32::from(u16::MAX) * ratio) as u16);
        Ok(self)
    }

    /// Builder: set speed from a quality level, 1 (fast) to 4 (best).
    pub fn with_quality(mut self, quality: u8) -> Result<Self> {
        if !(1..=4).contains(&quality) {
            return Err(CatPrinterError::InvalidOption(format!(
                "quality must be between 1 and 4, got {quality}"
            )));
        }
        self.speed = 4 * (quality + 5);
        Ok(self)
    }

    /// Builder: set the raw speed value.
    pub fn with_speed(mut self, speed: u8) -> Self {
        self.speed = speed;
        self
    }

    /// Builder: set horizontal and vertical flips.
    pub fn with_flip(mut self, horizontal: bool, vertical: bool) -> Self {
        self.flip_h = horizontal;
        self.flip_v = vertical;
        self
    }

    pub fn with_wrap(mut self, wrap: bool) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn with_rtl(mut self, rtl: bool) -> Self {
        self.rtl = rtl;
        self
    }

    /// Builder: set the font scale, at least 1.
    pub fn with_font_scale(mut self, scale: usize) -> Result<Self> {
        if scale == 0 {
            return Err(CatPrinterError::InvalidOption("font scale must be at least 1".into()));
        }
        self.font_scale = scale;
        Ok(self)
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_extra_feed(mut self, pixels: u16) -> Self {
        self.extra_feed = pixels;
        self
    }

    pub fn with_max_store_size(mut self, bytes: usize) -> Self {
        self.max_store_size = bytes;
        self
    }

    pub fn with_dump_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump_path = Some(path.into());
        self
    }

    pub fn with_pacing(mut self, pacing: PacingPolicy) -> Self {
        self.pacing = pacing;
        self
    }

    /// Energy for an image job.
    pub fn image_energy(&self) -> u16 {
        self.energy.unwrap_or(DEFAULT_IMAGE_ENERGY)
    }

    /// Energy for a text job.
    pub fn text_energy(&self) -> u16 {
        self.energy.unwrap_or(DEFAULT_TEXT_ENERGY)
    }

    /// Check the options against the printer they will drive.
    ///
    /// The MTU has to hold a whole bitmap frame, since frames are never
    /// split across writes.
    pub fn validate(&self, spec: &ModelSpec) -> Result<()> {
        let line_frame = FRAME_OVERHEAD + spec.line_bytes();
        if self.pacing.mtu < line_frame {
            return Err(CatPrinterError::InvalidOption(format!(
                "mtu {} cannot hold a {line_frame} byte bitmap frame",
                self.pacing.mtu
            )));
        }
        if self.font_scale == 0 {
            return Err(CatPrinterError::InvalidOption("font scale must be at least 1".into()));
        }
        if self.max_store_size < spec.line_bytes() {
            return Err(CatPrinterError::InvalidOption(format!(
                "bitmap store of {} bytes cannot hold one line",
                self.max_store_size
            )));
        }
        Ok(())
    }
}
