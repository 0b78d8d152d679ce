//! Supported printer models and their capabilities.
//!
//! A model is resolved once from the advertised BLE name; everything after
//! that asks the [`ModelSpec`] instead of looking at the name again.

/// Standard print width in pixels.
pub const PAPER_WIDTH: usize = 384;

/// Capabilities of a printer model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    /// Pixels per printed line.
    pub paper_width: usize,
    /// Accepts run-length encoded bitmap lines.
    pub supports_compressed_transfer: bool,
    /// Mishandles the feed command; paper is fed by drawing blank lines instead.
    pub has_feed_defect: bool,
}

impl ModelSpec {
    const fn new(supports_compressed_transfer: bool, has_feed_defect: bool) -> Self {
        Self {
            paper_width: PAPER_WIDTH,
            supports_compressed_transfer,
            has_feed_defect,
        }
    }

    /// Packed bytes per printed line.
    pub const fn line_bytes(&self) -> usize {
        self.paper_width / 8
    }
}

/// Known printer models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Model {
    /// Generic fallback for unknown devices.
    #[default]
    Zz00,
    Gb01,
    Gb02,
    Gb03,
    Gt01,
    Mx05,
    Mx06,
    Mx08,
    Mx09,
    Mx10,
    Yt01,
    /// An MX series device that is not in the table.
    OtherMx,
}

impl Model {
    /// Every model with a name of its own.
    pub const KNOWN: [Model; 11] = [
        Model::Zz00,
        Model::Gb01,
        Model::Gb02,
        Model::Gb03,
        Model::Gt01,
        Model::Mx05,
        Model::Mx06,
        Model::Mx08,
        Model::Mx09,
        Model::Mx10,
        Model::Yt01,
    ];

    /// Resolve a model from its advertised name.
    ///
    /// Returns `None` for names that are neither listed nor MX series.
    pub fn from_name(name: &str) -> Option<Model> {
        if let Some(model) = Self::KNOWN.into_iter().find(|m| m.name() == name) {
            return Some(model);
        }
        name.starts_with("MX").then_some(Model::OtherMx)
    }

    /// Resolve a model, falling back to the generic one.
    pub fn from_name_or_generic(name: &str) -> Model {
        Self::from_name(name).unwrap_or_default()
    }

    pub fn name(self) -> &'static str {
        match self {
            Model::Zz00 => "_ZZ00",
            Model::Gb01 => "GB01",
            Model::Gb02 => "GB02",
            Model::Gb03 => "GB03",
            Model::Gt01 => "GT01",
            Model::Mx05 => "MX05",
            Model::Mx06 => "MX06",
            Model::Mx08 => "MX08",
            Model::Mx09 => "MX09",
            Model::Mx10 => "MX10",
            Model::Yt01 => "YT01",
            Model::OtherMx => "MX",
        }
    }

    pub fn spec(self) -> ModelSpec {
        match self {
            Model::Zz00 | Model::Gb01 | Model::Gb02 | Model::Gt01 | Model::Yt01 => {
                ModelSpec::new(false, false)
            }
            Model::Gb03 | Model::OtherMx => ModelSpec::new(true, false),
            Model::Mx05 | Model::Mx06 | Model::Mx08 | Model::Mx09 | Model::Mx10 => {
                ModelSpec::new(true, true)
            }
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
