//! Encoder selection and session settings (serde, JSON on disk).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::codec::VideoCodec;
use crate::encoder::Backend;
use crate::error::ConfigError;
use crate::types::EncodeParameters;

/// Externally configured backend selector.
///
/// Serialized as its integer code, the form deployment tooling writes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum EncoderType {
    #[default]
    OpenH264 = 0,
    NetintH264 = 1,
    NetintH265 = 2,
    VastaiH264 = 3,
    VastaiH265 = 4,
    QuadraH264 = 5,
    QuadraH265 = 6,
    VpeH264 = 7,
    VpeH265 = 8,
}

impl EncoderType {
    pub fn backend(self) -> Backend {
        match self {
            Self::OpenH264 => Backend::Software,
            Self::NetintH264 | Self::NetintH265 => Backend::Netint,
            Self::VastaiH264 | Self::VastaiH265 => Backend::Vastai,
            Self::QuadraH264 | Self::QuadraH265 => Backend::Quadra,
            Self::VpeH264 | Self::VpeH265 => Backend::Vpe,
        }
    }

    pub fn codec(self) -> VideoCodec {
        match self {
            Self::OpenH264
            | Self::NetintH264
            | Self::VastaiH264
            | Self::QuadraH264
            | Self::VpeH264 => VideoCodec::H264,
            Self::NetintH265 | Self::VastaiH265 | Self::QuadraH265 | Self::VpeH265 => {
                VideoCodec::H265
            }
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for EncoderType {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::OpenH264,
            1 => Self::NetintH264,
            2 => Self::NetintH265,
            3 => Self::VastaiH264,
            4 => Self::VastaiH265,
            5 => Self::QuadraH264,
            6 => Self::QuadraH265,
            7 => Self::VpeH264,
            8 => Self::VpeH265,
            other => return Err(ConfigError::UnknownEncoderType(other)),
        })
    }
}

impl From<EncoderType> for u32 {
    fn from(value: EncoderType) -> Self {
        value.code()
    }
}

impl fmt::Display for EncoderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.backend(), self.codec())
    }
}

/// Where the VPE resource selector looks for device nodes and telemetry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VpeSettings {
    /// Directory holding `transcoder{N}` device nodes.
    pub dev_root: PathBuf,
    /// Directory holding `transcoder{N}/{power_state,enc_util,mem_info}`.
    pub sysfs_root: PathBuf,
}

impl Default for VpeSettings {
    fn default() -> Self {
        Self {
            dev_root: PathBuf::from("/dev"),
            sysfs_root: PathBuf::from("/sys/class/misc"),
        }
    }
}

/// Vastai hardware device selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VastaiSettings {
    /// DRM render node the VAAPI device context is created on.
    pub render_node: PathBuf,
}

impl Default for VastaiSettings {
    fn default() -> Self {
        Self {
            render_node: PathBuf::from("/dev/dri/renderD128"),
        }
    }
}

/// Everything needed to build one encoder session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub encoder_type: EncoderType,
    /// Initial parameters. `None` selects the codec defaults.
    pub params: Option<EncodeParameters>,
    /// Directory searched before the platform library path.
    pub library_dir: Option<PathBuf>,
    pub vpe: VpeSettings,
    pub vastai: VastaiSettings,
}

impl EncoderSettings {
    pub fn new(encoder_type: EncoderType) -> Self {
        Self {
            encoder_type,
            ..Self::default()
        }
    }

    /// Parse settings from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_json(&text)?;
        info!(
            path = %path.display(),
            encoder_type = %settings.encoder_type,
            "Loaded encoder settings"
        );
        Ok(settings)
    }

    /// Parameters a new session starts with.
    pub fn initial_params(&self) -> EncodeParameters {
        self.params
            .unwrap_or_else(|| EncodeParameters::defaults_for(self.encoder_type.codec()))
    }
}
