//! Encode parameter value type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{Profile, VideoCodec};

/// Default encode width in pixels.
pub const DEFAULT_WIDTH: u32 = 720;
/// Default encode height in pixels.
pub const DEFAULT_HEIGHT: u32 = 1280;
/// Default nominal frame rate.
pub const DEFAULT_FRAME_RATE: u32 = 30;
/// Default key-frame interval in frames.
pub const DEFAULT_GOP_SIZE: u32 = 30;

/// The six values that fully describe an encoder configuration.
///
/// Equality is structural over all six fields. A session keeps an *active*
/// copy and, after an accepted update, a separate *pending* copy; the two are
/// compared whole, never merged field by field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeParameters {
    pub frame_rate: u32,
    pub bitrate: u32,
    pub gop_size: u32,
    pub profile: Profile,
    pub width: u32,
    pub height: u32,
}

impl EncodeParameters {
    /// Defaults for the given coding standard.
    pub fn defaults_for(codec: VideoCodec) -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            bitrate: codec.default_bitrate(),
            gop_size: DEFAULT_GOP_SIZE,
            profile: codec.default_profile(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }

    /// Bytes in one contiguous I420 frame at this resolution.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3 / 2
    }

    /// Whether the picture is wider than it is tall.
    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }

    /// True iff any of the six fields differ.
    pub fn has_changed(&self, other: &EncodeParameters) -> bool {
        self != other
    }
}

impl Default for EncodeParameters {
    fn default() -> Self {
        Self::defaults_for(VideoCodec::H264)
    }
}

impl fmt::Display for EncodeParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{} bitrate={} gop={} profile={}",
            self.width, self.height, self.frame_rate, self.bitrate, self.gop_size, self.profile
        )
    }
}
