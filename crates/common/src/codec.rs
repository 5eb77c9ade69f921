//! Coding standards and profiles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParamError;

/// Video coding standard produced by a backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    /// Human-readable name (for display/logging).
    pub fn display_name(self) -> &'static str {
        match self {
            Self::H264 => "h.264",
            Self::H265 => "h.265",
        }
    }

    /// Default target bitrate when nothing has been configured yet.
    pub fn default_bitrate(self) -> u32 {
        match self {
            Self::H264 => 5_000_000,
            Self::H265 => 3_000_000,
        }
    }

    /// Default profile for the standard.
    pub fn default_profile(self) -> Profile {
        match self {
            Self::H264 => Profile::Baseline,
            Self::H265 => Profile::Main,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Encoding profile.
///
/// Serialized in lowercase (`"baseline"`, `"main"`, `"high"`), which is also
/// the form used by persisted configuration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Baseline,
    Main,
    High,
}

impl Profile {
    pub const ALL: [Profile; 3] = [Profile::Baseline, Profile::Main, Profile::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Main => "main",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "baseline" => Ok(Self::Baseline),
            "main" => Ok(Self::Main),
            "high" => Ok(Self::High),
            other => Err(ParamError::UnknownProfile(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_parses_lowercase_names() {
        assert_eq!("baseline".parse::<Profile>().unwrap(), Profile::Baseline);
        assert_eq!("main".parse::<Profile>().unwrap(), Profile::Main);
        assert_eq!("high".parse::<Profile>().unwrap(), Profile::High);
    }

    #[test]
    fn profile_rejects_unknown_names() {
        let err = "Main".parse::<Profile>().unwrap_err();
        assert!(err.to_string().contains("Main"));
    }

    #[test]
    fn profile_serde_uses_lowercase() {
        let json = serde_json::to_string(&Profile::High).unwrap();
        assert_eq!(json, "\"high\"");
        let back: Profile = serde_json::from_str("\"main\"").unwrap();
        assert_eq!(back, Profile::Main);
    }

    #[test]
    fn codec_defaults() {
        assert_eq!(VideoCodec::H264.default_bitrate(), 5_000_000);
        assert_eq!(VideoCodec::H265.default_bitrate(), 3_000_000);
        assert_eq!(VideoCodec::H265.default_profile(), Profile::Main);
        assert_eq!(VideoCodec::H264.to_string(), "h.264");
    }
}
