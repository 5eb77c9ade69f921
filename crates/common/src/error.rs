//! Status codes and error types (thiserror-based).
//!
//! Every fallible encoder operation returns `Result<_, EncodeError>`. Callers
//! that still speak the numeric status protocol map an error onto it with
//! [`EncodeError::status`].

use std::fmt;

use thiserror::Error;

use crate::codec::{Profile, VideoCodec};

/// Numeric result of an encoder operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EncoderStatus {
    Success = 0x00,
    CreateFail = 0x01,
    InitFail = 0x02,
    StartFail = 0x03,
    EncodeFail = 0x04,
    StopFail = 0x05,
    DestroyFail = 0x06,
    RegisterFail = 0x07,
    ResetFail = 0x08,
    ForceKeyFrameFail = 0x09,
    SetEncodeParamsFail = 0x0A,
    /// The backend has no key-frame directive.
    ForceKeyFrameUnsupported = 0x0B,
}

impl EncoderStatus {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "VIDEO_ENCODER_SUCCESS",
            Self::CreateFail => "VIDEO_ENCODER_CREATE_FAIL",
            Self::InitFail => "VIDEO_ENCODER_INIT_FAIL",
            Self::StartFail => "VIDEO_ENCODER_START_FAIL",
            Self::EncodeFail => "VIDEO_ENCODER_ENCODE_FAIL",
            Self::StopFail => "VIDEO_ENCODER_STOP_FAIL",
            Self::DestroyFail => "VIDEO_ENCODER_DESTROY_FAIL",
            Self::RegisterFail => "VIDEO_ENCODER_REGISTER_FAIL",
            Self::ResetFail => "VIDEO_ENCODER_RESET_FAIL",
            Self::ForceKeyFrameFail => "VIDEO_ENCODER_FORCE_KEY_FRAME_FAIL",
            Self::SetEncodeParamsFail => "VIDEO_ENCODER_SET_ENCODE_PARAMS_FAIL",
            Self::ForceKeyFrameUnsupported => "VIDEO_ENCODER_FORCE_KEY_FRAME_UNSUPPORTED",
        }
    }

    /// Status of an operation result.
    pub fn of<T>(result: &Result<T, EncodeError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => e.status(),
        }
    }
}

impl fmt::Display for EncoderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.code())
    }
}

/// A parameter value outside the bounds a backend declares.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("resolution {width}x{height} is not supported")]
    Resolution { width: u32, height: u32 },

    #[error("frame rate {value} is not supported (allowed: {allowed:?})")]
    FrameRate { value: u32, allowed: &'static [u32] },

    #[error("bitrate {value} outside {min}..={max}")]
    Bitrate { value: u32, min: u32, max: u32 },

    #[error("gop size {value} outside {min}..={max}")]
    GopSize { value: u32, min: u32, max: u32 },

    #[error("profile {profile} is not supported for {codec}")]
    Profile { profile: Profile, codec: VideoCodec },

    #[error("unknown profile name: {0}")]
    UnknownProfile(String),
}

impl ParamError {
    /// Name of the offending field, for logging.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => "resolution",
            Self::FrameRate { .. } => "frame_rate",
            Self::Bitrate { .. } => "bitrate",
            Self::GopSize { .. } => "gop_size",
            Self::Profile { .. } | Self::UnknownProfile(_) => "profile",
        }
    }
}

/// Encoder operation failure.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("encoder creation failed: {0}")]
    Create(String),

    #[error("encoder init failed: {0}")]
    Init(String),

    #[error("encoder is not initialized")]
    NotInitialized,

    #[error("input too small: expected at least {expected} bytes, got {actual}")]
    InputTooSmall { expected: usize, actual: usize },

    #[error("encode failed at frame {frame}: {reason}")]
    EncodeFailed { frame: u64, reason: String },

    #[error("encoder reset failed: {0}")]
    Reset(String),

    #[error("force key frame failed: {0}")]
    ForceKeyFrame(String),

    #[error("force key frame is not supported by the {0} backend")]
    ForceKeyFrameUnsupported(&'static str),

    #[error("encode parameters rejected: {0}")]
    InvalidParams(#[from] ParamError),
}

impl EncodeError {
    /// Status code reported for this failure.
    pub fn status(&self) -> EncoderStatus {
        match self {
            Self::Create(_) => EncoderStatus::CreateFail,
            Self::Init(_) => EncoderStatus::InitFail,
            Self::NotInitialized | Self::InputTooSmall { .. } | Self::EncodeFailed { .. } => {
                EncoderStatus::EncodeFail
            }
            Self::Reset(_) => EncoderStatus::ResetFail,
            Self::ForceKeyFrame(_) => EncoderStatus::ForceKeyFrameFail,
            Self::ForceKeyFrameUnsupported(_) => EncoderStatus::ForceKeyFrameUnsupported,
            Self::InvalidParams(_) => EncoderStatus::SetEncodeParamsFail,
        }
    }
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown encoder type {0}")]
    UnknownEncoderType(u32),

    #[error("invalid property {key}: {value:?}")]
    InvalidProperty { key: String, value: String },

    #[error("invalid parameters: {0}")]
    Params(#[from] ParamError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_protocol() {
        assert_eq!(EncoderStatus::Success.code(), 0);
        assert_eq!(EncoderStatus::EncodeFail.code(), 4);
        assert_eq!(EncoderStatus::ResetFail.code(), 8);
        assert_eq!(EncoderStatus::SetEncodeParamsFail.code(), 0x0A);
        assert_eq!(EncoderStatus::ForceKeyFrameUnsupported.code(), 0x0B);
    }

    #[test]
    fn status_display_includes_name_and_code() {
        let s = EncoderStatus::InitFail.to_string();
        assert!(s.contains("VIDEO_ENCODER_INIT_FAIL"));
        assert!(s.contains("0x02"));
    }

    #[test]
    fn errors_map_to_status() {
        assert_eq!(
            EncodeError::InputTooSmall { expected: 10, actual: 5 }.status(),
            EncoderStatus::EncodeFail
        );
        assert_eq!(EncodeError::Init("x".into()).status(), EncoderStatus::InitFail);
        assert_eq!(
            EncodeError::ForceKeyFrameUnsupported("netint").status(),
            EncoderStatus::ForceKeyFrameUnsupported
        );
        let rejected = EncodeError::from(ParamError::Bitrate { value: 1, min: 2, max: 3 });
        assert_eq!(rejected.status(), EncoderStatus::SetEncodeParamsFail);
    }

    #[test]
    fn status_of_result() {
        let ok: Result<(), EncodeError> = Ok(());
        assert_eq!(EncoderStatus::of(&ok), EncoderStatus::Success);
        let err: Result<(), EncodeError> = Err(EncodeError::Reset("device gone".into()));
        assert_eq!(EncoderStatus::of(&err), EncoderStatus::ResetFail);
    }

    #[test]
    fn param_error_names_field() {
        let err = ParamError::FrameRate { value: 45, allowed: &[30, 60] };
        assert_eq!(err.field(), "frame_rate");
        assert!(err.to_string().contains("45"));
    }

    #[test]
    fn config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "settings.json missing");
        let err = ConfigError::from(io_err);
        assert!(err.to_string().contains("settings.json missing"));
    }
}
