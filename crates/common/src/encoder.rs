//! The uniform encoder contract every backend implements.

use std::fmt;

use crate::codec::VideoCodec;
use crate::error::EncodeError;
use crate::types::EncodeParameters;

/// Backend family behind a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    /// OpenH264 software encoder.
    Software,
    /// NETINT T4xx via libxcoder.
    Netint,
    /// VPE transcoder cards via libvpi.
    Vpe,
    /// NETINT Quadra via libavcodec.
    Quadra,
    /// Vastai cards via libavcodec (VAAPI).
    Vastai,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Self::Software => "openh264",
            Self::Netint => "netint",
            Self::Vpe => "vpe",
            Self::Quadra => "quadra",
            Self::Vastai => "vastai",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Observable lifecycle of a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Running,
    /// An accepted parameter change waits for the next encoded frame.
    ParamsPendingReset,
}

/// One encoder session.
///
/// Calls on one session must be serialized by the caller; no method is safe to
/// invoke concurrently on the same instance. Sessions are `Send` so they can be
/// moved to the encode thread.
pub trait VideoEncoder: Send {
    /// Validate parameters, load the backend binding, acquire the device and
    /// open the codec session. A failure releases everything acquired so far.
    fn init(&mut self) -> Result<(), EncodeError>;

    /// Interface symmetry; never fails.
    fn start(&mut self) -> Result<(), EncodeError>;

    /// Encode one contiguous I420 frame.
    ///
    /// The returned slice aliases backend-owned memory and stays valid until
    /// the next call on this session, which the borrow enforces.
    fn encode_frame(&mut self, input: &[u8]) -> Result<&[u8], EncodeError>;

    /// Logical pause; never fails and releases nothing.
    fn stop(&mut self) -> Result<(), EncodeError>;

    /// Release every acquired resource. Idempotent.
    fn destroy(&mut self);

    /// `destroy` + `init` + `start`, applying pending parameters if any.
    fn reset(&mut self) -> Result<(), EncodeError>;

    /// Request the next frame be coded as a key frame.
    fn force_key_frame(&mut self) -> Result<(), EncodeError>;

    /// Validate and stage new parameters; they take effect on the next frame.
    fn set_encode_params(&mut self, params: EncodeParameters) -> Result<(), EncodeError>;

    fn state(&self) -> SessionState;

    /// Parameters the live session was built with.
    fn active_params(&self) -> &EncodeParameters;

    fn backend(&self) -> Backend;

    fn codec(&self) -> VideoCodec;
}
