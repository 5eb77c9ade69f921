//! Encoders reached through libavcodec.
//!
//! Quadra and Vastai cards ship as libavcodec encoders, so both share this
//! driver and differ only in the encoder name and in whether frames are
//! uploaded to a VAAPI surface first. The driver owns one codec context,
//! one software frame and one packet; all three live until destroy.
//!
//! # Module Structure
//!
//! - [`quadra`] -- NETINT Quadra encoder names
//! - [`vastai`] -- Vastai encoder names and VAAPI render node
//! - `native` -- the ffmpeg-next implementation (`ffmpeg` feature)

pub mod quadra;
pub mod vastai;

#[cfg(feature = "ffmpeg")]
mod native;

#[cfg(feature = "ffmpeg")]
pub use native::{AvCodec, AvEncoder};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info};

use vmi_common::params::{ParamBounds, FRAMEWORK_BOUNDS};
use vmi_common::{Backend, EncodeError, EncodeParameters, Profile, VideoCodec};

use crate::binding::ApiLoader;
use crate::guard::Owned;
use crate::marshal::{frame_size, marshal_i420, FrameLayout};
use crate::session::{submit_with_retry, EncoderSession, SessionDriver};

/// `AVERROR(EAGAIN)` on Linux.
pub const AVERROR_EAGAIN: i32 = -11;
/// `AVERROR_EOF`, `FFERRTAG('E','O','F',' ')`.
pub const AVERROR_EOF: i32 = -0x2046_4f45;
/// `AVERROR_ENCODER_NOT_FOUND`, `FFERRTAG(0xF8,'E','N','C')`.
pub const AVERROR_ENCODER_NOT_FOUND: i32 = -0x434e_45f8;

/// Buffer alignment libavcodec allocates frames with.
pub const FRAME_ALIGNMENT: u32 = 32;

const PROFILE_H264_BASELINE: i32 = 66;
const PROFILE_H264_MAIN: i32 = 77;
const PROFILE_H264_HIGH: i32 = 100;
const PROFILE_HEVC_MAIN: i32 = 1;

/// Where encoded frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSource {
    /// The encoder takes software YUV420P frames.
    Software,
    /// Frames are uploaded to VAAPI surfaces on this render node.
    Vaapi { render_node: PathBuf },
}

/// Everything needed to open one libavcodec encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkConfig {
    pub encoder_name: &'static str,
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: u32,
    pub gop_size: u32,
    pub profile: Profile,
    pub source: FrameSource,
}

impl FrameworkConfig {
    /// libavcodec profile id (`FF_PROFILE_*`).
    pub fn profile_id(&self) -> i32 {
        match (self.codec, self.profile) {
            (VideoCodec::H265, _) => PROFILE_HEVC_MAIN,
            (VideoCodec::H264, Profile::Baseline) => PROFILE_H264_BASELINE,
            (VideoCodec::H264, Profile::Main) => PROFILE_H264_MAIN,
            (VideoCodec::H264, Profile::High) => PROFILE_H264_HIGH,
        }
    }
}

/// A writable software frame.
#[derive(Debug)]
pub struct FramePlanes<'a> {
    pub planes: [&'a mut [u8]; 3],
    pub strides: [usize; 3],
}

/// libavcodec calls used by a session. Errors are `AVERROR` codes.
pub trait FrameworkApi: Send + Sync + 'static {
    /// Codec context, software frame, optional hardware upload and packet.
    type Encoder: Send;

    fn open_encoder(&self, config: &FrameworkConfig) -> Result<Self::Encoder, i32>;
    /// Make the software frame writable and hand out its planes.
    fn frame_planes<'a>(&self, encoder: &'a mut Self::Encoder) -> Result<FramePlanes<'a>, i32>;
    /// Send the software frame (uploading it first where needed).
    fn send_frame(&self, encoder: &mut Self::Encoder, pts: i64) -> Result<(), i32>;
    /// Receive into the encoder's packet, returning its size.
    fn receive_packet(&self, encoder: &mut Self::Encoder) -> Result<usize, i32>;
    fn packet<'a>(&self, encoder: &'a Self::Encoder) -> &'a [u8];
    /// Signal end of stream and drop whatever is still queued.
    fn flush(&self, encoder: &mut Self::Encoder);
}

/// Quadra or Vastai session over any [`FrameworkApi`].
pub struct FrameworkDriver<A: FrameworkApi> {
    loader: ApiLoader<A>,
    backend: Backend,
    codec: VideoCodec,
    encoder_name: &'static str,
    source: FrameSource,
    api: Option<Arc<A>>,
    encoder: Option<Owned<A::Encoder>>,
    params: Option<EncodeParameters>,
    packet_len: usize,
}

#[cfg(feature = "ffmpeg")]
pub type FrameworkSession<A = AvCodec> = EncoderSession<FrameworkDriver<A>>;
#[cfg(not(feature = "ffmpeg"))]
pub type FrameworkSession<A> = EncoderSession<FrameworkDriver<A>>;

impl<A: FrameworkApi> FrameworkDriver<A> {
    pub fn new(
        loader: ApiLoader<A>,
        backend: Backend,
        codec: VideoCodec,
        encoder_name: &'static str,
        source: FrameSource,
    ) -> Self {
        Self {
            loader,
            backend,
            codec,
            encoder_name,
            source,
            api: None,
            encoder: None,
            params: None,
            packet_len: 0,
        }
    }

    pub fn encoder_name(&self) -> &'static str {
        self.encoder_name
    }

    fn config(&self, params: &EncodeParameters) -> FrameworkConfig {
        FrameworkConfig {
            encoder_name: self.encoder_name,
            codec: self.codec,
            width: params.width,
            height: params.height,
            frame_rate: params.frame_rate,
            bitrate: params.bitrate,
            gop_size: params.gop_size,
            profile: params.profile,
            source: self.source.clone(),
        }
    }
}

impl<A: FrameworkApi> SessionDriver for FrameworkDriver<A> {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn codec(&self) -> VideoCodec {
        self.codec
    }

    fn bounds(&self) -> &'static ParamBounds {
        &FRAMEWORK_BOUNDS
    }

    fn is_open(&self) -> bool {
        self.encoder.is_some()
    }

    fn open(&mut self, params: &EncodeParameters) -> Result<(), EncodeError> {
        let api = (self.loader)().map_err(|e| {
            error!(error = %e, "libavcodec unavailable");
            EncodeError::Init(e.to_string())
        })?;
        let config = self.config(params);
        let encoder = api.open_encoder(&config).map_err(|rc| {
            error!(rc, encoder = self.encoder_name, "Failed to open encoder");
            EncodeError::Init(format!("{} open returned {rc}", self.encoder_name))
        })?;
        let release = Arc::clone(&api);
        self.encoder = Some(Owned::new("avcodec encoder", encoder, move |e| release.flush(e)));
        self.api = Some(api);
        self.params = Some(*params);
        self.packet_len = 0;
        info!(encoder = self.encoder_name, %params, "libavcodec encoder opened");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            encoder.release();
            info!(encoder = self.encoder_name, "libavcodec encoder closed");
        }
        self.api = None;
        self.params = None;
        self.packet_len = 0;
    }

    fn encode(&mut self, input: &[u8], frame: u64) -> Result<&[u8], EncodeError> {
        let failed = |reason: String| EncodeError::EncodeFailed { frame, reason };
        let (api, encoder, params) = match (&self.api, &mut self.encoder, &self.params) {
            (Some(api), Some(encoder), Some(params)) => (api, encoder.get_mut(), params),
            _ => return Err(EncodeError::NotInitialized),
        };

        let FramePlanes { planes, strides } = api
            .frame_planes(encoder)
            .map_err(|rc| failed(format!("frame not writable: {rc}")))?;
        let layout = FrameLayout::with_strides(params.width, params.height, strides);
        marshal_i420(input, params.width, params.height, &layout, planes).map_err(|e| failed(e.to_string()))?;

        let accepted = frame_size(params.width, params.height) as i64;
        submit_with_retry(|| match api.send_frame(encoder, frame as i64) {
            Ok(()) => accepted,
            Err(AVERROR_EAGAIN) => 0,
            Err(rc) => i64::from(rc.min(-1)),
        })
        .map_err(|e| {
            error!(error = %e, "avcodec_send_frame failed");
            failed(e.to_string())
        })?;

        self.packet_len = match api.receive_packet(encoder) {
            Ok(len) => len,
            Err(AVERROR_EAGAIN) | Err(AVERROR_EOF) => {
                debug!(frame, "Encoder buffered the frame");
                0
            }
            Err(rc) => {
                error!(rc, "avcodec_receive_packet failed");
                return Err(failed(format!("avcodec_receive_packet returned {rc}")));
            }
        };
        let packet = api.packet(encoder);
        Ok(&packet[..self.packet_len.min(packet.len())])
    }
}
