//! NETINT Quadra cards through libavcodec.

use vmi_common::{Backend, EncodeParameters, VideoCodec};

use super::{FrameSource, FrameworkApi, FrameworkDriver, FrameworkSession};
use crate::binding::ApiLoader;
use crate::session::EncoderSession;

pub const H264_ENCODER: &str = "h264_ni_quadra_enc";
pub const H265_ENCODER: &str = "h265_ni_quadra_enc";

pub fn encoder_name(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::H264 => H264_ENCODER,
        VideoCodec::H265 => H265_ENCODER,
    }
}

/// Quadra session taking software YUV420P frames.
pub fn session<A: FrameworkApi>(
    loader: ApiLoader<A>,
    codec: VideoCodec,
    params: EncodeParameters,
) -> FrameworkSession<A> {
    let driver = FrameworkDriver::new(loader, Backend::Quadra, codec, encoder_name(codec), FrameSource::Software);
    EncoderSession::new(driver, params)
}
