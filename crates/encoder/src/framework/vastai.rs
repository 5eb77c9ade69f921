//! Vastai cards through libavcodec's VAAPI encoders.

use std::path::PathBuf;

use vmi_common::{Backend, EncodeParameters, VideoCodec};

use super::{FrameSource, FrameworkApi, FrameworkDriver, FrameworkSession};
use crate::binding::ApiLoader;
use crate::session::EncoderSession;

pub const H264_ENCODER: &str = "h264_vastapi";
pub const H265_ENCODER: &str = "hevc_vastapi";

pub fn encoder_name(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::H264 => H264_ENCODER,
        VideoCodec::H265 => H265_ENCODER,
    }
}

/// Vastai session uploading every frame to a VAAPI surface on `render_node`.
pub fn session<A: FrameworkApi>(
    loader: ApiLoader<A>,
    codec: VideoCodec,
    render_node: PathBuf,
    params: EncodeParameters,
) -> FrameworkSession<A> {
    let driver = FrameworkDriver::new(
        loader,
        Backend::Vastai,
        codec,
        encoder_name(codec),
        FrameSource::Vaapi { render_node },
    );
    EncoderSession::new(driver, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_names() {
        assert_eq!(encoder_name(VideoCodec::H264), "h264_vastapi");
        assert_eq!(encoder_name(VideoCodec::H265), "hevc_vastapi");
        assert_eq!(super::super::quadra::encoder_name(VideoCodec::H265), "h265_ni_quadra_enc");
    }
}
