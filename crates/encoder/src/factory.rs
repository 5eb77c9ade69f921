//! Builds the session for a configured encoder type.
//!
//! The returned encoder has acquired nothing yet; libraries and devices are
//! taken on [`VideoEncoder::init`]. Dropping it runs `destroy`.

use std::sync::Arc;

use tracing::info;
use vmi_common::{Backend, EncodeError, EncodeParameters, EncoderSettings, VideoCodec, VideoEncoder};

#[cfg(feature = "ffmpeg")]
use crate::framework::{quadra, vastai, AvCodec};
#[cfg(feature = "netint")]
use crate::netint::NetintDriver;
use crate::openh264::OpenH264Driver;
use crate::registry::BindingRegistry;
use crate::resource::ResourceSelector;
use crate::vpe::VpeDriver;

/// Create the encoder selected by `settings.encoder_type`.
///
/// Shared backends resolve their library through `registry`. Quadra and
/// Vastai sessions load their own. A backend left out of the build fails
/// with `CreateFail`.
pub fn create_encoder(
    settings: &EncoderSettings,
    registry: &Arc<BindingRegistry>,
) -> Result<Box<dyn VideoEncoder>, EncodeError> {
    let encoder_type = settings.encoder_type;
    let codec = encoder_type.codec();
    let params = settings
        .params
        .unwrap_or_else(|| EncodeParameters::defaults_for(codec));
    info!(%encoder_type, code = encoder_type.code(), %params, "Creating encoder");

    let encoder: Box<dyn VideoEncoder> = match encoder_type.backend() {
        Backend::Software => Box::new(OpenH264Driver::session(registry.openh264_loader(), params)),
        Backend::Netint => netint(registry, codec, params)?,
        Backend::Vpe => Box::new(VpeDriver::session(
            registry.vpe_loader(),
            ResourceSelector::from_settings(&settings.vpe),
            codec,
            params,
        )),
        Backend::Quadra => quadra_session(codec, params)?,
        Backend::Vastai => vastai_session(settings, codec, params)?,
    };
    Ok(encoder)
}

#[cfg(feature = "netint")]
fn netint(
    registry: &Arc<BindingRegistry>,
    codec: VideoCodec,
    params: EncodeParameters,
) -> Result<Box<dyn VideoEncoder>, EncodeError> {
    Ok(Box::new(NetintDriver::session(registry.netint_loader(), codec, params)))
}

#[cfg(not(feature = "netint"))]
fn netint(
    _registry: &Arc<BindingRegistry>,
    _codec: VideoCodec,
    _params: EncodeParameters,
) -> Result<Box<dyn VideoEncoder>, EncodeError> {
    Err(missing_feature(Backend::Netint, "netint"))
}

#[cfg(feature = "ffmpeg")]
fn quadra_session(codec: VideoCodec, params: EncodeParameters) -> Result<Box<dyn VideoEncoder>, EncodeError> {
    Ok(Box::new(quadra::session(Box::new(|| AvCodec::new().map(Arc::new)), codec, params)))
}

#[cfg(feature = "ffmpeg")]
fn vastai_session(
    settings: &EncoderSettings,
    codec: VideoCodec,
    params: EncodeParameters,
) -> Result<Box<dyn VideoEncoder>, EncodeError> {
    Ok(Box::new(vastai::session(
        Box::new(|| AvCodec::new().map(Arc::new)),
        codec,
        settings.vastai.render_node.clone(),
        params,
    )))
}

#[cfg(not(feature = "ffmpeg"))]
fn quadra_session(_codec: VideoCodec, _params: EncodeParameters) -> Result<Box<dyn VideoEncoder>, EncodeError> {
    Err(missing_feature(Backend::Quadra, "ffmpeg"))
}

#[cfg(not(feature = "ffmpeg"))]
fn vastai_session(
    _settings: &EncoderSettings,
    _codec: VideoCodec,
    _params: EncodeParameters,
) -> Result<Box<dyn VideoEncoder>, EncodeError> {
    Err(missing_feature(Backend::Vastai, "ffmpeg"))
}

#[cfg(any(not(feature = "netint"), not(feature = "ffmpeg")))]
fn missing_feature(backend: Backend, feature: &str) -> EncodeError {
    tracing::error!(%backend, feature, "Backend not compiled in");
    EncodeError::Create(format!("built without {feature} support"))
}
