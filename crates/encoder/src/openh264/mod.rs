//! OpenH264 software encoder.
//!
//! The session creates one `ISVCEncoder` per init, configures it for
//! real-time single-layer coding and feeds it the caller's I420 planes
//! directly (no copy). The encoded frame is the contiguous layer buffer the
//! library owns; it is handed back as a borrow that ends with the next call.
//!
//! # Module Structure
//!
//! - [`ffi`] -- Raw bindings and the `libopenh264.so` loader.
//! - [`OpenH264Api`] -- The calls a session makes, implemented by
//!   [`OpenH264Library`] and by test doubles.
//! - [`OpenH264Driver`] -- The [`SessionDriver`] wrapped by [`OpenH264Session`].

pub mod ffi;

pub use ffi::OpenH264Library;

use std::ffi::{c_int, c_void};
use std::sync::Arc;

use tracing::{debug, error, info};

use vmi_common::params::{ParamBounds, SOFTWARE_BOUNDS};
use vmi_common::{Backend, EncodeError, EncodeParameters, Profile, VideoCodec};

use crate::binding::ApiLoader;
use crate::guard::{NativePtr, Owned};
use crate::marshal::split_i420;
use crate::session::{EncoderSession, SessionDriver};

use ffi::{
    frame_type_name, ISVCEncoder, SEncParamExt, SFrameBSInfo, SSourcePicture, ISVCEncoderVtbl,
    CAMERA_VIDEO_REAL_TIME, CM_RESULT_SUCCESS, CONSTANT_ID, ENCODER_OPTION_DATAFORMAT,
    HIGH_COMPLEXITY, LEVEL_3_2, PRO_BASELINE, PRO_HIGH, PRO_MAIN, RC_BITRATE_MODE,
    ALL_LAYERS, SM_SINGLE_SLICE, VIDEO_FORMAT_I420, VIDEO_FRAME_TYPE_SKIP,
};

/// Frames between long-term reference marks.
const LTR_MARK_PERIOD: u32 = 30;

/// One frame handed to the encoder, borrowed from the caller's buffer.
#[derive(Debug)]
pub struct SourcePicture<'a> {
    pub planes: [&'a [u8]; 3],
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
}

/// OpenH264 calls used by a session.
///
/// Errors are the raw `CM_RETURN` code.
pub trait OpenH264Api: Send + Sync + 'static {
    type Encoder: Send;

    fn create(&self) -> Result<Self::Encoder, i32>;

    /// Load library defaults, apply `params` and set the I420 input format.
    fn initialize(&self, encoder: &mut Self::Encoder, params: &EncodeParameters) -> Result<(), i32>;

    fn force_intra_frame(&self, encoder: &mut Self::Encoder) -> Result<(), i32>;

    /// Encode one picture. An empty slice means the frame was skipped.
    fn encode<'a>(
        &self,
        encoder: &'a mut Self::Encoder,
        picture: &SourcePicture<'_>,
    ) -> Result<&'a [u8], i32>;

    fn uninitialize(&self, encoder: &mut Self::Encoder);

    fn destroy(&self, encoder: &mut Self::Encoder);
}

/// Map our profile onto `EProfileIdc`.
pub fn profile_idc(profile: Profile) -> c_int {
    match profile {
        Profile::Baseline => PRO_BASELINE,
        Profile::Main => PRO_MAIN,
        Profile::High => PRO_HIGH,
    }
}

/// Overwrite library defaults with the real-time, single-layer setup.
pub fn apply_params(ext: &mut SEncParamExt, params: &EncodeParameters) {
    let bitrate = params.bitrate as c_int;
    let fps = params.frame_rate as f32;

    ext.usage_type = CAMERA_VIDEO_REAL_TIME;
    ext.pic_width = params.width as c_int;
    ext.pic_height = params.height as c_int;
    ext.target_bitrate = bitrate;
    ext.max_bitrate = bitrate;
    ext.rc_mode = RC_BITRATE_MODE;
    ext.max_frame_rate = fps;
    ext.padding_flag = 0;
    ext.temporal_layer_num = 1;
    ext.spatial_layer_num = 1;
    ext.sps_pps_id_strategy = CONSTANT_ID;
    ext.prefix_nal_adding_ctrl = false;
    ext.simulcast_avc = false;
    ext.enable_denoise = false;
    ext.enable_background_detection = true;
    ext.enable_scene_change_detect = true;
    ext.enable_adaptive_quant = false;
    ext.enable_frame_skip = false;
    ext.enable_long_term_reference = false;
    ext.ltr_mark_period = LTR_MARK_PERIOD;
    ext.is_lossless_link = false;
    ext.complexity_mode = HIGH_COMPLEXITY;
    ext.num_ref_frame = 1;
    ext.entropy_coding_mode_flag = 1;
    ext.max_nal_size = 0;
    ext.ltr_ref_num = 0;
    ext.multiple_thread_idc = 1;
    ext.loop_filter_disable_idc = 0;
    ext.intra_period = params.gop_size;

    let layer = &mut ext.spatial_layers[0];
    layer.video_width = params.width as c_int;
    layer.video_height = params.height as c_int;
    layer.frame_rate = fps;
    layer.spatial_bitrate = bitrate;
    layer.max_spatial_bitrate = bitrate;
    layer.slice_argument.slice_mode = SM_SINGLE_SLICE;
    layer.profile_idc = profile_idc(params.profile);
    layer.level_idc = LEVEL_3_2;
}

// ---------------------------------------------------------------------------
// Library-backed implementation
// ---------------------------------------------------------------------------

/// A live `ISVCEncoder` and the bitstream info it writes into.
pub struct SvcEncoder {
    raw: NativePtr<ISVCEncoder>,
    output: Box<SFrameBSInfo>,
}

// SAFETY: the encoder and its bitstream info are only touched through
// `&mut SvcEncoder`, from the one session that owns them.
unsafe impl Send for SvcEncoder {}

impl std::fmt::Debug for SvcEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvcEncoder").field("raw", &self.raw.as_ptr()).finish()
    }
}

impl SvcEncoder {
    /// # Safety
    ///
    /// `raw` must be a live encoder returned by `WelsCreateSVCEncoder`.
    unsafe fn vtbl(&self) -> &ISVCEncoderVtbl {
        &**self.raw.as_ptr()
    }

    /// `ForceIntraFrame(true, -1)`. The C++ default for the layer id is not
    /// applied through the vtable, so it is passed explicitly.
    fn force_idr(&mut self) -> c_int {
        // SAFETY: live encoder.
        unsafe { (self.vtbl().force_intra_frame)(self.raw.as_ptr(), true, ALL_LAYERS) }
    }
}

impl OpenH264Api for OpenH264Library {
    type Encoder = SvcEncoder;

    fn create(&self) -> Result<SvcEncoder, i32> {
        let mut raw: *mut ISVCEncoder = std::ptr::null_mut();
        // SAFETY: the entry point writes one encoder pointer into `raw`.
        let rc = unsafe { (self.create)(&mut raw) };
        if rc != CM_RESULT_SUCCESS || raw.is_null() {
            return Err(if rc == CM_RESULT_SUCCESS { -1 } else { rc });
        }
        Ok(SvcEncoder {
            raw: NativePtr(raw),
            output: Box::default(),
        })
    }

    fn initialize(&self, encoder: &mut SvcEncoder, params: &EncodeParameters) -> Result<(), i32> {
        let raw = encoder.raw.as_ptr();
        let mut ext = SEncParamExt::default();
        // SAFETY: `raw` came from `create`; every struct matches codec_app_def.h.
        unsafe {
            let vtbl = encoder.vtbl();
            let rc = (vtbl.get_default_params)(raw, &mut ext);
            if rc != CM_RESULT_SUCCESS {
                return Err(rc);
            }
            apply_params(&mut ext, params);
            let rc = (vtbl.initialize_ext)(raw, &ext);
            if rc != CM_RESULT_SUCCESS {
                return Err(rc);
            }
            let mut format = VIDEO_FORMAT_I420;
            let rc = (vtbl.set_option)(
                raw,
                ENCODER_OPTION_DATAFORMAT,
                &mut format as *mut c_int as *mut c_void,
            );
            if rc != CM_RESULT_SUCCESS {
                return Err(rc);
            }
        }
        Ok(())
    }

    fn force_intra_frame(&self, encoder: &mut SvcEncoder) -> Result<(), i32> {
        let rc = encoder.force_idr();
        if rc == CM_RESULT_SUCCESS {
            Ok(())
        } else {
            Err(rc)
        }
    }

    fn encode<'a>(
        &self,
        encoder: &'a mut SvcEncoder,
        picture: &SourcePicture<'_>,
    ) -> Result<&'a [u8], i32> {
        let width = picture.width as c_int;
        let mut source = SSourcePicture {
            color_format: VIDEO_FORMAT_I420,
            pic_width: width,
            pic_height: picture.height as c_int,
            time_stamp: picture.timestamp_ms,
            ..SSourcePicture::default()
        };
        source.stride[..3].copy_from_slice(&[width, width / 2, width / 2]);
        for (slot, plane) in source.data.iter_mut().zip(picture.planes) {
            // The encoder only reads the source planes.
            *slot = plane.as_ptr() as *mut u8;
        }

        let raw = encoder.raw.as_ptr();
        // SAFETY: live encoder; `source` points into planes that outlive the
        // call and `output` is a properly sized SFrameBSInfo.
        let rc = unsafe {
            let encode_frame = encoder.vtbl().encode_frame;
            encode_frame(raw, &source, &mut *encoder.output)
        };
        if rc != CM_RESULT_SUCCESS {
            return Err(rc);
        }

        let info = &*encoder.output;
        debug!(
            frame_type = frame_type_name(info.frame_type),
            layers = info.layer_num,
            bytes = info.frame_size_in_bytes,
            "OpenH264 frame coded"
        );
        let buffer = info.layer_info[0].bs_buf;
        if info.frame_type == VIDEO_FRAME_TYPE_SKIP || info.frame_size_in_bytes <= 0 || buffer.is_null() {
            return Ok(&[]);
        }
        // SAFETY: the layers of one frame are laid out back to back starting
        // at the first layer's buffer; the library keeps it until the next
        // EncodeFrame, which needs `&mut encoder` and so ends this borrow.
        Ok(unsafe { std::slice::from_raw_parts(buffer, info.frame_size_in_bytes as usize) })
    }

    fn uninitialize(&self, encoder: &mut SvcEncoder) {
        // SAFETY: live encoder; Uninitialize tolerates an unconfigured one.
        let rc = unsafe { (encoder.vtbl().uninitialize)(encoder.raw.as_ptr()) };
        if rc != CM_RESULT_SUCCESS {
            debug!(rc, "OpenH264 Uninitialize returned non-zero");
        }
    }

    fn destroy(&self, encoder: &mut SvcEncoder) {
        // SAFETY: the pointer is destroyed once and nulled right after.
        unsafe { (self.destroy)(encoder.raw.as_ptr()) };
        encoder.raw = NativePtr(std::ptr::null_mut());
    }
}

// ---------------------------------------------------------------------------
// Session driver
// ---------------------------------------------------------------------------

/// Software H.264 session over any [`OpenH264Api`].
pub struct OpenH264Driver<A: OpenH264Api> {
    loader: ApiLoader<A>,
    api: Option<Arc<A>>,
    encoder: Option<Owned<A::Encoder>>,
    params: Option<EncodeParameters>,
}

pub type OpenH264Session<A = OpenH264Library> = EncoderSession<OpenH264Driver<A>>;

impl<A: OpenH264Api> OpenH264Driver<A> {
    pub fn new(loader: ApiLoader<A>) -> Self {
        Self {
            loader,
            api: None,
            encoder: None,
            params: None,
        }
    }

    /// Wrap a new driver in a session.
    pub fn session(loader: ApiLoader<A>, params: EncodeParameters) -> OpenH264Session<A> {
        EncoderSession::new(Self::new(loader), params)
    }
}

impl<A: OpenH264Api> SessionDriver for OpenH264Driver<A> {
    fn backend(&self) -> Backend {
        Backend::Software
    }

    fn codec(&self) -> VideoCodec {
        VideoCodec::H264
    }

    fn bounds(&self) -> &'static ParamBounds {
        &SOFTWARE_BOUNDS
    }

    fn is_open(&self) -> bool {
        self.encoder.is_some()
    }

    fn open(&mut self, params: &EncodeParameters) -> Result<(), EncodeError> {
        let api = (self.loader)().map_err(|e| {
            error!(error = %e, "OpenH264 library unavailable");
            EncodeError::Init(e.to_string())
        })?;

        let created = api.create().map_err(|rc| {
            error!(rc, "WelsCreateSVCEncoder failed");
            EncodeError::Init(format!("WelsCreateSVCEncoder returned {rc}"))
        })?;
        let release_api = Arc::clone(&api);
        let mut encoder = Owned::new("openh264 encoder", created, move |e| release_api.destroy(e));

        api.initialize(encoder.get_mut(), params).map_err(|rc| {
            error!(rc, %params, "OpenH264 InitializeExt failed");
            EncodeError::Init(format!("InitializeExt returned {rc}"))
        })?;

        info!(%params, "OpenH264 encoder ready");
        self.encoder = Some(encoder);
        self.api = Some(api);
        self.params = Some(*params);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            if let Some(api) = &self.api {
                api.uninitialize(encoder.get_mut());
            }
            encoder.release();
        }
        self.api = None;
        self.params = None;
    }

    /// Size captured when the encoder was opened, not the latest accepted one.
    fn min_input_len(&self, active: &EncodeParameters) -> usize {
        self.params.unwrap_or(*active).frame_size()
    }

    fn force_key_frame(&mut self) -> Result<(), EncodeError> {
        let (api, encoder) = match (&self.api, &mut self.encoder) {
            (Some(api), Some(encoder)) => (api, encoder),
            _ => return Err(EncodeError::ForceKeyFrame("encoder is not initialized".into())),
        };
        api.force_intra_frame(encoder.get_mut()).map_err(|rc| {
            error!(rc, "OpenH264 ForceIntraFrame failed");
            EncodeError::ForceKeyFrame(format!("ForceIntraFrame returned {rc}"))
        })
    }

    fn encode(&mut self, input: &[u8], frame: u64) -> Result<&[u8], EncodeError> {
        let (api, encoder, params) = match (&self.api, &mut self.encoder, &self.params) {
            (Some(api), Some(encoder), Some(params)) => (api, encoder, params),
            _ => return Err(EncodeError::NotInitialized),
        };
        let planes = split_i420(input, params.width, params.height).map_err(|e| {
            EncodeError::EncodeFailed {
                frame,
                reason: e.to_string(),
            }
        })?;
        let picture = SourcePicture {
            planes,
            width: params.width,
            height: params.height,
            timestamp_ms: (frame * 1000 / u64::from(params.frame_rate.max(1))) as i64,
        };
        api.encode(encoder.get_mut(), &picture)
            .map_err(|rc| EncodeError::EncodeFailed {
                frame,
                reason: format!("EncodeFrame returned {rc}"),
            })
    }
}
