//! Raw FFI bindings for the OpenH264 encoder (`libopenh264.so`, 2.x ABI).
//!
//! Only the two exported entry points are resolved by name. Everything else
//! is reached through the `ISVCEncoder` vtable returned by
//! `WelsCreateSVCEncoder`.
//!
//! Reference: `codec_api.h`, `codec_app_def.h`, `codec_def.h`.

use std::ffi::{c_int, c_uint, c_void};
use std::path::Path;

use tracing::info;

use crate::binding::RawBinding;
use crate::error::BindingError;

pub const LIBRARY_NAME: &str = "libopenh264.so";

const WELS_CREATE_SVC_ENCODER: &str = "WelsCreateSVCEncoder";
const WELS_DESTROY_SVC_ENCODER: &str = "WelsDestroySVCEncoder";

pub const REQUIRED_SYMBOLS: &[&str] = &[WELS_CREATE_SVC_ENCODER, WELS_DESTROY_SVC_ENCODER];

// ---------------------------------------------------------------------------
// Enumerations (plain ints in the C ABI)
// ---------------------------------------------------------------------------

/// `cmResultSuccess`.
pub const CM_RESULT_SUCCESS: c_int = 0;

/// `EUsageType::CAMERA_VIDEO_REAL_TIME`.
pub const CAMERA_VIDEO_REAL_TIME: c_int = 0;

/// `RC_MODES::RC_BITRATE_MODE`.
pub const RC_BITRATE_MODE: c_int = 1;

/// `ECOMPLEXITY_MODE::HIGH_COMPLEXITY`.
pub const HIGH_COMPLEXITY: c_int = 2;

/// `EParameterSetStrategy::CONSTANT_ID`.
pub const CONSTANT_ID: c_int = 0;

/// `SliceModeEnum::SM_SINGLE_SLICE`.
pub const SM_SINGLE_SLICE: c_uint = 0;

/// `EProfileIdc` values.
pub const PRO_BASELINE: c_int = 66;
pub const PRO_MAIN: c_int = 77;
pub const PRO_HIGH: c_int = 100;

/// `ELevelIdc::LEVEL_3_2`.
pub const LEVEL_3_2: c_int = 32;

/// `EVideoFormatType::videoFormatI420`.
pub const VIDEO_FORMAT_I420: c_int = 23;

/// `ENCODER_OPTION::ENCODER_OPTION_DATAFORMAT`.
pub const ENCODER_OPTION_DATAFORMAT: c_int = 0;

/// `iLayerId` for `ForceIntraFrame`: every spatial layer.
pub const ALL_LAYERS: c_int = -1;

/// `EVideoFrameType` values.
pub const VIDEO_FRAME_TYPE_INVALID: c_int = 0;
pub const VIDEO_FRAME_TYPE_IDR: c_int = 1;
pub const VIDEO_FRAME_TYPE_I: c_int = 2;
pub const VIDEO_FRAME_TYPE_P: c_int = 3;
pub const VIDEO_FRAME_TYPE_SKIP: c_int = 4;

pub const MAX_SPATIAL_LAYER_NUM: usize = 4;
pub const MAX_LAYER_NUM_OF_FRAME: usize = 128;
const MAX_SLICES_NUM_TMP: usize = 35;

// ---------------------------------------------------------------------------
// Parameter structs
// ---------------------------------------------------------------------------

/// Matches `SSliceArgument`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SSliceArgument {
    pub slice_mode: c_uint,
    pub slice_num: c_uint,
    pub slice_mb_num: [c_uint; MAX_SLICES_NUM_TMP],
    pub slice_size_constraint: c_uint,
}

/// Matches `SSpatialLayerConfig`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SSpatialLayerConfig {
    pub video_width: c_int,
    pub video_height: c_int,
    pub frame_rate: f32,
    pub spatial_bitrate: c_int,
    pub max_spatial_bitrate: c_int,
    pub profile_idc: c_int,
    pub level_idc: c_int,
    pub dlayer_qp: c_int,
    pub slice_argument: SSliceArgument,
    pub video_signal_type_present: bool,
    pub video_format: u8,
    pub full_range: bool,
    pub color_description_present: bool,
    pub color_primaries: u8,
    pub transfer_characteristics: u8,
    pub color_matrix: u8,
    pub aspect_ratio_present: bool,
    pub aspect_ratio: c_int,
    pub aspect_ratio_ext_width: u16,
    pub aspect_ratio_ext_height: u16,
}

/// Matches `SEncParamExt`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SEncParamExt {
    pub usage_type: c_int,
    pub pic_width: c_int,
    pub pic_height: c_int,
    pub target_bitrate: c_int,
    pub rc_mode: c_int,
    pub max_frame_rate: f32,
    pub temporal_layer_num: c_int,
    pub spatial_layer_num: c_int,
    pub spatial_layers: [SSpatialLayerConfig; MAX_SPATIAL_LAYER_NUM],
    pub complexity_mode: c_int,
    pub intra_period: c_uint,
    pub num_ref_frame: c_int,
    pub sps_pps_id_strategy: c_int,
    pub prefix_nal_adding_ctrl: bool,
    pub enable_ssei: bool,
    pub simulcast_avc: bool,
    pub padding_flag: c_int,
    pub entropy_coding_mode_flag: c_int,
    pub enable_frame_skip: bool,
    pub max_bitrate: c_int,
    pub max_qp: c_int,
    pub min_qp: c_int,
    pub max_nal_size: c_uint,
    pub enable_long_term_reference: bool,
    pub ltr_ref_num: c_int,
    pub ltr_mark_period: c_uint,
    pub multiple_thread_idc: u16,
    pub use_load_balancing: bool,
    pub loop_filter_disable_idc: c_int,
    pub loop_filter_alpha_c0_offset: c_int,
    pub loop_filter_beta_offset: c_int,
    pub enable_denoise: bool,
    pub enable_background_detection: bool,
    pub enable_adaptive_quant: bool,
    pub enable_frame_cropping_flag: bool,
    pub enable_scene_change_detect: bool,
    pub is_lossless_link: bool,
    pub fix_rc_over_shoot: bool,
    pub idr_bitrate_ratio: c_int,
}

impl Default for SEncParamExt {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct; bools are false.
        unsafe { std::mem::zeroed() }
    }
}

/// Matches `SSourcePicture`.
#[repr(C)]
pub struct SSourcePicture {
    pub color_format: c_int,
    pub stride: [c_int; 4],
    pub data: [*mut u8; 4],
    pub pic_width: c_int,
    pub pic_height: c_int,
    pub time_stamp: i64,
}

impl Default for SSourcePicture {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct; pointers become null.
        unsafe { std::mem::zeroed() }
    }
}

/// Matches `SLayerBSInfo`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SLayerBSInfo {
    pub temporal_id: u8,
    pub spatial_id: u8,
    pub quality_id: u8,
    pub frame_type: c_int,
    pub layer_type: u8,
    pub sub_seq_id: c_int,
    pub nal_count: c_int,
    pub nal_length_in_byte: *mut c_int,
    pub bs_buf: *mut u8,
}

/// Matches `SFrameBSInfo`. The encoder writes layer pointers into its own
/// internal buffer; they stay valid until the next `EncodeFrame`.
#[repr(C)]
pub struct SFrameBSInfo {
    pub layer_num: c_int,
    pub layer_info: [SLayerBSInfo; MAX_LAYER_NUM_OF_FRAME],
    pub frame_type: c_int,
    pub frame_size_in_bytes: c_int,
    pub time_stamp: i64,
}

impl Default for SFrameBSInfo {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct; pointers become null.
        unsafe { std::mem::zeroed() }
    }
}

// ---------------------------------------------------------------------------
// ISVCEncoder vtable
// ---------------------------------------------------------------------------

/// `ISVCEncoder` as seen from C: a pointer to the vtable.
pub type ISVCEncoder = *const ISVCEncoderVtbl;

/// Matches the C `ISVCEncoderVtbl`, in declaration order.
#[repr(C)]
pub struct ISVCEncoderVtbl {
    pub initialize: unsafe extern "C" fn(*mut ISVCEncoder, *const c_void) -> c_int,
    pub initialize_ext: unsafe extern "C" fn(*mut ISVCEncoder, *const SEncParamExt) -> c_int,
    pub get_default_params: unsafe extern "C" fn(*mut ISVCEncoder, *mut SEncParamExt) -> c_int,
    pub uninitialize: unsafe extern "C" fn(*mut ISVCEncoder) -> c_int,
    pub encode_frame:
        unsafe extern "C" fn(*mut ISVCEncoder, *const SSourcePicture, *mut SFrameBSInfo) -> c_int,
    pub encode_parameter_sets: unsafe extern "C" fn(*mut ISVCEncoder, *mut SFrameBSInfo) -> c_int,
    pub force_intra_frame: unsafe extern "C" fn(*mut ISVCEncoder, bool, c_int) -> c_int,
    pub set_option: unsafe extern "C" fn(*mut ISVCEncoder, c_int, *mut c_void) -> c_int,
    pub get_option: unsafe extern "C" fn(*mut ISVCEncoder, c_int, *mut c_void) -> c_int,
}

pub type WelsCreateSvcEncoderFn = unsafe extern "C" fn(*mut *mut ISVCEncoder) -> c_int;
pub type WelsDestroySvcEncoderFn = unsafe extern "C" fn(*mut ISVCEncoder);

// ---------------------------------------------------------------------------
// Library
// ---------------------------------------------------------------------------

/// Loaded `libopenh264.so` with its two entry points.
#[derive(Debug)]
pub struct OpenH264Library {
    binding: RawBinding,
    pub create: WelsCreateSvcEncoderFn,
    pub destroy: WelsDestroySvcEncoderFn,
}

impl OpenH264Library {
    pub fn load(search_dir: Option<&Path>) -> Result<Self, BindingError> {
        let binding = RawBinding::open(LIBRARY_NAME, search_dir, REQUIRED_SYMBOLS)?;
        // SAFETY: both signatures match codec_api.h.
        let (create, destroy) = unsafe {
            (
                binding.typed::<WelsCreateSvcEncoderFn>(WELS_CREATE_SVC_ENCODER)?,
                binding.typed::<WelsDestroySvcEncoderFn>(WELS_DESTROY_SVC_ENCODER)?,
            )
        };
        info!(library = binding.library_name(), "OpenH264 entry points bound");
        Ok(Self {
            binding,
            create,
            destroy,
        })
    }

    pub fn binding(&self) -> &RawBinding {
        &self.binding
    }
}

/// Human-readable name of an `EVideoFrameType`.
pub fn frame_type_name(frame_type: c_int) -> &'static str {
    match frame_type {
        VIDEO_FRAME_TYPE_INVALID => "invalid",
        VIDEO_FRAME_TYPE_IDR => "IDR",
        VIDEO_FRAME_TYPE_I => "I",
        VIDEO_FRAME_TYPE_P => "P",
        VIDEO_FRAME_TYPE_SKIP => "skip",
        _ => "mixed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_type_names() {
        assert_eq!(frame_type_name(VIDEO_FRAME_TYPE_IDR), "IDR");
        assert_eq!(frame_type_name(VIDEO_FRAME_TYPE_SKIP), "skip");
        assert_eq!(frame_type_name(6), "mixed");
    }

    #[test]
    fn defaults_are_zeroed() {
        let params = SEncParamExt::default();
        assert_eq!(params.pic_width, 0);
        assert!(!params.enable_frame_skip);
        let info = SFrameBSInfo::default();
        assert!(info.layer_info[0].bs_buf.is_null());
    }

    #[test]
    fn vtable_has_nine_entries() {
        assert_eq!(
            std::mem::size_of::<ISVCEncoderVtbl>(),
            9 * std::mem::size_of::<*const c_void>()
        );
    }

    #[test]
    fn missing_library_reports_name() {
        let dir = tempfile::tempdir().unwrap();
        let err = OpenH264Library::load(Some(dir.path())).unwrap_err();
        assert!(err.to_string().contains(LIBRARY_NAME));
    }
}
