//! Raw FFI bindings for the VPE transcoder runtime (`libvpi.so`).
//!
//! Layouts follow `vpi_types.h`; entry points follow `vpi_api.h`. Plugins
//! are driven through the `VpiApi` table returned by `vpi_create`.

use std::ffi::{c_char, c_int, c_void};
use std::path::Path;

use tracing::info;

use crate::binding::RawBinding;
use crate::error::BindingError;

pub const LIBRARY_NAME: &str = "libvpi.so";

const VPI_OPEN_HWDEVICE: &str = "vpi_open_hwdevice";
const VPI_CLOSE_HWDEVICE: &str = "vpi_close_hwdevice";
const VPI_CREATE: &str = "vpi_create";
const VPI_FREEP: &str = "vpi_freep";
const VPI_DESTROY: &str = "vpi_destroy";
const VPI_GET_SYS_INFO_STRUCT: &str = "vpi_get_sys_info_struct";
const VPI_FRAME_RELEASE: &str = "vpi_frame_release";

pub const REQUIRED_SYMBOLS: &[&str] = &[
    VPI_OPEN_HWDEVICE,
    VPI_CLOSE_HWDEVICE,
    VPI_CREATE,
    VPI_FREEP,
    VPI_DESTROY,
    VPI_GET_SYS_INFO_STRUCT,
    VPI_FRAME_RELEASE,
];

pub const PIC_INDEX_MAX_NUMBER: usize = 5;
pub const VPE_TASK_LIVE: c_int = 0;

pub type VpiCtx = *mut c_void;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// `VpiCmd` values used by the encoder path.
pub type VpiCmd = c_int;
pub const VPI_CMD_ENC_GET_EMPTY_FRAME_SLOT: VpiCmd = 11;
pub const VPI_CMD_ENC_GET_FRAME_PACKET: VpiCmd = 12;
pub const VPI_CMD_ENC_INIT_OPTION: VpiCmd = 15;
pub const VPI_CMD_ENC_REG_FREE_FRAME: VpiCmd = 16;
pub const VPI_CMD_PP_INIT_OPTION: VpiCmd = 17;
pub const VPI_CMD_SET_VPEFRAME: VpiCmd = 23;
pub const VPI_CMD_REMOVE_VPEFRAME: VpiCmd = 24;

/// `VpiPixsFmt`.
pub type VpiPixsFmt = c_int;
pub const VPI_FMT_YUV420P: VpiPixsFmt = 1;

/// `VpiPlugin`.
pub type VpiPlugin = c_int;
pub const H26XENC_VPE: VpiPlugin = 3;
pub const PP_VPE: VpiPlugin = 5;
pub const HWCONTEXT_VPE: VpiPlugin = 9;

/// `VpiH26xCodecID`.
pub type VpiH26xCodecId = c_int;
pub const CODEC_ID_HEVC: VpiH26xCodecId = 0;
pub const CODEC_ID_H264: VpiH26xCodecId = 1;

/// `VpiPixFmt::VPI_YUV420_PLANAR`.
pub const VPI_YUV420_PLANAR: c_int = 0;

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct VpiEncParamSet {
    pub key: *mut c_char,
    pub value: *mut c_char,
    pub next: *mut VpiEncParamSet,
}

#[repr(C)]
pub struct VpiPPOption {
    pub nb_outputs: c_int,
    pub force_10bit: c_int,
    pub low_res: *mut c_char,
    pub w: c_int,
    pub h: c_int,
    pub format: VpiPixsFmt,
    pub frame: *mut c_void,
    pub b_disable_tcache: c_int,
}

#[repr(C)]
pub struct VpiPacket {
    pub size: u32,
    pub data: *mut u8,
    pub pts: i64,
    pub pkt_dts: i64,
    pub opaque: *mut c_void,
    pub duration: i64,
    pub flags: c_int,
}

impl Default for VpiPacket {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct VpiCrop {
    pub enabled: c_int,
    pub x: c_int,
    pub y: c_int,
    pub w: c_int,
    pub h: c_int,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct VpiScale {
    pub enabled: c_int,
    pub w: c_int,
    pub h: c_int,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct VpiPicData {
    pub is_interlaced: u32,
    pub pic_stride: u32,
    pub crop_out_width: u32,
    pub crop_out_height: u32,
    pub pic_format: u32,
    pub pic_pixformat: u32,
    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
    pub pic_compressed_status: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct VpiPicInfo {
    pub enabled: c_int,
    pub flag: c_int,
    pub format: c_int,
    pub width: c_int,
    pub height: c_int,
    pub pic_width: c_int,
    pub pic_height: c_int,
    pub crop: VpiCrop,
    pub scale: VpiScale,
    pub picdata: VpiPicData,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct VpiHdrInfo {
    pub transfer_characteristics: u32,
    pub matrix_coefficients: u32,
    pub colour_primaries: u32,
    pub hdr10_display_enable: u32,
    pub hdr10_dx0: u32,
    pub hdr10_dy0: u32,
    pub hdr10_dx1: u32,
    pub hdr10_dy1: u32,
    pub hdr10_dx2: u32,
    pub hdr10_dy2: u32,
    pub hdr10_wx: u32,
    pub hdr10_wy: u32,
    pub hdr10_maxluma: u32,
    pub hdr10_minluma: u32,
    pub hdr10_lightlevel_enable: u32,
    pub hdr10_maxlight: u32,
    pub hdr10_avglight: u32,
}

/// Wraps a `pthread_mutex_t`; only ever handled by pointer.
#[repr(C)]
pub struct VpiFrameMutex {
    _private: [u8; 0],
}

pub type VpeFrameFreeFn = unsafe extern "C" fn(*mut c_void, *mut c_void);

#[repr(C)]
#[derive(Clone, Copy)]
pub struct VpiFrame {
    pub task_id: c_int,
    pub src_width: c_int,
    pub src_height: c_int,
    pub width: c_int,
    pub height: c_int,
    pub linesize: [c_int; 3],
    pub key_frame: c_int,
    pub pts: i64,
    pub pkt_dts: i64,
    pub data: [*mut u8; 3],
    pub pic_struct_size: u32,
    pub pic_info: [VpiPicInfo; PIC_INDEX_MAX_NUMBER],
    pub nb_outputs: c_int,
    pub max_frames_delay: c_int,
    pub hwupload_max_frames_delay: c_int,
    pub flag: c_int,
    pub opaque: *mut c_void,
    pub vpi_opaque: *mut c_void,
    pub raw_format: VpiPixsFmt,
    pub free_opaque: *mut c_void,
    pub vpe_frame_free: Option<VpeFrameFreeFn>,
    pub hdr_info: VpiHdrInfo,
    pub color_range: c_int,
    pub cfg_width: u16,
    pub cfg_height: u16,
    pub cfg_res: u8,
    pub dec_seq_id: c_int,
    pub new_frame_flag: [u8; PIC_INDEX_MAX_NUMBER],
    pub dec_frame_mutex: *mut VpiFrameMutex,
    pub enc_frame_mutex: *mut VpiFrameMutex,
    pub transcode_frame_mutex: *mut VpiFrameMutex,
    pub vpi_buffer: *mut c_void,
    pub hw_frmbuf_buffer: *mut c_void,
    pub roi_map_data: *mut c_char,
}

impl Default for VpiFrame {
    fn default() -> Self {
        // SAFETY: All-zeros is valid: pointers become null and the optional
        // callback becomes `None`.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
pub struct VpiSysInfo {
    pub device: c_int,
    pub sys_log_level: c_int,
    pub task_id: c_int,
    pub priority: c_int,
}

#[repr(C)]
pub struct VpiCtrlCmdParam {
    pub cmd: VpiCmd,
    pub data: *mut c_void,
}

#[repr(C)]
pub struct VpiH26xEncCfg {
    pub module_name: [c_char; 20],
    pub pp_index: c_int,
    pub priority: c_int,
    pub device: *mut c_char,
    pub crf: c_int,
    pub preset: *mut c_char,
    pub codec_id: VpiH26xCodecId,
    pub profile: *mut c_char,
    pub level: *mut c_char,
    pub force_idr: *mut c_char,
    pub bit_per_second: c_int,
    pub input_rate_numer: c_int,
    pub input_rate_denom: c_int,
    pub lum_width_src: c_int,
    pub lum_height_src: c_int,
    pub input_format: c_int,
    pub frame_ctx: *mut VpiFrame,
    pub param_list: *mut VpiEncParamSet,
    pub colour_primaries: c_int,
    pub transfer_characteristics: c_int,
    pub matrix_coeffs: c_int,
    pub color_range: c_int,
    pub aspect_ratio_num: c_int,
    pub aspect_ration_den: c_int,
}

/// Plugin function table, `VpiApi`.
#[repr(C)]
pub struct VpiApi {
    pub init: unsafe extern "C" fn(VpiCtx, *mut c_void) -> c_int,
    pub decode: unsafe extern "C" fn(VpiCtx, *mut c_void, *mut c_void) -> c_int,
    pub encode: unsafe extern "C" fn(VpiCtx, *mut c_void, *mut c_void) -> c_int,
    pub decode_put_packet: unsafe extern "C" fn(VpiCtx, *mut c_void) -> c_int,
    pub decode_get_frame: unsafe extern "C" fn(VpiCtx, *mut c_void) -> c_int,
    pub encode_put_frame: unsafe extern "C" fn(VpiCtx, *mut c_void) -> c_int,
    pub encode_get_packet: unsafe extern "C" fn(VpiCtx, *mut c_void) -> c_int,
    pub control: unsafe extern "C" fn(VpiCtx, *mut c_void, *mut c_void) -> c_int,
    pub process: unsafe extern "C" fn(VpiCtx, *mut c_void, *mut c_void) -> c_int,
    pub close: unsafe extern "C" fn(VpiCtx) -> c_int,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

pub type VpiOpenHwDeviceFn = unsafe extern "C" fn(*const c_char) -> c_int;
pub type VpiCloseHwDeviceFn = unsafe extern "C" fn(c_int) -> c_int;
pub type VpiCreateFn = unsafe extern "C" fn(*mut VpiCtx, *mut *mut VpiApi, c_int, VpiPlugin) -> c_int;
pub type VpiFreepFn = unsafe extern "C" fn(*mut c_void);
pub type VpiDestroyFn = unsafe extern "C" fn(VpiCtx, c_int) -> c_int;
pub type VpiGetSysInfoStructFn = unsafe extern "C" fn(*mut *mut VpiSysInfo) -> c_int;
pub type VpiFrameReleaseFn = unsafe extern "C" fn(*mut VpiFrame);

/// Loaded `libvpi.so`.
#[derive(Debug)]
pub struct VpeLibrary {
    binding: RawBinding,
    pub open_hwdevice: VpiOpenHwDeviceFn,
    pub close_hwdevice: VpiCloseHwDeviceFn,
    pub create: VpiCreateFn,
    pub freep: VpiFreepFn,
    pub destroy: VpiDestroyFn,
    pub get_sys_info_struct: VpiGetSysInfoStructFn,
    pub frame_release: VpiFrameReleaseFn,
}

impl VpeLibrary {
    pub fn load(search_dir: Option<&Path>) -> Result<Self, BindingError> {
        let binding = RawBinding::open(LIBRARY_NAME, search_dir, REQUIRED_SYMBOLS)?;
        // SAFETY: every signature matches vpi_api.h.
        let library = unsafe {
            Self {
                open_hwdevice: binding.typed(VPI_OPEN_HWDEVICE)?,
                close_hwdevice: binding.typed(VPI_CLOSE_HWDEVICE)?,
                create: binding.typed(VPI_CREATE)?,
                freep: binding.typed(VPI_FREEP)?,
                destroy: binding.typed(VPI_DESTROY)?,
                get_sys_info_struct: binding.typed(VPI_GET_SYS_INFO_STRUCT)?,
                frame_release: binding.typed(VPI_FRAME_RELEASE)?,
                binding,
            }
        };
        info!(library = library.binding.library_name(), "VPE entry points bound");
        Ok(library)
    }

    pub fn binding(&self) -> &RawBinding {
        &self.binding
    }
}
