//! libxcoder entry points.
//!
//! The session, frame and packet structs change layout between xcoder
//! releases, so they come from bindgen output generated against the
//! installed headers (`netint` feature, see `build.rs`). The constants and
//! symbol names below are stable across releases and always compiled.

use std::ffi::c_int;

#[cfg(feature = "netint")]
use std::ffi::{c_char, c_long, c_ulong};
#[cfg(feature = "netint")]
use std::path::Path;

#[cfg(feature = "netint")]
use tracing::info;

#[cfg(feature = "netint")]
use crate::binding::RawBinding;
#[cfg(feature = "netint")]
use crate::error::BindingError;

pub const LIBRARY_NAME: &str = "libxcoder.so";

pub const NI_ENCODER_INIT_DEFAULT_PARAMS: &str = "ni_encoder_init_default_params";
pub const NI_ENCODER_PARAMS_SET_VALUE: &str = "ni_encoder_params_set_value";
pub const NI_RSRC_ALLOCATE_AUTO: &str = "ni_rsrc_allocate_auto";
pub const NI_RSRC_RELEASE_RESOURCE: &str = "ni_rsrc_release_resource";
pub const NI_RSRC_FREE_DEVICE_CONTEXT: &str = "ni_rsrc_free_device_context";
pub const NI_DEVICE_OPEN: &str = "ni_device_open";
pub const NI_DEVICE_CLOSE: &str = "ni_device_close";
pub const NI_DEVICE_SESSION_CONTEXT_INIT: &str = "ni_device_session_context_init";
pub const NI_DEVICE_SESSION_CONTEXT_FREE: &str = "ni_device_session_context_free";
pub const NI_DEVICE_SESSION_OPEN: &str = "ni_device_session_open";
pub const NI_DEVICE_SESSION_WRITE: &str = "ni_device_session_write";
pub const NI_DEVICE_SESSION_READ: &str = "ni_device_session_read";
pub const NI_DEVICE_SESSION_CLOSE: &str = "ni_device_session_close";
pub const NI_FRAME_BUFFER_ALLOC_V3: &str = "ni_frame_buffer_alloc_v3";
pub const NI_FRAME_BUFFER_FREE: &str = "ni_frame_buffer_free";
pub const NI_PACKET_BUFFER_ALLOC: &str = "ni_packet_buffer_alloc";
pub const NI_PACKET_BUFFER_FREE: &str = "ni_packet_buffer_free";
pub const NI_GET_HW_YUV420P_DIM: &str = "ni_get_hw_yuv420p_dim";

pub const REQUIRED_SYMBOLS: &[&str] = &[
    NI_ENCODER_INIT_DEFAULT_PARAMS,
    NI_ENCODER_PARAMS_SET_VALUE,
    NI_RSRC_ALLOCATE_AUTO,
    NI_RSRC_RELEASE_RESOURCE,
    NI_RSRC_FREE_DEVICE_CONTEXT,
    NI_DEVICE_OPEN,
    NI_DEVICE_CLOSE,
    NI_DEVICE_SESSION_CONTEXT_INIT,
    NI_DEVICE_SESSION_CONTEXT_FREE,
    NI_DEVICE_SESSION_OPEN,
    NI_DEVICE_SESSION_WRITE,
    NI_DEVICE_SESSION_READ,
    NI_DEVICE_SESSION_CLOSE,
    NI_FRAME_BUFFER_ALLOC_V3,
    NI_FRAME_BUFFER_FREE,
    NI_PACKET_BUFFER_ALLOC,
    NI_PACKET_BUFFER_FREE,
    NI_GET_HW_YUV420P_DIM,
];

pub const NI_RETCODE_SUCCESS: c_int = 0;
pub const NI_DEVICE_TYPE_ENCODER: c_int = 1;
pub const EN_ALLOC_LEAST_LOAD: c_int = 0;
pub const EN_H264: c_int = 0;
pub const EN_H265: c_int = 1;
pub const NI_CODEC_FORMAT_H264: c_int = 0;
pub const NI_CODEC_FORMAT_H265: c_int = 1;
pub const NI_INVALID_SESSION_ID: u32 = 0xFFFF;
pub const NI_INVALID_DEVICE_HANDLE: c_int = -1;
pub const NI_LITTLE_ENDIAN_PLATFORM: c_int = 0;
pub const NI_MAX_NUM_DATA_POINTERS: usize = 4;

/// Smallest frame the encoder accepts; smaller input is padded up.
pub const NI_MIN_WIDTH: u32 = 144;
pub const NI_MIN_HEIGHT: u32 = 128;

/// Firmware metadata prepended to every bitstream read.
pub const NI_FW_ENC_BITSTREAM_META_DATA_SIZE: usize = 64;
/// Metadata the application reserves ahead of every frame.
pub const NI_APP_ENC_FRAME_META_DATA_SIZE: c_int = 64;

pub const SOURCE_BIT_DEPTH: c_int = 8;

/// bindgen output for `ni_device_api.h` and `ni_rsrc_api.h`.
#[cfg(feature = "netint")]
#[allow(
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    dead_code,
    clippy::all
)]
pub mod sys {
    include!(concat!(env!("OUT_DIR"), "/xcoder_bindings.rs"));
}

#[cfg(feature = "netint")]
pub use sys::{
    ni_device_context_t, ni_encoder_params_t, ni_frame_t, ni_packet_t, ni_session_context_t,
    ni_session_data_io_t,
};

#[cfg(feature = "netint")]
pub type NiDeviceHandle = c_int;

#[cfg(feature = "netint")]
pub type NiEncoderInitDefaultParamsFn =
    unsafe extern "C" fn(*mut ni_encoder_params_t, c_int, c_int, c_long, c_int, c_int) -> c_int;
#[cfg(feature = "netint")]
pub type NiEncoderParamsSetValueFn =
    unsafe extern "C" fn(*mut ni_encoder_params_t, *const c_char, *const c_char) -> c_int;
#[cfg(feature = "netint")]
pub type NiRsrcAllocateAutoFn = unsafe extern "C" fn(
    c_int,
    c_int,
    c_int,
    c_int,
    c_int,
    c_int,
    *mut c_ulong,
) -> *mut ni_device_context_t;
#[cfg(feature = "netint")]
pub type NiRsrcReleaseResourceFn = unsafe extern "C" fn(*mut ni_device_context_t, c_int, c_ulong);
#[cfg(feature = "netint")]
pub type NiRsrcFreeDeviceContextFn = unsafe extern "C" fn(*mut ni_device_context_t);
#[cfg(feature = "netint")]
pub type NiDeviceOpenFn = unsafe extern "C" fn(*const c_char, *mut u32) -> NiDeviceHandle;
#[cfg(feature = "netint")]
pub type NiDeviceCloseFn = unsafe extern "C" fn(NiDeviceHandle);
#[cfg(feature = "netint")]
pub type NiSessionContextFn = unsafe extern "C" fn(*mut ni_session_context_t);
#[cfg(feature = "netint")]
pub type NiDeviceSessionOpenFn = unsafe extern "C" fn(*mut ni_session_context_t, c_int) -> c_int;
#[cfg(feature = "netint")]
pub type NiDeviceSessionIoFn =
    unsafe extern "C" fn(*mut ni_session_context_t, *mut ni_session_data_io_t, c_int) -> c_int;
#[cfg(feature = "netint")]
pub type NiDeviceSessionCloseFn = unsafe extern "C" fn(*mut ni_session_context_t, c_int, c_int) -> c_int;
#[cfg(feature = "netint")]
pub type NiFrameBufferAllocV3Fn =
    unsafe extern "C" fn(*mut ni_frame_t, c_int, c_int, *mut c_int, c_int, c_int) -> c_int;
#[cfg(feature = "netint")]
pub type NiFrameBufferFreeFn = unsafe extern "C" fn(*mut ni_frame_t) -> c_int;
#[cfg(feature = "netint")]
pub type NiPacketBufferAllocFn = unsafe extern "C" fn(*mut ni_packet_t, c_int) -> c_int;
#[cfg(feature = "netint")]
pub type NiPacketBufferFreeFn = unsafe extern "C" fn(*mut ni_packet_t) -> c_int;
#[cfg(feature = "netint")]
pub type NiGetHwYuv420pDimFn = unsafe extern "C" fn(c_int, c_int, c_int, c_int, *mut c_int, *mut c_int);

/// Loaded `libxcoder.so`.
#[cfg(feature = "netint")]
#[derive(Debug)]
pub struct XcoderLibrary {
    binding: RawBinding,
    pub encoder_init_default_params: NiEncoderInitDefaultParamsFn,
    pub encoder_params_set_value: NiEncoderParamsSetValueFn,
    pub rsrc_allocate_auto: NiRsrcAllocateAutoFn,
    pub rsrc_release_resource: NiRsrcReleaseResourceFn,
    pub rsrc_free_device_context: NiRsrcFreeDeviceContextFn,
    pub device_open: NiDeviceOpenFn,
    pub device_close: NiDeviceCloseFn,
    pub session_context_init: NiSessionContextFn,
    pub session_context_free: NiSessionContextFn,
    pub session_open: NiDeviceSessionOpenFn,
    pub session_write: NiDeviceSessionIoFn,
    pub session_read: NiDeviceSessionIoFn,
    pub session_close: NiDeviceSessionCloseFn,
    pub frame_buffer_alloc_v3: NiFrameBufferAllocV3Fn,
    pub frame_buffer_free: NiFrameBufferFreeFn,
    pub packet_buffer_alloc: NiPacketBufferAllocFn,
    pub packet_buffer_free: NiPacketBufferFreeFn,
    pub get_hw_yuv420p_dim: NiGetHwYuv420pDimFn,
}

#[cfg(feature = "netint")]
impl XcoderLibrary {
    pub fn load(search_dir: Option<&Path>) -> Result<Self, BindingError> {
        let binding = RawBinding::open(LIBRARY_NAME, search_dir, REQUIRED_SYMBOLS)?;
        // SAFETY: every signature matches ni_device_api.h / ni_rsrc_api.h.
        let library = unsafe {
            Self {
                encoder_init_default_params: binding.typed(NI_ENCODER_INIT_DEFAULT_PARAMS)?,
                encoder_params_set_value: binding.typed(NI_ENCODER_PARAMS_SET_VALUE)?,
                rsrc_allocate_auto: binding.typed(NI_RSRC_ALLOCATE_AUTO)?,
                rsrc_release_resource: binding.typed(NI_RSRC_RELEASE_RESOURCE)?,
                rsrc_free_device_context: binding.typed(NI_RSRC_FREE_DEVICE_CONTEXT)?,
                device_open: binding.typed(NI_DEVICE_OPEN)?,
                device_close: binding.typed(NI_DEVICE_CLOSE)?,
                session_context_init: binding.typed(NI_DEVICE_SESSION_CONTEXT_INIT)?,
                session_context_free: binding.typed(NI_DEVICE_SESSION_CONTEXT_FREE)?,
                session_open: binding.typed(NI_DEVICE_SESSION_OPEN)?,
                session_write: binding.typed(NI_DEVICE_SESSION_WRITE)?,
                session_read: binding.typed(NI_DEVICE_SESSION_READ)?,
                session_close: binding.typed(NI_DEVICE_SESSION_CLOSE)?,
                frame_buffer_alloc_v3: binding.typed(NI_FRAME_BUFFER_ALLOC_V3)?,
                frame_buffer_free: binding.typed(NI_FRAME_BUFFER_FREE)?,
                packet_buffer_alloc: binding.typed(NI_PACKET_BUFFER_ALLOC)?,
                packet_buffer_free: binding.typed(NI_PACKET_BUFFER_FREE)?,
                get_hw_yuv420p_dim: binding.typed(NI_GET_HW_YUV420P_DIM)?,
                binding,
            }
        };
        info!(library = library.binding.library_name(), "xcoder entry points bound");
        Ok(library)
    }

    pub fn binding(&self) -> &RawBinding {
        &self.binding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn required_symbols_are_unique() {
        let unique: HashSet<_> = REQUIRED_SYMBOLS.iter().collect();
        assert_eq!(unique.len(), REQUIRED_SYMBOLS.len());
        assert!(REQUIRED_SYMBOLS.iter().all(|s| s.starts_with("ni_")));
    }

    #[test]
    fn metadata_header_is_64_bytes() {
        assert_eq!(NI_FW_ENC_BITSTREAM_META_DATA_SIZE, 64);
    }
}
