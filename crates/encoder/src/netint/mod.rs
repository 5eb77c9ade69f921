//! NETINT xcoder hardware encoder.
//!
//! A session is one xcoder session context plus the device resource it was
//! scheduled on. Init fills the encoder parameters (defaults, four xcoder
//! options, conformance window, intra period), lets the resource manager
//! pick the least loaded card, opens its block device twice (I/O and block
//! handle) and opens the session.
//!
//! Each frame is copied into a hardware-aligned frame buffer, written with
//! bounded retry and answered by exactly one packet read. Reads carry a
//! 64-byte firmware header that is stripped from the output.

pub mod ffi;

#[cfg(feature = "netint")]
pub use ffi::XcoderLibrary;

use std::sync::Arc;

use tracing::{debug, error, info};

use vmi_common::params::{ParamBounds, NETINT_BOUNDS};
use vmi_common::{Backend, EncodeError, EncodeParameters, VideoCodec};

use crate::binding::ApiLoader;
use crate::guard::Owned;
use crate::marshal::{align_up, frame_size, marshal_i420, FrameLayout, PlaneLayout};
use crate::session::{submit_with_retry, EncoderSession, SessionDriver};

use ffi::{NI_FW_ENC_BITSTREAM_META_DATA_SIZE, NI_MIN_HEIGHT, NI_MIN_WIDTH};

/// Encoder settings derived from one parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XcoderConfig {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Source dimensions after alignment and the hardware minimum.
    pub aligned_width: u32,
    pub aligned_height: u32,
    pub frame_rate: u32,
    pub bitrate: u32,
    pub gop_size: u32,
}

impl XcoderConfig {
    pub fn new(codec: VideoCodec, params: &EncodeParameters) -> Self {
        let alignment = Self::alignment(codec);
        Self {
            codec,
            width: params.width,
            height: params.height,
            aligned_width: align_up(params.width, alignment).max(NI_MIN_WIDTH),
            aligned_height: align_up(params.height, alignment).max(NI_MIN_HEIGHT),
            frame_rate: params.frame_rate,
            bitrate: params.bitrate,
            gop_size: params.gop_size,
        }
    }

    /// H.264 sources are 16-aligned, H.265 sources 8-aligned.
    pub fn alignment(codec: VideoCodec) -> u32 {
        match codec {
            VideoCodec::H264 => 16,
            VideoCodec::H265 => 8,
        }
    }

    /// Columns and rows the conformance window crops from the aligned source.
    pub fn conformance_window(&self) -> (u32, u32) {
        (self.aligned_width - self.width, self.aligned_height - self.height)
    }

    /// IPPP GOP, low delay, rate control on, lowest profile of the codec.
    pub fn options(&self) -> [(&'static str, &'static str); 4] {
        [
            ("gopPresetIdx", "2"),
            ("lowDelay", "1"),
            ("RcEnable", "1"),
            ("profile", "1"),
        ]
    }

    pub fn is_h264(&self) -> bool {
        self.codec == VideoCodec::H264
    }

    pub fn frame_size(&self) -> usize {
        frame_size(self.width, self.height)
    }
}

/// Per-plane stride and row count the hardware expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HwPlaneDims {
    pub strides: [usize; 3],
    pub heights: [usize; 3],
}

impl HwPlaneDims {
    /// Destination layout for a `width` x `height` source.
    pub fn layout(&self, width: u32, height: u32) -> FrameLayout {
        let visible = [
            (width as usize, height as usize),
            (width as usize / 2, height as usize / 2),
            (width as usize / 2, height as usize / 2),
        ];
        let plane = |i: usize| PlaneLayout {
            width: visible[i].0,
            height: visible[i].1,
            stride: self.strides[i].max(visible[i].0),
            padded_height: self.heights[i].max(visible[i].1),
        };
        FrameLayout {
            planes: [plane(0), plane(1), plane(2)],
        }
    }
}

/// libxcoder calls used by a session. Errors are the raw return code.
pub trait NetintApi: Send + Sync + 'static {
    /// Session context together with its encoder parameters and I/O buffers.
    type Session: Send;
    /// Device context and load handed out by the resource manager.
    type Resource: Send;

    /// Default parameters, xcoder options, conformance window, intra period
    /// and session context init.
    fn create_session(&self, config: &XcoderConfig) -> Result<Self::Session, i32>;
    fn allocate_resource(&self, config: &XcoderConfig) -> Result<Self::Resource, i32>;
    /// Block device name of the scheduled card.
    fn device_name(&self, resource: &Self::Resource) -> String;
    /// Open the I/O and block handles on the scheduled card.
    fn open_devices(&self, session: &mut Self::Session, resource: &Self::Resource) -> Result<(), i32>;
    fn open_session(&self, session: &mut Self::Session) -> Result<(), i32>;

    fn plane_dims(&self, session: &Self::Session, config: &XcoderConfig) -> HwPlaneDims;
    /// Allocate the session's frame buffer and return its three planes.
    fn frame_planes<'a>(
        &self,
        session: &'a mut Self::Session,
        config: &XcoderConfig,
        dims: &HwPlaneDims,
    ) -> Result<[&'a mut [u8]; 3], i32>;
    /// Bytes accepted, `0` when the card is not ready, negative on fault.
    fn write_frame(&self, session: &mut Self::Session) -> i64;
    /// Allocate a `capacity` byte packet and read into it.
    fn read_packet(&self, session: &mut Self::Session, capacity: usize) -> Result<i64, i32>;
    /// Packet bytes of the last read, firmware header included.
    fn packet<'a>(&self, session: &'a Self::Session) -> &'a [u8];

    fn close_session(&self, session: &mut Self::Session);
    fn close_devices(&self, session: &mut Self::Session);
    fn release_resource(&self, resource: &mut Self::Resource, codec: VideoCodec);
    fn free_device_context(&self, resource: &mut Self::Resource);
    fn free_session_context(&self, session: &mut Self::Session);
    fn free_frame(&self, session: &mut Self::Session);
    fn free_packet(&self, session: &mut Self::Session);
}

/// Everything one xcoder session holds, torn down as a unit.
struct XcoderState<S, R> {
    session: S,
    resource: Option<R>,
    devices_open: bool,
    session_open: bool,
}

/// Release in xcoder order: session, device handles, resource, contexts,
/// buffers. Steps for parts never acquired are skipped.
fn teardown<A: NetintApi>(api: &A, codec: VideoCodec, state: &mut XcoderState<A::Session, A::Resource>) {
    if state.session_open {
        api.close_session(&mut state.session);
        state.session_open = false;
    }
    if state.devices_open {
        api.close_devices(&mut state.session);
        state.devices_open = false;
    }
    if let Some(mut resource) = state.resource.take() {
        debug!("Releasing xcoder resource");
        api.release_resource(&mut resource, codec);
        api.free_device_context(&mut resource);
    }
    api.free_session_context(&mut state.session);
    api.free_frame(&mut state.session);
    api.free_packet(&mut state.session);
}

/// NETINT H.264/H.265 session over any [`NetintApi`].
pub struct NetintDriver<A: NetintApi> {
    loader: ApiLoader<A>,
    codec: VideoCodec,
    api: Option<Arc<A>>,
    state: Option<Owned<XcoderState<A::Session, A::Resource>>>,
    config: Option<XcoderConfig>,
}

#[cfg(feature = "netint")]
pub type NetintSession<A = XcoderLibrary> = EncoderSession<NetintDriver<A>>;
#[cfg(not(feature = "netint"))]
pub type NetintSession<A> = EncoderSession<NetintDriver<A>>;

impl<A: NetintApi> NetintDriver<A> {
    pub fn new(loader: ApiLoader<A>, codec: VideoCodec) -> Self {
        Self {
            loader,
            codec,
            api: None,
            state: None,
            config: None,
        }
    }

    pub fn session(loader: ApiLoader<A>, codec: VideoCodec, params: EncodeParameters) -> NetintSession<A> {
        EncoderSession::new(Self::new(loader, codec), params)
    }

    /// Settings the open session was created with.
    pub fn config(&self) -> Option<&XcoderConfig> {
        self.config.as_ref()
    }
}

impl<A: NetintApi> SessionDriver for NetintDriver<A> {
    fn backend(&self) -> Backend {
        Backend::Netint
    }

    fn codec(&self) -> VideoCodec {
        self.codec
    }

    fn bounds(&self) -> &'static ParamBounds {
        &NETINT_BOUNDS
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }

    fn open(&mut self, params: &EncodeParameters) -> Result<(), EncodeError> {
        let api = (self.loader)().map_err(|e| {
            error!(error = %e, "xcoder library unavailable");
            EncodeError::Init(e.to_string())
        })?;
        let config = XcoderConfig::new(self.codec, params);
        let (win_right, win_bottom) = config.conformance_window();
        if win_right > 0 || win_bottom > 0 {
            info!(
                width = config.width,
                height = config.height,
                aligned_width = config.aligned_width,
                aligned_height = config.aligned_height,
                "Source aligned, cropping through conformance window"
            );
        }

        let session = api.create_session(&config).map_err(|rc| {
            error!(rc, "xcoder encoder parameter setup failed");
            EncodeError::Init(format!("encoder parameter setup returned {rc}"))
        })?;
        let release = Arc::clone(&api);
        let codec = self.codec;
        let mut state = Owned::new(
            "xcoder session",
            XcoderState {
                session,
                resource: None,
                devices_open: false,
                session_open: false,
            },
            move |s| teardown(&*release, codec, s),
        );

        let resource = api.allocate_resource(&config).map_err(|rc| {
            error!(rc, "xcoder resource allocation failed");
            EncodeError::Init(format!("ni_rsrc_allocate_auto returned {rc}"))
        })?;
        info!(device = %api.device_name(&resource), "xcoder device scheduled");

        let state_mut = state.get_mut();
        let opened = api.open_devices(&mut state_mut.session, &resource);
        // Either handle may be valid even when the other failed.
        state_mut.resource = Some(resource);
        state_mut.devices_open = true;
        opened.map_err(|rc| {
            error!(rc, "xcoder device open failed");
            EncodeError::Init(format!("ni_device_open returned {rc}"))
        })?;

        api.open_session(&mut state_mut.session).map_err(|rc| {
            error!(rc, "xcoder session open failed");
            EncodeError::Init(format!("ni_device_session_open returned {rc}"))
        })?;
        state_mut.session_open = true;

        info!(codec = %self.codec, %params, "NETINT encoder initialized");
        self.api = Some(api);
        self.state = Some(state);
        self.config = Some(config);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(state) = self.state.take() {
            state.release();
            info!("NETINT encoder destroyed");
        }
        self.api = None;
        self.config = None;
    }

    fn encode(&mut self, input: &[u8], frame: u64) -> Result<&[u8], EncodeError> {
        let failed = |reason: String| EncodeError::EncodeFailed { frame, reason };
        let (api, state, config) = match (&self.api, &mut self.state, &self.config) {
            (Some(api), Some(state), Some(config)) => (api, state, config),
            _ => return Err(EncodeError::NotInitialized),
        };
        let session = &mut state.get_mut().session;

        let dims = api.plane_dims(session, config);
        let layout = dims.layout(config.width, config.height);
        let planes = api.frame_planes(session, config, &dims).map_err(|rc| {
            error!(rc, "xcoder frame buffer alloc failed");
            failed(format!("ni_frame_buffer_alloc_v3 returned {rc}"))
        })?;
        marshal_i420(input, config.width, config.height, &layout, planes).map_err(|e| failed(e.to_string()))?;

        let sent = submit_with_retry(|| api.write_frame(session)).map_err(|e| {
            error!(error = %e, "xcoder session write failed");
            failed(e.to_string())
        })?;
        debug!(frame, bytes = sent, "Frame sent to xcoder");

        let read = api.read_packet(session, config.frame_size()).map_err(|rc| {
            error!(rc, "xcoder packet buffer alloc failed");
            failed(format!("ni_packet_buffer_alloc returned {rc}"))
        })?;
        let header = NI_FW_ENC_BITSTREAM_META_DATA_SIZE as i64;
        let (start, end) = match read {
            0 => (0, 0),
            n if n > header => {
                let len = api.packet(session).len();
                (NI_FW_ENC_BITSTREAM_META_DATA_SIZE.min(len), len)
            }
            n => {
                error!(received = n, header, "xcoder read no larger than metadata header");
                return Err(failed(format!("received {n} bytes, metadata header is {header}")));
            }
        };
        debug!(frame, bytes = end - start, "Packet received from xcoder");
        Ok(&api.packet(session)[start..end])
    }
}

// ---------------------------------------------------------------------------
// Library-backed implementation
// ---------------------------------------------------------------------------

#[cfg(feature = "netint")]
mod native {
    use std::ffi::{c_int, c_ulong, CStr, CString};

    use tracing::{info, warn};
    use vmi_common::VideoCodec;

    use super::ffi::*;
    use super::{HwPlaneDims, NetintApi, XcoderConfig};

    /// Session state with stable addresses for the library.
    pub struct XcoderSession {
        context: Box<ni_session_context_t>,
        params: Box<ni_encoder_params_t>,
        frame: Box<ni_session_data_io_t>,
        packet: Box<ni_session_data_io_t>,
    }

    pub struct XcoderResource {
        context: *mut ni_device_context_t,
        load: c_ulong,
    }

    // SAFETY: both are owned by exactly one session and only touched from the
    // thread currently driving that session.
    unsafe impl Send for XcoderSession {}
    unsafe impl Send for XcoderResource {}

    fn check(rc: c_int) -> Result<(), i32> {
        if rc == NI_RETCODE_SUCCESS {
            Ok(())
        } else {
            Err(rc)
        }
    }

    fn codec_id(codec: VideoCodec) -> c_int {
        match codec {
            VideoCodec::H264 => EN_H264,
            VideoCodec::H265 => EN_H265,
        }
    }

    impl NetintApi for XcoderLibrary {
        type Session = XcoderSession;
        type Resource = XcoderResource;

        fn create_session(&self, config: &XcoderConfig) -> Result<XcoderSession, i32> {
            let mut params: Box<ni_encoder_params_t> = Box::default();
            // SAFETY: params is a valid, exclusively owned struct.
            check(unsafe {
                (self.encoder_init_default_params)(
                    &mut *params,
                    config.frame_rate as c_int,
                    1,
                    config.bitrate as _,
                    config.width as c_int,
                    config.height as c_int,
                )
            })?;
            for (name, value) in config.options() {
                let (c_name, c_value) = match (CString::new(name), CString::new(value)) {
                    (Ok(n), Ok(v)) => (n, v),
                    _ => return Err(-1),
                };
                // SAFETY: both strings outlive the call.
                let rc = unsafe { (self.encoder_params_set_value)(&mut *params, c_name.as_ptr(), c_value.as_ptr()) };
                if rc != NI_RETCODE_SUCCESS {
                    warn!(rc, name, value, "xcoder option rejected");
                    return Err(rc);
                }
            }

            let (right, bottom) = config.conformance_window();
            if right > 0 {
                params.hevc_enc_params.conf_win_right += right as _;
                params.source_width = config.aligned_width as _;
            }
            if bottom > 0 {
                params.hevc_enc_params.conf_win_bottom += bottom as _;
                params.source_height = config.aligned_height as _;
            }
            params.hevc_enc_params.intra_period = config.gop_size as _;

            let mut session = XcoderSession {
                context: Box::default(),
                params,
                frame: Box::default(),
                packet: Box::default(),
            };
            // SAFETY: the context box is valid and outlives the session.
            unsafe { (self.session_context_init)(&mut *session.context) };
            let ctx = &mut *session.context;
            ctx.session_id = NI_INVALID_SESSION_ID as _;
            let format = if config.is_h264() { NI_CODEC_FORMAT_H264 } else { NI_CODEC_FORMAT_H265 };
            ctx.codec_format = format as _;
            ctx.p_session_config = &mut *session.params as *mut ni_encoder_params_t as *mut _;
            ctx.src_bit_depth = SOURCE_BIT_DEPTH as _;
            ctx.src_endian = NI_LITTLE_ENDIAN_PLATFORM as _;
            ctx.bit_depth_factor = 1;
            ctx.hw_id = 0;
            Ok(session)
        }

        fn allocate_resource(&self, config: &XcoderConfig) -> Result<XcoderResource, i32> {
            let mut load: c_ulong = 0;
            // SAFETY: load is a valid out-pointer.
            let context = unsafe {
                (self.rsrc_allocate_auto)(
                    NI_DEVICE_TYPE_ENCODER,
                    EN_ALLOC_LEAST_LOAD,
                    codec_id(config.codec),
                    config.width as c_int,
                    config.height as c_int,
                    config.frame_rate as c_int,
                    &mut load,
                )
            };
            if context.is_null() {
                return Err(-1);
            }
            Ok(XcoderResource { context, load })
        }

        fn device_name(&self, resource: &XcoderResource) -> String {
            // SAFETY: a non-null device context always carries its device info.
            unsafe {
                let info = (*resource.context).p_device_info;
                if info.is_null() {
                    return String::new();
                }
                CStr::from_ptr((*info).blk_name.as_ptr()).to_string_lossy().into_owned()
            }
        }

        fn open_devices(&self, session: &mut XcoderSession, resource: &XcoderResource) -> Result<(), i32> {
            let name = CString::new(self.device_name(resource)).map_err(|_| -1)?;
            let ctx = &mut *session.context;
            // SAFETY: name outlives both calls; max_nvme_io_size is a valid out-pointer.
            let (io, blk) = unsafe {
                (
                    (self.device_open)(name.as_ptr(), &mut ctx.max_nvme_io_size),
                    (self.device_open)(name.as_ptr(), &mut ctx.max_nvme_io_size),
                )
            };
            ctx.device_handle = io as _;
            ctx.blk_io_handle = blk as _;
            if io == NI_INVALID_DEVICE_HANDLE || blk == NI_INVALID_DEVICE_HANDLE {
                return Err(NI_INVALID_DEVICE_HANDLE);
            }
            Ok(())
        }

        fn open_session(&self, session: &mut XcoderSession) -> Result<(), i32> {
            // SAFETY: the context was initialized in create_session.
            check(unsafe { (self.session_open)(&mut *session.context, NI_DEVICE_TYPE_ENCODER) })?;
            // SAFETY: the frame member is the active union field for writes.
            unsafe { session.frame.data.frame.start_of_stream = 1 };
            Ok(())
        }

        fn plane_dims(&self, session: &XcoderSession, config: &XcoderConfig) -> HwPlaneDims {
            let mut strides = [0 as c_int; NI_MAX_NUM_DATA_POINTERS];
            let mut heights = [0 as c_int; NI_MAX_NUM_DATA_POINTERS];
            // SAFETY: both arrays hold NI_MAX_NUM_DATA_POINTERS entries.
            unsafe {
                (self.get_hw_yuv420p_dim)(
                    config.width as c_int,
                    config.height as c_int,
                    session.context.bit_depth_factor as c_int,
                    config.is_h264() as c_int,
                    strides.as_mut_ptr(),
                    heights.as_mut_ptr(),
                )
            };
            HwPlaneDims {
                strides: [0, 1, 2].map(|i| strides[i].max(0) as usize),
                heights: [0, 1, 2].map(|i| heights[i].max(0) as usize),
            }
        }

        fn frame_planes<'a>(
            &self,
            session: &'a mut XcoderSession,
            config: &XcoderConfig,
            dims: &HwPlaneDims,
        ) -> Result<[&'a mut [u8]; 3], i32> {
            let mut strides = [0 as c_int; NI_MAX_NUM_DATA_POINTERS];
            for (dst, src) in strides.iter_mut().zip(dims.strides) {
                *dst = src as c_int;
            }
            // SAFETY: the frame member is the active union field for writes.
            let frame = unsafe { &mut session.frame.data.frame };
            frame.start_of_stream = 0;
            frame.end_of_stream = 0;
            frame.force_key_frame = 0;
            frame.video_width = config.width as _;
            frame.video_height = config.height as _;
            frame.extra_data_len = NI_APP_ENC_FRAME_META_DATA_SIZE as _;

            // SAFETY: frame is valid; strides holds one entry per data pointer.
            check(unsafe {
                (self.frame_buffer_alloc_v3)(
                    frame,
                    config.width as c_int,
                    config.height as c_int,
                    strides.as_mut_ptr(),
                    config.is_h264() as c_int,
                    frame.extra_data_len as c_int,
                )
            })?;
            if frame.p_data[..3].iter().any(|p| p.is_null()) {
                return Err(-1);
            }

            let lens = [0, 1, 2].map(|i| dims.strides[i] * dims.heights[i]);
            let [y, u, v] = [0, 1, 2].map(|i| frame.p_data[i] as *mut u8);
            // SAFETY: the allocation covers stride x height bytes per plane and
            // stays alive until the next alloc or free on this frame.
            unsafe {
                Ok([
                    std::slice::from_raw_parts_mut(y, lens[0]),
                    std::slice::from_raw_parts_mut(u, lens[1]),
                    std::slice::from_raw_parts_mut(v, lens[2]),
                ])
            }
        }

        fn write_frame(&self, session: &mut XcoderSession) -> i64 {
            // SAFETY: context and frame belong to this open session.
            let rc = unsafe { (self.session_write)(&mut *session.context, &mut *session.frame, NI_DEVICE_TYPE_ENCODER) };
            rc as i64
        }

        fn read_packet(&self, session: &mut XcoderSession, capacity: usize) -> Result<i64, i32> {
            // SAFETY: the packet member is the active union field for reads.
            check(unsafe { (self.packet_buffer_alloc)(&mut session.packet.data.packet, capacity as c_int) })?;
            // SAFETY: context and packet belong to this open session.
            let read = unsafe { (self.session_read)(&mut *session.context, &mut *session.packet, NI_DEVICE_TYPE_ENCODER) };
            if read > NI_FW_ENC_BITSTREAM_META_DATA_SIZE as c_int && session.context.pkt_num == 0 {
                session.context.pkt_num = 1;
            }
            Ok(read as i64)
        }

        fn packet<'a>(&self, session: &'a XcoderSession) -> &'a [u8] {
            // SAFETY: the packet member is the active union field after a read.
            let packet = unsafe { &session.packet.data.packet };
            if packet.p_data.is_null() || packet.data_len == 0 {
                return &[];
            }
            // SAFETY: the library wrote data_len bytes into p_data.
            unsafe { std::slice::from_raw_parts(packet.p_data as *const u8, packet.data_len as usize) }
        }

        fn close_session(&self, session: &mut XcoderSession) {
            // SAFETY: the context belongs to this session; 1 marks EOS received.
            let rc = unsafe { (self.session_close)(&mut *session.context, 1, NI_DEVICE_TYPE_ENCODER) };
            if rc != NI_RETCODE_SUCCESS {
                warn!(rc, "xcoder session close failed");
            }
        }

        fn close_devices(&self, session: &mut XcoderSession) {
            let ctx = &mut *session.context;
            // SAFETY: the handles were returned by ni_device_open.
            unsafe {
                if ctx.device_handle as c_int != NI_INVALID_DEVICE_HANDLE {
                    (self.device_close)(ctx.device_handle as _);
                }
                if ctx.blk_io_handle as c_int != NI_INVALID_DEVICE_HANDLE {
                    (self.device_close)(ctx.blk_io_handle as _);
                }
            }
            ctx.device_handle = NI_INVALID_DEVICE_HANDLE as _;
            ctx.blk_io_handle = NI_INVALID_DEVICE_HANDLE as _;
        }

        fn release_resource(&self, resource: &mut XcoderResource, codec: VideoCodec) {
            // SAFETY: the context came from ni_rsrc_allocate_auto with this load.
            unsafe { (self.rsrc_release_resource)(resource.context, codec_id(codec), resource.load) };
        }

        fn free_device_context(&self, resource: &mut XcoderResource) {
            if resource.context.is_null() {
                return;
            }
            // SAFETY: freed once, then nulled.
            unsafe { (self.rsrc_free_device_context)(resource.context) };
            resource.context = std::ptr::null_mut();
            info!("xcoder device context freed");
        }

        fn free_session_context(&self, session: &mut XcoderSession) {
            // SAFETY: the context was initialized in create_session.
            unsafe { (self.session_context_free)(&mut *session.context) };
        }

        fn free_frame(&self, session: &mut XcoderSession) {
            // SAFETY: freeing an unallocated frame buffer is a library no-op.
            let rc = unsafe { (self.frame_buffer_free)(&mut session.frame.data.frame) };
            if rc != NI_RETCODE_SUCCESS {
                warn!(rc, "xcoder frame buffer free failed");
            }
        }

        fn free_packet(&self, session: &mut XcoderSession) {
            // SAFETY: freeing an unallocated packet buffer is a library no-op.
            let rc = unsafe { (self.packet_buffer_free)(&mut session.packet.data.packet) };
            if rc != NI_RETCODE_SUCCESS {
                warn!(rc, "xcoder packet buffer free failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use vmi_common::{EncoderStatus, Profile, VideoEncoder};

    #[derive(Default)]
    struct MockXcoder {
        events: Mutex<Vec<&'static str>>,
        /// Scripted write results, consumed front to back; then `1`.
        writes: Mutex<Vec<i64>>,
        write_calls: AtomicUsize,
        read_result: AtomicI64,
        fail_open_devices: std::sync::atomic::AtomicBool,
    }

    impl MockXcoder {
        fn log(&self, event: &'static str) {
            self.events.lock().push(event);
        }

        fn events(&self) -> Vec<&'static str> {
            self.events.lock().clone()
        }
    }

    #[derive(Default)]
    struct MockSession {
        planes: [Vec<u8>; 3],
        packet: Vec<u8>,
    }

    impl NetintApi for MockXcoder {
        type Session = MockSession;
        type Resource = ();

        fn create_session(&self, _config: &XcoderConfig) -> Result<MockSession, i32> {
            self.log("create session");
            Ok(MockSession::default())
        }
        fn allocate_resource(&self, _config: &XcoderConfig) -> Result<(), i32> {
            self.log("allocate resource");
            Ok(())
        }
        fn device_name(&self, _resource: &()) -> String {
            "/dev/nvme0n1".to_string()
        }
        fn open_devices(&self, _session: &mut MockSession, _resource: &()) -> Result<(), i32> {
            self.log("open devices");
            if self.fail_open_devices.load(Ordering::SeqCst) {
                return Err(-1);
            }
            Ok(())
        }
        fn open_session(&self, _session: &mut MockSession) -> Result<(), i32> {
            self.log("open session");
            Ok(())
        }
        fn plane_dims(&self, _session: &MockSession, config: &XcoderConfig) -> HwPlaneDims {
            let stride = align_up(config.width, 128) as usize;
            let height = align_up(config.height, 16) as usize;
            HwPlaneDims {
                strides: [stride, stride / 2, stride / 2],
                heights: [height, height / 2, height / 2],
            }
        }
        fn frame_planes<'a>(
            &self,
            session: &'a mut MockSession,
            _config: &XcoderConfig,
            dims: &HwPlaneDims,
        ) -> Result<[&'a mut [u8]; 3], i32> {
            for (i, plane) in session.planes.iter_mut().enumerate() {
                plane.resize(dims.strides[i] * dims.heights[i], 0);
            }
            let [y, u, v] = &mut session.planes;
            Ok([y.as_mut_slice(), u.as_mut_slice(), v.as_mut_slice()])
        }
        fn write_frame(&self, _session: &mut MockSession) -> i64 {
            self.write_calls.fetch_add(1, Ordering::SeqCst);
            let mut writes = self.writes.lock();
            if writes.is_empty() {
                1
            } else {
                writes.remove(0)
            }
        }
        fn read_packet(&self, session: &mut MockSession, _capacity: usize) -> Result<i64, i32> {
            let read = self.read_result.load(Ordering::SeqCst);
            session.packet = (0..read.max(0)).map(|i| i as u8).collect();
            Ok(read)
        }
        fn packet<'a>(&self, session: &'a MockSession) -> &'a [u8] {
            &session.packet
        }
        fn close_session(&self, _session: &mut MockSession) {
            self.log("close session");
        }
        fn close_devices(&self, _session: &mut MockSession) {
            self.log("close devices");
        }
        fn release_resource(&self, _resource: &mut (), _codec: VideoCodec) {
            self.log("release resource");
        }
        fn free_device_context(&self, _resource: &mut ()) {
            self.log("free device context");
        }
        fn free_session_context(&self, _session: &mut MockSession) {
            self.log("free session context");
        }
        fn free_frame(&self, _session: &mut MockSession) {
            self.log("free frame");
        }
        fn free_packet(&self, _session: &mut MockSession) {
            self.log("free packet");
        }
    }

    fn params() -> EncodeParameters {
        EncodeParameters {
            width: 150,
            height: 100,
            ..EncodeParameters::default()
        }
    }

    fn session(sdk: &Arc<MockXcoder>, codec: VideoCodec) -> NetintSession<MockXcoder> {
        let shared = Arc::clone(sdk);
        let params = EncodeParameters {
            profile: Profile::Main,
            ..params()
        };
        NetintDriver::session(Box::new(move || Ok(Arc::clone(&shared))), codec, params)
    }

    #[test]
    fn alignment_and_minimum_floor() {
        let h264 = XcoderConfig::new(VideoCodec::H264, &params());
        assert_eq!((h264.aligned_width, h264.aligned_height), (160, 128));
        assert_eq!(h264.conformance_window(), (10, 28));

        let h265 = XcoderConfig::new(
            VideoCodec::H265,
            &EncodeParameters {
                width: 722,
                height: 1282,
                ..params()
            },
        );
        assert_eq!((h265.aligned_width, h265.aligned_height), (728, 1288));
        assert_eq!(h265.conformance_window(), (6, 6));
    }

    #[test]
    fn xcoder_options() {
        let config = XcoderConfig::new(VideoCodec::H264, &params());
        assert_eq!(
            config.options(),
            [("gopPresetIdx", "2"), ("lowDelay", "1"), ("RcEnable", "1"), ("profile", "1")]
        );
    }

    #[test]
    fn hw_layout_pads_to_hardware_dims() {
        let dims = HwPlaneDims {
            strides: [256, 128, 128],
            heights: [112, 56, 56],
        };
        let layout = dims.layout(150, 100);
        assert_eq!(layout.planes[0].stride, 256);
        assert_eq!(layout.planes[0].padded_height, 112);
        assert_eq!(layout.planes[2].width, 75);
    }

    #[test]
    fn packet_skips_metadata_header() {
        let sdk = Arc::new(MockXcoder::default());
        sdk.read_result.store(100, Ordering::SeqCst);
        let mut session = session(&sdk, VideoCodec::H264);
        session.init().unwrap();
        let out = session.encode_frame(&vec![7u8; params().frame_size()]).unwrap();
        assert_eq!(out.len(), 36);
        assert_eq!(out[0], 64);
    }

    #[test]
    fn empty_read_is_an_empty_packet() {
        let sdk = Arc::new(MockXcoder::default());
        let mut session = session(&sdk, VideoCodec::H265);
        session.init().unwrap();
        assert!(session.encode_frame(&vec![0u8; params().frame_size()]).unwrap().is_empty());
    }

    #[test]
    fn read_within_header_fails() {
        let sdk = Arc::new(MockXcoder::default());
        sdk.read_result.store(64, Ordering::SeqCst);
        let mut session = session(&sdk, VideoCodec::H264);
        session.init().unwrap();
        let err = session.encode_frame(&vec![0u8; params().frame_size()]).unwrap_err();
        assert_eq!(err.status(), EncoderStatus::EncodeFail);
    }

    #[test]
    fn write_retries_then_succeeds() {
        let sdk = Arc::new(MockXcoder::default());
        *sdk.writes.lock() = vec![0, 0, 4096];
        sdk.read_result.store(80, Ordering::SeqCst);
        let mut session = session(&sdk, VideoCodec::H264);
        session.init().unwrap();
        session.encode_frame(&vec![0u8; params().frame_size()]).unwrap();
        assert_eq!(sdk.write_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn negative_write_fails_without_retry() {
        let sdk = Arc::new(MockXcoder::default());
        *sdk.writes.lock() = vec![-3];
        let mut session = session(&sdk, VideoCodec::H264);
        session.init().unwrap();
        let err = session.encode_frame(&vec![0u8; params().frame_size()]).unwrap_err();
        assert_eq!(err.status(), EncoderStatus::EncodeFail);
        assert_eq!(sdk.write_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destroy_follows_xcoder_order() {
        let sdk = Arc::new(MockXcoder::default());
        let mut session = session(&sdk, VideoCodec::H264);
        session.init().unwrap();
        sdk.events.lock().clear();
        session.destroy();
        assert_eq!(
            sdk.events(),
            vec![
                "close session",
                "close devices",
                "release resource",
                "free device context",
                "free session context",
                "free frame",
                "free packet",
            ]
        );
    }

    #[test]
    fn failed_device_open_unwinds_without_session_close() {
        let sdk = Arc::new(MockXcoder::default());
        sdk.fail_open_devices.store(true, Ordering::SeqCst);
        let mut session = session(&sdk, VideoCodec::H264);
        assert_eq!(session.init().unwrap_err().status(), EncoderStatus::InitFail);
        assert_eq!(
            sdk.events(),
            vec![
                "create session",
                "allocate resource",
                "open devices",
                "close devices",
                "release resource",
                "free device context",
                "free session context",
                "free frame",
                "free packet",
            ]
        );
        assert!(!session.driver().is_open());
    }

    #[test]
    fn key_frames_are_unsupported() {
        let sdk = Arc::new(MockXcoder::default());
        let mut session = session(&sdk, VideoCodec::H264);
        session.init().unwrap();
        assert_eq!(
            session.force_key_frame().unwrap_err().status(),
            EncoderStatus::ForceKeyFrameUnsupported
        );
    }
}
