//! VPE transcoder-card encoder.
//!
//! Init picks the least loaded card through the [`ResourceSelector`], opens
//! its node, builds the hardware context and a YUV420P pre-processing
//! filter. The H.26x codec itself needs the first filtered frame, so it is
//! created lazily inside the first encode call.
//!
//! Per frame: copy the three planes into host buffers, run the filter, hand
//! the filtered frame to the codec, then drain packets; the last packet of
//! the drain is the frame's output.

pub mod ffi;

pub use ffi::VpeLibrary;

use std::ffi::{c_int, c_void, CString};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use vmi_common::params::{ParamBounds, VPE_BOUNDS};
use vmi_common::{Backend, EncodeError, EncodeParameters, VideoCodec};

use crate::binding::ApiLoader;
use crate::guard::{NativePtr, Owned};
use crate::marshal::{marshal_i420, FrameLayout};
use crate::resource::ResourceSelector;
use crate::session::{EncoderSession, SessionDriver};

use ffi::{
    VpiApi, VpiCtrlCmdParam, VpiCtx, VpiEncParamSet, VpiFrame, VpiH26xEncCfg, VpiPPOption,
    VpiPacket, VpiSysInfo, CODEC_ID_H264, CODEC_ID_HEVC, H26XENC_VPE, HWCONTEXT_VPE, PP_VPE,
    VPE_TASK_LIVE, VPI_CMD_ENC_GET_EMPTY_FRAME_SLOT, VPI_CMD_ENC_GET_FRAME_PACKET,
    VPI_CMD_ENC_INIT_OPTION, VPI_CMD_ENC_REG_FREE_FRAME, VPI_CMD_PP_INIT_OPTION,
    VPI_CMD_REMOVE_VPEFRAME, VPI_CMD_SET_VPEFRAME, VPI_FMT_YUV420P, VPI_YUV420_PLANAR,
};

/// Packet buffers grow in 64 KiB steps.
const STREAM_BUFFER_STEP: usize = 0x1_0000;

const PRESET: &str = "superfast";
const PROFILE: &str = "main";
/// BT.709 colour description written into the VUI.
const COLOUR_DESCRIPTION: c_int = 2;

/// `-EINVAL`, reported when a path cannot be passed to C.
const INVALID_ARGUMENT: i32 = -22;

/// Capacity for a packet of `size` bytes.
pub fn stream_capacity(size: usize) -> usize {
    size.div_ceil(STREAM_BUFFER_STEP) * STREAM_BUFFER_STEP
}

/// Codec settings fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    pub codec: VideoCodec,
    pub bitrate: u32,
    pub frame_rate: u32,
    pub gop_size: u32,
}

impl CodecConfig {
    pub fn from_params(codec: VideoCodec, params: &EncodeParameters) -> Self {
        Self {
            codec,
            bitrate: params.bitrate,
            frame_rate: params.frame_rate,
            gop_size: params.gop_size,
        }
    }

    /// Key-frame directive, e.g. `interval:60`.
    pub fn force_idr(&self) -> String {
        format!("interval:{}", self.gop_size)
    }

    /// Extra encoder options, in submission order.
    pub fn extra_params(&self) -> [(&'static str, &'static str); 2] {
        [("gop_size", "1"), ("low_delay", "1")]
    }
}

/// One host frame ready for the filter.
#[derive(Debug)]
pub struct HostFrame<'a> {
    pub planes: [&'a [u8]; 3],
    pub linesize: [u32; 3],
    pub width: u32,
    pub height: u32,
    pub pts: i64,
}

/// libvpi calls used by a session. Errors are the raw return code.
pub trait VpeApi: Send + Sync + 'static {
    type Device: Send;
    type HwContext: Send;
    type Filter: Send;
    type Codec: Send;

    fn open_device(&self, node: &Path) -> Result<Self::Device, i32>;
    fn close_device(&self, device: &mut Self::Device);

    /// System info, hardware context and frame-context registration.
    fn create_hw_context(&self, device: &Self::Device) -> Result<Self::HwContext, i32>;
    fn destroy_hw_context(&self, hw: &mut Self::HwContext);

    fn create_filter(&self, hw: &mut Self::HwContext, width: u32, height: u32) -> Result<Self::Filter, i32>;
    fn close_filter(&self, filter: &mut Self::Filter);
    fn filter_frame(&self, filter: &mut Self::Filter, frame: &HostFrame<'_>) -> Result<(), i32>;

    fn create_codec(&self, hw: &mut Self::HwContext, config: &CodecConfig) -> Result<Self::Codec, i32>;
    /// Queue the filter's latest output.
    fn put_frame(&self, codec: &mut Self::Codec, filter: &mut Self::Filter) -> Result<(), i32>;
    /// Size of the next ready packet, `None` when the codec has nothing.
    fn pending_packet_size(&self, codec: &mut Self::Codec) -> Option<usize>;
    /// Copy the next packet into `buffer`, returning its length.
    fn get_packet(&self, codec: &mut Self::Codec, buffer: &mut [u8]) -> Result<usize, i32>;
    /// Submit an empty frame so the codec drains.
    fn flush_codec(&self, codec: &mut Self::Codec);
    fn close_codec(&self, codec: &mut Self::Codec);
}

// ---------------------------------------------------------------------------
// Library-backed implementation
// ---------------------------------------------------------------------------

/// Open `/dev/transcoderN` file descriptor.
#[derive(Debug)]
pub struct VpeDevice {
    fd: c_int,
}

/// Hardware context and the frame context it was registered with.
pub struct VpeHwContext {
    fd: c_int,
    ctx: VpiCtx,
    api: NativePtr<VpiApi>,
    frame_ctx: Box<VpiFrame>,
}

/// Pre-processing plugin with its input and output frames.
pub struct VpeFilter {
    fd: c_int,
    ctx: VpiCtx,
    api: NativePtr<VpiApi>,
    input: Box<VpiFrame>,
    output: Box<VpiFrame>,
}

/// H.26x plugin and the strings its configuration points at.
pub struct VpeCodec {
    fd: c_int,
    ctx: VpiCtx,
    api: NativePtr<VpiApi>,
    config: NativePtr<VpiH26xEncCfg>,
    _strings: Vec<CString>,
    _params: Vec<Box<VpiEncParamSet>>,
}

// SAFETY: each handle is owned by exactly one session and only touched from
// the thread currently driving that session.
unsafe impl Send for VpeHwContext {}
unsafe impl Send for VpeFilter {}
unsafe impl Send for VpeCodec {}

fn control(api: NativePtr<VpiApi>, ctx: VpiCtx, cmd: c_int, data: *mut c_void, out: *mut c_void) -> c_int {
    let mut param = VpiCtrlCmdParam { cmd, data };
    // SAFETY: `api` is the live table returned with `ctx`.
    unsafe { ((*api.as_ptr()).control)(ctx, &mut param as *mut VpiCtrlCmdParam as *mut c_void, out) }
}

impl VpeLibrary {
    fn destroy_plugin(&self, api: NativePtr<VpiApi>, ctx: VpiCtx, fd: c_int) {
        // SAFETY: `ctx` was created on `fd` and is closed exactly once.
        unsafe {
            ((*api.as_ptr()).close)(ctx);
            let rc = (self.destroy)(ctx, fd);
            if rc != 0 {
                warn!(rc, "vpi_destroy failed");
            }
        }
    }
}

impl VpeApi for VpeLibrary {
    type Device = VpeDevice;
    type HwContext = VpeHwContext;
    type Filter = VpeFilter;
    type Codec = VpeCodec;

    fn open_device(&self, node: &Path) -> Result<VpeDevice, i32> {
        let path = CString::new(node.to_string_lossy().as_bytes()).map_err(|_| INVALID_ARGUMENT)?;
        // SAFETY: `path` is a valid C string for the duration of the call.
        let fd = unsafe { (self.open_hwdevice)(path.as_ptr()) };
        if fd < 0 {
            return Err(fd);
        }
        Ok(VpeDevice { fd })
    }

    fn close_device(&self, device: &mut VpeDevice) {
        if device.fd < 0 {
            return;
        }
        // SAFETY: fd came from vpi_open_hwdevice and is closed once.
        let rc = unsafe { (self.close_hwdevice)(device.fd) };
        info!(rc, "VPE hardware device closed");
        device.fd = -1;
    }

    fn create_hw_context(&self, device: &VpeDevice) -> Result<VpeHwContext, i32> {
        let mut sys_info: *mut VpiSysInfo = std::ptr::null_mut();
        // SAFETY: the library allocates the struct; it is released with vpi_freep.
        let rc = unsafe { (self.get_sys_info_struct)(&mut sys_info) };
        if rc != 0 || sys_info.is_null() {
            return Err(if rc == 0 { -1 } else { rc });
        }
        // SAFETY: non-null struct owned by us until freed.
        unsafe {
            (*sys_info).device = device.fd;
            (*sys_info).priority = VPE_TASK_LIVE;
            (*sys_info).sys_log_level = 0;
        }

        // The hardware context is created in place of the sys-info pointer.
        let mut ctx = sys_info as VpiCtx;
        let mut api: *mut VpiApi = std::ptr::null_mut();
        // SAFETY: out-pointers are valid locals.
        let rc = unsafe { (self.create)(&mut ctx, &mut api, device.fd, HWCONTEXT_VPE) };
        if rc != 0 || api.is_null() {
            // SAFETY: freep takes the address of the pointer it frees.
            unsafe { (self.freep)(&mut ctx as *mut VpiCtx as *mut c_void) };
            return Err(if rc == 0 { -1 } else { rc });
        }

        let mut hw = VpeHwContext {
            fd: device.fd,
            ctx,
            api: NativePtr(api),
            frame_ctx: Box::default(),
        };
        let mut fd = hw.fd;
        let frame_ctx = &mut *hw.frame_ctx as *mut VpiFrame as *mut c_void;
        control(hw.api, &mut fd as *mut c_int as VpiCtx, VPI_CMD_SET_VPEFRAME, frame_ctx, std::ptr::null_mut());
        Ok(hw)
    }

    fn destroy_hw_context(&self, hw: &mut VpeHwContext) {
        if hw.ctx.is_null() {
            return;
        }
        let mut fd = hw.fd;
        let frame_ctx = &mut *hw.frame_ctx as *mut VpiFrame as *mut c_void;
        control(hw.api, &mut fd as *mut c_int as VpiCtx, VPI_CMD_REMOVE_VPEFRAME, frame_ctx, std::ptr::null_mut());
        // SAFETY: ctx was created by vpi_create on this fd.
        unsafe {
            (self.destroy)(hw.ctx, hw.fd);
            (self.freep)(&mut hw.ctx as *mut VpiCtx as *mut c_void);
        }
        hw.ctx = std::ptr::null_mut();
    }

    fn create_filter(&self, hw: &mut VpeHwContext, width: u32, height: u32) -> Result<VpeFilter, i32> {
        let mut ctx: VpiCtx = std::ptr::null_mut();
        let mut api: *mut VpiApi = std::ptr::null_mut();
        // SAFETY: out-pointers are valid locals.
        let rc = unsafe { (self.create)(&mut ctx, &mut api, hw.fd, PP_VPE) };
        if rc != 0 || api.is_null() {
            return Err(if rc == 0 { -1 } else { rc });
        }
        let api = NativePtr(api);

        let mut option: *mut VpiPPOption = std::ptr::null_mut();
        let mut param = VpiCtrlCmdParam {
            cmd: VPI_CMD_PP_INIT_OPTION,
            data: std::ptr::null_mut(),
        };
        // SAFETY: the plugin writes a pointer to its own option struct.
        let rc = unsafe {
            ((*api.as_ptr()).control)(
                ctx,
                &mut param as *mut VpiCtrlCmdParam as *mut c_void,
                &mut option as *mut *mut VpiPPOption as *mut c_void,
            )
        };
        if rc != 0 || option.is_null() {
            // SAFETY: ctx was created on hw.fd.
            unsafe { (self.destroy)(ctx, hw.fd) };
            return Err(if rc == 0 { -1 } else { rc });
        }

        // SAFETY: option belongs to the plugin and outlives this call.
        let rc = unsafe {
            let option = &mut *option;
            option.w = width as c_int;
            option.h = height as c_int;
            option.format = VPI_FMT_YUV420P;
            option.nb_outputs = 1;
            option.force_10bit = 0;
            option.low_res = std::ptr::null_mut();
            option.b_disable_tcache = 0;
            option.frame = &mut *hw.frame_ctx as *mut VpiFrame as *mut c_void;
            ((*api.as_ptr()).init)(ctx, option as *mut VpiPPOption as *mut c_void)
        };
        if rc != 0 {
            self.destroy_plugin(api, ctx, hw.fd);
            return Err(rc);
        }

        let input = Box::new(VpiFrame {
            width: width as c_int,
            height: height as c_int,
            ..VpiFrame::default()
        });
        Ok(VpeFilter {
            fd: hw.fd,
            ctx,
            api,
            input,
            output: Box::default(),
        })
    }

    fn close_filter(&self, filter: &mut VpeFilter) {
        if filter.ctx.is_null() {
            return;
        }
        self.destroy_plugin(filter.api, filter.ctx, filter.fd);
        filter.ctx = std::ptr::null_mut();
    }

    fn filter_frame(&self, filter: &mut VpeFilter, frame: &HostFrame<'_>) -> Result<(), i32> {
        let input = &mut *filter.input;
        input.key_frame = 1;
        input.pts = frame.pts;
        input.pkt_dts = frame.pts;
        for i in 0..3 {
            input.linesize[i] = frame.linesize[i] as c_int;
            // The filter only reads the host planes.
            input.data[i] = frame.planes[i].as_ptr() as *mut u8;
        }
        // SAFETY: both frames are owned by `filter`; the planes outlive the call.
        let rc = unsafe {
            ((*filter.api.as_ptr()).process)(
                filter.ctx,
                input as *mut VpiFrame as *mut c_void,
                &mut *filter.output as *mut VpiFrame as *mut c_void,
            )
        };
        input.data = [std::ptr::null_mut(); 3];
        if rc == 0 {
            Ok(())
        } else {
            Err(rc)
        }
    }

    fn create_codec(&self, hw: &mut VpeHwContext, config: &CodecConfig) -> Result<VpeCodec, i32> {
        let mut ctx: VpiCtx = std::ptr::null_mut();
        let mut api: *mut VpiApi = std::ptr::null_mut();
        // SAFETY: out-pointers are valid locals.
        let rc = unsafe { (self.create)(&mut ctx, &mut api, hw.fd, H26XENC_VPE) };
        if rc != 0 || api.is_null() {
            return Err(if rc == 0 { -1 } else { rc });
        }
        let api = NativePtr(api);

        let mut strings = Vec::new();
        let mut params: Vec<Box<VpiEncParamSet>> = Vec::new();
        for (key, value) in config.extra_params() {
            let key = CString::new(key).map_err(|_| INVALID_ARGUMENT)?;
            let value = CString::new(value).map_err(|_| INVALID_ARGUMENT)?;
            params.push(Box::new(VpiEncParamSet {
                key: key.as_ptr() as *mut _,
                value: value.as_ptr() as *mut _,
                next: std::ptr::null_mut(),
            }));
            strings.push(key);
            strings.push(value);
        }
        for i in (1..params.len()).rev() {
            let next = &mut *params[i] as *mut VpiEncParamSet;
            params[i - 1].next = next;
        }

        let mut cfg: *mut VpiH26xEncCfg = std::ptr::null_mut();
        let init_option = control(api, ctx, VPI_CMD_ENC_INIT_OPTION, std::ptr::null_mut(), &mut cfg as *mut _ as *mut c_void);
        if init_option != 0 || cfg.is_null() {
            // SAFETY: ctx was created on hw.fd.
            unsafe { (self.destroy)(ctx, hw.fd) };
            return Err(if init_option == 0 { -1 } else { init_option });
        }

        let preset = CString::new(PRESET).map_err(|_| INVALID_ARGUMENT)?;
        let profile = CString::new(PROFILE).map_err(|_| INVALID_ARGUMENT)?;
        let force_idr = CString::new(config.force_idr()).map_err(|_| INVALID_ARGUMENT)?;

        // SAFETY: cfg is the plugin's config struct; every pointer stored in
        // it stays alive inside the returned VpeCodec.
        let rc = unsafe {
            let c = &mut *cfg;
            c.codec_id = match config.codec {
                VideoCodec::H264 => CODEC_ID_H264,
                VideoCodec::H265 => CODEC_ID_HEVC,
            };
            c.preset = preset.as_ptr() as *mut _;
            c.profile = profile.as_ptr() as *mut _;
            c.force_idr = force_idr.as_ptr() as *mut _;
            c.input_rate_numer = config.frame_rate as c_int;
            c.input_rate_denom = 1;
            c.bit_per_second = config.bitrate as c_int;
            c.lum_width_src = hw.frame_ctx.width;
            c.lum_height_src = hw.frame_ctx.height;
            c.input_format = VPI_YUV420_PLANAR;
            c.frame_ctx = &mut *hw.frame_ctx;
            c.param_list = params.first_mut().map_or(std::ptr::null_mut(), |p| &mut **p as *mut _);
            c.colour_primaries = COLOUR_DESCRIPTION;
            c.transfer_characteristics = COLOUR_DESCRIPTION;
            c.matrix_coeffs = COLOUR_DESCRIPTION;
            ((*api.as_ptr()).init)(ctx, cfg as *mut c_void)
        };
        strings.extend([preset, profile, force_idr]);

        let mut codec = VpeCodec {
            fd: hw.fd,
            ctx,
            api,
            config: NativePtr(cfg),
            _strings: strings,
            _params: params,
        };
        if rc < 0 {
            self.close_codec(&mut codec);
            return Err(rc);
        }

        let release = self.frame_release as *mut c_void;
        let rc = control(api, ctx, VPI_CMD_ENC_REG_FREE_FRAME, release, std::ptr::null_mut());
        if rc != 0 {
            self.close_codec(&mut codec);
            return Err(rc);
        }
        Ok(codec)
    }

    fn put_frame(&self, codec: &mut VpeCodec, filter: &mut VpeFilter) -> Result<(), i32> {
        let mut slot: *mut VpiFrame = std::ptr::null_mut();
        let rc = control(
            codec.api,
            codec.ctx,
            VPI_CMD_ENC_GET_EMPTY_FRAME_SLOT,
            std::ptr::null_mut(),
            &mut slot as *mut *mut VpiFrame as *mut c_void,
        );
        if rc != 0 || slot.is_null() {
            return Err(if rc == 0 { -1 } else { rc });
        }
        let output = &mut *filter.output as *mut VpiFrame;
        // SAFETY: slot is a codec-owned VpiFrame; the filtered frame stays
        // alive in `filter` until the codec releases it.
        unsafe {
            *slot = *output;
            (*slot).opaque = output as *mut c_void;
            (*slot).vpi_opaque = output as *mut c_void;
            let rc = ((*codec.api.as_ptr()).encode_put_frame)(codec.ctx, slot as *mut c_void);
            if rc != 0 {
                return Err(rc);
            }
        }
        Ok(())
    }

    fn pending_packet_size(&self, codec: &mut VpeCodec) -> Option<usize> {
        let mut size: c_int = 0;
        let rc = control(
            codec.api,
            codec.ctx,
            VPI_CMD_ENC_GET_FRAME_PACKET,
            std::ptr::null_mut(),
            &mut size as *mut c_int as *mut c_void,
        );
        (rc != -1).then_some(size.max(0) as usize)
    }

    fn get_packet(&self, codec: &mut VpeCodec, buffer: &mut [u8]) -> Result<usize, i32> {
        let mut packet = VpiPacket {
            size: buffer.len() as u32,
            data: buffer.as_mut_ptr(),
            ..VpiPacket::default()
        };
        // SAFETY: packet.data points at `buffer`, which holds `size` bytes.
        let rc = unsafe {
            ((*codec.api.as_ptr()).encode_get_packet)(codec.ctx, &mut packet as *mut VpiPacket as *mut c_void)
        };
        if rc != 0 {
            return Err(rc);
        }
        Ok((packet.size as usize).min(buffer.len()))
    }

    fn flush_codec(&self, codec: &mut VpeCodec) {
        if codec.ctx.is_null() {
            return;
        }
        let mut slot: *mut VpiFrame = std::ptr::null_mut();
        let rc = control(
            codec.api,
            codec.ctx,
            VPI_CMD_ENC_GET_EMPTY_FRAME_SLOT,
            std::ptr::null_mut(),
            &mut slot as *mut *mut VpiFrame as *mut c_void,
        );
        if rc != 0 || slot.is_null() {
            error!(rc, "VPE flush could not get an empty frame slot");
            return;
        }
        // SAFETY: an all-zero frame is the end-of-stream marker.
        let rc = unsafe {
            *slot = VpiFrame::default();
            ((*codec.api.as_ptr()).encode_put_frame)(codec.ctx, slot as *mut c_void)
        };
        if rc != 0 {
            error!(rc, "VPE flush frame failed");
        }
    }

    fn close_codec(&self, codec: &mut VpeCodec) {
        if !codec.ctx.is_null() {
            self.destroy_plugin(codec.api, codec.ctx, codec.fd);
            codec.ctx = std::ptr::null_mut();
        }
        if !codec.config.is_null() {
            let mut config = codec.config.as_ptr() as *mut c_void;
            // SAFETY: the config was allocated by the plugin.
            unsafe { (self.freep)(&mut config as *mut *mut c_void as *mut c_void) };
            codec.config = NativePtr(std::ptr::null_mut());
            debug!("VPE encoder config freed");
        }
    }
}

// ---------------------------------------------------------------------------
// Session driver
// ---------------------------------------------------------------------------

/// VPE H.264/H.265 session over any [`VpeApi`].
pub struct VpeDriver<A: VpeApi> {
    loader: ApiLoader<A>,
    selector: ResourceSelector,
    codec: VideoCodec,
    api: Option<Arc<A>>,
    device: Option<Owned<A::Device>>,
    hw: Option<Owned<A::HwContext>>,
    filter: Option<Owned<A::Filter>>,
    encoder: Option<Owned<A::Codec>>,
    planes: [Vec<u8>; 3],
    stream: Vec<u8>,
    params: Option<EncodeParameters>,
}

pub type VpeSession<A = VpeLibrary> = EncoderSession<VpeDriver<A>>;

impl<A: VpeApi> VpeDriver<A> {
    pub fn new(loader: ApiLoader<A>, selector: ResourceSelector, codec: VideoCodec) -> Self {
        Self {
            loader,
            selector,
            codec,
            api: None,
            device: None,
            hw: None,
            filter: None,
            encoder: None,
            planes: Default::default(),
            stream: Vec::new(),
            params: None,
        }
    }

    pub fn session(
        loader: ApiLoader<A>,
        selector: ResourceSelector,
        codec: VideoCodec,
        params: EncodeParameters,
    ) -> VpeSession<A> {
        EncoderSession::new(Self::new(loader, selector, codec), params)
    }

    /// Whether the H.26x codec has been created yet.
    pub fn codec_open(&self) -> bool {
        self.encoder.is_some()
    }
}

impl<A: VpeApi> SessionDriver for VpeDriver<A> {
    fn backend(&self) -> Backend {
        Backend::Vpe
    }

    fn codec(&self) -> VideoCodec {
        self.codec
    }

    fn bounds(&self) -> &'static ParamBounds {
        &VPE_BOUNDS
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn open(&mut self, params: &EncodeParameters) -> Result<(), EncodeError> {
        let api = (self.loader)().map_err(|e| {
            error!(error = %e, "VPE library unavailable");
            EncodeError::Init(e.to_string())
        })?;

        let selected = self.selector.select_device().map_err(|e| {
            error!(error = %e, "Cannot find a valid VPE device");
            EncodeError::Init(e.to_string())
        })?;

        let release = Arc::clone(&api);
        let device = api.open_device(&selected.node).map_err(|rc| {
            error!(rc, node = %selected.node.display(), "Failed to open VPE hardware device");
            EncodeError::Init(format!("vpi_open_hwdevice({}) returned {rc}", selected.node.display()))
        })?;
        let device = Owned::new("vpe device", device, move |d| release.close_device(d));

        let release = Arc::clone(&api);
        let hw = api.create_hw_context(device.get()).map_err(|rc| {
            error!(rc, "Failed to create VPE hardware context");
            EncodeError::Init(format!("hardware context creation returned {rc}"))
        })?;
        let mut hw = Owned::new("vpe hw context", hw, move |h| release.destroy_hw_context(h));

        let release = Arc::clone(&api);
        let filter = api
            .create_filter(hw.get_mut(), params.width, params.height)
            .map_err(|rc| {
                error!(rc, "Failed to init VPE pre-processing filter");
                EncodeError::Init(format!("pre-processing filter init returned {rc}"))
            })?;
        let filter = Owned::new("vpe filter", filter, move |f| release.close_filter(f));

        let layout = FrameLayout::contiguous(params.width, params.height);
        for (buffer, plane) in self.planes.iter_mut().zip(&layout.planes) {
            buffer.clear();
            buffer.resize(plane.len(), 0);
        }

        info!(device = selected.index, %params, "VPE encoder initialized");
        self.api = Some(api);
        self.device = Some(device);
        self.hw = Some(hw);
        self.filter = Some(filter);
        self.params = Some(*params);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            if let Some(api) = &self.api {
                api.flush_codec(encoder.get_mut());
            }
            encoder.release();
        }
        if let Some(filter) = self.filter.take() {
            filter.release();
        }
        if let Some(hw) = self.hw.take() {
            hw.release();
        }
        if let Some(device) = self.device.take() {
            device.release();
        }
        self.api = None;
        self.params = None;
        self.planes = Default::default();
        self.stream = Vec::new();
    }

    fn encode(&mut self, input: &[u8], frame: u64) -> Result<&[u8], EncodeError> {
        let failed = |reason: String| EncodeError::EncodeFailed { frame, reason };
        let (api, hw, filter, params) = match (&self.api, &mut self.hw, &mut self.filter, &self.params) {
            (Some(api), Some(hw), Some(filter), Some(params)) => (api, hw, filter, params),
            _ => return Err(EncodeError::NotInitialized),
        };

        let layout = FrameLayout::contiguous(params.width, params.height);
        let [y, u, v] = &mut self.planes;
        marshal_i420(
            input,
            params.width,
            params.height,
            &layout,
            [y.as_mut_slice(), u.as_mut_slice(), v.as_mut_slice()],
        )
            .map_err(|e| failed(e.to_string()))?;

        let host = HostFrame {
            planes: [
                self.planes[0].as_slice(),
                self.planes[1].as_slice(),
                self.planes[2].as_slice(),
            ],
            linesize: layout.planes.map(|p| p.stride as u32),
            width: params.width,
            height: params.height,
            pts: frame as i64,
        };
        api.filter_frame(filter.get_mut(), &host)
            .map_err(|rc| failed(format!("pre-processing returned {rc}")))?;

        if self.encoder.is_none() {
            let config = CodecConfig::from_params(self.codec, params);
            let codec = api.create_codec(hw.get_mut(), &config).map_err(|rc| {
                error!(rc, "VPE encoder init failed");
                failed(format!("codec init returned {rc}"))
            })?;
            let release = Arc::clone(api);
            self.encoder = Some(Owned::new("vpe codec", codec, move |c| release.close_codec(c)));
            info!(codec = %self.codec, "VPE codec created");
        }
        let encoder = match &mut self.encoder {
            Some(encoder) => encoder,
            None => return Err(EncodeError::NotInitialized),
        };

        api.put_frame(encoder.get_mut(), filter.get_mut())
            .map_err(|rc| failed(format!("encode_put_frame returned {rc}")))?;

        let mut len = 0;
        while let Some(size) = api.pending_packet_size(encoder.get_mut()) {
            let capacity = stream_capacity(size);
            if self.stream.len() < capacity {
                self.stream.resize(capacity, 0);
            }
            len = api
                .get_packet(encoder.get_mut(), &mut self.stream)
                .map_err(|rc| failed(format!("encode_get_packet returned {rc}")))?;
            debug!(frame, bytes = len, "VPE packet drained");
        }
        Ok(&self.stream[..len])
    }
}
