//! [`FrameworkApi`] over ffmpeg-next.

use std::ffi::CString;
use std::ptr;

use ffmpeg::ffi;
use ffmpeg::format::Pixel;
use ffmpeg_next as ffmpeg;
use tracing::{debug, info, warn};

use super::{FramePlanes, FrameSource, FrameworkApi, FrameworkConfig, AVERROR_ENCODER_NOT_FOUND};
use crate::error::BindingError;

/// Surfaces preallocated in the VAAPI frame pool.
const SURFACE_POOL_SIZE: i32 = 20;
const ENOMEM: i32 = -12;

/// libavcodec, initialized once per session.
#[derive(Debug)]
pub struct AvCodec;

impl AvCodec {
    pub fn new() -> Result<Self, BindingError> {
        ffmpeg::init().map_err(|e| BindingError::LibraryNotFound {
            library: "libavcodec.so".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self)
    }
}

/// VAAPI device and frame pool with the surface frames are uploaded to.
struct VaapiUpload {
    device: *mut ffi::AVBufferRef,
    frames: *mut ffi::AVBufferRef,
    surface: ffmpeg::frame::Video,
}

impl VaapiUpload {
    fn new(render_node: &std::path::Path, width: u32, height: u32) -> Result<Self, i32> {
        let node = CString::new(render_node.to_string_lossy().as_bytes()).map_err(|_| -22)?;
        let mut device: *mut ffi::AVBufferRef = ptr::null_mut();
        // SAFETY: out-pointer and node string are valid for the call.
        let rc = unsafe {
            ffi::av_hwdevice_ctx_create(
                &mut device,
                ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
                node.as_ptr(),
                ptr::null_mut(),
                0,
            )
        };
        if rc < 0 {
            return Err(rc);
        }

        // SAFETY: device is a live hardware device reference.
        let mut frames = unsafe { ffi::av_hwframe_ctx_alloc(device) };
        if frames.is_null() {
            // SAFETY: releases the reference taken above.
            unsafe { ffi::av_buffer_unref(&mut device) };
            return Err(ENOMEM);
        }
        // SAFETY: a frames reference always wraps an AVHWFramesContext.
        let rc = unsafe {
            let ctx = (*frames).data as *mut ffi::AVHWFramesContext;
            (*ctx).format = ffi::AVPixelFormat::AV_PIX_FMT_VAAPI;
            (*ctx).sw_format = ffi::AVPixelFormat::AV_PIX_FMT_YUV420P;
            (*ctx).width = width as i32;
            (*ctx).height = height as i32;
            (*ctx).initial_pool_size = SURFACE_POOL_SIZE;
            ffi::av_hwframe_ctx_init(frames)
        };
        if rc < 0 {
            // SAFETY: both references are owned here.
            unsafe {
                ffi::av_buffer_unref(&mut frames);
                ffi::av_buffer_unref(&mut device);
            }
            return Err(rc);
        }
        info!(node = %render_node.display(), width, height, "VAAPI frame pool ready");
        Ok(Self {
            device,
            frames,
            surface: ffmpeg::frame::Video::empty(),
        })
    }

    /// Copy `source` into a fresh pool surface.
    fn upload(&mut self, source: &ffmpeg::frame::Video) -> Result<&ffmpeg::frame::Video, i32> {
        // SAFETY: surface and source are valid frames; the surface is
        // unreferenced before it takes a new pool buffer.
        unsafe {
            ffi::av_frame_unref(self.surface.as_mut_ptr());
            let rc = ffi::av_hwframe_get_buffer(self.frames, self.surface.as_mut_ptr(), 0);
            if rc < 0 {
                return Err(rc);
            }
            let rc = ffi::av_hwframe_transfer_data(self.surface.as_mut_ptr(), source.as_ptr(), 0);
            if rc < 0 {
                return Err(rc);
            }
        }
        self.surface.set_pts(source.pts());
        Ok(&self.surface)
    }
}

impl Drop for VaapiUpload {
    fn drop(&mut self) {
        // SAFETY: each reference is released once.
        unsafe {
            ffi::av_buffer_unref(&mut self.frames);
            ffi::av_buffer_unref(&mut self.device);
        }
    }
}

/// One open encoder with its software frame and packet.
pub struct AvEncoder {
    encoder: ffmpeg::encoder::Video,
    frame: ffmpeg::frame::Video,
    upload: Option<VaapiUpload>,
    packet: ffmpeg::Packet,
    height: u32,
}

// SAFETY: owned by one session; never shared between threads.
unsafe impl Send for AvEncoder {}

impl FrameworkApi for AvCodec {
    type Encoder = AvEncoder;

    fn open_encoder(&self, config: &FrameworkConfig) -> Result<AvEncoder, i32> {
        let codec =
            ffmpeg::encoder::find_by_name(config.encoder_name).ok_or(AVERROR_ENCODER_NOT_FOUND)?;
        let mut video = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(i32::from)?;
        video.set_width(config.width);
        video.set_height(config.height);
        let fps = config.frame_rate as i32;
        video.set_time_base((1, fps));
        video.set_frame_rate(Some((fps, 1)));
        video.set_bit_rate(config.bitrate as usize);
        video.set_gop(config.gop_size);
        // SAFETY: the context is not open yet.
        unsafe { (*video.as_mut_ptr()).profile = config.profile_id() };

        let upload = match &config.source {
            FrameSource::Software => {
                video.set_format(Pixel::YUV420P);
                None
            }
            FrameSource::Vaapi { render_node } => {
                let upload = VaapiUpload::new(render_node, config.width, config.height)?;
                video.set_format(Pixel::VAAPI);
                // SAFETY: the context takes its own reference to the pool.
                unsafe {
                    let frames = ffi::av_buffer_ref(upload.frames);
                    if frames.is_null() {
                        return Err(ENOMEM);
                    }
                    (*video.as_mut_ptr()).hw_frames_ctx = frames;
                }
                Some(upload)
            }
        };

        let encoder = video.open_as(codec).map_err(i32::from)?;
        let frame = ffmpeg::frame::Video::new(Pixel::YUV420P, config.width, config.height);
        debug!(encoder = config.encoder_name, "Encoder context opened");
        Ok(AvEncoder {
            encoder,
            frame,
            upload,
            packet: ffmpeg::Packet::empty(),
            height: config.height,
        })
    }

    fn frame_planes<'a>(&self, encoder: &'a mut AvEncoder) -> Result<FramePlanes<'a>, i32> {
        // SAFETY: the encoder may still reference the previous buffer.
        let rc = unsafe { ffi::av_frame_make_writable(encoder.frame.as_mut_ptr()) };
        if rc < 0 {
            return Err(rc);
        }
        let strides = [0, 1, 2].map(|i| encoder.frame.stride(i));
        let chroma_rows = encoder.height.div_ceil(2) as usize;
        let rows = [encoder.height as usize, chroma_rows, chroma_rows];
        // SAFETY: av_frame_get_buffer sized each plane as linesize x rows and
        // the frame is writable; the planes do not overlap.
        let planes = unsafe {
            let raw = encoder.frame.as_mut_ptr();
            [0, 1, 2].map(|i| std::slice::from_raw_parts_mut((*raw).data[i], strides[i] * rows[i]))
        };
        Ok(FramePlanes { planes, strides })
    }

    fn send_frame(&self, encoder: &mut AvEncoder, pts: i64) -> Result<(), i32> {
        encoder.frame.set_pts(Some(pts));
        match &mut encoder.upload {
            Some(upload) => {
                let surface = upload.upload(&encoder.frame)?;
                encoder.encoder.send_frame(surface).map_err(i32::from)
            }
            None => encoder.encoder.send_frame(&encoder.frame).map_err(i32::from),
        }
    }

    fn receive_packet(&self, encoder: &mut AvEncoder) -> Result<usize, i32> {
        encoder.encoder.receive_packet(&mut encoder.packet).map_err(i32::from)?;
        Ok(encoder.packet.size())
    }

    fn packet<'a>(&self, encoder: &'a AvEncoder) -> &'a [u8] {
        encoder.packet.data().unwrap_or(&[])
    }

    fn flush(&self, encoder: &mut AvEncoder) {
        if let Err(e) = encoder.encoder.send_eof() {
            warn!(error = %e, "Encoder rejected end of stream");
            return;
        }
        let mut drained = 0;
        while encoder.encoder.receive_packet(&mut encoder.packet).is_ok() {
            drained += 1;
        }
        debug!(drained, "Encoder flushed");
    }
}
