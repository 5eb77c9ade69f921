//! I420 frame marshalling into backend plane layouts.
//!
//! Input is always one contiguous I420 buffer (stride == width, chroma at half
//! width and half height). Backends describe the layout they need with a
//! [`FrameLayout`]; padding columns and rows are filled by edge replication,
//! never left uninitialized.

use crate::error::MarshalError;

/// Round `value` up to a multiple of `alignment` (a power of two or any
/// positive integer).
pub fn align_up(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Bytes in a contiguous I420 frame.
pub fn frame_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3 / 2
}

/// Geometry of one destination plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Visible samples per row in the source.
    pub width: usize,
    /// Visible rows in the source.
    pub height: usize,
    /// Bytes per destination row, at least `width`.
    pub stride: usize,
    /// Destination rows, at least `height`.
    pub padded_height: usize,
}

impl PlaneLayout {
    /// Destination bytes this plane occupies.
    pub fn len(&self) -> usize {
        self.stride * self.padded_height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Y, U, V destination planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub planes: [PlaneLayout; 3],
}

impl FrameLayout {
    /// Stride equals width, no padding rows.
    pub fn contiguous(width: u32, height: u32) -> Self {
        let (w, h) = (width as usize, height as usize);
        let luma = PlaneLayout {
            width: w,
            height: h,
            stride: w,
            padded_height: h,
        };
        let chroma = PlaneLayout {
            width: w / 2,
            height: h / 2,
            stride: w / 2,
            padded_height: h / 2,
        };
        Self {
            planes: [luma, chroma, chroma],
        }
    }

    /// Width and height rounded up to `alignment`; chroma follows at half size.
    pub fn aligned(width: u32, height: u32, alignment: u32) -> Self {
        let stride = align_up(width, alignment) as usize;
        let padded = align_up(height, alignment) as usize;
        Self::padded(width, height, stride, padded)
    }

    /// Luma padded to `stride` x `padded_height`; chroma at half of each.
    pub fn padded(width: u32, height: u32, stride: usize, padded_height: usize) -> Self {
        let (w, h) = (width as usize, height as usize);
        let luma = PlaneLayout {
            width: w,
            height: h,
            stride: stride.max(w),
            padded_height: padded_height.max(h),
        };
        let chroma = PlaneLayout {
            width: w / 2,
            height: h / 2,
            stride: (stride / 2).max(w / 2),
            padded_height: (padded_height / 2).max(h / 2),
        };
        Self {
            planes: [luma, chroma, chroma],
        }
    }

    /// Per-plane strides chosen by a native allocator; rows are not padded.
    pub fn with_strides(width: u32, height: u32, strides: [usize; 3]) -> Self {
        let mut layout = Self::contiguous(width, height);
        for (plane, stride) in layout.planes.iter_mut().zip(strides) {
            plane.stride = stride.max(plane.width);
        }
        layout
    }

    /// Sum of all destination plane sizes.
    pub fn total_len(&self) -> usize {
        self.planes.iter().map(PlaneLayout::len).sum()
    }
}

/// Reject input shorter than one frame. Runs before any marshalling.
pub fn check_input(input: &[u8], width: u32, height: u32) -> Result<(), MarshalError> {
    let expected = frame_size(width, height);
    if input.len() < expected {
        return Err(MarshalError::InputTooSmall {
            expected,
            actual: input.len(),
        });
    }
    Ok(())
}

/// Borrow the Y, U and V planes of a contiguous I420 buffer.
pub fn split_i420(input: &[u8], width: u32, height: u32) -> Result<[&[u8]; 3], MarshalError> {
    check_input(input, width, height)?;
    let luma = width as usize * height as usize;
    let chroma = (width as usize / 2) * (height as usize / 2);
    let (y, rest) = input.split_at(luma);
    let (u, rest) = rest.split_at(chroma);
    Ok([y, u, &rest[..chroma]])
}

/// Copy a `src_w` x `src_h` plane into `dst` with `dst_stride` bytes per row
/// and `dst_h` rows. Padding columns repeat each row's last byte; padding rows
/// repeat the last written row.
pub fn pad_plane(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst: &mut [u8],
    dst_stride: usize,
    dst_h: usize,
) {
    if src_w == 0 || src_h == 0 || dst_stride < src_w {
        return;
    }
    let rows = src_h.min(dst_h);
    for row in 0..rows {
        let line = &src[row * src_w..(row + 1) * src_w];
        let out = &mut dst[row * dst_stride..(row + 1) * dst_stride];
        out[..src_w].copy_from_slice(line);
        let edge = line[src_w - 1];
        out[src_w..].fill(edge);
    }
    let last = (rows - 1) * dst_stride;
    for row in rows..dst_h {
        dst.copy_within(last..last + dst_stride, row * dst_stride);
    }
}

/// Marshal a contiguous I420 `input` into three destination planes.
pub fn marshal_i420(
    input: &[u8],
    width: u32,
    height: u32,
    layout: &FrameLayout,
    dst: [&mut [u8]; 3],
) -> Result<(), MarshalError> {
    let src = split_i420(input, width, height)?;
    for (index, plane) in layout.planes.iter().enumerate() {
        if dst[index].len() < plane.len() {
            return Err(MarshalError::PlaneTooSmall {
                plane: index,
                expected: plane.len(),
                actual: dst[index].len(),
            });
        }
    }
    for ((src, dst), plane) in src.into_iter().zip(dst).zip(&layout.planes) {
        pad_plane(src, plane.width, plane.height, dst, plane.stride, plane.padded_height);
    }
    Ok(())
}
