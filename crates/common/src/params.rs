//! Per-backend parameter bounds and validation.
//!
//! Each backend declares its own [`ParamBounds`] constant; there is no shared
//! global policy. [`validate`] is a free function so every session variant
//! composes it instead of inheriting it.

use tracing::{debug, error};

use crate::codec::{Profile, VideoCodec};
use crate::error::ParamError;
use crate::types::EncodeParameters;

/// Closed interval `min..=max`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Span {
    pub min: u32,
    pub max: u32,
}

impl Span {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Allowed width and height.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Extent {
    pub width: Span,
    pub height: Span,
}

impl Extent {
    fn contains(self, width: u32, height: u32) -> bool {
        self.width.contains(width) && self.height.contains(height)
    }
}

/// Resolution rule of a backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResolutionBounds {
    /// Same limits regardless of orientation.
    Fixed(Extent),
    /// Landscape (`width > height`) and portrait pictures have mirrored limits.
    Oriented { landscape: Extent, portrait: Extent },
}

impl ResolutionBounds {
    pub fn contains(self, width: u32, height: u32) -> bool {
        match self {
            Self::Fixed(extent) => extent.contains(width, height),
            Self::Oriented { landscape, portrait } => {
                if width > height {
                    landscape.contains(width, height)
                } else {
                    portrait.contains(width, height)
                }
            }
        }
    }
}

/// Everything a backend accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ParamBounds {
    pub resolution: ResolutionBounds,
    /// Discrete nominal rates, not a range.
    pub frame_rates: &'static [u32],
    pub bitrate: Span,
    pub gop_size: Span,
}

/// The two nominal rates every backend certifies.
pub const CERTIFIED_FRAME_RATES: &[u32] = &[30, 60];

const GOP_SPAN: Span = Span::new(30, 3000);

/// OpenH264 software encoder.
pub const SOFTWARE_BOUNDS: ParamBounds = ParamBounds {
    resolution: ResolutionBounds::Fixed(Extent {
        width: Span::new(16, 4096),
        height: Span::new(16, 4096),
    }),
    frame_rates: CERTIFIED_FRAME_RATES,
    bitrate: Span::new(1_000_000, 10_000_000),
    gop_size: GOP_SPAN,
};

/// NETINT xcoder (`NI_PARAM_MIN/MAX_*`, `NI_MIN/MAX_BITRATE`).
pub const NETINT_BOUNDS: ParamBounds = ParamBounds {
    resolution: ResolutionBounds::Fixed(Extent {
        width: Span::new(32, 8192),
        height: Span::new(32, 8192),
    }),
    frame_rates: CERTIFIED_FRAME_RATES,
    bitrate: Span::new(64_000, 700_000_000),
    gop_size: GOP_SPAN,
};

/// VPE transcoder cards.
pub const VPE_BOUNDS: ParamBounds = ParamBounds {
    resolution: ResolutionBounds::Fixed(Extent {
        width: Span::new(144, 4096),
        height: Span::new(144, 4096),
    }),
    frame_rates: CERTIFIED_FRAME_RATES,
    bitrate: Span::new(100_000, 100_000_000),
    gop_size: GOP_SPAN,
};

/// Generic path shared by the framework-hosted backends (Quadra, Vastai).
pub const FRAMEWORK_BOUNDS: ParamBounds = ParamBounds {
    resolution: ResolutionBounds::Oriented {
        landscape: Extent {
            width: Span::new(176, 7680),
            height: Span::new(144, 4320),
        },
        portrait: Extent {
            width: Span::new(144, 4320),
            height: Span::new(176, 7680),
        },
    },
    frame_rates: CERTIFIED_FRAME_RATES,
    bitrate: Span::new(1_000_000, 10_000_000),
    gop_size: GOP_SPAN,
};

/// Profiles a coding standard accepts. H.265 backends only take Main.
pub fn allowed_profiles(codec: VideoCodec) -> &'static [Profile] {
    match codec {
        VideoCodec::H264 => &Profile::ALL,
        VideoCodec::H265 => &[Profile::Main],
    }
}

/// Check `params` against `bounds`, logging the first field that fails.
pub fn validate(
    params: &EncodeParameters,
    bounds: &ParamBounds,
    codec: VideoCodec,
) -> Result<(), ParamError> {
    let result = check(params, bounds, codec);
    match &result {
        Ok(()) => debug!(%params, %codec, "encode parameters accepted"),
        Err(e) => error!(field = e.field(), %params, %codec, "encode parameters rejected: {e}"),
    }
    result
}

fn check(params: &EncodeParameters, bounds: &ParamBounds, codec: VideoCodec) -> Result<(), ParamError> {
    if !bounds.resolution.contains(params.width, params.height) {
        return Err(ParamError::Resolution {
            width: params.width,
            height: params.height,
        });
    }
    if !bounds.frame_rates.contains(&params.frame_rate) {
        return Err(ParamError::FrameRate {
            value: params.frame_rate,
            allowed: bounds.frame_rates,
        });
    }
    if !bounds.bitrate.contains(params.bitrate) {
        return Err(ParamError::Bitrate {
            value: params.bitrate,
            min: bounds.bitrate.min,
            max: bounds.bitrate.max,
        });
    }
    if !bounds.gop_size.contains(params.gop_size) {
        return Err(ParamError::GopSize {
            value: params.gop_size,
            min: bounds.gop_size.min,
            max: bounds.gop_size.max,
        });
    }
    if !allowed_profiles(codec).contains(&params.profile) {
        return Err(ParamError::Profile {
            profile: params.profile,
            codec,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(width: u32, height: u32) -> EncodeParameters {
        EncodeParameters {
            width,
            height,
            ..EncodeParameters::default()
        }
    }

    #[test]
    fn defaults_pass_every_h264_backend() {
        let p = EncodeParameters::default();
        for bounds in [&SOFTWARE_BOUNDS, &NETINT_BOUNDS, &VPE_BOUNDS, &FRAMEWORK_BOUNDS] {
            assert!(validate(&p, bounds, VideoCodec::H264).is_ok());
        }
    }

    #[test]
    fn frame_rate_is_discrete() {
        let p = EncodeParameters {
            frame_rate: 45,
            ..EncodeParameters::default()
        };
        let err = validate(&p, &NETINT_BOUNDS, VideoCodec::H264).unwrap_err();
        assert_eq!(err.field(), "frame_rate");

        let p60 = EncodeParameters {
            frame_rate: 60,
            ..EncodeParameters::default()
        };
        assert!(validate(&p60, &NETINT_BOUNDS, VideoCodec::H264).is_ok());
    }

    #[test]
    fn bitrate_bounds_are_closed() {
        let at_min = EncodeParameters {
            bitrate: 1_000_000,
            ..EncodeParameters::default()
        };
        let at_max = EncodeParameters {
            bitrate: 10_000_000,
            ..EncodeParameters::default()
        };
        let above = EncodeParameters {
            bitrate: 10_000_001,
            ..EncodeParameters::default()
        };
        let below = EncodeParameters {
            bitrate: 999_999,
            ..EncodeParameters::default()
        };
        assert!(validate(&at_min, &SOFTWARE_BOUNDS, VideoCodec::H264).is_ok());
        assert!(validate(&at_max, &SOFTWARE_BOUNDS, VideoCodec::H264).is_ok());
        assert!(matches!(
            validate(&above, &SOFTWARE_BOUNDS, VideoCodec::H264),
            Err(ParamError::Bitrate { .. })
        ));
        assert!(matches!(
            validate(&below, &SOFTWARE_BOUNDS, VideoCodec::H264),
            Err(ParamError::Bitrate { .. })
        ));
    }

    #[test]
    fn software_accepts_small_pictures_hardware_does_not() {
        let tiny = params(16, 16);
        assert!(validate(&tiny, &SOFTWARE_BOUNDS, VideoCodec::H264).is_ok());
        assert!(validate(&tiny, &VPE_BOUNDS, VideoCodec::H264).is_err());
        assert!(validate(&tiny, &FRAMEWORK_BOUNDS, VideoCodec::H264).is_err());
    }

    #[test]
    fn framework_bounds_follow_orientation() {
        // 7680 wide is fine in landscape, not in portrait.
        assert!(validate(&params(7680, 4320), &FRAMEWORK_BOUNDS, VideoCodec::H264).is_ok());
        assert!(validate(&params(4320, 7680), &FRAMEWORK_BOUNDS, VideoCodec::H264).is_ok());
        assert!(validate(&params(7680, 7680), &FRAMEWORK_BOUNDS, VideoCodec::H264).is_err());
        // Height 144 only in landscape.
        assert!(validate(&params(176, 144), &FRAMEWORK_BOUNDS, VideoCodec::H264).is_ok());
        assert!(validate(&params(144, 144), &FRAMEWORK_BOUNDS, VideoCodec::H264).is_err());
    }

    #[test]
    fn h265_only_takes_main() {
        let baseline = EncodeParameters::default();
        let err = validate(&baseline, &NETINT_BOUNDS, VideoCodec::H265).unwrap_err();
        assert!(matches!(err, ParamError::Profile { .. }));

        let main = EncodeParameters {
            profile: Profile::Main,
            ..baseline
        };
        assert!(validate(&main, &NETINT_BOUNDS, VideoCodec::H265).is_ok());
    }

    #[test]
    fn gop_bounds() {
        let p = EncodeParameters {
            gop_size: 3001,
            ..EncodeParameters::default()
        };
        assert!(matches!(
            validate(&p, &VPE_BOUNDS, VideoCodec::H264),
            Err(ParamError::GopSize { min: 30, max: 3000, .. })
        ));
    }
}
