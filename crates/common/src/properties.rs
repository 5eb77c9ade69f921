//! Bridge from a key/value property store to typed encoder parameters.
//!
//! Deployments configure the encoder through string properties: a read-only
//! geometry triple derived from the display, a persisted bitrate/GOP/profile
//! triple that operators may edit, and transient trigger flags. This module
//! reads them into [`EncodeParameters`] and turns the trigger flags into
//! [`EncoderCommand`]s so sessions never interpret string sentinels.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::codec::{Profile, VideoCodec};
use crate::control::{ControlSender, EncoderCommand};
use crate::error::{ConfigError, ParamError};
use crate::params::{allowed_profiles, ParamBounds};
use crate::types::EncodeParameters;

/// Property keys.
pub mod keys {
    pub const DEPLOYMENT_MODE: &str = "ro.sys.vmi.cloudphone";
    pub const ENCODER_TYPE: &str = "ro.vmi.demo.video.encode.format";

    pub const VIDEO_WIDTH: &str = "ro.hardware.width";
    pub const VIDEO_HEIGHT: &str = "ro.hardware.height";
    pub const VIDEO_FPS: &str = "ro.hardware.fps";
    pub const VIDEO_BITRATE: &str = "persist.vmi.video.encode.bitrate";
    pub const VIDEO_GOP_SIZE: &str = "persist.vmi.video.encode.gopsize";
    pub const VIDEO_PROFILE: &str = "persist.vmi.video.encode.profile";

    pub const INSTRUCTION_WIDTH: &str = "persist.vmi.demo.video.encode.width";
    pub const INSTRUCTION_HEIGHT: &str = "persist.vmi.demo.video.encode.height";
    pub const INSTRUCTION_FPS: &str = "persist.vmi.demo.video.encode.framerate";
    pub const INSTRUCTION_BITRATE: &str = "persist.vmi.demo.video.encode.bitrate";
    pub const INSTRUCTION_GOP_SIZE: &str = "persist.vmi.demo.video.encode.gopsize";
    pub const INSTRUCTION_PROFILE: &str = "persist.vmi.demo.video.encode.profile";

    pub const PARAM_ADJUSTING: &str = "persist.vmi.video.encode.param_adjusting";
    pub const FORCE_KEY_FRAME: &str = "persist.vmi.video.encode.keyframe";
}

/// String key/value store the deployment exposes.
pub trait PropertyStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// In-process store, used by tests and by hosts without a system store.
#[derive(Debug, Default)]
pub struct MemoryPropertyStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let store = Self::new();
        for (k, v) in pairs {
            store.set(k, v);
        }
        store
    }
}

impl PropertyStore for MemoryPropertyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }
}

/// Which key family holds the encode parameters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeploymentMode {
    /// Geometry comes from the display hardware properties.
    Video,
    /// Geometry comes from the demo/instruction-stream properties.
    Instruction,
}

struct KeySet {
    width: &'static str,
    height: &'static str,
    fps: &'static str,
    bitrate: &'static str,
    gop_size: &'static str,
    profile: &'static str,
}

impl DeploymentMode {
    pub fn from_store(store: &dyn PropertyStore) -> Result<Self, ConfigError> {
        let raw = store.get(keys::DEPLOYMENT_MODE).unwrap_or_default();
        match raw.as_str() {
            "video" => Ok(Self::Video),
            "instruction" => Ok(Self::Instruction),
            _ => {
                error!(key = keys::DEPLOYMENT_MODE, value = %raw, "Invalid deployment mode");
                Err(ConfigError::InvalidProperty {
                    key: keys::DEPLOYMENT_MODE.to_string(),
                    value: raw,
                })
            }
        }
    }

    fn keys(self) -> KeySet {
        match self {
            Self::Video => KeySet {
                width: keys::VIDEO_WIDTH,
                height: keys::VIDEO_HEIGHT,
                fps: keys::VIDEO_FPS,
                bitrate: keys::VIDEO_BITRATE,
                gop_size: keys::VIDEO_GOP_SIZE,
                profile: keys::VIDEO_PROFILE,
            },
            Self::Instruction => KeySet {
                width: keys::INSTRUCTION_WIDTH,
                height: keys::INSTRUCTION_HEIGHT,
                fps: keys::INSTRUCTION_FPS,
                bitrate: keys::INSTRUCTION_BITRATE,
                gop_size: keys::INSTRUCTION_GOP_SIZE,
                profile: keys::INSTRUCTION_PROFILE,
            },
        }
    }
}

fn get_u32(store: &dyn PropertyStore, key: &str) -> Option<u32> {
    store.get(key).and_then(|v| v.trim().parse().ok())
}

/// Display-derived picture size and rate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Read the geometry triple. Out-of-bounds geometry is an error; there is no
/// last-good fallback for values the display dictates.
pub fn load_geometry(
    store: &dyn PropertyStore,
    mode: DeploymentMode,
    bounds: &ParamBounds,
) -> Result<Geometry, ConfigError> {
    let k = mode.keys();
    let width = get_u32(store, k.width).unwrap_or(0);
    let height = get_u32(store, k.height).unwrap_or(0);
    let frame_rate = get_u32(store, k.fps).unwrap_or(0);

    if !bounds.resolution.contains(width, height) {
        error!(width, height, "Invalid geometry properties");
        return Err(ParamError::Resolution { width, height }.into());
    }
    if !bounds.frame_rates.contains(&frame_rate) {
        error!(frame_rate, "Invalid frame rate property");
        return Err(ParamError::FrameRate {
            value: frame_rate,
            allowed: bounds.frame_rates,
        }
        .into());
    }
    Ok(Geometry {
        width,
        height,
        frame_rate,
    })
}

/// Read the persisted bitrate/GOP/profile triple.
///
/// If any of the three is invalid, all three fall back to `last_good` and the
/// last-good values are written back so the store is corrected.
pub fn load_persisted(
    store: &dyn PropertyStore,
    mode: DeploymentMode,
    bounds: &ParamBounds,
    codec: VideoCodec,
    last_good: &EncodeParameters,
) -> (u32, u32, Profile) {
    let k = mode.keys();
    let bitrate = get_u32(store, k.bitrate).filter(|b| bounds.bitrate.contains(*b));
    let gop_size = get_u32(store, k.gop_size).filter(|g| bounds.gop_size.contains(*g));
    let profile = store
        .get(k.profile)
        .and_then(|p| p.parse::<Profile>().ok())
        .filter(|p| allowed_profiles(codec).contains(p));

    match (bitrate, gop_size, profile) {
        (Some(b), Some(g), Some(p)) => (b, g, p),
        _ => {
            warn!(
                bitrate = last_good.bitrate,
                gop_size = last_good.gop_size,
                profile = %last_good.profile,
                "Invalid persisted encode properties, restoring last correct values"
            );
            store.set(k.bitrate, &last_good.bitrate.to_string());
            store.set(k.gop_size, &last_good.gop_size.to_string());
            store.set(k.profile, last_good.profile.as_str());
            (last_good.bitrate, last_good.gop_size, last_good.profile)
        }
    }
}

/// Assemble a full parameter set from the store.
pub fn load_parameters(
    store: &dyn PropertyStore,
    bounds: &ParamBounds,
    codec: VideoCodec,
    last_good: &EncodeParameters,
) -> Result<EncodeParameters, ConfigError> {
    let mode = DeploymentMode::from_store(store)?;
    let geometry = load_geometry(store, mode, bounds)?;
    let (bitrate, gop_size, profile) = load_persisted(store, mode, bounds, codec, last_good);
    Ok(EncodeParameters {
        frame_rate: geometry.frame_rate,
        bitrate,
        gop_size,
        profile,
        width: geometry.width,
        height: geometry.height,
    })
}

/// Outcome of reading one trigger flag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Flag {
    Idle,
    Raised,
}

fn take_flag(store: &dyn PropertyStore, key: &str) -> Flag {
    match store.get(key).as_deref() {
        Some("1") => Flag::Raised,
        Some("0") | None => Flag::Idle,
        Some(other) => {
            warn!(key, value = other, "Invalid trigger flag, resetting to idle");
            store.set(key, "0");
            Flag::Idle
        }
    }
}

/// Converts the legacy trigger flags into typed commands, once per raise.
pub struct PropertyWatcher {
    store: Arc<dyn PropertyStore>,
    sender: ControlSender,
    bounds: ParamBounds,
    codec: VideoCodec,
    last_good: EncodeParameters,
}

impl PropertyWatcher {
    pub fn new(
        store: Arc<dyn PropertyStore>,
        sender: ControlSender,
        bounds: ParamBounds,
        codec: VideoCodec,
        initial: EncodeParameters,
    ) -> Self {
        Self {
            store,
            sender,
            bounds,
            codec,
            last_good: initial,
        }
    }

    /// Check both flags and forward what was raised.
    ///
    /// A raised parameter flag whose properties cannot be read stays raised so
    /// the next poll retries.
    pub fn poll(&mut self) -> Result<Vec<EncoderCommand>, ConfigError> {
        let mut sent = Vec::new();

        if take_flag(self.store.as_ref(), keys::PARAM_ADJUSTING) == Flag::Raised {
            let params =
                load_parameters(self.store.as_ref(), &self.bounds, self.codec, &self.last_good)?;
            self.store.set(keys::PARAM_ADJUSTING, "0");
            if params.has_changed(&self.last_good) {
                info!(%params, "Encode parameter change requested");
                self.last_good = params;
                let cmd = EncoderCommand::ParamsChanged(params);
                self.sender.send(cmd.clone());
                sent.push(cmd);
            } else {
                info!(%params, "Encode parameters unchanged");
            }
        }

        if take_flag(self.store.as_ref(), keys::FORCE_KEY_FRAME) == Flag::Raised {
            self.store.set(keys::FORCE_KEY_FRAME, "0");
            self.sender.send(EncoderCommand::ForceKeyFrame);
            sent.push(EncoderCommand::ForceKeyFrame);
        }

        Ok(sent)
    }
}
