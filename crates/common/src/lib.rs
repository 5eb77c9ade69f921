//! `vmi-common` -- Shared types, validation and control plumbing for the
//! video encoder layer.
//!
//! This crate is the backend-independent foundation the `vmi-encoder` crate
//! builds on:
//!
//! - **Types**: `EncodeParameters`, `VideoCodec`, `Profile`
//! - **Params**: per-backend `ParamBounds` constants and the `validate` free function
//! - **Encoder**: the `VideoEncoder` session contract, `SessionState`, `Backend`
//! - **Errors**: `EncodeError`, `ParamError`, `ConfigError` and the numeric `EncoderStatus`
//! - **Config**: `EncoderType` selector and serde-backed `EncoderSettings`
//! - **Control**: typed command channel into a running session
//! - **Properties**: bridge from a string property store to the types above

pub mod codec;
pub mod config;
pub mod control;
pub mod encoder;
pub mod error;
pub mod params;
pub mod properties;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::{Profile, VideoCodec};
pub use config::{EncoderSettings, EncoderType, VastaiSettings, VpeSettings};
pub use control::{control_channel, ControlReceiver, ControlSender, EncoderCommand};
pub use encoder::{Backend, SessionState, VideoEncoder};
pub use error::{ConfigError, EncodeError, EncoderStatus, ParamError};
pub use params::{validate, ParamBounds};
pub use properties::{MemoryPropertyStore, PropertyStore, PropertyWatcher};
pub use types::EncodeParameters;
