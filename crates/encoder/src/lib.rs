//! `vmi-encoder` -- Software and hardware video encoder backends.
//!
//! Every backend is driven through the same [`VideoEncoder`] session
//! contract from `vmi-common`. Vendor libraries are loaded at runtime, so a
//! host without a given card or SDK still builds and runs the others.
//!
//! # Architecture
//!
//! - [`binding`] -- name -> address tables over a dynamically loaded library
//! - [`registry`] -- process-wide cache of the shared bindings
//! - [`guard`] -- scoped release of native handles in reverse acquire order
//! - [`marshal`] -- I420 plane split, stride padding and alignment
//! - [`resource`] -- VPE card selection from sysfs telemetry
//! - [`session`] -- shared state machine over a per-backend [`session::SessionDriver`]
//! - [`openh264`] -- software H.264 (OpenH264)
//! - [`netint`] -- NETINT T4xx through libxcoder
//! - [`vpe`] -- VPE transcoder cards through libvpi
//! - [`framework`] -- Quadra and Vastai through libavcodec
//! - [`factory`] -- builds the session for a configured encoder type
//!
//! # Encode Pipeline
//!
//! ```text
//! contiguous I420 frame
//!   --> drain control channel, apply pending parameters (destroy + init)
//!     --> marshal planes into backend layout
//!       --> submit (retry up to 3 times on "not ready")
//!         --> fetch one compressed packet
//!           --> borrowed slice, valid until the next call
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use vmi_common::{EncoderSettings, EncoderType};
//! use vmi_encoder::{create_encoder, BindingRegistry};
//!
//! let registry = Arc::new(BindingRegistry::new(None));
//! let mut encoder = create_encoder(&EncoderSettings::new(EncoderType::OpenH264), &registry)?;
//! encoder.init()?;
//! encoder.start()?;
//!
//! for frame in frames {
//!     let packet = encoder.encode_frame(&frame)?;
//!     sink.write(packet)?;
//! }
//!
//! encoder.destroy();
//! registry.shutdown();
//! ```

pub mod binding;
pub mod error;
pub mod factory;
pub mod framework;
pub mod guard;
pub mod marshal;
pub mod netint;
pub mod openh264;
pub mod registry;
pub mod resource;
pub mod session;
pub mod vpe;

pub use factory::create_encoder;
pub use registry::{BindingKind, BindingRegistry};
pub use session::{EncoderSession, EncoderStats, SessionDriver};
pub use vmi_common::VideoEncoder;
