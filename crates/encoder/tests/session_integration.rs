//! End-to-end tests of the shared session contract.
//!
//! Backends are driven through mock SDKs that implement the facade traits and
//! count every native acquire and release. Tests that need a real vendor
//! library are marked `#[ignore]`:
//!
//! ```bash
//! cargo test -p vmi-encoder --test session_integration -- --ignored
//! ```

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use vmi_common::{
    control_channel, Backend, EncodeParameters, EncoderStatus, Profile, SessionState, VideoCodec,
    VideoEncoder,
};
use vmi_encoder::framework::{
    quadra, FrameSource, FramePlanes, FrameworkApi, FrameworkConfig, FrameworkDriver, AVERROR_EAGAIN,
};
use vmi_encoder::marshal::{marshal_i420, FrameLayout};
use vmi_encoder::openh264::{OpenH264Api, OpenH264Driver, SourcePicture};
use vmi_encoder::resource::ResourceSelector;
use vmi_encoder::EncoderSession;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const WIDTH: u32 = 176;
const HEIGHT: u32 = 144;

fn software_params() -> EncodeParameters {
    EncodeParameters {
        width: WIDTH,
        height: HEIGHT,
        ..EncodeParameters::default()
    }
}

/// Contiguous I420 frame with a recognizable luma ramp.
fn make_frame(width: u32, height: u32) -> Vec<u8> {
    let luma = (width * height) as usize;
    let mut frame = vec![128u8; luma * 3 / 2];
    for (i, byte) in frame[..luma].iter_mut().enumerate() {
        *byte = (i % width as usize) as u8;
    }
    frame
}

// ---------------------------------------------------------------------------
// Counting OpenH264 mock
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CountingOpenH264 {
    creates: AtomicUsize,
    destroys: AtomicUsize,
    initializes: AtomicUsize,
    uninitializes: AtomicUsize,
    encodes: AtomicUsize,
    intra_frames: AtomicUsize,
    opened_with: Mutex<Vec<EncodeParameters>>,
}

impl CountingOpenH264 {
    fn acquired(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    fn released(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

impl OpenH264Api for CountingOpenH264 {
    type Encoder = Vec<u8>;

    fn create(&self) -> Result<Vec<u8>, i32> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn initialize(&self, _encoder: &mut Vec<u8>, params: &EncodeParameters) -> Result<(), i32> {
        self.initializes.fetch_add(1, Ordering::SeqCst);
        self.opened_with.lock().push(*params);
        Ok(())
    }

    fn force_intra_frame(&self, _encoder: &mut Vec<u8>) -> Result<(), i32> {
        self.intra_frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn encode<'a>(&self, encoder: &'a mut Vec<u8>, picture: &SourcePicture<'_>) -> Result<&'a [u8], i32> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        encoder.clear();
        encoder.extend_from_slice(&[0, 0, 0, 1, 0x65]);
        encoder.push(picture.planes[0][1]);
        Ok(encoder.as_slice())
    }

    fn uninitialize(&self, _encoder: &mut Vec<u8>) {
        self.uninitializes.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy(&self, _encoder: &mut Vec<u8>) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

fn software_session(sdk: &Arc<CountingOpenH264>) -> EncoderSession<OpenH264Driver<CountingOpenH264>> {
    let shared = Arc::clone(sdk);
    OpenH264Driver::session(Box::new(move || Ok(Arc::clone(&shared))), software_params())
}

fn running(sdk: &Arc<CountingOpenH264>) -> EncoderSession<OpenH264Driver<CountingOpenH264>> {
    let mut session = software_session(sdk);
    session.init().unwrap();
    session.start().unwrap();
    session
}

// ---------------------------------------------------------------------------
// Scripted libavcodec mock
// ---------------------------------------------------------------------------

struct ScriptedEncoder {
    planes: [Vec<u8>; 3],
    strides: [usize; 3],
    packet: Vec<u8>,
}

/// Send results are popped from `sends`; an empty script accepts the frame.
#[derive(Default)]
struct ScriptedAvCodec {
    sends: Mutex<VecDeque<i32>>,
    send_calls: AtomicUsize,
    opens: AtomicUsize,
    flushes: AtomicUsize,
}

impl ScriptedAvCodec {
    fn script(&self, results: &[i32]) {
        self.sends.lock().extend(results.iter().copied());
    }
}

impl FrameworkApi for ScriptedAvCodec {
    type Encoder = ScriptedEncoder;

    fn open_encoder(&self, config: &FrameworkConfig) -> Result<ScriptedEncoder, i32> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (w, h) = (config.width as usize, config.height as usize);
        let strides = [w, w / 2, w / 2];
        Ok(ScriptedEncoder {
            planes: [vec![0; w * h], vec![0; w * h / 4], vec![0; w * h / 4]],
            strides,
            packet: Vec::new(),
        })
    }

    fn frame_planes<'a>(&self, encoder: &'a mut ScriptedEncoder) -> Result<FramePlanes<'a>, i32> {
        let [y, u, v] = &mut encoder.planes;
        Ok(FramePlanes {
            planes: [y.as_mut_slice(), u.as_mut_slice(), v.as_mut_slice()],
            strides: encoder.strides,
        })
    }

    fn send_frame(&self, encoder: &mut ScriptedEncoder, pts: i64) -> Result<(), i32> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        match self.sends.lock().pop_front() {
            Some(code) if code < 0 => Err(code),
            _ => {
                encoder.packet = vec![0, 0, 0, 1, pts as u8];
                Ok(())
            }
        }
    }

    fn receive_packet(&self, encoder: &mut ScriptedEncoder) -> Result<usize, i32> {
        Ok(encoder.packet.len())
    }

    fn packet<'a>(&self, encoder: &'a ScriptedEncoder) -> &'a [u8] {
        &encoder.packet
    }

    fn flush(&self, _encoder: &mut ScriptedEncoder) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

fn quadra_session(sdk: &Arc<ScriptedAvCodec>) -> EncoderSession<FrameworkDriver<ScriptedAvCodec>> {
    let shared = Arc::clone(sdk);
    let driver = FrameworkDriver::new(
        Box::new(move || Ok(Arc::clone(&shared))),
        Backend::Quadra,
        VideoCodec::H264,
        quadra::encoder_name(VideoCodec::H264),
        FrameSource::Software,
    );
    let mut session = EncoderSession::new(driver, software_params());
    session.init().unwrap();
    session.start().unwrap();
    session
}

// ===========================================================================
// Parameter validation
// ===========================================================================

#[test]
fn test_set_same_params_twice_is_a_no_op() {
    let sdk = Arc::new(CountingOpenH264::default());
    let mut session = running(&sdk);
    let params = *session.active_params();

    session.set_encode_params(params).unwrap();
    session.set_encode_params(params).unwrap();
    assert_eq!(session.state(), SessionState::Running);

    session.encode_frame(&make_frame(WIDTH, HEIGHT)).unwrap();
    assert_eq!(*session.active_params(), params);
    assert_eq!(sdk.acquired(), 1, "unchanged params must not reset");
}

#[test]
fn test_rejected_params_keep_active_values() {
    let sdk = Arc::new(CountingOpenH264::default());
    let mut session = running(&sdk);
    let before = *session.active_params();

    let err = session
        .set_encode_params(EncodeParameters {
            frame_rate: 45,
            ..before
        })
        .unwrap_err();
    assert_eq!(err.status(), EncoderStatus::SetEncodeParamsFail);
    assert_eq!(*session.active_params(), before);
    assert_eq!(session.state(), SessionState::Running);
}

// ===========================================================================
// Input checks and teardown
// ===========================================================================

#[test]
fn test_undersized_input_never_reaches_backend() {
    let sdk = Arc::new(CountingOpenH264::default());
    let mut session = running(&sdk);
    let frame = make_frame(WIDTH, HEIGHT);

    let err = session.encode_frame(&frame[..frame.len() - 1]).unwrap_err();
    assert_eq!(err.status(), EncoderStatus::EncodeFail);
    assert_eq!(sdk.encodes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_destroy_is_idempotent_and_balanced() {
    let sdk = Arc::new(CountingOpenH264::default());
    let mut session = software_session(&sdk);

    session.destroy();
    assert_eq!((sdk.acquired(), sdk.released()), (0, 0));

    session.init().unwrap();
    session.destroy();
    session.destroy();
    assert_eq!((sdk.acquired(), sdk.released()), (1, 1));
    assert_eq!(sdk.uninitializes.load(Ordering::SeqCst), 1);

    session.init().unwrap();
    drop(session);
    assert_eq!((sdk.acquired(), sdk.released()), (2, 2));
}

// ===========================================================================
// Submission retry
// ===========================================================================

#[test]
fn test_two_not_ready_submissions_then_success() {
    let sdk = Arc::new(ScriptedAvCodec::default());
    let mut session = quadra_session(&sdk);
    sdk.script(&[AVERROR_EAGAIN, AVERROR_EAGAIN, 0]);

    let output = session.encode_frame(&make_frame(WIDTH, HEIGHT)).unwrap().to_vec();
    assert_eq!(output, [0, 0, 0, 1, 0]);
    assert_eq!(sdk.send_calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_three_not_ready_submissions_fail_the_frame() {
    let sdk = Arc::new(ScriptedAvCodec::default());
    let mut session = quadra_session(&sdk);
    sdk.script(&[AVERROR_EAGAIN, AVERROR_EAGAIN, AVERROR_EAGAIN]);

    let err = session.encode_frame(&make_frame(WIDTH, HEIGHT)).unwrap_err();
    assert_eq!(err.status(), EncoderStatus::EncodeFail);
    assert_eq!(sdk.send_calls.load(Ordering::SeqCst), 3);

    // The session stays usable for the next frame.
    let output = session.encode_frame(&make_frame(WIDTH, HEIGHT)).unwrap();
    assert!(!output.is_empty());
}

#[test]
fn test_session_error_is_not_retried() {
    let sdk = Arc::new(ScriptedAvCodec::default());
    let mut session = quadra_session(&sdk);
    sdk.script(&[-5]);

    assert!(session.encode_frame(&make_frame(WIDTH, HEIGHT)).is_err());
    assert_eq!(sdk.send_calls.load(Ordering::SeqCst), 1);

    session.destroy();
    assert_eq!(sdk.flushes.load(Ordering::SeqCst), 1);
    assert_eq!(sdk.opens.load(Ordering::SeqCst), 1);
}

// ===========================================================================
// Device selection and marshalling
// ===========================================================================

fn write_card(dev: &Path, sys: &Path, index: usize, power: i32, util: i32) {
    fs::write(dev.join(format!("transcoder{index}")), "").unwrap();
    let dir = sys.join(format!("transcoder{index}"));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("power_state"), format!("{power}\n")).unwrap();
    fs::write(dir.join("enc_util"), format!("{util}\n")).unwrap();
    fs::write(
        dir.join("mem_info"),
        "S0: 250 MB used, 250 MB free, 500 MB total\nS1: 250 MB used, 250 MB free, 500 MB total\n",
    )
    .unwrap();
}

#[test]
fn test_selects_least_utilized_powered_card() {
    let root = tempfile::tempdir().unwrap();
    let (dev, sys) = (root.path().join("dev"), root.path().join("sys"));
    fs::create_dir_all(&dev).unwrap();
    write_card(&dev, &sys, 0, -1, 0);
    write_card(&dev, &sys, 1, 0, 40);
    write_card(&dev, &sys, 2, 0, 10);

    let selected = ResourceSelector::new(&dev, &sys).select_device().unwrap();
    assert_eq!(selected.index, 2);
    assert_eq!(selected.node, dev.join("transcoder2"));
}

#[test]
fn test_disabled_card_falls_through_to_next() {
    let root = tempfile::tempdir().unwrap();
    let (dev, sys) = (root.path().join("dev"), root.path().join("sys"));
    fs::create_dir_all(&dev).unwrap();
    write_card(&dev, &sys, 0, 0, 5);
    write_card(&dev, &sys, 1, 0, 20);
    fs::write(dev.join("disabled_transcoder0"), "").unwrap();

    let selector = ResourceSelector::new(&dev, &sys);
    assert_eq!(selector.device_count().unwrap(), 2);
    let selected = selector.select_device().unwrap();
    assert_eq!(selected.index, 1);
    assert_eq!(selected.node, dev.join("transcoder1"));
}

#[test]
fn test_padding_replicates_edges() {
    let (w, h) = (150u32, 150u32);
    let input = make_frame(w, h);
    let layout = FrameLayout::aligned(w, h, 16);
    assert_eq!((layout.planes[0].stride, layout.planes[0].padded_height), (160, 160));

    let [mut luma, mut cb, mut cr] = layout.planes.map(|p| vec![0u8; p.len()]);
    marshal_i420(&input, w, h, &layout, [&mut luma, &mut cb, &mut cr]).unwrap();

    for row in 0..160 {
        let line = &luma[row * 160..(row + 1) * 160];
        assert!(line[150..].iter().all(|&b| b == 149), "row {row} padding");
    }
    assert_eq!(&luma[159 * 160..], &luma[149 * 160..150 * 160]);
}

// ===========================================================================
// Parameter change and control channel
// ===========================================================================

#[test]
fn test_param_change_resets_on_next_frame() {
    let sdk = Arc::new(CountingOpenH264::default());
    let mut session = running(&sdk);
    let before = *session.active_params();
    assert_eq!((before.bitrate, before.gop_size, before.profile), (5_000_000, 30, Profile::Baseline));

    let next = EncodeParameters {
        bitrate: 3_000_000,
        gop_size: 60,
        profile: Profile::Main,
        ..before
    };
    session.set_encode_params(next).unwrap();
    assert_eq!(*session.active_params(), before);
    assert_eq!(session.state(), SessionState::ParamsPendingReset);

    session.encode_frame(&make_frame(WIDTH, HEIGHT)).unwrap();
    assert_eq!(*session.active_params(), next);
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!((sdk.acquired(), sdk.released()), (2, 1));
    assert_eq!(sdk.opened_with.lock().last().copied(), Some(next));
    assert_eq!(session.stats().resets, 1);
}

#[test]
fn test_control_channel_commands_apply_on_next_frame() {
    let sdk = Arc::new(CountingOpenH264::default());
    let (tx, rx) = control_channel();
    let mut session = running(&sdk).with_control(rx);

    assert!(tx.force_key_frame());
    session.encode_frame(&make_frame(WIDTH, HEIGHT)).unwrap();
    assert_eq!(sdk.intra_frames.load(Ordering::SeqCst), 1);

    let next = EncodeParameters {
        gop_size: 120,
        ..*session.active_params()
    };
    assert!(tx.params_changed(next));
    session.encode_frame(&make_frame(WIDTH, HEIGHT)).unwrap();
    assert_eq!(session.active_params().gop_size, 120);
    assert_eq!(sdk.acquired(), 2);
}

// ===========================================================================
// Real libraries (ignored by default)
// ===========================================================================

#[test]
#[ignore] // Requires libopenh264.so on the library path
fn test_openh264_encodes_a_frame() {
    use vmi_common::{EncoderSettings, EncoderType};
    use vmi_encoder::{create_encoder, BindingKind, BindingRegistry};

    let registry = Arc::new(BindingRegistry::new(None));
    let settings = EncoderSettings {
        params: Some(software_params()),
        ..EncoderSettings::new(EncoderType::OpenH264)
    };
    let mut encoder = create_encoder(&settings, &registry).unwrap();
    encoder.init().unwrap();
    encoder.start().unwrap();
    assert!(registry.is_loaded(BindingKind::OpenH264));

    encoder.force_key_frame().unwrap();
    let packet = encoder.encode_frame(&make_frame(WIDTH, HEIGHT)).unwrap();
    assert!(packet.starts_with(&[0, 0, 0, 1]), "expected an Annex B start code");

    encoder.destroy();
    registry.shutdown();
    assert!(!registry.is_loaded(BindingKind::OpenH264));
}

#[test]
#[ignore] // Requires a VPE card and libvpi.so
fn test_vpe_card_is_selectable() {
    let selected = ResourceSelector::new("/dev", "/sys/class/misc").select_device().unwrap();
    assert!(selected.node.exists());
}
