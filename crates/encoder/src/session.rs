//! Backend-independent session lifecycle.
//!
//! `EncoderSession` owns the bookkeeping every backend shares (lifecycle,
//! active and pending parameters, key-frame requests, the frame counter and
//! the optional control channel) and drives a backend-specific
//! [`SessionDriver`] that only knows how to open, close and encode.
//!
//! Parameter changes never reconfigure a live session. An accepted change is
//! staged as *pending* and applied by a full destroy/init/start cycle at the
//! start of the next encoded frame.

use tracing::{debug, error, info, warn};

use vmi_common::params::{validate, ParamBounds};
use vmi_common::{
    Backend, ControlReceiver, EncodeError, EncodeParameters, EncoderCommand, ParamError,
    SessionState, VideoCodec, VideoEncoder,
};

use crate::error::SubmitError;

/// Submission attempts before a zero-byte "not ready" result becomes fatal.
pub const MAX_SUBMIT_ATTEMPTS: u32 = 3;

/// Submit a frame, retrying while the backend accepts zero bytes.
///
/// `submit` returns the number of bytes accepted, or a negative code on a
/// session-level fault. Negative results are never retried.
pub fn submit_with_retry(mut submit: impl FnMut() -> i64) -> Result<usize, SubmitError> {
    for attempt in 1..=MAX_SUBMIT_ATTEMPTS {
        match submit() {
            n if n > 0 => return Ok(n as usize),
            0 => debug!(attempt, "Backend not ready, retrying submission"),
            code => return Err(SubmitError::Rejected(code)),
        }
    }
    Err(SubmitError::NotReady {
        attempts: MAX_SUBMIT_ATTEMPTS,
    })
}

// ---------------------------------------------------------------------------
// Backend driver seam
// ---------------------------------------------------------------------------

/// What a backend provides to [`EncoderSession`].
pub trait SessionDriver: Send {
    fn backend(&self) -> Backend;

    fn codec(&self) -> VideoCodec;

    /// Bounds every parameter set is validated against before `open`.
    fn bounds(&self) -> &'static ParamBounds;

    /// Whether any native resource is currently held.
    fn is_open(&self) -> bool;

    /// Acquire everything needed to encode with `params`.
    ///
    /// On error nothing acquired by this call may remain held.
    fn open(&mut self, params: &EncodeParameters) -> Result<(), EncodeError>;

    /// Release everything in teardown order. Must tolerate partial state and
    /// repeated calls.
    fn close(&mut self);

    /// Smallest input a frame call accepts.
    fn min_input_len(&self, active: &EncodeParameters) -> usize {
        active.frame_size()
    }

    /// Ask the backend to code the next frame as a key frame.
    fn force_key_frame(&mut self) -> Result<(), EncodeError> {
        Err(EncodeError::ForceKeyFrameUnsupported(self.backend().name()))
    }

    /// Marshal, submit and drain one packet. `input` has been size checked.
    fn encode(&mut self, input: &[u8], frame: u64) -> Result<&[u8], EncodeError>;
}

// ---------------------------------------------------------------------------
// Session bookkeeping
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Initialized,
    Running,
}

/// State shared by every backend session.
#[derive(Debug)]
pub struct SessionCore {
    backend: Backend,
    codec: VideoCodec,
    bounds: &'static ParamBounds,
    lifecycle: Lifecycle,
    active: EncodeParameters,
    pending: Option<EncodeParameters>,
    key_frame_requested: bool,
    frames: u64,
    control: Option<ControlReceiver>,
}

impl SessionCore {
    pub fn new(
        backend: Backend,
        codec: VideoCodec,
        bounds: &'static ParamBounds,
        params: EncodeParameters,
    ) -> Self {
        Self {
            backend,
            codec,
            bounds,
            lifecycle: Lifecycle::Uninitialized,
            active: params,
            pending: None,
            key_frame_requested: false,
            frames: 0,
            control: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.pending.is_some() {
            return SessionState::ParamsPendingReset;
        }
        match self.lifecycle {
            Lifecycle::Uninitialized => SessionState::Uninitialized,
            Lifecycle::Initialized => SessionState::Initialized,
            Lifecycle::Running => SessionState::Running,
        }
    }

    pub fn active(&self) -> &EncodeParameters {
        &self.active
    }

    pub fn pending(&self) -> Option<&EncodeParameters> {
        self.pending.as_ref()
    }

    /// Parameters the next init will use.
    pub fn target(&self) -> EncodeParameters {
        self.pending.unwrap_or(self.active)
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle != Lifecycle::Uninitialized
    }

    pub fn needs_reset(&self) -> bool {
        self.pending.is_some()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn validate_target(&self) -> Result<EncodeParameters, ParamError> {
        let params = self.target();
        validate(&params, self.bounds, self.codec)?;
        Ok(params)
    }

    fn commit_init(&mut self, params: EncodeParameters) {
        self.active = params;
        self.pending = None;
        self.lifecycle = Lifecycle::Initialized;
    }

    fn mark_started(&mut self) {
        if self.lifecycle == Lifecycle::Initialized {
            self.lifecycle = Lifecycle::Running;
        }
    }

    fn mark_stopped(&mut self) {
        if self.lifecycle == Lifecycle::Running {
            self.lifecycle = Lifecycle::Initialized;
        }
    }

    fn mark_destroyed(&mut self) {
        self.lifecycle = Lifecycle::Uninitialized;
        self.key_frame_requested = false;
    }

    /// Validate and stage `params`. Returns whether a reset is now pending.
    ///
    /// Staging the parameters already targeted is a no-op; staging the
    /// active set cancels an earlier pending change.
    pub fn stage(&mut self, params: EncodeParameters) -> Result<bool, ParamError> {
        validate(&params, self.bounds, self.codec)?;
        if params == self.target() {
            debug!(%params, "Encode parameters unchanged");
            return Ok(self.needs_reset());
        }
        if !params.has_changed(&self.active) {
            info!(%params, "Pending parameter change cancelled");
            self.pending = None;
            return Ok(false);
        }
        info!(from = %self.active, to = %params, "Encode parameters staged for reset");
        self.pending = Some(params);
        Ok(true)
    }

    pub fn request_key_frame(&mut self) {
        self.key_frame_requested = true;
    }

    fn take_key_frame_request(&mut self) -> bool {
        std::mem::take(&mut self.key_frame_requested)
    }

    pub fn attach_control(&mut self, control: ControlReceiver) {
        self.control = Some(control);
    }

    /// Apply every queued control command.
    fn drain_control(&mut self) {
        let commands = match &self.control {
            Some(control) => control.drain(),
            None => return,
        };
        for command in commands {
            match command {
                EncoderCommand::ParamsChanged(params) => {
                    if let Err(e) = self.stage(params) {
                        warn!(backend = %self.backend, error = %e, "Ignoring rejected parameter change");
                    }
                }
                EncoderCommand::ForceKeyFrame => self.request_key_frame(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder statistics
// ---------------------------------------------------------------------------

/// Counters over the life of a session, across resets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncoderStats {
    /// Frames that produced a successful encode call.
    pub frames_encoded: u64,
    /// Key-frame directives the backend accepted.
    pub key_frames_forced: u64,
    /// Total bytes of encoded output.
    pub bytes_written: u64,
    /// Completed destroy/init/start cycles.
    pub resets: u64,
}

// ---------------------------------------------------------------------------
// EncoderSession
// ---------------------------------------------------------------------------

/// A backend driver wrapped in the shared session state machine.
pub struct EncoderSession<D: SessionDriver> {
    core: SessionCore,
    driver: D,
    stats: EncoderStats,
}

impl<D: SessionDriver> std::fmt::Debug for EncoderSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderSession")
            .field("backend", &self.core.backend)
            .field("codec", &self.core.codec)
            .field("state", &self.core.state())
            .field("active", &self.core.active)
            .field("pending", &self.core.pending)
            .field("frames", &self.core.frames)
            .field("open", &self.driver.is_open())
            .finish()
    }
}

impl<D: SessionDriver> EncoderSession<D> {
    /// Wrap `driver`; nothing is acquired until [`VideoEncoder::init`].
    pub fn new(driver: D, params: EncodeParameters) -> Self {
        let core = SessionCore::new(driver.backend(), driver.codec(), driver.bounds(), params);
        info!(
            backend = %core.backend,
            codec = core.codec.display_name(),
            width = params.width,
            height = params.height,
            "Encoder session created"
        );
        Self {
            core,
            driver,
            stats: EncoderStats::default(),
        }
    }

    /// Drain `control` at the start of every encoded frame.
    pub fn with_control(mut self, control: ControlReceiver) -> Self {
        self.core.attach_control(control);
        self
    }

    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }

    pub fn pending_params(&self) -> Option<&EncodeParameters> {
        self.core.pending()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn check_input(&self, input: &[u8]) -> Result<(), EncodeError> {
        let expected = self.driver.min_input_len(&self.core.active);
        if input.len() < expected {
            error!(
                backend = %self.core.backend,
                expected,
                actual = input.len(),
                "Input frame is too small"
            );
            return Err(EncodeError::InputTooSmall {
                expected,
                actual: input.len(),
            });
        }
        Ok(())
    }
}

impl<D: SessionDriver> VideoEncoder for EncoderSession<D> {
    fn init(&mut self) -> Result<(), EncodeError> {
        if self.driver.is_open() {
            warn!(backend = %self.core.backend, "Encoder already initialized, releasing previous session");
            self.destroy();
        }
        let params = self.core.validate_target().map_err(|e| {
            error!(backend = %self.core.backend, error = %e, "Encode parameters not supported");
            EncodeError::Init(format!("unsupported encode parameters: {e}"))
        })?;
        self.driver.open(&params).map_err(|e| {
            error!(backend = %self.core.backend, error = %e, "Encoder init failed");
            match e {
                EncodeError::Init(_) => e,
                other => EncodeError::Init(other.to_string()),
            }
        })?;
        self.core.commit_init(params);
        info!(backend = %self.core.backend, %params, "Encoder initialized");
        Ok(())
    }

    fn start(&mut self) -> Result<(), EncodeError> {
        self.core.mark_started();
        info!(backend = %self.core.backend, "Encoder started");
        Ok(())
    }

    fn encode_frame(&mut self, input: &[u8]) -> Result<&[u8], EncodeError> {
        self.core.drain_control();
        // Staged parameters never bring up a session that was not initialized.
        if !self.core.is_initialized() {
            error!(backend = %self.core.backend, "Encode called before init");
            return Err(EncodeError::NotInitialized);
        }
        self.check_input(input)?;

        let frame = self.core.frames;
        if self.core.needs_reset() {
            info!(backend = %self.core.backend, frame, "Applying pending encode parameters");
            self.reset().map_err(|e| EncodeError::EncodeFailed {
                frame,
                reason: e.to_string(),
            })?;
            self.check_input(input)?;
        }

        if self.core.take_key_frame_request() {
            match self.driver.force_key_frame() {
                Ok(()) => self.stats.key_frames_forced += 1,
                Err(e) => warn!(backend = %self.core.backend, error = %e, "Key frame request not applied"),
            }
        }

        let backend = self.core.backend;
        let output = self.driver.encode(input, frame).map_err(|e| {
            error!(%backend, frame, error = %e, "Frame encode failed");
            match e {
                EncodeError::EncodeFailed { .. } => e,
                other => EncodeError::EncodeFailed {
                    frame,
                    reason: other.to_string(),
                },
            }
        })?;

        self.core.frames += 1;
        self.stats.frames_encoded += 1;
        self.stats.bytes_written += output.len() as u64;
        debug!(%backend, frame, bytes = output.len(), "Frame encoded");
        Ok(output)
    }

    fn stop(&mut self) -> Result<(), EncodeError> {
        self.core.mark_stopped();
        info!(backend = %self.core.backend, "Encoder stopped");
        Ok(())
    }

    fn destroy(&mut self) {
        if !self.driver.is_open() && !self.core.is_initialized() {
            debug!(backend = %self.core.backend, "Encoder already destroyed");
            return;
        }
        self.driver.close();
        self.core.mark_destroyed();
        info!(backend = %self.core.backend, frames = self.core.frames, "Encoder destroyed");
    }

    fn reset(&mut self) -> Result<(), EncodeError> {
        info!(backend = %self.core.backend, "Resetting encoder");
        self.destroy();
        self.init().map_err(|e| EncodeError::Reset(e.to_string()))?;
        self.start()?;
        self.stats.resets += 1;
        info!(backend = %self.core.backend, "Encoder reset");
        Ok(())
    }

    fn force_key_frame(&mut self) -> Result<(), EncodeError> {
        match self.driver.force_key_frame() {
            Ok(()) => {
                self.stats.key_frames_forced += 1;
                info!(backend = %self.core.backend, "Key frame forced");
                Ok(())
            }
            Err(e) => {
                warn!(backend = %self.core.backend, error = %e, "Force key frame failed");
                Err(e)
            }
        }
    }

    fn set_encode_params(&mut self, params: EncodeParameters) -> Result<(), EncodeError> {
        self.core.stage(params)?;
        Ok(())
    }

    fn state(&self) -> SessionState {
        self.core.state()
    }

    fn active_params(&self) -> &EncodeParameters {
        self.core.active()
    }

    fn backend(&self) -> Backend {
        self.core.backend
    }

    fn codec(&self) -> VideoCodec {
        self.core.codec
    }
}

impl<D: SessionDriver> Drop for EncoderSession<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use vmi_common::params::SOFTWARE_BOUNDS;
    use vmi_common::{control_channel, EncoderStatus, Profile};

    #[derive(Default)]
    struct Calls {
        opens: AtomicUsize,
        closes: AtomicUsize,
        encodes: AtomicUsize,
    }

    struct FakeDriver {
        calls: Arc<Calls>,
        open: bool,
        fail_open: bool,
        output: Vec<u8>,
    }

    impl FakeDriver {
        fn new(calls: &Arc<Calls>) -> Self {
            Self {
                calls: Arc::clone(calls),
                open: false,
                fail_open: false,
                output: vec![0, 0, 0, 1, 0x65],
            }
        }
    }

    impl SessionDriver for FakeDriver {
        fn backend(&self) -> Backend {
            Backend::Software
        }
        fn codec(&self) -> VideoCodec {
            VideoCodec::H264
        }
        fn bounds(&self) -> &'static ParamBounds {
            &SOFTWARE_BOUNDS
        }
        fn is_open(&self) -> bool {
            self.open
        }
        fn open(&mut self, _params: &EncodeParameters) -> Result<(), EncodeError> {
            self.calls.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(EncodeError::Init("device busy".into()));
            }
            self.open = true;
            Ok(())
        }
        fn close(&mut self) {
            if self.open {
                self.calls.closes.fetch_add(1, Ordering::SeqCst);
                self.open = false;
            }
        }
        fn encode(&mut self, _input: &[u8], _frame: u64) -> Result<&[u8], EncodeError> {
            self.calls.encodes.fetch_add(1, Ordering::SeqCst);
            Ok(&self.output)
        }
    }

    fn small_params() -> EncodeParameters {
        EncodeParameters {
            width: 64,
            height: 48,
            ..EncodeParameters::default()
        }
    }

    fn running(calls: &Arc<Calls>) -> EncoderSession<FakeDriver> {
        let mut session = EncoderSession::new(FakeDriver::new(calls), small_params());
        session.init().unwrap();
        session.start().unwrap();
        session
    }

    #[test]
    fn retry_succeeds_on_third_attempt() {
        let mut results = vec![0, 0, 512].into_iter();
        assert_eq!(submit_with_retry(|| results.next().unwrap()), Ok(512));
    }

    #[test]
    fn retry_gives_up_after_three_zero_results() {
        let mut calls = 0;
        let result = submit_with_retry(|| {
            calls += 1;
            0
        });
        assert_eq!(result, Err(SubmitError::NotReady { attempts: 3 }));
        assert_eq!(calls, 3);
    }

    #[test]
    fn negative_submit_is_not_retried() {
        let mut calls = 0;
        let result = submit_with_retry(|| {
            calls += 1;
            -5
        });
        assert_eq!(result, Err(SubmitError::Rejected(-5)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn lifecycle_states() {
        let calls = Arc::new(Calls::default());
        let mut session = EncoderSession::new(FakeDriver::new(&calls), small_params());
        assert_eq!(session.state(), SessionState::Uninitialized);
        session.init().unwrap();
        assert_eq!(session.state(), SessionState::Initialized);
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Initialized);
        session.destroy();
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn encode_before_init_fails() {
        let calls = Arc::new(Calls::default());
        let mut session = EncoderSession::new(FakeDriver::new(&calls), small_params());
        let input = vec![0u8; small_params().frame_size()];
        let err = session.encode_frame(&input).unwrap_err();
        assert!(matches!(err, EncodeError::NotInitialized));
        assert_eq!(err.status(), EncoderStatus::EncodeFail);
        assert_eq!(calls.encodes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn undersized_input_never_reaches_backend() {
        let calls = Arc::new(Calls::default());
        let mut session = running(&calls);
        let input = vec![0u8; small_params().frame_size() - 1];
        let err = session.encode_frame(&input).unwrap_err();
        assert_eq!(err.status(), EncoderStatus::EncodeFail);
        assert_eq!(calls.encodes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn encode_returns_backend_packet_and_counts() {
        let calls = Arc::new(Calls::default());
        let mut session = running(&calls);
        let input = vec![0u8; small_params().frame_size()];
        assert_eq!(session.encode_frame(&input).unwrap(), &[0, 0, 0, 1, 0x65]);
        assert_eq!(session.stats().frames_encoded, 1);
        assert_eq!(session.stats().bytes_written, 5);
    }

    #[test]
    fn rejected_params_keep_active() {
        let calls = Arc::new(Calls::default());
        let mut session = running(&calls);
        let before = *session.active_params();
        let bad = EncodeParameters {
            frame_rate: 45,
            ..before
        };
        let err = session.set_encode_params(bad).unwrap_err();
        assert_eq!(err.status(), EncoderStatus::SetEncodeParamsFail);
        assert_eq!(*session.active_params(), before);
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn same_params_twice_is_a_no_op() {
        let calls = Arc::new(Calls::default());
        let mut session = running(&calls);
        let same = *session.active_params();
        session.set_encode_params(same).unwrap();
        session.set_encode_params(same).unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(*session.active_params(), same);
    }

    #[test]
    fn pending_change_applies_on_next_frame() {
        let calls = Arc::new(Calls::default());
        let mut session = running(&calls);
        let next = EncodeParameters {
            bitrate: 3_000_000,
            gop_size: 60,
            profile: Profile::Main,
            ..small_params()
        };
        session.set_encode_params(next).unwrap();
        assert_eq!(session.state(), SessionState::ParamsPendingReset);
        assert_eq!(*session.active_params(), small_params());

        let input = vec![0u8; next.frame_size()];
        session.encode_frame(&input).unwrap();
        assert_eq!(*session.active_params(), next);
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(calls.opens.load(Ordering::SeqCst), 2);
        assert_eq!(calls.closes.load(Ordering::SeqCst), 1);
        assert_eq!(session.stats().resets, 1);
    }

    #[test]
    fn restaging_active_params_cancels_pending() {
        let calls = Arc::new(Calls::default());
        let mut session = running(&calls);
        let original = *session.active_params();
        session
            .set_encode_params(EncodeParameters {
                bitrate: 2_000_000,
                ..original
            })
            .unwrap();
        session.set_encode_params(original).unwrap();
        assert!(session.pending_params().is_none());
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn failed_reset_keeps_pending_and_reports_encode_fail() {
        let calls = Arc::new(Calls::default());
        let mut session = running(&calls);
        let next = EncodeParameters {
            bitrate: 2_000_000,
            ..small_params()
        };
        session.set_encode_params(next).unwrap();
        session.driver.fail_open = true;

        let input = vec![0u8; next.frame_size()];
        let err = session.encode_frame(&input).unwrap_err();
        assert_eq!(err.status(), EncoderStatus::EncodeFail);
        assert_eq!(session.pending_params(), Some(&next));
        assert_eq!(calls.encodes.load(Ordering::SeqCst), 0);

        // A failed reset is not retried implicitly.
        session.driver.fail_open = false;
        assert!(matches!(session.encode_frame(&input), Err(EncodeError::NotInitialized)));
        assert_eq!(calls.opens.load(Ordering::SeqCst), 2);

        session.init().unwrap();
        session.start().unwrap();
        session.encode_frame(&input).unwrap();
        assert_eq!(*session.active_params(), next);
    }

    #[test]
    fn staged_params_do_not_initialize_a_fresh_session() {
        let calls = Arc::new(Calls::default());
        let mut session = EncoderSession::new(FakeDriver::new(&calls), small_params());
        let next = EncodeParameters {
            bitrate: 2_000_000,
            ..small_params()
        };
        session.set_encode_params(next).unwrap();

        let input = vec![0u8; next.frame_size()];
        let err = session.encode_frame(&input).unwrap_err();
        assert!(matches!(err, EncodeError::NotInitialized));
        assert_eq!(err.status(), EncoderStatus::EncodeFail);
        assert_eq!(session.state(), SessionState::ParamsPendingReset);
        assert_eq!(session.pending_params(), Some(&next));
        assert_eq!(calls.opens.load(Ordering::SeqCst), 0);
        assert_eq!(session.stats().resets, 0);
    }

    #[test]
    fn destroy_is_idempotent() {
        let calls = Arc::new(Calls::default());
        let mut never = EncoderSession::new(FakeDriver::new(&calls), small_params());
        never.destroy();
        never.destroy();
        assert_eq!(calls.closes.load(Ordering::SeqCst), 0);

        let mut session = running(&calls);
        session.destroy();
        session.destroy();
        drop(session);
        assert_eq!(calls.opens.load(Ordering::SeqCst), 1);
        assert_eq!(calls.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn init_failure_leaves_session_uninitialized() {
        let calls = Arc::new(Calls::default());
        let mut driver = FakeDriver::new(&calls);
        driver.fail_open = true;
        let mut session = EncoderSession::new(driver, small_params());
        let err = session.init().unwrap_err();
        assert_eq!(err.status(), EncoderStatus::InitFail);
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn invalid_initial_params_fail_init_without_opening() {
        let calls = Arc::new(Calls::default());
        let bad = EncodeParameters {
            width: 8,
            ..small_params()
        };
        let mut session = EncoderSession::new(FakeDriver::new(&calls), bad);
        assert_eq!(session.init().unwrap_err().status(), EncoderStatus::InitFail);
        assert_eq!(calls.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsupported_key_frame_is_reported() {
        let calls = Arc::new(Calls::default());
        let mut session = running(&calls);
        let err = session.force_key_frame().unwrap_err();
        assert_eq!(err.status(), EncoderStatus::ForceKeyFrameUnsupported);
    }

    #[test]
    fn control_commands_drain_on_next_frame() {
        let calls = Arc::new(Calls::default());
        let (tx, rx) = control_channel();
        let mut session = EncoderSession::new(FakeDriver::new(&calls), small_params()).with_control(rx);
        session.init().unwrap();
        session.start().unwrap();

        let next = EncodeParameters {
            gop_size: 120,
            ..small_params()
        };
        tx.params_changed(next);
        tx.force_key_frame();
        tx.params_changed(EncodeParameters {
            frame_rate: 25,
            ..small_params()
        });
        assert_eq!(*session.active_params(), small_params());

        let input = vec![0u8; next.frame_size()];
        session.encode_frame(&input).unwrap();
        assert_eq!(*session.active_params(), next);
        assert_eq!(calls.opens.load(Ordering::SeqCst), 2);
    }
}
