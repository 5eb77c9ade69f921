//! Typed control channel from the configuration side to an encoder session.
//!
//! A producer (UI, config watcher, RPC handler) holds a [`ControlSender`]; the
//! session owns the matching [`ControlReceiver`] and drains it once at the
//! start of every encoded frame. Each command is delivered exactly once.

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::types::EncodeParameters;

/// A request for a running session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncoderCommand {
    /// New parameters to stage, as if passed to `set_encode_params`.
    ParamsChanged(EncodeParameters),
    /// Code the next frame as a key frame.
    ForceKeyFrame,
}

/// Sending half. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ControlSender {
    tx: Sender<EncoderCommand>,
}

/// Receiving half, owned by one session.
#[derive(Debug)]
pub struct ControlReceiver {
    rx: Receiver<EncoderCommand>,
}

/// Create a connected sender/receiver pair.
pub fn control_channel() -> (ControlSender, ControlReceiver) {
    let (tx, rx) = channel::unbounded();
    (ControlSender { tx }, ControlReceiver { rx })
}

impl ControlSender {
    /// Queue a command. Returns `false` if the session is gone.
    pub fn send(&self, command: EncoderCommand) -> bool {
        match self.tx.send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!(command = ?e.into_inner(), "Encoder session dropped its control receiver");
                false
            }
        }
    }

    /// Stage `params` on the session at its next frame.
    pub fn params_changed(&self, params: EncodeParameters) -> bool {
        self.send(EncoderCommand::ParamsChanged(params))
    }

    /// Request a key frame for the next encoded frame.
    pub fn force_key_frame(&self) -> bool {
        self.send(EncoderCommand::ForceKeyFrame)
    }
}

impl ControlReceiver {
    /// Take every command queued so far without blocking.
    pub fn drain(&self) -> Vec<EncoderCommand> {
        let mut commands = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(cmd) => commands.push(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("All control senders dropped");
                    break;
                }
            }
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_delivers_in_order_once() {
        let (tx, rx) = control_channel();
        let params = EncodeParameters {
            bitrate: 3_000_000,
            ..EncodeParameters::default()
        };
        assert!(tx.force_key_frame());
        assert!(tx.params_changed(params));

        let drained = rx.drain();
        assert_eq!(
            drained,
            vec![
                EncoderCommand::ForceKeyFrame,
                EncoderCommand::ParamsChanged(params)
            ]
        );
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn send_after_receiver_dropped_reports_false() {
        let (tx, rx) = control_channel();
        drop(rx);
        assert!(!tx.force_key_frame());
    }

    #[test]
    fn senders_clone_across_threads() {
        let (tx, rx) = control_channel();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tx = tx.clone();
                std::thread::spawn(move || {
                    tx.force_key_frame();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(rx.drain().len(), 4);
    }
}
