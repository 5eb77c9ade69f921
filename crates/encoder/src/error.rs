//! Encoder-specific error types.
//!
//! These errors cover the encoder crate's internal operations beyond the
//! common `EncodeError` defined in `vmi-common`. Sessions fold them into an
//! `EncodeError` at the operation boundary.

use thiserror::Error;

/// Errors that can occur when loading a backend library.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("library {library} not found: {reason}")]
    LibraryNotFound { library: String, reason: String },

    #[error("required symbol {symbol} not found in {library}: {reason}")]
    SymbolNotFound {
        library: String,
        symbol: String,
        reason: String,
    },

    #[error("symbol {symbol} in {library} resolved to null")]
    NullSymbol { library: String, symbol: String },

    #[error("symbol {0} was not requested when the binding was loaded")]
    NotRequested(String),
}

/// Errors from hardware device selection.
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no transcoder device nodes under {0}")]
    NoDevices(String),

    #[error("cannot read telemetry {path}: {reason}")]
    Telemetry { path: String, reason: String },

    #[error("malformed telemetry in {path}: {line:?}")]
    MalformedTelemetry { path: String, line: String },

    #[error("no eligible device among {count} candidates")]
    NoEligibleDevice { count: usize },
}

/// Errors from moving a frame into a backend layout.
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("input holds {actual} bytes, frame needs {expected}")]
    InputTooSmall { expected: usize, actual: usize },

    #[error("destination plane {plane} holds {actual} bytes, layout needs {expected}")]
    PlaneTooSmall {
        plane: usize,
        expected: usize,
        actual: usize,
    },

    #[error("native frame allocation failed: {0}")]
    AllocFailed(String),
}

/// Outcome of a bounded frame submission.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("backend accepted nothing after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("backend rejected the frame with code {0}")]
    Rejected(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_error_display() {
        let err = BindingError::LibraryNotFound {
            library: "libxcoder.so".to_string(),
            reason: "cannot open shared object file".to_string(),
        };
        assert!(err.to_string().contains("libxcoder.so"));
    }

    #[test]
    fn null_symbol_names_symbol() {
        let err = BindingError::NullSymbol {
            library: "libvpi.so".to_string(),
            symbol: "vpi_create".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("vpi_create"));
        assert!(msg.contains("libvpi.so"));
    }

    #[test]
    fn select_error_display() {
        let err = SelectError::NoEligibleDevice { count: 3 };
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn submit_error_display() {
        assert!(SubmitError::NotReady { attempts: 3 }.to_string().contains('3'));
        assert!(SubmitError::Rejected(-22).to_string().contains("-22"));
    }

    #[test]
    fn marshal_error_display() {
        let err = MarshalError::InputTooSmall {
            expected: 33750,
            actual: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("33750"));
        assert!(msg.contains("100"));
    }
}
