//! # Bridge Error Handling
//!
//! Error types for the OPC UA process-image bridge, covering manifest
//! ingestion, address resolution, client writes and stack interaction.
//!
//! ## Error Categories
//!
//! ### Per-record errors
//! - **Invalid Location**: a location token does not match the
//!   `%<area><width><index>[.<bit>]` shape
//! - **Malformed Manifest**: a manifest line carries the located-variable
//!   marker but cannot be decomposed into its fields
//! - **Unavailable**: the compiler did not allocate the addressed slot
//! - **Unsupported**: the area/width combination is outside the supported
//!   matrix
//!
//! These never abort startup: the offending record is skipped and the
//! bridge starts with whatever subset of the manifest resolves.
//!
//! ### Client-visible errors
//! - **Type Mismatch**: a client write carried a value whose type does not
//!   exactly match the binding type; the write is rejected and no state
//!   changes
//!
//! ### Lifecycle errors
//! - **Stack / Namespace / Configuration / I/O**: failures while creating
//!   or configuring the server instance. Fatal to `start()`; the instance
//!   is destroyed and the lifecycle returns to idle.
//!
//! ## Classification
//!
//! ```rust
//! use openplc_opcua::BridgeError;
//!
//! fn triage(error: &BridgeError) {
//!     if error.is_record_skip() {
//!         println!("record skipped: {}", error);
//!     } else if error.is_fatal() {
//!         println!("startup aborted: {}", error);
//!     }
//! }
//! ```

use thiserror::Error;

use crate::scalar::ScalarType;
use crate::stack::StatusCode;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised by the bridge
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Malformed location token
    ///
    /// The token did not match `%<area><width><index>[.<bit>]`, the bit
    /// index was outside `[0,8)`, or a dot was present/absent where the
    /// width forbids/requires one.
    #[error("invalid location token: {token}")]
    InvalidLocation { token: String },

    /// Manifest line carried the marker but could not be decomposed
    #[error("malformed manifest record: {line}")]
    MalformedManifest { line: String },

    /// The compiler did not allocate a slot at this address
    #[error("no slot allocated at {location}")]
    Unavailable { location: String },

    /// Area/width combination outside the supported matrix
    #[error("unsupported area/width combination: {location}")]
    Unsupported { location: String },

    /// Client write type does not exactly match the binding type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: ScalarType,
        actual: ScalarType,
    },

    /// The stack returned a status other than Good (or NodeIdExists where
    /// that is tolerated)
    #[error("stack failure during {operation}: {status}")]
    Stack {
        operation: String,
        status: StatusCode,
    },

    /// Namespace registration returned index 0
    #[error("namespace registration for {uri} returned index 0")]
    Namespace { uri: String },

    /// Bridge configuration problem
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// I/O failure, typically while reading the manifest file
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Internal error, should not occur in normal operation
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    pub fn invalid_location<S: Into<String>>(token: S) -> Self {
        Self::InvalidLocation {
            token: token.into(),
        }
    }

    pub fn malformed_manifest<S: Into<String>>(line: S) -> Self {
        Self::MalformedManifest { line: line.into() }
    }

    pub fn unavailable<S: ToString>(location: &S) -> Self {
        Self::Unavailable {
            location: location.to_string(),
        }
    }

    pub fn unsupported<S: ToString>(location: &S) -> Self {
        Self::Unsupported {
            location: location.to_string(),
        }
    }

    pub fn type_mismatch(expected: ScalarType, actual: ScalarType) -> Self {
        Self::TypeMismatch { expected, actual }
    }

    pub fn stack<S: Into<String>>(operation: S, status: StatusCode) -> Self {
        Self::Stack {
            operation: operation.into(),
            status,
        }
    }

    pub fn namespace<S: Into<String>>(uri: S) -> Self {
        Self::Namespace { uri: uri.into() }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for per-record manifest errors that skip the record but never
    /// abort startup
    pub fn is_record_skip(&self) -> bool {
        matches!(
            self,
            Self::InvalidLocation { .. }
                | Self::MalformedManifest { .. }
                | Self::Unavailable { .. }
                | Self::Unsupported { .. }
        )
    }

    /// True for errors that are fatal to `start()` and return the
    /// lifecycle to idle with the instance destroyed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Stack { .. }
                | Self::Namespace { .. }
                | Self::Configuration { .. }
                | Self::Io { .. }
                | Self::Internal { .. }
        )
    }
}

/// Convert from std::io::Error, preserving the original message
impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = BridgeError::invalid_location("%ZX0.0");
        assert!(err.is_record_skip());
        assert!(!err.is_fatal());

        let err = BridgeError::stack("startup", StatusCode::BadInternalError);
        assert!(err.is_fatal());
        assert!(!err.is_record_skip());

        let err = BridgeError::type_mismatch(ScalarType::UInt16, ScalarType::UInt32);
        assert!(!err.is_record_skip());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = BridgeError::type_mismatch(ScalarType::UInt16, ScalarType::UInt32);
        let msg = format!("{}", err);
        assert!(msg.contains("UInt16"));
        assert!(msg.contains("UInt32"));

        let err = BridgeError::namespace("http://openplc.org/");
        assert!(format!("{}", err).contains("index 0"));
    }
}
