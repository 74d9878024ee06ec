use thiserror::Error;

/// Result type for security module operations.
pub type ModuleResult<T, E = ModuleError> = std::result::Result<T, E>;

/// Error outputs from the security module.
///
/// `NotInitialized`, `InvalidConfiguration`, `ResourceExhausted` and
/// `InvalidHandle` are caller misuse. `InvalidCertificate` and
/// `PrimitiveFailure` are recoverable: retry with another certificate or report
/// that the device could not authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Error, uniffi::Error)]
pub enum ModuleError {
    /// An operation was attempted before `init` or after `deinit`.
    #[error("not_initialized")]
    NotInitialized,
    /// The brand or module configuration is not recognized.
    #[error("invalid_configuration: {reason}")]
    InvalidConfiguration {
        /// What was wrong with the configuration.
        reason: String,
    },
    /// Every handle slot is in use or retired.
    #[error("resource_exhausted: all {capacity} context slots are in use")]
    ResourceExhausted {
        /// Size of the handle space.
        capacity: u32,
    },
    /// The handle is unknown, already released or from before a `deinit`.
    #[error("invalid_handle: {handle:#010x}")]
    InvalidHandle {
        /// The rejected handle value.
        handle: u32,
    },
    /// The certificate bytes are not structurally well-formed.
    #[error("invalid_certificate: {reason}")]
    InvalidCertificate {
        /// Why parsing failed.
        reason: String,
    },
    /// The cryptographic primitive reported an internal error.
    #[error("primitive_failure ({code}): {message}")]
    PrimitiveFailure {
        /// Primitive-specific error code.
        code: i32,
        /// Primitive-specific diagnostic message.
        message: String,
    },
}

impl ModuleError {
    /// Stable numeric code for hosts that surface native error codes.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::NotInitialized => 1,
            Self::InvalidConfiguration { .. } => 2,
            Self::ResourceExhausted { .. } => 3,
            Self::InvalidHandle { .. } => 4,
            Self::InvalidCertificate { .. } => 5,
            Self::PrimitiveFailure { .. } => 6,
        }
    }

    /// Whether the error stems from a wrong call order or bad arguments
    /// rather than from the certificate or the primitive.
    #[must_use]
    pub const fn is_caller_misuse(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized
                | Self::InvalidConfiguration { .. }
                | Self::ResourceExhausted { .. }
                | Self::InvalidHandle { .. }
        )
    }

    pub(crate) fn invalid_certificate(reason: impl Into<String>) -> Self {
        Self::InvalidCertificate {
            reason: reason.into(),
        }
    }
}

/// Failure reported by a [`SigningPrimitive`](crate::SigningPrimitive).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("primitive error {code}: {message}")]
pub struct PrimitiveError {
    /// Primitive-specific error code.
    pub code: i32,
    /// Diagnostic message.
    pub message: String,
}

impl PrimitiveError {
    /// Creates a new primitive error.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<PrimitiveError> for ModuleError {
    fn from(error: PrimitiveError) -> Self {
        Self::PrimitiveFailure {
            code: error.code,
            message: error.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            ModuleError::NotInitialized,
            ModuleError::InvalidConfiguration {
                reason: String::new(),
            },
            ModuleError::ResourceExhausted { capacity: 1 },
            ModuleError::InvalidHandle { handle: 7 },
            ModuleError::invalid_certificate("empty"),
            ModuleError::PrimitiveFailure {
                code: 9,
                message: String::new(),
            },
        ];
        let codes: Vec<i32> = errors.iter().map(ModuleError::code).collect();
        let distinct: HashSet<i32> = codes.iter().copied().collect();
        assert_eq!(distinct.len(), errors.len());
        assert!(codes.iter().all(|code| (1..=6).contains(code)), "{codes:?}");
        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_primitive_error_carries_code_and_message() {
        let error = ModuleError::from(PrimitiveError::new(42, "engine offline"));
        assert_eq!(
            error,
            ModuleError::PrimitiveFailure {
                code: 42,
                message: "engine offline".to_string(),
            }
        );
        assert!(!error.is_caller_misuse());
        assert_eq!(error.to_string(), "primitive_failure (42): engine offline");
    }

    #[test]
    fn test_handle_is_rendered_in_hex() {
        let error = ModuleError::InvalidHandle { handle: 0x0001_0002 };
        assert_eq!(error.to_string(), "invalid_handle: 0x00010002");
        assert!(error.is_caller_misuse());
    }
}
