//! Structured error handling for cwm-incremental
//!
//! Provides a unified error type with:
//! - Error codes for programmatic handling
//! - Structured error output (JSON-friendly)
//! - Context preservation through error chains
//!
//! # Error Categories
//!
//! - Maintenance errors (1xxx) - the materialization and the rules disagree,
//!   or a work structure could not grow. These abort the update.
//! - Program errors (2xxx) - the rule set cannot be maintained in the
//!   requested mode (bad levels, negation without levels, unsafe rules).
//! - Input errors (5xxx) - malformed scenario files and unknown resources.
//! - Config errors (7xxx) - configuration file problems.
//!
//! A logical inconsistency (two distinct literals made equal) is not an error:
//! it is recorded as an `owl:Nothing` fact. Cooperative cancellation is not an
//! error either; it is reported through the maintenance statistics.
//!
//! # Example
//!
//! ```rust,ignore
//! use cwm_incremental::error::{CwmError, ErrorCode};
//!
//! fn lookup(index: Option<u64>) -> Result<u64, CwmError> {
//!     index.ok_or_else(|| {
//!         CwmError::invariant_violation("rules do not seem to match the current data")
//!             .with_context("tuple", "[4, 1, 7]")
//!     })
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Error Codes
// ============================================================================

/// Unique error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Maintenance errors (1xxx)
    /// A fact that must be present in the triple table is missing
    InvariantViolation = 1000,
    /// A queue or flag store could not grow
    ResourceExhausted = 1001,

    // Program errors (2xxx)
    /// The supplied component levels are not a stratification
    InvalidStratification = 2000,
    /// Negation was used without stratification levels
    UnstratifiableNegation = 2001,
    /// The strategy does not support the requested reasoning mode
    UnsupportedMode = 2002,
    /// A head or negated variable is not bound by a positive body atom
    UnsafeRule = 2003,

    // Input errors (5xxx)
    /// Generic validation error
    ValidationError = 5000,
    /// Invalid format
    InvalidFormat = 5001,

    // Config errors (7xxx)
    /// Generic config error
    ConfigError = 7000,
    /// Config file not found
    ConfigNotFound = 7001,
    /// Invalid config syntax
    InvalidConfigSyntax = 7002,
    /// Unknown profile
    UnknownProfile = 7003,

    // Internal errors (9xxx)
    /// Internal error
    InternalError = 9000,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn code(&self) -> u32 {
        *self as u32
    }

    /// Get a short description of the error code
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::InvariantViolation => "Invariant violation",
            ErrorCode::ResourceExhausted => "Resource exhausted",

            ErrorCode::InvalidStratification => "Invalid stratification",
            ErrorCode::UnstratifiableNegation => "Unstratifiable negation",
            ErrorCode::UnsupportedMode => "Unsupported reasoning mode",
            ErrorCode::UnsafeRule => "Unsafe rule",

            ErrorCode::ValidationError => "Validation error",
            ErrorCode::InvalidFormat => "Invalid format",

            ErrorCode::ConfigError => "Configuration error",
            ErrorCode::ConfigNotFound => "Configuration file not found",
            ErrorCode::InvalidConfigSyntax => "Invalid configuration syntax",
            ErrorCode::UnknownProfile => "Unknown profile",

            ErrorCode::InternalError => "Internal error",
        }
    }

    /// Whether an error with this code leaves the materialization unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvariantViolation | ErrorCode::ResourceExhausted | ErrorCode::InternalError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

// ============================================================================
// Error Context
// ============================================================================

/// Additional context information for an error
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Key-value pairs of context information
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, String>,
    /// Source location (file:line)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Stack of error causes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ErrorContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field to the context
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Add source location
    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Add a cause to the error chain
    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }
}

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for cwm-incremental
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CwmError {
    /// Error code for programmatic handling
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Additional context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,
    /// Hint for resolving the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl CwmError {
    /// Create a new error with a code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
            hint: None,
        }
    }

    // ========================================================================
    // Factory methods for common error types
    // ========================================================================

    /// A fact the rules refer to cannot be found in the triple table
    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvariantViolation, message)
    }

    /// A work structure could not allocate `requested` more slots
    pub fn resource_exhausted(what: &str, requested: usize) -> Self {
        Self::new(
            ErrorCode::ResourceExhausted,
            format!("{} could not grow by {} entries", what, requested),
        )
    }

    /// Create an invalid stratification error
    pub fn invalid_stratification(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidStratification, message)
    }

    /// Create an unstratifiable negation error
    pub fn unstratifiable_negation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnstratifiableNegation, message)
            .with_hint("enable by_levels and give every rule a component level")
    }

    /// Create an unsupported mode error
    pub fn unsupported_mode(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedMode, message)
    }

    /// Create an unsafe rule error
    pub fn unsafe_rule(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsafeRule, message)
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    // ========================================================================
    // Builder methods
    // ========================================================================

    /// Set the error code
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    /// Add context to the error
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let ctx = self.context.get_or_insert_with(ErrorContext::new);
        ctx.fields.insert(key.into(), value.into());
        self
    }

    /// Add a cause to the error chain
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        let ctx = self.context.get_or_insert_with(ErrorContext::new);
        ctx.causes.push(cause.into());
        self
    }

    /// Add source location
    pub fn at(mut self, location: impl Into<String>) -> Self {
        let ctx = self.context.get_or_insert_with(ErrorContext::new);
        ctx.location = Some(location.into());
        self
    }

    /// Add a hint for resolving the error
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Whether the update that raised this error must be abandoned
    pub fn is_fatal(&self) -> bool {
        self.code.is_fatal()
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":"INTERNAL_ERROR","message":"{}"}}"#, self.message)
        })
    }
}

impl fmt::Display for CwmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)?;

        if let Some(ref ctx) = self.context {
            if let Some(ref loc) = ctx.location {
                write!(f, " at {}", loc)?;
            }
            if !ctx.causes.is_empty() {
                write!(f, "\nCaused by:")?;
                for cause in &ctx.causes {
                    write!(f, "\n  - {}", cause)?;
                }
            }
        }

        if let Some(ref hint) = self.hint {
            write!(f, "\nHint: {}", hint)?;
        }

        Ok(())
    }
}

impl std::error::Error for CwmError {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<std::io::Error> for CwmError {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::ConfigNotFound,
            _ => ErrorCode::InternalError,
        };
        CwmError::new(code, err.to_string())
    }
}

impl From<serde_json::Error> for CwmError {
    fn from(err: serde_json::Error) -> Self {
        CwmError::new(ErrorCode::InvalidFormat, err.to_string()).with_context("format", "JSON")
    }
}

impl From<toml::de::Error> for CwmError {
    fn from(err: toml::de::Error) -> Self {
        CwmError::config(err.to_string()).with_code(ErrorCode::InvalidConfigSyntax)
    }
}

impl From<std::collections::TryReserveError> for CwmError {
    fn from(err: std::collections::TryReserveError) -> Self {
        CwmError::new(ErrorCode::ResourceExhausted, err.to_string())
    }
}

// ============================================================================
// Result type alias
// ============================================================================

/// A Result type using CwmError
pub type CwmResult<T> = Result<T, CwmError>;

// ============================================================================
// Macros for convenient error creation
// ============================================================================

/// Create a CwmError with context from the current location
#[macro_export]
macro_rules! cwm_error {
    ($code:expr, $msg:expr) => {
        $crate::error::CwmError::new($code, $msg)
            .at(format!("{}:{}", file!(), line!()))
    };
    ($code:expr, $fmt:expr, $($arg:tt)*) => {
        $crate::error::CwmError::new($code, format!($fmt, $($arg)*))
            .at(format!("{}:{}", file!(), line!()))
    };
}

/// Bail out early with an error
#[macro_export]
macro_rules! cwm_bail {
    ($code:expr, $msg:expr) => {
        return Err($crate::cwm_error!($code, $msg))
    };
    ($code:expr, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::cwm_error!($code, $fmt, $($arg)*))
    };
}

/// Ensure a condition holds, or return an error
#[macro_export]
macro_rules! cwm_ensure {
    ($cond:expr, $code:expr, $msg:expr) => {
        if !$cond {
            $crate::cwm_bail!($code, $msg);
        }
    };
    ($cond:expr, $code:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::cwm_bail!($code, $fmt, $($arg)*);
        }
    };
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CwmError::invariant_violation("missing tuple");
        assert_eq!(err.code, ErrorCode::InvariantViolation);
        assert_eq!(err.message, "missing tuple");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_with_context() {
        let err = CwmError::invalid_stratification("bad level")
            .with_context("rule", "3")
            .with_context("level", "0");

        let ctx = err.context.as_ref().unwrap();
        assert_eq!(ctx.fields.get("rule"), Some(&"3".to_string()));
        assert_eq!(ctx.fields.get("level"), Some(&"0".to_string()));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = CwmError::unsupported_mode("DRed does not maintain equality")
            .with_cause("equality mode is no-una")
            .with_hint("use the fbf strategy");

        let display = err.to_string();
        assert!(display.starts_with("[2002] DRed does not maintain equality"));
        assert!(display.contains("Caused by:\n  - equality mode is no-una"));
        assert!(display.contains("Hint: use the fbf strategy"));
    }

    #[test]
    fn test_error_json() {
        let err = CwmError::resource_exhausted("delete list", 1024);
        let json = err.to_json();
        assert!(json.contains("\"code\":\"RESOURCE_EXHAUSTED\""));
        assert!(json.contains("could not grow by 1024 entries"));
    }

    #[test]
    fn test_macros() {
        fn check(value: u32) -> CwmResult<u32> {
            cwm_ensure!(value > 0, ErrorCode::ValidationError, "value {} must be positive", value);
            Ok(value)
        }

        assert_eq!(check(3).unwrap(), 3);
        let err = check(0).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(err.context.unwrap().location.unwrap().contains("error.rs"));
    }

    #[test]
    fn test_negation_hint() {
        let err = CwmError::unstratifiable_negation("rule 2 has a negated atom");
        assert!(err.hint.unwrap().contains("by_levels"));
    }
}
