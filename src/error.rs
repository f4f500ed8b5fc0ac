//! Typed errors for command-line validation.
//!
//! Everything past option parsing reports through `anyhow`; these variants
//! exist so the parser's rejections can be matched on.

use thiserror::Error;

/// Rejections produced while turning raw arguments into a `BuildConfig`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    #[error("Device identifier is required (usage: akbuild <device> [options])")]
    MissingDevice,

    #[error("Invalid device identifier '{0}': must not be empty or contain '/' or whitespace")]
    InvalidDevice(String),

    #[error("Option {0} requires a value")]
    MissingValue(String),

    #[error("Invalid value '{value}' for {flag} (expected one of: {expected})")]
    InvalidValue {
        flag: String,
        value: String,
        expected: String,
    },

    #[error("{variant} does not support SuSFS; choose rksu, sukisu or sukisu-ultra")]
    IncompatibleVariant { variant: String },

    #[error("{0}")]
    Usage(String),
}
