//! CLI command implementations.

pub mod decode;
pub mod demo;
pub mod negotiate;

use thiserror::Error;

/// Input the commands refuse to work with.
#[derive(Debug, Error)]
pub enum CliError {
    /// Hex input with an odd length or a non-hex digit.
    #[error("invalid hex input: {0}")]
    InvalidHex(String),

    /// A demo step received something other than it expected.
    #[error("demo step `{step}` failed: {message}")]
    Demo {
        /// Step name.
        step: &'static str,
        /// What went wrong.
        message: String,
    },
}
