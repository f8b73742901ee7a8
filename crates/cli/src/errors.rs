//! CLI error types rendered through miette

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Invalid argument {argument}: {reason}")]
    #[diagnostic(
        code(netkit::cli::invalid_argument),
        help("Run 'netkit fetch --help' to see available options")
    )]
    InvalidArgument { argument: String, reason: String },

    #[error("Request to {url} failed{}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    #[diagnostic(code(netkit::cli::request_failed))]
    RequestFailed {
        url: String,
        status: Option<u16>,
        #[help]
        reason: Option<String>,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Setup(#[from] netkit_core::Error),

    #[error("Failed to write output")]
    #[diagnostic(
        code(netkit::cli::output),
        help("Check that stdout is still open")
    )]
    Output {
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn invalid_argument(argument: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument: argument.into(),
            reason: reason.into(),
        }
    }

    pub fn request_failed(
        url: impl Into<String>,
        status: Option<u16>,
        reason: Option<String>,
    ) -> Self {
        Self::RequestFailed {
            url: url.into(),
            status,
            reason,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(source: std::io::Error) -> Self {
        Self::Output { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        let err = CliError::invalid_argument("--header", "missing ':'");
        assert_eq!(
            err.code().map(|c| c.to_string()),
            Some("netkit::cli::invalid_argument".to_string())
        );
        assert_eq!(err.to_string(), "Invalid argument --header: missing ':'");

        let err = CliError::request_failed("https://x", Some(500), Some("bad".into()));
        assert_eq!(
            err.code().map(|c| c.to_string()),
            Some("netkit::cli::request_failed".to_string())
        );
        assert_eq!(err.help().map(|h| h.to_string()), Some("bad".to_string()));
        assert_eq!(err.to_string(), "Request to https://x failed with status 500");
    }

    #[test]
    fn test_io_conversion() {
        let err: CliError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed").into();
        assert!(matches!(err, CliError::Output { .. }));
    }
}
