//! Unified error type for stagerun.
//!
//! Every crate funnels its failures into [`Error`]. The binary maps each
//! variant onto a sysexits-style process status via [`Error::exit_code`].

use std::time::Duration;

/// Unified error type covering all failure modes of a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required configuration or credentials are missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A declared local input failed validation (usually: it does not exist).
    #[error("Validation error: {0}")]
    Validation(String),

    /// An external asset could not be provisioned.
    #[error("Provision error [{asset}] after {attempts} attempt(s): {message}")]
    Provision {
        /// Name of the asset being fetched.
        asset: String,
        /// Number of fetch attempts made before giving up.
        attempts: u32,
        /// Description of the last failure.
        message: String,
        /// Whether the last failure was classified as transient.
        transient: bool,
    },

    /// A pipeline step failed.
    #[error("Step error [{step}]: {message}")]
    Step {
        /// Name of the step that failed.
        step: String,
        /// Human-readable error description.
        message: String,
    },

    /// An upload or download did not complete.
    #[error("Transfer error [{path}]: {message}")]
    Transfer {
        /// Local or remote path involved in the transfer.
        path: String,
        /// Human-readable error description.
        message: String,
    },

    /// The remote job did not finish within its timeout.
    #[error("Remote job {job} timed out after {after:?}")]
    RemoteTimeout {
        /// Identifier of the job that timed out.
        job: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The remote backend reported a failure or could not be reached.
    #[error("Remote error: {0}")]
    Remote(String),

    /// An external tool (git, python, ...) could not be run.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to a process exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Configuration(_) => 78,
            Error::Validation(_) => 66,
            Error::Provision { .. } => 69,
            Error::Step { .. } => 70,
            Error::Tool { .. } => 72,
            Error::Transfer { .. } => 73,
            Error::Io { .. } => 74,
            Error::RemoteTimeout { .. } => 75,
            Error::Remote(_) => 76,
            Error::Internal(_) => 1,
        }
    }

    /// Convenience constructor for [`Error::Step`].
    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Step {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Transfer`].
    pub fn transfer(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transfer {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_display() {
        let err = Error::step("patch-extractor", "file not found");
        assert_eq!(
            err.to_string(),
            "Step error [patch-extractor]: file not found"
        );
        assert_eq!(err.exit_code(), 70);
    }

    #[test]
    fn provision_display() {
        let err = Error::Provision {
            asset: "hubert".into(),
            attempts: 5,
            message: "HTTP 503".into(),
            transient: true,
        };
        assert_eq!(
            err.to_string(),
            "Provision error [hubert] after 5 attempt(s): HTTP 503"
        );
        assert_eq!(err.exit_code(), 69);
    }

    #[test]
    fn timeout_is_distinct_from_remote_failure() {
        let timeout = Error::RemoteTimeout {
            job: "job-1".into(),
            after: Duration::from_secs(900),
        };
        let failure = Error::Remote("exit status 1".into());
        assert_ne!(timeout.exit_code(), failure.exit_code());
        assert!(timeout.to_string().contains("timed out"));
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.exit_code(), 74);
    }

    #[test]
    fn configuration_exit_code() {
        let err = Error::Configuration("STAGERUN_API_KEY is not set".into());
        assert_eq!(err.exit_code(), 78);
        assert_eq!(
            err.to_string(),
            "Configuration error: STAGERUN_API_KEY is not set"
        );
    }
}
