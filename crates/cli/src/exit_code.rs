//! Process exit codes

use s3migrate_core::Error;

/// Exit codes returned by the s3migrate binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Every listed object was copied or already present
    Success = 0,
    /// The run finished but some keys failed, or an unclassified error
    GeneralError = 1,
    /// Bad arguments or configuration
    UsageError = 2,
    NetworkError = 3,
    AuthError = 4,
    /// A bucket or service binding does not exist
    NotFound = 5,
    /// Aborted by Ctrl-C
    Interrupted = 130,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Pick the exit code for a fatal error
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Config(_) => ExitCode::UsageError,
            Error::Auth(_) => ExitCode::AuthError,
            Error::NotFound(_) => ExitCode::NotFound,
            Error::Network(_) | Error::Throttled(_) | Error::Timeout(_) => {
                ExitCode::NetworkError
            }
            Error::Interrupted(_) => ExitCode::Interrupted,
            Error::Io(_) | Error::Service(_) | Error::Clear { .. } | Error::General(_) => {
                ExitCode::GeneralError
            }
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_i32() as u8)
    }
}
