//! Process exit statuses of the `tpm2-policysecret` binary.
//!
//! The values follow the `tpm2-tools` convention so scripts written against
//! those tools keep working.

use crate::error::{Error, ErrorKind};

/// Exit code constants.
pub mod codes {
    /// Success exit code.
    pub const SUCCESS: u8 = 0;

    /// Any failure after the options were accepted.
    pub const GENERAL_ERROR: u8 = 1;

    /// Invalid or missing command line options.
    ///
    /// Returned before any TPM resource is acquired.
    pub const OPTION_ERROR: u8 = 2;
}

/// Maps a run error to the status the process exits with.
///
/// | Error kind | Exit code |
/// |------------|-----------|
/// | `Configuration` | 2 (OPTION_ERROR) |
/// | `Resource` | 1 (GENERAL_ERROR) |
/// | `Persistence` | 1 (GENERAL_ERROR) |
pub fn exit_code_for(error: &Error) -> u8 {
    match error.kind() {
        ErrorKind::Configuration => codes::OPTION_ERROR,
        ErrorKind::Resource | ErrorKind::Persistence => codes::GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::error::{ConfigError, ResourceError};

    #[test]
    fn test_option_errors() {
        let err = Error::from(ConfigError::MissingSession);
        assert_eq!(exit_code_for(&err), codes::OPTION_ERROR);
        let err = Error::from(ConfigError::InvalidExpiration("x".into()));
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn test_general_errors() {
        let err = Error::SessionRestore {
            path: PathBuf::from("session.ctx"),
            source: ResourceError::Invalid("gone".into()),
        };
        assert_eq!(exit_code_for(&err), codes::GENERAL_ERROR);
        let err = Error::PolicySessionClose(ResourceError::Invalid("busy".into()));
        assert_eq!(exit_code_for(&err), 1);
    }
}
