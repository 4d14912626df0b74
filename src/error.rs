//! Error types for the policysecret tool

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::tpm_types::TPM_RC;

/// Errors raised by the TPM device and by wire (un)marshalling
#[derive(Debug, Error)]
pub enum TpmError {
    /// Buffer underflow occurred during deserialization
    #[error("Buffer underflow during deserialization")]
    BufferUnderflow,

    /// Buffer overflow occurred during serialization
    #[error("Buffer overflow during serialization")]
    BufferOverflow,

    /// Sized buffer longer than its type allows
    #[error("Invalid array size: {0}")]
    InvalidArraySize(String),

    /// Incorrect tag value
    #[error("Incorrect tag: expected 0x{expected:X}, got 0x{actual:X}")]
    IncorrectTag { expected: u32, actual: u32 },

    /// Unknown enumeration value on the wire
    #[error("Invalid enum value 0x{0:X}")]
    InvalidEnumValue(u32),

    /// The TPM rejected a command
    #[error("{command} failed: {rc}")]
    CommandFailed { command: &'static str, rc: TPM_RC },
}

/// Errors raised while loading or saving artifacts
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not read \"{}\": {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("could not read from stdin: {0}")]
    Stdin(#[source] io::Error),

    #[error("could not write \"{}\": {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("{origin} holds {size} bytes, more than the {max} byte limit")]
    TooLarge {
        origin: String,
        size: usize,
        max: usize,
    },

    #[error("malformed {what} in \"{}\": {source}", path.display())]
    Malformed {
        what: &'static str,
        path: PathBuf,
        source: TpmError,
    },
}

/// Problems with the caller's input, detected before any TPM resource is
/// acquired
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Must specify -S session file.")]
    MissingSession,

    #[error("Must specify -c handle-id/ context file path.")]
    MissingObjectContext,

    #[error("Failed reading expiration duration from value, got:\"{0}\"")]
    InvalidExpiration(String),

    #[error("nonce is {size} bytes, at most {max} are allowed")]
    NonceTooLarge { size: usize, max: usize },

    #[error("could not load nonce: {0}")]
    Nonce(#[source] StoreError),

    #[error("invalid auth value \"{0}\"")]
    InvalidAuth(String),

    #[error("auth form \"{0}\" is not supported by this tool")]
    UnsupportedAuth(String),
}

/// Failure of one of the collaborators (device, store, resolver)
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error(transparent)]
    Tpm(#[from] TpmError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Invalid(String),
}

/// Broad classification used for exit statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Resource,
    Persistence,
}

/// Run-level error; each variant names the step that failed
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not restore policy session from \"{}\": {source}", path.display())]
    SessionRestore {
        path: PathBuf,
        source: ResourceError,
    },

    #[error("could not load auth entity \"{context}\": {source}")]
    EntityResolution {
        context: String,
        source: ResourceError,
    },

    #[error("could not load qualifier data: {0}")]
    Qualifier(#[source] StoreError),

    #[error("Could not build policysecret: {0}")]
    Assertion(#[source] ResourceError),

    #[error("could not close auth entity session: {0}")]
    EntitySessionClose(#[source] ResourceError),

    #[error("could not flush auth entity: {0}")]
    EntityFlush(#[source] ResourceError),

    #[error("could not finalize policy digest: {0}")]
    Finalize(#[source] ResourceError),

    #[error("could not close policy session: {0}")]
    PolicySessionClose(#[source] ResourceError),

    #[error("Failed to save timeout to file: {0}")]
    PersistTimeout(#[source] StoreError),

    #[error("Failed to save auth ticket: {0}")]
    PersistTicket(#[source] StoreError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::PersistTimeout(_) | Self::PersistTicket(_) => ErrorKind::Persistence,
            Self::Finalize(ResourceError::Store(StoreError::Write { .. })) => {
                ErrorKind::Persistence
            }
            _ => ErrorKind::Resource,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            Error::from(ConfigError::MissingSession).kind(),
            ErrorKind::Configuration
        );

        let write = || StoreError::Write {
            path: PathBuf::from("ticket.bin"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(Error::PersistTicket(write()).kind(), ErrorKind::Persistence);
        assert_eq!(
            Error::Finalize(ResourceError::Store(write())).kind(),
            ErrorKind::Persistence
        );

        let rc = TpmError::CommandFailed {
            command: "TPM2_PolicyGetDigest",
            rc: TPM_RC::HANDLE,
        };
        assert_eq!(Error::Finalize(rc.into()).kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_messages_name_the_step() {
        let err = Error::SessionRestore {
            path: PathBuf::from("session.ctx"),
            source: ResourceError::Invalid("gone".into()),
        };
        assert_eq!(
            err.to_string(),
            "could not restore policy session from \"session.ctx\": gone"
        );
    }
}
