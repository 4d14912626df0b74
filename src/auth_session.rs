use std::path::PathBuf;

use derivative::Derivative;
use zeroize::Zeroizing;

use crate::error::ConfigError;
use crate::tpm_types::{TPM_ALG_ID, TPM_HANDLE, TPM_RH, TPM_SE, MAX_DIGEST_SIZE};

/// What kind of authorization a [`Session`] provides
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub enum SessionKind {
    /// Password pseudo-session carrying the auth value in the clear
    Password(#[derivative(Debug = "ignore")] Zeroizing<Vec<u8>>),
    Hmac,
    Policy,
    Trial,
}

/// Authorization or policy session held by the tool
#[derive(Debug, Clone)]
pub struct Session {
    pub handle: TPM_HANDLE,
    pub kind: SessionKind,
    pub hash_alg: TPM_ALG_ID,
    /// Context file the session was restored from; closing saves it back
    pub path: Option<PathBuf>,
}

impl Session {
    /// Create a password authorization session (PWAP)
    pub fn pw(auth_value: Zeroizing<Vec<u8>>) -> Self {
        Session {
            handle: TPM_HANDLE::new(TPM_RH::PW),
            kind: SessionKind::Password(auth_value),
            hash_alg: TPM_ALG_ID::SHA256,
            path: None,
        }
    }

    pub fn restored(handle: TPM_HANDLE, session_type: TPM_SE, hash_alg: TPM_ALG_ID, path: PathBuf) -> Self {
        let kind = match session_type {
            TPM_SE::HMAC => SessionKind::Hmac,
            TPM_SE::POLICY => SessionKind::Policy,
            TPM_SE::TRIAL => SessionKind::Trial,
        };
        Session {
            handle,
            kind,
            hash_alg,
            path: Some(path),
        }
    }

    /// Check if this is a password authorization session
    pub fn is_pwap(&self) -> bool {
        self.handle.0 == TPM_RH::PW
    }

    /// Policy and trial sessions both accumulate a policy digest
    pub fn is_policy(&self) -> bool {
        matches!(self.kind, SessionKind::Policy | SessionKind::Trial)
    }
}

/// Parsed form of an auth string in `tpm2-tools` syntax
#[derive(Derivative, Clone)]
#[derivative(Debug, PartialEq)]
pub enum AuthSpec {
    /// No auth value, no session is opened
    Empty,
    Password(#[derivative(Debug = "ignore")] Zeroizing<Vec<u8>>),
    /// `file:<path>`; `None` reads stdin
    PasswordFile(Option<PathBuf>),
    /// `session:<path>` uses an existing session as the authorization
    Session(PathBuf),
}

impl AuthSpec {
    pub fn parse(auth: Option<&str>) -> Result<Self, ConfigError> {
        let auth = match auth {
            None | Some("") => return Ok(AuthSpec::Empty),
            Some(auth) => auth,
        };

        let password = match auth.split_once(':') {
            Some(("str", value)) => value.as_bytes().to_vec(),
            Some(("hex", value)) => {
                hex::decode(value).map_err(|_| ConfigError::InvalidAuth(auth.to_string()))?
            }
            Some(("file", "-")) => return Ok(AuthSpec::PasswordFile(None)),
            Some(("file", path)) if !path.is_empty() => {
                return Ok(AuthSpec::PasswordFile(Some(PathBuf::from(path))))
            }
            Some(("session", path)) if !path.is_empty() => {
                return Ok(AuthSpec::Session(PathBuf::from(path)))
            }
            Some(("file", _)) | Some(("session", _)) => {
                return Err(ConfigError::InvalidAuth(auth.to_string()))
            }
            Some(("pcr", _)) => return Err(ConfigError::UnsupportedAuth(auth.to_string())),
            _ => auth.as_bytes().to_vec(),
        };

        Self::password(password).map_err(|_| ConfigError::InvalidAuth(auth.to_string()))
    }

    /// Wraps raw password bytes; zero length means no auth at all
    pub fn password(bytes: Vec<u8>) -> Result<Self, ConfigError> {
        let bytes = Zeroizing::new(bytes);
        if bytes.len() > MAX_DIGEST_SIZE {
            return Err(ConfigError::InvalidAuth(format!(
                "<{} byte password>",
                bytes.len()
            )));
        }
        if bytes.is_empty() {
            return Ok(AuthSpec::Empty);
        }
        Ok(AuthSpec::Password(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pw(bytes: &[u8]) -> AuthSpec {
        AuthSpec::Password(Zeroizing::new(bytes.to_vec()))
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(AuthSpec::parse(None).unwrap(), AuthSpec::Empty);
        assert_eq!(AuthSpec::parse(Some("")).unwrap(), AuthSpec::Empty);
        assert_eq!(AuthSpec::parse(Some("str:")).unwrap(), AuthSpec::Empty);
        assert_eq!(AuthSpec::parse(Some("secret")).unwrap(), pw(b"secret"));
        assert_eq!(AuthSpec::parse(Some("str:a:b")).unwrap(), pw(b"a:b"));
        assert_eq!(AuthSpec::parse(Some("hex:0102ff")).unwrap(), pw(&[1, 2, 0xff]));
        assert_eq!(
            AuthSpec::parse(Some("file:-")).unwrap(),
            AuthSpec::PasswordFile(None)
        );
        assert_eq!(
            AuthSpec::parse(Some("file:auth.bin")).unwrap(),
            AuthSpec::PasswordFile(Some(PathBuf::from("auth.bin")))
        );
        assert_eq!(
            AuthSpec::parse(Some("session:hmac.ctx")).unwrap(),
            AuthSpec::Session(PathBuf::from("hmac.ctx"))
        );
    }

    #[test]
    fn test_parse_rejects() {
        assert!(matches!(
            AuthSpec::parse(Some("hex:zz")),
            Err(ConfigError::InvalidAuth(_))
        ));
        assert!(matches!(
            AuthSpec::parse(Some("session:")),
            Err(ConfigError::InvalidAuth(_))
        ));
        assert!(matches!(
            AuthSpec::parse(Some("pcr:sha256:0")),
            Err(ConfigError::UnsupportedAuth(_))
        ));
        let long = "a".repeat(MAX_DIGEST_SIZE + 1);
        assert!(matches!(
            AuthSpec::parse(Some(&long)),
            Err(ConfigError::InvalidAuth(_))
        ));
    }

    #[test]
    fn test_password_hidden_from_debug() {
        let session = Session::pw(Zeroizing::new(b"hunter2".to_vec()));
        assert!(session.is_pwap());
        assert!(!session.is_policy());
        assert!(!format!("{:?}", session).contains("hunter2"));
        assert!(!format!("{:?}", pw(b"hunter2")).contains("hunter2"));
    }
}
