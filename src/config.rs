//! Immutable run configuration for one PolicySecret assertion

use std::path::{Path, PathBuf};

use crate::auth_session::AuthSpec;
use crate::error::ConfigError;
use crate::files::{ArtifactStore, Source};
use crate::tpm_types::MAX_DIGEST_SIZE;

/// Context locator plus auth of the entity whose secret is proven
#[derive(Debug, Clone)]
pub struct EntityLocator {
    pub context_path: String,
    pub auth: AuthSpec,
}

/// `nonceTPM` bound into the assertion; at most [`MAX_DIGEST_SIZE`] bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    pub fn new(bytes: Vec<u8>) -> Result<Self, ConfigError> {
        if bytes.len() > MAX_DIGEST_SIZE {
            return Err(ConfigError::NonceTooLarge {
                size: bytes.len(),
                max: MAX_DIGEST_SIZE,
            });
        }
        Ok(Nonce(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Reads the nonce from a file, or from stdin when `location` is `-`
pub fn load_nonce<S: ArtifactStore + ?Sized>(store: &S, location: &str) -> Result<Nonce, ConfigError> {
    let source = match location {
        "-" => Source::Stdin,
        path => Source::Path(Path::new(path)),
    };
    let bytes = store
        .read_bytes(source, MAX_DIGEST_SIZE)
        .map_err(ConfigError::Nonce)?;
    Nonce::new(bytes)
}

/// Parses a 32-bit value the way `strtoul` with base 0 does: `0x` is hex, a
/// leading `0` is octal, anything else decimal, with an optional sign. The
/// 32 bits are taken as `i32`, so `4294967295` is `-1`.
pub fn parse_expiration(value: &str) -> Result<i32, ConfigError> {
    let invalid = || ConfigError::InvalidExpiration(value.to_string());
    let (negative, unsigned) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let (radix, digits) = match unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        Some(hex) => (16, hex),
        None if unsigned.len() > 1 && unsigned.starts_with('0') => (8, &unsigned[1..]),
        None => (10, unsigned),
    };
    if digits.is_empty() || !digits.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(invalid());
    }
    let magnitude = u32::from_str_radix(digits, radix).map_err(|_| invalid())?;
    let raw = if negative {
        magnitude.wrapping_neg()
    } else {
        magnitude
    };
    Ok(raw as i32)
}

#[derive(Debug, Clone, Default)]
pub struct PolicySecretConfig {
    /// Context file of the policy session to extend
    pub policy_session: Option<PathBuf>,
    pub entity: Option<EntityLocator>,
    pub expiration: i32,
    pub nonce_tpm: Nonce,
    /// File holding the policyRef qualifier
    pub qualifier_data: Option<PathBuf>,
    pub policy_digest_out: Option<PathBuf>,
    pub ticket_out: Option<PathBuf>,
    pub timeout_out: Option<PathBuf>,
}

impl PolicySecretConfig {
    /// The two locators every run needs
    pub fn validate(&self) -> Result<(&Path, &EntityLocator), ConfigError> {
        let session = self
            .policy_session
            .as_deref()
            .ok_or(ConfigError::MissingSession)?;
        let entity = self
            .entity
            .as_ref()
            .filter(|e| !e.context_path.is_empty())
            .ok_or(ConfigError::MissingObjectContext)?;
        Ok((session, entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FsStore;

    #[test]
    fn test_parse_expiration() {
        assert_eq!(parse_expiration("0").unwrap(), 0);
        assert_eq!(parse_expiration("300").unwrap(), 300);
        assert_eq!(parse_expiration("-30").unwrap(), -30);
        assert_eq!(parse_expiration("0xFFFFFFFF").unwrap(), -1);
        assert_eq!(parse_expiration("0x10").unwrap(), 16);
        assert!(matches!(
            parse_expiration("ten"),
            Err(ConfigError::InvalidExpiration(_))
        ));
        assert!(parse_expiration("4294967296").is_err());
        assert!(parse_expiration("0x100000000").is_err());
        assert!(parse_expiration("").is_err());
        assert!(parse_expiration("-").is_err());
        assert!(parse_expiration("0x").is_err());
        assert!(parse_expiration("--5").is_err());
    }

    #[test]
    fn test_parse_expiration_full_u32_range() {
        assert_eq!(parse_expiration("4294967295").unwrap(), -1);
        assert_eq!(parse_expiration("2147483648").unwrap(), i32::MIN);
        assert_eq!(parse_expiration("-2147483648").unwrap(), i32::MIN);
        assert_eq!(parse_expiration("+42").unwrap(), 42);
        assert_eq!(parse_expiration("-0x10").unwrap(), -16);
    }

    #[test]
    fn test_parse_expiration_octal() {
        assert_eq!(parse_expiration("010").unwrap(), 8);
        assert_eq!(parse_expiration("-017").unwrap(), -15);
        assert_eq!(parse_expiration("00").unwrap(), 0);
        assert!(parse_expiration("09").is_err());
    }

    #[test]
    fn test_nonce_bounds() {
        assert!(Nonce::new(vec![0; MAX_DIGEST_SIZE]).is_ok());
        assert!(matches!(
            Nonce::new(vec![0; MAX_DIGEST_SIZE + 1]),
            Err(ConfigError::NonceTooLarge { size: 65, max: 64 })
        ));
    }

    #[test]
    fn test_load_nonce_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonce.bin");
        std::fs::write(&path, [5u8; 16]).unwrap();
        let nonce = load_nonce(&FsStore, path.to_str().unwrap()).unwrap();
        assert_eq!(nonce.as_bytes(), &[5u8; 16]);

        std::fs::write(&path, [5u8; 80]).unwrap();
        assert!(matches!(
            load_nonce(&FsStore, path.to_str().unwrap()),
            Err(ConfigError::Nonce(_))
        ));
    }

    #[test]
    fn test_validate_requires_locators() {
        let mut config = PolicySecretConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingSession)));

        config.policy_session = Some(PathBuf::from("session.ctx"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingObjectContext)
        ));

        config.entity = Some(EntityLocator {
            context_path: "o".into(),
            auth: AuthSpec::Empty,
        });
        let (session, entity) = config.validate().unwrap();
        assert_eq!(session, Path::new("session.ctx"));
        assert_eq!(entity.context_path, "o");
    }
}
