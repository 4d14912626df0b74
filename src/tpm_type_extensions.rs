use crate::crypto::Crypto;
use crate::tpm_types::*;

impl TPM_ALG_ID {
    pub fn digest_size(&self) -> usize {
        Crypto::digest_size(*self)
    }
}

impl TPM_HANDLE {
    /// Maps the `tpm2-tools` hierarchy shorthands onto their permanent handles
    pub fn from_hierarchy_alias(alias: &str) -> Option<Self> {
        let handle = match alias {
            "o" | "owner" => TPM_RH::OWNER,
            "p" | "platform" => TPM_RH::PLATFORM,
            "e" | "endorsement" => TPM_RH::ENDORSEMENT,
            "n" | "null" => TPM_RH::NULL,
            "l" | "lockout" => TPM_RH::LOCKOUT,
            _ => return None,
        };
        Some(TPM_HANDLE::new(handle))
    }

    /// Parses `0x`-prefixed hex or plain decimal handle values
    pub fn parse(value: &str) -> Option<Self> {
        let raw = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                value.parse().ok()?
            }
            None => return None,
        };
        Some(TPM_HANDLE::new(raw))
    }

    pub fn is_hierarchy(&self) -> bool {
        matches!(
            self.0,
            TPM_RH::OWNER | TPM_RH::PLATFORM | TPM_RH::ENDORSEMENT | TPM_RH::NULL | TPM_RH::LOCKOUT
        )
    }

    /// Handles an auth entity may live at when NV indices are allowed
    pub fn is_auth_entity(&self) -> bool {
        match self.handle_type() {
            TPM_HANDLE::HT_PERMANENT => self.is_hierarchy(),
            TPM_HANDLE::HT_TRANSIENT | TPM_HANDLE::HT_PERSISTENT | TPM_HANDLE::HT_NV_INDEX => true,
            _ => false,
        }
    }

    /// Name of a permanent handle: the handle value itself
    pub fn permanent_name(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }

    /// Hierarchy a ticket issued against this permanent handle belongs to
    pub fn ticket_hierarchy(&self) -> u32 {
        match self.0 {
            TPM_RH::LOCKOUT => TPM_RH::OWNER,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        assert_eq!(
            TPM_HANDLE::from_hierarchy_alias("e"),
            Some(TPM_HANDLE::new(TPM_RH::ENDORSEMENT))
        );
        assert_eq!(
            TPM_HANDLE::from_hierarchy_alias("owner"),
            Some(TPM_HANDLE::new(TPM_RH::OWNER))
        );
        assert_eq!(TPM_HANDLE::from_hierarchy_alias("x"), None);
    }

    #[test]
    fn test_parse_handles() {
        assert_eq!(
            TPM_HANDLE::parse("0x81000001"),
            Some(TPM_HANDLE::new(0x8100_0001))
        );
        assert_eq!(TPM_HANDLE::parse("1073741825"), Some(TPM_HANDLE::new(TPM_RH::OWNER)));
        assert_eq!(TPM_HANDLE::parse("key.ctx"), None);
        assert_eq!(TPM_HANDLE::parse("0xnothex"), None);
        assert_eq!(TPM_HANDLE::parse(""), None);
    }

    #[test]
    fn test_auth_entity_ranges() {
        assert!(TPM_HANDLE::new(0x0150_0016).is_auth_entity());
        assert!(TPM_HANDLE::new(TPM_RH::PLATFORM).is_auth_entity());
        assert!(!TPM_HANDLE::new(TPM_RH::PW).is_auth_entity());
        assert!(!TPM_HANDLE::new(0x0300_0000).is_auth_entity());
    }

    #[test]
    fn test_permanent_name() {
        assert_eq!(
            TPM_HANDLE::new(TPM_RH::ENDORSEMENT).permanent_name(),
            vec![0x40, 0x00, 0x00, 0x0B]
        );
        assert_eq!(TPM_HANDLE::new(TPM_RH::LOCKOUT).ticket_hierarchy(), TPM_RH::OWNER);
    }
}
