/*
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the MIT License. See the LICENSE file in the project root for full license information.
 */

//! The subset of TPM 2.0 Part 2 types PolicySecret touches

use std::fmt;

use crate::error::TpmError;
use crate::tpm_buffer::TpmBuffer;
use crate::tpm_structure::{TpmEnum, TpmStructure};

/// Size of the largest digest in `TPMU_HA`; bounds nonces and policy references
pub const MAX_DIGEST_SIZE: usize = 64;

/// Hash algorithm identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TPM_ALG_ID {
    SHA1 = 0x0004,
    SHA256 = 0x000B,
    SHA384 = 0x000C,
    SHA512 = 0x000D,
    SM3_256 = 0x0012,
}

impl TpmEnum<u16> for TPM_ALG_ID {
    fn get_value(&self) -> u16 {
        *self as u16
    }

    fn try_from_value(value: u16) -> Result<Self, TpmError> {
        Ok(match value {
            0x0004 => Self::SHA1,
            0x000B => Self::SHA256,
            0x000C => Self::SHA384,
            0x000D => Self::SHA512,
            0x0012 => Self::SM3_256,
            other => return Err(TpmError::InvalidEnumValue(other as u32)),
        })
    }
}

/// Command codes
pub struct TPM_CC;

#[allow(non_upper_case_globals)]
impl TPM_CC {
    pub const PolicySecret: u32 = 0x0000_0151;
}

/// Structure tags
pub struct TPM_ST;

impl TPM_ST {
    pub const AUTH_SECRET: u16 = 0x8023;
}

/// Permanent handles
pub struct TPM_RH;

impl TPM_RH {
    pub const OWNER: u32 = 0x4000_0001;
    pub const NULL: u32 = 0x4000_0007;
    pub const PW: u32 = 0x4000_0009;
    pub const LOCKOUT: u32 = 0x4000_000A;
    pub const ENDORSEMENT: u32 = 0x4000_000B;
    pub const PLATFORM: u32 = 0x4000_000C;
}

/// Session types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TPM_SE {
    HMAC = 0x00,
    POLICY = 0x01,
    TRIAL = 0x03,
}

impl TpmEnum<u8> for TPM_SE {
    fn get_value(&self) -> u8 {
        *self as u8
    }

    fn try_from_value(value: u8) -> Result<Self, TpmError> {
        Ok(match value {
            0x00 => Self::HMAC,
            0x01 => Self::POLICY,
            0x03 => Self::TRIAL,
            other => return Err(TpmError::InvalidEnumValue(other as u32)),
        })
    }
}

/// TPM response code
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TPM_RC(pub u32);

impl TPM_RC {
    pub const SUCCESS: TPM_RC = TPM_RC(0x000);
    pub const TYPE: TPM_RC = TPM_RC(0x08A);
    pub const HANDLE: TPM_RC = TPM_RC(0x08B);
    pub const AUTH_FAIL: TPM_RC = TPM_RC(0x08E);
    pub const NONCE: TPM_RC = TPM_RC(0x08F);
    pub const SESSION_MEMORY: TPM_RC = TPM_RC(0x903);

    fn name(&self) -> Option<&'static str> {
        Some(match *self {
            Self::SUCCESS => "TPM_RC_SUCCESS",
            Self::TYPE => "TPM_RC_TYPE",
            Self::HANDLE => "TPM_RC_HANDLE",
            Self::AUTH_FAIL => "TPM_RC_AUTH_FAIL",
            Self::NONCE => "TPM_RC_NONCE",
            Self::SESSION_MEMORY => "TPM_RC_SESSION_MEMORY",
            _ => return None,
        })
    }
}

impl fmt::Display for TPM_RC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:X})", name, self.0),
            None => write!(f, "0x{:X}", self.0),
        }
    }
}

impl fmt::Debug for TPM_RC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A TPM handle; the top octet encodes the handle type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TPM_HANDLE(pub u32);

impl TPM_HANDLE {
    pub const HT_NV_INDEX: u8 = 0x01;
    pub const HT_HMAC_SESSION: u8 = 0x02;
    pub const HT_POLICY_SESSION: u8 = 0x03;
    pub const HT_PERMANENT: u8 = 0x40;
    pub const HT_TRANSIENT: u8 = 0x80;
    pub const HT_PERSISTENT: u8 = 0x81;

    pub fn new(handle: u32) -> Self {
        TPM_HANDLE(handle)
    }

    pub fn handle_type(&self) -> u8 {
        (self.0 >> 24) as u8
    }
}

impl fmt::Display for TPM_HANDLE {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Authorization ticket returned by PolicySecret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TPMT_TK_AUTH {
    pub tag: u16,
    pub hierarchy: u32,
    pub digest: Vec<u8>,
}

impl TPMT_TK_AUTH {
    /// The ticket a TPM hands back when it produced none
    pub fn null_ticket() -> Self {
        TPMT_TK_AUTH {
            tag: TPM_ST::AUTH_SECRET,
            hierarchy: TPM_RH::NULL,
            digest: Vec::new(),
        }
    }
}

impl TpmStructure for TPMT_TK_AUTH {
    fn to_tpm(&self, buffer: &mut TpmBuffer) -> Result<(), TpmError> {
        buffer.write_u16(self.tag);
        buffer.write_u32(self.hierarchy);
        buffer.write_sized(&self.digest)
    }

    fn from_tpm(buffer: &mut TpmBuffer) -> Result<Self, TpmError> {
        let tag = buffer.read_u16()?;
        if tag != TPM_ST::AUTH_SECRET {
            return Err(TpmError::IncorrectTag {
                expected: TPM_ST::AUTH_SECRET as u32,
                actual: tag as u32,
            });
        }
        Ok(TPMT_TK_AUTH {
            tag,
            hierarchy: buffer.read_u32()?,
            digest: buffer.read_sized(MAX_DIGEST_SIZE)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_wire_layout() {
        let ticket = TPMT_TK_AUTH {
            tag: TPM_ST::AUTH_SECRET,
            hierarchy: TPM_RH::OWNER,
            digest: vec![0xDE, 0xAD],
        };
        let bytes = ticket.to_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![0x80, 0x23, 0x40, 0x00, 0x00, 0x01, 0x00, 0x02, 0xDE, 0xAD]
        );
        assert_eq!(TPMT_TK_AUTH::from_bytes(bytes).unwrap(), ticket);
    }

    #[test]
    fn test_ticket_rejects_wrong_tag() {
        let bytes = vec![0x80, 0x21, 0x40, 0x00, 0x00, 0x07, 0x00, 0x00];
        assert!(matches!(
            TPMT_TK_AUTH::from_bytes(bytes),
            Err(TpmError::IncorrectTag { expected: 0x8023, actual: 0x8021 })
        ));
    }

    #[test]
    fn test_rc_display() {
        assert_eq!(TPM_RC::AUTH_FAIL.to_string(), "TPM_RC_AUTH_FAIL (0x8E)");
        assert_eq!(TPM_RC(0x1234).to_string(), "0x1234");
    }

    #[test]
    fn test_handle_type() {
        assert_eq!(
            TPM_HANDLE::new(TPM_RH::ENDORSEMENT).handle_type(),
            TPM_HANDLE::HT_PERMANENT
        );
        assert_eq!(
            TPM_HANDLE::new(0x8100_0001).handle_type(),
            TPM_HANDLE::HT_PERSISTENT
        );
    }
}
